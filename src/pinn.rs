use crate::error::Result;
use crate::model::{Jet, Model};
use burn::module::{AutodiffModule, Module};
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::Tensor;
use burn::tensor::backend::AutodiffBackend;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 速度 u のチャネル
pub const CH_U: usize = 0;
/// 速度 v のチャネル
pub const CH_V: usize = 1;
/// 厚さ h のチャネル
pub const CH_H: usize = 2;
/// 粘性 mu のチャネル
pub const CH_MU: usize = 3;
/// 異方性粘性 eta（`Anisotropic`）または基底摩擦 c（`Basal`）のチャネル
pub const CH_EXTRA: usize = 4;

/// 推定する物性のモデル。学習の組み立て時に一度だけ選びます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// 等方的な粘性のみ
    #[default]
    Isotropic,
    /// 等方的な粘性と基底摩擦
    #[serde(rename = "basal")]
    #[value(name = "basal")]
    IsotropicBasal,
    /// 異方性粘性（mu, eta）
    Anisotropic,
}

impl Mode {
    /// ネットワークの出力チャネル数
    pub fn channels(self) -> usize {
        match self {
            Mode::Isotropic => 4,
            Mode::IsotropicBasal | Mode::Anisotropic => 5,
        }
    }

    pub fn is_basal(self) -> bool {
        matches!(self, Mode::IsotropicBasal)
    }

    pub fn is_aniso(self) -> bool {
        matches!(self, Mode::Anisotropic)
    }
}

/// 解の場を表すネットワーク。
///
/// 損失関数・支配方程式・予測はこのトレイトを通してのみネットワークを呼び出します。
pub trait SolutionNet<B: Backend> {
    /// `[N, 2]` の位置から `[N, C]` のチャネルを返します。
    fn forward(&self, positions: Tensor<B, 2>) -> Tensor<B, 2>;

    /// 値と2階までの空間微分。
    fn jet(&self, positions: Tensor<B, 2>) -> Jet<B>;

    /// 微分演算子。`([N, 2C] の1階微分, [N, C] の値)` を返します。
    fn gradients(&self, positions: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let jet = self.jet(positions);
        (jet.gradients(), jet.value)
    }
}

/// MLP に出力ヘッドを付けたPINNの解関数。
///
/// u, v, h はそのまま、粘性（mu, eta）は `exp` で正値に、基底摩擦は2乗で非負にします。
#[derive(Debug, Clone)]
pub struct Pinn<B: Backend> {
    pub model: Model<B>,
    mode: Mode,
}

impl<B: Backend> Pinn<B> {
    pub fn new(device: &B::Device, mode: Mode, hidden_layers: usize, hidden_units: usize) -> Self {
        Self {
            model: Model::new(device, hidden_layers, hidden_units, mode.channels()),
            mode,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// 保存済みのモデルを読み込みます。
    pub fn load(
        path: impl AsRef<Path>,
        device: &B::Device,
        mode: Mode,
        hidden_layers: usize,
        hidden_units: usize,
    ) -> Result<Self> {
        let model = Model::new(device, hidden_layers, hidden_units, mode.channels()).load_file(
            path.as_ref().to_path_buf(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )?;
        Ok(Self { model, mode })
    }

    /// モデルをファイルに保存します。
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.model.clone().save_file(
            path.as_ref().to_path_buf(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        )?;
        Ok(())
    }

    fn head(&self, raw: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, c] = raw.dims();
        let mut cols = vec![raw.clone().slice([0..n, 0..CH_MU])];
        for k in CH_MU..c {
            let col = raw.clone().slice([0..n, k..k + 1]);
            cols.push(match (self.mode, k) {
                (Mode::IsotropicBasal, CH_EXTRA) => col.powf_scalar(2.0),
                _ => col.exp(),
            });
        }
        Tensor::cat(cols, 1)
    }
}

impl<B: AutodiffBackend> Pinn<B> {
    /// 勾配計算を外した推論用のネットワークを返します。
    pub fn valid(&self) -> Pinn<B::InnerBackend> {
        Pinn {
            model: self.model.valid(),
            mode: self.mode,
        }
    }
}

/// `exp` の連鎖律: `v' = v z'`, `v'' = v (z'' + z'_i z'_j)`。
fn exp_jet<B: Backend>(z: Jet<B>) -> Jet<B> {
    let v = z.value.exp();
    Jet {
        dxx: v.clone().mul(z.dxx + z.dx.clone().mul(z.dx.clone())),
        dxy: v.clone().mul(z.dxy + z.dx.clone().mul(z.dy.clone())),
        dyy: v.clone().mul(z.dyy + z.dy.clone().mul(z.dy.clone())),
        dx: v.clone().mul(z.dx),
        dy: v.clone().mul(z.dy),
        value: v,
    }
}

/// 2乗の連鎖律: `v' = 2 z z'`, `v'' = 2 (z'_i z'_j + z z'')`。
fn square_jet<B: Backend>(z: Jet<B>) -> Jet<B> {
    let two_z = z.value.clone().mul_scalar(2.0);
    Jet {
        dxx: (z.dx.clone().mul(z.dx.clone()) + z.value.clone().mul(z.dxx)).mul_scalar(2.0),
        dxy: (z.dx.clone().mul(z.dy.clone()) + z.value.clone().mul(z.dxy)).mul_scalar(2.0),
        dyy: (z.dy.clone().mul(z.dy.clone()) + z.value.clone().mul(z.dyy)).mul_scalar(2.0),
        dx: two_z.clone().mul(z.dx),
        dy: two_z.mul(z.dy),
        value: z.value.powf_scalar(2.0),
    }
}

impl<B: Backend> SolutionNet<B> for Pinn<B> {
    fn forward(&self, positions: Tensor<B, 2>) -> Tensor<B, 2> {
        self.head(self.model.forward(positions))
    }

    fn jet(&self, positions: Tensor<B, 2>) -> Jet<B> {
        let raw = self.model.jet(positions);
        let [n, c] = raw.value.dims();
        let mut parts = vec![raw.map(|t| t.slice([0..n, 0..CH_MU]))];
        for k in CH_MU..c {
            let z = raw.channel(k);
            parts.push(match (self.mode, k) {
                (Mode::IsotropicBasal, CH_EXTRA) => square_jet(z),
                _ => exp_jet(z),
            });
        }
        Jet::cat(parts)
    }
}
