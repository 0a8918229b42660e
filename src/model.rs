use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Tanh};
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// ある点における解とその空間微分（2階まで）。
///
/// すべての成分が `[N, C]` の形で、列がネットワークの出力チャネルに対応します。
#[derive(Debug, Clone)]
pub struct Jet<B: Backend> {
    pub value: Tensor<B, 2>,
    pub dx: Tensor<B, 2>,
    pub dy: Tensor<B, 2>,
    pub dxx: Tensor<B, 2>,
    pub dxy: Tensor<B, 2>,
    pub dyy: Tensor<B, 2>,
}

impl<B: Backend> Jet<B> {
    /// 同じ写像をすべての成分に適用します。
    pub fn map(&self, f: impl Fn(Tensor<B, 2>) -> Tensor<B, 2>) -> Self {
        Self {
            value: f(self.value.clone()),
            dx: f(self.dx.clone()),
            dy: f(self.dy.clone()),
            dxx: f(self.dxx.clone()),
            dxy: f(self.dxy.clone()),
            dyy: f(self.dyy.clone()),
        }
    }

    /// `k` 番目のチャネルだけを取り出します（`[N, 1]`）。
    pub fn channel(&self, k: usize) -> Self {
        let [n, _] = self.value.dims();
        self.map(|t| t.slice([0..n, k..k + 1]))
    }

    /// 列方向にチャネルを連結します。
    pub fn cat(jets: Vec<Self>) -> Self {
        let mut value = Vec::with_capacity(jets.len());
        let mut dx = Vec::with_capacity(jets.len());
        let mut dy = Vec::with_capacity(jets.len());
        let mut dxx = Vec::with_capacity(jets.len());
        let mut dxy = Vec::with_capacity(jets.len());
        let mut dyy = Vec::with_capacity(jets.len());
        for jet in jets {
            value.push(jet.value);
            dx.push(jet.dx);
            dy.push(jet.dy);
            dxx.push(jet.dxx);
            dxy.push(jet.dxy);
            dyy.push(jet.dyy);
        }
        Self {
            value: Tensor::cat(value, 1),
            dx: Tensor::cat(dx, 1),
            dy: Tensor::cat(dy, 1),
            dxx: Tensor::cat(dxx, 1),
            dxy: Tensor::cat(dxy, 1),
            dyy: Tensor::cat(dyy, 1),
        }
    }

    /// 1階微分をチャネルごとに `[d/dx, d/dy]` の順で並べた `[N, 2C]` を返します。
    pub fn gradients(&self) -> Tensor<B, 2> {
        let [n, c] = self.value.dims();
        let mut cols = Vec::with_capacity(2 * c);
        for k in 0..c {
            cols.push(self.dx.clone().slice([0..n, k..k + 1]));
            cols.push(self.dy.clone().slice([0..n, k..k + 1]));
        }
        Tensor::cat(cols, 1)
    }

    /// 重みを掛ける線形層（バイアスは値にのみ効く）。
    fn linear(self, layer: &Linear<B>) -> Self {
        let w = layer.weight.val();
        Self {
            value: layer.forward(self.value),
            dx: self.dx.matmul(w.clone()),
            dy: self.dy.matmul(w.clone()),
            dxx: self.dxx.matmul(w.clone()),
            dxy: self.dxy.matmul(w.clone()),
            dyy: self.dyy.matmul(w),
        }
    }

    /// tanh の連鎖律。`s = 1 - t^2` として `a'' = s z'' - 2 t s z'_i z'_j`。
    fn tanh(self) -> Self {
        let t = self.value.tanh();
        let s = t.clone().powf_scalar(2.0).neg().add_scalar(1.0);
        let ts2 = t.clone().mul(s.clone()).mul_scalar(2.0);
        Self {
            dxx: s.clone().mul(self.dxx) - ts2.clone().mul(self.dx.clone()).mul(self.dx.clone()),
            dxy: s.clone().mul(self.dxy) - ts2.clone().mul(self.dx.clone()).mul(self.dy.clone()),
            dyy: s.clone().mul(self.dyy) - ts2.mul(self.dy.clone()).mul(self.dy.clone()),
            dx: s.clone().mul(self.dx),
            dy: s.mul(self.dy),
            value: t,
        }
    }
}

/// PINNの本体となるニューラルネットワークモデル。
///
/// 正規化した座標(x, y)を入力とし、その点における解のチャネル（速度・厚さ・粘性など）を
/// 予測する多層パーセプトロン（MLP）です。
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    linears: Vec<Linear<B>>,
    activation: Tanh,
}

impl<B: Backend> Model<B> {
    /// 新しいモデルを初期化します。
    pub fn new(device: &B::Device, hidden_layers: usize, hidden_units: usize, outputs: usize) -> Self {
        let mut linears = Vec::with_capacity(hidden_layers + 1);
        linears.push(LinearConfig::new(2, hidden_units).init(device));
        for _ in 1..hidden_layers {
            linears.push(LinearConfig::new(hidden_units, hidden_units).init(device));
        }
        linears.push(LinearConfig::new(hidden_units, outputs).init(device));
        Self {
            linears,
            activation: Tanh::new(),
        }
    }

    /// モデルの順伝播を実行します。
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.linears.len() - 1;
        let mut x = input;
        for (i, linear) in self.linears.iter().enumerate() {
            x = linear.forward(x);
            if i < last {
                x = self.activation.forward(x);
            }
        }
        x
    }

    /// 順伝播と同時に、入力座標についての1階・2階微分を前進モードで伝播します。
    ///
    /// 逆伝播を使わないため、結果はパラメータについてそのまま微分可能です。
    pub fn jet(&self, input: Tensor<B, 2>) -> Jet<B> {
        let [n, _] = input.dims();
        let device = input.device();
        let zeros = Tensor::<B, 2>::zeros([n, 2], &device);
        let mut jet = Jet {
            value: input,
            dx: Tensor::<B, 2>::from_floats([[1.0, 0.0]], &device).repeat_dim(0, n),
            dy: Tensor::<B, 2>::from_floats([[0.0, 1.0]], &device).repeat_dim(0, n),
            dxx: zeros.clone(),
            dxy: zeros.clone(),
            dyy: zeros,
        };
        let last = self.linears.len() - 1;
        for (i, linear) in self.linears.iter().enumerate() {
            jet = jet.linear(linear);
            if i < last {
                jet = jet.tanh();
            }
        }
        jet
    }
}
