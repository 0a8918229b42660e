use crate::data::PointCounts;
use crate::error::Result;
use crate::pinn::Mode;
use crate::prediction::PredictConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 学習の設定。JSON ファイルから読み込み、省略した項目は既定値になります。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub mode: Mode,
    /// 乱数シード。省略時は実行ごとに選びます。
    pub seed: Option<u64>,
    pub hidden_layers: usize,
    pub hidden_units: usize,
    /// 1. 支配方程式 2. 境界条件 3. 追加項（摩擦ペナルティまたは正則化）の重み
    pub weights: [f32; 3],
    pub points: PointCounts,
    /// Adam の反復回数
    pub epochs: usize,
    /// 固定バッチでの仕上げの反復回数
    pub refine_epochs: usize,
    pub learning_rate: f64,
    pub refine_learning_rate: f64,
    /// 正則化の重みの下限
    pub wsp_floor: f32,
    pub predict: PredictConfig,
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Isotropic,
            seed: None,
            hidden_layers: 6,
            hidden_units: 40,
            weights: [0.05, 0.1, 0.25],
            points: PointCounts {
                n_smp: 7000,
                nh_smp: 6500,
                n_col: 7000,
                n_cbd: 600,
            },
            epochs: 10000,
            refine_epochs: 2000,
            learning_rate: 1e-3,
            refine_learning_rate: 1e-4,
            wsp_floor: 0.0125,
            predict: PredictConfig::default(),
            log_every: 200,
        }
    }
}

impl TrainConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    /// パスがあれば読み込み、なければ既定値を返します。
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
