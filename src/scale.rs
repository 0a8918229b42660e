//! 無次元化のための代表スケール。

use serde::{Deserialize, Serialize};

/// 氷の密度 [kg/m^3]
pub const RHO_ICE: f64 = 917.0;
/// 海水の密度 [kg/m^3]
pub const RHO_WATER: f64 = 1030.0;
/// 重力加速度 [m/s^2]
pub const GRAVITY: f64 = 9.8;

/// 浮力で減じた重力加速度 `g (1 - ρ/ρw)`。
pub fn reduced_gravity() -> f64 {
    GRAVITY * (1.0 - RHO_ICE / RHO_WATER)
}

/// データセットの正規化統計量。
///
/// 添字の並びは `[x, y, u, v, h]` です。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleStats {
    pub mean: [f64; 5],
    pub range: [f64; 5],
}

/// 物理量ごとの代表スケール。学習の開始時に一度だけ作られ、以後変更されません。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRecord {
    pub lx0: f64,
    pub ly0: f64,
    pub u0: f64,
    pub v0: f64,
    pub h0: f64,
    pub lxm: f64,
    pub lym: f64,
    pub um: f64,
    pub vm: f64,
    pub mu0: f64,
    /// 基底摩擦のスケール。`basal` でなければ NaN。
    pub c0: f64,
    pub str0: f64,
    pub term0: f64,
}

/// 正規化統計量から代表スケールを求めます。
///
/// 長さと速度は2軸のうち大きい方を代表値にとり、無次元化した残差が等方的になるようにします。
/// 粘性スケールは浮いた棚氷では `gd` を、接地した氷（`basal`）では `g` をそのまま使います。
pub fn extract_scale(stats: &ScaleStats, basal: bool) -> ScaleRecord {
    let gd = reduced_gravity();
    let [lx0, ly0, u0, v0, _] = stats.range;
    let [lxm, lym, um, vm, h0] = stats.mean;

    let u0m = u0.max(v0);
    let l0m = lx0.max(ly0);

    let (mu0, c0) = if basal {
        let mu0 = RHO_ICE * GRAVITY * h0 * (l0m / u0m);
        (mu0, h0 * mu0 / l0m.powi(2))
    } else {
        (RHO_ICE * gd * h0 * (l0m / u0m), f64::NAN)
    };

    ScaleRecord {
        lx0,
        ly0,
        u0,
        v0,
        h0,
        lxm,
        lym,
        um,
        vm,
        mu0,
        c0,
        str0: u0m / l0m,
        term0: RHO_ICE * gd * h0.powi(2) / l0m,
    }
}

impl ScaleRecord {
    /// 代表長さ（2軸の大きい方）
    pub fn l0m(&self) -> f64 {
        self.lx0.max(self.ly0)
    }

    /// 代表速度（2成分の大きい方）
    pub fn u0m(&self) -> f64 {
        self.u0.max(self.v0)
    }

    /// 軸ごとの比 `(rx0, ry0, ru0, rv0)`。
    pub fn axis_ratios(&self) -> (f64, f64, f64, f64) {
        let l0m = self.l0m();
        let u0m = self.u0m();
        (self.lx0 / l0m, self.ly0 / l0m, self.u0 / u0m, self.v0 / u0m)
    }

    /// 粘性応力の単位 `mu0 h0 str0` を駆動応力の単位 `term0 l0m` で割った比。
    ///
    /// 浮いた棚氷では 1、`basal` では `g / gd` になります。
    pub fn stress_ratio(&self) -> f64 {
        self.mu0 * self.h0 * self.str0 / (self.term0 * self.l0m())
    }

    pub fn is_basal(&self) -> bool {
        self.c0.is_finite()
    }
}
