//! PINN の損失関数。
//!
//! データとの誤差・支配方程式の残差・境界条件の残差・正則化項を1つのスカラーにまとめ、
//! 内訳を診断用に返します。

use crate::data::DataBatch;
use crate::equation::{BoundaryEquation, GoverningEquation, blend};
use crate::error::{PinnError, Result};
use crate::pinn::{CH_EXTRA, CH_H, CH_MU, CH_U, CH_V, Mode, SolutionNet};
use crate::scale::ScaleRecord;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// データ誤差の重み（u, v, h）
pub const DATA_WEIGHT: [f32; 3] = [1.0, 1.0, 0.6];
/// 支配方程式の残差の重み
pub const EQN_WEIGHT: [f32; 2] = [1.0, 1.0];
/// 境界条件の残差の重み
pub const BD_WEIGHT: [f32; 2] = [1.0, 1.0];
/// 浮いた氷の下での基底摩擦ペナルティの重み
pub const GROUNDED_WEIGHT: [f32; 1] = [1.0];

/// チャネルごとの平均二乗誤差。`[N, C]` から `[1, C]` を返します。
pub fn ms_error<B: Backend>(diff: Tensor<B, 2>) -> Tensor<B, 2> {
    diff.powf_scalar(2.0).mean_dim(0)
}

fn weighted_sum<B: Backend, const C: usize>(
    err: Tensor<B, 2>,
    weight: [f32; C],
    device: &B::Device,
) -> Tensor<B, 1> {
    let weight = Tensor::<B, 1>::from_floats(weight.as_slice(), device).reshape([1, C]);
    err.mul(weight).sum()
}

/// 損失の各項に掛ける外部から与える重み。
///
/// `extra` は基底摩擦モデルでは摩擦ペナルティの重み、異方性モデルでは正則化の重み `wsp` の初期値です。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TermWeights {
    pub eqn: f32,
    pub bd: f32,
    pub extra: f32,
}

impl From<[f32; 3]> for TermWeights {
    fn from([eqn, bd, extra]: [f32; 3]) -> Self {
        Self { eqn, bd, extra }
    }
}

/// モードごとに加わる項。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtraTerm {
    None,
    /// 浮いた氷の下の摩擦チャネルを抑える
    Grounded { friction: usize },
    /// mu と eta を近づける正則化
    Consistency { mu: usize, eta: usize },
}

/// 組み立て時に決まるチャネル配置と追加項。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModeLayout {
    extra: ExtraTerm,
}

impl ModeLayout {
    fn new(mode: Mode) -> Self {
        let extra = match mode {
            Mode::Isotropic => ExtraTerm::None,
            Mode::IsotropicBasal => ExtraTerm::Grounded { friction: CH_EXTRA },
            Mode::Anisotropic => ExtraTerm::Consistency {
                mu: CH_MU,
                eta: CH_EXTRA,
            },
        };
        Self { extra }
    }
}

/// 損失関数が呼び出しをまたいで持つ校正状態。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    lref: f32,
    wsp: f32,
    calibrated: bool,
}

impl Calibration {
    fn new(wsp: f32) -> Self {
        Self {
            lref: 1.0,
            wsp,
            calibrated: false,
        }
    }

    /// 損失の基準値。未設定なら 1.0。
    pub fn lref(&self) -> f32 {
        self.lref
    }

    /// 異方性モデルの正則化の重み。
    pub fn wsp(&self) -> f32 {
        self.wsp
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// 基準値を設定します。設定できるのは一度だけです。
    pub fn set_lref(&mut self, lref: f32) -> Result<()> {
        if self.calibrated {
            return Err(PinnError::AlreadyCalibrated(self.lref));
        }
        self.lref = lref;
        self.calibrated = true;
        Ok(())
    }

    pub fn set_wsp(&mut self, wsp: f32) {
        self.wsp = wsp;
    }
}

/// 損失の内訳。
///
/// `to_vec` の並びは `[total, data, eqn, bd, (grounded | sp), data_err.., eqn_err.., bd_err.., (grounded_err)]` です。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossInfo {
    pub total: f32,
    pub data: f32,
    pub eqn: f32,
    pub bd: f32,
    pub grounded: Option<f32>,
    pub sp: Option<f32>,
    pub data_err: Vec<f32>,
    pub eqn_err: Vec<f32>,
    pub bd_err: Vec<f32>,
    pub grounded_err: Option<Vec<f32>>,
}

impl LossInfo {
    /// モードごとの要素数: 等方 11、基底摩擦 13、異方性 12。
    pub fn arity(mode: Mode) -> usize {
        match mode {
            Mode::Isotropic => 1 + 3 + 3 + 2 + 2,
            Mode::IsotropicBasal => 1 + 4 + 3 + 2 + 2 + 1,
            Mode::Anisotropic => 1 + 4 + 3 + 2 + 2,
        }
    }

    fn from_flat(mode: Mode, v: &[f32]) -> Self {
        let base = if matches!(mode, Mode::Isotropic) { 4 } else { 5 };
        Self {
            total: v[0],
            data: v[1],
            eqn: v[2],
            bd: v[3],
            grounded: mode.is_basal().then(|| v[4]),
            sp: mode.is_aniso().then(|| v[4]),
            data_err: v[base..base + 3].to_vec(),
            eqn_err: v[base + 3..base + 5].to_vec(),
            bd_err: v[base + 5..base + 7].to_vec(),
            grounded_err: mode.is_basal().then(|| v[base + 7..base + 8].to_vec()),
        }
    }

    pub fn to_vec(&self) -> Vec<f32> {
        let mut out = vec![self.total, self.data, self.eqn, self.bd];
        out.extend(self.grounded);
        out.extend(self.sp);
        out.extend(&self.data_err);
        out.extend(&self.eqn_err);
        out.extend(&self.bd_err);
        if let Some(err) = &self.grounded_err {
            out.extend(err);
        }
        out
    }
}

/// 支配方程式・境界条件・代表スケール・重みを固定した損失関数。
#[derive(Debug, Clone)]
pub struct LossAssembler<E, F> {
    mode: Mode,
    layout: ModeLayout,
    governing: E,
    boundary: F,
    scale: ScaleRecord,
    weights: TermWeights,
    calibration: Calibration,
}

impl<E, F> LossAssembler<E, F> {
    pub fn new(mode: Mode, governing: E, boundary: F, scale: ScaleRecord, weights: TermWeights) -> Self {
        let wsp = if mode.is_aniso() { weights.extra } else { 0.0 };
        Self {
            mode,
            layout: ModeLayout::new(mode),
            governing,
            boundary,
            scale,
            weights,
            calibration: Calibration::new(wsp),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn scale(&self) -> &ScaleRecord {
        &self.scale
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn set_lref(&mut self, lref: f32) -> Result<()> {
        self.calibration.set_lref(lref)
    }

    /// 正則化の重みを更新します（学習ステップごとにスケジューラから呼ばれます）。
    pub fn set_wsp(&mut self, wsp: f32) {
        self.calibration.set_wsp(wsp);
    }

    /// 学習前のネットワークの損失を基準値として設定し、その値を返します。
    pub fn calibrate<B, N>(&mut self, net: &N, batch: &DataBatch<B>) -> Result<f32>
    where
        B: Backend,
        N: SolutionNet<B>,
        E: GoverningEquation<B>,
        F: BoundaryEquation<B>,
    {
        if self.calibration.is_calibrated() {
            return Err(PinnError::AlreadyCalibrated(self.calibration.lref()));
        }
        let (_, info) = self.evaluate(net, batch)?;
        let lref = if info.total > 0.0 && info.total.is_finite() {
            info.total
        } else {
            log::warn!("初期損失 {} は基準値に使えないため 1.0 を使います", info.total);
            1.0
        };
        self.calibration.set_lref(lref)?;
        Ok(lref)
    }

    /// 損失を評価し、`(損失, 内訳)` を返します。
    pub fn evaluate<B, N>(&self, net: &N, batch: &DataBatch<B>) -> Result<(Tensor<B, 1>, LossInfo)>
    where
        B: Backend,
        N: SolutionNet<B>,
        E: GoverningEquation<B>,
        F: BoundaryEquation<B>,
    {
        let device = batch.smp.x.device();

        // サンプル点での速度と厚さの予測
        let out_smp = net.forward(batch.smp.x.clone());
        let [ns, _] = out_smp.dims();
        let u_pred = out_smp.clone().slice([0..ns, CH_U..CH_V + 1]);
        let out_thk = net.forward(batch.smp.xh.clone());
        let [nh, _] = out_thk.dims();
        let h_pred = out_thk.slice([0..nh, CH_H..CH_H + 1]);

        // 支配方程式と境界条件の残差
        let eqn = self.governing.evaluate(net, batch.col.x.clone(), &self.scale);
        let residual = match self.layout.extra {
            ExtraTerm::Grounded { .. } => {
                let mask = batch
                    .col
                    .ocean_mask
                    .clone()
                    .ok_or(PinnError::MissingField("col.ocean_mask"))?;
                let grounded = eqn
                    .residual_grounded
                    .ok_or(PinnError::MissingField("residual_grounded"))?;
                blend(mask, eqn.residual, grounded)
            }
            _ => eqn.residual,
        };
        let bd = self.boundary.evaluate(
            net,
            batch.bd.x.clone(),
            batch.bd.normal.clone(),
            &self.scale,
        );

        let data_err = Tensor::cat(
            vec![
                ms_error(u_pred - batch.smp.u.clone()),
                ms_error(h_pred - batch.smp.h.clone()),
            ],
            1,
        );
        let eqn_err = ms_error(residual);
        let bd_err = ms_error(bd.residual);

        let loss_data = weighted_sum(data_err.clone(), DATA_WEIGHT, &device);
        let loss_eqn = weighted_sum(eqn_err.clone(), EQN_WEIGHT, &device);
        let loss_bd = weighted_sum(bd_err.clone(), BD_WEIGHT, &device);

        let mut loss = loss_data.clone()
            + loss_eqn.clone().mul_scalar(self.weights.eqn)
            + loss_bd.clone().mul_scalar(self.weights.bd);
        let mut head = vec![loss_data, loss_eqn, loss_bd];
        let mut tail = vec![data_err, eqn_err, bd_err];

        match self.layout.extra {
            ExtraTerm::None => {}
            ExtraTerm::Grounded { friction } => {
                let mask = batch
                    .smp
                    .ocean_mask
                    .clone()
                    .ok_or(PinnError::MissingField("smp.ocean_mask"))?;
                let c_pred = out_smp.slice([0..ns, friction..friction + 1]);
                let grounded_err = ms_error(mask.mul(c_pred));
                let loss_grounded = weighted_sum(grounded_err.clone(), GROUNDED_WEIGHT, &device);
                loss = loss + loss_grounded.clone().mul_scalar(self.weights.extra);
                head.push(loss_grounded);
                tail.push(grounded_err);
            }
            ExtraTerm::Consistency { mu, eta } => {
                let mu_pred = out_smp.clone().slice([0..ns, mu..mu + 1]);
                let eta_pred = out_smp.slice([0..ns, eta..eta + 1]);
                let sp_err = ms_error((mu_pred.sqrt() - eta_pred.sqrt()).div_scalar(2.0));
                let loss_sp = sp_err.sum();
                loss = loss + loss_sp.clone().mul_scalar(self.calibration.wsp());
                head.push(loss_sp);
            }
        }

        let loss = loss.div_scalar(self.calibration.lref());

        let mut parts = vec![loss.clone().reshape([1, 1])];
        parts.extend(head.into_iter().map(|t| t.reshape([1, 1])));
        parts.extend(tail);
        let flat: Vec<f32> = Tensor::cat(parts, 1).into_data().iter::<f32>().collect();
        Ok((loss, LossInfo::from_flat(self.mode, &flat)))
    }
}
