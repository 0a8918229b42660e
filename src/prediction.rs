//! 学習済みネットワークによる全グリッドでの予測と後処理。

use crate::data::{NormalizedDataset, columns};
use crate::equation::{EquationOutput, GoverningEquation};
use crate::error::{PinnError, Result};
use crate::grid::{data_arrange, split_ranges};
use crate::pinn::{CH_EXTRA, CH_H, CH_MU, CH_U, CH_V, Mode, SolutionNet};
use crate::scale::{ScaleRecord, extract_scale};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// 予測時の設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictConfig {
    /// 微分と残差の評価を分ける区間の数（メモリ使用量の上限のため）
    pub chunks: usize,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self { chunks: 4 }
    }
}

/// 物理単位に戻した2次元の予測結果。観測のないセルは NaN です。
#[derive(Debug, Clone, Serialize)]
pub struct PredictionGrid {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub u_g: Array2<f64>,
    pub v_g: Array2<f64>,
    pub x_h: Array2<f64>,
    pub y_h: Array2<f64>,
    pub h_g: Array2<f64>,
    pub u: Array2<f64>,
    pub v: Array2<f64>,
    pub h: Array2<f64>,
    pub h2: Array2<f64>,
    pub u_x: Array2<f64>,
    pub u_y: Array2<f64>,
    pub v_x: Array2<f64>,
    pub v_y: Array2<f64>,
    pub h_x: Array2<f64>,
    pub h_y: Array2<f64>,
    #[serde(rename = "str")]
    pub strain_rate: Array2<f64>,
    pub mu: Array2<f64>,
    pub e11: Array2<f64>,
    pub e12: Array2<f64>,
    pub e13: Array2<f64>,
    pub e21: Array2<f64>,
    pub e22: Array2<f64>,
    pub e23: Array2<f64>,
    pub e1: Array2<f64>,
    pub e2: Array2<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<Array2<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<Array2<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e14: Option<Array2<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e24: Option<Array2<f64>>,
    pub ocean_mask: Option<Array2<f64>>,
    pub scale: ScaleRecord,
    /// 学習中の損失の履歴（`LossInfo::to_vec` の並び）
    pub loss: Vec<Vec<f32>>,
}

impl PredictionGrid {
    /// 2次元の場を名前つきで列挙します。並びと集合はモードごとに固定です。
    pub fn fields(&self) -> Vec<(&'static str, &Array2<f64>)> {
        let mut out = vec![
            ("x", &self.x),
            ("y", &self.y),
            ("u_g", &self.u_g),
            ("v_g", &self.v_g),
            ("x_h", &self.x_h),
            ("y_h", &self.y_h),
            ("h_g", &self.h_g),
            ("u", &self.u),
            ("v", &self.v),
            ("h", &self.h),
            ("h2", &self.h2),
            ("u_x", &self.u_x),
            ("u_y", &self.u_y),
            ("v_x", &self.v_x),
            ("v_y", &self.v_y),
            ("h_x", &self.h_x),
            ("h_y", &self.h_y),
            ("str", &self.strain_rate),
            ("mu", &self.mu),
            ("e11", &self.e11),
            ("e12", &self.e12),
            ("e13", &self.e13),
            ("e21", &self.e21),
            ("e22", &self.e22),
            ("e23", &self.e23),
            ("e1", &self.e1),
            ("e2", &self.e2),
        ];
        for (name, field) in [
            ("eta", &self.eta),
            ("c", &self.c),
            ("e14", &self.e14),
            ("e24", &self.e24),
            ("ocean_mask", &self.ocean_mask),
        ] {
            if let Some(f) = field {
                out.push((name, f));
            }
        }
        out
    }

    /// JSON として書き出します。NaN は `null` になります。
    pub fn write_json(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

/// テンソルの全要素を読み出し、列ごとの `f64` ベクトルに並べ替えます。
fn to_columns<B: Backend>(t: Tensor<B, 2>) -> Vec<Vec<f64>> {
    let [n, c] = t.dims();
    let flat: Vec<f32> = t.into_data().iter::<f32>().collect();
    (0..c)
        .map(|k| (0..n).map(|i| f64::from(flat[i * c + k])).collect())
        .collect()
}

fn blend_values(mask: &[f64], floating: &[f64], grounded: &[f64]) -> Vec<f64> {
    mask.iter()
        .zip(floating.iter().zip(grounded))
        .map(|(&m, (&a, &b))| m * a + (1.0 - m) * b)
        .collect()
}

fn affine(values: &[f64], scale: f64, offset: f64) -> Vec<f64> {
    values.iter().map(|&v| v * scale + offset).collect()
}

/// 位置を `chunks` 個の区間に分けて、微分演算子と支配方程式を順に評価し、元の順序で連結します。
///
/// 分割はメモリ使用量を抑えるためだけのもので、結果は一括評価と一致します。
pub fn evaluate_chunked<B, N, E>(
    net: &N,
    governing: &E,
    positions: Tensor<B, 2>,
    scale: &ScaleRecord,
    chunks: usize,
) -> (Tensor<B, 2>, EquationOutput<B>)
where
    B: Backend,
    N: SolutionNet<B>,
    E: GoverningEquation<B>,
{
    let [n, d] = positions.dims();
    let ranges = split_ranges(n, chunks);
    log::debug!("{} 点を {} 区間に分けて評価します", n, ranges.len());
    let mut grads = Vec::with_capacity(ranges.len());
    let mut eqns = Vec::with_capacity(ranges.len());
    for range in ranges {
        let part = positions.clone().slice([range, 0..d]);
        grads.push(net.gradients(part.clone()).0);
        eqns.push(governing.evaluate(net, part, scale));
    }
    (Tensor::cat(grads, 0), EquationOutput::cat(eqns))
}

/// 学習済みネットワークを元の観測グリッド上で評価し、物理単位の2次元の場にまとめます。
pub fn predict<B, N, E>(
    net: &N,
    governing: &E,
    data: &NormalizedDataset,
    mode: Mode,
    config: &PredictConfig,
    device: &B::Device,
) -> Result<PredictionGrid>
where
    B: Backend,
    N: SolutionNet<B>,
    E: GoverningEquation<B>,
{
    let s = extract_scale(&data.stats, mode.is_basal());
    let mask = match (mode.is_basal(), &data.ocean_mask) {
        (true, Some(m)) => Some(m.as_slice()),
        (true, None) => return Err(PinnError::MissingField("ocean_mask")),
        (false, _) => None,
    };
    let (iv, sv) = (data.idx_vel.as_slice(), data.shape_vel);
    let (ih, sh) = (data.idx_thk.as_slice(), data.shape_thk);
    let grid = |values: &[f64], scale: f64, offset: f64| data_arrange(&affine(values, scale, offset), iv, sv);

    let x_pred = columns::<B>(&data.x, &data.y, device);
    let xh_pred = columns::<B>(&data.xh, &data.yh, device);

    // 観測位置でのネットワーク出力（分割なし）
    let uvhm = to_columns(net.forward(x_pred.clone()));
    let h2 = to_columns(net.forward(xh_pred)).swap_remove(CH_H);

    let (duvh, eqn) = evaluate_chunked(net, governing, x_pred, &s, config.chunks);
    let duvh = to_columns(duvh);
    let residual = to_columns(eqn.residual);
    let terms = eqn.terms;
    let term = |t: Tensor<B, 2>| to_columns(t).swap_remove(0);

    let mut e1 = residual[0].clone();
    let mut e2 = residual[1].clone();
    let mut e13 = term(terms.e13);
    let mut e23 = term(terms.e23);
    let mut e14 = None;
    let mut e24 = None;
    if let Some(m) = mask {
        let grounded = eqn
            .residual_grounded
            .map(to_columns)
            .ok_or(PinnError::MissingField("residual_grounded"))?;
        let basal = terms.basal.ok_or(PinnError::MissingField("basal terms"))?;
        e1 = blend_values(m, &e1, &grounded[0]);
        e2 = blend_values(m, &e2, &grounded[1]);
        e13 = blend_values(m, &e13, &term(basal.e13_grounded));
        e23 = blend_values(m, &e23, &term(basal.e23_grounded));
        e14 = Some(grid(&term(basal.e14), s.term0, 0.0));
        e24 = Some(grid(&term(basal.e24), s.term0, 0.0));
    }

    Ok(PredictionGrid {
        x: grid(&data.x, s.lx0, s.lxm),
        y: grid(&data.y, s.ly0, s.lym),
        u_g: grid(&data.u, s.u0, s.um),
        v_g: grid(&data.v, s.v0, s.vm),
        x_h: data_arrange(&affine(&data.xh, s.lx0, s.lxm), ih, sh),
        y_h: data_arrange(&affine(&data.yh, s.ly0, s.lym), ih, sh),
        h_g: data_arrange(&affine(&data.h, s.h0, 0.0), ih, sh),
        u: grid(&uvhm[CH_U], s.u0, s.um),
        v: grid(&uvhm[CH_V], s.v0, s.vm),
        h: grid(&uvhm[CH_H], s.h0, 0.0),
        h2: data_arrange(&affine(&h2, s.h0, 0.0), ih, sh),
        u_x: grid(&duvh[0], s.u0 / s.lx0, 0.0),
        u_y: grid(&duvh[1], s.u0 / s.ly0, 0.0),
        v_x: grid(&duvh[2], s.v0 / s.lx0, 0.0),
        v_y: grid(&duvh[3], s.v0 / s.ly0, 0.0),
        h_x: grid(&duvh[4], s.h0 / s.lx0, 0.0),
        h_y: grid(&duvh[5], s.h0 / s.ly0, 0.0),
        strain_rate: grid(&term(terms.strain_rate), s.str0, 0.0),
        mu: grid(&uvhm[CH_MU], s.mu0, 0.0),
        e11: grid(&term(terms.e11), s.term0, 0.0),
        e12: grid(&term(terms.e12), s.term0, 0.0),
        e13: grid(&e13, s.term0, 0.0),
        e21: grid(&term(terms.e21), s.term0, 0.0),
        e22: grid(&term(terms.e22), s.term0, 0.0),
        e23: grid(&e23, s.term0, 0.0),
        e1: grid(&e1, s.term0, 0.0),
        e2: grid(&e2, s.term0, 0.0),
        eta: mode.is_aniso().then(|| grid(&uvhm[CH_EXTRA], s.mu0, 0.0)),
        c: mode.is_basal().then(|| grid(&uvhm[CH_EXTRA], s.c0, 0.0)),
        e14,
        e24,
        ocean_mask: mask.map(|m| grid(m, 1.0, 0.0)),
        scale: s,
        loss: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::raw_dataset;
    use crate::model::Jet;
    use crate::pinn::Pinn;
    use crate::ssa::ShallowShelf;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    /// 要素ごとの演算だけで作った解析的な場（`sin`/`cos` の組み合わせ）。
    struct WaveNet {
        channels: usize,
    }

    impl SolutionNet<TestBackend> for WaveNet {
        fn forward(&self, positions: Tensor<TestBackend, 2>) -> Tensor<TestBackend, 2> {
            self.jet(positions).value
        }

        fn jet(&self, positions: Tensor<TestBackend, 2>) -> Jet<TestBackend> {
            let [n, _] = positions.dims();
            let x = positions.clone().slice([0..n, 0..1]);
            let y = positions.slice([0..n, 1..2]);
            let rep = |t: Tensor<TestBackend, 2>| t.repeat_dim(1, self.channels);
            let s = x.clone().sin().mul(y.clone().cos()).add_scalar(2.0);
            Jet {
                value: rep(s.clone()),
                dx: rep(x.clone().cos().mul(y.clone().cos())),
                dy: rep(x.clone().sin().mul(y.clone().sin()).neg()),
                dxx: rep(s.clone().sub_scalar(2.0).neg()),
                dxy: rep(x.clone().cos().mul(y.clone().sin()).neg()),
                dyy: rep(s.sub_scalar(2.0).neg()),
            }
        }
    }

    fn to_vec(t: Tensor<TestBackend, 2>) -> Vec<f32> {
        t.into_data().iter::<f32>().collect()
    }

    fn scale() -> ScaleRecord {
        extract_scale(
            &crate::scale::ScaleStats {
                mean: [0.0, 0.0, 0.0, 0.0, 300.0],
                range: [2.0e5, 1.0e5, 1.0e-5, 2.0e-5, 100.0],
            },
            false,
        )
    }

    fn positions(n: usize) -> Tensor<TestBackend, 2> {
        let xs: Vec<f64> = (0..n).map(|i| -1.0 + 2.0 * i as f64 / n as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|v| 0.5 * v * v - 0.3).collect();
        columns(&xs, &ys, &Default::default())
    }

    #[test]
    fn chunked_evaluation_is_identical() {
        let net = WaveNet { channels: 4 };
        let eqn = ShallowShelf::new(Mode::Isotropic);
        for n in [8, 10, 3] {
            let x = positions(n);
            let (g1, e1) = evaluate_chunked(&net, &eqn, x.clone(), &scale(), 1);
            for chunks in [2, 3, 4] {
                let (g, e) = evaluate_chunked(&net, &eqn, x.clone(), &scale(), chunks);
                assert_eq!(to_vec(g), to_vec(g1.clone()));
                assert_eq!(to_vec(e.residual), to_vec(e1.residual.clone()));
                assert_eq!(to_vec(e.terms.to_tensor()), to_vec(e1.terms.to_tensor()));
            }
        }
    }

    #[test]
    fn chunked_network_evaluation_is_identical() {
        let device = Default::default();
        for mode in [Mode::Isotropic, Mode::IsotropicBasal, Mode::Anisotropic] {
            let net = Pinn::<TestBackend>::new(&device, mode, 2, 8);
            let eqn = ShallowShelf::new(mode);
            for n in [7, 10, 13] {
                let x = positions(n);
                let (g1, e1) = evaluate_chunked(&net, &eqn, x.clone(), &scale(), 1);
                let (g4, e4) = evaluate_chunked(&net, &eqn, x, &scale(), 4);
                assert_eq!(to_vec(g1), to_vec(g4), "{mode:?} n={n}");
                assert_eq!(to_vec(e1.residual), to_vec(e4.residual), "{mode:?} n={n}");
                assert_eq!(to_vec(e1.terms.to_tensor()), to_vec(e4.terms.to_tensor()), "{mode:?} n={n}");
            }
        }
    }

    /// 1点だけでネットワークと支配方程式を評価します（要素ごとの場なら一括評価と一致）。
    fn at_point<E: GoverningEquation<TestBackend>>(
        net: &WaveNet,
        eqn: &E,
        data: &NormalizedDataset,
        k: usize,
        scale: &ScaleRecord,
    ) -> (Vec<f64>, Jet<TestBackend>, EquationOutput<TestBackend>) {
        let x = columns::<TestBackend>(&data.x[k..k + 1], &data.y[k..k + 1], &Default::default());
        let value = to_vec(net.forward(x.clone())).into_iter().map(f64::from).collect();
        (value, net.jet(x.clone()), eqn.evaluate(net, x, scale))
    }

    fn first(t: Tensor<TestBackend, 2>) -> f64 {
        f64::from(to_vec(t)[0])
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1e-30)
    }

    #[test]
    fn prediction_converts_channels_to_physical_units() {
        let device = Default::default();
        let data = NormalizedDataset::from_raw(&raw_dataset(false), false).expect("valid dataset");
        let s = extract_scale(&data.stats, false);
        let net = WaveNet { channels: 4 };
        let eqn = ShallowShelf::new(Mode::Isotropic);
        let grid = predict(&net, &eqn, &data, Mode::Isotropic, &PredictConfig::default(), &device)
            .expect("prediction");

        // 有効点 k=6 はセル 7（行 1、列 3）
        let (k, cell) = (6, [1, 3]);
        assert_eq!(data.idx_vel[k], 7);
        let (value, jet, out) = at_point(&net, &eqn, &data, k, &s);

        assert!(close(grid.u[cell], value[CH_U] * s.u0 + s.um));
        assert!(close(grid.v[cell], value[CH_V] * s.v0 + s.vm));
        assert!(close(grid.h[cell], value[CH_H] * s.h0));
        assert!(close(grid.mu[cell], value[CH_MU] * s.mu0));
        assert!(close(grid.u_x[cell], first(jet.dx.clone()) * s.u0 / s.lx0));
        let h_y = f64::from(to_vec(jet.dy)[CH_H]);
        assert!(close(grid.h_y[cell], h_y * s.h0 / s.ly0));
        assert!(close(grid.e11[cell], first(out.terms.e11) * s.term0));
        assert!(close(grid.e13[cell], first(out.terms.e13) * s.term0));
        assert!(close(grid.strain_rate[cell], first(out.terms.strain_rate) * s.str0));
        let residual = to_vec(out.residual);
        assert!(close(grid.e1[cell], f64::from(residual[0]) * s.term0));
        assert!(close(grid.e2[cell], f64::from(residual[1]) * s.term0));
    }

    #[test]
    fn basal_prediction_blends_residuals_by_mask() {
        let device = Default::default();
        let data = NormalizedDataset::from_raw(&raw_dataset(true), true).expect("valid dataset");
        let s = extract_scale(&data.stats, true);
        let net = WaveNet { channels: 5 };
        let eqn = ShallowShelf::new(Mode::IsotropicBasal);
        let grid = predict(&net, &eqn, &data, Mode::IsotropicBasal, &PredictConfig { chunks: 2 }, &device)
            .expect("prediction");

        // セル 0 は接地（mask 0）、セル 3 は浮いている（mask 1）
        for (k, cell, floating) in [(0, [0, 0], false), (3, [0, 3], true)] {
            let (value, _, out) = at_point(&net, &eqn, &data, k, &s);
            let mask = grid.ocean_mask.as_ref().expect("mask");
            assert_eq!(mask[cell], if floating { 1.0 } else { 0.0 });

            let basal = out.terms.basal.expect("basal terms");
            let fl = to_vec(out.residual);
            let gr = to_vec(out.residual_grounded.expect("grounded residual"));
            let (e1, e2, e13) = if floating {
                (fl[0], fl[1], first(out.terms.e13))
            } else {
                (gr[0], gr[1], first(basal.e13_grounded))
            };
            assert!(close(grid.e1[cell], f64::from(e1) * s.term0), "cell {cell:?}");
            assert!(close(grid.e2[cell], f64::from(e2) * s.term0), "cell {cell:?}");
            assert!(close(grid.e13[cell], e13 * s.term0), "cell {cell:?}");

            let e14 = grid.e14.as_ref().expect("e14");
            assert!(close(e14[cell], first(basal.e14) * s.term0));
            let c = grid.c.as_ref().expect("friction");
            assert!(close(c[cell], value[CH_EXTRA] * s.c0));
        }
        // 浮いた残差と接地した残差が実際に異なる点で確かめている
        let (_, _, out) = at_point(&net, &eqn, &data, 0, &s);
        let fl = to_vec(out.residual);
        let gr = to_vec(out.residual_grounded.expect("grounded residual"));
        assert_ne!(fl[0], gr[0]);
    }

    #[test]
    fn prediction_restores_grid_and_units() {
        let device = Default::default();
        let data = NormalizedDataset::from_raw(&raw_dataset(false), false).expect("valid dataset");
        let net = Pinn::<TestBackend>::new(&device, Mode::Isotropic, 2, 8);
        let grid = predict(
            &net,
            &ShallowShelf::new(Mode::Isotropic),
            &data,
            Mode::Isotropic,
            &PredictConfig::default(),
            &device,
        )
        .expect("prediction");

        assert_eq!(grid.u.dim(), (3, 4));
        assert_eq!(grid.h2.dim(), (2, 3));
        assert!(grid.u[[1, 1]].is_nan());
        assert!(grid.u_g[[1, 1]].is_nan());
        assert!((grid.x[[0, 3]] - 3000.0).abs() < 1e-6);
        assert!((grid.u_g[[2, 2]] - 120.0).abs() < 1e-6);
        assert!((grid.h_g[[0, 1]] - 400.0).abs() < 1e-9);
        assert!(grid.mu.iter().filter(|v| !v.is_nan()).all(|&v| v > 0.0));
        assert!(grid.eta.is_none() && grid.c.is_none() && grid.ocean_mask.is_none());

        let keys: Vec<&str> = grid.fields().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys.len(), 27);
        assert_eq!(keys[17], "str");
    }

    #[test]
    fn basal_prediction_adds_friction_fields() {
        let device = Default::default();
        let data = NormalizedDataset::from_raw(&raw_dataset(true), true).expect("valid dataset");
        let net = Pinn::<TestBackend>::new(&device, Mode::IsotropicBasal, 2, 8);
        let grid = predict(
            &net,
            &ShallowShelf::new(Mode::IsotropicBasal),
            &data,
            Mode::IsotropicBasal,
            &PredictConfig { chunks: 3 },
            &device,
        )
        .expect("prediction");
        let keys: Vec<&str> = grid.fields().iter().map(|(k, _)| *k).collect();
        for key in ["c", "e14", "e24", "ocean_mask"] {
            assert!(keys.contains(&key));
        }
        assert!(!keys.contains(&"eta"));
        assert!(grid.scale.c0.is_finite());
        let mask = grid.ocean_mask.as_ref().expect("mask");
        assert_eq!(mask[[0, 3]], 1.0);
        assert_eq!(mask[[0, 0]], 0.0);
        assert!(mask[[1, 1]].is_nan());
    }

    #[test]
    fn anisotropic_prediction_adds_eta() {
        let device = Default::default();
        let data = NormalizedDataset::from_raw(&raw_dataset(false), false).expect("valid dataset");
        let net = Pinn::<TestBackend>::new(&device, Mode::Anisotropic, 2, 8);
        let grid = predict(
            &net,
            &ShallowShelf::new(Mode::Anisotropic),
            &data,
            Mode::Anisotropic,
            &PredictConfig::default(),
            &device,
        )
        .expect("prediction");
        let keys: Vec<&str> = grid.fields().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys.len(), 28);
        assert!(keys.contains(&"eta"));
    }
}
