//! 棚氷の浅い棚近似（SSA）による運動量保存則とカービングフロントの境界条件。
//!
//! すべて無次元形で、粘性応力の単位を `ScaleRecord::stress_ratio` で駆動応力の単位にそろえます。
//! 位置の微分は代表長さ `l0m`、速度は代表速度 `u0m` を基準にした物理的な軸で取ります。

use crate::equation::{
    BasalTerms, BoundaryEquation, BoundaryOutput, EquationOutput, EquationTerms,
    GoverningEquation,
};
use crate::model::Jet;
use crate::pinn::{CH_EXTRA, CH_H, CH_MU, CH_U, CH_V, Mode, SolutionNet};
use crate::scale::ScaleRecord;
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 1点ごとの運動学量と応力。各テンソルは `[N, 1]`。
struct Kinematics<B: Backend> {
    u: Tensor<B, 2>,
    v: Tensor<B, 2>,
    h: Tensor<B, 2>,
    h_x: Tensor<B, 2>,
    h_y: Tensor<B, 2>,
    friction: Option<Tensor<B, 2>>,
    t11: Tensor<B, 2>,
    t12: Tensor<B, 2>,
    t22: Tensor<B, 2>,
    d11: Tensor<B, 2>,
    d12: Tensor<B, 2>,
    d21: Tensor<B, 2>,
    d22: Tensor<B, 2>,
    strain_rate: Tensor<B, 2>,
}

impl<B: Backend> Kinematics<B> {
    fn new(jet: &Jet<B>, scale: &ScaleRecord, mode: Mode) -> Self {
        let (rx, ry, ru, rv) = scale.axis_ratios();
        let u0m = scale.u0m();

        let u = jet.channel(CH_U);
        let v = jet.channel(CH_V);
        let h = jet.channel(CH_H);
        let mu = jet.channel(CH_MU);
        let eta = if mode.is_aniso() {
            jet.channel(CH_EXTRA)
        } else {
            mu.clone()
        };

        let u_x = u.dx.mul_scalar(ru / rx);
        let u_y = u.dy.mul_scalar(ru / ry);
        let v_x = v.dx.mul_scalar(rv / rx);
        let v_y = v.dy.mul_scalar(rv / ry);
        let u_xx = u.dxx.mul_scalar(ru / (rx * rx));
        let u_xy = u.dxy.mul_scalar(ru / (rx * ry));
        let u_yy = u.dyy.mul_scalar(ru / (ry * ry));
        let v_xx = v.dxx.mul_scalar(rv / (rx * rx));
        let v_xy = v.dxy.mul_scalar(rv / (rx * ry));
        let v_yy = v.dyy.mul_scalar(rv / (ry * ry));
        let h_x = h.dx.mul_scalar(1.0 / rx);
        let h_y = h.dy.mul_scalar(1.0 / ry);

        // 法線方向の応力は mu、せん断は eta（等方なら mu）
        let mh = mu.value.clone().mul(h.value.clone());
        let mh_x = mu.dx.mul_scalar(1.0 / rx).mul(h.value.clone()) + mu.value.clone().mul(h_x.clone());
        let mh_y = mu.dy.mul_scalar(1.0 / ry).mul(h.value.clone()) + mu.value.mul(h_y.clone());
        let eh = eta.value.clone().mul(h.value.clone());
        let eh_x = eta.dx.mul_scalar(1.0 / rx).mul(h.value.clone()) + eta.value.clone().mul(h_x.clone());
        let eh_y = eta.dy.mul_scalar(1.0 / ry).mul(h.value.clone()) + eta.value.mul(h_y.clone());

        let a = u_x.clone().mul_scalar(2.0) + v_y.clone();
        let a_x = u_xx.mul_scalar(2.0) + v_xy.clone();
        let b = u_y.clone() + v_x.clone();
        let b_x = u_xy.clone() + v_xx;
        let b_y = u_yy + v_xy;
        let c = u_x.clone() + v_y.clone().mul_scalar(2.0);
        let c_y = u_xy + v_yy.mul_scalar(2.0);

        let t11 = mh.clone().mul(a.clone()).mul_scalar(2.0);
        let t12 = eh.clone().mul(b.clone());
        let t22 = mh.clone().mul(c.clone()).mul_scalar(2.0);
        let d11 = (mh_x.mul(a) + mh.clone().mul(a_x)).mul_scalar(2.0);
        let d12 = eh_y.mul(b.clone()) + eh.clone().mul(b_y);
        let d21 = eh_x.mul(b.clone()) + eh.mul(b_x);
        let d22 = (mh_y.mul(c) + mh.mul(c_y)).mul_scalar(2.0);

        let strain_rate = (u_x.clone().powf_scalar(2.0)
            + v_y.clone().powf_scalar(2.0)
            + b.powf_scalar(2.0).mul_scalar(0.25)
            + u_x.mul(v_y))
        .sqrt();

        // 摩擦は平均を含む速度に掛かる
        let friction = mode.is_basal().then(|| jet.channel(CH_EXTRA).value);

        Self {
            u: u.value.mul_scalar(ru).add_scalar(scale.um / u0m),
            v: v.value.mul_scalar(rv).add_scalar(scale.vm / u0m),
            h: h.value,
            h_x,
            h_y,
            friction,
            t11,
            t12,
            t22,
            d11,
            d12,
            d21,
            d22,
            strain_rate,
        }
    }
}

/// 棚氷の運動量保存則（SSA）。
#[derive(Debug, Clone, Copy)]
pub struct ShallowShelf {
    pub mode: Mode,
}

impl ShallowShelf {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }
}

impl<B: Backend> GoverningEquation<B> for ShallowShelf {
    fn evaluate<N: SolutionNet<B>>(
        &self,
        net: &N,
        positions: Tensor<B, 2>,
        scale: &ScaleRecord,
    ) -> EquationOutput<B> {
        let r = scale.stress_ratio();
        let k = Kinematics::new(&net.jet(positions), scale, self.mode);

        let e11 = k.d11.mul_scalar(r);
        let e12 = k.d12.mul_scalar(r);
        let e13 = k.h.clone().mul(k.h_x);
        let e21 = k.d21.mul_scalar(r);
        let e22 = k.d22.mul_scalar(r);
        let e23 = k.h.clone().mul(k.h_y);

        let e1 = e11.clone() + e12.clone() - e13.clone();
        let e2 = e21.clone() + e22.clone() - e23.clone();
        let residual = Tensor::cat(vec![e1, e2], 1);

        let (residual_grounded, basal) = match k.friction {
            Some(c) => {
                let e14 = c.clone().mul(k.u).mul_scalar(r);
                let e24 = c.mul(k.v).mul_scalar(r);
                let e13_grounded = e13.clone().mul_scalar(r);
                let e23_grounded = e23.clone().mul_scalar(r);
                let g1 = e11.clone() + e12.clone() - e13_grounded.clone() - e14.clone();
                let g2 = e21.clone() + e22.clone() - e23_grounded.clone() - e24.clone();
                (
                    Some(Tensor::cat(vec![g1, g2], 1)),
                    Some(BasalTerms {
                        e14,
                        e24,
                        e13_grounded,
                        e23_grounded,
                    }),
                )
            }
            None => (None, None),
        };

        EquationOutput {
            residual,
            residual_grounded,
            terms: EquationTerms {
                e11,
                e12,
                e13,
                e21,
                e22,
                e23,
                basal,
                strain_rate: k.strain_rate,
            },
        }
    }
}

/// カービングフロントでの応力のつり合い。
///
/// 氷の応力が海水圧との差 `½ ρ gd h²` と法線方向で一致することを課します。
#[derive(Debug, Clone, Copy)]
pub struct CalvingFront {
    pub mode: Mode,
}

impl CalvingFront {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }
}

impl<B: Backend> BoundaryEquation<B> for CalvingFront {
    fn evaluate<N: SolutionNet<B>>(
        &self,
        net: &N,
        positions: Tensor<B, 2>,
        normals: Tensor<B, 2>,
        scale: &ScaleRecord,
    ) -> BoundaryOutput<B> {
        let r = scale.stress_ratio();
        let k = Kinematics::new(&net.jet(positions), scale, self.mode);
        let [n, _] = normals.dims();
        let nx = normals.clone().slice([0..n, 0..1]);
        let ny = normals.slice([0..n, 1..2]);

        let half_h2 = k.h.powf_scalar(2.0).mul_scalar(0.5);
        let f11 = k.t11.mul(nx.clone()).mul_scalar(r);
        let f12 = k.t12.clone().mul(ny.clone()).mul_scalar(r);
        let f13 = half_h2.clone().mul(nx.clone());
        let f21 = k.t12.mul(nx).mul_scalar(r);
        let f22 = k.t22.mul(ny.clone()).mul_scalar(r);
        let f23 = half_h2.mul(ny);

        let f1 = f11.clone() + f12.clone() - f13.clone();
        let f2 = f21.clone() + f22.clone() - f23.clone();
        BoundaryOutput {
            residual: Tensor::cat(vec![f1, f2], 1),
            terms: Tensor::cat(vec![f11, f12, f13, f21, f22, f23], 1),
        }
    }
}
