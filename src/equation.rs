//! 支配方程式と境界条件のインターフェース。

use crate::pinn::SolutionNet;
use crate::scale::ScaleRecord;
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 基底摩擦モデルでのみ現れる項（いずれも `[N, 1]`）。
#[derive(Debug, Clone)]
pub struct BasalTerms<B: Backend> {
    pub e14: Tensor<B, 2>,
    pub e24: Tensor<B, 2>,
    pub e13_grounded: Tensor<B, 2>,
    pub e23_grounded: Tensor<B, 2>,
}

/// 支配方程式の各項の内訳（いずれも `[N, 1]`）。
#[derive(Debug, Clone)]
pub struct EquationTerms<B: Backend> {
    pub e11: Tensor<B, 2>,
    pub e12: Tensor<B, 2>,
    pub e13: Tensor<B, 2>,
    pub e21: Tensor<B, 2>,
    pub e22: Tensor<B, 2>,
    pub e23: Tensor<B, 2>,
    pub basal: Option<BasalTerms<B>>,
    pub strain_rate: Tensor<B, 2>,
}

impl<B: Backend> EquationTerms<B> {
    /// すべての項がゼロの内訳。
    pub fn zeros(n: usize, basal: bool, device: &B::Device) -> Self {
        let z = || Tensor::<B, 2>::zeros([n, 1], device);
        Self {
            e11: z(),
            e12: z(),
            e13: z(),
            e21: z(),
            e22: z(),
            e23: z(),
            basal: basal.then(|| BasalTerms {
                e14: z(),
                e24: z(),
                e13_grounded: z(),
                e23_grounded: z(),
            }),
            strain_rate: z(),
        }
    }

    /// 列の並びは `[e11, e12, e13, e21, e22, e23, (e14, e24, e13g, e23g), str]` です。
    pub fn to_tensor(&self) -> Tensor<B, 2> {
        let mut cols = vec![
            self.e11.clone(),
            self.e12.clone(),
            self.e13.clone(),
            self.e21.clone(),
            self.e22.clone(),
            self.e23.clone(),
        ];
        if let Some(b) = &self.basal {
            cols.extend([
                b.e14.clone(),
                b.e24.clone(),
                b.e13_grounded.clone(),
                b.e23_grounded.clone(),
            ]);
        }
        cols.push(self.strain_rate.clone());
        Tensor::cat(cols, 1)
    }

    fn cat(parts: Vec<Self>) -> Self {
        fn col<B: Backend, T>(parts: &[T], f: impl Fn(&T) -> Tensor<B, 2>) -> Tensor<B, 2> {
            Tensor::cat(parts.iter().map(f).collect(), 0)
        }
        let basal = parts.first().is_some_and(|p| p.basal.is_some()).then(|| {
            let b: Vec<&BasalTerms<B>> = parts.iter().filter_map(|p| p.basal.as_ref()).collect();
            BasalTerms {
                e14: col(&b, |t| t.e14.clone()),
                e24: col(&b, |t| t.e24.clone()),
                e13_grounded: col(&b, |t| t.e13_grounded.clone()),
                e23_grounded: col(&b, |t| t.e23_grounded.clone()),
            }
        });
        Self {
            e11: col(&parts, |t| t.e11.clone()),
            e12: col(&parts, |t| t.e12.clone()),
            e13: col(&parts, |t| t.e13.clone()),
            e21: col(&parts, |t| t.e21.clone()),
            e22: col(&parts, |t| t.e22.clone()),
            e23: col(&parts, |t| t.e23.clone()),
            basal,
            strain_rate: col(&parts, |t| t.strain_rate.clone()),
        }
    }
}

/// 支配方程式の評価結果。
#[derive(Debug, Clone)]
pub struct EquationOutput<B: Backend> {
    /// 浮いた氷の残差 `[N, 2]`
    pub residual: Tensor<B, 2>,
    /// 接地した氷の残差 `[N, 2]`（基底摩擦モデルのみ）
    pub residual_grounded: Option<Tensor<B, 2>>,
    pub terms: EquationTerms<B>,
}

impl<B: Backend> EquationOutput<B> {
    /// 分割して評価した結果を元の順序で連結します。
    pub fn cat(parts: Vec<Self>) -> Self {
        let residual = Tensor::cat(parts.iter().map(|p| p.residual.clone()).collect(), 0);
        let grounded: Option<Vec<_>> = parts.iter().map(|p| p.residual_grounded.clone()).collect();
        let residual_grounded = grounded.filter(|g| !g.is_empty()).map(|g| Tensor::cat(g, 0));
        let terms = EquationTerms::cat(parts.into_iter().map(|p| p.terms).collect());
        Self {
            residual,
            residual_grounded,
            terms,
        }
    }
}

/// 境界条件の評価結果。
#[derive(Debug, Clone)]
pub struct BoundaryOutput<B: Backend> {
    pub residual: Tensor<B, 2>,
    pub terms: Tensor<B, 2>,
}

/// 内部領域の支配方程式。
pub trait GoverningEquation<B: Backend> {
    fn evaluate<N: SolutionNet<B>>(
        &self,
        net: &N,
        positions: Tensor<B, 2>,
        scale: &ScaleRecord,
    ) -> EquationOutput<B>;
}

/// 境界（カービングフロント）の条件。
pub trait BoundaryEquation<B: Backend> {
    fn evaluate<N: SolutionNet<B>>(
        &self,
        net: &N,
        positions: Tensor<B, 2>,
        normals: Tensor<B, 2>,
        scale: &ScaleRecord,
    ) -> BoundaryOutput<B>;
}

/// 浮いた氷と接地した氷の値を海洋マスクで混ぜ合わせます。
///
/// `mask` は `[N, 1]`、`floating` と `grounded` は `[N, C]` です。
pub fn blend<B: Backend>(
    mask: Tensor<B, 2>,
    floating: Tensor<B, 2>,
    grounded: Tensor<B, 2>,
) -> Tensor<B, 2> {
    let [_, c] = floating.dims();
    let mask = mask.repeat_dim(1, c);
    let inverse = mask.clone().neg().add_scalar(1.0);
    mask.mul(floating) + inverse.mul(grounded)
}
