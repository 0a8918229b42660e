//! 観測データの読み込み・正規化と、学習用バッチのサンプリング。

use crate::error::{PinnError, Result};
use crate::scale::ScaleStats;
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 速度観測のグリッド。各配列は行優先で、欠測は `null`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityGrid {
    pub shape: (usize, usize),
    pub x: Vec<Option<f64>>,
    pub y: Vec<Option<f64>>,
    pub u: Vec<Option<f64>>,
    pub v: Vec<Option<f64>>,
}

/// 厚さ観測のグリッド。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThicknessGrid {
    pub shape: (usize, usize),
    pub x: Vec<Option<f64>>,
    pub y: Vec<Option<f64>>,
    pub h: Vec<Option<f64>>,
}

/// カービングフロント上の点と外向き法線。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Front {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub nx: Vec<f64>,
    pub ny: Vec<f64>,
}

/// JSON ファイルから読み込む生の観測データ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDataset {
    pub velocity: VelocityGrid,
    pub thickness: ThicknessGrid,
    pub front: Front,
    /// 速度グリッド上の海洋マスク（1: 浮いた氷、0: 接地した氷）。基底摩擦モデルでのみ使います
    #[serde(default)]
    pub ocean_mask: Option<Vec<Option<f64>>>,
}

impl RawDataset {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// 正規化済みの点列。元のグリッドとの対応（有効インデックスと形）も保持します。
#[derive(Debug, Clone)]
pub struct NormalizedDataset {
    pub stats: ScaleStats,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub xh: Vec<f64>,
    pub yh: Vec<f64>,
    pub h: Vec<f64>,
    pub front_x: Vec<f64>,
    pub front_y: Vec<f64>,
    pub front_nx: Vec<f64>,
    pub front_ny: Vec<f64>,
    pub idx_vel: Vec<usize>,
    pub idx_thk: Vec<usize>,
    pub shape_vel: (usize, usize),
    pub shape_thk: (usize, usize),
    /// 有効な速度点ごとの海洋マスク
    pub ocean_mask: Option<Vec<f64>>,
}

fn check_len(name: &str, len: usize, shape: (usize, usize)) -> Result<()> {
    if len != shape.0 * shape.1 {
        return Err(PinnError::InvalidDataset(format!(
            "`{name}` has {len} cells, expected {}x{}",
            shape.0, shape.1
        )));
    }
    Ok(())
}

/// 平均と半幅（`(max - min) / 2`）。
fn mean_range(values: &[f64], name: &str) -> Result<(f64, f64)> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = (hi - lo) / 2.0;
    if !(range > 0.0) {
        return Err(PinnError::InvalidDataset(format!("`{name}` has zero range")));
    }
    Ok((mean, range))
}

fn pick(values: &[Option<f64>], idx: &[usize]) -> Vec<f64> {
    idx.iter().filter_map(|&i| values[i]).collect()
}

impl NormalizedDataset {
    /// 欠測を除いて正規化します。
    ///
    /// 位置と速度は `(q - mean) / range`、厚さは平均厚で割ります。
    /// フロントの位置は速度グリッドの位置統計で正規化します。
    /// 海洋マスクは `basal` のときだけ読み、マスクが欠測のセルも除きます。
    pub fn from_raw(raw: &RawDataset, basal: bool) -> Result<Self> {
        let vel = &raw.velocity;
        for (name, len) in [("x", vel.x.len()), ("y", vel.y.len()), ("u", vel.u.len()), ("v", vel.v.len())] {
            check_len(name, len, vel.shape)?;
        }
        let thk = &raw.thickness;
        for (name, len) in [("xh", thk.x.len()), ("yh", thk.y.len()), ("h", thk.h.len())] {
            check_len(name, len, thk.shape)?;
        }
        let ocean_mask = raw.ocean_mask.as_ref().filter(|_| basal);
        if let Some(mask) = ocean_mask {
            check_len("ocean_mask", mask.len(), vel.shape)?;
        }
        let front = &raw.front;
        let nf = front.x.len();
        if front.y.len() != nf || front.nx.len() != nf || front.ny.len() != nf {
            return Err(PinnError::InvalidDataset("front arrays differ in length".into()));
        }
        if nf == 0 {
            return Err(PinnError::InvalidDataset("front has no points".into()));
        }

        let mask_ok = |i: usize| ocean_mask.is_none_or(|m| m[i].is_some());
        let idx_vel: Vec<usize> = (0..vel.x.len())
            .filter(|&i| {
                vel.x[i].is_some() && vel.y[i].is_some() && vel.u[i].is_some() && vel.v[i].is_some() && mask_ok(i)
            })
            .collect();
        let idx_thk: Vec<usize> = (0..thk.x.len())
            .filter(|&i| thk.x[i].is_some() && thk.y[i].is_some() && thk.h[i].is_some())
            .collect();
        if idx_vel.is_empty() || idx_thk.is_empty() {
            return Err(PinnError::InvalidDataset("no valid observations".into()));
        }

        let x = pick(&vel.x, &idx_vel);
        let y = pick(&vel.y, &idx_vel);
        let u = pick(&vel.u, &idx_vel);
        let v = pick(&vel.v, &idx_vel);
        let xh = pick(&thk.x, &idx_thk);
        let yh = pick(&thk.y, &idx_thk);
        let h = pick(&thk.h, &idx_thk);

        let (xm, xr) = mean_range(&x, "x")?;
        let (ym, yr) = mean_range(&y, "y")?;
        let (um, ur) = mean_range(&u, "u")?;
        let (vm, vr) = mean_range(&v, "v")?;
        // 厚さは平均で正規化（幅は記録のみ）
        let hm = h.iter().sum::<f64>() / h.len() as f64;
        let hr = (h.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            - h.iter().copied().fold(f64::INFINITY, f64::min))
            / 2.0;
        if !(hm > 0.0) {
            return Err(PinnError::InvalidDataset("`h` has non-positive mean".into()));
        }
        let stats = ScaleStats {
            mean: [xm, ym, um, vm, hm],
            range: [xr, yr, ur, vr, hr],
        };

        let norm = |q: &[f64], m: f64, r: f64| q.iter().map(|&a| (a - m) / r).collect::<Vec<_>>();
        Ok(Self {
            stats,
            x: norm(&x, xm, xr),
            y: norm(&y, ym, yr),
            u: norm(&u, um, ur),
            v: norm(&v, vm, vr),
            xh: norm(&xh, xm, xr),
            yh: norm(&yh, ym, yr),
            h: h.iter().map(|&a| a / hm).collect(),
            front_x: norm(&front.x, xm, xr),
            front_y: norm(&front.y, ym, yr),
            front_nx: front.nx.clone(),
            front_ny: front.ny.clone(),
            ocean_mask: ocean_mask.map(|m| pick(m, &idx_vel)),
            idx_vel,
            idx_thk,
            shape_vel: vel.shape,
            shape_thk: thk.shape,
        })
    }

    pub fn n_vel(&self) -> usize {
        self.idx_vel.len()
    }

    pub fn n_thk(&self) -> usize {
        self.idx_thk.len()
    }
}

/// 2列の点列を `[N, 2]` のテンソルにします。
pub fn columns<B: Backend>(a: &[f64], b: &[f64], device: &B::Device) -> Tensor<B, 2> {
    let data: Vec<f32> = a.iter().zip(b).flat_map(|(&p, &q)| [p as f32, q as f32]).collect();
    Tensor::from_data(TensorData::new(data, [a.len(), 2]), device)
}

/// 1列の値を `[N, 1]` のテンソルにします。
pub fn column<B: Backend>(a: &[f64], device: &B::Device) -> Tensor<B, 2> {
    let data: Vec<f32> = a.iter().map(|&p| p as f32).collect();
    Tensor::from_data(TensorData::new(data, [a.len(), 1]), device)
}

/// 観測点のサンプル。
#[derive(Debug, Clone)]
pub struct SampleSet<B: Backend> {
    pub x: Tensor<B, 2>,
    pub u: Tensor<B, 2>,
    pub xh: Tensor<B, 2>,
    pub h: Tensor<B, 2>,
    /// 速度サンプル点での海洋マスク（基底摩擦モデルのみ）
    pub ocean_mask: Option<Tensor<B, 2>>,
}

/// 残差を評価するコロケーション点。
#[derive(Debug, Clone)]
pub struct Collocation<B: Backend> {
    pub x: Tensor<B, 2>,
    /// コロケーション点での海洋マスク（基底摩擦モデルのみ）
    pub ocean_mask: Option<Tensor<B, 2>>,
}

/// カービングフロント上の点と法線。
#[derive(Debug, Clone)]
pub struct BoundarySet<B: Backend> {
    pub x: Tensor<B, 2>,
    pub normal: Tensor<B, 2>,
}

/// 1ステップ分の学習データ。
#[derive(Debug, Clone)]
pub struct DataBatch<B: Backend> {
    pub smp: SampleSet<B>,
    pub col: Collocation<B>,
    pub bd: BoundarySet<B>,
}

/// 各グループのサンプル数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointCounts {
    pub n_smp: usize,
    pub nh_smp: usize,
    pub n_col: usize,
    pub n_cbd: usize,
}

impl PointCounts {
    pub fn doubled(self) -> Self {
        Self {
            n_smp: self.n_smp * 2,
            nh_smp: self.nh_smp * 2,
            n_col: self.n_col * 2,
            n_cbd: self.n_cbd * 2,
        }
    }
}

/// 正規化済みデータから学習バッチを毎回新しく抽出するサンプラー。
pub struct Sampler<'a> {
    data: &'a NormalizedDataset,
    counts: PointCounts,
    basal: bool,
    rng: StdRng,
}

/// 可能なら重複なしで、足りなければ重複ありで `amount` 個のインデックスを選びます。
fn draw(rng: &mut StdRng, len: usize, amount: usize) -> Vec<usize> {
    use rand::Rng;
    if amount <= len {
        rand::seq::index::sample(rng, len, amount).into_vec()
    } else {
        (0..amount).map(|_| rng.random_range(0..len)).collect()
    }
}

impl<'a> Sampler<'a> {
    pub fn new(data: &'a NormalizedDataset, counts: PointCounts, basal: bool, seed: u64) -> Self {
        Self {
            data,
            counts,
            basal,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn counts(&self) -> PointCounts {
        self.counts
    }

    /// 新しいバッチを抽出します。
    pub fn sample<B: Backend>(&mut self, device: &B::Device) -> Result<DataBatch<B>> {
        let d = self.data;
        let mask = match (self.basal, &d.ocean_mask) {
            (true, Some(m)) => Some(m),
            (true, None) => return Err(PinnError::MissingField("ocean_mask")),
            (false, _) => None,
        };
        let at = |q: &[f64], idx: &[usize]| idx.iter().map(|&i| q[i]).collect::<Vec<_>>();

        let i_smp = draw(&mut self.rng, d.n_vel(), self.counts.n_smp);
        let i_thk = draw(&mut self.rng, d.n_thk(), self.counts.nh_smp);
        let i_col = draw(&mut self.rng, d.n_vel(), self.counts.n_col);
        let i_bd = draw(&mut self.rng, d.front_x.len(), self.counts.n_cbd);
        log::debug!(
            "サンプル数: smp={}, thk={}, col={}, bd={}",
            i_smp.len(),
            i_thk.len(),
            i_col.len(),
            i_bd.len()
        );

        Ok(DataBatch {
            smp: SampleSet {
                x: columns(&at(&d.x, &i_smp), &at(&d.y, &i_smp), device),
                u: columns(&at(&d.u, &i_smp), &at(&d.v, &i_smp), device),
                xh: columns(&at(&d.xh, &i_thk), &at(&d.yh, &i_thk), device),
                h: column(&at(&d.h, &i_thk), device),
                ocean_mask: mask.map(|m| column(&at(m, &i_smp), device)),
            },
            col: Collocation {
                x: columns(&at(&d.x, &i_col), &at(&d.y, &i_col), device),
                ocean_mask: mask.map(|m| column(&at(m, &i_col), device)),
            },
            bd: BoundarySet {
                x: columns(&at(&d.front_x, &i_bd), &at(&d.front_y, &i_bd), device),
                normal: columns(&at(&d.front_nx, &i_bd), &at(&d.front_ny, &i_bd), device),
            },
        })
    }
}
