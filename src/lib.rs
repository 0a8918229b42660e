//! # 棚氷の物性推定のための物理情報ニューラルネットワーク (PINN) ライブラリ
//!
//! `burn` フレームワークを使用して、表面速度と厚さの観測から棚氷の粘性
//! （等方・異方性、または基底摩擦つき）を推定するPINNの主要なコンポーネントを提供します。
//!
//! - [`scale`]: 無次元化のための代表スケール
//! - [`loss`]: データ・支配方程式・境界条件・正則化をまとめた損失関数
//! - [`prediction`]: 全グリッドでの予測と物理単位への復元
//! - [`grid`]: 点列と2次元グリッドの変換

pub mod cli;
pub mod config;
pub mod data;
pub mod equation;
pub mod error;
pub mod grid;
pub mod inference;
pub mod loss;
pub mod model;
pub mod pinn;
pub mod prediction;
pub mod scale;
pub mod ssa;
pub mod training;

use pinn::Mode;

/// 出力ファイル名（拡張子なし）を返します。
pub fn output_stem(mode: Mode, seed: u64) -> String {
    let name = match mode {
        Mode::Isotropic => "iso",
        Mode::IsotropicBasal => "basal",
        Mode::Anisotropic => "aniso",
    };
    format!("pinns_{name}_seed={seed}")
}
