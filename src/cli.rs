use crate::pinn::Mode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Ice-shelf viscosity inversion with physics-informed neural networks (Burn)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（train または predict）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// PINNモデルを学習し、モデル・予測結果・損失グラフを保存します
    Train {
        /// 観測データ（JSON）
        #[arg(long)]
        data: PathBuf,
        /// 学習設定（JSON）
        #[arg(long)]
        config: Option<PathBuf>,
        /// 出力ディレクトリ
        #[arg(long, default_value = "results")]
        output: PathBuf,
        /// 設定ファイルのモードを上書きします
        #[arg(long, value_enum)]
        mode: Option<Mode>,
        /// 設定ファイルのシードを上書きします
        #[arg(long)]
        seed: Option<u64>,
    },
    /// 保存されたPINNモデルで全グリッドの予測を行います
    Predict {
        /// 観測データ（JSON）
        #[arg(long)]
        data: PathBuf,
        /// 学習済みモデル（.mpk）
        #[arg(long)]
        model: PathBuf,
        /// 学習時と同じ設定（JSON）
        #[arg(long)]
        config: Option<PathBuf>,
        /// 予測結果の出力先（JSON）
        #[arg(long, default_value = "prediction.json")]
        output: PathBuf,
    },
}
