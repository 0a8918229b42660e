//! # 棚氷の物性推定PINN
//!
//! `burn` フレームワークを使用して、表面速度と厚さの観測から棚氷の粘性を推定する
//! 物理情報ニューラルネットワーク（PINN）のコマンドラインツールです。
//!
//! `clap` クレートを利用して、コマンドラインから`train`（学習）と`predict`（予測）の
//! 機能を個別に実行できます。
//!
//! ## 使い方
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train --data data_pinns_Amery.json --config aniso.json
//! ```
//!
//! ### 予測
//! ```bash
//! cargo run --release -- predict --data data_pinns_Amery.json --model results/pinns_aniso_seed=42.mpk --config aniso.json
//! ```

use clap::Parser;
use shelf_pinn::cli::{Cli, Commands};
use shelf_pinn::config::TrainConfig;
use shelf_pinn::{inference, training};

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、`train`または`predict`の処理に振り分けます。
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Train {
            data,
            config,
            output,
            mode,
            seed,
        } => {
            let mut cfg = TrainConfig::load_or_default(config.as_deref())?;
            if let Some(mode) = mode {
                cfg.mode = *mode;
            }
            if seed.is_some() {
                cfg.seed = *seed;
            }
            training::run(data, &cfg, output)?;
        }
        Commands::Predict {
            data,
            model,
            config,
            output,
        } => {
            let cfg = TrainConfig::load_or_default(config.as_deref())?;
            inference::run(data, model, &cfg, output)?;
        }
    }
    Ok(())
}
