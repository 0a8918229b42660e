use crate::config::TrainConfig;
use crate::data::{NormalizedDataset, RawDataset};
use crate::pinn::Pinn;
use crate::prediction::predict;
use crate::ssa::ShallowShelf;
use burn::backend::NdArray;
use log::info;
use std::path::Path;
use std::time::Instant;

type MyBackend = NdArray<f32>;

/// `predict`サブコマンドを実行します。
///
/// 学習時と同じ設定（モード・ネットワークの大きさ）で保存済みモデルを読み込み、
/// 観測グリッド全体での予測を JSON に書き出します。
pub fn run(
    data_path: &Path,
    model_path: &Path,
    config: &TrainConfig,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();

    if !model_path.exists() {
        return Err(format!(
            "モデルファイル '{}' が見つかりません。\n最初に 'train' コマンドでモデルを学習・保存してください。",
            model_path.display()
        )
        .into());
    }

    info!("推論を実行します - バックエンド: NdArray (CPU)");
    let inference_start = Instant::now();

    info!("保存済みモデルを '{}' からロード中...", model_path.display());
    let mode = config.mode;
    let pinn = Pinn::<MyBackend>::load(
        model_path,
        &device,
        mode,
        config.hidden_layers,
        config.hidden_units,
    )?;

    let data = NormalizedDataset::from_raw(&RawDataset::load(data_path)?, mode.is_basal())?;
    let grid = predict(
        &pinn,
        &ShallowShelf::new(pinn.mode()),
        &data,
        mode,
        &config.predict,
        &device,
    )?;
    grid.write_json(output)?;
    let inference_duration = inference_start.elapsed();

    info!(
        "推論が完了しました。速度グリッド: {}x{}, 有効点数: {}",
        data.shape_vel.0,
        data.shape_vel.1,
        data.n_vel()
    );
    info!("=> 推論時間: {:.2?}", inference_duration);
    info!("=> 予測結果を '{}' に保存しました。", output.display());

    Ok(())
}
