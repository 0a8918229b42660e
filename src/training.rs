use crate::config::TrainConfig;
use crate::data::{DataBatch, NormalizedDataset, RawDataset, Sampler};
use crate::error::Result;
use crate::loss::{LossAssembler, LossInfo};
use crate::pinn::Pinn;
use crate::prediction::predict;
use crate::scale::extract_scale;
use crate::ssa::{CalvingFront, ShallowShelf};
use crate::output_stem;
use burn::backend::{Autodiff, NdArray};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use log::info;
use plotters::prelude::*;
use std::path::Path;
use std::time::Instant;

type MyBackend = Autodiff<NdArray<f32>>;
type ShelfLoss = LossAssembler<ShallowShelf, CalvingFront>;

/// 正則化の重みのスケジュール: `max(10^(-2 k / epochs), floor)`。
pub fn wsp_schedule(step: usize, epochs: usize, floor: f32) -> f32 {
    let progress = step as f32 / epochs.max(1) as f32;
    10f32.powf(-2.0 * progress).max(floor)
}

/// Adam で `epochs` 回パラメータを更新し、各ステップの損失の内訳を返します。
///
/// `batch_for` はステップ番号からそのステップのバッチを返します。
#[allow(clippy::too_many_arguments)]
fn optimize(
    mut pinn: Pinn<MyBackend>,
    loss_fn: &mut ShelfLoss,
    epochs: usize,
    learning_rate: f64,
    mut batch_for: impl FnMut(usize) -> Result<DataBatch<MyBackend>>,
    wsp_floor: Option<f32>,
    log_every: usize,
    label: &str,
) -> Result<(Pinn<MyBackend>, Vec<LossInfo>)> {
    let mut optim = AdamConfig::new().init();
    let mut history = Vec::with_capacity(epochs);
    for step in 0..epochs {
        if let Some(floor) = wsp_floor {
            loss_fn.set_wsp(wsp_schedule(step, epochs, floor));
        }
        let batch = batch_for(step)?;
        let (loss, info) = loss_fn.evaluate(&pinn, &batch)?;

        if log_every > 0 && (step + 1) % log_every == 0 {
            info!(
                "[{} {}] Total Loss: {:.6}, Data: {:.6}, Eqn: {:.6}, Bd: {:.6}",
                label,
                step + 1,
                info.total,
                info.data,
                info.eqn,
                info.bd
            );
        }
        history.push(info);

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &pinn.model);
        pinn.model = optim.step(learning_rate, pinn.model, grads);
    }
    Ok((pinn, history))
}

/// `train`サブコマンドを実行します。
///
/// 損失の基準値を決めてから Adam で学習し、倍の点数の固定バッチで仕上げます。
/// 学習済みモデル・予測結果・損失グラフを `output_dir` に保存します。
pub fn run(data_path: &Path, config: &TrainConfig, output_dir: &Path) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();
    let mode = config.mode;
    let seed = config.seed.unwrap_or_else(|| rand::random::<u64>() % 3000);
    MyBackend::seed(seed);
    std::fs::create_dir_all(output_dir)?;

    // --- データセットの準備 ---
    let data = NormalizedDataset::from_raw(&RawDataset::load(data_path)?, mode.is_basal())?;
    info!(
        "データを読み込みました: 速度 {} 点, 厚さ {} 点, フロント {} 点 (mode: {:?}, seed: {})",
        data.n_vel(),
        data.n_thk(),
        data.front_x.len(),
        mode,
        seed
    );
    let scale = extract_scale(&data.stats, mode.is_basal());

    // --- モデルと損失関数の初期化 ---
    let pinn = Pinn::<MyBackend>::new(&device, mode, config.hidden_layers, config.hidden_units);
    let mut loss_fn = LossAssembler::new(
        mode,
        ShallowShelf::new(mode),
        CalvingFront::new(mode),
        scale,
        config.weights.into(),
    );
    info!(
        "代表スケール: l0m={:.1}, u0m={:.3e}, mu0={:.3e} (mode: {:?})",
        loss_fn.scale().l0m(),
        loss_fn.scale().u0m(),
        loss_fn.scale().mu0,
        loss_fn.mode()
    );
    let mut sampler = Sampler::new(&data, config.points, mode.is_basal(), seed);
    info!("サンプル点数: {:?}", sampler.counts());
    let first = sampler.sample::<MyBackend>(&device)?;
    let lref = loss_fn.calibrate(&pinn, &first)?;
    info!("損失の基準値: {:.6}", lref);

    let training_start = Instant::now();
    let wsp_floor = mode.is_aniso().then_some(config.wsp_floor);

    // --- 学習ループ ---
    info!("Adam による学習を開始します - バックエンド: NdArray (CPU)");
    let mut first = Some(first);
    let (pinn, mut history) = optimize(
        pinn,
        &mut loss_fn,
        config.epochs,
        config.learning_rate,
        |_| match first.take() {
            Some(batch) => Ok(batch),
            None => sampler.sample(&device),
        },
        wsp_floor,
        config.log_every,
        "Adam",
    )?;

    info!("固定バッチで仕上げの学習を行います");
    let refine_batch = Sampler::new(&data, config.points.doubled(), mode.is_basal(), seed.wrapping_add(1))
        .sample::<MyBackend>(&device)?;
    let (pinn, refine_history) = optimize(
        pinn,
        &mut loss_fn,
        config.refine_epochs,
        config.refine_learning_rate,
        |_| Ok(refine_batch.clone()),
        None,
        config.log_every,
        "Refine",
    )?;
    if mode.is_aniso() {
        info!("正則化の重み: {:.4}", loss_fn.calibration().wsp());
    }
    history.extend(refine_history);
    let training_duration = training_start.elapsed();
    info!("学習が完了しました。");
    info!("=> 学習時間: {:.2?}", training_duration);

    // --- 結果の保存と描画 ---
    let stem = output_dir.join(output_stem(mode, seed));
    pinn.save(stem.with_extension("mpk"))?;
    info!("=> モデルを '{}' に保存しました。", stem.with_extension("mpk").display());

    let inner = pinn.valid();
    let mut grid = predict(
        &inner,
        &ShallowShelf::new(mode),
        &data,
        mode,
        &config.predict,
        &device,
    )?;
    grid.loss = history.iter().map(LossInfo::to_vec).collect();
    grid.write_json(stem.with_extension("json"))?;
    info!("=> 予測結果を '{}' に保存しました。", stem.with_extension("json").display());

    let graph = output_dir.join(format!("{}_loss.png", output_stem(mode, seed)));
    plot_loss_history(&history, &graph)?;
    info!("=> 損失グラフを '{}' に保存しました。", graph.display());

    Ok(())
}

/// 学習過程の損失をグラフとしてPNGファイルに出力します。
fn plot_loss_history(history: &[LossInfo], path: &Path) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let series: [(&str, RGBColor, Vec<f32>); 3] = [
        ("Total Loss", RED, history.iter().map(|i| i.total).collect()),
        ("Data Loss", BLUE, history.iter().map(|i| i.data).collect()),
        ("Equation Loss", GREEN, history.iter().map(|i| i.eqn).collect()),
    ];
    let logs = series
        .iter()
        .flat_map(|(_, _, s)| s.iter().map(|v| v.log10()))
        .filter(|v| v.is_finite());
    let (min_log_loss, max_log_loss) = logs.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let (min_log_loss, max_log_loss) = if min_log_loss.is_finite() {
        (min_log_loss - 0.5, max_log_loss + 0.5)
    } else {
        (-6.0, 1.0)
    };

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..history.len().max(1), min_log_loss..max_log_loss)?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Iterations")
        .draw()?;
    for (label, color, values) in &series {
        let color = *color;
        chart
            .draw_series(LineSeries::new(
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| **v > 0.0)
                    .map(|(i, &val)| (i, val.log10())),
                &color,
            ))?
            .label(*label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wsp_decays_to_floor() {
        assert_eq!(wsp_schedule(0, 100, 0.0125), 1.0);
        assert!((wsp_schedule(50, 100, 0.0125) - 0.1).abs() < 1e-6);
        assert_eq!(wsp_schedule(100, 100, 0.0125), 0.0125);
        assert_eq!(wsp_schedule(5, 0, 0.5), 0.5);
    }
}
