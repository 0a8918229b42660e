use burn::backend::NdArray;
use burn::tensor::Tensor;
use shelf_pinn::data::{
    BoundarySet, Collocation, DataBatch, Front, NormalizedDataset, PointCounts, RawDataset, SampleSet, Sampler,
    ThicknessGrid, VelocityGrid,
};
use shelf_pinn::equation::{BoundaryEquation, BoundaryOutput, EquationOutput, EquationTerms, GoverningEquation};
use shelf_pinn::loss::{LossAssembler, LossInfo};
use shelf_pinn::model::Jet;
use shelf_pinn::pinn::{Mode, Pinn, SolutionNet};
use shelf_pinn::prediction::{PredictConfig, predict};
use shelf_pinn::scale::{ScaleRecord, ScaleStats, extract_scale};
use shelf_pinn::ssa::{CalvingFront, ShallowShelf};

type TestBackend = NdArray<f32>;

struct ZeroNet(usize);

impl SolutionNet<TestBackend> for ZeroNet {
    fn forward(&self, positions: Tensor<TestBackend, 2>) -> Tensor<TestBackend, 2> {
        let [n, _] = positions.dims();
        Tensor::zeros([n, self.0], &positions.device())
    }

    fn jet(&self, positions: Tensor<TestBackend, 2>) -> Jet<TestBackend> {
        let value = self.forward(positions);
        Jet {
            dx: value.zeros_like(),
            dy: value.zeros_like(),
            dxx: value.zeros_like(),
            dxy: value.zeros_like(),
            dyy: value.zeros_like(),
            value,
        }
    }
}

struct ZeroEqn;

impl GoverningEquation<TestBackend> for ZeroEqn {
    fn evaluate<N: SolutionNet<TestBackend>>(
        &self,
        _net: &N,
        positions: Tensor<TestBackend, 2>,
        scale: &ScaleRecord,
    ) -> EquationOutput<TestBackend> {
        let [n, _] = positions.dims();
        let device = positions.device();
        let basal = scale.is_basal();
        EquationOutput {
            residual: Tensor::zeros([n, 2], &device),
            residual_grounded: basal.then(|| Tensor::zeros([n, 2], &device)),
            terms: EquationTerms::zeros(n, basal, &device),
        }
    }
}

struct ZeroFront;

impl BoundaryEquation<TestBackend> for ZeroFront {
    fn evaluate<N: SolutionNet<TestBackend>>(
        &self,
        _net: &N,
        positions: Tensor<TestBackend, 2>,
        _normals: Tensor<TestBackend, 2>,
        _scale: &ScaleRecord,
    ) -> BoundaryOutput<TestBackend> {
        let [n, _] = positions.dims();
        let device = positions.device();
        BoundaryOutput {
            residual: Tensor::zeros([n, 2], &device),
            terms: Tensor::zeros([n, 6], &device),
        }
    }
}

fn zero_batch(basal: bool) -> DataBatch<TestBackend> {
    let device = Default::default();
    let mask = |n: usize| basal.then(|| Tensor::<TestBackend, 2>::ones([n, 1], &device));
    DataBatch {
        smp: SampleSet {
            x: Tensor::zeros([10, 2], &device),
            u: Tensor::zeros([10, 2], &device),
            xh: Tensor::zeros([8, 2], &device),
            h: Tensor::zeros([8, 1], &device),
            ocean_mask: mask(10),
        },
        col: Collocation {
            x: Tensor::zeros([20, 2], &device),
            ocean_mask: mask(20),
        },
        bd: BoundarySet {
            x: Tensor::zeros([5, 2], &device),
            normal: Tensor::zeros([5, 2], &device),
        },
    }
}

fn stats() -> ScaleStats {
    ScaleStats {
        mean: [0.0, 0.0, 100.0, 50.0, 400.0],
        range: [1.0e5, 8.0e4, 300.0, 200.0, 250.0],
    }
}

#[test]
fn zero_net_gives_zero_loss_in_every_mode() {
    for mode in [Mode::Isotropic, Mode::IsotropicBasal, Mode::Anisotropic] {
        let scale = extract_scale(&stats(), mode.is_basal());
        let mut loss_fn = LossAssembler::new(mode, ZeroEqn, ZeroFront, scale, [0.05, 0.1, 0.25].into());
        loss_fn.set_lref(1.0).expect("first calibration");

        let net = ZeroNet(mode.channels());
        let (loss, info) = loss_fn
            .evaluate(&net, &zero_batch(mode.is_basal()))
            .expect("batch matches mode");

        assert_eq!(loss.into_scalar(), 0.0);
        let flat = info.to_vec();
        assert_eq!(flat.len(), LossInfo::arity(mode));
        assert!(flat.iter().all(|v| *v == 0.0), "{mode:?}: {flat:?}");
    }
}

/// 2x3 の厚さグリッドを持つ 4x5 の速度グリッド。右端がカービングフロント。
fn small_dataset() -> RawDataset {
    let (rows, cols) = (4, 5);
    let mut velocity = VelocityGrid {
        shape: (rows, cols),
        x: Vec::new(),
        y: Vec::new(),
        u: Vec::new(),
        v: Vec::new(),
    };
    for r in 0..rows {
        for c in 0..cols {
            velocity.x.push(Some(2000.0 * c as f64));
            velocity.y.push(Some(1500.0 * r as f64));
            velocity.u.push(Some(200.0 + 25.0 * c as f64));
            velocity.v.push(Some(10.0 - 3.0 * r as f64));
        }
    }
    velocity.v[7] = None;
    let ocean_mask = (0..rows * cols).map(|i| Some(if i % cols >= 3 { 1.0 } else { 0.0 })).collect();
    RawDataset {
        velocity,
        thickness: ThicknessGrid {
            shape: (2, 3),
            x: vec![Some(0.0), Some(4000.0), Some(8000.0), Some(0.0), Some(4000.0), Some(8000.0)],
            y: vec![Some(0.0), Some(0.0), Some(0.0), Some(4500.0), Some(4500.0), Some(4500.0)],
            h: vec![Some(600.0), Some(500.0), Some(400.0), Some(580.0), Some(480.0), None],
        },
        front: Front {
            x: vec![8000.0, 8000.0, 8000.0],
            y: vec![0.0, 2250.0, 4500.0],
            nx: vec![1.0, 1.0, 1.0],
            ny: vec![0.0, 0.0, 0.0],
        },
        ocean_mask: Some(ocean_mask),
    }
}

#[test]
fn dataset_file_trains_and_predicts() {
    let path = std::env::temp_dir().join(format!("shelf_pinn_dataset_{}.json", std::process::id()));
    std::fs::write(&path, serde_json::to_string(&small_dataset()).expect("serialize")).expect("write dataset");
    let raw = RawDataset::load(&path).expect("load dataset");
    std::fs::remove_file(&path).ok();

    let device = Default::default();
    let counts = PointCounts {
        n_smp: 10,
        nh_smp: 4,
        n_col: 12,
        n_cbd: 3,
    };
    for mode in [Mode::Isotropic, Mode::IsotropicBasal, Mode::Anisotropic] {
        let data = NormalizedDataset::from_raw(&raw, mode.is_basal()).expect("valid dataset");
        assert_eq!(data.n_vel(), 19);
        assert_eq!(data.n_thk(), 5);
        assert_eq!(data.ocean_mask.is_some(), mode.is_basal());

        let scale = extract_scale(&data.stats, mode.is_basal());
        let mut loss_fn = LossAssembler::new(
            mode,
            ShallowShelf::new(mode),
            CalvingFront::new(mode),
            scale,
            [0.05, 0.1, 0.25].into(),
        );
        let pinn = Pinn::<TestBackend>::new(&device, mode, 2, 8);
        let mut sampler = Sampler::new(&data, counts, mode.is_basal(), 7);
        let batch = sampler.sample::<TestBackend>(&device).expect("sample");

        let lref = loss_fn.calibrate(&pinn, &batch).expect("calibrate");
        assert!(lref > 0.0);
        let (loss, info) = loss_fn.evaluate(&pinn, &batch).expect("evaluate");
        assert!((loss.into_scalar() - 1.0).abs() < 1e-4, "{mode:?}");
        assert_eq!(info.to_vec().len(), LossInfo::arity(mode));

        let grid = predict(
            &pinn,
            &ShallowShelf::new(mode),
            &data,
            mode,
            &PredictConfig { chunks: 3 },
            &device,
        )
        .expect("predict");
        assert_eq!(grid.u.dim(), (4, 5));
        assert!(grid.u[[1, 2]].is_nan());
        assert!(grid.mu[[0, 0]] > 0.0);
    }
}
