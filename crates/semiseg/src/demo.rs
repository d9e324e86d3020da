//! A synthetic end-to-end run: ReCo training steps on a linear probe and one
//! mixed batch normalization pass.

use burn::{
    config::Config,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion, Int, Tensor, TensorData},
};
use semiseg_model::{
    LabeledBatch, LinearProbeSegmenter, LinearProbeSegmenterConfig, ReCo, ReCoConfig,
    SemiSegResult, UnlabeledBatch,
};
use semiseg_norm::{Domain, DomainSplit, MixBatchNormConfig};
use tracing::info;

/// Settings of the synthetic run.
#[derive(Config, Debug)]
pub struct DemoConfig {
    /// ReCo settings; `num_classes` also sets the synthetic label range.
    pub reco: ReCoConfig,
    /// Training steps to run. Default: 2
    #[config(default = 2)]
    pub steps: usize,
    /// Samples per labeled and per unlabeled batch. Default: 2
    #[config(default = 2)]
    pub batch_size: usize,
    /// Side of the square synthetic images. Default: 8
    #[config(default = 8)]
    pub image_size: usize,
    /// Image channels. Default: 3
    #[config(default = 3)]
    pub in_channels: usize,
    /// Representation width of the probe. Default: 8
    #[config(default = 8)]
    pub feature_dim: usize,
    /// Adam learning rate. Default: 1e-2
    #[config(default = 1e-2)]
    pub learning_rate: f64,
    /// Source weight of the mixed batch normalization. Default: 0.5
    #[config(default = 0.5)]
    pub mix_ratio: f64,
    /// Phase of the synthetic image pattern. Default: 42
    #[config(default = 42)]
    pub seed: u64,
}

/// Losses of one synthetic step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepLosses {
    /// Weighted total.
    pub loss: f64,
    /// Supervised cross-entropy.
    pub sup_loss: f64,
    /// Pseudo-label loss.
    pub unsup_loss: f64,
    /// Regional contrastive loss.
    pub reco_loss: f64,
}

/// What the synthetic run produced.
#[derive(Debug, Clone)]
pub struct DemoReport {
    /// One entry per training step.
    pub steps: Vec<StepLosses>,
    /// EMA updates applied to the teacher.
    pub teacher_step: usize,
    /// Source running mean of the normalization layer after one pass.
    pub source_running_mean: Vec<f32>,
    /// Target running mean of the normalization layer after one pass.
    pub target_running_mean: Vec<f32>,
}

/// Runs the synthetic training loop on `device`.
///
/// # Errors
///
/// Returns an error if the ReCo or normalization settings are invalid.
pub fn run_demo<B: AutodiffBackend>(config: &DemoConfig, device: &B::Device) -> SemiSegResult<DemoReport> {
    let mut student: LinearProbeSegmenter<B> =
        LinearProbeSegmenterConfig::new(config.in_channels, config.feature_dim, config.reco.num_classes)
            .init(device);
    let mut reco = ReCo::new(config.reco.clone(), &student)?;
    let mut optimizer = AdamConfig::new().init::<B, LinearProbeSegmenter<B>>();

    let mut steps = Vec::with_capacity(config.steps);
    for step in 0..config.steps {
        let labeled = LabeledBatch {
            images: synthetic_images(config, 2 * step, device),
            labels: stripe_labels(config, device),
        };
        let unlabeled = UnlabeledBatch {
            images: synthetic_images(config, 2 * step + 1, device),
        };

        let output = reco.forward_train(&student, &labeled, &unlabeled);
        let losses = StepLosses {
            loss: output.loss.clone().into_scalar().elem(),
            sup_loss: output.sup_loss.into_scalar().elem(),
            unsup_loss: output.unsup_loss.into_scalar().elem(),
            reco_loss: output.reco_loss.into_scalar().elem(),
        };
        info!(
            step,
            loss = losses.loss,
            sup = losses.sup_loss,
            unsup = losses.unsup_loss,
            reco = losses.reco_loss,
            "ReCo step"
        );

        let grads = GradientsParams::from_grads(output.loss.backward(), &student);
        student = optimizer.step(config.learning_rate, student, grads);
        reco.update_teacher(&student);
        steps.push(losses);
    }

    let norm = MixBatchNormConfig::new(config.in_channels)
        .with_ratio(config.mix_ratio)
        .try_init::<B>(device)?;
    let domain_labels: Vec<i64> = (0..2 * config.batch_size)
        .map(|i| i64::from(i >= config.batch_size))
        .collect();
    let domains = DomainSplit::from_labels(&domain_labels)?;
    let mixed = Tensor::cat(
        vec![
            synthetic_images(config, 0, device),
            synthetic_images(config, 1, device),
        ],
        0,
    );
    let normalized = norm.try_forward(mixed, &domains)?;
    let output_mean: f64 = normalized.clone().mean().into_scalar().elem();
    info!(shape = ?normalized.dims(), mean = output_mean, "mixed batch normalization pass");

    let read = |domain| -> Vec<f32> {
        norm.running_stats(domain)
            .mean
            .into_data()
            .iter::<f32>()
            .collect()
    };
    let report = DemoReport {
        teacher_step: reco.teacher().step(),
        source_running_mean: read(Domain::Source),
        target_running_mean: read(Domain::Target),
        steps,
    };
    info!(
        teacher_step = report.teacher_step,
        source = ?report.source_running_mean,
        target = ?report.target_running_mean,
        "mixed batch normalization running means"
    );

    Ok(report)
}

/// Smooth deterministic images; `batch` shifts the pattern between batches.
fn synthetic_images<B: AutodiffBackend>(
    config: &DemoConfig,
    batch: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    let shape = [
        config.batch_size,
        config.in_channels,
        config.image_size,
        config.image_size,
    ];
    let phase = config.seed as f32 + batch as f32 * 0.5;
    let values: Vec<f32> = (0..shape.iter().product::<usize>())
        .map(|i| (i as f32 * 0.618 + phase).sin())
        .collect();

    Tensor::from_data(TensorData::new(values, shape), device)
}

/// Vertical class stripes; the last row is ignored.
fn stripe_labels<B: AutodiffBackend>(config: &DemoConfig, device: &B::Device) -> Tensor<B, 3, Int> {
    let size = config.image_size;
    let num_classes = config.reco.num_classes;
    let ignore = config.reco.ignore_index;

    let labels: Vec<i64> = (0..config.batch_size * size * size)
        .map(|i| {
            let (row, col) = ((i / size) % size, i % size);
            if row + 1 == size {
                ignore
            } else {
                (col * num_classes / size) as i64
            }
        })
        .collect();

    Tensor::from_data(
        TensorData::new(labels, [config.batch_size, size, size]),
        device,
    )
}
