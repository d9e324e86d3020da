//! Batch normalization that blends source- and target-domain statistics.
//!
//! A mixed batch is split by domain. The target subset is normalized with its
//! own batch statistics. The source subset is normalized with a blend of its
//! batch statistics and the target batch statistics, weighted by `ratio`:
//!
//! ```text
//! mean_mix = ratio * mean_source + (1 - ratio) * mean_target
//! var_mix  = ratio * var_source  + (1 - ratio) * var_target
//! ```
//!
//! Each domain keeps its own running statistics. Inference (a backend without
//! autodiff) normalizes everything with the source running statistics, like a
//! regular batch norm in evaluation mode.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay, Param, RunningState},
    nn::Initializer,
    tensor::{backend::Backend, Tensor},
};
use semiseg_ops::{Domain, DomainSplit};
use serde::{Deserialize, Serialize};

use crate::error::{NormError, NormResult};

/// How source statistics are combined with target statistics.
///
/// Stored as an integer index in configuration files. Only index `0` has an
/// implementation; any other index parses into [`MixMode::Unsupported`] and is
/// rejected when the layer is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MixMode {
    /// Blend the source batch statistics towards the target batch statistics.
    Replace,
    /// A mode index without an implementation.
    Unsupported(u8),
}

impl MixMode {
    /// The integer index of this mode.
    pub const fn index(self) -> u8 {
        match self {
            Self::Replace => 0,
            Self::Unsupported(mode) => mode,
        }
    }
}

impl From<u8> for MixMode {
    fn from(mode: u8) -> Self {
        match mode {
            0 => Self::Replace,
            other => Self::Unsupported(other),
        }
    }
}

impl From<MixMode> for u8 {
    fn from(mode: MixMode) -> Self {
        mode.index()
    }
}

/// Configuration for creating a [mixed batch norm](MixBatchNorm) layer.
#[derive(Config, Debug)]
pub struct MixBatchNormConfig {
    /// Number of channels.
    pub num_features: usize,
    /// Weight of the source batch statistics in `[0, 1]`. Default: 0.5
    #[config(default = 0.5)]
    pub ratio: f64,
    /// Stop gradients flowing into the source branch through the target
    /// statistics. Default: true
    #[config(default = true)]
    pub detach: bool,
    /// Mixing mode. Default: [`MixMode::Replace`]
    #[config(default = "MixMode::Replace")]
    pub mode: MixMode,
    /// Running statistics update factor. Default: 0.1
    #[config(default = 0.1)]
    pub momentum: f64,
    /// Added to the variance before taking the square root. Default: 1e-5
    #[config(default = 1e-5)]
    pub epsilon: f64,
}

impl MixBatchNormConfig {
    /// Checks the configuration without building a layer.
    ///
    /// # Errors
    ///
    /// Returns an error for a ratio or momentum outside `[0, 1]` or an
    /// unsupported mixing mode.
    pub fn validate(&self) -> NormResult<()> {
        if !(0.0..=1.0).contains(&self.ratio) {
            return Err(NormError::RatioOutOfRange { ratio: self.ratio });
        }
        if !(0.0..=1.0).contains(&self.momentum) {
            return Err(NormError::MomentumOutOfRange {
                momentum: self.momentum,
            });
        }
        match self.mode {
            MixMode::Replace => Ok(()),
            MixMode::Unsupported(mode) => Err(NormError::UnsupportedMixMode { mode }),
        }
    }

    /// Initializes a [MixBatchNorm] layer, validating the configuration first.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn try_init<B: Backend>(&self, device: &B::Device) -> NormResult<MixBatchNorm<B>> {
        self.validate()?;

        let zeros = || RunningState::new(Tensor::zeros([self.num_features], device));
        let ones = || RunningState::new(Tensor::ones([self.num_features], device));

        Ok(MixBatchNorm {
            gamma: Initializer::Ones.init([self.num_features], device),
            beta: Initializer::Zeros.init([self.num_features], device),
            running_mean: zeros(),
            running_var: ones(),
            running_mean_target: zeros(),
            running_var_target: ones(),
            ratio: self.ratio,
            detach: self.detach,
            momentum: self.momentum,
            epsilon: self.epsilon,
        })
    }

    /// Initializes a [MixBatchNorm] layer.
    ///
    /// # Panics
    ///
    /// Panics on an invalid configuration, see [`validate`](Self::validate).
    pub fn init<B: Backend>(&self, device: &B::Device) -> MixBatchNorm<B> {
        self.try_init(device).unwrap_or_else(|err| panic!("{err}"))
    }
}

/// Per-channel mean and (biased) variance.
#[derive(Debug, Clone)]
pub struct Statistics<B: Backend> {
    /// Per-channel mean, shape `[C]`.
    pub mean: Tensor<B, 1>,
    /// Per-channel variance, shape `[C]`.
    pub var: Tensor<B, 1>,
}

impl<B: Backend> Statistics<B> {
    /// Batch statistics of `input` `[N, C, H, W]` over the `N`, `H` and `W` axes.
    ///
    /// The variance is taken around this subset's own mean, never around the
    /// other domain's mean.
    pub fn of(input: Tensor<B, 4>) -> Self {
        let [batch_size, channels, height, width] = input.dims();
        let flat = input
            .swap_dims(0, 1)
            .reshape([channels, batch_size * height * width]);

        let mean = flat.clone().mean_dim(1);
        let var = (flat - mean.clone()).powf_scalar(2.0).mean_dim(1);

        Self {
            mean: mean.reshape([channels]),
            var: var.reshape([channels]),
        }
    }

    /// `ratio * self + (1 - ratio) * other`, for mean and variance alike.
    pub fn mix(self, other: Self, ratio: f64) -> Self {
        Self {
            mean: self.mean.mul_scalar(ratio) + other.mean.mul_scalar(1.0 - ratio),
            var: self.var.mul_scalar(ratio) + other.var.mul_scalar(1.0 - ratio),
        }
    }

    /// Cuts both tensors from the autodiff graph.
    pub fn detach(self) -> Self {
        Self {
            mean: self.mean.detach(),
            var: self.var.detach(),
        }
    }
}

/// Batch normalization over a mixed source/target batch.
///
/// Should be created with [MixBatchNormConfig].
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct MixBatchNorm<B: Backend> {
    /// Per-channel scale.
    pub gamma: Param<Tensor<B, 1>>,
    /// Per-channel shift.
    pub beta: Param<Tensor<B, 1>>,
    /// Source-domain running mean, used at inference.
    pub running_mean: RunningState<Tensor<B, 1>>,
    /// Source-domain running variance, used at inference.
    pub running_var: RunningState<Tensor<B, 1>>,
    /// Target-domain running mean.
    pub running_mean_target: RunningState<Tensor<B, 1>>,
    /// Target-domain running variance.
    pub running_var_target: RunningState<Tensor<B, 1>>,
    /// Weight of the source batch statistics.
    pub ratio: f64,
    /// Whether target statistics are detached before mixing.
    pub detach: bool,
    /// Running statistics update factor.
    pub momentum: f64,
    /// Variance epsilon.
    pub epsilon: f64,
}

impl<B: Backend> ModuleDisplay for MixBatchNorm<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        let [num_features] = self.beta.dims();

        content
            .add("num_features", &num_features)
            .add("ratio", &self.ratio)
            .add("detach", &self.detach)
            .add("momentum", &self.momentum)
            .add("epsilon", &self.epsilon)
            .optional()
    }
}

impl<B: Backend> MixBatchNorm<B> {
    /// Applies the layer to a mixed batch.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, channels, height, width]`
    ///
    /// # Panics
    ///
    /// Panics if `domains` does not cover the batch dimension.
    pub fn forward(&self, input: Tensor<B, 4>, domains: &DomainSplit) -> Tensor<B, 4> {
        self.try_forward(input, domains)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible variant of [`forward`](Self::forward).
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Domain`] if `domains` does not cover the batch.
    pub fn try_forward(&self, input: Tensor<B, 4>, domains: &DomainSplit) -> NormResult<Tensor<B, 4>> {
        if B::ad_enabled() {
            self.forward_train(input, domains)
        } else {
            Ok(self.forward_inference(input))
        }
    }

    /// Normalizes the whole batch with the source running statistics.
    pub fn forward_inference(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let stats = self.running_stats(Domain::Source);
        self.scale_shift(self.normalize(input, &stats))
    }

    fn forward_train(&self, input: Tensor<B, 4>, domains: &DomainSplit) -> NormResult<Tensor<B, 4>> {
        let (source, target) = domains.split(input)?;

        let (target_output, reference) = match target {
            Some(target) => {
                let stats = Statistics::of(target.clone());
                self.update_running_stats(Domain::Target, &stats);
                let output = self.normalize(target, &stats);
                let reference = if self.detach { stats.detach() } else { stats };
                (Some(output), reference)
            }
            None => {
                tracing::warn!("batch has no target samples; mixing against target running statistics");
                (None, self.running_stats(Domain::Target))
            }
        };

        let source_output = match source {
            Some(source) => {
                let stats = Statistics::of(source.clone()).mix(reference, self.ratio);
                self.update_running_stats(Domain::Source, &stats);
                Some(self.normalize(source, &stats))
            }
            None => {
                tracing::warn!("batch has no source samples; source running statistics unchanged");
                None
            }
        };

        let output = domains.merge(source_output, target_output)?;
        Ok(self.scale_shift(output))
    }

    /// Current running statistics of `domain`.
    pub fn running_stats(&self, domain: Domain) -> Statistics<B> {
        let (mean, var) = self.states(domain);
        Statistics {
            mean: mean.value_sync(),
            var: var.value_sync(),
        }
    }

    /// Overwrites the running statistics of `domain`.
    pub fn set_running_stats(&self, domain: Domain, stats: Statistics<B>) {
        let (mean, var) = self.states(domain);
        mean.update(stats.mean.detach());
        var.update(stats.var.detach());
    }

    fn update_running_stats(&self, domain: Domain, stats: &Statistics<B>) {
        let (mean_state, var_state) = self.states(domain);
        let momentum = self.momentum;

        let mean = mean_state.value_sync().mul_scalar(1.0 - momentum)
            + stats.mean.clone().detach().mul_scalar(momentum);
        let var = var_state.value_sync().mul_scalar(1.0 - momentum)
            + stats.var.clone().detach().mul_scalar(momentum);

        mean_state.update(mean.detach());
        var_state.update(var.detach());
    }

    fn states(
        &self,
        domain: Domain,
    ) -> (&RunningState<Tensor<B, 1>>, &RunningState<Tensor<B, 1>>) {
        match domain {
            Domain::Source => (&self.running_mean, &self.running_var),
            Domain::Target => (&self.running_mean_target, &self.running_var_target),
        }
    }

    fn normalize(&self, input: Tensor<B, 4>, stats: &Statistics<B>) -> Tensor<B, 4> {
        let [channels] = stats.mean.dims();
        let mean = stats.mean.clone().reshape([1, channels, 1, 1]);
        let std = stats
            .var
            .clone()
            .add_scalar(self.epsilon)
            .sqrt()
            .reshape([1, channels, 1, 1]);

        (input - mean) / std
    }

    fn scale_shift(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [channels] = self.gamma.dims();
        let gamma = self.gamma.val().reshape([1, channels, 1, 1]);
        let beta = self.beta.val().reshape([1, channels, 1, 1]);

        input * gamma + beta
    }
}
