//! Dense cross-entropy with an ignore index.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{activation::log_softmax, backend::Backend, Int, Tensor},
};
use semiseg_ops::{resize, ResizeMode};

/// Per-pixel negative log-likelihood of `labels` under `logits`.
///
/// Returns `(loss, valid)`, both `[B, H, W]`: pixels labelled `ignore_index`
/// get a loss of exactly zero and a validity of zero.
///
/// # Shapes
///
/// - logits: `[batch_size, num_classes, height, width]`
/// - labels: `[batch_size, height, width]`
pub fn pixel_cross_entropy<B: Backend>(
    logits: Tensor<B, 4>,
    labels: Tensor<B, 3, Int>,
    ignore_index: i64,
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let [batch_size, num_classes, height, width] = logits.dims();
    assert_eq!(
        labels.dims(),
        [batch_size, height, width],
        "Labels shape must match logits batch and spatial dimensions"
    );

    let valid = labels.clone().not_equal_elem(ignore_index).float();
    let targets = labels
        .clamp(0, num_classes as i64 - 1)
        .reshape([batch_size, 1, height, width]);

    let nll = log_softmax(logits, 1)
        .gather(1, targets)
        .reshape([batch_size, height, width])
        .neg();

    (nll * valid.clone(), valid)
}

/// Configuration for creating a [segmentation cross-entropy loss](SegmentationCrossEntropyLoss).
#[derive(Config, Debug)]
pub struct SegmentationCrossEntropyLossConfig {
    /// Label value excluded from the loss. Default: -1
    #[config(default = -1)]
    pub ignore_index: i64,
    /// Corner alignment used when resizing logits to the label size. Default: false
    #[config(default = false)]
    pub align_corners: bool,
}

impl SegmentationCrossEntropyLossConfig {
    /// Initialize [SegmentationCrossEntropyLoss].
    pub const fn init(&self) -> SegmentationCrossEntropyLoss {
        SegmentationCrossEntropyLoss {
            ignore_index: self.ignore_index,
            align_corners: self.align_corners,
        }
    }
}

/// Supervised cross-entropy for dense predictions.
///
/// Logits are resized to the label resolution first, then the loss is averaged
/// over the pixels that are not ignored.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct SegmentationCrossEntropyLoss {
    /// Label value excluded from the loss.
    pub ignore_index: i64,
    /// Corner alignment used when resizing logits.
    pub align_corners: bool,
}

impl Default for SegmentationCrossEntropyLoss {
    fn default() -> Self {
        SegmentationCrossEntropyLossConfig::new().init()
    }
}

impl ModuleDisplay for SegmentationCrossEntropyLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("ignore_index", &self.ignore_index)
            .add("align_corners", &self.align_corners)
            .optional()
    }
}

impl SegmentationCrossEntropyLoss {
    /// Compute the mean loss over non-ignored pixels.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes, h, w]`
    /// - labels: `[batch_size, height, width]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(&self, logits: Tensor<B, 4>, labels: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        let [_, height, width] = labels.dims();
        let logits = resize(logits, [height, width], ResizeMode::Bilinear, self.align_corners);

        let (loss, valid) = pixel_cross_entropy(logits, labels, self.ignore_index);
        loss.sum() / valid.sum().clamp_min(1.0)
    }
}
