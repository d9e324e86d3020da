//! Confidence-weighted cross-entropy against pseudo-labels.
//!
//! Each unlabeled sample is weighted by how much of it the teacher labelled
//! confidently:
//!
//! ```text
//! w_b = |{p : confidence_b(p) >= strong_threshold}| / |{p : label_b(p) != ignore}|
//! ```
//!
//! The per-pixel cross-entropy is scaled by `w_b` and averaged over the pixels
//! whose (unweighted) loss is strictly positive.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Int, Tensor},
};
use semiseg_ops::{resize, ResizeMode};

use crate::cross_entropy::pixel_cross_entropy;

/// Configuration for creating a [pseudo-label loss](PseudoLabelLoss).
#[derive(Config, Debug)]
pub struct PseudoLabelLossConfig {
    /// Confidence at or above which a pseudo-label counts as reliable. Default: 0.97
    #[config(default = 0.97)]
    pub strong_threshold: f64,
    /// Label value excluded from the loss. Default: -1
    #[config(default = -1)]
    pub ignore_index: i64,
    /// Corner alignment used when resizing to the label size. Default: false
    #[config(default = false)]
    pub align_corners: bool,
}

impl PseudoLabelLossConfig {
    /// Initialize [PseudoLabelLoss].
    pub fn init(&self) -> PseudoLabelLoss {
        self.assertions();
        PseudoLabelLoss {
            strong_threshold: self.strong_threshold,
            ignore_index: self.ignore_index,
            align_corners: self.align_corners,
        }
    }

    fn assertions(&self) {
        assert!(
            (0.0..=1.0).contains(&self.strong_threshold),
            "Strong threshold for PseudoLabelLoss must be in [0, 1], got {}",
            self.strong_threshold
        );
    }
}

/// Cross-entropy on pseudo-labels, down-weighting samples with few confident pixels.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct PseudoLabelLoss {
    /// Confidence threshold for reliable pseudo-labels.
    pub strong_threshold: f64,
    /// Label value excluded from the loss.
    pub ignore_index: i64,
    /// Corner alignment used when resizing.
    pub align_corners: bool,
}

impl Default for PseudoLabelLoss {
    fn default() -> Self {
        PseudoLabelLossConfig::new().init()
    }
}

impl ModuleDisplay for PseudoLabelLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("strong_threshold", &self.strong_threshold)
            .add("ignore_index", &self.ignore_index)
            .add("align_corners", &self.align_corners)
            .optional()
    }
}

impl PseudoLabelLoss {
    /// Compute the weighted pseudo-label loss.
    ///
    /// Predictions and confidence are resized (bilinear) to the label size.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, num_classes, h, w]` logits
    /// - pseudo_labels: `[batch_size, height, width]`
    /// - confidence: `[batch_size, h', w']` teacher probability of the pseudo-label
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        pseudo_labels: Tensor<B, 3, Int>,
        confidence: Tensor<B, 3>,
    ) -> Tensor<B, 1> {
        let [batch_size, height, width] = pseudo_labels.dims();
        let predictions = resize(
            predictions,
            [height, width],
            ResizeMode::Bilinear,
            self.align_corners,
        );
        let confidence = self.resize_confidence(confidence, [height, width]);

        let weights = self.sample_weights(confidence, pseudo_labels.clone());
        let (loss, _) = pixel_cross_entropy(predictions, pseudo_labels, self.ignore_index);

        let positive = loss.clone().greater_elem(0.0).float();
        let weighted = loss * weights.reshape([batch_size, 1, 1]);

        (weighted * positive.clone()).sum() / positive.sum().clamp_min(1.0)
    }

    /// Per-sample weights: confident pixel count over valid pixel count.
    ///
    /// # Shapes
    ///
    /// - confidence: `[batch_size, height, width]`
    /// - pseudo_labels: `[batch_size, height, width]`
    /// - output: `[batch_size]`
    pub fn sample_weights<B: Backend>(
        &self,
        confidence: Tensor<B, 3>,
        pseudo_labels: Tensor<B, 3, Int>,
    ) -> Tensor<B, 1> {
        let [batch_size, height, width] = pseudo_labels.dims();
        assert_eq!(
            confidence.dims(),
            [batch_size, height, width],
            "Confidence shape must match pseudo-label shape"
        );

        let confident = confidence
            .detach()
            .greater_equal_elem(self.strong_threshold)
            .float()
            .reshape([batch_size, height * width])
            .sum_dim(1);
        let valid = pseudo_labels
            .not_equal_elem(self.ignore_index)
            .float()
            .reshape([batch_size, height * width])
            .sum_dim(1);

        (confident / valid.clamp_min(1.0)).reshape([batch_size])
    }

    fn resize_confidence<B: Backend>(&self, confidence: Tensor<B, 3>, size: [usize; 2]) -> Tensor<B, 3> {
        let [batch_size, height, width] = confidence.dims();
        resize(
            confidence.reshape([batch_size, 1, height, width]),
            size,
            ResizeMode::Bilinear,
            self.align_corners,
        )
        .reshape([batch_size, size[0], size[1]])
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn pseudo_label_weight_is_confident_fraction_of_valid_pixels() {
        let device = Default::default();
        let loss = PseudoLabelLossConfig::new().with_strong_threshold(0.9).init();
        let confidence = Tensor::<TestBackend, 3>::from_floats(
            [[[0.95, 0.5], [0.92, 0.1]], [[0.99, 0.2], [0.3, 0.4]]],
            &device,
        );
        let labels = Tensor::<TestBackend, 3, Int>::from_ints(
            [[[0, 1], [1, 0]], [[2, 1], [-1, -1]]],
            &device,
        );

        let weights = loss.sample_weights(confidence, labels);

        // sample 0: 2 confident of 4 valid; sample 1: 1 confident of 2 valid
        weights
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.5, 0.5]), Tolerance::default());
    }

    #[test]
    fn pseudo_label_loss_without_valid_pixels_is_zero() {
        let device = Default::default();
        let loss = PseudoLabelLoss::default();
        let confidence = Tensor::<TestBackend, 3>::ones([1, 2, 2], &device);
        let labels = Tensor::<TestBackend, 3, Int>::full([1, 2, 2], -1, &device);

        let weights = loss.sample_weights(confidence.clone(), labels.clone());
        let logits = Tensor::<TestBackend, 4>::zeros([1, 2, 2, 2], &device);
        let result = loss.forward(logits, labels, confidence);

        // confident pixels exist but none is valid: the clamped denominator keeps it finite
        weights
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([4.0]), Tolerance::default());
        result
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.0]), Tolerance::default());
    }

    #[test]
    fn pseudo_label_loss_scales_cross_entropy_by_sample_weight() {
        let device = Default::default();
        let loss = PseudoLabelLossConfig::new().with_strong_threshold(0.9).init();
        // two pixels, two classes; uniform logits give ln(2) per pixel
        let logits = Tensor::<TestBackend, 4>::zeros([1, 2, 1, 2], &device);
        let labels = Tensor::<TestBackend, 3, Int>::from_ints([[[0, 1]]], &device);
        let confidence = Tensor::<TestBackend, 3>::from_floats([[[0.95, 0.5]]], &device);

        let result = loss.forward(logits, labels, confidence);

        let expected = 0.5 * 2.0f32.ln();
        result
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([expected]), Tolerance::default());
    }

    #[test]
    fn pseudo_label_loss_averages_only_over_positive_loss_pixels() {
        let device = Default::default();
        let loss = PseudoLabelLossConfig::new().with_strong_threshold(0.5).init();
        let logits = Tensor::<TestBackend, 4>::zeros([1, 2, 1, 4], &device);
        let labels = Tensor::<TestBackend, 3, Int>::from_ints([[[0, 1, -1, -1]]], &device);
        let confidence = Tensor::<TestBackend, 3>::ones([1, 1, 4], &device);

        let result = loss.forward(logits, labels, confidence);

        // weight = 4 confident / 2 valid = 2; the two ignored pixels do not dilute the mean
        let expected = 2.0 * 2.0f32.ln();
        result
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([expected]), Tolerance::default());
    }

    #[test]
    fn pseudo_label_loss_resizes_predictions_and_confidence() {
        let device = Default::default();
        let loss = PseudoLabelLossConfig::new().with_strong_threshold(0.9).init();
        let logits = Tensor::<TestBackend, 4>::zeros([1, 3, 2, 2], &device);
        let labels = Tensor::<TestBackend, 3, Int>::zeros([1, 4, 4], &device);
        let confidence = Tensor::<TestBackend, 3>::ones([1, 2, 2], &device);

        let result = loss.forward(logits, labels, confidence);

        result.into_data().assert_approx_eq::<f32>(
            &TensorData::from([3.0f32.ln()]),
            Tolerance::default(),
        );
    }

    #[test]
    #[should_panic = "Strong threshold for PseudoLabelLoss must be in [0, 1]"]
    fn pseudo_label_config_rejects_threshold_above_one() {
        let _loss = PseudoLabelLossConfig::new().with_strong_threshold(1.5).init();
    }
}
