//! A minimal segmentation network made of two pointwise convolutions.

use burn::{
    config::Config,
    module::Module,
    nn::conv::{Conv2d, Conv2dConfig},
    tensor::{backend::Backend, Tensor},
};

use crate::model::{SegmentationModel, SegmentationOutput};

/// Configuration for creating a [linear probe segmenter](LinearProbeSegmenter).
#[derive(Config, Debug)]
pub struct LinearProbeSegmenterConfig {
    /// Input image channels.
    pub in_channels: usize,
    /// Width of the representation head.
    pub feature_dim: usize,
    /// Number of semantic classes.
    pub num_classes: usize,
}

impl LinearProbeSegmenterConfig {
    /// Initialize [LinearProbeSegmenter].
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinearProbeSegmenter<B> {
        LinearProbeSegmenter {
            embed: Conv2dConfig::new([self.in_channels, self.feature_dim], [1, 1]).init(device),
            classifier: Conv2dConfig::new([self.feature_dim, self.num_classes], [1, 1])
                .init(device),
        }
    }
}

/// Embeds every pixel linearly and classifies the embedding.
///
/// Representations and logits share the input resolution.
#[derive(Module, Debug)]
pub struct LinearProbeSegmenter<B: Backend> {
    /// Pixel embedding, the representation head.
    pub embed: Conv2d<B>,
    /// Per-pixel classifier on top of the embedding.
    pub classifier: Conv2d<B>,
}

impl<B: Backend> SegmentationModel<B> for LinearProbeSegmenter<B> {
    fn forward(&self, images: Tensor<B, 4>) -> SegmentationOutput<B> {
        let representations = self.embed.forward(images);
        let logits = self.classifier.forward(representations.clone());
        SegmentationOutput {
            logits,
            representations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn linear_probe_output_shapes() {
        let device = Default::default();
        let model = LinearProbeSegmenterConfig::new(3, 8, 5).init::<TestBackend>(&device);

        let output = model.forward(Tensor::zeros([2, 3, 6, 4], &device));

        assert_eq!(output.logits.dims(), [2, 5, 6, 4]);
        assert_eq!(output.representations.dims(), [2, 8, 6, 4]);
    }
}
