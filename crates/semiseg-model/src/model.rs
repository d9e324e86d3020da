use burn::{
    module::Module,
    tensor::{backend::Backend, Int, Tensor},
};

/// What a segmentation network returns for one batch.
#[derive(Debug, Clone)]
pub struct SegmentationOutput<B: Backend> {
    /// Class logits, `[batch_size, num_classes, h, w]`.
    pub logits: Tensor<B, 4>,
    /// Dense pixel representations, `[batch_size, feature_dim, h', w']`.
    pub representations: Tensor<B, 4>,
}

/// A backbone, neck and head producing both predictions and representations.
///
/// The EMA teacher is the same network on the inner backend, so a model used
/// for training has to implement this trait for both backends.
pub trait SegmentationModel<B: Backend>: Module<B> {
    /// Runs the network on `[batch_size, channels, height, width]` images.
    fn forward(&self, images: Tensor<B, 4>) -> SegmentationOutput<B>;
}

/// Images with dense ground truth.
#[derive(Debug, Clone)]
pub struct LabeledBatch<B: Backend> {
    /// `[batch_size, channels, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch_size, height, width]`, ignored pixels hold the ignore index.
    pub labels: Tensor<B, 3, Int>,
}

/// Images without annotation.
#[derive(Debug, Clone)]
pub struct UnlabeledBatch<B: Backend> {
    /// `[batch_size, channels, height, width]`
    pub images: Tensor<B, 4>,
}
