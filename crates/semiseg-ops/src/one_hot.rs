use burn::tensor::{backend::Backend, Int, Tensor};

/// Converts an integer label map `[B, H, W]` into a one-hot map `[B, K, H, W]`.
///
/// Negative labels (ignored pixels) are remapped to class `0` so that every
/// pixel has an encoding; callers are expected to drop them again with a
/// validity mask.
pub fn label_onehot<B: Backend>(labels: Tensor<B, 3, Int>, num_classes: usize) -> Tensor<B, 4> {
    let [batch_size, height, width] = labels.dims();
    let shape = [batch_size, num_classes, height, width];

    let labels = labels
        .clamp_min(0)
        .reshape([batch_size, 1, height, width])
        .expand(shape);
    let classes = Tensor::<B, 1, Int>::arange(0..num_classes as i64, &labels.device())
        .reshape([1, num_classes, 1, 1])
        .expand(shape);

    labels.equal(classes).float()
}
