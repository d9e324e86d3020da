use burn::tensor::{backend::Backend, Tensor};

/// Default lower bound on the norm product, matching common framework defaults.
pub const COSINE_EPS: f64 = 1e-8;

/// Cosine similarity of `lhs` and `rhs` along `dim`.
///
/// Both tensors must share the same shape. The reduced dimension is kept with
/// size 1. The norm product is clamped from below by `eps`.
///
/// # Shapes
///
/// - lhs, rhs: `[..., F, ...]`
/// - output: `[..., 1, ...]`
pub fn cosine_similarity<B: Backend, const D: usize>(
    lhs: Tensor<B, D>,
    rhs: Tensor<B, D>,
    dim: usize,
    eps: f64,
) -> Tensor<B, D> {
    assert_eq!(
        lhs.dims(),
        rhs.dims(),
        "cosine_similarity operands must share a shape"
    );

    let dot = (lhs.clone() * rhs.clone()).sum_dim(dim);
    let lhs_norm = lhs.powf_scalar(2.0).sum_dim(dim).sqrt();
    let rhs_norm = rhs.powf_scalar(2.0).sum_dim(dim).sqrt();

    dot / (lhs_norm * rhs_norm).clamp_min(eps)
}
