//! Regional contrastive loss over class prototypes.
//!
//! For every class present in the batch the valid pixel representations are
//! averaged into a prototype. Pixels of a class whose predicted probability is
//! below `strong_threshold` are *hard queries*; a fixed number of them is drawn
//! as anchors. Each anchor is contrasted against its own class prototype
//! (positive key) and `num_negatives` pixel representations of other classes
//! (negative keys). Negative classes are chosen with probability
//! `softmax(cos(proto_i, proto_j) / temperature)`, so classes whose prototypes
//! sit close to the anchor's class are sampled more often.
//!
//! The loss of one class is the InfoNCE objective with the positive at index 0.
//! The total is the mean over classes that had hard queries. The loss is zero
//! when fewer than two classes have valid pixels.

use std::sync::{Mutex, PoisonError};

use burn::{
    config::Config,
    tensor::{
        activation::{log_softmax, softmax},
        backend::Backend,
        Tensor,
    },
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use semiseg_ops::{cosine_similarity, index_tensor, negative_index_sampler, Categorical, COSINE_EPS};
use tracing::{debug, trace, warn};

/// Configuration for creating a [regional contrastive loss](RegionalContrastLoss).
#[derive(Config, Debug)]
pub struct RegionalContrastLossConfig {
    /// Probability below which a valid pixel is a hard query. Default: 0.97
    #[config(default = 0.97)]
    pub strong_threshold: f64,
    /// Temperature dividing similarities. Default: 0.5
    #[config(default = 0.5)]
    pub temperature: f64,
    /// Anchors drawn per class. Default: 256
    #[config(default = 256)]
    pub num_queries: usize,
    /// Negative keys per anchor. Default: 256
    #[config(default = 256)]
    pub num_negatives: usize,
    /// Seed of the negative sampler. A random seed is used when absent.
    pub seed: Option<u64>,
}

impl RegionalContrastLossConfig {
    /// Initialize [RegionalContrastLoss].
    pub fn init(&self) -> RegionalContrastLoss {
        self.assertions();
        let seed = self.seed.unwrap_or_else(rand::random);
        RegionalContrastLoss {
            strong_threshold: self.strong_threshold,
            temperature: self.temperature,
            num_queries: self.num_queries,
            num_negatives: self.num_negatives,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn assertions(&self) {
        assert!(
            (0.0..=1.0).contains(&self.strong_threshold),
            "Strong threshold for RegionalContrastLoss must be in [0, 1], got {}",
            self.strong_threshold
        );
        assert!(
            self.temperature > 0.0,
            "Temperature for RegionalContrastLoss must be positive, got {}",
            self.temperature
        );
        assert!(
            self.num_queries > 0 && self.num_negatives > 0,
            "RegionalContrastLoss needs at least one query and one negative, got {} and {}",
            self.num_queries,
            self.num_negatives
        );
    }
}

/// Regional contrastive loss with prototype positives and sampled negatives.
///
/// Holds its own random generator so that repeated calls draw fresh anchors
/// and negatives; seed it through the config for reproducible runs.
#[derive(Debug)]
pub struct RegionalContrastLoss {
    /// Probability below which a valid pixel is a hard query.
    pub strong_threshold: f64,
    /// Temperature dividing similarities.
    pub temperature: f64,
    /// Anchors drawn per class.
    pub num_queries: usize,
    /// Negative keys per anchor.
    pub num_negatives: usize,
    rng: Mutex<StdRng>,
}

impl Default for RegionalContrastLoss {
    fn default() -> Self {
        RegionalContrastLossConfig::new().init()
    }
}

/// Valid pixels of one class in the current batch.
struct ClassPool<B: Backend> {
    class: usize,
    /// `[1, feature_dim]`
    prototype: Tensor<B, 2>,
    /// `[len, feature_dim]`, every valid pixel of the class.
    features: Tensor<B, 2>,
    /// Flat pixel indices of the hard queries.
    hard_queries: Vec<usize>,
    len: usize,
}

impl RegionalContrastLoss {
    /// Compute the loss using the internal random generator.
    ///
    /// # Shapes
    ///
    /// - representations: `[batch_size, feature_dim, height, width]`
    /// - labels: `[batch_size, num_classes, height, width]` one-hot
    /// - mask: `[batch_size, 1 | num_classes, height, width]` pixel validity
    /// - probabilities: `[batch_size, num_classes, height, width]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        representations: Tensor<B, 4>,
        labels: Tensor<B, 4>,
        mask: Tensor<B, 4>,
        probabilities: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.forward_with_rng(representations, labels, mask, probabilities, &mut *rng)
    }

    /// Compute the loss drawing anchors and negatives from `rng`.
    ///
    /// Only the anchors carry gradient; prototypes and negative keys are
    /// detached.
    pub fn forward_with_rng<B: Backend, R: Rng>(
        &self,
        representations: Tensor<B, 4>,
        labels: Tensor<B, 4>,
        mask: Tensor<B, 4>,
        probabilities: Tensor<B, 4>,
        rng: &mut R,
    ) -> Tensor<B, 1> {
        let device = representations.device();
        let [batch_size, feature_dim, height, width] = representations.dims();
        let [_, num_classes, _, _] = labels.dims();
        assert_eq!(
            labels.dims(),
            [batch_size, num_classes, height, width],
            "Labels must match the representations' batch and spatial dimensions"
        );
        assert_eq!(
            probabilities.dims(),
            [batch_size, num_classes, height, width],
            "Probabilities must match the one-hot labels"
        );
        let mask = match mask.dims() {
            [_, 1, _, _] => mask.expand([batch_size, num_classes, height, width]),
            _ => mask,
        };

        let num_pixels = batch_size * height * width;
        let valid: Vec<f32> = pixel_major(labels * mask)
            .into_data()
            .iter::<f32>()
            .collect();
        let probabilities: Vec<f32> = pixel_major(probabilities)
            .into_data()
            .iter::<f32>()
            .collect();
        let features = representations
            .permute([0, 2, 3, 1])
            .reshape([num_pixels, feature_dim]);

        let pools: Vec<ClassPool<B>> = (0..num_classes)
            .filter_map(|class| {
                let all: Vec<usize> = (0..num_pixels)
                    .filter(|&pixel| valid[pixel * num_classes + class] > 0.0)
                    .collect();
                if all.is_empty() {
                    return None;
                }
                let hard_queries: Vec<usize> = all
                    .iter()
                    .copied()
                    .filter(|&pixel| {
                        f64::from(probabilities[pixel * num_classes + class]) < self.strong_threshold
                    })
                    .collect();
                let class_features = features.clone().select(0, index_tensor(&all, &device));
                Some(ClassPool {
                    class,
                    prototype: class_features.clone().mean_dim(0),
                    features: class_features,
                    hard_queries,
                    len: all.len(),
                })
            })
            .collect();

        if pools.len() < 2 {
            debug!(
                present = pools.len(),
                "fewer than two classes present, contrastive loss is zero"
            );
            return Tensor::zeros([1], &device);
        }

        let mut total = Tensor::<B, 1>::zeros([1], &device);
        let mut contributing = 0usize;
        for i in 0..pools.len() {
            let anchor_pool = &pools[i];
            trace!(
                class = anchor_pool.class,
                valid = anchor_pool.len,
                hard = anchor_pool.hard_queries.len(),
                "contrastive class pool"
            );
            if anchor_pool.hard_queries.is_empty() {
                continue;
            }
            let Some(loss) = self.class_loss(&features, &pools, i, rng) else {
                continue;
            };
            total = total + loss;
            contributing += 1;
        }

        if contributing == 0 {
            debug!(present = pools.len(), "no hard queries, contrastive loss is zero");
            return total;
        }
        debug!(
            present = pools.len(),
            contributing, "contrastive loss averaged over classes"
        );
        total / contributing as f64
    }

    /// InfoNCE loss of the anchors drawn from `pools[anchor]`.
    fn class_loss<B: Backend, R: Rng>(
        &self,
        features: &Tensor<B, 2>,
        pools: &[ClassPool<B>],
        anchor: usize,
        rng: &mut R,
    ) -> Option<Tensor<B, 1>> {
        let device = features.device();
        let [_, feature_dim] = features.dims();
        let (num_queries, num_negatives) = (self.num_queries, self.num_negatives);
        let hard = &pools[anchor].hard_queries;

        let anchor_indices: Vec<usize> = (0..num_queries)
            .map(|_| hard[rng.random_range(0..hard.len())])
            .collect();
        let anchors = features
            .clone()
            .select(0, index_tensor(&anchor_indices, &device));

        // negative classes, starting after the anchor class and wrapping around
        let negatives: Vec<&ClassPool<B>> = pools[anchor + 1..]
            .iter()
            .chain(&pools[..anchor])
            .collect();
        let positive = pools[anchor].prototype.clone().detach();

        let negative_prototypes = Tensor::cat(
            negatives
                .iter()
                .map(|pool| pool.prototype.clone().detach())
                .collect(),
            0,
        );
        let similarity = cosine_similarity(
            positive.clone().expand([negatives.len(), feature_dim]),
            negative_prototypes,
            1,
            COSINE_EPS,
        )
        .reshape([negatives.len()])
            / self.temperature;
        let weights: Vec<f64> = softmax(similarity, 0)
            .into_data()
            .iter::<f32>()
            .map(f64::from)
            .collect();
        let distribution = match Categorical::new(&weights) {
            Ok(distribution) => distribution,
            Err(err) => {
                warn!(class = pools[anchor].class, %err, "skipping class without a negative distribution");
                return None;
            }
        };

        let counts = distribution.sample_counts(rng, num_queries, num_negatives);
        let pool_sizes: Vec<usize> = negatives.iter().map(|pool| pool.len).collect();
        let negative_indices = negative_index_sampler(&counts, &pool_sizes, rng);
        let negative_keys = Tensor::cat(
            negatives
                .iter()
                .map(|pool| pool.features.clone().detach())
                .collect(),
            0,
        )
        .select(0, index_tensor(&negative_indices, &device))
        .reshape([num_queries, num_negatives, feature_dim]);

        let keys = Tensor::cat(
            vec![
                positive
                    .unsqueeze_dim::<3>(0)
                    .expand([num_queries, 1, feature_dim]),
                negative_keys,
            ],
            1,
        );
        let logits = cosine_similarity(
            anchors
                .unsqueeze_dim::<3>(1)
                .expand([num_queries, 1 + num_negatives, feature_dim]),
            keys,
            2,
            COSINE_EPS,
        )
        .reshape([num_queries, 1 + num_negatives])
            / self.temperature;

        Some(
            log_softmax(logits, 1)
                .narrow(1, 0, 1)
                .mean()
                .neg(),
        )
    }
}

/// `[B, C, H, W]` -> `[B * H * W, C]`, detached.
fn pixel_major<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch_size, channels, height, width] = tensor.dims();
    tensor
        .detach()
        .permute([0, 2, 3, 1])
        .reshape([batch_size * height * width, channels])
}
