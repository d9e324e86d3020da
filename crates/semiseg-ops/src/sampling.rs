//! Host-side sampling used to pick negative keys for contrastive losses.

use rand::Rng;

use crate::error::{OpsError, OpsResult};

/// Discrete distribution sampled by inverse CDF.
///
/// Weights do not need to be normalized; zero weights are never drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct Categorical {
    cdf: Vec<f64>,
}

impl Categorical {
    /// Builds the cumulative table from non-negative weights.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::EmptyDistribution`] when there is no positive,
    /// finite mass to sample from.
    pub fn new(weights: &[f64]) -> OpsResult<Self> {
        let mut total = 0.0;
        let cdf: Vec<f64> = weights
            .iter()
            .map(|&weight| {
                if weight.is_finite() && weight > 0.0 {
                    total += weight;
                }
                total
            })
            .collect();

        if !(total.is_finite() && total > 0.0) {
            return Err(OpsError::EmptyDistribution { len: weights.len() });
        }

        Ok(Self { cdf })
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.cdf.len()
    }

    /// Whether the distribution has no categories. Never true for a
    /// successfully built distribution.
    pub fn is_empty(&self) -> bool {
        self.cdf.is_empty()
    }

    /// Normalized probability of each category.
    pub fn probabilities(&self) -> Vec<f64> {
        let total = self.total();
        let mut previous = 0.0;
        self.cdf
            .iter()
            .map(|&cumulative| {
                let p = (cumulative - previous) / total;
                previous = cumulative;
                p
            })
            .collect()
    }

    /// Draws one category index.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        let u = rng.random::<f64>() * self.total();
        self.cdf
            .partition_point(|&cumulative| cumulative <= u)
            .min(self.cdf.len() - 1)
    }

    /// Draws `columns` categories for each of `rows` rows and tallies them.
    ///
    /// Returns a `[rows][len]` table whose rows each sum to `columns`.
    pub fn sample_counts<R: Rng>(
        &self,
        rng: &mut R,
        rows: usize,
        columns: usize,
    ) -> Vec<Vec<usize>> {
        (0..rows)
            .map(|_| {
                let mut counts = vec![0; self.len()];
                for _ in 0..columns {
                    counts[self.sample(rng)] += 1;
                }
                counts
            })
            .collect()
    }

    fn total(&self) -> f64 {
        self.cdf.last().copied().unwrap_or(0.0)
    }
}

/// Turns per-row category counts into flat indices into a pooled buffer.
///
/// `pool_sizes[j]` is the number of entries category `j` owns in a buffer that
/// concatenates all categories in order, so category `j` occupies
/// `offset_j..offset_j + pool_sizes[j]`. For every row and every category, the
/// requested number of offsets is drawn uniformly (with replacement) from that
/// range. Indices of a row are contiguous in the output, so a row with `n`
/// total draws owns a block of `n` indices.
///
/// # Panics
///
/// Panics if a category with a non-zero count has an empty pool, or if the
/// count table and `pool_sizes` disagree on the number of categories.
pub fn negative_index_sampler<R: Rng>(
    counts: &[Vec<usize>],
    pool_sizes: &[usize],
    rng: &mut R,
) -> Vec<usize> {
    let offsets: Vec<usize> = pool_sizes
        .iter()
        .scan(0, |offset, &size| {
            let start = *offset;
            *offset += size;
            Some(start)
        })
        .collect();

    let mut indices = Vec::with_capacity(counts.iter().flatten().sum());
    for row in counts {
        assert_eq!(
            row.len(),
            pool_sizes.len(),
            "count row has {} categories but {} pools were given",
            row.len(),
            pool_sizes.len()
        );
        for ((&count, &start), &size) in row.iter().zip(&offsets).zip(pool_sizes) {
            if count == 0 {
                continue;
            }
            assert!(size > 0, "cannot draw {count} indices from an empty pool");
            indices.extend((0..count).map(|_| rng.random_range(start..start + size)));
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn categorical_rejects_empty_or_zero_mass() {
        assert_eq!(
            Categorical::new(&[]),
            Err(OpsError::EmptyDistribution { len: 0 })
        );
        assert_eq!(
            Categorical::new(&[0.0, 0.0]),
            Err(OpsError::EmptyDistribution { len: 2 })
        );
    }

    #[test]
    fn categorical_normalizes_probabilities() {
        let dist = Categorical::new(&[1.0, 3.0]).unwrap();

        let probs = dist.probabilities();
        assert!((probs[0] - 0.25).abs() < 1e-12);
        assert!((probs[1] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn categorical_never_draws_zero_weight_categories() {
        let mut rng = StdRng::seed_from_u64(7);
        let dist = Categorical::new(&[0.0, 1.0, 0.0, 2.0]).unwrap();

        for _ in 0..1000 {
            let index = dist.sample(&mut rng);
            assert!(index == 1 || index == 3, "drew zero-weight category {index}");
        }
    }

    #[test]
    fn categorical_sample_frequencies_follow_weights() {
        let mut rng = StdRng::seed_from_u64(42);
        let dist = Categorical::new(&[0.2, 0.8]).unwrap();

        let counts = dist.sample_counts(&mut rng, 1, 20_000);
        let frequency = counts[0][1] as f64 / 20_000.0;

        assert!((frequency - 0.8).abs() < 0.02, "frequency was {frequency}");
    }

    #[test]
    fn categorical_sample_counts_rows_sum_to_columns() {
        let mut rng = StdRng::seed_from_u64(3);
        let dist = Categorical::new(&[0.5, 0.3, 0.2]).unwrap();

        let counts = dist.sample_counts(&mut rng, 16, 9);

        assert_eq!(counts.len(), 16);
        for row in counts {
            assert_eq!(row.len(), 3);
            assert_eq!(row.iter().sum::<usize>(), 9);
        }
    }

    #[test]
    fn negative_index_sampler_draws_within_each_pool() {
        let mut rng = StdRng::seed_from_u64(11);
        let pool_sizes = [3, 5, 2];
        let dist = Categorical::new(&[0.3, 0.3, 0.4]).unwrap();
        let num_queries = 32;
        let num_negatives = 7;
        let counts = dist.sample_counts(&mut rng, num_queries, num_negatives);

        let indices = negative_index_sampler(&counts, &pool_sizes, &mut rng);

        assert_eq!(indices.len(), num_queries * num_negatives);
        let total: usize = pool_sizes.iter().sum();
        assert!(indices.iter().all(|&index| index < total));

        // each query block holds exactly num_negatives indices, grouped by pool
        for (row, block) in counts.iter().zip(indices.chunks(num_negatives)) {
            let in_pool = |lo: usize, hi: usize| block.iter().filter(|&&i| (lo..hi).contains(&i)).count();
            assert_eq!(in_pool(0, 3), row[0]);
            assert_eq!(in_pool(3, 8), row[1]);
            assert_eq!(in_pool(8, 10), row[2]);
        }
    }

    #[test]
    #[should_panic = "cannot draw 1 indices from an empty pool"]
    fn negative_index_sampler_panics_on_empty_pool() {
        let mut rng = StdRng::seed_from_u64(0);
        let _ = negative_index_sampler(&[vec![1, 0]], &[0, 4], &mut rng);
    }
}
