//! Splitting and merging of mixed-domain batches.
//!
//! A mixed batch carries one domain tag per sample. [`DomainSplit`] records the
//! row indices of each domain once, so the same partition can be applied to any
//! tensor sharing the batch dimension and undone afterwards with the original
//! row order restored.

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::error::{OpsError, OpsResult};

/// Domain tag of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Labeled source-domain sample (label `0`).
    Source,
    /// Target-domain sample (label `1`).
    Target,
}

impl Domain {
    /// Converts a raw `0`/`1` label.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::InvalidDomainLabel`] for any other value.
    pub const fn from_label(label: i64) -> OpsResult<Self> {
        match label {
            0 => Ok(Self::Source),
            1 => Ok(Self::Target),
            _ => Err(OpsError::InvalidDomainLabel { label }),
        }
    }

    /// The raw label of this domain.
    pub const fn label(self) -> i64 {
        match self {
            Self::Source => 0,
            Self::Target => 1,
        }
    }
}

/// Row partition of a mixed-domain batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSplit {
    source: Vec<usize>,
    target: Vec<usize>,
}

impl DomainSplit {
    /// Builds the partition from per-sample domain tags.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::EmptyBatch`] when `domains` is empty.
    pub fn new(domains: &[Domain]) -> OpsResult<Self> {
        if domains.is_empty() {
            return Err(OpsError::EmptyBatch);
        }

        let (mut source, mut target) = (Vec::new(), Vec::new());
        for (row, domain) in domains.iter().enumerate() {
            match domain {
                Domain::Source => source.push(row),
                Domain::Target => target.push(row),
            }
        }

        Ok(Self { source, target })
    }

    /// Builds the partition from raw `0`/`1` labels.
    ///
    /// # Errors
    ///
    /// Returns an error for labels outside `{0, 1}` or an empty label vector.
    pub fn from_labels(labels: &[i64]) -> OpsResult<Self> {
        let domains = labels
            .iter()
            .map(|&label| Domain::from_label(label))
            .collect::<OpsResult<Vec<_>>>()?;
        Self::new(&domains)
    }

    /// Number of samples covered by the split.
    pub fn batch_size(&self) -> usize {
        self.source.len() + self.target.len()
    }

    /// Rows tagged as source, in ascending order.
    pub fn source_indices(&self) -> &[usize] {
        &self.source
    }

    /// Rows tagged as target, in ascending order.
    pub fn target_indices(&self) -> &[usize] {
        &self.target
    }

    /// The domain of every row, in batch order.
    pub fn domains(&self) -> Vec<Domain> {
        let mut domains = vec![Domain::Source; self.batch_size()];
        for &row in &self.target {
            domains[row] = Domain::Target;
        }
        domains
    }

    /// Splits `tensor` along dimension 0 into `(source, target)` subsets.
    ///
    /// A side without samples is returned as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::DomainLengthMismatch`] if the batch dimension differs
    /// from the number of domain labels.
    pub fn split<B: Backend, const D: usize>(
        &self,
        tensor: Tensor<B, D>,
    ) -> OpsResult<(Option<Tensor<B, D>>, Option<Tensor<B, D>>)> {
        let actual = tensor.dims()[0];
        if actual != self.batch_size() {
            return Err(OpsError::DomainLengthMismatch {
                expected: self.batch_size(),
                actual,
            });
        }

        let device = tensor.device();
        let pick = |rows: &[usize]| {
            (!rows.is_empty()).then(|| tensor.clone().select(0, index_tensor::<B>(rows, &device)))
        };

        Ok((pick(&self.source), pick(&self.target)))
    }

    /// Inverse of [`split`](Self::split): reassembles both subsets in the
    /// original row order.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::MergeMismatch`] if a subset is missing, unexpected, or
    /// has the wrong number of rows.
    pub fn merge<B: Backend, const D: usize>(
        &self,
        source: Option<Tensor<B, D>>,
        target: Option<Tensor<B, D>>,
    ) -> OpsResult<Tensor<B, D>> {
        let source = Self::check_part("source", self.source.len(), source)?;
        let target = Self::check_part("target", self.target.len(), target)?;

        match (source, target) {
            (Some(source), Some(target)) => {
                let device = source.device();
                let stacked = Tensor::cat(vec![source, target], 0);

                // stacked row k holds original row order[k]; invert that permutation
                let mut inverse = vec![0; self.batch_size()];
                for (k, &row) in self.source.iter().chain(&self.target).enumerate() {
                    inverse[row] = k;
                }

                Ok(stacked.select(0, index_tensor::<B>(&inverse, &device)))
            }
            (Some(only), None) | (None, Some(only)) => Ok(only),
            (None, None) => Err(OpsError::EmptyBatch),
        }
    }

    fn check_part<B: Backend, const D: usize>(
        domain: &'static str,
        expected: usize,
        part: Option<Tensor<B, D>>,
    ) -> OpsResult<Option<Tensor<B, D>>> {
        let actual = part.as_ref().map_or(0, |tensor| tensor.dims()[0]);
        if actual != expected {
            return Err(OpsError::MergeMismatch {
                domain,
                expected,
                actual,
            });
        }
        Ok(part)
    }
}

/// Builds a 1D integer index tensor from host indices.
pub fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = indices.iter().map(|&index| index as i64).collect();
    Tensor::from_data(TensorData::new(data, [indices.len()]), device)
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn domain_split_from_labels_partitions_rows() {
        let split = DomainSplit::from_labels(&[0, 1, 1, 0, 1]).unwrap();

        assert_eq!(split.source_indices(), &[0, 3]);
        assert_eq!(split.target_indices(), &[1, 2, 4]);
        assert_eq!(split.batch_size(), 5);
        assert_eq!(
            split.domains(),
            vec![
                Domain::Source,
                Domain::Target,
                Domain::Target,
                Domain::Source,
                Domain::Target
            ]
        );
    }

    #[test]
    fn domain_split_rejects_invalid_labels() {
        assert_eq!(
            DomainSplit::from_labels(&[0, 2]),
            Err(OpsError::InvalidDomainLabel { label: 2 })
        );
        assert_eq!(DomainSplit::from_labels(&[]), Err(OpsError::EmptyBatch));
    }

    #[test]
    fn domain_split_then_merge_restores_original_tensor() {
        let device = Default::default();
        let label_sets: [&[i64]; 4] = [&[0, 1, 0, 1], &[1, 1, 0, 0], &[0, 0, 0, 0], &[1, 0, 1, 1]];

        for labels in label_sets {
            let split = DomainSplit::from_labels(labels).unwrap();
            let input = Tensor::<TestBackend, 4>::random(
                [labels.len(), 3, 2, 2],
                Distribution::Normal(0.0, 1.0),
                &device,
            );

            let (source, target) = split.split(input.clone()).unwrap();
            let merged = split.merge(source, target).unwrap();

            merged.into_data().assert_eq(&input.into_data(), true);
        }
    }

    #[test]
    fn domain_split_selects_rows_of_each_domain() {
        let device = Default::default();
        let split = DomainSplit::from_labels(&[1, 0, 1]).unwrap();
        let input = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]], &device);

        let (source, target) = split.split(input).unwrap();

        source
            .unwrap()
            .into_data()
            .assert_eq(&TensorData::from([[1.0f32, 1.0]]), false);
        target
            .unwrap()
            .into_data()
            .assert_eq(&TensorData::from([[0.0f32, 0.0], [2.0, 2.0]]), false);
    }

    #[test]
    fn domain_split_empty_side_is_none() {
        let device = Default::default();
        let split = DomainSplit::from_labels(&[0, 0]).unwrap();
        let input = Tensor::<TestBackend, 2>::ones([2, 4], &device);

        let (source, target) = split.split(input).unwrap();
        assert!(source.is_some());
        assert!(target.is_none());
    }

    #[test]
    fn domain_split_rejects_batch_length_mismatch() {
        let device = Default::default();
        let split = DomainSplit::from_labels(&[0, 1]).unwrap();
        let input = Tensor::<TestBackend, 2>::ones([3, 4], &device);

        assert_eq!(
            split.split(input).err(),
            Some(OpsError::DomainLengthMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn domain_merge_rejects_wrong_subset_size() {
        let device = Default::default();
        let split = DomainSplit::from_labels(&[0, 1, 1]).unwrap();
        let source = Tensor::<TestBackend, 2>::ones([1, 4], &device);
        let target = Tensor::<TestBackend, 2>::ones([1, 4], &device);

        assert_eq!(
            split.merge(Some(source), Some(target)).err(),
            Some(OpsError::MergeMismatch {
                domain: "target",
                expected: 2,
                actual: 1
            })
        );
    }
}
