//! Configuration of a ReCo training step.

use std::path::Path;

use burn::config::Config;
use semiseg_loss::{
    PseudoLabelLossConfig, RegionalContrastLossConfig, SegmentationCrossEntropyLossConfig,
};

use crate::error::{SemiSegError, SemiSegResult};

/// Configuration of the [ReCo](crate::ReCo) segmentor.
#[derive(Config, Debug)]
pub struct ReCoConfig {
    /// Number of semantic classes.
    pub num_classes: usize,
    /// Upper bound of the EMA teacher decay. Default: 0.99
    #[config(default = 0.99)]
    pub momentum: f64,
    /// Confidence separating hard from easy queries, and reliable pseudo-labels. Default: 0.97
    #[config(default = 0.97)]
    pub strong_threshold: f64,
    /// Confidence at which a pseudo-labelled pixel joins the contrastive loss. Default: 0.7
    #[config(default = 0.7)]
    pub weak_threshold: f64,
    /// Contrastive temperature. Default: 0.5
    #[config(default = 0.5)]
    pub temperature: f64,
    /// Anchors drawn per class. Default: 256
    #[config(default = 256)]
    pub num_queries: usize,
    /// Negative keys per anchor. Default: 256
    #[config(default = 256)]
    pub num_negatives: usize,
    /// Corner alignment of every resize. Default: false
    #[config(default = false)]
    pub align_corners: bool,
    /// Label value excluded from the supervised loss. Default: -1
    #[config(default = -1)]
    pub ignore_index: i64,
    /// Weight of the pseudo-label loss. Default: 1.0
    #[config(default = 1.0)]
    pub unsupervised_weight: f64,
    /// Weight of the regional contrastive loss. Default: 1.0
    #[config(default = 1.0)]
    pub contrast_weight: f64,
    /// Seed of the negative sampler.
    pub seed: Option<u64>,
}

impl ReCoConfig {
    /// Checks value ranges and the ordering of the two thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`SemiSegError::InvalidConfiguration`] naming the first
    /// offending field.
    pub fn validate(&self) -> SemiSegResult<()> {
        let invalid = |reason: String| Err(SemiSegError::InvalidConfiguration { reason });

        if self.num_classes == 0 {
            return invalid("num_classes must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return invalid(format!("momentum must be in [0, 1), got {}", self.momentum));
        }
        for (name, value) in [
            ("strong_threshold", self.strong_threshold),
            ("weak_threshold", self.weak_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be in [0, 1], got {value}"));
            }
        }
        if self.weak_threshold > self.strong_threshold {
            return invalid(format!(
                "weak_threshold ({}) must not exceed strong_threshold ({})",
                self.weak_threshold, self.strong_threshold
            ));
        }
        if self.temperature.is_nan() || self.temperature <= 0.0 {
            return invalid(format!("temperature must be positive, got {}", self.temperature));
        }
        if self.num_queries == 0 || self.num_negatives == 0 {
            return invalid(format!(
                "num_queries and num_negatives must be positive, got {} and {}",
                self.num_queries, self.num_negatives
            ));
        }
        Ok(())
    }

    /// Loads a JSON configuration and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`SemiSegError::ConfigLoad`] if the file cannot be read or
    /// parsed, and [`SemiSegError::InvalidConfiguration`] if it is out of range.
    pub fn from_file(path: impl AsRef<Path>) -> SemiSegResult<Self> {
        let config: Self = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Supervised cross-entropy settings.
    pub fn cross_entropy_config(&self) -> SegmentationCrossEntropyLossConfig {
        SegmentationCrossEntropyLossConfig::new()
            .with_ignore_index(self.ignore_index)
            .with_align_corners(self.align_corners)
    }

    /// Pseudo-label loss settings.
    pub fn pseudo_label_config(&self) -> PseudoLabelLossConfig {
        PseudoLabelLossConfig::new()
            .with_strong_threshold(self.strong_threshold)
            .with_ignore_index(self.ignore_index)
            .with_align_corners(self.align_corners)
    }

    /// Regional contrastive loss settings.
    pub fn contrast_config(&self) -> RegionalContrastLossConfig {
        RegionalContrastLossConfig::new()
            .with_strong_threshold(self.strong_threshold)
            .with_temperature(self.temperature)
            .with_num_queries(self.num_queries)
            .with_num_negatives(self.num_negatives)
            .with_seed(self.seed)
    }
}

/// Reads any Burn config from a JSON file.
///
/// # Errors
///
/// Returns [`SemiSegError::ConfigLoad`] with the path and the reader or
/// parser message.
pub fn load_config<C: Config>(path: impl AsRef<Path>) -> SemiSegResult<C> {
    let path = path.as_ref();
    C::load(path).map_err(|err| SemiSegError::ConfigLoad {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use semiseg_norm::{MixBatchNormConfig, MixMode};

    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("semiseg-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn reco_config_defaults_are_valid() {
        let config = ReCoConfig::new(19);

        assert_eq!(config.momentum, 0.99);
        assert_eq!(config.strong_threshold, 0.97);
        assert_eq!(config.weak_threshold, 0.7);
        assert_eq!(config.temperature, 0.5);
        assert_eq!(config.num_queries, 256);
        assert_eq!(config.num_negatives, 256);
        assert_eq!(config.ignore_index, -1);
        assert_eq!(config.seed, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reco_config_rejects_weak_threshold_above_strong() {
        let config = ReCoConfig::new(3)
            .with_strong_threshold(0.6)
            .with_weak_threshold(0.8);

        match config.validate() {
            Err(SemiSegError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("weak_threshold"), "{reason}");
            }
            other => panic!("expected an invalid configuration, got {other:?}"),
        }
    }

    #[test]
    fn reco_config_rejects_out_of_range_values() {
        let cases = [
            ReCoConfig::new(0),
            ReCoConfig::new(3).with_momentum(1.0),
            ReCoConfig::new(3).with_strong_threshold(1.2),
            ReCoConfig::new(3).with_temperature(0.0),
            ReCoConfig::new(3).with_num_queries(0),
            ReCoConfig::new(3).with_num_negatives(0),
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(SemiSegError::InvalidConfiguration { .. })),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn reco_config_round_trips_through_json() {
        let path = temp_path("reco");
        let config = ReCoConfig::new(5)
            .with_num_queries(64)
            .with_seed(Some(9));

        config.save(&path).unwrap();
        let loaded = ReCoConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.num_classes, 5);
        assert_eq!(loaded.num_queries, 64);
        assert_eq!(loaded.seed, Some(9));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let path = temp_path("missing");

        let result = load_config::<ReCoConfig>(&path);

        match result {
            Err(SemiSegError::ConfigLoad { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected a load error, got {other:?}"),
        }
    }

    #[test]
    fn load_config_reads_mix_batch_norm_config() {
        let path = temp_path("norm");
        MixBatchNormConfig::new(8)
            .with_ratio(0.25)
            .with_mode(MixMode::from(2))
            .save(&path)
            .unwrap();

        let loaded: MixBatchNormConfig = load_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.ratio, 0.25);
        assert!(SemiSegError::from(loaded.validate().unwrap_err())
            .to_string()
            .contains("Unsupported mixing mode 2"));
    }

    #[test]
    fn reco_config_derives_loss_settings() {
        let config = ReCoConfig::new(4)
            .with_strong_threshold(0.9)
            .with_ignore_index(255)
            .with_seed(Some(1));

        assert_eq!(config.pseudo_label_config().strong_threshold, 0.9);
        assert_eq!(config.cross_entropy_config().ignore_index, 255);
        assert_eq!(config.contrast_config().seed, Some(1));
    }
}
