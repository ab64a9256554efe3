//! # Configuration Module
//!
//! Static configuration for every stage of the recognizer. All tunables that
//! would otherwise be magic numbers (sample rates, STFT geometry, the pitch
//! table and its tolerance, neighbor count) live here and are loaded from a
//! TOML file. Missing sections fall back to [`Default`].
//!
//! ```toml
//! [pitch]
//! match_tolerance_hz = 5.0
//! table = [
//!     { name = "A", frequency = 110.0 },
//!     { name = "EL", frequency = 82.0 },
//! ]
//!
//! [classifier]
//! neighbors = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::trainer::RetrainMode;
use crate::tuning::PitchTable;

/// Top-level configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub features: FeatureConfig,
    pub pitch: PitchConfig,
    pub classifier: ClassifierConfig,
    pub storage: StorageConfig,
    pub training: TrainingConfig,
}

/// Geometry of the spectral feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Every clip is resampled to this rate before analysis.
    pub target_sample_rate: u32,
    /// Clips are truncated or zero-padded to this length.
    pub duration_secs: f32,
    pub n_fft: usize,
    pub hop_length: usize,
}

impl FeatureConfig {
    /// Number of samples after truncation/padding.
    pub fn target_len(&self) -> usize {
        (self.target_sample_rate as f32 * self.duration_secs).round() as usize
    }

    /// Length of the produced feature vector.
    pub fn feature_len(&self) -> usize {
        self.n_fft / 2 + 1
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 4096,
            duration_secs: 2.0,
            n_fft: 512,
            hop_length: 128,
        }
    }
}

/// Parameters of the training-free pitch path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    pub sample_rate: u32,
    /// Minimum and analysed duration. `sample_rate * duration_secs` must be a
    /// power of two.
    pub duration_secs: f32,
    /// Minimum distance between the fundamental and overtone candidates.
    pub min_separation_hz: f32,
    /// A match further than this from every table entry is "no detection".
    pub match_tolerance_hz: f32,
    pub table: PitchTable,
}

impl PitchConfig {
    pub fn sample_count(&self) -> usize {
        (self.sample_rate as f32 * self.duration_secs).round() as usize
    }
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            sample_rate: 4096,
            duration_secs: 2.0,
            min_separation_hz: 200.0,
            match_tolerance_hz: 5.0,
            table: PitchTable::guitar_standard(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// k in k-nearest-neighbors.
    pub neighbors: usize,
    /// Maximum number of points held by a ball tree leaf.
    pub leaf_size: usize,
    /// Defaults to `neighbors` when unset.
    pub min_examples_per_class: Option<usize>,
}

impl ClassifierConfig {
    pub fn required_per_class(&self) -> usize {
        self.min_examples_per_class.unwrap_or(self.neighbors)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            neighbors: 3,
            leaf_size: 30,
            min_examples_per_class: None,
        }
    }
}

/// Where blobs, the local artifact cache and the ledgers live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub blob_root: PathBuf,
    pub cache_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub manifest_path: PathBuf,
}

impl StorageConfig {
    /// Lay every path out under a single data directory.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            blob_root: root.join("media"),
            cache_dir: root.join("model_cache"),
            ledger_path: root.join("model_versions.json"),
            manifest_path: root.join("samples.json"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::rooted_at("./data")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub mode: RetrainMode,
    /// Tag recorded on versions produced by the trainer.
    pub tag: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            mode: RetrainMode::FullCorpus,
            tag: "auto".to_string(),
        }
    }
}

impl RecognizerConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.features;
        if f.target_sample_rate == 0 || f.duration_secs <= 0.0 {
            return Err(invalid("features need a positive sample rate and duration"));
        }
        if f.n_fft < 2 || f.hop_length == 0 {
            return Err(invalid("n_fft must be >= 2 and hop_length > 0"));
        }
        if f.target_len() <= f.n_fft / 2 {
            return Err(invalid("feature clip is shorter than half an FFT frame"));
        }

        let p = &self.pitch;
        let n = p.sample_count();
        if n < 4 || !n.is_power_of_two() {
            return Err(invalid(format!(
                "pitch sample count {n} must be a power of two >= 4"
            )));
        }
        if p.min_separation_hz < 0.0 || p.match_tolerance_hz < 0.0 {
            return Err(invalid("pitch separation and tolerance must be non-negative"));
        }
        p.table.validate().map_err(invalid)?;

        let c = &self.classifier;
        if c.neighbors == 0 || c.leaf_size == 0 {
            return Err(invalid("neighbors and leaf_size must be at least 1"));
        }
        if self.training.tag.trim().is_empty() {
            return Err(invalid("training tag must not be empty"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
