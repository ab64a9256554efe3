//! # Feature Extraction Module
//!
//! Turns a recording into a fixed-length spectral magnitude profile suitable
//! for nearest-neighbor classification.
//!
//! ## Pipeline
//! 1. Validate and resample to the target rate
//! 2. Truncate or zero-pad to the fixed clip duration
//! 3. Hamming-windowed STFT with centred frames
//! 4. Average each bin's magnitude across frames
//!
//! Extraction is pure: the same buffer always yields the same vector, and
//! nothing is cached or persisted. Changing the extractor therefore never
//! requires migrating stored samples.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::audio::{AudioBuffer, fix_length};
use crate::config::FeatureConfig;
use crate::error::ExtractionError;
use crate::fft::Stft;

/// Fixed-length spectral summary of one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Stateless spectral feature extractor.
///
/// Holds only the planned transform, so it can be shared between threads.
pub struct FeatureExtractor {
    config: FeatureConfig,
    stft: Stft,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        let stft = Stft::new(config.n_fft, config.hop_length);
        Self { config, stft }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Length of every vector this extractor produces.
    pub fn feature_len(&self) -> usize {
        self.stft.bins()
    }

    /// Extracts the magnitude profile of `audio`.
    ///
    /// # Errors
    /// * `ExtractionError` - Empty buffer, zero sample rate, non-finite samples
    ///   or a resampling failure
    pub fn extract(&self, audio: &AudioBuffer) -> Result<FeatureVector, ExtractionError> {
        let resampled = audio.resampled(self.config.target_sample_rate)?;
        if resampled.is_empty() {
            return Err(ExtractionError::Empty);
        }
        let clip = fix_length(resampled, self.config.target_len());
        Ok(FeatureVector(self.stft.mean_magnitudes(&clip)))
    }

    /// Extracts every buffer on the rayon thread pool.
    ///
    /// Results are returned in input order; one failing buffer does not
    /// affect the others.
    pub fn extract_batch(
        &self,
        audios: &[AudioBuffer],
    ) -> Vec<Result<FeatureVector, ExtractionError>> {
        audios.par_iter().map(|audio| self.extract(audio)).collect()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}
