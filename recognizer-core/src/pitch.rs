//! # Pitch Detection Module
//!
//! Training-free note detection: take the amplitude spectrum of a fixed-size
//! window, pick the two strongest well-separated peaks, and match the lower
//! one against the configured pitch table.
//!
//! ## Algorithm
//! 1. Resample to the configured rate and keep exactly `N` samples
//!    (`N` is a power of two; shorter recordings are rejected)
//! 2. One-sided amplitude spectrum via [`crate::fft::amplitude_spectrum`]
//! 3. Strongest bin = first candidate; strongest bin at least
//!    `min_separation_hz` away = overtone candidate
//! 4. The lower of the two is taken as the fundamental
//! 5. Nearest table entry within `match_tolerance_hz` is the detected note

use crate::audio::{AudioBuffer, fix_length};
use crate::config::PitchConfig;
use crate::error::{InsufficientAudioError, PitchError};
use crate::fft::amplitude_spectrum;

/// Full outcome of one pitch analysis, including rejected matches.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchAnalysis {
    /// Candidate fundamental in Hz
    pub fundamental_hz: f32,
    /// Second peak used as the overtone candidate, if any was far enough away
    pub overtone_hz: Option<f32>,
    /// Closest table entry regardless of tolerance
    pub nearest: Option<String>,
    /// Distance to `nearest` in Hz
    pub distance_hz: Option<f32>,
    /// Deviation from `nearest` in cents
    pub cents: Option<f32>,
    /// `nearest` if it was within tolerance, otherwise `None`
    pub note: Option<String>,
}

/// Detects which table pitch a recording was played at.
#[derive(Debug, Clone)]
pub struct PitchEstimator {
    config: PitchConfig,
}

impl PitchEstimator {
    /// # Errors
    /// * `PitchError::NotPowerOfTwo` - `sample_rate * duration_secs` cannot be
    ///   transformed by the recursive FFT
    pub fn new(config: PitchConfig) -> Result<Self, PitchError> {
        let n = config.sample_count();
        if n < 4 || !n.is_power_of_two() {
            return Err(PitchError::NotPowerOfTwo(n));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &PitchConfig {
        &self.config
    }

    /// Frequency spacing between adjacent spectrum bins.
    pub fn bin_hz(&self) -> f32 {
        self.config.sample_rate as f32 / self.config.sample_count() as f32
    }

    /// Runs the full analysis and reports every intermediate candidate.
    ///
    /// # Errors
    /// * `PitchError::InsufficientAudio` - Recording shorter than the window
    /// * `PitchError::Extraction` - Malformed samples or resampling failure
    pub fn analyze(&self, audio: &AudioBuffer) -> Result<PitchAnalysis, PitchError> {
        let required = self.config.duration_secs;
        let actual = audio.duration_secs();
        // Allow for rounding in the source's sample count.
        if audio.is_empty() || actual + 1e-3 < required {
            return Err(InsufficientAudioError {
                required_secs: required,
                actual_secs: actual,
            }
            .into());
        }

        let samples = audio.resampled(self.config.sample_rate)?;
        let window = fix_length(samples, self.config.sample_count());
        let amplitudes = amplitude_spectrum(&window)?;

        let (fundamental_hz, overtone_hz) = self.peak_candidates(&amplitudes);
        let nearest = self.config.table.nearest(fundamental_hz);
        let note = nearest
            .as_ref()
            .filter(|m| m.distance_hz <= self.config.match_tolerance_hz)
            .map(|m| m.entry.name.clone());

        tracing::debug!(
            fundamental_hz,
            overtone_hz,
            nearest = nearest.as_ref().map(|m| m.entry.name.as_str()),
            distance_hz = nearest.as_ref().map(|m| m.distance_hz),
            detected = note.is_some(),
            "pitch analysis"
        );

        Ok(PitchAnalysis {
            fundamental_hz,
            overtone_hz,
            distance_hz: nearest.as_ref().map(|m| m.distance_hz),
            cents: nearest.as_ref().map(|m| m.cents),
            nearest: nearest.map(|m| m.entry.name.clone()),
            note,
        })
    }

    /// Returns the detected note name, or `None` when nothing in the table is
    /// close enough.
    pub fn detect_note(&self, audio: &AudioBuffer) -> Result<Option<String>, PitchError> {
        Ok(self.analyze(audio)?.note)
    }

    /// Picks the strongest bin and the strongest bin far enough from it, and
    /// returns `(lower, overtone)` in Hz.
    fn peak_candidates(&self, amplitudes: &[f64]) -> (f32, Option<f32>) {
        let bin_hz = self.bin_hz();
        let freq = |i: usize| i as f32 * bin_hz;

        let first = argmax(amplitudes.iter().copied().enumerate()).unwrap_or(0);
        let f1 = freq(first);
        let second = argmax(
            amplitudes
                .iter()
                .copied()
                .enumerate()
                .filter(|&(i, _)| (freq(i) - f1).abs() >= self.config.min_separation_hz),
        );

        match second.map(freq) {
            Some(f2) => (f1.min(f2), Some(f1.max(f2))),
            None => (f1, None),
        }
    }
}

impl Default for PitchEstimator {
    fn default() -> Self {
        Self {
            config: PitchConfig::default(),
        }
    }
}

/// Index of the largest value; the earliest index wins ties.
fn argmax(values: impl Iterator<Item = (usize, f64)>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values {
        if best.is_none_or(|(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}
