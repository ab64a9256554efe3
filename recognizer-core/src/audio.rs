//! # Audio Buffer Module
//!
//! Owned mono audio plus its sample rate, and the conversions every analysis
//! path shares: WAV decoding, downmixing, resampling and fixed-length
//! truncation/padding.
//!
//! ## Features
//! - WAV decoding (integer and float PCM) via `hound`
//! - Multi-channel input is averaged down to mono
//! - Polynomial resampling via `rubato`, skipped when rates already match

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::io::Cursor;

use crate::error::ExtractionError;

/// A mono recording at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Builds a mono buffer from interleaved multi-channel samples.
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[f32], channels: u16, sample_rate: u32) -> Self {
        let channels = channels.max(1) as usize;
        if channels == 1 {
            return Self::new(samples.to_vec(), sample_rate);
        }
        let mono = samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Self::new(mono, sample_rate)
    }

    /// Decodes a complete WAV file held in memory.
    ///
    /// # Errors
    /// * `ExtractionError::Decode` - Not a WAV file, or a truncated sample stream
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, ExtractionError> {
        let reader =
            hound::WavReader::new(Cursor::new(bytes)).map_err(|e| decode_error(&e))?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| decode_error(&e))?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| decode_error(&e))?
            }
        };

        Ok(Self::from_interleaved(
            &interleaved,
            spec.channels,
            spec.sample_rate,
        ))
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds (0 for a zero sample rate).
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Checks the buffer is analyzable at all.
    pub fn validate(&self) -> Result<(), ExtractionError> {
        if self.sample_rate == 0 {
            return Err(ExtractionError::InvalidSampleRate(0));
        }
        if self.samples.is_empty() {
            return Err(ExtractionError::Empty);
        }
        if let Some(idx) = self.samples.iter().position(|s| !s.is_finite()) {
            return Err(ExtractionError::NonFinite(idx));
        }
        Ok(())
    }

    /// Returns the samples converted to `target_rate`.
    ///
    /// The resampler's startup delay is trimmed so the output stays aligned
    /// with the input.
    pub fn resampled(&self, target_rate: u32) -> Result<Vec<f32>, ExtractionError> {
        self.validate()?;
        if target_rate == 0 {
            return Err(ExtractionError::InvalidSampleRate(0));
        }
        if self.sample_rate == target_rate {
            return Ok(self.samples.clone());
        }

        let ratio = target_rate as f64 / self.sample_rate as f64;
        let mut resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Septic,
            self.samples.len(),
            1,
        )
        .map_err(|e| ExtractionError::Resample(e.to_string()))?;

        let delay = resampler.output_delay();
        let mut channel = resampler
            .process(&[self.samples.as_slice()], None)
            .map_err(|e| ExtractionError::Resample(e.to_string()))?
            .pop()
            .unwrap_or_default();
        // Push zeros through to recover the frames still held back by the filter.
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| ExtractionError::Resample(e.to_string()))?
            .pop()
            .unwrap_or_default();
        channel.extend(tail);
        channel.drain(..delay.min(channel.len()));
        channel.truncate((self.samples.len() as f64 * ratio).round() as usize);

        tracing::trace!(
            from = self.sample_rate,
            to = target_rate,
            input = self.samples.len(),
            output = channel.len(),
            "resampled audio"
        );
        Ok(channel)
    }
}

/// Truncates or zero-pads `samples` to exactly `len` entries.
pub fn fix_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}

fn decode_error(err: &hound::Error) -> ExtractionError {
    ExtractionError::Decode(err.to_string())
}
