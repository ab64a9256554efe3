//! # Fourier Transform Module
//!
//! Two transforms live here, one per recognition path:
//!
//! - [`recursive_fft`] - a from-scratch recursive decimation-in-time DFT used
//!   by the pitch estimator. It needs no planning and no external code, and
//!   works on any power-of-two length.
//! - [`Stft`] - a short-time transform over planned RustFFT kernels used by
//!   the feature extractor, where many frames of the same size are processed.
//!
//! ## Features
//! - Closed-form base cases for lengths 1, 2 and 4
//! - One-sided amplitude spectrum for real input
//! - Periodic Hamming window and centred, reflect-padded framing

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

use crate::error::PitchError;

/// Computes the DFT of `input` by recursive even/odd decimation.
///
/// The transform of a length-`n` sequence is assembled from the transforms of
/// its even- and odd-indexed halves, combined with twiddle factors
/// `exp(-2πi·k/n)`. Recursion bottoms out at length 4 (or smaller) where the
/// result is written in closed form.
///
/// # Errors
/// * `PitchError::NotPowerOfTwo` - `input.len()` is zero or not a power of two
pub fn recursive_fft(input: &[Complex<f64>]) -> Result<Vec<Complex<f64>>, PitchError> {
    if !input.len().is_power_of_two() {
        return Err(PitchError::NotPowerOfTwo(input.len()));
    }
    Ok(transform(input))
}

/// Real-input convenience wrapper around [`recursive_fft`].
pub fn fft_real(signal: &[f32]) -> Result<Vec<Complex<f64>>, PitchError> {
    let input: Vec<Complex<f64>> = signal
        .iter()
        .map(|&s| Complex::new(s as f64, 0.0))
        .collect();
    recursive_fft(&input)
}

fn transform(f: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let n = f.len();
    match n {
        1 => return vec![f[0]],
        2 => return vec![f[0] + f[1], f[0] - f[1]],
        4 => {
            let j = Complex::new(0.0, 1.0);
            return vec![
                f[0] + f[1] + f[2] + f[3],
                f[0] - j * f[1] - f[2] + j * f[3],
                f[0] - f[1] + f[2] - f[3],
                f[0] + j * f[1] - f[2] - j * f[3],
            ];
        }
        _ => {}
    }

    let half = n / 2;
    let even: Vec<_> = f.iter().step_by(2).copied().collect();
    let odd: Vec<_> = f.iter().skip(1).step_by(2).copied().collect();
    let fe = transform(&even);
    let fo = transform(&odd);

    let mut out = vec![Complex::new(0.0, 0.0); n];
    for k in 0..half {
        let twiddle = Complex::from_polar(1.0, -2.0 * PI * k as f64 / n as f64);
        let t = twiddle * fo[k];
        out[k] = fe[k] + t;
        out[k + half] = fe[k] - t;
    }
    out
}

/// One-sided amplitude spectrum of a real signal.
///
/// The transform is normalized by `N`, only the first `N/2` bins are kept
/// (the rest mirror them for real input) and amplitudes are doubled to
/// account for the discarded half.
pub fn amplitude_spectrum(signal: &[f32]) -> Result<Vec<f64>, PitchError> {
    let spectrum = fft_real(signal)?;
    let n = spectrum.len() as f64;
    Ok(spectrum
        .iter()
        .take(spectrum.len() / 2)
        .map(|c| 2.0 * (*c / n).norm())
        .collect())
}

/// Periodic Hamming window of length `n`, as used for spectral analysis.
pub fn hamming_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let phase = 2.0 * PI * i as f64 / n as f64;
            (0.54 - 0.46 * phase.cos()) as f32
        })
        .collect()
}

/// Short-time Fourier transform with a fixed frame size and hop.
///
/// Frames are centred: the signal is reflect-padded by `n_fft / 2` on both
/// sides so that frame `t` is centred on sample `t * hop`.
pub struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            n_fft,
            hop,
            window: hamming_window(n_fft),
            fft: planner.plan_fft_forward(n_fft),
        }
    }

    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Magnitude of every bin averaged over all frames.
    ///
    /// The caller guarantees `signal.len() > n_fft / 2`.
    pub fn mean_magnitudes(&self, signal: &[f32]) -> Vec<f32> {
        let padded = reflect_pad(signal, self.n_fft / 2);
        let frames = 1 + (padded.len() - self.n_fft) / self.hop;
        let bins = self.bins();

        let mut sums = vec![0.0_f64; bins];
        let mut buffer = vec![Complex::new(0.0_f32, 0.0); self.n_fft];
        let mut scratch = vec![Complex::new(0.0_f32, 0.0); self.fft.get_inplace_scratch_len()];

        for frame in 0..frames {
            let start = frame * self.hop;
            let chunk = &padded[start..start + self.n_fft];
            for ((slot, &sample), &w) in buffer.iter_mut().zip(chunk).zip(&self.window) {
                *slot = Complex::new(sample * w, 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);
            for (sum, c) in sums.iter_mut().zip(&buffer[..bins]) {
                *sum += c.norm() as f64;
            }
        }

        sums.into_iter()
            .map(|s| (s / frames as f64) as f32)
            .collect()
    }
}

/// Mirrors `pad` samples on each side without repeating the edge sample.
fn reflect_pad(signal: &[f32], pad: usize) -> Vec<f32> {
    let n = signal.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| signal[i]));
    out.extend_from_slice(signal);
    out.extend((0..pad).map(|i| signal[n - 2 - i]));
    out
}
