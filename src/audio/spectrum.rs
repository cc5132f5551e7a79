//! Per-frame spectral analysis
//!
//! Finds the dominant frequency component of a frame:
//! - Blackman window to limit spectral leakage
//! - forward FFT of the windowed frame
//! - unnormalized squared magnitude per bin
//! - bin of maximum power mapped to Hz

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use thiserror::Error;

use super::frame::{Frame, FrameFormat};

#[derive(Error, Debug, PartialEq)]
pub enum SpectrumError {
    #[error("frame has {actual} samples, analyzer expects {expected}")]
    FrameLength { expected: usize, actual: usize },
}

/// Dominant spectral component of one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralVerdict {
    /// Squared magnitude of the strongest bin
    pub peak_power: f64,
    /// Frequency of the strongest bin in Hz
    pub peak_frequency: f64,
}

/// Blackman window of `len` points (symmetric form)
pub fn blackman_window(len: usize) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let m = (len - 1) as f64;
            (0..len)
                .map(|n| {
                    let x = n as f64 / m;
                    0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
                })
                .collect()
        }
    }
}

/// Frequency of DFT bin `index` for a transform of `len` points
///
/// Bins in the upper half alias to negative frequencies.
pub fn bin_frequency(index: usize, len: usize, sample_rate: u32) -> f64 {
    let len_i = len as i64;
    let idx = index as i64;
    let signed = if idx < (len_i + 1) / 2 { idx } else { idx - len_i };
    signed as f64 * sample_rate as f64 / len as f64
}

/// Squared-magnitude spectrum of a real signal, no window applied
pub fn power_spectrum(signal: &[f64]) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(signal.len());
    let mut buffer: Vec<Complex<f64>> = signal.iter().map(|&s| Complex::new(s, 0.0)).collect();
    fft.process(&mut buffer);
    buffer.iter().map(|c| c.norm_sqr()).collect()
}

/// Index and value of the first maximum in `powers`
fn argmax(powers: &[f64]) -> Option<(usize, f64)> {
    powers
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if p <= bp => best,
            _ => Some((i, p)),
        })
}

/// FFT-based dominant frequency estimator for fixed-length frames
pub struct SpectralAnalyzer {
    format: FrameFormat,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
}

impl SpectralAnalyzer {
    pub fn new(format: FrameFormat) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(format.frame_len);

        Self {
            window: blackman_window(format.frame_len),
            fft,
            format,
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Analyze one frame
    ///
    /// Only the non-negative half of the spectrum is searched. Input is
    /// real, so the upper half mirrors it and holds no larger peak.
    pub fn analyze(&self, frame: &Frame) -> Result<SpectralVerdict, SpectrumError> {
        let len = self.format.frame_len;
        if frame.len() != len {
            return Err(SpectrumError::FrameLength {
                expected: len,
                actual: frame.len(),
            });
        }

        let mut buffer: Vec<Complex<f64>> = frame
            .samples()
            .iter()
            .zip(self.window.iter())
            .map(|(&s, &w)| Complex::new(s as f64 * w, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        let powers: Vec<f64> = buffer[..=len / 2].iter().map(|c| c.norm_sqr()).collect();
        let (index, peak_power) = argmax(&powers).unwrap_or((0, 0.0));

        Ok(SpectralVerdict {
            peak_power,
            peak_frequency: bin_frequency(index, len, self.format.sample_rate),
        })
    }
}
