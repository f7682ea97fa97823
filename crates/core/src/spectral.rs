//! Converts time-domain audio frames into magnitude spectra.

use std::sync::Arc;

use rustfft::{num_complex::Complex32, Fft, FftPlanner};

use crate::config::SpectralFrontConfig;
use crate::error::CoreError;

/// A magnitude spectrum of `frame_size / 2 + 1` non-negative bins.
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub bins: Vec<f32>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| {
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (n as f32 - 1.0)).cos()
        })
        .collect()
}

/// Windowed FFT magnitude extraction, with an optional mel-banded
/// sub-spectrum reduction for callers that want a coarser representation.
pub struct SpectralFront {
    config: SpectralFrontConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex32>,
    mel_filterbank: Option<Vec<Vec<f32>>>,
}

impl SpectralFront {
    pub fn new(config: SpectralFrontConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.frame_size);
        let window = hann_window(config.frame_size);
        let scratch = vec![Complex32::new(0.0, 0.0); config.frame_size];
        let mel_filterbank = config
            .mel_bands
            .map(|n| build_mel_filterbank(n, config.frame_size, config.sample_rate_hz));
        Ok(Self {
            config,
            fft,
            window,
            scratch,
            mel_filterbank,
        })
    }

    pub fn config(&self) -> &SpectralFrontConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SpectralFrontConfig) -> Result<(), CoreError> {
        config.validate()?;
        if config.frame_size != self.config.frame_size {
            let mut planner = FftPlanner::<f32>::new();
            self.fft = planner.plan_fft_forward(config.frame_size);
            self.window = hann_window(config.frame_size);
            self.scratch = vec![Complex32::new(0.0, 0.0); config.frame_size];
        }
        if config.mel_bands != self.config.mel_bands {
            self.mel_filterbank = config
                .mel_bands
                .map(|n| build_mel_filterbank(n, config.frame_size, config.sample_rate_hz));
        }
        self.config = config;
        Ok(())
    }

    /// Computes the magnitude spectrum of one time-domain frame.
    ///
    /// `frame.len()` must equal `config.frame_size`; a shorter frame (the
    /// stream ending mid-window) is zero-padded in place by the caller's
    /// ring buffer before reaching here, so this never allocates.
    pub fn analyze(&mut self, frame: &[f32], out: &mut Spectrum) {
        let n = self.config.frame_size;
        debug_assert_eq!(frame.len(), n);

        for (i, &s) in frame.iter().enumerate() {
            self.scratch[i] = Complex32::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let n_bins = n / 2 + 1;
        if out.bins.len() != n_bins {
            out.bins.resize(n_bins, 0.0);
        }
        for (i, bin) in out.bins.iter_mut().enumerate() {
            *bin = self.scratch[i].norm();
        }
    }

    /// Reduces a full-resolution spectrum into mel-banded sub-spectrum
    /// energies, if `mel_bands` is configured. Returns `None` otherwise.
    pub fn mel_bands(&self, spectrum: &Spectrum) -> Option<Vec<f32>> {
        let fb = self.mel_filterbank.as_ref()?;
        Some(
            fb.iter()
                .map(|weights| {
                    weights
                        .iter()
                        .zip(spectrum.bins.iter())
                        .map(|(w, m)| w * m)
                        .sum()
                })
                .collect(),
        )
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Builds a triangular mel filterbank over `n_bins = frame_size/2+1` FFT
/// bins, mirroring the reference source's `computeMelBands`/
/// `applyMelFilterbank` construction.
fn build_mel_filterbank(n_mel: usize, frame_size: usize, sample_rate_hz: f32) -> Vec<Vec<f32>> {
    let n_bins = frame_size / 2 + 1;
    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(sample_rate_hz / 2.0);
    let mel_points: Vec<f32> = (0..n_mel + 2)
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mel + 1) as f32)
        .collect();
    let bin_points: Vec<usize> = mel_points
        .iter()
        .map(|&m| {
            let hz = mel_to_hz(m);
            ((hz / (sample_rate_hz / 2.0)) * (n_bins - 1) as f32).round() as usize
        })
        .collect();

    (0..n_mel)
        .map(|m| {
            let mut weights = vec![0.0f32; n_bins];
            let (left, center, right) = (bin_points[m], bin_points[m + 1], bin_points[m + 2]);
            for k in left..center.max(left + 1).min(n_bins) {
                if center > left {
                    weights[k] = (k - left) as f32 / (center - left) as f32;
                }
            }
            for k in center..right.max(center + 1).min(n_bins) {
                if right > center {
                    weights[k] = (right - k) as f32 / (right - center) as f32;
                }
            }
            weights
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_expected_bin_count() {
        let cfg = SpectralFrontConfig {
            frame_size: 256,
            hop_size: 128,
            ..SpectralFrontConfig::default()
        };
        let mut front = SpectralFront::new(cfg).unwrap();
        let frame = vec![0.0f32; 256];
        let mut out = Spectrum { bins: vec![] };
        front.analyze(&frame, &mut out);
        assert_eq!(out.len(), 129);
    }

    #[test]
    fn silence_yields_zero_spectrum() {
        let cfg = SpectralFrontConfig {
            frame_size: 64,
            hop_size: 32,
            ..SpectralFrontConfig::default()
        };
        let mut front = SpectralFront::new(cfg).unwrap();
        let frame = vec![0.0f32; 64];
        let mut out = Spectrum { bins: vec![] };
        front.analyze(&frame, &mut out);
        assert!(out.bins.iter().all(|&b| b.abs() < 1e-5));
    }

    #[test]
    fn sine_tone_peaks_near_expected_bin() {
        let frame_size = 512;
        let sample_rate = 44_100.0f32;
        let cfg = SpectralFrontConfig {
            sample_rate_hz: sample_rate,
            frame_size,
            hop_size: 256,
            mel_bands: None,
        };
        let mut front = SpectralFront::new(cfg).unwrap();
        let freq = 1000.0f32;
        let frame: Vec<f32> = (0..frame_size)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect();
        let mut out = Spectrum { bins: vec![] };
        front.analyze(&frame, &mut out);
        let expected_bin = (freq / sample_rate * frame_size as f32).round() as usize;
        let peak_bin = out
            .bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak_bin as i64 - expected_bin as i64).abs() <= 1);
    }

    #[test]
    fn mel_bands_none_when_unconfigured() {
        let cfg = SpectralFrontConfig {
            frame_size: 128,
            hop_size: 64,
            ..SpectralFrontConfig::default()
        };
        let front = SpectralFront::new(cfg).unwrap();
        let spectrum = Spectrum {
            bins: vec![1.0; 65],
        };
        assert!(front.mel_bands(&spectrum).is_none());
    }

    #[test]
    fn mel_bands_produced_when_configured() {
        let cfg = SpectralFrontConfig {
            frame_size: 128,
            hop_size: 64,
            mel_bands: Some(8),
            ..SpectralFrontConfig::default()
        };
        let front = SpectralFront::new(cfg).unwrap();
        let spectrum = Spectrum {
            bins: vec![1.0; 65],
        };
        let mel = front.mel_bands(&spectrum).unwrap();
        assert_eq!(mel.len(), 8);
    }
}
