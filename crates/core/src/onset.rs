//! Onset detection functions (ODFs): reduce a stream of spectra to a
//! scalar novelty value per frame, plus per-band novelty for routing to
//! separate kick/snare/hat-style triggers.

use std::collections::VecDeque;

use crate::config::{OnsetConfig, OnsetKind};
use crate::spectral::Spectrum;

/// Per-band novelty split, used to drive bass/mid/high-triggered effects
/// independently of whichever ODF produces the combined novelty value.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiBandNovelty {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub combined: f32,
}

fn freq_to_bin(freq_hz: f32, sample_rate_hz: f32, frame_size: usize) -> usize {
    let bin = (freq_hz / sample_rate_hz * frame_size as f32).round();
    (bin.max(0.0) as usize).min(frame_size / 2)
}

pub struct OnsetFunction {
    config: OnsetConfig,
    sample_rate_hz: f32,
    frame_size: usize,

    prev_spectrum: Option<Spectrum>,
    history: VecDeque<Spectrum>,
    running_max: Vec<f32>,
    band_bins: Vec<(usize, usize, f32)>,
}

impl OnsetFunction {
    pub fn new(config: OnsetConfig, sample_rate_hz: f32, frame_size: usize) -> Self {
        let band_bins = config
            .bands
            .iter()
            .map(|b| {
                (
                    freq_to_bin(b.low_hz, sample_rate_hz, frame_size),
                    freq_to_bin(b.high_hz, sample_rate_hz, frame_size),
                    b.weight,
                )
            })
            .collect();
        let history_depth = config.superflux_mu.max(1) + 1;
        Self {
            config,
            sample_rate_hz,
            frame_size,
            prev_spectrum: None,
            history: VecDeque::with_capacity(history_depth),
            running_max: Vec::new(),
            band_bins,
        }
    }

    pub fn config(&self) -> &OnsetConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: OnsetConfig) {
        self.band_bins = config
            .bands
            .iter()
            .map(|b| {
                (
                    freq_to_bin(b.low_hz, self.sample_rate_hz, self.frame_size),
                    freq_to_bin(b.high_hz, self.sample_rate_hz, self.frame_size),
                    b.weight,
                )
            })
            .collect();
        self.config = config;
    }

    pub fn reset(&mut self) {
        self.prev_spectrum = None;
        self.history.clear();
        self.running_max.clear();
    }

    /// Consumes one spectrum, returns the combined scalar novelty value
    /// and the per-band novelty split.
    pub fn process(&mut self, spectrum: &Spectrum) -> (f32, MultiBandNovelty) {
        let mut working = spectrum.bins.clone();

        if self.config.adaptive_whitening {
            self.apply_whitening(&mut working);
        }
        if self.config.log_compression {
            for v in working.iter_mut() {
                *v = (1.0 + *v).ln();
            }
        }

        let band = self.compute_band_novelty(&working);

        let combined = match self.config.kind {
            OnsetKind::Energy => self.energy_odf(&working),
            OnsetKind::SpectralFlux => self.spectral_flux_odf(&working),
            OnsetKind::SuperFlux => self.super_flux_odf(&working),
            OnsetKind::HighFrequencyContent => self.hfc_odf(&working),
            OnsetKind::MultiBand => band.combined,
        };

        self.history.push_back(Spectrum {
            bins: working.clone(),
        });
        if self.history.len() > self.config.superflux_mu.max(1) + 1 {
            self.history.pop_front();
        }
        self.prev_spectrum = Some(Spectrum { bins: working });

        (combined.max(0.0), band)
    }

    fn apply_whitening(&mut self, mag: &mut [f32]) {
        if self.running_max.len() != mag.len() {
            self.running_max = vec![0.0; mag.len()];
        }
        let alpha = self.config.whitening_alpha;
        let floor = self.config.whitening_floor;
        for (m, rmax) in mag.iter_mut().zip(self.running_max.iter_mut()) {
            *rmax = m.max(alpha * *rmax);
            *m /= rmax.max(floor);
        }
    }

    fn energy_odf(&self, mag: &[f32]) -> f32 {
        let energy: f32 = mag.iter().map(|m| m * m).sum();
        let prev_energy = self
            .prev_spectrum
            .as_ref()
            .map(|p| p.bins.iter().map(|m| m * m).sum())
            .unwrap_or(0.0);
        (energy - prev_energy).max(0.0)
    }

    fn spectral_flux_odf(&self, mag: &[f32]) -> f32 {
        match &self.prev_spectrum {
            Some(prev) => mag
                .iter()
                .zip(prev.bins.iter())
                .map(|(m, p)| (m - p).max(0.0))
                .sum(),
            None => 0.0,
        }
    }

    fn super_flux_odf(&self, mag: &[f32]) -> f32 {
        let delay = self.config.superflux_mu.max(1);
        let reference = self.history.iter().rev().nth(delay - 1);
        let reference = match reference {
            Some(r) => r,
            // Not enough delay-line history yet; the ODF is defined as 0
            // rather than degrading to plain spectral flux.
            None => return 0.0,
        };
        let radius = self.config.max_filter_radius;
        let filtered = maximum_filter(&reference.bins, radius);
        mag.iter()
            .zip(filtered.iter())
            .map(|(m, f)| (m - f).max(0.0))
            .sum()
    }

    fn hfc_odf(&self, mag: &[f32]) -> f32 {
        mag.iter()
            .enumerate()
            .map(|(k, m)| (k as f32) * m)
            .sum()
    }

    /// Spectral flux restricted to each band's bin range: the per-bin
    /// positive difference against the previous frame, summed within
    /// `[lo, hi)`, not the difference of aggregate band energies.
    fn compute_band_novelty(&self, mag: &[f32]) -> MultiBandNovelty {
        let prev = match &self.prev_spectrum {
            Some(p) => &p.bins,
            None => return MultiBandNovelty::default(),
        };

        let mut flux = Vec::with_capacity(self.band_bins.len());
        for &(lo, hi, weight) in &self.band_bins {
            let lo = lo.min(mag.len()).min(prev.len());
            let hi = hi.min(mag.len()).min(prev.len()).max(lo);
            let energy: f32 = mag[lo..hi]
                .iter()
                .zip(prev[lo..hi].iter())
                .map(|(m, p)| (m - p).max(0.0))
                .sum();
            flux.push(energy * weight);
        }

        let bass = flux.first().copied().unwrap_or(0.0);
        let mid = flux.get(1).copied().unwrap_or(0.0);
        let high = flux.get(2).copied().unwrap_or(0.0);
        let combined = flux.iter().sum();

        MultiBandNovelty {
            bass,
            mid,
            high,
            combined,
        }
    }
}

/// Sliding-window maximum with the given radius, matching the reference
/// source's `applyMaximumFilter` used by SuperFlux to suppress vibrato.
fn maximum_filter(values: &[f32], radius: usize) -> Vec<f32> {
    if radius == 0 {
        return values.to_vec();
    }
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(values.len());
            values[lo..hi].iter().cloned().fold(f32::MIN, f32::max)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrequencyBand;

    fn spectrum(bins: Vec<f32>) -> Spectrum {
        Spectrum { bins }
    }

    #[test]
    fn energy_odf_is_zero_for_silence() {
        let cfg = OnsetConfig {
            kind: OnsetKind::Energy,
            adaptive_whitening: false,
            log_compression: false,
            ..OnsetConfig::default()
        };
        let mut odf = OnsetFunction::new(cfg, 44_100.0, 256);
        let (novelty, _) = odf.process(&spectrum(vec![0.0; 129]));
        assert_eq!(novelty, 0.0);
    }

    #[test]
    fn spectral_flux_rises_on_energy_increase() {
        let cfg = OnsetConfig {
            kind: OnsetKind::SpectralFlux,
            adaptive_whitening: false,
            log_compression: false,
            ..OnsetConfig::default()
        };
        let mut odf = OnsetFunction::new(cfg, 44_100.0, 256);
        let (n1, _) = odf.process(&spectrum(vec![0.1; 129]));
        let (n2, _) = odf.process(&spectrum(vec![0.9; 129]));
        assert!(n1 >= 0.0);
        assert!(n2 > n1);
    }

    #[test]
    fn hfc_weights_high_bins_more() {
        let cfg = OnsetConfig {
            kind: OnsetKind::HighFrequencyContent,
            adaptive_whitening: false,
            log_compression: false,
            ..OnsetConfig::default()
        };
        let mut odf = OnsetFunction::new(cfg, 44_100.0, 256);
        let mut low = vec![0.0; 129];
        low[1] = 1.0;
        let mut high = vec![0.0; 129];
        high[120] = 1.0;
        let (n_low, _) = odf.process(&spectrum(low));
        odf.reset();
        let (n_high, _) = odf.process(&spectrum(high));
        assert!(n_high > n_low);
    }

    #[test]
    fn multi_band_splits_into_bass_mid_high() {
        let cfg = OnsetConfig {
            kind: OnsetKind::MultiBand,
            adaptive_whitening: false,
            log_compression: false,
            bands: vec![
                FrequencyBand::new(20.0, 150.0, 1.0),
                FrequencyBand::new(150.0, 2000.0, 1.0),
                FrequencyBand::new(2000.0, 16000.0, 1.0),
            ],
            ..OnsetConfig::default()
        };
        let mut odf = OnsetFunction::new(cfg, 44_100.0, 1024);
        // Per-bin flux needs a previous frame to diff against; silence
        // first, then a bass-bin spike.
        odf.process(&spectrum(vec![0.0; 513]));
        let mut bins = vec![0.0; 513];
        bins[2] = 5.0;
        let (_, band) = odf.process(&spectrum(bins));
        assert!(band.bass > 0.0);
        assert_eq!(band.mid, 0.0);
        assert_eq!(band.high, 0.0);
    }

    #[test]
    fn multi_band_novelty_is_zero_on_first_frame() {
        let cfg = OnsetConfig {
            kind: OnsetKind::MultiBand,
            adaptive_whitening: false,
            log_compression: false,
            ..OnsetConfig::default()
        };
        let mut odf = OnsetFunction::new(cfg, 44_100.0, 1024);
        let mut bins = vec![0.0; 513];
        bins[2] = 5.0;
        let (_, band) = odf.process(&spectrum(bins));
        assert_eq!(band.combined, 0.0);
    }

    #[test]
    fn super_flux_is_zero_before_history_fills() {
        let cfg = OnsetConfig {
            kind: OnsetKind::SuperFlux,
            adaptive_whitening: false,
            log_compression: false,
            superflux_mu: 3,
            ..OnsetConfig::default()
        };
        let mut odf = OnsetFunction::new(cfg, 44_100.0, 256);
        let (n, _) = odf.process(&spectrum(vec![0.5; 129]));
        assert_eq!(n, 0.0);
    }
}
