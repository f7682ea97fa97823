//! Configuration structs for every pipeline stage.
//!
//! These are plain data, not a file-backed manager like the teacher's
//! `ConfigManager` — persistence is an out-of-scope external concern here.
//! Each struct derives `Serialize`/`Deserialize` so a host application can
//! persist or transmit it on its own, and carries a `validate()` that is
//! called from every fallible constructor and from `set_config` before any
//! state is mutated.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnsetKind {
    Energy,
    SpectralFlux,
    SuperFlux,
    HighFrequencyContent,
    MultiBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeakPolicy {
    LocalMaximum,
    AdaptiveThreshold,
    SuperFluxPeaks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TempoPolicy {
    None,
    Autocorrelation,
    CombFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub low_hz: f32,
    pub high_hz: f32,
    pub weight: f32,
}

impl FrequencyBand {
    pub fn new(low_hz: f32, high_hz: f32, weight: f32) -> Self {
        Self {
            low_hz,
            high_hz,
            weight,
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.low_hz < 0.0 || self.high_hz <= self.low_hz || self.weight < 0.0 {
            return Err(CoreError::InvalidBand {
                low_hz: self.low_hz,
                high_hz: self.high_hz,
                weight: self.weight,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralFrontConfig {
    pub sample_rate_hz: f32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub mel_bands: Option<usize>,
}

impl Default for SpectralFrontConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44_100.0,
            frame_size: 512,
            hop_size: 256,
            mel_bands: None,
        }
    }
}

impl SpectralFrontConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.frame_size == 0 || !self.frame_size.is_power_of_two() {
            return Err(CoreError::InvalidFrameSize(self.frame_size));
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(CoreError::InvalidHopSize {
                hop_size: self.hop_size,
                frame_size: self.frame_size,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsetConfig {
    pub kind: OnsetKind,
    pub bands: Vec<FrequencyBand>,
    pub log_compression: bool,
    pub adaptive_whitening: bool,
    pub whitening_alpha: f32,
    pub whitening_floor: f32,
    pub superflux_mu: usize,
    pub max_filter_radius: usize,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            kind: OnsetKind::SuperFlux,
            bands: vec![
                FrequencyBand::new(20.0, 150.0, 1.2),
                FrequencyBand::new(150.0, 2000.0, 1.0),
                FrequencyBand::new(2000.0, 16_000.0, 0.8),
            ],
            log_compression: true,
            adaptive_whitening: true,
            whitening_alpha: 0.97,
            whitening_floor: 1e-4,
            superflux_mu: 3,
            max_filter_radius: 2,
        }
    }
}

impl OnsetConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        for b in &self.bands {
            b.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakPickerConfig {
    pub policy: PeakPolicy,
    pub threshold_delta: f32,
    pub pre_max_ms: f32,
    pub post_max_ms: f32,
    pub pre_avg_ms: f32,
    pub post_avg_ms: f32,
    pub min_inter_onset_ms: f32,
}

impl Default for PeakPickerConfig {
    fn default() -> Self {
        Self {
            policy: PeakPolicy::SuperFluxPeaks,
            threshold_delta: 0.07,
            pre_max_ms: 30.0,
            post_max_ms: 30.0,
            pre_avg_ms: 100.0,
            post_avg_ms: 70.0,
            min_inter_onset_ms: 60.0,
        }
    }
}

impl PeakPickerConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoConfig {
    pub policy: TempoPolicy,
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub rayleigh_center_bpm: f32,
    pub acf_window_sec: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            policy: TempoPolicy::CombFilter,
            min_bpm: 80.0,
            max_bpm: 180.0,
            rayleigh_center_bpm: 126.0,
            acf_window_sec: 4.0,
        }
    }
}

impl TempoConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.min_bpm <= 0.0 || self.max_bpm <= self.min_bpm {
            return Err(CoreError::InvalidBand {
                low_hz: self.min_bpm,
                high_hz: self.max_bpm,
                weight: 0.0,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolymetricConfig {
    pub enabled: bool,
    pub overlay_numerator: u32,
    pub overlay_denominator: u32,
    pub overlay_bars: u32,
    pub swing_amount: f32,
    pub enable_tuplet_detection: bool,
    pub fill_enter_threshold: f32,
    pub fill_exit_threshold: f32,
}

impl Default for PolymetricConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overlay_numerator: 7,
            overlay_denominator: 8,
            overlay_bars: 2,
            swing_amount: 0.12,
            enable_tuplet_detection: true,
            fill_enter_threshold: 0.6,
            fill_exit_threshold: 0.2,
        }
    }
}

impl PolymetricConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.overlay_numerator == 0 || self.overlay_denominator == 0 || self.overlay_bars == 0
        {
            return Err(CoreError::InvalidPolymetricOverlay {
                numerator: self.overlay_numerator,
                denominator: self.overlay_denominator,
                bars: self.overlay_bars,
            });
        }
        if !(0.0..=0.25).contains(&self.swing_amount) {
            return Err(CoreError::InvalidPolymetricOverlay {
                numerator: self.overlay_numerator,
                denominator: self.overlay_denominator,
                bars: self.overlay_bars,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EmitterConfig {
    pub emit_rate: f32,
    pub velocity_min: f32,
    pub velocity_max: f32,
    pub life_min_sec: f32,
    pub life_max_sec: f32,
    pub base_hue: u8,
    pub base_sat: u8,
    pub base_val: u8,
    pub hue_variance: u8,
    pub spread_angle_deg: f32,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleConfig {
    pub max_particles: usize,
    pub timestep_default: f32,
    pub velocity_decay: f32,
    pub radial_gravity: f32,
    pub curl_strength: f32,
    pub kick_duck_amount: f32,
    pub kick_duck_duration_ms: f32,
    pub bloom_threshold: u8,
    pub bloom_strength: f32,
    pub grid_width: usize,
    pub grid_height: usize,
    pub enable_3d: bool,
    pub rng_seed: u64,
    pub emitter_kick: EmitterConfig,
    pub emitter_snare: EmitterConfig,
    pub emitter_hat: EmitterConfig,
    pub emitter_overlay: EmitterConfig,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            max_particles: 1000,
            timestep_default: 1.0 / 120.0,
            velocity_decay: 0.985,
            radial_gravity: 0.0,
            curl_strength: 0.7,
            kick_duck_amount: 0.35,
            kick_duck_duration_ms: 80.0,
            bloom_threshold: 64,
            bloom_strength: 0.5,
            grid_width: 32,
            grid_height: 8,
            enable_3d: false,
            rng_seed: 12345,
            emitter_kick: EmitterConfig {
                emit_rate: 15.0,
                velocity_min: 1.0,
                velocity_max: 3.0,
                life_min_sec: 0.8,
                life_max_sec: 1.5,
                base_hue: 16,
                base_sat: 255,
                base_val: 255,
                hue_variance: 12,
                spread_angle_deg: 360.0,
                x: 0.5,
                y: 0.5,
            },
            emitter_snare: EmitterConfig {
                emit_rate: 12.0,
                velocity_min: 0.8,
                velocity_max: 2.5,
                life_min_sec: 0.5,
                life_max_sec: 1.2,
                base_hue: 128,
                base_sat: 200,
                base_val: 255,
                hue_variance: 16,
                spread_angle_deg: 360.0,
                x: 0.5,
                y: 0.5,
            },
            emitter_hat: EmitterConfig {
                emit_rate: 8.0,
                velocity_min: 0.5,
                velocity_max: 1.8,
                life_min_sec: 0.3,
                life_max_sec: 0.8,
                base_hue: 42,
                base_sat: 220,
                base_val: 255,
                hue_variance: 20,
                spread_angle_deg: 360.0,
                x: 0.5,
                y: 0.5,
            },
            emitter_overlay: EmitterConfig {
                emit_rate: 10.0,
                velocity_min: 0.7,
                velocity_max: 2.0,
                life_min_sec: 0.6,
                life_max_sec: 1.3,
                base_hue: 190,
                base_sat: 220,
                base_val: 255,
                hue_variance: 14,
                spread_angle_deg: 360.0,
                x: 0.5,
                y: 0.5,
            },
        }
    }
}

impl ParticleConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        // max_particles == 0 is a valid no-op configuration: emission and
        // rendering both degrade to doing nothing rather than erroring.
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(CoreError::InvalidGridDimensions {
                width: self.grid_width,
                height: self.grid_height,
            });
        }
        Ok(())
    }
}

/// Controls how the orchestrator prepares the pixel buffer each render
/// tick, before particles are composited in. `clear_on_beat` and
/// `background_fade` are mutually exclusive: a beat-triggered clear
/// pre-empts the fade for that tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Zero the buffer on every tracked beat, instead of letting particles
    /// accumulate on top of prior frames indefinitely.
    pub clear_on_beat: bool,
    /// Scales existing buffer contents by `background_fade/255` each render
    /// tick before compositing, producing a decaying trail. `255` disables
    /// fading.
    pub background_fade: u8,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_on_beat: false,
            background_fade: 230,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub spectral: SpectralFrontConfig,
    pub onset: OnsetConfig,
    pub peak: PeakPickerConfig,
    pub tempo: TempoConfig,
    pub polymetric: PolymetricConfig,
    pub particles: ParticleConfig,
    pub render: RenderConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            spectral: SpectralFrontConfig::default(),
            onset: OnsetConfig::default(),
            peak: PeakPickerConfig::default(),
            tempo: TempoConfig::default(),
            polymetric: PolymetricConfig::default(),
            particles: ParticleConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        self.spectral.validate()?;
        self.onset.validate()?;
        self.peak.validate()?;
        self.tempo.validate()?;
        self.polymetric.validate()?;
        self.particles.validate()?;
        self.render.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn non_power_of_two_frame_size_rejected() {
        let mut c = SpectralFrontConfig::default();
        c.frame_size = 500;
        assert!(matches!(
            c.validate(),
            Err(CoreError::InvalidFrameSize(500))
        ));
    }

    #[test]
    fn hop_larger_than_frame_rejected() {
        let mut c = SpectralFrontConfig::default();
        c.hop_size = c.frame_size + 1;
        assert!(matches!(c.validate(), Err(CoreError::InvalidHopSize { .. })));
    }

    #[test]
    fn inverted_band_rejected() {
        let b = FrequencyBand::new(200.0, 100.0, 1.0);
        assert!(b.validate().is_err());
    }

    #[test]
    fn zero_particles_is_a_valid_no_op_config() {
        let mut c = ParticleConfig::default();
        c.max_particles = 0;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn render_config_always_valid() {
        let mut c = RenderConfig::default();
        c.background_fade = 0;
        assert!(c.validate().is_ok());
        c.background_fade = 255;
        assert!(c.validate().is_ok());
    }
}
