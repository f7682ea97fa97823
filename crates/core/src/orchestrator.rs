//! Wires the spectral front, onset function, peak picker, tempo tracker,
//! polymetric analyzer, and particle engine into a single streaming
//! pipeline, and owns the audio-frame clocking between them.
//!
//! Event delivery uses named `Option<Box<dyn FnMut(..)>>` slots rather
//! than a generic event bus: the set of event kinds this core can ever
//! produce is closed, so a bus would only add indirection without buying
//! extensibility.

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::events::{BandOnsetEvent, BeatEvent, FillEvent, OnsetEvent, SubdivisionEvent};
use crate::onset::OnsetFunction;
use crate::peak::PeakPicker;
use crate::particles::ParticleEngine;
use crate::polymetric::PolymetricAnalyzer;
use crate::spectral::{SpectralFront, Spectrum};
use crate::tempo::TempoTracker;

pub struct Orchestrator {
    config: CoreConfig,

    spectral: SpectralFront,
    onset: OnsetFunction,
    peak: PeakPicker,
    tempo: TempoTracker,
    polymetric: PolymetricAnalyzer,
    particles: ParticleEngine,

    ring: Vec<f32>,
    write_pos: usize,
    filled: usize,
    samples_since_hop: usize,
    frame_scratch: Vec<f32>,
    spectrum_scratch: Spectrum,
    frame_index: u64,
    last_tempo_bpm: f32,
    last_render_ms: Option<f32>,
    beat_since_last_render: bool,

    on_onset: Option<Box<dyn FnMut(OnsetEvent)>>,
    on_beat: Option<Box<dyn FnMut(BeatEvent)>>,
    on_tempo_change: Option<Box<dyn FnMut(f32)>>,
    on_onset_bass: Option<Box<dyn FnMut(BandOnsetEvent)>>,
    on_onset_mid: Option<Box<dyn FnMut(BandOnsetEvent)>>,
    on_onset_high: Option<Box<dyn FnMut(BandOnsetEvent)>>,
    on_polymetric_beat: Option<Box<dyn FnMut(f32, f32)>>,
    on_subdivision: Option<Box<dyn FnMut(SubdivisionEvent)>>,
    on_fill: Option<Box<dyn FnMut(FillEvent)>>,
}

impl Orchestrator {
    pub fn new(config: CoreConfig) -> Result<Self, CoreError> {
        config.validate()?;

        let frame_size = config.spectral.frame_size;
        let sample_rate = config.spectral.sample_rate_hz;
        let hop_size = config.spectral.hop_size;

        let spectral = SpectralFront::new(config.spectral.clone())?;
        let onset = OnsetFunction::new(config.onset.clone(), sample_rate, frame_size);
        let peak = PeakPicker::new(config.peak.clone(), sample_rate, hop_size);
        let tempo = TempoTracker::new(config.tempo.clone(), sample_rate, hop_size);
        let polymetric = PolymetricAnalyzer::new(config.polymetric);
        let particles = ParticleEngine::new(config.particles.clone());

        Ok(Self {
            config,
            spectral,
            onset,
            peak,
            tempo,
            polymetric,
            particles,
            ring: vec![0.0; frame_size],
            write_pos: 0,
            filled: 0,
            samples_since_hop: 0,
            frame_scratch: vec![0.0; frame_size],
            spectrum_scratch: Spectrum { bins: Vec::new() },
            frame_index: 0,
            last_tempo_bpm: 0.0,
            last_render_ms: None,
            beat_since_last_render: false,
            on_onset: None,
            on_beat: None,
            on_tempo_change: None,
            on_onset_bass: None,
            on_onset_mid: None,
            on_onset_high: None,
            on_polymetric_beat: None,
            on_subdivision: None,
            on_fill: None,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Validates before mutating anything; on failure the previous
    /// configuration is left completely untouched.
    pub fn set_config(&mut self, config: CoreConfig) -> Result<(), CoreError> {
        config.validate()?;

        let frame_size = config.spectral.frame_size;
        let sample_rate = config.spectral.sample_rate_hz;
        let hop_size = config.spectral.hop_size;

        self.spectral.set_config(config.spectral.clone())?;
        self.onset.set_config(config.onset.clone());
        self.peak = PeakPicker::new(config.peak.clone(), sample_rate, hop_size);
        self.tempo = TempoTracker::new(config.tempo.clone(), sample_rate, hop_size);
        self.polymetric.set_config(config.polymetric);
        self.particles.set_config(config.particles.clone());

        if self.ring.len() != frame_size {
            self.ring = vec![0.0; frame_size];
            self.frame_scratch = vec![0.0; frame_size];
            self.write_pos = 0;
            self.filled = 0;
        }

        log::debug!("core reconfigured: frame_size={frame_size} hop_size={hop_size}");
        self.config = config;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.onset.reset();
        self.peak.reset();
        self.tempo.reset();
        self.polymetric.reset();
        self.particles.reset();
        self.write_pos = 0;
        self.filled = 0;
        self.samples_since_hop = 0;
        self.frame_index = 0;
        self.last_tempo_bpm = 0.0;
        self.last_render_ms = None;
        self.beat_since_last_render = false;
        log::debug!("core reset");
    }

    pub fn set_on_onset(&mut self, f: impl FnMut(OnsetEvent) + 'static) {
        self.on_onset = Some(Box::new(f));
    }
    pub fn set_on_beat(&mut self, f: impl FnMut(BeatEvent) + 'static) {
        self.on_beat = Some(Box::new(f));
    }
    pub fn set_on_tempo_change(&mut self, f: impl FnMut(f32) + 'static) {
        self.on_tempo_change = Some(Box::new(f));
    }
    pub fn set_on_onset_bass(&mut self, f: impl FnMut(BandOnsetEvent) + 'static) {
        self.on_onset_bass = Some(Box::new(f));
    }
    pub fn set_on_onset_mid(&mut self, f: impl FnMut(BandOnsetEvent) + 'static) {
        self.on_onset_mid = Some(Box::new(f));
    }
    pub fn set_on_onset_high(&mut self, f: impl FnMut(BandOnsetEvent) + 'static) {
        self.on_onset_high = Some(Box::new(f));
    }
    pub fn set_on_polymetric_beat(&mut self, f: impl FnMut(f32, f32) + 'static) {
        self.on_polymetric_beat = Some(Box::new(f));
    }
    pub fn set_on_subdivision(&mut self, f: impl FnMut(SubdivisionEvent) + 'static) {
        self.on_subdivision = Some(Box::new(f));
    }
    pub fn set_on_fill(&mut self, f: impl FnMut(FillEvent) + 'static) {
        self.on_fill = Some(Box::new(f));
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_index
    }

    pub fn tempo_bpm(&self) -> f32 {
        self.tempo.bpm()
    }

    pub fn phase_primary(&self) -> f32 {
        self.polymetric.phase_primary()
    }

    pub fn phase_overlay(&self) -> f32 {
        self.polymetric.phase_overlay()
    }

    pub fn phase_16th(&self) -> f32 {
        self.polymetric.phase_16th()
    }

    /// Feeds mono PCM samples into the frame assembler, running the full
    /// analysis pipeline once per hop.
    pub fn process_audio(&mut self, samples: &[f32]) {
        let frame_size = self.ring.len();
        if frame_size == 0 {
            return;
        }
        for &s in samples {
            self.ring[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % frame_size;
            self.filled = (self.filled + 1).min(frame_size);
            self.samples_since_hop += 1;

            if self.samples_since_hop >= self.config.spectral.hop_size && self.filled >= frame_size
            {
                self.assemble_frame();
                self.process_frame();
                self.samples_since_hop = 0;
            }
        }
    }

    fn assemble_frame(&mut self) {
        let n = self.ring.len();
        for i in 0..n {
            self.frame_scratch[i] = self.ring[(self.write_pos + i) % n];
        }
    }

    fn process_frame(&mut self) {
        let timestamp_ms = self.frame_index as f32 * self.config.spectral.hop_size as f32
            * 1000.0
            / self.config.spectral.sample_rate_hz;

        self.spectral.analyze(&self.frame_scratch, &mut self.spectrum_scratch);
        let (novelty, band) = self.onset.process(&self.spectrum_scratch);

        if let Some(onset_event) = self.peak.process(novelty, self.frame_index, timestamp_ms) {
            if let Some(cb) = self.on_onset.as_mut() {
                cb(onset_event);
            }

            // Route to whichever band dominated this frame's novelty, not
            // all three independently; ties favor bass, then mid.
            let ev = BandOnsetEvent {
                frame_index: self.frame_index,
                timestamp_ms,
                confidence: 0.0,
            };
            if band.bass >= band.mid && band.bass >= band.high {
                self.particles.on_onset_bass(band.bass, timestamp_ms);
                if let Some(cb) = self.on_onset_bass.as_mut() {
                    cb(BandOnsetEvent { confidence: band.bass, ..ev });
                }
            } else if band.mid >= band.high {
                self.particles.on_onset_mid(band.mid, timestamp_ms);
                if let Some(cb) = self.on_onset_mid.as_mut() {
                    cb(BandOnsetEvent { confidence: band.mid, ..ev });
                }
            } else {
                self.particles.on_onset_high(band.high, timestamp_ms);
                if let Some(cb) = self.on_onset_high.as_mut() {
                    cb(BandOnsetEvent { confidence: band.high, ..ev });
                }
            }
        }

        let beat = self.tempo.process(novelty, self.frame_index, timestamp_ms);

        let poly_outputs = if let Some(beat_event) = beat {
            self.beat_since_last_render = true;
            if (beat_event.bpm - self.last_tempo_bpm).abs() > 1.0 {
                self.last_tempo_bpm = beat_event.bpm;
                if let Some(cb) = self.on_tempo_change.as_mut() {
                    cb(beat_event.bpm);
                }
            }
            if let Some(cb) = self.on_beat.as_mut() {
                cb(beat_event);
            }
            self.particles.on_beat(
                self.polymetric.phase_primary(),
                self.polymetric.phase_overlay(),
            );
            self.polymetric.on_beat(beat_event.bpm, timestamp_ms)
        } else {
            self.polymetric.update(timestamp_ms)
        };

        if let Some((p4, p7)) = poly_outputs.beat {
            if let Some(cb) = self.on_polymetric_beat.as_mut() {
                cb(p4, p7);
            }
        }
        for sub in poly_outputs.subdivisions {
            self.particles.on_subdivision(sub.kind, sub.swing_offset);
            if let Some(cb) = self.on_subdivision.as_mut() {
                cb(sub);
            }
        }
        if let Some(fill) = poly_outputs.fill {
            self.particles.on_fill(fill.starting, fill.density);
            if let Some(cb) = self.on_fill.as_mut() {
                cb(fill);
            }
        }

        self.frame_index += 1;
    }

    /// Renders one frame at wall-clock time `now_ms`. Derives `dt` from the
    /// gap since the previous call, clamped to `[0, 0.1]` seconds (a `1/60`s
    /// default on the very first call). Clears the buffer if a beat
    /// occurred since the last render and `clear_on_beat` is set; otherwise
    /// fades its existing contents. Composites particles on top either way.
    pub fn render(&mut self, pixels: &mut [(u8, u8, u8)], now_ms: f32) {
        let dt = match self.last_render_ms {
            Some(last) => ((now_ms - last) / 1000.0).clamp(0.0, 0.1),
            None => 1.0 / 60.0,
        };
        self.last_render_ms = Some(now_ms);

        if self.config.render.clear_on_beat && self.beat_since_last_render {
            for p in pixels.iter_mut() {
                *p = (0, 0, 0);
            }
        } else if self.config.render.background_fade < 255 {
            let fade = self.config.render.background_fade as f32 / 255.0;
            for p in pixels.iter_mut() {
                p.0 = (p.0 as f32 * fade) as u8;
                p.1 = (p.1 as f32 * fade) as u8;
                p.2 = (p.2 as f32 * fade) as u8;
            }
        }
        self.beat_since_last_render = false;

        self.particles.update(dt);
        self.particles.render(
            pixels,
            self.config.particles.grid_width,
            self.config.particles.grid_height,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_rejects_invalid_config() {
        let mut cfg = CoreConfig::default();
        cfg.spectral.frame_size = 100;
        assert!(Orchestrator::new(cfg).is_err());
    }

    #[test]
    fn streaming_silence_produces_no_onsets() {
        let cfg = CoreConfig::default();
        let mut core = Orchestrator::new(cfg).unwrap();
        let onset_count = std::rc::Rc::new(std::cell::RefCell::new(0u32));
        let counter = onset_count.clone();
        core.set_on_onset(move |_| {
            *counter.borrow_mut() += 1;
        });
        let silence = vec![0.0f32; 44_100];
        core.process_audio(&silence);
        assert_eq!(*onset_count.borrow(), 0);
    }

    #[test]
    fn render_into_empty_buffer_is_noop() {
        let cfg = CoreConfig::default();
        let mut core = Orchestrator::new(cfg).unwrap();
        let mut pixels: Vec<(u8, u8, u8)> = vec![];
        core.render(&mut pixels, 16.7);
    }

    #[test]
    fn render_clears_on_beat_when_configured() {
        let mut cfg = CoreConfig::default();
        cfg.render.clear_on_beat = true;
        cfg.render.background_fade = 255;
        let mut core = Orchestrator::new(cfg).unwrap();
        let mut pixels = vec![(200, 200, 200); 4];
        core.beat_since_last_render = true;
        core.render(&mut pixels, 0.0);
        assert!(pixels.iter().all(|&(r, g, b)| r == 0 && g == 0 && b == 0));
    }

    #[test]
    fn render_dt_is_clamped_and_defaults_on_first_call() {
        let cfg = CoreConfig::default();
        let mut core = Orchestrator::new(cfg).unwrap();
        let mut pixels = vec![(0, 0, 0); 4];
        core.render(&mut pixels, 1000.0);
        assert_eq!(core.last_render_ms, Some(1000.0));
        core.render(&mut pixels, 1000.0 + 5000.0);
        assert_eq!(core.last_render_ms, Some(6000.0));
    }

    #[test]
    fn reset_zeroes_frame_count() {
        let cfg = CoreConfig::default();
        let mut core = Orchestrator::new(cfg).unwrap();
        let burst: Vec<f32> = (0..2000).map(|i| (i as f32 * 0.1).sin()).collect();
        core.process_audio(&burst);
        assert!(core.frame_count() > 0);
        core.reset();
        assert_eq!(core.frame_count(), 0);
    }

    #[test]
    fn kick_impulse_eventually_produces_an_onset() {
        let cfg = CoreConfig::default();
        let mut core = Orchestrator::new(cfg).unwrap();
        let onsets = std::rc::Rc::new(std::cell::RefCell::new(0u32));
        let counter = onsets.clone();
        core.set_on_onset(move |_| {
            *counter.borrow_mut() += 1;
        });

        let silence = vec![0.0f32; 4096];
        core.process_audio(&silence);

        let mut burst = vec![0.0f32; 4096];
        for (i, s) in burst.iter_mut().enumerate() {
            *s = (1.0 - i as f32 / 4096.0) * (i as f32 * 0.8).sin();
        }
        core.process_audio(&burst);
        core.process_audio(&silence);

        assert!(*onsets.borrow() >= 1);
    }
}
