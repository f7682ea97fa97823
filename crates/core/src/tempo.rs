//! Tempo estimation: windowed FFT-based autocorrelation, comb-filter
//! harmonic reinforcement, Rayleigh-prior weighting, octave disambiguation,
//! and drift-free beat-phase prediction.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{num_complex::Complex32, Fft, FftPlanner};

use crate::config::TempoConfig;
use crate::events::BeatEvent;

fn bpm_to_lag_frames(bpm: f32, sample_rate_hz: f32, hop_size: usize) -> f32 {
    (60.0 * sample_rate_hz) / (bpm * hop_size as f32)
}

fn lag_frames_to_bpm(lag: f32, sample_rate_hz: f32, hop_size: usize) -> f32 {
    (60.0 * sample_rate_hz) / (lag * hop_size as f32)
}

/// Log-Gaussian prior centered on a target BPM, standing in for the
/// reference source's Rayleigh weighting (both are unimodal priors that
/// favor a musically plausible tempo over its octave-errors).
fn rayleigh_tempo_weight(bpm: f32, center_bpm: f32) -> f32 {
    const SIGMA_LOG: f32 = 0.35;
    let d = (bpm.max(1e-3).ln() - center_bpm.max(1e-3).ln()) / SIGMA_LOG;
    (-0.5 * d * d).exp()
}

pub struct TempoTracker {
    config: TempoConfig,
    sample_rate_hz: f32,
    hop_size: usize,

    novelty_history: VecDeque<f32>,
    window_frames: usize,
    reestimate_interval_frames: usize,
    frames_since_reestimate: usize,

    current_bpm: f32,
    current_confidence: f32,
    beat_period_samples: f64,
    last_beat_time_samples: Option<f64>,

    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    fft_len: usize,
}

impl TempoTracker {
    pub fn new(config: TempoConfig, sample_rate_hz: f32, hop_size: usize) -> Self {
        let window_frames =
            ((config.acf_window_sec * sample_rate_hz) / hop_size as f32).round() as usize;
        let window_frames = window_frames.max(8);
        let fft_len = (2 * window_frames).next_power_of_two();
        let mut planner = FftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(fft_len);
        let fft_inverse = planner.plan_fft_inverse(fft_len);
        let reestimate_interval_frames =
            ((0.5 * sample_rate_hz) / hop_size as f32).round().max(1.0) as usize;

        Self {
            config,
            sample_rate_hz,
            hop_size,
            novelty_history: VecDeque::with_capacity(window_frames),
            window_frames,
            reestimate_interval_frames,
            frames_since_reestimate: 0,
            current_bpm: 120.0,
            current_confidence: 0.0,
            // Zero/unset until `reestimate` produces a valid peak; `check_beat`
            // refuses to emit while this is <= 0, so beats never fire before
            // one successful estimation cycle (or on all-zero input, which
            // never produces a positive comb-filter score).
            beat_period_samples: 0.0,
            last_beat_time_samples: None,
            fft_forward,
            fft_inverse,
            fft_len,
        }
    }

    pub fn config(&self) -> &TempoConfig {
        &self.config
    }

    pub fn bpm(&self) -> f32 {
        self.current_bpm
    }

    pub fn confidence(&self) -> f32 {
        self.current_confidence
    }

    pub fn reset(&mut self) {
        self.novelty_history.clear();
        self.frames_since_reestimate = 0;
        self.current_bpm = self.config.rayleigh_center_bpm;
        self.current_confidence = 0.0;
        self.beat_period_samples = 0.0;
        self.last_beat_time_samples = None;
    }

    /// Feeds one novelty value, periodically re-estimating tempo and
    /// checking whether "now" crosses a predicted beat boundary.
    pub fn process(&mut self, novelty: f32, frame_index: u64, timestamp_ms: f32) -> Option<BeatEvent> {
        self.novelty_history.push_back(novelty);
        if self.novelty_history.len() > self.window_frames {
            self.novelty_history.pop_front();
        }

        self.frames_since_reestimate += 1;
        if self.frames_since_reestimate >= self.reestimate_interval_frames
            && self.novelty_history.len() >= self.window_frames / 2
        {
            self.reestimate();
            self.frames_since_reestimate = 0;
        }

        let current_time_samples = frame_index as f64 * self.hop_size as f64;
        self.check_beat(current_time_samples, frame_index, timestamp_ms)
    }

    fn check_beat(
        &mut self,
        current_time_samples: f64,
        frame_index: u64,
        timestamp_ms: f32,
    ) -> Option<BeatEvent> {
        if self.beat_period_samples <= 0.0 {
            // No successful tempo estimation cycle yet; nothing to predict from.
            return None;
        }

        let last = match self.last_beat_time_samples {
            Some(t) => t,
            None => {
                // warm-up: anchor the very first beat to "now" so the
                // predictor has a reference point to advance from.
                self.last_beat_time_samples = Some(current_time_samples);
                return None;
            }
        };

        if current_time_samples - last < self.beat_period_samples {
            return None;
        }

        // Advance by the fixed beat period rather than snapping to the
        // current elapsed time, so successive beats do not drift under
        // per-frame jitter in when this function happens to be called.
        self.last_beat_time_samples = Some(last + self.beat_period_samples);

        Some(BeatEvent {
            frame_index,
            timestamp_ms,
            bpm: self.current_bpm,
            confidence: self.current_confidence,
            phase_in_bar: 0.0,
        })
    }

    fn reestimate(&mut self) {
        let signal: Vec<f32> = self.novelty_history.iter().copied().collect();
        let n = signal.len();
        let mean: f32 = signal.iter().sum::<f32>() / n as f32;

        let mut buf = vec![Complex32::new(0.0, 0.0); self.fft_len];
        for (i, &s) in signal.iter().enumerate() {
            buf[i] = Complex32::new(s - mean, 0.0);
        }
        self.fft_forward.process(&mut buf);
        for c in buf.iter_mut() {
            *c = Complex32::new(c.norm_sqr(), 0.0);
        }
        self.fft_inverse.process(&mut buf);

        let acf: Vec<f32> = buf[..n].iter().map(|c| c.re / self.fft_len as f32).collect();
        let acf0 = acf.first().copied().unwrap_or(1.0).max(1e-6);

        let min_lag = bpm_to_lag_frames(self.config.max_bpm, self.sample_rate_hz, self.hop_size)
            .floor()
            .max(1.0) as usize;
        let max_lag = bpm_to_lag_frames(self.config.min_bpm, self.sample_rate_hz, self.hop_size)
            .ceil()
            .min((n - 1) as f32) as usize;
        if max_lag <= min_lag {
            return;
        }

        let comb = |lag: usize| -> f32 {
            let mut sum = 0.0;
            let mut count = 0;
            let mut harmonic = 1usize;
            loop {
                let l = lag * harmonic;
                if l >= acf.len() {
                    break;
                }
                sum += acf[l] / acf0;
                count += 1;
                harmonic += 1;
                if harmonic > 4 {
                    break;
                }
            }
            if count == 0 {
                0.0
            } else {
                sum / count as f32
            }
        };

        let mut best_lag = min_lag;
        let mut best_score = f32::MIN;
        for lag in min_lag..=max_lag {
            let bpm = lag_frames_to_bpm(lag as f32, self.sample_rate_hz, self.hop_size);
            let score = comb(lag) * rayleigh_tempo_weight(bpm, self.config.rayleigh_center_bpm);
            if score > best_score {
                best_score = score;
                best_lag = lag;
            }
        }

        let (best_lag_f, best_score) =
            self.resolve_octave_ambiguity(best_lag, best_score, &acf, acf0, &comb);

        if best_score <= 0.0 {
            // No genuine peak in the comb-filtered autocorrelation (e.g.
            // silence or noise); leave the tracker gated rather than commit
            // a meaningless period.
            return;
        }

        let bpm = lag_frames_to_bpm(best_lag_f, self.sample_rate_hz, self.hop_size)
            .clamp(self.config.min_bpm, self.config.max_bpm);

        self.current_bpm = bpm;
        self.current_confidence = best_score.min(1.0);
        self.beat_period_samples = 60.0 / bpm as f64 * self.sample_rate_hz as f64;

        log::debug!(
            "tempo re-estimate: {:.1} bpm, confidence {:.2}",
            self.current_bpm,
            self.current_confidence
        );
    }

    /// Compares the chosen lag against its harmonic/subharmonic ratios
    /// (2x, 0.5x, 1.5x, 0.667x) and keeps whichever scores highest,
    /// correcting common octave errors in beat tracking.
    fn resolve_octave_ambiguity(
        &self,
        lag: usize,
        score: f32,
        acf: &[f32],
        acf0: f32,
        comb: &impl Fn(usize) -> f32,
    ) -> (f32, f32) {
        let ratios = [1.0f32, 2.0, 0.5, 1.5, 2.0 / 3.0];
        let mut best_lag = lag as f32;
        let mut best_score = score;
        for &r in &ratios {
            let candidate_lag = (lag as f32 * r).round();
            if candidate_lag < 1.0 || candidate_lag as usize >= acf.len() {
                continue;
            }
            let bpm = lag_frames_to_bpm(candidate_lag, self.sample_rate_hz, self.hop_size);
            if bpm < self.config.min_bpm || bpm > self.config.max_bpm {
                continue;
            }
            let candidate_score =
                comb(candidate_lag as usize) * rayleigh_tempo_weight(bpm, self.config.rayleigh_center_bpm);
            let _ = acf0;
            if candidate_score > best_score {
                best_score = candidate_score;
                best_lag = candidate_lag;
            }
        }
        (best_lag, best_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metronome_novelty(frames: usize, period_frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| if i % period_frames == 0 { 1.0 } else { 0.0 })
            .collect()
    }

    #[test]
    fn warm_up_returns_default_bpm_and_no_beats() {
        let tracker = TempoTracker::new(TempoConfig::default(), 1000.0, 10);
        assert_eq!(tracker.bpm(), 120.0);
        assert_eq!(tracker.confidence(), 0.0);
    }

    #[test]
    fn rayleigh_weight_peaks_at_center() {
        let at_center = rayleigh_tempo_weight(120.0, 120.0);
        let away = rayleigh_tempo_weight(60.0, 120.0);
        assert!(at_center > away);
        assert!((at_center - 1.0).abs() < 1e-6);
    }

    #[test]
    fn locks_onto_metronome_period() {
        let cfg = TempoConfig {
            min_bpm: 60.0,
            max_bpm: 200.0,
            rayleigh_center_bpm: 120.0,
            acf_window_sec: 2.0,
            ..TempoConfig::default()
        };
        // 100 Hz frame rate, beat every 50 frames -> 120 BPM.
        let sample_rate = 1000.0;
        let hop = 10.0;
        let mut tracker = TempoTracker::new(cfg, sample_rate, hop as usize);
        let novelty = metronome_novelty(400, 50);
        let mut frame_index = 0u64;
        for (i, &n) in novelty.iter().enumerate() {
            tracker.process(n, i as u64, i as f32);
            frame_index = i as u64;
        }
        let _ = frame_index;
        assert!((tracker.bpm() - 120.0).abs() < 30.0);
    }

    #[test]
    fn beat_period_advances_by_fixed_increment_not_elapsed_time() {
        let mut tracker = TempoTracker::new(TempoConfig::default(), 1000.0, 10);
        tracker.current_bpm = 120.0;
        tracker.beat_period_samples = 500.0; // 0.5s at 1000Hz
        tracker.last_beat_time_samples = Some(0.0);

        let b1 = tracker.check_beat(500.0, 50, 500.0);
        assert!(b1.is_some());
        assert_eq!(tracker.last_beat_time_samples, Some(500.0));

        // Even though "now" jitters ahead of the exact boundary, the
        // tracker advances by a fixed period rather than snapping to it.
        let b2 = tracker.check_beat(1010.0, 101, 1010.0);
        assert!(b2.is_some());
        assert_eq!(tracker.last_beat_time_samples, Some(1000.0));
    }

    #[test]
    fn reset_restores_defaults() {
        let mut tracker = TempoTracker::new(TempoConfig::default(), 1000.0, 10);
        tracker.current_bpm = 90.0;
        tracker.last_beat_time_samples = Some(123.0);
        tracker.reset();
        assert!(tracker.last_beat_time_samples.is_none());
        assert_eq!(tracker.confidence(), 0.0);
    }
}
