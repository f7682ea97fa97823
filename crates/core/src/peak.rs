//! Adaptive-threshold peak picking over a novelty stream.
//!
//! Peaks are evaluated at a delayed center index so that the post-max and
//! post-avg windows can look forward from "now" into already-buffered
//! history, matching the reference source's ring-buffer design.

use std::collections::VecDeque;

use crate::config::{PeakPickerConfig, PeakPolicy};
use crate::events::OnsetEvent;

#[derive(Debug, Clone, Copy)]
struct Sample {
    novelty: f32,
    frame_index: u64,
    timestamp_ms: f32,
}

pub struct PeakPicker {
    config: PeakPickerConfig,
    pre_max: usize,
    post_max: usize,
    pre_avg: usize,
    post_avg: usize,
    min_inter_onset_frames: u64,
    ring: VecDeque<Sample>,
    last_onset_frame: Option<u64>,
}

fn ms_to_frames(ms: f32, sample_rate_hz: f32, hop_size: usize) -> usize {
    ((ms / 1000.0) * sample_rate_hz / hop_size as f32).round().max(0.0) as usize
}

impl PeakPicker {
    pub fn new(config: PeakPickerConfig, sample_rate_hz: f32, hop_size: usize) -> Self {
        let pre_max = ms_to_frames(config.pre_max_ms, sample_rate_hz, hop_size).max(1);
        let post_max = ms_to_frames(config.post_max_ms, sample_rate_hz, hop_size).max(1);
        let pre_avg = ms_to_frames(config.pre_avg_ms, sample_rate_hz, hop_size).max(1);
        let post_avg = ms_to_frames(config.post_avg_ms, sample_rate_hz, hop_size).max(1);
        let min_inter_onset_frames =
            ms_to_frames(config.min_inter_onset_ms, sample_rate_hz, hop_size) as u64;
        let capacity = pre_max.max(pre_avg) + post_max.max(post_avg) + 1;
        Self {
            config,
            pre_max,
            post_max,
            pre_avg,
            post_avg,
            min_inter_onset_frames,
            ring: VecDeque::with_capacity(capacity),
            last_onset_frame: None,
        }
    }

    pub fn config(&self) -> &PeakPickerConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.last_onset_frame = None;
    }

    /// Feeds one novelty value into the ring; may emit an onset for a
    /// frame `post_max` samples in the past once enough history exists.
    pub fn process(
        &mut self,
        novelty: f32,
        frame_index: u64,
        timestamp_ms: f32,
    ) -> Option<OnsetEvent> {
        let capacity = self.ring.capacity().max(1);
        self.ring.push_back(Sample {
            novelty,
            frame_index,
            timestamp_ms,
        });
        if self.ring.len() > capacity {
            self.ring.pop_front();
        }

        let needed = self.pre_max.max(self.pre_avg) + self.post_max.max(self.post_avg) + 1;
        if self.ring.len() < needed {
            return None; // warm-up: not enough history yet
        }

        let center_idx = self.ring.len() - self.post_max.max(self.post_avg) - 1;
        let center = self.ring[center_idx];

        if self.config.policy == PeakPolicy::SuperFluxPeaks {
            if let Some(last) = self.last_onset_frame {
                if center.frame_index.saturating_sub(last) < self.min_inter_onset_frames {
                    return None;
                }
            }
        }

        let is_peak = match self.config.policy {
            PeakPolicy::LocalMaximum => self.is_local_maximum(center_idx),
            PeakPolicy::AdaptiveThreshold => {
                self.is_local_maximum(center_idx) && self.meets_adaptive_threshold(center_idx, center)
            }
            PeakPolicy::SuperFluxPeaks => {
                self.is_local_maximum(center_idx) && self.meets_adaptive_threshold(center_idx, center)
            }
        };

        if !is_peak || center.novelty <= 0.0 {
            return None;
        }

        self.last_onset_frame = Some(center.frame_index);
        Some(OnsetEvent {
            frame_index: center.frame_index,
            timestamp_ms: center.timestamp_ms,
            confidence: center.novelty,
        })
    }

    fn is_local_maximum(&self, center_idx: usize) -> bool {
        let lo = center_idx.saturating_sub(self.pre_max);
        let hi = (center_idx + self.post_max + 1).min(self.ring.len());
        let center_val = self.ring[center_idx].novelty;
        self.ring
            .iter()
            .skip(lo)
            .take(hi - lo)
            .all(|s| s.novelty <= center_val)
    }

    fn meets_adaptive_threshold(&self, center_idx: usize, center: Sample) -> bool {
        let lo = center_idx.saturating_sub(self.pre_avg);
        let hi = (center_idx + self.post_avg + 1).min(self.ring.len());
        let window: Vec<f32> = self.ring.iter().skip(lo).take(hi - lo).map(|s| s.novelty).collect();
        let mean = window.iter().sum::<f32>() / window.len().max(1) as f32;
        center.novelty >= mean + self.config.threshold_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(picker: &mut PeakPicker, values: &[f32]) -> Vec<OnsetEvent> {
        values
            .iter()
            .enumerate()
            .filter_map(|(i, &v)| picker.process(v, i as u64, i as f32 * 5.0))
            .collect()
    }

    #[test]
    fn no_events_during_warmup() {
        let cfg = PeakPickerConfig {
            pre_max_ms: 10.0,
            post_max_ms: 10.0,
            pre_avg_ms: 10.0,
            post_avg_ms: 10.0,
            ..PeakPickerConfig::default()
        };
        let mut picker = PeakPicker::new(cfg, 1000.0, 5);
        let events = feed(&mut picker, &[0.0, 0.0]);
        assert!(events.is_empty());
    }

    #[test]
    fn detects_isolated_spike() {
        let cfg = PeakPickerConfig {
            policy: PeakPolicy::LocalMaximum,
            pre_max_ms: 20.0,
            post_max_ms: 20.0,
            pre_avg_ms: 20.0,
            post_avg_ms: 20.0,
            min_inter_onset_ms: 0.0,
            ..PeakPickerConfig::default()
        };
        let mut picker = PeakPicker::new(cfg, 1000.0, 10);
        let mut values = vec![0.0f32; 30];
        values[15] = 1.0;
        let events = feed(&mut picker, &values);
        assert!(events.iter().any(|e| e.frame_index == 15));
    }

    #[test]
    fn respects_minimum_inter_onset_gap() {
        let cfg = PeakPickerConfig {
            policy: PeakPolicy::SuperFluxPeaks,
            pre_max_ms: 5.0,
            post_max_ms: 5.0,
            pre_avg_ms: 5.0,
            post_avg_ms: 5.0,
            min_inter_onset_ms: 1000.0,
            ..PeakPickerConfig::default()
        };
        let mut picker = PeakPicker::new(cfg, 1000.0, 10);
        let mut values = vec![0.0f32; 40];
        values[10] = 1.0;
        values[12] = 1.0;
        let events = feed(&mut picker, &values);
        assert!(events.len() <= 1);
    }

    #[test]
    fn gap_is_not_enforced_outside_super_flux_peaks_policy() {
        let cfg = PeakPickerConfig {
            policy: PeakPolicy::LocalMaximum,
            pre_max_ms: 5.0,
            post_max_ms: 5.0,
            pre_avg_ms: 5.0,
            post_avg_ms: 5.0,
            min_inter_onset_ms: 1000.0,
            ..PeakPickerConfig::default()
        };
        let mut picker = PeakPicker::new(cfg, 1000.0, 10);
        let mut values = vec![0.0f32; 40];
        values[10] = 1.0;
        values[12] = 1.0;
        let events = feed(&mut picker, &values);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn reset_clears_history() {
        let cfg = PeakPickerConfig::default();
        let mut picker = PeakPicker::new(cfg, 1000.0, 10);
        picker.process(1.0, 0, 0.0);
        picker.reset();
        assert!(picker.ring.is_empty());
        assert!(picker.last_onset_frame.is_none());
    }
}
