//! Tracks a primary 4/4 meter and an arbitrary N/M overlay meter spanning
//! K bars, detects subdivision boundaries, and flags fill sections where
//! the two meters' phases diverge.

use crate::config::PolymetricConfig;
use crate::events::{FillEvent, SubdivisionEvent, SubdivisionKind};

#[derive(Debug, Default)]
pub struct PolymetricOutputs {
    /// Present on every beat: the `(phase_primary, phase_overlay)` pair at
    /// the moment of the beat.
    pub beat: Option<(f32, f32)>,
    pub subdivisions: Vec<SubdivisionEvent>,
    pub fill: Option<FillEvent>,
}

pub struct PolymetricAnalyzer {
    config: PolymetricConfig,

    phase_primary: f32,
    phase_overlay: f32,
    phase_16th: f32,
    last_phase_16th: f32,
    last_phase_triplet: f32,
    last_phase_quintuplet: f32,

    current_bpm: f32,
    beat_period_ms: f32,
    last_beat_time_ms: f32,

    in_fill: bool,
    fill_density: f32,
}

impl PolymetricAnalyzer {
    pub fn new(config: PolymetricConfig) -> Self {
        Self {
            config,
            phase_primary: 0.0,
            phase_overlay: 0.0,
            phase_16th: 0.0,
            last_phase_16th: 0.0,
            last_phase_triplet: 0.0,
            last_phase_quintuplet: 0.0,
            current_bpm: 120.0,
            beat_period_ms: 500.0,
            last_beat_time_ms: 0.0,
            in_fill: false,
            fill_density: 0.0,
        }
    }

    pub fn config(&self) -> &PolymetricConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PolymetricConfig) {
        self.config = config;
    }

    pub fn reset(&mut self) {
        self.phase_primary = 0.0;
        self.phase_overlay = 0.0;
        self.phase_16th = 0.0;
        self.last_phase_16th = 0.0;
        self.last_phase_triplet = 0.0;
        self.last_phase_quintuplet = 0.0;
        self.in_fill = false;
        self.fill_density = 0.0;
    }

    pub fn phase_primary(&self) -> f32 {
        self.phase_primary
    }

    pub fn phase_overlay(&self) -> f32 {
        self.phase_overlay
    }

    pub fn phase_16th(&self) -> f32 {
        self.phase_16th
    }

    pub fn is_in_fill(&self) -> bool {
        self.in_fill
    }

    pub fn swing_offset(&self) -> f32 {
        self.calculate_swing_offset(self.phase_16th)
    }

    fn calculate_swing_offset(&self, phase_16th: f32) -> f32 {
        let sixteenth_index = (phase_16th * 4.0) as u32 % 4;
        if sixteenth_index % 2 == 1 {
            self.config.swing_amount
        } else {
            0.0
        }
    }

    /// Called on every tracked beat: resets the primary phase and advances
    /// the overlay phase by `overlay_numerator / (overlay_bars * 4)`.
    pub fn on_beat(&mut self, bpm: f32, timestamp_ms: f32) -> PolymetricOutputs {
        self.current_bpm = bpm.max(1.0);
        self.beat_period_ms = 60_000.0 / self.current_bpm;
        self.last_beat_time_ms = timestamp_ms;

        self.phase_primary = 0.0;
        if self.config.enabled {
            let increment = self.config.overlay_numerator as f32
                / (self.config.overlay_bars as f32 * 4.0);
            self.phase_overlay = (self.phase_overlay + increment).rem_euclid(1.0);
        }

        self.phase_16th = 0.0;
        self.last_phase_16th = 0.0;

        let mut outputs = PolymetricOutputs {
            beat: Some((self.phase_primary, self.phase_overlay)),
            ..Default::default()
        };
        self.detect_fills(&mut outputs);
        outputs
    }

    /// Called on every analysis frame between beats: advances the primary
    /// phase proportionally to elapsed time and detects subdivision and
    /// fill boundary crossings.
    pub fn update(&mut self, timestamp_ms: f32) -> PolymetricOutputs {
        let elapsed = timestamp_ms - self.last_beat_time_ms;
        if self.beat_period_ms > 0.0 {
            self.phase_primary = (elapsed / self.beat_period_ms).rem_euclid(1.0);
        }

        let mut outputs = PolymetricOutputs::default();
        self.detect_subdivisions(&mut outputs);
        self.detect_fills(&mut outputs);
        outputs
    }

    fn detect_subdivisions(&mut self, outputs: &mut PolymetricOutputs) {
        self.phase_16th = (4.0 * self.phase_primary).rem_euclid(1.0);

        if self.phase_16th < self.last_phase_16th {
            let swing_offset = self.calculate_swing_offset(self.last_phase_16th);
            outputs.subdivisions.push(SubdivisionEvent {
                kind: SubdivisionKind::Sixteenth,
                swing_offset,
            });

            // Every 4th sixteenth wrap is an eighth-note boundary pair
            // collapsing to a quarter; emit the coarser kinds on their
            // natural subdivisions of the primary phase too.
            let eighth_phase = (2.0 * self.phase_primary).rem_euclid(1.0);
            if eighth_phase < 0.25 {
                outputs.subdivisions.push(SubdivisionEvent {
                    kind: SubdivisionKind::Eighth,
                    swing_offset: 0.0,
                });
            }
        }
        self.last_phase_16th = self.phase_16th;

        if self.config.enable_tuplet_detection {
            let triplet_phase = (3.0 * self.phase_primary).rem_euclid(1.0);
            if triplet_phase < self.last_phase_triplet {
                outputs.subdivisions.push(SubdivisionEvent {
                    kind: SubdivisionKind::Triplet,
                    swing_offset: 0.0,
                });
            }
            self.last_phase_triplet = triplet_phase;

            let quintuplet_phase = (5.0 * self.phase_primary).rem_euclid(1.0);
            if quintuplet_phase < self.last_phase_quintuplet {
                outputs.subdivisions.push(SubdivisionEvent {
                    kind: SubdivisionKind::Quintuplet,
                    swing_offset: 0.0,
                });
            }
            self.last_phase_quintuplet = quintuplet_phase;
        }
    }

    fn detect_fills(&mut self, outputs: &mut PolymetricOutputs) {
        if !self.config.enabled {
            return;
        }
        let divergence = (self.phase_primary - self.phase_overlay).abs();

        if !self.in_fill && divergence > self.config.fill_enter_threshold {
            self.in_fill = true;
            self.fill_density = divergence;
            outputs.fill = Some(FillEvent {
                starting: true,
                density: self.fill_density,
            });
        } else if self.in_fill && divergence < self.config.fill_exit_threshold {
            self.in_fill = false;
            outputs.fill = Some(FillEvent {
                starting: false,
                density: self.fill_density,
            });
            self.fill_density = 0.0;
        } else if self.in_fill {
            self.fill_density = divergence;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_beat_resets_primary_phase_and_advances_overlay() {
        let mut analyzer = PolymetricAnalyzer::new(PolymetricConfig::default());
        let out1 = analyzer.on_beat(120.0, 0.0);
        assert_eq!(out1.beat.unwrap().0, 0.0);
        let overlay_after_one = analyzer.phase_overlay();
        assert!(overlay_after_one > 0.0);

        analyzer.on_beat(120.0, 500.0);
        let overlay_after_two = analyzer.phase_overlay();
        assert_ne!(overlay_after_one, overlay_after_two);
    }

    #[test]
    fn overlay_phase_wraps_within_unit_interval() {
        let mut analyzer = PolymetricAnalyzer::new(PolymetricConfig::default());
        for i in 0..40 {
            analyzer.on_beat(120.0, i as f32 * 500.0);
            assert!((0.0..1.0).contains(&analyzer.phase_overlay()));
        }
    }

    #[test]
    fn sixteenth_subdivision_fires_on_wrap() {
        let mut analyzer = PolymetricAnalyzer::new(PolymetricConfig::default());
        analyzer.on_beat(120.0, 0.0);
        let mut fired = false;
        for i in 1..=10 {
            let ts = i as f32 * 50.0; // 500ms beat period, sweep through it
            let out = analyzer.update(ts);
            if out
                .subdivisions
                .iter()
                .any(|s| s.kind == SubdivisionKind::Sixteenth)
            {
                fired = true;
            }
        }
        assert!(fired);
    }

    #[test]
    fn fill_detection_hysteresis() {
        let mut cfg = PolymetricConfig::default();
        cfg.fill_enter_threshold = 0.3;
        cfg.fill_exit_threshold = 0.1;
        let mut analyzer = PolymetricAnalyzer::new(cfg);
        analyzer.phase_primary = 0.9;
        analyzer.phase_overlay = 0.1;
        let mut out = PolymetricOutputs::default();
        analyzer.detect_fills(&mut out);
        assert!(out.fill.unwrap().starting);
        assert!(analyzer.is_in_fill());
    }

    #[test]
    fn swing_applies_only_to_odd_sixteenths() {
        let mut cfg = PolymetricConfig::default();
        cfg.swing_amount = 0.2;
        let analyzer = PolymetricAnalyzer::new(cfg);
        assert_eq!(analyzer.calculate_swing_offset(0.0), 0.0);
        assert_eq!(analyzer.calculate_swing_offset(0.3), 0.2);
    }

    #[test]
    fn reset_clears_fill_and_phase_state() {
        let mut analyzer = PolymetricAnalyzer::new(PolymetricConfig::default());
        analyzer.on_beat(120.0, 0.0);
        analyzer.in_fill = true;
        analyzer.reset();
        assert_eq!(analyzer.phase_primary(), 0.0);
        assert!(!analyzer.is_in_fill());
    }
}
