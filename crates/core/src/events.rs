use serde::{Deserialize, Serialize};

/// A detected onset: a moment where new energy enters the signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetEvent {
    pub frame_index: u64,
    pub timestamp_ms: f32,
    pub confidence: f32,
}

/// A per-band onset, routed separately for bass/mid/high-triggered effects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandOnsetEvent {
    pub frame_index: u64,
    pub timestamp_ms: f32,
    pub confidence: f32,
}

/// A tracked beat: the tempo tracker's belief that "now" is a beat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub frame_index: u64,
    pub timestamp_ms: f32,
    pub bpm: f32,
    pub confidence: f32,
    pub phase_in_bar: f32,
}

/// Rhythmic subdivisions the polymetric analyzer can mark between beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubdivisionKind {
    Quarter,
    Eighth,
    Sixteenth,
    Triplet,
    Quintuplet,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubdivisionEvent {
    pub kind: SubdivisionKind,
    pub swing_offset: f32,
}

/// A fill section boundary, detected from primary/overlay phase divergence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub starting: bool,
    pub density: f32,
}
