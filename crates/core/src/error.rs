use thiserror::Error;

/// Errors surfaced by fallible construction and configuration paths.
///
/// Only `config-invalid` conditions are represented here. `warm-up`,
/// `capacity-exhausted`, and `null-buffer` are not errors: they are
/// handled in-band as neutral defaults or silent no-ops by the
/// components that encounter them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("frame_size must be a power of two, got {0}")]
    InvalidFrameSize(usize),

    #[error("hop_size ({hop_size}) must be nonzero and <= frame_size ({frame_size})")]
    InvalidHopSize { hop_size: usize, frame_size: usize },

    #[error("invalid frequency band [{low_hz}, {high_hz}) with weight {weight}")]
    InvalidBand {
        low_hz: f32,
        high_hz: f32,
        weight: f32,
    },

    #[error("invalid polymetric overlay {numerator}/{denominator} over {bars} bars")]
    InvalidPolymetricOverlay {
        numerator: u32,
        denominator: u32,
        bars: u32,
    },

    #[error("invalid grid dimensions {width}x{height}")]
    InvalidGridDimensions { width: usize, height: usize },
}
