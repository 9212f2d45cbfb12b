//! Error types for the framestitch crate.

use std::fmt;

/// Errors raised by the engine builders.
///
/// Builders validate every parameter before allocating; a failed build
/// leaves no partially constructed engine. The processing primitives
/// themselves never fail: they return sample counts and update the
/// engines' failure counters instead.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// Sample rate must be strictly positive.
    InvalidSampleRate { given: f64 },
    /// Frame length must be at least 2 samples.
    InvalidFrameLen { given: usize },
    /// Hop must satisfy `0 < hop < frame_len`.
    InvalidHop { hop: usize, frame_len: usize },
    /// A user-supplied window must match the frame length.
    WindowLengthMismatch { expected: usize, given: usize },
    /// The output ring must hold at least one hop of samples.
    OutputCapacityTooSmall { capacity: usize, hop: usize },
    /// A target output length of zero samples is meaningless.
    InvalidTargetLength { given: u64 },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::InvalidSampleRate { given } => {
                write!(f, "sample rate must be > 0, got {}", given)
            }
            BuildError::InvalidFrameLen { given } => {
                write!(f, "frame length must be >= 2, got {}", given)
            }
            BuildError::InvalidHop { hop, frame_len } => {
                write!(
                    f,
                    "hop must satisfy 0 < hop < frame_len, got hop={} frame_len={}",
                    hop, frame_len
                )
            }
            BuildError::WindowLengthMismatch { expected, given } => {
                write!(
                    f,
                    "window length {} does not match frame length {}",
                    given, expected
                )
            }
            BuildError::OutputCapacityTooSmall { capacity, hop } => {
                write!(
                    f,
                    "output capacity {} cannot hold a full hop of {} samples",
                    capacity, hop
                )
            }
            BuildError::InvalidTargetLength { given } => {
                write!(f, "target output length must be > 0, got {}", given)
            }
        }
    }
}

impl std::error::Error for BuildError {}
