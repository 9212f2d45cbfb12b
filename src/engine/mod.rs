//! Streaming frame-processing engines.
//!
//! Two engines share the same segmentation substrate: [`OlEngine`] slices a
//! stream into overlapping frames for analysis only, while [`OlaEngine`]
//! additionally reconstructs a continuous signal from the processed frames
//! by overlap-add, with offline, streaming and real-time drivers.

pub mod accumulator;
pub mod ol;
pub mod ola;
pub mod overlap_add;

pub use ol::{OlBuilder, OlEngine};
pub use ola::{OlaBuilder, OlaEngine};

/// Per-frame context handed to frame transforms, frame sinks and hop
/// decision hooks.
///
/// The window centres are sample indices on two independent clocks: the
/// input clock advances when a hop of input is consumed, the output clock
/// when a hop of output is scheduled. They coincide unless the caller
/// decouples consumption from emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStatus {
    /// No input hop has been consumed yet.
    pub first_frame: bool,
    /// This is the final frame before the engine finishes.
    pub last_frame: bool,
    /// Leading output samples are still being discarded to centre the first
    /// window on input sample zero.
    pub padding_start: bool,
    /// The tail of the current frame is zero-padding, not real input.
    pub padding_end: bool,
    /// The engine is draining after end of input.
    pub flushing: bool,
    /// The engine has emitted everything it will ever emit.
    pub finished: bool,
    /// Centre of the window on the input clock, in samples.
    pub win_center_in: i64,
    /// Centre of the window on the output clock, in samples.
    pub win_center_out: i64,
}

impl Default for FrameStatus {
    fn default() -> Self {
        Self {
            first_frame: true,
            last_frame: false,
            padding_start: false,
            padding_end: false,
            flushing: false,
            finished: false,
            win_center_in: 0,
            win_center_out: 0,
        }
    }
}

/// Counters for conditions the engines tolerate rather than fail on.
///
/// Processing primitives never return errors; callers inspect these after a
/// run to decide remediation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounters {
    /// Samples emitted where the window envelope was below the numerical
    /// floor and the normaliser substituted 1.0.
    pub imperfect_reconstruction: u64,
    /// Times input samples were lost because the output ring was full and
    /// the rolling window could not advance.
    pub output_overflows: u64,
}

/// Per-frame transform applied between segmentation and overlap-add.
///
/// `frame_out` has the same length as `frame_in`; the engine reuses the
/// buffer across frames, so every element must be written. A transform that
/// sets `frame_out = frame_in * window` makes the engine reconstruct its
/// input exactly.
pub trait FrameTransform {
    fn process_frame(
        &mut self,
        frame_in: &[f32],
        frame_out: &mut [f32],
        window: &[f32],
        status: &FrameStatus,
    );
}

impl<F> FrameTransform for F
where
    F: FnMut(&[f32], &mut [f32], &[f32], &FrameStatus),
{
    fn process_frame(
        &mut self,
        frame_in: &[f32],
        frame_out: &mut [f32],
        window: &[f32],
        status: &FrameStatus,
    ) {
        self(frame_in, frame_out, window, status)
    }
}

/// The default transform: multiply the frame by the analysis window.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowedPassthrough;

impl FrameTransform for WindowedPassthrough {
    fn process_frame(
        &mut self,
        frame_in: &[f32],
        frame_out: &mut [f32],
        window: &[f32],
        _status: &FrameStatus,
    ) {
        for ((out, &sample), &w) in frame_out.iter_mut().zip(frame_in).zip(window) {
            *out = sample * w;
        }
    }
}

/// Observational per-frame callback for the analysis-only engine.
pub trait FrameSink {
    fn frame(&mut self, frame: &[f32], status: &FrameStatus);
}

impl<F> FrameSink for F
where
    F: FnMut(&[f32], &FrameStatus),
{
    fn frame(&mut self, frame: &[f32], status: &FrameStatus) {
        self(frame, status)
    }
}

/// Per-hop scheduling decision hook. Returning `true` lets the engine take
/// the default action (emit an output hop, or consume an input hop).
pub type HopGate = Box<dyn FnMut(&FrameStatus) -> bool + Send>;
