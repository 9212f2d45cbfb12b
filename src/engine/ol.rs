//! Overlap analysis engine.
//!
//! Segments a continuous stream into overlapping frames and hands each one
//! to an observational callback. Nothing is reconstructed and nothing is
//! emitted, so the engine declares zero latency: a frame is delivered as
//! soon as its last sample has arrived.

use crate::core::window::{generate_window, WindowType};
use crate::engine::accumulator::FrameAccumulator;
use crate::engine::{FrameSink, FrameStatus};
use crate::error::BuildError;

pub struct OlEngine {
    sample_rate: f64,
    hop: usize,
    window: Vec<f32>,
    prime_len: usize,
    extra_skip: usize,
    extra_flush: usize,

    frames: FrameAccumulator,
    frame_in: Vec<f32>,
    sink: Box<dyn FrameSink + Send>,

    skip_remaining: usize,
    status: FrameStatus,
}

impl std::fmt::Debug for OlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OlEngine")
            .field("sample_rate", &self.sample_rate)
            .field("frame_len", &self.window.len())
            .field("hop", &self.hop)
            .field("buffered", &self.frames.len())
            .field("status", &self.status)
            .finish()
    }
}

impl OlEngine {
    /// Length of the analysis frame in samples.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.window.len()
    }

    /// Samples advanced between adjacent frames.
    #[inline]
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// The analysis window kernel.
    #[inline]
    pub fn window(&self) -> &[f32] {
        &self.window
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Frames are delivered as soon as available; there is no output path
    /// to delay.
    #[inline]
    pub fn latency(&self) -> usize {
        0
    }

    #[inline]
    pub fn status(&self) -> &FrameStatus {
        &self.status
    }

    /// Feeds a batch of samples, firing the frame callback at every hop
    /// boundary crossed. Batches of any size are accepted; a no-op after
    /// the engine has finished.
    pub fn push(&mut self, input: &[f32]) {
        if self.status.finished {
            return;
        }
        let mut consumed = 0;
        while consumed < input.len() {
            consumed += self.frames.absorb(&input[consumed..]);
            if self.frames.is_full() {
                self.status.padding_start = self.skip_remaining > 0;
                self.fire_frame();
            }
        }
    }

    /// Drains the remaining buffered samples through zero-padded frames.
    ///
    /// Frames keep firing while the un-flushed remainder exceeds half a
    /// frame plus one hop, so the last window centre never passes the final
    /// real input sample by more than that. The final frame is delivered
    /// with `last_frame` set, after which the engine is finished.
    pub fn flush(&mut self) {
        if self.status.finished {
            return;
        }
        self.status.flushing = true;

        let mut remaining = self.frames.len() + self.extra_flush;
        while remaining > 0 {
            if self.frames.pad_to_full(0.0) > 0 {
                self.status.padding_end = true;
            }
            let step = if remaining <= self.frame_len() / 2 + self.hop {
                self.status.last_frame = true;
                remaining
            } else {
                self.hop
            };
            self.status.padding_start = self.skip_remaining > 0;
            self.fire_frame();
            remaining -= step;
        }

        self.status.finished = true;
        self.frames.clear();
    }

    /// Restores the just-built state, keeping the window and configuration.
    pub fn reset(&mut self) {
        self.frames.reset(self.prime_len);
        self.skip_remaining = self.prime_len + self.extra_skip;
        self.status = FrameStatus {
            padding_start: self.skip_remaining > 0,
            ..FrameStatus::default()
        };
    }

    fn fire_frame(&mut self) {
        self.frames.peek_frame(&mut self.frame_in);
        self.sink.frame(&self.frame_in, &self.status);
        self.status.first_frame = false;
        let dropped = self.skip_remaining.min(self.hop);
        self.skip_remaining -= dropped;
        self.frames.advance();
        self.status.win_center_in += self.hop as i64;
        self.status.win_center_out = self.status.win_center_in;
    }
}

/// Configuration collector for [`OlEngine`]. All buffers are allocated once
/// at `build`; processing never allocates.
#[derive(Default)]
pub struct OlBuilder {
    sample_rate: f64,
    frame_len: Option<usize>,
    hop: Option<usize>,
    window: Option<Vec<f32>>,
    prime_at_zero: Option<bool>,
    extra_skip: usize,
    extra_flush: usize,
}

impl OlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn set_frame_len(mut self, frame_len: usize) -> Self {
        self.frame_len = Some(frame_len);
        self
    }

    pub fn set_hop(mut self, hop: usize) -> Self {
        self.hop = Some(hop);
        self
    }

    /// Supplies the analysis window. Defaults to a sum-normalised Hamming
    /// window of the frame length.
    pub fn set_window(mut self, window: Vec<f32>) -> Self {
        self.window = Some(window);
        self
    }

    /// When set (the default), the engine prepends `(frame_len - 1) / 2`
    /// zeros so the first window is centred on input sample zero.
    pub fn set_prime_at_zero(mut self, prime_at_zero: bool) -> Self {
        self.prime_at_zero = Some(prime_at_zero);
        self
    }

    pub fn set_extra_skip(mut self, samples: usize) -> Self {
        self.extra_skip = samples;
        self
    }

    pub fn set_extra_flush(mut self, samples: usize) -> Self {
        self.extra_flush = samples;
        self
    }

    /// Validates the configuration and builds the engine around the given
    /// frame sink.
    pub fn build<S>(self, sink: S) -> Result<OlEngine, BuildError>
    where
        S: FrameSink + Send + 'static,
    {
        let (sample_rate, frame_len, hop) = validate_grid(
            self.sample_rate,
            self.frame_len,
            self.hop,
        )?;
        let window = match self.window {
            Some(window) => {
                if window.len() != frame_len {
                    return Err(BuildError::WindowLengthMismatch {
                        expected: frame_len,
                        given: window.len(),
                    });
                }
                window
            }
            None => generate_window(WindowType::Hamming, frame_len, true),
        };

        let prime_len = if self.prime_at_zero.unwrap_or(true) {
            (frame_len - 1) / 2
        } else {
            0
        };

        let mut engine = OlEngine {
            sample_rate,
            hop,
            window,
            prime_len,
            extra_skip: self.extra_skip,
            extra_flush: self.extra_flush,
            frames: FrameAccumulator::new(frame_len, hop),
            frame_in: vec![0.0; frame_len],
            sink: Box::new(sink),
            skip_remaining: 0,
            status: FrameStatus::default(),
        };
        engine.reset();
        Ok(engine)
    }
}

/// Shared builder validation of the sampling grid. Frame length and hop
/// default to 10 ms and 5 ms when unset.
pub(crate) fn validate_grid(
    sample_rate: f64,
    frame_len: Option<usize>,
    hop: Option<usize>,
) -> Result<(f64, usize, usize), BuildError> {
    if !(sample_rate > 0.0) || !sample_rate.is_finite() {
        return Err(BuildError::InvalidSampleRate { given: sample_rate });
    }
    let frame_len = frame_len.unwrap_or((sample_rate * 0.010) as usize);
    let hop = hop.unwrap_or((sample_rate * 0.005) as usize);
    if frame_len < 2 {
        return Err(BuildError::InvalidFrameLen { given: frame_len });
    }
    if hop == 0 || hop >= frame_len {
        return Err(BuildError::InvalidHop { hop, frame_len });
    }
    Ok((sample_rate, frame_len, hop))
}
