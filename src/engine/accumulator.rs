//! Rolling frame accumulator.
//!
//! Absorbs arbitrarily sized input batches into a rolling window of fixed
//! length. A frame is ready exactly when the window is full; the engines
//! then advance it by one hop and keep absorbing. The accumulator applies
//! no backpressure; bounding throughput against the output side is the
//! engine controllers' concern.

use crate::core::ring_buffer::RingBuffer;

#[derive(Debug)]
pub struct FrameAccumulator {
    rolling: RingBuffer<f32>,
    frame_len: usize,
    hop: usize,
}

impl FrameAccumulator {
    pub fn new(frame_len: usize, hop: usize) -> Self {
        debug_assert!(hop > 0 && hop < frame_len);
        Self {
            rolling: RingBuffer::with_capacity(frame_len),
            frame_len,
            hop,
        }
    }

    /// Absorbs samples from `input` until the rolling window is full or the
    /// batch is exhausted. Returns the number of samples consumed.
    pub fn absorb(&mut self, input: &[f32]) -> usize {
        let want = (self.frame_len - self.rolling.len()).min(input.len());
        if want == 0 {
            return 0;
        }
        let pushed = self.rolling.push_slice(&input[..want]);
        debug_assert_eq!(pushed, want);
        pushed
    }

    /// True when a full frame is ready.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.rolling.len() == self.frame_len
    }

    /// Number of samples currently in the rolling window.
    #[inline]
    pub fn len(&self) -> usize {
        self.rolling.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rolling.is_empty()
    }

    /// Copies the current full frame into `out` without consuming it.
    pub fn peek_frame(&self, out: &mut [f32]) {
        debug_assert!(self.is_full());
        debug_assert_eq!(out.len(), self.frame_len);
        let copied = self.rolling.peek_slice(out);
        debug_assert_eq!(copied, self.frame_len);
    }

    /// Advances the rolling window by one hop.
    pub fn advance(&mut self) {
        let dropped = self.rolling.discard(self.hop);
        debug_assert_eq!(dropped, self.hop);
    }

    /// Zero-fills the tail up to a full frame. Used exclusively while
    /// flushing. Returns the number of padding samples added.
    pub fn pad_to_full(&mut self, value: f32) -> usize {
        let missing = self.frame_len - self.rolling.len();
        self.rolling.push_fill(value, missing)
    }

    /// Clears the window and optionally prepends priming zeros.
    pub fn reset(&mut self, prime_samples: usize) {
        debug_assert!(prime_samples < self.frame_len);
        self.rolling.clear();
        self.rolling.push_fill(0.0, prime_samples);
    }

    /// Drops all content.
    pub fn clear(&mut self) {
        self.rolling.clear();
    }
}
