//! Overlap-add accumulator.
//!
//! Maintains two running sums over the current frame span: the windowed
//! frame outputs and the window envelope itself. Emitted samples are the
//! ratio of the two, which cancels the window as long as the hop grid keeps
//! the envelope above the numerical floor. Sums are kept in `f64` so deep
//! overlaps stay well under the resynthesis error floor; the signal path in
//! and out is `f32`.

use crate::core::ring_buffer::RingBuffer;

/// Envelope values below this are treated as no window coverage: the sample
/// is emitted unnormalised and counted as an imperfect reconstruction.
const MIN_ENVELOPE: f64 = 2.0 * f32::EPSILON as f64;

#[derive(Debug)]
pub struct OverlapAdder {
    sig_sum: RingBuffer<f64>,
    win_sum: RingBuffer<f64>,
    frame_len: usize,
    skip_remaining: usize,
}

impl OverlapAdder {
    pub fn new(frame_len: usize, skip: usize) -> Self {
        let mut adder = Self {
            sig_sum: RingBuffer::with_capacity(frame_len),
            win_sum: RingBuffer::with_capacity(frame_len),
            frame_len,
            skip_remaining: 0,
        };
        adder.reset(skip);
        adder
    }

    /// Restores the just-built state: both sums full of zeros, `skip`
    /// leading samples still to be discarded before emission begins.
    pub fn reset(&mut self, skip: usize) {
        self.sig_sum.clear();
        self.sig_sum.push_fill(0.0, self.frame_len);
        self.win_sum.clear();
        self.win_sum.push_fill(0.0, self.frame_len);
        self.skip_remaining = skip;
    }

    /// Samples of output still to be dropped before emission begins.
    #[inline]
    pub fn skip_remaining(&self) -> usize {
        self.skip_remaining
    }

    /// Adds a processed frame and the window envelope into the running sums.
    pub fn accumulate(&mut self, frame_out: &[f32], window: &[f32]) {
        debug_assert_eq!(frame_out.len(), self.frame_len);
        debug_assert_eq!(window.len(), self.frame_len);
        self.sig_sum.add_assign_front(frame_out);
        self.win_sum.add_assign_front(window);
    }

    /// Drops up to `max` leading samples from both sums against the pending
    /// skip counter. Returns the number of samples dropped.
    pub fn consume_skip(&mut self, max: usize) -> usize {
        let n = self.skip_remaining.min(max);
        if n > 0 {
            self.roll(n);
            self.skip_remaining -= n;
        }
        n
    }

    /// Normalises and emits the first `count` samples into `dest`, then
    /// advances both sums. The caller guarantees `dest` has room.
    ///
    /// Returns the number of emitted samples whose envelope was below the
    /// floor and had 1.0 substituted.
    pub fn emit_into(&mut self, dest: &mut RingBuffer<f32>, count: usize) -> u64 {
        if count == 0 {
            return 0;
        }
        debug_assert!(count <= self.frame_len);
        debug_assert!(dest.available() >= count);

        let mut imperfect = 0u64;
        {
            let (a, b) = self.win_sum.as_mut_slices();
            for w in a.iter_mut().chain(b.iter_mut()).take(count) {
                if *w < MIN_ENVELOPE {
                    *w = 1.0;
                    imperfect += 1;
                }
            }
        }
        self.sig_sum.divide_assign_front(&self.win_sum, count);

        #[cfg(debug_assertions)]
        for &v in self.sig_sum.iter().take(count) {
            debug_assert!(v.is_finite());
            debug_assert!(
                v.abs() < 1000.0,
                "suspiciously large output sample; was the window applied?"
            );
        }

        let pushed = dest.push_from_f64(&self.sig_sum, count);
        debug_assert_eq!(pushed, count);
        self.roll(count);
        imperfect
    }

    /// Advances both sums by `count` samples without emitting them.
    pub fn discard_output(&mut self, count: usize) {
        if count > 0 {
            self.roll(count);
        }
    }

    /// Pops `count` from the front and refills the tail with zeros, keeping
    /// both sums at exactly one frame of occupancy.
    fn roll(&mut self, count: usize) {
        debug_assert!(count <= self.frame_len);
        self.sig_sum.discard(count);
        self.sig_sum.push_fill(0.0, count);
        self.win_sum.discard(count);
        self.win_sum.push_fill(0.0, count);
        debug_assert_eq!(self.sig_sum.len(), self.frame_len);
        debug_assert_eq!(self.win_sum.len(), self.frame_len);
    }
}
