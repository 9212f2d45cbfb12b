//! Overlap-add synthesis engine.
//!
//! Couples the rolling frame accumulator, the per-frame transform and the
//! overlap-add sums behind a bounded output ring, and exposes three drivers
//! over the same primitive: chunked streaming (`process`/`flush`/`fetch`),
//! single-shot offline (`process_offline`) and same-size real-time
//! (`process_realtime`).
//!
//! Input consumption and output emission run on separate clocks. By default
//! they advance together and the engine reconstructs its input; installing
//! hop gates decouples them for time-scale modification, with
//! `target_output_len` bounding the run.

use crate::core::ring_buffer::RingBuffer;
use crate::core::window::{generate_window, WindowType};
use crate::engine::accumulator::FrameAccumulator;
use crate::engine::ol::validate_grid;
use crate::engine::overlap_add::OverlapAdder;
use crate::engine::{FailureCounters, FrameStatus, FrameTransform, HopGate, WindowedPassthrough};
use crate::error::BuildError;

pub struct OlaEngine {
    sample_rate: f64,
    hop: usize,
    window: Vec<f32>,
    prime_len: usize,
    extra_skip: usize,
    extra_flush: usize,
    target_output_len: Option<u64>,

    frames: FrameAccumulator,
    adder: OverlapAdder,
    out: RingBuffer<f32>,

    frame_in: Vec<f32>,
    frame_out: Vec<f32>,

    transform: Box<dyn FrameTransform + Send>,
    emit_gate: Option<HopGate>,
    consume_gate: Option<HopGate>,

    status: FrameStatus,
    failures: FailureCounters,

    input_len: u64,
    output_len: u64,
    /// Samples of the current hop accumulated but not yet emitted.
    hop_pending: usize,
    /// The current frame has been accumulated; input not yet advanced.
    hop_accumulated: bool,
    /// Latched on the first `flush` call: samples still owed to the output.
    flush_remaining: Option<u64>,

    rt_prepad_remaining: usize,
    rt_out_min: usize,
}

impl std::fmt::Debug for OlaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OlaEngine")
            .field("sample_rate", &self.sample_rate)
            .field("frame_len", &self.window.len())
            .field("hop", &self.hop)
            .field("input_len", &self.input_len)
            .field("output_len", &self.output_len)
            .field("out_ring", &self.out.len())
            .field("status", &self.status)
            .field("failures", &self.failures)
            .finish()
    }
}

impl OlaEngine {
    /// Length of the analysis window in samples.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.window.len()
    }

    /// Samples advanced between adjacent frames, and the emission quantum.
    #[inline]
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// The window kernel applied around the frame transform.
    #[inline]
    pub fn window(&self) -> &[f32] {
        &self.window
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Declared latency in samples: one full frame, constant over the
    /// engine's lifetime.
    #[inline]
    pub fn latency(&self) -> usize {
        self.window.len()
    }

    /// Declared latency in seconds.
    #[inline]
    pub fn latency_secs(&self) -> f64 {
        self.window.len() as f64 / self.sample_rate
    }

    #[inline]
    pub fn status(&self) -> &FrameStatus {
        &self.status
    }

    #[inline]
    pub fn failures(&self) -> FailureCounters {
        self.failures
    }

    /// Total real input samples absorbed so far.
    #[inline]
    pub fn input_cursor(&self) -> u64 {
        self.input_len
    }

    /// Total output samples emitted so far (priming drops excluded).
    #[inline]
    pub fn output_cursor(&self) -> u64 {
        self.output_len
    }

    #[inline]
    pub fn finished(&self) -> bool {
        self.status.finished
    }

    #[inline]
    pub fn flushing(&self) -> bool {
        self.status.flushing
    }

    /// Samples immediately fetchable from the internal output ring.
    #[inline]
    pub fn fetch_available(&self) -> usize {
        self.out.len()
    }

    /// The smallest non-zero emission a single `process` call can make.
    #[inline]
    pub fn min_output_chunk_size(&self) -> usize {
        self.hop
    }

    /// Upper bound on the samples one `process` call can emit for a given
    /// input chunk size. In the worst case the rolling window is one sample
    /// short of full, so the first input sample completes a frame and every
    /// further hop of input completes another.
    #[inline]
    pub fn max_output_chunk_size(&self, input_chunk: usize) -> usize {
        self.hop * div_ceil(input_chunk, self.hop)
    }

    /// Input samples the engine can absorb right now without risking loss
    /// against its internal output ring.
    pub fn process_input_available(&self) -> usize {
        let free = self.out.available().saturating_sub(self.hop_pending);
        (free / self.hop) * self.hop
    }

    /// Samples that remain to be emitted before the engine can finish.
    pub fn flush_available(&self) -> u64 {
        if let Some(remaining) = self.flush_remaining {
            remaining
        } else if let Some(target) = self.target_output_len {
            target.saturating_sub(self.output_len)
        } else {
            (self.input_len + self.extra_flush as u64)
                .saturating_sub(self.extra_skip as u64 + self.output_len)
        }
    }

    /// Minimum internal-ring occupancy observed after real-time calls.
    ///
    /// After a full real-time run this is strictly below the callback chunk
    /// size when the declared latency is not pessimistic. `usize::MAX`
    /// until the first real-time call.
    #[inline]
    pub fn stat_realtime_out_size_min(&self) -> usize {
        self.rt_out_min
    }

    /// Consumes the whole batch, emitting produced samples into the
    /// internal output ring. Returns the number of samples produced.
    ///
    /// A no-op once flushing has begun or the engine has finished. If the
    /// internal ring saturates and the rolling window cannot advance, the
    /// remainder of the batch is dropped and `output_overflows` increments;
    /// size batches with [`process_input_available`](Self::process_input_available)
    /// to avoid that.
    pub fn process(&mut self, input: &[f32]) -> usize {
        let mut out = std::mem::take(&mut self.out);
        let produced = self.process_into(input, &mut out);
        self.out = out;
        produced
    }

    /// Like [`process`](Self::process), but emits directly into a
    /// caller-owned ring instead of the internal one.
    pub fn process_into(&mut self, input: &[f32], dest: &mut RingBuffer<f32>) -> usize {
        if self.status.finished || self.status.flushing {
            return 0;
        }
        let mut produced = 0;
        let mut consumed = 0;
        while consumed < input.len() {
            let absorbed = self.frames.absorb(&input[consumed..]);
            consumed += absorbed;
            self.input_len += absorbed as u64;
            if self.frames.is_full() {
                produced += self.drive(dest, usize::MAX);
            }
            if self.status.finished {
                break;
            }
            if self.frames.is_full() && consumed < input.len() {
                // The output side is saturated and the rolling window cannot
                // advance; the rest of this batch has nowhere to go.
                self.failures.output_overflows += 1;
                break;
            }
        }
        produced
    }

    /// Drains remaining frames with zero-padding, emitting at most
    /// `chunk_limit` samples per call (`0` = unlimited). The caller polls
    /// until [`finished`](Self::finished). Returns samples emitted.
    ///
    /// The first call latches the total still owed: enough to bring the
    /// output to the same length as the input (shifted by `extra_skip`,
    /// extended by `extra_flush`), or the distance to `target_output_len`
    /// when one is set.
    pub fn flush(&mut self, chunk_limit: usize) -> usize {
        let mut out = std::mem::take(&mut self.out);
        let produced = self.flush_into(&mut out, chunk_limit);
        self.out = out;
        produced
    }

    /// Like [`flush`](Self::flush), but emits into a caller-owned ring.
    pub fn flush_into(&mut self, dest: &mut RingBuffer<f32>, chunk_limit: usize) -> usize {
        if self.status.finished {
            return 0;
        }
        if !self.status.flushing {
            self.status.flushing = true;
            // What the output still owes: the distance to the target when
            // one is set, otherwise enough to make output length equal
            // input length (shifted by extra_skip, extended by extra_flush)
            let owed = match self.target_output_len {
                Some(target) => target.saturating_sub(self.output_len),
                None => (self.input_len + self.extra_flush as u64)
                    .saturating_sub(self.extra_skip as u64 + self.output_len),
            };
            if owed == 0 {
                self.finish();
                return 0;
            }
            self.flush_remaining = Some(owed);
        }

        let budget = if chunk_limit == 0 {
            usize::MAX
        } else {
            chunk_limit
        };
        let mut produced = 0;
        let mut fruitless = 0usize;
        loop {
            let owed_before = self.flush_remaining;
            let produced_before = produced;
            let skip_before = self.adder.skip_remaining();

            if !self.frames.is_full() {
                if self.frames.pad_to_full(0.0) > 0 {
                    self.status.padding_end = true;
                }
            }
            produced += self.drive(dest, budget.saturating_sub(produced));

            if self.status.finished || produced >= budget {
                break;
            }
            if self.flush_remaining == owed_before
                && produced == produced_before
                && self.adder.skip_remaining() == skip_before
            {
                if dest.available() == 0 {
                    break; // caller must drain and poll again
                }
                // An emission gate may refuse individual positions, but once
                // a full frame-span of padded positions has gone by without a
                // single emitted sample, nothing can lower the remainder any
                // more; end the stream rather than diverge.
                fruitless += 1;
                if fruitless >= self.window.len() {
                    self.finish();
                    break;
                }
            } else {
                fruitless = 0;
            }
        }
        produced
    }

    /// Moves up to `out.len()` samples from the internal ring into `out`.
    /// Purely copying; returns the count moved.
    pub fn fetch(&mut self, out: &mut [f32]) -> usize {
        self.out.pop_slice(out)
    }

    /// Single-shot convenience: streams the whole input through the engine
    /// in self-sized chunks, flushes, and appends everything to `out`.
    /// Returns the number of samples appended.
    pub fn process_offline(&mut self, input: &[f32], out: &mut Vec<f32>) -> usize {
        let start = out.len();
        let mut consumed = 0;
        while consumed < input.len() {
            let take = self.process_input_available().min(input.len() - consumed);
            if take == 0 {
                self.drain_into_vec(out);
                self.pump_pending();
                continue;
            }
            self.process(&input[consumed..consumed + take]);
            consumed += take;
            self.drain_into_vec(out);
            if self.status.finished {
                break;
            }
        }
        while !self.status.finished {
            let space = self.out.available();
            self.flush(space);
            self.drain_into_vec(out);
        }
        self.drain_into_vec(out);
        out.len() - start
    }

    /// Real-time driver: delivers exactly `input.len()` samples into `out`
    /// on every call. The first [`latency`](Self::latency) output samples
    /// are zeros; underruns at the stream tail are zero-padded.
    pub fn process_realtime(&mut self, input: &[f32], out: &mut [f32]) {
        debug_assert_eq!(input.len(), out.len());
        self.process(input);

        let mut filled = 0;
        if self.rt_prepad_remaining > 0 {
            let zeros = self.rt_prepad_remaining.min(out.len());
            out[..zeros].fill(0.0);
            self.rt_prepad_remaining -= zeros;
            filled = zeros;
        }
        filled += self.fetch_tail(out, filled);
        if filled < out.len() {
            out[filled..].fill(0.0);
        }
        self.rt_out_min = self.rt_out_min.min(self.out.len());
    }

    /// Restores the just-built state, keeping the window, the configuration
    /// and the installed transform and gates.
    pub fn reset(&mut self) {
        self.frames.reset(self.prime_len);
        self.adder.reset(self.prime_len + self.extra_skip);
        self.out.clear();
        self.status = FrameStatus {
            padding_start: self.prime_len + self.extra_skip > 0,
            ..FrameStatus::default()
        };
        self.failures = FailureCounters::default();
        self.input_len = 0;
        self.output_len = 0;
        self.hop_pending = 0;
        self.hop_accumulated = false;
        self.flush_remaining = None;
        self.rt_prepad_remaining = self.window.len();
        self.rt_out_min = usize::MAX;
    }

    fn fetch_tail(&mut self, out: &mut [f32], from: usize) -> usize {
        self.out.pop_slice(&mut out[from..])
    }

    fn drain_into_vec(&mut self, out: &mut Vec<f32>) -> usize {
        let n = self.out.len();
        if n == 0 {
            return 0;
        }
        let start = out.len();
        out.resize(start + n, 0.0);
        let got = self.out.pop_slice(&mut out[start..]);
        debug_assert_eq!(got, n);
        got
    }

    /// Resumes a partially emitted hop into the internal ring.
    fn pump_pending(&mut self) -> usize {
        if self.hop_pending == 0 {
            return 0;
        }
        let mut out = std::mem::take(&mut self.out);
        let produced = self.drive(&mut out, usize::MAX);
        self.out = out;
        produced
    }

    /// The frame decision loop. Runs while a full frame is ready, emitting
    /// and consuming hops as the gates allow, bounded by `budget` and the
    /// space in `dest`. Returns samples emitted.
    fn drive(&mut self, dest: &mut RingBuffer<f32>, budget: usize) -> usize {
        let mut produced = 0;
        loop {
            if self.status.finished {
                break;
            }
            if self.hop_accumulated {
                if self.hop_pending > 0 {
                    produced += self.emit_pending(dest, budget.saturating_sub(produced));
                    if self.status.finished {
                        break;
                    }
                    if self.hop_pending > 0 {
                        break; // destination or budget exhausted
                    }
                }
                self.hop_accumulated = false;
                if self.gate_consume() {
                    self.advance_input();
                }
                continue;
            }
            if !self.frames.is_full() {
                break;
            }
            if self.gate_emit() {
                self.begin_hop();
            } else {
                // No output scheduled for this position; input must advance
                // or the loop cannot make progress.
                self.advance_input();
            }
        }
        produced
    }

    /// Transforms the current frame and folds it into the running sums.
    fn begin_hop(&mut self) {
        self.status.padding_start = self.adder.skip_remaining() > 0;
        if let Some(remaining) = self.headroom() {
            self.status.last_frame = remaining <= self.hop as u64;
        }

        self.frames.peek_frame(&mut self.frame_in);
        self.transform.process_frame(
            &self.frame_in,
            &mut self.frame_out,
            &self.window,
            &self.status,
        );
        #[cfg(debug_assertions)]
        for &v in self.frame_out.iter() {
            debug_assert!(v.is_finite());
            debug_assert!(
                v.abs() < 1000.0,
                "suspiciously large frame output; was the window applied?"
            );
        }

        self.adder.accumulate(&self.frame_out, &self.window);
        let skipped = self.adder.consume_skip(self.hop);
        if skipped > 0 && self.adder.skip_remaining() == 0 {
            self.status.padding_start = false;
        }
        self.hop_pending = self.hop - skipped;
        self.hop_accumulated = true;
        self.status.win_center_out += self.hop as i64;
    }

    /// Emits as much of the pending hop as the destination, the budget and
    /// the output goal allow.
    fn emit_pending(&mut self, dest: &mut RingBuffer<f32>, budget: usize) -> usize {
        let mut count = self.hop_pending.min(budget).min(dest.available());
        if let Some(remaining) = self.headroom() {
            count = count.min(usize::try_from(remaining).unwrap_or(usize::MAX));
            if remaining == 0 {
                self.finish();
                return 0;
            }
        }
        if count == 0 {
            return 0;
        }

        let imperfect = self.adder.emit_into(dest, count);
        self.failures.imperfect_reconstruction += imperfect;
        self.output_len += count as u64;
        self.hop_pending -= count;

        if let Some(target) = self.target_output_len {
            if self.output_len >= target && !self.status.finished {
                self.finish();
            }
        }
        self.note_progress(count as u64);
        count
    }

    fn advance_input(&mut self) {
        self.frames.advance();
        self.status.first_frame = false;
        self.status.win_center_in += self.hop as i64;
    }

    fn gate_emit(&mut self) -> bool {
        match self.emit_gate.as_mut() {
            Some(gate) => gate(&self.status),
            None => true,
        }
    }

    fn gate_consume(&mut self) -> bool {
        match self.consume_gate.as_mut() {
            Some(gate) => gate(&self.status),
            None => true,
        }
    }

    /// Samples still owed to the output, when bounded.
    fn headroom(&self) -> Option<u64> {
        if let Some(remaining) = self.flush_remaining {
            Some(remaining)
        } else {
            self.target_output_len
                .map(|t| t.saturating_sub(self.output_len))
        }
    }

    /// Debits the latched flush counter, finishing the stream when it
    /// reaches zero.
    fn note_progress(&mut self, samples: u64) {
        if samples == 0 {
            return;
        }
        if let Some(remaining) = self.flush_remaining {
            let remaining = remaining.saturating_sub(samples);
            self.flush_remaining = Some(remaining);
            if remaining == 0 && !self.status.finished {
                self.finish();
            }
        }
    }

    /// Irrevocably ends the stream: pending output is dropped, the rolling
    /// window is cleared, and every further primitive is a no-op.
    fn finish(&mut self) {
        self.adder.discard_output(self.hop_pending);
        self.hop_pending = 0;
        self.hop_accumulated = false;
        self.frames.clear();
        self.status.finished = true;
    }
}

/// Configuration collector for [`OlaEngine`]. All buffers are sized and
/// allocated once at `build`; processing never allocates.
#[derive(Default)]
pub struct OlaBuilder {
    sample_rate: f64,
    frame_len: Option<usize>,
    hop: Option<usize>,
    window: Option<Vec<f32>>,
    prime_at_zero: Option<bool>,
    extra_skip: usize,
    extra_flush: usize,
    output_capacity: Option<usize>,
    max_input_chunk: Option<usize>,
    target_output_len: Option<u64>,
    emit_gate: Option<HopGate>,
    consume_gate: Option<HopGate>,
}

impl std::fmt::Debug for OlaBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OlaBuilder")
            .field("sample_rate", &self.sample_rate)
            .field("frame_len", &self.frame_len)
            .field("hop", &self.hop)
            .field("target_output_len", &self.target_output_len)
            .field("has_emit_gate", &self.emit_gate.is_some())
            .field("has_consume_gate", &self.consume_gate.is_some())
            .finish()
    }
}

impl OlaBuilder {
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

    /// Supplies the window kernel. Defaults to a sum-normalised Hamming
    /// window, whose non-zero endpoints keep the overlap-add envelope away
    /// from the division floor.
    pub fn set_window(mut self, window: Vec<f32>) -> Self {
        self.window = Some(window);
        self
    }

    /// When set (the default), the engine prepends `(frame_len - 1) / 2`
    /// zeros and discards the same number of leading output samples, so the
    /// first window is centred on input sample zero and output sample `n`
    /// lines up with input sample `n`.
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

    /// Sizes the internal output ring explicitly. When unset, the ring is
    /// sized from `max_input_chunk` (itself defaulting to the frame
    /// length) so that a worst-case chunk can always be absorbed.
    pub fn set_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = Some(capacity);
        self
    }

    /// Declares the largest chunk a single `process` call will receive,
    /// used to size the internal output ring.
    pub fn set_max_input_chunk(mut self, samples: usize) -> Self {
        self.max_input_chunk = Some(samples);
        self
    }

    /// Sets the exact number of samples the engine must emit over its
    /// lifetime, regardless of input length. This is what bounds a
    /// time-stretch or time-compress run.
    pub fn set_target_output_len(mut self, samples: u64) -> Self {
        self.target_output_len = Some(samples);
        self
    }

    /// Installs the per-hop emission decision. Returning `false` skips
    /// producing output for the current frame position (time compression).
    pub fn set_emit_gate<G>(mut self, gate: G) -> Self
    where
        G: FnMut(&FrameStatus) -> bool + Send + 'static,
    {
        self.emit_gate = Some(Box::new(gate));
        self
    }

    /// Installs the per-hop consumption decision. Returning `false` keeps
    /// the input in place so another output hop is produced from the same
    /// position (time expansion).
    pub fn set_consume_gate<G>(mut self, gate: G) -> Self
    where
        G: FnMut(&FrameStatus) -> bool + Send + 'static,
    {
        self.consume_gate = Some(Box::new(gate));
        self
    }

    /// Builds the engine with the default windowed passthrough transform,
    /// under which the output reconstructs the input exactly.
    pub fn build(self) -> Result<OlaEngine, BuildError> {
        self.build_with(WindowedPassthrough)
    }

    /// Validates the configuration and builds the engine around the given
    /// frame transform.
    pub fn build_with<T>(self, transform: T) -> Result<OlaEngine, BuildError>
    where
        T: FrameTransform + Send + 'static,
    {
        let (sample_rate, frame_len, hop) =
            validate_grid(self.sample_rate, self.frame_len, self.hop)?;
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
        if let Some(target) = self.target_output_len {
            if target == 0 {
                return Err(BuildError::InvalidTargetLength { given: target });
            }
        }

        let max_chunk = self.max_input_chunk.unwrap_or(frame_len);
        let capacity = self
            .output_capacity
            .unwrap_or_else(|| frame_len + hop * div_ceil(max_chunk, hop) + hop);
        if capacity < hop {
            return Err(BuildError::OutputCapacityTooSmall { capacity, hop });
        }

        let prime_len = if self.prime_at_zero.unwrap_or(true) {
            (frame_len - 1) / 2
        } else {
            0
        };

        let mut engine = OlaEngine {
            sample_rate,
            hop,
            window,
            prime_len,
            extra_skip: self.extra_skip,
            extra_flush: self.extra_flush,
            target_output_len: self.target_output_len,
            frames: FrameAccumulator::new(frame_len, hop),
            adder: OverlapAdder::new(frame_len, 0),
            out: RingBuffer::with_capacity(capacity),
            frame_in: vec![0.0; frame_len],
            frame_out: vec![0.0; frame_len],
            transform: Box::new(transform),
            emit_gate: self.emit_gate,
            consume_gate: self.consume_gate,
            status: FrameStatus::default(),
            failures: FailureCounters::default(),
            input_len: 0,
            output_len: 0,
            hop_pending: 0,
            hop_accumulated: false,
            flush_remaining: None,
            rt_prepad_remaining: 0,
            rt_out_min: usize::MAX,
        };
        engine.reset();
        Ok(engine)
    }
}

#[inline]
fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lut::db2lin;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};
    use std::sync::{Arc, Barrier};

    fn builder(sample_rate: f64, frame_len: usize, hop: usize) -> OlaBuilder {
        OlaBuilder::new()
            .set_sample_rate(sample_rate)
            .set_frame_len(frame_len)
            .set_hop(hop)
    }

    fn sine(sample_rate: f64, freq: f64, seconds: f64) -> Vec<f32> {
        let n = (sample_rate * seconds) as usize;
        (0..n)
            .map(|i| (std::f64::consts::TAU * freq * i as f64 / sample_rate).sin() as f32)
            .collect()
    }

    fn clipped_noise(len: usize, stdev: f64, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, stdev).expect("valid stdev");
        (0..len)
            .map(|_| (normal.sample(&mut rng) as f32).clamp(-0.99, 0.99))
            .collect()
    }

    fn drain(engine: &mut OlaEngine, out: &mut Vec<f32>) {
        let n = engine.fetch_available();
        if n == 0 {
            return;
        }
        let start = out.len();
        out.resize(start + n, 0.0);
        let got = engine.fetch(&mut out[start..]);
        assert_eq!(got, n);
    }

    /// Drives the engine the way a streaming caller would: feed in chunks
    /// sized by `process_input_available`, fetch eagerly, then poll `flush`.
    fn run_streaming(engine: &mut OlaEngine, input: &[f32], chunk: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(input.len() + engine.frame_len());
        for batch in input.chunks(chunk.max(1)) {
            let mut fed = 0;
            while fed < batch.len() {
                let take = engine.process_input_available().min(batch.len() - fed);
                if take == 0 {
                    drain(engine, &mut out);
                    continue;
                }
                engine.process(&batch[fed..fed + take]);
                fed += take;
                drain(engine, &mut out);
            }
        }
        while !engine.finished() {
            engine.flush(0);
            drain(engine, &mut out);
        }
        drain(engine, &mut out);
        out
    }

    fn max_abs_diff(a: &[f32], b: &[f32]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| (f64::from(x) - f64::from(y)).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn builder_rejects_invalid_parameters() {
        assert!(matches!(
            OlaBuilder::new().build(),
            Err(BuildError::InvalidSampleRate { .. })
        ));
        assert!(matches!(
            builder(44100.0, 100, 100).build(),
            Err(BuildError::InvalidHop { .. })
        ));
        assert!(matches!(
            builder(44100.0, 1, 1).build(),
            Err(BuildError::InvalidFrameLen { .. })
        ));
        assert!(matches!(
            builder(44100.0, 64, 16).set_window(vec![1.0; 32]).build(),
            Err(BuildError::WindowLengthMismatch { .. })
        ));
        assert!(matches!(
            builder(44100.0, 64, 16).set_output_capacity(8).build(),
            Err(BuildError::OutputCapacityTooSmall { .. })
        ));
        assert!(matches!(
            builder(44100.0, 64, 16).set_target_output_len(0).build(),
            Err(BuildError::InvalidTargetLength { .. })
        ));
    }

    #[test]
    fn offline_reconstructs_noise_exactly() {
        let input = clipped_noise(3 * 44100, 0.2, 0);
        let mut engine = builder(44100.0, 882, 220).build().expect("build");
        let mut out = Vec::new();
        engine.process_offline(&input, &mut out);
        assert_eq!(out.len(), input.len());
        let err = max_abs_diff(&input, &out);
        assert!(err <= db2lin(-120.0), "resynthesis error {}", err);
        assert_eq!(engine.failures().imperfect_reconstruction, 0);
        assert_eq!(engine.failures().output_overflows, 0);
    }

    #[test]
    fn short_frames_on_silence_emit_equal_length_zeros() {
        let input = vec![0.0f32; 3 * 8000];
        let mut engine = builder(8000.0, 3, 1)
            .set_max_input_chunk(2)
            .build()
            .expect("build");
        let out = run_streaming(&mut engine, &input, 2);
        assert_eq!(out.len(), input.len());
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn streaming_impulse_reconstructs_within_floor() {
        let mut input = vec![0.0f32; 16000];
        input[0] = 0.9;
        let mut engine = builder(16000.0, 512, 64)
            .set_max_input_chunk(32)
            .build()
            .expect("build");
        let out = run_streaming(&mut engine, &input, 32);
        assert_eq!(out.len(), input.len());
        let err = max_abs_diff(&input, &out);
        assert!(err <= db2lin(-120.0), "resynthesis error {}", err);
    }

    #[test]
    fn high_overlap_sine_reconstructs_within_floor() {
        let input = sine(96000.0, 440.0, 3.0);
        let mut engine = builder(96000.0, 4800, 96)
            .set_max_input_chunk(1024)
            .build()
            .expect("build");
        let out = run_streaming(&mut engine, &input, 1024);
        assert_eq!(out.len(), input.len());
        let err = max_abs_diff(&input, &out);
        assert!(err <= db2lin(-120.0), "resynthesis error {}", err);
    }

    #[test]
    fn arbitrary_chunk_sizes_are_bit_identical_to_offline() {
        let input = clipped_noise(6000, 0.2, 7);
        let offline = {
            let mut engine = builder(16000.0, 256, 64).build().expect("build");
            let mut out = Vec::new();
            engine.process_offline(&input, &mut out);
            out
        };
        assert_eq!(offline.len(), input.len());
        for &chunk in &[1usize, 3, 17, 64, 255, 1024, 6000] {
            let mut engine = builder(16000.0, 256, 64)
                .set_max_input_chunk(chunk)
                .build()
                .expect("build");
            let streamed = run_streaming(&mut engine, &input, chunk);
            assert_eq!(streamed, offline, "chunk {}", chunk);
        }
    }

    #[test]
    fn realtime_impulse_appears_after_exact_latency() {
        let chunk = 256;
        let total = 4096;
        let mut input = vec![0.0f32; total];
        input[0] = 0.9;
        let mut engine = builder(44100.0, 882, 220)
            .set_max_input_chunk(chunk)
            .build()
            .expect("build");
        assert_eq!(engine.latency(), 882);

        let mut out = vec![0.0f32; total];
        for (batch_in, batch_out) in input.chunks(chunk).zip(out.chunks_mut(chunk)) {
            engine.process_realtime(batch_in, batch_out);
        }

        for (idx, &v) in out.iter().take(882).enumerate() {
            assert_eq!(v, 0.0, "expected zero during latency, index {}", idx);
        }
        assert!(
            (f64::from(out[882]) - 0.9).abs() < 1e-5,
            "impulse not at declared latency: out[882] = {}",
            out[882]
        );
        assert!(engine.stat_realtime_out_size_min() < chunk);
        assert_eq!(engine.latency(), 882);
    }

    #[test]
    fn decoupled_consume_gate_doubles_length() {
        let sample_rate = 48000.0;
        let input = sine(sample_rate, 440.0, 1.0);
        let target = (input.len() * 2) as u64;
        let mut toggle = false;
        let mut engine = builder(sample_rate, 1024, 256)
            .set_max_input_chunk(512)
            .set_output_capacity(8192)
            .set_target_output_len(target)
            .set_consume_gate(move |_s: &FrameStatus| {
                toggle = !toggle;
                toggle
            })
            .build()
            .expect("build");
        let out = run_streaming(&mut engine, &input, 512);
        assert_eq!(out.len() as u64, target);
        assert!(out.iter().all(|v| v.is_finite()));
        assert!(engine.finished());
    }

    #[test]
    fn decoupled_emit_gate_halves_length() {
        let sample_rate = 48000.0;
        let input = sine(sample_rate, 220.0, 1.0);
        let target = (input.len() / 2) as u64;
        let mut toggle = false;
        let mut engine = builder(sample_rate, 1024, 256)
            .set_max_input_chunk(512)
            .set_target_output_len(target)
            .set_emit_gate(move |_s: &FrameStatus| {
                toggle = !toggle;
                toggle
            })
            .build()
            .expect("build");
        let out = run_streaming(&mut engine, &input, 512);
        assert_eq!(out.len() as u64, target);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn reset_reproduces_identical_output() {
        let input = clipped_noise(10_000, 0.2, 3);
        let mut engine = builder(22050.0, 441, 147).build().expect("build");
        let mut first = Vec::new();
        engine.process_offline(&input, &mut first);
        engine.reset();
        let mut second = Vec::new();
        engine.process_offline(&input, &mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn uncovered_envelope_counts_imperfect_reconstruction() {
        // A window that is zero over its first half leaves the first
        // emitted hop with no coverage at all.
        let window = vec![0.0, 0.0, 1.0, 1.0];
        let mut engine = builder(8000.0, 4, 2)
            .set_prime_at_zero(false)
            .set_window(window)
            .build()
            .expect("build");
        engine.process(&[1.0f32; 32]);
        assert_eq!(engine.failures().imperfect_reconstruction, 2);
    }

    #[test]
    fn saturated_output_ring_counts_overflow() {
        let mut engine = builder(8000.0, 64, 16)
            .set_output_capacity(16)
            .build()
            .expect("build");
        // Nothing is fetched, so the ring fills and the tail of the batch
        // is dropped.
        engine.process(&[0.5f32; 4000]);
        assert!(engine.failures().output_overflows > 0);

        let mut scratch = [0.0f32; 16];
        assert!(engine.fetch(&mut scratch) > 0);
        assert!(engine.process(&[0.5f32; 64]) > 0);
    }

    #[test]
    fn primitives_are_noops_after_finished() {
        let mut engine = builder(8000.0, 32, 8)
            .set_max_input_chunk(100)
            .build()
            .expect("build");
        engine.process(&[0.1f32; 100]);
        let mut sink = [0.0f32; 64];
        while !engine.finished() {
            engine.flush(0);
            while engine.fetch(&mut sink) > 0 {}
        }
        assert_eq!(engine.process(&[0.1; 10]), 0);
        assert_eq!(engine.flush(0), 0);
        assert_eq!(engine.input_cursor(), 100);
        assert_eq!(engine.output_cursor(), 100);
    }

    #[test]
    fn chunked_flush_matches_unlimited_flush() {
        let input = clipped_noise(5000, 0.2, 11);
        let run = |chunk_limit: usize| -> Vec<f32> {
            let mut engine = builder(16000.0, 320, 80).build().expect("build");
            let mut out = Vec::new();
            let mut fed = 0;
            while fed < input.len() {
                let take = engine.process_input_available().min(input.len() - fed);
                if take == 0 {
                    drain(&mut engine, &mut out);
                    continue;
                }
                engine.process(&input[fed..fed + take]);
                fed += take;
                drain(&mut engine, &mut out);
            }
            while !engine.finished() {
                engine.flush(chunk_limit);
                drain(&mut engine, &mut out);
            }
            drain(&mut engine, &mut out);
            out
        };
        let unlimited = run(0);
        assert_eq!(unlimited.len(), input.len());
        for &limit in &[1usize, 7, 80, 1000] {
            assert_eq!(run(limit), unlimited, "chunk_limit {}", limit);
        }
    }

    #[test]
    fn latency_is_frame_len_and_constant() {
        let engine = builder(48000.0, 960, 240).build().expect("build");
        assert_eq!(engine.latency(), 960);
        assert!((engine.latency_secs() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn process_input_available_is_hop_aligned() {
        let mut engine = builder(8000.0, 128, 32)
            .set_output_capacity(100)
            .build()
            .expect("build");
        let before = engine.process_input_available();
        assert_eq!(before % 32, 0);
        assert_eq!(before, 96);
        engine.process(&[0.2f32; 200]);
        let after = engine.process_input_available();
        assert_eq!(after % 32, 0);
        assert!(after < before);
        assert_eq!(engine.failures().output_overflows, 0);
    }

    #[test]
    fn extra_skip_shifts_the_output_window() {
        let input: Vec<f32> = (0..400).map(|i| (i as f32 / 400.0) - 0.5).collect();
        let mut engine = builder(8000.0, 64, 16)
            .set_extra_skip(10)
            .set_extra_flush(10)
            .build()
            .expect("build");
        let mut out = Vec::new();
        engine.process_offline(&input, &mut out);
        assert_eq!(out.len(), input.len());
        let floor = db2lin(-120.0);
        for i in 0..(input.len() - 10) {
            assert!(
                (f64::from(out[i]) - f64::from(input[i + 10])).abs() <= floor,
                "sample {}",
                i
            );
        }
    }

    #[test]
    fn process_into_external_ring_bypasses_internal() {
        let mut engine = builder(8000.0, 32, 8).build().expect("build");
        let mut dest = RingBuffer::with_capacity(512);
        let produced = engine.process_into(&[0.5f32; 200], &mut dest);
        assert_eq!(produced, dest.len());
        assert_eq!(engine.fetch_available(), 0);
        while !engine.finished() {
            engine.flush_into(&mut dest, 0);
        }
        assert_eq!(dest.len() as u64, engine.output_cursor());
        assert_eq!(dest.len(), 200);
    }

    #[test]
    fn cursors_advance_in_lockstep_without_gates() {
        let mut engine = builder(8000.0, 64, 16).build().expect("build");
        let mut out = Vec::new();
        engine.process_offline(&vec![0.3f32; 640], &mut out);
        assert_eq!(engine.input_cursor(), 640);
        assert_eq!(engine.output_cursor(), 640);
        // The output clock may schedule one final hop the input clock never
        // matches, but the two never drift further apart than that.
        let status = engine.status();
        assert!((status.win_center_out - status.win_center_in).abs() <= 16);
    }

    #[test]
    fn randomized_configurations_reconstruct() {
        let rates = [8000.0, 16000.0, 44100.0, 48000.0, 96000.0];
        let mut rng = StdRng::seed_from_u64(0);
        for iter in 0..40u64 {
            let frame_len = rng.gen_range(3..=2000);
            let hop_min = (frame_len / 64).max(1);
            let hop_max = ((frame_len - 1) / 2).max(hop_min);
            let hop = rng.gen_range(hop_min..=hop_max);
            let chunk = rng.gen_range(1..=16000);
            let sample_rate = rates[rng.gen_range(0..rates.len())];
            let len = frame_len + rng.gen_range(1..=6000);
            let input = clipped_noise(len, 0.2, 1000 + iter);

            let mut engine = builder(sample_rate, frame_len, hop)
                .set_max_input_chunk(chunk)
                .build()
                .expect("build");
            let out = run_streaming(&mut engine, &input, chunk);
            assert_eq!(
                out.len(),
                input.len(),
                "iter {} frame_len {} hop {} chunk {}",
                iter,
                frame_len,
                hop,
                chunk
            );
            let err = max_abs_diff(&input, &out);
            assert!(
                err <= db2lin(-120.0),
                "iter {} frame_len {} hop {} chunk {}: error {}",
                iter,
                frame_len,
                hop,
                chunk,
                err
            );
        }
    }

    #[test]
    fn engines_run_independently_across_threads() {
        let threads = 8;
        let iterations = 100u64;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let rates = [8000.0, 16000.0, 44100.0, 48000.0, 96000.0];
                    let mut rng = StdRng::seed_from_u64(0xACC0 + t as u64);
                    barrier.wait();
                    for iter in 0..iterations {
                        let frame_len = rng.gen_range(16..=512);
                        let hop = rng.gen_range((frame_len / 8).max(1)..=frame_len / 2);
                        let chunk = rng.gen_range(1..=1024);
                        let sample_rate = rates[rng.gen_range(0..rates.len())];
                        let len = 2 * frame_len + rng.gen_range(0..2000);
                        let input = clipped_noise(len, 0.2, t as u64 * 10_000 + iter);

                        let mut engine = builder(sample_rate, frame_len, hop)
                            .set_max_input_chunk(chunk)
                            .build()
                            .expect("build");
                        let out = run_streaming(&mut engine, &input, chunk);
                        assert_eq!(out.len(), input.len());
                        let err = max_abs_diff(&input, &out);
                        assert!(
                            err <= db2lin(-120.0),
                            "thread {} iter {}: error {}",
                            t,
                            iter,
                            err
                        );
                        assert_eq!(engine.failures().output_overflows, 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }
    }

    #[test]
    fn spectral_identity_transform_is_transparent() {
        use rustfft::num_complex::Complex;
        use rustfft::FftPlanner;

        let n = 512;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let ifft = planner.plan_fft_inverse(n);
        let mut spectrum = vec![Complex::new(0.0f32, 0.0f32); n];
        let mut fft_scratch = vec![Complex::new(0.0f32, 0.0f32); fft.get_inplace_scratch_len()];
        let mut ifft_scratch = vec![Complex::new(0.0f32, 0.0f32); ifft.get_inplace_scratch_len()];

        let transform =
            move |frame_in: &[f32], frame_out: &mut [f32], window: &[f32], _s: &FrameStatus| {
                for (bin, &x) in spectrum.iter_mut().zip(frame_in) {
                    *bin = Complex::new(x, 0.0);
                }
                fft.process_with_scratch(&mut spectrum, &mut fft_scratch);
                ifft.process_with_scratch(&mut spectrum, &mut ifft_scratch);
                let scale = 1.0 / n as f32;
                for ((out, bin), &w) in frame_out.iter_mut().zip(&spectrum).zip(window) {
                    *out = bin.re * scale * w;
                }
            };

        let input = sine(16000.0, 440.0, 0.5);
        let mut engine = builder(16000.0, n, 128)
            .build_with(transform)
            .expect("build");
        let mut out = Vec::new();
        engine.process_offline(&input, &mut out);
        assert_eq!(out.len(), input.len());
        let err = max_abs_diff(&input, &out);
        assert!(err <= db2lin(-80.0), "round-trip error {}", err);
    }
}
