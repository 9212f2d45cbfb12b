#![forbid(unsafe_code)]
//! Streaming overlap and overlap-add frame processing for audio.
//!
//! `framestitch` segments a continuous audio stream into overlapping,
//! windowed frames, hands each frame to a user transform, and either
//! discards the results (analysis with [`OlEngine`]) or reconstructs a
//! continuous signal by overlap-add (resynthesis with [`OlaEngine`]). The
//! overlap-add engine exposes offline, streaming and real-time drivers over
//! a single primitive, behaves identically for any input chunk size, and
//! performs no allocation after construction.
//!
//! # Quick start
//!
//! Reconstructing a signal through the default windowed passthrough:
//!
//! ```
//! use framestitch::OlaBuilder;
//!
//! let input: Vec<f32> = (0..44100)
//!     .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
//!     .collect();
//!
//! let mut engine = OlaBuilder::new()
//!     .set_sample_rate(44100.0)
//!     .set_frame_len(882)
//!     .set_hop(220)
//!     .build()
//!     .unwrap();
//!
//! let mut output = Vec::new();
//! engine.process_offline(&input, &mut output);
//! assert_eq!(output.len(), input.len());
//! ```
//!
//! # Streaming and real time
//!
//! For chunked use, feed batches sized by
//! [`OlaEngine::process_input_available`], drain with [`OlaEngine::fetch`],
//! and poll [`OlaEngine::flush`] at end of stream. Inside an audio callback
//! use [`OlaEngine::process_realtime`], which returns exactly one output
//! sample per input sample and zero-fills the declared latency of one frame.
//!
//! # Time-scale modification
//!
//! Input consumption and output emission run on separate clocks. Installing
//! hop gates through the builder decouples them:
//!
//! ```
//! use framestitch::{FrameStatus, OlaBuilder};
//!
//! // Emit two output hops for every consumed input hop: a 2x stretch.
//! let mut toggle = false;
//! let mut engine = OlaBuilder::new()
//!     .set_sample_rate(48000.0)
//!     .set_frame_len(1024)
//!     .set_hop(256)
//!     .set_target_output_len(96000)
//!     .set_consume_gate(move |_status: &FrameStatus| {
//!         toggle = !toggle;
//!         toggle
//!     })
//!     .build()
//!     .unwrap();
//! ```

pub mod core;
pub mod engine;
pub mod error;

pub use crate::core::ring_buffer::RingBuffer;
pub use crate::core::window::{generate_window, normalize_window_sum, WindowType};
pub use crate::engine::{
    FailureCounters, FrameSink, FrameStatus, FrameTransform, HopGate, OlBuilder, OlEngine,
    OlaBuilder, OlaEngine, WindowedPassthrough,
};
pub use crate::error::BuildError;
