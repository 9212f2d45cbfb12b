//! Containers, window kernels and numerics shared by the engines.

pub mod lut;
pub mod ring_buffer;
pub mod window;

pub use ring_buffer::RingBuffer;
pub use window::{apply_window, generate_window, normalize_window_sum, WindowType};
