//! Audio I/O: clip buffers, decoding, resampling and device output

pub mod buffer;
pub mod decoder;
pub mod output;
pub mod resampler;

pub use buffer::{ClipId, ClipSource, SampleBuffer};
pub use decoder::SymphoniaLoader;
pub use output::DeviceOutput;
pub use resampler::Resampler;
