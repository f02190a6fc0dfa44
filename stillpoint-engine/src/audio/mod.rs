//! Audio backend: decode, resample, device output
//!
//! Everything below the engine: file decoding and normalization to the
//! standard 44.1 kHz stereo f32 format, the lock-free frame queue, and the
//! cpal device stream.

pub mod decoder;
pub mod output;
pub mod resampler;
pub mod ring_buffer;
pub mod types;

pub use decoder::TrackDecoder;
pub use output::AudioOutput;
pub use ring_buffer::{AudioConsumer, AudioProducer, AudioRingBuffer};
pub use types::{AudioFrame, TrackBuffer, CROSSFADE_LEAD_IN_FRAMES, STANDARD_CHANNELS, STANDARD_SAMPLE_RATE};
