//! The mixing core: per-track extraction and decoding, sample mixing and
//! re-encoding, video pass-through, the Container Writer and the driver
//! loop that steps them all on one thread.

pub mod constants;
pub mod extractor;
pub mod mixer;
pub mod muxer;
pub mod pipeline;
pub mod sample;
pub mod state;
pub mod video;
pub mod worker;

#[cfg(test)]
pub mod testing;

pub use extractor::AudioSampleExtractor;
pub use mixer::{AudioSampleMixer, create_audio_output_format, mix_samples};
pub use muxer::Mp4Muxer;
pub use pipeline::AudioMixer;
pub use sample::AudioSample;
pub use state::{GetSampleResult, OperationState};
pub use video::VideoSampleExtractor;
pub use worker::SampleWorker;
