//! Mix an external audio track into a video's own audio and re-mux the
//! result, copying the video stream and its rotation untouched.
//!
//! ```no_run
//! use dubmix::{AudioMixer, MixerConfig, SymphoniaCodecs};
//!
//! let mixer = AudioMixer::new(SymphoniaCodecs::new(), MixerConfig::default());
//! mixer.mix_files("clip.mp4", "voiceover.m4a", "dubbed.mp4")?;
//! # Ok::<(), dubmix::Error>(())
//! ```

pub mod common;
pub mod configs;
pub mod media;
pub mod mix;

pub use common::{Error, Result};
pub use configs::{Config, LoggingConfig, MixerConfig};
pub use media::{
    AacEncoder, AudioSpecificConfig, BufferFlags, BufferInfo, Codec, CodecFactory, ContainerSink, MediaFormat, OutputEvent,
    PcmLayout, SampleInfo, SampleSource, SymphoniaCodecs, TrackKind,
    mp4::{Mp4Source, Mp4Writer},
};
pub use mix::{
    AudioMixer, AudioSample, AudioSampleExtractor, AudioSampleMixer, GetSampleResult, Mp4Muxer,
    OperationState, SampleWorker, VideoSampleExtractor, create_audio_output_format, mix_samples,
};
