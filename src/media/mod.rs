//! Platform capability layer: demuxers, codecs and the physical container
//! writer the mixing core is built on.

pub mod aac;
pub mod buffer;
pub mod codec;
pub mod detect;
pub mod ffmpeg;
pub mod format;
pub mod mp4;
pub mod pcm;
pub mod sink;
pub mod source;
pub mod symphonia;

pub use aac::{AacEncoder, AudioSpecificConfig};
pub use buffer::*;
pub use codec::*;
pub use detect::{ContainerFormat, detect_format, open_source};
pub use format::*;
pub use sink::ContainerSink;
pub use source::{SampleInfo, SampleSource, SharedSource, find_track, shared};

pub use self::symphonia::{SymphoniaCodecs, SymphoniaDecoder, SymphoniaSource};
