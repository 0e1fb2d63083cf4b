//! ISO base media file format (MP4) input and output, on top of ffmpeg's
//! mov demuxer and muxer.

pub mod demux;
pub mod writer;

pub use demux::Mp4Source;
pub use writer::Mp4Writer;
