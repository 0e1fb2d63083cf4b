use std::path::PathBuf;

use thiserror::Error;

use crate::media::TrackKind;

/// Every failure the mixing pipeline can surface.
///
/// Transient conditions (no free codec buffer, no output yet) are never errors;
/// they are reported as `OperationState::None` and absorbed by the driver's
/// back-off. Everything here aborts the whole mix.
#[derive(Debug, Error)]
pub enum Error {
    // ── Preconditions ────────────────────────────────────────────────────────
    #[error("file does not have {} track", .0.prefix())]
    MissingTrack(TrackKind),

    #[error("unable to acquire file descriptor for {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("track {0} does not exist")]
    TrackOutOfRange(usize),

    // ── Codec protocol violations ────────────────────────────────────────────
    #[error("audio output format changed twice")]
    OutputFormatChangedTwice,

    #[error("could not determine actual output format")]
    OutputFormatUnknown,

    #[error("codec buffer {0} is not lent out")]
    InvalidBuffer(usize),

    #[error("sample of {size} bytes does not fit a {capacity} byte buffer")]
    BufferTooSmall { size: usize, capacity: usize },

    #[error("nothing to mix: no input sample has remaining data")]
    NothingToMix,

    #[error("expected exactly one timing authority among the mixer inputs, found {0}")]
    TimingAuthority(usize),

    #[error("codec was already released")]
    CodecReleased,

    // ── Container writer misuse ──────────────────────────────────────────────
    #[error("container writer was already released")]
    MuxerReleased,

    #[error("{0:?} output format set after the container writer started")]
    FormatAfterStart(TrackKind),

    #[error("no track index set for {0:?}")]
    TrackNotConfigured(TrackKind),

    #[error("container sink: {0}")]
    SinkState(&'static str),

    // ── Formats and codecs ───────────────────────────────────────────────────
    #[error("malformed container: {0}")]
    Malformed(String),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("no encoder available for {0}")]
    EncoderUnavailable(String),

    // ── Wrapped ──────────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("ffmpeg: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("symphonia: {0}")]
    Symphonia(#[from] symphonia::core::errors::Error),

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
