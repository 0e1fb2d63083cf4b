//! Track formats — what a demuxer reports, what a codec is configured with,
//! and what the container writer registers as an output track.

use bytes::Bytes;

use super::aac::AudioSpecificConfig;

// ── MIME types ───────────────────────────────────────────────────────────────

pub const MIMETYPE_AUDIO_AAC: &str = "audio/mp4a-latm";
pub const MIMETYPE_AUDIO_MPEG: &str = "audio/mpeg";
pub const MIMETYPE_AUDIO_FLAC: &str = "audio/flac";
pub const MIMETYPE_AUDIO_VORBIS: &str = "audio/vorbis";
pub const MIMETYPE_AUDIO_OPUS: &str = "audio/opus";
pub const MIMETYPE_AUDIO_ALAC: &str = "audio/alac";
pub const MIMETYPE_AUDIO_AC3: &str = "audio/ac3";
pub const MIMETYPE_AUDIO_RAW: &str = "audio/raw";

pub const MIMETYPE_VIDEO_AVC: &str = "video/avc";
pub const MIMETYPE_VIDEO_HEVC: &str = "video/hevc";
pub const MIMETYPE_VIDEO_MPEG4: &str = "video/mp4v-es";
pub const MIMETYPE_VIDEO_VP9: &str = "video/x-vnd.on2.vp9";
pub const MIMETYPE_VIDEO_AV1: &str = "video/av01";

/// Logical track family. The MIME prefix decides membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Audio => "audio/",
            Self::Video => "video/",
        }
    }

    pub fn matches(self, mime: &str) -> bool {
        mime.starts_with(self.prefix())
    }
}

/// Interleaved PCM shape: what a decoder produces, or is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmLayout {
    pub sample_rate: u32,
    pub channels: usize,
}

impl PcmLayout {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Layout of an audio format, if it carries both rate and channel count.
    ///
    /// For AAC the AudioSpecificConfig wins over the container fields: MP4
    /// sample entries often say stereo whatever the stream holds.
    pub fn of(format: &MediaFormat) -> Option<Self> {
        let asc = format
            .csd
            .as_deref()
            .filter(|_| format.is_aac())
            .and_then(|csd| AudioSpecificConfig::parse(csd).ok());
        let sample_rate = asc
            .map(|asc| asc.sample_rate)
            .filter(|rate| *rate > 0)
            .or(format.sample_rate)?;
        let channels = asc
            .and_then(|asc| asc.channels())
            .or(format.channel_count.map(usize::from))?;
        Some(Self::new(sample_rate, channels))
    }
}

/// Format descriptor of a single track.
///
/// Only `mime` is mandatory. `csd` holds codec-specific setup data (the AAC
/// AudioSpecificConfig, an `avcC` record, FLAC STREAMINFO, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaFormat {
    pub mime: String,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
    pub pcm_bits: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Clockwise display rotation in degrees.
    pub rotation: Option<u32>,
    pub max_input_size: Option<usize>,
    pub bit_rate: Option<u32>,
    pub aac_profile: Option<u32>,
    pub duration_us: Option<u64>,
    pub timescale: Option<u32>,
    pub csd: Option<Bytes>,
}

impl MediaFormat {
    pub fn new(mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            ..Default::default()
        }
    }

    pub fn audio(mime: impl Into<String>, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> Option<TrackKind> {
        [TrackKind::Audio, TrackKind::Video]
            .into_iter()
            .find(|kind| kind.matches(&self.mime))
    }

    pub fn is_aac(&self) -> bool {
        self.mime == MIMETYPE_AUDIO_AAC
    }

    pub fn with_csd(mut self, csd: impl Into<Bytes>) -> Self {
        self.csd = Some(csd.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_mime_prefix() {
        assert_eq!(
            MediaFormat::new(MIMETYPE_VIDEO_AVC).kind(),
            Some(TrackKind::Video)
        );
        assert_eq!(
            MediaFormat::new(MIMETYPE_AUDIO_AAC).kind(),
            Some(TrackKind::Audio)
        );
        assert_eq!(MediaFormat::new("text/3gpp-tt").kind(), None);
    }

    #[test]
    fn pcm_layout_needs_rate_and_channels() {
        let format = MediaFormat::audio(MIMETYPE_AUDIO_AAC, 44_100, 2);
        assert_eq!(PcmLayout::of(&format), Some(PcmLayout::new(44_100, 2)));
        assert_eq!(PcmLayout::of(&MediaFormat::new(MIMETYPE_AUDIO_AAC)), None);
    }

    #[test]
    fn aac_layout_comes_from_its_config() {
        // 48 kHz mono behind a stereo 44.1 kHz sample entry.
        let format = MediaFormat::audio(MIMETYPE_AUDIO_AAC, 44_100, 2).with_csd(vec![0x11, 0x88]);
        assert_eq!(PcmLayout::of(&format), Some(PcmLayout::new(48_000, 1)));

        let bare = MediaFormat::new(MIMETYPE_AUDIO_AAC).with_csd(vec![0x11, 0x88]);
        assert_eq!(PcmLayout::of(&bare), Some(PcmLayout::new(48_000, 1)));

        // Unparseable configs and other codecs keep the container fields.
        let broken = MediaFormat::audio(MIMETYPE_AUDIO_AAC, 44_100, 2).with_csd(vec![0x11]);
        assert_eq!(PcmLayout::of(&broken), Some(PcmLayout::new(44_100, 2)));
        let flac = MediaFormat::audio(MIMETYPE_AUDIO_FLAC, 44_100, 2).with_csd(vec![0x11, 0x88]);
        assert_eq!(PcmLayout::of(&flac), Some(PcmLayout::new(44_100, 2)));
    }
}
