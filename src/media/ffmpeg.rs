//! ffmpeg glue shared by the MP4 demuxer, the MP4 writer and the AAC
//! encoder: library setup, codec id and MIME mapping, and conversion between
//! stream parameters and [`MediaFormat`].
//!
//! Rotation travels as the stream's display matrix side data, which needs
//! FFmpeg 6.1 or newer.

use std::{mem, ptr, slice, sync::OnceLock};

use bytes::Bytes;
use ffmpeg_next::{
    self as ffmpeg, Rational, Rescale,
    codec::{self, Id},
    ffi, format, media,
};

use crate::{
    common::{Error, Result},
    media::{
        MIMETYPE_AUDIO_AAC, MIMETYPE_AUDIO_AC3, MIMETYPE_AUDIO_ALAC, MIMETYPE_AUDIO_FLAC,
        MIMETYPE_AUDIO_MPEG, MIMETYPE_AUDIO_OPUS, MIMETYPE_AUDIO_RAW, MIMETYPE_AUDIO_VORBIS,
        MIMETYPE_VIDEO_AV1, MIMETYPE_VIDEO_AVC, MIMETYPE_VIDEO_HEVC, MIMETYPE_VIDEO_MPEG4,
        MIMETYPE_VIDEO_VP9, MediaFormat, TrackKind,
    },
};

pub const MICROS: Rational = Rational(1, 1_000_000);

/// AAC access units carry 1024 samples per channel.
const AAC_FRAME_SIZE: i32 = 1024;

static INIT: OnceLock<std::result::Result<(), ffmpeg::Error>> = OnceLock::new();

/// Register ffmpeg's formats and codecs once and quiet its logging down to
/// errors.
pub fn init() -> Result<()> {
    let outcome = INIT.get_or_init(|| {
        ffmpeg::init()?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(())
    });
    (*outcome).map_err(Error::Ffmpeg)
}

const CODECS: &[(Id, &str)] = &[
    (Id::H264, MIMETYPE_VIDEO_AVC),
    (Id::HEVC, MIMETYPE_VIDEO_HEVC),
    (Id::MPEG4, MIMETYPE_VIDEO_MPEG4),
    (Id::VP9, MIMETYPE_VIDEO_VP9),
    (Id::AV1, MIMETYPE_VIDEO_AV1),
    (Id::AAC, MIMETYPE_AUDIO_AAC),
    (Id::MP3, MIMETYPE_AUDIO_MPEG),
    (Id::FLAC, MIMETYPE_AUDIO_FLAC),
    (Id::OPUS, MIMETYPE_AUDIO_OPUS),
    (Id::ALAC, MIMETYPE_AUDIO_ALAC),
    (Id::AC3, MIMETYPE_AUDIO_AC3),
    (Id::VORBIS, MIMETYPE_AUDIO_VORBIS),
    (Id::PCM_S16LE, MIMETYPE_AUDIO_RAW),
];

pub fn mime_for(id: Id) -> Option<&'static str> {
    CODECS
        .iter()
        .find(|(codec, _)| *codec == id)
        .map(|(_, mime)| *mime)
}

pub fn codec_id(mime: &str) -> Option<Id> {
    CODECS
        .iter()
        .find(|(_, known)| *known == mime)
        .map(|(codec, _)| *codec)
}

// ─── Display matrix ──────────────────────────────────────────────────────────

/// Unity display matrix entries, 16.16 and 2.30 fixed point.
const FIXED_ONE: i32 = 0x0001_0000;
const FIXED_W: i32 = 0x4000_0000;

/// The tkhd display matrix for a clockwise rotation.
pub fn rotation_matrix(degrees: u32) -> [i32; 9] {
    let (a, b, c, d) = match degrees % 360 {
        90 => (0, FIXED_ONE, -FIXED_ONE, 0),
        180 => (-FIXED_ONE, 0, 0, -FIXED_ONE),
        270 => (0, -FIXED_ONE, FIXED_ONE, 0),
        _ => (FIXED_ONE, 0, 0, FIXED_ONE),
    };
    [a, b, 0, c, d, 0, 0, 0, FIXED_W]
}

/// Rotation encoded by a display matrix. Anything that is not a pure
/// quarter turn reads as 0.
pub fn matrix_rotation(matrix: &[i32; 9]) -> u32 {
    match (matrix[0], matrix[1], matrix[3], matrix[4]) {
        (0, b, c, 0) if b == FIXED_ONE && c == -FIXED_ONE => 90,
        (a, 0, 0, d) if a == -FIXED_ONE && d == -FIXED_ONE => 180,
        (0, b, c, 0) if b == -FIXED_ONE && c == FIXED_ONE => 270,
        _ => 0,
    }
}

// ─── Stream parameters ───────────────────────────────────────────────────────

/// The [`MediaFormat`] of an audio or video stream; `None` for anything
/// else. Codecs without a MIME mapping come out as `<kind>/x-<codec name>`.
pub fn stream_format(stream: &format::stream::Stream) -> Option<MediaFormat> {
    let params = stream.parameters();
    let kind = match params.medium() {
        media::Type::Audio => TrackKind::Audio,
        media::Type::Video => TrackKind::Video,
        _ => return None,
    };
    let mime = match mime_for(params.id()) {
        Some(mime) => mime.to_string(),
        None => format!("{}x-{}", kind.prefix(), params.id().name()),
    };

    let mut format = MediaFormat::new(mime);
    let time_base = stream.time_base();
    if time_base.numerator() == 1 && time_base.denominator() > 0 {
        format.timescale = Some(time_base.denominator() as u32);
    }
    if stream.duration() > 0 {
        format.duration_us = Some(stream.duration().rescale(time_base, MICROS) as u64);
    }

    unsafe {
        let raw = params.as_ptr();
        match kind {
            TrackKind::Audio => {
                format.sample_rate = u32::try_from((*raw).sample_rate).ok().filter(|r| *r > 0);
                format.channel_count =
                    u16::try_from((*raw).ch_layout.nb_channels).ok().filter(|c| *c > 0);
                if params.id() == Id::PCM_S16LE {
                    format.pcm_bits = Some(16);
                }
            }
            TrackKind::Video => {
                format.width = u32::try_from((*raw).width).ok();
                format.height = u32::try_from((*raw).height).ok();
                format.rotation = Some(display_rotation(raw));
            }
        }
        if (*raw).bit_rate > 0 {
            format.bit_rate = u32::try_from((*raw).bit_rate).ok();
        }
        if !(*raw).extradata.is_null() && (*raw).extradata_size > 0 {
            format.csd = Some(Bytes::copy_from_slice(slice::from_raw_parts(
                (*raw).extradata,
                (*raw).extradata_size as usize,
            )));
        }
    }
    Some(format)
}

unsafe fn display_rotation(raw: *const ffi::AVCodecParameters) -> u32 {
    let side = unsafe {
        ffi::av_packet_side_data_get(
            (*raw).coded_side_data,
            (*raw).nb_coded_side_data,
            ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        )
    };
    if side.is_null() || unsafe { (*side).size } < mem::size_of::<[i32; 9]>() {
        return 0;
    }
    let matrix = unsafe { ptr::read_unaligned((*side).data as *const [i32; 9]) };
    matrix_rotation(&matrix)
}

/// Codec parameters the muxer needs to write a track of `format`, with
/// `rotation` attached as a display matrix when it is not 0.
pub fn stream_parameters(format: &MediaFormat, rotation: u32) -> Result<codec::Parameters> {
    let unsupported = || Error::UnsupportedCodec(format.mime.clone());
    let id = codec_id(&format.mime).ok_or_else(unsupported)?;
    let kind = format.kind().ok_or_else(unsupported)?;

    let mut params = codec::Parameters::new();
    unsafe {
        let raw = params.as_mut_ptr();
        (*raw).codec_id = id.into();
        match kind {
            TrackKind::Video => {
                (*raw).codec_type = ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
                (*raw).width = format.width.unwrap_or(0) as i32;
                (*raw).height = format.height.unwrap_or(0) as i32;
            }
            TrackKind::Audio => {
                (*raw).codec_type = ffi::AVMediaType::AVMEDIA_TYPE_AUDIO;
                (*raw).sample_rate = format.sample_rate.unwrap_or(0) as i32;
                ffi::av_channel_layout_default(
                    &mut (*raw).ch_layout,
                    i32::from(format.channel_count.unwrap_or(1)),
                );
                if id == Id::AAC {
                    (*raw).frame_size = AAC_FRAME_SIZE;
                }
                if id == Id::PCM_S16LE {
                    (*raw).bits_per_coded_sample = 16;
                }
            }
        }
        if let Some(bit_rate) = format.bit_rate {
            (*raw).bit_rate = i64::from(bit_rate);
        }

        if let Some(csd) = format.csd.as_ref().filter(|csd| !csd.is_empty()) {
            let padded = csd.len() + ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
            let data = ffi::av_mallocz(padded) as *mut u8;
            if data.is_null() {
                return Err(ffmpeg::Error::Unknown.into());
            }
            ptr::copy_nonoverlapping(csd.as_ptr(), data, csd.len());
            (*raw).extradata = data;
            (*raw).extradata_size = csd.len() as i32;
        }

        if kind == TrackKind::Video && rotation % 360 != 0 {
            let matrix = rotation_matrix(rotation);
            let side = ffi::av_packet_side_data_new(
                &mut (*raw).coded_side_data,
                &mut (*raw).nb_coded_side_data,
                ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
                mem::size_of::<[i32; 9]>(),
                0,
            );
            if side.is_null() {
                return Err(ffmpeg::Error::Unknown.into());
            }
            ptr::write_unaligned((*side).data as *mut [i32; 9], matrix);
        }
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_survives_the_display_matrix() {
        for degrees in [0, 90, 180, 270] {
            assert_eq!(matrix_rotation(&rotation_matrix(degrees)), degrees);
        }
        assert_eq!(matrix_rotation(&rotation_matrix(450)), 90);
    }

    #[test]
    fn skewed_matrix_reads_as_unrotated() {
        let mut matrix = rotation_matrix(90);
        matrix[1] = 0x8000;
        assert_eq!(matrix_rotation(&matrix), 0);
    }

    #[test]
    fn codec_table_is_symmetric() {
        for (id, mime) in CODECS {
            assert_eq!(mime_for(*id), Some(*mime));
            assert_eq!(codec_id(mime), Some(*id));
        }
        assert_eq!(codec_id("video/x-unknown"), None);
    }

    #[test]
    fn parameters_carry_layout_and_setup_data() {
        let format = MediaFormat::audio(MIMETYPE_AUDIO_AAC, 48_000, 2).with_csd(vec![0x11, 0x90]);
        let params = stream_parameters(&format, 0).unwrap();
        assert_eq!(params.id(), Id::AAC);
        assert_eq!(params.medium(), media::Type::Audio);
        unsafe {
            let raw = params.as_ptr();
            assert_eq!((*raw).sample_rate, 48_000);
            assert_eq!((*raw).ch_layout.nb_channels, 2);
            assert_eq!((*raw).extradata_size, 2);
        }
    }

    #[test]
    fn video_parameters_carry_rotation() {
        let mut format = MediaFormat::new(MIMETYPE_VIDEO_AVC);
        format.width = Some(320);
        format.height = Some(240);
        let params = stream_parameters(&format, 270).unwrap();
        unsafe {
            let raw = params.as_ptr();
            assert_eq!((*raw).width, 320);
            assert_eq!(display_rotation(raw), 270);
        }
        let plain = stream_parameters(&format, 0).unwrap();
        unsafe { assert_eq!(display_rotation(plain.as_ptr()), 0) };
    }

    #[test]
    fn unmapped_mime_is_unsupported() {
        assert!(matches!(
            stream_parameters(&MediaFormat::new("audio/x-mystery"), 0),
            Err(Error::UnsupportedCodec(_))
        ));
    }
}
