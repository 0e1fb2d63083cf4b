//! symphonia-backed audio: a Sample Source for non-MP4 containers, a PCM
//! decoder speaking the [`Codec`] queue protocol, and the factory that pairs
//! it with the AAC encoder.

pub mod decoder;
pub mod source;

pub use decoder::SymphoniaDecoder;
pub use source::SymphoniaSource;

use symphonia::core::{
    audio::Channels,
    codecs::{
        CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_OPUS,
        CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8,
        CODEC_TYPE_VORBIS, CodecParameters, CodecType, DecoderOptions,
    },
};
use tracing::debug;

use crate::{
    common::{Error, Result},
    media::{
        AacEncoder, Codec, CodecFactory, MediaFormat, PcmLayout, DEFAULT_MAX_INPUT_SIZE,
        MIMETYPE_AUDIO_AAC,
        MIMETYPE_AUDIO_ALAC, MIMETYPE_AUDIO_FLAC, MIMETYPE_AUDIO_MPEG, MIMETYPE_AUDIO_OPUS,
        MIMETYPE_AUDIO_RAW, MIMETYPE_AUDIO_VORBIS,
    },
};

/// MIME type and PCM bit depth for a symphonia codec, if the pipeline knows it.
pub fn mime_for(codec: CodecType) -> Option<(&'static str, Option<u32>)> {
    Some(match codec {
        CODEC_TYPE_AAC => (MIMETYPE_AUDIO_AAC, None),
        CODEC_TYPE_MP3 => (MIMETYPE_AUDIO_MPEG, None),
        CODEC_TYPE_FLAC => (MIMETYPE_AUDIO_FLAC, None),
        CODEC_TYPE_VORBIS => (MIMETYPE_AUDIO_VORBIS, None),
        CODEC_TYPE_OPUS => (MIMETYPE_AUDIO_OPUS, None),
        CODEC_TYPE_ALAC => (MIMETYPE_AUDIO_ALAC, None),
        CODEC_TYPE_PCM_U8 => (MIMETYPE_AUDIO_RAW, Some(8)),
        CODEC_TYPE_PCM_S16LE => (MIMETYPE_AUDIO_RAW, Some(16)),
        CODEC_TYPE_PCM_S24LE => (MIMETYPE_AUDIO_RAW, Some(24)),
        CODEC_TYPE_PCM_S32LE => (MIMETYPE_AUDIO_RAW, Some(32)),
        _ => return None,
    })
}

pub fn codec_for(format: &MediaFormat) -> Option<CodecType> {
    Some(match format.mime.as_str() {
        MIMETYPE_AUDIO_AAC => CODEC_TYPE_AAC,
        MIMETYPE_AUDIO_MPEG => CODEC_TYPE_MP3,
        MIMETYPE_AUDIO_FLAC => CODEC_TYPE_FLAC,
        MIMETYPE_AUDIO_VORBIS => CODEC_TYPE_VORBIS,
        MIMETYPE_AUDIO_OPUS => CODEC_TYPE_OPUS,
        MIMETYPE_AUDIO_ALAC => CODEC_TYPE_ALAC,
        MIMETYPE_AUDIO_RAW => match format.pcm_bits {
            Some(8) => CODEC_TYPE_PCM_U8,
            Some(24) => CODEC_TYPE_PCM_S24LE,
            Some(32) => CODEC_TYPE_PCM_S32LE,
            _ => CODEC_TYPE_PCM_S16LE,
        },
        _ => return None,
    })
}

/// symphonia codec parameters equivalent to `format`.
pub fn codec_parameters(format: &MediaFormat) -> Result<CodecParameters> {
    let codec = codec_for(format).ok_or_else(|| Error::UnsupportedCodec(format.mime.clone()))?;

    let layout = PcmLayout::of(format);
    let mut params = CodecParameters::new();
    params.for_codec(codec);
    if let Some(rate) = layout.map(|l| l.sample_rate).or(format.sample_rate) {
        params.with_sample_rate(rate);
    }
    let channels = layout
        .and_then(|l| u32::try_from(l.channels).ok())
        .or(format.channel_count.map(u32::from));
    if let Some(count) = channels.filter(|c| (1..=32).contains(c)) {
        let mask = if count == 32 {
            u32::MAX
        } else {
            (1u32 << count) - 1
        };
        params.with_channels(Channels::from_bits_truncate(mask));
    }
    if let Some(csd) = &format.csd {
        params.with_extra_data(csd.to_vec().into_boxed_slice());
    }
    if let Some(bits) = format.pcm_bits.filter(|_| format.mime == MIMETYPE_AUDIO_RAW) {
        params.with_bits_per_sample(bits);
        params.with_bits_per_coded_sample(bits);

        let block = (bits as usize / 8).max(1) * usize::from(format.channel_count.unwrap_or(1));
        let max_bytes = format.max_input_size.unwrap_or(DEFAULT_MAX_INPUT_SIZE);
        params.with_max_frames_per_packet((max_bytes / block.max(1)) as u64);
    }
    Ok(params)
}

type EncoderFn = dyn Fn(&MediaFormat) -> Result<Box<dyn Codec>>;

/// [`CodecFactory`] backed by symphonia's decoder registry.
///
/// symphonia only decodes. AAC output goes through [`AacEncoder`] unless the
/// embedder plugs in another encoder with [`SymphoniaCodecs::with_encoder`].
#[derive(Default)]
pub struct SymphoniaCodecs {
    encoder: Option<Box<EncoderFn>>,
}

impl SymphoniaCodecs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoder<F>(mut self, make: F) -> Self
    where
        F: Fn(&MediaFormat) -> Result<Box<dyn Codec>> + 'static,
    {
        self.encoder = Some(Box::new(make));
        self
    }
}

impl CodecFactory for SymphoniaCodecs {
    fn create_decoder(
        &self,
        format: &MediaFormat,
        conform_to: Option<PcmLayout>,
    ) -> Result<Box<dyn Codec>> {
        let params = codec_parameters(format)?;
        let decoder =
            symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;
        debug!(
            "decoder for {} ({:?} Hz, {:?} ch), conform to {:?}",
            format.mime, format.sample_rate, format.channel_count, conform_to
        );

        let input_size = format.max_input_size.unwrap_or(DEFAULT_MAX_INPUT_SIZE);
        Ok(Box::new(SymphoniaDecoder::new(decoder, input_size, conform_to)))
    }

    fn create_encoder(&self, format: &MediaFormat) -> Result<Box<dyn Codec>> {
        match &self.encoder {
            Some(make) => make(format),
            None if format.is_aac() => Ok(Box::new(AacEncoder::new(format)?)),
            None => Err(Error::EncoderUnavailable(format.mime.clone())),
        }
    }
}
