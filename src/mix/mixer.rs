//! `mix/mixer.rs` — decode → mix → encode for the audio side of the pipeline.
//!
//! Contains:
//! - [`AudioSampleMixer`]: owns the audio extractors and the encoder, and
//!   drains encoded output into the Container Writer
//! - [`mix_samples`]: clamped additive mixing of interleaved i16 PCM
//! - [`create_audio_output_format`]: what the encoder is configured to produce

use tracing::{debug, trace, warn};

use crate::{
    common::{Error, Result},
    configs::MixerConfig,
    media::{
        BufferFlags, BufferInfo, Codec, CodecFactory, ContainerSink, MIMETYPE_AUDIO_AAC,
        MediaFormat, OutputEvent, TrackKind,
    },
    mix::{
        AudioSample, AudioSampleExtractor, GetSampleResult, Mp4Muxer, OperationState,
        constants::SHORT_MAX,
    },
};

// ─── Mixing ──────────────────────────────────────────────────────────────────

/// Mix the unread part of every input into `out` as little-endian i16 and
/// return the number of bytes written.
///
/// Mixing stops when the shortest input with data left runs out or `out` is
/// full. Inputs with nothing left contribute silence.
pub fn mix_samples(inputs: &mut [&mut AudioSample], out: &mut [u8]) -> Result<usize> {
    let shortest = inputs
        .iter()
        .map(|sample| sample.remaining())
        .filter(|&remaining| remaining > 0)
        .min()
        .ok_or(Error::NothingToMix)?;
    let count = shortest.min(out.len() / 2);

    for slot in out.chunks_exact_mut(2).take(count) {
        let mut sum = 0.0f32;
        for sample in inputs.iter_mut() {
            if let Some(value) = sample.read_next() {
                sum += f32::from(value) / SHORT_MAX;
            }
        }
        let mixed = (sum.clamp(-1.0, 1.0) * SHORT_MAX).round() as i16;
        slot.copy_from_slice(&mixed.to_le_bytes());
    }

    Ok(count * 2)
}

/// The encoder's target format: the authority's own format when it is
/// already AAC, otherwise AAC at the configured profile and bitrate with the
/// authority's rate and channel count.
pub fn create_audio_output_format(input: &MediaFormat, config: &MixerConfig) -> MediaFormat {
    if input.is_aac() {
        return input.clone();
    }

    let mut format = MediaFormat::new(MIMETYPE_AUDIO_AAC);
    format.sample_rate = input.sample_rate;
    format.channel_count = input.channel_count;
    format.aac_profile = Some(config.aac_profile);
    format.bit_rate = Some(config.output_bit_rate);
    format
}

// ─── AudioSampleMixer ────────────────────────────────────────────────────────

pub struct AudioSampleMixer {
    extractors: Vec<AudioSampleExtractor>,
    authority: usize,
    encoder: Option<Box<dyn Codec>>,
    actual_output_format: Option<MediaFormat>,
    eos_queued: bool,
    finished: bool,
}

impl AudioSampleMixer {
    /// Take ownership of `extractors` and start an encoder for the mix.
    /// Exactly one extractor must sync presentation time.
    pub fn new(
        extractors: Vec<AudioSampleExtractor>,
        codecs: &dyn CodecFactory,
        config: &MixerConfig,
    ) -> Result<Self> {
        let authorities: Vec<usize> = extractors
            .iter()
            .enumerate()
            .filter(|(_, extractor)| extractor.syncs_presentation_time())
            .map(|(index, _)| index)
            .collect();
        let [authority] = authorities[..] else {
            return Err(Error::TimingAuthority(authorities.len()));
        };

        let output_format =
            create_audio_output_format(extractors[authority].input_format(), config);
        debug!(
            "audio encoder target: {} ({:?} Hz, {:?} ch, {:?} bps)",
            output_format.mime,
            output_format.sample_rate,
            output_format.channel_count,
            output_format.bit_rate
        );
        let encoder = codecs.create_encoder(&output_format)?;

        Ok(Self {
            extractors,
            authority,
            encoder: Some(encoder),
            actual_output_format: None,
            eos_queued: false,
            finished: false,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The format the encoder announced, once it has.
    pub fn actual_output_format(&self) -> Option<&MediaFormat> {
        self.actual_output_format.as_ref()
    }

    /// One scheduling step: drain the encoder, decode, feed the encoder,
    /// extract. Returns whether anything moved.
    pub fn process_next_sample<S: ContainerSink>(
        &mut self,
        muxer: &mut Mp4Muxer<S>,
    ) -> Result<bool> {
        let mut busy = false;

        while self.feed_muxer(muxer)? != OperationState::None {
            busy = true;
        }

        for extractor in &mut self.extractors {
            busy |= extractor.decode_next_sample()?;
        }

        while self.feed_encoder()? {
            busy = true;
        }

        for extractor in &mut self.extractors {
            busy |= extractor.extract_next_sample()?;
        }

        Ok(busy)
    }

    /// Release every extractor, then the encoder. Later calls are no-ops.
    pub fn release(&mut self) -> Result<()> {
        let mut result = Ok(());
        for extractor in &mut self.extractors {
            result = result.and(extractor.release());
        }
        if let Some(mut encoder) = self.encoder.take() {
            result = result.and(encoder.stop());
        }
        result
    }

    fn feed_muxer<S: ContainerSink>(&mut self, muxer: &mut Mp4Muxer<S>) -> Result<OperationState> {
        if self.finished {
            return Ok(OperationState::None);
        }
        let encoder = self.encoder.as_mut().ok_or(Error::CodecReleased)?;

        let (index, mut info) = match encoder.dequeue_output_buffer()? {
            OutputEvent::TryAgainLater => return Ok(OperationState::None),
            OutputEvent::FormatChanged => {
                if self.actual_output_format.is_some() {
                    return Err(Error::OutputFormatChangedTwice);
                }
                let format = encoder.output_format().ok_or(Error::OutputFormatUnknown)?;
                debug!("encoder output format: {} {:?} Hz", format.mime, format.sample_rate);
                muxer.set_output_format(TrackKind::Audio, format.clone())?;
                self.actual_output_format = Some(format);
                return Ok(OperationState::RetryImmediately);
            }
            OutputEvent::BuffersChanged => return Ok(OperationState::RetryImmediately),
            OutputEvent::Buffer { index, info } => (index, info),
        };

        if info.is_eos() {
            debug!("encoder drained, audio finished");
            self.finished = true;
            info = BufferInfo::new(0, 0, info.flags);
        }

        if info.flags.contains(BufferFlags::CODEC_CONFIG) {
            trace!("discarding {} bytes of codec config", info.size);
            encoder.release_output_buffer(index)?;
            return Ok(OperationState::RetryImmediately);
        }

        if self.actual_output_format.is_none() {
            return Err(Error::OutputFormatUnknown);
        }

        let data = encoder.output_buffer(index)?;
        let payload = data.get(..info.size).ok_or(Error::BufferTooSmall {
            size: info.size,
            capacity: data.len(),
        })?;
        muxer.write_sample(TrackKind::Audio, payload, &info)?;
        encoder.release_output_buffer(index)?;
        Ok(OperationState::Consumed)
    }

    fn feed_encoder(&mut self) -> Result<bool> {
        if self.eos_queued {
            return Ok(false);
        }
        let encoder = self.encoder.as_mut().ok_or(Error::CodecReleased)?;

        let results: Vec<GetSampleResult<'_>> = self
            .extractors
            .iter_mut()
            .map(AudioSampleExtractor::get_next_sample)
            .collect();

        // The authority's timestamp stamps the mixed buffer, so it has to be
        // ready too.
        let presentation_time_us = match &results[self.authority] {
            GetSampleResult::Pending => return Ok(false),
            GetSampleResult::EndOfStream => None,
            GetSampleResult::Ready(sample) => Some(sample.presentation_time_us),
        };
        if presentation_time_us.is_some() && results.iter().any(GetSampleResult::is_pending) {
            return Ok(false);
        }

        let Some(index) = encoder.dequeue_input_buffer()? else {
            return Ok(false);
        };

        let Some(presentation_time_us) = presentation_time_us else {
            debug!("timing authority ended, queueing end of stream to the encoder");
            encoder.queue_input_buffer(index, BufferInfo::end_of_stream())?;
            self.eos_queued = true;
            return Ok(true);
        };

        let mut ready: Vec<&mut AudioSample> = results
            .into_iter()
            .filter_map(|result| match result {
                GetSampleResult::Ready(sample) => Some(sample),
                _ => None,
            })
            .collect();
        let size = mix_samples(&mut ready, encoder.input_buffer(index)?)?;
        drop(ready);

        trace!("mixed {} bytes at {}us", size, presentation_time_us);
        // An authority sample mixed across several encoder buffers stamps
        // every piece with its own start time, so consecutive buffers can
        // share a timestamp. AacEncoder re-times its output by sample count
        // and the writer keeps decode times strictly increasing.
        encoder.queue_input_buffer(
            index,
            BufferInfo::new(size, presentation_time_us, BufferFlags::NONE),
        )?;

        for extractor in &mut self.extractors {
            extractor.release_sample()?;
        }
        Ok(true)
    }
}

impl Drop for AudioSampleMixer {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("audio mixer released with error: {e}");
        }
    }
}
