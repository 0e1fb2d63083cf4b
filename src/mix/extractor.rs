//! `mix/extractor.rs` — one audio track of a Sample Source feeding one
//! decoder, with decoded samples handed out one at a time.
//!
//! Extraction drains every free decoder input buffer in one call. Decoding
//! takes at most one output buffer per call (format notifications aside) so a
//! full encoder downstream cannot be starved by a decoder running ahead.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::{
    common::{Error, Result},
    media::{
        BufferFlags, BufferInfo, Codec, CodecFactory, MediaFormat, OutputEvent, PcmLayout,
        SharedSource,
    },
    mix::{AudioSample, GetSampleResult, OperationState},
};

pub struct AudioSampleExtractor {
    source: SharedSource,
    track: usize,
    syncs_presentation_time: bool,
    input_format: MediaFormat,
    decoder: Option<Box<dyn Codec>>,
    extractor_eos: bool,
    decoder_eos: bool,
    samples: VecDeque<AudioSample>,
}

impl AudioSampleExtractor {
    /// Select `track` on `source` and start a decoder for it. The decoder's
    /// PCM is converted to `conform_to` when given.
    pub fn new(
        source: SharedSource,
        track: usize,
        syncs_presentation_time: bool,
        codecs: &dyn CodecFactory,
        conform_to: Option<PcmLayout>,
    ) -> Result<Self> {
        let input_format = source.borrow().track_format(track)?;
        let decoder = codecs.create_decoder(&input_format, conform_to)?;
        source.borrow_mut().select_track(track)?;

        debug!(
            "extractor on track {} ({}), timing authority: {}",
            track, input_format.mime, syncs_presentation_time
        );

        Ok(Self {
            source,
            track,
            syncs_presentation_time,
            input_format,
            decoder: Some(decoder),
            extractor_eos: false,
            decoder_eos: false,
            samples: VecDeque::new(),
        })
    }

    pub fn input_format(&self) -> &MediaFormat {
        &self.input_format
    }

    pub fn syncs_presentation_time(&self) -> bool {
        self.syncs_presentation_time
    }

    /// Move every sample the decoder can take right now into it.
    pub fn extract_next_sample(&mut self) -> Result<bool> {
        let mut busy = false;
        while self.extract()? != OperationState::None {
            busy = true;
        }
        Ok(busy)
    }

    /// Take one decoded buffer, retrying only across format notifications.
    pub fn decode_next_sample(&mut self) -> Result<bool> {
        let mut busy = false;
        loop {
            let state = self.decode()?;
            if state != OperationState::None {
                busy = true;
            }
            if state != OperationState::RetryImmediately {
                return Ok(busy);
            }
        }
    }

    pub fn get_next_sample(&mut self) -> GetSampleResult<'_> {
        if self.decoder_eos && self.samples.is_empty() {
            return GetSampleResult::EndOfStream;
        }
        match self.samples.front_mut() {
            Some(sample) => GetSampleResult::Ready(sample),
            None => GetSampleResult::Pending,
        }
    }

    /// Return the head sample's buffer to the decoder once it is fully mixed.
    pub fn release_sample(&mut self) -> Result<()> {
        match self.samples.front() {
            Some(sample) if !sample.has_remaining() => {}
            _ => return Ok(()),
        }
        let Some(sample) = self.samples.pop_front() else {
            return Ok(());
        };
        let decoder = self.decoder.as_mut().ok_or(Error::CodecReleased)?;
        decoder.release_output_buffer(sample.buffer_index)
    }

    /// Stop the decoder, returning every buffer still held. Later calls are
    /// no-ops.
    pub fn release(&mut self) -> Result<()> {
        let Some(mut decoder) = self.decoder.take() else {
            return Ok(());
        };
        self.source.borrow_mut().unselect_track(self.track);

        let mut result = Ok(());
        for sample in self.samples.drain(..) {
            if let Err(e) = decoder.release_output_buffer(sample.buffer_index) {
                result = result.and(Err(e));
            }
        }
        decoder.stop()?;
        result
    }

    fn extract(&mut self) -> Result<OperationState> {
        if self.extractor_eos {
            return Ok(OperationState::None);
        }
        let decoder = self.decoder.as_mut().ok_or(Error::CodecReleased)?;
        let Some(index) = decoder.dequeue_input_buffer()? else {
            return Ok(OperationState::None);
        };

        let mut source = self.source.borrow_mut();
        let Some(info) = source.sample_info(self.track)? else {
            trace!("track {}: end of input", self.track);
            self.extractor_eos = true;
            decoder.queue_input_buffer(index, BufferInfo::end_of_stream())?;
            return Ok(OperationState::Consumed);
        };

        let size = source.read_sample_data(self.track, decoder.input_buffer(index)?)?;
        let flags = if info.sync {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::NONE
        };
        decoder.queue_input_buffer(index, BufferInfo::new(size, info.time_us, flags))?;
        source.advance(self.track)?;
        Ok(OperationState::Consumed)
    }

    fn decode(&mut self) -> Result<OperationState> {
        if self.decoder_eos {
            return Ok(OperationState::None);
        }
        let decoder = self.decoder.as_mut().ok_or(Error::CodecReleased)?;

        let (index, info) = match decoder.dequeue_output_buffer()? {
            OutputEvent::TryAgainLater => return Ok(OperationState::None),
            OutputEvent::FormatChanged | OutputEvent::BuffersChanged => {
                return Ok(OperationState::RetryImmediately);
            }
            OutputEvent::Buffer { index, info } => (index, info),
        };

        let sample = if info.size > 0 {
            let data = decoder.output_buffer(index)?;
            let payload = data.get(..info.size).ok_or(Error::BufferTooSmall {
                size: info.size,
                capacity: data.len(),
            })?;
            Some(AudioSample::from_le_bytes(
                index,
                info.presentation_time_us,
                payload,
                self.syncs_presentation_time,
            ))
        } else {
            None
        };

        match sample {
            Some(sample) if sample.has_remaining() => self.samples.push_back(sample),
            _ => decoder.release_output_buffer(index)?,
        }

        if info.is_eos() {
            debug!("track {}: decoder drained", self.track);
            self.decoder_eos = true;
            self.source.borrow_mut().unselect_track(self.track);
        }
        Ok(OperationState::Consumed)
    }
}

impl Drop for AudioSampleExtractor {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("audio extractor on track {} released with error: {e}", self.track);
        }
    }
}
