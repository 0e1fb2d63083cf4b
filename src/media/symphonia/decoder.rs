//! `SymphoniaDecoder` — a symphonia decoder behind the buffer-queue protocol.
//!
//! Queued input packets are decoded lazily, when the caller polls the output
//! side. The first decoded block is preceded by `FormatChanged`; the end of
//! stream marker comes out as a zero-length buffer once every packet queued
//! before it has been decoded.

use std::collections::VecDeque;

use symphonia::core::{
    audio::SampleBuffer,
    codecs::Decoder,
    errors::Error as DecodeFailure,
    formats::Packet,
};
use tracing::{trace, warn};

use crate::{
    common::{Error, Result},
    media::{
        BufferInfo, BufferSlots, Codec, MediaFormat, OutputEvent, PcmLayout, MIMETYPE_AUDIO_RAW,
        pcm::PcmConverter,
    },
};

const INPUT_BUFFERS: usize = 4;
const OUTPUT_BUFFERS: usize = 4;

pub struct SymphoniaDecoder {
    decoder: Box<dyn Decoder>,
    input: BufferSlots,
    output: BufferSlots,
    queued: VecDeque<(usize, BufferInfo)>,
    events: VecDeque<OutputEvent>,
    conform_to: Option<PcmLayout>,
    converter: Option<PcmConverter>,
    format: Option<MediaFormat>,
    sample_buf: Option<SampleBuffer<i16>>,
    pcm: Vec<i16>,
}

impl SymphoniaDecoder {
    pub fn new(decoder: Box<dyn Decoder>, input_size: usize, conform_to: Option<PcmLayout>) -> Self {
        Self {
            decoder,
            input: BufferSlots::new(INPUT_BUFFERS, input_size),
            output: BufferSlots::new(OUTPUT_BUFFERS, 0),
            queued: VecDeque::new(),
            events: VecDeque::new(),
            conform_to,
            converter: None,
            format: None,
            sample_buf: None,
            pcm: Vec::new(),
        }
    }

    /// Decode queued input until one output event is ready, the queue runs
    /// dry, or no output buffer is free.
    fn pump(&mut self) -> Result<()> {
        while self.events.is_empty() && self.output.available() > 0 {
            let Some((index, info)) = self.queued.pop_front() else {
                return Ok(());
            };

            if info.is_eos() {
                self.input.release(index)?;
                self.emit(&[], info)?;
                return Ok(());
            }

            let data = self.input.get(index)?[..info.size].to_vec();
            self.input.release(index)?;
            self.decode(data, info)?;
        }
        Ok(())
    }

    fn decode(&mut self, data: Vec<u8>, info: BufferInfo) -> Result<()> {
        let ts = u64::try_from(info.presentation_time_us).unwrap_or(0);
        let packet = Packet::new_from_boxed_slice(0, ts, 0, data.into_boxed_slice());

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(DecodeFailure::DecodeError(e)) => {
                warn!("Decode error (recoverable): {e}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if decoded.frames() == 0 || channels == 0 {
            return Ok(());
        }

        let needed = decoded.capacity() * channels;
        let mut buf = match self.sample_buf.take() {
            Some(buf) if buf.capacity() >= needed => buf,
            _ => SampleBuffer::<i16>::new(decoded.capacity() as u64, spec),
        };
        buf.copy_interleaved_ref(decoded);

        let source = PcmLayout::new(spec.rate, channels);
        self.pcm.clear();
        match self.conform_to.filter(|target| *target != source) {
            Some(target) => {
                let converter = self
                    .converter
                    .get_or_insert_with(|| PcmConverter::new(source, target));
                converter.process(buf.samples(), &mut self.pcm);
            }
            None => self.pcm.extend_from_slice(buf.samples()),
        }
        self.sample_buf = Some(buf);

        if self.format.is_none() {
            let layout = self.conform_to.unwrap_or(source);
            let mut format =
                MediaFormat::audio(MIMETYPE_AUDIO_RAW, layout.sample_rate, layout.channels as u16);
            format.pcm_bits = Some(16);
            self.format = Some(format);
            self.events.push_back(OutputEvent::FormatChanged);
        }

        let bytes: Vec<u8> = self.pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
        let info = BufferInfo::new(bytes.len(), info.presentation_time_us, info.flags);
        self.emit(&bytes, info)
    }

    fn emit(&mut self, bytes: &[u8], info: BufferInfo) -> Result<()> {
        let index = self
            .output
            .acquire()
            .ok_or(Error::SinkState("decoder output exhausted"))?;
        let slot = self.output.get_mut(index)?;
        slot.clear();
        slot.extend_from_slice(bytes);
        trace!("decoded {} bytes at {}us", info.size, info.presentation_time_us);
        self.events.push_back(OutputEvent::Buffer { index, info });
        Ok(())
    }
}

impl Codec for SymphoniaDecoder {
    fn dequeue_input_buffer(&mut self) -> Result<Option<usize>> {
        Ok(self.input.acquire())
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        Ok(self.input.get_mut(index)?.as_mut_slice())
    }

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> Result<()> {
        let capacity = self.input.get(index)?.len();
        if info.size > capacity {
            return Err(Error::BufferTooSmall {
                size: info.size,
                capacity,
            });
        }
        self.queued.push_back((index, info));
        Ok(())
    }

    fn dequeue_output_buffer(&mut self) -> Result<OutputEvent> {
        self.pump()?;
        Ok(self.events.pop_front().unwrap_or(OutputEvent::TryAgainLater))
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        Ok(self.output.get(index)?.as_slice())
    }

    fn output_format(&self) -> Option<MediaFormat> {
        self.format.clone()
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<()> {
        self.output.release(index)
    }

    fn stop(&mut self) -> Result<()> {
        for (index, _) in self.queued.drain(..) {
            self.input.release(index)?;
        }
        self.events.clear();
        self.decoder.reset();
        Ok(())
    }
}
