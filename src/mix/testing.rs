//! In-memory doubles for the mixing pipeline: a sample source over canned
//! tracks, a pass-through codec speaking the buffer-queue protocol, and a
//! container sink that records every call.

use std::{
    cell::Cell,
    collections::VecDeque,
    path::PathBuf,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    common::{Error, Result},
    media::{
        BufferFlags, BufferInfo, BufferSlots, Codec, CodecFactory, ContainerSink, MIMETYPE_AUDIO_RAW,
        MediaFormat, OutputEvent, PcmLayout, SampleInfo, SampleSource,
        aac::{AAC_LC, AudioSpecificConfig},
        pcm::PcmConverter,
    },
};

const DEFAULT_BUFFER_SIZE: usize = 4096;
const DEFAULT_BUFFER_COUNT: usize = 4;
/// Decoders refuse anything under this MIME prefix.
const UNDECODABLE_PREFIX: &str = "audio/x-";

/// An `avcC` record for H.264 High 3.1 with one SPS and one PPS.
pub const AVC_CONFIG: [u8; 19] = [
    0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01, 0x00, 0x04, 0x68,
    0xEE, 0x3C, 0x80,
];

/// A fresh path under the system temp directory.
pub fn temp_path(name: &str) -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("dubmix-{}-{}-{}", std::process::id(), n, name))
}

/// 16-bit interleaved PCM.
pub fn pcm_format(sample_rate: u32, channels: u16) -> MediaFormat {
    let mut format = MediaFormat::audio(MIMETYPE_AUDIO_RAW, sample_rate, channels);
    format.pcm_bits = Some(16);
    format
}

// ─── MemorySource ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MemorySample {
    pub time_us: i64,
    pub decode_time_us: Option<i64>,
    pub sync: bool,
    pub data: Vec<u8>,
}

impl MemorySample {
    pub fn new(time_us: i64, sync: bool, data: Vec<u8>) -> Self {
        Self {
            time_us,
            decode_time_us: None,
            sync,
            data,
        }
    }

    pub fn decoded_at(mut self, decode_time_us: i64) -> Self {
        self.decode_time_us = Some(decode_time_us);
        self
    }

    /// A sync sample carrying little-endian PCM.
    pub fn pcm(time_us: i64, values: &[i16]) -> Self {
        Self::new(
            time_us,
            true,
            values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        )
    }
}

pub struct MemoryTrack {
    format: MediaFormat,
    samples: Vec<MemorySample>,
    cursor: usize,
    selected: bool,
}

impl MemoryTrack {
    pub fn new(format: MediaFormat, samples: Vec<MemorySample>) -> Self {
        Self {
            format,
            samples,
            cursor: 0,
            selected: false,
        }
    }

    fn current(&self) -> Option<&MemorySample> {
        if !self.selected {
            return None;
        }
        self.samples.get(self.cursor)
    }
}

pub struct MemorySource {
    tracks: Vec<MemoryTrack>,
}

impl MemorySource {
    pub fn new(tracks: Vec<MemoryTrack>) -> Self {
        Self { tracks }
    }

    fn track(&self, track: usize) -> Result<&MemoryTrack> {
        self.tracks.get(track).ok_or(Error::TrackOutOfRange(track))
    }

    fn track_mut(&mut self, track: usize) -> Result<&mut MemoryTrack> {
        self.tracks
            .get_mut(track)
            .ok_or(Error::TrackOutOfRange(track))
    }
}

impl SampleSource for MemorySource {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, track: usize) -> Result<MediaFormat> {
        Ok(self.track(track)?.format.clone())
    }

    fn select_track(&mut self, track: usize) -> Result<()> {
        self.track_mut(track)?.selected = true;
        Ok(())
    }

    fn unselect_track(&mut self, track: usize) {
        if let Some(track) = self.tracks.get_mut(track) {
            track.selected = false;
        }
    }

    fn sample_info(&mut self, track: usize) -> Result<Option<SampleInfo>> {
        Ok(self.track(track)?.current().map(|s| SampleInfo {
            size: s.data.len(),
            time_us: s.time_us,
            decode_time_us: s.decode_time_us,
            sync: s.sync,
        }))
    }

    fn read_sample_data(&mut self, track: usize, buf: &mut [u8]) -> Result<usize> {
        let Some(sample) = self.track(track)?.current() else {
            return Ok(0);
        };
        let size = sample.data.len();
        if buf.len() < size {
            return Err(Error::BufferTooSmall {
                size,
                capacity: buf.len(),
            });
        }
        buf[..size].copy_from_slice(&sample.data);
        Ok(size)
    }

    fn advance(&mut self, track: usize) -> Result<bool> {
        let track = self.track_mut(track)?;
        if track.cursor < track.samples.len() {
            track.cursor += 1;
        }
        Ok(track.selected && track.cursor < track.samples.len())
    }
}

// ─── LoopbackCodec ───────────────────────────────────────────────────────────

/// Misbehaviour a loopback encoder can be asked to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecQuirk {
    /// Announce the output format twice in a row.
    FormatTwice,
    /// Never announce an output format.
    NoFormat,
}

/// Counters shared by every codec a [`LoopbackCodecs`] hands out.
#[derive(Debug, Default)]
pub struct CodecLog {
    created: Cell<usize>,
    stopped: Cell<usize>,
    outstanding: Cell<usize>,
}

impl CodecLog {
    pub fn created(&self) -> usize {
        self.created.get()
    }

    pub fn stopped(&self) -> usize {
        self.stopped.get()
    }

    /// Output buffers still lent out when their codec was stopped.
    pub fn outstanding_buffers(&self) -> usize {
        self.outstanding.get()
    }
}

enum Emit {
    Format,
    Config(Vec<u8>),
    /// Queued input buffer index and its info.
    Data(usize, BufferInfo),
}

/// Copies each queued input buffer to an output buffer, converting PCM when
/// asked to. The output format is announced once the first input arrives.
pub struct LoopbackCodec {
    input: BufferSlots,
    output: BufferSlots,
    queued: VecDeque<Emit>,
    target_format: MediaFormat,
    format: Option<MediaFormat>,
    announced: bool,
    codec_config: Option<Vec<u8>>,
    quirk: Option<CodecQuirk>,
    converter: Option<PcmConverter>,
    log: Rc<CodecLog>,
}

impl LoopbackCodec {
    fn new(target_format: MediaFormat, buffers: usize, log: Rc<CodecLog>) -> Self {
        let size = target_format.max_input_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        log.created.set(log.created.get() + 1);
        Self {
            input: BufferSlots::new(buffers, size),
            output: BufferSlots::new(buffers, 0),
            queued: VecDeque::new(),
            target_format,
            format: None,
            announced: false,
            codec_config: None,
            quirk: None,
            converter: None,
            log,
        }
    }

    fn convert(&mut self, bytes: Vec<u8>) -> Vec<u8> {
        let Some(converter) = self.converter.as_mut() else {
            return bytes;
        };
        let input: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let mut output = Vec::new();
        converter.process(&input, &mut output);
        output.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn emit(&mut self, bytes: &[u8], info: BufferInfo) -> Result<OutputEvent> {
        let Some(index) = self.output.acquire() else {
            return Ok(OutputEvent::TryAgainLater);
        };
        let slot = self.output.get_mut(index)?;
        slot.clear();
        slot.extend_from_slice(bytes);
        self.queued.pop_front();
        Ok(OutputEvent::Buffer {
            index,
            info: BufferInfo::new(bytes.len(), info.presentation_time_us, info.flags),
        })
    }
}

impl Codec for LoopbackCodec {
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

        if !self.announced {
            self.announced = true;
            match self.quirk {
                Some(CodecQuirk::NoFormat) => {}
                Some(CodecQuirk::FormatTwice) => {
                    self.queued.push_back(Emit::Format);
                    self.queued.push_back(Emit::Format);
                }
                None => self.queued.push_back(Emit::Format),
            }
            if let Some(csd) = &self.codec_config {
                self.queued.push_back(Emit::Config(csd.clone()));
            }
        }
        self.queued.push_back(Emit::Data(index, info));
        Ok(())
    }

    fn dequeue_output_buffer(&mut self) -> Result<OutputEvent> {
        match self.queued.front() {
            None => Ok(OutputEvent::TryAgainLater),
            Some(Emit::Format) => {
                self.queued.pop_front();
                self.format = Some(self.target_format.clone());
                Ok(OutputEvent::FormatChanged)
            }
            Some(Emit::Config(csd)) => {
                let csd = csd.clone();
                self.emit(&csd, BufferInfo::new(0, 0, BufferFlags::CODEC_CONFIG))
            }
            Some(Emit::Data(input, info)) => {
                let (input, info) = (*input, *info);
                if self.output.available() == 0 {
                    return Ok(OutputEvent::TryAgainLater);
                }
                let bytes = self.input.get(input)?[..info.size].to_vec();
                self.input.release(input)?;
                let bytes = self.convert(bytes);
                self.emit(&bytes, info)
            }
        }
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
        for emit in self.queued.drain(..) {
            if let Emit::Data(index, _) = emit {
                self.input.release(index)?;
            }
        }
        let lent = self.output.len() - self.output.available();
        self.log.outstanding.set(self.log.outstanding.get() + lent);
        self.log.stopped.set(self.log.stopped.get() + 1);
        Ok(())
    }
}

/// Hands out [`LoopbackCodec`]s and keeps their shared [`CodecLog`].
pub struct LoopbackCodecs {
    buffers: usize,
    codec_config: bool,
    encoder_quirk: Option<CodecQuirk>,
    encoder: bool,
    log: Rc<CodecLog>,
}

impl LoopbackCodecs {
    pub fn new() -> Self {
        Self {
            buffers: DEFAULT_BUFFER_COUNT,
            codec_config: false,
            encoder_quirk: None,
            encoder: true,
            log: Rc::default(),
        }
    }

    pub fn with_buffers(mut self, buffers: usize) -> Self {
        self.buffers = buffers;
        self
    }

    /// Encoders emit a codec-config buffer before their first output.
    pub fn with_codec_config(mut self) -> Self {
        self.codec_config = true;
        self
    }

    pub fn with_encoder_quirk(mut self, quirk: CodecQuirk) -> Self {
        self.encoder_quirk = Some(quirk);
        self
    }

    pub fn without_encoder(mut self) -> Self {
        self.encoder = false;
        self
    }

    pub fn log(&self) -> Rc<CodecLog> {
        self.log.clone()
    }
}

impl CodecFactory for LoopbackCodecs {
    fn create_decoder(
        &self,
        format: &MediaFormat,
        conform_to: Option<PcmLayout>,
    ) -> Result<Box<dyn Codec>> {
        if format.mime.starts_with(UNDECODABLE_PREFIX) {
            return Err(Error::UnsupportedCodec(format.mime.clone()));
        }
        let source = PcmLayout::of(format);
        let layout = conform_to.or(source).unwrap_or(PcmLayout::new(44_100, 2));
        let mut output = pcm_format(layout.sample_rate, layout.channels as u16);
        output.max_input_size = format.max_input_size;

        let mut codec = LoopbackCodec::new(output, self.buffers, self.log.clone());
        if let (Some(source), Some(target)) = (source, conform_to) {
            if source != target {
                codec.converter = Some(PcmConverter::new(source, target));
            }
        }
        Ok(Box::new(codec))
    }

    fn create_encoder(&self, format: &MediaFormat) -> Result<Box<dyn Codec>> {
        if !self.encoder {
            return Err(Error::EncoderUnavailable(format.mime.clone()));
        }
        let mut output = format.clone();
        let asc = AudioSpecificConfig::new(
            AAC_LC,
            format.sample_rate.unwrap_or(44_100),
            format.channel_count.unwrap_or(2),
        )
        .to_bytes();
        if output.csd.is_none() {
            output.csd = Some(asc.clone());
        }

        let mut codec = LoopbackCodec::new(output, self.buffers, self.log.clone());
        codec.quirk = self.encoder_quirk;
        if self.codec_config {
            codec.codec_config = Some(asc.to_vec());
        }
        Ok(Box::new(codec))
    }
}

// ─── RecordingSink ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Orientation(u32),
    AddTrack(MediaFormat),
    Start,
    Sample {
        track: usize,
        data: Vec<u8>,
        info: BufferInfo,
    },
    Stop,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
    tracks: usize,
    started: bool,
}

impl RecordingSink {
    /// Payload and info of every sample written to `track`, in order.
    pub fn samples(&self, track: usize) -> impl Iterator<Item = (&[u8], &BufferInfo)> {
        self.events.iter().filter_map(move |event| match event {
            SinkEvent::Sample {
                track: t,
                data,
                info,
            } if *t == track => Some((data.as_slice(), info)),
            _ => None,
        })
    }
}

impl ContainerSink for RecordingSink {
    fn set_orientation_hint(&mut self, degrees: u32) -> Result<()> {
        self.events.push(SinkEvent::Orientation(degrees));
        Ok(())
    }

    fn add_track(&mut self, format: &MediaFormat) -> Result<usize> {
        if self.started {
            return Err(Error::SinkState("track added after start"));
        }
        self.events.push(SinkEvent::AddTrack(format.clone()));
        self.tracks += 1;
        Ok(self.tracks - 1)
    }

    fn start(&mut self) -> Result<()> {
        self.started = true;
        self.events.push(SinkEvent::Start);
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()> {
        if !self.started {
            return Err(Error::SinkState("sample written before start"));
        }
        if track >= self.tracks {
            return Err(Error::TrackOutOfRange(track));
        }
        self.events.push(SinkEvent::Sample {
            track,
            data: data.to_vec(),
            info: *info,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.events.push(SinkEvent::Stop);
        Ok(())
    }
}
