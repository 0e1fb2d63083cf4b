//! `AacEncoder` — an ffmpeg AAC encoder behind the buffer-queue protocol.
//!
//! Queued PCM is buffered until a full encoder frame is available. Output
//! timestamps are derived from the number of samples encoded, anchored at
//! the first queued buffer, so consecutive packets never share a timestamp.
//! At end of stream the tail is zero-padded to a full frame before the
//! encoder is flushed.

use std::{collections::VecDeque, slice};

use byteorder::{ByteOrder, LittleEndian};
use ffmpeg_next::{
    self as ffmpeg, Dictionary, Packet, Rational, Rescale,
    codec::{self, encoder::audio::Encoder},
    encoder, ffi,
    format::{Sample, sample::Type as SampleType},
    frame,
};
use tracing::{debug, trace, warn};

use super::{AAC_ELD, AAC_HE, AAC_HE_V2, AAC_LC, AAC_LD, AudioSpecificConfig};
use crate::{
    common::{Error, Result},
    media::{
        BufferFlags, BufferInfo, BufferSlots, Codec, MIMETYPE_AUDIO_AAC, MediaFormat, OutputEvent,
        PcmLayout,
        ffmpeg::{MICROS, init},
    },
    mix::constants::OUTPUT_BIT_RATE,
};

const INPUT_BUFFERS: usize = 4;
const INPUT_BUFFER_SIZE: usize = 64 * 1024;
const OUTPUT_BUFFERS: usize = 4;
const DEFAULT_FRAME_SIZE: usize = 1024;

/// The external Fraunhofer encoder covers every profile; FFmpeg's own only
/// does LC.
const FDK_AAC: &str = "libfdk_aac";

enum Encoded {
    Packet { data: Vec<u8>, pts: i64 },
    End,
}

pub struct AacEncoder {
    inner: Encoder,
    layout: PcmLayout,
    planar: bool,
    frame_size: usize,
    time_base: Rational,
    announced: MediaFormat,
    input: BufferSlots,
    output: BufferSlots,
    pcm: Vec<i16>,
    base_us: Option<i64>,
    next_pts: i64,
    eos_queued: bool,
    flushed: bool,
    encoded: VecDeque<Encoded>,
    events: VecDeque<OutputEvent>,
    format: Option<MediaFormat>,
}

impl AacEncoder {
    /// Open an encoder for `format`.
    ///
    /// Rate and channels come from [`PcmLayout::of`]. The object type is
    /// `aac_profile`, else the one in `csd`, else LC; without libfdk_aac
    /// anything but LC falls back to LC. The bit rate is `bit_rate` or the
    /// mixer default.
    pub fn new(format: &MediaFormat) -> Result<Self> {
        init()?;

        let layout = PcmLayout::of(format).ok_or_else(|| {
            Error::Malformed(format!("{} output without rate or channels", format.mime))
        })?;
        let requested = format
            .aac_profile
            .or_else(|| {
                let csd = format.csd.as_ref()?;
                AudioSpecificConfig::parse(csd).ok().map(|asc| asc.object_type)
            })
            .unwrap_or(AAC_LC);
        let bit_rate = format.bit_rate.unwrap_or(OUTPUT_BIT_RATE);

        let (codec, object_type) = match encoder::find_by_name(FDK_AAC) {
            Some(fdk) if profile_name(requested).is_some() => (fdk, requested),
            _ => {
                let native = encoder::find(codec::Id::AAC)
                    .ok_or_else(|| Error::EncoderUnavailable(MIMETYPE_AUDIO_AAC.into()))?;
                if requested != AAC_LC {
                    warn!("AAC object type {requested} unavailable, encoding LC instead");
                }
                (native, AAC_LC)
            }
        };
        let planar = codec.name() != FDK_AAC;
        let sample = if planar {
            Sample::F32(SampleType::Planar)
        } else {
            Sample::I16(SampleType::Packed)
        };
        let time_base = Rational(1, layout.sample_rate as i32);

        let mut context = codec::context::Context::new_with_codec(codec).encoder().audio()?;
        context.set_rate(layout.sample_rate as i32);
        context.set_format(sample);
        context.set_bit_rate(bit_rate as usize);
        context.set_time_base(time_base);
        context.set_flags(codec::Flags::GLOBAL_HEADER);
        unsafe {
            ffi::av_channel_layout_default(
                &mut (*context.as_mut_ptr()).ch_layout,
                layout.channels as i32,
            );
        }

        let mut options = Dictionary::new();
        options.set("profile", profile_name(object_type).unwrap_or("aac_low"));
        let inner = context.open_as_with(codec, options)?;

        let frame_size = match inner.frame_size() {
            0 => DEFAULT_FRAME_SIZE,
            size => size as usize,
        };
        let extradata = unsafe {
            let raw = inner.as_ptr();
            match ((*raw).extradata, (*raw).extradata_size) {
                (data, size) if !data.is_null() && size > 0 => {
                    Some(slice::from_raw_parts(data, size as usize).to_vec())
                }
                _ => None,
            }
        };

        let mut announced = MediaFormat::audio(
            MIMETYPE_AUDIO_AAC,
            layout.sample_rate,
            layout.channels as u16,
        );
        announced.aac_profile = Some(object_type);
        announced.bit_rate = Some(bit_rate);
        announced.csd = Some(match extradata {
            Some(asc) => asc.into(),
            None => {
                AudioSpecificConfig::new(object_type, layout.sample_rate, layout.channels as u16)
                    .to_bytes()
            }
        });

        debug!(
            "{} opened: object type {}, {} Hz, {} ch, {} bps, {} samples per frame",
            codec.name(),
            object_type,
            layout.sample_rate,
            layout.channels,
            bit_rate,
            frame_size
        );

        Ok(Self {
            inner,
            layout,
            planar,
            frame_size,
            time_base,
            announced,
            input: BufferSlots::new(INPUT_BUFFERS, INPUT_BUFFER_SIZE),
            output: BufferSlots::new(OUTPUT_BUFFERS, 0),
            pcm: Vec::new(),
            base_us: None,
            next_pts: 0,
            eos_queued: false,
            flushed: false,
            encoded: VecDeque::new(),
            events: VecDeque::new(),
            format: None,
        })
    }

    fn pump(&mut self) -> Result<()> {
        let block = self.frame_size * self.layout.channels;
        while self.pcm.len() >= block {
            let tail = self.pcm.split_off(block);
            let head = std::mem::replace(&mut self.pcm, tail);
            self.encode(&head)?;
        }

        if self.eos_queued && !self.flushed {
            if !self.pcm.is_empty() {
                let mut head = std::mem::take(&mut self.pcm);
                head.resize(block, 0);
                self.encode(&head)?;
            }
            self.inner.send_eof()?;
            self.flushed = true;
            self.receive()?;
        }

        while self.output.available() > 0 {
            let Some(next) = self.encoded.pop_front() else {
                break;
            };
            if self.format.is_none() {
                self.format = Some(self.announced.clone());
                self.events.push_back(OutputEvent::FormatChanged);
            }
            match next {
                Encoded::Packet { data, pts } => {
                    let time_us = self.base_us.unwrap_or(0) + pts.rescale(self.time_base, MICROS);
                    let info = BufferInfo::new(data.len(), time_us, BufferFlags::NONE);
                    self.emit(&data, info)?;
                }
                Encoded::End => self.emit(&[], BufferInfo::end_of_stream())?,
            }
        }
        Ok(())
    }

    /// Send one full frame of interleaved samples.
    fn encode(&mut self, samples: &[i16]) -> Result<()> {
        let channels = self.layout.channels;
        let count = samples.len() / channels;

        let mut frame = frame::Audio::empty();
        frame.set_format(if self.planar {
            Sample::F32(SampleType::Planar)
        } else {
            Sample::I16(SampleType::Packed)
        });
        frame.set_rate(self.layout.sample_rate);
        frame.set_pts(Some(self.next_pts));
        unsafe {
            let raw = frame.as_mut_ptr();
            (*raw).nb_samples = count as i32;
            ffi::av_channel_layout_default(&mut (*raw).ch_layout, channels as i32);
            let ret = ffi::av_frame_get_buffer(raw, 0);
            if ret < 0 {
                return Err(ffmpeg::Error::from(ret).into());
            }

            if self.planar {
                for channel in 0..channels {
                    let plane = slice::from_raw_parts_mut(
                        *(*raw).extended_data.add(channel) as *mut f32,
                        count,
                    );
                    for (i, out) in plane.iter_mut().enumerate() {
                        *out = f32::from(samples[i * channels + channel]) / 32768.0;
                    }
                }
            } else {
                let packed =
                    slice::from_raw_parts_mut((*raw).data[0] as *mut i16, count * channels);
                packed.copy_from_slice(samples);
            }
        }
        self.next_pts += count as i64;

        self.receive()?;
        self.inner.send_frame(&frame)?;
        self.receive()
    }

    fn receive(&mut self) -> Result<()> {
        let mut packet = Packet::empty();
        loop {
            match self.inner.receive_packet(&mut packet) {
                Ok(()) => {
                    let pts = packet.pts().unwrap_or(self.next_pts);
                    let data = packet.data().map(<[u8]>::to_vec).unwrap_or_default();
                    trace!("encoded {} bytes at sample {}", data.len(), pts);
                    self.encoded.push_back(Encoded::Packet { data, pts });
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                    return Ok(());
                }
                Err(ffmpeg::Error::Eof) => {
                    self.encoded.push_back(Encoded::End);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn emit(&mut self, bytes: &[u8], info: BufferInfo) -> Result<()> {
        let index = self
            .output
            .acquire()
            .ok_or(Error::SinkState("encoder output exhausted"))?;
        let slot = self.output.get_mut(index)?;
        slot.clear();
        slot.extend_from_slice(bytes);
        self.events.push_back(OutputEvent::Buffer { index, info });
        Ok(())
    }
}

/// FFmpeg profile option for an object type both encoders understand.
fn profile_name(object_type: u32) -> Option<&'static str> {
    Some(match object_type {
        AAC_LC => "aac_low",
        AAC_HE => "aac_he",
        AAC_HE_V2 => "aac_he_v2",
        AAC_LD => "aac_ld",
        AAC_ELD => "aac_eld",
        _ => return None,
    })
}

impl Codec for AacEncoder {
    fn dequeue_input_buffer(&mut self) -> Result<Option<usize>> {
        if self.eos_queued {
            return Ok(None);
        }
        Ok(self.input.acquire())
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        Ok(self.input.get_mut(index)?.as_mut_slice())
    }

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> Result<()> {
        let data = self.input.get(index)?;
        if info.size > data.len() {
            return Err(Error::BufferTooSmall {
                size: info.size,
                capacity: data.len(),
            });
        }

        if info.is_eos() {
            self.eos_queued = true;
        } else if info.size > 0 {
            self.base_us.get_or_insert(info.presentation_time_us);
            let count = info.size / 2;
            let start = self.pcm.len();
            self.pcm.resize(start + count, 0);
            LittleEndian::read_i16_into(&data[..count * 2], &mut self.pcm[start..]);
        }
        self.input.release(index)
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
        self.pcm.clear();
        self.encoded.clear();
        self.events.clear();
        self.eos_queued = true;
        self.flushed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lc_format(sample_rate: u32, channels: u16) -> MediaFormat {
        let mut format = MediaFormat::audio(MIMETYPE_AUDIO_AAC, sample_rate, channels);
        format.aac_profile = Some(AAC_LC);
        format.bit_rate = Some(96_000);
        format
    }

    fn sine(count: usize, sample_rate: u32) -> Vec<u8> {
        (0..count)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                ((t * 440.0 * std::f32::consts::TAU).sin() * 8_000.0) as i16
            })
            .flat_map(i16::to_le_bytes)
            .collect()
    }

    fn queue(codec: &mut dyn Codec, bytes: &[u8], time_us: i64) {
        let index = codec.dequeue_input_buffer().unwrap().unwrap();
        codec.input_buffer(index).unwrap()[..bytes.len()].copy_from_slice(bytes);
        codec
            .queue_input_buffer(index, BufferInfo::new(bytes.len(), time_us, BufferFlags::NONE))
            .unwrap();
    }

    /// Drain every event, releasing buffers as they come.
    fn drain(codec: &mut dyn Codec) -> (Vec<OutputEvent>, Vec<Vec<u8>>) {
        let mut events = Vec::new();
        let mut payloads = Vec::new();
        for _ in 0..1_000 {
            let event = codec.dequeue_output_buffer().unwrap();
            match event {
                OutputEvent::TryAgainLater => break,
                OutputEvent::Buffer { index, info } => {
                    payloads.push(codec.output_buffer(index).unwrap()[..info.size].to_vec());
                    codec.release_output_buffer(index).unwrap();
                }
                _ => {}
            }
            events.push(event);
        }
        (events, payloads)
    }

    #[test]
    fn encodes_real_audio_with_increasing_timestamps() {
        let mut codec = AacEncoder::new(&lc_format(48_000, 1)).unwrap();
        let pcm = sine(4_800, 48_000);
        queue(&mut codec, &pcm[..4_800], 1_000_000);
        queue(&mut codec, &pcm[4_800..], 1_050_000);
        let index = codec.dequeue_input_buffer().unwrap().unwrap();
        codec
            .queue_input_buffer(index, BufferInfo::end_of_stream())
            .unwrap();

        let (events, payloads) = drain(&mut codec);
        assert_eq!(events.first(), Some(&OutputEvent::FormatChanged));

        let format = codec.output_format().unwrap();
        let asc = AudioSpecificConfig::parse(format.csd.as_ref().unwrap()).unwrap();
        assert_eq!(asc.object_type, AAC_LC);
        assert_eq!(asc.sample_rate, 48_000);
        assert_eq!(asc.channels(), Some(1));
        assert_eq!(format.aac_profile, Some(AAC_LC));
        assert_eq!(format.bit_rate, Some(96_000));

        let infos: Vec<BufferInfo> = events
            .iter()
            .filter_map(|event| match event {
                OutputEvent::Buffer { info, .. } => Some(*info),
                _ => None,
            })
            .collect();
        let (last, packets) = infos.split_last().unwrap();
        assert!(last.is_eos());
        // 4800 samples make five frames once the tail is padded.
        assert!(packets.len() >= 5, "only {} packets", packets.len());
        assert!(payloads[..packets.len()].iter().all(|p| !p.is_empty()));
        assert!(
            packets
                .windows(2)
                .all(|w| w[0].presentation_time_us < w[1].presentation_time_us)
        );
        // Anchored at the first buffer, give or take the encoder's priming.
        let frame_us = 1_024 * 1_000_000 / 48_000;
        assert!((packets[0].presentation_time_us - 1_000_000).abs() <= frame_us + 1);
    }

    #[test]
    fn stereo_input_is_accepted() {
        let mut codec = AacEncoder::new(&lc_format(44_100, 2)).unwrap();
        queue(&mut codec, &sine(2 * 2_048, 44_100), 0);
        let index = codec.dequeue_input_buffer().unwrap().unwrap();
        codec
            .queue_input_buffer(index, BufferInfo::end_of_stream())
            .unwrap();

        let (events, _) = drain(&mut codec);
        assert!(matches!(
            events.last(),
            Some(OutputEvent::Buffer { info, .. }) if info.is_eos()
        ));
        let asc = AudioSpecificConfig::parse(codec.output_format().unwrap().csd.as_ref().unwrap())
            .unwrap();
        assert_eq!(asc.channels(), Some(2));
    }

    #[test]
    fn no_input_after_end_of_stream() {
        let mut codec = AacEncoder::new(&lc_format(48_000, 1)).unwrap();
        let index = codec.dequeue_input_buffer().unwrap().unwrap();
        codec
            .queue_input_buffer(index, BufferInfo::end_of_stream())
            .unwrap();
        assert_eq!(codec.dequeue_input_buffer().unwrap(), None);
    }

    #[test]
    fn format_without_layout_is_rejected() {
        assert!(matches!(
            AacEncoder::new(&MediaFormat::new(MIMETYPE_AUDIO_AAC)),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn profile_names_cover_the_low_delay_family() {
        assert_eq!(profile_name(AAC_ELD), Some("aac_eld"));
        assert_eq!(profile_name(AAC_LD), Some("aac_ld"));
        assert_eq!(profile_name(1), None);
    }
}
