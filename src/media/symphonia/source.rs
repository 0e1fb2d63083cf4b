//! `SymphoniaSource` — a Sample Source over any container symphonia can
//! probe (MP3, OGG, FLAC, WAV, MKV/WebM, M4A).
//!
//! symphonia reads packets in file order across all tracks, so only one track
//! is readable at a time: the most recently selected one.

use std::{fs::File, path::Path};

use bytes::Bytes;
use symphonia::core::{
    codecs::CodecParameters,
    errors::Error as ProbeError,
    formats::{FormatOptions, FormatReader, Packet},
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
    units::TimeBase,
};
use tracing::{debug, info};

use super::mime_for;
use crate::{
    common::{Error, Result},
    media::{MediaFormat, SampleInfo, SampleSource},
};

struct AudioTrack {
    id: u32,
    format: MediaFormat,
    time_base: Option<TimeBase>,
}

pub struct SymphoniaSource {
    reader: Box<dyn FormatReader>,
    tracks: Vec<AudioTrack>,
    selected: Option<usize>,
    pending: Option<Packet>,
    exhausted: bool,
}

impl SymphoniaSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path.extension().and_then(|e| e.to_str());
        Self::new(Box::new(file), extension)
    }

    pub fn new(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let reader = probed.format;

        let tracks: Vec<AudioTrack> = reader
            .tracks()
            .iter()
            .filter_map(|track| {
                let format = media_format(&track.codec_params)?;
                Some(AudioTrack {
                    id: track.id,
                    format,
                    time_base: track.codec_params.time_base,
                })
            })
            .collect();

        info!("SymphoniaSource: probed {} audio track(s)", tracks.len());

        Ok(Self {
            reader,
            tracks,
            selected: None,
            pending: None,
            exhausted: false,
        })
    }

    fn to_us(&self, track: usize, ts: u64) -> i64 {
        let Some(track) = self.tracks.get(track) else {
            return 0;
        };
        match track.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                (time.seconds as f64 * 1_000_000.0 + time.frac * 1_000_000.0) as i64
            }
            None => {
                let rate = u64::from(track.format.sample_rate.unwrap_or(1).max(1));
                (u128::from(ts) * 1_000_000 / u128::from(rate)) as i64
            }
        }
    }

    /// Read forward to the next packet of `track`, if it is the selected one.
    fn fill(&mut self, track: usize) -> Result<Option<&Packet>> {
        if self.selected != Some(track) {
            return Ok(None);
        }
        let id = self.tracks[track].id;

        while self.pending.is_none() && !self.exhausted {
            match self.reader.next_packet() {
                Ok(packet) if packet.track_id() == id => self.pending = Some(packet),
                Ok(_) => {}
                Err(ProbeError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("SymphoniaSource: end of track {}", track);
                    self.exhausted = true;
                }
                Err(ProbeError::ResetRequired) => self.exhausted = true,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.pending.as_ref())
    }
}

fn media_format(params: &CodecParameters) -> Option<MediaFormat> {
    let (mime, pcm_bits) = mime_for(params.codec)?;
    let channels = params
        .channels
        .map(|c| c.count())
        .or_else(|| params.channel_layout.map(|l| l.into_channels().count()))
        .unwrap_or(0) as u16;

    let mut format = MediaFormat::audio(mime, params.sample_rate.unwrap_or(0), channels);
    format.pcm_bits = pcm_bits.or(params.bits_per_sample);
    format.csd = params.extra_data.as_deref().map(Bytes::copy_from_slice);
    if let (Some(frames), Some(tb)) = (params.n_frames, params.time_base) {
        let time = tb.calc_time(frames);
        format.duration_us = Some(time.seconds * 1_000_000 + (time.frac * 1_000_000.0) as u64);
    }
    Some(format)
}

impl SampleSource for SymphoniaSource {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, track: usize) -> Result<MediaFormat> {
        self.tracks
            .get(track)
            .map(|t| t.format.clone())
            .ok_or(Error::TrackOutOfRange(track))
    }

    fn select_track(&mut self, track: usize) -> Result<()> {
        if track >= self.tracks.len() {
            return Err(Error::TrackOutOfRange(track));
        }
        if self.selected != Some(track) {
            self.pending = None;
        }
        self.selected = Some(track);
        Ok(())
    }

    fn unselect_track(&mut self, track: usize) {
        if self.selected == Some(track) {
            self.selected = None;
            self.pending = None;
        }
    }

    fn sample_info(&mut self, track: usize) -> Result<Option<SampleInfo>> {
        let Some((size, ts)) = self.fill(track)?.map(|p| (p.buf().len(), p.ts())) else {
            return Ok(None);
        };
        Ok(Some(SampleInfo {
            size,
            time_us: self.to_us(track, ts),
            decode_time_us: None,
            sync: true,
        }))
    }

    fn read_sample_data(&mut self, track: usize, buf: &mut [u8]) -> Result<usize> {
        let Some(packet) = self.fill(track)? else {
            return Ok(0);
        };
        let data = packet.buf();
        if buf.len() < data.len() {
            return Err(Error::BufferTooSmall {
                size: data.len(),
                capacity: buf.len(),
            });
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn advance(&mut self, track: usize) -> Result<bool> {
        if self.selected != Some(track) {
            return Ok(false);
        }
        self.pending = None;
        Ok(self.fill(track)?.is_some())
    }
}
