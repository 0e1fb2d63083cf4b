//! media/mp4/writer.rs — MP4 file writer over ffmpeg's mov muxer.
//!
//! Samples carry presentation times and, for copied video, decode times.
//! Both are handed to the muxer, which writes `stts`/`ctts` and an edit list
//! so the first presentation time survives a round trip. Each track holds
//! one sample back until the next one gives it a duration.

use std::path::{Path, PathBuf};

use ffmpeg_next::{self as ffmpeg, Packet, Rational, Rescale, codec, encoder, format};
use tracing::{debug, trace};

use crate::{
    common::{Error, Result},
    media::{
        BufferInfo, ContainerSink, MediaFormat, TrackKind,
        ffmpeg::{MICROS, init, stream_parameters},
    },
};

const DEFAULT_VIDEO_TIMESCALE: i32 = 90_000;

struct TrackState {
    format: MediaFormat,
    kind: TrackKind,
    time_base: Rational,
    last_dts: Option<i64>,
    held: Option<Packet>,
    last_duration: i64,
    written: usize,
}

impl TrackState {
    fn new(format: &MediaFormat, kind: TrackKind) -> Self {
        let timescale = match kind {
            TrackKind::Video => format.timescale,
            TrackKind::Audio => format.sample_rate.or(format.timescale),
        }
        .and_then(|t| i32::try_from(t).ok())
        .filter(|t| *t > 0)
        .unwrap_or(DEFAULT_VIDEO_TIMESCALE);

        Self {
            format: format.clone(),
            kind,
            time_base: Rational(1, timescale),
            last_dts: None,
            held: None,
            last_duration: 0,
            written: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Configuring,
    Writing,
    Finished,
}

/// A [`ContainerSink`] producing an MP4 file.
pub struct Mp4Writer {
    path: PathBuf,
    output: format::context::Output,
    state: State,
    rotation: u32,
    tracks: Vec<TrackState>,
}

impl Mp4Writer {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        init()?;
        let path = path.as_ref().to_path_buf();
        let output = format::output_as(&path, "mp4")?;
        Ok(Self {
            path,
            output,
            state: State::Configuring,
            rotation: 0,
            tracks: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContainerSink for Mp4Writer {
    fn set_orientation_hint(&mut self, degrees: u32) -> Result<()> {
        if self.state != State::Configuring {
            return Err(Error::SinkState("orientation hint after start"));
        }
        if degrees % 90 != 0 {
            return Err(Error::SinkState("orientation must be a multiple of 90"));
        }
        self.rotation = degrees % 360;
        Ok(())
    }

    fn add_track(&mut self, format: &MediaFormat) -> Result<usize> {
        if self.state != State::Configuring {
            return Err(Error::SinkState("track added after start"));
        }
        let kind = format
            .kind()
            .ok_or_else(|| Error::UnsupportedCodec(format.mime.clone()))?;
        self.tracks.push(TrackState::new(format, kind));
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<()> {
        if self.state != State::Configuring {
            return Err(Error::SinkState("started twice"));
        }

        for track in &self.tracks {
            let rotation = match track.kind {
                TrackKind::Video => self.rotation,
                TrackKind::Audio => 0,
            };
            let parameters = stream_parameters(&track.format, rotation)?;
            let mut stream = self.output.add_stream(encoder::find(codec::Id::None))?;
            stream.set_parameters(parameters);
            stream.set_time_base(track.time_base);
        }
        self.output.write_header()?;

        // The muxer settles on its own timescales while writing the header.
        for (index, track) in self.tracks.iter_mut().enumerate() {
            if let Some(stream) = self.output.stream(index) {
                track.time_base = stream.time_base();
            }
        }

        self.state = State::Writing;
        debug!(
            "{}: writing {} tracks, rotation {}",
            self.path.display(),
            self.tracks.len(),
            self.rotation
        );
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()> {
        if self.state != State::Writing {
            return Err(Error::SinkState("sample written outside start/stop"));
        }
        let payload = &data[..info.size.min(data.len())];
        let state = self
            .tracks
            .get_mut(track)
            .ok_or(Error::TrackOutOfRange(track))?;
        if payload.is_empty() {
            return Ok(());
        }

        let mut pts = info.presentation_time_us.rescale(MICROS, state.time_base);
        let mut dts = info
            .decode_time_us
            .unwrap_or(info.presentation_time_us)
            .rescale(MICROS, state.time_base);
        // The muxer rejects decode times that do not strictly increase, and
        // samples presented before they are decoded.
        if let Some(last) = state.last_dts {
            dts = dts.max(last + 1);
        }
        pts = pts.max(dts);

        let mut packet = Packet::copy(payload);
        packet.set_stream(track);
        packet.set_pts(Some(pts));
        packet.set_dts(Some(dts));
        if info.flags.is_key_frame() || state.kind == TrackKind::Audio {
            packet.set_flags(codec::packet::Flags::KEY);
        }

        if let Some(mut held) = state.held.take() {
            let duration = dts - held.dts().unwrap_or(dts);
            held.set_duration(duration);
            state.last_duration = duration;
            held.write_interleaved(&mut self.output)?;
        }
        state.held = Some(packet);

        trace!("track {} sample {} bytes, pts {} dts {}", track, payload.len(), pts, dts);
        state.last_dts = Some(dts);
        state.written += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.state != State::Writing {
            return Err(Error::SinkState("stopped without start"));
        }
        for state in &mut self.tracks {
            if let Some(mut held) = state.held.take() {
                held.set_duration(state.last_duration);
                held.write_interleaved(&mut self.output)?;
            }
        }
        self.output.write_trailer()?;
        self.state = State::Finished;

        let written: Vec<usize> = self.tracks.iter().map(|t| t.written).collect();
        debug!("{}: finished, samples per track {:?}", self.path.display(), written);
        Ok(())
    }
}
