//! `mix/muxer.rs` — the Container Writer.
//!
//! Samples may arrive for one track before the other track's format is
//! known. They are copied into an append-only arena of byte chunks and
//! replayed, in arrival order, the moment both formats are set and the
//! physical writer starts.

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::{
    common::{Error, Result},
    media::{BufferInfo, ContainerSink, MediaFormat, TrackKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxerState {
    Unconfigured,
    /// Exactly one of the two formats is known.
    Configured(TrackKind),
    Started,
    Released,
}

/// A sample accepted before start. Its bytes live in the arena, at the
/// position implied by the records queued before it.
#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    kind: TrackKind,
    info: BufferInfo,
}

pub struct Mp4Muxer<S: ContainerSink> {
    sink: Option<S>,
    state: MuxerState,
    video_format: Option<MediaFormat>,
    audio_format: Option<MediaFormat>,
    video_track: Option<usize>,
    audio_track: Option<usize>,
    arena: Vec<BytesMut>,
    pending: Vec<PendingWrite>,
    chunk_size: usize,
}

impl<S: ContainerSink> Mp4Muxer<S> {
    /// Wrap `sink`, passing on the video's clockwise `rotation`. Arena chunks
    /// are at least `chunk_size` bytes.
    pub fn new(mut sink: S, rotation: u32, chunk_size: usize) -> Result<Self> {
        sink.set_orientation_hint(rotation)?;
        Ok(Self {
            sink: Some(sink),
            state: MuxerState::Unconfigured,
            video_format: None,
            audio_format: None,
            video_track: None,
            audio_track: None,
            arena: Vec::new(),
            pending: Vec::new(),
            chunk_size,
        })
    }

    pub fn is_started(&self) -> bool {
        self.state == MuxerState::Started
    }

    /// Number of samples waiting for start.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Register the output format of `kind`. The second of the two formats
    /// starts the physical writer.
    pub fn set_output_format(&mut self, kind: TrackKind, format: MediaFormat) -> Result<()> {
        match self.state {
            MuxerState::Released => return Err(Error::MuxerReleased),
            MuxerState::Started => return Err(Error::FormatAfterStart(kind)),
            MuxerState::Unconfigured | MuxerState::Configured(_) => {}
        }

        debug!("{:?} output format set: {}", kind, format.mime);
        match kind {
            TrackKind::Video => self.video_format = Some(format),
            TrackKind::Audio => self.audio_format = Some(format),
        }

        self.state = match (&self.video_format, &self.audio_format) {
            (Some(_), Some(_)) => return self.start(),
            (Some(_), None) => MuxerState::Configured(TrackKind::Video),
            (None, Some(_)) => MuxerState::Configured(TrackKind::Audio),
            (None, None) => MuxerState::Unconfigured,
        };
        Ok(())
    }

    pub fn write_sample(&mut self, kind: TrackKind, data: &[u8], info: &BufferInfo) -> Result<()> {
        match self.state {
            MuxerState::Released => Err(Error::MuxerReleased),
            MuxerState::Started => {
                let track = self.track_index(kind)?;
                let sink = self.sink.as_mut().ok_or(Error::MuxerReleased)?;
                sink.write_sample(track, data, &BufferInfo { size: data.len(), ..*info })
            }
            MuxerState::Unconfigured | MuxerState::Configured(_) => {
                self.queue(kind, data, info);
                Ok(())
            }
        }
    }

    /// Stop the physical writer if it was started, drop all buffered state
    /// and hand the writer back. A second call fails.
    pub fn release(&mut self) -> Result<S> {
        if self.state == MuxerState::Released {
            return Err(Error::MuxerReleased);
        }
        let started = self.state == MuxerState::Started;
        if !self.pending.is_empty() {
            warn!("discarding {} samples queued before start", self.pending.len());
        }

        self.state = MuxerState::Released;
        self.video_format = None;
        self.audio_format = None;
        self.video_track = None;
        self.audio_track = None;
        self.arena.clear();
        self.pending.clear();

        let mut sink = self.sink.take().ok_or(Error::MuxerReleased)?;
        if started {
            sink.stop()?;
            info!("container writer stopped");
        }
        Ok(sink)
    }

    fn track_index(&self, kind: TrackKind) -> Result<usize> {
        match kind {
            TrackKind::Video => self.video_track,
            TrackKind::Audio => self.audio_track,
        }
        .ok_or(Error::TrackNotConfigured(kind))
    }

    fn queue(&mut self, kind: TrackKind, data: &[u8], info: &BufferInfo) {
        let fits = self
            .arena
            .last()
            .is_some_and(|chunk| chunk.capacity() - chunk.len() >= data.len());
        if !fits {
            self.arena
                .push(BytesMut::with_capacity(self.chunk_size.max(data.len())));
        }
        if let Some(chunk) = self.arena.last_mut() {
            chunk.extend_from_slice(data);
        }

        self.pending.push(PendingWrite {
            kind,
            info: BufferInfo {
                size: data.len(),
                ..*info
            },
        });
    }

    fn start(&mut self) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(Error::MuxerReleased)?;
        let video = self
            .video_format
            .as_ref()
            .ok_or(Error::TrackNotConfigured(TrackKind::Video))?;
        let audio = self
            .audio_format
            .as_ref()
            .ok_or(Error::TrackNotConfigured(TrackKind::Audio))?;

        let video_track = sink.add_track(video)?;
        let audio_track = sink.add_track(audio)?;
        sink.start()?;

        self.video_track = Some(video_track);
        self.audio_track = Some(audio_track);
        self.state = MuxerState::Started;
        info!(
            "container writer started, flushing {} queued samples from {} chunk(s)",
            self.pending.len(),
            self.arena.len()
        );

        let pending = std::mem::take(&mut self.pending);
        let arena = std::mem::take(&mut self.arena);
        let mut chunk = 0;
        let mut offset = 0;

        for write in &pending {
            let chunk_len = arena.get(chunk).map_or(0, BytesMut::len);
            let size = write.info.size;
            if offset + size > chunk_len {
                chunk += 1;
                offset = 0;
            }
            let data = arena
                .get(chunk)
                .and_then(|bytes| bytes.get(offset..offset + size))
                .ok_or(Error::SinkState("queued sample outside the arena"))?;
            offset += size;

            let track = match write.kind {
                TrackKind::Video => video_track,
                TrackKind::Audio => audio_track,
            };
            sink.write_sample(track, data, &write.info)?;
        }
        Ok(())
    }
}

impl<S: ContainerSink> Drop for Mp4Muxer<S> {
    fn drop(&mut self) {
        if self.state != MuxerState::Released {
            if let Err(e) = self.release() {
                warn!("container writer released with error: {e}");
            }
        }
    }
}
