//! media/mp4/demux.rs — MP4 Sample Source.
//!
//! Track formats come from one probe of the file. Every selected track then
//! gets its own demuxer context, so the pass-through video and the audio
//! extractor can read the same file at their own pace. Tracks other than
//! audio and video (hints, timed text) are not exposed.

use std::path::{Path, PathBuf};

use ffmpeg_next::{self as ffmpeg, Packet, Rational, Rescale, format};
use tracing::debug;

use crate::{
    common::{Error, Result},
    media::{
        MediaFormat, SampleInfo, SampleSource,
        ffmpeg::{MICROS, init, stream_format},
    },
};

struct Track {
    stream: usize,
    format: MediaFormat,
    time_base: Rational,
    reader: Option<TrackReader>,
}

/// A demuxer context positioned on one track, with the packet under the
/// cursor held back until `advance`.
struct TrackReader {
    input: format::context::Input,
    current: Option<Packet>,
    exhausted: bool,
}

pub struct Mp4Source {
    path: PathBuf,
    tracks: Vec<Track>,
}

impl Mp4Source {
    /// Probe `path` and size every track's largest sample with one pass over
    /// its packets.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        init()?;
        let path = path.as_ref().to_path_buf();
        let mut input = format::input(&path)?;

        let mut tracks: Vec<Track> = input
            .streams()
            .filter_map(|stream| {
                let format = stream_format(&stream)?;
                Some(Track {
                    stream: stream.index(),
                    format,
                    time_base: stream.time_base(),
                    reader: None,
                })
            })
            .collect();

        let mut packet = Packet::empty();
        loop {
            match packet.read(&mut input) {
                Ok(()) => {
                    if let Some(track) = tracks.iter_mut().find(|t| t.stream == packet.stream()) {
                        let largest = track.format.max_input_size.unwrap_or(0);
                        track.format.max_input_size = Some(largest.max(packet.size()));
                    }
                }
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        for (index, track) in tracks.iter().enumerate() {
            debug!(
                "track {}: {} (stream {}, largest sample {:?} bytes)",
                index, track.format.mime, track.stream, track.format.max_input_size
            );
        }
        Ok(Self { path, tracks })
    }

    fn track(&self, track: usize) -> Result<&Track> {
        self.tracks.get(track).ok_or(Error::TrackOutOfRange(track))
    }

    fn track_mut(&mut self, track: usize) -> Result<&mut Track> {
        self.tracks
            .get_mut(track)
            .ok_or(Error::TrackOutOfRange(track))
    }

    /// The packet under `track`'s cursor, reading ahead past other streams'
    /// packets if needed. `None` once exhausted or when not selected.
    fn fill(&mut self, track: usize) -> Result<Option<&Packet>> {
        let track = self.track_mut(track)?;
        let stream = track.stream;
        let Some(reader) = track.reader.as_mut() else {
            return Ok(None);
        };

        while reader.current.is_none() && !reader.exhausted {
            let mut packet = Packet::empty();
            match packet.read(&mut reader.input) {
                Ok(()) if packet.stream() == stream => reader.current = Some(packet),
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => reader.exhausted = true,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(reader.current.as_ref())
    }
}

impl SampleSource for Mp4Source {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, track: usize) -> Result<MediaFormat> {
        Ok(self.track(track)?.format.clone())
    }

    fn select_track(&mut self, track: usize) -> Result<()> {
        let path = self.path.clone();
        let track = self.track_mut(track)?;
        if track.reader.is_none() {
            track.reader = Some(TrackReader {
                input: format::input(&path)?,
                current: None,
                exhausted: false,
            });
        }
        Ok(())
    }

    fn unselect_track(&mut self, track: usize) {
        if let Some(track) = self.tracks.get_mut(track) {
            track.reader = None;
        }
    }

    fn sample_info(&mut self, track: usize) -> Result<Option<SampleInfo>> {
        let time_base = self.track(track)?.time_base;
        let Some(packet) = self.fill(track)? else {
            return Ok(None);
        };

        let decode_time_us = packet.dts().map(|dts| dts.rescale(time_base, MICROS));
        let time_us = match packet.pts() {
            Some(pts) => pts.rescale(time_base, MICROS),
            None => decode_time_us.unwrap_or(0),
        };
        Ok(Some(SampleInfo {
            size: packet.size(),
            time_us,
            decode_time_us,
            sync: packet.is_key(),
        }))
    }

    fn read_sample_data(&mut self, track: usize, buf: &mut [u8]) -> Result<usize> {
        let Some(data) = self.fill(track)?.and_then(Packet::data) else {
            return Ok(0);
        };
        let capacity = buf.len();
        let target = buf.get_mut(..data.len()).ok_or(Error::BufferTooSmall {
            size: data.len(),
            capacity,
        })?;
        target.copy_from_slice(data);
        Ok(data.len())
    }

    fn advance(&mut self, track: usize) -> Result<bool> {
        if self.fill(track)?.is_none() {
            return Ok(false);
        }
        if let Some(reader) = self.track_mut(track)?.reader.as_mut() {
            reader.current = None;
        }
        Ok(self.fill(track)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{
        BufferFlags, BufferInfo, ContainerSink, MIMETYPE_AUDIO_AAC, MIMETYPE_VIDEO_AVC,
        mp4::Mp4Writer,
    };
    use crate::mix::testing::{AVC_CONFIG, temp_path};

    fn avc_format() -> MediaFormat {
        let mut format = MediaFormat::new(MIMETYPE_VIDEO_AVC).with_csd(AVC_CONFIG.to_vec());
        format.width = Some(640);
        format.height = Some(360);
        format
    }

    fn written_file(name: &str) -> PathBuf {
        let path = temp_path(name);
        let mut writer = Mp4Writer::create(&path).unwrap();
        writer.set_orientation_hint(90).unwrap();
        let video = writer.add_track(&avc_format()).unwrap();
        let audio = writer
            .add_track(
                &MediaFormat::audio(MIMETYPE_AUDIO_AAC, 44_100, 2).with_csd(vec![0x12, 0x10]),
            )
            .unwrap();
        writer.start().unwrap();

        for i in 0..3i64 {
            let flags = if i == 0 {
                BufferFlags::KEY_FRAME
            } else {
                BufferFlags::NONE
            };
            let data = vec![i as u8; 10 + i as usize];
            writer
                .write_sample(video, &data, &BufferInfo::new(data.len(), i * 40_000, flags))
                .unwrap();
            let data = vec![0x20 | i as u8; 6];
            writer
                .write_sample(audio, &data, &BufferInfo::new(6, i * 23_220, BufferFlags::NONE))
                .unwrap();
        }
        writer.stop().unwrap();
        path
    }

    #[test]
    fn reads_back_tracks_and_samples() {
        let path = written_file("demux-readback.mp4");
        let mut source = Mp4Source::open(&path).unwrap();
        assert_eq!(source.track_count(), 2);

        let video = source.track_format(0).unwrap();
        assert_eq!(video.mime, MIMETYPE_VIDEO_AVC);
        assert_eq!(video.rotation, Some(90));
        assert_eq!(video.width, Some(640));
        assert_eq!(video.max_input_size, Some(12));
        assert_eq!(video.csd.as_deref(), Some(&AVC_CONFIG[..]));

        let audio = source.track_format(1).unwrap();
        assert!(audio.is_aac());
        assert_eq!(audio.sample_rate, Some(44_100));
        assert_eq!(audio.channel_count, Some(2));
        assert_eq!(audio.csd.as_deref(), Some(&[0x12, 0x10][..]));

        source.select_track(0).unwrap();
        let mut buf = vec![0u8; 64];
        let mut seen = Vec::new();
        while let Some(info) = source.sample_info(0).unwrap() {
            let n = source.read_sample_data(0, &mut buf).unwrap();
            seen.push((info.time_us, info.sync, buf[..n].to_vec()));
            source.advance(0).unwrap();
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].0, 40_000);
        assert!(seen[0].1);
        assert!(!seen[2].1);
        assert_eq!(seen[2].2, vec![2u8; 12]);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn tracks_read_independently() {
        let path = written_file("demux-independent.mp4");
        let mut source = Mp4Source::open(&path).unwrap();
        assert_eq!(source.sample_info(1).unwrap(), None);

        source.select_track(0).unwrap();
        source.select_track(1).unwrap();
        assert!(source.advance(0).unwrap());
        assert!(source.advance(0).unwrap());
        assert!(!source.advance(0).unwrap());

        let first = source.sample_info(1).unwrap().unwrap();
        assert_eq!(first.size, 6);
        assert!(first.sync);

        let mut small = [0u8; 2];
        assert!(matches!(
            source.read_sample_data(1, &mut small),
            Err(Error::BufferTooSmall { size: 6, capacity: 2 })
        ));

        source.unselect_track(1);
        assert_eq!(source.sample_info(1).unwrap(), None);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn garbage_is_not_an_mp4() {
        let path = temp_path("demux-garbage.mp4");
        let mut bytes = vec![0, 0, 0, 16];
        bytes.extend_from_slice(b"free");
        bytes.extend_from_slice(&[0; 8]);
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(Mp4Source::open(&path), Err(Error::Ffmpeg(_))));
        std::fs::remove_file(path).unwrap();
    }
}
