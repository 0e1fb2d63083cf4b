//! `mix/video.rs` — video pass-through. Encoded samples go from the source
//! straight into the Container Writer; nothing is decoded.

use tracing::{debug, trace};

use crate::{
    common::Result,
    media::{
        BufferFlags, BufferInfo, ContainerSink, DEFAULT_MAX_INPUT_SIZE, SharedSource, TrackKind,
    },
    mix::Mp4Muxer,
};

pub struct VideoSampleExtractor {
    source: SharedSource,
    track: usize,
    buffer: Vec<u8>,
    finished: bool,
}

impl VideoSampleExtractor {
    /// Select `track` and register its format, rotation included, as the
    /// video output format.
    pub fn new<S: ContainerSink>(
        source: SharedSource,
        track: usize,
        muxer: &mut Mp4Muxer<S>,
    ) -> Result<Self> {
        let format = source.borrow().track_format(track)?;
        source.borrow_mut().select_track(track)?;

        let buffer_size = format.max_input_size.unwrap_or(DEFAULT_MAX_INPUT_SIZE);
        debug!(
            "video pass-through on track {} ({}, rotation {:?})",
            track, format.mime, format.rotation
        );
        muxer.set_output_format(TrackKind::Video, format)?;

        Ok(Self {
            source,
            track,
            buffer: vec![0; buffer_size],
            finished: false,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Copy at most one sample. The step that discovers the end of the track
    /// also counts as progress.
    pub fn process_next_sample<S: ContainerSink>(
        &mut self,
        muxer: &mut Mp4Muxer<S>,
    ) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }

        let mut source = self.source.borrow_mut();
        let Some(info) = source.sample_info(self.track)? else {
            debug!("video track {} finished", self.track);
            source.unselect_track(self.track);
            self.finished = true;
            return Ok(true);
        };

        if info.size > self.buffer.len() {
            self.buffer.resize(info.size, 0);
        }
        let size = source.read_sample_data(self.track, &mut self.buffer)?;
        let flags = if info.sync {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::NONE
        };
        trace!("video sample {} bytes at {}us", size, info.time_us);
        muxer.write_sample(
            TrackKind::Video,
            &self.buffer[..size],
            &BufferInfo::new(size, info.time_us, flags).with_decode_time(info.decode_time_us),
        )?;
        source.advance(self.track)?;
        Ok(true)
    }

    pub fn release(&mut self) {
        self.source.borrow_mut().unselect_track(self.track);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        media::{MIMETYPE_AUDIO_AAC, MIMETYPE_VIDEO_AVC, MediaFormat, shared},
        mix::testing::{MemorySample, MemorySource, MemoryTrack, RecordingSink, SinkEvent},
    };

    #[test]
    fn copies_samples_and_key_flags_verbatim() {
        let mut format = MediaFormat::new(MIMETYPE_VIDEO_AVC);
        format.max_input_size = Some(2);
        format.rotation = Some(180);
        let samples = vec![
            MemorySample::new(0, true, vec![1, 2]).decoded_at(-20_000),
            MemorySample::new(40_000, false, vec![3, 4, 5, 6]).decoded_at(0),
            MemorySample::new(20_000, false, vec![7]).decoded_at(20_000),
        ];
        let source = shared(Box::new(MemorySource::new(vec![MemoryTrack::new(
            format.clone(),
            samples,
        )])));

        let mut muxer = Mp4Muxer::new(RecordingSink::default(), 180, 64).unwrap();
        let mut worker = VideoSampleExtractor::new(source, 0, &mut muxer).unwrap();
        muxer
            .set_output_format(TrackKind::Audio, MediaFormat::audio(MIMETYPE_AUDIO_AAC, 8_000, 1))
            .unwrap();

        let mut steps = 0;
        while !worker.is_finished() {
            assert!(worker.process_next_sample(&mut muxer).unwrap());
            steps += 1;
        }
        assert_eq!(steps, 4);
        assert!(!worker.process_next_sample(&mut muxer).unwrap());

        let sink = muxer.release().unwrap();
        assert_eq!(sink.events[1], SinkEvent::AddTrack(format));
        let written: Vec<_> = sink
            .samples(0)
            .map(|(data, info)| {
                (
                    data.to_vec(),
                    info.presentation_time_us,
                    info.decode_time_us,
                    info.flags,
                )
            })
            .collect();
        assert_eq!(
            written,
            vec![
                (vec![1, 2], 0, Some(-20_000), BufferFlags::KEY_FRAME),
                (vec![3, 4, 5, 6], 40_000, Some(0), BufferFlags::NONE),
                (vec![7], 20_000, Some(20_000), BufferFlags::NONE),
            ]
        );
    }
}
