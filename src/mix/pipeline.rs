//! `mix/pipeline.rs` — the pipeline driver and the public mixing entry points.
//!
//! One thread polls every unfinished worker in turn. A pass in which no
//! worker makes progress sleeps for the idle back-off before polling again.
//! Teardown always runs: workers first, then sources, then the writer.

use std::{
    path::{Path, PathBuf},
    thread,
    time::Instant,
};

use tracing::{Level, debug, info, span, trace, warn};

use crate::{
    common::Result,
    configs::MixerConfig,
    media::{
        CodecFactory, ContainerSink, PcmLayout, SampleSource, SharedSource, TrackKind,
        detect::open_source, find_track, mp4::Mp4Writer, shared,
    },
    mix::{AudioSampleExtractor, AudioSampleMixer, Mp4Muxer, SampleWorker, VideoSampleExtractor},
};

/// Track indices the mix needs, located before anything is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InputTracks {
    video: usize,
    /// The video file's own audio: the timing authority.
    video_audio: usize,
    external_audio: usize,
    rotation: u32,
}

impl InputTracks {
    fn locate(video: &dyn SampleSource, audio: &dyn SampleSource) -> Result<Self> {
        let video_track = find_track(video, TrackKind::Video)?;
        let video_audio = find_track(video, TrackKind::Audio)?;
        let external_audio = find_track(audio, TrackKind::Audio)?;
        let rotation = video.track_format(video_track)?.rotation.unwrap_or(0);
        Ok(Self {
            video: video_track,
            video_audio,
            external_audio,
            rotation,
        })
    }
}

/// Mixes an external audio track into a video's own audio and re-muxes the
/// video stream untouched.
pub struct AudioMixer<C: CodecFactory> {
    codecs: C,
    config: MixerConfig,
}

impl<C: CodecFactory> AudioMixer<C> {
    pub fn new(codecs: C, config: MixerConfig) -> Self {
        Self { codecs, config }
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    /// Mix `audio`'s first audio track into `video`'s and write the result,
    /// with `video`'s first video track, to `sink`. Blocks until done and
    /// returns the stopped sink.
    ///
    /// `video` needs a video and an audio track, `audio` an audio track.
    /// Missing tracks fail before any codec or writer state is created.
    pub fn mix<S: ContainerSink>(
        &self,
        video: Box<dyn SampleSource>,
        audio: Box<dyn SampleSource>,
        sink: S,
    ) -> Result<S> {
        let _span = span!(Level::INFO, "mix").entered();
        let tracks = InputTracks::locate(&*video, &*audio)?;
        info!(
            "mixing: video track {}, authority track {}, external track {}, rotation {}",
            tracks.video, tracks.video_audio, tracks.external_audio, tracks.rotation
        );
        let started = Instant::now();

        let video = shared(video);
        let audio = shared(audio);
        let mut muxer = Mp4Muxer::new(sink, tracks.rotation, self.config.arena_chunk_size)?;

        let outcome = self.run(&video, &audio, tracks, &mut muxer);
        drop(video);
        drop(audio);

        match outcome {
            Ok(()) => {
                let sink = muxer.release()?;
                info!("mix finished in {:?}", started.elapsed());
                Ok(sink)
            }
            Err(e) => {
                if let Err(release) = muxer.release() {
                    warn!("container writer release after failed mix: {release}");
                }
                Err(e)
            }
        }
    }

    /// Open both inputs, mix them and write an MP4 to `output`.
    pub fn mix_files(
        &self,
        video: impl AsRef<Path>,
        audio: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        let output = output.as_ref();
        let video = open_source(video)?;
        let audio = open_source(audio)?;

        // Fail before the output file exists.
        InputTracks::locate(&*video, &*audio)?;

        let writer = Mp4Writer::create(output)?;
        self.mix(video, audio, writer)?;
        Ok(output.to_path_buf())
    }

    fn run<S: ContainerSink>(
        &self,
        video: &SharedSource,
        audio: &SharedSource,
        tracks: InputTracks,
        muxer: &mut Mp4Muxer<S>,
    ) -> Result<()> {
        let authority =
            AudioSampleExtractor::new(video.clone(), tracks.video_audio, true, &self.codecs, None)?;
        let conform_to = self
            .config
            .conform_external_audio
            .then(|| PcmLayout::of(authority.input_format()))
            .flatten();
        let external = AudioSampleExtractor::new(
            audio.clone(),
            tracks.external_audio,
            false,
            &self.codecs,
            conform_to,
        )?;

        let mixer = AudioSampleMixer::new(vec![authority, external], &self.codecs, &self.config)?;
        let passthrough = VideoSampleExtractor::new(video.clone(), tracks.video, muxer)?;

        let mut workers = [SampleWorker::Audio(mixer), SampleWorker::Video(passthrough)];
        self.drive(&mut workers, muxer)?;

        for worker in &mut workers {
            worker.release()?;
        }
        Ok(())
    }

    fn drive<S: ContainerSink>(
        &self,
        workers: &mut [SampleWorker],
        muxer: &mut Mp4Muxer<S>,
    ) -> Result<()> {
        let backoff = self.config.idle_backoff();
        let mut passes = 0u64;
        let mut idle_passes = 0u64;

        loop {
            let mut active = false;
            let mut busy = false;
            for worker in workers.iter_mut().filter(|worker| !worker.is_finished()) {
                active = true;
                busy |= worker.process_next_sample(muxer)?;
                if worker.is_finished() {
                    debug!("{} finished after {} passes", worker.name(), passes + 1);
                }
            }
            if !active {
                break;
            }

            passes += 1;
            if !busy {
                idle_passes += 1;
                trace!("idle pass, sleeping {:?}", backoff);
                thread::sleep(backoff);
            }
        }

        debug!("pipeline drained: {passes} passes, {idle_passes} idle");
        Ok(())
    }
}
