use crate::{
    common::Result,
    media::ContainerSink,
    mix::{AudioSampleMixer, Mp4Muxer, VideoSampleExtractor},
};

/// The two shapes of work the pipeline driver steps through.
pub enum SampleWorker {
    Audio(AudioSampleMixer),
    Video(VideoSampleExtractor),
}

impl SampleWorker {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Audio(_) => "audio mixer",
            Self::Video(_) => "video pass-through",
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Self::Audio(mixer) => mixer.is_finished(),
            Self::Video(video) => video.is_finished(),
        }
    }

    /// Take one non-blocking step. Returns whether anything moved.
    pub fn process_next_sample<S: ContainerSink>(
        &mut self,
        muxer: &mut Mp4Muxer<S>,
    ) -> Result<bool> {
        match self {
            Self::Audio(mixer) => mixer.process_next_sample(muxer),
            Self::Video(video) => video.process_next_sample(muxer),
        }
    }

    pub fn release(&mut self) -> Result<()> {
        match self {
            Self::Audio(mixer) => mixer.release(),
            Self::Video(video) => {
                video.release();
                Ok(())
            }
        }
    }
}
