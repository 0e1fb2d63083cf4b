//! Sample Source — a demultiplexer over one input container.

use std::{cell::RefCell, rc::Rc};

use crate::{
    common::{Error, Result},
    media::{MediaFormat, TrackKind},
};

/// Size, timing and sync flag of the next encoded sample on a track.
///
/// `time_us` is the presentation time. `decode_time_us` differs from it for
/// reordered video, and is `None` when the container does not say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub size: usize,
    pub time_us: i64,
    pub decode_time_us: Option<i64>,
    pub sync: bool,
}

/// Read side of a demuxer.
///
/// Each selected track has its own read cursor. `sample_info` peeks the
/// sample under the cursor (`None` once the track is exhausted),
/// `read_sample_data` copies its bytes and `advance` moves past it.
pub trait SampleSource {
    fn track_count(&self) -> usize;

    fn track_format(&self, track: usize) -> Result<MediaFormat>;

    fn select_track(&mut self, track: usize) -> Result<()>;

    fn unselect_track(&mut self, track: usize);

    fn sample_info(&mut self, track: usize) -> Result<Option<SampleInfo>>;

    /// Copy the current sample into `buf` and return its size.
    fn read_sample_data(&mut self, track: usize, buf: &mut [u8]) -> Result<usize>;

    /// Move the cursor to the next sample. Returns `false` at end of track.
    fn advance(&mut self, track: usize) -> Result<bool>;
}

/// The video container feeds both the pass-through worker and the timing
/// authority's extractor, all on the pipeline thread.
pub type SharedSource = Rc<RefCell<Box<dyn SampleSource>>>;

pub fn shared(source: Box<dyn SampleSource>) -> SharedSource {
    Rc::new(RefCell::new(source))
}

/// Index of the first track whose MIME type belongs to `kind`.
pub fn find_track(source: &dyn SampleSource, kind: TrackKind) -> Result<usize> {
    for track in 0..source.track_count() {
        if kind.matches(&source.track_format(track)?.mime) {
            return Ok(track);
        }
    }
    Err(Error::MissingTrack(kind))
}
