use crate::{
    common::Result,
    media::{BufferInfo, MediaFormat},
};

/// The physical container writer behind the Container Writer.
///
/// Tracks are added before `start`; samples are written after it, and `stop`
/// finalizes the file.
pub trait ContainerSink {
    /// Clockwise rotation the player should apply to the video track.
    fn set_orientation_hint(&mut self, degrees: u32) -> Result<()>;

    fn add_track(&mut self, format: &MediaFormat) -> Result<usize>;

    fn start(&mut self) -> Result<()>;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}
