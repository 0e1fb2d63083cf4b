//! Codec seam — the non-blocking queue interface every decoder and encoder
//! speaks, and the factory the pipeline asks for them.
//!
//! Nothing here ever waits. A caller polls: borrow an input buffer, fill it,
//! queue it; later poll the output side for an event.

use crate::{
    common::Result,
    media::{BufferInfo, MediaFormat, PcmLayout},
};

/// What the output side of a codec has to say right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    /// Nothing available yet.
    TryAgainLater,
    /// `output_format()` now reports the actual output format.
    FormatChanged,
    /// Buffer indices were reshuffled; poll again.
    BuffersChanged,
    /// Output buffer `index` holds `info.size` bytes of payload.
    Buffer { index: usize, info: BufferInfo },
}

pub trait Codec {
    /// Lend a free input buffer, if any.
    fn dequeue_input_buffer(&mut self) -> Result<Option<usize>>;

    /// The full capacity of a lent input buffer.
    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]>;

    /// Hand a filled input buffer back to the codec.
    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> Result<()>;

    fn dequeue_output_buffer(&mut self) -> Result<OutputEvent>;

    /// Bytes of a lent output buffer; the payload is the first `info.size`.
    fn output_buffer(&self, index: usize) -> Result<&[u8]>;

    fn output_format(&self) -> Option<MediaFormat>;

    fn release_output_buffer(&mut self, index: usize) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// Creates configured, started codecs.
pub trait CodecFactory {
    /// A decoder for `format` emitting interleaved little-endian i16 PCM,
    /// converted to `conform_to` when given.
    fn create_decoder(
        &self,
        format: &MediaFormat,
        conform_to: Option<PcmLayout>,
    ) -> Result<Box<dyn Codec>>;

    /// An encoder producing `format` from interleaved little-endian i16 PCM.
    fn create_encoder(&self, format: &MediaFormat) -> Result<Box<dyn Codec>>;
}

impl<F: CodecFactory + ?Sized> CodecFactory for &F {
    fn create_decoder(
        &self,
        format: &MediaFormat,
        conform_to: Option<PcmLayout>,
    ) -> Result<Box<dyn Codec>> {
        (**self).create_decoder(format, conform_to)
    }

    fn create_encoder(&self, format: &MediaFormat) -> Result<Box<dyn Codec>> {
        (**self).create_encoder(format)
    }
}
