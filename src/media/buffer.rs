//! Codec buffer bookkeeping.
//!
//! Codecs lend buffers to their caller by index. Every lent index must come
//! back exactly once; a slot that is never returned stalls the codec for good.

use std::ops::BitOr;

/// Input buffer size when a track does not advertise its largest sample.
pub const DEFAULT_MAX_INPUT_SIZE: usize = 1024 * 1024;

/// Per-buffer flags, mirroring what a hardware codec attaches to a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    pub const KEY_FRAME: Self = Self(1);
    /// Out-of-band codec setup data, not media payload.
    pub const CODEC_CONFIG: Self = Self(2);
    pub const END_OF_STREAM: Self = Self(4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_eos(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }

    pub fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Size, timing and flags of one buffer's payload.
///
/// `decode_time_us` is only known for samples copied out of a container;
/// without it a writer assumes decode order equals presentation order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: usize,
    pub presentation_time_us: i64,
    pub decode_time_us: Option<i64>,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn new(size: usize, presentation_time_us: i64, flags: BufferFlags) -> Self {
        Self {
            size,
            presentation_time_us,
            decode_time_us: None,
            flags,
        }
    }

    pub fn with_decode_time(mut self, decode_time_us: Option<i64>) -> Self {
        self.decode_time_us = decode_time_us;
        self
    }

    /// Zero-length end-of-stream marker.
    pub fn end_of_stream() -> Self {
        Self::new(0, 0, BufferFlags::END_OF_STREAM)
    }

    pub fn is_eos(&self) -> bool {
        self.flags.is_eos()
    }
}

// ─── BufferSlots ─────────────────────────────────────────────────────────────

/// A fixed set of indexed byte buffers with lend/return tracking.
///
/// `acquire` lends the lowest free index; `release` takes it back. Releasing
/// an index that is not currently lent is an error, which is how double
/// releases surface.
pub struct BufferSlots {
    buffers: Vec<Vec<u8>>,
    lent: Vec<bool>,
}

impl BufferSlots {
    /// `count` buffers, each pre-sized to `size` bytes.
    pub fn new(count: usize, size: usize) -> Self {
        Self {
            buffers: (0..count).map(|_| vec![0; size]).collect(),
            lent: vec![false; count],
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn available(&self) -> usize {
        self.lent.iter().filter(|lent| !**lent).count()
    }

    pub fn acquire(&mut self) -> Option<usize> {
        let index = self.lent.iter().position(|lent| !*lent)?;
        self.lent[index] = true;
        Some(index)
    }

    pub fn release(&mut self, index: usize) -> crate::Result<()> {
        match self.lent.get_mut(index) {
            Some(lent) if *lent => {
                *lent = false;
                Ok(())
            }
            _ => Err(crate::Error::InvalidBuffer(index)),
        }
    }

    pub fn is_lent(&self, index: usize) -> bool {
        self.lent.get(index).copied().unwrap_or(false)
    }

    /// Mutable access to a lent buffer.
    pub fn get_mut(&mut self, index: usize) -> crate::Result<&mut Vec<u8>> {
        if !self.is_lent(index) {
            return Err(crate::Error::InvalidBuffer(index));
        }
        Ok(&mut self.buffers[index])
    }

    pub fn get(&self, index: usize) -> crate::Result<&Vec<u8>> {
        if !self.is_lent(index) {
            return Err(crate::Error::InvalidBuffer(index));
        }
        Ok(&self.buffers[index])
    }
}
