/// Decoded PCM borrowed from a decoder output buffer.
///
/// The buffer at `buffer_index` stays lent out until the owning extractor
/// releases this sample, which it only does once `data` is fully consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSample {
    pub buffer_index: usize,
    pub presentation_time_us: i64,
    /// Interleaved PCM.
    pub data: Vec<i16>,
    /// Read position into `data`.
    pub position: usize,
    /// Whether this sample's timestamps drive the mixed output's timeline.
    pub syncs_presentation_time: bool,
}

impl AudioSample {
    pub fn new(
        buffer_index: usize,
        presentation_time_us: i64,
        data: Vec<i16>,
        syncs_presentation_time: bool,
    ) -> Self {
        Self {
            buffer_index,
            presentation_time_us,
            data,
            position: 0,
            syncs_presentation_time,
        }
    }

    /// Decode a little-endian i16 payload.
    pub fn from_le_bytes(
        buffer_index: usize,
        presentation_time_us: i64,
        bytes: &[u8],
        syncs_presentation_time: bool,
    ) -> Self {
        let data = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Self::new(buffer_index, presentation_time_us, data, syncs_presentation_time)
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Next unread sample, advancing the read position.
    pub fn read_next(&mut self) -> Option<i16> {
        let s = self.data.get(self.position).copied()?;
        self.position += 1;
        Some(s)
    }
}
