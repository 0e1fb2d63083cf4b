//! AAC: the AudioSpecificConfig carried as codec-specific data, and the
//! ffmpeg-backed encoder the mixer writes its output with.

pub mod encoder;

pub use encoder::AacEncoder;

use bytes::Bytes;

use crate::common::{Error, Result};

pub const AAC_LC: u32 = 2;
pub const AAC_HE: u32 = 5;
pub const AAC_LD: u32 = 23;
pub const AAC_HE_V2: u32 = 29;
pub const AAC_ELD: u32 = 39;

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Escape value of the 4-bit sampling frequency index: a 24-bit rate follows.
const EXPLICIT_RATE: u32 = 0x0F;

/// The leading fields of an MPEG-4 AudioSpecificConfig.
///
/// For SBR/PS object types `sample_rate` is the core rate, which is what a
/// plain AAC decoder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u32,
    pub sample_rate: u32,
    pub channel_config: u8,
}

impl AudioSpecificConfig {
    pub fn new(object_type: u32, sample_rate: u32, channels: u16) -> Self {
        let channel_config = match channels {
            8 => 7,
            1..=6 => channels as u8,
            _ => 0,
        };
        Self {
            object_type,
            sample_rate,
            channel_config,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut bits = BitReader::new(data);

        let mut object_type = bits.read(5)?;
        if object_type == 31 {
            object_type = 32 + bits.read(6)?;
        }
        let sample_rate = match bits.read(4)? {
            EXPLICIT_RATE => bits.read(24)?,
            index => *SAMPLE_RATES
                .get(index as usize)
                .ok_or_else(|| Error::Malformed(format!("sampling frequency index {index}")))?,
        };
        let channel_config = bits.read(4)? as u8;

        Ok(Self {
            object_type,
            sample_rate,
            channel_config,
        })
    }

    /// Channel count, or `None` when the layout lives in a program config
    /// element.
    pub fn channels(&self) -> Option<usize> {
        match self.channel_config {
            1..=6 => Some(usize::from(self.channel_config)),
            7 => Some(8),
            _ => None,
        }
    }

    /// The two- to five-byte form without extensions.
    pub fn to_bytes(&self) -> Bytes {
        let mut bits = BitWriter::default();
        if self.object_type >= 32 {
            bits.write(31, 5);
            bits.write(self.object_type - 32, 6);
        } else {
            bits.write(self.object_type, 5);
        }
        match SAMPLE_RATES.iter().position(|rate| *rate == self.sample_rate) {
            Some(index) => bits.write(index as u32, 4),
            None => {
                bits.write(EXPLICIT_RATE, 4);
                bits.write(self.sample_rate, 24);
            }
        }
        bits.write(u32::from(self.channel_config), 4);
        // frameLengthFlag, dependsOnCoreCoder, extensionFlag
        bits.write(0, 3);
        bits.finish()
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read(&mut self, count: usize) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = self
                .data
                .get(self.pos / 8)
                .ok_or_else(|| Error::Malformed("truncated AudioSpecificConfig".into()))?;
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | u32::from(bit);
            self.pos += 1;
        }
        Ok(value)
    }
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    len: usize,
}

impl BitWriter {
    fn write(&mut self, value: u32, count: usize) {
        for shift in (0..count).rev() {
            if self.len % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> shift) & 1 == 1 {
                if let Some(last) = self.bytes.last_mut() {
                    *last |= 0x80 >> (self.len % 8);
                }
            }
            self.len += 1;
        }
    }

    fn finish(self) -> Bytes {
        Bytes::from(self.bytes)
    }
}
