use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mix::constants::{
    AAC_OBJECT_ELD, ARENA_CHUNK_SIZE, IDLE_BACKOFF_MS, OUTPUT_BIT_RATE,
};

/// Tunables for one mixing run.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MixerConfig {
    /// Sleep applied when a full scheduler pass makes no progress.
    pub idle_backoff_ms: u64,
    /// Encoder bitrate used when the timing authority is not already AAC.
    pub output_bit_rate: u32,
    /// AAC object type for a freshly built output format.
    pub aac_profile: u32,
    /// Minimum size of a Container Writer arena chunk.
    pub arena_chunk_size: usize,
    /// Convert the external track's PCM to the authority's rate and layout.
    pub conform_external_audio: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            idle_backoff_ms: IDLE_BACKOFF_MS,
            output_bit_rate: OUTPUT_BIT_RATE,
            aac_profile: AAC_OBJECT_ELD,
            arena_chunk_size: ARENA_CHUNK_SIZE,
            conform_external_audio: true,
        }
    }
}

impl MixerConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}
