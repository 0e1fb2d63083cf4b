/// Sleep applied when a full scheduler pass makes no progress.
pub const IDLE_BACKOFF_MS: u64 = 10;

/// Bitrate of a freshly built AAC output format.
pub const OUTPUT_BIT_RATE: u32 = 128_000;

/// MPEG-4 audio object type for AAC Enhanced Low Delay.
pub const AAC_OBJECT_ELD: u32 = 39;

/// Minimum size of one Container Writer arena chunk.
pub const ARENA_CHUNK_SIZE: usize = 64 * 1024;

/// Full-scale magnitude of a 16-bit PCM sample.
pub const SHORT_MAX: f32 = i16::MAX as f32;
