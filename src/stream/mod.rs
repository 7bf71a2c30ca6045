//! Stream normalization: heterogeneous incremental sources in, one ordered
//! sequence of [`StreamChunk`]s out.

pub mod chunk;
pub mod chunking;
pub mod extract;
pub mod normalizer;
pub mod sse;
pub mod thinking;
pub mod transform;

use std::time::Duration;

pub use chunk::{ChunkKind, StreamChunk};
pub use chunking::{split_chunks, ChunkMode};
pub use extract::{default_extractors, extract_text, DeltaExtractor};
pub use normalizer::{forward, spawn_forward, ChunkStream, StreamNormalizer};
pub use sse::{sse_frames, to_sse_frame, DONE_FRAME};
pub use thinking::{ThinkingDelimiters, ThinkingFilter};
pub use transform::{BufferTransform, ChunkTransform, ThinkingTransform};

/// How results are packaged as streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Piece size when a complete result is replayed as a stream.
    pub chunking: ChunkMode,
    /// Pause between replayed pieces.
    pub delay: Duration,
    /// Remove reasoning blocks before text reaches the consumer.
    pub strip_thinking: bool,
    pub thinking: ThinkingDelimiters,
    /// The source resends the accumulated text on every chunk.
    pub cumulative: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunking: ChunkMode::Words(1),
            delay: Duration::from_millis(200),
            strip_thinking: true,
            thinking: ThinkingDelimiters::default(),
            cumulative: false,
        }
    }
}

impl StreamSettings {
    /// No artificial delay; useful for tests and non-interactive consumers.
    pub fn immediate() -> Self {
        Self {
            delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
