//! Frame ingestion: ids, frames, chunks and the chunk-cutting buffer.

pub mod buffer;
pub mod frame;
pub mod types;

pub use buffer::{FrameBuffer, DEFAULT_MIN_PARTIAL_FRAMES};
pub use frame::{Chunk, Frame};
pub use types::{ChunkId, FrameId};
