//! Chunk history, incremental global accumulation and re-fusion.

pub mod accumulator;
pub mod chunk;
pub mod cloud;

pub use accumulator::{GlobalAccumulator, SequentialWeights};
pub use chunk::{ChunkState, ChunkStatus};
pub use cloud::{map_chunk, CloudConfig, CloudPoint, CloudSegment, GlobalCloud};
