//! Inference stage: oracle interfaces, local reconstructions and the
//! per-chunk processor.

pub mod oracle;
pub mod processor;
pub mod reconstruction;

pub use oracle::{EmbeddingError, EmbeddingOracle, InferenceError, InferenceOracle};
pub use processor::{ChunkOutcome, ChunkProcessor, DEFAULT_INFERENCE_RETRIES};
pub use reconstruction::{FrameReconstruction, LocalReconstruction};
