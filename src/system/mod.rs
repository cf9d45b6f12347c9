//! Reconstruction orchestration and thread management.
//!
//! `ReconstructionContext` owns all mutable state and runs the pipeline
//! synchronously. `StreamingReconstructor` wraps it in a single worker thread
//! fed by a channel, along with shared snapshot state and the event types
//! published to consumers.

pub mod context;
pub mod messages;
pub mod reconstructor;
pub mod shared_state;

pub use context::{
    FinalReconstruction, Phase, Quality, ReconstructionContext, ReconstructionError,
    SessionStats, SessionStatus,
};
pub use messages::{ChunkReady, CloudSnapshot};
pub use reconstructor::StreamingReconstructor;
pub use shared_state::SharedState;
