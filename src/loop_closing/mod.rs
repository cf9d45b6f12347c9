//! Loop closing at finalize.
//!
//! # Pipeline
//!
//! 1. **Detection** (`detector.rs`): one embedding per chunk, cosine similarity
//!    between chunk pairs that are far apart in the sequence
//! 2. **Verification** (`verifier.rs`): joint inference on both chunks'
//!    representative windows plus alignment of each chunk into it
//! 3. **Orchestration** (`loop_closer.rs`): runs both stages over the full
//!    chunk history and keeps statistics
//!
//! Verified loops are handed to the pose graph optimizer by the caller.

pub mod detector;
pub mod loop_closer;
pub mod verifier;

pub use detector::{cosine_similarity, detect_loop_candidates, embed_chunks, ChunkEmbedding, LoopCandidate};
pub use loop_closer::{LoopCloser, LoopCloserStats, LoopClosureConfig};
pub use verifier::{verify_candidate, VerificationRejection, VerifiedLoop};
