//! ChunkProcessor: delegates each chunk to the inference oracle.
//!
//! A failed attempt (backend error or malformed output) is retried a fixed
//! number of times. When every attempt fails the chunk is reported as failed;
//! the caller records the gap and keeps processing later chunks.

use tracing::{debug, warn};

use crate::frames::{Chunk, Frame, FrameId};

use super::oracle::{InferenceError, InferenceOracle};
use super::reconstruction::LocalReconstruction;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_INFERENCE_RETRIES: usize = 1;

/// Result of processing a single chunk.
#[derive(Debug)]
pub enum ChunkOutcome {
    Reconstructed {
        reconstruction: LocalReconstruction,
        attempts: usize,
    },
    Failed {
        attempts: usize,
        error: InferenceError,
    },
}

pub struct ChunkProcessor {
    oracle: Box<dyn InferenceOracle>,
    retries: usize,
}

impl ChunkProcessor {
    pub fn new(oracle: Box<dyn InferenceOracle>, retries: usize) -> Self {
        Self { oracle, retries }
    }

    /// Run inference for a chunk, retrying on failure.
    pub fn process(&mut self, chunk: &Chunk) -> ChunkOutcome {
        if chunk.is_empty() {
            return ChunkOutcome::Failed {
                attempts: 0,
                error: InferenceError::Backend(format!("chunk {} has no frames", chunk.id)),
            };
        }
        let max_attempts = self.retries + 1;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.infer_frames(&chunk.frames) {
                Ok(reconstruction) => {
                    debug!(
                        "Chunk {} reconstructed on attempt {} ({} points)",
                        chunk.id,
                        attempt,
                        reconstruction.point_count()
                    );
                    return ChunkOutcome::Reconstructed {
                        reconstruction,
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    warn!(
                        "Inference failed for chunk {} (attempt {}/{}): {}",
                        chunk.id, attempt, max_attempts, err
                    );
                    last_error = Some(err);
                }
            }
        }

        ChunkOutcome::Failed {
            attempts: max_attempts,
            error: last_error
                .unwrap_or_else(|| InferenceError::Backend("no inference attempt made".into())),
        }
    }

    /// A single validated oracle call on an arbitrary frame set.
    pub fn infer_frames(&mut self, frames: &[Frame]) -> Result<LocalReconstruction, InferenceError> {
        let expected: Vec<FrameId> = frames.iter().map(|f| f.id).collect();
        let reconstruction = self.oracle.infer(frames)?;
        reconstruction.validate(&expected)?;
        Ok(reconstruction)
    }
}
