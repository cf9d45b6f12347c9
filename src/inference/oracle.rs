//! Capability interfaces for the external models.
//!
//! The reconstruction core never links a model directly. The depth/pose model
//! and the place-recognition model are injected as trait objects so that the
//! pipeline can run against a real backend or a deterministic fake.

use thiserror::Error;

use crate::frames::{Frame, FrameId};

use super::reconstruction::LocalReconstruction;

/// Errors surfaced by the inference oracle or by validation of its output.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("inference backend failed: {0}")]
    Backend(String),

    #[error("oracle returned {actual} frame results for {expected} input frames")]
    FrameCountMismatch { expected: usize, actual: usize },

    #[error("oracle result {index} is for frame {actual}, expected {expected}")]
    FrameIdMismatch {
        index: usize,
        expected: FrameId,
        actual: FrameId,
    },

    #[error("frame {frame}: {points} points but {confidences} confidences")]
    ConfidenceLengthMismatch {
        frame: FrameId,
        points: usize,
        confidences: usize,
    },

    #[error("frame {frame}: non-finite pose, point or confidence")]
    NonFinite { frame: FrameId },
}

/// Errors surfaced by the embedding oracle.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("embedding backend failed: {0}")]
    Backend(String),

    #[error("embedding for frame {0} is empty")]
    Empty(FrameId),
}

/// Per-chunk depth and pose model: `frames -> (points, confidences, local poses)`.
///
/// Implementations may fail transiently; the caller decides on retries.
pub trait InferenceOracle: Send {
    fn infer(&mut self, frames: &[Frame]) -> Result<LocalReconstruction, InferenceError>;
}

/// Place-recognition model producing one global descriptor per frame.
pub trait EmbeddingOracle: Send {
    fn embed(&mut self, frame: &Frame) -> Result<Vec<f32>, EmbeddingError>;
}
