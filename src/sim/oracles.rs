//! Oracle implementations backed by a [`SyntheticScene`].

use std::sync::Arc;

use crate::frames::{Frame, FrameId};
use crate::inference::{
    EmbeddingError, EmbeddingOracle, InferenceError, InferenceOracle, LocalReconstruction,
};

use super::scene::SyntheticScene;

#[derive(Debug, Clone)]
struct ScheduledFailure {
    first_frame: FrameId,
    remaining: usize,
}

/// Inference oracle with injectable failures.
#[derive(Debug, Clone)]
pub struct SyntheticOracle {
    scene: Arc<SyntheticScene>,
    failures: Vec<ScheduledFailure>,
    calls: usize,
}

impl SyntheticOracle {
    pub fn new(scene: Arc<SyntheticScene>) -> Self {
        Self {
            scene,
            failures: Vec::new(),
            calls: 0,
        }
    }

    /// Fail the next `times` calls whose first frame is `first_frame`.
    pub fn fail_when_starting_at(mut self, first_frame: FrameId, times: usize) -> Self {
        self.failures.push(ScheduledFailure {
            first_frame,
            remaining: times,
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl InferenceOracle for SyntheticOracle {
    fn infer(&mut self, frames: &[Frame]) -> Result<LocalReconstruction, InferenceError> {
        self.calls += 1;
        if let Some(first) = frames.first() {
            if let Some(failure) = self
                .failures
                .iter_mut()
                .find(|f| f.first_frame == first.id && f.remaining > 0)
            {
                failure.remaining -= 1;
                return Err(InferenceError::Backend(format!(
                    "injected failure for frames starting at {}",
                    first.id
                )));
            }
        }
        self.scene.reconstruct(frames)
    }
}

/// Place-recognition oracle over the scene's camera positions.
#[derive(Debug, Clone)]
pub struct SyntheticEmbedder {
    scene: Arc<SyntheticScene>,
}

impl SyntheticEmbedder {
    pub fn new(scene: Arc<SyntheticScene>) -> Self {
        Self { scene }
    }
}

impl EmbeddingOracle for SyntheticEmbedder {
    fn embed(&mut self, frame: &Frame) -> Result<Vec<f32>, EmbeddingError> {
        self.scene
            .embed(frame.id)
            .ok_or_else(|| EmbeddingError::Backend(format!("frame {} is not part of the scene", frame.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_failures_are_consumed() {
        let scene = Arc::new(SyntheticScene::straight_line(6, 0.1));
        let frames = scene.frames();
        let mut oracle = SyntheticOracle::new(scene).fail_when_starting_at(FrameId::new(2), 2);

        assert!(oracle.infer(&frames[0..3]).is_ok());
        assert!(oracle.infer(&frames[2..5]).is_err());
        assert!(oracle.infer(&frames[2..5]).is_err());
        assert!(oracle.infer(&frames[2..5]).is_ok());
        assert_eq!(oracle.calls(), 4);
    }
}
