//! Local reconstructions produced by the inference oracle.

use nalgebra::Vector3;

use crate::frames::FrameId;
use crate::geometry::Sim3;

use super::oracle::InferenceError;

/// Geometry recovered for one frame, in the owning chunk's coordinate frame.
#[derive(Debug, Clone)]
pub struct FrameReconstruction {
    pub frame_id: FrameId,

    /// Camera-to-chunk pose. Scale may differ from 1 when the model's metric
    /// scale drifts between chunks.
    pub pose: Sim3,

    /// Point map in pixel order. The same frame reconstructed in two chunks
    /// yields index-wise correspondences.
    pub points: Vec<Vector3<f64>>,

    /// Per-point confidence in `[0, 1]`, same length as `points`.
    pub confidences: Vec<f32>,
}

impl FrameReconstruction {
    /// Camera centre in the chunk frame.
    pub fn camera_center(&self) -> Vector3<f64> {
        self.pose.translation
    }
}

/// A chunk's points and camera poses in that chunk's own coordinate frame.
#[derive(Debug, Clone, Default)]
pub struct LocalReconstruction {
    pub frames: Vec<FrameReconstruction>,
}

impl LocalReconstruction {
    pub fn new(frames: Vec<FrameReconstruction>) -> Self {
        Self { frames }
    }

    pub fn point_count(&self) -> usize {
        self.frames.iter().map(|f| f.points.len()).sum()
    }

    /// Check the oracle's output against the frames it was asked to process.
    pub fn validate(&self, expected: &[FrameId]) -> Result<(), InferenceError> {
        if self.frames.len() != expected.len() {
            return Err(InferenceError::FrameCountMismatch {
                expected: expected.len(),
                actual: self.frames.len(),
            });
        }
        for (index, (frame, &expected_id)) in self.frames.iter().zip(expected).enumerate() {
            if frame.frame_id != expected_id {
                return Err(InferenceError::FrameIdMismatch {
                    index,
                    expected: expected_id,
                    actual: frame.frame_id,
                });
            }
            if frame.points.len() != frame.confidences.len() {
                return Err(InferenceError::ConfidenceLengthMismatch {
                    frame: frame.frame_id,
                    points: frame.points.len(),
                    confidences: frame.confidences.len(),
                });
            }
            let finite = frame.pose.is_finite()
                && frame.points.iter().all(|p| p.iter().all(|v| v.is_finite()))
                && frame.confidences.iter().all(|c| c.is_finite());
            if !finite {
                return Err(InferenceError::NonFinite {
                    frame: frame.frame_id,
                });
            }
        }
        Ok(())
    }
}
