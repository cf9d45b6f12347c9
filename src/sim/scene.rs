//! Deterministic synthetic scene.
//!
//! Every frame id maps to a camera-to-world pose. Each camera observes a fixed
//! pattern of points in its own coordinates, so the same frame always yields
//! the same world points. Reconstructions are expressed in the frame of the
//! first camera of the requested set, with a per-reconstruction scale and a
//! small rotation drift that grows with the frame's index in the set. This
//! gives chunks the kind of inconsistency real models produce.

use nalgebra::{UnitQuaternion, Vector3};

use crate::frames::{Frame, FrameId};
use crate::geometry::Sim3;
use crate::inference::{FrameReconstruction, InferenceError, LocalReconstruction};

const FRAME_INTERVAL_NS: u64 = 33_333_333;

#[derive(Debug, Clone)]
pub struct SyntheticScene {
    /// Camera-to-world pose per frame id.
    poses: Vec<Sim3>,

    /// Points in camera coordinates, shared by every frame.
    pattern: Vec<Vector3<f64>>,

    /// Rotation about the optical axis per frame index within a reconstruction.
    drift_per_frame: f64,

    /// Amplitude of the per-reconstruction scale variation.
    scale_jitter: f64,

    /// Width of the place-recognition kernel, in metres.
    embedding_sigma: f64,
}

impl SyntheticScene {
    pub fn new(poses: Vec<Sim3>) -> Self {
        Self {
            poses,
            pattern: default_pattern(),
            drift_per_frame: 0.002,
            scale_jitter: 0.1,
            embedding_sigma: 0.25,
        }
    }

    /// Camera moving along +x, `step` metres per frame.
    pub fn straight_line(frames: usize, step: f64) -> Self {
        Self::new(
            (0..frames)
                .map(|i| translation(i as f64 * step))
                .collect(),
        )
    }

    /// Camera moving along +x and back to its start, revisiting every place.
    pub fn out_and_back(frames: usize, step: f64) -> Self {
        let last = frames.saturating_sub(1);
        Self::new(
            (0..frames)
                .map(|i| translation(i.min(last - i) as f64 * step))
                .collect(),
        )
    }

    pub fn with_drift(mut self, radians_per_frame: f64) -> Self {
        self.drift_per_frame = radians_per_frame;
        self
    }

    pub fn with_scale_jitter(mut self, jitter: f64) -> Self {
        self.scale_jitter = jitter;
        self
    }

    pub fn with_embedding_sigma(mut self, sigma: f64) -> Self {
        self.embedding_sigma = sigma;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.poses.len()
    }

    pub fn points_per_frame(&self) -> usize {
        self.pattern.len()
    }

    pub fn pose(&self, id: FrameId) -> Option<Sim3> {
        usize::try_from(id.0).ok().and_then(|i| self.poses.get(i)).copied()
    }

    /// All frames of the sequence, in order.
    pub fn frames(&self) -> Vec<Frame> {
        (0..self.poses.len() as u64)
            .map(|i| Frame::placeholder(FrameId::new(i), i * FRAME_INTERVAL_NS))
            .collect()
    }

    /// World coordinates of the points observed by `id`.
    pub fn world_points(&self, id: FrameId) -> Option<Vec<Vector3<f64>>> {
        let pose = self.pose(id)?;
        Some(self.pattern.iter().map(|p| pose.transform_point(p)).collect())
    }

    /// Reconstruct `frames` in the frame of the first one.
    pub fn reconstruct(&self, frames: &[Frame]) -> Result<LocalReconstruction, InferenceError> {
        let first = frames
            .first()
            .ok_or_else(|| InferenceError::Backend("empty frame set".into()))?;
        let base = self.pose(first.id).ok_or_else(|| unknown(first.id))?;
        let gauge = base.compose(&Sim3::from_scale(self.gauge_scale(first.id)));
        let local_from_world = gauge.inverse();

        let mut out = Vec::with_capacity(frames.len());
        for (k, frame) in frames.iter().enumerate() {
            let camera = self.pose(frame.id).ok_or_else(|| unknown(frame.id))?;
            let drift = Sim3::rigid(
                UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.drift_per_frame * k as f64),
                Vector3::zeros(),
            );
            let local_from_camera = drift.compose(&local_from_world).compose(&camera);

            out.push(FrameReconstruction {
                frame_id: frame.id,
                pose: local_from_camera,
                points: self
                    .pattern
                    .iter()
                    .map(|p| local_from_camera.transform_point(p))
                    .collect(),
                confidences: (0..self.pattern.len()).map(confidence).collect(),
            });
        }
        Ok(LocalReconstruction::new(out))
    }

    /// Gaussian place descriptor over the scene's camera positions.
    pub fn embed(&self, id: FrameId) -> Option<Vec<f32>> {
        let position = self.pose(id)?.translation;
        let denom = 2.0 * self.embedding_sigma * self.embedding_sigma;
        Some(
            self.poses
                .iter()
                .map(|anchor| {
                    let d2 = (position - anchor.translation).norm_squared();
                    (-d2 / denom).exp() as f32
                })
                .collect(),
        )
    }

    /// Chunk history entry for `frames`, reconstructed by this scene.
    #[cfg(test)]
    pub(crate) fn reconstructed_state(
        &self,
        id: usize,
        frames: std::ops::Range<u64>,
        window: usize,
    ) -> crate::mapping::ChunkState {
        use crate::frames::{Chunk, ChunkId};
        use crate::mapping::{ChunkState, ChunkStatus};

        let chunk = Chunk {
            id: ChunkId::new(id),
            frames: frames
                .map(|i| Frame::placeholder(FrameId::new(i), i * FRAME_INTERVAL_NS))
                .collect(),
            overlap: 0,
            partial: false,
        };
        let reconstruction = self
            .reconstruct(&chunk.frames)
            .expect("frames belong to the scene");
        ChunkState {
            id: chunk.id,
            frame_ids: chunk.frame_ids(),
            overlap: 0,
            partial: false,
            status: ChunkStatus::Aligned,
            reconstruction: Some(std::sync::Arc::new(reconstruction)),
            reference: None,
            relative: Sim3::identity(),
            streaming_transform: Some(Sim3::identity()),
            corrected_transform: None,
            alignment: None,
            representative_frames: chunk.representative_window(window),
            failure: None,
        }
    }

    fn gauge_scale(&self, first: FrameId) -> f64 {
        1.0 + self.scale_jitter * ((first.0 % 7) as f64 / 7.0 - 0.5)
    }
}

fn translation(x: f64) -> Sim3 {
    Sim3::rigid(UnitQuaternion::identity(), Vector3::new(x, 0.0, 0.0))
}

fn unknown(id: FrameId) -> InferenceError {
    InferenceError::Backend(format!("frame {} is not part of the scene", id))
}

/// 8x6 grid on a gently curved surface 2 to 3 metres in front of the camera.
fn default_pattern() -> Vec<Vector3<f64>> {
    let mut pattern = Vec::with_capacity(48);
    for row in 0..6 {
        for col in 0..8 {
            let x = col as f64 * 0.3 - 1.05;
            let y = row as f64 * 0.3 - 0.75;
            let z = 2.5 + 0.2 * x * y + 0.15 * (x * 2.0).sin();
            pattern.push(Vector3::new(x, y, z));
        }
    }
    pattern
}

/// Mostly confident points with a sparse set of unreliable ones.
fn confidence(index: usize) -> f32 {
    if index % 13 == 0 {
        0.02
    } else {
        0.6 + 0.04 * ((index * 7) % 10) as f32
    }
}
