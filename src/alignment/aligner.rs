//! ChunkAligner: estimates the transform that maps a new chunk's local frame
//! into a reference chunk's local frame.
//!
//! Correspondences come from frames present in both reconstructions. Because
//! the oracle emits point maps in pixel order, the k-th point of a shared
//! frame in one chunk corresponds to the k-th point of that frame in the
//! other.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::frames::FrameId;
use crate::geometry::median;
use crate::inference::{FrameReconstruction, LocalReconstruction};

use super::solver::{robust_fit, AlignmentFit, AlignmentMode, Correspondence, MIN_CORRESPONDENCES};

/// Alignment parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub mode: AlignmentMode,

    /// A point is reliable when both of its confidences reach
    /// `confidence_ratio * min(median_ref, median_new)`.
    pub confidence_ratio: f64,

    /// Residuals above `outlier_factor * median residual` are rejected.
    pub outlier_factor: f64,

    /// Upper bound on correspondences fed to the solver. Larger sets are
    /// thinned with a fixed stride.
    pub max_correspondences: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            mode: AlignmentMode::Similarity,
            confidence_ratio: 0.1,
            outlier_factor: 3.0,
            max_correspondences: 20_000,
        }
    }
}

/// Outcome of aligning two reconstructions.
#[derive(Debug, Clone, Copy)]
pub enum AlignmentOutcome {
    Aligned(AlignmentFit),
    /// Too few reliable correspondences, or a degenerate configuration.
    Underdetermined { correspondences: usize },
}

impl AlignmentOutcome {
    pub fn fit(&self) -> Option<&AlignmentFit> {
        match self {
            AlignmentOutcome::Aligned(fit) => Some(fit),
            AlignmentOutcome::Underdetermined { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkAligner {
    config: AlignmentConfig,
}

impl ChunkAligner {
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Estimate `T` such that `T * p_source` lands in `reference`'s frame.
    pub fn align(
        &self,
        reference: &LocalReconstruction,
        source: &LocalReconstruction,
    ) -> AlignmentOutcome {
        let corrs = self.correspondences(reference, source);
        if corrs.len() < MIN_CORRESPONDENCES {
            debug!("Alignment underdetermined: {} correspondences", corrs.len());
            return AlignmentOutcome::Underdetermined {
                correspondences: corrs.len(),
            };
        }

        match robust_fit(&corrs, self.config.mode, self.config.outlier_factor) {
            Some(fit) => {
                debug!(
                    "Aligned with {}/{} inliers, scale {:.4}, normalized residual {:.5}",
                    fit.inliers, fit.correspondences, fit.transform.scale, fit.normalized_residual
                );
                AlignmentOutcome::Aligned(fit)
            }
            None => {
                debug!("Alignment degenerate over {} correspondences", corrs.len());
                AlignmentOutcome::Underdetermined {
                    correspondences: corrs.len(),
                }
            }
        }
    }

    /// Reliable index-wise correspondences over the frames both
    /// reconstructions contain.
    pub fn correspondences(
        &self,
        reference: &LocalReconstruction,
        source: &LocalReconstruction,
    ) -> Vec<Correspondence> {
        let by_id: HashMap<FrameId, &FrameReconstruction> =
            reference.frames.iter().map(|f| (f.frame_id, f)).collect();
        let shared: Vec<(&FrameReconstruction, &FrameReconstruction)> = source
            .frames
            .iter()
            .filter_map(|src| by_id.get(&src.frame_id).map(|reference| (*reference, src)))
            .collect();
        if shared.is_empty() {
            return Vec::new();
        }

        let median_ref = median_confidence(shared.iter().map(|(r, _)| *r));
        let median_src = median_confidence(shared.iter().map(|(_, s)| *s));
        let threshold = self.config.confidence_ratio * median_ref.min(median_src);

        let mut corrs = Vec::new();
        for (reference, source) in &shared {
            let ref_center = reference.camera_center();
            let src_center = source.camera_center();
            let n = reference.points.len().min(source.points.len());
            for k in 0..n {
                let c_ref = reference.confidences[k] as f64;
                let c_src = source.confidences[k] as f64;
                if c_ref <= 0.0 || c_src <= 0.0 || c_ref < threshold || c_src < threshold {
                    continue;
                }
                let target = reference.points[k];
                let point = source.points[k];
                corrs.push(Correspondence {
                    source: point,
                    target,
                    weight: c_ref.min(c_src),
                    source_depth: (point - src_center).norm(),
                    target_depth: (target - ref_center).norm(),
                });
            }
        }

        let limit = self.config.max_correspondences.max(MIN_CORRESPONDENCES);
        if corrs.len() > limit {
            let stride = corrs.len().div_ceil(limit);
            corrs = corrs.into_iter().step_by(stride).collect();
        }
        corrs
    }
}

fn median_confidence<'a>(frames: impl Iterator<Item = &'a FrameReconstruction>) -> f64 {
    let values: Vec<f64> = frames
        .flat_map(|f| f.confidences.iter().map(|&c| c as f64))
        .collect();
    median(&values).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Sim3;
    use nalgebra::{UnitQuaternion, Vector3};

    fn pattern() -> Vec<Vector3<f64>> {
        (0..12)
            .map(|i| {
                let x = (i % 4) as f64 * 0.4 - 0.6;
                let y = (i / 4) as f64 * 0.5 - 0.5;
                Vector3::new(x, y, 2.5 + 0.2 * x - 0.1 * y * y)
            })
            .collect()
    }

    /// Frames `ids` expressed in a chunk frame related to world by `world_from_local`.
    fn recon(ids: &[u64], world_from_local: &Sim3, confidences: &[f32]) -> LocalReconstruction {
        let local_from_world = world_from_local.inverse();
        LocalReconstruction::new(
            ids.iter()
                .map(|&id| {
                    let cam = Sim3::rigid(
                        UnitQuaternion::identity(),
                        Vector3::new(id as f64 * 0.3, 0.0, 0.0),
                    );
                    FrameReconstruction {
                        frame_id: FrameId::new(id),
                        pose: local_from_world.compose(&cam),
                        points: pattern()
                            .iter()
                            .map(|p| local_from_world.transform_point(&cam.transform_point(p)))
                            .collect(),
                        confidences: confidences.to_vec(),
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn test_align_overlapping_chunks() {
        let world_from_a = Sim3::identity();
        let world_from_b = Sim3::new(
            UnitQuaternion::from_euler_angles(0.0, 0.1, -0.2),
            Vector3::new(0.9, 0.1, -0.3),
            0.8,
        );
        let conf = vec![0.9; 12];
        let a = recon(&[0, 1, 2, 3], &world_from_a, &conf);
        let b = recon(&[2, 3, 4, 5], &world_from_b, &conf);

        let aligner = ChunkAligner::default();
        let fit = match aligner.align(&a, &b) {
            AlignmentOutcome::Aligned(fit) => fit,
            other => panic!("expected alignment, got {:?}", other),
        };
        let expected = world_from_a.inverse().compose(&world_from_b);
        assert!(fit.transform.distance(&expected) < 1e-8);
        assert_eq!(fit.correspondences, 24);
    }

    #[test]
    fn test_low_confidence_points_are_excluded() {
        let mut conf = vec![0.9f32; 12];
        conf[0] = 0.01;
        conf[5] = 0.0;
        let a = recon(&[0, 1], &Sim3::identity(), &conf);
        let b = recon(&[1, 2], &Sim3::from_scale(2.0), &conf);

        let corrs = ChunkAligner::default().correspondences(&a, &b);
        assert_eq!(corrs.len(), 10);
    }

    #[test]
    fn test_disjoint_chunks_are_underdetermined() {
        let conf = vec![0.9; 12];
        let a = recon(&[0, 1, 2], &Sim3::identity(), &conf);
        let b = recon(&[3, 4, 5], &Sim3::identity(), &conf);
        assert!(matches!(
            ChunkAligner::default().align(&a, &b),
            AlignmentOutcome::Underdetermined { correspondences: 0 }
        ));
    }

    #[test]
    fn test_correspondences_are_thinned() {
        let conf = vec![0.9; 12];
        let a = recon(&[0, 1, 2], &Sim3::identity(), &conf);
        let b = recon(&[0, 1, 2], &Sim3::identity(), &conf);
        let aligner = ChunkAligner::new(AlignmentConfig {
            max_correspondences: 10,
            ..AlignmentConfig::default()
        });
        assert!(aligner.correspondences(&a, &b).len() <= 10);
    }
}
