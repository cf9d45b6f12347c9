//! Geometric verification of loop candidates.
//!
//! The inference oracle reconstructs the two chunks' representative windows
//! together. Each chunk is then aligned into that joint reconstruction through
//! the shared frames, which yields the relative transform between the two
//! chunk frames.

use std::collections::HashSet;

use thiserror::Error;

use crate::alignment::{AlignmentFit, AlignmentOutcome, ChunkAligner};
use crate::frames::{ChunkId, Frame, FrameId};
use crate::geometry::Sim3;
use crate::inference::{ChunkProcessor, InferenceError, LocalReconstruction};
use crate::mapping::ChunkState;

use super::detector::LoopCandidate;

/// Why a loop candidate was not accepted. Rejection is the normal outcome
/// for most candidates.
#[derive(Debug, Clone, Error)]
pub enum VerificationRejection {
    #[error("chunk {0} has no reconstruction or representative frames")]
    MissingData(ChunkId),

    #[error("joint inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("chunk {0} could not be aligned into the joint reconstruction")]
    Underdetermined(ChunkId),

    #[error("residual {residual:.4} exceeds tolerance {tolerance:.4}")]
    ResidualTooLarge { residual: f64, tolerance: f64 },
}

/// An accepted loop constraint.
#[derive(Debug, Clone, Copy)]
pub struct VerifiedLoop {
    pub candidate: LoopCandidate,

    /// Maps the later chunk's frame into the earlier chunk's frame.
    pub measurement: Sim3,

    /// Larger of the two scale-normalized alignment residuals.
    pub residual: f64,
}

pub fn verify_candidate(
    candidate: &LoopCandidate,
    chunks: &[ChunkState],
    processor: &mut ChunkProcessor,
    aligner: &ChunkAligner,
    tolerance: f64,
) -> Result<VerifiedLoop, VerificationRejection> {
    let (earlier, earlier_recon) = chunk_data(chunks, candidate.earlier)?;
    let (later, later_recon) = chunk_data(chunks, candidate.later)?;

    let seen: HashSet<FrameId> = earlier.representative_frames.iter().map(|f| f.id).collect();
    let frames: Vec<Frame> = earlier
        .representative_frames
        .iter()
        .chain(
            later
                .representative_frames
                .iter()
                .filter(|f| !seen.contains(&f.id)),
        )
        .cloned()
        .collect();

    let joint = processor.infer_frames(&frames)?;

    let fit_earlier = align_into(aligner, &joint, earlier_recon, earlier.id)?;
    let fit_later = align_into(aligner, &joint, later_recon, later.id)?;

    let residual = fit_earlier
        .normalized_residual
        .max(fit_later.normalized_residual);
    if !(residual < tolerance) {
        return Err(VerificationRejection::ResidualTooLarge {
            residual,
            tolerance,
        });
    }

    let measurement = fit_earlier.transform.inverse().compose(&fit_later.transform);
    if !measurement.is_finite() {
        return Err(VerificationRejection::Underdetermined(later.id));
    }

    Ok(VerifiedLoop {
        candidate: *candidate,
        measurement,
        residual,
    })
}

fn chunk_data(
    chunks: &[ChunkState],
    id: ChunkId,
) -> Result<(&ChunkState, &LocalReconstruction), VerificationRejection> {
    let state = chunks
        .get(id.index())
        .ok_or(VerificationRejection::MissingData(id))?;
    let reconstruction = state
        .reconstruction
        .as_deref()
        .ok_or(VerificationRejection::MissingData(id))?;
    if state.representative_frames.is_empty() {
        return Err(VerificationRejection::MissingData(id));
    }
    Ok((state, reconstruction))
}

fn align_into(
    aligner: &ChunkAligner,
    joint: &LocalReconstruction,
    chunk: &LocalReconstruction,
    id: ChunkId,
) -> Result<AlignmentFit, VerificationRejection> {
    match aligner.align(joint, chunk) {
        AlignmentOutcome::Aligned(fit) => Ok(fit),
        AlignmentOutcome::Underdetermined { .. } => Err(VerificationRejection::Underdetermined(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::mapping::ChunkStatus;
    use crate::sim::{SyntheticOracle, SyntheticScene};

    /// Chunks 0 and 1 cover the start of an out-and-back walk and its return.
    fn revisit() -> (Arc<SyntheticScene>, Vec<ChunkState>) {
        let scene = Arc::new(SyntheticScene::out_and_back(46, 0.5));
        let chunks = vec![
            scene.reconstructed_state(0, 0..7, 3),
            scene.reconstructed_state(1, 39..46, 3),
        ];
        (scene, chunks)
    }

    fn candidate() -> LoopCandidate {
        LoopCandidate {
            earlier: ChunkId::new(0),
            later: ChunkId::new(1),
            similarity: 1.0,
        }
    }

    fn processor(scene: &Arc<SyntheticScene>) -> ChunkProcessor {
        ChunkProcessor::new(Box::new(SyntheticOracle::new(scene.clone())), 0)
    }

    fn center_of(state: &ChunkState, frame: u64) -> nalgebra::Vector3<f64> {
        state
            .reconstruction
            .as_ref()
            .unwrap()
            .frames
            .iter()
            .find(|f| f.frame_id == FrameId::new(frame))
            .unwrap()
            .camera_center()
    }

    #[test]
    fn test_revisit_is_verified() {
        let (scene, chunks) = revisit();
        let verified = verify_candidate(
            &candidate(),
            &chunks,
            &mut processor(&scene),
            &ChunkAligner::default(),
            0.05,
        )
        .unwrap();

        assert!(verified.residual > 0.0 && verified.residual < 0.05);
        // Frames 3 and 42 are taken from the same place.
        let mapped = verified
            .measurement
            .transform_point(&center_of(&chunks[1], 42));
        assert!((mapped - center_of(&chunks[0], 3)).norm() < 0.1);
    }

    #[test]
    fn test_residual_above_tolerance_rejected() {
        let (scene, chunks) = revisit();
        let result = verify_candidate(
            &candidate(),
            &chunks,
            &mut processor(&scene),
            &ChunkAligner::default(),
            1e-15,
        );
        assert!(matches!(
            result,
            Err(VerificationRejection::ResidualTooLarge { tolerance, .. }) if tolerance == 1e-15
        ));
    }

    #[test]
    fn test_failed_chunk_has_no_data() {
        let (scene, mut chunks) = revisit();
        chunks[1].status = ChunkStatus::Failed;
        chunks[1].reconstruction = None;
        let result = verify_candidate(
            &candidate(),
            &chunks,
            &mut processor(&scene),
            &ChunkAligner::default(),
            0.05,
        );
        assert!(matches!(
            result,
            Err(VerificationRejection::MissingData(id)) if id == ChunkId::new(1)
        ));
    }

    #[test]
    fn test_window_outside_chunk_is_underdetermined() {
        let (scene, mut chunks) = revisit();
        // The joint reconstruction then shares no frame with chunk 0.
        chunks[0].representative_frames = (20..23)
            .map(|i| Frame::placeholder(FrameId::new(i), 0))
            .collect();
        let result = verify_candidate(
            &candidate(),
            &chunks,
            &mut processor(&scene),
            &ChunkAligner::default(),
            0.05,
        );
        assert!(matches!(
            result,
            Err(VerificationRejection::Underdetermined(id)) if id == ChunkId::new(0)
        ));
    }

    #[test]
    fn test_joint_inference_failure_rejects() {
        let (scene, chunks) = revisit();
        let oracle = SyntheticOracle::new(scene.clone()).fail_when_starting_at(FrameId::new(2), 1);
        let mut processor = ChunkProcessor::new(Box::new(oracle), 0);
        let result = verify_candidate(
            &candidate(),
            &chunks,
            &mut processor,
            &ChunkAligner::default(),
            0.05,
        );
        assert!(matches!(result, Err(VerificationRejection::Inference(_))));
    }
}
