//! Per-chunk record kept in the chunk history.

use std::sync::Arc;

use crate::alignment::AlignmentFit;
use crate::frames::{ChunkId, Frame, FrameId};
use crate::geometry::Sim3;
use crate::inference::LocalReconstruction;

/// How a chunk entered the global frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// Aligned against its reference chunk, or the anchor.
    Aligned,
    /// Alignment was underdetermined; composed with identity.
    Unaligned,
    /// Inference failed; no reconstruction and no transform.
    Failed,
}

#[derive(Debug, Clone)]
pub struct ChunkState {
    pub id: ChunkId,
    pub frame_ids: Vec<FrameId>,

    /// Leading frames shared with the previous chunk.
    pub overlap: usize,

    pub partial: bool,
    pub status: ChunkStatus,

    /// `None` when inference failed.
    pub reconstruction: Option<Arc<LocalReconstruction>>,

    /// Chunk this one was aligned against. `None` for the anchor and for
    /// failed chunks.
    pub reference: Option<ChunkId>,

    /// Measured transform from this chunk's frame into the reference's frame.
    pub relative: Sim3,

    /// Global transform assigned during streaming.
    pub streaming_transform: Option<Sim3>,

    /// Global transform after pose graph correction.
    pub corrected_transform: Option<Sim3>,

    pub alignment: Option<AlignmentFit>,

    /// Frames around the middle of the chunk, kept for loop closure.
    pub representative_frames: Vec<Frame>,

    pub failure: Option<String>,
}

impl ChunkState {
    /// Current global transform: corrected if available, otherwise streaming.
    pub fn transform(&self) -> Option<Sim3> {
        self.corrected_transform.or(self.streaming_transform)
    }

    pub fn is_failed(&self) -> bool {
        self.status == ChunkStatus::Failed
    }

    /// Middle frame of the representative window.
    pub fn representative_frame(&self) -> Option<&Frame> {
        self.representative_frames
            .get(self.representative_frames.len() / 2)
    }
}
