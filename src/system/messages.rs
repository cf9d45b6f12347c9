//! Events published to consumers of the reconstruction.

use std::sync::Arc;

use crate::frames::ChunkId;
use crate::geometry::Sim3;
use crate::mapping::{ChunkStatus, CloudPoint, GlobalCloud};

use super::context::{Phase, SessionStatus};

/// Emitted once per chunk, in chunk id order, as soon as the chunk has been
/// integrated into the global frame.
#[derive(Debug, Clone)]
pub struct ChunkReady {
    pub chunk_id: ChunkId,
    pub status: ChunkStatus,

    /// Newly added global points. Empty for failed chunks.
    pub points: Arc<[CloudPoint]>,

    /// Global transform of the chunk; `None` when it failed.
    pub global_transform: Option<Sim3>,

    /// Cloud version after this chunk was added.
    pub transform_version: u64,
}

impl ChunkReady {
    /// True when the chunk was aligned against its reference (or is the anchor).
    pub fn is_aligned(&self) -> bool {
        self.status == ChunkStatus::Aligned
    }
}

/// Read-only view of the global cloud at a given version.
#[derive(Debug, Clone, Default)]
pub struct CloudSnapshot {
    pub version: u64,
    pub cloud: GlobalCloud,
    pub statuses: Vec<ChunkStatus>,
    pub phase: Phase,
    pub session: SessionStatus,
}
