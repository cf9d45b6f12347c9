//! GlobalAccumulator: owns the chunk history, the pose graph and the global
//! cloud during streaming.
//!
//! Chunks are integrated strictly in id order. Each non-failed chunk's global
//! transform is `global_ref ∘ relative`, where the reference is the last
//! non-failed chunk before it. The first non-failed chunk is the anchor and
//! sits at identity.

use std::sync::Arc;

use tracing::{info, warn};

use crate::alignment::AlignmentOutcome;
use crate::frames::{Chunk, ChunkId, Frame};
use crate::geometry::Sim3;
use crate::inference::{InferenceError, LocalReconstruction};
use crate::optimizer::{EdgeKind, PoseGraph, PoseGraphEdge};
use crate::system::messages::ChunkReady;

use super::chunk::{ChunkState, ChunkStatus};
use super::cloud::{map_chunk, CloudConfig, GlobalCloud};

/// Weights given to sequential edges.
#[derive(Debug, Clone, Copy)]
pub struct SequentialWeights {
    pub aligned: f64,
    pub unaligned: f64,
}

pub struct GlobalAccumulator {
    chunks: Vec<ChunkState>,
    graph: PoseGraph,
    cloud: GlobalCloud,
    cloud_config: CloudConfig,
    weights: SequentialWeights,
    anchor: Option<ChunkId>,
    version: u64,
}

impl GlobalAccumulator {
    pub fn new(cloud_config: CloudConfig, weights: SequentialWeights) -> Self {
        Self {
            chunks: Vec::new(),
            graph: PoseGraph::new(),
            cloud: GlobalCloud::new(),
            cloud_config,
            weights,
            anchor: None,
            version: 0,
        }
    }

    /// The chunk the next chunk will be aligned against.
    pub fn reference(&self) -> Option<&ChunkState> {
        self.chunks.iter().rev().find(|c| !c.is_failed())
    }

    /// Integrate a reconstructed chunk.
    ///
    /// `alignment` is the outcome of aligning `reconstruction` against
    /// [`GlobalAccumulator::reference`]; it is ignored for the anchor.
    pub fn integrate(
        &mut self,
        chunk: &Chunk,
        reconstruction: LocalReconstruction,
        alignment: Option<AlignmentOutcome>,
        representative_frames: Vec<Frame>,
    ) -> ChunkReady {
        let id = self.graph.add_node();
        debug_assert_eq!(id, chunk.id);

        let reference = self.reference().and_then(|r| Some((r.id, r.transform()?)));

        let (status, reference_id, relative, global, fit) = match reference {
            None => {
                info!("Chunk {} is the anchor", id);
                self.anchor = Some(id);
                (ChunkStatus::Aligned, None, Sim3::identity(), Sim3::identity(), None)
            }
            Some((ref_id, ref_global)) => {
                let outcome = alignment.unwrap_or(AlignmentOutcome::Underdetermined {
                    correspondences: 0,
                });
                let (status, relative, weight, fit) = match outcome {
                    AlignmentOutcome::Aligned(fit) => (
                        ChunkStatus::Aligned,
                        fit.transform,
                        self.weights.aligned,
                        Some(fit),
                    ),
                    AlignmentOutcome::Underdetermined { correspondences } => {
                        warn!(
                            "Chunk {} alignment underdetermined ({} correspondences); using identity",
                            id, correspondences
                        );
                        (ChunkStatus::Unaligned, Sim3::identity(), self.weights.unaligned, None)
                    }
                };
                self.graph.add_edge(PoseGraphEdge {
                    from: ref_id,
                    to: id,
                    measurement: relative,
                    weight,
                    kind: EdgeKind::Sequential,
                });
                (status, Some(ref_id), relative, ref_global.compose(&relative), fit)
            }
        };

        self.chunks.push(ChunkState {
            id,
            frame_ids: chunk.frame_ids(),
            overlap: chunk.overlap,
            partial: chunk.partial,
            status,
            reconstruction: Some(Arc::new(reconstruction)),
            reference: reference_id,
            relative,
            streaming_transform: Some(global),
            corrected_transform: None,
            alignment: fit,
            representative_frames,
            failure: None,
        });

        let points = self
            .chunks
            .last()
            .and_then(|state| map_chunk(state, &self.chunks, &self.cloud_config))
            .map(|segment| {
                let points = segment.points.clone();
                self.cloud.push(segment);
                points
            })
            .unwrap_or_else(|| Arc::from(Vec::new()));
        self.version += 1;

        info!(
            "Chunk {} integrated ({:?}): {} new points, {} total",
            id,
            status,
            points.len(),
            self.cloud.len()
        );

        ChunkReady {
            chunk_id: id,
            status,
            points,
            global_transform: Some(global),
            transform_version: self.version,
        }
    }

    /// Record a chunk whose inference failed. Later chunks align against the
    /// last non-failed chunk instead.
    pub fn integrate_failed(&mut self, chunk: &Chunk, error: &InferenceError) -> ChunkReady {
        let id = self.graph.add_node();
        debug_assert_eq!(id, chunk.id);
        warn!("Chunk {} failed and leaves a gap: {}", id, error);

        self.chunks.push(ChunkState {
            id,
            frame_ids: chunk.frame_ids(),
            overlap: chunk.overlap,
            partial: chunk.partial,
            status: ChunkStatus::Failed,
            reconstruction: None,
            reference: None,
            relative: Sim3::identity(),
            streaming_transform: None,
            corrected_transform: None,
            alignment: None,
            representative_frames: Vec::new(),
            failure: Some(error.to_string()),
        });
        self.version += 1;

        ChunkReady {
            chunk_id: id,
            status: ChunkStatus::Failed,
            points: Arc::from(Vec::new()),
            global_transform: None,
            transform_version: self.version,
        }
    }

    /// Install finalize-time transforms and re-fuse the cloud.
    ///
    /// `transforms` is index-aligned with the chunk history; entries for
    /// failed chunks are ignored.
    pub fn apply_corrections(&mut self, transforms: &[Option<Sim3>]) {
        for (state, transform) in self.chunks.iter_mut().zip(transforms) {
            if !state.is_failed() {
                state.corrected_transform = *transform;
            }
        }
        self.cloud = GlobalCloud::fuse(&self.chunks, &self.cloud_config);
        self.version += 1;
    }

    /// Re-fuse the cloud from the chunk history and current transforms.
    pub fn refuse(&self) -> GlobalCloud {
        GlobalCloud::fuse(&self.chunks, &self.cloud_config)
    }

    pub fn chunks(&self) -> &[ChunkState] {
        &self.chunks
    }

    pub fn graph(&self) -> &PoseGraph {
        &self.graph
    }

    pub fn cloud(&self) -> &GlobalCloud {
        &self.cloud
    }

    pub fn anchor(&self) -> Option<ChunkId> {
        self.anchor
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Streaming-time transforms, index-aligned with the chunk history.
    pub fn streaming_transforms(&self) -> Vec<Option<Sim3>> {
        self.chunks.iter().map(|c| c.streaming_transform).collect()
    }

    pub fn statuses(&self) -> Vec<ChunkStatus> {
        self.chunks.iter().map(|c| c.status).collect()
    }

    /// Ids of failed chunks.
    pub fn gaps(&self) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|c| c.is_failed())
            .map(|c| c.id)
            .collect()
    }
}
