//! Global point cloud: per-chunk segments of globally mapped points.
//!
//! A chunk's segment is a pure function of its reconstruction, its transform
//! and the cloud settings. Re-fusing the same history with the same
//! transforms reproduces the same cloud.

use std::collections::HashSet;
use std::sync::Arc;

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::frames::{ChunkId, FrameId};

use super::chunk::ChunkState;

/// Point filtering and sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Fraction of filtered points kept per chunk, in `(0, 1]`.
    pub sample_ratio: f64,

    /// Points below this confidence are dropped, in `(0, 1)`.
    pub confidence_threshold: f32,

    /// Skip frames the reference chunk already contributed.
    pub dedupe_overlap: bool,

    /// Base seed of the per-chunk sampler.
    pub seed: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            sample_ratio: 0.5,
            confidence_threshold: 0.1,
            dedupe_overlap: true,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudPoint {
    pub position: Vector3<f64>,
    pub confidence: f32,
    pub chunk: ChunkId,
}

/// Points contributed by one chunk.
#[derive(Debug, Clone)]
pub struct CloudSegment {
    pub chunk: ChunkId,
    pub points: Arc<[CloudPoint]>,
}

/// Ordered per-chunk segments. Cloning shares the point storage.
#[derive(Debug, Clone, Default)]
pub struct GlobalCloud {
    segments: Vec<CloudSegment>,
}

impl GlobalCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: CloudSegment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[CloudSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.points.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn points(&self) -> impl Iterator<Item = &CloudPoint> {
        self.segments.iter().flat_map(|s| s.points.iter())
    }

    pub fn points_for(&self, chunk: ChunkId) -> usize {
        self.segments
            .iter()
            .filter(|s| s.chunk == chunk)
            .map(|s| s.points.len())
            .sum()
    }

    /// Re-map every non-failed chunk through its current transform.
    pub fn fuse(chunks: &[ChunkState], config: &CloudConfig) -> Self {
        let mut cloud = Self::new();
        for state in chunks {
            if let Some(segment) = map_chunk(state, chunks, config) {
                cloud.push(segment);
            }
        }
        cloud
    }
}

/// Frames of `state` whose points the reference chunk already contributed.
fn covered_frames(state: &ChunkState, chunks: &[ChunkState]) -> HashSet<FrameId> {
    state
        .reference
        .and_then(|r| chunks.get(r.index()))
        .map(|reference| {
            let theirs: HashSet<FrameId> = reference.frame_ids.iter().copied().collect();
            state
                .frame_ids
                .iter()
                .copied()
                .filter(|id| theirs.contains(id))
                .collect()
        })
        .unwrap_or_default()
}

/// Globally mapped, filtered and sampled points of one chunk.
///
/// Returns `None` for chunks without reconstruction or transform.
pub fn map_chunk(
    state: &ChunkState,
    chunks: &[ChunkState],
    config: &CloudConfig,
) -> Option<CloudSegment> {
    let reconstruction = state.reconstruction.as_ref()?;
    let transform = state.transform()?;

    let skip = if config.dedupe_overlap {
        covered_frames(state, chunks)
    } else {
        HashSet::new()
    };

    let candidates: Vec<(usize, usize)> = reconstruction
        .frames
        .iter()
        .enumerate()
        .filter(|(_, f)| !skip.contains(&f.frame_id))
        .flat_map(|(fi, f)| {
            f.confidences
                .iter()
                .enumerate()
                .filter(|(_, &c)| c >= config.confidence_threshold)
                .map(move |(pi, _)| (fi, pi))
        })
        .collect();

    let selected = sample_indices(candidates.len(), config, state.id);
    let points: Vec<CloudPoint> = selected
        .into_iter()
        .map(|k| {
            let (fi, pi) = candidates[k];
            let frame = &reconstruction.frames[fi];
            CloudPoint {
                position: transform.transform_point(&frame.points[pi]),
                confidence: frame.confidences[pi],
                chunk: state.id,
            }
        })
        .collect();

    Some(CloudSegment {
        chunk: state.id,
        points: points.into(),
    })
}

/// Sorted subset of `0..n` of size `ceil(n * ratio)`, seeded per chunk.
fn sample_indices(n: usize, config: &CloudConfig, chunk: ChunkId) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let ratio = config.sample_ratio.clamp(0.0, 1.0);
    let keep = ((n as f64) * ratio).ceil() as usize;
    if keep >= n {
        return (0..n).collect();
    }
    let seed = config.seed ^ (chunk.index() as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices = rand::seq::index::sample(&mut rng, n, keep).into_vec();
    indices.sort_unstable();
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Sim3;
    use crate::inference::{FrameReconstruction, LocalReconstruction};
    use crate::mapping::ChunkStatus;
    use nalgebra::UnitQuaternion;

    fn state(id: usize, frames: &[u64], reference: Option<usize>, transform: Sim3) -> ChunkState {
        let reconstruction = LocalReconstruction::new(
            frames
                .iter()
                .map(|&f| FrameReconstruction {
                    frame_id: FrameId::new(f),
                    pose: Sim3::identity(),
                    points: (0..10)
                        .map(|i| Vector3::new(f as f64, i as f64, 1.0))
                        .collect(),
                    confidences: (0..10).map(|i| if i == 0 { 0.05 } else { 0.8 }).collect(),
                })
                .collect(),
        );
        ChunkState {
            id: ChunkId::new(id),
            frame_ids: frames.iter().map(|&f| FrameId::new(f)).collect(),
            overlap: 0,
            partial: false,
            status: ChunkStatus::Aligned,
            reconstruction: Some(Arc::new(reconstruction)),
            reference: reference.map(ChunkId::new),
            relative: Sim3::identity(),
            streaming_transform: Some(transform),
            corrected_transform: None,
            alignment: None,
            representative_frames: Vec::new(),
            failure: None,
        }
    }

    fn full() -> CloudConfig {
        CloudConfig {
            sample_ratio: 1.0,
            ..CloudConfig::default()
        }
    }

    #[test]
    fn test_confidence_filter_and_transform() {
        let shift = Sim3::rigid(UnitQuaternion::identity(), Vector3::new(0.0, 0.0, 5.0));
        let chunks = vec![state(0, &[0, 1], None, shift)];
        let segment = map_chunk(&chunks[0], &chunks, &full()).unwrap();

        assert_eq!(segment.points.len(), 18);
        assert!(segment.points.iter().all(|p| p.confidence >= 0.1));
        assert!(segment.points.iter().all(|p| (p.position.z - 6.0).abs() < 1e-12));
    }

    #[test]
    fn test_overlap_frames_are_deduplicated() {
        let chunks = vec![
            state(0, &[0, 1, 2], None, Sim3::identity()),
            state(1, &[2, 3, 4], Some(0), Sim3::identity()),
        ];
        assert_eq!(map_chunk(&chunks[1], &chunks, &full()).unwrap().points.len(), 18);

        let keep_all = CloudConfig {
            dedupe_overlap: false,
            ..full()
        };
        assert_eq!(map_chunk(&chunks[1], &chunks, &keep_all).unwrap().points.len(), 27);
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let config = CloudConfig {
            sample_ratio: 0.3,
            ..CloudConfig::default()
        };
        let chunks = vec![state(0, &[0, 1, 2, 3], None, Sim3::identity())];
        let a = GlobalCloud::fuse(&chunks, &config);
        let b = GlobalCloud::fuse(&chunks, &config);

        // ceil(36 * 0.3) = 11
        assert_eq!(a.len(), 11);
        let pa: Vec<_> = a.points().copied().collect();
        let pb: Vec<_> = b.points().copied().collect();
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_failed_chunks_contribute_nothing() {
        let mut failed = state(1, &[3, 4], Some(0), Sim3::identity());
        failed.status = ChunkStatus::Failed;
        failed.reconstruction = None;
        failed.streaming_transform = None;
        let chunks = vec![state(0, &[0, 1], None, Sim3::identity()), failed];

        let cloud = GlobalCloud::fuse(&chunks, &full());
        assert_eq!(cloud.points_for(ChunkId::new(1)), 0);
        assert_eq!(cloud.points_for(ChunkId::new(0)), 18);
        assert_eq!(cloud.segments().len(), 1);
    }
}
