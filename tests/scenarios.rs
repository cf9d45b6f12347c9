//! End-to-end runs of the processing context over synthetic sequences.

use std::sync::Arc;

use streaming_recon::config::{ConfigError, ReconstructionConfig};
use streaming_recon::frames::{ChunkId, FrameId};
use streaming_recon::geometry::Sim3;
use streaming_recon::inference::EmbeddingOracle;
use streaming_recon::mapping::{ChunkStatus, GlobalCloud};
use streaming_recon::optimizer::EdgeKind;
use streaming_recon::sim::{SyntheticEmbedder, SyntheticOracle, SyntheticScene};
use streaming_recon::system::{
    ChunkReady, FinalReconstruction, Phase, Quality, ReconstructionContext, ReconstructionError,
};

fn config(chunk_size: usize, overlap: usize) -> ReconstructionConfig {
    ReconstructionConfig {
        chunk_size,
        overlap,
        ..ReconstructionConfig::default()
    }
}

fn context(
    config: ReconstructionConfig,
    scene: &Arc<SyntheticScene>,
    oracle: SyntheticOracle,
) -> ReconstructionContext {
    let embedder: Option<Box<dyn EmbeddingOracle>> = if config.loop_closure.enabled {
        Some(Box::new(SyntheticEmbedder::new(scene.clone())))
    } else {
        None
    };
    ReconstructionContext::new(config, Box::new(oracle), embedder).unwrap()
}

/// Push every frame of the scene and flush; returns all chunk events.
fn stream(context: &mut ReconstructionContext, scene: &SyntheticScene) -> Vec<ChunkReady> {
    let mut events = Vec::new();
    for frame in scene.frames() {
        if let Some(event) = context.push_frame(frame).unwrap() {
            events.push(event);
        }
    }
    events.extend(context.finish_stream());
    events
}

fn span(context: &ReconstructionContext, chunk: usize) -> (u64, u64) {
    let ids = &context.chunks()[chunk].frame_ids;
    (ids[0].0, ids[ids.len() - 1].0 + 1)
}

fn assert_same_transforms(a: &[Option<Sim3>], b: &[Option<Sim3>]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        match (x, y) {
            (Some(x), Some(y)) => assert!(x.distance(y) < 1e-12),
            (None, None) => {}
            _ => panic!("transform presence differs: {:?} vs {:?}", x, y),
        }
    }
}

fn assert_composition_law(context: &ReconstructionContext) {
    let chunks = context.chunks();
    for state in chunks {
        let Some(reference) = state.reference else {
            continue;
        };
        let expected = chunks[reference.index()]
            .streaming_transform
            .unwrap()
            .compose(&state.relative);
        assert!(state.streaming_transform.unwrap().distance(&expected) < 1e-12);
    }
}

#[test]
fn test_straight_line_without_revisit() {
    let scene = Arc::new(SyntheticScene::straight_line(100, 0.1));
    let mut ctx = context(config(40, 10), &scene, SyntheticOracle::new(scene.clone()));

    let events = stream(&mut ctx, &scene);
    assert_eq!(events.len(), 3);
    assert_eq!(span(&ctx, 0), (0, 40));
    assert_eq!(span(&ctx, 1), (30, 80));
    assert_eq!(span(&ctx, 2), (70, 100));
    assert!(!ctx.chunks()[1].partial);
    assert!(ctx.chunks()[2].partial);
    assert!(events.iter().all(|e| e.status == ChunkStatus::Aligned));
    assert_composition_law(&ctx);

    let streaming: Vec<Option<Sim3>> = ctx.chunks().iter().map(|c| c.streaming_transform).collect();
    let result = ctx.finalize();

    assert!(result.loop_edges.is_empty());
    assert!(result.optimization.is_none());
    assert_eq!(result.quality, Quality::Nominal);
    assert_same_transforms(&result.transforms, &streaming);

    let refused = GlobalCloud::fuse(ctx.chunks(), &ctx.config().cloud);
    assert_eq!(result.cloud.len(), refused.len());
    let streamed: usize = events.iter().map(|e| e.points.len()).sum();
    assert_eq!(result.cloud.len(), streamed);
}

#[test]
fn test_revisit_adds_one_loop_edge() {
    let scene = Arc::new(SyntheticScene::out_and_back(46, 0.5));
    let mut ctx = context(config(7, 3), &scene, SyntheticOracle::new(scene.clone()));

    stream(&mut ctx, &scene);
    assert_eq!(ctx.chunks().len(), 7);
    let streaming: Vec<Option<Sim3>> = ctx.chunks().iter().map(|c| c.streaming_transform).collect();

    let result = ctx.finalize();
    assert_eq!(result.loop_edges.len(), 1);
    let edge = result.loop_edges[0];
    assert_eq!(edge.kind, EdgeKind::Loop);
    assert_eq!((edge.from, edge.to), (ChunkId::new(0), ChunkId::new(6)));
    assert_eq!(result.stats.loop_closure.loops_verified, 1);
    assert_eq!(result.stats.loop_edges_added, 1);

    let report = result.optimization.unwrap();
    assert!(report.final_cost <= report.initial_cost);
    assert_eq!(result.quality, Quality::Nominal);

    // Anchor stays put; the loop pulls at least one other chunk.
    assert!(result.transforms[0].unwrap().distance(&Sim3::identity()) < 1e-9);
    let moved = result
        .transforms
        .iter()
        .zip(&streaming)
        .skip(1)
        .any(|(after, before)| after.unwrap().distance(&before.unwrap()) > 1e-9);
    assert!(moved);

    // The streaming graph is left untouched.
    assert_eq!(ctx.graph().loop_edge_count(), 0);
}

#[test]
fn test_loose_loop_rejected_by_tolerance() {
    let scene = Arc::new(SyntheticScene::out_and_back(46, 0.5));
    let mut cfg = config(7, 3);
    cfg.loop_closure.verification_tolerance = 1e-15;
    let mut ctx = context(cfg, &scene, SyntheticOracle::new(scene.clone()));
    stream(&mut ctx, &scene);
    let streaming: Vec<Option<Sim3>> = ctx.chunks().iter().map(|c| c.streaming_transform).collect();

    let result = ctx.finalize();
    assert_eq!(result.stats.loop_closure.candidates_detected, 1);
    assert_eq!(result.stats.loop_closure.candidates_rejected, 1);
    assert_eq!(result.stats.loop_closure.loops_verified, 0);
    assert!(result.loop_edges.is_empty());
    assert!(result.optimization.is_none());
    assert_eq!(result.quality, Quality::Nominal);
    assert_same_transforms(&result.transforms, &streaming);
}

#[test]
fn test_iteration_cap_degrades_quality() {
    let scene = Arc::new(SyntheticScene::out_and_back(46, 0.5));
    let mut cfg = config(7, 3);
    cfg.pose_graph.max_iterations = 1;
    let mut ctx = context(cfg, &scene, SyntheticOracle::new(scene.clone()));
    stream(&mut ctx, &scene);
    let streaming: Vec<Option<Sim3>> = ctx.chunks().iter().map(|c| c.streaming_transform).collect();

    let result = ctx.finalize();
    assert_eq!(result.loop_edges.len(), 1);
    assert_eq!(result.quality, Quality::Degraded);

    let report = result.optimization.unwrap();
    assert_eq!(report.iterations, 1);
    assert!(!report.converged);
    assert!(report.final_cost < report.initial_cost);

    // The last estimate is returned and installed, not the streaming one.
    let moved = result
        .transforms
        .iter()
        .zip(&streaming)
        .any(|(after, before)| after.unwrap().distance(&before.unwrap()) > 1e-9);
    assert!(moved);
    for (state, transform) in ctx.chunks().iter().zip(&result.transforms) {
        assert_eq!(state.transform(), *transform);
    }
}

#[test]
fn test_zero_overlap_leaves_chunks_unaligned() {
    let scene = Arc::new(SyntheticScene::straight_line(30, 0.1));
    let mut cfg = config(10, 0);
    cfg.loop_closure.enabled = false;
    let mut ctx = context(cfg, &scene, SyntheticOracle::new(scene.clone()));

    let events = stream(&mut ctx, &scene);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].status, ChunkStatus::Aligned);
    assert!(events[1..].iter().all(|e| e.status == ChunkStatus::Unaligned));
    assert_eq!(ctx.stats().chunks_unaligned, 2);

    for edge in ctx.graph().edges() {
        assert_eq!(edge.kind, EdgeKind::Sequential);
        assert!(edge.measurement.distance(&Sim3::identity()) < 1e-12);
        assert_eq!(edge.weight, ctx.config().pose_graph.unaligned_edge_weight);
    }

    let result = ctx.finalize();
    assert!(result
        .transforms
        .iter()
        .all(|t| t.unwrap().distance(&Sim3::identity()) < 1e-12));
}

#[test]
fn test_failed_chunk_leaves_gap() {
    let scene = Arc::new(SyntheticScene::straight_line(60, 0.1));
    let mut cfg = config(10, 3);
    cfg.loop_closure.enabled = false;
    let oracle = SyntheticOracle::new(scene.clone()).fail_when_starting_at(FrameId::new(27), 2);
    let mut ctx = context(cfg, &scene, oracle);

    let events = stream(&mut ctx, &scene);
    let ids: Vec<usize> = events.iter().map(|e| e.chunk_id.index()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(span(&ctx, 3), (27, 40));
    assert_eq!(events[3].status, ChunkStatus::Failed);
    assert!(events[3].points.is_empty());
    assert!(events[3].global_transform.is_none());

    // Chunk 4 shares no frames with chunk 2, its reference.
    let chunk4 = &ctx.chunks()[4];
    assert_eq!(chunk4.reference, Some(ChunkId::new(2)));
    assert_eq!(chunk4.status, ChunkStatus::Unaligned);
    assert_eq!(events[5].status, ChunkStatus::Aligned);
    assert_composition_law(&ctx);

    let result: FinalReconstruction = ctx.finalize();
    assert_eq!(result.gaps, vec![ChunkId::new(3)]);
    assert!(result.transforms[3].is_none());
    let t2 = result.transforms[2].unwrap();
    assert!(result.transforms[4].unwrap().distance(&t2) < 1e-12);
    assert_eq!(result.cloud.points_for(ChunkId::new(3)), 0);
    assert!(result.cloud.points_for(ChunkId::new(4)) > 0);
    assert_eq!(result.stats.chunks_failed, 1);
    assert_eq!(result.stats.inference_attempts, 7);
}

#[test]
fn test_retry_recovers_chunk() {
    let scene = Arc::new(SyntheticScene::straight_line(60, 0.1));
    let mut cfg = config(10, 3);
    cfg.loop_closure.enabled = false;
    let oracle = SyntheticOracle::new(scene.clone()).fail_when_starting_at(FrameId::new(27), 1);
    let mut ctx = context(cfg, &scene, oracle);

    let events = stream(&mut ctx, &scene);
    assert!(events.iter().all(|e| e.status == ChunkStatus::Aligned));
    assert_eq!(ctx.stats().inference_attempts, 7);
    assert_eq!(ctx.stats().chunks_failed, 0);
}

#[test]
fn test_finalize_is_repeatable() {
    let scene = Arc::new(SyntheticScene::out_and_back(46, 0.5));
    let mut ctx = context(config(7, 3), &scene, SyntheticOracle::new(scene.clone()));
    stream(&mut ctx, &scene);

    let first = ctx.finalize();
    let second = ctx.finalize();
    assert_same_transforms(&first.transforms, &second.transforms);
    assert_eq!(first.loop_edges.len(), second.loop_edges.len());
    assert_eq!(first.cloud.len(), second.cloud.len());
    for (a, b) in first.cloud.points().zip(second.cloud.points()) {
        assert_eq!(a, b);
    }
}

#[test]
fn test_frames_rejected_after_finalize() {
    let scene = Arc::new(SyntheticScene::straight_line(12, 0.1));
    let mut ctx = context(config(5, 2), &scene, SyntheticOracle::new(scene.clone()));
    stream(&mut ctx, &scene);
    assert_eq!(ctx.phase(), Phase::Finalizing);
    ctx.finalize();

    let frame = scene.frames().remove(0);
    assert!(matches!(
        ctx.push_frame(frame),
        Err(ReconstructionError::NotStreaming(Phase::Finalizing))
    ));
}

#[test]
fn test_loop_closure_requires_embedder() {
    let scene = Arc::new(SyntheticScene::straight_line(4, 0.1));
    let result =
        ReconstructionContext::new(config(4, 1), Box::new(SyntheticOracle::new(scene)), None);
    assert!(matches!(result, Err(ConfigError::MissingEmbedder)));
}

#[test]
fn test_invalid_geometry_rejected() {
    let scene = Arc::new(SyntheticScene::straight_line(4, 0.1));
    let mut cfg = config(4, 4);
    cfg.loop_closure.enabled = false;
    let result = ReconstructionContext::new(cfg, Box::new(SyntheticOracle::new(scene)), None);
    assert!(matches!(result, Err(ConfigError::OverlapTooLarge { .. })));
}
