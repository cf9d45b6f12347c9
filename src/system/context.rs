//! Processing context: the single owner of all reconstruction state.
//!
//! Frames go in through [`ReconstructionContext::push_frame`]; each completed
//! chunk is inferred, aligned and integrated before the call returns. The
//! phase moves one way, from `Streaming` to `Finalizing`. Finalize runs loop
//! closure and pose graph optimization on the unchanged streaming history, so
//! repeated calls give the same result.

use thiserror::Error;
use tracing::{info, warn};

use crate::alignment::{AlignmentMode, ChunkAligner};
use crate::config::{ConfigError, ReconstructionConfig};
use crate::frames::{Chunk, ChunkId, Frame, FrameBuffer, FrameId};
use crate::geometry::Sim3;
use crate::inference::{ChunkOutcome, ChunkProcessor, EmbeddingOracle, InferenceOracle};
use crate::loop_closing::{LoopCloser, LoopCloserStats};
use crate::mapping::{ChunkState, ChunkStatus, GlobalAccumulator, GlobalCloud, SequentialWeights};
use crate::optimizer::{
    EdgeKind, OptimizationReport, PoseGraph, PoseGraphEdge, PoseGraphError, PoseGraphOptimizer,
    PoseGraphSolution,
};

use super::messages::{ChunkReady, CloudSnapshot};

#[derive(Debug, Error)]
pub enum ReconstructionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("reconstruction no longer accepts frames (phase {0:?})")]
    NotStreaming(Phase),

    #[error("frame {frame} does not follow frame {last}; frame ids must increase")]
    NonIncreasingFrameId { frame: FrameId, last: FrameId },

    #[error("processing worker disconnected")]
    WorkerDisconnected,

    #[error("failed to spawn processing worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Processing phase. Transitions only from `Streaming` to `Finalizing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Streaming,
    Finalizing,
}

/// Coarse session state for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Capturing,
    Processing,
    Finalizing,
    LoopClosure,
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub chunks_unaligned: usize,
    pub inference_attempts: usize,
    pub loop_closure: LoopCloserStats,
    pub loop_edges_added: usize,
}

/// Overall quality of the final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Nominal,
    /// The optimizer stopped without converging; transforms are its last
    /// estimate.
    Degraded,
}

/// Output of finalize.
#[derive(Debug, Clone)]
pub struct FinalReconstruction {
    pub cloud: GlobalCloud,

    /// Final global transform per chunk; `None` for failed chunks.
    pub transforms: Vec<Option<Sim3>>,

    pub statuses: Vec<ChunkStatus>,

    /// Failed chunk ids.
    pub gaps: Vec<ChunkId>,

    pub loop_edges: Vec<PoseGraphEdge>,
    pub quality: Quality,

    /// `None` when optimization was skipped.
    pub optimization: Option<OptimizationReport>,

    pub stats: SessionStats,
}

pub struct ReconstructionContext {
    config: ReconstructionConfig,
    buffer: FrameBuffer,
    processor: ChunkProcessor,
    aligner: ChunkAligner,
    accumulator: GlobalAccumulator,
    embedder: Option<Box<dyn EmbeddingOracle>>,
    phase: Phase,
    status: SessionStatus,
    stats: SessionStats,
}

impl ReconstructionContext {
    /// Validate the configuration and build the context.
    pub fn new(
        config: ReconstructionConfig,
        oracle: Box<dyn InferenceOracle>,
        embedder: Option<Box<dyn EmbeddingOracle>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.loop_closure.enabled && embedder.is_none() {
            return Err(ConfigError::MissingEmbedder);
        }

        let buffer = FrameBuffer::new(config.chunk_size, config.overlap, config.min_partial_frames)?;
        let processor = ChunkProcessor::new(oracle, config.inference_retries);
        let aligner = ChunkAligner::new(config.alignment.clone());
        let accumulator = GlobalAccumulator::new(
            config.cloud.clone(),
            SequentialWeights {
                aligned: config.pose_graph.sequential_weight,
                unaligned: config.pose_graph.unaligned_edge_weight,
            },
        );

        Ok(Self {
            config,
            buffer,
            processor,
            aligner,
            accumulator,
            embedder,
            phase: Phase::Streaming,
            status: SessionStatus::Idle,
            stats: SessionStats::default(),
        })
    }

    /// Buffer a frame; returns the chunk event when the frame completed a chunk.
    pub fn push_frame(&mut self, frame: Frame) -> Result<Option<ChunkReady>, ReconstructionError> {
        if self.phase != Phase::Streaming {
            return Err(ReconstructionError::NotStreaming(self.phase));
        }
        if let Some(last) = self.buffer.last_frame_id() {
            if !self.buffer.accepts(frame.id) {
                return Err(ReconstructionError::NonIncreasingFrameId {
                    frame: frame.id,
                    last,
                });
            }
        }
        self.stats.frames_received += 1;
        self.status = SessionStatus::Capturing;

        let event = self.buffer.push(frame).map(|chunk| self.process_chunk(chunk));
        Ok(event)
    }

    /// True when the next frame completes a chunk.
    pub fn next_frame_cuts_chunk(&self) -> bool {
        self.buffer.fresh_frames() + 1 >= self.buffer.chunk_size()
    }

    /// End the stream: flush the trailing partial chunk and leave the
    /// streaming phase. Later calls are no-ops.
    pub fn finish_stream(&mut self) -> Option<ChunkReady> {
        if self.phase != Phase::Streaming {
            return None;
        }
        let event = self.buffer.flush().map(|chunk| self.process_chunk(chunk));
        self.phase = Phase::Finalizing;
        self.status = SessionStatus::Finalizing;
        info!(
            "Stream finished: {} frames, {} chunks",
            self.stats.frames_received,
            self.buffer.chunks_cut()
        );
        event
    }

    /// Run loop closure, optimize, re-fuse and return the final result.
    ///
    /// Ends the stream first if needed; the flushed chunk's event is not
    /// returned, call [`ReconstructionContext::finish_stream`] first to get it.
    pub fn finalize(&mut self) -> FinalReconstruction {
        self.finish_stream();
        self.status = SessionStatus::LoopClosure;

        let initial = self.accumulator.streaming_transforms();
        let mut graph = self.accumulator.graph().clone();
        let loop_edges = self.close_loops(&mut graph);

        let (transforms, report) = self.optimize(&graph, &initial, !loop_edges.is_empty());
        self.accumulator.apply_corrections(&transforms);

        let quality = assess_quality(report.as_ref());

        self.stats.loop_edges_added = loop_edges.len();
        self.status = SessionStatus::Finished;
        info!(
            "Finalized: {} chunks, {} loop edges, {} points, quality {:?}",
            transforms.len(),
            loop_edges.len(),
            self.accumulator.cloud().len(),
            quality
        );

        FinalReconstruction {
            cloud: self.accumulator.cloud().clone(),
            transforms,
            statuses: self.accumulator.statuses(),
            gaps: self.accumulator.gaps(),
            loop_edges,
            quality,
            optimization: report,
            stats: self.stats.clone(),
        }
    }

    /// Current read-only view of the cloud.
    pub fn snapshot(&self) -> CloudSnapshot {
        CloudSnapshot {
            version: self.accumulator.version(),
            cloud: self.accumulator.cloud().clone(),
            statuses: self.accumulator.statuses(),
            phase: self.phase,
            session: self.status,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn chunks(&self) -> &[ChunkState] {
        self.accumulator.chunks()
    }

    /// Streaming-time pose graph (sequential edges only).
    pub fn graph(&self) -> &PoseGraph {
        self.accumulator.graph()
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Full chunks the buffered frames will still produce.
    pub fn estimated_remaining_chunks(&self) -> usize {
        self.buffer.estimated_remaining_chunks()
    }

    fn process_chunk(&mut self, chunk: Chunk) -> ChunkReady {
        self.status = SessionStatus::Processing;
        info!(
            "Processing chunk {} ({} frames, {} overlap{})",
            chunk.id,
            chunk.len(),
            chunk.overlap,
            if chunk.partial { ", partial" } else { "" }
        );

        let event = match self.processor.process(&chunk) {
            ChunkOutcome::Reconstructed {
                reconstruction,
                attempts,
            } => {
                self.stats.inference_attempts += attempts;
                let alignment = self
                    .accumulator
                    .reference()
                    .and_then(|r| r.reconstruction.as_deref())
                    .map(|reference| self.aligner.align(reference, &reconstruction));
                let window = chunk.representative_window(self.config.loop_closure.verification_window);
                self.accumulator
                    .integrate(&chunk, reconstruction, alignment, window)
            }
            ChunkOutcome::Failed { attempts, error } => {
                self.stats.inference_attempts += attempts;
                self.stats.chunks_failed += 1;
                self.accumulator.integrate_failed(&chunk, &error)
            }
        };

        self.stats.chunks_processed += 1;
        if event.status == ChunkStatus::Unaligned {
            self.stats.chunks_unaligned += 1;
        }
        self.status = if self.phase == Phase::Streaming {
            SessionStatus::Capturing
        } else {
            SessionStatus::Finalizing
        };
        event
    }

    /// Detect and verify loops; append them to `graph` as loop edges.
    fn close_loops(&mut self, graph: &mut PoseGraph) -> Vec<PoseGraphEdge> {
        self.stats.loop_closure = LoopCloserStats::default();
        if !self.config.loop_closure.enabled {
            return Vec::new();
        }
        let Some(embedder) = self.embedder.as_mut() else {
            return Vec::new();
        };

        let mut closer = LoopCloser::new(self.config.loop_closure.clone());
        let loops = closer.run(
            self.accumulator.chunks(),
            embedder.as_mut(),
            &mut self.processor,
            &self.aligner,
        );
        self.stats.loop_closure = closer.stats().clone();

        let edges: Vec<PoseGraphEdge> = loops
            .iter()
            .map(|verified| PoseGraphEdge {
                from: verified.candidate.earlier,
                to: verified.candidate.later,
                measurement: verified.measurement,
                weight: self.config.pose_graph.loop_weight,
                kind: EdgeKind::Loop,
            })
            .collect();
        for edge in &edges {
            graph.add_edge(*edge);
        }
        edges
    }

    fn optimize(
        &self,
        graph: &PoseGraph,
        initial: &[Option<Sim3>],
        has_loops: bool,
    ) -> (Vec<Option<Sim3>>, Option<OptimizationReport>) {
        let anchor = match self.accumulator.anchor() {
            Some(anchor) if has_loops => anchor,
            _ => return (initial.to_vec(), None),
        };

        let optimizer = PoseGraphOptimizer::new(self.config.pose_graph.clone());
        let fix_scale = self.config.alignment.mode == AlignmentMode::Rigid;
        settle_optimization(optimizer.optimize(graph, initial, anchor, fix_scale), initial)
    }
}

/// Transforms and report from an optimizer run. A rejected problem keeps
/// `initial` and reports a non-converged run.
fn settle_optimization(
    outcome: Result<PoseGraphSolution, PoseGraphError>,
    initial: &[Option<Sim3>],
) -> (Vec<Option<Sim3>>, Option<OptimizationReport>) {
    match outcome {
        Ok(solution) => {
            info!(
                "Pose graph optimized: cost {:.6e} -> {:.6e} in {} iterations",
                solution.report.initial_cost, solution.report.final_cost, solution.report.iterations
            );
            (solution.transforms, Some(solution.report))
        }
        Err(err) => {
            warn!("Pose graph optimization skipped: {}", err);
            (
                initial.to_vec(),
                Some(OptimizationReport {
                    iterations: 0,
                    initial_cost: 0.0,
                    final_cost: 0.0,
                    converged: false,
                }),
            )
        }
    }
}

/// `Degraded` when an optimizer run did not converge.
fn assess_quality(report: Option<&OptimizationReport>) -> Quality {
    match report {
        Some(r) if !r.converged => {
            warn!(
                "Pose graph optimization did not converge after {} iterations; result is degraded",
                r.iterations
            );
            Quality::Degraded
        }
        _ => Quality::Nominal,
    }
}
