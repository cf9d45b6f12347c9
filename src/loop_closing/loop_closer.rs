//! LoopCloser - finalize-time loop closure over the complete chunk history.
//!
//! This module runs once the stream has ended:
//! 1. Embeds each chunk's representative frame
//! 2. Detects candidate revisits by embedding similarity
//! 3. Verifies each candidate geometrically
//!
//! Verified loops become pose graph edges; the caller runs the optimizer.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alignment::ChunkAligner;
use crate::inference::{ChunkProcessor, EmbeddingOracle};
use crate::mapping::ChunkState;

use super::detector::{detect_loop_candidates, embed_chunks};
use super::verifier::{verify_candidate, VerifiedLoop};

/// Configuration for loop closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopClosureConfig {
    /// Run loop closure at finalize. Requires an embedding oracle.
    pub enabled: bool,

    /// Pairs must satisfy `later - earlier > min_chunk_gap`.
    pub min_chunk_gap: usize,

    /// Minimum cosine similarity of a candidate pair.
    pub similarity_threshold: f32,

    /// Maximum number of candidates verified per run.
    pub max_candidates: usize,

    /// Frames per chunk fed to the joint verification inference.
    pub verification_window: usize,

    /// Maximum scale-normalized residual of an accepted loop.
    pub verification_tolerance: f64,
}

impl Default for LoopClosureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_chunk_gap: 2,
            similarity_threshold: 0.9,
            max_candidates: 8,
            verification_window: 3,
            verification_tolerance: 0.05,
        }
    }
}

/// Statistics for the loop closer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopCloserStats {
    /// Chunks with a usable embedding.
    pub chunks_embedded: usize,

    /// Chunks whose embedding failed.
    pub embedding_failures: usize,

    /// Number of loop candidates detected.
    pub candidates_detected: usize,

    /// Number of candidates rejected by verification.
    pub candidates_rejected: usize,

    /// Number of loops verified.
    pub loops_verified: usize,
}

pub struct LoopCloser {
    config: LoopClosureConfig,
    stats: LoopCloserStats,
}

impl LoopCloser {
    pub fn new(config: LoopClosureConfig) -> Self {
        Self {
            config,
            stats: LoopCloserStats::default(),
        }
    }

    /// Detect and verify loops over the full chunk history.
    ///
    /// Statistics are reset on every run.
    pub fn run(
        &mut self,
        chunks: &[ChunkState],
        embedder: &mut dyn EmbeddingOracle,
        processor: &mut ChunkProcessor,
        aligner: &ChunkAligner,
    ) -> Vec<VerifiedLoop> {
        self.stats = LoopCloserStats::default();

        let (embeddings, failures) = embed_chunks(chunks, embedder);
        self.stats.chunks_embedded = embeddings.len();
        self.stats.embedding_failures = failures;

        let candidates = detect_loop_candidates(
            &embeddings,
            self.config.min_chunk_gap,
            self.config.similarity_threshold,
            self.config.max_candidates,
        );
        self.stats.candidates_detected = candidates.len();

        let mut loops = Vec::new();
        for candidate in &candidates {
            match verify_candidate(
                candidate,
                chunks,
                processor,
                aligner,
                self.config.verification_tolerance,
            ) {
                Ok(verified) => {
                    info!(
                        "Loop verified: {} <-> {} (similarity {:.3}, residual {:.4})",
                        candidate.earlier, candidate.later, candidate.similarity, verified.residual
                    );
                    self.stats.loops_verified += 1;
                    loops.push(verified);
                }
                Err(rejection) => {
                    debug!(
                        "Loop candidate {} <-> {} rejected: {}",
                        candidate.earlier, candidate.later, rejection
                    );
                    self.stats.candidates_rejected += 1;
                }
            }
        }

        info!(
            "Loop closure done. Stats: embedded={}, detected={}, verified={}, rejected={}",
            self.stats.chunks_embedded,
            self.stats.candidates_detected,
            self.stats.loops_verified,
            self.stats.candidates_rejected
        );
        loops
    }

    pub fn config(&self) -> &LoopClosureConfig {
        &self.config
    }

    /// Get statistics of the last run.
    pub fn stats(&self) -> &LoopCloserStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::frames::ChunkId;
    use crate::sim::{SyntheticEmbedder, SyntheticOracle, SyntheticScene};

    #[test]
    fn test_loop_closure_config_default() {
        let config = LoopClosureConfig::default();
        assert!(config.enabled);
        assert!(config.verification_tolerance > 0.0);
    }

    fn revisit_run(tolerance: f64) -> (Vec<VerifiedLoop>, LoopCloserStats) {
        let scene = Arc::new(SyntheticScene::out_and_back(46, 0.5));
        let chunks = vec![
            scene.reconstructed_state(0, 0..7, 3),
            scene.reconstructed_state(1, 18..25, 3),
            scene.reconstructed_state(2, 39..46, 3),
        ];
        let mut closer = LoopCloser::new(LoopClosureConfig {
            min_chunk_gap: 1,
            verification_tolerance: tolerance,
            ..LoopClosureConfig::default()
        });
        let mut embedder = SyntheticEmbedder::new(scene.clone());
        let mut processor = ChunkProcessor::new(Box::new(SyntheticOracle::new(scene)), 0);
        let loops = closer.run(
            &chunks,
            &mut embedder,
            &mut processor,
            &ChunkAligner::default(),
        );
        (loops, closer.stats().clone())
    }

    #[test]
    fn test_revisit_verified() {
        let (loops, stats) = revisit_run(0.05);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].candidate.earlier, ChunkId::new(0));
        assert_eq!(loops[0].candidate.later, ChunkId::new(2));
        assert_eq!(stats.chunks_embedded, 3);
        assert_eq!(stats.candidates_detected, 1);
        assert_eq!(stats.loops_verified, 1);
        assert_eq!(stats.candidates_rejected, 0);
    }

    #[test]
    fn test_tight_tolerance_rejects_candidate() {
        let (loops, stats) = revisit_run(1e-15);
        assert!(loops.is_empty());
        assert_eq!(stats.candidates_detected, 1);
        assert_eq!(stats.candidates_rejected, 1);
        assert_eq!(stats.loops_verified, 0);
    }

    #[test]
    fn test_loop_closer_stats_default() {
        let closer = LoopCloser::new(LoopClosureConfig::default());
        assert_eq!(closer.stats().loops_verified, 0);
        assert_eq!(closer.stats().candidates_detected, 0);
    }
}
