//! Loop candidate detection from global frame embeddings.
//!
//! One embedding per non-failed chunk, taken on the chunk's representative
//! frame. Chunk pairs that are far enough apart in the sequence and whose
//! embeddings are similar enough become candidates for verification.

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::frames::ChunkId;
use crate::inference::{EmbeddingError, EmbeddingOracle};
use crate::mapping::ChunkState;

/// Global descriptor of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub chunk: ChunkId,
    pub vector: Vec<f32>,
}

/// A potential revisit between an earlier and a later chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopCandidate {
    pub earlier: ChunkId,
    pub later: ChunkId,
    pub similarity: f32,
}

/// Cosine similarity; 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Embed the representative frame of every non-failed chunk.
///
/// Chunks whose embedding fails are left out. Returns the embeddings and the
/// number of failures.
pub fn embed_chunks(
    chunks: &[ChunkState],
    embedder: &mut dyn EmbeddingOracle,
) -> (Vec<ChunkEmbedding>, usize) {
    let mut embeddings = Vec::with_capacity(chunks.len());
    let mut failures = 0;

    for state in chunks.iter().filter(|c| !c.is_failed()) {
        let Some(frame) = state.representative_frame() else {
            continue;
        };
        let embedded = embedder.embed(frame).and_then(|vector| {
            if vector.is_empty() {
                Err(EmbeddingError::Empty(frame.id))
            } else {
                Ok(vector)
            }
        });
        match embedded {
            Ok(vector) => embeddings.push(ChunkEmbedding {
                chunk: state.id,
                vector,
            }),
            Err(err) => {
                warn!("Embedding failed for chunk {}: {}", state.id, err);
                failures += 1;
            }
        }
    }

    (embeddings, failures)
}

/// All pairs with `later - earlier > min_chunk_gap` and similarity at or
/// above `threshold`, best first, at most `max_candidates`.
pub fn detect_loop_candidates(
    embeddings: &[ChunkEmbedding],
    min_chunk_gap: usize,
    threshold: f32,
    max_candidates: usize,
) -> Vec<LoopCandidate> {
    let mut candidates = Vec::new();

    for (a, earlier) in embeddings.iter().enumerate() {
        for later in &embeddings[a + 1..] {
            if later.chunk.index() - earlier.chunk.index() <= min_chunk_gap {
                continue;
            }
            let similarity = cosine_similarity(&earlier.vector, &later.vector);
            if similarity >= threshold {
                debug!(
                    "Loop candidate {} <-> {} (similarity {:.3})",
                    earlier.chunk, later.chunk, similarity
                );
                candidates.push(LoopCandidate {
                    earlier: earlier.chunk,
                    later: later.chunk,
                    similarity,
                });
            }
        }
    }

    candidates.sort_by(|x, y| {
        y.similarity
            .partial_cmp(&x.similarity)
            .unwrap_or(Ordering::Equal)
            .then(x.earlier.cmp(&y.earlier))
            .then(x.later.cmp(&y.later))
    });
    candidates.truncate(max_candidates);
    candidates
}
