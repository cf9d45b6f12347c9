//! FrameBuffer: accumulates arriving frames and cuts overlapping chunks.
//!
//! Each chunk holds up to `overlap` frames retained from the tail of the
//! previous chunk followed by `chunk_size` fresh frames. Chunk k therefore
//! spans `[cut_k - overlap, cut_k + chunk_size)` in frame indices, and the cut
//! pointer advances by `chunk_size` fresh frames per chunk. The retained
//! frames are what the aligner uses to relate consecutive chunks.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::ConfigError;

use super::frame::{Chunk, Frame};
use super::types::{ChunkId, FrameId};

/// Default minimum number of fresh frames for the trailing partial chunk.
pub const DEFAULT_MIN_PARTIAL_FRAMES: usize = 2;

pub struct FrameBuffer {
    chunk_size: usize,
    overlap: usize,
    min_partial_frames: usize,

    /// Retained overlap frames followed by fresh frames, in arrival order.
    pending: VecDeque<Frame>,

    /// Number of leading frames in `pending` that already belong to a chunk.
    retained: usize,

    next_chunk_id: usize,
    frames_received: u64,
    last_frame_id: Option<FrameId>,
}

impl FrameBuffer {
    /// Create a buffer, rejecting invalid chunk geometry.
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        min_partial_frames: usize,
    ) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                overlap,
                chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
            min_partial_frames: min_partial_frames.max(1),
            pending: VecDeque::with_capacity(chunk_size + overlap),
            retained: 0,
            next_chunk_id: 0,
            frames_received: 0,
            last_frame_id: None,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Append a frame. Returns a chunk when `chunk_size` fresh frames are buffered.
    ///
    /// Frame ids must strictly increase; the aligner keys correspondences by
    /// id. [`FrameBuffer::accepts`] checks this before pushing.
    pub fn push(&mut self, frame: Frame) -> Option<Chunk> {
        debug_assert!(self.accepts(frame.id));
        self.last_frame_id = Some(frame.id);
        self.frames_received += 1;
        self.pending.push_back(frame);

        if self.fresh_frames() >= self.chunk_size {
            Some(self.cut(false))
        } else {
            None
        }
    }

    /// True when `id` is newer than every frame pushed so far.
    pub fn accepts(&self, id: FrameId) -> bool {
        self.last_frame_id.map_or(true, |last| id > last)
    }

    pub fn last_frame_id(&self) -> Option<FrameId> {
        self.last_frame_id
    }

    /// Flush at stream end.
    ///
    /// Emits a partial chunk if at least `min_partial_frames` fresh frames are
    /// buffered; otherwise the remainder is discarded. The buffer is empty
    /// afterwards either way.
    pub fn flush(&mut self) -> Option<Chunk> {
        let fresh = self.fresh_frames();
        let chunk = if fresh >= self.min_partial_frames {
            Some(self.cut(true))
        } else {
            if fresh > 0 {
                debug!(
                    "Discarding {} trailing frames (minimum for a partial chunk is {})",
                    fresh, self.min_partial_frames
                );
            }
            None
        };
        self.pending.clear();
        self.retained = 0;
        chunk
    }

    /// Frames not yet covered by any chunk.
    pub fn fresh_frames(&self) -> usize {
        self.pending.len() - self.retained
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Number of chunks cut so far.
    pub fn chunks_cut(&self) -> usize {
        self.next_chunk_id
    }

    /// Full chunks that the currently pending fresh frames will still produce.
    pub fn estimated_remaining_chunks(&self) -> usize {
        self.fresh_frames() / self.chunk_size
    }

    fn cut(&mut self, partial: bool) -> Chunk {
        let frames: Vec<Frame> = self.pending.drain(..).collect();
        let id = ChunkId::new(self.next_chunk_id);
        self.next_chunk_id += 1;

        let keep = self.overlap.min(frames.len());
        self.pending.extend(frames[frames.len() - keep..].iter().cloned());
        let overlap = self.retained;
        self.retained = keep;

        debug!(
            "Cut chunk {} with {} frames ({} overlapping, partial={})",
            id,
            frames.len(),
            overlap,
            partial
        );

        Chunk {
            id,
            frames,
            overlap,
            partial,
        }
    }
}
