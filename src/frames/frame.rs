//! Frames and chunks as delivered to the inference stage.

use std::sync::Arc;

use super::types::{ChunkId, FrameId};

/// A single image from the stream.
///
/// The payload is opaque to the core: only the inference and embedding oracles
/// interpret it. Cloning is cheap (the pixels are shared).
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,

    /// Arrival timestamp in nanoseconds. No spacing is guaranteed.
    pub timestamp_ns: u64,

    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

impl Frame {
    pub fn new(id: FrameId, timestamp_ns: u64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            id,
            timestamp_ns,
            width,
            height,
            data: Arc::from(data.into_boxed_slice()),
        }
    }

    /// Frame without pixel data, for oracles that key on the frame id alone.
    pub fn placeholder(id: FrameId, timestamp_ns: u64) -> Self {
        Self::new(id, timestamp_ns, 0, 0, Vec::new())
    }
}

/// An ordered window of consecutive frames processed as one inference unit.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: ChunkId,

    /// Frames in arrival order. The first `overlap` frames are shared with the
    /// previous chunk.
    pub frames: Vec<Frame>,

    /// Number of leading frames retained from the previous chunk.
    pub overlap: usize,

    /// True for the trailing chunk flushed at stream end with fewer than
    /// `chunk_size` fresh frames.
    pub partial: bool,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame_ids(&self) -> Vec<FrameId> {
        self.frames.iter().map(|f| f.id).collect()
    }

    /// Index of the frame that represents this chunk for place recognition.
    pub fn representative_index(&self) -> usize {
        self.frames.len() / 2
    }

    /// Up to `window` consecutive frames centred on the representative frame.
    pub fn representative_window(&self, window: usize) -> Vec<Frame> {
        if self.frames.is_empty() || window == 0 {
            return Vec::new();
        }
        let window = window.min(self.frames.len());
        let center = self.representative_index();
        let start = center
            .saturating_sub(window / 2)
            .min(self.frames.len() - window);
        self.frames[start..start + window].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(n: u64) -> Chunk {
        Chunk {
            id: ChunkId::new(0),
            frames: (0..n)
                .map(|i| Frame::placeholder(FrameId::new(i), i * 10))
                .collect(),
            overlap: 0,
            partial: false,
        }
    }

    #[test]
    fn test_representative_is_middle_frame() {
        assert_eq!(chunk_with(10).representative_index(), 5);
        assert_eq!(chunk_with(3).representative_index(), 1);
    }

    #[test]
    fn test_representative_window_is_clipped() {
        let c = chunk_with(10);
        let ids: Vec<u64> = c.representative_window(3).iter().map(|f| f.id.0).collect();
        assert_eq!(ids, vec![4, 5, 6]);

        let small = chunk_with(2);
        assert_eq!(small.representative_window(5).len(), 2);
        assert!(small.representative_window(0).is_empty());
    }

    #[test]
    fn test_frame_payload_shared_on_clone() {
        let f = Frame::new(FrameId::new(1), 5, 2, 1, vec![7, 9]);
        let g = f.clone();
        assert!(Arc::ptr_eq(&f.data, &g.data));
    }
}
