//! Core ID types for frames and chunks.

/// Sequence index of a frame in arrival order.
///
/// Frame ids double as the correspondence key between reconstructions: the
/// same frame processed in two chunks yields pixel-aligned point maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

impl FrameId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Identifier of a chunk, assigned sequentially at cut time.
///
/// Chunk ids are dense small integers and index directly into the chunk
/// history and the pose graph arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub usize);

impl ChunkId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", FrameId::new(12)), "F12");
        assert_eq!(format!("{}", ChunkId::new(3)), "C3");
    }

    #[test]
    fn test_chunk_ids_order_by_index() {
        assert!(ChunkId::new(1) < ChunkId::new(2));
        assert_eq!(ChunkId::new(7).index(), 7);
    }
}
