//! Chunk-to-chunk alignment.

pub mod aligner;
pub mod solver;

pub use aligner::{AlignmentConfig, AlignmentOutcome, ChunkAligner};
pub use solver::{robust_fit, AlignmentFit, AlignmentMode, Correspondence, MIN_CORRESPONDENCES};
