//! Synthetic scene and deterministic oracles for tests and the demo binary.

pub mod oracles;
pub mod scene;

pub use oracles::{SyntheticEmbedder, SyntheticOracle};
pub use scene::SyntheticScene;
