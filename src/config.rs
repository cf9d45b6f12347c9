//! Reconstruction configuration.
//!
//! Loaded from YAML or built in code. Every section has defaults, so a YAML
//! file only needs the keys it overrides:
//!
//! ```yaml
//! chunk_size: 40
//! overlap: 10
//! alignment:
//!   mode: scale_then_rigid
//! cloud:
//!   sample_ratio: 0.25
//! loop_closure:
//!   enabled: false
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alignment::AlignmentConfig;
use crate::frames::DEFAULT_MIN_PARTIAL_FRAMES;
use crate::inference::DEFAULT_INFERENCE_RETRIES;
use crate::loop_closing::LoopClosureConfig;
use crate::mapping::CloudConfig;
use crate::optimizer::PoseGraphConfig;

/// Configuration errors. All of them are fatal at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chunk_size must be greater than 0")]
    ZeroChunkSize,

    #[error("overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { overlap: usize, chunk_size: usize },

    #[error("{name} = {value} is outside {range}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        range: &'static str,
    },

    #[error("loop closure is enabled but no embedding oracle was provided")]
    MissingEmbedder,

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Fresh frames per chunk.
    pub chunk_size: usize,

    /// Frames shared between consecutive chunks.
    pub overlap: usize,

    /// Minimum fresh frames for the trailing partial chunk.
    pub min_partial_frames: usize,

    /// Inference retries after a failed attempt.
    pub inference_retries: usize,

    pub alignment: AlignmentConfig,
    pub cloud: CloudConfig,
    pub loop_closure: LoopClosureConfig,
    pub pose_graph: PoseGraphConfig,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 40,
            overlap: 10,
            min_partial_frames: DEFAULT_MIN_PARTIAL_FRAMES,
            inference_retries: DEFAULT_INFERENCE_RETRIES,
            alignment: AlignmentConfig::default(),
            cloud: CloudConfig::default(),
            loop_closure: LoopClosureConfig::default(),
            pose_graph: PoseGraphConfig::default(),
        }
    }
}

impl ReconstructionConfig {
    /// Load and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                overlap: self.overlap,
                chunk_size: self.chunk_size,
            });
        }

        let cloud = &self.cloud;
        check(
            "cloud.sample_ratio",
            cloud.sample_ratio,
            cloud.sample_ratio > 0.0 && cloud.sample_ratio <= 1.0,
            "(0, 1]",
        )?;
        let threshold = cloud.confidence_threshold as f64;
        check(
            "cloud.confidence_threshold",
            threshold,
            threshold > 0.0 && threshold < 1.0,
            "(0, 1)",
        )?;

        let alignment = &self.alignment;
        check(
            "alignment.confidence_ratio",
            alignment.confidence_ratio,
            alignment.confidence_ratio >= 0.0 && alignment.confidence_ratio.is_finite(),
            "[0, inf)",
        )?;
        check(
            "alignment.outlier_factor",
            alignment.outlier_factor,
            alignment.outlier_factor >= 1.0 && alignment.outlier_factor.is_finite(),
            "[1, inf)",
        )?;

        let loops = &self.loop_closure;
        let similarity = loops.similarity_threshold as f64;
        check(
            "loop_closure.similarity_threshold",
            similarity,
            similarity > -1.0 && similarity <= 1.0,
            "(-1, 1]",
        )?;
        check(
            "loop_closure.verification_tolerance",
            loops.verification_tolerance,
            loops.verification_tolerance > 0.0,
            "(0, inf)",
        )?;
        check(
            "loop_closure.verification_window",
            loops.verification_window as f64,
            loops.verification_window > 0,
            "[1, inf)",
        )?;

        let graph = &self.pose_graph;
        for (name, value) in [
            ("pose_graph.sequential_weight", graph.sequential_weight),
            ("pose_graph.unaligned_edge_weight", graph.unaligned_edge_weight),
            ("pose_graph.loop_weight", graph.loop_weight),
        ] {
            check(name, value, value > 0.0 && value.is_finite(), "(0, inf)")?;
        }

        Ok(())
    }
}

fn check(name: &'static str, value: f64, ok: bool, range: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, value, range })
    }
}
