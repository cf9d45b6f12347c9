//! Global optimization of chunk transforms.
//!
//! Runs only at finalize, and only when loop closure produced at least one
//! verified loop edge.

pub mod pose_graph;

pub use pose_graph::{
    EdgeKind, OptimizationReport, PoseGraph, PoseGraphConfig, PoseGraphEdge, PoseGraphError,
    PoseGraphOptimizer, PoseGraphSolution,
};
