//! Pose graph optimization over chunk transforms.
//!
//! Nodes are chunk-local-to-global Sim3 transforms, edges are relative
//! measurements `T_from<-to`. The anchor node is held fixed; every other
//! active node is parameterized by its chart coordinates. Scale is fixed
//! when the alignment mode is rigid.
//!
//! Solved with Levenberg-Marquardt on a dense normal system and numerical
//! Jacobians. Problems here have one node per chunk, so the dense solve stays
//! small.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frames::ChunkId;
use crate::geometry::{Sim3, SE3_DOF, SIM3_DOF};

/// Configuration for pose graph optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseGraphConfig {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,

    /// Stop once an accepted step improves the cost by less than this fraction.
    pub cost_tolerance: f64,

    /// Convergence threshold on parameter change.
    pub param_tolerance: f64,

    /// Convergence threshold on gradient norm.
    pub gradient_tolerance: f64,

    /// Weight of a sequential edge produced by a determined alignment.
    pub sequential_weight: f64,

    /// Weight of a sequential edge that fell back to identity.
    pub unaligned_edge_weight: f64,

    /// Weight of a verified loop edge.
    pub loop_weight: f64,
}

impl Default for PoseGraphConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            cost_tolerance: 1e-12,
            param_tolerance: 1e-10,
            gradient_tolerance: 1e-12,
            sequential_weight: 10.0,
            unaligned_edge_weight: 1e-3,
            loop_weight: 1.0,
        }
    }
}

/// Type of pose graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Reference chunk to the chunk aligned against it.
    Sequential,
    /// Verified revisit between non-adjacent chunks.
    Loop,
}

/// A relative constraint between two chunks.
#[derive(Debug, Clone, Copy)]
pub struct PoseGraphEdge {
    pub from: ChunkId,
    pub to: ChunkId,

    /// Maps `to`'s local frame into `from`'s local frame.
    pub measurement: Sim3,

    /// Information weight.
    pub weight: f64,

    pub kind: EdgeKind,
}

/// Node count plus edge list. Nodes are chunk ids in arrival order.
#[derive(Debug, Clone, Default)]
pub struct PoseGraph {
    node_count: usize,
    edges: Vec<PoseGraphEdge>,
}

impl PoseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next chunk as a node.
    pub fn add_node(&mut self) -> ChunkId {
        let id = ChunkId::new(self.node_count);
        self.node_count += 1;
        id
    }

    pub fn add_edge(&mut self, edge: PoseGraphEdge) {
        self.edges.push(edge);
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edges(&self) -> &[PoseGraphEdge] {
        &self.edges
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &PoseGraphEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    pub fn loop_edge_count(&self) -> usize {
        self.edges_of_kind(EdgeKind::Loop).count()
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoseGraphError {
    #[error("graph has {graph} nodes but {initial} initial transforms were given")]
    NodeCountMismatch { graph: usize, initial: usize },

    #[error("anchor {0} has no transform")]
    InactiveAnchor(ChunkId),

    #[error("edge {index} ({from} -> {to}) references a node without a transform")]
    InactiveEndpoint {
        index: usize,
        from: ChunkId,
        to: ChunkId,
    },
}

/// Summary of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizationReport {
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub converged: bool,
}

/// Optimized transforms, index-aligned with the graph's nodes.
#[derive(Debug, Clone)]
pub struct PoseGraphSolution {
    pub transforms: Vec<Option<Sim3>>,
    pub report: OptimizationReport,
}

const JACOBIAN_STEP: f64 = 1e-6;
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.1;
const MIN_LAMBDA: f64 = 1e-12;
const MAX_LAMBDA: f64 = 1e12;

/// Levenberg-Marquardt pose graph solver.
#[derive(Debug, Clone, Default)]
pub struct PoseGraphOptimizer {
    config: PoseGraphConfig,
}

impl PoseGraphOptimizer {
    pub fn new(config: PoseGraphConfig) -> Self {
        Self { config }
    }

    /// Optimize the transforms of every active node except `anchor`.
    ///
    /// `initial[i]` is `None` for nodes without a transform (failed chunks);
    /// those nodes stay `None` and may not be referenced by any edge.
    pub fn optimize(
        &self,
        graph: &PoseGraph,
        initial: &[Option<Sim3>],
        anchor: ChunkId,
        fix_scale: bool,
    ) -> Result<PoseGraphSolution, PoseGraphError> {
        let problem = Problem::new(graph, initial, anchor, fix_scale)?;
        let mut params = problem.initial_params();

        let initial_cost = problem.cost(&params);
        let mut current_cost = initial_cost;
        let mut lambda = LAMBDA_INIT;
        let mut iterations = 0;
        let mut converged = params.is_empty() || initial_cost <= f64::MIN_POSITIVE;

        if !converged {
            for iter in 0..self.config.max_iterations {
                iterations = iter + 1;

                let (residuals, jacobian) = problem.linearize(&params);
                current_cost = residuals.norm_squared();

                let gradient = jacobian.transpose() * &residuals;
                if gradient.norm() < self.config.gradient_tolerance {
                    converged = true;
                    break;
                }

                let mut damped = jacobian.transpose() * &jacobian;
                for i in 0..params.len() {
                    damped[(i, i)] += lambda * damped[(i, i)].max(1e-6);
                }

                let delta = match damped.lu().solve(&(-&gradient)) {
                    Some(d) => d,
                    None => break,
                };

                if delta.norm()
                    < self.config.param_tolerance * (params.norm() + self.config.param_tolerance)
                {
                    converged = true;
                    break;
                }

                let trial = &params + &delta;
                let trial_cost = problem.cost(&trial);

                if trial_cost < current_cost {
                    let improvement = (current_cost - trial_cost) / current_cost;
                    params = trial;
                    current_cost = trial_cost;
                    lambda = (lambda * LAMBDA_DOWN).max(MIN_LAMBDA);
                    if improvement < self.config.cost_tolerance {
                        converged = true;
                        break;
                    }
                } else {
                    lambda = (lambda * LAMBDA_UP).min(MAX_LAMBDA);
                }
            }
        }

        Ok(PoseGraphSolution {
            transforms: problem.extract(&params),
            report: OptimizationReport {
                iterations,
                initial_cost,
                final_cost: current_cost,
                converged,
            },
        })
    }
}

/// Flattened problem: parameter layout plus the fixed values.
struct Problem<'a> {
    edges: &'a [PoseGraphEdge],
    initial: &'a [Option<Sim3>],
    /// Parameter block index per node; `None` for the anchor and inactive nodes.
    blocks: Vec<Option<usize>>,
    dof: usize,
}

impl<'a> Problem<'a> {
    fn new(
        graph: &'a PoseGraph,
        initial: &'a [Option<Sim3>],
        anchor: ChunkId,
        fix_scale: bool,
    ) -> Result<Self, PoseGraphError> {
        if initial.len() != graph.node_count() {
            return Err(PoseGraphError::NodeCountMismatch {
                graph: graph.node_count(),
                initial: initial.len(),
            });
        }
        if initial.get(anchor.index()).copied().flatten().is_none() {
            return Err(PoseGraphError::InactiveAnchor(anchor));
        }
        for (index, edge) in graph.edges().iter().enumerate() {
            let active = |id: ChunkId| initial.get(id.index()).copied().flatten().is_some();
            if !active(edge.from) || !active(edge.to) {
                return Err(PoseGraphError::InactiveEndpoint {
                    index,
                    from: edge.from,
                    to: edge.to,
                });
            }
        }

        let mut blocks = Vec::with_capacity(initial.len());
        let mut next = 0;
        for (i, transform) in initial.iter().enumerate() {
            if transform.is_some() && i != anchor.index() {
                blocks.push(Some(next));
                next += 1;
            } else {
                blocks.push(None);
            }
        }

        Ok(Self {
            edges: graph.edges(),
            initial,
            blocks,
            dof: if fix_scale { SE3_DOF } else { SIM3_DOF },
        })
    }

    fn param_count(&self) -> usize {
        self.blocks.iter().flatten().count() * self.dof
    }

    fn initial_params(&self) -> DVector<f64> {
        let mut params = DVector::zeros(self.param_count());
        for (node, block) in self.blocks.iter().enumerate() {
            if let (Some(block), Some(transform)) = (block, self.initial[node]) {
                let chart = transform.to_chart();
                for k in 0..self.dof {
                    params[block * self.dof + k] = chart[k];
                }
            }
        }
        params
    }

    /// Current transform of `node`; fixed nodes keep their initial value.
    fn pose(&self, node: usize, params: &DVector<f64>) -> Sim3 {
        let initial = self.initial[node].unwrap_or_default();
        match self.blocks[node] {
            None => initial,
            Some(block) => {
                let mut chart = initial.to_chart();
                for k in 0..self.dof {
                    chart[k] = params[block * self.dof + k];
                }
                Sim3::from_chart(&chart)
            }
        }
    }

    fn edge_residual(&self, edge: &PoseGraphEdge, from: &Sim3, to: &Sim3) -> [f64; SIM3_DOF] {
        let error = edge.measurement.inverse().compose(&from.between(to));
        let sqrt_w = edge.weight.max(0.0).sqrt();
        let mut chart = error.to_chart();
        for v in chart.iter_mut() {
            *v *= sqrt_w;
        }
        chart
    }

    fn cost(&self, params: &DVector<f64>) -> f64 {
        self.edges
            .iter()
            .map(|edge| {
                let from = self.pose(edge.from.index(), params);
                let to = self.pose(edge.to.index(), params);
                let r = self.edge_residual(edge, &from, &to);
                r[..self.dof].iter().map(|v| v * v).sum::<f64>()
            })
            .sum()
    }

    /// Stacked residuals and central-difference Jacobian.
    fn linearize(&self, params: &DVector<f64>) -> (DVector<f64>, DMatrix<f64>) {
        let n_rows = self.edges.len() * self.dof;
        let mut residuals = DVector::zeros(n_rows);
        let mut jacobian = DMatrix::zeros(n_rows, params.len());

        for (e, edge) in self.edges.iter().enumerate() {
            let row = e * self.dof;
            let from_idx = edge.from.index();
            let to_idx = edge.to.index();

            let r0 = self.edge_residual(
                edge,
                &self.pose(from_idx, params),
                &self.pose(to_idx, params),
            );
            for k in 0..self.dof {
                residuals[row + k] = r0[k];
            }

            let nodes: &[usize] = if from_idx == to_idx {
                &[from_idx]
            } else {
                &[from_idx, to_idx]
            };
            for &node in nodes {
                let Some(block) = self.blocks[node] else {
                    continue;
                };
                for k in 0..self.dof {
                    let col = block * self.dof + k;
                    let mut plus = params.clone();
                    let mut minus = params.clone();
                    plus[col] += JACOBIAN_STEP;
                    minus[col] -= JACOBIAN_STEP;

                    let r_plus = self.edge_residual(
                        edge,
                        &self.pose(from_idx, &plus),
                        &self.pose(to_idx, &plus),
                    );
                    let r_minus = self.edge_residual(
                        edge,
                        &self.pose(from_idx, &minus),
                        &self.pose(to_idx, &minus),
                    );
                    for r in 0..self.dof {
                        jacobian[(row + r, col)] = (r_plus[r] - r_minus[r]) / (2.0 * JACOBIAN_STEP);
                    }
                }
            }
        }

        (residuals, jacobian)
    }

    fn extract(&self, params: &DVector<f64>) -> Vec<Option<Sim3>> {
        (0..self.initial.len())
            .map(|node| self.initial[node].map(|_| self.pose(node, params)))
            .collect()
    }
}
