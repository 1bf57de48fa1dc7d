//! Steady-state fixed-point solver for the coupled level/flow system.
//!
//! ## Forward solve
//!
//! State is the water level at every node plus the flow through every gate;
//! gate openings and the reservoir level are boundary conditions. Each
//! iteration:
//!
//! 1. recomputes every gate flow from the current levels, limited by the
//!    gate's rated `max_flow_m3s`,
//! 2. storage-routes each junction: `level += ω · I · Δt / A` with imbalance
//!    `I = Σinflow − Σoutflow`, depth clamped to [0.1, 5] m,
//! 3. sets tailwater at each flowing delivery offtake: the leaf level blends
//!    halfway toward `level[u] − h_f` for the reach feeding it.
//!
//! Convergence is `max |Δlevel| < 1 mm`, capped at 100 iterations.
//!
//! Division of labor between steps 2 and 3: storage routing alone owns
//! junction levels (continuity holds there at the fixed point), while the
//! Manning head-loss relation owns the tailwater depth at leaf offtakes,
//! which have no outflow gates and drain to the fields.
//!
//! ## Inverse solve
//!
//! [`OpeningOptimizer`] tunes openings to hit target deliveries: up to 20
//! outer iterations, scaling every gate on a target's source path by
//! `1 ± α·min(1, |e|/Q_target)` with α = 0.3, keeping the best opening
//! vector seen.
//!
//! Neither mode errors on physical impossibility; results carry a
//! convergence report and warnings.

use crate::canal;
use crate::gate_flow::gate_flow;
use crate::router;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use sluice_core::{GateId, Network, NodeId, SluiceError, SluiceResult};
use std::collections::HashMap;

/// Gate opening vector in meters, keyed by gate id. Missing gates are closed.
pub type GateOpenings = HashMap<GateId, f64>;

/// Fixed-point solver configuration.
#[derive(Debug, Clone)]
pub struct HydraulicSolver {
    /// Convergence tolerance on level changes (m).
    pub tolerance_m: f64,
    /// Iteration cap.
    pub max_iterations: usize,
    /// Under-relaxation factor for storage routing.
    pub relaxation: f64,
    /// Storage-routing pseudo time step (s).
    pub timestep_s: f64,
    /// Weight of the energy-line ceiling when it binds.
    pub head_loss_blend: f64,
    /// Minimum water depth over the invert (m).
    pub min_depth_m: f64,
    /// Maximum water depth over the invert (m).
    pub max_depth_m: f64,
}

impl Default for HydraulicSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HydraulicSolver {
    pub fn new() -> Self {
        Self {
            tolerance_m: 1e-3,
            max_iterations: 100,
            relaxation: 0.7,
            timestep_s: 60.0,
            head_loss_blend: 0.5,
            min_depth_m: 0.1,
            max_depth_m: 5.0,
        }
    }

    pub fn with_tolerance(mut self, tolerance_m: f64) -> Self {
        self.tolerance_m = tolerance_m;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_relaxation(mut self, relaxation: f64) -> Self {
        self.relaxation = relaxation;
        self
    }

    pub fn with_head_loss_blend(mut self, blend: f64) -> Self {
        self.head_loss_blend = blend;
        self
    }

    /// Solve from default initial conditions (1 m depth everywhere, reservoir
    /// at its fixed level).
    pub fn solve(&self, network: &Network, openings: &GateOpenings) -> SluiceResult<Convergence> {
        self.solve_from(network, openings, None)
    }

    /// Solve with explicit initial levels for nodes that have them (warm
    /// start); remaining nodes get the defaults. The source level is pinned
    /// to the reservoir level regardless.
    pub fn solve_from(
        &self,
        network: &Network,
        openings: &GateOpenings,
        initial_levels: Option<&HashMap<NodeId, f64>>,
    ) -> SluiceResult<Convergence> {
        for gate_id in openings.keys() {
            network.gate(gate_id)?;
        }
        let source = network
            .source_idx()
            .ok_or_else(|| SluiceError::Validation("network has no source".to_string()))?;

        let node_count = network.graph.node_count();
        let mut levels = vec![0.0_f64; node_count];
        let mut is_leaf = vec![false; node_count];
        for idx in network.graph.node_indices() {
            let node = &network.graph[idx];
            let default_level = if idx == source {
                node.invert_elevation_m.value()
            } else {
                node.invert_elevation_m.value() + 1.0
            };
            levels[idx.index()] = match initial_levels.and_then(|m| m.get(&node.id)) {
                Some(&level) if idx != source => level,
                _ => default_level,
            };
            is_leaf[idx.index()] = network
                .graph
                .edges_directed(idx, Direction::Outgoing)
                .next()
                .is_none();
        }

        // Gate working set: (edge handle, endpoints, opening).
        struct Link {
            gate_pos: usize,
            edge: petgraph::graph::EdgeIndex,
            up: usize,
            down: usize,
            opening: f64,
        }
        let mut links = Vec::with_capacity(network.graph.edge_count());
        let mut gate_ids = Vec::with_capacity(network.graph.edge_count());
        for edge in network.graph.edge_references() {
            let gate = edge.weight();
            links.push(Link {
                gate_pos: gate_ids.len(),
                edge: edge.id(),
                up: edge.source().index(),
                down: edge.target().index(),
                opening: openings.get(&gate.id).copied().unwrap_or(0.0),
            });
            gate_ids.push(gate.id.clone());
        }

        let mut flows = vec![0.0_f64; links.len()];
        let mut converged = false;
        let mut iterations = 0;
        let mut best_error = f64::INFINITY;

        while iterations < self.max_iterations {
            iterations += 1;
            let prev = levels.clone();

            // Step 1: gate flows at current levels, capped at the rating.
            for link in &links {
                let gate = &network.graph[link.edge];
                flows[link.gate_pos] =
                    gate_flow(gate, levels[link.up], levels[link.down], link.opening)
                        .flow_m3s
                        .min(gate.max_flow_m3s.value());
            }

            // Step 2: storage routing at junctions. Leaves deliver their
            // inflow to the fields, the source supplies whatever is drawn.
            for idx in network.graph.node_indices() {
                let i = idx.index();
                if idx == source || is_leaf[i] {
                    continue;
                }
                let mut imbalance = 0.0;
                for link in &links {
                    if link.down == i {
                        imbalance += flows[link.gate_pos];
                    } else if link.up == i {
                        imbalance -= flows[link.gate_pos];
                    }
                }
                let node = &network.graph[idx];
                let dh = imbalance * self.timestep_s / node.surface_area_m2.value();
                let invert = node.invert_elevation_m.value();
                levels[i] = (levels[i] + self.relaxation * dh)
                    .clamp(invert + self.min_depth_m, invert + self.max_depth_m);
            }

            // Step 3: tailwater at flowing leaf offtakes from reach head
            // loss.
            for link in &links {
                let flow = flows[link.gate_pos];
                if flow <= 0.0 || !is_leaf[link.down] {
                    continue;
                }
                let gate = &network.graph[link.edge];
                let h_f = canal::head_loss(&gate.reach, flow);
                let backwater = levels[link.up] - h_f;
                let node = &network.graph[petgraph::graph::NodeIndex::new(link.down)];
                let invert = node.invert_elevation_m.value();
                let blended = (1.0 - self.head_loss_blend) * levels[link.down]
                    + self.head_loss_blend * backwater;
                levels[link.down] =
                    blended.clamp(invert + self.min_depth_m, invert + self.max_depth_m);
            }

            let mut max_change = 0.0_f64;
            for idx in network.graph.node_indices() {
                if idx == source {
                    continue;
                }
                max_change = max_change.max((levels[idx.index()] - prev[idx.index()]).abs());
            }
            best_error = best_error.min(max_change);
            if max_change < self.tolerance_m {
                converged = true;
                break;
            }
        }

        // Final flows at the settled levels.
        for link in &links {
            let gate = &network.graph[link.edge];
            flows[link.gate_pos] = gate_flow(gate, levels[link.up], levels[link.down], link.opening)
                .flow_m3s
                .min(gate.max_flow_m3s.value());
        }

        let mut warnings = Vec::new();
        if !converged {
            warnings.push(format!(
                "did not converge after {} iterations (best level change {:.4} m)",
                iterations, best_error
            ));
        }

        let mut node_levels = HashMap::new();
        let mut deliveries = HashMap::new();
        let mut max_imbalance = 0.0_f64;
        for idx in network.graph.node_indices() {
            let i = idx.index();
            let node = &network.graph[idx];
            node_levels.insert(node.id.clone(), levels[i]);

            let depth = levels[i] - node.invert_elevation_m.value();
            if idx != source && depth <= self.min_depth_m + 1e-9 {
                warnings.push(format!(
                    "node {} is nearly dry (depth {:.2} m)",
                    node.id, depth
                ));
            }

            if idx == source {
                continue;
            }
            let inflow: f64 = links
                .iter()
                .filter(|l| l.down == i)
                .map(|l| flows[l.gate_pos])
                .sum();
            let outflow: f64 = links
                .iter()
                .filter(|l| l.up == i)
                .map(|l| flows[l.gate_pos])
                .sum();
            if is_leaf[i] {
                deliveries.insert(node.id.clone(), inflow);
            } else {
                max_imbalance = max_imbalance.max((inflow - outflow).abs());
            }
        }

        let gate_flows = gate_ids
            .into_iter()
            .zip(flows.iter().copied())
            .collect::<HashMap<_, _>>();

        Ok(Convergence {
            converged,
            iterations,
            max_error_m: best_error,
            max_imbalance_m3s: max_imbalance,
            node_levels,
            gate_flows,
            deliveries,
            warnings,
        })
    }
}

/// Result of a forward solve.
#[derive(Debug, Clone, Serialize)]
pub struct Convergence {
    pub converged: bool,
    pub iterations: usize,
    /// Best (smallest) max-level-change seen; non-increasing over iterations.
    pub max_error_m: f64,
    /// Largest continuity residual at any junction, for the final state.
    pub max_imbalance_m3s: f64,
    pub node_levels: HashMap<NodeId, f64>,
    pub gate_flows: HashMap<GateId, f64>,
    /// Flow leaving the network at each delivery (leaf) node.
    pub deliveries: HashMap<NodeId, f64>,
    pub warnings: Vec<String>,
}

impl Convergence {
    /// Total inflow into a node under the final state.
    pub fn inflow(&self, network: &Network, node: &NodeId) -> SluiceResult<f64> {
        let mut total = 0.0;
        if let Some(gate) = network.gate_into(node)? {
            total += self.gate_flows.get(&gate.id).copied().unwrap_or(0.0);
        }
        Ok(total)
    }
}

/// Inverse-mode configuration: tune openings to hit target deliveries.
#[derive(Debug, Clone)]
pub struct OpeningOptimizer {
    pub max_iterations: usize,
    pub adjustment_factor: f64,
    pub target_tolerance_m3s: f64,
    /// Opening given to path gates that start closed.
    pub initial_opening_m: f64,
    pub solver: HydraulicSolver,
}

impl Default for OpeningOptimizer {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            adjustment_factor: 0.3,
            target_tolerance_m3s: 0.1,
            initial_opening_m: 0.1,
            solver: HydraulicSolver::new(),
        }
    }
}

/// Result of the inverse solve.
#[derive(Debug, Clone, Serialize)]
pub struct OpeningOptimization {
    pub openings: GateOpenings,
    pub achieved: HashMap<NodeId, f64>,
    pub total_error_m3s: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Forward solution under the best opening vector.
    pub solution: Convergence,
}

impl OpeningOptimizer {
    /// Optimize gate openings so each target node receives its target inflow
    /// (m3/s). Keeps the best opening vector seen across iterations.
    pub fn optimize(
        &self,
        network: &Network,
        targets: &HashMap<NodeId, f64>,
    ) -> SluiceResult<OpeningOptimization> {
        if targets.is_empty() {
            return Err(SluiceError::InvalidInput(
                "no target deliveries given".to_string(),
            ));
        }
        let source = network
            .source()
            .ok_or_else(|| SluiceError::Validation("network has no source".to_string()))?
            .id
            .clone();

        // Gates on each target's supply path.
        let mut path_gates: HashMap<NodeId, Vec<GateId>> = HashMap::new();
        for (node, &target) in targets {
            if target <= 0.0 {
                return Err(SluiceError::InvalidInput(format!(
                    "target delivery for {} must be positive, got {:.3}",
                    node, target
                )));
            }
            let path = router::shortest_path(network, &source, node)?.ok_or_else(|| {
                SluiceError::Infeasible(format!("no supply path from {} to {}", source, node))
            })?;
            path_gates.insert(node.clone(), router::path_gates(network, &path)?);
        }

        let mut openings = GateOpenings::new();
        for gates in path_gates.values() {
            for gate in gates {
                let entry = openings.entry(gate.clone()).or_insert(0.0);
                *entry = entry.max(self.initial_opening_m);
            }
        }

        let mut best_openings = openings.clone();
        let mut best_error = f64::INFINITY;
        let mut iterations = 0;

        for _ in 0..self.max_iterations {
            iterations += 1;
            let solution = self.solver.solve(network, &openings)?;

            let mut total_error = 0.0;
            let mut corrections: Vec<(&NodeId, f64)> = Vec::new();
            for (node, &target) in targets {
                let actual = solution.inflow(network, node)?;
                let error = target - actual;
                total_error += error.abs();
                if error.abs() > self.target_tolerance_m3s {
                    corrections.push((node, error));
                }
            }

            if total_error < best_error {
                best_error = total_error;
                best_openings = openings.clone();
            }
            if total_error < self.target_tolerance_m3s {
                break;
            }

            for (node, error) in corrections {
                let target = targets[node];
                let scale = 1.0
                    + error.signum()
                        * self.adjustment_factor
                        * (error.abs() / target).min(1.0);
                for gate_id in &path_gates[node] {
                    let gate = network.gate(gate_id)?;
                    let opening = openings.get_mut(gate_id).expect("path gates initialized");
                    *opening = (*opening * scale).clamp(0.0, gate.max_opening_m.value());
                }
            }
        }

        let solution = self.solver.solve(network, &best_openings)?;
        let mut achieved = HashMap::new();
        for node in targets.keys() {
            achieved.insert(node.clone(), solution.inflow(network, node)?);
        }

        Ok(OpeningOptimization {
            openings: best_openings,
            achieved,
            total_error_m3s: best_error,
            iterations,
            converged: best_error < self.target_tolerance_m3s,
            solution,
        })
    }
}
