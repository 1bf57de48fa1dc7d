//! # sluice-core: Irrigation Network Modeling Core
//!
//! Provides the fundamental data structures and graph-based network model for
//! gravity-fed irrigation analysis.
//!
//! ## Design Philosophy
//!
//! Networks are modeled as **directed trees** rooted at the reservoir where:
//! - **Nodes**: canal junctions, the reservoir source, and zone delivery points
//! - **Edges**: gates, each paired with the canal reach it feeds
//!
//! This graph-based approach enables:
//! - Fast topological queries (paths, downstream impact sets)
//! - Type-safe element access with newtype ids
//! - A single immutable topology shared read-only across solvers and planners
//!
//! Canals branch but never rejoin, so every non-source node has exactly one
//! inbound gate and the source-to-node path is unique.
//!
//! ## Core Data Structures
//!
//! - [`Network`] - the main network container (petgraph `DiGraph<Node, Gate>`)
//! - [`Node`] - junction/reservoir/delivery point with invert and storage area
//! - [`Gate`] - calibrated gate edge carrying its downstream [`Reach`]
//! - [`Zone`] / [`Plot`] - irrigation command areas and their cultivated plots
//! - Typed ids: [`NodeId`], [`GateId`], [`ZoneId`], [`PlotId`], [`TeamId`]
//!
//! Ids wrap the canonical string names used by field staff and the SCADA
//! mapping (`"M(0,2)"`, `"M(0,2)->Zone_2"`), so they round-trip through files
//! and audit records unchanged.
//!
//! ## Modules
//!
//! - [`diagnostics`] - validation and diagnostic reporting
//! - [`error`] - unified error taxonomy
//! - [`schedule`] - weekly schedules, operations, field teams, state machines
//! - [`units`] - unit-safe wrappers for hydraulic quantities

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub mod diagnostics;
pub mod error;
pub mod schedule;
pub mod units;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{SluiceError, SluiceResult};
pub use schedule::{
    ActualOutcome, FieldInstruction, FieldTeam, IsoWeek, OperationId, OperationKind,
    OperationStatus, ScheduleId, ScheduleMetrics, ScheduleStatus, ScheduledOperation, Waypoint,
    WeeklySchedule,
};
pub use units::{CubicMeters, CubicMetersPerSecond, Kilometers, Meters, Rai, SquareMeters};

/// Macro for string-backed id newtypes (`new` / `as_str` surface).
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }
    };
}

string_id!(
    /// Canal junction / reservoir / delivery node id, e.g. `"M(0,2)"`.
    NodeId
);
string_id!(
    /// Gate id in `upstream->downstream` form, e.g. `"M(0,2)->Zone_2"`.
    GateId
);
string_id!(
    /// Irrigation zone id, e.g. `"Zone_2"`.
    ZoneId
);
string_id!(
    /// Cultivated plot / section id.
    PlotId
);
string_id!(
    /// Field team code, e.g. `"TEAM-A"`.
    TeamId
);

/// Node classification, used for storage-area defaults when the topology
/// file omits `surface_area_m2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Reservoir with a fixed water level; exactly one per network.
    Source,
    /// Node on the main canal (larger storage, 5000 m2 default).
    MainCanal,
    /// Lateral or delivery node (1000 m2 default).
    Lateral,
}

impl NodeClass {
    /// Default storage surface area for the class.
    pub fn default_surface_area(self) -> SquareMeters {
        match self {
            NodeClass::Source => SquareMeters(f64::INFINITY),
            NodeClass::MainCanal => SquareMeters(5000.0),
            NodeClass::Lateral => SquareMeters(1000.0),
        }
    }
}

/// A canal junction, reservoir, or delivery point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub class: NodeClass,
    /// Canal bottom elevation (m MSL).
    pub invert_elevation_m: Meters,
    /// Free-surface storage area used in storage routing.
    pub surface_area_m2: SquareMeters,
}

impl Node {
    pub fn new(id: impl Into<String>, class: NodeClass, invert_m: f64) -> Self {
        Self {
            id: NodeId::new(id),
            class,
            invert_elevation_m: Meters(invert_m),
            surface_area_m2: class.default_surface_area(),
        }
    }

    /// Override the storage surface area.
    pub fn with_surface_area(mut self, area_m2: f64) -> Self {
        self.surface_area_m2 = SquareMeters(area_m2);
        self
    }

    pub fn is_source(&self) -> bool {
        self.class == NodeClass::Source
    }
}

/// Structural gate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    Sluice,
    Radial,
    Overshot,
    Undershot,
}

/// Calibration of the discharge-coefficient curve `Cs = K1 * (Hs/Go)^K2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCalibration {
    pub k1: f64,
    pub k2: f64,
    /// Valid `Hs/Go` interval of the calibration tests.
    pub hs_go_min: f64,
    pub hs_go_max: f64,
}

impl Default for GateCalibration {
    fn default() -> Self {
        // Field-average sluice calibration, used when a gate has never been
        // flow-tested.
        Self {
            k1: 0.8,
            k2: -0.15,
            hs_go_min: 0.1,
            hs_go_max: 3.0,
        }
    }
}

/// Trapezoidal canal reach immediately downstream of a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reach {
    pub length_m: Meters,
    pub bottom_width_m: Meters,
    /// Side slope m (horizontal run per unit rise).
    pub side_slope: f64,
    pub manning_n: f64,
    pub bed_slope: f64,
}

impl Reach {
    pub fn new(length_m: f64, bottom_width_m: f64, side_slope: f64, manning_n: f64, bed_slope: f64) -> Self {
        Self {
            length_m: Meters(length_m),
            bottom_width_m: Meters(bottom_width_m),
            side_slope,
            manning_n,
            bed_slope,
        }
    }
}

/// A gate edge between two nodes, carrying its downstream canal reach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    pub id: GateId,
    pub upstream: NodeId,
    pub downstream: NodeId,
    pub gate_type: GateType,
    pub width_m: Meters,
    pub max_opening_m: Meters,
    pub min_opening_m: Meters,
    /// Sill elevation (m MSL); defaults to the upstream node invert.
    pub sill_elevation_m: Meters,
    pub max_flow_m3s: CubicMetersPerSecond,
    pub calibration: GateCalibration,
    pub reach: Reach,
    /// SCADA point id when the gate is remotely actuated.
    pub scada_id: Option<String>,
    /// Field coordinates for travel planning.
    pub latitude: f64,
    pub longitude: f64,
}

impl Gate {
    /// Build a gate with default calibration and a nominal reach; callers
    /// refine with the `with_*` methods.
    pub fn new(upstream: impl Into<String>, downstream: impl Into<String>) -> Self {
        let upstream = NodeId::new(upstream);
        let downstream = NodeId::new(downstream);
        let id = GateId::new(format!("{}->{}", upstream, downstream));
        Self {
            id,
            upstream,
            downstream,
            gate_type: GateType::Sluice,
            width_m: Meters(3.0),
            max_opening_m: Meters(2.5),
            min_opening_m: Meters(0.0),
            sill_elevation_m: Meters(0.0),
            max_flow_m3s: CubicMetersPerSecond(5.0),
            calibration: GateCalibration::default(),
            reach: Reach::new(1000.0, 4.0, 1.5, 0.025, 0.0002),
            scada_id: None,
            latitude: 0.0,
            longitude: 0.0,
        }
    }

    pub fn with_type(mut self, gate_type: GateType) -> Self {
        self.gate_type = gate_type;
        self
    }

    pub fn with_width(mut self, width_m: f64) -> Self {
        self.width_m = Meters(width_m);
        self
    }

    pub fn with_openings(mut self, min_m: f64, max_m: f64) -> Self {
        self.min_opening_m = Meters(min_m);
        self.max_opening_m = Meters(max_m);
        self
    }

    pub fn with_sill(mut self, sill_m: f64) -> Self {
        self.sill_elevation_m = Meters(sill_m);
        self
    }

    pub fn with_max_flow(mut self, q_max_m3s: f64) -> Self {
        self.max_flow_m3s = CubicMetersPerSecond(q_max_m3s);
        self
    }

    pub fn with_calibration(mut self, calibration: GateCalibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_reach(mut self, reach: Reach) -> Self {
        self.reach = reach;
        self
    }

    pub fn with_scada_id(mut self, scada_id: impl Into<String>) -> Self {
        self.scada_id = Some(scada_id.into());
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }
}

/// Demand priority of a plot for the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Numeric weight used in volume-weighted aggregation.
    pub fn weight(self) -> f64 {
        match self {
            Priority::Critical => 9.0,
            Priority::High => 7.0,
            Priority::Medium => 5.0,
            Priority::Low => 3.0,
        }
    }
}

/// Active crop record on a plot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropRecord {
    pub crop_type: String,
    pub planting_date: chrono::NaiveDate,
    /// Weekly crop coefficient.
    pub kc: f64,
}

/// A cultivated plot (section) inside a zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plot {
    pub id: PlotId,
    pub zone_id: ZoneId,
    pub area_rai: Rai,
    pub crop: Option<CropRecord>,
    /// Gate this plot draws from.
    pub delivery_gate: GateId,
}

/// An irrigation command zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub plots: Vec<PlotId>,
    pub delivery_gates: Vec<GateId>,
    /// Geospatial centroid (lat, lon).
    pub centroid: (f64, f64),
}

/// The core irrigation network graph.
///
/// Loaded once from the topology file and immutable at runtime; calibration
/// parameters are the only fields mutated afterwards (via
/// [`Network::recalibrate_gate`]).
#[derive(Debug, Default)]
pub struct Network {
    pub graph: DiGraph<Node, Gate>,
    node_index: HashMap<NodeId, NodeIndex>,
    gate_index: HashMap<GateId, EdgeIndex>,
    source: Option<NodeIndex>,
    pub zones: BTreeMap<ZoneId, Zone>,
    pub plots: BTreeMap<PlotId, Plot>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; the first `Source`-class node becomes the network root.
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        let id = node.id.clone();
        let is_source = node.is_source();
        let idx = self.graph.add_node(node);
        if is_source && self.source.is_none() {
            self.source = Some(idx);
        }
        self.node_index.insert(id, idx);
        idx
    }

    /// Add a gate edge. Both endpoints must exist and be distinct.
    pub fn add_gate(&mut self, gate: Gate) -> SluiceResult<EdgeIndex> {
        let up = self.node_idx(&gate.upstream)?;
        let down = self.node_idx(&gate.downstream)?;
        if up == down {
            return Err(SluiceError::Validation(format!(
                "gate {} connects node {} to itself",
                gate.id, gate.upstream
            )));
        }
        let id = gate.id.clone();
        let edge = self.graph.add_edge(up, down, gate);
        self.gate_index.insert(id, edge);
        Ok(edge)
    }

    pub fn add_zone(&mut self, zone: Zone) {
        self.zones.insert(zone.id.clone(), zone);
    }

    pub fn add_plot(&mut self, plot: Plot) {
        if let Some(zone) = self.zones.get_mut(&plot.zone_id) {
            if !zone.plots.contains(&plot.id) {
                zone.plots.push(plot.id.clone());
            }
        }
        self.plots.insert(plot.id.clone(), plot);
    }

    pub fn node_idx(&self, id: &NodeId) -> SluiceResult<NodeIndex> {
        self.node_index
            .get(id)
            .copied()
            .ok_or_else(|| SluiceError::not_found("node", id.as_str()))
    }

    pub fn gate_idx(&self, id: &GateId) -> SluiceResult<EdgeIndex> {
        self.gate_index
            .get(id)
            .copied()
            .ok_or_else(|| SluiceError::not_found("gate", id.as_str()))
    }

    pub fn node(&self, id: &NodeId) -> SluiceResult<&Node> {
        Ok(&self.graph[self.node_idx(id)?])
    }

    pub fn gate(&self, id: &GateId) -> SluiceResult<&Gate> {
        Ok(&self.graph[self.gate_idx(id)?])
    }

    /// The reservoir node, if one was added.
    pub fn source(&self) -> Option<&Node> {
        self.source.map(|idx| &self.graph[idx])
    }

    pub fn source_idx(&self) -> Option<NodeIndex> {
        self.source
    }

    /// Replace a gate's calibration (the one runtime mutation the model
    /// permits).
    pub fn recalibrate_gate(&mut self, id: &GateId, calibration: GateCalibration) -> SluiceResult<()> {
        let edge = self.gate_idx(id)?;
        self.graph[edge].calibration = calibration;
        Ok(())
    }

    /// Iterate all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Iterate all gates.
    pub fn gates(&self) -> impl Iterator<Item = &Gate> {
        self.graph.edge_weights()
    }

    /// Gates leaving a node (downstream direction).
    pub fn gates_out_of(&self, id: &NodeId) -> SluiceResult<Vec<&Gate>> {
        let idx = self.node_idx(id)?;
        Ok(self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.weight())
            .collect())
    }

    /// The single gate feeding a node, if any (trees have at most one).
    pub fn gate_into(&self, id: &NodeId) -> SluiceResult<Option<&Gate>> {
        let idx = self.node_idx(id)?;
        Ok(self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| e.weight())
            .next())
    }

    /// Every gate strictly below `gate` in the tree.
    pub fn downstream_gates(&self, id: &GateId) -> SluiceResult<Vec<GateId>> {
        let edge = self.gate_idx(id)?;
        let (_, down) = self
            .graph
            .edge_endpoints(edge)
            .expect("edge index from gate_index is valid");
        let mut result = Vec::new();
        let mut stack = vec![down];
        while let Some(node) = stack.pop() {
            for e in self.graph.edges_directed(node, Direction::Outgoing) {
                result.push(e.weight().id.clone());
                stack.push(e.target());
            }
        }
        result.sort();
        Ok(result)
    }

    /// Delivery gates serving a zone.
    pub fn zone_delivery_gates(&self, zone: &ZoneId) -> SluiceResult<&[GateId]> {
        self.zones
            .get(zone)
            .map(|z| z.delivery_gates.as_slice())
            .ok_or_else(|| SluiceError::not_found("zone", zone.as_str()))
    }

    /// Compute basic statistics about the network.
    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats {
            num_nodes: self.graph.node_count(),
            num_gates: self.graph.edge_count(),
            num_zones: self.zones.len(),
            num_plots: self.plots.len(),
            ..NetworkStats::default()
        };
        for gate in self.gates() {
            stats.total_gate_capacity_m3s += gate.max_flow_m3s.value();
        }
        for plot in self.plots.values() {
            stats.total_area_rai += plot.area_rai.value();
        }
        stats
    }

    /// Validate topology and calibration for issues that break the solvers.
    ///
    /// Populates `diag` with warnings/errors; fatal structural problems are
    /// errors (the process must not start serving on top of them).
    pub fn validate_into(&self, diag: &mut Diagnostics) {
        if self.graph.node_count() == 0 {
            diag.add_error("structure", "network has no nodes");
            return;
        }
        let source = match self.source {
            Some(idx) => idx,
            None => {
                diag.add_error("structure", "network has no source reservoir");
                return;
            }
        };
        let extra_sources = self
            .nodes()
            .filter(|n| n.is_source())
            .count();
        if extra_sources > 1 {
            diag.add_error(
                "structure",
                &format!("network has {} source nodes, expected exactly one", extra_sources),
            );
        }

        // Tree shape: every non-source node has exactly one inbound gate and
        // is reachable from the source.
        let mut reached = 0usize;
        let mut stack = vec![source];
        let mut seen = vec![false; self.graph.node_count()];
        while let Some(node) = stack.pop() {
            if seen[node.index()] {
                diag.add_error_with_entity(
                    "structure",
                    "node reachable by more than one route from the source",
                    self.graph[node].id.as_str(),
                );
                continue;
            }
            seen[node.index()] = true;
            reached += 1;
            for e in self.graph.edges_directed(node, Direction::Outgoing) {
                stack.push(e.target());
            }
        }
        if reached != self.graph.node_count() {
            diag.add_error(
                "structure",
                &format!(
                    "{} of {} nodes are unreachable from the source",
                    self.graph.node_count() - reached,
                    self.graph.node_count()
                ),
            );
        }
        for idx in self.graph.node_indices() {
            let inbound = self
                .graph
                .edges_directed(idx, Direction::Incoming)
                .count();
            let node = &self.graph[idx];
            if node.is_source() && inbound > 0 {
                diag.add_error_with_entity("structure", "source has an inbound gate", node.id.as_str());
            }
            if !node.is_source() && inbound != 1 {
                diag.add_error_with_entity(
                    "structure",
                    &format!("node has {} inbound gates, expected 1 (canals do not rejoin)", inbound),
                    node.id.as_str(),
                );
            }
        }

        for gate in self.gates() {
            let cal = &gate.calibration;
            if cal.k1 <= 0.0 {
                diag.add_error_with_entity("calibration", "K1 must be positive", gate.id.as_str());
            }
            if !(-1.0..=0.0).contains(&cal.k2) {
                diag.add_error_with_entity("calibration", "K2 must lie in [-1, 0]", gate.id.as_str());
            }
            if gate.width_m.value() <= 0.0 {
                diag.add_error_with_entity("geometry", "gate width must be positive", gate.id.as_str());
            }
            if gate.max_opening_m.value() <= 0.0 || gate.max_opening_m.value() > 5.0 {
                diag.add_error_with_entity(
                    "geometry",
                    "max opening must lie in (0, 5] m",
                    gate.id.as_str(),
                );
            }
            if gate.reach.length_m.value() <= 0.0
                || gate.reach.bottom_width_m.value() <= 0.0
                || gate.reach.bed_slope <= 0.0
            {
                diag.add_error_with_entity(
                    "geometry",
                    "reach length, width, and bed slope must be positive",
                    gate.id.as_str(),
                );
            }
        }

        for zone in self.zones.values() {
            for gate in &zone.delivery_gates {
                if !self.gate_index.contains_key(gate) {
                    diag.add_error_with_entity(
                        "reference",
                        &format!("zone references unknown delivery gate {}", gate),
                        zone.id.as_str(),
                    );
                }
            }
        }
        for plot in self.plots.values() {
            if !self.zones.contains_key(&plot.zone_id) {
                diag.add_error_with_entity(
                    "reference",
                    &format!("plot references unknown zone {}", plot.zone_id),
                    plot.id.as_str(),
                );
            }
        }
    }
}

/// Statistics about a network's size and capacity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkStats {
    pub num_nodes: usize,
    pub num_gates: usize,
    pub num_zones: usize,
    pub num_plots: usize,
    pub total_gate_capacity_m3s: f64,
    pub total_area_rai: f64,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} nodes, {} gates ({:.0} m3/s), {} zones, {} plots ({:.0} rai)",
            self.num_nodes,
            self.num_gates,
            self.total_gate_capacity_m3s,
            self.num_zones,
            self.num_plots,
            self.total_area_rai
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_network() -> Network {
        let mut network = Network::new();
        network.add_node(Node::new("Source", NodeClass::Source, 221.0));
        network.add_node(Node::new("M(0,0)", NodeClass::MainCanal, 218.0));
        network
            .add_gate(Gate::new("Source", "M(0,0)").with_sill(218.0))
            .unwrap();
        network
    }

    #[test]
    fn test_network_creation() {
        let network = two_node_network();
        assert_eq!(network.graph.node_count(), 2);
        assert_eq!(network.graph.edge_count(), 1);
        assert_eq!(network.source().unwrap().id.as_str(), "Source");

        let gate = network.gate(&GateId::new("Source->M(0,0)")).unwrap();
        assert_eq!(gate.upstream.as_str(), "Source");
        assert_eq!(gate.downstream.as_str(), "M(0,0)");
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut network = Network::new();
        network.add_node(Node::new("Source", NodeClass::Source, 221.0));
        let err = network.add_gate(Gate::new("Source", "Source")).unwrap_err();
        assert!(matches!(err, SluiceError::Validation(_)));
    }

    #[test]
    fn test_validation_no_source() {
        let mut network = Network::new();
        network.add_node(Node::new("M(0,0)", NodeClass::MainCanal, 218.0));
        let mut diag = Diagnostics::new();
        network.validate_into(&mut diag);
        assert!(diag.has_errors());
        assert!(diag.errors().any(|i| i.message.contains("no source")));
    }

    #[test]
    fn test_validation_rejoining_canal() {
        let mut network = Network::new();
        network.add_node(Node::new("Source", NodeClass::Source, 221.0));
        network.add_node(Node::new("A", NodeClass::MainCanal, 218.0));
        network.add_node(Node::new("B", NodeClass::MainCanal, 217.0));
        network.add_gate(Gate::new("Source", "A")).unwrap();
        network.add_gate(Gate::new("Source", "B")).unwrap();
        network.add_gate(Gate::new("A", "B")).unwrap();

        let mut diag = Diagnostics::new();
        network.validate_into(&mut diag);
        assert!(diag.has_errors());
        assert!(diag
            .errors()
            .any(|i| i.message.contains("inbound gates")));
    }

    #[test]
    fn test_validation_bad_calibration() {
        let mut network = two_node_network();
        network
            .recalibrate_gate(
                &GateId::new("Source->M(0,0)"),
                GateCalibration {
                    k1: -0.5,
                    k2: 0.4,
                    hs_go_min: 0.2,
                    hs_go_max: 2.0,
                },
            )
            .unwrap();
        let mut diag = Diagnostics::new();
        network.validate_into(&mut diag);
        assert!(diag.errors().any(|i| i.message.contains("K1")));
        assert!(diag.errors().any(|i| i.message.contains("K2")));
    }

    #[test]
    fn test_downstream_gates() {
        let mut network = Network::new();
        network.add_node(Node::new("Source", NodeClass::Source, 221.0));
        network.add_node(Node::new("M(0,0)", NodeClass::MainCanal, 218.0));
        network.add_node(Node::new("M(0,2)", NodeClass::MainCanal, 217.9));
        network.add_node(Node::new("Zone_2", NodeClass::Lateral, 217.0));
        network.add_gate(Gate::new("Source", "M(0,0)")).unwrap();
        network.add_gate(Gate::new("M(0,0)", "M(0,2)")).unwrap();
        network.add_gate(Gate::new("M(0,2)", "Zone_2")).unwrap();

        let below = network
            .downstream_gates(&GateId::new("Source->M(0,0)"))
            .unwrap();
        assert_eq!(below.len(), 2);
        assert!(below.contains(&GateId::new("M(0,2)->Zone_2")));

        let leaf = network
            .downstream_gates(&GateId::new("M(0,2)->Zone_2"))
            .unwrap();
        assert!(leaf.is_empty());
    }

    #[test]
    fn test_stats() {
        let mut network = two_node_network();
        network.add_zone(Zone {
            id: ZoneId::new("Zone_1"),
            plots: vec![],
            delivery_gates: vec![GateId::new("Source->M(0,0)")],
            centroid: (14.3, 101.1),
        });
        network.add_plot(Plot {
            id: PlotId::new("P-001"),
            zone_id: ZoneId::new("Zone_1"),
            area_rai: Rai(640.0),
            crop: None,
            delivery_gate: GateId::new("Source->M(0,0)"),
        });

        let stats = network.stats();
        assert_eq!(stats.num_nodes, 2);
        assert_eq!(stats.num_gates, 1);
        assert_eq!(stats.num_zones, 1);
        assert_eq!(stats.num_plots, 1);
        assert!((stats.total_area_rai - 640.0).abs() < 1e-9);
        assert_eq!(network.zones[&ZoneId::new("Zone_1")].plots.len(), 1);
    }

    #[test]
    fn test_priority_weights() {
        assert_eq!(Priority::Critical.weight(), 9.0);
        assert_eq!(Priority::High.weight(), 7.0);
        assert_eq!(Priority::Medium.weight(), 5.0);
        assert_eq!(Priority::Low.weight(), 3.0);
    }
}
