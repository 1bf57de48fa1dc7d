//! Declarative topology file format and loader.
//!
//! Defaults applied while building the network:
//! - node class: explicit, or inferred (`M(0,*` ids are main-canal, all
//!   others lateral)
//! - surface area: 5000 m2 for main-canal nodes, 1000 m2 elsewhere
//! - gate sill elevation: the parent (upstream) node invert
//! - reach geometry: nominal trapezoidal section when omitted
//!
//! Loading fails with [`SluiceError::Validation`] when the validated network
//! carries any error-severity diagnostic (broken tree shape, bad calibration,
//! non-positive geometry). Fatal-invariant problems surface here, at startup,
//! never in a request path.

use serde::{Deserialize, Serialize};
use sluice_core::{
    CropRecord, Diagnostics, Gate, GateCalibration, GateId, GateType, Network, Node, NodeClass,
    NodeId, Plot, PlotId, Rai, Reach, SluiceError, SluiceResult, Zone, ZoneId,
};
use std::path::Path;

/// Root of the topology document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyFile {
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<NodeSpec>,
    pub gates: Vec<GateSpec>,
    #[serde(default)]
    pub zones: Vec<ZoneSpec>,
    #[serde(default)]
    pub plots: Vec<PlotSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(default)]
    pub class: Option<NodeClass>,
    pub invert_elevation_m: f64,
    #[serde(default)]
    pub surface_area_m2: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSpec {
    pub upstream: String,
    pub downstream: String,
    #[serde(default = "default_gate_type", rename = "type")]
    pub gate_type: GateType,
    pub width_m: f64,
    pub max_opening_m: f64,
    #[serde(default)]
    pub min_opening_m: f64,
    #[serde(default)]
    pub sill_elevation_m: Option<f64>,
    pub max_flow_m3s: f64,
    pub k1: f64,
    pub k2: f64,
    #[serde(default = "default_hs_go_min")]
    pub hs_go_min: f64,
    #[serde(default = "default_hs_go_max")]
    pub hs_go_max: f64,
    #[serde(default)]
    pub scada_id: Option<String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub reach: Option<ReachSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachSpec {
    pub length_m: f64,
    pub bottom_width_m: f64,
    pub side_slope: f64,
    pub manning_n: f64,
    pub bed_slope: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub id: String,
    pub delivery_gates: Vec<String>,
    #[serde(default)]
    pub centroid: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotSpec {
    pub id: String,
    pub zone: String,
    pub area_rai: f64,
    pub delivery_gate: String,
    #[serde(default)]
    pub crop: Option<CropRecord>,
}

fn default_gate_type() -> GateType {
    GateType::Sluice
}

fn default_hs_go_min() -> f64 {
    0.1
}

fn default_hs_go_max() -> f64 {
    3.0
}

fn infer_class(id: &str) -> NodeClass {
    if id.starts_with("M(0,") {
        NodeClass::MainCanal
    } else {
        NodeClass::Lateral
    }
}

/// Build a validated [`Network`] from a parsed topology document.
pub fn build_network(file: &TopologyFile, diag: &mut Diagnostics) -> SluiceResult<Network> {
    let mut network = Network::new();

    for spec in &file.nodes {
        let class = spec.class.unwrap_or_else(|| infer_class(&spec.id));
        let mut node = Node::new(spec.id.clone(), class, spec.invert_elevation_m);
        if let Some(area) = spec.surface_area_m2 {
            node = node.with_surface_area(area);
        }
        network.add_node(node);
    }

    for spec in &file.gates {
        let upstream = NodeId::new(spec.upstream.clone());
        // Sill defaults to the parent invert.
        let sill = match spec.sill_elevation_m {
            Some(s) => s,
            None => network.node(&upstream)?.invert_elevation_m.value(),
        };
        let reach = match &spec.reach {
            Some(r) => Reach::new(
                r.length_m,
                r.bottom_width_m,
                r.side_slope,
                r.manning_n,
                r.bed_slope,
            ),
            None => {
                diag.add_warning_with_entity(
                    "geometry",
                    "reach geometry omitted, nominal section assumed",
                    &format!("{}->{}", spec.upstream, spec.downstream),
                );
                Reach::new(1000.0, 4.0, 1.5, 0.025, 0.0002)
            }
        };
        if spec.hs_go_min >= spec.hs_go_max {
            diag.add_error_with_entity(
                "calibration",
                "calibration interval is empty (hs_go_min >= hs_go_max)",
                &format!("{}->{}", spec.upstream, spec.downstream),
            );
        }
        let mut gate = Gate::new(spec.upstream.clone(), spec.downstream.clone())
            .with_type(spec.gate_type)
            .with_width(spec.width_m)
            .with_openings(spec.min_opening_m, spec.max_opening_m)
            .with_sill(sill)
            .with_max_flow(spec.max_flow_m3s)
            .with_calibration(GateCalibration {
                k1: spec.k1,
                k2: spec.k2,
                hs_go_min: spec.hs_go_min,
                hs_go_max: spec.hs_go_max,
            })
            .with_reach(reach)
            .with_location(spec.latitude, spec.longitude);
        if let Some(scada) = &spec.scada_id {
            gate = gate.with_scada_id(scada.clone());
        }
        network.add_gate(gate)?;
    }

    for spec in &file.zones {
        network.add_zone(Zone {
            id: ZoneId::new(spec.id.clone()),
            plots: Vec::new(),
            delivery_gates: spec
                .delivery_gates
                .iter()
                .map(|g| GateId::new(g.clone()))
                .collect(),
            centroid: spec.centroid,
        });
    }

    for spec in &file.plots {
        network.add_plot(Plot {
            id: PlotId::new(spec.id.clone()),
            zone_id: ZoneId::new(spec.zone.clone()),
            area_rai: Rai(spec.area_rai),
            crop: spec.crop.clone(),
            delivery_gate: GateId::new(spec.delivery_gate.clone()),
        });
    }

    network.validate_into(diag);
    if diag.has_errors() {
        let first = diag
            .errors()
            .next()
            .map(|i| i.to_string())
            .unwrap_or_default();
        return Err(SluiceError::Validation(format!(
            "topology '{}' has {} errors, first: {}",
            file.name,
            diag.error_count(),
            first
        )));
    }
    Ok(network)
}

/// Parse and validate a topology document from a JSON string.
pub fn load_network_from_str(json: &str, diag: &mut Diagnostics) -> SluiceResult<Network> {
    let file: TopologyFile =
        serde_json::from_str(json).map_err(|e| SluiceError::Parse(e.to_string()))?;
    build_network(&file, diag)
}

/// Load and validate a topology file from disk.
pub fn load_network(path: &Path, diag: &mut Diagnostics) -> SluiceResult<Network> {
    let json = std::fs::read_to_string(path)?;
    load_network_from_str(&json, diag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_topology() -> String {
        r#"{
            "name": "minimal",
            "nodes": [
                {"id": "Source", "class": "source", "invert_elevation_m": 221.0},
                {"id": "M(0,0)", "invert_elevation_m": 218.0}
            ],
            "gates": [
                {"upstream": "Source", "downstream": "M(0,0)",
                 "width_m": 3.0, "max_opening_m": 2.5, "min_opening_m": 0.1,
                 "sill_elevation_m": 218.0, "max_flow_m3s": 12.0,
                 "k1": 0.85, "k2": -0.15, "hs_go_min": 0.2, "hs_go_max": 2.0}
            ]
        }"#
        .to_string()
    }

    #[test]
    fn test_load_minimal() {
        let mut diag = Diagnostics::new();
        let network = load_network_from_str(&minimal_topology(), &mut diag).unwrap();
        assert_eq!(network.stats().num_gates, 1);
        // Reach geometry was omitted, so the loader warned.
        assert!(diag.warnings().any(|i| i.message.contains("reach")));
        // Surface area defaulted by class.
        let node = network.node(&NodeId::new("M(0,0)")).unwrap();
        assert!((node.surface_area_m2.value() - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn test_sill_defaults_to_parent_invert() {
        let json = minimal_topology().replace(r#""sill_elevation_m": 218.0,"#, "");
        let mut diag = Diagnostics::new();
        let network = load_network_from_str(&json, &mut diag).unwrap();
        let gate = network.gate(&GateId::new("Source->M(0,0)")).unwrap();
        assert!((gate.sill_elevation_m.value() - 221.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_calibration() {
        let json = minimal_topology().replace(r#""k2": -0.15"#, r#""k2": 0.4"#);
        let mut diag = Diagnostics::new();
        let err = load_network_from_str(&json, &mut diag).unwrap_err();
        assert!(matches!(err, SluiceError::Validation(_)));
        assert!(diag.errors().any(|i| i.message.contains("K2")));
    }

    #[test]
    fn test_rejects_unknown_endpoint() {
        let json = minimal_topology().replace(r#""downstream": "M(0,0)""#, r#""downstream": "M(9,9)""#);
        let mut diag = Diagnostics::new();
        let err = load_network_from_str(&json, &mut diag).unwrap_err();
        assert!(matches!(err, SluiceError::NotFound { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, minimal_topology()).unwrap();
        let mut diag = Diagnostics::new();
        let network = load_network(&path, &mut diag).unwrap();
        assert_eq!(network.stats().num_nodes, 2);
    }

    #[test]
    fn test_fixture_round_trip() {
        // The fixture network serializes to a TopologyFile and reloads
        // identically sized.
        let file = crate::fixtures::demo_topology();
        let json = serde_json::to_string(&file).unwrap();
        let mut diag = Diagnostics::new();
        let network = load_network_from_str(&json, &mut diag).unwrap();
        let direct = crate::fixtures::demo_network();
        assert_eq!(network.stats().num_nodes, direct.stats().num_nodes);
        assert_eq!(network.stats().num_gates, direct.stats().num_gates);
        assert_eq!(network.stats().num_zones, direct.stats().num_zones);
    }
}
