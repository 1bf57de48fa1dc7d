//! Canonical demonstration network shared by tests across the workspace.
//!
//! One reservoir feeding a main canal with two laterals:
//!
//! ```text
//! Source ── M(0,0) ── M(0,2) ── M(0,3) ── M(0,5) ── M(0,12) ── M(0,14)
//!             │          │         │                   │           │
//!           M(0,1)     Zone_2    M(3,0)             Zone_5      Zone_6
//!             │                    │
//!           Zone_1             Zone_2W
//! ```
//!
//! `Zone_2` has two delivery gates (`M(0,2)->Zone_2` and the western offtake
//! `M(3,0)->Zone_2W`), which gives failure scenarios a genuine reroute
//! alternative without the canals ever rejoining.

use crate::topology::{build_network, GateSpec, NodeSpec, PlotSpec, ReachSpec, TopologyFile, ZoneSpec};
use chrono::NaiveTime;
use sluice_core::{Diagnostics, FieldTeam, GateType, Network, NodeClass};

fn node(id: &str, class: Option<NodeClass>, invert: f64) -> NodeSpec {
    NodeSpec {
        id: id.to_string(),
        class,
        invert_elevation_m: invert,
        surface_area_m2: None,
    }
}

#[allow(clippy::too_many_arguments)]
fn gate(
    upstream: &str,
    downstream: &str,
    width: f64,
    max_opening: f64,
    sill: f64,
    q_max: f64,
    k1: f64,
    k2: f64,
    scada: Option<&str>,
    lat: f64,
    lon: f64,
    reach_len: f64,
) -> GateSpec {
    GateSpec {
        upstream: upstream.to_string(),
        downstream: downstream.to_string(),
        gate_type: GateType::Sluice,
        width_m: width,
        max_opening_m: max_opening,
        min_opening_m: 0.1,
        sill_elevation_m: Some(sill),
        max_flow_m3s: q_max,
        k1,
        k2,
        hs_go_min: 0.2,
        hs_go_max: 2.0,
        scada_id: scada.map(str::to_string),
        latitude: lat,
        longitude: lon,
        reach: Some(ReachSpec {
            length_m: reach_len,
            bottom_width_m: 3.0,
            side_slope: 1.5,
            manning_n: 0.025,
            bed_slope: 0.0005,
        }),
    }
}

fn plot(id: &str, zone: &str, area_rai: f64, delivery_gate: &str) -> PlotSpec {
    PlotSpec {
        id: id.to_string(),
        zone: zone.to_string(),
        area_rai,
        delivery_gate: delivery_gate.to_string(),
        crop: None,
    }
}

/// The demo topology as a declarative document.
pub fn demo_topology() -> TopologyFile {
    TopologyFile {
        name: "demo".to_string(),
        nodes: vec![
            node("Source", Some(NodeClass::Source), 221.0),
            node("M(0,0)", None, 218.0),
            node("M(0,1)", None, 217.9),
            node("Zone_1", None, 216.9),
            node("M(0,2)", None, 217.9),
            node("Zone_2", None, 215.0),
            node("M(0,3)", None, 217.8),
            node("M(3,0)", None, 216.8),
            node("Zone_2W", None, 215.2),
            node("M(0,5)", None, 217.0),
            node("M(0,12)", None, 215.0),
            node("Zone_5", None, 213.9),
            node("M(0,14)", None, 214.5),
            node("Zone_6", None, 213.5),
        ],
        gates: vec![
            gate("Source", "M(0,0)", 3.0, 2.5, 218.0, 12.0, 0.85, -0.15, Some("HG-C-001"), 14.320, 101.100, 800.0),
            gate("M(0,0)", "M(0,1)", 2.0, 2.0, 217.9, 3.0, 0.80, -0.15, None, 14.315, 101.085, 600.0),
            gate("M(0,1)", "Zone_1", 1.8, 1.8, 216.9, 2.5, 0.80, -0.15, None, 14.310, 101.070, 400.0),
            gate("M(0,0)", "M(0,2)", 3.0, 2.5, 217.9, 10.0, 0.82, -0.12, Some("CHK-002"), 14.308, 101.112, 900.0),
            gate("M(0,2)", "Zone_2", 2.5, 2.0, 215.0, 5.0, 0.78, -0.18, None, 14.296, 101.125, 600.0),
            gate("M(0,2)", "M(0,3)", 3.0, 2.5, 217.8, 9.0, 0.82, -0.12, Some("CHK-003"), 14.292, 101.108, 800.0),
            gate("M(0,3)", "M(3,0)", 2.2, 2.0, 216.8, 4.0, 0.80, -0.15, None, 14.285, 101.120, 700.0),
            gate("M(3,0)", "Zone_2W", 2.0, 1.8, 215.2, 3.5, 0.79, -0.16, None, 14.279, 101.130, 500.0),
            gate("M(0,3)", "M(0,5)", 3.0, 2.5, 217.0, 8.0, 0.81, -0.13, Some("RG-005"), 14.276, 101.102, 900.0),
            gate("M(0,5)", "M(0,12)", 2.8, 2.4, 215.0, 7.0, 0.81, -0.13, None, 14.262, 101.095, 1000.0),
            gate("M(0,12)", "Zone_5", 2.2, 2.0, 213.9, 4.0, 0.79, -0.16, None, 14.250, 101.104, 500.0),
            gate("M(0,12)", "M(0,14)", 2.6, 2.2, 214.5, 6.0, 0.80, -0.14, None, 14.247, 101.086, 800.0),
            gate("M(0,14)", "Zone_6", 2.0, 1.8, 213.5, 3.0, 0.78, -0.17, None, 14.236, 101.078, 500.0),
        ],
        zones: vec![
            ZoneSpec {
                id: "Zone_1".to_string(),
                delivery_gates: vec!["M(0,1)->Zone_1".to_string()],
                centroid: (14.308, 101.066),
            },
            ZoneSpec {
                id: "Zone_2".to_string(),
                delivery_gates: vec!["M(0,2)->Zone_2".to_string(), "M(3,0)->Zone_2W".to_string()],
                centroid: (14.290, 101.130),
            },
            ZoneSpec {
                id: "Zone_5".to_string(),
                delivery_gates: vec!["M(0,12)->Zone_5".to_string()],
                centroid: (14.248, 101.108),
            },
            ZoneSpec {
                id: "Zone_6".to_string(),
                delivery_gates: vec!["M(0,14)->Zone_6".to_string()],
                centroid: (14.233, 101.080),
            },
        ],
        plots: vec![
            plot("P-1-01", "Zone_1", 420.0, "M(0,1)->Zone_1"),
            plot("P-1-02", "Zone_1", 380.0, "M(0,1)->Zone_1"),
            plot("P-2-01", "Zone_2", 640.0, "M(0,2)->Zone_2"),
            plot("P-2-02", "Zone_2", 510.0, "M(0,2)->Zone_2"),
            plot("P-2-03", "Zone_2", 450.0, "M(3,0)->Zone_2W"),
            plot("P-5-01", "Zone_5", 560.0, "M(0,12)->Zone_5"),
            plot("P-5-02", "Zone_5", 470.0, "M(0,12)->Zone_5"),
            plot("P-6-01", "Zone_6", 390.0, "M(0,14)->Zone_6"),
        ],
    }
}

/// Build the validated demo network.
///
/// Panics on validation failure; the fixture is maintained alongside the
/// loader and must always pass.
pub fn demo_network() -> Network {
    let mut diag = Diagnostics::new();
    build_network(&demo_topology(), &mut diag).expect("demo fixture must validate")
}

/// Two field teams used by scheduling and adaptation tests.
pub fn demo_teams() -> Vec<FieldTeam> {
    vec![
        FieldTeam::new("TEAM-A", 14.318, 101.095)
            .with_name("North canal crew")
            .with_daily_cap(12),
        FieldTeam::new("TEAM-B", 14.245, 101.090)
            .with_name("South lateral crew")
            .with_daily_cap(10),
    ]
    .into_iter()
    .map(|mut t| {
        t.work_start = NaiveTime::from_hms_opt(6, 0, 0).expect("valid time");
        t.work_end = NaiveTime::from_hms_opt(18, 0, 0).expect("valid time");
        t
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{GateId, ZoneId};

    #[test]
    fn test_demo_network_validates() {
        let network = demo_network();
        let stats = network.stats();
        assert_eq!(stats.num_nodes, 14);
        assert_eq!(stats.num_gates, 13);
        assert_eq!(stats.num_zones, 4);
        assert_eq!(stats.num_plots, 8);
    }

    #[test]
    fn test_zone_2_has_reroute_alternative() {
        let network = demo_network();
        let gates = network.zone_delivery_gates(&ZoneId::new("Zone_2")).unwrap();
        assert_eq!(gates.len(), 2);
        assert!(gates.contains(&GateId::new("M(3,0)->Zone_2W")));
    }

    #[test]
    fn test_scada_gates_present() {
        let network = demo_network();
        let scada: Vec<_> = network.gates().filter(|g| g.scada_id.is_some()).collect();
        assert_eq!(scada.len(), 4);
    }
}
