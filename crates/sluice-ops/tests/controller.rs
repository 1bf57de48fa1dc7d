//! Dual-mode controller tests over the demo fixture.

use chrono::{NaiveDate, NaiveDateTime};
use sluice_core::{GateId, NodeId, SluiceError};
use sluice_io::fixtures::demo_network;
use sluice_ops::{
    controller::sync_quality, ControlStatus, GateController, GateMode, PrefixScadaBridge,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 3)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

fn controller() -> GateController {
    GateController::new(
        Arc::new(demo_network()),
        Arc::new(PrefixScadaBridge::new()),
        at(6, 0),
    )
}

#[tokio::test]
async fn test_initial_modes_follow_prefix_policy() {
    let controller = controller();
    let states = controller.all_states().await;

    let automated: Vec<_> = states
        .values()
        .filter(|s| s.mode == GateMode::Automated)
        .map(|s| s.gate_id.clone())
        .collect();
    // HG-C-001, CHK-002, CHK-003, RG-005.
    assert_eq!(automated.len(), 4);
    assert!(automated.contains(&GateId::new("Source->M(0,0)")));

    let manual = states
        .values()
        .filter(|s| s.mode == GateMode::Manual)
        .count();
    assert_eq!(manual, 9);
    for state in states.values() {
        assert_eq!(state.control_status, ControlStatus::Standby);
    }
}

#[tokio::test]
async fn test_manual_update_and_audit() {
    let controller = controller();
    let gate = GateId::new("M(0,2)->Zone_2");

    controller
        .ingest_measurement(&gate, 219.2, 216.0, at(6, 30))
        .await
        .unwrap();
    let state = controller
        .update_manual(&gate, 40.0, "operator-7", Some("raised for morning set".into()), at(6, 45))
        .await
        .unwrap();

    assert_eq!(state.opening_percent, 40.0);
    // Flow recomputed from the ingested levels.
    assert!(state.flow_m3s.unwrap() > 0.0);

    let audit = controller.audit_for(&gate);
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].previous_opening_percent, 0.0);
    assert_eq!(audit[0].new_opening_percent, 40.0);
    assert_eq!(audit[0].operator, "operator-7");
}

#[tokio::test]
async fn test_manual_update_rejected_for_automated_gate() {
    let controller = controller();
    let gate = GateId::new("Source->M(0,0)");
    let err = controller
        .update_manual(&gate, 50.0, "operator-7", None, at(7, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SluiceError::StateConflict { .. }));
}

#[tokio::test]
async fn test_manual_update_validates_percent_and_gate() {
    let controller = controller();
    let gate = GateId::new("M(0,2)->Zone_2");
    assert!(controller
        .update_manual(&gate, 130.0, "op", None, at(7, 0))
        .await
        .is_err());
    assert!(controller
        .update_manual(&GateId::new("M(9,9)->X"), 10.0, "op", None, at(7, 0))
        .await
        .is_err());
}

#[tokio::test]
async fn test_transition_validation_rules() {
    let controller = controller();
    // Manual gate without SCADA: automation requires connectivity.
    let manual_gate = GateId::new("M(0,2)->Zone_2");
    let verdict = controller
        .validate_transition(&manual_gate, GateMode::Automated, false)
        .await
        .unwrap();
    assert!(!verdict.is_valid);
    assert_eq!(verdict.reason.as_deref(), Some("SCADA connectivity required"));

    // Force pushes it through with warnings attached.
    let forced = controller
        .validate_transition(&manual_gate, GateMode::Automated, true)
        .await
        .unwrap();
    assert!(forced.is_valid);
    assert!(!forced.warnings.is_empty());

    // Same-mode transition is trivially valid.
    let same = controller
        .validate_transition(&manual_gate, GateMode::Manual, false)
        .await
        .unwrap();
    assert!(same.is_valid);
    assert_eq!(same.reason.as_deref(), Some("already in target mode"));
}

#[tokio::test]
async fn test_intermediate_position_warns() {
    let controller = controller();
    let gate = GateId::new("M(0,2)->Zone_2");
    controller
        .update_manual(&gate, 45.0, "op", None, at(7, 0))
        .await
        .unwrap();
    let verdict = controller
        .validate_transition(&gate, GateMode::Automated, true)
        .await
        .unwrap();
    assert!(verdict
        .warnings
        .iter()
        .any(|w| w.contains("intermediate position")));
}

#[tokio::test]
async fn test_execute_transition_success_and_failure() {
    let controller = controller();

    // An automated-capable gate can leave and re-enter automated mode.
    let scada_gate = GateId::new("Source->M(0,0)");
    controller
        .execute_transition(&scada_gate, GateMode::Manual, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(
        controller.get_state(&scada_gate).await.unwrap().mode,
        GateMode::Manual
    );
    controller
        .execute_transition(&scada_gate, GateMode::Automated, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(
        controller.get_state(&scada_gate).await.unwrap().mode,
        GateMode::Automated
    );

    // A hand-cranked gate cannot reach automated mode: fault recorded.
    let manual_gate = GateId::new("M(0,2)->Zone_2");
    let err = controller
        .execute_transition(&manual_gate, GateMode::Automated, Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, SluiceError::External { .. }));
    let state = controller.get_state(&manual_gate).await.unwrap();
    assert_eq!(state.control_status, ControlStatus::Fault);
    assert!(state.error.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_per_gate_lock_serializes_updates_and_transitions() {
    // For any interleaving of update_manual and execute_transition, no
    // torn state is observable afterwards.
    let controller = Arc::new(controller());
    let gate = GateId::new("M(0,2)->Zone_2");

    let c1 = Arc::clone(&controller);
    let g1 = gate.clone();
    let update = tokio::spawn(async move {
        c1.update_manual(&g1, 40.0, "op", None, at(7, 0)).await
    });
    let c2 = Arc::clone(&controller);
    let g2 = gate.clone();
    let transition = tokio::spawn(async move {
        c2.execute_transition(&g2, GateMode::Maintenance, Duration::from_millis(10))
            .await
    });

    let update_result = update.await.unwrap();
    transition.await.unwrap().unwrap();

    let state = controller.get_state(&gate).await.unwrap();
    // The transition always completes; the update either ran first (and the
    // opening stuck) or lost the race to the mode change (and was rejected).
    assert_eq!(state.mode, GateMode::Maintenance);
    assert_eq!(state.control_status, ControlStatus::Standby);
    match update_result {
        Ok(_) => assert_eq!(state.opening_percent, 40.0),
        Err(err) => assert!(matches!(err, SluiceError::StateConflict { .. })),
    }
}

#[tokio::test]
async fn test_manual_instructions_flag_oversupplying_gate() {
    let controller = controller();
    let gate = GateId::new("M(0,2)->Zone_2");

    // Operator left the delivery gate well open while the system only wants
    // a trickle into Zone_2: the optimizer pinches the path right down.
    controller
        .update_manual(&gate, 60.0, "op", None, at(6, 30))
        .await
        .unwrap();
    let mut targets = HashMap::new();
    targets.insert(NodeId::new("Zone_2"), 0.5);

    let instructions = controller
        .generate_manual_instructions(&targets)
        .await
        .unwrap();

    let card = instructions
        .iter()
        .find(|i| i.gate_id == gate)
        .expect("instruction for the oversupplying manual gate");
    assert!(card.target_opening_percent < card.current_opening_percent);
    assert!(card.priority, "a 60-point correction is priority work");
    assert!(card.reason.contains("reduce"));
    assert!(!card.safety_checks.is_empty());
    // Its sibling offtake M(0,2)->M(0,3) shares the upstream level.
    assert!(card
        .coordination_notes
        .as_deref()
        .unwrap()
        .contains("M(0,2)->M(0,3)"));
    // Automated gates never get manual cards.
    assert!(instructions
        .iter()
        .all(|i| i.gate_id != GateId::new("Source->M(0,0)")));
}

#[tokio::test]
async fn test_sync_status_partitions_and_warns_on_stale_manual_gates() {
    let controller = controller();
    let status = controller.sync_status(at(9, 0)).await;

    assert_eq!(status.automated_gates.len(), 4);
    assert_eq!(status.manual_gates.len(), 9);
    assert!(status.is_synchronized);
    // Manual gates have not reported since 06:00; 3 hours > 2x the 15-minute
    // interval.
    assert_eq!(status.warnings.len(), 9);
    // Last sync is also stale, deducting 0.2.
    assert!((status.sync_quality - 0.8).abs() < 1e-9);
}

#[test]
fn test_sync_quality_scoring() {
    let base = at(6, 0);
    assert_eq!(sync_quality(0, base, at(6, 30)), 1.0);
    assert!((sync_quality(2, base, at(6, 30)) - 0.8).abs() < 1e-9);
    assert!((sync_quality(0, base, at(7, 30)) - 0.8).abs() < 1e-9);
    assert!((sync_quality(3, base, at(7, 30)) - 0.5).abs() < 1e-9);
    assert_eq!(sync_quality(20, base, at(7, 30)), 0.0);
}
