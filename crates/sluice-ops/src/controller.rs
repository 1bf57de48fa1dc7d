//! Dual-mode gate controller.
//!
//! Every gate is either remotely actuated (SCADA) or hand-cranked by a
//! field team, and the two populations have to stay coordinated: the
//! controller tracks a per-gate runtime state (mode x control status),
//! serializes all mutations through a per-gate mutex, audits every movement,
//! and scores how well the manual fleet is keeping up with the automated
//! one.
//!
//! Initial mode comes from the id prefix policy: gates whose SCADA id (or
//! gate id) starts with one of [`AUTOMATED_PREFIXES`] boot automated,
//! everything else manual.

use crate::contracts::{CommandPriority, ScadaBridge};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use once_cell::sync::Lazy;
use serde::Serialize;
use sluice_core::{GateId, Network, NodeId, SluiceError, SluiceResult};
use sluice_hydro::{gate_flow, router, OpeningOptimizer};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Id prefixes of the remotely actuated fleet.
pub static AUTOMATED_PREFIXES: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["HG-C", "CHK", "RG"]);

/// Operating mode of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    Automated,
    Manual,
    Hybrid,
    Maintenance,
    Failed,
}

impl std::fmt::Display for GateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GateMode::Automated => "automated",
            GateMode::Manual => "manual",
            GateMode::Hybrid => "hybrid",
            GateMode::Maintenance => "maintenance",
            GateMode::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Control-loop status of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Standby,
    Active,
    Transitioning,
    Fault,
    Offline,
}

/// Live state of one gate.
#[derive(Debug, Clone, Serialize)]
pub struct GateRuntime {
    pub gate_id: GateId,
    pub mode: GateMode,
    pub control_status: ControlStatus,
    pub opening_percent: f64,
    pub flow_m3s: Option<f64>,
    pub upstream_level_m: Option<f64>,
    pub downstream_level_m: Option<f64>,
    pub last_updated: NaiveDateTime,
    pub last_command: Option<NaiveDateTime>,
    pub error: Option<String>,
}

/// Audit trail entry for a gate movement.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub gate_id: GateId,
    pub previous_opening_percent: f64,
    pub new_opening_percent: f64,
    pub mode: GateMode,
    pub operator: String,
    pub notes: Option<String>,
    pub at: NaiveDateTime,
}

/// Verdict on a requested mode transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionValidation {
    pub is_valid: bool,
    pub current_mode: GateMode,
    pub target_mode: GateMode,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub estimated_flow_change_m3s: f64,
    pub affected_downstream: usize,
    pub stabilization_seconds: u64,
}

/// Instruction card for a manual gate adjustment.
#[derive(Debug, Clone, Serialize)]
pub struct ManualInstruction {
    pub gate_id: GateId,
    pub current_opening_percent: f64,
    pub target_opening_percent: f64,
    /// Large adjustments (> 20 points) go to the top of the stack.
    pub priority: bool,
    pub reason: String,
    pub estimated_flow_change_m3s: f64,
    pub safety_checks: Vec<String>,
    pub coordination_notes: Option<String>,
}

/// Fleet synchronization snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub is_synchronized: bool,
    pub automated_gates: Vec<GateId>,
    pub manual_gates: Vec<GateId>,
    pub hybrid_gates: Vec<GateId>,
    pub conflicts: Vec<String>,
    pub warnings: Vec<String>,
    /// 1.0 is perfect; conflicts and stale syncs deduct.
    pub sync_quality: f64,
    pub last_sync: NaiveDateTime,
}

/// Quality score: start at 1.0, minus 0.1 per conflict, minus 0.2 when the
/// last sync is over an hour old.
pub fn sync_quality(conflicts: usize, last_sync: NaiveDateTime, now: NaiveDateTime) -> f64 {
    let mut quality = 1.0 - 0.1 * conflicts as f64;
    if now - last_sync > ChronoDuration::hours(1) {
        quality -= 0.2;
    }
    quality.clamp(0.0, 1.0)
}

struct SyncTracker {
    last_sync: NaiveDateTime,
}

/// Unified controller for automated and manual gate operations.
pub struct GateController {
    network: Arc<Network>,
    scada: Arc<dyn ScadaBridge>,
    gates: HashMap<GateId, Arc<Mutex<GateRuntime>>>,
    audit: std::sync::Mutex<Vec<AuditRecord>>,
    sync: std::sync::Mutex<SyncTracker>,
    optimizer: OpeningOptimizer,
    /// Expected cadence of manual position reports.
    pub manual_update_interval_minutes: i64,
}

impl GateController {
    pub fn new(network: Arc<Network>, scada: Arc<dyn ScadaBridge>, startup: NaiveDateTime) -> Self {
        let mut gates = HashMap::new();
        for gate in network.gates() {
            let mode = Self::initial_mode(gate.scada_id.as_deref().unwrap_or(gate.id.as_str()));
            gates.insert(
                gate.id.clone(),
                Arc::new(Mutex::new(GateRuntime {
                    gate_id: gate.id.clone(),
                    mode,
                    control_status: ControlStatus::Standby,
                    opening_percent: 0.0,
                    flow_m3s: None,
                    upstream_level_m: None,
                    downstream_level_m: None,
                    last_updated: startup,
                    last_command: None,
                    error: None,
                })),
            );
        }
        Self {
            network,
            scada,
            gates,
            audit: std::sync::Mutex::new(Vec::new()),
            sync: std::sync::Mutex::new(SyncTracker { last_sync: startup }),
            optimizer: OpeningOptimizer::default(),
            manual_update_interval_minutes: 15,
        }
    }

    fn initial_mode(id: &str) -> GateMode {
        if AUTOMATED_PREFIXES.iter().any(|p| id.starts_with(p)) {
            GateMode::Automated
        } else {
            GateMode::Manual
        }
    }

    fn runtime(&self, gate: &GateId) -> SluiceResult<Arc<Mutex<GateRuntime>>> {
        self.gates
            .get(gate)
            .cloned()
            .ok_or_else(|| SluiceError::not_found("gate", gate.as_str()))
    }

    /// Current state snapshot for one gate.
    pub async fn get_state(&self, gate: &GateId) -> SluiceResult<GateRuntime> {
        let runtime = self.runtime(gate)?;
        let guard = runtime.lock().await;
        Ok(guard.clone())
    }

    /// All gate states, keyed by gate id.
    pub async fn all_states(&self) -> BTreeMap<GateId, GateRuntime> {
        let mut states = BTreeMap::new();
        for (id, runtime) in &self.gates {
            states.insert(id.clone(), runtime.lock().await.clone());
        }
        states
    }

    /// Fold a level measurement into a gate's state and recompute its flow.
    pub async fn ingest_measurement(
        &self,
        gate_id: &GateId,
        upstream_level_m: f64,
        downstream_level_m: f64,
        now: NaiveDateTime,
    ) -> SluiceResult<()> {
        let gate = self.network.gate(gate_id)?.clone();
        let runtime = self.runtime(gate_id)?;
        let mut guard = runtime.lock().await;
        guard.upstream_level_m = Some(upstream_level_m);
        guard.downstream_level_m = Some(downstream_level_m);
        let opening_m = guard.opening_percent / 100.0 * gate.max_opening_m.value();
        guard.flow_m3s = Some(
            gate_flow(&gate, upstream_level_m, downstream_level_m, opening_m).flow_m3s,
        );
        guard.last_updated = now;
        Ok(())
    }

    /// Record a manual gate movement reported by a field operator.
    ///
    /// Only valid for gates in manual mode; recomputes the flow from the
    /// latest levels and appends an audit record.
    pub async fn update_manual(
        &self,
        gate_id: &GateId,
        opening_percent: f64,
        operator: &str,
        notes: Option<String>,
        now: NaiveDateTime,
    ) -> SluiceResult<GateRuntime> {
        if !(0.0..=100.0).contains(&opening_percent) {
            return Err(SluiceError::InvalidInput(format!(
                "opening percent {opening_percent} outside [0, 100]"
            )));
        }
        let gate = self.network.gate(gate_id)?.clone();
        let runtime = self.runtime(gate_id)?;
        let mut guard = runtime.lock().await;
        if guard.mode != GateMode::Manual {
            return Err(SluiceError::state_conflict(
                "gate mode",
                guard.mode,
                "manual update",
            ));
        }

        let previous = guard.opening_percent;
        guard.opening_percent = opening_percent;
        guard.last_updated = now;
        guard.last_command = Some(now);
        if let (Some(up), Some(down)) = (guard.upstream_level_m, guard.downstream_level_m) {
            let opening_m = opening_percent / 100.0 * gate.max_opening_m.value();
            guard.flow_m3s = Some(gate_flow(&gate, up, down, opening_m).flow_m3s);
        }

        tracing::info!(
            gate = %gate_id,
            previous,
            new = opening_percent,
            operator,
            "manual gate update"
        );
        self.audit.lock().expect("audit lock poisoned").push(AuditRecord {
            gate_id: gate_id.clone(),
            previous_opening_percent: previous,
            new_opening_percent: opening_percent,
            mode: GateMode::Manual,
            operator: operator.to_string(),
            notes,
            at: now,
        });
        self.sync.lock().expect("sync lock poisoned").last_sync = now;
        Ok(guard.clone())
    }

    /// Check whether a mode transition is safe.
    pub async fn validate_transition(
        &self,
        gate_id: &GateId,
        target: GateMode,
        force: bool,
    ) -> SluiceResult<TransitionValidation> {
        let gate = self.network.gate(gate_id)?.clone();
        let runtime = self.runtime(gate_id)?;
        let guard = runtime.lock().await;

        let mut validation = TransitionValidation {
            is_valid: true,
            current_mode: guard.mode,
            target_mode: target,
            reason: None,
            warnings: Vec::new(),
            recommendations: Vec::new(),
            estimated_flow_change_m3s: match target {
                GateMode::Manual => 0.3,
                _ => 0.1,
            },
            affected_downstream: router::affected_downstream(&self.network, gate_id)?.len(),
            stabilization_seconds: 300,
        };

        if guard.mode == target {
            validation.reason = Some("already in target mode".to_string());
            return Ok(validation);
        }

        match target {
            GateMode::Automated => {
                if !self.scada.is_reachable(&gate).await {
                    validation
                        .warnings
                        .push("SCADA connectivity not confirmed".to_string());
                    validation
                        .recommendations
                        .push("verify SCADA communication before transition".to_string());
                    if !force {
                        validation.is_valid = false;
                        validation.reason = Some("SCADA connectivity required".to_string());
                    }
                }
                if guard.opening_percent > 5.0 && guard.opening_percent < 95.0 {
                    validation.warnings.push(format!(
                        "gate at intermediate position ({:.0}%)",
                        guard.opening_percent
                    ));
                    validation.recommendations.push(
                        "move the gate fully open or closed before automating".to_string(),
                    );
                }
            }
            GateMode::Manual => {
                if guard.control_status == ControlStatus::Active {
                    validation
                        .warnings
                        .push("automated command in flight".to_string());
                    validation
                        .recommendations
                        .push("wait for the current command to complete".to_string());
                    if !force {
                        validation.is_valid = false;
                        validation.reason = Some("active automation in progress".to_string());
                    }
                }
            }
            _ => {}
        }

        if validation.estimated_flow_change_m3s > 0.2 && validation.affected_downstream > 0 {
            validation
                .recommendations
                .push("coordinate with downstream users".to_string());
        }
        Ok(validation)
    }

    /// Drive a mode transition. Serialized per gate: the runtime lock is
    /// held across the whole procedure.
    pub async fn execute_transition(
        &self,
        gate_id: &GateId,
        target: GateMode,
        transition_time: Duration,
    ) -> SluiceResult<()> {
        let gate = self.network.gate(gate_id)?.clone();
        let runtime = self.runtime(gate_id)?;
        let mut guard = runtime.lock().await;

        if guard.mode == target {
            return Ok(());
        }
        guard.control_status = ControlStatus::Transitioning;
        tokio::time::sleep(transition_time).await;

        let result = match target {
            GateMode::Automated => {
                if self.scada.is_reachable(&gate).await {
                    // Hand the current position to the remote terminal.
                    self.scada
                        .set_gate_position(gate_id, guard.opening_percent, CommandPriority::Normal)
                        .await
                } else {
                    Err(SluiceError::External {
                        service: "scada".to_string(),
                        reason: format!("gate {gate_id} unreachable"),
                    })
                }
            }
            _ => Ok(()),
        };

        match result {
            Ok(()) => {
                guard.mode = target;
                guard.control_status = ControlStatus::Standby;
                guard.error = None;
                tracing::info!(gate = %gate_id, mode = %target, "mode transition complete");
                Ok(())
            }
            Err(err) => {
                guard.control_status = ControlStatus::Fault;
                guard.error = Some(err.to_string());
                tracing::warn!(gate = %gate_id, error = %err, "mode transition failed");
                Err(err)
            }
        }
    }

    /// Privileged direct write used by emergency overrides: bypasses mode
    /// checks, commands SCADA when possible, and audits the movement.
    pub async fn force_position(
        &self,
        gate_id: &GateId,
        opening_percent: f64,
        operator: &str,
        reason: &str,
        now: NaiveDateTime,
    ) -> SluiceResult<()> {
        if !(0.0..=100.0).contains(&opening_percent) {
            return Err(SluiceError::InvalidInput(format!(
                "opening percent {opening_percent} outside [0, 100]"
            )));
        }
        let runtime = self.runtime(gate_id)?;
        let mut guard = runtime.lock().await;
        let previous = guard.opening_percent;

        // Best effort on the SCADA side; manual gates just record the order.
        let _ = self
            .scada
            .set_gate_position(gate_id, opening_percent, CommandPriority::Emergency)
            .await;

        guard.opening_percent = opening_percent;
        guard.last_updated = now;
        guard.last_command = Some(now);
        tracing::warn!(gate = %gate_id, operator, reason, "emergency position override");

        self.audit.lock().expect("audit lock poisoned").push(AuditRecord {
            gate_id: gate_id.clone(),
            previous_opening_percent: previous,
            new_opening_percent: opening_percent,
            mode: guard.mode,
            operator: operator.to_string(),
            notes: Some(format!("emergency override: {reason}")),
            at: now,
        });
        Ok(())
    }

    /// Compute solver-optimal openings for the given deliveries and emit
    /// instruction cards for every manual gate more than 5 points off.
    pub async fn generate_manual_instructions(
        &self,
        targets: &HashMap<NodeId, f64>,
    ) -> SluiceResult<Vec<ManualInstruction>> {
        let optimization = self.optimizer.optimize(&self.network, targets)?;

        let mut instructions = Vec::new();
        for (gate_id, runtime) in &self.gates {
            let guard = runtime.lock().await;
            if guard.mode != GateMode::Manual {
                continue;
            }
            let gate = self.network.gate(gate_id)?;
            let target_percent = optimization
                .openings
                .get(gate_id)
                .map(|m| m / gate.max_opening_m.value() * 100.0)
                .unwrap_or(guard.opening_percent);
            let delta = target_percent - guard.opening_percent;
            if delta.abs() <= 5.0 {
                continue;
            }

            let target_flow = optimization
                .solution
                .gate_flows
                .get(gate_id)
                .copied()
                .unwrap_or(0.0);
            let current_flow = guard.flow_m3s.unwrap_or(0.0);

            let mut safety_checks = vec![
                "verify no personnel near gate".to_string(),
                "check upstream water level".to_string(),
                "confirm downstream channel capacity".to_string(),
            ];
            if target_percent > 80.0 {
                safety_checks.push("alert downstream users of increased flow".to_string());
            } else if target_percent < 20.0 {
                safety_checks.push("verify minimum flow requirements".to_string());
            }

            // Sibling offtakes on the same upstream node share its level.
            let siblings: Vec<String> = self
                .network
                .gates_out_of(&gate.upstream)?
                .iter()
                .filter(|g| &g.id != gate_id)
                .map(|g| g.id.to_string())
                .collect();

            instructions.push(ManualInstruction {
                gate_id: gate_id.clone(),
                current_opening_percent: guard.opening_percent,
                target_opening_percent: target_percent,
                priority: delta.abs() > 20.0,
                reason: if delta > 0.0 {
                    "increase flow to meet downstream demand".to_string()
                } else {
                    "reduce flow to prevent oversupply".to_string()
                },
                estimated_flow_change_m3s: target_flow - current_flow,
                safety_checks,
                coordination_notes: if siblings.is_empty() {
                    None
                } else {
                    Some(format!("coordinate with gates: {}", siblings.join(", ")))
                },
            });
        }

        // Priority first, then largest flow change.
        instructions.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| {
                b.estimated_flow_change_m3s
                    .abs()
                    .partial_cmp(&a.estimated_flow_change_m3s.abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        Ok(instructions)
    }

    /// Synchronization snapshot across the fleet.
    pub async fn sync_status(&self, now: NaiveDateTime) -> SyncStatus {
        let mut automated = Vec::new();
        let mut manual = Vec::new();
        let mut hybrid = Vec::new();
        let mut conflicts = Vec::new();
        let mut warnings = Vec::new();

        for (id, runtime) in &self.gates {
            let guard = runtime.lock().await;
            match guard.mode {
                GateMode::Automated => automated.push(id.clone()),
                GateMode::Manual => manual.push(id.clone()),
                GateMode::Hybrid => hybrid.push(id.clone()),
                _ => {}
            }
            if guard.control_status == ControlStatus::Fault {
                conflicts.push(format!(
                    "{} in fault: {}",
                    id,
                    guard.error.as_deref().unwrap_or("unknown")
                ));
            }
            if guard.mode == GateMode::Manual {
                let staleness = now - guard.last_updated;
                let limit = ChronoDuration::minutes(2 * self.manual_update_interval_minutes);
                if staleness > limit {
                    warnings.push(format!(
                        "manual gate {} not updated for {:.1} hours",
                        id,
                        staleness.num_minutes() as f64 / 60.0
                    ));
                }
            }
        }
        automated.sort();
        manual.sort();
        hybrid.sort();
        conflicts.sort();
        warnings.sort();

        let last_sync = self.sync.lock().expect("sync lock poisoned").last_sync;
        SyncStatus {
            is_synchronized: conflicts.is_empty(),
            sync_quality: sync_quality(conflicts.len(), last_sync, now),
            automated_gates: automated,
            manual_gates: manual,
            hybrid_gates: hybrid,
            conflicts,
            warnings,
            last_sync,
        }
    }

    /// Audit records for one gate, oldest first.
    pub fn audit_for(&self, gate: &GateId) -> Vec<AuditRecord> {
        self.audit
            .lock()
            .expect("audit lock poisoned")
            .iter()
            .filter(|r| &r.gate_id == gate)
            .cloned()
            .collect()
    }
}
