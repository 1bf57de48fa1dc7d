//! Event-driven schedule adaptation.
//!
//! The adapter is the only writer of an active schedule. Every event runs
//! the same procedure: assess impact (affected operations, water shortage,
//! zones), enumerate alternatives through the path router, pick a strategy,
//! apply the patch through the operation state machine, verify the patched
//! opening vector against the network solver, bump the schedule version,
//! and notify the affected teams. Completed and in-progress operations are
//! never modified; their gate positions become boundary conditions.
//!
//! Processing serializes per schedule through the store's per-schedule
//! mutex; events for different schedules run in parallel.

use crate::controller::GateController;
use crate::events::{
    AdaptationEvent, AdaptationRecord, AdaptationStrategy, TeamNotification, Urgency,
};
use crate::store::ScheduleStore;
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use sluice_core::{
    FieldTeam, GateId, Network, OperationId, OperationKind, OperationStatus, ScheduleId,
    ScheduledOperation, SluiceError, SluiceResult, ZoneId,
};
use sluice_demand::AggregatedDemand;
use sluice_hydro::{router, GateOpenings, HydraulicSolver};
use sluice_sched::{haversine_km, WeeklyPlanner};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Result of one adaptation.
#[derive(Debug, Clone)]
pub struct AdaptationOutcome {
    pub strategy: AdaptationStrategy,
    pub affected_operations: Vec<OperationId>,
    pub cancelled_operations: Vec<OperationId>,
    pub new_operations: Vec<OperationId>,
    pub water_shortage_m3: f64,
    pub affected_zones: Vec<ZoneId>,
    pub schedule_version: u32,
    pub warnings: Vec<String>,
    pub notifications: Vec<TeamNotification>,
    pub requires_manual_intervention: bool,
}

impl AdaptationOutcome {
    fn empty(strategy: AdaptationStrategy, version: u32) -> Self {
        Self {
            strategy,
            affected_operations: Vec::new(),
            cancelled_operations: Vec::new(),
            new_operations: Vec::new(),
            water_shortage_m3: 0.0,
            affected_zones: Vec::new(),
            schedule_version: version,
            warnings: Vec::new(),
            notifications: Vec::new(),
            requires_manual_intervention: false,
        }
    }
}

/// An alternative delivery route around a failed gate.
#[derive(Debug, Clone)]
struct Alternative {
    zone: ZoneId,
    delivery_gate: GateId,
    gates: Vec<GateId>,
    efficiency_loss_percent: f64,
    required_flow_m3s: f64,
}

/// Real-time schedule adapter.
pub struct RealTimeAdapter {
    network: Arc<Network>,
    store: Arc<ScheduleStore>,
    controller: Arc<GateController>,
    planner: WeeklyPlanner,
    solver: HydraulicSolver,
    history: std::sync::Mutex<HashMap<ScheduleId, VecDeque<AdaptationRecord>>>,
    /// Ring-buffer cap per schedule.
    pub history_cap: usize,
}

impl RealTimeAdapter {
    pub fn new(
        network: Arc<Network>,
        store: Arc<ScheduleStore>,
        controller: Arc<GateController>,
    ) -> Self {
        Self {
            network,
            store,
            controller,
            planner: WeeklyPlanner::new(),
            solver: HydraulicSolver::new(),
            history: std::sync::Mutex::new(HashMap::new()),
            history_cap: 100,
        }
    }

    /// Dispatch one event against a schedule.
    pub async fn handle_event(
        &self,
        schedule_id: &ScheduleId,
        event: AdaptationEvent,
        now: NaiveDateTime,
    ) -> SluiceResult<AdaptationOutcome> {
        let kind = event.kind();
        let mut outcome = match event {
            AdaptationEvent::GateFailure {
                gate,
                failure_type,
                estimated_repair_hours,
            } => {
                self.handle_gate_failure(schedule_id, &gate, &failure_type, estimated_repair_hours, now)
                    .await?
            }
            AdaptationEvent::WeatherChange {
                observation,
                affected_zones,
            } => {
                self.handle_weather_change(schedule_id, &observation, &affected_zones, now)
                    .await?
            }
            AdaptationEvent::DemandChange {
                zone,
                plots: _,
                additional_m3,
                urgency,
                reason,
            } => {
                self.handle_demand_change(schedule_id, &zone, additional_m3, urgency, &reason, now)
                    .await?
            }
            AdaptationEvent::TeamUnavailable {
                team,
                from,
                until,
                reason,
                replacements,
            } => {
                self.handle_team_unavailable(schedule_id, &team, from, until, &reason, &replacements, now)
                    .await?
            }
            AdaptationEvent::Reoptimize {
                from_date,
                demands,
                teams,
                reason,
            } => {
                self.reoptimize(schedule_id, from_date, &demands, &teams, &reason, now)
                    .await?
            }
            AdaptationEvent::EmergencyOverride {
                gate,
                target_opening_percent,
                operator,
                reason,
            } => {
                self.emergency_override(schedule_id, &gate, target_opening_percent, &operator, &reason, now)
                    .await?
            }
        };

        // Validate the patched opening vector against the network solver;
        // completed and in-progress operations are already reflected in it.
        if !outcome.cancelled_operations.is_empty() || !outcome.new_operations.is_empty() {
            let snapshot = self.store.get(schedule_id).await?;
            let mut openings = GateOpenings::new();
            for op in snapshot.operations() {
                if matches!(
                    op.status,
                    OperationStatus::Scheduled | OperationStatus::InProgress
                ) && op.kind != OperationKind::Close
                {
                    let gate = self.network.gate(&op.gate_id)?;
                    let meters = op.target_opening_percent / 100.0 * gate.max_opening_m.value();
                    let entry = openings.entry(op.gate_id.clone()).or_insert(0.0);
                    *entry = entry.max(meters);
                }
            }
            let solution = self.solver.solve(&self.network, &openings)?;
            if !solution.converged {
                outcome
                    .warnings
                    .push("patched plan did not fully converge in verification".to_string());
            }
            outcome.warnings.extend(solution.warnings);
        }

        self.push_history(schedule_id, kind, &outcome, now);
        tracing::info!(
            schedule = %schedule_id,
            event = kind,
            strategy = ?outcome.strategy,
            affected = outcome.affected_operations.len(),
            "adaptation applied"
        );
        Ok(outcome)
    }

    /// Adaptation history snapshot for a schedule (oldest first).
    pub fn history(&self, schedule_id: &ScheduleId) -> Vec<AdaptationRecord> {
        self.history
            .lock()
            .expect("history lock poisoned")
            .get(schedule_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn push_history(
        &self,
        schedule_id: &ScheduleId,
        kind: &str,
        outcome: &AdaptationOutcome,
        now: NaiveDateTime,
    ) {
        let mut history = self.history.lock().expect("history lock poisoned");
        let ring = history.entry(schedule_id.clone()).or_default();
        if ring.len() == self.history_cap {
            ring.pop_front();
        }
        ring.push_back(AdaptationRecord {
            schedule: schedule_id.clone(),
            event_kind: kind.to_string(),
            strategy: outcome.strategy,
            affected_operations: outcome.affected_operations.clone(),
            new_operations: outcome.new_operations.clone(),
            schedule_version: outcome.schedule_version,
            at: now,
            notes: format!(
                "{} affected, {} new, {:.0} m3 shortage",
                outcome.affected_operations.len(),
                outcome.new_operations.len(),
                outcome.water_shortage_m3
            ),
        });
    }

    fn notify_teams(
        ops: &[&ScheduledOperation],
        kind: &str,
        message: &str,
        now: NaiveDateTime,
    ) -> Vec<TeamNotification> {
        let teams: BTreeSet<_> = ops.iter().filter_map(|op| op.team.clone()).collect();
        teams
            .into_iter()
            .map(|team| TeamNotification {
                team,
                kind: kind.to_string(),
                message: message.to_string(),
                at: now,
            })
            .collect()
    }

    /// Zones whose delivery gates sit at or below the failed gate.
    fn zones_below(&self, blocked: &BTreeSet<GateId>) -> Vec<ZoneId> {
        let mut zones: Vec<ZoneId> = self
            .network
            .zones
            .values()
            .filter(|zone| zone.delivery_gates.iter().any(|g| blocked.contains(g)))
            .map(|zone| zone.id.clone())
            .collect();
        zones.sort();
        zones
    }

    /// Enumerate reroute alternatives for the affected zones.
    fn find_alternatives(
        &self,
        blocked: &BTreeSet<GateId>,
        affected_zones: &[ZoneId],
        shortage_m3: f64,
        repair_hours: f64,
    ) -> SluiceResult<Vec<Alternative>> {
        let source = match self.network.source() {
            Some(node) => node.id.clone(),
            None => return Ok(Vec::new()),
        };
        let blocked_list: Vec<GateId> = blocked.iter().cloned().collect();
        let horizon_s = (repair_hours.max(1.0)) * 3600.0;
        let required_flow = if shortage_m3 > 0.0 {
            shortage_m3 / horizon_s
        } else {
            0.5
        };

        // Conveyance loss grows with the extra canal length a detour wets.
        const LOSS_PERCENT_PER_KM: f64 = 2.0;
        let path_length_m = |gates: &[GateId]| -> f64 {
            gates
                .iter()
                .filter_map(|g| self.network.gate(g).ok())
                .map(|g| g.reach.length_m.value())
                .sum()
        };

        let mut alternatives = Vec::new();
        for zone_id in affected_zones {
            let zone = match self.network.zones.get(zone_id) {
                Some(zone) => zone,
                None => continue,
            };
            // Shortest blocked delivery path as the efficiency baseline.
            let baseline_m = zone
                .delivery_gates
                .iter()
                .filter(|g| blocked.contains(*g))
                .filter_map(|g| self.network.gate(g).ok())
                .filter_map(|g| {
                    router::shortest_path(&self.network, &source, &g.downstream)
                        .ok()
                        .flatten()
                        .and_then(|p| router::path_gates(&self.network, &p).ok())
                        .map(|gates| path_length_m(&gates))
                })
                .fold(f64::INFINITY, f64::min);

            for delivery_gate in &zone.delivery_gates {
                if blocked.contains(delivery_gate) {
                    continue;
                }
                let gate = self.network.gate(delivery_gate)?;
                let path = router::path_avoiding(
                    &self.network,
                    &source,
                    &gate.downstream,
                    &blocked_list,
                )?;
                let Some(path) = path else { continue };
                let gates = router::path_gates(&self.network, &path)?;
                // Capacity screen: the alternative must carry the shortage.
                let capacity = gates
                    .iter()
                    .filter_map(|g| self.network.gate(g).ok())
                    .map(|g| g.max_flow_m3s.value())
                    .fold(f64::INFINITY, f64::min);
                if capacity < required_flow {
                    continue;
                }
                let extra_m = if baseline_m.is_finite() {
                    (path_length_m(&gates) - baseline_m).max(0.0)
                } else {
                    0.0
                };
                let efficiency_loss_percent = extra_m / 1000.0 * LOSS_PERCENT_PER_KM;
                alternatives.push(Alternative {
                    zone: zone_id.clone(),
                    delivery_gate: delivery_gate.clone(),
                    gates,
                    efficiency_loss_percent,
                    required_flow_m3s: required_flow,
                });
            }
        }
        // Best (lowest loss) alternative per zone.
        alternatives.sort_by(|a, b| {
            a.zone.cmp(&b.zone).then(
                a.efficiency_loss_percent
                    .partial_cmp(&b.efficiency_loss_percent)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        alternatives.dedup_by(|a, b| a.zone == b.zone);
        Ok(alternatives)
    }

    async fn handle_gate_failure(
        &self,
        schedule_id: &ScheduleId,
        failed_gate: &GateId,
        failure_type: &str,
        repair_hours: f64,
        now: NaiveDateTime,
    ) -> SluiceResult<AdaptationOutcome> {
        self.network.gate(failed_gate)?;
        let mut blocked: BTreeSet<GateId> = BTreeSet::new();
        blocked.insert(failed_gate.clone());
        blocked.extend(self.network.downstream_gates(failed_gate)?);
        let affected_zones = self.zones_below(&blocked);

        let network = Arc::clone(&self.network);
        let blocked_for_closure = blocked.clone();
        let affected_zones_for_closure = affected_zones.clone();
        let failed = failed_gate.clone();
        let failure_type = failure_type.to_string();

        // Pre-compute impact from a snapshot so alternatives can be scored
        // outside the schedule lock.
        let snapshot = self.store.get(schedule_id).await?;
        let affected_ids: Vec<OperationId> = snapshot
            .operations()
            .iter()
            .filter(|op| op.status == OperationStatus::Scheduled)
            .filter(|op| blocked.contains(&op.gate_id))
            .map(|op| op.id)
            .collect();
        let shortage_m3: f64 = snapshot
            .operations()
            .iter()
            .filter(|op| affected_ids.contains(&op.id) && op.zone_id.is_some())
            .map(|op| op.expected_volume_m3())
            .sum();

        let alternatives =
            self.find_alternatives(&blocked, &affected_zones, shortage_m3, repair_hours)?;

        let strategy = if repair_hours <= 4.0 && shortage_m3 < 1000.0 {
            AdaptationStrategy::DelayOperations
        } else if !alternatives.is_empty()
            && alternatives
                .iter()
                .all(|alt| alt.efficiency_loss_percent < 20.0)
        {
            AdaptationStrategy::RerouteFlow
        } else if !alternatives.is_empty() {
            AdaptationStrategy::PartialDelivery
        } else if shortage_m3 > 5000.0 {
            AdaptationStrategy::EmergencyOverride
        } else {
            AdaptationStrategy::DelayOperations
        };

        let outcome = self
            .store
            .with_schedule(schedule_id, move |schedule| {
                let mut outcome = AdaptationOutcome::empty(strategy, schedule.version);
                outcome.affected_operations = affected_ids.clone();
                outcome.water_shortage_m3 = shortage_m3;
                outcome.affected_zones = affected_zones_for_closure.clone();

                match strategy {
                    AdaptationStrategy::DelayOperations => {
                        let delay = ChronoDuration::seconds((repair_hours * 3600.0) as i64);
                        for id in &affected_ids {
                            let op = schedule.operation_mut(*id)?;
                            let start = op.date.and_time(op.planned_start) + delay;
                            let end = op.date.and_time(op.planned_end) + delay;
                            op.date = start.date();
                            op.planned_start = start.time();
                            op.planned_end = end.time();
                            op.notes = Some(format!(
                                "delayed {:.1} h: {} failure on {}",
                                repair_hours, failure_type, failed
                            ));
                        }
                    }
                    AdaptationStrategy::RerouteFlow | AdaptationStrategy::PartialDelivery => {
                        let scale = if strategy == AdaptationStrategy::PartialDelivery {
                            0.5
                        } else {
                            1.0
                        };
                        for id in &affected_ids {
                            let op = schedule.operation_mut(*id)?;
                            op.transition_to(OperationStatus::Cancelled)?;
                            op.notes = Some(format!("gate failure: {}", failed));
                            outcome.cancelled_operations.push(*id);
                        }
                        for alt in &alternatives {
                            for gate_id in &alt.gates {
                                if blocked_for_closure.contains(gate_id) {
                                    continue;
                                }
                                let gate = network.gate(gate_id)?;
                                let opening = (alt.required_flow_m3s * scale
                                    / gate.max_flow_m3s.value()
                                    * 100.0)
                                    .min(95.0);
                                let is_delivery = gate_id == &alt.delivery_gate;
                                let id = schedule.push_operation(ScheduledOperation {
                                    id: OperationId(0),
                                    gate_id: gate_id.clone(),
                                    zone_id: is_delivery.then(|| alt.zone.clone()),
                                    kind: OperationKind::Reroute,
                                    date: now.date(),
                                    planned_start: now.time(),
                                    planned_end: (now + ChronoDuration::minutes(30)).time(),
                                    sequence: 0,
                                    target_opening_percent: opening,
                                    expected_flow_before_m3s: 0.0,
                                    expected_flow_after_m3s: alt.required_flow_m3s * scale,
                                    team: None,
                                    status: OperationStatus::Scheduled,
                                    actual: None,
                                    notes: Some(format!(
                                        "rerouted around {} for {}",
                                        failed, alt.zone
                                    )),
                                });
                                outcome.new_operations.push(id);
                            }
                        }
                    }
                    AdaptationStrategy::EmergencyOverride => {
                        outcome.requires_manual_intervention = true;
                    }
                    _ => {}
                }

                schedule.bump_version();
                outcome.schedule_version = schedule.version;
                let affected_ops: Vec<&ScheduledOperation> = affected_ids
                    .iter()
                    .filter_map(|id| schedule.operation(*id).ok())
                    .collect();
                outcome.notifications = Self::notify_teams(
                    &affected_ops,
                    "gate_failure",
                    &format!("gate {} failed ({}); strategy {:?}", failed, failure_type, strategy),
                    now,
                );
                Ok(outcome)
            })
            .await?;

        Ok(outcome)
    }

    async fn handle_weather_change(
        &self,
        schedule_id: &ScheduleId,
        observation: &sluice_demand::WeatherObservation,
        affected_zones: &[ZoneId],
        now: NaiveDateTime,
    ) -> SluiceResult<AdaptationOutcome> {
        let strategy = if observation.rainfall_mm > 10.0 {
            AdaptationStrategy::ReduceDemand
        } else if observation.temperature_drop_c > 5.0 {
            AdaptationStrategy::AdjustTiming
        } else {
            AdaptationStrategy::None
        };
        let reduction = if observation.rainfall_mm > 25.0 {
            1.0
        } else if observation.rainfall_mm > 10.0 {
            0.3
        } else {
            0.0
        };
        let zones: Vec<ZoneId> = affected_zones.to_vec();
        let rainfall = observation.rainfall_mm;

        self.store
            .with_schedule(schedule_id, move |schedule| {
                let mut outcome = AdaptationOutcome::empty(strategy, schedule.version);
                outcome.affected_zones = zones.clone();
                if strategy == AdaptationStrategy::None {
                    return Ok(outcome);
                }

                let mut touched = Vec::new();
                for op in schedule.operations_mut() {
                    if op.status != OperationStatus::Scheduled {
                        continue;
                    }
                    let in_zone = op
                        .zone_id
                        .as_ref()
                        .map(|z| zones.contains(z))
                        .unwrap_or(false);
                    if !in_zone || op.date.and_time(op.planned_start) < now {
                        continue;
                    }
                    match strategy {
                        AdaptationStrategy::ReduceDemand => {
                            if reduction >= 1.0 {
                                op.transition_to(OperationStatus::Cancelled)?;
                                op.notes =
                                    Some(format!("cancelled: {:.0} mm rainfall", rainfall));
                            } else {
                                op.target_opening_percent *= 1.0 - reduction;
                                op.expected_flow_after_m3s *= 1.0 - reduction;
                                op.notes = Some(format!(
                                    "reduced {:.0}% after {:.0} mm rainfall",
                                    reduction * 100.0,
                                    rainfall
                                ));
                            }
                        }
                        AdaptationStrategy::AdjustTiming => {
                            let start = op.date.and_time(op.planned_start)
                                + ChronoDuration::minutes(60);
                            let end =
                                op.date.and_time(op.planned_end) + ChronoDuration::minutes(60);
                            op.date = start.date();
                            op.planned_start = start.time();
                            op.planned_end = end.time();
                            op.notes = Some("shifted for cold-snap ET adjustment".to_string());
                        }
                        _ => {}
                    }
                    touched.push(op.id);
                }

                if !touched.is_empty() {
                    schedule.bump_version();
                }
                outcome.schedule_version = schedule.version;
                outcome.affected_operations = touched.clone();
                let ops: Vec<&ScheduledOperation> = touched
                    .iter()
                    .filter_map(|id| schedule.operation(*id).ok())
                    .collect();
                outcome.notifications = Self::notify_teams(
                    &ops,
                    "weather_update",
                    &format!("weather update: {:.0} mm rainfall, plan adjusted", rainfall),
                    now,
                );
                Ok(outcome)
            })
            .await
    }

    async fn handle_demand_change(
        &self,
        schedule_id: &ScheduleId,
        zone: &ZoneId,
        additional_m3: f64,
        urgency: Urgency,
        reason: &str,
        now: NaiveDateTime,
    ) -> SluiceResult<AdaptationOutcome> {
        if additional_m3 <= 0.0 {
            return Err(SluiceError::InvalidInput(
                "demand change must request additional water".to_string(),
            ));
        }
        let delivery_gates = self.network.zone_delivery_gates(zone)?.to_vec();
        if delivery_gates.is_empty() {
            return Err(SluiceError::not_found("zone delivery gates", zone.as_str()));
        }
        let strategy = match urgency {
            Urgency::Emergency => AdaptationStrategy::EmergencyOverride,
            _ => AdaptationStrategy::IncreaseFlow,
        };

        // Delivery horizon by urgency; flow splits evenly across gates.
        let (lead, horizon_hours) = match urgency {
            Urgency::Emergency => (ChronoDuration::minutes(30), 2.0),
            Urgency::High => (ChronoDuration::hours(2), 4.0),
            Urgency::Normal => (ChronoDuration::hours(12), 12.0),
        };
        let flow_per_gate = additional_m3 / (horizon_hours * 3600.0) / delivery_gates.len() as f64;
        let cap = match urgency {
            Urgency::Emergency => 100.0,
            _ => 90.0,
        };

        let network = Arc::clone(&self.network);
        let zone_id = zone.clone();
        let reason = reason.to_string();
        let reason_for_emergency = reason.clone();
        let gates = delivery_gates.clone();

        let mut outcome = self
            .store
            .with_schedule(schedule_id, move |schedule| {
                let mut outcome = AdaptationOutcome::empty(strategy, schedule.version);
                outcome.affected_zones = vec![zone_id.clone()];
                for gate_id in &gates {
                    let gate = network.gate(gate_id)?;
                    let opening =
                        (flow_per_gate / gate.max_flow_m3s.value() * 100.0).min(cap);
                    let start = now + lead;
                    let id = schedule.push_operation(ScheduledOperation {
                        id: OperationId(0),
                        gate_id: gate_id.clone(),
                        zone_id: Some(zone_id.clone()),
                        kind: OperationKind::Emergency,
                        date: start.date(),
                        planned_start: start.time(),
                        planned_end: (start + ChronoDuration::minutes(15)).time(),
                        sequence: 0,
                        target_opening_percent: opening,
                        expected_flow_before_m3s: 0.0,
                        expected_flow_after_m3s: flow_per_gate,
                        team: None,
                        status: OperationStatus::Scheduled,
                        actual: None,
                        notes: Some(format!("{urgency:?} demand change: {reason}")),
                    });
                    if urgency == Urgency::Emergency {
                        schedule
                            .operation_mut(id)?
                            .transition_to(OperationStatus::InProgress)?;
                    }
                    outcome.new_operations.push(id);
                }
                schedule.bump_version();
                outcome.schedule_version = schedule.version;
                Ok(outcome)
            })
            .await?;

        // Emergencies bypass the plan entirely: drive the gates now.
        if urgency == Urgency::Emergency {
            for gate_id in &delivery_gates {
                let gate = self.network.gate(gate_id)?;
                let opening = (flow_per_gate / gate.max_flow_m3s.value() * 100.0).min(100.0);
                self.controller
                    .force_position(gate_id, opening, "adapter", &reason_for_emergency, now)
                    .await?;
            }
            outcome
                .warnings
                .push("emergency demand served by direct gate commands".to_string());
        }
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_team_unavailable(
        &self,
        schedule_id: &ScheduleId,
        team: &sluice_core::TeamId,
        from: chrono::NaiveDate,
        until: chrono::NaiveDate,
        reason: &str,
        replacements: &[FieldTeam],
        now: NaiveDateTime,
    ) -> SluiceResult<AdaptationOutcome> {
        let network = Arc::clone(&self.network);
        let team = team.clone();
        let reason = reason.to_string();
        let replacements = replacements.to_vec();

        self.store
            .with_schedule(schedule_id, move |schedule| {
                let affected: Vec<OperationId> = schedule
                    .operations()
                    .iter()
                    .filter(|op| {
                        op.status == OperationStatus::Scheduled
                            && op.team.as_ref() == Some(&team)
                            && op.date >= from
                            && op.date <= until
                    })
                    .map(|op| op.id)
                    .collect();

                let mut outcome =
                    AdaptationOutcome::empty(AdaptationStrategy::Reassign, schedule.version);
                if affected.is_empty() {
                    return Ok(outcome);
                }
                outcome.affected_operations = affected.clone();

                let mut reassigned = 0usize;
                for id in &affected {
                    let (gate_id, zone) = {
                        let op = schedule.operation(*id)?;
                        (op.gate_id.clone(), op.zone_id.clone())
                    };
                    let gate = network.gate(&gate_id)?;

                    let mut candidates: Vec<&FieldTeam> = replacements
                        .iter()
                        .filter(|t| t.active && t.code != team)
                        .filter(|t| t.can_operate(gate.gate_type))
                        .filter(|t| {
                            zone.as_ref()
                                .map(|z| {
                                    t.assigned_zones.is_empty() || t.assigned_zones.contains(z)
                                })
                                .unwrap_or(true)
                        })
                        .collect();
                    candidates.sort_by(|a, b| {
                        let da = haversine_km(
                            (a.base_latitude, a.base_longitude),
                            (gate.latitude, gate.longitude),
                        );
                        let db = haversine_km(
                            (b.base_latitude, b.base_longitude),
                            (gate.latitude, gate.longitude),
                        );
                        da.partial_cmp(&db)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| a.code.cmp(&b.code))
                    });

                    let op = schedule.operation_mut(*id)?;
                    match candidates.first() {
                        Some(replacement) => {
                            op.team = Some(replacement.code.clone());
                            op.notes = Some(format!("reassigned from {team}: {reason}"));
                            reassigned += 1;
                        }
                        None => {
                            // No replacement: push past the unavailability.
                            let delay_days = (until - op.date).num_days() + 1;
                            op.date += ChronoDuration::days(delay_days);
                            op.notes = Some(format!("delayed, {team} unavailable: {reason}"));
                        }
                    }
                }

                if reassigned == 0 {
                    outcome.strategy = AdaptationStrategy::DelayOperations;
                }
                schedule.bump_version();
                outcome.schedule_version = schedule.version;
                let ops: Vec<&ScheduledOperation> = affected
                    .iter()
                    .filter_map(|id| schedule.operation(*id).ok())
                    .collect();
                outcome.notifications = Self::notify_teams(
                    &ops,
                    "team_unavailable",
                    &format!("operations moved off {team}: {reason}"),
                    now,
                );
                Ok(outcome)
            })
            .await
    }

    /// Full reoptimization of the remaining horizon.
    ///
    /// Completed and in-progress operations are never modified; their
    /// delivered volume is subtracted from the demands and their gate
    /// positions stand as boundary conditions in verification.
    async fn reoptimize(
        &self,
        schedule_id: &ScheduleId,
        from_date: chrono::NaiveDate,
        demands: &[AggregatedDemand],
        teams: &[FieldTeam],
        reason: &str,
        now: NaiveDateTime,
    ) -> SluiceResult<AdaptationOutcome> {
        let snapshot = self.store.get(schedule_id).await?;
        let base_version = snapshot.version;

        // Delivered (or in-flight) volume per delivery gate.
        let mut delivered: HashMap<GateId, f64> = HashMap::new();
        for op in snapshot.fixed_operations() {
            if op.zone_id.is_some() {
                *delivered.entry(op.gate_id.clone()).or_insert(0.0) += op.expected_volume_m3();
            }
        }
        let remaining: Vec<AggregatedDemand> = demands
            .iter()
            .filter_map(|demand| {
                let served = delivered.get(&demand.delivery_gate).copied().unwrap_or(0.0);
                let left = demand.total_volume_m3 - served;
                (left > 1.0).then(|| {
                    let mut d = demand.clone();
                    d.total_volume_m3 = left;
                    d
                })
            })
            .collect();

        if remaining.is_empty() {
            // Everything already delivered or in flight; nothing to re-plan.
            return Ok(AdaptationOutcome::empty(
                AdaptationStrategy::Reoptimize,
                base_version,
            ));
        }

        // Heavy solve off the async path.
        let planner = self.planner.clone();
        let network = Arc::clone(&self.network);
        let week = snapshot.week;
        let teams_owned = teams.to_vec();
        let remaining_for_build = remaining.clone();
        let build = tokio::task::spawn_blocking(move || {
            planner.build(&network, week, &remaining_for_build, &teams_owned, None)
        })
        .await
        .map_err(|e| SluiceError::Other(format!("reoptimization task failed: {e}")))?;
        let rebuilt = build.map_err(SluiceError::from)?;

        let reason = reason.to_string();
        self.store
            .with_schedule(schedule_id, move |schedule| {
                if schedule.version != base_version {
                    return Err(SluiceError::state_conflict(
                        "schedule version",
                        schedule.version,
                        base_version,
                    ));
                }
                let mut outcome =
                    AdaptationOutcome::empty(AdaptationStrategy::Reoptimize, schedule.version);

                // Cancel the flexible remainder.
                let flexible: Vec<OperationId> = schedule
                    .operations()
                    .iter()
                    .filter(|op| op.status == OperationStatus::Scheduled && op.date >= from_date)
                    .map(|op| op.id)
                    .collect();
                for id in &flexible {
                    let op = schedule.operation_mut(*id)?;
                    op.transition_to(OperationStatus::Cancelled)?;
                    op.notes = Some(format!("reoptimized: {reason}"));
                    outcome.cancelled_operations.push(*id);
                }
                outcome.affected_operations = flexible;

                // Append the rebuilt remainder.
                for op in rebuilt.schedule.operations() {
                    if op.date < from_date {
                        continue;
                    }
                    let mut replacement = op.clone();
                    replacement.notes = Some("added during reoptimization".to_string());
                    let id = schedule.push_operation(replacement);
                    outcome.new_operations.push(id);
                }

                schedule.metrics.total_travel_km = rebuilt.schedule.metrics.total_travel_km;
                schedule.metrics.operation_count = schedule.operations().len();
                schedule.bump_version();
                outcome.schedule_version = schedule.version;
                let ops: Vec<&ScheduledOperation> = outcome
                    .new_operations
                    .iter()
                    .filter_map(|id| schedule.operation(*id).ok())
                    .collect();
                outcome.notifications =
                    Self::notify_teams(&ops, "schedule_update", &format!("schedule reoptimized: {reason}"), now);
                Ok(outcome)
            })
            .await
    }

    /// Privileged direct write: bypass the planner, command the gate, and
    /// mark overlapping operations overridden.
    async fn emergency_override(
        &self,
        schedule_id: &ScheduleId,
        gate_id: &GateId,
        target_opening_percent: f64,
        operator: &str,
        reason: &str,
        now: NaiveDateTime,
    ) -> SluiceResult<AdaptationOutcome> {
        self.controller
            .force_position(gate_id, target_opening_percent, operator, reason, now)
            .await?;

        let gate = gate_id.clone();
        let operator = operator.to_string();
        let reason = reason.to_string();
        self.store
            .with_schedule(schedule_id, move |schedule| {
                let mut outcome = AdaptationOutcome::empty(
                    AdaptationStrategy::EmergencyOverride,
                    schedule.version,
                );
                let overlapping: Vec<OperationId> = schedule
                    .operations()
                    .iter()
                    .filter(|op| {
                        op.gate_id == gate
                            && matches!(
                                op.status,
                                OperationStatus::Scheduled | OperationStatus::InProgress
                            )
                    })
                    .map(|op| op.id)
                    .collect();
                for id in &overlapping {
                    let op = schedule.operation_mut(*id)?;
                    op.transition_to(OperationStatus::Overridden)?;
                    op.notes = Some(format!("overridden by {operator}: {reason}"));
                }
                outcome.affected_operations = overlapping;
                schedule.bump_version();
                outcome.schedule_version = schedule.version;
                Ok(outcome)
            })
            .await
    }
}
