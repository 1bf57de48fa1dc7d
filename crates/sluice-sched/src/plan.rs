//! Weekly plan builder.
//!
//! Orchestrates the full weekly cycle: allocate flows (LP, greedy on
//! failure), turn slot flows into gate operations with gravity-ordered
//! upstream support, verify the opening vector against the nonlinear network
//! solver (perturbing openings when canals run over capacity), assign
//! operations to field teams, and sequence each team-day with the travel
//! optimizer into printable field instructions.
//!
//! Building the same week twice from the same inputs yields an identical
//! operation set: every choice point is ordered, and the LP optimum is
//! unique by construction.

use crate::constraints::ConstraintRegistry;
use crate::greedy::greedy_allocation;
use crate::milp::{solve_allocation, Allocation, PlannerConfig, Slot};
use crate::travel::{haversine_km, RouteStop, TravelOptimizer};
use crate::PlanError;
use chrono::{NaiveDate, NaiveTime};
use sluice_core::{
    Diagnostics, FieldInstruction, FieldTeam, GateId, IsoWeek, Network, OperationKind,
    OperationStatus, ScheduleMetrics, ScheduledOperation, TeamId, Waypoint, WeeklySchedule,
    ZoneId,
};
use sluice_demand::{AggregatedDemand, WeeklyOutlook};
use sluice_hydro::{GateOpenings, HydraulicSolver};
use std::collections::BTreeMap;

/// Weekly planner facade.
#[derive(Debug, Clone, Default)]
pub struct WeeklyPlanner {
    pub config: PlannerConfig,
    pub travel: TravelOptimizer,
    pub solver: HydraulicSolver,
    pub registry: ConstraintRegistry,
}

/// Outcome of a weekly build.
#[derive(Debug)]
pub struct PlanOutcome {
    pub schedule: WeeklySchedule,
    pub diagnostics: Diagnostics,
    /// Opening vector (meters) the feasibility check accepted.
    pub accepted_openings: GateOpenings,
}

/// A contiguous run of active slots for one delivery gate on one date.
#[derive(Debug, Clone)]
struct DeliveryRun {
    gate: GateId,
    zone: Option<ZoneId>,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    mean_flow_m3s: f64,
}

impl WeeklyPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a draft schedule for `week`.
    pub fn build(
        &self,
        network: &Network,
        week: IsoWeek,
        demands: &[AggregatedDemand],
        teams: &[FieldTeam],
        outlook: Option<&WeeklyOutlook>,
    ) -> Result<PlanOutcome, PlanError> {
        let mut diagnostics = Diagnostics::new();

        let blackouts: BTreeMap<ZoneId, Vec<NaiveDate>> = outlook
            .map(|o| {
                o.zones
                    .iter()
                    .map(|(zone, z)| (zone.clone(), z.blackout_dates.clone()))
                    .collect()
            })
            .unwrap_or_default();

        // LP core with greedy fallback.
        let allocation = match solve_allocation(
            network,
            week,
            demands,
            &blackouts,
            &self.registry,
            &self.config,
        ) {
            Ok(allocation) => {
                if allocation.solve_time_ms as f64 / 1000.0 > self.config.time_limit_s {
                    diagnostics.add_warning(
                        "optimizer",
                        &format!(
                            "LP allocation exceeded the {}s budget ({} ms)",
                            self.config.time_limit_s, allocation.solve_time_ms
                        ),
                    );
                }
                allocation
            }
            Err(err) => {
                diagnostics.add_warning(
                    "optimizer",
                    &format!("LP allocation failed ({err}); using greedy constructor"),
                );
                greedy_allocation(
                    network,
                    week,
                    demands,
                    &blackouts,
                    &self.registry,
                    &self.config,
                )?
            }
        };

        let runs = self.delivery_runs(demands, &allocation);
        let mut schedule = WeeklySchedule::new(week, 1);
        self.emit_operations(network, &allocation, &runs, &mut schedule)?;

        let accepted_openings =
            self.verify_feasibility(network, &mut schedule, &mut diagnostics)?;

        self.assign_teams(network, teams, &mut schedule, &mut diagnostics)?;
        let (travel_km, labor_hours) =
            self.route_teams(network, teams, &mut schedule, &mut diagnostics)?;

        // Metrics.
        let delivered = allocation.delivered_m3(&self.config);
        let total_demand: f64 = demands.iter().map(|d| d.total_volume_m3).sum();
        let total_allocated: f64 = delivered.values().sum();
        schedule.field_days = {
            let mut days: Vec<NaiveDate> = runs.iter().map(|r| r.date).collect();
            days.sort();
            days.dedup();
            days
        };
        schedule.metrics = ScheduleMetrics {
            total_demand_m3: total_demand,
            total_allocated_m3: total_allocated,
            efficiency_percent: if total_demand > 0.0 {
                (total_allocated / total_demand * 100.0).min(100.0)
            } else {
                100.0
            },
            total_travel_km: travel_km,
            estimated_labor_hours: labor_hours,
            operation_count: schedule.operations().len(),
            objective_value: allocation.objective + self.config.weight_travel * travel_km,
            fallback_used: allocation.fallback_used,
        };

        for (gate, shortfall) in &allocation.shortfall_m3 {
            if *shortfall > 1.0 {
                diagnostics.add_warning_with_entity(
                    "allocation",
                    &format!("{:.0} m3 of demand could not be scheduled", shortfall),
                    gate.as_str(),
                );
            }
        }

        Ok(PlanOutcome {
            schedule,
            diagnostics,
            accepted_openings,
        })
    }

    /// Collapse per-slot flows into contiguous delivery runs.
    fn delivery_runs(
        &self,
        demands: &[AggregatedDemand],
        allocation: &Allocation,
    ) -> Vec<DeliveryRun> {
        let zone_of: BTreeMap<&GateId, &ZoneId> = demands
            .iter()
            .map(|d| (&d.delivery_gate, &d.zone_id))
            .collect();
        let mut runs = Vec::new();
        for (gate, flows) in &allocation.flows {
            let mut current: Option<(Slot, Slot, f64, usize)> = None;
            for slot in &allocation.slots {
                let flow = flows[slot.index];
                let active = flow > 1e-6;
                match current.as_mut() {
                    Some((_, last, sum, count))
                        if active
                            && slot.date == last.date
                            && slot.index == last.index + 1 =>
                    {
                        *last = *slot;
                        *sum += flow;
                        *count += 1;
                    }
                    _ => {
                        if let Some((first, last, sum, count)) = current.take() {
                            runs.push(self.close_run(gate, &zone_of, first, last, sum, count));
                        }
                        if active {
                            current = Some((*slot, *slot, flow, 1));
                        }
                    }
                }
            }
            if let Some((first, last, sum, count)) = current.take() {
                runs.push(self.close_run(gate, &zone_of, first, last, sum, count));
            }
        }
        runs.sort_by(|a, b| {
            (a.date, a.start, &a.gate).cmp(&(b.date, b.start, &b.gate))
        });
        runs
    }

    fn close_run(
        &self,
        gate: &GateId,
        zone_of: &BTreeMap<&GateId, &ZoneId>,
        first: Slot,
        last: Slot,
        sum: f64,
        count: usize,
    ) -> DeliveryRun {
        DeliveryRun {
            gate: gate.clone(),
            zone: zone_of.get(gate).map(|z| (*z).clone()),
            date: first.date,
            start: first.start,
            end: last.end_time(self.config.slot_minutes),
            mean_flow_m3s: sum / count as f64,
        }
    }

    /// Emit adjust/close operations for delivery runs plus gravity-ordered
    /// support operations on upstream gates.
    fn emit_operations(
        &self,
        network: &Network,
        allocation: &Allocation,
        runs: &[DeliveryRun],
        schedule: &mut WeeklySchedule,
    ) -> Result<(), PlanError> {
        let slot = chrono::Duration::minutes(self.config.slot_minutes as i64);

        // Upstream support per (canal gate, date): open one slot before the
        // earliest dependent run, close one slot after the latest.
        struct Support {
            open_at: NaiveTime,
            close_at: NaiveTime,
            peak_flow: f64,
        }
        let mut support: BTreeMap<(GateId, NaiveDate), Support> = BTreeMap::new();
        for run in runs {
            let path = &allocation.paths[&run.gate];
            for gate_id in path {
                if gate_id == &run.gate {
                    continue;
                }
                let entry = support
                    .entry((gate_id.clone(), run.date))
                    .or_insert(Support {
                        open_at: run.start,
                        close_at: run.end,
                        peak_flow: 0.0,
                    });
                entry.open_at = entry.open_at.min(run.start);
                entry.close_at = entry.close_at.max(run.end);
            }
        }
        for ((gate_id, _), entry) in support.iter_mut() {
            entry.peak_flow = allocation.peak_canal_flow(gate_id);
            entry.open_at = (entry.open_at - slot).max(self.config.work_start);
            entry.close_at = entry.close_at.min(self.config.work_end);
        }

        // Gravity order: upstream gates first within a timestamp. BTreeMap
        // iteration is stable; sequence numbers are assigned after routing.
        for ((gate_id, date), sup) in &support {
            let gate = network.gate(gate_id)?;
            let opening_percent =
                (sup.peak_flow / gate.max_flow_m3s.value() * 100.0).min(100.0);
            if opening_percent <= 0.0 {
                continue;
            }
            schedule.push_operation(ScheduledOperation {
                id: sluice_core::OperationId(0),
                gate_id: gate_id.clone(),
                zone_id: None,
                kind: OperationKind::Adjust,
                date: *date,
                planned_start: sup.open_at,
                planned_end: sup.close_at,
                sequence: 0,
                target_opening_percent: opening_percent,
                expected_flow_before_m3s: 0.0,
                expected_flow_after_m3s: sup.peak_flow,
                team: None,
                status: OperationStatus::Scheduled,
                actual: None,
                notes: Some("carry flow for downstream deliveries".to_string()),
            });
            schedule.push_operation(ScheduledOperation {
                id: sluice_core::OperationId(0),
                gate_id: gate_id.clone(),
                zone_id: None,
                kind: OperationKind::Close,
                date: *date,
                planned_start: sup.close_at,
                planned_end: (sup.close_at + slot).min(self.config.work_end.max(sup.close_at)),
                sequence: 0,
                target_opening_percent: 0.0,
                expected_flow_before_m3s: sup.peak_flow,
                expected_flow_after_m3s: 0.0,
                team: None,
                status: OperationStatus::Scheduled,
                actual: None,
                notes: None,
            });
        }

        for run in runs {
            let gate = network.gate(&run.gate)?;
            let opening_percent =
                (run.mean_flow_m3s / gate.max_flow_m3s.value() * 100.0).min(100.0);
            schedule.push_operation(ScheduledOperation {
                id: sluice_core::OperationId(0),
                gate_id: run.gate.clone(),
                zone_id: run.zone.clone(),
                kind: OperationKind::Adjust,
                date: run.date,
                planned_start: run.start,
                planned_end: run.end,
                sequence: 0,
                target_opening_percent: opening_percent,
                expected_flow_before_m3s: 0.0,
                expected_flow_after_m3s: run.mean_flow_m3s,
                team: None,
                status: OperationStatus::Scheduled,
                actual: None,
                notes: None,
            });
            schedule.push_operation(ScheduledOperation {
                id: sluice_core::OperationId(0),
                gate_id: run.gate.clone(),
                zone_id: run.zone.clone(),
                kind: OperationKind::Close,
                date: run.date,
                planned_start: run.end,
                planned_end: (run.end + chrono::Duration::minutes(15))
                    .max(run.end),
                sequence: 0,
                target_opening_percent: 0.0,
                expected_flow_before_m3s: run.mean_flow_m3s,
                expected_flow_after_m3s: 0.0,
                team: None,
                status: OperationStatus::Scheduled,
                actual: None,
                notes: None,
            });
        }
        Ok(())
    }

    /// Check the plan's opening vector against the network solver; scale
    /// openings down (bisection steps) while canals run over capacity.
    fn verify_feasibility(
        &self,
        network: &Network,
        schedule: &mut WeeklySchedule,
        diagnostics: &mut Diagnostics,
    ) -> Result<GateOpenings, PlanError> {
        let mut scale = 1.0_f64;
        let mut accepted = GateOpenings::new();
        for attempt in 0..self.config.max_feasibility_tries {
            let mut openings = GateOpenings::new();
            for op in schedule.operations() {
                if op.kind == OperationKind::Close {
                    continue;
                }
                let gate = network.gate(&op.gate_id)?;
                let meters =
                    op.target_opening_percent / 100.0 * gate.max_opening_m.value() * scale;
                let entry = openings.entry(op.gate_id.clone()).or_insert(0.0);
                *entry = entry.max(meters);
            }
            let solution = self.solver.solve(network, &openings)?;

            // The solver already respects physical ratings; what can still
            // break here are operator-configured deratings from the
            // constraint registry.
            let mut violations = Vec::new();
            for (gate_id, flow) in &solution.gate_flows {
                let gate = network.gate(gate_id)?;
                let limit = self
                    .registry
                    .gate_flow_limit(gate_id, gate.max_flow_m3s.value());
                if *flow > limit + 1e-9 {
                    violations.push(format!(
                        "{} carries {:.2} m3/s against a {:.2} m3/s limit",
                        gate_id, flow, limit
                    ));
                }
            }
            if violations.is_empty() {
                if !solution.converged {
                    diagnostics.add_warning(
                        "hydraulics",
                        "feasibility solve did not fully converge; accepting best state",
                    );
                }
                if attempt > 0 {
                    diagnostics.add_warning(
                        "hydraulics",
                        &format!(
                            "openings scaled to {:.0}% after {} feasibility tries",
                            scale * 100.0,
                            attempt + 1
                        ),
                    );
                    for op in schedule.operations_mut() {
                        if op.kind != OperationKind::Close {
                            op.target_opening_percent *= scale;
                        }
                    }
                }
                accepted = openings;
                return Ok(accepted);
            }
            for violation in &violations {
                diagnostics.add_warning("hydraulics", violation);
            }
            scale *= 0.5;
        }
        diagnostics.add_error(
            "hydraulics",
            "plan still violates canal capacity after opening perturbation",
        );
        Ok(accepted)
    }

    /// Assign each operation to the nearest capable team with daily
    /// headroom.
    fn assign_teams(
        &self,
        network: &Network,
        teams: &[FieldTeam],
        schedule: &mut WeeklySchedule,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), PlanError> {
        let mut load: BTreeMap<(TeamId, NaiveDate), u32> = BTreeMap::new();
        let mut order: Vec<usize> = (0..schedule.operations().len()).collect();
        order.sort_by(|&a, &b| {
            let oa = &schedule.operations()[a];
            let ob = &schedule.operations()[b];
            (oa.date, oa.planned_start, &oa.gate_id).cmp(&(ob.date, ob.planned_start, &ob.gate_id))
        });

        for idx in order {
            let (gate_id, date, zone) = {
                let op = &schedule.operations()[idx];
                (op.gate_id.clone(), op.date, op.zone_id.clone())
            };
            let gate = network.gate(&gate_id)?;
            let location = (gate.latitude, gate.longitude);

            let mut candidates: Vec<&FieldTeam> = teams
                .iter()
                .filter(|t| t.active && t.can_operate(gate.gate_type))
                .filter(|t| {
                    zone.as_ref()
                        .map(|z| t.assigned_zones.is_empty() || t.assigned_zones.contains(z))
                        .unwrap_or(true)
                })
                .filter(|t| {
                    let cap = self.registry.team_cap(&t.code, t.max_operations_per_day);
                    load.get(&(t.code.clone(), date)).copied().unwrap_or(0) < cap
                })
                .collect();
            candidates.sort_by(|a, b| {
                let da = haversine_km((a.base_latitude, a.base_longitude), location);
                let db = haversine_km((b.base_latitude, b.base_longitude), location);
                da.partial_cmp(&db)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.code.cmp(&b.code))
            });

            match candidates.first() {
                Some(team) => {
                    *load.entry((team.code.clone(), date)).or_insert(0) += 1;
                    schedule.operations_mut()[idx].team = Some(team.code.clone());
                }
                None => {
                    diagnostics.add_warning_with_entity(
                        "teams",
                        "no team available for operation; left unassigned",
                        gate_id.as_str(),
                    );
                }
            }
        }
        Ok(())
    }

    /// Route each team-day, fill sequence numbers, and emit field
    /// instructions. Returns (total km, total labor hours).
    fn route_teams(
        &self,
        network: &Network,
        teams: &[FieldTeam],
        schedule: &mut WeeklySchedule,
        diagnostics: &mut Diagnostics,
    ) -> Result<(f64, f64), PlanError> {
        let mut groups: BTreeMap<(TeamId, NaiveDate), Vec<usize>> = BTreeMap::new();
        for (idx, op) in schedule.operations().iter().enumerate() {
            if let Some(team) = &op.team {
                groups.entry((team.clone(), op.date)).or_default().push(idx);
            }
        }

        let mut total_km = 0.0;
        let mut total_hours = 0.0;
        let mut instructions = Vec::new();

        for ((team_id, date), op_indices) in groups {
            let team = teams
                .iter()
                .find(|t| t.code == team_id)
                .expect("assignments only reference known teams");

            // One stop per distinct gate; ops at the same gate share it.
            let mut stop_gates: Vec<GateId> = Vec::new();
            for &idx in &op_indices {
                let gate_id = &schedule.operations()[idx].gate_id;
                if !stop_gates.contains(gate_id) {
                    stop_gates.push(gate_id.clone());
                }
            }
            let stops: Vec<RouteStop> = stop_gates
                .iter()
                .map(|gate_id| {
                    let gate = network.gate(gate_id)?;
                    Ok(RouteStop {
                        gate_id: gate_id.clone(),
                        latitude: gate.latitude,
                        longitude: gate.longitude,
                        window: None,
                    })
                })
                .collect::<Result<_, PlanError>>()?;

            let optimizer = TravelOptimizer {
                speed_kmh: team.travel_speed_kmh,
                ..self.travel.clone()
            };
            let plan = optimizer.optimize((team.base_latitude, team.base_longitude), &stops);
            if !TravelOptimizer::acceptable(&plan) {
                diagnostics.add_warning_with_entity(
                    "travel",
                    &format!(
                        "route efficiency {:.2} below the MST acceptance bound",
                        plan.efficiency_score
                    ),
                    team_id.as_str(),
                );
            }

            // Gate -> route rank.
            let rank: BTreeMap<&GateId, usize> = plan
                .order
                .iter()
                .enumerate()
                .map(|(rank, &stop)| (&stop_gates[stop], rank))
                .collect();
            let mut sequenced: Vec<usize> = op_indices.clone();
            sequenced.sort_by_key(|&idx| {
                let op = &schedule.operations()[idx];
                (rank.get(&op.gate_id).copied().unwrap_or(usize::MAX), op.planned_start)
            });
            for (seq, &idx) in sequenced.iter().enumerate() {
                schedule.operations_mut()[idx].sequence = seq as u32 + 1;
            }

            let waypoints: Vec<Waypoint> = plan
                .order
                .iter()
                .map(|&stop| {
                    let gate_id = &stop_gates[stop];
                    let adjust = op_indices
                        .iter()
                        .map(|&idx| &schedule.operations()[idx])
                        .find(|op| &op.gate_id == gate_id && op.kind != OperationKind::Close);
                    Waypoint {
                        gate_id: gate_id.clone(),
                        latitude: stops[stop].latitude,
                        longitude: stops[stop].longitude,
                        target_opening_percent: adjust
                            .map(|op| op.target_opening_percent)
                            .unwrap_or(0.0),
                    }
                })
                .collect();

            total_km += plan.total_distance_km;
            total_hours += plan.total_duration_minutes / 60.0;
            instructions.push(FieldInstruction {
                team: team_id.clone(),
                date,
                operations: sequenced
                    .iter()
                    .map(|&idx| schedule.operations()[idx].id)
                    .collect(),
                total_distance_km: plan.total_distance_km,
                estimated_duration_hours: plan.total_duration_minutes / 60.0,
                waypoints,
                route_polyline: plan.polyline,
                general_notes: format!(
                    "{} gate visits; follow the listed order and confirm each setting",
                    stop_gates.len()
                ),
                safety_notes: vec![
                    "verify no personnel near the gate before moving it".to_string(),
                    "check upstream level before increasing an opening".to_string(),
                    "confirm downstream channel is clear of obstructions".to_string(),
                ],
            });
        }

        schedule.instructions = instructions;
        Ok((total_km, total_hours))
    }
}
