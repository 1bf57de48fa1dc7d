//! Weekly allocation core: time slots and the LP relaxation.
//!
//! The planning horizon is discretized into 30-minute slots inside working
//! hours on the configured operation days. The continuous core of the weekly
//! problem - delivered flow per (delivery gate, slot), spill, shortfall - is
//! solved as an LP with the Clarabel backend:
//!
//! ```text
//! minimize    Σ flow·(w_changes/q_max + ε·slot)  +  w_spill·spill  +  P·short
//! subject to  Σ_t flow[g,t]·slot_s + short[g] − spill[g] = volume[g]
//!             Σ_{g ∋ c} flow[g,t] ≤ margin · q_max(c)        per canal gate, slot
//!             0 ≤ flow[g,t] ≤ limit(g)
//! ```
//!
//! The hydraulic link stays linear (`flow = opening/100 · q_max`), so
//! openings are recovered directly from flows; the nonlinear check against
//! the network solver happens afterwards in the plan builder. The small
//! `ε·slot` term makes early slots strictly cheaper, which pins the LP to a
//! unique optimum and keeps regenerated plans identical.
//!
//! Binary structure (operated slots, team assignment, routing) is derived
//! deterministically from this relaxation downstream; the greedy constructor
//! in [`crate::greedy`] is the fallback when the LP fails.

use crate::constraints::ConstraintRegistry;
use crate::PlanError;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use good_lp::solvers::clarabel::clarabel;
use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel, Variable};
use sluice_core::{GateId, IsoWeek, Network, ZoneId};
use sluice_demand::AggregatedDemand;
use sluice_hydro::router;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Planner tunables.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub slot_minutes: u32,
    pub operation_days: Vec<Weekday>,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub weight_travel: f64,
    pub weight_changes: f64,
    pub weight_spill: f64,
    pub shortfall_penalty: f64,
    /// Safety margin applied to canal capacities.
    pub capacity_margin: f64,
    pub max_feasibility_tries: u32,
    /// Budget for the weekly build; exceeding it is logged and counts as a
    /// timeout for fallback purposes.
    pub time_limit_s: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 30,
            operation_days: vec![Weekday::Tue, Weekday::Thu],
            work_start: NaiveTime::from_hms_opt(6, 0, 0).expect("valid time"),
            work_end: NaiveTime::from_hms_opt(18, 0, 0).expect("valid time"),
            weight_travel: 1.0,
            weight_changes: 10.0,
            weight_spill: 100.0,
            shortfall_penalty: 1000.0,
            capacity_margin: 0.95,
            max_feasibility_tries: 5,
            time_limit_s: 60.0,
        }
    }
}

/// One 30-minute planning slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub index: usize,
    pub date: NaiveDate,
    pub start: NaiveTime,
}

impl Slot {
    pub fn start_datetime(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }

    pub fn end_time(&self, slot_minutes: u32) -> NaiveTime {
        self.start + chrono::Duration::minutes(slot_minutes as i64)
    }
}

/// Working-hour slots across the week's operation days.
pub fn build_slots(week: IsoWeek, config: &PlannerConfig) -> Vec<Slot> {
    let monday = week.start_date();
    let mut slots = Vec::new();
    for offset in 0..7 {
        let date = monday + chrono::Duration::days(offset);
        if !config.operation_days.contains(&date.weekday()) {
            continue;
        }
        let mut time = config.work_start;
        while time < config.work_end {
            slots.push(Slot {
                index: slots.len(),
                date,
                start: time,
            });
            time += chrono::Duration::minutes(config.slot_minutes as i64);
        }
    }
    slots
}

/// Continuous allocation produced by the LP (or the greedy fallback).
#[derive(Debug, Clone)]
pub struct Allocation {
    pub slots: Vec<Slot>,
    /// Flow (m3/s) per delivery gate per slot index.
    pub flows: BTreeMap<GateId, Vec<f64>>,
    pub shortfall_m3: BTreeMap<GateId, f64>,
    pub spill_m3: BTreeMap<GateId, f64>,
    /// Supply path (gates, source first) per delivery gate.
    pub paths: BTreeMap<GateId, Vec<GateId>>,
    pub objective: f64,
    pub solve_time_ms: u128,
    pub fallback_used: bool,
}

impl Allocation {
    /// Delivered volume per gate (m3).
    pub fn delivered_m3(&self, config: &PlannerConfig) -> BTreeMap<GateId, f64> {
        let slot_seconds = config.slot_minutes as f64 * 60.0;
        self.flows
            .iter()
            .map(|(gate, flows)| (gate.clone(), flows.iter().sum::<f64>() * slot_seconds))
            .collect()
    }

    /// Peak flow routed through a canal gate across all slots.
    pub fn peak_canal_flow(&self, canal_gate: &GateId) -> f64 {
        let mut peak = 0.0_f64;
        if self.slots.is_empty() {
            return 0.0;
        }
        for t in 0..self.slots.len() {
            let mut through = 0.0;
            for (delivery, path) in &self.paths {
                if path.contains(canal_gate) {
                    through += self.flows[delivery][t];
                }
            }
            peak = peak.max(through);
        }
        peak
    }
}

/// Supply paths for each demand's delivery gate.
pub fn demand_paths(
    network: &Network,
    demands: &[AggregatedDemand],
) -> Result<BTreeMap<GateId, Vec<GateId>>, PlanError> {
    let source = network
        .source()
        .ok_or_else(|| PlanError::Input("network has no source".to_string()))?
        .id
        .clone();
    let mut paths = BTreeMap::new();
    for demand in demands {
        if paths.contains_key(&demand.delivery_gate) {
            return Err(PlanError::Input(format!(
                "duplicate demand for delivery gate {}; aggregate first",
                demand.delivery_gate
            )));
        }
        let destination = network.gate(&demand.delivery_gate)?.downstream.clone();
        let node_path = router::shortest_path(network, &source, &destination)?.ok_or_else(|| {
            PlanError::Infeasible(format!(
                "delivery gate {} unreachable from {}",
                demand.delivery_gate, source
            ))
        })?;
        paths.insert(
            demand.delivery_gate.clone(),
            router::path_gates(network, &node_path)?,
        );
    }
    Ok(paths)
}

/// Slots usable for a demand, excluding the zone's blackout dates.
fn usable_slots(
    slots: &[Slot],
    zone: &ZoneId,
    blackouts: &BTreeMap<ZoneId, Vec<NaiveDate>>,
) -> Vec<usize> {
    let blocked = blackouts.get(zone);
    slots
        .iter()
        .filter(|slot| blocked.map_or(true, |dates| !dates.contains(&slot.date)))
        .map(|slot| slot.index)
        .collect()
}

/// Solve the LP relaxation of the weekly allocation.
pub fn solve_allocation(
    network: &Network,
    week: IsoWeek,
    demands: &[AggregatedDemand],
    blackouts: &BTreeMap<ZoneId, Vec<NaiveDate>>,
    registry: &ConstraintRegistry,
    config: &PlannerConfig,
) -> Result<Allocation, PlanError> {
    if demands.is_empty() {
        return Err(PlanError::Input("no demands to allocate".to_string()));
    }
    let start = Instant::now();
    let slots = build_slots(week, config);
    if slots.is_empty() {
        return Err(PlanError::Input(
            "planner configuration yields no usable time slots".to_string(),
        ));
    }
    let slot_seconds = config.slot_minutes as f64 * 60.0;
    let paths = demand_paths(network, demands)?;

    let mut vars = variables!();

    // flow[g][t], plus spill/shortfall per gate.
    let mut flow_vars: BTreeMap<GateId, Vec<Option<Variable>>> = BTreeMap::new();
    let mut spill_vars: BTreeMap<GateId, Variable> = BTreeMap::new();
    let mut short_vars: BTreeMap<GateId, Variable> = BTreeMap::new();
    let mut objective = Expression::from(0.0);

    for demand in demands {
        let gate = network.gate(&demand.delivery_gate)?;
        let limit = registry.gate_flow_limit(&demand.delivery_gate, gate.max_flow_m3s.value());
        let usable = usable_slots(&slots, &demand.zone_id, blackouts);
        let usable: BTreeSet<usize> = usable.into_iter().collect();

        let mut per_slot = Vec::with_capacity(slots.len());
        for slot in &slots {
            if usable.contains(&slot.index) {
                let v = vars.add(variable().min(0.0).max(limit));
                // Early slots are strictly cheaper: unique optimum, stable
                // regeneration.
                let slot_cost = config.weight_changes / gate.max_flow_m3s.value()
                    + 1e-4 * (slot.index + 1) as f64;
                objective += slot_cost * v;
                per_slot.push(Some(v));
            } else {
                per_slot.push(None);
            }
        }

        let spill = vars.add(variable().min(0.0));
        let short = vars.add(variable().min(0.0));
        objective += config.weight_spill * spill + config.shortfall_penalty * short;
        flow_vars.insert(demand.delivery_gate.clone(), per_slot);
        spill_vars.insert(demand.delivery_gate.clone(), spill);
        short_vars.insert(demand.delivery_gate.clone(), short);
    }

    let mut problem = vars.minimise(objective).using(clarabel);

    // Volume balance per delivery gate.
    for demand in demands {
        let per_slot = &flow_vars[&demand.delivery_gate];
        let mut delivered = Expression::from(0.0);
        for v in per_slot.iter().flatten() {
            delivered += slot_seconds * *v;
        }
        let spill = spill_vars[&demand.delivery_gate];
        let short = short_vars[&demand.delivery_gate];
        problem = problem.with(constraint!(
            delivered + short - spill == demand.total_volume_m3
        ));
    }

    // Canal capacity per (canal gate, slot): all deliveries routed through a
    // gate share its derated capacity. Continuity at junctions is implicit
    // in the path formulation.
    let mut canal_gates: BTreeSet<GateId> = BTreeSet::new();
    for path in paths.values() {
        canal_gates.extend(path.iter().cloned());
    }
    for canal_gate in &canal_gates {
        let gate = network.gate(canal_gate)?;
        let capacity = config.capacity_margin
            * registry.gate_flow_limit(canal_gate, gate.max_flow_m3s.value());
        for t in 0..slots.len() {
            let mut through = Expression::from(0.0);
            let mut any = false;
            for demand in demands {
                if paths[&demand.delivery_gate].contains(canal_gate) {
                    if let Some(v) = flow_vars[&demand.delivery_gate][t] {
                        through += v;
                        any = true;
                    }
                }
            }
            if any {
                problem = problem.with(constraint!(through <= capacity));
            }
        }
    }

    let solution = problem
        .solve()
        .map_err(|e| PlanError::Solver(format!("LP allocation failed: {e:?}")))?;

    let mut flows = BTreeMap::new();
    let mut shortfall_m3 = BTreeMap::new();
    let mut spill_m3 = BTreeMap::new();
    let mut objective_value = 0.0;
    for demand in demands {
        let per_slot: Vec<f64> = flow_vars[&demand.delivery_gate]
            .iter()
            .map(|v| v.map(|v| solution.value(v).max(0.0)).unwrap_or(0.0))
            .collect();
        let spill = solution.value(spill_vars[&demand.delivery_gate]).max(0.0);
        let short = solution.value(short_vars[&demand.delivery_gate]).max(0.0);
        let q_max = network.gate(&demand.delivery_gate)?.max_flow_m3s.value();
        objective_value += config.weight_changes * per_slot.iter().sum::<f64>() / q_max
            + config.weight_spill * spill
            + config.shortfall_penalty * short;
        flows.insert(demand.delivery_gate.clone(), per_slot);
        spill_m3.insert(demand.delivery_gate.clone(), spill);
        shortfall_m3.insert(demand.delivery_gate.clone(), short);
    }

    let solve_time_ms = start.elapsed().as_millis();
    Ok(Allocation {
        slots,
        flows,
        shortfall_m3,
        spill_m3,
        paths,
        objective: objective_value,
        solve_time_ms,
        fallback_used: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_slots_default_week() {
        let config = PlannerConfig::default();
        let slots = build_slots(IsoWeek::new(2025, 23).unwrap(), &config);
        // Two operation days, 06:00-18:00 in 30-minute steps = 24 per day.
        assert_eq!(slots.len(), 48);
        assert_eq!(slots[0].date.weekday(), Weekday::Tue);
        assert_eq!(slots[24].date.weekday(), Weekday::Thu);
        assert_eq!(slots[0].start, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(
            slots[23].start,
            NaiveTime::from_hms_opt(17, 30, 0).unwrap()
        );
        // Indices are dense.
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.index, i);
        }
    }

    #[test]
    fn test_slot_end_time() {
        let slot = Slot {
            index: 0,
            date: NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            start: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        };
        assert_eq!(slot.end_time(30), NaiveTime::from_hms_opt(6, 30, 0).unwrap());
    }
}
