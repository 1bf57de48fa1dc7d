//! Greedy allocation constructor.
//!
//! Fallback for LP failure or timeout: walk demands in weighted-priority
//! order and pour each one into the earliest usable slots at the highest
//! rate the gate and its supply path still allow, tracking per-slot canal
//! headroom. Feasible and deterministic, not optimal.

use crate::constraints::ConstraintRegistry;
use crate::milp::{build_slots, demand_paths, Allocation, PlannerConfig};
use crate::PlanError;
use chrono::NaiveDate;
use sluice_core::{GateId, IsoWeek, Network, ZoneId};
use sluice_demand::AggregatedDemand;
use std::collections::BTreeMap;
use std::time::Instant;

/// Build an allocation by priority-ordered greedy filling.
pub fn greedy_allocation(
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

    // Remaining headroom per (canal gate, slot).
    let mut headroom: BTreeMap<GateId, Vec<f64>> = BTreeMap::new();
    for path in paths.values() {
        for gate_id in path {
            if !headroom.contains_key(gate_id) {
                let gate = network.gate(gate_id)?;
                let capacity = config.capacity_margin
                    * registry.gate_flow_limit(gate_id, gate.max_flow_m3s.value());
                headroom.insert(gate_id.clone(), vec![capacity; slots.len()]);
            }
        }
    }

    // Highest weighted priority first; the aggregator already sorts this
    // way, but the fallback must not depend on caller ordering.
    let mut ordered: Vec<&AggregatedDemand> = demands.iter().collect();
    ordered.sort_by(|a, b| {
        b.weighted_priority
            .partial_cmp(&a.weighted_priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.delivery_gate.cmp(&b.delivery_gate))
    });

    let mut flows: BTreeMap<GateId, Vec<f64>> = BTreeMap::new();
    let mut shortfall_m3 = BTreeMap::new();
    let mut spill_m3 = BTreeMap::new();

    for demand in ordered {
        let gate = network.gate(&demand.delivery_gate)?;
        let rate_limit =
            registry.gate_flow_limit(&demand.delivery_gate, gate.max_flow_m3s.value());
        let path = &paths[&demand.delivery_gate];
        let blocked = blackouts.get(&demand.zone_id);

        let mut remaining = demand.total_volume_m3;
        let mut per_slot = vec![0.0; slots.len()];
        for slot in &slots {
            if remaining <= 0.0 {
                break;
            }
            if blocked.is_some_and(|dates| dates.contains(&slot.date)) {
                continue;
            }
            let path_headroom = path
                .iter()
                .map(|g| headroom[g][slot.index])
                .fold(f64::INFINITY, f64::min);
            let rate = rate_limit.min(path_headroom).min(remaining / slot_seconds);
            if rate <= 1e-9 {
                continue;
            }
            per_slot[slot.index] = rate;
            remaining -= rate * slot_seconds;
            for g in path {
                headroom.get_mut(g).expect("headroom initialized")[slot.index] -= rate;
            }
        }

        shortfall_m3.insert(demand.delivery_gate.clone(), remaining.max(0.0));
        spill_m3.insert(demand.delivery_gate.clone(), 0.0);
        flows.insert(demand.delivery_gate.clone(), per_slot);
    }

    // Price the construction with the same weights the LP uses.
    let mut objective = 0.0;
    for demand in demands {
        let q_max = network.gate(&demand.delivery_gate)?.max_flow_m3s.value();
        objective += config.weight_changes * flows[&demand.delivery_gate].iter().sum::<f64>()
            / q_max
            + config.shortfall_penalty * shortfall_m3[&demand.delivery_gate];
    }

    Ok(Allocation {
        slots,
        flows,
        shortfall_m3,
        spill_m3,
        paths,
        objective,
        solve_time_ms: start.elapsed().as_millis(),
        fallback_used: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use sluice_core::{IsoWeek, PlotId, Priority};
    use sluice_io::fixtures::demo_network;

    fn week() -> IsoWeek {
        IsoWeek::new(2025, 23).unwrap()
    }

    fn window(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn demand(gate: &str, zone: &str, volume: f64, priority: f64) -> AggregatedDemand {
        AggregatedDemand {
            delivery_gate: GateId::new(gate),
            zone_id: ZoneId::new(zone),
            week: week(),
            total_volume_m3: volume,
            weighted_priority: priority,
            window_start: window(3, 6),
            window_end: window(5, 18),
            plots: vec![PlotId::new("P-x")],
        }
    }

    #[test]
    fn test_greedy_meets_modest_demand() {
        let network = demo_network();
        let demands = vec![demand("M(0,2)->Zone_2", "Zone_2", 20_000.0, Priority::High.weight())];
        let allocation = greedy_allocation(
            &network,
            week(),
            &demands,
            &BTreeMap::new(),
            &ConstraintRegistry::new(),
            &PlannerConfig::default(),
        )
        .unwrap();

        assert!(allocation.fallback_used);
        let delivered = allocation.delivered_m3(&PlannerConfig::default());
        let gate = GateId::new("M(0,2)->Zone_2");
        assert!((delivered[&gate] - 20_000.0).abs() < 1.0);
        assert!(allocation.shortfall_m3[&gate] < 1.0);
        // Early slots fill first.
        assert!(allocation.flows[&gate][0] > 0.0);
    }

    #[test]
    fn test_greedy_respects_shared_canal_capacity() {
        let network = demo_network();
        // Zone_5 and Zone_6 share the canal down to M(0,12); huge volumes
        // saturate it, and the per-slot total must stay within the margin.
        let demands = vec![
            demand("M(0,12)->Zone_5", "Zone_5", 400_000.0, 9.0),
            demand("M(0,14)->Zone_6", "Zone_6", 400_000.0, 7.0),
        ];
        let config = PlannerConfig::default();
        let allocation = greedy_allocation(
            &network,
            week(),
            &demands,
            &BTreeMap::new(),
            &ConstraintRegistry::new(),
            &config,
        )
        .unwrap();

        // M(0,5)->M(0,12) is rated 7 m3/s and carries both zones.
        let shared = GateId::new("M(0,5)->M(0,12)");
        let z5 = &allocation.flows[&GateId::new("M(0,12)->Zone_5")];
        let z6 = &allocation.flows[&GateId::new("M(0,14)->Zone_6")];
        for t in 0..allocation.slots.len() {
            assert!(z5[t] + z6[t] <= 0.95 * 7.0 + 1e-6);
        }
        assert!(allocation.peak_canal_flow(&shared) <= 0.95 * 7.0 + 1e-6);
        // Demand this size cannot be met; the shortfall is reported.
        assert!(allocation.shortfall_m3.values().any(|s| *s > 0.0));
    }

    #[test]
    fn test_greedy_skips_blackout_dates() {
        let network = demo_network();
        let demands = vec![demand("M(0,2)->Zone_2", "Zone_2", 10_000.0, 5.0)];
        let config = PlannerConfig::default();
        // Black out the Tuesday of week 23 (2025-06-03).
        let mut blackouts = BTreeMap::new();
        blackouts.insert(
            ZoneId::new("Zone_2"),
            vec![NaiveDate::from_ymd_opt(2025, 6, 3).unwrap()],
        );
        let allocation = greedy_allocation(
            &network,
            week(),
            &demands,
            &blackouts,
            &ConstraintRegistry::new(),
            &config,
        )
        .unwrap();

        let flows = &allocation.flows[&GateId::new("M(0,2)->Zone_2")];
        for slot in &allocation.slots {
            if slot.date == NaiveDate::from_ymd_opt(2025, 6, 3).unwrap() {
                assert_eq!(flows[slot.index], 0.0);
            }
        }
        // Thursday still absorbs the demand.
        assert!(flows.iter().sum::<f64>() > 0.0);
    }
}
