//! Temporal gate sequencing for irrigation requests.
//!
//! Given requested volumes and flow rates per zone, produces the totally
//! ordered open/close command list that moves the water: gates along each
//! supply path open upstream-first with a 2-minute stagger, the water front
//! arrives after the summed reach travel times (Manning velocity at the
//! requested flow), irrigation runs `volume / flow`, and gates close in
//! reverse order with a 5-minute drain stagger.
//!
//! Requests sharing a path prefix run concurrently when their combined flow
//! fits the prefix bottleneck; otherwise they sequence by priority.

use crate::PlanError;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use sluice_core::{GateId, Network, ZoneId};
use sluice_hydro::{canal, router};
use std::collections::BTreeMap;

/// One zone's irrigation request.
#[derive(Debug, Clone)]
pub struct IrrigationRequest {
    pub zone: ZoneId,
    pub volume_m3: f64,
    pub flow_rate_m3s: f64,
    /// 1 = highest priority.
    pub priority: u8,
}

impl IrrigationRequest {
    pub fn duration_hours(&self) -> f64 {
        self.volume_m3 / self.flow_rate_m3s / 3600.0
    }
}

/// Gate movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Open,
    Close,
}

/// A single timed gate command.
#[derive(Debug, Clone, Serialize)]
pub struct GateCommand {
    pub gate_id: GateId,
    pub action: GateAction,
    pub opening_percent: f64,
    pub time: NaiveDateTime,
    pub reason: String,
}

/// Full command timeline for a batch of requests.
#[derive(Debug, Clone, Serialize)]
pub struct TemporalSchedule {
    pub commands: Vec<GateCommand>,
    /// Human-readable event timeline per zone.
    pub timeline: BTreeMap<ZoneId, Vec<(NaiveDateTime, String)>>,
    /// Volume scheduled per zone (m3).
    pub volumes: BTreeMap<ZoneId, f64>,
    pub total_volume_m3: f64,
    pub total_duration_hours: f64,
}

/// Sequencer configuration.
#[derive(Debug, Clone)]
pub struct TemporalScheduler {
    pub open_stagger_minutes: i64,
    pub drain_stagger_minutes: i64,
    /// Idle gap inserted between sequenced batches.
    pub batch_gap_minutes: i64,
}

impl Default for TemporalScheduler {
    fn default() -> Self {
        Self {
            open_stagger_minutes: 2,
            drain_stagger_minutes: 5,
            batch_gap_minutes: 30,
        }
    }
}

struct RoutedRequest {
    request: IrrigationRequest,
    gates: Vec<GateId>,
}

impl TemporalScheduler {
    /// Build the command timeline for `requests` starting at `start`.
    pub fn schedule(
        &self,
        network: &Network,
        requests: &[IrrigationRequest],
        start: NaiveDateTime,
    ) -> Result<TemporalSchedule, PlanError> {
        if requests.is_empty() {
            return Err(PlanError::Input("no irrigation requests".to_string()));
        }
        let source = network
            .source()
            .ok_or_else(|| PlanError::Input("network has no source".to_string()))?
            .id
            .clone();

        let mut routed = Vec::with_capacity(requests.len());
        for request in requests {
            if request.flow_rate_m3s <= 0.0 || request.volume_m3 <= 0.0 {
                return Err(PlanError::Input(format!(
                    "request for {} must have positive volume and flow",
                    request.zone
                )));
            }
            let delivery_gates = network
                .zone_delivery_gates(&request.zone)
                ?;
            let primary = delivery_gates
                .first()
                .ok_or_else(|| PlanError::Input(format!("zone {} has no delivery gate", request.zone)))?;
            let destination = network.gate(primary)?.downstream.clone();
            let path = router::shortest_path(network, &source, &destination)
                ?
                .ok_or_else(|| {
                    PlanError::Infeasible(format!("no path from {} to {}", source, destination))
                })?;
            let gates = router::path_gates(network, &path)?;
            routed.push(RoutedRequest {
                request: request.clone(),
                gates,
            });
        }

        // Highest priority first; zone id breaks ties deterministically.
        routed.sort_by(|a, b| {
            a.request
                .priority
                .cmp(&b.request.priority)
                .then_with(|| a.request.zone.cmp(&b.request.zone))
        });

        // Greedy concurrency packing: add a request to the running batch
        // while every shared gate still fits the combined flow.
        let mut batches: Vec<Vec<&RoutedRequest>> = Vec::new();
        for routed_request in &routed {
            let mut placed = false;
            if let Some(batch) = batches.last_mut() {
                if Self::fits(network, batch, routed_request)? {
                    batch.push(routed_request);
                    placed = true;
                }
            }
            if !placed {
                batches.push(vec![routed_request]);
            }
        }

        let mut commands = Vec::new();
        let mut timeline: BTreeMap<ZoneId, Vec<(NaiveDateTime, String)>> = BTreeMap::new();
        let mut volumes = BTreeMap::new();
        let mut batch_start = start;

        for batch in &batches {
            let mut batch_end = batch_start;
            for routed_request in batch {
                let end = self.emit_request(
                    network,
                    routed_request,
                    batch_start,
                    &mut commands,
                    &mut timeline,
                )?;
                batch_end = batch_end.max(end);
                volumes.insert(
                    routed_request.request.zone.clone(),
                    routed_request.request.volume_m3,
                );
            }
            batch_start = batch_end + Duration::minutes(self.batch_gap_minutes);
        }

        commands.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.gate_id.cmp(&b.gate_id)));

        let total_volume_m3 = volumes.values().sum();
        let end = commands
            .iter()
            .map(|c| c.time)
            .max()
            .expect("at least one command was emitted");
        let total_duration_hours = (end - start).num_seconds() as f64 / 3600.0;

        Ok(TemporalSchedule {
            commands,
            timeline,
            volumes,
            total_volume_m3,
            total_duration_hours,
        })
    }

    /// Can `candidate` join `batch` without overloading any shared gate?
    fn fits(
        network: &Network,
        batch: &[&RoutedRequest],
        candidate: &RoutedRequest,
    ) -> Result<bool, PlanError> {
        let mut load: BTreeMap<&GateId, f64> = BTreeMap::new();
        for member in batch.iter().copied().chain(std::iter::once(candidate)) {
            for gate in &member.gates {
                *load.entry(gate).or_insert(0.0) += member.request.flow_rate_m3s;
            }
        }
        for (gate_id, flow) in load {
            let gate = network.gate(gate_id)?;
            if flow > gate.max_flow_m3s.value() + 1e-9 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Emit open/arrive/close events for one request; returns the time of
    /// its last command.
    fn emit_request(
        &self,
        network: &Network,
        routed: &RoutedRequest,
        start: NaiveDateTime,
        commands: &mut Vec<GateCommand>,
        timeline: &mut BTreeMap<ZoneId, Vec<(NaiveDateTime, String)>>,
    ) -> Result<NaiveDateTime, PlanError> {
        let request = &routed.request;
        let zone_events = timeline.entry(request.zone.clone()).or_default();

        // Open upstream to downstream with the configured stagger.
        let mut open_time = start;
        for (i, gate_id) in routed.gates.iter().enumerate() {
            if i > 0 {
                open_time += Duration::minutes(self.open_stagger_minutes);
            }
            let gate = network.gate(gate_id)?;
            let opening_percent =
                (request.flow_rate_m3s / gate.max_flow_m3s.value() * 100.0).min(100.0);
            commands.push(GateCommand {
                gate_id: gate_id.clone(),
                action: GateAction::Open,
                opening_percent,
                time: open_time,
                reason: format!("open for {} irrigation", request.zone),
            });
            zone_events.push((
                open_time,
                format!("open {} to {:.0}%", gate_id, opening_percent),
            ));
        }

        // Water front travels each reach at the Manning velocity for the
        // requested flow.
        let mut travel_minutes = 0.0;
        for gate_id in &routed.gates {
            let gate = network.gate(gate_id)?;
            travel_minutes += canal::travel_time_minutes(&gate.reach, request.flow_rate_m3s);
        }
        let arrival = start + Duration::seconds((travel_minutes * 60.0) as i64);
        zone_events.push((arrival, format!("water arrives at {}", request.zone)));

        let irrigation_end =
            arrival + Duration::seconds((request.duration_hours() * 3600.0) as i64);
        zone_events.push((
            irrigation_end,
            format!("delivery of {:.0} m3 complete", request.volume_m3),
        ));

        // Close downstream to upstream with the drain stagger.
        let mut close_time = irrigation_end;
        let mut last = irrigation_end;
        for (i, gate_id) in routed.gates.iter().rev().enumerate() {
            if i > 0 {
                close_time += Duration::minutes(self.drain_stagger_minutes);
            }
            commands.push(GateCommand {
                gate_id: gate_id.clone(),
                action: GateAction::Close,
                opening_percent: 0.0,
                time: close_time,
                reason: format!("complete {} irrigation", request.zone),
            });
            zone_events.push((close_time, format!("close {}", gate_id)));
            last = close_time;
        }
        Ok(last)
    }
}
