//! Adaptation events, strategies, and history records.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sluice_core::{FieldTeam, GateId, OperationId, PlotId, ScheduleId, TeamId, ZoneId};
use sluice_demand::{AggregatedDemand, WeatherObservation};

/// Demand-change urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Normal,
    High,
    Emergency,
}

/// Events the real-time adapter reacts to.
#[derive(Debug, Clone)]
pub enum AdaptationEvent {
    GateFailure {
        gate: GateId,
        failure_type: String,
        estimated_repair_hours: f64,
    },
    WeatherChange {
        observation: WeatherObservation,
        affected_zones: Vec<ZoneId>,
    },
    DemandChange {
        zone: ZoneId,
        plots: Vec<PlotId>,
        additional_m3: f64,
        urgency: Urgency,
        reason: String,
    },
    TeamUnavailable {
        team: TeamId,
        from: NaiveDate,
        until: NaiveDate,
        reason: String,
        replacements: Vec<FieldTeam>,
    },
    Reoptimize {
        from_date: NaiveDate,
        demands: Vec<AggregatedDemand>,
        teams: Vec<FieldTeam>,
        reason: String,
    },
    EmergencyOverride {
        gate: GateId,
        target_opening_percent: f64,
        operator: String,
        reason: String,
    },
}

impl AdaptationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AdaptationEvent::GateFailure { .. } => "gate_failure",
            AdaptationEvent::WeatherChange { .. } => "weather_change",
            AdaptationEvent::DemandChange { .. } => "demand_change",
            AdaptationEvent::TeamUnavailable { .. } => "team_unavailable",
            AdaptationEvent::Reoptimize { .. } => "reoptimize",
            AdaptationEvent::EmergencyOverride { .. } => "emergency_override",
        }
    }
}

/// Strategy the adapter chose for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationStrategy {
    RerouteFlow,
    DelayOperations,
    ReduceDemand,
    AdjustTiming,
    IncreaseFlow,
    PartialDelivery,
    EmergencyOverride,
    Reassign,
    Reoptimize,
    None,
}

/// Append-only history entry for one adaptation.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptationRecord {
    pub schedule: ScheduleId,
    pub event_kind: String,
    pub strategy: AdaptationStrategy,
    pub affected_operations: Vec<OperationId>,
    pub new_operations: Vec<OperationId>,
    pub schedule_version: u32,
    pub at: NaiveDateTime,
    pub notes: String,
}

/// Message pushed to a field team after an adaptation.
#[derive(Debug, Clone, Serialize)]
pub struct TeamNotification {
    pub team: TeamId,
    pub kind: String,
    pub message: String,
    pub at: NaiveDateTime,
}
