//! Weekly schedules, scheduled operations, and field teams.
//!
//! Operations live in an arena owned by their schedule: [`OperationId`] is a
//! stable integer index assigned at creation, so adaptations can reference
//! operations without reference cycles. Both schedules and operations carry
//! explicit state machines; every mutation goes through `transition_to`,
//! which rejects edges outside the allowed graph with a
//! [`SluiceError::StateConflict`].

use crate::error::{SluiceError, SluiceResult};
use crate::{GateId, TeamId, ZoneId};
use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// ISO calendar week used as the planning period key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IsoWeek {
    pub year: i32,
    pub week: u32,
}

impl IsoWeek {
    pub fn new(year: i32, week: u32) -> SluiceResult<Self> {
        if !(1..=53).contains(&week) {
            return Err(SluiceError::InvalidInput(format!(
                "ISO week must lie in 1..=53, got {}",
                week
            )));
        }
        Ok(Self { year, week })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }

    /// The following ISO week (weather adjustments recorded in week `w`
    /// apply to `w.next()`).
    pub fn next(self) -> Self {
        // Thursday always falls inside the ISO week of its year.
        let thursday = NaiveDate::from_isoywd_opt(self.year, self.week, chrono::Weekday::Thu)
            .expect("valid ISO week");
        Self::from_date(thursday + chrono::Duration::days(7))
    }

    pub fn previous(self) -> Self {
        let thursday = NaiveDate::from_isoywd_opt(self.year, self.week, chrono::Weekday::Thu)
            .expect("valid ISO week");
        Self::from_date(thursday - chrono::Duration::days(7))
    }

    /// Monday of this week.
    pub fn start_date(self) -> NaiveDate {
        NaiveDate::from_isoywd_opt(self.year, self.week, chrono::Weekday::Mon)
            .expect("valid ISO week")
    }
}

impl std::fmt::Display for IsoWeek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-W{:02}", self.year, self.week)
    }
}

/// Schedule identifier, derived from the week and bump-free across versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(String);

impl ScheduleId {
    pub fn for_week(week: IsoWeek, sequence: u32) -> Self {
        ScheduleId(format!("SCH-{}-{:02}", week, sequence))
    }

    pub fn new(value: impl Into<String>) -> Self {
        ScheduleId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable index of an operation inside its schedule's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u32);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Lifecycle of a weekly schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Draft,
    Approved,
    Active,
    Completed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn can_transition(self, to: ScheduleStatus) -> bool {
        use ScheduleStatus::*;
        matches!(
            (self, to),
            (Draft, Approved)
                | (Draft, Cancelled)
                | (Approved, Active)
                | (Approved, Cancelled)
                | (Active, Completed)
                | (Active, Cancelled)
        )
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleStatus::Draft => "draft",
            ScheduleStatus::Approved => "approved",
            ScheduleStatus::Active => "active",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a single gate operation.
///
/// `scheduled -> {in_progress, cancelled}`, `in_progress -> {completed,
/// failed}`, `failed -> rescheduled`, `cancelled -> rescheduled`; completed
/// is terminal. An emergency override may pre-empt an operation from
/// `scheduled` or `in_progress` into the terminal `overridden` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Scheduled,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Rescheduled,
    Overridden,
}

impl OperationStatus {
    pub fn can_transition(self, to: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, to),
            (Scheduled, InProgress)
                | (Scheduled, Cancelled)
                | (Scheduled, Overridden)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Overridden)
                | (Failed, Rescheduled)
                | (Cancelled, Rescheduled)
        )
    }

    pub fn is_terminal(self) -> bool {
        use OperationStatus::*;
        matches!(self, Completed | Rescheduled | Overridden)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationStatus::Scheduled => "scheduled",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
            OperationStatus::Rescheduled => "rescheduled",
            OperationStatus::Overridden => "overridden",
        };
        f.write_str(s)
    }
}

/// Kind of scheduled gate movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Open,
    Close,
    Adjust,
    Reroute,
    Emergency,
}

/// Post-hoc fields recorded by the field team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualOutcome {
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub opening_percent: Option<f64>,
    pub flow_m3s: Option<f64>,
    pub operator_notes: Option<String>,
}

/// Individual gate operation in a weekly schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledOperation {
    pub id: OperationId,
    pub gate_id: GateId,
    pub zone_id: Option<ZoneId>,
    pub kind: OperationKind,
    pub date: NaiveDate,
    pub planned_start: NaiveTime,
    pub planned_end: NaiveTime,
    /// Order within the assigned team's route for the day.
    pub sequence: u32,
    pub target_opening_percent: f64,
    pub expected_flow_before_m3s: f64,
    pub expected_flow_after_m3s: f64,
    pub team: Option<TeamId>,
    pub status: OperationStatus,
    pub actual: Option<ActualOutcome>,
    pub notes: Option<String>,
}

impl ScheduledOperation {
    /// Apply a status transition, rejecting edges outside the allowed graph.
    pub fn transition_to(&mut self, to: OperationStatus) -> SluiceResult<()> {
        if !self.status.can_transition(to) {
            return Err(SluiceError::state_conflict("operation", self.status, to));
        }
        self.status = to;
        Ok(())
    }

    pub fn planned_duration_minutes(&self) -> i64 {
        (self.planned_end - self.planned_start).num_minutes()
    }

    /// Volume expected through the gate over the planned window.
    pub fn expected_volume_m3(&self) -> f64 {
        self.expected_flow_after_m3s * self.planned_duration_minutes() as f64 * 60.0
    }
}

/// Schedule-level optimization metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleMetrics {
    pub total_demand_m3: f64,
    pub total_allocated_m3: f64,
    pub efficiency_percent: f64,
    pub total_travel_km: f64,
    pub estimated_labor_hours: f64,
    pub operation_count: usize,
    pub objective_value: f64,
    /// Set when the greedy constructor replaced the LP core.
    pub fallback_used: bool,
}

/// Field team master record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldTeam {
    pub code: TeamId,
    pub name: String,
    pub base_latitude: f64,
    pub base_longitude: f64,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub max_operations_per_day: u32,
    pub travel_speed_kmh: f64,
    /// Gate types the team is certified to operate.
    pub capabilities: Vec<crate::GateType>,
    pub assigned_zones: Vec<ZoneId>,
    pub active: bool,
}

impl FieldTeam {
    pub fn new(code: impl Into<String>, base_latitude: f64, base_longitude: f64) -> Self {
        Self {
            code: TeamId::new(code),
            name: String::new(),
            base_latitude,
            base_longitude,
            work_start: NaiveTime::from_hms_opt(6, 0, 0).expect("valid time"),
            work_end: NaiveTime::from_hms_opt(18, 0, 0).expect("valid time"),
            max_operations_per_day: 30,
            travel_speed_kmh: 40.0,
            capabilities: vec![
                crate::GateType::Sluice,
                crate::GateType::Radial,
                crate::GateType::Overshot,
                crate::GateType::Undershot,
            ],
            assigned_zones: Vec::new(),
            active: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_daily_cap(mut self, max_operations_per_day: u32) -> Self {
        self.max_operations_per_day = max_operations_per_day;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<crate::GateType>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn can_operate(&self, gate_type: crate::GateType) -> bool {
        self.capabilities.contains(&gate_type)
    }
}

/// Waypoint on a team's daily route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waypoint {
    pub gate_id: GateId,
    pub latitude: f64,
    pub longitude: f64,
    pub target_opening_percent: f64,
}

/// Printable route sheet for one team on one operation day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInstruction {
    pub team: TeamId,
    pub date: NaiveDate,
    pub operations: Vec<OperationId>,
    pub total_distance_km: f64,
    pub estimated_duration_hours: f64,
    pub waypoints: Vec<Waypoint>,
    /// Ordered (lat, lon) polyline of the route, base to base.
    pub route_polyline: Vec<(f64, f64)>,
    pub general_notes: String,
    pub safety_notes: Vec<String>,
}

/// Master plan for one week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub id: ScheduleId,
    pub week: IsoWeek,
    pub status: ScheduleStatus,
    /// Monotonic version, bumped on every adaptation (optimistic concurrency).
    pub version: u32,
    pub metrics: ScheduleMetrics,
    pub field_days: Vec<NaiveDate>,
    operations: Vec<ScheduledOperation>,
    pub instructions: Vec<FieldInstruction>,
}

impl WeeklySchedule {
    pub fn new(week: IsoWeek, sequence: u32) -> Self {
        Self {
            id: ScheduleId::for_week(week, sequence),
            week,
            status: ScheduleStatus::Draft,
            version: 1,
            metrics: ScheduleMetrics::default(),
            field_days: Vec::new(),
            operations: Vec::new(),
            instructions: Vec::new(),
        }
    }

    /// Append an operation to the arena, assigning its stable id.
    pub fn push_operation(&mut self, mut op: ScheduledOperation) -> OperationId {
        let id = OperationId(self.operations.len() as u32);
        op.id = id;
        self.operations.push(op);
        id
    }

    pub fn operation(&self, id: OperationId) -> SluiceResult<&ScheduledOperation> {
        self.operations
            .get(id.0 as usize)
            .ok_or_else(|| SluiceError::not_found("operation", id.to_string()))
    }

    pub fn operation_mut(&mut self, id: OperationId) -> SluiceResult<&mut ScheduledOperation> {
        self.operations
            .get_mut(id.0 as usize)
            .ok_or_else(|| SluiceError::not_found("operation", id.to_string()))
    }

    pub fn operations(&self) -> &[ScheduledOperation] {
        &self.operations
    }

    pub fn operations_mut(&mut self) -> &mut [ScheduledOperation] {
        &mut self.operations
    }

    /// Apply a schedule status transition.
    pub fn transition_to(&mut self, to: ScheduleStatus) -> SluiceResult<()> {
        if !self.status.can_transition(to) {
            return Err(SluiceError::state_conflict("schedule", self.status, to));
        }
        self.status = to;
        Ok(())
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Operations that adaptations must never modify.
    pub fn fixed_operations(&self) -> impl Iterator<Item = &ScheduledOperation> {
        self.operations.iter().filter(|op| {
            matches!(
                op.status,
                OperationStatus::Completed | OperationStatus::InProgress
            )
        })
    }
}
