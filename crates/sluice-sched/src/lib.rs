//! # sluice-sched: Weekly Scheduling & Routing
//!
//! Turns aggregated demands into the weekly batch plan field teams execute:
//! time-sliced gate operations, hydraulic feasibility verification, team
//! assignment, and travel-optimized route sheets; plus the temporal
//! sequencer that times individual irrigation requests.
//!
//! ## Modules
//!
//! - [`milp`] - planning slots and the LP relaxation of the weekly problem
//! - [`greedy`] - priority-ordered fallback constructor
//! - [`plan`] - the end-to-end weekly plan builder
//! - [`constraints`] - operator-configured constraint registry
//! - [`travel`] - TSP/windowed routing for team days
//! - [`temporal`] - open/close sequencing with propagation delays

use sluice_core::SluiceError;
use thiserror::Error;

pub mod constraints;
pub mod greedy;
pub mod milp;
pub mod plan;
pub mod temporal;
pub mod travel;

pub use constraints::{AppliesTo, ConstraintKind, ConstraintRegistry, PlanningConstraint};
pub use greedy::greedy_allocation;
pub use milp::{build_slots, solve_allocation, Allocation, PlannerConfig, Slot};
pub use plan::{PlanOutcome, WeeklyPlanner};
pub use temporal::{
    GateAction, GateCommand, IrrigationRequest, TemporalSchedule, TemporalScheduler,
};
pub use travel::{haversine_km, RoutePlan, RouteStop, TravelOptimizer};

/// Planning failures.
#[derive(Error, Debug)]
pub enum PlanError {
    /// Caller-supplied inputs are out of domain.
    #[error("invalid plan input: {0}")]
    Input(String),

    /// No plan can satisfy the request (unreachable delivery, empty horizon).
    #[error("plan infeasible: {0}")]
    Infeasible(String),

    /// The optimization backend failed; callers fall back to the greedy
    /// constructor.
    #[error("plan solver failed: {0}")]
    Solver(String),

    #[error(transparent)]
    Core(#[from] SluiceError),
}

impl From<PlanError> for SluiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Input(msg) => SluiceError::InvalidInput(msg),
            PlanError::Infeasible(msg) => SluiceError::Infeasible(msg),
            PlanError::Solver(msg) => SluiceError::SolverTimeout(msg),
            PlanError::Core(inner) => inner,
        }
    }
}
