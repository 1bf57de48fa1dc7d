//! # sluice-ops: Runtime Operations
//!
//! The runtime half of the control plane: live gate state in both automated
//! and manual modes, the schedule store with its unique-active-pointer
//! semantics, and the event-driven adapter that patches an active schedule
//! when the field diverges from the plan.
//!
//! ## Concurrency model
//!
//! - Per-gate mutations serialize on a per-gate `tokio::sync::Mutex`;
//!   cross-gate operations carry no ordering guarantee.
//! - Per-schedule mutations serialize on a per-schedule mutex inside the
//!   [`store::ScheduleStore`]; the active-schedule pointer swaps under a
//!   single `RwLock`.
//! - Adaptation history is an append-only capped ring buffer per schedule;
//!   readers clone snapshots without blocking writers.
//!
//! Collaborator services (§ external contracts) are async traits in
//! [`contracts`]; tests wire in the in-memory fakes.

pub mod adapter;
pub mod contracts;
pub mod controller;
pub mod events;
pub mod jobs;
pub mod store;

pub use adapter::{AdaptationOutcome, RealTimeAdapter};
pub use contracts::{
    retry_read, AgronomyService, CommandPriority, PrefixScadaBridge, ScadaBridge, WeatherImpact,
    WeatherService,
};
pub use controller::{
    ControlStatus, GateController, GateMode, GateRuntime, ManualInstruction, SyncStatus,
    TransitionValidation,
};
pub use events::{
    AdaptationEvent, AdaptationRecord, AdaptationStrategy, TeamNotification, Urgency,
};
pub use jobs::{refresh_weekly_demands, run_daily_weather_job};
pub use store::ScheduleStore;
