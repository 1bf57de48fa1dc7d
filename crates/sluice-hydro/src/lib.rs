//! # sluice-hydro: Steady-State Hydraulics
//!
//! Computes how water actually moves through the network: calibrated gate
//! discharge, Manning losses in canal reaches, and the coupled steady-state
//! solution of levels and flows the planners verify against.
//!
//! ## Modules
//!
//! - [`gate_flow`] - calibrated discharge `Q = Cs·L·Hs·√(2g·ΔH)` and the
//!   opening inverse
//! - [`canal`] - trapezoidal Manning normal depth, velocity, head loss
//! - [`solver`] - fixed-point network solver and target-delivery opening
//!   optimization
//! - [`router`] - path enumeration, downstream impact, bottleneck flow
//!
//! ## Failure semantics
//!
//! The solver never errors on physical impossibility. It returns a
//! [`solver::Convergence`] report (`converged`, iteration count, residuals,
//! warnings) and callers decide whether partial results are usable. `Err` is
//! reserved for referencing entities that do not exist.

pub mod canal;
pub mod gate_flow;
pub mod router;
pub mod solver;

pub use canal::{head_loss, normal_depth, travel_time_minutes, velocity};
pub use gate_flow::{gate_flow, required_opening, FlowResult, OpeningResult, GRAVITY};
pub use router::{affected_downstream, all_paths, bottleneck_flow, path_gates, shortest_path};
pub use solver::{Convergence, GateOpenings, HydraulicSolver, OpeningOptimization, OpeningOptimizer};
