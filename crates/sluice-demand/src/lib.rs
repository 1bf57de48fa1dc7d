//! # sluice-demand: Demand Aggregation & Weather Adjustments
//!
//! Turns per-plot weekly water demands into per-delivery-gate totals the
//! optimizer plans against, and accumulates daily weather effects into the
//! modifiers that shape the *next* week's demand inputs.
//!
//! ## Modules
//!
//! - [`aggregator`] - plot demands -> delivery-gate demands with weather
//!   factors, volume-weighted priorities, memoization, and a capacity
//!   conflict check
//! - [`weather`] - the data-driven daily adjustment rule engine and the
//!   week-over-week accumulator
//!
//! Weekly adjustments recorded during week `w` influence scheduling inputs
//! for week `w+1` and only `w+1`; the executing schedule is never touched
//! from here.

pub mod aggregator;
pub mod weather;

pub use aggregator::{AggregatedDemand, DemandAggregator, PlotDemand, StressLevel, WeatherFactors};
pub use weather::{
    default_rules, rules_from_json, AdjustmentRule, Condition, DailyAdjustment, RuleAction,
    RuleOp, WeatherField, WeatherObservation, WeeklyAccumulator, WeeklyOutlook, ZoneOutlook,
};
