//! Rolls per-plot weekly demands up to delivery gates.
//!
//! Per plot: `adjusted = max(min_demand, volume · weather_adj − rainfall_mm ·
//! 1.6 · area_rai)` (1 mm of rain saves about 1.6 m3 per rai, i.e. 10 m3 per
//! hectare). Gate totals sum adjusted plot volumes; gate priority is the
//! volume-weighted average of plot priorities; the delivery window is the
//! union of plot windows. Zone modifiers accumulated from last week's
//! weather multiply in before grouping.
//!
//! Aggregation results are memoized for 15 minutes keyed on
//! `(week, weather_adj, rainfall_mm, plot count)`.

use crate::weather::WeeklyOutlook;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sluice_core::{
    GateId, IsoWeek, Network, PlotId, Priority, SluiceError, SluiceResult, ZoneId,
};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Crop stress classification reported by the agronomy service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressLevel {
    None,
    Mild,
    Moderate,
    Severe,
}

/// One plot's demand for one week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotDemand {
    pub plot_id: PlotId,
    pub zone_id: ZoneId,
    pub delivery_gate: GateId,
    pub week: IsoWeek,
    pub gross_volume_m3: f64,
    pub net_volume_m3: f64,
    pub priority: Priority,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub area_rai: f64,
    pub moisture_deficit_percent: f64,
    pub stress_level: StressLevel,
}

/// Weather factors applied at aggregation time (forecast-derived).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeatherFactors {
    /// Multiplicative demand factor in [0.5, 1.5].
    pub weather_adjustment: f64,
    /// Expected rainfall over the delivery window (mm).
    pub rainfall_mm: f64,
}

impl Default for WeatherFactors {
    fn default() -> Self {
        Self {
            weather_adjustment: 1.0,
            rainfall_mm: 0.0,
        }
    }
}

/// Aggregated demand at one delivery gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedDemand {
    pub delivery_gate: GateId,
    pub zone_id: ZoneId,
    pub week: IsoWeek,
    pub total_volume_m3: f64,
    /// Volume-weighted plot priority (critical 9 .. low 3).
    pub weighted_priority: f64,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub plots: Vec<PlotId>,
}

impl AggregatedDemand {
    /// Flow needed to deliver the total inside the window (m3/s).
    pub fn required_flow_m3s(&self) -> f64 {
        let seconds = (self.window_end - self.window_start).num_seconds().max(1) as f64;
        self.total_volume_m3 / seconds
    }
}

type CacheKey = (IsoWeek, u64, u64, usize);

/// Demand aggregation service.
pub struct DemandAggregator {
    /// Floor below which a plot demand is never reduced (m3).
    pub min_demand_m3: f64,
    /// Rainfall offset (m3 saved per rai per mm of rain).
    pub rain_offset_m3_per_rai_mm: f64,
    pub cache_ttl: Duration,
    cache: Mutex<BTreeMap<CacheKey, (Instant, Vec<AggregatedDemand>)>>,
}

impl Default for DemandAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl DemandAggregator {
    pub fn new() -> Self {
        Self {
            min_demand_m3: 0.0,
            rain_offset_m3_per_rai_mm: 1.6,
            cache_ttl: Duration::from_secs(900),
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_min_demand(mut self, min_demand_m3: f64) -> Self {
        self.min_demand_m3 = min_demand_m3;
        self
    }

    /// Aggregate plot demands for the week, applying weather factors and the
    /// accumulated outlook from the previous week. Output is sorted by
    /// weighted priority descending (gate id breaks ties).
    pub fn aggregate(
        &self,
        week: IsoWeek,
        demands: &[PlotDemand],
        factors: &WeatherFactors,
        outlook: Option<&WeeklyOutlook>,
    ) -> SluiceResult<Vec<AggregatedDemand>> {
        if !(0.5..=1.5).contains(&factors.weather_adjustment) {
            return Err(SluiceError::InvalidInput(format!(
                "weather adjustment must lie in [0.5, 1.5], got {:.2}",
                factors.weather_adjustment
            )));
        }
        if factors.rainfall_mm < 0.0 {
            return Err(SluiceError::InvalidInput(
                "rainfall cannot be negative".to_string(),
            ));
        }

        let key: CacheKey = (
            week,
            factors.weather_adjustment.to_bits(),
            factors.rainfall_mm.to_bits(),
            demands.len(),
        );
        if let Some(cached) = self.cache_lookup(&key) {
            return Ok(cached);
        }

        struct GateBucket {
            zone_id: ZoneId,
            total: f64,
            priority_weight: f64,
            window_start: NaiveDateTime,
            window_end: NaiveDateTime,
            plots: Vec<PlotId>,
        }
        let mut buckets: BTreeMap<GateId, GateBucket> = BTreeMap::new();

        for demand in demands {
            if demand.week != week {
                return Err(SluiceError::InvalidInput(format!(
                    "plot {} demand is for week {}, aggregating {}",
                    demand.plot_id, demand.week, week
                )));
            }
            if demand.net_volume_m3 < 0.0 {
                return Err(SluiceError::InvalidInput(format!(
                    "plot {} has negative demand",
                    demand.plot_id
                )));
            }

            let mut adjusted = demand.net_volume_m3 * factors.weather_adjustment
                - factors.rainfall_mm * self.rain_offset_m3_per_rai_mm * demand.area_rai;
            adjusted = adjusted.max(self.min_demand_m3);

            if let Some(outlook) = outlook {
                if let Some(zone) = outlook.zones.get(&demand.zone_id) {
                    adjusted *= zone.demand_modifier;
                }
            }

            let bucket = buckets
                .entry(demand.delivery_gate.clone())
                .or_insert_with(|| GateBucket {
                    zone_id: demand.zone_id.clone(),
                    total: 0.0,
                    priority_weight: 0.0,
                    window_start: demand.window_start,
                    window_end: demand.window_end,
                    plots: Vec::new(),
                });
            bucket.total += adjusted;
            bucket.priority_weight += demand.priority.weight() * adjusted;
            bucket.window_start = bucket.window_start.min(demand.window_start);
            bucket.window_end = bucket.window_end.max(demand.window_end);
            bucket.plots.push(demand.plot_id.clone());
        }

        let mut aggregated: Vec<AggregatedDemand> = buckets
            .into_iter()
            .map(|(gate, bucket)| {
                let weighted_priority = if bucket.total > 0.0 {
                    bucket.priority_weight / bucket.total
                } else {
                    Priority::Medium.weight()
                };
                AggregatedDemand {
                    delivery_gate: gate,
                    zone_id: bucket.zone_id,
                    week,
                    total_volume_m3: bucket.total,
                    weighted_priority,
                    window_start: bucket.window_start,
                    window_end: bucket.window_end,
                    plots: bucket.plots,
                }
            })
            .collect();
        aggregated.sort_by(|a, b| {
            b.weighted_priority
                .partial_cmp(&a.weighted_priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.delivery_gate.cmp(&b.delivery_gate))
        });

        self.cache_store(key, &aggregated);
        Ok(aggregated)
    }

    /// Flag gates whose aggregated demand cannot physically fit through them
    /// inside the delivery window.
    pub fn check_conflicts(
        &self,
        network: &Network,
        aggregated: &[AggregatedDemand],
    ) -> SluiceResult<Vec<String>> {
        let mut conflicts = Vec::new();
        for demand in aggregated {
            let gate = network.gate(&demand.delivery_gate)?;
            let required = demand.required_flow_m3s();
            let max_flow = gate.max_flow_m3s.value();
            if required > max_flow {
                conflicts.push(format!(
                    "gate {} over-allocated: requires {:.2} m3/s, rated {:.2} m3/s",
                    demand.delivery_gate, required, max_flow
                ));
            }
        }
        Ok(conflicts)
    }

    fn cache_lookup(&self, key: &CacheKey) -> Option<Vec<AggregatedDemand>> {
        let cache = self.cache.lock().expect("aggregator cache poisoned");
        cache
            .get(key)
            .filter(|(stored, _)| stored.elapsed() < self.cache_ttl)
            .map(|(_, value)| value.clone())
    }

    fn cache_store(&self, key: CacheKey, value: &[AggregatedDemand]) {
        let mut cache = self.cache.lock().expect("aggregator cache poisoned");
        cache.insert(key, (Instant::now(), value.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn week() -> IsoWeek {
        IsoWeek::new(2025, 23).unwrap()
    }

    fn window(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn plot(id: &str, gate: &str, volume: f64, priority: Priority, area: f64) -> PlotDemand {
        PlotDemand {
            plot_id: PlotId::new(id),
            zone_id: ZoneId::new("Zone_2"),
            delivery_gate: GateId::new(gate),
            week: week(),
            gross_volume_m3: volume * 1.2,
            net_volume_m3: volume,
            priority,
            window_start: window(2, 6),
            window_end: window(5, 18),
            area_rai: area,
            moisture_deficit_percent: 20.0,
            stress_level: StressLevel::Mild,
        }
    }

    #[test]
    fn test_simple_aggregation() {
        let aggregator = DemandAggregator::new();
        let demands = vec![
            plot("P-1", "M(0,2)->Zone_2", 6000.0, Priority::High, 500.0),
            plot("P-2", "M(0,2)->Zone_2", 4000.0, Priority::Low, 400.0),
        ];
        let result = aggregator
            .aggregate(week(), &demands, &WeatherFactors::default(), None)
            .unwrap();
        assert_eq!(result.len(), 1);
        let gate = &result[0];
        assert!((gate.total_volume_m3 - 10_000.0).abs() < 1e-9);
        // (7*6000 + 3*4000) / 10000 = 5.4
        assert!((gate.weighted_priority - 5.4).abs() < 1e-9);
        assert_eq!(gate.plots.len(), 2);
    }

    #[test]
    fn test_rainfall_offset() {
        let aggregator = DemandAggregator::new().with_min_demand(100.0);
        let demands = vec![plot("P-1", "M(0,2)->Zone_2", 6000.0, Priority::Medium, 500.0)];
        let factors = WeatherFactors {
            weather_adjustment: 1.0,
            rainfall_mm: 5.0,
        };
        let result = aggregator.aggregate(week(), &demands, &factors, None).unwrap();
        // 6000 - 5 * 1.6 * 500 = 2000
        assert!((result[0].total_volume_m3 - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_min_demand_floor() {
        let aggregator = DemandAggregator::new().with_min_demand(250.0);
        let demands = vec![plot("P-1", "M(0,2)->Zone_2", 1000.0, Priority::Medium, 500.0)];
        let factors = WeatherFactors {
            weather_adjustment: 1.0,
            rainfall_mm: 20.0,
        };
        let result = aggregator.aggregate(week(), &demands, &factors, None).unwrap();
        assert!((result[0].total_volume_m3 - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_sorted_by_weighted_priority() {
        let aggregator = DemandAggregator::new();
        let mut critical = plot("P-9", "M(0,12)->Zone_5", 3000.0, Priority::Critical, 300.0);
        critical.zone_id = ZoneId::new("Zone_5");
        let demands = vec![
            plot("P-1", "M(0,2)->Zone_2", 6000.0, Priority::Low, 500.0),
            critical,
        ];
        let result = aggregator
            .aggregate(week(), &demands, &WeatherFactors::default(), None)
            .unwrap();
        assert_eq!(result[0].delivery_gate, GateId::new("M(0,12)->Zone_5"));
        assert!(result[0].weighted_priority > result[1].weighted_priority);
    }

    #[test]
    fn test_window_union() {
        let aggregator = DemandAggregator::new();
        let mut early = plot("P-1", "M(0,2)->Zone_2", 1000.0, Priority::Medium, 100.0);
        early.window_start = window(1, 6);
        let mut late = plot("P-2", "M(0,2)->Zone_2", 1000.0, Priority::Medium, 100.0);
        late.window_end = window(7, 18);
        let result = aggregator
            .aggregate(week(), &[early, late], &WeatherFactors::default(), None)
            .unwrap();
        assert_eq!(result[0].window_start, window(1, 6));
        assert_eq!(result[0].window_end, window(7, 18));
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let aggregator = DemandAggregator::new();
        let demands = vec![plot("P-1", "M(0,2)->Zone_2", 1000.0, Priority::Medium, 100.0)];

        let bad_factor = WeatherFactors {
            weather_adjustment: 2.0,
            rainfall_mm: 0.0,
        };
        assert!(aggregator
            .aggregate(week(), &demands, &bad_factor, None)
            .is_err());

        let mut negative = demands.clone();
        negative[0].net_volume_m3 = -5.0;
        assert!(aggregator
            .aggregate(week(), &negative, &WeatherFactors::default(), None)
            .is_err());

        let mut wrong_week = demands;
        wrong_week[0].week = IsoWeek::new(2025, 24).unwrap();
        assert!(aggregator
            .aggregate(week(), &wrong_week, &WeatherFactors::default(), None)
            .is_err());
    }

    #[test]
    fn test_memoization_returns_same_result() {
        let aggregator = DemandAggregator::new();
        let demands = vec![plot("P-1", "M(0,2)->Zone_2", 6000.0, Priority::High, 500.0)];
        let first = aggregator
            .aggregate(week(), &demands, &WeatherFactors::default(), None)
            .unwrap();
        let second = aggregator
            .aggregate(week(), &demands, &WeatherFactors::default(), None)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_conflict_check_flags_over_allocation() {
        let network = sluice_io::fixtures::demo_network();
        let aggregator = DemandAggregator::new();
        // M(0,2)->Zone_2 is rated 5 m3/s; demanding far more than the window
        // allows must be flagged.
        let mut demand = plot("P-1", "M(0,2)->Zone_2", 5_000_000.0, Priority::High, 500.0);
        demand.window_start = window(2, 6);
        demand.window_end = window(2, 12);
        let aggregated = aggregator
            .aggregate(week(), &[demand], &WeatherFactors::default(), None)
            .unwrap();
        let conflicts = aggregator.check_conflicts(&network, &aggregated).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].contains("over-allocated"));
    }
}
