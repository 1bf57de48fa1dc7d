//! Scheduled control-loop jobs.
//!
//! Two recurring jobs connect the collaborator services to the planning
//! inputs: the daily weather job folds each zone's observations into the
//! weekly adjustment accumulator, and the weekly demand refresh pulls plot
//! demands from the agronomy service and aggregates them for the optimizer.
//! Collaborator reads go through [`retry_read`] (idempotent, three attempts
//! with exponential backoff).

use crate::contracts::{retry_read, AgronomyService, WeatherService};
use chrono::NaiveDate;
use sluice_core::{IsoWeek, Network, SluiceResult, ZoneId};
use sluice_demand::{
    AggregatedDemand, DailyAdjustment, DemandAggregator, WeatherFactors, WeeklyAccumulator,
};

/// Pull one day of weather for every zone and fold it into the accumulator.
///
/// Zones whose weather service stays unreachable after retries are skipped
/// with a warning; a single dark zone must not stall the daily job.
pub async fn run_daily_weather_job(
    weather: &dyn WeatherService,
    accumulator: &mut WeeklyAccumulator,
    zones: &[ZoneId],
    date: NaiveDate,
) -> SluiceResult<Vec<DailyAdjustment>> {
    let mut adjustments = Vec::with_capacity(zones.len());
    for zone in zones {
        let observation =
            match retry_read("weather", 3, || weather.zone_weather(zone, date)).await {
                Ok(observation) => observation,
                Err(err) => {
                    tracing::warn!(zone = %zone, %date, error = %err, "no weather for zone");
                    continue;
                }
            };
        adjustments.push(accumulator.process_daily(&observation)?);
    }
    Ok(adjustments)
}

/// Fetch the week's plot demands and aggregate them to delivery gates,
/// applying forecast factors and the modifiers accumulated last week.
pub async fn refresh_weekly_demands(
    agronomy: &dyn AgronomyService,
    aggregator: &DemandAggregator,
    accumulator: &WeeklyAccumulator,
    network: &Network,
    week: IsoWeek,
    factors: WeatherFactors,
) -> SluiceResult<(Vec<AggregatedDemand>, Vec<String>)> {
    let demands = retry_read("agronomy", 3, || agronomy.current_week_demand(week)).await?;
    let outlook = accumulator.outlook_for(week);
    let aggregated = aggregator.aggregate(week, &demands, &factors, Some(&outlook))?;
    let conflicts = aggregator.check_conflicts(network, &aggregated)?;
    Ok((aggregated, conflicts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::WeatherImpact;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use sluice_core::{GateId, PlotId, Priority, SluiceError};
    use sluice_demand::{PlotDemand, StressLevel, WeatherObservation};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn window(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    /// Weather fake: rain in Zone_2, clear elsewhere, one zone dark.
    struct FakeWeather {
        calls: AtomicU32,
    }

    #[async_trait]
    impl WeatherService for FakeWeather {
        async fn zone_weather(
            &self,
            zone: &ZoneId,
            date: NaiveDate,
        ) -> sluice_core::SluiceResult<WeatherObservation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if zone.as_str() == "Zone_6" {
                return Err(SluiceError::Other("station offline".into()));
            }
            Ok(WeatherObservation {
                zone_id: zone.clone(),
                date,
                rainfall_mm: if zone.as_str() == "Zone_2" { 14.0 } else { 0.0 },
                temperature_max_c: 33.0,
                temperature_min_c: 24.0,
                temperature_drop_c: 0.0,
                humidity_percent: 75.0,
                wind_speed_kmh: 6.0,
                evapotranspiration_mm: 5.0,
            })
        }
    }

    struct FakeAgronomy;

    #[async_trait]
    impl AgronomyService for FakeAgronomy {
        async fn current_week_demand(
            &self,
            week: IsoWeek,
        ) -> sluice_core::SluiceResult<Vec<PlotDemand>> {
            Ok(vec![PlotDemand {
                plot_id: PlotId::new("P-2-01"),
                zone_id: ZoneId::new("Zone_2"),
                delivery_gate: GateId::new("M(0,2)->Zone_2"),
                week,
                gross_volume_m3: 12_000.0,
                net_volume_m3: 10_000.0,
                priority: Priority::High,
                window_start: window(3, 6),
                window_end: window(5, 18),
                area_rai: 640.0,
                moisture_deficit_percent: 25.0,
                stress_level: StressLevel::Mild,
            }])
        }

        async fn analyze_weather_impact(
            &self,
            _observation: &WeatherObservation,
            _week: IsoWeek,
        ) -> sluice_core::SluiceResult<WeatherImpact> {
            Ok(WeatherImpact {
                demand_adjustment_percent: 0.0,
                adjustment_factors: Vec::new(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_daily_weather_job_skips_dark_zones() {
        let weather = FakeWeather {
            calls: AtomicU32::new(0),
        };
        let mut accumulator = WeeklyAccumulator::default();
        let zones = vec![
            ZoneId::new("Zone_2"),
            ZoneId::new("Zone_5"),
            ZoneId::new("Zone_6"),
        ];
        let adjustments = run_daily_weather_job(&weather, &mut accumulator, &zones, day(2))
            .await
            .unwrap();

        // Two zones answered; Zone_6 retried three times then was skipped.
        assert_eq!(adjustments.len(), 2);
        assert_eq!(weather.calls.load(Ordering::SeqCst), 2 + 3);
        let rainy = accumulator.record(&ZoneId::new("Zone_2"), day(2)).unwrap();
        assert!((rainy.demand_reduction_percent - 30.0).abs() < 1e-9);
        assert!(accumulator.record(&ZoneId::new("Zone_6"), day(2)).is_none());
    }

    #[tokio::test]
    async fn test_weekly_demand_refresh_applies_last_weeks_outlook() {
        let network = sluice_io::fixtures::demo_network();
        let aggregator = DemandAggregator::new();
        let mut accumulator = WeeklyAccumulator::default();

        // 14 mm on Monday of week 23 trims next week's Zone_2 demand 30%.
        let weather = FakeWeather {
            calls: AtomicU32::new(0),
        };
        run_daily_weather_job(
            &weather,
            &mut accumulator,
            &[ZoneId::new("Zone_2")],
            day(2),
        )
        .await
        .unwrap();

        let next_week = IsoWeek::from_date(day(2)).next();
        let agronomy = FakeAgronomy;
        let (aggregated, conflicts) = refresh_weekly_demands(
            &agronomy,
            &aggregator,
            &accumulator,
            &network,
            next_week,
            WeatherFactors::default(),
        )
        .await
        .unwrap();

        assert!(conflicts.is_empty());
        assert_eq!(aggregated.len(), 1);
        // 10 000 m3 x 0.7 from the accumulated rainfall reduction.
        assert!((aggregated[0].total_volume_m3 - 7_000.0).abs() < 1e-6);
    }
}
