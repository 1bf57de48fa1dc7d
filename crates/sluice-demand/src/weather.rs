//! Daily weather adjustments and the week-over-week accumulator.
//!
//! Adjustments are data-driven: each [`AdjustmentRule`] is a condition
//! (`field op value`, optionally AND-composed with further conditions) plus
//! an action. Rules are independent; matched effects compose multiplicatively
//! on demand and additively on ET and application time. A rule that conflicts
//! with a higher-priority matched rule is suppressed.
//!
//! Daily records for `(zone, date)` are unique; a second write for the same
//! day merges additively, so records converge to the same state regardless
//! of arrival order.
//!
//! Accumulated records for week `w` shape the scheduling inputs of week
//! `w+1` and nothing else.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sluice_core::{IsoWeek, SluiceResult, ZoneId};
use std::collections::BTreeMap;

/// One day of zone weather as reported by the weather service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub zone_id: ZoneId,
    pub date: NaiveDate,
    pub rainfall_mm: f64,
    pub temperature_max_c: f64,
    pub temperature_min_c: f64,
    pub temperature_drop_c: f64,
    pub humidity_percent: f64,
    pub wind_speed_kmh: f64,
    pub evapotranspiration_mm: f64,
}

/// Observation field a rule condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherField {
    RainfallMm,
    TemperatureMaxC,
    TemperatureMinC,
    TemperatureDropC,
    HumidityPercent,
    WindSpeedKmh,
    EvapotranspirationMm,
}

impl WeatherField {
    pub fn extract(self, obs: &WeatherObservation) -> f64 {
        match self {
            WeatherField::RainfallMm => obs.rainfall_mm,
            WeatherField::TemperatureMaxC => obs.temperature_max_c,
            WeatherField::TemperatureMinC => obs.temperature_min_c,
            WeatherField::TemperatureDropC => obs.temperature_drop_c,
            WeatherField::HumidityPercent => obs.humidity_percent,
            WeatherField::WindSpeedKmh => obs.wind_speed_kmh,
            WeatherField::EvapotranspirationMm => obs.evapotranspiration_mm,
        }
    }
}

/// Comparison operator of a rule condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl RuleOp {
    pub fn eval(self, lhs: f64, rhs: f64) -> bool {
        match self {
            RuleOp::Gt => lhs > rhs,
            RuleOp::Lt => lhs < rhs,
            RuleOp::Ge => lhs >= rhs,
            RuleOp::Le => lhs <= rhs,
            RuleOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
            RuleOp::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        }
    }
}

/// A single `field op value` predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: WeatherField,
    pub op: RuleOp,
    pub value: f64,
}

impl Condition {
    pub fn matches(&self, obs: &WeatherObservation) -> bool {
        self.op.eval(self.field.extract(obs), self.value)
    }
}

/// Effect of a matched rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum RuleAction {
    /// Reduce the day's demand by a percentage.
    ReduceDemand(f64),
    /// Cancel field operations for the day (implies 100% demand reduction).
    CancelOperations,
    /// Adjust crop ET by a signed percentage.
    AdjustEt(f64),
    /// Lengthen gate application time by a percentage.
    IncreaseApplicationTime(f64),
}

/// Configurable weather adjustment rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentRule {
    pub code: String,
    pub name: String,
    pub condition: Condition,
    /// Extra conditions, AND-composed with the primary one.
    #[serde(default)]
    pub additional: Vec<Condition>,
    pub action: RuleAction,
    /// Higher priority wins when rules conflict.
    pub priority: i32,
    #[serde(default)]
    pub conflicts_with: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl AdjustmentRule {
    pub fn matches(&self, obs: &WeatherObservation) -> bool {
        self.active
            && self.condition.matches(obs)
            && self.additional.iter().all(|c| c.matches(obs))
    }
}

/// The built-in rule set.
///
/// R1 heavy rain cancels the day, R2 moderate rain trims demand 30%, R3 a
/// cold snap trims ET 20%, R4 high wind lengthens application 15%.
pub fn default_rules() -> Vec<AdjustmentRule> {
    vec![
        AdjustmentRule {
            code: "R1".to_string(),
            name: "heavy rainfall cancellation".to_string(),
            condition: Condition {
                field: WeatherField::RainfallMm,
                op: RuleOp::Gt,
                value: 25.0,
            },
            additional: Vec::new(),
            action: RuleAction::CancelOperations,
            priority: 100,
            conflicts_with: vec!["R2".to_string()],
            active: true,
        },
        AdjustmentRule {
            code: "R2".to_string(),
            name: "moderate rainfall reduction".to_string(),
            condition: Condition {
                field: WeatherField::RainfallMm,
                op: RuleOp::Gt,
                value: 10.0,
            },
            additional: Vec::new(),
            action: RuleAction::ReduceDemand(30.0),
            priority: 50,
            conflicts_with: vec!["R1".to_string()],
            active: true,
        },
        AdjustmentRule {
            code: "R3".to_string(),
            name: "temperature drop ET adjustment".to_string(),
            condition: Condition {
                field: WeatherField::TemperatureDropC,
                op: RuleOp::Gt,
                value: 5.0,
            },
            additional: Vec::new(),
            action: RuleAction::AdjustEt(-20.0),
            priority: 40,
            conflicts_with: Vec::new(),
            active: true,
        },
        AdjustmentRule {
            code: "R4".to_string(),
            name: "wind application time increase".to_string(),
            condition: Condition {
                field: WeatherField::WindSpeedKmh,
                op: RuleOp::Gt,
                value: 20.0,
            },
            additional: Vec::new(),
            action: RuleAction::IncreaseApplicationTime(15.0),
            priority: 30,
            conflicts_with: Vec::new(),
            active: true,
        },
    ]
}

/// Accumulated adjustment for one `(zone, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAdjustment {
    pub zone_id: ZoneId,
    pub date: NaiveDate,
    pub week: IsoWeek,
    pub demand_reduction_percent: f64,
    pub operations_cancelled: bool,
    pub et_adjustment_percent: f64,
    pub application_time_increase_percent: f64,
    pub rainfall_mm: f64,
    pub temperature_drop_c: f64,
    pub wind_speed_kmh: f64,
    pub applied_rules: Vec<String>,
}

impl DailyAdjustment {
    /// Multiplicative demand factor for the day.
    pub fn demand_modifier(&self) -> f64 {
        if self.operations_cancelled {
            return 0.0;
        }
        (100.0 - self.demand_reduction_percent).max(0.0) / 100.0
    }
}

/// Zone modifiers the next week's scheduling consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneOutlook {
    pub demand_modifier: f64,
    pub et_modifier: f64,
    pub application_time_modifier: f64,
    pub blackout_dates: Vec<NaiveDate>,
    pub reasons: Vec<String>,
}

/// All zone modifiers for a target week, derived from the week before.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyOutlook {
    pub week: IsoWeek,
    pub based_on: IsoWeek,
    pub zones: BTreeMap<ZoneId, ZoneOutlook>,
}

/// Load a rule set from its JSON representation (the storage format of the
/// `adjustment_rules` table).
pub fn rules_from_json(json: &str) -> SluiceResult<Vec<AdjustmentRule>> {
    serde_json::from_str(json).map_err(Into::into)
}

/// Accumulates daily adjustments and aggregates them for the next week.
#[derive(Debug, Clone)]
pub struct WeeklyAccumulator {
    rules: Vec<AdjustmentRule>,
    records: BTreeMap<(ZoneId, NaiveDate), DailyAdjustment>,
}

impl Default for WeeklyAccumulator {
    fn default() -> Self {
        Self::with_rules(default_rules())
    }
}

impl WeeklyAccumulator {
    pub fn with_rules(rules: Vec<AdjustmentRule>) -> Self {
        Self {
            rules,
            records: BTreeMap::new(),
        }
    }

    /// Evaluate the rule set on one observation and fold the result into the
    /// daily record for `(zone, date)`.
    pub fn process_daily(&mut self, obs: &WeatherObservation) -> SluiceResult<DailyAdjustment> {
        let mut matched: Vec<&AdjustmentRule> =
            self.rules.iter().filter(|r| r.matches(obs)).collect();
        matched.sort_by_key(|r| std::cmp::Reverse(r.priority));

        // A matched rule is suppressed when a higher-priority matched rule
        // names it (in either direction) in a conflicts-with set.
        let mut winners: Vec<&AdjustmentRule> = Vec::new();
        for rule in matched {
            let conflicted = winners.iter().any(|w| {
                w.conflicts_with.contains(&rule.code) || rule.conflicts_with.contains(&w.code)
            });
            if !conflicted {
                winners.push(rule);
            }
        }

        let mut keep_fraction = 1.0;
        let mut cancelled = false;
        let mut et = 0.0;
        let mut app_time = 0.0;
        let mut applied = Vec::new();
        for rule in &winners {
            match rule.action {
                RuleAction::ReduceDemand(pct) => keep_fraction *= 1.0 - pct / 100.0,
                RuleAction::CancelOperations => {
                    cancelled = true;
                    keep_fraction = 0.0;
                }
                RuleAction::AdjustEt(pct) => et += pct,
                RuleAction::IncreaseApplicationTime(pct) => app_time += pct,
            }
            applied.push(rule.code.clone());
        }

        let delta = DailyAdjustment {
            zone_id: obs.zone_id.clone(),
            date: obs.date,
            week: IsoWeek::from_date(obs.date),
            demand_reduction_percent: (1.0 - keep_fraction) * 100.0,
            operations_cancelled: cancelled,
            et_adjustment_percent: et,
            application_time_increase_percent: app_time,
            rainfall_mm: obs.rainfall_mm,
            temperature_drop_c: obs.temperature_drop_c,
            wind_speed_kmh: obs.wind_speed_kmh,
            applied_rules: applied,
        };

        let key = (obs.zone_id.clone(), obs.date);
        let merged = match self.records.remove(&key) {
            None => delta,
            Some(existing) => merge_daily(existing, delta),
        };
        self.records.insert(key, merged.clone());
        Ok(merged)
    }

    pub fn record(&self, zone: &ZoneId, date: NaiveDate) -> Option<&DailyAdjustment> {
        self.records.get(&(zone.clone(), date))
    }

    /// Modifiers for `target_week`, aggregated from the daily records of the
    /// week before it. Per zone: demand modifiers multiply, ET modifiers
    /// multiply, application-time takes the worst day, cancelled days become
    /// blackout dates.
    pub fn outlook_for(&self, target_week: IsoWeek) -> WeeklyOutlook {
        let based_on = target_week.previous();
        let mut zones: BTreeMap<ZoneId, ZoneOutlook> = BTreeMap::new();

        for ((zone, date), adj) in &self.records {
            if adj.week != based_on {
                continue;
            }
            let entry = zones.entry(zone.clone()).or_insert_with(|| ZoneOutlook {
                demand_modifier: 1.0,
                et_modifier: 1.0,
                application_time_modifier: 1.0,
                blackout_dates: Vec::new(),
                reasons: Vec::new(),
            });
            entry.demand_modifier *= adj.demand_modifier();
            entry.et_modifier *= 1.0 + adj.et_adjustment_percent / 100.0;
            entry.application_time_modifier = entry
                .application_time_modifier
                .max(1.0 + adj.application_time_increase_percent / 100.0);
            if adj.operations_cancelled {
                entry.blackout_dates.push(*date);
            }
            if adj.demand_reduction_percent > 0.0 {
                entry.reasons.push(format!(
                    "{}: {:.0}% reduction ({})",
                    date,
                    adj.demand_reduction_percent,
                    adj.applied_rules.join("+")
                ));
            }
        }

        WeeklyOutlook {
            week: target_week,
            based_on,
            zones,
        }
    }

    /// Per-zone recommendations for the printable weekly report.
    pub fn recommendations(outlook: &ZoneOutlook) -> Vec<String> {
        let mut recs = Vec::new();
        if outlook.demand_modifier < 1.0 {
            recs.push(format!(
                "reduce irrigation volumes by {:.0}% following last week's rainfall",
                (1.0 - outlook.demand_modifier) * 100.0
            ));
        }
        if outlook.application_time_modifier > 1.0 {
            recs.push(format!(
                "lengthen gate operation times by {:.0}% to compensate for wind losses",
                (outlook.application_time_modifier - 1.0) * 100.0
            ));
        }
        if !outlook.blackout_dates.is_empty() {
            recs.push(format!(
                "skip irrigation on {} day(s) after heavy rainfall",
                outlook.blackout_dates.len()
            ));
        }
        if outlook.et_modifier < 1.0 {
            recs.push("expect reduced crop water uptake from cooler temperatures".to_string());
        }
        recs
    }
}

/// Additive merge for a second write to the same `(zone, date)`.
fn merge_daily(a: DailyAdjustment, b: DailyAdjustment) -> DailyAdjustment {
    let mut applied = a.applied_rules;
    for rule in b.applied_rules {
        if !applied.contains(&rule) {
            applied.push(rule);
        }
    }
    applied.sort();
    DailyAdjustment {
        zone_id: a.zone_id,
        date: a.date,
        week: a.week,
        demand_reduction_percent: (a.demand_reduction_percent + b.demand_reduction_percent)
            .min(100.0),
        operations_cancelled: a.operations_cancelled || b.operations_cancelled,
        et_adjustment_percent: a.et_adjustment_percent + b.et_adjustment_percent,
        application_time_increase_percent: a.application_time_increase_percent
            + b.application_time_increase_percent,
        rainfall_mm: a.rainfall_mm.max(b.rainfall_mm),
        temperature_drop_c: a.temperature_drop_c.max(b.temperature_drop_c),
        wind_speed_kmh: a.wind_speed_kmh.max(b.wind_speed_kmh),
        applied_rules: applied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(zone: &str, date: NaiveDate, rain: f64, drop: f64, wind: f64) -> WeatherObservation {
        WeatherObservation {
            zone_id: ZoneId::new(zone),
            date,
            rainfall_mm: rain,
            temperature_max_c: 33.0,
            temperature_min_c: 24.0,
            temperature_drop_c: drop,
            humidity_percent: 70.0,
            wind_speed_kmh: wind,
            evapotranspiration_mm: 5.2,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn test_heavy_rain_wins_over_moderate_rain() {
        let mut acc = WeeklyAccumulator::default();
        let adj = acc.process_daily(&obs("Zone_2", day(2), 30.0, 0.0, 0.0)).unwrap();
        assert!(adj.operations_cancelled);
        assert_eq!(adj.demand_reduction_percent, 100.0);
        assert_eq!(adj.applied_rules, vec!["R1".to_string()]);
    }

    #[test]
    fn test_moderate_rain_reduces_demand() {
        let mut acc = WeeklyAccumulator::default();
        let adj = acc.process_daily(&obs("Zone_2", day(2), 12.0, 0.0, 0.0)).unwrap();
        assert!(!adj.operations_cancelled);
        assert!((adj.demand_reduction_percent - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_cold_snap_and_wind_compose() {
        let mut acc = WeeklyAccumulator::default();
        let adj = acc.process_daily(&obs("Zone_2", day(2), 0.0, 6.5, 24.0)).unwrap();
        assert_eq!(adj.demand_reduction_percent, 0.0);
        assert!((adj.et_adjustment_percent + 20.0).abs() < 1e-9);
        assert!((adj.application_time_increase_percent - 15.0).abs() < 1e-9);
        assert_eq!(adj.applied_rules, vec!["R3".to_string(), "R4".to_string()]);
    }

    #[test]
    fn test_same_day_writes_merge_order_independent() {
        let first = obs("Zone_2", day(2), 12.0, 0.0, 0.0);
        let second = obs("Zone_2", day(2), 5.0, 0.0, 25.0);

        let mut forward = WeeklyAccumulator::default();
        forward.process_daily(&first).unwrap();
        let merged_fwd = forward.process_daily(&second).unwrap();

        let mut reverse = WeeklyAccumulator::default();
        reverse.process_daily(&second).unwrap();
        let merged_rev = reverse.process_daily(&first).unwrap();

        assert_eq!(merged_fwd, merged_rev);
        assert!((merged_fwd.demand_reduction_percent - 30.0).abs() < 1e-9);
        assert!((merged_fwd.application_time_increase_percent - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_weekly_accumulation_scenario() {
        // Rainfall series [30, 5, 0, 12, 0, 0, 0] over one ISO week:
        // the 30 mm day blacks out, the 12 mm day keeps 70%.
        let mut acc = WeeklyAccumulator::default();
        let rains = [30.0, 5.0, 0.0, 12.0, 0.0, 0.0, 0.0];
        // 2025-06-02 is a Monday.
        for (i, rain) in rains.iter().enumerate() {
            acc.process_daily(&obs("Zone_2", day(2 + i as u32), *rain, 0.0, 0.0))
                .unwrap();
        }

        let based_on = IsoWeek::from_date(day(2));
        let outlook = acc.outlook_for(based_on.next());
        let zone = &outlook.zones[&ZoneId::new("Zone_2")];

        assert_eq!(zone.demand_modifier, 0.0);
        assert_eq!(zone.blackout_dates, vec![day(2)]);
        // Without the blackout day, the surviving modifier is 0.7.
        let surviving: f64 = rains[1..]
            .iter()
            .map(|&rain| if rain > 10.0 { 0.7 } else { 1.0 })
            .product();
        assert!((surviving - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_outlook_only_reads_previous_week() {
        // Adjustments for week w influence week w+1 and only w+1.
        let mut acc = WeeklyAccumulator::default();
        acc.process_daily(&obs("Zone_2", day(2), 12.0, 0.0, 0.0)).unwrap();

        let week_of_record = IsoWeek::from_date(day(2));
        let next = acc.outlook_for(week_of_record.next());
        assert!(next.zones.contains_key(&ZoneId::new("Zone_2")));

        let two_ahead = acc.outlook_for(week_of_record.next().next());
        assert!(two_ahead.zones.is_empty());

        let same_week = acc.outlook_for(week_of_record);
        assert!(same_week.zones.is_empty());
    }

    #[test]
    fn test_custom_rule_with_and_conditions() {
        // Humid AND windy: a spray-drift rule that needs both.
        let rule = AdjustmentRule {
            code: "X1".to_string(),
            name: "drift risk".to_string(),
            condition: Condition {
                field: WeatherField::WindSpeedKmh,
                op: RuleOp::Ge,
                value: 15.0,
            },
            additional: vec![Condition {
                field: WeatherField::HumidityPercent,
                op: RuleOp::Lt,
                value: 40.0,
            }],
            action: RuleAction::IncreaseApplicationTime(10.0),
            priority: 10,
            conflicts_with: Vec::new(),
            active: true,
        };
        let mut acc = WeeklyAccumulator::with_rules(vec![rule]);
        // Humidity 70% fails the AND leg.
        let adj = acc.process_daily(&obs("Zone_2", day(2), 0.0, 0.0, 18.0)).unwrap();
        assert!(adj.applied_rules.is_empty());
        assert_eq!(adj.application_time_increase_percent, 0.0);
    }

    #[test]
    fn test_rules_round_trip_through_json() {
        let json = serde_json::to_string(&default_rules()).unwrap();
        let rules = rules_from_json(&json).unwrap();
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].code, "R1");
        assert_eq!(rules[0].condition.op, RuleOp::Gt);
        assert!(rules_from_json("not json").is_err());
    }

    #[test]
    fn test_inactive_rule_ignored() {
        let mut rules = default_rules();
        rules[0].active = false;
        let mut acc = WeeklyAccumulator::with_rules(rules);
        let adj = acc.process_daily(&obs("Zone_2", day(2), 30.0, 0.0, 0.0)).unwrap();
        // R1 is off, so R2 takes it instead.
        assert!(!adj.operations_cancelled);
        assert!((adj.demand_reduction_percent - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_recommendations() {
        let outlook = ZoneOutlook {
            demand_modifier: 0.7,
            et_modifier: 0.8,
            application_time_modifier: 1.15,
            blackout_dates: vec![day(2)],
            reasons: Vec::new(),
        };
        let recs = WeeklyAccumulator::recommendations(&outlook);
        assert_eq!(recs.len(), 4);
        assert!(recs[0].contains("30%"));
        assert!(recs[1].contains("15%"));
    }
}
