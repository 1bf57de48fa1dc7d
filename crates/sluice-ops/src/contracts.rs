//! Collaborator service contracts.
//!
//! The core consumes these interfaces; concrete transports live with the
//! deployment. The in-process defaults here cover what the core itself
//! needs: a prefix-policy SCADA bridge (the real reachability contract is a
//! plug-in) and an exponential-backoff retry wrapper for idempotent reads.

use async_trait::async_trait;
use chrono::NaiveDate;
use sluice_core::{Gate, GateId, IsoWeek, SluiceError, SluiceResult, ZoneId};
use sluice_demand::{PlotDemand, WeatherObservation};
use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

/// Command priority on the SCADA write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPriority {
    Normal,
    High,
    Emergency,
}

/// Weather impact analysis returned by the agronomy service.
#[derive(Debug, Clone)]
pub struct WeatherImpact {
    pub demand_adjustment_percent: f64,
    pub adjustment_factors: Vec<String>,
}

/// Agronomy / crop-demand service.
#[async_trait]
pub trait AgronomyService: Send + Sync {
    async fn current_week_demand(&self, week: IsoWeek) -> SluiceResult<Vec<PlotDemand>>;
    async fn analyze_weather_impact(
        &self,
        observation: &WeatherObservation,
        week: IsoWeek,
    ) -> SluiceResult<WeatherImpact>;
}

/// SCADA bridge for remotely actuated gates.
#[async_trait]
pub trait ScadaBridge: Send + Sync {
    /// Whether the gate's remote terminal answers.
    async fn is_reachable(&self, gate: &Gate) -> bool;
    /// Latest commanded positions (percent of max opening).
    async fn gate_positions(&self) -> SluiceResult<HashMap<GateId, f64>>;
    /// Drive a gate to a position.
    async fn set_gate_position(
        &self,
        gate: &GateId,
        opening_percent: f64,
        priority: CommandPriority,
    ) -> SluiceResult<()>;
}

/// Zone weather service.
#[async_trait]
pub trait WeatherService: Send + Sync {
    async fn zone_weather(&self, zone: &ZoneId, date: NaiveDate) -> SluiceResult<WeatherObservation>;
}

/// Default SCADA bridge: reachability by id prefix, positions held in
/// memory. Stands in until a real telemetry transport is wired up.
#[derive(Debug, Default)]
pub struct PrefixScadaBridge {
    positions: RwLock<HashMap<GateId, f64>>,
}

impl PrefixScadaBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// The automated-fleet prefix policy.
    pub fn automated_prefixes() -> &'static [&'static str] {
        crate::controller::AUTOMATED_PREFIXES.as_slice()
    }
}

#[async_trait]
impl ScadaBridge for PrefixScadaBridge {
    async fn is_reachable(&self, gate: &Gate) -> bool {
        let id = gate.scada_id.as_deref().unwrap_or(gate.id.as_str());
        Self::automated_prefixes()
            .iter()
            .any(|prefix| id.starts_with(prefix))
    }

    async fn gate_positions(&self) -> SluiceResult<HashMap<GateId, f64>> {
        Ok(self.positions.read().expect("position lock poisoned").clone())
    }

    async fn set_gate_position(
        &self,
        gate: &GateId,
        opening_percent: f64,
        _priority: CommandPriority,
    ) -> SluiceResult<()> {
        if !(0.0..=100.0).contains(&opening_percent) {
            return Err(SluiceError::InvalidInput(format!(
                "opening percent {opening_percent} outside [0, 100]"
            )));
        }
        self.positions
            .write()
            .expect("position lock poisoned")
            .insert(gate.clone(), opening_percent);
        Ok(())
    }
}

/// Retry an idempotent read with exponential backoff (0.5 * 2^n seconds,
/// three attempts by default). Writes must not be retried through this
/// unless the caller knows the request was never observed.
pub async fn retry_read<T, F, Fut>(service: &str, attempts: u32, mut call: F) -> SluiceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SluiceResult<T>>,
{
    let mut last = None;
    for attempt in 0..attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::warn!(service, attempt, error = %err, "collaborator read failed");
                last = Some(err);
                if attempt + 1 < attempts {
                    let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(match last {
        Some(err) => SluiceError::External {
            service: service.to_string(),
            reason: err.to_string(),
        },
        None => SluiceError::External {
            service: service.to_string(),
            reason: "no attempts made".to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_read("agronomy", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SluiceError::Other("connection reset".into()))
                } else {
                    Ok(41 + 1)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_with_external_error() {
        let result: SluiceResult<()> = retry_read("weather", 3, || async {
            Err(SluiceError::Other("gateway timeout".into()))
        })
        .await;
        match result.unwrap_err() {
            SluiceError::External { service, reason } => {
                assert_eq!(service, "weather");
                assert!(reason.contains("gateway timeout"));
            }
            other => panic!("expected External, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_prefix_bridge_reachability() {
        let bridge = PrefixScadaBridge::new();
        let reachable = Gate::new("Source", "M(0,0)").with_scada_id("HG-C-001");
        let manual = Gate::new("M(0,2)", "Zone_2");
        assert!(bridge.is_reachable(&reachable).await);
        assert!(!bridge.is_reachable(&manual).await);
    }

    #[tokio::test]
    async fn test_prefix_bridge_positions() {
        let bridge = PrefixScadaBridge::new();
        let gate = GateId::new("Source->M(0,0)");
        bridge
            .set_gate_position(&gate, 55.0, CommandPriority::Normal)
            .await
            .unwrap();
        let positions = bridge.gate_positions().await.unwrap();
        assert_eq!(positions[&gate], 55.0);

        assert!(bridge
            .set_gate_position(&gate, 140.0, CommandPriority::Normal)
            .await
            .is_err());
    }
}
