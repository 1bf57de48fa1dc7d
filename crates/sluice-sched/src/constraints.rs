//! Registry of operator-configured planning constraints.
//!
//! Built-in physics (gate ratings, canal capacities, team daily caps) is
//! always enforced; this registry carries the extra limits operators add per
//! entity. Hard constraints tighten the optimizer's bounds; soft constraints
//! are priced into the objective through their violation penalty and
//! reported when the final plan breaks them.

use serde::{Deserialize, Serialize};
use sluice_core::{GateId, TeamId, ZoneId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Capacity,
    Flow,
    Time,
    Resource,
}

/// Entity a constraint applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "entity", content = "id")]
pub enum AppliesTo {
    Gate(GateId),
    Zone(ZoneId),
    Team(TeamId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConstraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub applies_to: AppliesTo,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub hard: bool,
    /// Objective penalty per unit of violation for soft constraints.
    pub violation_penalty: f64,
    pub active: bool,
}

impl PlanningConstraint {
    /// Hard flow ceiling for a gate (m3/s).
    pub fn gate_flow_ceiling(name: impl Into<String>, gate: GateId, max_m3s: f64) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Flow,
            applies_to: AppliesTo::Gate(gate),
            min_value: None,
            max_value: Some(max_m3s),
            hard: true,
            violation_penalty: 0.0,
            active: true,
        }
    }

    /// Hard daily operation cap for a team.
    pub fn team_daily_cap(name: impl Into<String>, team: TeamId, max_ops: f64) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Resource,
            applies_to: AppliesTo::Team(team),
            min_value: None,
            max_value: Some(max_ops),
            hard: true,
            violation_penalty: 0.0,
            active: true,
        }
    }
}

/// Ordered collection of planning constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintRegistry {
    constraints: Vec<PlanningConstraint>,
}

impl ConstraintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, constraint: PlanningConstraint) {
        self.constraints.push(constraint);
    }

    pub fn active(&self) -> impl Iterator<Item = &PlanningConstraint> {
        self.constraints.iter().filter(|c| c.active)
    }

    /// Effective flow ceiling for a gate: the rated maximum tightened by any
    /// active hard flow constraints.
    pub fn gate_flow_limit(&self, gate: &GateId, rated_m3s: f64) -> f64 {
        self.active()
            .filter(|c| c.hard && matches!(&c.applies_to, AppliesTo::Gate(g) if g == gate))
            .filter_map(|c| c.max_value)
            .fold(rated_m3s, f64::min)
    }

    /// Effective daily cap for a team.
    pub fn team_cap(&self, team: &TeamId, default_cap: u32) -> u32 {
        self.active()
            .filter(|c| c.hard && matches!(&c.applies_to, AppliesTo::Team(t) if t == team))
            .filter_map(|c| c.max_value)
            .fold(default_cap as f64, f64::min) as u32
    }

    /// Soft constraints broken by a gate's planned peak flow, with the
    /// penalty each one charges.
    pub fn soft_violations(&self, gate: &GateId, peak_flow_m3s: f64) -> Vec<(String, f64)> {
        self.active()
            .filter(|c| !c.hard && matches!(&c.applies_to, AppliesTo::Gate(g) if g == gate))
            .filter_map(|c| {
                let ceiling = c.max_value?;
                if peak_flow_m3s > ceiling {
                    Some((
                        c.name.clone(),
                        (peak_flow_m3s - ceiling) * c.violation_penalty,
                    ))
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_gate_limit_tightens_rating() {
        let mut registry = ConstraintRegistry::new();
        let gate = GateId::new("M(0,2)->Zone_2");
        registry.add(PlanningConstraint::gate_flow_ceiling(
            "maintenance derating",
            gate.clone(),
            2.0,
        ));
        assert_eq!(registry.gate_flow_limit(&gate, 5.0), 2.0);
        // Unconstrained gates keep their rating.
        assert_eq!(registry.gate_flow_limit(&GateId::new("other"), 5.0), 5.0);
    }

    #[test]
    fn test_inactive_constraint_ignored() {
        let mut registry = ConstraintRegistry::new();
        let gate = GateId::new("M(0,2)->Zone_2");
        let mut c = PlanningConstraint::gate_flow_ceiling("off", gate.clone(), 2.0);
        c.active = false;
        registry.add(c);
        assert_eq!(registry.gate_flow_limit(&gate, 5.0), 5.0);
    }

    #[test]
    fn test_team_cap_override() {
        let mut registry = ConstraintRegistry::new();
        let team = TeamId::new("TEAM-A");
        registry.add(PlanningConstraint::team_daily_cap("short staffed", team.clone(), 6.0));
        assert_eq!(registry.team_cap(&team, 30), 6);
    }

    #[test]
    fn test_soft_violation_priced() {
        let mut registry = ConstraintRegistry::new();
        let gate = GateId::new("M(0,2)->Zone_2");
        registry.add(PlanningConstraint {
            name: "erosion watch".to_string(),
            kind: ConstraintKind::Flow,
            applies_to: AppliesTo::Gate(gate.clone()),
            min_value: None,
            max_value: Some(3.0),
            hard: false,
            violation_penalty: 50.0,
            active: true,
        });
        let violations = registry.soft_violations(&gate, 4.0);
        assert_eq!(violations.len(), 1);
        assert!((violations[0].1 - 50.0).abs() < 1e-9);
        assert!(registry.soft_violations(&gate, 2.0).is_empty());
    }
}
