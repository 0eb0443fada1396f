use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    core::{interval::Interval, mode::Mode},
    quantity::{cost::Koruna, energy::KilowattHours, proportions::Percent},
};

/// How a plan came to exist.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Automatic,
    Manual,
    Simulation,
    Balancing,
    Emergency,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Active,
    Reverted,
    Invalidated,
    Expired,
    Completed,
}

/// Who asked for a holding window and why.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    BalancingForced,
    BalancingOpportunistic,
    Emergency,
    Manual,
}

/// Immutable request from a monitor (or the operator) for a target state of
/// charge held over a window. The optimizer consumes intents, it never
/// produces or mutates them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct Intent {
    pub kind: IntentKind,
    pub required_soc: KilowattHours,
    pub holding_start: DateTime<Utc>,
    pub holding_end: DateTime<Utc>,
    pub locked: bool,
}

impl Intent {
    /// Mode pinned over the holding window.
    #[must_use]
    pub const fn holding_mode(&self) -> Mode {
        match self.kind {
            IntentKind::BalancingOpportunistic => Mode::HomeIii,
            IntentKind::BalancingForced | IntentKind::Emergency | IntentKind::Manual => {
                Mode::HomeUps
            }
        }
    }

    #[must_use]
    pub const fn plan_kind(&self) -> PlanKind {
        match self.kind {
            IntentKind::Emergency => PlanKind::Emergency,
            IntentKind::Manual => PlanKind::Manual,
            IntentKind::BalancingForced | IntentKind::BalancingOpportunistic => PlanKind::Balancing,
        }
    }

    #[must_use]
    pub fn is_holding(&self, now: DateTime<Utc>) -> bool {
        (self.holding_start <= now) && (now <= self.holding_end)
    }

    #[must_use]
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        (self.holding_start <= end) && (self.holding_end >= start)
    }
}

/// One simulated quarter-hour of a plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct PlanIntervalResult {
    pub start: DateTime<Utc>,
    pub mode: Mode,
    pub soc_after_kwh: KilowattHours,
    pub soc_after_percent: Percent,
    pub grid_import_kwh: KilowattHours,
    pub grid_export_kwh: KilowattHours,
    pub battery_charge_kwh: KilowattHours,
    pub battery_discharge_kwh: KilowattHours,
    pub boiler_kwh: KilowattHours,
    pub curtailed_kwh: KilowattHours,
    pub net_cost: Koruna,
    pub reason: String,
}

/// Number of maximal same-mode runs per mode.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeBlocks {
    pub home_i: u32,
    pub home_ii: u32,
    pub home_iii: u32,
    pub home_ups: u32,
}

impl ModeBlocks {
    pub const fn bump(&mut self, mode: Mode) {
        match mode {
            Mode::HomeI => self.home_i += 1,
            Mode::HomeII => self.home_ii += 1,
            Mode::HomeIii => self.home_iii += 1,
            Mode::HomeUps => self.home_ups += 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct PlanMetadata {
    pub total_cost: Koruna,
    pub min_capacity_violations: u32,
    pub target_achieved: bool,
    pub final_soc_kwh: KilowattHours,
    pub mode_switches: u32,
    pub clamp_events: u32,
    pub blocks_by_mode: ModeBlocks,
}

impl Default for PlanMetadata {
    fn default() -> Self {
        Self {
            total_cost: Koruna(0.0),
            min_capacity_violations: 0,
            target_achieved: true,
            final_soc_kwh: KilowattHours(0.0),
            mode_switches: 0,
            clamp_events: 0,
            blocks_by_mode: ModeBlocks::default(),
        }
    }
}

/// Full per-interval mode assignment with the simulated trajectory.
///
/// Plans are exclusively owned by the plan manager; everybody else sees
/// immutable snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct Plan {
    pub id: String,
    pub kind: PlanKind,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub holding_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub holding_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub required_soc_kwh: Option<KilowattHours>,
    #[serde(default)]
    pub required_soc_percent: Option<Percent>,
    pub locked: bool,
    pub timeline: Vec<PlanIntervalResult>,
    pub metadata: PlanMetadata,
}

impl Plan {
    /// Preemption priority. A `locked` plan may only be replaced by a
    /// strictly higher one.
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match (self.kind, self.locked) {
            (PlanKind::Emergency, _) => 4,
            (PlanKind::Balancing, true) => 3,
            (PlanKind::Balancing, false) => 2,
            (PlanKind::Manual, _) => 1,
            (PlanKind::Automatic | PlanKind::Simulation, _) => 0,
        }
    }

    /// Mode commanded for the interval containing `now`.
    #[must_use]
    pub fn mode_at(&self, now: DateTime<Utc>) -> Option<Mode> {
        self.timeline
            .iter()
            .find(|entry| entry.start <= now && now < entry.start + Interval::LENGTH)
            .map(|entry| entry.mode)
    }

    /// A plan is over once both the deadline and the holding window passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline && self.holding_end.is_none_or(|end| now > end)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn locked_balancing_outranks_manual() {
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap();
        let plan = |kind, locked| Plan {
            id: "test".to_string(),
            kind,
            status: PlanStatus::Active,
            created_at: now,
            activated_at: Some(now),
            deadline: now,
            holding_start: None,
            holding_end: None,
            required_soc_kwh: None,
            required_soc_percent: None,
            locked,
            timeline: Vec::new(),
            metadata: PlanMetadata::default(),
        };
        assert!(plan(PlanKind::Balancing, true).priority() > plan(PlanKind::Manual, false).priority());
        assert!(plan(PlanKind::Emergency, true).priority() > plan(PlanKind::Balancing, true).priority());
        assert_eq!(plan(PlanKind::Simulation, false).priority(), 0);
    }

    #[test]
    fn mode_lookup_follows_the_timeline() {
        let start = Utc.with_ymd_and_hms(2025, 11, 3, 22, 0, 0).unwrap();
        let entry = |offset: i32, mode| PlanIntervalResult {
            start: start + Interval::LENGTH * offset,
            mode,
            soc_after_kwh: KilowattHours(6.0),
            soc_after_percent: Percent(39.1),
            grid_import_kwh: KilowattHours(0.0),
            grid_export_kwh: KilowattHours(0.0),
            battery_charge_kwh: KilowattHours(0.0),
            battery_discharge_kwh: KilowattHours(0.0),
            boiler_kwh: KilowattHours(0.0),
            curtailed_kwh: KilowattHours(0.0),
            net_cost: Koruna(0.0),
            reason: String::new(),
        };
        let plan = Plan {
            id: "automatic-1762207200".to_string(),
            kind: PlanKind::Automatic,
            status: PlanStatus::Active,
            created_at: start,
            activated_at: Some(start),
            deadline: start + chrono::TimeDelta::hours(1),
            holding_start: None,
            holding_end: None,
            required_soc_kwh: None,
            required_soc_percent: None,
            locked: false,
            timeline: vec![entry(0, Mode::HomeUps), entry(1, Mode::HomeI)],
            metadata: PlanMetadata::default(),
        };
        assert_eq!(plan.mode_at(start + chrono::TimeDelta::minutes(5)), Some(Mode::HomeUps));
        assert_eq!(plan.mode_at(start + chrono::TimeDelta::minutes(20)), Some(Mode::HomeI));
        assert_eq!(plan.mode_at(start + chrono::TimeDelta::hours(2)), None);

        // The persisted document round-trips without loss.
        let encoded = serde_json::to_string(&plan).unwrap();
        let decoded: Plan = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, plan);
    }

    #[test]
    fn opportunistic_holds_in_home_iii() {
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 22, 0, 0).unwrap();
        let intent = Intent {
            kind: IntentKind::BalancingOpportunistic,
            required_soc: KilowattHours(15.36),
            holding_start: now,
            holding_end: now + chrono::TimeDelta::hours(3),
            locked: false,
        };
        assert_eq!(intent.holding_mode(), Mode::HomeIii);
        assert!(intent.is_holding(now + chrono::TimeDelta::hours(1)));
        assert!(!intent.is_holding(now + chrono::TimeDelta::hours(4)));
    }
}
