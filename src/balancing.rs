use std::fmt::{Display, Formatter};

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{TimestampSeconds, serde_as};

use crate::{
    api::telemetry::SocSample,
    config::PlannerConfig,
    core::{
        grid::IntervalGrid,
        interval::Interval,
        mode::Mode,
        optimizer::HybridOptimizer,
        simulator::BatteryState,
    },
    plan::{Intent, IntentKind},
    prelude::*,
    quantity::{cost::Koruna, proportions::Percent},
};

/// SoC counting as "full" for natural-balancing detection.
const NATURAL_SOC: Percent = Percent(99.0);

/// How long the battery must sit full for a natural balancing.
const NATURAL_WINDOW: TimeDelta = TimeDelta::hours(3);

/// How far back the natural detection looks.
const NATURAL_LOOKBACK: TimeDelta = TimeDelta::days(7);

/// Consecutive samples further apart than this break a full-SoC run.
const SAMPLE_GAP_LIMIT: TimeDelta = TimeDelta::hours(1);

/// Days before the forced deadline in which opportunistic windows are tried.
const OPPORTUNISTIC_LEAD_DAYS: i64 = 2;

/// An opportunistic window may cost at most this much extra.
const OPPORTUNISTIC_COST_GATE: Koruna = Koruna(50.0);

/// How many of the cheapest night windows are actually costed.
const CANDIDATE_WINDOWS: usize = 5;

/// Charging ramp assumption: one interval moves the SoC by about 5%.
const RAMP_PERCENT_PER_INTERVAL: Percent = Percent(5.0);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancingPhase {
    Idle,
    Natural,
    Opportunistic,
    Forced,
    Holding,
    Completed,
}

impl Display for BalancingPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "standby",
            Self::Natural => "natural",
            Self::Opportunistic => "opportunistic",
            Self::Forced => "forced",
            Self::Holding => "holding",
            Self::Completed => "completed",
        })
    }
}

/// Persisted coordinator state (`balancing.json`).
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BalancingState {
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    #[serde(default)]
    pub last_balancing_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_intent: Option<Intent>,
}

/// Status document surfaced to the operator.
#[derive(Clone, Debug, Serialize)]
pub struct BalancingStatus {
    pub state: BalancingPhase,
    pub days_since_last: Option<i64>,
    pub last_balancing: Option<DateTime<Utc>>,
    pub next_deadline: Option<DateTime<Utc>>,
    pub planned_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub mode: Option<Mode>,
}

/// Decides natural / opportunistic / forced balancing once per hour and
/// owns `last_balancing_ts`. Emits immutable intents; never touches plans.
pub struct BalancingCoordinator<'a> {
    pub config: &'a PlannerConfig,
}

impl BalancingCoordinator<'_> {
    /// One evaluation round. Mutates only the coordinator's own state.
    #[instrument(skip_all, fields(now = %now))]
    pub fn evaluate(
        &self,
        state: &mut BalancingState,
        now: DateTime<Utc>,
        current_soc: Percent,
        history: &[SocSample],
        intervals: &[Interval],
        initial: BatteryState,
    ) -> (Option<Intent>, BalancingStatus) {
        // A running intent is held alive through its window; it is neither
        // regenerated nor cleared before the holding end has passed.
        if let Some(intent) = state.active_intent.clone() {
            if now > intent.holding_end {
                info!(holding_end = %intent.holding_end, "balancing completed");
                state.last_balancing_ts = Some(intent.holding_end);
                state.active_intent = None;
                return (None, self.status(state, BalancingPhase::Completed, now));
            }
            let phase = if intent.is_holding(now) {
                BalancingPhase::Holding
            } else if intent.locked {
                BalancingPhase::Forced
            } else {
                BalancingPhase::Opportunistic
            };
            return (Some(intent), self.status(state, phase, now));
        }

        if let Some(window_end) = self.detect_natural(history, now)
            && state.last_balancing_ts.is_none_or(|last| window_end > last)
        {
            info!(%window_end, "the battery balanced naturally");
            state.last_balancing_ts = Some(window_end);
            return (None, self.status(state, BalancingPhase::Natural, now));
        }

        let days_since_last = state
            .last_balancing_ts
            .map(|last| (now - last).num_days());
        let overdue = days_since_last.is_none_or(|days| days >= self.config.balancing_interval_days);
        if overdue {
            let intent = self.forced_intent(now, current_soc);
            info!(holding_start = %intent.holding_start, "forcing a balancing charge");
            state.active_intent = Some(intent.clone());
            return (Some(intent), self.status(state, BalancingPhase::Forced, now));
        }

        let within_lead = days_since_last.is_some_and(|days| {
            days >= self.config.balancing_interval_days - OPPORTUNISTIC_LEAD_DAYS
        });
        if within_lead
            && let Some(intent) = self.opportunistic_intent(now, intervals, initial)
        {
            info!(
                holding_start = %intent.holding_start,
                "scheduling an opportunistic balancing window",
            );
            state.active_intent = Some(intent.clone());
            return (Some(intent), self.status(state, BalancingPhase::Opportunistic, now));
        }

        (None, self.status(state, BalancingPhase::Idle, now))
    }

    /// Status without running an evaluation round, for the query surface.
    pub fn current_status(&self, state: &BalancingState, now: DateTime<Utc>) -> BalancingStatus {
        let phase = match &state.active_intent {
            Some(intent) if intent.is_holding(now) => BalancingPhase::Holding,
            Some(intent) if intent.locked => BalancingPhase::Forced,
            Some(_) => BalancingPhase::Opportunistic,
            None => BalancingPhase::Idle,
        };
        self.status(state, phase, now)
    }

    fn status(
        &self,
        state: &BalancingState,
        phase: BalancingPhase,
        now: DateTime<Utc>,
    ) -> BalancingStatus {
        BalancingStatus {
            state: phase,
            days_since_last: state.last_balancing_ts.map(|last| (now - last).num_days()),
            last_balancing: state.last_balancing_ts,
            next_deadline: state
                .last_balancing_ts
                .map(|last| last + TimeDelta::days(self.config.balancing_interval_days)),
            planned_window: state
                .active_intent
                .as_ref()
                .map(|intent| (intent.holding_start, intent.holding_end)),
            mode: state.active_intent.as_ref().map(Intent::holding_mode),
        }
    }

    /// End of the most recent ≥ 3 h window of ≥ 99% SoC within the last
    /// seven days, if any.
    fn detect_natural(&self, history: &[SocSample], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let cutoff = now - NATURAL_LOOKBACK;
        let mut run_start: Option<DateTime<Utc>> = None;
        let mut previous: Option<DateTime<Utc>> = None;
        let mut found: Option<DateTime<Utc>> = None;
        for sample in history.iter().filter(|sample| sample.timestamp >= cutoff) {
            if previous.is_some_and(|previous| sample.timestamp - previous > SAMPLE_GAP_LIMIT) {
                run_start = None;
            }
            previous = Some(sample.timestamp);
            if sample.soc_percent >= NATURAL_SOC {
                let start = *run_start.get_or_insert(sample.timestamp);
                if sample.timestamp - start >= NATURAL_WINDOW {
                    found = Some(sample.timestamp);
                }
            } else {
                run_start = None;
            }
        }
        found
    }

    /// Forced balancing: the holding window opens as soon as the charging
    /// ramp can plausibly complete, at least one interval from now.
    fn forced_intent(&self, now: DateTime<Utc>, current_soc: Percent) -> Intent {
        let missing = (Percent::HUNDRED - current_soc).max(Percent(0.0));
        let ramp_intervals = (missing.0 / RAMP_PERCENT_PER_INTERVAL.0).ceil().max(1.0);
        #[allow(clippy::cast_possible_truncation)]
        let ramp = Interval::LENGTH * ramp_intervals as i32;
        let holding_start = IntervalGrid::align_up(now + ramp);
        Intent {
            kind: IntentKind::BalancingForced,
            required_soc: self.config.total_capacity,
            holding_start,
            holding_end: holding_start + TimeDelta::hours(self.config.balancing_hold_hours),
            locked: true,
        }
    }

    /// Scan 22:00–06:00 local windows, cost the five cheapest and take the
    /// best one if it is cheap enough.
    fn opportunistic_intent(
        &self,
        now: DateTime<Utc>,
        intervals: &[Interval],
        initial: BatteryState,
    ) -> Option<Intent> {
        let window_length = (self.config.balancing_hold_hours * 4) as usize;
        if intervals.len() < window_length {
            return None;
        }
        let mut windows: Vec<(usize, f64)> = (0..=intervals.len() - window_length)
            .filter(|&start| {
                intervals[start..start + window_length]
                    .iter()
                    .all(|interval| self.is_night(interval) && interval.start >= now)
            })
            .map(|start| {
                let mean = intervals[start..start + window_length]
                    .iter()
                    .map(|interval| interval.import_price.0)
                    .sum::<f64>()
                    / window_length as f64;
                (start, mean)
            })
            .collect();
        windows.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        windows.truncate(CANDIDATE_WINDOWS);

        let baseline = HybridOptimizer::builder()
            .intervals(intervals)
            .initial_state(initial)
            .config(self.config)
            .build()
            .optimize()
            .metadata
            .total_cost;

        let mut best: Option<(Intent, Koruna)> = None;
        for (start, _) in windows {
            let intent = Intent {
                kind: IntentKind::BalancingOpportunistic,
                required_soc: self.config.total_capacity,
                holding_start: intervals[start].start,
                holding_end: intervals[start].start
                    + TimeDelta::hours(self.config.balancing_hold_hours),
                locked: false,
            };
            let cost = HybridOptimizer::builder()
                .intervals(intervals)
                .initial_state(initial)
                .config(self.config)
                .intent(&intent)
                .build()
                .optimize()
                .metadata
                .total_cost;
            let delta = cost - baseline;
            if best.as_ref().is_none_or(|(_, best_delta)| delta < *best_delta) {
                best = Some((intent, delta));
            }
        }

        match best {
            Some((intent, delta)) if delta <= OPPORTUNISTIC_COST_GATE => {
                debug!(delta = ?delta, "the cheapest night window is acceptable");
                Some(intent)
            }
            Some((_, delta)) => {
                debug!(delta = ?delta, "every night window is too expensive, staying idle");
                None
            }
            None => None,
        }
    }

    fn is_night(&self, interval: &Interval) -> bool {
        let hour = interval.start.with_timezone(&self.config.timezone).hour();
        !(6..22).contains(&hour)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        core::simulator::tests::test_config,
        quantity::{energy::KilowattHours, rate::KorunaPerKilowattHour},
    };

    fn night_intervals(
        start: DateTime<Utc>,
        count: usize,
        price: f64,
    ) -> Vec<Interval> {
        (0..count)
            .map(|position| Interval {
                start: start + Interval::LENGTH * position as i32,
                pv: KilowattHours(0.0),
                load: KilowattHours(0.3),
                import_price: KorunaPerKilowattHour(price),
                export_price: KorunaPerKilowattHour(1.0),
            })
            .collect()
    }

    #[test]
    fn forced_when_overdue() {
        let config = test_config();
        let coordinator = BalancingCoordinator { config: &config };
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 15, 30, 0).unwrap();
        let mut state = BalancingState {
            last_balancing_ts: Some(now - TimeDelta::days(7)),
            active_intent: None,
        };
        let (intent, status) = coordinator.evaluate(
            &mut state,
            now,
            Percent(98.0),
            &[],
            &night_intervals(now, 16, 2.0),
            BatteryState { soc: KilowattHours(15.05) },
        );
        let intent = intent.unwrap();
        assert_eq!(status.state, BalancingPhase::Forced);
        assert!(intent.locked);
        assert_eq!(intent.required_soc, config.total_capacity);
        // 2% missing rounds up to a single ramp interval: 15:45 at the latest.
        assert!(intent.holding_start <= Utc.with_ymd_and_hms(2025, 11, 3, 15, 45, 0).unwrap());
        assert_eq!(
            intent.holding_end,
            intent.holding_start + TimeDelta::hours(config.balancing_hold_hours),
        );
    }

    #[test]
    fn active_intent_is_kept_alive_not_regenerated() {
        let config = test_config();
        let coordinator = BalancingCoordinator { config: &config };
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 16, 0, 0).unwrap();
        let intent = Intent {
            kind: IntentKind::BalancingForced,
            required_soc: config.total_capacity,
            holding_start: now - TimeDelta::minutes(15),
            holding_end: now + TimeDelta::hours(2),
            locked: true,
        };
        let mut state = BalancingState {
            last_balancing_ts: Some(now - TimeDelta::days(8)),
            active_intent: Some(intent.clone()),
        };
        // Even well past the holding start the same intent comes back.
        let (returned, status) =
            coordinator.evaluate(&mut state, now, Percent(100.0), &[], &[], BatteryState {
                soc: config.total_capacity,
            });
        assert_eq!(returned.unwrap(), intent);
        assert_eq!(status.state, BalancingPhase::Holding);

        // One tick past the holding end it completes and the timestamp moves.
        let after = intent.holding_end + TimeDelta::minutes(15);
        let (returned, status) =
            coordinator.evaluate(&mut state, after, Percent(100.0), &[], &[], BatteryState {
                soc: config.total_capacity,
            });
        assert!(returned.is_none());
        assert_eq!(status.state, BalancingPhase::Completed);
        assert_eq!(state.last_balancing_ts, Some(intent.holding_end));
    }

    #[test]
    fn natural_balancing_advances_the_timestamp() {
        let config = test_config();
        let coordinator = BalancingCoordinator { config: &config };
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap();
        let full_since = now - TimeDelta::hours(5);
        let history: Vec<SocSample> = (0..20)
            .map(|position| SocSample {
                timestamp: full_since + TimeDelta::minutes(15 * position),
                soc_percent: Percent(99.5),
            })
            .collect();
        let mut state = BalancingState {
            last_balancing_ts: Some(now - TimeDelta::days(6)),
            active_intent: None,
        };
        let (intent, status) = coordinator.evaluate(
            &mut state,
            now,
            Percent(99.5),
            &history,
            &[],
            BatteryState { soc: config.total_capacity },
        );
        assert!(intent.is_none());
        assert_eq!(status.state, BalancingPhase::Natural);
        assert!(state.last_balancing_ts.unwrap() > now - TimeDelta::days(1));
    }

    #[test]
    fn cheap_nights_win_an_opportunistic_window() {
        let config = test_config();
        let coordinator = BalancingCoordinator { config: &config };
        // 22:00 local is 21:00 UTC in November.
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 21, 0, 0).unwrap();
        let mut state = BalancingState {
            last_balancing_ts: Some(now - TimeDelta::days(6)),
            active_intent: None,
        };
        let intervals = night_intervals(now, 32, 1.0);
        let (intent, status) = coordinator.evaluate(
            &mut state,
            now,
            Percent(40.0),
            &[],
            &intervals,
            BatteryState { soc: KilowattHours(6.14) },
        );
        let intent = intent.unwrap();
        assert_eq!(intent.kind, IntentKind::BalancingOpportunistic);
        assert!(!intent.locked);
        assert_eq!(intent.holding_mode(), Mode::HomeIii);
        assert_eq!(status.state, BalancingPhase::Opportunistic);
        assert!(intent.holding_start >= now);
        assert_eq!(
            intent.holding_end,
            intent.holding_start + TimeDelta::hours(config.balancing_hold_hours),
        );
        assert_eq!(state.active_intent.as_ref(), Some(&intent));
    }

    #[test]
    fn state_document_round_trips() {
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 16, 0, 0).unwrap();
        let state = BalancingState {
            last_balancing_ts: Some(now - TimeDelta::days(3)),
            active_intent: Some(Intent {
                kind: IntentKind::BalancingForced,
                required_soc: config.total_capacity,
                holding_start: now,
                holding_end: now + TimeDelta::hours(3),
                locked: true,
            }),
        };
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("balancing.json");
        crate::store::write_json(&path, &state).unwrap();
        let loaded: BalancingState = crate::store::read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn expensive_nights_leave_the_coordinator_in_standby() {
        let config = test_config();
        let coordinator = BalancingCoordinator { config: &config };
        // 22:00 local is 21:00 UTC in November.
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 21, 0, 0).unwrap();
        let mut state = BalancingState {
            last_balancing_ts: Some(now - TimeDelta::days(6)),
            active_intent: None,
        };
        // Charging 9.2 kWh at 200 Kč/kWh dwarfs the 50 Kč gate.
        let intervals = night_intervals(now, 32, 200.0);
        let (intent, status) = coordinator.evaluate(
            &mut state,
            now,
            Percent(40.0),
            &[],
            &intervals,
            BatteryState { soc: KilowattHours(6.14) },
        );
        assert!(intent.is_none());
        assert!(status.planned_window.is_none());
        assert_eq!(status.state, BalancingPhase::Idle);
        assert_eq!(status.state.to_string(), "standby");
    }
}
