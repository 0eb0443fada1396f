use chrono::{DateTime, Utc};

use crate::{
    api::weather::WeatherWarning,
    config::PlannerConfig,
    core::interval::Interval,
    plan::{Intent, IntentKind},
    prelude::*,
};

/// Turns severe-weather warnings into emergency intents: charge to 100% and
/// hold on grid backup for the duration of the warning.
pub struct WeatherMonitor<'a> {
    pub config: &'a PlannerConfig,
}

impl WeatherMonitor<'_> {
    /// Evaluate the current warning, if any.
    ///
    /// The holding end tracks the live warning: while the warning stays
    /// active past its forecast end, the window is rolled forward one
    /// interval at a time.
    #[instrument(skip_all)]
    pub fn evaluate(
        &self,
        warning: Option<&WeatherWarning>,
        now: DateTime<Utc>,
    ) -> Option<Intent> {
        let warning = warning?;
        if !self.config.weather_emergency_levels.contains(&warning.severity) {
            return None;
        }
        if !warning.active {
            return None;
        }
        let holding_end = warning.end.max(now + Interval::LENGTH);
        info!(
            severity = %warning.severity,
            phenomenon = warning.phenomenon,
            start = %warning.start,
            end = %holding_end,
            "weather emergency in effect",
        );
        Some(Intent {
            kind: IntentKind::Emergency,
            required_soc: self.config.total_capacity,
            holding_start: warning.start,
            holding_end,
            locked: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::{api::weather::Severity, core::simulator::tests::test_config};

    fn warning(severity: Severity, now: DateTime<Utc>) -> WeatherWarning {
        WeatherWarning {
            severity,
            phenomenon: "severe thunderstorms".to_string(),
            start: now + TimeDelta::hours(2),
            end: now + TimeDelta::hours(8),
            active: true,
        }
    }

    #[test]
    fn red_warning_emits_a_locked_emergency() {
        let config = test_config();
        let monitor = WeatherMonitor { config: &config };
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap();
        let warning = warning(Severity::Red, now);
        let intent = monitor.evaluate(Some(&warning), now).unwrap();
        assert_eq!(intent.kind, IntentKind::Emergency);
        assert!(intent.locked);
        assert_eq!(intent.required_soc, config.total_capacity);
        assert_eq!(intent.holding_start, warning.start);
        assert_eq!(intent.holding_end, warning.end);
    }

    #[test]
    fn yellow_warning_is_ignored_by_default() {
        let config = test_config();
        let monitor = WeatherMonitor { config: &config };
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap();
        assert!(monitor.evaluate(Some(&warning(Severity::Yellow, now)), now).is_none());
    }

    #[test]
    fn cleared_feed_and_none_severity_emit_nothing() {
        let config = test_config();
        let monitor = WeatherMonitor { config: &config };
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap();
        assert!(monitor.evaluate(None, now).is_none());
        let mut none_warning = warning(Severity::Red, now);
        none_warning.severity = Severity::None;
        assert!(monitor.evaluate(Some(&none_warning), now).is_none());
    }

    #[test]
    fn holding_rolls_forward_while_the_warning_outlives_its_forecast() {
        let config = test_config();
        let monitor = WeatherMonitor { config: &config };
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap();
        let mut warning = warning(Severity::Red, now);
        let past_end = warning.end + TimeDelta::hours(1);
        let intent = monitor.evaluate(Some(&warning), past_end).unwrap();
        assert_eq!(intent.holding_end, past_end + Interval::LENGTH);

        warning.active = false;
        assert!(monitor.evaluate(Some(&warning), past_end).is_none());
    }
}
