use std::path::Path;

use chrono_tz::Tz;
use enumset::EnumSet;
use serde::{Deserialize, Serialize};

use crate::{
    api::{telemetry::BatteryTelemetry, weather::Severity},
    core::mode::Mode,
    error::PlannerError,
    fmt::FormattedProportion,
    prelude::*,
    quantity::{
        energy::KilowattHours,
        power::Kilowatts,
        proportions::Percent,
        rate::KorunaPerKilowattHour,
    },
};

/// User-editable planner settings, loaded from the TOML file.
///
/// Hardware-derived values (capacity, BMS floor, export limit) come from the
/// telemetry contract and are merged in by [`PlannerConfig::resolve`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub user_min_percent: Percent,
    pub target_percent: Percent,
    pub ac_charge_kw: Kilowatts,
    pub discharge_efficiency: f64,
    pub charge_efficiency_dcdc: f64,
    pub charge_efficiency_acdc: f64,
    pub export_limit_kw: Kilowatts,
    pub boiler_enabled: bool,
    pub boiler_power_kw: Kilowatts,
    pub threshold_cheap: KorunaPerKilowattHour,
    pub safety_margin_kwh: KilowattHours,
    pub balancing_interval_days: i64,
    pub balancing_hold_hours: i64,
    pub weather_emergency_levels: Vec<Severity>,
    pub allowed_modes: Vec<Mode>,
    pub timezone: Tz,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_min_percent: Percent(33.0),
            target_percent: Percent(80.0),
            ac_charge_kw: Kilowatts(2.8),
            discharge_efficiency: 0.882,
            charge_efficiency_dcdc: 0.95,
            charge_efficiency_acdc: 0.95,
            export_limit_kw: Kilowatts(10.0),
            boiler_enabled: false,
            boiler_power_kw: Kilowatts(0.0),
            threshold_cheap: KorunaPerKilowattHour(1.5),
            safety_margin_kwh: KilowattHours(2.0),
            balancing_interval_days: 7,
            balancing_hold_hours: 3,
            weather_emergency_levels: vec![Severity::Orange, Severity::Red],
            allowed_modes: Mode::ALL.to_vec(),
            timezone: chrono_tz::Europe::Prague,
        }
    }
}

impl Settings {
    /// Load the settings file, falling back to the defaults when it does not
    /// exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read the settings from `{}`", path.display()))?;
        toml::from_str(&contents)
            .map_err(|error| {
                PlannerError::ConfigInvalid(format!(
                    "failed to parse `{}`: {error}",
                    path.display()
                ))
                .into()
            })
    }
}

/// Fully resolved planner configuration: settings merged with the hardware
/// telemetry. This is what every core component receives.
#[derive(Clone, Debug)]
#[must_use]
pub struct PlannerConfig {
    pub total_capacity: KilowattHours,
    pub hw_min_percent: Percent,
    pub user_min_percent: Percent,
    pub target_percent: Percent,
    pub ac_charge_power: Kilowatts,
    pub discharge_efficiency: f64,
    pub charge_efficiency_dcdc: f64,
    pub charge_efficiency_acdc: f64,
    pub export_limit: Kilowatts,
    pub boiler_enabled: bool,
    pub boiler_power: Kilowatts,
    pub threshold_cheap: KorunaPerKilowattHour,
    pub safety_margin: KilowattHours,
    pub balancing_interval_days: i64,
    pub balancing_hold_hours: i64,
    pub weather_emergency_levels: Vec<Severity>,
    pub allowed_modes: Vec<Mode>,
    pub timezone: Tz,
}

impl PlannerConfig {
    /// Merge the settings with the telemetry snapshot and validate the result
    /// as a whole. An invalid combination is rejected without side effects.
    pub fn resolve(settings: &Settings, telemetry: &BatteryTelemetry) -> Result<Self> {
        let config = Self {
            total_capacity: telemetry.total_capacity_kwh,
            hw_min_percent: telemetry.hw_min_percent,
            user_min_percent: settings.user_min_percent,
            target_percent: settings.target_percent,
            ac_charge_power: settings.ac_charge_kw,
            discharge_efficiency: telemetry
                .discharge_efficiency
                .unwrap_or(settings.discharge_efficiency),
            charge_efficiency_dcdc: settings.charge_efficiency_dcdc,
            charge_efficiency_acdc: settings.charge_efficiency_acdc,
            export_limit: telemetry.export_limit_kw.unwrap_or(settings.export_limit_kw),
            boiler_enabled: settings.boiler_enabled,
            boiler_power: telemetry.boiler_power_kw.unwrap_or(settings.boiler_power_kw),
            threshold_cheap: settings.threshold_cheap,
            safety_margin: settings.safety_margin_kwh,
            balancing_interval_days: settings.balancing_interval_days,
            balancing_hold_hours: settings.balancing_hold_hours,
            weather_emergency_levels: settings.weather_emergency_levels.clone(),
            allowed_modes: settings.allowed_modes.clone(),
            timezone: settings.timezone,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result {
        let invalid = |message: String| Err(PlannerError::ConfigInvalid(message).into());
        if self.total_capacity <= KilowattHours(0.0) {
            return invalid(format!("non-positive battery capacity: {}", self.total_capacity));
        }
        if self.hw_min_percent < Percent(0.0) || self.hw_min_percent > Percent::HUNDRED {
            return invalid(format!("hardware floor out of range: {}", self.hw_min_percent));
        }
        if self.user_min_percent < self.hw_min_percent {
            return invalid(format!(
                "user floor {} is below the hardware floor {}",
                self.user_min_percent, self.hw_min_percent,
            ));
        }
        if self.target_percent < self.user_min_percent || self.target_percent > Percent::HUNDRED {
            return invalid(format!(
                "target {} must lie between the user floor {} and 100%",
                self.target_percent, self.user_min_percent,
            ));
        }
        for (name, efficiency) in [
            ("discharge", self.discharge_efficiency),
            ("DC-DC charge", self.charge_efficiency_dcdc),
            ("AC-DC charge", self.charge_efficiency_acdc),
        ] {
            if !(efficiency > 0.0 && efficiency <= 1.0) {
                return invalid(format!("{name} efficiency out of (0, 1]: {efficiency}"));
            }
        }
        if self.ac_charge_power <= Kilowatts(0.0) {
            return invalid(format!("non-positive AC charge power: {}", self.ac_charge_power));
        }
        if self.export_limit < Kilowatts(0.0) {
            return invalid(format!("negative export limit: {}", self.export_limit));
        }
        if self.boiler_power < Kilowatts(0.0) {
            return invalid(format!("negative boiler power: {}", self.boiler_power));
        }
        if self.balancing_interval_days < 1 {
            return invalid(format!(
                "balancing interval must be at least one day: {}",
                self.balancing_interval_days,
            ));
        }
        if !(1..=24).contains(&self.balancing_hold_hours) {
            return invalid(format!(
                "balancing hold must be between 1 and 24 hours: {}",
                self.balancing_hold_hours,
            ));
        }
        if self.allowed_modes.is_empty() || !self.allowed_modes.contains(&Mode::HomeI) {
            return invalid("the allowed mode set must contain HOME I".to_string());
        }
        Ok(())
    }

    pub fn hw_min_energy(&self) -> KilowattHours {
        self.total_capacity * self.hw_min_percent
    }

    pub fn user_min_energy(&self) -> KilowattHours {
        self.total_capacity * self.user_min_percent
    }

    pub fn target_energy(&self) -> KilowattHours {
        self.total_capacity * self.target_percent
    }

    /// Maximum AC energy the grid may push into the battery per interval.
    pub fn ac_charge_per_interval(&self) -> KilowattHours {
        self.ac_charge_power * crate::core::interval::Interval::LENGTH
    }

    pub fn export_cap_per_interval(&self) -> KilowattHours {
        self.export_limit * crate::core::interval::Interval::LENGTH
    }

    pub fn boiler_cap_per_interval(&self) -> KilowattHours {
        self.boiler_power * crate::core::interval::Interval::LENGTH
    }

    pub fn allowed_modes(&self) -> EnumSet<Mode> {
        self.allowed_modes.iter().copied().collect()
    }

    pub fn log_snapshot(&self) {
        info!(
            capacity = ?self.total_capacity,
            hw_min = ?self.hw_min_percent,
            user_min = ?self.user_min_percent,
            target = ?self.target_percent,
            ac_charge = ?self.ac_charge_power,
            discharge_efficiency = ?FormattedProportion(self.discharge_efficiency),
            export_limit = ?self.export_limit,
            boiler = self.boiler_enabled,
            "effective configuration",
        );
    }
}
