use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quantity::{energy::KilowattHours, power::Kilowatts, proportions::Percent};

/// Battery and inverter state as reported by the cloud client each tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct BatteryTelemetry {
    pub total_capacity_kwh: KilowattHours,
    pub soc_percent: Percent,
    pub hw_min_percent: Percent,
    #[serde(default)]
    pub discharge_efficiency: Option<f64>,
    #[serde(default)]
    pub current_mode: Option<String>,
    #[serde(default)]
    pub boiler_in_use: bool,
    #[serde(default)]
    pub boiler_power_kw: Option<Kilowatts>,
    #[serde(default)]
    pub export_limit_kw: Option<Kilowatts>,
}

impl BatteryTelemetry {
    pub fn soc_energy(&self) -> KilowattHours {
        self.total_capacity_kwh * self.soc_percent
    }
}

/// One observed state-of-charge sample, used for natural-balancing detection.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct SocSample {
    pub timestamp: DateTime<Utc>,
    pub soc_percent: Percent,
}
