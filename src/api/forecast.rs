use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{prelude::*, quantity::energy::KilowattHours};

/// Hourly photovoltaic production forecast.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct PvPoint {
    /// Start of the full hour the energy applies to.
    pub start: DateTime<Utc>,
    pub energy_kwh: KilowattHours,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[must_use]
pub struct PvForecast {
    pub points: Vec<PvPoint>,
}

impl PvForecast {
    #[must_use]
    pub fn lookup_hour(&self, hour_start: DateTime<Utc>) -> Option<KilowattHours> {
        self.points.iter().find(|point| point.start == hour_start).map(|point| point.energy_kwh)
    }
}

/// Quarter-hour household load forecast.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct LoadPoint {
    pub start: DateTime<Utc>,
    pub energy_kwh: KilowattHours,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[must_use]
pub struct LoadForecast {
    pub points: Vec<LoadPoint>,
}

impl LoadForecast {
    #[must_use]
    pub fn lookup(&self, start: DateTime<Utc>) -> Option<KilowattHours> {
        self.points.iter().find(|point| point.start == start).map(|point| point.energy_kwh)
    }
}

/// Historical load averages per weekday class and quarter-hour of day,
/// the fallback when the forecast has holes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct LoadProfile {
    /// 96 quarter-hour slots, Monday through Friday.
    pub weekday: Vec<Option<KilowattHours>>,
    /// 96 quarter-hour slots, Saturday and Sunday.
    pub weekend: Vec<Option<KilowattHours>>,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self { weekday: vec![None; Self::SLOTS], weekend: vec![None; Self::SLOTS] }
    }
}

impl LoadProfile {
    pub const SLOTS: usize = 96;

    pub fn validate(&self) -> Result {
        ensure!(
            self.weekday.len() == Self::SLOTS && self.weekend.len() == Self::SLOTS,
            "a load profile must carry exactly {} slots per weekday class",
            Self::SLOTS,
        );
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, is_weekend: bool, slot: usize) -> Option<KilowattHours> {
        let class = if is_weekend { &self.weekend } else { &self.weekday };
        class.get(slot).copied().flatten()
    }
}
