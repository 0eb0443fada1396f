use std::cmp::Ordering;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::quantity::{energy::KilowattHours, rate::KorunaPerKilowattHour};

/// One quarter-hour of exogenous planning input.
///
/// Identity and ordering are defined by the start timestamp alone.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub pv: KilowattHours,
    pub load: KilowattHours,
    pub import_price: KorunaPerKilowattHour,
    pub export_price: KorunaPerKilowattHour,
}

impl Interval {
    pub const LENGTH: TimeDelta = TimeDelta::minutes(15);

    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Self::LENGTH
    }

    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        (self.start <= timestamp) && (timestamp < self.end())
    }

    /// Whether this interval overlaps the closed window.
    #[must_use]
    pub fn intersects(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> bool {
        (self.start <= window_end) && (self.end() > window_start)
    }
}

impl PartialEq for Interval {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
    }
}

impl Eq for Interval {}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Interval {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start.cmp(&other.start)
    }
}
