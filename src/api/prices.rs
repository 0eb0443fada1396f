use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{core::interval::Interval, quantity::rate::KorunaPerKilowattHour};

/// One quarter-hour of the spot price document published by the price
/// fetcher. Import and export are quoted separately because the export side
/// carries different fees and may go negative.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct PricePoint {
    pub start: DateTime<Utc>,
    pub import_price: KorunaPerKilowattHour,
    pub export_price: KorunaPerKilowattHour,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[must_use]
pub struct PriceSeries {
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    /// End of the covered horizon, if any prices are present at all.
    #[must_use]
    pub fn horizon_end(&self) -> Option<DateTime<Utc>> {
        self.points.iter().map(|point| point.start + Interval::LENGTH).max()
    }

    #[must_use]
    pub fn lookup(&self, start: DateTime<Utc>) -> Option<PricePoint> {
        self.points.iter().find(|point| point.start == start).copied()
    }

    /// Fingerprint used to detect a price refresh between ticks.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::hash::DefaultHasher::new();
        for point in &self.points {
            point.start.timestamp().hash(&mut hasher);
            point.import_price.0.to_bits().hash(&mut hasher);
            point.export_price.0.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }
}
