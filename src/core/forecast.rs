use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::{
    api::{
        forecast::{LoadForecast, LoadProfile, PvForecast},
        prices::PriceSeries,
    },
    core::{grid::IntervalGrid, interval::Interval},
    error::PlannerError,
    prelude::*,
    quantity::energy::KilowattHours,
};

/// Everything the aggregator fuses onto the interval grid.
pub struct ForecastInputs<'a> {
    pub prices: &'a PriceSeries,
    pub pv: &'a PvForecast,
    pub load: &'a LoadForecast,
    pub profile: &'a LoadProfile,
}

/// Fuses the external series into fully populated intervals.
///
/// Prices are non-negotiable: a hole in the price series fails the whole
/// assembly rather than inventing numbers.
pub struct ForecastAggregator<'a> {
    pub inputs: ForecastInputs<'a>,
    pub timezone: Tz,
}

impl ForecastAggregator<'_> {
    #[instrument(skip_all, fields(n_intervals = grid.len()))]
    pub fn assemble(&self, grid: &IntervalGrid) -> Result<Vec<Interval>> {
        self.inputs.profile.validate()?;
        let mut intervals = Vec::with_capacity(grid.len());
        for start in grid.iter() {
            let price = self.inputs.prices.lookup(start).ok_or_else(|| {
                PlannerError::InputUnavailable(format!("no price for the interval at {start}"))
            })?;
            intervals.push(Interval {
                start,
                pv: self.pv_for(start),
                load: self.load_for(start),
                import_price: price.import_price,
                export_price: price.export_price,
            });
        }
        Ok(intervals)
    }

    /// Hourly PV forecast apportioned to quarter-hours.
    fn pv_for(&self, start: DateTime<Utc>) -> KilowattHours {
        let hour_start = hour_floor(start);
        self.inputs
            .pv
            .lookup_hour(hour_start)
            .map_or(KilowattHours(0.0), |hourly| hourly / 4.0)
    }

    fn load_for(&self, start: DateTime<Utc>) -> KilowattHours {
        if let Some(load) = self.inputs.load.lookup(start) {
            return load;
        }
        let local = start.with_timezone(&self.timezone);
        let weekend = matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
        let slot = (local.hour() * 4 + local.minute() / 15) as usize;
        self.inputs.profile.lookup(weekend, slot).unwrap_or_else(|| {
            warn!(%start, "no load forecast and no historical average, assuming zero");
            KilowattHours(0.0)
        })
    }
}

fn hour_floor(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = timestamp.timestamp();
    DateTime::from_timestamp(seconds - seconds.rem_euclid(3600), 0)
        .expect("the truncated timestamp should be valid")
}
