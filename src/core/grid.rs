use chrono::{DateTime, TimeDelta, Utc};

use crate::{core::interval::Interval, error::PlannerError, prelude::*};

/// Canonical sequence of 15-minute aligned interval start timestamps.
///
/// Downstream components index intervals both by position and by timestamp;
/// this is the single source of both mappings.
#[derive(Clone, Debug)]
#[must_use]
pub struct IntervalGrid {
    starts: Vec<DateTime<Utc>>,
}

impl IntervalGrid {
    /// Planning never looks further ahead than this, regardless of how much
    /// price data is available.
    pub const MAX_HORIZON: TimeDelta = TimeDelta::hours(48);

    /// Round the timestamp up to the next quarter-hour boundary.
    pub fn align_up(timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let seconds = timestamp.timestamp();
        let quarter = Interval::LENGTH.num_seconds();
        let remainder = seconds.rem_euclid(quarter);
        let aligned = if remainder == 0 && timestamp.timestamp_subsec_nanos() == 0 {
            seconds
        } else {
            seconds - remainder + quarter
        };
        DateTime::from_timestamp(aligned, 0).expect("the aligned timestamp should be valid")
    }

    /// Build the grid from the next boundary at or after `now` up to the
    /// lesser of the price horizon and [`Self::MAX_HORIZON`].
    pub fn build(now: DateTime<Utc>, price_horizon_end: DateTime<Utc>) -> Result<Self> {
        let first = Self::align_up(now);
        let end = price_horizon_end.min(now + Self::MAX_HORIZON);
        if first >= end {
            return Err(PlannerError::InputUnavailable(format!(
                "the price horizon ends at {end} which leaves no interval to plan"
            ))
            .into());
        }
        let mut starts = Vec::new();
        let mut start = first;
        while start + Interval::LENGTH <= end {
            starts.push(start);
            start += Interval::LENGTH;
        }
        ensure!(!starts.is_empty(), "the horizon is shorter than one interval");
        Ok(Self { starts })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    #[must_use]
    pub fn timestamp(&self, position: usize) -> Option<DateTime<Utc>> {
        self.starts.get(position).copied()
    }

    #[must_use]
    pub fn position(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        self.starts.binary_search(&timestamp).ok()
    }

    /// End of the last interval on the grid.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        *self.starts.last().expect("the grid is never empty") + Interval::LENGTH
    }

    pub fn iter(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.starts.iter().copied()
    }
}
