use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Warning severity of the ČHMÚ feed.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Yellow,
    Orange,
    Red,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Yellow => "yellow",
            Self::Orange => "orange",
            Self::Red => "red",
        })
    }
}

/// Active or upcoming severe-weather warning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[must_use]
pub struct WeatherWarning {
    pub severity: Severity,
    pub phenomenon: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub active: bool,
}
