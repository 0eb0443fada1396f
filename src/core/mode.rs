use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Operating mode of the Battery Box hybrid inverter.
#[derive(Debug, Hash, clap::ValueEnum, enumset::EnumSetType, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Solar covers the load first, the battery absorbs the surplus and
    /// backs up the deficit.
    HomeI,

    /// Solar covers the load, the surplus charges the battery, but the
    /// deficit is bought from the grid. The battery is preserved.
    HomeII,

    /// All solar goes into the battery, the load runs on the grid.
    HomeIii,

    /// Grid charging: the battery charges from the grid (and solar) while
    /// the load runs on the grid.
    HomeUps,
}

impl Mode {
    pub const ALL: [Self; 4] = [Self::HomeI, Self::HomeII, Self::HomeIii, Self::HomeUps];

    /// Parse the mode string reported by the cloud telemetry.
    pub fn from_device_str(string: &str) -> Result<Self> {
        match string.trim().to_ascii_uppercase().replace(' ', "_").as_str() {
            "HOME_1" | "HOME_I" | "HOME1" => Ok(Self::HomeI),
            "HOME_2" | "HOME_II" | "HOME2" => Ok(Self::HomeII),
            "HOME_3" | "HOME_III" | "HOME3" => Ok(Self::HomeIii),
            "HOME_UPS" | "UPS" => Ok(Self::HomeUps),
            _ => bail!("unknown inverter mode: `{string}`"),
        }
    }

    /// Mode name as the device client expects it.
    pub const fn device_name(self) -> &'static str {
        match self {
            Self::HomeI => "Home 1",
            Self::HomeII => "Home 2",
            Self::HomeIii => "Home 3",
            Self::HomeUps => "Home UPS",
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::HomeI => "HOME I",
            Self::HomeII => "HOME II",
            Self::HomeIii => "HOME III",
            Self::HomeUps => "HOME UPS",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_strings() {
        assert_eq!(Mode::from_device_str("Home 1").unwrap(), Mode::HomeI);
        assert_eq!(Mode::from_device_str("HOME UPS").unwrap(), Mode::HomeUps);
        assert_eq!(Mode::from_device_str("Home 3").unwrap(), Mode::HomeIii);
        assert!(Mode::from_device_str("Home 4").is_err());
    }
}
