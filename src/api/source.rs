use std::path::PathBuf;

use crate::{
    api::{
        forecast::{LoadForecast, LoadProfile, PvForecast},
        prices::PriceSeries,
        telemetry::{BatteryTelemetry, SocSample},
        weather::WeatherWarning,
    },
    error::PlannerError,
    prelude::*,
    store,
};

/// One consistent read of every external input contract.
#[must_use]
pub struct InputSnapshot {
    pub telemetry: BatteryTelemetry,
    pub prices: PriceSeries,
    pub pv: PvForecast,
    pub load: LoadForecast,
    pub profile: LoadProfile,
    pub weather: Option<WeatherWarning>,
    pub soc_history: Vec<SocSample>,
}

/// Where the planner reads its inputs from. The production deployment
/// points this at the documents maintained by the cloud and price pollers;
/// tests point it at fixtures.
pub trait InputSource {
    fn snapshot(&mut self) -> Result<InputSnapshot>;
}

/// Reads the input documents from a directory. Telemetry and prices are
/// mandatory; everything else degrades gracefully.
#[derive(Clone, Debug)]
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn required<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        store::read_json(&self.dir.join(name))?.ok_or_else(|| {
            PlannerError::InputUnavailable(format!(
                "`{name}` is missing from `{}`",
                self.dir.display(),
            ))
            .into()
        })
    }

    fn optional<T: serde::de::DeserializeOwned + Default>(&self, name: &str) -> T {
        store::read_json(&self.dir.join(name))
            .inspect_err(|error| warn!(name, "ignoring an unreadable input: {error:#}"))
            .unwrap_or(None)
            .unwrap_or_default()
    }
}

impl InputSource for FileSource {
    #[instrument(skip_all)]
    fn snapshot(&mut self) -> Result<InputSnapshot> {
        Ok(InputSnapshot {
            telemetry: self.required("telemetry.json")?,
            prices: self.required("prices.json")?,
            pv: self.optional("pv_forecast.json"),
            load: self.optional("load_forecast.json"),
            profile: self.optional("load_profile.json"),
            weather: store::read_json(&self.dir.join("weather.json"))
                .inspect_err(|error| warn!("ignoring an unreadable warning: {error:#}"))
                .unwrap_or(None),
            soc_history: self.optional("soc_history.json"),
        })
    }
}
