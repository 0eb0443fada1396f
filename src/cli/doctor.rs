use chrono::Utc;
use clap::Parser;

use crate::{
    api::source::InputSource,
    cli::CommonArgs,
    config::PlannerConfig,
    core::{
        forecast::{ForecastAggregator, ForecastInputs},
        grid::IntervalGrid,
    },
    prelude::*,
};

/// Check the input documents and the configuration without planning
/// anything. Meant for first-time setup and broken-poller triage.
#[derive(Parser)]
pub struct DoctorArgs {
    #[clap(flatten)]
    pub common: CommonArgs,
}

impl DoctorArgs {
    #[instrument(skip_all)]
    pub fn run(self) -> Result {
        let now = Utc::now();
        let settings = self.common.settings()?;
        info!(path = %self.common.settings.display(), "settings parsed");

        let snapshot = match self.common.source().snapshot() {
            Ok(snapshot) => snapshot,
            Err(error) => {
                error!("inputs are unusable: {error:#}");
                return Err(error);
            }
        };
        info!(
            capacity = ?snapshot.telemetry.total_capacity_kwh,
            soc = ?snapshot.telemetry.soc_percent,
            "telemetry readable",
        );
        match snapshot.prices.horizon_end() {
            Some(end) => {
                info!(
                    points = snapshot.prices.points.len(),
                    until = %end,
                    "price series readable",
                );
            }
            None => warn!("the price series is empty, planning will refuse"),
        }
        info!(points = snapshot.pv.points.len(), "PV forecast");
        info!(points = snapshot.load.points.len(), "load forecast");
        let profiled = snapshot.profile.weekday.iter().flatten().count()
            + snapshot.profile.weekend.iter().flatten().count();
        info!(slots = profiled, "load profile coverage");
        match &snapshot.weather {
            Some(warning) => info!(
                severity = %warning.severity,
                active = warning.active,
                "weather warning present",
            ),
            None => info!("no weather warning"),
        }
        info!(samples = snapshot.soc_history.len(), "SoC history");

        let config = PlannerConfig::resolve(&settings, &snapshot.telemetry)?;
        config.log_snapshot();

        if let Some(end) = snapshot.prices.horizon_end() {
            let grid = IntervalGrid::build(now, end)?;
            let aggregator = ForecastAggregator {
                inputs: ForecastInputs {
                    prices: &snapshot.prices,
                    pv: &snapshot.pv,
                    load: &snapshot.load,
                    profile: &snapshot.profile,
                },
                timezone: config.timezone,
            };
            let intervals = aggregator.assemble(&grid)?;
            info!(n_intervals = intervals.len(), until = %grid.end(), "horizon assembles cleanly");
        }
        info!("all checks passed");
        Ok(())
    }
}
