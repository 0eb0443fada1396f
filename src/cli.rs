pub mod admin;
pub mod doctor;
pub mod plan;
pub mod run;
pub mod simulate;
pub mod status;

use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use reqwest::Url;

use crate::{
    api::source::{FileSource, InputSnapshot, InputSource},
    config::{PlannerConfig, Settings},
    core::{
        forecast::{ForecastAggregator, ForecastInputs},
        grid::IntervalGrid,
        interval::Interval,
        optimizer::ModeHint,
        simulator::BatteryState,
    },
    error::PlannerError,
    prelude::*,
    quantity::proportions::Percent,
    store::StateDir,
};

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
#[must_use]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compute a plan from the current inputs and activate it.
    Plan(Box<plan::PlanArgs>),

    /// Resident service: 15-minute planning ticks plus hourly balancing.
    Run(Box<run::RunArgs>),

    /// What-if plan under a named scenario; never activated automatically.
    Simulate(Box<simulate::SimulateArgs>),

    /// Propose a manual target plan (pending until applied).
    Propose(Box<simulate::ProposeArgs>),

    /// Activate a pending plan by id.
    Apply(admin::ApplyArgs),

    /// Replace the active plan with a fresh automatic one.
    Revert(admin::RevertArgs),

    /// Drop a pending plan by id.
    Cancel(admin::CancelArgs),

    /// Show the active plan, pending plans and the balancing status.
    Status(status::StatusArgs),

    /// Verify the input documents and configuration without planning.
    Doctor(doctor::DoctorArgs),
}

impl Command {
    pub async fn run(self) -> Result {
        match self {
            Self::Plan(args) => args.run().await,
            Self::Run(args) => args.run().await,
            Self::Simulate(args) => args.run(),
            Self::Propose(args) => args.run(),
            Self::Apply(args) => args.run(),
            Self::Revert(args) => args.run(),
            Self::Cancel(args) => args.run(),
            Self::Status(args) => args.run(),
            Self::Doctor(args) => args.run(),
        }
    }
}

/// Directories shared by every command.
#[derive(Parser)]
pub struct CommonArgs {
    /// Directory with the input documents maintained by the external pollers.
    #[clap(long, env = "SYSEL_INPUTS_DIR", default_value = "inputs")]
    pub inputs_dir: PathBuf,

    /// Directory for persisted plans and coordinator state.
    #[clap(long, env = "SYSEL_STATE_DIR", default_value = "state")]
    pub state_dir: PathBuf,

    /// Planner settings file (TOML); missing file means defaults.
    #[clap(long, env = "SYSEL_SETTINGS", default_value = "sysel.toml")]
    pub settings: PathBuf,
}

impl CommonArgs {
    pub fn state(&self) -> Result<StateDir> {
        StateDir::open(&self.state_dir)
    }

    pub fn source(&self) -> FileSource {
        FileSource::new(self.inputs_dir.clone())
    }

    pub fn settings(&self) -> Result<Settings> {
        Settings::load(&self.settings)
    }
}

#[derive(Parser)]
pub struct HeartbeatArgs {
    /// Liveness URL pinged after every successful tick.
    #[clap(long = "heartbeat-url", env = "SYSEL_HEARTBEAT_URL")]
    pub heartbeat_url: Option<Url>,
}

/// Manual and simulated plans take an enumerated option set, parsed once at
/// this boundary.
#[derive(Parser)]
pub struct TargetArgs {
    /// Requested state of charge in percent.
    #[clap(long = "target-soc", value_parser = parse_target_soc)]
    pub target_soc: Percent,

    /// Hours from now until the target must be reached.
    #[clap(long = "deadline-hours", default_value = "12")]
    pub deadline_hours: f64,

    /// Hours to hold the target after the deadline.
    #[clap(long = "holding-hours", default_value = "0", value_parser = parse_holding_hours)]
    pub holding_hours: i64,

    /// Charging style.
    #[clap(long = "mode-hint", value_enum, default_value_t = ModeHint::Economic)]
    pub mode_hint: ModeHint,
}

fn parse_target_soc(raw: &str) -> Result<Percent, String> {
    let value: f64 = raw.parse().map_err(|error| format!("{error}"))?;
    if (0.0..=100.0).contains(&value) {
        Ok(Percent(value))
    } else {
        Err(format!("the target SoC must lie within 0–100%, got {value}"))
    }
}

fn parse_holding_hours(raw: &str) -> Result<i64, String> {
    let value: i64 = raw.parse().map_err(|error| format!("{error}"))?;
    if (0..=12).contains(&value) {
        Ok(value)
    } else {
        Err(format!("the holding window must lie within 0–12 hours, got {value}"))
    }
}

impl TargetArgs {
    pub fn deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        #[allow(clippy::cast_possible_truncation)]
        let minutes = (self.deadline_hours * 60.0).round() as i64;
        IntervalGrid::align_up(now + TimeDelta::minutes(minutes))
    }

    pub fn holding(&self) -> TimeDelta {
        TimeDelta::hours(self.holding_hours)
    }
}

/// Everything one planning round needs, read and fused in one go.
#[must_use]
pub struct GatheredInputs {
    pub config: PlannerConfig,
    pub intervals: Vec<Interval>,
    pub initial_state: BatteryState,
    pub snapshot: InputSnapshot,
    pub price_fingerprint: u64,
}

/// Read the input documents and fuse them onto the interval grid.
pub fn gather_inputs(
    source: &mut FileSource,
    settings: &Settings,
    now: DateTime<Utc>,
) -> Result<GatheredInputs> {
    let snapshot = source.snapshot()?;
    let config = PlannerConfig::resolve(settings, &snapshot.telemetry)?;
    let horizon_end = snapshot.prices.horizon_end().ok_or_else(|| {
        anyhow::Error::from(PlannerError::InputUnavailable(
            "the price series is empty".to_string(),
        ))
    })?;
    let grid = IntervalGrid::build(now, horizon_end)?;
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
    let initial_state =
        BatteryState { soc: snapshot.telemetry.soc_energy() }.clamped(&config);
    let price_fingerprint = snapshot.prices.fingerprint();
    info!(
        n_intervals = intervals.len(),
        soc = ?initial_state.soc,
        "inputs gathered",
    );
    Ok(GatheredInputs { config, intervals, initial_state, snapshot, price_fingerprint })
}
