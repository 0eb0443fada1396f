use chrono::{DateTime, TimeDelta, Timelike, Utc};
use clap::Parser;
use tokio::{signal, time::sleep};

use crate::{
    api::{command::CommandSink, command::FileCommandSink, heartbeat},
    balancing::{BalancingCoordinator, BalancingState},
    cli::{CommonArgs, HeartbeatArgs, gather_inputs},
    core::grid::IntervalGrid,
    error::PlannerError,
    manager::{PlanManager, PlanningContext},
    plan::Intent,
    prelude::*,
    store,
    store::StateDir,
    weather::WeatherMonitor,
};

#[derive(Parser)]
pub struct RunArgs {
    /// Fixed tick interval instead of the quarter-hour alignment (useful
    /// when replaying recorded inputs).
    #[clap(long, env = "SYSEL_TICK_INTERVAL")]
    pub tick_interval: Option<humantime::Duration>,

    #[clap(flatten)]
    pub common: CommonArgs,

    #[clap(flatten)]
    pub heartbeat: HeartbeatArgs,
}

/// Long-lived loop state that survives between ticks.
struct Service {
    state_dir: StateDir,
    manager: PlanManager,
    balancing_state: BalancingState,
    sink: FileCommandSink,
    last_price_fingerprint: Option<u64>,
    last_balancing_hour: Option<DateTime<Utc>>,
    /// The last configuration that validated; kept when a reload fails.
    settings: crate::config::Settings,
}

impl RunArgs {
    #[instrument(skip_all)]
    pub async fn run(self) -> Result {
        let state_dir = self.common.state()?;
        let mut service = Service {
            manager: PlanManager::open(state_dir.plans())?,
            balancing_state: store::read_json(&state_dir.balancing_path())?.unwrap_or_default(),
            sink: FileCommandSink::new(state_dir.mode_command_path()),
            last_price_fingerprint: None,
            last_balancing_hour: None,
            settings: self.common.settings()?,
            state_dir,
        };
        let heartbeat = heartbeat::Client::new(self.heartbeat.heartbeat_url.clone());
        let mut source = self.common.source();

        loop {
            let now = Utc::now();
            match service.tick(&self.common, &mut source, now) {
                Ok(()) => heartbeat.send().await,
                Err(error) => match error.downcast_ref::<PlannerError>() {
                    Some(PlannerError::InputUnavailable(_)) => {
                        warn!("retaining the previous plan: {error:#}");
                        service.manager.ensure_fallback(now)?;
                    }
                    Some(PlannerError::ConfigInvalid(_)) => {
                        warn!("rejected a configuration change: {error:#}");
                    }
                    Some(PlannerError::ProgrammerError(_)) => {
                        error!("tick aborted, keeping the last good state: {error:#}");
                    }
                    Some(PlannerError::InfeasibleTarget(_)) | None => {
                        warn!("tick failed: {error:#}");
                    }
                },
            }

            let wait = match self.tick_interval {
                Some(interval) => interval.into(),
                None => {
                    let wake_at = IntervalGrid::align_up(now + TimeDelta::seconds(1))
                        + TimeDelta::seconds(5);
                    (wake_at - Utc::now())
                        .to_std()
                        .unwrap_or(std::time::Duration::from_secs(1))
                }
            };
            tokio::select! {
                () = sleep(wait) => {}
                result = signal::ctrl_c() => {
                    result?;
                    info!("shutting down");
                    return Ok(());
                }
            }
        }
    }
}

impl Service {
    /// One tick: refresh forecasts, evaluate intents, decide, persist,
    /// command. Ordering is fixed; see the individual steps.
    #[instrument(skip_all, fields(now = %now))]
    fn tick(
        &mut self,
        common: &CommonArgs,
        source: &mut crate::api::source::FileSource,
        now: DateTime<Utc>,
    ) -> Result {
        // (1) Forecast refresh. A failed settings reload keeps the previous
        // settings instead of partially applying anything.
        match common.settings() {
            Ok(settings) => self.settings = settings,
            Err(error) => warn!("keeping the previous settings: {error:#}"),
        }
        let inputs = gather_inputs(source, &self.settings, now)?;
        let prices_changed = self
            .last_price_fingerprint
            .is_some_and(|fingerprint| fingerprint != inputs.price_fingerprint);
        self.last_price_fingerprint = Some(inputs.price_fingerprint);

        // (2) Intent evaluation: weather preempts balancing, and the
        // balancing coordinator runs on its hourly cadence.
        let weather_intent = WeatherMonitor { config: &inputs.config }
            .evaluate(inputs.snapshot.weather.as_ref(), now);
        let balancing_intent = if weather_intent.is_some() {
            None
        } else {
            self.evaluate_balancing(&inputs, now)
        };
        let intent = weather_intent.or(balancing_intent);

        // (3) + (4) Plan manager decision, recomputing when needed.
        let context = PlanningContext {
            now,
            intervals: &inputs.intervals,
            initial_state: inputs.initial_state,
            config: &inputs.config,
            intent,
            prices_changed,
        };
        let outcome = self.manager.tick(&context)?;
        debug!(?outcome, "tick decided");

        // (5) Persistence, then the mode command.
        store::write_json(&self.state_dir.balancing_path(), &self.balancing_state)?;
        self.state_dir.plans().prune(now)?;
        let commanded = self.manager.commanded_mode(now);
        self.sink.command_mode(commanded, now)?;
        if let Some(raw) = &inputs.snapshot.telemetry.current_mode
            && let Ok(reported) = crate::core::mode::Mode::from_device_str(raw)
            && reported != commanded
        {
            debug!(%reported, %commanded, "the inverter has not switched yet");
        }
        Ok(())
    }

    /// The balancing coordinator runs once per hour; in between, the stored
    /// intent (if any) is reused as is.
    fn evaluate_balancing(
        &mut self,
        inputs: &crate::cli::GatheredInputs,
        now: DateTime<Utc>,
    ) -> Option<Intent> {
        let due = self
            .last_balancing_hour
            .is_none_or(|last| now.date_naive() != last.date_naive() || now.hour() != last.hour());
        if !due {
            return self.balancing_state.active_intent.clone();
        }
        self.last_balancing_hour = Some(now);
        let (intent, status) = BalancingCoordinator { config: &inputs.config }.evaluate(
            &mut self.balancing_state,
            now,
            inputs.snapshot.telemetry.soc_percent,
            &inputs.snapshot.soc_history,
            &inputs.intervals,
            inputs.initial_state,
        );
        debug!(state = %status.state, "balancing evaluated");
        intent
    }
}
