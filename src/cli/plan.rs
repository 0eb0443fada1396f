use chrono::Utc;
use clap::Parser;

use crate::{
    api::{command::CommandSink, command::FileCommandSink, heartbeat},
    balancing::{BalancingCoordinator, BalancingState},
    cli::{CommonArgs, HeartbeatArgs, gather_inputs},
    core::{cost, optimizer::ModeHint, simulator::Simulator},
    manager::{PlanManager, PlanningContext},
    plan::{Intent, PlanKind},
    prelude::*,
    store,
    tables::build_timeline_table,
    weather::WeatherMonitor,
};

#[derive(Parser)]
pub struct PlanArgs {
    /// Print the plan without activating it or commanding the inverter.
    #[clap(long)]
    pub scout: bool,

    #[clap(flatten)]
    pub common: CommonArgs,

    #[clap(flatten)]
    pub heartbeat: HeartbeatArgs,
}

impl PlanArgs {
    #[instrument(skip_all)]
    pub async fn run(self) -> Result {
        let now = Utc::now();
        let settings = self.common.settings()?;
        let state_dir = self.common.state()?;
        let mut source = self.common.source();
        let inputs = gather_inputs(&mut source, &settings, now)?;
        inputs.config.log_snapshot();

        let mut balancing_state: BalancingState =
            store::read_json(&state_dir.balancing_path())?.unwrap_or_default();
        let weather_intent = WeatherMonitor { config: &inputs.config }
            .evaluate(inputs.snapshot.weather.as_ref(), now);
        let balancing_intent = if weather_intent.is_some() {
            None
        } else {
            let (intent, _status) = BalancingCoordinator { config: &inputs.config }.evaluate(
                &mut balancing_state,
                now,
                inputs.snapshot.telemetry.soc_percent,
                &inputs.snapshot.soc_history,
                &inputs.intervals,
                inputs.initial_state,
            );
            intent
        };
        let intent = weather_intent.or(balancing_intent);

        let mut manager = PlanManager::open(state_dir.plans())?;
        let context = PlanningContext {
            now,
            intervals: &inputs.intervals,
            initial_state: inputs.initial_state,
            config: &inputs.config,
            intent,
            // Treat the one-shot invocation as a refresh so a cheaper plan
            // replaces the current one, while a locked plan stays put.
            prices_changed: true,
        };

        let baseline = cost::baseline_cost(
            &Simulator::new(&inputs.config),
            inputs.initial_state,
            &inputs.intervals,
        );

        if self.scout {
            let kind = context.intent.as_ref().map_or(PlanKind::Automatic, Intent::plan_kind);
            let candidate = manager.build_candidate(&context, kind, ModeHint::Economic)?;
            info!(
                baseline = ?baseline,
                plan = ?candidate.metadata.total_cost,
                saving = ?cost::opportunity(baseline, candidate.metadata.total_cost),
                "scouting only, nothing was activated",
            );
            println!("{}", build_timeline_table(&candidate));
            return Ok(());
        }

        let outcome = manager.tick(&context)?;
        let active = manager.active().context("the tick always leaves an active plan")?;
        info!(
            ?outcome,
            baseline = ?baseline,
            plan = ?active.metadata.total_cost,
            saving = ?cost::opportunity(baseline, active.metadata.total_cost),
            "planned",
        );
        println!("{}", build_timeline_table(active));

        store::write_json(&state_dir.balancing_path(), &balancing_state)?;
        let commanded = manager.commanded_mode(now);
        FileCommandSink::new(state_dir.mode_command_path()).command_mode(commanded, now)?;
        heartbeat::Client::new(self.heartbeat.heartbeat_url).send().await;
        Ok(())
    }
}
