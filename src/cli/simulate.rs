use chrono::Utc;
use clap::Parser;

use crate::{
    cli::{CommonArgs, TargetArgs, gather_inputs},
    manager::{PlanManager, PlanningContext},
    prelude::*,
    tables::build_timeline_table,
};

#[derive(Parser)]
pub struct SimulateArgs {
    /// Label for telling simulations apart.
    #[clap(long, default_value = "what-if")]
    pub scenario: String,

    #[clap(flatten)]
    pub target: TargetArgs,

    #[clap(flatten)]
    pub common: CommonArgs,
}

impl SimulateArgs {
    #[instrument(skip_all, fields(scenario = self.scenario))]
    pub fn run(self) -> Result {
        let id = propose(&self.common, &self.target, true)?;
        info!(id, scenario = self.scenario, "simulation stored; apply requires conversion");
        Ok(())
    }
}

#[derive(Parser)]
pub struct ProposeArgs {
    #[clap(flatten)]
    pub target: TargetArgs,

    #[clap(flatten)]
    pub common: CommonArgs,
}

impl ProposeArgs {
    #[instrument(skip_all)]
    pub fn run(self) -> Result {
        let id = propose(&self.common, &self.target, false)?;
        info!(id, "manual plan proposed; activate it with `apply`");
        Ok(())
    }
}

fn propose(common: &CommonArgs, target: &TargetArgs, simulation: bool) -> Result<String> {
    let now = Utc::now();
    let settings = common.settings()?;
    let state_dir = common.state()?;
    let mut source = common.source();
    let inputs = gather_inputs(&mut source, &settings, now)?;

    let mut manager = PlanManager::open(state_dir.plans())?;
    let context = PlanningContext {
        now,
        intervals: &inputs.intervals,
        initial_state: inputs.initial_state,
        config: &inputs.config,
        intent: None,
        prices_changed: false,
    };
    let target_energy = inputs.config.total_capacity * target.target_soc;
    let id = manager.propose_manual(
        &context,
        target_energy,
        target.deadline(now),
        target.holding(),
        target.mode_hint,
        simulation,
    )?;
    let plan = manager
        .pending()
        .iter()
        .find(|plan| plan.id == id)
        .expect("the proposal was just stored");
    println!("{}", build_timeline_table(plan));
    Ok(id)
}
