use chrono::Utc;
use clap::Parser;

use crate::{
    balancing::{BalancingCoordinator, BalancingState},
    cli::{CommonArgs, gather_inputs},
    manager::PlanManager,
    prelude::*,
    store,
    tables::{build_balancing_table, build_plans_table, build_timeline_table},
};

#[derive(Parser)]
pub struct StatusArgs {
    /// Also list the persisted historical plans.
    #[clap(long)]
    pub all: bool,

    #[clap(flatten)]
    pub common: CommonArgs,
}

impl StatusArgs {
    #[instrument(skip_all)]
    pub fn run(self) -> Result {
        let now = Utc::now();
        let state_dir = self.common.state()?;
        let manager = PlanManager::open(state_dir.plans())?;

        match manager.active() {
            Some(plan) => println!("{}", build_timeline_table(plan)),
            None => println!("no active plan"),
        }

        // The balancing status needs the resolved configuration; skip it
        // quietly when the inputs are not readable right now.
        let balancing_state: BalancingState =
            store::read_json(&state_dir.balancing_path())?.unwrap_or_default();
        let settings = self.common.settings()?;
        if let Ok(inputs) = gather_inputs(&mut self.common.source(), &settings, now) {
            let coordinator = BalancingCoordinator { config: &inputs.config };
            println!(
                "{}",
                build_balancing_table(&coordinator.current_status(&balancing_state, now)),
            );
        }

        if self.all {
            let plans = state_dir.plans().list()?;
            println!("{}", build_plans_table(&plans));
        }
        Ok(())
    }
}
