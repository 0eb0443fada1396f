use chrono::Utc;
use clap::Parser;

use crate::{
    cli::{CommonArgs, gather_inputs},
    manager::{PlanManager, PlanningContext},
    prelude::*,
};

#[derive(Parser)]
pub struct ApplyArgs {
    /// Id of the pending plan to activate.
    pub id: String,

    /// Turn a pending simulation into a manual plan before applying.
    #[clap(long)]
    pub convert_simulation: bool,

    #[clap(flatten)]
    pub common: CommonArgs,
}

impl ApplyArgs {
    #[instrument(skip_all, fields(id = self.id))]
    pub fn run(self) -> Result {
        let state_dir = self.common.state()?;
        let mut manager = PlanManager::open(state_dir.plans())?;
        if self.convert_simulation {
            manager.convert_simulation(&self.id)?;
        }
        manager.apply(&self.id, Utc::now())?;
        info!(id = self.id, "applied");
        Ok(())
    }
}

#[derive(Parser)]
pub struct RevertArgs {
    #[clap(flatten)]
    pub common: CommonArgs,
}

impl RevertArgs {
    #[instrument(skip_all)]
    pub fn run(self) -> Result {
        let now = Utc::now();
        let settings = self.common.settings()?;
        let state_dir = self.common.state()?;
        let mut source = self.common.source();
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
        manager.revert(&context)?;
        info!("reverted to a fresh automatic plan");
        Ok(())
    }
}

#[derive(Parser)]
pub struct CancelArgs {
    /// Id of the pending plan to drop.
    pub id: String,

    #[clap(flatten)]
    pub common: CommonArgs,
}

impl CancelArgs {
    #[instrument(skip_all, fields(id = self.id))]
    pub fn run(self) -> Result {
        let state_dir = self.common.state()?;
        let mut manager = PlanManager::open(state_dir.plans())?;
        manager.cancel(&self.id)?;
        info!(id = self.id, "cancelled");
        Ok(())
    }
}
