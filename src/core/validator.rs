use itertools::Itertools;

use crate::{
    config::PlannerConfig,
    core::{
        enforcer,
        enforcer::{FloorRepair, MIN_DWELL},
        interval::Interval,
        mode::Mode,
        optimizer::Optimized,
        simulator::{BatteryState, SOC_EPSILON},
    },
    plan::{ModeBlocks, PlanMetadata},
    prelude::*,
    quantity::energy::KilowattHours,
};

/// Slack when judging whether a target was reached.
pub const TARGET_TOLERANCE: KilowattHours = KilowattHours(0.1);

/// What the produced plan is measured against.
#[derive(Copy, Clone, Debug)]
pub enum Goal {
    /// SoC entering the interval at `position` must reach `required`.
    AtBoundary { position: usize, required: KilowattHours },
    /// SoC at the end of the horizon must reach `required`.
    EndOfHorizon { required: KilowattHours },
}

impl Goal {
    pub const fn required(self) -> KilowattHours {
        match self {
            Self::AtBoundary { required, .. } | Self::EndOfHorizon { required } => required,
        }
    }
}

pub struct Finalize<'a> {
    pub config: &'a PlannerConfig,
    pub intervals: &'a [Interval],
    pub initial: BatteryState,
    pub modes: Vec<Mode>,
    pub reasons: Vec<&'static str>,
    pub repair: FloorRepair,
    pub goal: Goal,
}

/// Re-check the invariants of the final timeline and build the metadata.
///
/// Violations here mean a bug upstream; they are logged loudly but the plan
/// is still produced, flagged, and applied — a best-effort plan beats no
/// plan.
#[instrument(skip_all)]
pub fn finalize(input: Finalize<'_>) -> Optimized {
    let Finalize { config, intervals, initial, modes, reasons, repair, goal } = input;
    let mut timeline = repair.trajectory.results;
    for (entry, reason) in timeline.iter_mut().zip(&reasons) {
        entry.reason = (*reason).to_string();
    }

    check_physical_bounds(config, &timeline);
    let capped = enforcer::clamp_caps(config, intervals, &mut timeline);
    if capped > 0 {
        error!(capped, "BUG: flows above the hardware caps had to be clamped");
    }
    check_dwell(&modes);

    let mut blocks = ModeBlocks::default();
    for mode in modes.iter().dedup() {
        blocks.bump(*mode);
    }
    #[allow(clippy::cast_possible_truncation)]
    let mode_switches = modes.iter().dedup().count().saturating_sub(1) as u32;

    let final_state = repair.trajectory.final_state;
    let measured = match goal {
        Goal::AtBoundary { position, .. } => {
            if position == 0 {
                initial.soc
            } else {
                timeline[position - 1].soc_after_kwh
            }
        }
        Goal::EndOfHorizon { .. } => final_state.soc,
    };
    let target_achieved = measured >= goal.required() - TARGET_TOLERANCE;
    if !target_achieved {
        info!(
            measured = ?measured,
            required = ?goal.required(),
            "the plan cannot reach the requested state of charge in time",
        );
    }

    let metadata = PlanMetadata {
        total_cost: repair.trajectory.total_cost,
        min_capacity_violations: repair.min_capacity_violations,
        target_achieved,
        final_soc_kwh: final_state.soc,
        mode_switches,
        // Anomaly counter: SoC lifts by the floor repair plus any flow the
        // cap clamp had to touch. Zero on a healthy plan.
        clamp_events: repair.clamp_events + capped,
        blocks_by_mode: blocks,
    };

    Optimized {
        modes,
        timeline,
        metadata,
        final_state,
        effective_target: goal.required(),
    }
}

fn check_physical_bounds(config: &PlannerConfig, timeline: &[crate::plan::PlanIntervalResult]) {
    let hw_min = config.hw_min_energy();
    for entry in timeline {
        if entry.soc_after_kwh < hw_min - SOC_EPSILON
            || entry.soc_after_kwh > config.total_capacity + SOC_EPSILON
        {
            error!(
                start = %entry.start,
                soc = ?entry.soc_after_kwh,
                "BUG: the trajectory escaped the physical window",
            );
        }
    }
}

fn check_dwell(modes: &[Mode]) {
    let mut start = 0;
    while start < modes.len() {
        let mode = modes[start];
        let mut end = start + 1;
        while end < modes.len() && modes[end] == mode {
            end += 1;
        }
        if mode != Mode::HomeI && end - start < MIN_DWELL {
            warn!(position = start, %mode, "a mode block shorter than the minimum dwell survived");
        }
        start = end;
    }
}

#[cfg(test)]
mod tests {
    use enumset::EnumSet;

    use super::*;
    use crate::core::{
        enforcer,
        simulator::{
            Simulator,
            tests::{interval, test_config},
        },
    };

    fn finalize_sequence(modes: Vec<Mode>, required: KilowattHours) -> Optimized {
        let config = test_config();
        let simulator = Simulator::new(&config);
        let intervals = vec![interval(0.0, 0.3, 2.0, 1.0); modes.len()];
        let mut modes = modes;
        let mut reasons = vec!["baseline"; modes.len()];
        let pinned = vec![false; modes.len()];
        let initial = BatteryState { soc: KilowattHours(8.0) };
        let repair = enforcer::repair_floor(
            &simulator,
            &intervals,
            initial,
            &mut modes,
            &mut reasons,
            &pinned,
            EnumSet::all(),
        );
        finalize(Finalize {
            config: &config,
            intervals: &intervals,
            initial,
            modes,
            reasons,
            repair,
            goal: Goal::EndOfHorizon { required },
        })
    }

    #[test]
    fn metadata_counts_blocks_and_switches() {
        let optimized = finalize_sequence(
            vec![
                Mode::HomeI,
                Mode::HomeI,
                Mode::HomeUps,
                Mode::HomeUps,
                Mode::HomeI,
                Mode::HomeI,
            ],
            KilowattHours(6.0),
        );
        assert_eq!(optimized.metadata.mode_switches, 2);
        assert_eq!(optimized.metadata.blocks_by_mode.home_i, 2);
        assert_eq!(optimized.metadata.blocks_by_mode.home_ups, 1);
        assert_eq!(optimized.metadata.min_capacity_violations, 0);
        assert_eq!(optimized.metadata.clamp_events, 0);
        assert!(optimized.metadata.target_achieved);
        assert_eq!(optimized.timeline[0].reason, "baseline");
    }

    #[test]
    fn an_unreachable_goal_is_flagged_not_fatal() {
        let config = test_config();
        let optimized =
            finalize_sequence(vec![Mode::HomeI; 6], config.total_capacity);
        assert!(!optimized.metadata.target_achieved);
        assert_eq!(optimized.metadata.final_soc_kwh, optimized.final_state.soc);
    }
}
