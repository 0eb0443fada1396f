use bon::Builder;

use crate::{
    config::PlannerConfig,
    core::{
        cost::mean_import_price,
        enforcer,
        interval::Interval,
        mode::Mode,
        simulator::{BatteryState, PV_NIGHT_EPS, SOC_EPSILON, Simulator, Trajectory},
        validator,
        validator::TARGET_TOLERANCE,
    },
    plan::{Intent, PlanMetadata, PlanIntervalResult},
    prelude::*,
    quantity::{Zero, cost::Koruna, energy::KilowattHours, rate::KorunaPerKilowattHour},
};

/// Minimum PV per interval for HOME III to be worth assigning.
const PV_STORE_GATE: KilowattHours = KilowattHours(0.3);

/// How far ahead the HOME II peak check looks (3 h).
const PEAK_LOOKAHEAD_INTERVALS: usize = 12;

/// Averaging window of the charge benefit estimate (6 h).
const BENEFIT_LOOKAHEAD_INTERVALS: usize = 24;

/// Hard cap on phase-6 grid-charge selection (5 h of UPS).
const MAX_UPS_SELECTION: usize = 20;

/// Minimum expected saving for a non-mandatory grid charge.
const BENEFIT_THRESHOLD: Koruna = Koruna(2.0);

const HIGH_SOC_GATE: f64 = 0.85;
const CHARGE_SOC_GATE: f64 = 0.80;
const PRESERVE_SOC_GATE: f64 = 0.30;
const CHEAP_PRICE_FACTOR: f64 = 0.8;
const PEAK_PRICE_FACTOR: f64 = 1.4;

/// UPS block insertions the target top-up pass may attempt.
const MAX_TARGET_REPAIR_BLOCKS: usize = 10;

/// Operator preference for manual and simulated plans.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeHint {
    /// Only charge when it pays for itself.
    #[default]
    Economic,
    /// Reach the target as soon as possible, price be damned.
    Fast,
    /// Prefer storing solar over anything else.
    SolarPriority,
}

/// Effective charging goal derived from the configuration and the intent.
struct EffectiveTarget {
    end_of_horizon: KilowattHours,
    /// Grid position of the first interval at or after the holding start.
    holding_position: Option<usize>,
    required_at_holding: Option<KilowattHours>,
}

/// An interval where the simulated trajectory dips below the requirement.
struct Opportunity {
    position: usize,
    deficit: KilowattHours,
    price: KorunaPerKilowattHour,
}

/// Result of a full optimizer run, ready to be wrapped into a plan.
#[must_use]
pub struct Optimized {
    pub modes: Vec<Mode>,
    pub timeline: Vec<PlanIntervalResult>,
    pub metadata: PlanMetadata,
    pub final_state: BatteryState,
    pub effective_target: KilowattHours,
}

/// The multi-pass mode optimizer: a forward baseline, a backward
/// requirement, a daytime pre-assignment, greedy cheap-charge selection and
/// the constraint passes, in that order.
#[derive(Builder)]
pub struct HybridOptimizer<'a> {
    intervals: &'a [Interval],
    initial_state: BatteryState,
    config: &'a PlannerConfig,
    intent: Option<&'a Intent>,
    #[builder(default)]
    hint: ModeHint,
}

impl HybridOptimizer<'_> {
    #[instrument(skip_all, fields(n_intervals = self.intervals.len()))]
    pub fn optimize(self) -> Optimized {
        let config = self.config;
        let simulator = Simulator::new(config);
        let count = self.intervals.len();
        let initial = self.initial_state.clamped(config);

        // Phase 1: what happens if we do nothing but HOME I.
        let baseline = simulator.simulate_sequence(initial, self.intervals, &vec![Mode::HomeI; count]);

        // Phase 2: is charging needed at all? A battery pinned to the floor
        // with the grid covering the load counts as a floor need even though
        // the clamped trajectory never dips below it.
        let user_min = config.user_min_energy();
        let need_for_min = baseline.soc_min < user_min - SOC_EPSILON
            || baseline.total_shortfall > KilowattHours::ZERO;
        let target = self.effective_target();
        let need_for_target =
            baseline.final_state.soc < target.end_of_horizon - SOC_EPSILON;

        let mut modes;
        let mut reasons;
        let mut selected_any = false;
        if !need_for_min && !need_for_target && self.intent.is_none() {
            debug!("no charging need, staying on the HOME I baseline");
            modes = vec![Mode::HomeI; count];
            reasons = vec!["baseline"; count];
        } else {
            // Phase 3: how much energy each boundary must hold to still make
            // the target, walking HOME I physics backwards. Deliberately not
            // clamped to the user floor so the requirement can surface above
            // it; only the capacity bounds it.
            let required = self.backward_requirement(&target);

            // Phase 4: daytime pre-assignment from the baseline trajectory.
            (modes, reasons) = self.preassign_daytime(&baseline, initial);

            // Phases 5–7: grid-charge opportunities, greedy selection, UPS.
            let opportunities =
                self.collect_opportunities(&simulator, initial, &modes, &required);
            let selected = self.select_opportunities(&opportunities, &modes);
            selected_any = !selected.is_empty();
            for position in selected {
                modes[position] = Mode::HomeUps;
                reasons[position] = "cheap-grid-charge";
            }
        }

        // Phase 8: dwell first, then pin the holding window. Pins are final.
        let mut pinned = vec![false; count];
        enforcer::enforce_min_dwell(&mut modes, &mut reasons, &pinned);
        if let Some(intent) = self.intent {
            enforcer::pin_holding_window(
                self.intervals,
                intent,
                &mut modes,
                &mut reasons,
                &mut pinned,
            );
        }

        // Phase 9: swallow short HOME I gaps where stability is worth it.
        enforcer::merge_gaps(&simulator, self.intervals, initial, &mut modes, &mut reasons, &pinned);

        // Target top-up: only once a charge plan is warranted (an intent, or
        // at least one selected opportunity) does the planner finish the job
        // at unfavourable prices; otherwise the target stays a soft goal.
        if self.intent.is_some() || selected_any {
            self.repair_target(&simulator, initial, &target, &mut modes, &mut reasons, &pinned);
        }

        // Floor repair is unconditional: the user floor is a hard constraint.
        let repair = enforcer::repair_floor(
            &simulator,
            self.intervals,
            initial,
            &mut modes,
            &mut reasons,
            &pinned,
            config.allowed_modes(),
        );

        let goal = self.goal_measure(&target);
        validator::finalize(validator::Finalize {
            config,
            intervals: self.intervals,
            initial,
            modes,
            reasons,
            repair,
            goal,
        })
    }

    /// Resolve the effective target from the user target and the intent.
    fn effective_target(&self) -> EffectiveTarget {
        let user_target = self.config.target_energy();
        let (Some(intent), Some(first)) = (self.intent, self.intervals.first()) else {
            return EffectiveTarget {
                end_of_horizon: user_target,
                holding_position: None,
                required_at_holding: None,
            };
        };
        let horizon_end = self.intervals.last().expect("checked above").end();
        if !intent.intersects(first.start, horizon_end) {
            return EffectiveTarget {
                end_of_horizon: user_target,
                holding_position: None,
                required_at_holding: None,
            };
        }
        let required = intent.required_soc.min(self.config.total_capacity);
        let holding_position = self
            .intervals
            .iter()
            .position(|interval| interval.start >= intent.holding_start);
        EffectiveTarget {
            end_of_horizon: required.max(user_target),
            holding_position,
            required_at_holding: Some(required),
        }
    }

    /// Phase 3: requirement per boundary, from the horizon end leftwards.
    fn backward_requirement(&self, target: &EffectiveTarget) -> Vec<KilowattHours> {
        let config = self.config;
        let count = self.intervals.len();
        let mut required = vec![KilowattHours::ZERO; count + 1];
        required[count] = target.end_of_horizon;
        for position in (0..count).rev() {
            let interval = &self.intervals[position];
            let surplus = (interval.pv - interval.load).max(KilowattHours::ZERO);
            let deficit = (interval.load - interval.pv).max(KilowattHours::ZERO);
            let mut requirement = required[position + 1]
                - surplus * config.charge_efficiency_dcdc
                + deficit / config.discharge_efficiency;
            requirement = requirement.min(config.total_capacity);
            if target.holding_position == Some(position)
                && let Some(at_holding) = target.required_at_holding
            {
                requirement = requirement.max(at_holding);
            }
            required[position] = requirement;
        }
        required
    }

    /// Phase 4: pick a daylight mode per interval from the baseline SoC.
    fn preassign_daytime(
        &self,
        baseline: &Trajectory,
        initial: BatteryState,
    ) -> (Vec<Mode>, Vec<&'static str>) {
        let config = self.config;
        let allowed = config.allowed_modes();
        let mean_price = mean_import_price(self.intervals);
        let mut modes = Vec::with_capacity(self.intervals.len());
        let mut reasons = Vec::with_capacity(self.intervals.len());
        for (position, interval) in self.intervals.iter().enumerate() {
            let (mode, reason) = if interval.pv < PV_NIGHT_EPS {
                (Mode::HomeI, "night")
            } else {
                let soc = baseline.soc_before(position, initial);
                let proportion = soc / config.total_capacity;
                let cheap = interval.import_price.0 < CHEAP_PRICE_FACTOR * mean_price.0
                    || interval.import_price < config.threshold_cheap
                    || self.hint == ModeHint::SolarPriority;
                if proportion >= HIGH_SOC_GATE {
                    (Mode::HomeI, "high-soc")
                } else if allowed.contains(Mode::HomeIii)
                    && interval.pv >= PV_STORE_GATE
                    && cheap
                    && proportion < CHARGE_SOC_GATE
                {
                    (Mode::HomeIii, "store-solar")
                } else if allowed.contains(Mode::HomeII)
                    && interval.pv < interval.load
                    && proportion > PRESERVE_SOC_GATE
                    && self.upcoming_peak(position)
                {
                    (Mode::HomeII, "preserve-for-peak")
                } else {
                    (Mode::HomeI, "self-use")
                }
            };
            modes.push(mode);
            reasons.push(reason);
        }
        (modes, reasons)
    }

    /// Is there a significantly more expensive interval within the next 3 h?
    fn upcoming_peak(&self, position: usize) -> bool {
        let current = self.intervals[position].import_price;
        self.intervals
            .iter()
            .skip(position + 1)
            .take(PEAK_LOOKAHEAD_INTERVALS)
            .any(|interval| interval.import_price.0 > PEAK_PRICE_FACTOR * current.0)
    }

    /// Phase 5: simulate the pre-assigned modes and list every dip below the
    /// requirement curve.
    fn collect_opportunities(
        &self,
        simulator: &Simulator<'_>,
        initial: BatteryState,
        modes: &[Mode],
        required: &[KilowattHours],
    ) -> Vec<Opportunity> {
        let trajectory = simulator.simulate_sequence(initial, self.intervals, modes);
        trajectory
            .results
            .iter()
            .enumerate()
            .filter_map(|(position, result)| {
                let requirement = required[position + 1];
                (result.soc_after_kwh < requirement - SOC_EPSILON).then(|| Opportunity {
                    position,
                    deficit: requirement - result.soc_after_kwh,
                    price: self.intervals[position].import_price,
                })
            })
            .collect()
    }

    /// Phase 6: cheapest first, capped, with the economy filters unless an
    /// intent (or the fast hint) makes reaching the target mandatory.
    fn select_opportunities(
        &self,
        opportunities: &[Opportunity],
        modes: &[Mode],
    ) -> Vec<usize> {
        if !self.config.allowed_modes().contains(Mode::HomeUps) {
            return Vec::new();
        }
        let unconditional = self.intent.is_some() || self.hint == ModeHint::Fast;
        let mut order: Vec<&Opportunity> = opportunities.iter().collect();
        // Stable: equal prices keep the chronological order.
        order.sort_by_key(|opportunity| opportunity.price);
        let mut selected = Vec::new();
        for opportunity in order {
            if selected.len() >= MAX_UPS_SELECTION {
                break;
            }
            if !unconditional {
                let interval = &self.intervals[opportunity.position];
                if interval.pv > enforcer::UPS_PV_EXCLUSION {
                    // Daytime UPS would waste free solar.
                    continue;
                }
                if modes[opportunity.position] == Mode::HomeIii {
                    // Free solar charging is already scheduled here.
                    continue;
                }
                let future_mean = self.mean_price_after(opportunity.position);
                let benefit =
                    Koruna(opportunity.deficit.0 * (future_mean.0 - opportunity.price.0));
                if benefit < BENEFIT_THRESHOLD {
                    continue;
                }
            }
            selected.push(opportunity.position);
        }
        selected
    }

    /// Mean import price over the 6 h following the position.
    fn mean_price_after(&self, position: usize) -> KorunaPerKilowattHour {
        let window_start = (position + 1).min(self.intervals.len());
        let window_end = (position + 1 + BENEFIT_LOOKAHEAD_INTERVALS).min(self.intervals.len());
        mean_import_price(&self.intervals[window_start..window_end])
    }

    /// What the plan must be judged against: the SoC entering the holding
    /// window when an intent is present, the final SoC otherwise.
    fn goal_measure(&self, target: &EffectiveTarget) -> validator::Goal {
        match (target.holding_position, target.required_at_holding) {
            (Some(position), Some(required)) => validator::Goal::AtBoundary { position, required },
            _ => validator::Goal::EndOfHorizon { required: target.end_of_horizon },
        }
    }

    /// Best-effort top-up towards the effective target: insert dwell-sized
    /// UPS blocks at the cheapest positions that still have headroom,
    /// re-simulating after each, until the goal holds or progress stops.
    fn repair_target(
        &self,
        simulator: &Simulator<'_>,
        initial: BatteryState,
        target: &EffectiveTarget,
        modes: &mut [Mode],
        reasons: &mut [&'static str],
        pinned: &[bool],
    ) {
        if !self.config.allowed_modes().contains(Mode::HomeUps) {
            return;
        }
        let capacity = self.config.total_capacity;
        let limit = target.holding_position.unwrap_or(self.intervals.len());
        let goal = target
            .required_at_holding
            .unwrap_or(target.end_of_horizon);
        for _ in 0..MAX_TARGET_REPAIR_BLOCKS {
            let trajectory = simulator.simulate_sequence(initial, self.intervals, modes);
            let measured = match target.holding_position {
                Some(0) => initial.soc,
                Some(position) => trajectory.soc_after(position - 1),
                None => trajectory.final_state.soc,
            };
            if measured >= goal - TARGET_TOLERANCE {
                return;
            }
            let mut candidates: Vec<usize> = (0..limit)
                .filter(|&position| {
                    modes[position] != Mode::HomeUps
                        && !pinned[position]
                        && self.intervals[position].pv <= enforcer::UPS_PV_EXCLUSION
                        && trajectory.soc_before(position, initial) < capacity - SOC_EPSILON
                })
                .collect();
            if candidates.is_empty() {
                return;
            }
            candidates.sort_by_key(|&position| (self.intervals[position].import_price, position));
            let pick = candidates[0];
            let picked_before = (modes[pick], reasons[pick]);
            modes[pick] = Mode::HomeUps;
            reasons[pick] = "target-repair";
            let already_paired = (pick > 0 && modes[pick - 1] == Mode::HomeUps)
                || (pick + 1 < modes.len() && modes[pick + 1] == Mode::HomeUps);
            let paired = if already_paired {
                None
            } else {
                let Some(neighbor) = self.target_block_neighbor(modes, pinned, pick) else {
                    // No way to satisfy the dwell rule at this position.
                    (modes[pick], reasons[pick]) = picked_before;
                    return;
                };
                let before = (neighbor, modes[neighbor], reasons[neighbor]);
                modes[neighbor] = Mode::HomeUps;
                reasons[neighbor] = "target-repair";
                Some(before)
            };
            let improved = {
                let after = simulator.simulate_sequence(initial, self.intervals, modes);
                let measured_after = match target.holding_position {
                    Some(0) => initial.soc,
                    Some(position) => after.soc_after(position - 1),
                    None => after.final_state.soc,
                };
                measured_after > measured + KilowattHours::ONE_WATT_HOUR
            };
            if !improved {
                // Charging here achieves nothing (the battery is already
                // capped around this point): undo the whole block — leaving
                // the paired neighbor behind would strand a one-interval
                // UPS run — and give up.
                (modes[pick], reasons[pick]) = picked_before;
                if let Some((neighbor, mode, reason)) = paired {
                    modes[neighbor] = mode;
                    reasons[neighbor] = reason;
                }
                return;
            }
        }
    }

    /// Neighbor to pair with a lone target-repair insertion so the dwell
    /// rule holds; prefer the side that can still take charge. The caller
    /// has already ruled out an adjacent UPS run.
    fn target_block_neighbor(
        &self,
        modes: &[Mode],
        pinned: &[bool],
        position: usize,
    ) -> Option<usize> {
        let eligible = |neighbor: usize| {
            neighbor < modes.len()
                && !pinned[neighbor]
                && self.intervals[neighbor].pv <= enforcer::UPS_PV_EXCLUSION
        };
        if eligible(position + 1) {
            Some(position + 1)
        } else {
            position.checked_sub(1).filter(|&left| eligible(left))
        }
    }
}
