use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    config::PlannerConfig,
    core::{
        interval::Interval,
        mode::Mode,
        optimizer::{HybridOptimizer, ModeHint, Optimized},
        simulator::BatteryState,
    },
    error::PlannerError,
    plan::{Intent, IntentKind, Plan, PlanKind, PlanMetadata, PlanStatus},
    prelude::*,
    quantity::{cost::Koruna, energy::KilowattHours},
    store::PlanStore,
};

/// A replacement plan must beat the active one by at least this much.
const RECOMPUTE_IMPROVEMENT: Koruna = Koruna(1.0);

/// Everything a planning decision needs for one tick.
pub struct PlanningContext<'a> {
    pub now: DateTime<Utc>,
    pub intervals: &'a [Interval],
    pub initial_state: BatteryState,
    pub config: &'a PlannerConfig,
    pub intent: Option<Intent>,
    pub prices_changed: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The active plan was kept as is.
    Kept,
    /// A new plan was activated.
    Activated,
    /// The active plan completed and a fresh automatic plan took over.
    Completed,
}

/// Sole owner of every plan. Exactly one plan is active at any time once the
/// manager has run at least one tick.
#[must_use]
pub struct PlanManager {
    store: PlanStore,
    active: Option<Plan>,
    pending: Vec<Plan>,
}

impl PlanManager {
    /// Load the persisted active plan and any pending proposals. Completion
    /// of a stale plan happens on the first tick, when inputs are available.
    pub fn open(store: PlanStore) -> Result<Self> {
        let active = store.load_active()?;
        if let Some(plan) = &active {
            info!(id = plan.id, "restored the active plan");
        }
        let pending: Vec<Plan> = store
            .list()?
            .into_iter()
            .filter(|plan| plan.status == PlanStatus::Pending)
            .collect();
        if !pending.is_empty() {
            info!(count = pending.len(), "restored pending proposals");
        }
        Ok(Self { store, active, pending })
    }

    #[must_use]
    pub fn active(&self) -> Option<&Plan> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn pending(&self) -> &[Plan] {
        &self.pending
    }

    /// Run the optimizer for the context and wrap the result into a plan.
    pub fn build_candidate(
        &self,
        context: &PlanningContext<'_>,
        kind: PlanKind,
        hint: ModeHint,
    ) -> Result<Plan> {
        if context.intervals.is_empty() {
            return Err(
                PlannerError::InputUnavailable("no intervals to plan over".to_string()).into()
            );
        }
        let optimized = HybridOptimizer::builder()
            .intervals(context.intervals)
            .initial_state(context.initial_state)
            .config(context.config)
            .maybe_intent(context.intent.as_ref())
            .hint(hint)
            .build()
            .optimize();
        Ok(self.wrap(optimized, kind, context))
    }

    fn wrap(&self, optimized: Optimized, kind: PlanKind, context: &PlanningContext<'_>) -> Plan {
        let deadline = context
            .intervals
            .last()
            .map_or(context.now + TimeDelta::hours(24), Interval::end);
        let intent = context.intent.as_ref();
        Plan {
            id: self.next_id(kind, context.now),
            kind,
            status: PlanStatus::Pending,
            created_at: context.now,
            activated_at: None,
            deadline,
            holding_start: intent.map(|intent| intent.holding_start),
            holding_end: intent.map(|intent| intent.holding_end),
            required_soc_kwh: intent.map(|intent| intent.required_soc),
            required_soc_percent: intent.map(|intent| {
                crate::quantity::proportions::Percent::from_proportion(
                    intent.required_soc / context.config.total_capacity,
                )
            }),
            locked: intent.is_some_and(|intent| intent.locked),
            timeline: optimized.timeline,
            metadata: optimized.metadata,
        }
    }

    fn next_id(&self, kind: PlanKind, now: DateTime<Utc>) -> String {
        let kind = match kind {
            PlanKind::Automatic => "automatic",
            PlanKind::Manual => "manual",
            PlanKind::Simulation => "simulation",
            PlanKind::Balancing => "balancing",
            PlanKind::Emergency => "emergency",
        };
        let base = format!("{kind}-{}", now.timestamp());
        let occupied = |id: &str| {
            self.active.as_ref().is_some_and(|plan| plan.id == id)
                || self.pending.iter().any(|plan| plan.id == id)
        };
        if !occupied(&base) {
            return base;
        }
        (2..)
            .map(|suffix| format!("{base}-{suffix}"))
            .find(|id| !occupied(id))
            .expect("some suffix is always free")
    }

    /// Store a candidate as pending and return its id.
    pub fn propose(&mut self, mut plan: Plan) -> Result<String> {
        plan.status = PlanStatus::Pending;
        self.store.archive(&plan)?;
        let id = plan.id.clone();
        self.pending.push(plan);
        Ok(id)
    }

    /// Activate a pending plan, honoring the lock and priority rules.
    pub fn apply(&mut self, id: &str, now: DateTime<Utc>) -> Result<TickOutcome> {
        let position = self
            .pending
            .iter()
            .position(|plan| plan.id == id)
            .with_context(|| format!("no pending plan with id `{id}`"))?;
        ensure!(
            self.pending[position].kind != PlanKind::Simulation,
            "a simulation cannot be activated; convert it to a manual plan first",
        );
        let candidate = self.pending.remove(position);
        if let Some(active) = &self.active
            && active.locked
            && candidate.priority() <= active.priority()
        {
            let active_id = active.id.clone();
            let blocked = candidate.id.clone();
            self.pending.push(candidate);
            bail!("the active plan `{active_id}` is locked and outranks `{blocked}`");
        }
        self.activate(candidate, now)?;
        Ok(TickOutcome::Activated)
    }

    /// Turn a pending simulation into a manual plan that can be applied.
    pub fn convert_simulation(&mut self, id: &str) -> Result {
        let plan = self
            .pending
            .iter_mut()
            .find(|plan| plan.id == id)
            .with_context(|| format!("no pending plan with id `{id}`"))?;
        ensure!(plan.kind == PlanKind::Simulation, "plan `{id}` is not a simulation");
        plan.kind = PlanKind::Manual;
        self.store.archive(plan)?;
        Ok(())
    }

    /// Drop a pending plan.
    pub fn cancel(&mut self, id: &str) -> Result {
        let position = self
            .pending
            .iter()
            .position(|plan| plan.id == id)
            .with_context(|| format!("no pending plan with id `{id}`"))?;
        let mut plan = self.pending.remove(position);
        plan.status = PlanStatus::Invalidated;
        self.store.archive(&plan)?;
        Ok(())
    }

    /// Replace the active plan with a freshly synthesized automatic one.
    pub fn revert(&mut self, context: &PlanningContext<'_>) -> Result<TickOutcome> {
        let candidate = self.build_candidate(context, PlanKind::Automatic, ModeHint::Economic)?;
        self.activate(candidate, context.now)?;
        Ok(TickOutcome::Activated)
    }

    /// The 15-minute decision point: completion, intent escalation, price
    /// refresh, and the guarantee that an active plan exists afterwards.
    #[instrument(skip_all, fields(now = %context.now))]
    pub fn tick(&mut self, context: &PlanningContext<'_>) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::Kept;

        if let Some(active) = &self.active
            && active.is_expired(context.now)
        {
            let mut finished = self.active.take().expect("checked above");
            finished.status = PlanStatus::Completed;
            info!(id = finished.id, "the active plan ran its course");
            self.store.archive(&finished)?;
            self.store.clear_active()?;
            outcome = TickOutcome::Completed;
        }

        // Stale proposals nobody ever applied.
        for pending in &mut self.pending {
            if pending.is_expired(context.now) {
                pending.status = PlanStatus::Expired;
                self.store.archive(pending)?;
            }
        }
        self.pending.retain(|pending| pending.status == PlanStatus::Pending);

        if let Some(intent) = &context.intent {
            let reflected = self
                .active
                .as_ref()
                .is_some_and(|active| Self::reflects_intent(active, intent));
            if !reflected {
                let candidate =
                    self.build_candidate(context, intent.plan_kind(), ModeHint::Economic)?;
                if self.try_activate(candidate, context.now)? {
                    return Ok(TickOutcome::Activated);
                }
            }
        }

        if self.active.is_none() {
            let candidate = self.build_candidate(context, PlanKind::Automatic, ModeHint::Economic)?;
            self.activate(candidate, context.now)?;
            return Ok(if outcome == TickOutcome::Completed {
                TickOutcome::Completed
            } else {
                TickOutcome::Activated
            });
        }

        if context.prices_changed {
            let active = self.active.as_ref().expect("ensured above");
            if active.locked {
                debug!(id = active.id, "prices changed but the active plan is locked");
            } else {
                let kind = context.intent.as_ref().map_or(PlanKind::Automatic, Intent::plan_kind);
                let candidate = self.build_candidate(context, kind, ModeHint::Economic)?;
                let saving = active.metadata.total_cost - candidate.metadata.total_cost;
                if saving >= RECOMPUTE_IMPROVEMENT {
                    info!(saving = ?saving, "the price refresh pays for a replacement plan");
                    self.activate(candidate, context.now)?;
                    return Ok(TickOutcome::Activated);
                }
            }
        }

        Ok(outcome)
    }

    /// Whether the active plan already implements the intent, so the tick
    /// must not regenerate it.
    fn reflects_intent(active: &Plan, intent: &Intent) -> bool {
        active.kind == intent.plan_kind()
            && active.holding_start == Some(intent.holding_start)
            && active.holding_end == Some(intent.holding_end)
            && active.required_soc_kwh == Some(intent.required_soc)
    }

    /// Activate unless the current active plan is locked and outranks the
    /// candidate; in that case keep the current one and report `false`.
    fn try_activate(&mut self, candidate: Plan, now: DateTime<Utc>) -> Result<bool> {
        if let Some(active) = &self.active
            && active.locked
            && candidate.priority() <= active.priority()
        {
            debug!(
                active = active.id,
                candidate = candidate.id,
                "the locked active plan outranks the candidate",
            );
            return Ok(false);
        }
        self.activate(candidate, now)?;
        Ok(true)
    }

    fn activate(&mut self, mut plan: Plan, now: DateTime<Utc>) -> Result {
        if let Some(mut replaced) = self.active.take() {
            replaced.status = PlanStatus::Reverted;
            self.store.archive(&replaced)?;
        }
        let priority = plan.priority();
        for pending in &mut self.pending {
            if pending.priority() <= priority && pending.kind != PlanKind::Simulation {
                pending.status = PlanStatus::Invalidated;
                self.store.archive(pending)?;
            }
        }
        self.pending.retain(|pending| pending.status == PlanStatus::Pending);
        plan.status = PlanStatus::Active;
        plan.activated_at = Some(now);
        self.store.save_active(&plan)?;
        info!(id = plan.id, kind = ?plan.kind, locked = plan.locked, "activated");
        self.active = Some(plan);
        Ok(())
    }

    /// First-boot fallback when no inputs are available: a bare HOME I plan
    /// so the system is never without an active plan.
    pub fn ensure_fallback(&mut self, now: DateTime<Utc>) -> Result {
        if self.active.is_some() {
            return Ok(());
        }
        warn!("no inputs and no previous plan, falling back to HOME I");
        let plan = Plan {
            id: self.next_id(PlanKind::Automatic, now),
            kind: PlanKind::Automatic,
            status: PlanStatus::Pending,
            created_at: now,
            activated_at: None,
            deadline: now + TimeDelta::hours(24),
            holding_start: None,
            holding_end: None,
            required_soc_kwh: None,
            required_soc_percent: None,
            locked: false,
            timeline: Vec::new(),
            metadata: PlanMetadata::default(),
        };
        self.activate(plan, now)
    }

    /// Mode to command right now: the active timeline's current interval, or
    /// HOME I when the plan carries no timeline (fallback plans).
    #[must_use]
    pub fn commanded_mode(&self, now: DateTime<Utc>) -> Mode {
        self.active
            .as_ref()
            .and_then(|plan| plan.mode_at(now))
            .unwrap_or(Mode::HomeI)
    }

    /// Manual plan proposal: reach `target` by `deadline`, optionally hold.
    pub fn propose_manual(
        &mut self,
        context: &PlanningContext<'_>,
        target: KilowattHours,
        deadline: DateTime<Utc>,
        holding: TimeDelta,
        hint: ModeHint,
        simulation: bool,
    ) -> Result<String> {
        ensure!(
            deadline >= context.now + Interval::LENGTH,
            "the deadline must be at least one interval away",
        );
        self.warn_if_infeasible(context, target, deadline);
        let intent = Intent {
            kind: IntentKind::Manual,
            required_soc: target,
            holding_start: deadline,
            holding_end: deadline + holding,
            locked: false,
        };
        let manual_context = PlanningContext {
            now: context.now,
            intervals: context.intervals,
            initial_state: context.initial_state,
            config: context.config,
            intent: Some(intent),
            prices_changed: context.prices_changed,
        };
        let kind = if simulation { PlanKind::Simulation } else { PlanKind::Manual };
        let candidate = self.build_candidate(&manual_context, kind, hint)?;
        self.propose(candidate)
    }

    /// An unreachable target is not an error, but the operator should know.
    fn warn_if_infeasible(
        &self,
        context: &PlanningContext<'_>,
        target: KilowattHours,
        deadline: DateTime<Utc>,
    ) {
        let config = context.config;
        #[allow(clippy::cast_precision_loss)]
        let charge_intervals = ((deadline - context.now).num_minutes() / 15).max(0) as f64;
        let reachable = context.initial_state.soc
            + config.ac_charge_per_interval() * config.charge_efficiency_acdc * charge_intervals;
        if target > reachable + config.safety_margin {
            warn!(
                target = ?target,
                reachable = ?reachable,
                "{}",
                PlannerError::InfeasibleTarget(
                    "the charger cannot reach the requested state of charge by the deadline"
                        .to_string(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        core::simulator::tests::test_config,
        quantity::{proportions::Percent, rate::KorunaPerKilowattHour},
        store::StateDir,
    };

    fn night_intervals(start: DateTime<Utc>, count: usize, price: f64) -> Vec<Interval> {
        (0..count)
            .map(|position| Interval {
                start: start + Interval::LENGTH * position as i32,
                pv: KilowattHours(0.0),
                load: KilowattHours(0.5),
                import_price: KorunaPerKilowattHour(price),
                export_price: KorunaPerKilowattHour(1.0),
            })
            .collect()
    }

    fn context<'a>(
        now: DateTime<Utc>,
        intervals: &'a [Interval],
        config: &'a crate::config::PlannerConfig,
        intent: Option<Intent>,
        prices_changed: bool,
    ) -> PlanningContext<'a> {
        PlanningContext {
            now,
            intervals,
            initial_state: BatteryState { soc: config.user_min_energy() },
            config,
            intent,
            prices_changed,
        }
    }

    fn open_manager(directory: &std::path::Path) -> PlanManager {
        PlanManager::open(StateDir::open(directory).unwrap().plans()).unwrap()
    }

    #[test]
    fn tick_establishes_and_keeps_exactly_one_active_plan() {
        let directory = tempfile::tempdir().unwrap();
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 22, 0, 0).unwrap();
        let intervals = night_intervals(now, 16, 1.0);
        let mut manager = open_manager(directory.path());

        let outcome = manager.tick(&context(now, &intervals, &config, None, false)).unwrap();
        assert_eq!(outcome, TickOutcome::Activated);
        let first_id = manager.active().unwrap().id.clone();

        let outcome = manager.tick(&context(now, &intervals, &config, None, false)).unwrap();
        assert_eq!(outcome, TickOutcome::Kept);
        assert_eq!(manager.active().unwrap().id, first_id);

        // The active plan survives a restart.
        let reopened = open_manager(directory.path());
        assert_eq!(reopened.active().unwrap().id, first_id);
    }

    #[test]
    fn locked_balancing_blocks_a_manual_apply() {
        let directory = tempfile::tempdir().unwrap();
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 22, 0, 0).unwrap();
        let intervals = night_intervals(now, 32, 2.0);
        let mut manager = open_manager(directory.path());

        let forced = Intent {
            kind: IntentKind::BalancingForced,
            required_soc: config.total_capacity,
            holding_start: now + TimeDelta::hours(2),
            holding_end: now + TimeDelta::hours(5),
            locked: true,
        };
        manager.tick(&context(now, &intervals, &config, Some(forced), false)).unwrap();
        let active = manager.active().unwrap();
        assert_eq!(active.kind, PlanKind::Balancing);
        assert!(active.locked);

        let ctx = context(now, &intervals, &config, None, false);
        let manual_id = manager
            .propose_manual(
                &ctx,
                config.target_energy(),
                now + TimeDelta::hours(6),
                TimeDelta::zero(),
                ModeHint::Economic,
                false,
            )
            .unwrap();
        let error = manager.apply(&manual_id, now).unwrap_err();
        assert!(error.to_string().contains("locked"));
        assert_eq!(manager.active().unwrap().kind, PlanKind::Balancing);
    }

    #[test]
    fn an_intent_backed_plan_is_not_regenerated_every_tick() {
        let directory = tempfile::tempdir().unwrap();
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 15, 30, 0).unwrap();
        let intervals = night_intervals(now, 32, 2.0);
        let forced = Intent {
            kind: IntentKind::BalancingForced,
            required_soc: config.total_capacity,
            holding_start: now + TimeDelta::minutes(15),
            holding_end: now + TimeDelta::minutes(15) + TimeDelta::hours(3),
            locked: true,
        };
        let mut manager = open_manager(directory.path());
        let outcome = manager
            .tick(&context(now, &intervals, &config, Some(forced.clone()), false))
            .unwrap();
        assert_eq!(outcome, TickOutcome::Activated);
        let id = manager.active().unwrap().id.clone();

        // The coordinator keeps returning the same intent; the plan stays.
        let later = now + TimeDelta::minutes(15);
        let outcome = manager
            .tick(&context(later, &intervals, &config, Some(forced), false))
            .unwrap();
        assert_eq!(outcome, TickOutcome::Kept);
        assert_eq!(manager.active().unwrap().id, id);
        assert_eq!(
            manager.active().unwrap().required_soc_percent,
            Some(crate::quantity::proportions::Percent(100.0)),
        );
    }

    /// A red warning replaces an unlocked opportunistic balancing plan.
    #[test]
    fn weather_emergency_preempts_opportunistic_balancing() {
        let directory = tempfile::tempdir().unwrap();
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 20, 0, 0).unwrap();
        let intervals = night_intervals(now, 32, 2.0);
        let mut manager = open_manager(directory.path());

        let opportunistic = Intent {
            kind: IntentKind::BalancingOpportunistic,
            required_soc: config.total_capacity,
            holding_start: now + TimeDelta::hours(2),
            holding_end: now + TimeDelta::hours(5),
            locked: false,
        };
        manager
            .tick(&context(now, &intervals, &config, Some(opportunistic), false))
            .unwrap();
        let balancing_id = manager.active().unwrap().id.clone();
        assert!(!manager.active().unwrap().locked);

        let emergency = Intent {
            kind: IntentKind::Emergency,
            required_soc: config.total_capacity,
            holding_start: now + TimeDelta::hours(2),
            holding_end: now + TimeDelta::hours(6),
            locked: true,
        };
        let outcome = manager
            .tick(&context(now, &intervals, &config, Some(emergency.clone()), false))
            .unwrap();
        assert_eq!(outcome, TickOutcome::Activated);
        let active = manager.active().unwrap();
        assert_eq!(active.kind, PlanKind::Emergency);
        assert!(active.locked);
        assert_eq!(active.required_soc_kwh, Some(config.total_capacity));
        assert_eq!(active.holding_start, Some(emergency.holding_start));

        let store = StateDir::open(directory.path()).unwrap().plans();
        let reverted = store.load(&balancing_id).unwrap().unwrap();
        assert_eq!(reverted.status, PlanStatus::Reverted);
    }

    #[test]
    fn expired_plans_complete_and_are_replaced() {
        let directory = tempfile::tempdir().unwrap();
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 22, 0, 0).unwrap();
        let intervals = night_intervals(now, 16, 1.0);
        let mut manager = open_manager(directory.path());
        manager.tick(&context(now, &intervals, &config, None, false)).unwrap();
        let first_id = manager.active().unwrap().id.clone();

        let later = now + TimeDelta::hours(50);
        let fresh = night_intervals(later, 16, 1.0);
        let outcome = manager.tick(&context(later, &fresh, &config, None, false)).unwrap();
        assert_eq!(outcome, TickOutcome::Completed);
        assert_ne!(manager.active().unwrap().id, first_id);

        let store = StateDir::open(directory.path()).unwrap().plans();
        let finished = store.load(&first_id).unwrap().unwrap();
        assert_eq!(finished.status, PlanStatus::Completed);
    }

    #[test]
    fn a_price_refresh_replaces_the_plan_when_it_pays() {
        let directory = tempfile::tempdir().unwrap();
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 22, 0, 0).unwrap();
        let expensive = night_intervals(now, 16, 5.0);
        let mut manager = open_manager(directory.path());
        manager.tick(&context(now, &expensive, &config, None, false)).unwrap();
        let first_id = manager.active().unwrap().id.clone();

        // Same horizon, much cheaper: the candidate saves well over 1 Kč.
        let cheap = night_intervals(now, 16, 1.0);
        let outcome = manager.tick(&context(now, &cheap, &config, None, true)).unwrap();
        assert_eq!(outcome, TickOutcome::Activated);
        assert_ne!(manager.active().unwrap().id, first_id);
    }

    #[test]
    fn simulations_require_conversion_before_apply() {
        let directory = tempfile::tempdir().unwrap();
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 22, 0, 0).unwrap();
        let intervals = night_intervals(now, 32, 1.0);
        let mut manager = open_manager(directory.path());

        let ctx = context(now, &intervals, &config, None, false);
        let id = manager
            .propose_manual(
                &ctx,
                config.target_energy(),
                now + TimeDelta::hours(6),
                TimeDelta::zero(),
                ModeHint::Economic,
                true,
            )
            .unwrap();
        assert!(manager.apply(&id, now).is_err());

        manager.convert_simulation(&id).unwrap();
        manager.apply(&id, now).unwrap();
        assert_eq!(manager.active().unwrap().kind, PlanKind::Manual);
    }

    #[test]
    fn pending_proposals_survive_a_restart() {
        let directory = tempfile::tempdir().unwrap();
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 22, 0, 0).unwrap();
        let intervals = night_intervals(now, 32, 1.0);
        let id = {
            let mut manager = open_manager(directory.path());
            let ctx = context(now, &intervals, &config, None, false);
            manager
                .propose_manual(
                    &ctx,
                    config.target_energy(),
                    now + TimeDelta::hours(6),
                    TimeDelta::zero(),
                    ModeHint::Economic,
                    false,
                )
                .unwrap()
        };
        let mut manager = open_manager(directory.path());
        assert!(manager.pending().iter().any(|plan| plan.id == id));
        manager.apply(&id, now).unwrap();
        assert_eq!(manager.active().unwrap().id, id);
    }

    #[test]
    fn fallback_keeps_the_system_commanding_home_i() {
        let directory = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 22, 0, 0).unwrap();
        let mut manager = open_manager(directory.path());
        manager.ensure_fallback(now).unwrap();
        assert!(manager.active().is_some());
        assert_eq!(manager.commanded_mode(now), Mode::HomeI);
    }

    #[test]
    fn infeasible_manual_target_still_produces_a_best_effort_plan() {
        let directory = tempfile::tempdir().unwrap();
        let config = test_config();
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 22, 0, 0).unwrap();
        let intervals = night_intervals(now, 8, 1.0);
        let mut manager = open_manager(directory.path());
        let ctx = context(now, &intervals, &config, None, false);
        // Two hours of charging cannot possibly fill the battery from the
        // floor; the proposal still succeeds, flagged in its metadata.
        let id = manager
            .propose_manual(
                &ctx,
                config.total_capacity,
                now + TimeDelta::hours(2),
                TimeDelta::zero(),
                ModeHint::Fast,
                false,
            )
            .unwrap();
        let plan = manager.pending().iter().find(|plan| plan.id == id).unwrap();
        assert!(!plan.metadata.target_achieved);
    }

    #[test]
    fn soc_percent_helper_matches_capacity() {
        let config = test_config();
        let state = BatteryState { soc: config.total_capacity };
        assert_eq!(state.percent(config.total_capacity), Percent(100.0));
    }
}
