use crate::{
    config::PlannerConfig,
    core::{interval::Interval, mode::Mode},
    plan::PlanIntervalResult,
    quantity::{
        Zero,
        cost::Koruna,
        energy::KilowattHours,
        proportions::Percent,
    },
};

/// Below this the interval counts as night and HOME I/II/III collapse into
/// the same discharge-first behavior.
pub const PV_NIGHT_EPS: KilowattHours = KilowattHours(1e-3);

/// Tolerance for comparisons against the user floor.
pub const SOC_EPSILON: KilowattHours = KilowattHours(0.01);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct BatteryState {
    pub soc: KilowattHours,
}

impl BatteryState {
    pub fn percent(self, capacity: KilowattHours) -> Percent {
        Percent::from_proportion(self.soc / capacity)
    }

    /// Telemetry occasionally reports a fraction outside the physical window;
    /// bring it back in before planning.
    pub fn clamped(self, config: &PlannerConfig) -> Self {
        Self { soc: self.soc.clamp(config.hw_min_energy(), config.total_capacity) }
    }
}

/// Outcome of one simulated interval.
#[must_use]
pub struct Step {
    pub state_after: BatteryState,
    pub result: PlanIntervalResult,
    /// Load the battery could not cover because of the floor; it was bought
    /// from the grid instead.
    pub shortfall: KilowattHours,
}

/// Simulated trajectory over a mode sequence.
#[must_use]
pub struct Trajectory {
    pub results: Vec<PlanIntervalResult>,
    pub final_state: BatteryState,
    pub soc_min: KilowattHours,
    pub total_shortfall: KilowattHours,
    pub total_cost: Koruna,
}

impl Trajectory {
    #[must_use]
    pub fn soc_after(&self, position: usize) -> KilowattHours {
        self.results[position].soc_after_kwh
    }

    /// State of charge at the start of the interval at `position`.
    #[must_use]
    pub fn soc_before(&self, position: usize, initial: BatteryState) -> KilowattHours {
        if position == 0 { initial.soc } else { self.results[position - 1].soc_after_kwh }
    }
}

/// The sole source of energy truth: one quarter-hour of inverter physics.
#[derive(Copy, Clone)]
pub struct Simulator<'a> {
    pub config: &'a PlannerConfig,
}

/// Internal energy ledger of a single interval.
#[derive(Default)]
struct Ledger {
    grid_import: KilowattHours,
    grid_export: KilowattHours,
    charge_dc: KilowattHours,
    discharge_dc: KilowattHours,
    boiler: KilowattHours,
    curtailed: KilowattHours,
    shortfall: KilowattHours,
}

impl<'a> Simulator<'a> {
    pub const fn new(config: &'a PlannerConfig) -> Self {
        Self { config }
    }

    /// Simulate one interval in the given mode.
    ///
    /// The returned state always lies in `[hw_min, total_capacity]`; a
    /// discharge that would break the floor is truncated and reported as
    /// shortfall covered from the grid.
    pub fn simulate(&self, state: BatteryState, interval: &Interval, mode: Mode) -> Step {
        let config = self.config;
        debug_assert!(
            state.soc >= config.hw_min_energy() - SOC_EPSILON
                && state.soc <= config.total_capacity + SOC_EPSILON,
            "the initial state of charge {:?} is outside the physical window",
            state.soc,
        );

        let mut soc = state.soc.clamp(config.hw_min_energy(), config.total_capacity);
        let mut ledger = Ledger::default();

        if mode == Mode::HomeUps {
            self.apply_ups(&mut soc, interval, &mut ledger);
        } else if interval.pv < PV_NIGHT_EPS {
            self.apply_night(&mut soc, interval, &mut ledger);
        } else {
            match mode {
                Mode::HomeI => self.apply_home_i(&mut soc, interval, &mut ledger),
                Mode::HomeII => self.apply_home_ii(&mut soc, interval, &mut ledger),
                Mode::HomeIii => self.apply_home_iii(&mut soc, interval, &mut ledger),
                Mode::HomeUps => unreachable!("handled above"),
            }
        }

        assert!(
            soc >= config.hw_min_energy() - SOC_EPSILON && soc <= config.total_capacity + SOC_EPSILON,
            "the state of charge {soc:?} escaped [{:?}, {:?}]",
            config.hw_min_energy(),
            config.total_capacity,
        );

        let net_cost = ledger.grid_import * interval.import_price
            - ledger.grid_export * interval.export_price;
        let state_after = BatteryState { soc };
        Step {
            state_after,
            shortfall: ledger.shortfall,
            result: PlanIntervalResult {
                start: interval.start,
                mode,
                soc_after_kwh: soc,
                soc_after_percent: state_after.percent(config.total_capacity),
                grid_import_kwh: ledger.grid_import,
                grid_export_kwh: ledger.grid_export,
                battery_charge_kwh: ledger.charge_dc,
                battery_discharge_kwh: ledger.discharge_dc,
                boiler_kwh: ledger.boiler,
                curtailed_kwh: ledger.curtailed,
                net_cost,
                reason: String::new(),
            },
        }
    }

    /// Simulate a whole mode sequence from the initial state.
    pub fn simulate_sequence(
        &self,
        initial: BatteryState,
        intervals: &[Interval],
        modes: &[Mode],
    ) -> Trajectory {
        assert_eq!(intervals.len(), modes.len(), "one mode per interval");
        let mut state = initial;
        let mut results = Vec::with_capacity(intervals.len());
        let mut soc_min = initial.soc;
        let mut total_shortfall = KilowattHours::ZERO;
        let mut total_cost = Koruna(0.0);
        for (interval, mode) in intervals.iter().zip(modes) {
            let step = self.simulate(state, interval, *mode);
            state = step.state_after;
            soc_min = soc_min.min(state.soc);
            total_shortfall += step.shortfall;
            total_cost += step.result.net_cost;
            results.push(step.result);
        }
        Trajectory { results, final_state: state, soc_min, total_shortfall, total_cost }
    }

    /// PV covers the load, the surplus charges the battery and the deficit
    /// discharges it down to the user floor.
    fn apply_home_i(&self, soc: &mut KilowattHours, interval: &Interval, ledger: &mut Ledger) {
        let pv_to_load = interval.pv.min(interval.load);
        let surplus = interval.pv - pv_to_load;
        let deficit = interval.load - pv_to_load;
        let leftover = self.charge_from_pv(soc, surplus, ledger);
        self.discharge_for(soc, deficit, ledger);
        self.dispose_surplus(leftover, ledger);
    }

    /// PV covers the load and charges the battery, but the battery never
    /// discharges: the deficit is bought.
    fn apply_home_ii(&self, soc: &mut KilowattHours, interval: &Interval, ledger: &mut Ledger) {
        let pv_to_load = interval.pv.min(interval.load);
        let surplus = interval.pv - pv_to_load;
        let deficit = interval.load - pv_to_load;
        let leftover = self.charge_from_pv(soc, surplus, ledger);
        ledger.grid_import += deficit;
        self.dispose_surplus(leftover, ledger);
    }

    /// All PV goes into the battery, the load runs on the grid.
    fn apply_home_iii(&self, soc: &mut KilowattHours, interval: &Interval, ledger: &mut Ledger) {
        let leftover = self.charge_from_pv(soc, interval.pv, ledger);
        ledger.grid_import += interval.load;
        self.dispose_surplus(leftover, ledger);
    }

    /// Grid charging in parallel with the PV path; the load runs on the
    /// grid. The mode idles at 100% instead of flipping away.
    fn apply_ups(&self, soc: &mut KilowattHours, interval: &Interval, ledger: &mut Ledger) {
        let config = self.config;
        let leftover = self.charge_from_pv(soc, interval.pv, ledger);
        let headroom = config.total_capacity - *soc;
        let ac_intake = config
            .ac_charge_per_interval()
            .min(headroom / config.charge_efficiency_acdc)
            .max(KilowattHours::ZERO);
        let stored = ac_intake * config.charge_efficiency_acdc;
        *soc += stored;
        ledger.charge_dc += stored;
        ledger.grid_import += interval.load + ac_intake;
        self.dispose_surplus(leftover, ledger);
    }

    /// At night the three HOME modes behave identically: discharge down to
    /// the user floor, then buy the rest.
    fn apply_night(&self, soc: &mut KilowattHours, interval: &Interval, ledger: &mut Ledger) {
        let demand = (interval.load - interval.pv).max(KilowattHours::ZERO);
        self.discharge_for(soc, demand, ledger);
    }

    /// Charge the battery over the DC-DC path and return the PV energy that
    /// did not fit.
    fn charge_from_pv(
        &self,
        soc: &mut KilowattHours,
        pv: KilowattHours,
        ledger: &mut Ledger,
    ) -> KilowattHours {
        let headroom = self.config.total_capacity - *soc;
        let stored = (pv * self.config.charge_efficiency_dcdc).min(headroom);
        let consumed = stored / self.config.charge_efficiency_dcdc;
        *soc += stored;
        ledger.charge_dc += stored;
        pv - consumed
    }

    /// Discharge to cover the AC demand down to the user floor; whatever is
    /// left is bought from the grid and accounted as shortfall.
    fn discharge_for(&self, soc: &mut KilowattHours, demand: KilowattHours, ledger: &mut Ledger) {
        let floor = self.config.user_min_energy().max(self.config.hw_min_energy());
        let available_dc = (*soc - floor).max(KilowattHours::ZERO);
        let deliverable = available_dc * self.config.discharge_efficiency;
        let delivered = demand.min(deliverable);
        let used_dc = delivered / self.config.discharge_efficiency;
        *soc -= used_dc;
        ledger.discharge_dc += used_dc;
        let shortfall = demand - delivered;
        ledger.shortfall += shortfall;
        ledger.grid_import += shortfall;
    }

    /// Boiler first, then export up to the cap, then curtail.
    fn dispose_surplus(&self, surplus: KilowattHours, ledger: &mut Ledger) {
        let config = self.config;
        let boiler = if config.boiler_enabled {
            surplus.min(config.boiler_cap_per_interval())
        } else {
            KilowattHours::ZERO
        };
        let remaining = surplus - boiler;
        let export = remaining.min(config.export_cap_per_interval());
        ledger.boiler += boiler;
        ledger.grid_export += export;
        ledger.curtailed += remaining - export;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        api::telemetry::BatteryTelemetry,
        config::Settings,
        quantity::{power::Kilowatts, rate::KorunaPerKilowattHour},
    };

    pub(crate) fn test_config() -> PlannerConfig {
        let telemetry = BatteryTelemetry {
            total_capacity_kwh: KilowattHours(15.36),
            soc_percent: Percent(40.0),
            hw_min_percent: Percent(20.0),
            discharge_efficiency: None,
            current_mode: None,
            boiler_in_use: false,
            boiler_power_kw: None,
            export_limit_kw: Some(Kilowatts(5.0)),
        };
        PlannerConfig::resolve(&Settings::default(), &telemetry).unwrap()
    }

    pub(crate) fn interval(
        pv: f64,
        load: f64,
        import_price: f64,
        export_price: f64,
    ) -> Interval {
        Interval {
            start: Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap(),
            pv: KilowattHours(pv),
            load: KilowattHours(load),
            import_price: KorunaPerKilowattHour(import_price),
            export_price: KorunaPerKilowattHour(export_price),
        }
    }

    #[test]
    fn night_discharge_stops_at_the_user_floor() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        // Just above the floor: 33% of 15.36 = 5.0688 kWh.
        let state = BatteryState { soc: KilowattHours(5.2) };
        let step = simulator.simulate(state, &interval(0.0, 0.6, 3.0, 1.0), Mode::HomeI);
        let deliverable = (5.2 - config.user_min_energy().0) * config.discharge_efficiency;
        assert_relative_eq!(step.state_after.soc.0, config.user_min_energy().0, epsilon = 1e-9);
        assert_relative_eq!(step.result.grid_import_kwh.0, 0.6 - deliverable, epsilon = 1e-9);
        assert_relative_eq!(step.shortfall.0, 0.6 - deliverable, epsilon = 1e-9);
    }

    #[test]
    fn night_at_the_hardware_floor_leaves_the_battery_alone() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        let state = BatteryState { soc: config.hw_min_energy() };
        for mode in [Mode::HomeI, Mode::HomeII, Mode::HomeIii] {
            let step = simulator.simulate(state, &interval(0.0, 0.5, 3.0, 1.0), mode);
            assert_eq!(step.result.battery_discharge_kwh, KilowattHours::ZERO);
            assert_eq!(step.result.grid_import_kwh, KilowattHours(0.5));
            assert_eq!(step.state_after.soc, config.hw_min_energy());
        }
    }

    #[test]
    fn home_i_splits_surplus_between_battery_and_export() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        let state = BatteryState { soc: KilowattHours(10.0) };
        let step = simulator.simulate(state, &interval(2.0, 0.5, 3.0, 1.0), Mode::HomeI);
        // 1.5 kWh surplus fits into the battery through the DC-DC path.
        assert_relative_eq!(step.result.battery_charge_kwh.0, 1.5 * 0.95, epsilon = 1e-9);
        assert_eq!(step.result.grid_export_kwh, KilowattHours::ZERO);
        assert_eq!(step.result.grid_import_kwh, KilowattHours::ZERO);
    }

    #[test]
    fn export_is_capped_and_the_rest_curtailed() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        // Battery nearly full: 90% of 15.36 = 13.824.
        let mut state = BatteryState { soc: KilowattHours(13.824) };
        // Midday surplus with a 5 kW export limit = 1.25 kWh per interval.
        for _ in 0..8 {
            let step = simulator.simulate(state, &interval(3.0, 0.5, 3.0, 1.0), Mode::HomeI);
            let surplus_after_battery =
                2.5 - (step.result.battery_charge_kwh.0 / config.charge_efficiency_dcdc);
            assert!(step.result.grid_export_kwh.0 <= 1.25 + 1e-9);
            assert_relative_eq!(
                step.result.curtailed_kwh.0,
                (surplus_after_battery - step.result.grid_export_kwh.0).max(0.0),
                epsilon = 1e-9,
            );
            state = step.state_after;
        }
        // Once full, the whole 2.5 kWh surplus hits the cap.
        let step = simulator.simulate(state, &interval(3.0, 0.5, 3.0, 1.0), Mode::HomeI);
        assert_eq!(state.soc, config.total_capacity);
        assert_relative_eq!(step.result.grid_export_kwh.0, 1.25, epsilon = 1e-9);
        assert_relative_eq!(step.result.curtailed_kwh.0, 1.25, epsilon = 1e-9);
    }

    #[test]
    fn boiler_redirects_before_export() {
        let mut config = test_config();
        config.boiler_enabled = true;
        config.boiler_power = Kilowatts(2.0);
        let simulator = Simulator::new(&config);
        let state = BatteryState { soc: config.total_capacity };
        let step = simulator.simulate(state, &interval(2.0, 0.5, 3.0, 1.0), Mode::HomeI);
        assert_relative_eq!(step.result.boiler_kwh.0, 0.5, epsilon = 1e-9);
        assert_relative_eq!(step.result.grid_export_kwh.0, 1.0, epsilon = 1e-9);
        assert_eq!(step.result.curtailed_kwh, KilowattHours::ZERO);
    }

    #[test]
    fn home_ii_never_touches_the_battery_for_the_deficit() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        let state = BatteryState { soc: KilowattHours(10.0) };
        let step = simulator.simulate(state, &interval(0.2, 0.8, 3.0, 1.0), Mode::HomeII);
        assert_eq!(step.result.battery_discharge_kwh, KilowattHours::ZERO);
        assert_relative_eq!(step.result.grid_import_kwh.0, 0.6, epsilon = 1e-9);
        assert_eq!(step.shortfall, KilowattHours::ZERO);
    }

    #[test]
    fn home_iii_stores_everything_and_buys_the_load() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        let state = BatteryState { soc: KilowattHours(10.0) };
        let step = simulator.simulate(state, &interval(1.0, 0.4, 3.0, 1.0), Mode::HomeIii);
        assert_relative_eq!(step.result.battery_charge_kwh.0, 0.95, epsilon = 1e-9);
        assert_eq!(step.result.grid_import_kwh, KilowattHours(0.4));
    }

    #[test]
    fn ups_charges_at_the_ac_limit() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        let state = BatteryState { soc: KilowattHours(6.0) };
        let step = simulator.simulate(state, &interval(0.0, 0.5, 2.0, 1.0), Mode::HomeUps);
        // 2.8 kW for a quarter-hour = 0.7 kWh of AC intake.
        assert_relative_eq!(step.result.grid_import_kwh.0, 0.5 + 0.7, epsilon = 1e-9);
        assert_relative_eq!(step.result.battery_charge_kwh.0, 0.7 * 0.95, epsilon = 1e-9);
    }

    #[test]
    fn ups_idles_when_full() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        let state = BatteryState { soc: config.total_capacity };
        let step = simulator.simulate(state, &interval(0.0, 0.5, 2.0, 1.0), Mode::HomeUps);
        assert_eq!(step.result.battery_charge_kwh, KilowattHours::ZERO);
        assert_eq!(step.result.grid_import_kwh, KilowattHours(0.5));
        assert_eq!(step.state_after.soc, config.total_capacity);
    }

    #[test]
    fn negative_export_prices_still_export_up_to_the_cap() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        let state = BatteryState { soc: config.total_capacity };
        let step = simulator.simulate(state, &interval(3.0, 0.5, 3.0, -0.5), Mode::HomeI);
        assert_relative_eq!(step.result.grid_export_kwh.0, 1.25, epsilon = 1e-9);
        // Exporting at a negative price costs money; curtailment above the
        // cap is the only relief.
        assert!(step.result.net_cost > Koruna(0.0));
        assert_relative_eq!(step.result.curtailed_kwh.0, 1.25, epsilon = 1e-9);
    }

    #[test]
    fn energy_is_conserved_in_every_mode() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        let cases = [
            (interval(2.0, 0.5, 3.0, 1.0), BatteryState { soc: KilowattHours(10.0) }),
            (interval(0.2, 0.8, 3.0, 1.0), BatteryState { soc: KilowattHours(6.0) }),
            (interval(0.0, 0.6, 3.0, 1.0), BatteryState { soc: KilowattHours(5.2) }),
            (interval(4.0, 0.3, 3.0, 1.0), BatteryState { soc: KilowattHours(15.0) }),
        ];
        for (interval, state) in &cases {
            for mode in Mode::ALL {
                let step = simulator.simulate(*state, interval, mode);
                let result = &step.result;
                // AC/DC conversion happens inside the battery paths; undo it
                // per path to balance the books.
                let charge_input = if mode == Mode::HomeUps {
                    // Split between the PV and AC paths is not observable from
                    // the outside; reconstruct it from the SoC delta.
                    let pv_stored = (interval.pv * config.charge_efficiency_dcdc)
                        .min(result.battery_charge_kwh);
                    pv_stored / config.charge_efficiency_dcdc
                        + (result.battery_charge_kwh - pv_stored) / config.charge_efficiency_acdc
                } else {
                    result.battery_charge_kwh / config.charge_efficiency_dcdc
                };
                let supplied = interval.pv.0
                    + result.grid_import_kwh.0
                    + result.battery_discharge_kwh.0 * config.discharge_efficiency;
                let consumed = interval.load.0
                    + result.grid_export_kwh.0
                    + result.boiler_kwh.0
                    + result.curtailed_kwh.0
                    + charge_input.0;
                assert_relative_eq!(supplied, consumed, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn sequence_tracks_the_minimum() {
        let config = test_config();
        let simulator = Simulator::new(&config);
        let intervals: Vec<_> = (0..4)
            .map(|i| {
                let mut it = interval(0.0, 0.5, 3.0, 1.0);
                it.start += Interval::LENGTH * i;
                it
            })
            .collect();
        let trajectory = simulator.simulate_sequence(
            BatteryState { soc: KilowattHours(6.0) },
            &intervals,
            &[Mode::HomeI; 4],
        );
        assert!(trajectory.soc_min < KilowattHours(6.0));
        assert_eq!(trajectory.results.len(), 4);
        assert!(trajectory.soc_min >= config.user_min_energy() - SOC_EPSILON);
    }
}
