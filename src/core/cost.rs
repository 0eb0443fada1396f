use crate::{
    core::{
        interval::Interval,
        mode::Mode,
        simulator::{BatteryState, Simulator},
    },
    quantity::{cost::Koruna, rate::KorunaPerKilowattHour},
};

/// Cost of running the whole horizon in HOME I, the yardstick every
/// candidate plan is measured against.
pub fn baseline_cost(
    simulator: &Simulator<'_>,
    initial: BatteryState,
    intervals: &[Interval],
) -> Koruna {
    let modes = vec![Mode::HomeI; intervals.len()];
    simulator.simulate_sequence(initial, intervals, &modes).total_cost
}

/// How much the candidate saves against the do-nothing baseline.
#[must_use]
pub fn opportunity(baseline: Koruna, candidate: Koruna) -> Koruna {
    baseline - candidate
}

/// Arithmetic mean of the import prices over the given intervals.
#[must_use]
pub fn mean_import_price(intervals: &[Interval]) -> KorunaPerKilowattHour {
    if intervals.is_empty() {
        return KorunaPerKilowattHour(0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let count = intervals.len() as f64;
    let total: f64 = intervals.iter().map(|interval| interval.import_price.0).sum();
    KorunaPerKilowattHour(total / count)
}
