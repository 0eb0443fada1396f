use enumset::EnumSet;

use crate::{
    config::PlannerConfig,
    core::{
        interval::Interval,
        mode::Mode,
        simulator::{BatteryState, SOC_EPSILON, Simulator, Trajectory},
    },
    plan::{Intent, PlanIntervalResult},
    prelude::*,
    quantity::{Zero, cost::Koruna, energy::KilowattHours},
};

/// Shortest allowed run of any mode other than HOME I.
pub const MIN_DWELL: usize = 2;

/// Flat credit a merged gap earns for not flapping the inverter.
pub const STABILITY_CREDIT: Koruna = Koruna(2.0);

/// How many UPS insertions the floor-repair loop may attempt.
pub const MAX_REPAIR_ITERATIONS: usize = 10;

/// Intervals producing more PV than this never receive grid charging: UPS
/// would waste free solar there.
pub const UPS_PV_EXCLUSION: KilowattHours = KilowattHours(0.5);

/// Rewrite every too-short non-HOME-I run back to HOME I. Pinned intervals
/// are left alone.
pub fn enforce_min_dwell(modes: &mut [Mode], reasons: &mut [&'static str], pinned: &[bool]) {
    let mut start = 0;
    while start < modes.len() {
        let mode = modes[start];
        let mut end = start + 1;
        while end < modes.len() && modes[end] == mode {
            end += 1;
        }
        if mode != Mode::HomeI
            && end - start < MIN_DWELL
            && !pinned[start..end].iter().any(|pin| *pin)
        {
            for position in start..end {
                modes[position] = Mode::HomeI;
                reasons[position] = "min-dwell";
            }
        }
        start = end;
    }
}

/// Pin every interval intersecting the intent's holding window to the
/// holding mode. Later passes must not touch these.
pub fn pin_holding_window(
    intervals: &[Interval],
    intent: &Intent,
    modes: &mut [Mode],
    reasons: &mut [&'static str],
    pinned: &mut [bool],
) {
    if intent.holding_end <= intent.holding_start {
        return;
    }
    let holding_mode = intent.holding_mode();
    for (position, interval) in intervals.iter().enumerate() {
        if interval.intersects(intent.holding_start, intent.holding_end) {
            modes[position] = holding_mode;
            reasons[position] = "holding-window";
            pinned[position] = true;
        }
    }
}

/// Swallow 1–2 interval HOME I gaps between runs of the same mode when the
/// stability credit outweighs the extra cost, measured by re-simulating the
/// suffix with and without the merge.
pub fn merge_gaps(
    simulator: &Simulator<'_>,
    intervals: &[Interval],
    initial: BatteryState,
    modes: &mut Vec<Mode>,
    reasons: &mut [&'static str],
    pinned: &[bool],
) {
    let mut from = 0;
    while let Some((gap_start, gap_end, mode)) = find_mergeable_gap(modes, pinned, from) {
        let state_before_gap = if gap_start == 0 {
            initial
        } else {
            simulator
                .simulate_sequence(initial, &intervals[..gap_start], &modes[..gap_start])
                .final_state
        };
        let kept_cost = simulator
            .simulate_sequence(state_before_gap, &intervals[gap_start..], &modes[gap_start..])
            .total_cost;
        let mut merged_suffix = modes[gap_start..].to_vec();
        for slot in &mut merged_suffix[..gap_end - gap_start] {
            *slot = mode;
        }
        let merged_cost = simulator
            .simulate_sequence(state_before_gap, &intervals[gap_start..], &merged_suffix)
            .total_cost;
        if STABILITY_CREDIT > merged_cost - kept_cost {
            for position in gap_start..gap_end {
                modes[position] = mode;
                reasons[position] = "gap-merge";
            }
            // A merge fuses runs and can expose a new candidate to the left.
            from = 0;
        } else {
            from = gap_end;
        }
    }
}

/// Leftmost HOME I gap of length 1–2 framed by the same non-HOME-I mode,
/// starting the scan at `from`.
fn find_mergeable_gap(
    modes: &[Mode],
    pinned: &[bool],
    from: usize,
) -> Option<(usize, usize, Mode)> {
    let mut start = from;
    while start < modes.len() {
        let mode = modes[start];
        let mut end = start + 1;
        while end < modes.len() && modes[end] == mode {
            end += 1;
        }
        if mode == Mode::HomeI
            && start > 0
            && end < modes.len()
            && end - start <= 2
            && modes[start - 1] == modes[end]
            && modes[end] != Mode::HomeI
            && !pinned[start..end].iter().any(|pin| *pin)
        {
            return Some((start, end, modes[end]));
        }
        start = end;
    }
    None
}

/// Outcome of the floor-repair pass.
#[must_use]
pub struct FloorRepair {
    pub trajectory: Trajectory,
    /// Intervals still below the user floor after all repair iterations.
    pub min_capacity_violations: u32,
    /// Timeline entries whose reported SoC had to be lifted to the floor.
    pub clamp_events: u32,
}

/// Insert grid charging at the cheapest eligible intervals until the user
/// floor holds, up to [`MAX_REPAIR_ITERATIONS`] attempts. When repair fails,
/// the reported trajectory is clamped to the floor and the violation count
/// carried in the result.
pub fn repair_floor(
    simulator: &Simulator<'_>,
    intervals: &[Interval],
    initial: BatteryState,
    modes: &mut [Mode],
    reasons: &mut [&'static str],
    pinned: &[bool],
    allowed_modes: EnumSet<Mode>,
) -> FloorRepair {
    let user_min = simulator.config.user_min_energy();
    for _ in 0..MAX_REPAIR_ITERATIONS {
        let trajectory = simulator.simulate_sequence(initial, intervals, modes);
        let violations: Vec<usize> = trajectory
            .results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.soc_after_kwh < user_min - SOC_EPSILON)
            .map(|(position, _)| position)
            .collect();
        if violations.is_empty() {
            return FloorRepair { trajectory, min_capacity_violations: 0, clamp_events: 0 };
        }
        if !allowed_modes.contains(Mode::HomeUps) {
            break;
        }
        // The first violation whose prefix still has somewhere to charge;
        // an underwater start leaves the earliest intervals unfixable.
        let pick = violations.iter().find_map(|&violation| {
            let mut candidates: Vec<usize> = (0..=violation)
                .filter(|&position| {
                    modes[position] != Mode::HomeUps
                        && !pinned[position]
                        && intervals[position].pv <= UPS_PV_EXCLUSION
                })
                .collect();
            candidates.sort_by_key(|&position| (intervals[position].import_price, position));
            candidates.first().copied()
        });
        let Some(pick) = pick else {
            break;
        };
        modes[pick] = Mode::HomeUps;
        reasons[pick] = "floor-repair";
        extend_isolated_run(intervals, modes, reasons, pinned, pick);
    }

    // Out of repair attempts: report the floor, keep the modes.
    let mut trajectory = simulator.simulate_sequence(initial, intervals, modes);
    let mut violations = 0;
    for result in &mut trajectory.results {
        if result.soc_after_kwh < user_min - SOC_EPSILON {
            violations += 1;
            result.soc_after_kwh = user_min;
            result.soc_after_percent = simulator.config.user_min_percent;
        }
    }
    if violations > 0 {
        warn!(violations, "the floor repair could not lift every interval above the user floor");
    }
    FloorRepair { trajectory, min_capacity_violations: violations, clamp_events: violations }
}

/// Clamp export and UPS charge flows of a finished timeline to the
/// configured caps. Pure over the plan data; returns how many entries were
/// touched. The simulator never produces such values on its own, so a
/// non-zero count means a bug upstream.
pub fn clamp_caps(
    config: &PlannerConfig,
    intervals: &[Interval],
    timeline: &mut [PlanIntervalResult],
) -> u32 {
    let export_cap = config.export_cap_per_interval();
    let charge_cap = config.ac_charge_per_interval();
    let mut clamped = 0;
    for (interval, entry) in intervals.iter().zip(timeline.iter_mut()) {
        let mut touched = false;
        if entry.grid_export_kwh > export_cap + SOC_EPSILON {
            entry.curtailed_kwh += entry.grid_export_kwh - export_cap;
            entry.grid_export_kwh = export_cap;
            touched = true;
        }
        if entry.mode == Mode::HomeUps {
            let intake = entry.grid_import_kwh - interval.load;
            if intake > charge_cap + SOC_EPSILON {
                let excess = intake - charge_cap;
                entry.grid_import_kwh -= excess;
                entry.battery_charge_kwh = (entry.battery_charge_kwh
                    - excess * config.charge_efficiency_acdc)
                    .max(KilowattHours::ZERO);
                touched = true;
            }
        }
        if touched {
            clamped += 1;
        }
    }
    clamped
}

/// A single inserted UPS interval would violate the dwell rule; pull the
/// cheaper eligible neighbor in as well.
fn extend_isolated_run(
    intervals: &[Interval],
    modes: &mut [Mode],
    reasons: &mut [&'static str],
    pinned: &[bool],
    position: usize,
) {
    let already_paired = (position > 0 && modes[position - 1] == modes[position])
        || (position + 1 < modes.len() && modes[position + 1] == modes[position]);
    if already_paired {
        return;
    }
    let eligible = |neighbor: usize| {
        neighbor < modes.len()
            && !pinned[neighbor]
            && intervals[neighbor].pv <= UPS_PV_EXCLUSION
    };
    let left = position.checked_sub(1).filter(|&neighbor| eligible(neighbor));
    let right = Some(position + 1).filter(|&neighbor| eligible(neighbor));
    let neighbor = match (left, right) {
        (Some(left), Some(right)) => {
            if intervals[left].import_price <= intervals[right].import_price {
                Some(left)
            } else {
                Some(right)
            }
        }
        (Some(left), None) => Some(left),
        (None, Some(right)) => Some(right),
        (None, None) => None,
    };
    if let Some(neighbor) = neighbor {
        modes[neighbor] = modes[position];
        reasons[neighbor] = "floor-repair";
    }
}
