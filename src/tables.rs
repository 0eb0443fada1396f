use comfy_table::{Attribute, Cell, CellAlignment, Color, Table, modifiers, presets};

use crate::{
    balancing::BalancingStatus,
    core::mode::Mode,
    plan::{Plan, PlanIntervalResult},
    quantity::cost::Koruna,
};

fn mode_color(mode: Mode) -> Color {
    match mode {
        Mode::HomeI => Color::Reset,
        Mode::HomeII => Color::Magenta,
        Mode::HomeIii => Color::DarkYellow,
        Mode::HomeUps => Color::Green,
    }
}

#[must_use]
pub fn build_timeline_table(plan: &Plan) -> Table {
    let mean_price = {
        let prices: Vec<f64> = plan
            .timeline
            .iter()
            .filter(|entry| entry.grid_import_kwh.0 > 0.0)
            .map(|entry| entry.net_cost.0 / entry.grid_import_kwh.0)
            .collect();
        if prices.is_empty() { 0.0 } else { prices.iter().sum::<f64>() / prices.len() as f64 }
    };

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.enforce_styling();
    table.set_header(vec![
        "Start", "Mode", "SoC", "Import", "Export", "Charge", "Discharge", "Cost", "Reason",
    ]);
    for entry in &plan.timeline {
        table.add_row(timeline_row(entry, mean_price));
    }
    table
}

fn timeline_row(entry: &PlanIntervalResult, mean_price: f64) -> Vec<Cell> {
    vec![
        Cell::new(entry.start.format("%b-%d %H:%M")),
        Cell::new(entry.mode).fg(mode_color(entry.mode)),
        Cell::new(format!("{} ({:?})", entry.soc_after_kwh, entry.soc_after_percent))
            .set_alignment(CellAlignment::Right),
        Cell::new(entry.grid_import_kwh).set_alignment(CellAlignment::Right),
        Cell::new(entry.grid_export_kwh).set_alignment(CellAlignment::Right),
        Cell::new(entry.battery_charge_kwh).set_alignment(CellAlignment::Right),
        Cell::new(entry.battery_discharge_kwh).set_alignment(CellAlignment::Right),
        Cell::new(entry.net_cost).set_alignment(CellAlignment::Right).fg(
            if entry.net_cost >= Koruna::ONE_HALER
                && entry.grid_import_kwh.0 > 0.0
                && entry.net_cost.0 / entry.grid_import_kwh.0 > mean_price
            {
                Color::Red
            } else if entry.net_cost < Koruna(0.0) {
                Color::Green
            } else {
                Color::Reset
            },
        ),
        Cell::new(&entry.reason).add_attribute(Attribute::Dim),
    ]
}

#[must_use]
pub fn build_plans_table(plans: &[Plan]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.enforce_styling();
    table.set_header(vec![
        "Id", "Kind", "Status", "Created", "Deadline", "Locked", "Cost", "Final SoC", "Compliant",
    ]);
    for plan in plans {
        table.add_row(vec![
            Cell::new(&plan.id),
            Cell::new(format!("{:?}", plan.kind)),
            Cell::new(format!("{:?}", plan.status)),
            Cell::new(plan.created_at.format("%b-%d %H:%M")),
            Cell::new(plan.deadline.format("%b-%d %H:%M")),
            Cell::new(if plan.locked { "yes" } else { "" }),
            Cell::new(plan.metadata.total_cost).set_alignment(CellAlignment::Right),
            Cell::new(plan.metadata.final_soc_kwh).set_alignment(CellAlignment::Right),
            Cell::new(if plan.metadata.min_capacity_violations == 0 { "yes" } else { "NO" }).fg(
                if plan.metadata.min_capacity_violations == 0 {
                    Color::Green
                } else {
                    Color::Red
                },
            ),
        ]);
    }
    table
}

#[must_use]
pub fn build_balancing_table(status: &BalancingStatus) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.enforce_styling();
    table.set_header(vec!["State", "Days since", "Last", "Next deadline", "Window", "Mode"]);
    table.add_row(vec![
        Cell::new(status.state),
        Cell::new(
            status.days_since_last.map_or_else(|| "never".to_string(), |days| days.to_string()),
        ),
        Cell::new(
            status
                .last_balancing
                .map_or_else(|| "-".to_string(), |last| last.format("%b-%d %H:%M").to_string()),
        ),
        Cell::new(
            status
                .next_deadline
                .map_or_else(|| "-".to_string(), |next| next.format("%b-%d %H:%M").to_string()),
        ),
        Cell::new(status.planned_window.map_or_else(
            || "-".to_string(),
            |(start, end)| format!("{} – {}", start.format("%b-%d %H:%M"), end.format("%H:%M")),
        )),
        Cell::new(status.mode.map_or_else(|| "-".to_string(), |mode| mode.to_string())),
    ]);
    table
}
