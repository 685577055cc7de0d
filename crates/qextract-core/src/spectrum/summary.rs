use super::{occupied_states, pump_state_label};
use crate::config::ReconstructionConfig;
use crate::corpus::{EXCITATION_ENERGY_DATASET, OSCILLATOR_STRENGTH_DATASET, POPULATION_DATASET};
use crate::domain::time_label;
use crate::store::{HierarchicalStore, join_path};
use std::fs;
use std::path::Path;

pub const SUMMARY_HEADER: &str = "time\tstate";

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub time_label: String,
    /// Absent when the node, its population or the state datasets are missing.
    pub state: Option<OccupiedState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OccupiedState {
    /// Population index, printed as `S{index}`.
    pub index: usize,
    pub excitation_energies: Vec<f64>,
    pub oscillator_strengths: Vec<f64>,
}

/// `start, start + step, ...` strictly below `end`.
pub fn time_range(start: f64, end: f64, step: f64) -> Vec<f64> {
    if step.is_nan() || step <= 0.0 || !start.is_finite() || !end.is_finite() {
        return Vec::new();
    }
    (0_usize..)
        .map(|index| start + index as f64 * step)
        .take_while(|time| *time < end)
        .collect()
}

pub fn trajectory_summary(
    store: &HierarchicalStore,
    trajectory: &str,
    times: &[f64],
    config: &ReconstructionConfig,
) -> Vec<SummaryRow> {
    times
        .iter()
        .map(|time| {
            let label = time_label(*time, config.time_precision);
            let group = join_path(&config.store_order.segments(trajectory, &label));
            SummaryRow {
                state: occupied_state(store, &group, config.state_label_offset),
                time_label: label,
            }
        })
        .collect()
}

fn occupied_state(store: &HierarchicalStore, group: &str, offset: usize) -> Option<OccupiedState> {
    let population = store.dataset(&format!("{group}/{POPULATION_DATASET}"))?;
    let mut occupied = occupied_states(population);
    let index = occupied.next()?;
    if occupied.next().is_some() {
        return None;
    }

    let state = pump_state_label(index, offset);
    Some(OccupiedState {
        index,
        excitation_energies: store
            .dataset(&format!("{group}/{state}/{EXCITATION_ENERGY_DATASET}"))?
            .to_vec(),
        oscillator_strengths: store
            .dataset(&format!("{group}/{state}/{OSCILLATOR_STRENGTH_DATASET}"))?
            .to_vec(),
    })
}

/// Tab-separated table; energies with two decimals, strengths with four.
pub fn render_trajectory_summary(rows: &[SummaryRow]) -> String {
    let mut output = String::from(SUMMARY_HEADER);
    output.push('\n');

    for row in rows {
        output.push_str(&row.time_label);
        if let Some(state) = &row.state {
            output.push_str(&format!("\tS{}", state.index));
            for (energy, strength) in state
                .excitation_energies
                .iter()
                .zip(&state.oscillator_strengths)
            {
                output.push_str(&format!("\t{energy:.2}\t{strength:.4}"));
            }
        }
        output.push('\n');
    }
    output
}

pub fn write_trajectory_summary(path: &Path, rows: &[SummaryRow]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_trajectory_summary(rows))
}
