pub mod summary;

use crate::config::{ReconstructionConfig, TrajectoryMode};
use crate::corpus::{EXCITATION_ENERGY_DATASET, OSCILLATOR_STRENGTH_DATASET, POPULATION_DATASET};
use crate::domain::{QextractError, StoreOrder, time_label};
use crate::store::{HierarchicalStore, join_path};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpectrumError {
    #[error("wavelength axis is empty")]
    EmptyWavelengthAxis,
    #[error("no trajectories found in store")]
    NoTrajectories,
    #[error("no time steps found in store")]
    NoTimes,
}

impl From<SpectrumError> for QextractError {
    fn from(error: SpectrumError) -> Self {
        let message = error.to_string();
        match error {
            SpectrumError::EmptyWavelengthAxis => {
                QextractError::input_validation("INPUT.WAVELENGTH_AXIS", message)
            }
            SpectrumError::NoTrajectories | SpectrumError::NoTimes => {
                QextractError::computation("RUN.EMPTY_STORE", message)
            }
        }
    }
}

/// `o / (1 + ((x - e) / (w/2))^2)`, zero when either input is NaN or `o == 0`.
pub fn lorentzian(x: f64, energy: f64, strength: f64, half_width: f64) -> f64 {
    if energy.is_nan() || strength.is_nan() || strength == 0.0 {
        return 0.0;
    }
    let scaled = (x - energy) / (half_width / 2.0);
    strength / (1.0 + scaled * scaled)
}

pub fn line_spectrum(
    wavelengths: &Array1<f64>,
    energies: &[f64],
    strengths: &[f64],
    half_width: f64,
) -> Array1<f64> {
    let mut spectrum = Array1::<f64>::zeros(wavelengths.len());
    for (&energy, &strength) in energies.iter().zip(strengths) {
        spectrum.zip_mut_with(wavelengths, |value, &x| {
            *value += lorentzian(x, energy, strength, half_width);
        });
    }
    spectrum
}

/// Store name of the pump state reached from population index `index`.
pub fn pump_state_label(index: usize, offset: usize) -> String {
    format!("{}_(1)_A", index + offset)
}

/// Indices of hard-occupied states (`pop == 1`).
pub fn occupied_states(population: &[f64]) -> impl Iterator<Item = usize> + '_ {
    population
        .iter()
        .enumerate()
        .filter(|(_, value)| **value == 1.0)
        .map(|(index, _)| index)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconstructionRequest {
    pub wavelengths: Vec<f64>,
    /// Discovered from the store when absent.
    pub times: Option<Vec<f64>>,
    /// Discovered from the store when absent.
    pub trajectories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconstructionDiagnostics {
    pub ragged_times: bool,
    /// `(time, trajectory)` nodes without a population dataset.
    pub missing_nodes: usize,
    /// Occupied states whose pump-probe datasets are absent.
    pub missing_states: usize,
}

pub struct SpectrumReconstructor<'a> {
    store: &'a HierarchicalStore,
    config: ReconstructionConfig,
}

impl<'a> SpectrumReconstructor<'a> {
    pub fn new(store: &'a HierarchicalStore, config: ReconstructionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    pub fn reconstruct(
        &self,
        request: &ReconstructionRequest,
    ) -> Result<TransientAbsorption, SpectrumError> {
        if request.wavelengths.is_empty() {
            return Err(SpectrumError::EmptyWavelengthAxis);
        }
        let mut diagnostics = ReconstructionDiagnostics::default();

        let times = match &request.times {
            Some(times) => times.clone(),
            None => self.discover_times(&mut diagnostics),
        };
        if times.is_empty() {
            return Err(SpectrumError::NoTimes);
        }
        let time_labels: Vec<String> = times
            .iter()
            .map(|time| time_label(*time, self.config.time_precision))
            .collect();

        let trajectories = match &request.trajectories {
            Some(trajectories) => trajectories.clone(),
            None => self.discover_trajectories(&time_labels),
        };
        if trajectories.is_empty() {
            return Err(SpectrumError::NoTrajectories);
        }

        let wavelengths = Array1::from_vec(request.wavelengths.clone());
        let mut tensor = Array3::<f64>::zeros((times.len(), wavelengths.len(), trajectories.len()));
        for (column, trajectory) in trajectories.iter().enumerate() {
            for (row, label) in time_labels.iter().enumerate() {
                let spectrum = self.node_spectrum(trajectory, label, &wavelengths, &mut diagnostics);
                tensor.slice_mut(s![row, .., column]).assign(&spectrum);
            }
        }
        debug!(
            times = times.len(),
            trajectories = trajectories.len(),
            wavelengths = wavelengths.len(),
            "reconstructed transient absorption tensor"
        );

        Ok(TransientAbsorption {
            tensor,
            times,
            time_labels,
            wavelengths,
            trajectories,
            diagnostics,
        })
    }

    /// The most complete time axis across trajectories.
    pub fn discover_times(&self, diagnostics: &mut ReconstructionDiagnostics) -> Vec<f64> {
        let top_level = self.store.keys("").unwrap_or_default();
        match self.config.store_order {
            StoreOrder::TimeMajor => numeric_keys(&top_level),
            StoreOrder::TrajectoryMajor => {
                let axes: Vec<Vec<f64>> = top_level
                    .iter()
                    .map(|trajectory| numeric_keys(&self.store.keys(trajectory).unwrap_or_default()))
                    .collect();
                if axes.windows(2).any(|pair| pair[0] != pair[1]) {
                    warn!("trajectories do not share the same time steps");
                    diagnostics.ragged_times = true;
                }
                axes.into_iter()
                    .reduce(|best, axis| if axis.len() > best.len() { axis } else { best })
                    .unwrap_or_default()
            }
        }
    }

    pub fn discover_trajectories(&self, time_labels: &[String]) -> Vec<String> {
        let order = self.config.store_order;
        let candidates: BTreeSet<String> = match order {
            StoreOrder::TrajectoryMajor => self
                .store
                .keys("")
                .unwrap_or_default()
                .into_iter()
                .map(str::to_string)
                .collect(),
            StoreOrder::TimeMajor => time_labels
                .iter()
                .filter_map(|time| self.store.keys(time))
                .flatten()
                .map(str::to_string)
                .collect(),
        };

        match self.config.trajectory_mode {
            TrajectoryMode::All => candidates.into_iter().collect(),
            TrajectoryMode::Strict => candidates
                .into_iter()
                .filter(|trajectory| {
                    time_labels.iter().all(|time| {
                        self.store
                            .is_group(&join_path(&order.segments(trajectory, time)))
                    })
                })
                .collect(),
        }
    }

    fn node_spectrum(
        &self,
        trajectory: &str,
        time: &str,
        wavelengths: &Array1<f64>,
        diagnostics: &mut ReconstructionDiagnostics,
    ) -> Array1<f64> {
        let group = join_path(&self.config.store_order.segments(trajectory, time));
        let mut spectrum = Array1::<f64>::zeros(wavelengths.len());

        let Some(population) = self.store.dataset(&format!("{group}/{POPULATION_DATASET}")) else {
            warn!(node = %group, "no population at store node");
            diagnostics.missing_nodes += 1;
            return spectrum;
        };

        for index in occupied_states(population) {
            let state = pump_state_label(index, self.config.state_label_offset);
            let energies = self
                .store
                .dataset(&format!("{group}/{state}/{EXCITATION_ENERGY_DATASET}"));
            let strengths = self
                .store
                .dataset(&format!("{group}/{state}/{OSCILLATOR_STRENGTH_DATASET}"));
            match (energies, strengths) {
                (Some(energies), Some(strengths)) => {
                    spectrum += &line_spectrum(wavelengths, energies, strengths, self.config.half_width);
                }
                _ => {
                    warn!(node = %group, %state, "occupied state missing from store");
                    diagnostics.missing_states += 1;
                }
            }
        }
        spectrum
    }
}

fn numeric_keys(keys: &[&str]) -> Vec<f64> {
    let mut values: Vec<f64> = keys
        .iter()
        .filter_map(|key| key.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .collect();
    values.sort_by(f64::total_cmp);
    values.dedup();
    values
}

/// Reconstructed tensor with its coordinate axes.
#[derive(Debug, Clone, PartialEq)]
pub struct TransientAbsorption {
    tensor: Array3<f64>,
    times: Vec<f64>,
    time_labels: Vec<String>,
    wavelengths: Array1<f64>,
    trajectories: Vec<String>,
    diagnostics: ReconstructionDiagnostics,
}

impl TransientAbsorption {
    /// `[time, wavelength, trajectory]`.
    pub fn tensor(&self) -> &Array3<f64> {
        &self.tensor
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn time_labels(&self) -> &[String] {
        &self.time_labels
    }

    pub fn wavelengths(&self) -> &Array1<f64> {
        &self.wavelengths
    }

    pub fn trajectories(&self) -> &[String] {
        &self.trajectories
    }

    pub fn diagnostics(&self) -> ReconstructionDiagnostics {
        self.diagnostics
    }

    /// Sum over the trajectory axis, `[time, wavelength]`.
    pub fn spectrum_map(&self) -> Array2<f64> {
        self.tensor.sum_axis(Axis(2))
    }

    pub fn trajectory_map(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        (index < self.trajectories.len()).then(|| self.tensor.index_axis(Axis(2), index))
    }

    pub fn convergence(
        &self,
        threshold: f64,
        normalization: Normalization,
        metric: ErrorMetric,
    ) -> ConvergenceOutcome {
        detect_convergence(&self.tensor, threshold, normalization, metric)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    Frobenius,
    Max,
}

impl Normalization {
    /// Scales `map` to unit norm; an all-zero map is returned unchanged.
    pub fn apply(self, map: &Array2<f64>) -> Array2<f64> {
        let norm = match self {
            Self::Frobenius => frobenius_norm(map),
            Self::Max => map.iter().fold(0.0_f64, |max, value| max.max(value.abs())),
        };
        if norm > 0.0 && norm.is_finite() {
            map / norm
        } else {
            map.clone()
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Frobenius => "frobenius",
            Self::Max => "max",
        }
    }
}

impl FromStr for Normalization {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "frobenius" | "fro" => Ok(Self::Frobenius),
            "max" => Ok(Self::Max),
            other => Err(format!("unknown normalization '{other}' (expected frobenius or max)")),
        }
    }
}

impl Display for Normalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMetric {
    MeanAbsolute,
    /// Entries whose reference value is zero are left out of the mean.
    MeanRelative,
    #[default]
    FrobeniusDistance,
}

impl ErrorMetric {
    pub fn evaluate(self, reference: &Array2<f64>, candidate: &Array2<f64>) -> f64 {
        match self {
            Self::MeanAbsolute => (reference - candidate).mapv(f64::abs).mean().unwrap_or(0.0),
            Self::MeanRelative => {
                let (sum, count) = reference
                    .iter()
                    .zip(candidate.iter())
                    .filter(|(reference, _)| **reference != 0.0)
                    .fold((0.0, 0_usize), |(sum, count), (reference, candidate)| {
                        (sum + ((reference - candidate) / reference).abs(), count + 1)
                    });
                if count == 0 { 0.0 } else { sum / count as f64 }
            }
            Self::FrobeniusDistance => frobenius_norm(&(reference - candidate)),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MeanAbsolute => "mean_absolute",
            Self::MeanRelative => "mean_relative",
            Self::FrobeniusDistance => "frobenius_distance",
        }
    }
}

impl FromStr for ErrorMetric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "mean_absolute" | "mae" => Ok(Self::MeanAbsolute),
            "mean_relative" | "relative" => Ok(Self::MeanRelative),
            "frobenius_distance" | "frobenius" => Ok(Self::FrobeniusDistance),
            other => Err(format!(
                "unknown error metric '{other}' (expected mean_absolute, mean_relative or frobenius_distance)"
            )),
        }
    }
}

impl Display for ErrorMetric {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn frobenius_norm(map: &Array2<f64>) -> f64 {
    map.iter().map(|value| value * value).sum::<f64>().sqrt()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConvergenceOutcome {
    Converged {
        /// Number of trajectories in the partial sum that met the threshold.
        trajectories: usize,
        error: f64,
        map: Array2<f64>,
    },
    NotConverged {
        trajectories: usize,
        last_error: Option<f64>,
    },
}

impl ConvergenceOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }
}

/// Compares normalized partial sums over trajectories `1..k-1` and `1..k`
/// for increasing `k` and stops at the first `k` whose error is below
/// `threshold`.
pub fn detect_convergence(
    tensor: &Array3<f64>,
    threshold: f64,
    normalization: Normalization,
    metric: ErrorMetric,
) -> ConvergenceOutcome {
    let count = tensor.len_of(Axis(2));
    if count == 0 {
        return ConvergenceOutcome::NotConverged {
            trajectories: 0,
            last_error: None,
        };
    }

    let mut running = tensor.index_axis(Axis(2), 0).to_owned();
    let mut previous = normalization.apply(&running);
    let mut last_error = None;

    for k in 2..=count {
        running += &tensor.index_axis(Axis(2), k - 1);
        let current = normalization.apply(&running);
        let error = metric.evaluate(&previous, &current);
        last_error = Some(error);
        if error < threshold {
            return ConvergenceOutcome::Converged {
                trajectories: k,
                error,
                map: current,
            };
        }
        previous = current;
    }

    ConvergenceOutcome::NotConverged {
        trajectories: count,
        last_error,
    }
}
