use super::CliError;
use anyhow::Context;
use ndarray::Array1;
use qextract_core::domain::StoreOrder;
use qextract_core::spectrum::TransientAbsorption;
use qextract_core::store::HierarchicalStore;
use std::fmt::Write as _;
use std::path::Path;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Installs the stderr subscriber. `RUST_LOG` overrides the flag-derived level.
pub(super) fn setup_logging(verbosity: u8, quiet: bool) {
    let default_level = if quiet {
        LevelFilter::ERROR
    } else {
        match verbosity {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    // In-process callers may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init();
}

pub(super) fn parse_store_order(value: &str) -> Result<StoreOrder, String> {
    StoreOrder::parse(value).ok_or_else(|| {
        format!("unknown store order '{value}' (expected trajectory_major or time_major)")
    })
}

/// `points` evenly spaced values from `start` to `end`, both included.
pub(super) fn linspace(start: f64, end: f64, points: usize) -> Vec<f64> {
    Array1::linspace(start, end, points).to_vec()
}

pub(super) fn load_store(path: &Path) -> Result<HierarchicalStore, CliError> {
    HierarchicalStore::load(path).map_err(CliError::compute)
}

/// First row: wavelengths after a `time` corner cell; then one row per time label.
pub(super) fn render_spectrum_map(absorption: &TransientAbsorption) -> String {
    let map = absorption.spectrum_map();
    let mut output = String::from("time");
    for wavelength in absorption.wavelengths() {
        let _ = write!(output, " {wavelength:.6}");
    }
    output.push('\n');

    for (label, row) in absorption.time_labels().iter().zip(map.rows()) {
        output.push_str(label);
        for value in row {
            let _ = write!(output, " {value:.8e}");
        }
        output.push('\n');
    }
    output
}

pub(super) fn write_output_file(path: &Path, content: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory '{}'", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{linspace, parse_store_order};
    use qextract_core::domain::StoreOrder;

    #[test]
    fn linspace_includes_both_ends() {
        assert_eq!(linspace(280.0, 290.0, 3), vec![280.0, 285.0, 290.0]);
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
        assert!(linspace(1.0, 2.0, 0).is_empty());
    }

    #[test]
    fn store_order_flag_accepts_both_spellings() {
        assert_eq!(parse_store_order("time_major"), Ok(StoreOrder::TimeMajor));
        assert_eq!(parse_store_order("TRAJ/TIME"), Ok(StoreOrder::TrajectoryMajor));
        assert!(parse_store_order("sideways").is_err());
    }
}
