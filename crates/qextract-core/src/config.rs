use crate::domain::{QextractError, StoreOrder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_FILE_PATTERN: &str = "*.out";
pub const DEFAULT_LAYOUT: &str = "TRAJ/TIME";
pub const DEFAULT_POPULATION_SUFFIX: &str = "_pop.dat";
pub const DEFAULT_TIME_PRECISION: usize = 1;
pub const DEFAULT_HALF_WIDTH: f64 = 0.4;
pub const DEFAULT_STATE_LABEL_OFFSET: usize = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<ConfigError> for QextractError {
    fn from(error: ConfigError) -> Self {
        let message = error.to_string();
        match error {
            ConfigError::Read { .. } => QextractError::io_system("IO.CONFIG_READ", message),
            ConfigError::Parse { .. } => QextractError::input_validation("INPUT.CONFIG", message),
        }
    }
}

/// Settings for converting a directory of outputs into a store.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorpusConfig {
    /// Glob matched against file names only.
    pub file_pattern: String,
    /// Role of each directory segment below the scan root, e.g. `TRAJ/TIME`.
    pub layout: String,
    pub store_order: StoreOrder,
    /// Where `<id>_pop.dat` files live; the scan root when unset.
    pub population_dir: Option<PathBuf>,
    pub population_suffix: String,
    pub time_precision: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            layout: DEFAULT_LAYOUT.to_string(),
            store_order: StoreOrder::default(),
            population_dir: None,
            population_suffix: DEFAULT_POPULATION_SUFFIX.to_string(),
            time_precision: DEFAULT_TIME_PRECISION,
        }
    }
}

/// How trajectories are discovered when none are listed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryMode {
    /// Every top-level trajectory in the store.
    #[default]
    All,
    /// Only trajectories present at every requested time.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconstructionConfig {
    pub half_width: f64,
    pub store_order: StoreOrder,
    pub trajectory_mode: TrajectoryMode,
    pub time_precision: usize,
    /// Added to a population index to name its pump state (`{i+offset}_(1)_A`).
    pub state_label_offset: usize,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            half_width: DEFAULT_HALF_WIDTH,
            store_order: StoreOrder::default(),
            trajectory_mode: TrajectoryMode::default(),
            time_precision: DEFAULT_TIME_PRECISION,
            state_label_offset: DEFAULT_STATE_LABEL_OFFSET,
        }
    }
}

pub fn load_config_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
