use crate::config::CorpusConfig;
use crate::domain::{QextractError, StoreOrder, store_segment, time_label};
use crate::extract::{PumpProbeTable, extract_file};
use crate::store::{HierarchicalStore, StoreError, join_path};
use globset::{Glob, GlobMatcher};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const EXCITATION_ENERGY_DATASET: &str = "exc_energy";
pub const OSCILLATOR_STRENGTH_DATASET: &str = "osc_strength";
pub const POPULATION_DATASET: &str = "pop";

const TRAJECTORY_ROLE: &str = "TRAJ";
const TIME_ROLE: &str = "TIME";

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("failed to read directory '{}': {source}", path.display())]
    ReadDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid file pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },
    #[error("invalid directory layout '{layout}': {reason}")]
    InvalidLayout { layout: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CorpusError> for QextractError {
    fn from(error: CorpusError) -> Self {
        let message = error.to_string();
        match error {
            CorpusError::Store(source) => source.into(),
            CorpusError::ReadDirectory { .. } => {
                QextractError::io_system("IO.CORPUS_DIRECTORY", message)
            }
            CorpusError::InvalidPattern { .. } | CorpusError::InvalidLayout { .. } => {
                QextractError::input_validation("INPUT.CORPUS_CONFIG", message)
            }
        }
    }
}

/// Which relative path segments name the trajectory and the time step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusLayout {
    trajectory_position: usize,
    time_position: usize,
    /// Suffix removed from the file-name segment, e.g. `.out`.
    extension: Option<String>,
}

impl CorpusLayout {
    /// Parses a `/`-separated role list such as `TRAJ/TIME` or `run/TIME/TRAJ`.
    pub fn parse(layout: &str) -> Result<Self, CorpusError> {
        let invalid = |reason: &str| CorpusError::InvalidLayout {
            layout: layout.to_string(),
            reason: reason.to_string(),
        };
        let roles: Vec<String> = layout
            .split('/')
            .map(|role| role.trim().to_ascii_uppercase())
            .collect();

        let position = |role: &str| -> Result<usize, CorpusError> {
            let mut matches = roles
                .iter()
                .enumerate()
                .filter(|(_, candidate)| candidate.as_str() == role);
            let (index, _) = matches
                .next()
                .ok_or_else(|| invalid(&format!("missing {role} segment")))?;
            if matches.next().is_some() {
                return Err(invalid(&format!("{role} segment appears more than once")));
            }
            Ok(index)
        };

        Ok(Self {
            trajectory_position: position(TRAJECTORY_ROLE)?,
            time_position: position(TIME_ROLE)?,
            extension: None,
        })
    }

    pub fn with_extension(mut self, extension: Option<String>) -> Self {
        self.extension = extension;
        self
    }

    /// Trajectory and time labels for a path relative to the scan root.
    pub fn locate(&self, relative: &Path, time_precision: usize) -> Option<(String, String)> {
        let segments: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        let last = segments.len().checked_sub(1)?;

        let segment = |position: usize| -> Option<String> {
            let raw = segments.get(position)?;
            if position == last {
                let stem = self
                    .extension
                    .as_deref()
                    .and_then(|extension| raw.strip_suffix(extension))
                    .filter(|stem| !stem.is_empty())
                    .unwrap_or(raw.as_str());
                Some(stem.to_string())
            } else {
                Some(raw.clone())
            }
        };

        let trajectory = store_segment(&segment(self.trajectory_position)?);
        let time = segment(self.time_position)?;
        let time = match time.trim().parse::<f64>() {
            Ok(value) => time_label(value, time_precision),
            Err(_) => store_segment(&time),
        };
        if trajectory.is_empty() || time.is_empty() {
            return None;
        }
        Some((trajectory, time))
    }
}

/// Literal extension a file pattern ends with (`*.out` gives `.out`); `None`
/// when the tail after the last `.` contains glob syntax or there is no `.`.
pub fn pattern_extension(pattern: &str) -> Option<String> {
    let position = pattern.rfind('.')?;
    let tail = &pattern[position + 1..];
    let literal = !tail.is_empty()
        && !tail
            .chars()
            .any(|character| matches!(character, '*' | '?' | '[' | ']' | '{' | '}' | '/' | '\\'));
    literal.then(|| pattern[position..].to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusReport {
    pub attempted: usize,
    pub converted: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
    pub datasets_written: usize,
    pub population_written: usize,
    /// Population rows whose trajectory/time node does not exist in the store.
    pub population_unmatched: usize,
}

impl CorpusReport {
    pub fn summary_line(&self) -> String {
        format!(
            "converted {}, skipped {}, population rows written {}",
            self.converted.len(),
            self.skipped.len(),
            self.population_written
        )
    }
}

/// One population row: per-state occupation of a trajectory at one time.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationRecord {
    pub trajectory: String,
    pub time: f64,
    pub population: Vec<f64>,
}

pub trait PopulationSource {
    fn records(&self) -> Result<Vec<PopulationRecord>, CorpusError>;
}

/// `<trajectory-id><suffix>` files in one directory; the id is the file name without the suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationFiles {
    directory: PathBuf,
    suffix: String,
}

impl PopulationFiles {
    pub fn new(directory: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            suffix: suffix.into(),
        }
    }

    fn population_paths(&self) -> Result<Vec<PathBuf>, CorpusError> {
        let read_error = |source: std::io::Error| CorpusError::ReadDirectory {
            path: self.directory.clone(),
            source,
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.directory).map_err(read_error)? {
            let entry = entry.map_err(read_error)?;
            let path = entry.path();
            let matches_suffix = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(&self.suffix));
            if matches_suffix && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl PopulationSource for PopulationFiles {
    fn records(&self) -> Result<Vec<PopulationRecord>, CorpusError> {
        let mut records = Vec::new();
        for path in self.population_paths()? {
            let Some(trajectory) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(self.suffix.as_str()))
                .filter(|id| !id.is_empty())
            else {
                continue;
            };

            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(error) => {
                    warn!(file = %path.display(), %error, "skipping unreadable population file");
                    continue;
                }
            };
            records.extend(parse_population_rows(trajectory, &content));
        }
        Ok(records)
    }
}

/// Rows whose time or any population value is not numeric are dropped.
pub fn parse_population_rows(trajectory: &str, content: &str) -> Vec<PopulationRecord> {
    content
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let time = tokens.next()?.parse::<f64>().ok()?;
            let population = tokens
                .map(|token| token.parse::<f64>().ok())
                .collect::<Option<Vec<f64>>>()?;
            Some(PopulationRecord {
                trajectory: store_segment(trajectory),
                time,
                population,
            })
        })
        .collect()
}

pub struct CorpusAggregator {
    root: PathBuf,
    config: CorpusConfig,
    layout: CorpusLayout,
    matcher: GlobMatcher,
}

impl CorpusAggregator {
    pub fn new(root: impl Into<PathBuf>, config: CorpusConfig) -> Result<Self, CorpusError> {
        let matcher = Glob::new(&config.file_pattern)
            .map_err(|source| CorpusError::InvalidPattern {
                pattern: config.file_pattern.clone(),
                source,
            })?
            .compile_matcher();
        let layout = CorpusLayout::parse(&config.layout)?
            .with_extension(pattern_extension(&config.file_pattern));

        Ok(Self {
            root: root.into(),
            config,
            layout,
            matcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &CorpusConfig {
        &self.config
    }

    /// Matching files below the root, sorted for a stable processing order.
    pub fn discover(&self) -> Result<Vec<PathBuf>, CorpusError> {
        let mut files = Vec::new();
        self.collect_matching_files(&self.root, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn collect_matching_files(
        &self,
        directory: &Path,
        files: &mut Vec<PathBuf>,
    ) -> Result<(), CorpusError> {
        let entries = fs::read_dir(directory).map_err(|source| CorpusError::ReadDirectory {
            path: directory.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| CorpusError::ReadDirectory {
                path: directory.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|source| CorpusError::ReadDirectory {
                    path: path.clone(),
                    source,
                })?;

            if file_type.is_dir() {
                self.collect_matching_files(&path, files)?;
            } else if file_type.is_file()
                && path
                    .file_name()
                    .is_some_and(|name| self.matcher.is_match(name))
            {
                files.push(path);
            }
        }
        Ok(())
    }

    /// Converts every matching file and then merges population files from
    /// the configured directory.
    pub fn convert(&self, store: &mut HierarchicalStore) -> Result<CorpusReport, CorpusError> {
        let directory = self
            .config
            .population_dir
            .clone()
            .unwrap_or_else(|| self.root.clone());
        let population = PopulationFiles::new(directory, self.config.population_suffix.clone());
        self.convert_with_population(store, &population)
    }

    pub fn convert_with_population(
        &self,
        store: &mut HierarchicalStore,
        population: &dyn PopulationSource,
    ) -> Result<CorpusReport, CorpusError> {
        let mut report = CorpusReport::default();

        for path in self.discover()? {
            report.attempted += 1;
            info!(file = %path.display(), "extracting");

            match self.convert_file(store, &path) {
                Ok(written) => {
                    report.datasets_written += written;
                    report.converted.push(path);
                }
                Err(reason) => {
                    warn!(file = %path.display(), %reason, "skipping file");
                    report.skipped.push(SkippedFile { path, reason });
                }
            }
        }

        let (written, unmatched) =
            merge_population(store, &population.records()?, self.config.time_precision)?;
        report.population_written = written;
        report.population_unmatched = unmatched;
        Ok(report)
    }

    fn convert_file(&self, store: &mut HierarchicalStore, path: &Path) -> Result<usize, String> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let (trajectory, time) = self
            .layout
            .locate(relative, self.config.time_precision)
            .ok_or_else(|| format!("path does not fit layout '{}'", self.config.layout))?;

        let result = extract_file(path).map_err(|error| error.to_string())?;
        let table = result
            .pump_probe()
            .ok_or_else(|| format!("method '{}' produced no pump-probe results", result.method))?;
        let prefix = self.config.store_order.segments(&trajectory, &time);
        let written = write_pump_probe(store, &prefix, table).map_err(|error| error.to_string())?;
        debug!(file = %path.display(), datasets = written, "stored pump-probe tables");
        Ok(written)
    }
}

/// Writes `exc_energy`/`osc_strength` per pump state below `prefix`.
///
/// Nothing is written unless every dataset of the table can be created.
pub fn write_pump_probe(
    store: &mut HierarchicalStore,
    prefix: &[&str],
    table: &PumpProbeTable,
) -> Result<usize, StoreError> {
    let mut planned: Vec<(String, Vec<f64>)> = Vec::with_capacity(table.len() * 2);
    for pump in table.pumps() {
        let pump_segment = store_segment(&pump.label);
        let group: Vec<&str> = prefix
            .iter()
            .copied()
            .chain(std::iter::once(pump_segment.as_str()))
            .collect();
        let group = join_path(&group);

        planned.push((
            format!("{group}/{EXCITATION_ENERGY_DATASET}"),
            pump.energy_gaps(),
        ));
        planned.push((
            format!("{group}/{OSCILLATOR_STRENGTH_DATASET}"),
            pump.oscillator_strengths(),
        ));
    }

    let mut seen = BTreeSet::new();
    for (path, _) in &planned {
        store.check_new_dataset(path)?;
        if !seen.insert(path.as_str()) {
            return Err(StoreError::DatasetExists { path: path.clone() });
        }
    }

    for (path, values) in &planned {
        store.create_dataset(path, values)?;
    }
    Ok(planned.len())
}

/// Attaches each population row to every existing trajectory/time node, in
/// either nesting order. Returns `(written, unmatched)`.
pub fn merge_population(
    store: &mut HierarchicalStore,
    records: &[PopulationRecord],
    time_precision: usize,
) -> Result<(usize, usize), CorpusError> {
    let mut written = 0;
    let mut unmatched = 0;

    for record in records {
        let time = time_label(record.time, time_precision);
        let mut attached = false;

        for order in [StoreOrder::TrajectoryMajor, StoreOrder::TimeMajor] {
            let group = join_path(&order.segments(&record.trajectory, &time));
            let dataset = format!("{group}/{POPULATION_DATASET}");
            if store.is_group(&group) && !store.contains(&dataset) {
                store.create_dataset(&dataset, &record.population)?;
                attached = true;
                written += 1;
            }
        }

        if !attached {
            debug!(trajectory = %record.trajectory, time = %time, "no store node for population row");
            unmatched += 1;
        }
    }

    Ok((written, unmatched))
}

#[cfg(test)]
mod tests {
    use super::{
        CorpusLayout, PopulationFiles, PopulationRecord, PopulationSource, merge_population,
        parse_population_rows, pattern_extension, write_pump_probe,
    };
    use crate::extract::PumpProbeTable;
    use crate::extract::pump_probe::pump_probe_extractor;
    use crate::extract::scanner::LineSink;
    use crate::store::{HierarchicalStore, StoreError};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn out_layout(layout: &str) -> CorpusLayout {
        CorpusLayout::parse(layout)
            .expect("layout should parse")
            .with_extension(Some(".out".to_string()))
    }

    #[test]
    fn layout_roles_select_path_segments() {
        let layout = out_layout("TRAJ/TIME");
        assert_eq!(
            layout.locate(Path::new("TRAJ7/0.50.out"), 1),
            Some(("TRAJ7".to_string(), "0.5".to_string()))
        );
        assert_eq!(
            layout.locate(Path::new("TRAJ7/t010/job.out"), 1),
            Some(("TRAJ7".to_string(), "t010".to_string()))
        );
        assert_eq!(layout.locate(Path::new("lonely.out"), 1), None);

        let nested = out_layout("time/run/traj");
        assert_eq!(
            nested.locate(Path::new("2.0/batch/T3.out"), 1),
            Some(("T3".to_string(), "2.0".to_string()))
        );
    }

    #[test]
    fn only_the_pattern_extension_is_removed() {
        assert_eq!(pattern_extension("*.out"), Some(".out".to_string()));
        assert_eq!(pattern_extension("job_*.log"), Some(".log".to_string()));
        assert_eq!(pattern_extension("*"), None);
        assert_eq!(pattern_extension("*.{out,log}"), None);

        let bare = CorpusLayout::parse("TRAJ/TIME")
            .expect("layout should parse")
            .with_extension(pattern_extension("*"));
        assert_eq!(
            bare.locate(Path::new("T1/0.5"), 1),
            Some(("T1".to_string(), "0.5".to_string()))
        );

        let layout = out_layout("TRAJ/TIME");
        assert_eq!(
            layout.locate(Path::new("T1/1.5.log"), 1),
            Some(("T1".to_string(), "1.5.log".to_string()))
        );
    }

    #[test]
    fn population_ids_drop_only_the_suffix() {
        let temp = TempDir::new().expect("tempdir should be created");
        fs::write(temp.path().join("TRAJ_7_pop.dat"), "0.5 0 1
").expect("file should be written");
        fs::write(temp.path().join("T9-pop.txt"), "1.0 1 0
").expect("file should be written");
        fs::write(temp.path().join("_pop.dat"), "2.0 1 0
").expect("file should be written");

        let default_suffix = PopulationFiles::new(temp.path(), "_pop.dat")
            .records()
            .expect("population files should be read");
        let ids: Vec<&str> = default_suffix.iter().map(|record| record.trajectory.as_str()).collect();
        assert_eq!(ids, vec!["TRAJ_7"]);

        let custom_suffix = PopulationFiles::new(temp.path(), "-pop.txt")
            .records()
            .expect("population files should be read");
        assert_eq!(custom_suffix.len(), 1);
        assert_eq!(custom_suffix[0].trajectory, "T9");
        assert_eq!(custom_suffix[0].population, vec![1.0, 0.0]);
    }

    fn pump_probe_table(source: &str) -> PumpProbeTable {
        let mut extractor = pump_probe_extractor();
        for line in source.lines() {
            extractor.feed(line);
        }
        extractor.into_handler().into_table()
    }

    #[test]
    fn conflicting_table_writes_nothing() {
        let mut store = HierarchicalStore::new();
        store
            .create_dataset("T1/0.5/2_(1)_A/exc_energy", &[281.0])
            .expect("existing dataset should be created");

        let table = pump_probe_table(
            "Pump-Probe Results\n\
             Transitions from pumped state 3 (1) A\n\
             1 (1) A  282.0  0.01  0.5\n\
             Transitions from pumped state 2 (1) A\n\
             1 (1) A  283.0  0.02  0.5\n\
             End of Pump-Probe Results\n",
        );
        assert_eq!(table.len(), 2);

        let error = write_pump_probe(&mut store, &["T1", "0.5"], &table)
            .expect_err("existing pump dataset should block the write");
        assert!(matches!(error, StoreError::DatasetExists { .. }));
        assert!(!store.contains("T1/0.5/3_(1)_A"));
        assert_eq!(store.keys("T1/0.5"), Some(vec!["2_(1)_A"]));

        let written = write_pump_probe(&mut store, &["T2", "0.5"], &table)
            .expect("free prefix should be written");
        assert_eq!(written, 4);
        assert_eq!(store.dataset("T2/0.5/3_(1)_A/exc_energy"), Some(&[282.0][..]));
    }

    #[test]
    fn layout_requires_both_roles_once() {
        assert!(CorpusLayout::parse("TRAJ").is_err());
        assert!(CorpusLayout::parse("TRAJ/TIME/TIME").is_err());
    }

    #[test]
    fn population_rows_skip_malformed_lines() {
        let rows = parse_population_rows("T1", "0.0 1 0 0\n# header\n0.5 0 1 0\n1.0 0 x 1\n\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].time, 0.5);
        assert_eq!(rows[1].population, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn population_is_attached_in_either_nesting_order() {
        let mut store = HierarchicalStore::new();
        store
            .create_dataset("T1/0.5/2_(1)_A/exc_energy", &[1.0])
            .expect("trajectory-major node should be created");
        store
            .create_dataset("1.0/T2/2_(1)_A/exc_energy", &[1.0])
            .expect("time-major node should be created");

        let record = |trajectory: &str, time: f64, population: &[f64]| PopulationRecord {
            trajectory: trajectory.to_string(),
            time,
            population: population.to_vec(),
        };
        let records = vec![
            record("T1", 0.5, &[0.0, 1.0]),
            record("T2", 1.0, &[1.0, 0.0]),
            record("T3", 1.0, &[1.0]),
        ];
        let (written, unmatched) =
            merge_population(&mut store, &records, 1).expect("merge should succeed");

        assert_eq!(written, 2);
        assert_eq!(unmatched, 1);
        assert_eq!(store.dataset("T1/0.5/pop"), Some(&[0.0, 1.0][..]));
        assert_eq!(store.dataset("1.0/T2/pop"), Some(&[1.0, 0.0][..]));
    }
}
