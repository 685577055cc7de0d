use super::excited::{ExcitedStateTable, excited_state_extractor};
use super::parameters::{JobParameters, METHOD_KEY, job_parameter_extractor};
use super::pump_probe::{PumpProbeTable, pump_probe_extractor};
use super::scanner::LineSink;
use super::timing::{JobTiming, JobTimingExtractor, TimingSignal};
use crate::domain::QextractError;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

const FANO_METHOD_FAMILY: &str = "fano";
const ADC_METHOD_FAMILY: &str = "adc";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("'{}' has no {key} parameter; not a supported calculation output", path.display())]
    MissingParameter { path: PathBuf, key: &'static str },
    #[error("'{}' uses method '{method}', which is neither an ADC nor a FANO calculation", path.display())]
    UnsupportedMethod { path: PathBuf, method: String },
}

impl From<ExtractError> for QextractError {
    fn from(error: ExtractError) -> Self {
        let message = error.to_string();
        match error {
            ExtractError::Io { .. } => QextractError::io_system("IO.EXTRACT_READ", message),
            ExtractError::MissingParameter { .. } => {
                QextractError::input_validation("INPUT.MISSING_PARAMETER", message)
            }
            ExtractError::UnsupportedMethod { .. } => {
                QextractError::input_validation("INPUT.UNSUPPORTED_METHOD", message)
            }
        }
    }
}

/// Method family named by the `METHOD` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodFamily {
    Adc,
    Fano,
}

impl MethodFamily {
    /// Case-insensitive substring match; FANO wins over ADC.
    pub fn classify(method: &str) -> Option<Self> {
        let method = method.to_ascii_lowercase();
        if method.contains(FANO_METHOD_FAMILY) {
            Some(Self::Fano)
        } else if method.contains(ADC_METHOD_FAMILY) {
            Some(Self::Adc)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Spectroscopy {
    Adc {
        states: ExcitedStateTable,
    },
    Fano {
        cvs: ExcitedStateTable,
        adc: ExcitedStateTable,
        pump_probe: PumpProbeTable,
    },
}

impl Spectroscopy {
    pub fn family(&self) -> MethodFamily {
        match self {
            Self::Adc { .. } => MethodFamily::Adc,
            Self::Fano { .. } => MethodFamily::Fano,
        }
    }

    pub fn pump_probe(&self) -> Option<&PumpProbeTable> {
        match self {
            Self::Adc { .. } => None,
            Self::Fano { pump_probe, .. } => Some(pump_probe),
        }
    }
}

/// Everything extracted from one output file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationResult {
    pub filename: PathBuf,
    pub method: String,
    pub basis: Option<String>,
    pub parameters: JobParameters,
    pub timing: JobTiming,
    pub spectroscopy: Spectroscopy,
}

impl CalculationResult {
    pub fn pump_probe(&self) -> Option<&PumpProbeTable> {
        self.spectroscopy.pump_probe()
    }

    pub fn cpu_seconds(&self) -> f64 {
        self.timing.cpu_seconds
    }

    pub fn success(&self) -> bool {
        self.timing.success
    }
}

/// Outcome of extracting one job from the current stream position.
#[derive(Debug)]
pub enum JobStep {
    Done(CalculationResult),
    /// The stream carries another job after this one.
    Continue(CalculationResult),
    /// No parameter block was left in the stream.
    Exhausted,
}

pub fn extract_file(path: impl AsRef<Path>) -> Result<CalculationResult, ExtractError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    extract_reader(BufReader::new(file), path)
}

pub fn extract_reader<R: BufRead>(
    reader: R,
    filename: impl AsRef<Path>,
) -> Result<CalculationResult, ExtractError> {
    let filename = filename.as_ref();
    let mut lines = LineStream::new(reader, filename);
    let mut latest: Option<CalculationResult> = None;

    loop {
        let step = match extract_job(&mut lines) {
            Ok(step) => step,
            Err(error) => {
                // A failed later job never discards a completed earlier one.
                let Some(result) = latest else {
                    return Err(error);
                };
                debug!(file = %filename.display(), %error, "keeping previous job after failed continuation");
                return Ok(result);
            }
        };
        match step {
            JobStep::Done(result) => return Ok(result),
            JobStep::Continue(result) => {
                debug!(file = %filename.display(), "output continues with another job");
                latest = Some(result);
            }
            JobStep::Exhausted => {
                return latest.ok_or_else(|| ExtractError::MissingParameter {
                    path: filename.to_path_buf(),
                    key: METHOD_KEY,
                });
            }
        }
    }
}

/// Extracts one job starting at the current position of `lines`.
pub fn extract_job<R: BufRead>(lines: &mut LineStream<R>) -> Result<JobStep, ExtractError> {
    let mut parameter_extractor = job_parameter_extractor();
    lines.drive(&mut parameter_extractor)?;
    if !parameter_extractor.is_active() {
        return Ok(JobStep::Exhausted);
    }
    let parameters = parameter_extractor.into_handler();

    let method = parameters
        .method()
        .ok_or_else(|| ExtractError::MissingParameter {
            path: lines.path.clone(),
            key: METHOD_KEY,
        })?
        .to_string();

    let spectroscopy = match MethodFamily::classify(&method) {
        Some(MethodFamily::Fano) => extract_fano(lines)?,
        Some(MethodFamily::Adc) => extract_adc(lines)?,
        None => {
            return Err(ExtractError::UnsupportedMethod {
                path: lines.path.clone(),
                method,
            });
        }
    };

    let mut timing_extractor = JobTimingExtractor::new();
    let mut continues = false;
    while let Some(line) = lines.next_line()? {
        if timing_extractor.feed(&line) == TimingSignal::NextJob {
            continues = true;
            break;
        }
    }

    let result = CalculationResult {
        filename: lines.path.clone(),
        basis: parameters.basis().map(str::to_string),
        method,
        parameters,
        timing: timing_extractor.into_timing(),
        spectroscopy,
    };

    Ok(if continues {
        JobStep::Continue(result)
    } else {
        JobStep::Done(result)
    })
}

fn extract_adc<R: BufRead>(lines: &mut LineStream<R>) -> Result<Spectroscopy, ExtractError> {
    let mut adc = excited_state_extractor();
    lines.drive(&mut adc)?;
    Ok(Spectroscopy::Adc {
        states: adc.into_handler().into_table(),
    })
}

fn extract_fano<R: BufRead>(lines: &mut LineStream<R>) -> Result<Spectroscopy, ExtractError> {
    let mut adc = excited_state_extractor();
    lines.drive(&mut adc)?;
    let mut cvs = excited_state_extractor();
    lines.drive(&mut cvs)?;
    let mut pump_probe = pump_probe_extractor();
    lines.drive(&mut pump_probe)?;

    Ok(Spectroscopy::Fano {
        cvs: cvs.into_handler().into_table(),
        adc: adc.into_handler().into_table(),
        pump_probe: pump_probe.into_handler().into_table(),
    })
}

/// Forward-only line source shared by the extractors of one file.
pub struct LineStream<R> {
    reader: R,
    path: PathBuf,
    buffer: String,
}

impl<R: BufRead> LineStream<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>) -> Self {
        Self {
            reader,
            path: path.into(),
            buffer: String::new(),
        }
    }

    pub fn next_line(&mut self) -> Result<Option<String>, ExtractError> {
        self.buffer.clear();
        let read = self
            .reader
            .read_line(&mut self.buffer)
            .map_err(|source| ExtractError::Io {
                path: self.path.clone(),
                source,
            })?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(self.buffer.trim_end_matches(['\n', '\r']).to_string()))
    }

    /// Feeds lines to `sink` until it finishes or the stream ends.
    pub fn drive(&mut self, sink: &mut impl LineSink) -> Result<(), ExtractError> {
        while !sink.is_finished() {
            let Some(line) = self.next_line()? else {
                break;
            };
            sink.feed(&line);
        }
        Ok(())
    }
}
