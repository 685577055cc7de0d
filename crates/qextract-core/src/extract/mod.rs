pub mod excited;
pub mod orchestrator;
pub mod parameters;
pub mod pump_probe;
pub mod scanner;
pub mod timing;

pub use excited::{ExcitedState, ExcitedStateTable, TermSymbol};
pub use orchestrator::{
    CalculationResult, ExtractError, JobStep, LineStream, MethodFamily, Spectroscopy,
    extract_file, extract_reader,
};
pub use parameters::JobParameters;
pub use pump_probe::{ProbeRow, ProbeTransition, PumpProbeTable, PumpState};
pub use scanner::{EndDetection, LineDisposition, LineHandler, LineSink, SectionScanner};
pub use timing::{JobTiming, TimingSignal};
