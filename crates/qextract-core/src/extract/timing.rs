use serde::Serialize;

pub const JOB_TIME_MATCH: &str = "Total job time:";
pub const COMPLETION_BANNER: &str = "Thank you very much for using Q-Chem.  Have a nice day.";
pub const USER_INPUT_MATCH: &str = "User input:";

/// What the orchestrator should do after a timing line was fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingSignal {
    Continue,
    /// A completed job is followed by the input echo of another one.
    NextJob,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobTiming {
    /// CPU seconds of the last `Total job time:` line, NaN when absent or unparsable.
    pub cpu_seconds: f64,
    pub wall_seconds: f64,
    pub success: bool,
    pub cpu_history: Vec<f64>,
}

impl Default for JobTiming {
    fn default() -> Self {
        Self {
            cpu_seconds: f64::NAN,
            wall_seconds: f64::NAN,
            success: false,
            cpu_history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobTimingExtractor {
    timing: JobTiming,
}

impl JobTimingExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> TimingSignal {
        if line.contains(JOB_TIME_MATCH) {
            let mut tokens = line.split_whitespace().rev();
            let cpu = tokens.next().map_or(f64::NAN, parse_time_token);
            let wall = tokens.next().map_or(f64::NAN, parse_time_token);
            self.timing.cpu_seconds = cpu;
            self.timing.wall_seconds = wall;
            self.timing.cpu_history.push(cpu);
        }

        if line.contains(COMPLETION_BANNER) {
            self.timing.success = true;
        }

        if self.timing.success && line.contains(USER_INPUT_MATCH) {
            return TimingSignal::NextJob;
        }

        TimingSignal::Continue
    }

    pub fn timing(&self) -> &JobTiming {
        &self.timing
    }

    pub fn into_timing(self) -> JobTiming {
        self.timing
    }
}

/// `12.34s(cpu)` → 12.34: the part before `(` minus its unit character.
fn parse_time_token(token: &str) -> f64 {
    let value = token.split('(').next().unwrap_or_default();
    let mut characters = value.chars();
    characters.next_back();
    characters.as_str().parse::<f64>().unwrap_or(f64::NAN)
}
