use super::scanner::{LineDisposition, LineHandler, SectionScanner};
use serde::Serialize;
use std::collections::BTreeMap;

pub const PARAMETER_SECTION_START: &str = "$rem";
pub const PARAMETER_SECTION_END: &str = "$end";

pub const METHOD_KEY: &str = "METHOD";
pub const BASIS_KEY: &str = "BASIS";

/// Global job settings from the `$rem` block, keyed by uppercase keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct JobParameters {
    values: BTreeMap<String, String>,
}

impl JobParameters {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn method(&self) -> Option<&str> {
        self.get(METHOD_KEY)
    }

    pub fn basis(&self) -> Option<&str> {
        self.get(BASIS_KEY)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl LineHandler for JobParameters {
    /// `KEY VALUE` and `KEY = VALUE` both work: the first token is the key,
    /// the last token the value. Later duplicates overwrite earlier ones.
    fn accumulate(&mut self, line: &str) -> LineDisposition {
        let mut tokens = line.split_whitespace();
        let Some(key) = tokens.next() else {
            return LineDisposition::Rejected;
        };
        let value = tokens.next_back().unwrap_or(key);
        self.values
            .insert(key.to_ascii_uppercase(), value.to_string());
        LineDisposition::Consumed
    }
}

pub type JobParameterExtractor = SectionScanner<JobParameters>;

pub fn job_parameter_extractor() -> JobParameterExtractor {
    SectionScanner::new(
        PARAMETER_SECTION_START,
        PARAMETER_SECTION_END,
        JobParameters::default(),
    )
}
