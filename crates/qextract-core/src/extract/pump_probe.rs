use super::scanner::{EndDetection, LineDisposition, LineHandler, SectionScanner};
use serde::Serialize;

pub const PUMP_PROBE_SECTION_START: &str = "Pump-Probe Results";
pub const PUMP_PROBE_SECTION_END: &str = "End of Pump-Probe Results";

const PUMPED_STATE_MATCH: &str = "Transitions from pumped state";
const PUMPED_STATE_LABEL_OFFSET: usize = 4;
const PROBE_LABEL_TOKENS: usize = 3;
const PROBE_VALUE_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeTransition {
    pub energy_gap: f64,
    pub oscillator_strength: f64,
    pub overlap: f64,
}

impl ProbeTransition {
    fn is_complete(&self) -> bool {
        !(self.energy_gap.is_nan() || self.oscillator_strength.is_nan() || self.overlap.is_nan())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeRow {
    pub probe: String,
    #[serde(flatten)]
    pub transition: ProbeTransition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PumpState {
    pub label: String,
    pub probes: Vec<ProbeRow>,
}

impl PumpState {
    pub fn energy_gaps(&self) -> Vec<f64> {
        self.probes
            .iter()
            .map(|row| row.transition.energy_gap)
            .collect()
    }

    pub fn oscillator_strengths(&self) -> Vec<f64> {
        self.probes
            .iter()
            .map(|row| row.transition.oscillator_strength)
            .collect()
    }

    pub fn overlaps(&self) -> Vec<f64> {
        self.probes
            .iter()
            .map(|row| row.transition.overlap)
            .collect()
    }

    pub fn probe(&self, label: &str) -> Option<&ProbeTransition> {
        self.probes
            .iter()
            .find(|row| row.probe == label)
            .map(|row| &row.transition)
    }
}

/// Two-level table pump label → probe label → transition, kept in the order
/// pump blocks appear in the output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PumpProbeTable {
    pumps: Vec<PumpState>,
}

impl PumpProbeTable {
    pub fn pump_states(&self) -> impl Iterator<Item = &str> {
        self.pumps.iter().map(|pump| pump.label.as_str())
    }

    pub fn pumps(&self) -> &[PumpState] {
        &self.pumps
    }

    pub fn pump(&self, label: &str) -> Option<&PumpState> {
        self.pumps.iter().find(|pump| pump.label == label)
    }

    pub fn len(&self) -> usize {
        self.pumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pumps.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PumpProbeAccumulator {
    pumps: Vec<(String, Vec<(String, Vec<f64>)>)>,
    current_pump: Option<usize>,
}

impl PumpProbeAccumulator {
    fn open_pump(&mut self, label: String) {
        // A repeated pump label restarts its block in place.
        let position = match self.pumps.iter().position(|(existing, _)| *existing == label) {
            Some(position) => {
                self.pumps[position].1.clear();
                position
            }
            None => {
                self.pumps.push((label, Vec::new()));
                self.pumps.len() - 1
            }
        };
        self.current_pump = Some(position);
    }

    pub fn into_table(self) -> PumpProbeTable {
        let pumps = self
            .pumps
            .into_iter()
            .map(|(label, rows)| PumpState {
                label,
                probes: rows
                    .into_iter()
                    .filter_map(|(probe, values)| {
                        let [energy_gap, oscillator_strength, overlap] =
                            <[f64; PROBE_VALUE_COUNT]>::try_from(values).ok()?;
                        let transition = ProbeTransition {
                            energy_gap,
                            oscillator_strength,
                            overlap,
                        };
                        transition
                            .is_complete()
                            .then_some(ProbeRow { probe, transition })
                    })
                    .collect(),
            })
            .collect();

        PumpProbeTable { pumps }
    }
}

impl LineHandler for PumpProbeAccumulator {
    fn accumulate(&mut self, line: &str) -> LineDisposition {
        if line.contains(PUMPED_STATE_MATCH) {
            let label = pumped_state_label(line);
            self.open_pump(label);
            return LineDisposition::Consumed;
        }

        let Some(current) = self.current_pump else {
            return LineDisposition::Rejected;
        };

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let split = tokens.len().min(PROBE_LABEL_TOKENS);
        let values: Option<Vec<f64>> = tokens[split..]
            .iter()
            .map(|token| token.parse::<f64>().ok())
            .collect();
        let Some(values) = values else {
            return LineDisposition::Rejected;
        };

        let probe = tokens[..split].join(" ");
        let rows = &mut self.pumps[current].1;
        match rows.iter_mut().find(|(existing, _)| *existing == probe) {
            Some(row) => row.1 = values,
            None => rows.push((probe, values)),
        }
        LineDisposition::Consumed
    }
}

/// Everything after the fourth token, so labels with spaces stay whole.
fn pumped_state_label(line: &str) -> String {
    let mut rest = line.trim_start();
    for _ in 0..PUMPED_STATE_LABEL_OFFSET {
        match rest.find(char::is_whitespace) {
            Some(position) => rest = rest[position..].trim_start(),
            None => {
                rest = "";
                break;
            }
        }
    }
    rest.trim_end().to_string()
}

pub type PumpProbeExtractor = SectionScanner<PumpProbeAccumulator>;

pub fn pump_probe_extractor() -> PumpProbeExtractor {
    SectionScanner::new(
        PUMP_PROBE_SECTION_START,
        PUMP_PROBE_SECTION_END,
        PumpProbeAccumulator::default(),
    )
    .with_end_detection(EndDetection::OnRejectedLine)
}

#[cfg(test)]
mod tests {
    use super::{PumpProbeTable, pump_probe_extractor, pumped_state_label};
    use crate::extract::scanner::LineSink;

    const BLOCK: &str = "\
 ==========================================
            Pump-Probe Results
 ==========================================
  Transitions from pumped state 2 (1) A
     1 (1) A      280.1234      0.0012      0.9981
     3 (1) A      281.5000      0.0450      0.8800

  Transitions from pumped state 3 (1) A
     1 (1) A      279.0000      0.0100      0.5000
     2 (1) A      nan           0.0100      0.5000
     4 (1) A      282.2500      0.0200
 ==========================================
        End of Pump-Probe Results
 ==========================================
  Transitions from pumped state 9 (1) A
";

    fn extract(source: &str) -> (PumpProbeTable, bool) {
        let mut extractor = pump_probe_extractor();
        for line in source.lines() {
            extractor.feed(line);
        }
        let finished = extractor.is_finished();
        (extractor.into_handler().into_table(), finished)
    }

    #[test]
    fn pump_blocks_become_outer_keys() {
        let (table, finished) = extract(BLOCK);

        assert!(finished);
        let pumps: Vec<&str> = table.pump_states().collect();
        assert_eq!(pumps, vec!["2 (1) A", "3 (1) A"]);

        let first = table.pump("2 (1) A").expect("first pump should exist");
        let transition = first.probe("3 (1) A").expect("probe row should exist");
        assert_eq!(transition.energy_gap, 281.5);
        assert_eq!(transition.oscillator_strength, 0.045);
        assert_eq!(transition.overlap, 0.88);
        assert_eq!(first.energy_gaps(), vec![280.1234, 281.5]);
    }

    #[test]
    fn rows_with_missing_numeric_fields_are_dropped() {
        let (table, _) = extract(BLOCK);
        let second = table.pump("3 (1) A").expect("second pump should exist");

        assert_eq!(second.probes.len(), 1);
        assert_eq!(second.probes[0].probe, "1 (1) A");
        assert_eq!(second.oscillator_strengths(), vec![0.01]);
    }

    #[test]
    fn rows_before_any_pump_are_ignored() {
        let (table, finished) = extract(
            "Pump-Probe Results\n  1 (1) A  1.0 2.0 3.0\nEnd of Pump-Probe Results\n",
        );
        assert!(finished);
        assert!(table.is_empty());
    }

    #[test]
    fn unterminated_block_keeps_rows_read_so_far() {
        let (table, finished) = extract(
            "Pump-Probe Results\nTransitions from pumped state 2 (1) A\n 1 (1) A 1.0 2.0 3.0\n",
        );
        assert!(!finished);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn pumped_state_label_keeps_embedded_spaces() {
        assert_eq!(
            pumped_state_label("   Transitions from pumped state 12 (1) B2  "),
            "12 (1) B2"
        );
        assert_eq!(pumped_state_label("Transitions from pumped state"), "");
    }
}
