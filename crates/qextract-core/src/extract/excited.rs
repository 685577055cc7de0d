use super::scanner::{LineDisposition, LineHandler, SectionScanner};
use serde::Serialize;

pub const EXCITED_SECTION_START: &str = "Excited State Summary";
pub const EXCITED_SECTION_END: &str =
    "================================================================================";

const STATE_HEADER_MATCH: &str = "Excited state";
const TERM_SYMBOL_MATCH: &str = "Term symbol:";
const EXCITATION_ENERGY_MATCH: &str = "Excitation energy:";
const OSCILLATOR_STRENGTH_MATCH: &str = "Osc. strength:";
const CONVERGED_FLAG: &str = "[converged]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermSymbol {
    pub state: String,
    pub term: String,
    pub symmetry: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcitedState {
    pub index: usize,
    pub excitation_energy: f64,
    /// NaN when no strength line followed the energy line.
    pub oscillator_strength: f64,
    pub converged: bool,
    pub multiplicity: String,
    pub term: Option<TermSymbol>,
}

/// Column accumulator for one summary block.
///
/// Energies and strengths are filled in two phases: an energy line appends
/// the energy and a NaN strength placeholder, a later strength line
/// overwrites the most recent placeholder.
#[derive(Debug, Clone, Default)]
pub struct ExcitedStateColumns {
    excitation_energy: Vec<f64>,
    oscillator_strength: Vec<f64>,
    converged: Vec<bool>,
    multiplicity: Vec<String>,
    terms: Vec<TermSymbol>,
}

impl ExcitedStateColumns {
    pub fn len(&self) -> usize {
        self.excitation_energy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excitation_energy.is_empty()
    }

    pub fn into_table(self) -> ExcitedStateTable {
        let has_terms = self.terms.len() == self.excitation_energy.len();
        let mut terms = self.terms.into_iter();

        let states = self
            .excitation_energy
            .iter()
            .enumerate()
            .map(|(index, energy)| ExcitedState {
                index,
                excitation_energy: *energy,
                oscillator_strength: self
                    .oscillator_strength
                    .get(index)
                    .copied()
                    .unwrap_or(f64::NAN),
                converged: self.converged.get(index).copied().unwrap_or(false),
                multiplicity: self.multiplicity.get(index).cloned().unwrap_or_default(),
                term: if has_terms { terms.next() } else { None },
            })
            .collect();

        ExcitedStateTable { states }
    }

    fn record_state_header(&mut self, tokens: &[&str]) {
        let multiplicity = tokens
            .get(3)
            .map(|token| token.chars().filter(|c| c.is_alphanumeric()).collect())
            .unwrap_or_default();
        self.multiplicity.push(multiplicity);
        self.converged.push(
            tokens
                .last()
                .is_some_and(|token| token.contains(CONVERGED_FLAG)),
        );
    }

    fn record_term_symbol(&mut self, tokens: &[&str]) {
        let end = tokens.len().min(5);
        if end <= 2 {
            return;
        }
        let slice = &tokens[2..end];
        self.terms.push(TermSymbol {
            state: slice[0].to_string(),
            term: slice.join(" "),
            symmetry: slice[slice.len() - 1].to_string(),
        });
    }

    fn record_excitation_energy(&mut self, tokens: &[&str]) {
        let energy = tokens
            .len()
            .checked_sub(2)
            .and_then(|position| tokens[position].parse::<f64>().ok())
            .unwrap_or(f64::NAN);
        self.excitation_energy.push(energy);
        self.oscillator_strength.push(f64::NAN);
    }

    fn record_oscillator_strength(&mut self, tokens: &[&str]) {
        let Some(strength) = tokens.last().and_then(|token| token.parse::<f64>().ok()) else {
            return;
        };
        if let Some(placeholder) = self.oscillator_strength.last_mut() {
            *placeholder = strength;
        }
    }
}

impl LineHandler for ExcitedStateColumns {
    fn accumulate(&mut self, line: &str) -> LineDisposition {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut matched = false;

        // The four patterns are independent; one line may carry several.
        if line.contains(STATE_HEADER_MATCH) {
            self.record_state_header(&tokens);
            matched = true;
        }
        if line.contains(TERM_SYMBOL_MATCH) {
            self.record_term_symbol(&tokens);
            matched = true;
        }
        if line.contains(EXCITATION_ENERGY_MATCH) {
            self.record_excitation_energy(&tokens);
            matched = true;
        }
        if line.contains(OSCILLATOR_STRENGTH_MATCH) {
            self.record_oscillator_strength(&tokens);
            matched = true;
        }

        if matched {
            LineDisposition::Consumed
        } else {
            LineDisposition::Rejected
        }
    }
}

/// Finished excited-state block, in the order the states were printed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExcitedStateTable {
    states: Vec<ExcitedState>,
}

impl ExcitedStateTable {
    pub fn states(&self) -> &[ExcitedState] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ExcitedState> {
        self.states.get(index)
    }

    /// Looks a state up by its term symbol (`"2 (1) A"`); older outputs
    /// without term lines only support positional access through [`get`].
    ///
    /// [`get`]: Self::get
    pub fn by_term(&self, term: &str) -> Option<&ExcitedState> {
        self.states
            .iter()
            .find(|state| state.term.as_ref().is_some_and(|symbol| symbol.term == term))
    }

    pub fn has_term_symbols(&self) -> bool {
        !self.states.is_empty() && self.states.iter().all(|state| state.term.is_some())
    }

    pub fn excitation_energies(&self) -> Vec<f64> {
        self.states
            .iter()
            .map(|state| state.excitation_energy)
            .collect()
    }

    pub fn oscillator_strengths(&self) -> Vec<f64> {
        self.states
            .iter()
            .map(|state| state.oscillator_strength)
            .collect()
    }
}

pub type ExcitedStateExtractor = SectionScanner<ExcitedStateColumns>;

pub fn excited_state_extractor() -> ExcitedStateExtractor {
    SectionScanner::new(
        EXCITED_SECTION_START,
        EXCITED_SECTION_END,
        ExcitedStateColumns::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::{EXCITED_SECTION_END, ExcitedStateTable, excited_state_extractor};
    use crate::extract::scanner::LineSink;

    fn extract(source: &str) -> ExcitedStateTable {
        let mut extractor = excited_state_extractor();
        for line in source.lines() {
            extractor.feed(line);
        }
        extractor.into_handler().into_table()
    }

    fn summary_block(body: &str) -> String {
        format!(
            "                       Excited State Summary\n{}\n{}\n",
            body, EXCITED_SECTION_END
        )
    }

    #[test]
    fn full_state_entries_are_parsed() {
        let source = summary_block(
            "  Excited state   1  (singlet, A)        [converged]\n\
             ----------------------------------------------------\n\
               Term symbol:  2 (1) A       R^2 = 7.7e-10\n\
             \n\
               Total energy:                   -263.6921 au\n\
               Excitation energy:               4.134 eV\n\
               Osc. strength:                   0.0031\n\
             \n\
               Excited state   2  (triplet, A)     [not converged]\n\
               Term symbol:  1 (3) A       R^2 = 3.1e-06\n\
               Excitation energy:               5.002 eV\n\
               Osc. strength:                   0.0000\n",
        );
        let table = extract(&source);

        assert_eq!(table.len(), 2);
        let first = table.get(0).expect("first state should exist");
        assert_eq!(first.multiplicity, "singlet");
        assert!(first.converged);
        assert!((first.excitation_energy - 4.134).abs() < 1.0e-12);
        assert!((first.oscillator_strength - 0.0031).abs() < 1.0e-12);

        let second = table.by_term("1 (3) A").expect("term lookup should succeed");
        assert_eq!(second.index, 1);
        assert_eq!(second.multiplicity, "triplet");
        assert!(!second.converged);
        let term = second.term.as_ref().expect("term symbol should be present");
        assert_eq!(term.state, "1");
        assert_eq!(term.symmetry, "A");
        assert!(table.has_term_symbols());
    }

    #[test]
    fn strengths_align_with_energies_in_order() {
        let mut body = String::new();
        for index in 0..5 {
            body.push_str(&format!("  Excited state {} (singlet, A) [converged]\n", index + 1));
            body.push_str(&format!("  Excitation energy: {}.5 eV\n", index + 3));
            body.push_str(&format!("  Osc. strength: 0.{}\n", index + 1));
        }
        let table = extract(&summary_block(&body));

        assert_eq!(table.excitation_energies(), vec![3.5, 4.5, 5.5, 6.5, 7.5]);
        assert_eq!(table.oscillator_strengths(), vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    }

    #[test]
    fn missing_strength_line_leaves_nan_placeholder() {
        let table = extract(&summary_block(
            "  Excited state 1 (singlet, A) [converged]\n\
               Excitation energy: 4.0 eV\n\
               Excited state 2 (singlet, A) [converged]\n\
               Excitation energy: 5.0 eV\n\
               Osc. strength: 0.25\n",
        ));

        let strengths = table.oscillator_strengths();
        assert_eq!(strengths.len(), 2);
        assert!(strengths[0].is_nan());
        assert_eq!(strengths[1], 0.25);
    }

    #[test]
    fn absent_term_lines_fall_back_to_positional_access() {
        let table = extract(&summary_block(
            "  Excited state 1 (singlet, A) [converged]\n\
               Excitation energy: 4.0 eV\n\
               Osc. strength: 0.5\n",
        ));

        assert!(!table.has_term_symbols());
        assert!(table.by_term("2 (1) A").is_none());
        assert_eq!(table.get(0).map(|state| state.excitation_energy), Some(4.0));
    }

    #[test]
    fn malformed_energy_is_recorded_as_nan_without_breaking_alignment() {
        let table = extract(&summary_block(
            "  Excitation energy: ***** eV\n  Osc. strength: 0.1\n  Excitation energy: 2.0 eV\n  Osc. strength: 0.2\n",
        ));

        let energies = table.excitation_energies();
        assert!(energies[0].is_nan());
        assert_eq!(energies[1], 2.0);
        assert_eq!(table.oscillator_strengths(), vec![0.1, 0.2]);
    }
}
