//! Single-pass section scanner shared by every block extractor.
//!
//! A scanner stays idle until a line contains its start marker, then hands
//! every following line to a [`LineHandler`] until the end marker is seen.
//! The activating line itself is not handed over. Scanners are streaming:
//! they never look back and only hold the current line.

/// What a handler did with a line it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDisposition {
    Consumed,
    Rejected,
}

/// When the end marker is tested against an active line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndDetection {
    /// Every active line is tested before it reaches the handler.
    #[default]
    BeforeHandler,
    /// Only lines the handler rejected are tested. Used where data rows and
    /// footer lines cannot be told apart up front.
    OnRejectedLine,
}

pub trait LineHandler {
    fn accumulate(&mut self, line: &str) -> LineDisposition;
}

impl<F> LineHandler for F
where
    F: FnMut(&str) -> LineDisposition,
{
    fn accumulate(&mut self, line: &str) -> LineDisposition {
        self(line)
    }
}

/// Anything that consumes lines until it reports itself finished.
pub trait LineSink {
    fn feed(&mut self, line: &str);
    fn is_finished(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct SectionScanner<H> {
    section_start: &'static str,
    section_end: &'static str,
    end_detection: EndDetection,
    active: bool,
    finished: bool,
    handler: H,
}

impl<H: LineHandler> SectionScanner<H> {
    pub fn new(section_start: &'static str, section_end: &'static str, handler: H) -> Self {
        Self {
            section_start,
            section_end,
            end_detection: EndDetection::BeforeHandler,
            active: false,
            finished: false,
            handler,
        }
    }

    pub fn with_end_detection(mut self, end_detection: EndDetection) -> Self {
        self.end_detection = end_detection;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

impl<H: LineHandler> LineSink for SectionScanner<H> {
    fn feed(&mut self, line: &str) {
        if self.finished {
            return;
        }

        if !self.active {
            // An empty start marker matches the very first line.
            self.active = line.contains(self.section_start);
            return;
        }

        match self.end_detection {
            EndDetection::BeforeHandler => {
                if line.contains(self.section_end) {
                    self.finished = true;
                } else {
                    self.handler.accumulate(line);
                }
            }
            EndDetection::OnRejectedLine => {
                if self.handler.accumulate(line) == LineDisposition::Rejected
                    && line.contains(self.section_end)
                {
                    self.finished = true;
                }
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::{EndDetection, LineDisposition, LineSink, SectionScanner};

    fn collecting_scanner(
        start: &'static str,
        end: &'static str,
    ) -> SectionScanner<impl FnMut(&str) -> LineDisposition> {
        let mut seen = Vec::new();
        SectionScanner::new(start, end, move |line: &str| {
            seen.push(line.to_string());
            LineDisposition::Consumed
        })
    }

    #[test]
    fn lines_between_markers_reach_the_handler() {
        let mut collected = Vec::new();
        {
            let mut scanner = SectionScanner::new("BEGIN", "END", |line: &str| {
                collected.push(line.to_string());
                LineDisposition::Consumed
            });
            for line in ["noise", "BEGIN here", "a", "b", "END", "c"] {
                scanner.feed(line);
            }
            assert!(scanner.is_finished());
        }
        assert_eq!(collected, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn empty_start_marker_activates_on_first_line() {
        let mut scanner = collecting_scanner("", "END");
        assert!(!scanner.is_active());
        scanner.feed("anything");
        assert!(scanner.is_active());
        assert!(!scanner.is_finished());
    }

    #[test]
    fn finished_scanner_ignores_further_lines() {
        let mut count = 0;
        let mut scanner = SectionScanner::new("S", "E", |_: &str| {
            count += 1;
            LineDisposition::Consumed
        });
        for line in ["S", "x", "E", "y", "z"] {
            scanner.feed(line);
        }
        assert!(scanner.is_finished());
        drop(scanner);
        assert_eq!(count, 1);
    }

    #[test]
    fn rejected_line_mode_only_tests_end_on_rejection() {
        let mut scanner = SectionScanner::new("S", "END", |line: &str| {
            if line.starts_with("data") {
                LineDisposition::Consumed
            } else {
                LineDisposition::Rejected
            }
        })
        .with_end_detection(EndDetection::OnRejectedLine);

        scanner.feed("S");
        scanner.feed("data containing END");
        assert!(!scanner.is_finished());
        scanner.feed("footer END");
        assert!(scanner.is_finished());
    }
}
