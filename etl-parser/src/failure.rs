/// A single line that failed to parse, retained only as a diagnostic
/// sample — never propagated as a hard error for the file.
#[derive(Debug, Clone)]
pub struct ParseFailure {
    pub line_number: u64,
    pub reason: String,
    /// First 200 characters of the offending line.
    pub excerpt: String,
}

/// Per-file parsing tally. Counts every line but retains only the first
/// `sample_limit` failures, so a file with a systematic format problem
/// doesn't balloon memory with thousands of near-identical samples.
#[derive(Debug, Clone)]
pub struct ParserStats {
    pub lines_seen: u64,
    pub lines_parsed: u64,
    pub lines_failed: u64,
    pub samples: Vec<ParseFailure>,
    sample_limit: usize,
}

impl ParserStats {
    pub fn new(sample_limit: usize) -> Self {
        Self {
            lines_seen: 0,
            lines_parsed: 0,
            lines_failed: 0,
            samples: Vec::new(),
            sample_limit,
        }
    }

    pub fn record_success(&mut self) {
        self.lines_seen += 1;
        self.lines_parsed += 1;
    }

    pub fn record_failure(&mut self, line_number: u64, reason: impl Into<String>, raw_line: &str) {
        self.lines_seen += 1;
        self.lines_failed += 1;
        if self.samples.len() < self.sample_limit {
            let excerpt: String = raw_line.chars().take(200).collect();
            self.samples.push(ParseFailure {
                line_number,
                reason: reason.into(),
                excerpt,
            });
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.lines_seen == 0 {
            0.0
        } else {
            self.lines_failed as f64 / self.lines_seen as f64
        }
    }
}
