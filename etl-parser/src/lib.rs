//! Tolerant parsing of nginx access log lines.
//!
//! Two source formats are supported: a `key:"value"` text format (the
//! common nginx log_format style) and one flat JSON object per line.
//! A line that fails to parse is counted and sampled, never propagated
//! as a hard error — a single malformed line must not stop ingestion of
//! the rest of the file.

pub mod coerce;
pub mod failure;
pub mod json;
pub mod key_value;

pub use failure::{ParseFailure, ParserStats};

use etl_core::types::{LogFormat, RawRecord};

/// Input size guards, mirroring the caution any log ingester applies to
/// untrusted input before it reaches a parser.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Sniffs the format of a single line. Callers typically sniff the first
/// non-blank line of a file and hold that decision for the rest of it —
/// nginx does not interleave formats within one file.
pub fn detect_format(line: &str) -> LogFormat {
    if line.trim_start().starts_with('{') {
        LogFormat::Json
    } else {
        LogFormat::KeyValueText
    }
}

/// Result of parsing a single line. Blank lines and comment-marked lines
/// are a distinct [`Skip`](LineOutcome::Skip) outcome, never a failure —
/// per spec, they must not be counted in a file's parse-failure tally.
#[derive(Debug, Clone)]
pub enum LineOutcome {
    Record(RawRecord),
    /// A blank line, or one whose first non-whitespace character is `#`.
    Skip,
    /// A non-blank, non-comment line that failed to parse.
    Failure(String),
}

/// Parses one line according to `format`. Never panics; a malformed line
/// yields [`LineOutcome::Failure`] rather than a typed error — the caller
/// folds it into a [`ParseFailure`] alongside the line number and an
/// excerpt.
pub fn parse_line(format: LogFormat, line: &str) -> LineOutcome {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return LineOutcome::Skip;
    }
    if line.len() > MAX_LINE_BYTES {
        return LineOutcome::Failure(format!(
            "line too large: {} bytes (max {})",
            line.len(),
            MAX_LINE_BYTES
        ));
    }

    let result = match format {
        LogFormat::KeyValueText => key_value::parse(line),
        LogFormat::Json => json::parse(line),
    };
    match result {
        Ok(record) if record.timestamp.is_none() => {
            LineOutcome::Failure("missing or unparseable timestamp".to_string())
        }
        Ok(record) => LineOutcome::Record(record),
        Err(reason) => LineOutcome::Failure(reason),
    }
}

/// Parses a batch of lines, accumulating [`ParserStats`] as it goes.
/// Skipped (blank/comment) and failed lines are both omitted from the
/// returned vector; only failures count toward `stats`, per spec.
pub fn parse_batch(
    format: LogFormat,
    lines: impl IntoIterator<Item = (u64, impl AsRef<str>)>,
    stats: &mut ParserStats,
) -> Vec<RawRecord> {
    let mut records = Vec::new();
    for (line_number, raw) in lines {
        let raw = raw.as_ref();
        match parse_line(format, raw) {
            LineOutcome::Record(record) => {
                stats.record_success();
                records.push(record);
            }
            LineOutcome::Skip => {}
            LineOutcome::Failure(reason) => stats.record_failure(line_number, reason, raw),
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_json_by_leading_brace() {
        assert_eq!(detect_format(r#"{"a":1}"#), LogFormat::Json);
        assert_eq!(detect_format(r#"time:"x" status:"200""#), LogFormat::KeyValueText);
    }

    #[test]
    fn parse_batch_separates_good_from_bad_lines() {
        let lines = vec![
            (1u64, r#"time:"2024-01-01T00:00:05+00:00" status:"200""#),
            (2u64, "not a log line at all"),
            (3u64, r#"time:"2024-01-01T00:00:06+00:00" status:"500""#),
        ];
        let mut stats = ParserStats::new(20);
        let records = parse_batch(LogFormat::KeyValueText, lines, &mut stats);
        assert_eq!(records.len(), 2);
        assert_eq!(stats.lines_parsed, 2);
        assert_eq!(stats.lines_failed, 1);
        assert_eq!(stats.samples.len(), 1);
    }

    #[test]
    fn blank_and_comment_lines_are_skipped_not_counted_as_failures() {
        let lines = vec![
            (1u64, r#"time:"2024-01-01T00:00:05+00:00" status:"200""#),
            (2u64, ""),
            (3u64, "   "),
            (4u64, "# a comment line"),
            (5u64, r#"time:"2024-01-01T00:00:06+00:00" status:"500""#),
        ];
        let mut stats = ParserStats::new(20);
        let records = parse_batch(LogFormat::KeyValueText, lines, &mut stats);
        assert_eq!(records.len(), 2);
        assert_eq!(stats.lines_parsed, 2);
        assert_eq!(stats.lines_failed, 0);
        assert_eq!(stats.samples.len(), 0);
    }

    #[test]
    fn blank_line_is_a_skip_outcome() {
        assert!(matches!(parse_line(LogFormat::KeyValueText, ""), LineOutcome::Skip));
        assert!(matches!(parse_line(LogFormat::KeyValueText, "   "), LineOutcome::Skip));
        assert!(matches!(parse_line(LogFormat::KeyValueText, "# comment"), LineOutcome::Skip));
    }

    #[test]
    fn missing_timestamp_is_a_failure_not_a_record() {
        let result = parse_line(LogFormat::KeyValueText, r#"status:"200" request:"GET /x HTTP/1.1""#);
        assert!(matches!(result, LineOutcome::Failure(_)));
    }

    #[test]
    fn oversized_line_fails_without_panicking() {
        let huge = "a".repeat(MAX_LINE_BYTES + 1);
        let result = parse_line(LogFormat::KeyValueText, &huge);
        assert!(matches!(result, LineOutcome::Failure(_)));
    }
}
