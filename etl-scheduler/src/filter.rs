use etl_core::types::LogFile;

/// Which date partitions to process this run.
#[derive(Debug, Clone)]
pub enum DateSelector {
    /// `--date YYYYMMDD`: a single partition.
    Single(String),
    /// `--all`: every partition the tree holds, filtered only by state.
    All,
}

/// `full` bypasses the state store entirely (`--mode full`); `incremental`
/// (the default) honors it, skipping `completed` files unless `--force`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Full,
    Incremental,
}

pub fn filter_by_date(files: Vec<LogFile>, selector: &DateSelector) -> Vec<LogFile> {
    match selector {
        DateSelector::All => files,
        DateSelector::Single(date) => {
            let normalized = normalize_date(date);
            files.into_iter().filter(|f| f.date_partition == normalized).collect()
        }
    }
}

fn normalize_date(date: &str) -> String {
    if date.len() == 8 && date.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}-{}", &date[0..4], &date[4..6], &date[6..8])
    } else {
        date.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::types::{Compression, LogFormat};

    fn file(partition: &str) -> LogFile {
        LogFile {
            path: format!("/root/{partition}/a.log").into(),
            date_partition: partition.to_string(),
            size_bytes: 0,
            modified: chrono::Local::now().naive_local(),
            format_hint: LogFormat::KeyValueText,
            compression: Compression::Plain,
        }
    }

    #[test]
    fn single_date_filter_normalizes_compact_format() {
        let files = vec![file("2025-08-29"), file("2025-08-30")];
        let filtered = filter_by_date(files, &DateSelector::Single("20250829".to_string()));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].date_partition, "2025-08-29");
    }

    #[test]
    fn all_selector_keeps_everything() {
        let files = vec![file("2025-08-29"), file("2025-08-30")];
        let filtered = filter_by_date(files, &DateSelector::All);
        assert_eq!(filtered.len(), 2);
    }
}
