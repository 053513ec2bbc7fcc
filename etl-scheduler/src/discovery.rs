use std::path::Path;

use chrono::NaiveDate;
use etl_core::types::{Compression, LogFile, LogFormat};
use walkdir::WalkDir;

/// Accepted log file extensions under a date partition.
fn is_log_file(name: &str) -> bool {
    name.ends_with(".log") || name.ends_with(".log.gz")
}

/// Parses a partition directory name as `YYYY-MM-DD` or `YYYYMMDD`,
/// normalizing to `YYYY-MM-DD`. Directories matching neither are not a
/// partition at all and are skipped by the walk, with a warning.
fn parse_partition(name: &str) -> Option<String> {
    if let Ok(date) = NaiveDate::parse_from_str(name, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if name.len() == 8 && name.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(date) = NaiveDate::parse_from_str(name, "%Y%m%d") {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

/// Walks `<root>/<partition>/<name>.log[.gz]`, bounded to two levels
/// under the root. Non-partition directories (neither date format) are
/// skipped with a logged warning, not treated as an error.
pub fn walk(root: &Path) -> Vec<LogFile> {
    let mut files = Vec::new();

    let partition_dirs: Vec<_> = match std::fs::read_dir(root) {
        Ok(entries) => entries.flatten().filter(|e| e.path().is_dir()).collect(),
        Err(e) => {
            tracing::error!(root = %root.display(), error = %e, "failed to read log root");
            return files;
        }
    };

    for entry in partition_dirs {
        let dir_name = entry.file_name().to_string_lossy().to_string();
        let Some(partition) = parse_partition(&dir_name) else {
            tracing::warn!(dir = %dir_name, "skipping non-date-partition directory");
            continue;
        };

        for file_entry in WalkDir::new(entry.path()).min_depth(1).max_depth(1) {
            let Ok(file_entry) = file_entry else { continue };
            if !file_entry.file_type().is_file() {
                continue;
            }
            let name = file_entry.file_name().to_string_lossy().to_string();
            if !is_log_file(&name) {
                continue;
            }

            let Ok(metadata) = file_entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };

            let compression = if name.ends_with(".gz") {
                Compression::Gzip
            } else {
                Compression::Plain
            };
            let format_hint = if name.contains("json") {
                LogFormat::Json
            } else {
                LogFormat::KeyValueText
            };

            files.push(LogFile {
                path: file_entry.path().to_path_buf(),
                date_partition: partition.clone(),
                size_bytes: metadata.len(),
                modified: chrono::DateTime::<chrono::Local>::from(modified).naive_local(),
                format_hint,
                compression,
            });
        }
    }

    files
}

/// Orders oldest-date-first, ascending filename within a date — the
/// processing order the scheduler dispatches in.
pub fn sort_for_dispatch(files: &mut [LogFile]) {
    files.sort_by(|a, b| {
        a.date_partition
            .cmp(&b.date_partition)
            .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_log_files_under_date_partitions() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("2025-08-29")).unwrap();
        fs::write(dir.path().join("2025-08-29/access.log"), "x").unwrap();
        fs::create_dir_all(dir.path().join("not-a-date")).unwrap();
        fs::write(dir.path().join("not-a-date/ignored.log"), "x").unwrap();

        let files = walk(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].date_partition, "2025-08-29");
    }

    #[test]
    fn accepts_compact_yyyymmdd_partitions() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("20250829")).unwrap();
        fs::write(dir.path().join("20250829/access.log"), "x").unwrap();

        let files = walk(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].date_partition, "2025-08-29");
    }

    #[test]
    fn sorts_oldest_date_first_then_by_filename() {
        let mut files = vec![
            LogFile {
                path: "/root/2025-08-30/b.log".into(),
                date_partition: "2025-08-30".to_string(),
                size_bytes: 0,
                modified: chrono::Local::now().naive_local(),
                format_hint: LogFormat::KeyValueText,
                compression: Compression::Plain,
            },
            LogFile {
                path: "/root/2025-08-29/z.log".into(),
                date_partition: "2025-08-29".to_string(),
                size_bytes: 0,
                modified: chrono::Local::now().naive_local(),
                format_hint: LogFormat::KeyValueText,
                compression: Compression::Plain,
            },
            LogFile {
                path: "/root/2025-08-29/a.log".into(),
                date_partition: "2025-08-29".to_string(),
                size_bytes: 0,
                modified: chrono::Local::now().naive_local(),
                format_hint: LogFormat::KeyValueText,
                compression: Compression::Plain,
            },
        ];
        sort_for_dispatch(&mut files);
        let names: Vec<_> = files.iter().map(|f| f.path.to_string_lossy().to_string()).collect();
        assert_eq!(names, vec!["/root/2025-08-29/a.log", "/root/2025-08-29/z.log", "/root/2025-08-30/b.log"]);
    }
}
