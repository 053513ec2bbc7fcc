use etl_core::types::FileState;
use etl_scheduler::RunSummary;

/// The end-of-run table described in the error-handling design: counts
/// plus the error message for every failed file.
pub fn print_summary(summary: &RunSummary) {
    println!("nginx-etl run summary");
    println!("  discovered:          {}", summary.discovered);
    println!("  skipped (completed): {}", summary.skipped_completed);
    println!("  skipped (in progress): {}", summary.skipped_in_progress);
    println!("  completed:           {}", summary.completed);
    println!("  failed:              {}", summary.failed);
    println!("  parse failures:      {}", summary.parse_failures_total);
    println!("  records ingested:    {}", summary.records_ingested_total);
    println!("  elapsed:             {:.1}s", summary.elapsed.as_secs_f64());

    if !summary.failed_files.is_empty() {
        println!("  failed files:");
        for (path, error) in &summary.failed_files {
            println!("    {}: {}", path.display(), error);
        }
    }
}

/// `--status`: raw C4 contents, one row per line.
pub fn print_status(rows: &[FileState]) {
    if rows.is_empty() {
        println!("no tracked files");
        return;
    }
    for row in rows {
        println!(
            "{:?}\t{}\trecords={}\tfailures={}\t{}",
            row.status,
            row.path.display(),
            row.records_ingested,
            row.parse_failures,
            row.error_message.as_deref().unwrap_or(""),
        );
    }
}
