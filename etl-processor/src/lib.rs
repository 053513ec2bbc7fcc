//! Per-file ETL procedure (C5): stabilize, claim, stream, parse, enrich,
//! batch, flush, finish — in that order, for exactly one [`LogFile`] at a
//! time. No intra-file parallelism: one worker reads, parses, enriches,
//! and buffers a file's lines sequentially, matching the spec's ordering
//! guarantee (in-order within a file, unordered across files).

pub mod row;
mod stabilize;
mod stream;

use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use etl_core::types::{FileStatus, LogFile, RawRecord};
use etl_core::{Config, Error, Result};
use etl_enrich::Enricher;
use etl_parser::ParserStats;
use etl_state::{ClaimResult, Outcome, StateDelta, StateStore};
use etl_warehouse::WarehouseClient;

pub use row::record_id;

/// A shared flag workers poll between lines and before every flush.
/// Cloned cheaply; the scheduler flips it once on SIGINT/SIGTERM.
#[derive(Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub force: bool,
    /// `--test`: parse and enrich but never insert into the warehouse.
    pub dry_run: bool,
    /// `--limit N`: cap records ingested from this file.
    pub limit: Option<u64>,
    /// Used to decide the stabilization exception for past-date partitions.
    pub today: NaiveDate,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessStats {
    pub records_ingested: u64,
    pub parse_failures: u64,
    pub bytes_consumed: u64,
}

#[derive(Debug, Clone)]
pub enum ProcessResult {
    Completed(ProcessStats),
    Failed { stats: ProcessStats, error: String },
    SkippedCompleted,
    SkippedInProgress,
}

pub struct BatchProcessor {
    enricher: Enricher,
    warehouse: Arc<dyn WarehouseClient>,
    state: Arc<StateStore>,
    config: Config,
}

impl BatchProcessor {
    pub fn new(config: Config, warehouse: Arc<dyn WarehouseClient>, state: Arc<StateStore>) -> Self {
        let enricher = Enricher::new(&config);
        Self {
            enricher,
            warehouse,
            state,
            config,
        }
    }

    pub async fn process_file(
        &self,
        file: &LogFile,
        opts: ProcessOptions,
        cancel: &CancellationFlag,
    ) -> Result<ProcessResult> {
        if !opts.force && !self.is_stabilization_exempt(file, opts.today) {
            match stabilize::stabilize(&file.path, self.config.stabilization_wait).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(path = %file.path.display(), "file still growing, deferring to next scan");
                    return Ok(ProcessResult::SkippedInProgress);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        let content_hash = match self.state.claim(file, opts.force)? {
            ClaimResult::Proceed { content_hash } => content_hash,
            ClaimResult::SkipCompleted => return Ok(ProcessResult::SkippedCompleted),
            ClaimResult::SkipInProgress => return Ok(ProcessResult::SkippedInProgress),
        };

        match self
            .run_pipeline(file, &content_hash, opts, cancel)
            .await
        {
            Ok(stats) => {
                self.state.finish(&file.path, &content_hash, Outcome::Completed, None)?;
                metrics::counter!("etl_files_completed_total").increment(1);
                metrics::counter!("etl_parse_failures_total").increment(stats.parse_failures);
                Ok(ProcessResult::Completed(stats))
            }
            Err((stats, error)) => {
                let message = error.to_string();
                self.state
                    .finish(&file.path, &content_hash, Outcome::Failed, Some(message.clone()))?;
                metrics::counter!("etl_files_failed_total").increment(1);
                Ok(ProcessResult::Failed { stats, error: message })
            }
        }
    }

    fn is_stabilization_exempt(&self, file: &LogFile, today: NaiveDate) -> bool {
        match NaiveDate::parse_from_str(&file.date_partition, "%Y-%m-%d") {
            Ok(date) => (today - date).num_days() > 1,
            Err(_) => false,
        }
    }

    async fn run_pipeline(
        &self,
        file: &LogFile,
        content_hash: &str,
        opts: ProcessOptions,
        cancel: &CancellationFlag,
    ) -> std::result::Result<ProcessStats, (ProcessStats, Error)> {
        let mut stats = ProcessStats::default();
        let mut parser_stats = ParserStats::new(self.config.parse_failure_log_limit);

        let mut reader = match stream::open_lines(&file.path) {
            Ok(r) => r,
            Err(e) => return Err((stats, Error::Io(e))),
        };

        let mut format: Option<etl_core::types::LogFormat> = None;
        let mut byte_offset: u64 = 0;
        let mut raw_batch = Vec::with_capacity(self.config.batch_size);
        let mut enriched_batch = Vec::with_capacity(self.config.batch_size);
        let mut lines_since_flush: usize = 0;
        let mut last_flush = Instant::now();
        let mut line_number: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                if let Err(e) = self
                    .flush(file, &mut raw_batch, &mut enriched_batch, opts.dry_run)
                    .await
                {
                    return Err((stats, e));
                }
                self.apply_delta(&file.path, content_hash, &mut stats, &parser_stats)
                    .ok();
                return Err((stats, Error::Cancelled));
            }

            let mut line = String::new();
            let read = match reader.read_line(&mut line) {
                Ok(n) => n,
                Err(e) => return Err((stats, Error::Io(e))),
            };
            if read == 0 {
                break;
            }
            line_number += 1;
            byte_offset += read as u64;

            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
                continue;
            }

            if let Some(limit) = opts.limit {
                if stats.records_ingested >= limit {
                    break;
                }
            }

            let fmt = *format.get_or_insert_with(|| etl_parser::detect_format(trimmed));

            match etl_parser::parse_line(fmt, trimmed) {
                etl_parser::LineOutcome::Record(raw) => {
                    match self.append_record(file, content_hash, byte_offset, raw, &mut raw_batch, &mut enriched_batch) {
                        Ok(()) => {
                            parser_stats.record_success();
                            lines_since_flush += 1;
                        }
                        Err(reason) => parser_stats.record_failure(line_number, reason, trimmed),
                    }
                }
                etl_parser::LineOutcome::Skip => {}
                etl_parser::LineOutcome::Failure(reason) => {
                    parser_stats.record_failure(line_number, reason, trimmed);
                }
            }

            let should_flush = enriched_batch.len() >= self.config.batch_size
                || lines_since_flush >= self.config.batch_line_cap
                || last_flush.elapsed() >= self.config.flush_interval;

            if should_flush && !enriched_batch.is_empty() {
                if let Err(e) = self
                    .flush(file, &mut raw_batch, &mut enriched_batch, opts.dry_run)
                    .await
                {
                    return Err((stats, e));
                }
                lines_since_flush = 0;
                last_flush = Instant::now();
                if let Err(e) = self.apply_delta(&file.path, content_hash, &mut stats, &parser_stats) {
                    return Err((stats, e));
                }
            }
        }

        if let Err(e) = self
            .flush(file, &mut raw_batch, &mut enriched_batch, opts.dry_run)
            .await
        {
            return Err((stats, e));
        }
        if let Err(e) = self.apply_delta(&file.path, content_hash, &mut stats, &parser_stats) {
            return Err((stats, e));
        }
        stats.bytes_consumed = byte_offset;

        Ok(stats)
    }

    /// Writes the raw row unconditionally, then enriches. A record
    /// missing a mandatory field (timestamp, status) fails enrichment —
    /// its raw row still lands for diagnostics, but no enriched row is
    /// produced and the caller must count it as a parse/enrichment
    /// failure rather than a success.
    fn append_record(
        &self,
        file: &LogFile,
        content_hash: &str,
        byte_offset: u64,
        raw: RawRecord,
        raw_batch: &mut Vec<serde_json::Map<String, serde_json::Value>>,
        enriched_batch: &mut Vec<serde_json::Map<String, serde_json::Value>>,
    ) -> std::result::Result<(), String> {
        let id = row::record_id(&file.path, byte_offset, content_hash);
        raw_batch.push(row::raw_row(&raw, &id));
        let enriched = self.enricher.enrich(raw, id).map_err(|e| e.to_string())?;
        enriched_batch.push(row::enriched_row(&enriched));
        Ok(())
    }

    async fn flush(
        &self,
        _file: &LogFile,
        raw_batch: &mut Vec<serde_json::Map<String, serde_json::Value>>,
        enriched_batch: &mut Vec<serde_json::Map<String, serde_json::Value>>,
        dry_run: bool,
    ) -> Result<()> {
        if enriched_batch.is_empty() {
            return Ok(());
        }
        if dry_run {
            raw_batch.clear();
            enriched_batch.clear();
            return Ok(());
        }

        let raw_columns: Vec<String> = row::RAW_COLUMNS.iter().map(|s| s.to_string()).collect();
        let enriched_columns: Vec<String> = row::ENRICHED_COLUMNS.iter().map(|s| s.to_string()).collect();
        let batch_rows = enriched_batch.len() as f64;
        let start = Instant::now();

        self.warehouse
            .insert(RAW_TABLE, &raw_columns, std::mem::take(raw_batch))
            .await?;
        self.warehouse
            .insert(ENRICHED_TABLE, &enriched_columns, std::mem::take(enriched_batch))
            .await?;

        metrics::histogram!("etl_batch_flush_seconds").record(start.elapsed().as_secs_f64());
        metrics::counter!("etl_records_flushed_total").increment(batch_rows as u64);
        Ok(())
    }

    fn apply_delta(
        &self,
        path: &Path,
        content_hash: &str,
        stats: &mut ProcessStats,
        parser_stats: &ParserStats,
    ) -> Result<()> {
        let delta = StateDelta {
            records_ingested: parser_stats.lines_parsed - stats.records_ingested,
            parse_failures: parser_stats.lines_failed - stats.parse_failures,
            bytes_consumed: 0,
        };
        stats.records_ingested = parser_stats.lines_parsed;
        stats.parse_failures = parser_stats.lines_failed;
        if delta.records_ingested == 0 && delta.parse_failures == 0 {
            return Ok(());
        }
        self.state.update(path, content_hash, delta)
    }
}

pub const RAW_TABLE: &str = "nginx_raw";
pub const ENRICHED_TABLE: &str = "nginx_enriched_detail";

/// Classifies a [`FileStatus`] as terminal, used by the scheduler's
/// summary tally.
pub fn is_terminal(status: FileStatus) -> bool {
    matches!(status, FileStatus::Completed | FileStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use etl_core::types::{Compression, LogFormat};
    use etl_warehouse::{InsertOutcome, WarehouseMetrics};
    use serde_json::{Map, Value};
    use std::io::Write;
    use std::sync::Mutex as StdMutex;

    struct RecordingWarehouse {
        inserted: StdMutex<Vec<(String, usize)>>,
    }

    impl RecordingWarehouse {
        fn new() -> Self {
            Self {
                inserted: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WarehouseClient for RecordingWarehouse {
        async fn insert(&self, table: &str, _columns: &[String], rows: Vec<Map<String, Value>>) -> Result<InsertOutcome> {
            self.inserted.lock().unwrap().push((table.to_string(), rows.len()));
            Ok(InsertOutcome {
                ingested: rows.len() as u64,
                retried: 0,
            })
        }

        async fn exec_ddl(&self, _statements: &[String]) -> Result<()> {
            Ok(())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        fn metrics(&self) -> WarehouseMetrics {
            WarehouseMetrics::new()
        }
    }

    fn write_log(dir: &Path, name: &str, contents: &str) -> LogFile {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        LogFile {
            path,
            date_partition: "2025-08-29".to_string(),
            size_bytes: metadata.len(),
            modified: chrono::DateTime::<chrono::Local>::from(metadata.modified().unwrap()).naive_local(),
            format_hint: LogFormat::KeyValueText,
            compression: Compression::Plain,
        }
    }

    fn opts() -> ProcessOptions {
        ProcessOptions {
            force: true,
            dry_run: false,
            limit: None,
            today: NaiveDate::from_ymd_opt(2025, 8, 29).unwrap(),
        }
    }

    #[tokio::test]
    async fn happy_path_ingests_one_record_and_counts_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_log(
            dir.path(),
            "access.log",
            concat!(
                r#"time:"2025-08-29T07:15:37+08:00" remote_addr:"10.0.0.1" request:"GET /api/v1/users?id=42 HTTP/1.1" status:"200" body:"123" ar_time:"0.150" upstream_response_time:"0.140" upstream_header_time:"0.130" upstream_connect_time:"0.010" agent:"zgt-ios/1.4.1""#,
                "\n",
                "not a log\n",
            ),
        );

        let warehouse = Arc::new(RecordingWarehouse::new());
        let state = Arc::new(StateStore::open(dir.path(), Duration::from_secs(7200)).unwrap());
        let processor = BatchProcessor::new(Config::default(), warehouse.clone(), state.clone());

        let result = processor
            .process_file(&file, opts(), &CancellationFlag::new())
            .await
            .unwrap();

        match result {
            ProcessResult::Completed(stats) => {
                assert_eq!(stats.records_ingested, 1);
                assert_eq!(stats.parse_failures, 1);
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        let rows = state.list_all().unwrap();
        assert_eq!(rows[0].status, FileStatus::Completed);
        assert_eq!(rows[0].records_ingested, 1);
        assert_eq!(rows[0].parse_failures, 1);
    }

    #[tokio::test]
    async fn line_with_status_absent_is_counted_as_a_failure_not_ingested() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_log(
            dir.path(),
            "access.log",
            r#"time:"2025-08-29T07:15:37+08:00" request:"GET /x HTTP/1.1""#,
        );

        let warehouse = Arc::new(RecordingWarehouse::new());
        let state = Arc::new(StateStore::open(dir.path(), Duration::from_secs(7200)).unwrap());
        let processor = BatchProcessor::new(Config::default(), warehouse.clone(), state.clone());

        let result = processor
            .process_file(&file, opts(), &CancellationFlag::new())
            .await
            .unwrap();

        match result {
            ProcessResult::Completed(stats) => {
                assert_eq!(stats.records_ingested, 0);
                assert_eq!(stats.parse_failures, 1);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(warehouse
            .inserted
            .lock()
            .unwrap()
            .iter()
            .all(|(table, _)| table != ENRICHED_TABLE));
    }

    #[tokio::test]
    async fn empty_file_completes_with_zero_counts() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_log(dir.path(), "empty.log", "");

        let warehouse = Arc::new(RecordingWarehouse::new());
        let state = Arc::new(StateStore::open(dir.path(), Duration::from_secs(7200)).unwrap());
        let processor = BatchProcessor::new(Config::default(), warehouse, state.clone());

        let result = processor
            .process_file(&file, opts(), &CancellationFlag::new())
            .await
            .unwrap();

        match result {
            ProcessResult::Completed(stats) => {
                assert_eq!(stats.records_ingested, 0);
                assert_eq!(stats.parse_failures, 0);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dry_run_never_calls_warehouse_insert() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_log(
            dir.path(),
            "access.log",
            r#"time:"2025-08-29T07:15:37+08:00" status:"200""#,
        );

        let warehouse = Arc::new(RecordingWarehouse::new());
        let state = Arc::new(StateStore::open(dir.path(), Duration::from_secs(7200)).unwrap());
        let processor = BatchProcessor::new(Config::default(), warehouse.clone(), state.clone());

        let mut dry_opts = opts();
        dry_opts.dry_run = true;
        processor
            .process_file(&file, dry_opts, &CancellationFlag::new())
            .await
            .unwrap();

        assert!(warehouse.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_completed_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_log(dir.path(), "access.log", r#"time:"2025-08-29T07:15:37+08:00" status:"200""#);

        let warehouse = Arc::new(RecordingWarehouse::new());
        let state = Arc::new(StateStore::open(dir.path(), Duration::from_secs(7200)).unwrap());
        let processor = BatchProcessor::new(Config::default(), warehouse, state.clone());

        let mut non_force = opts();
        non_force.force = false;
        processor
            .process_file(&file, non_force, &CancellationFlag::new())
            .await
            .unwrap();

        let second = processor
            .process_file(&file, non_force, &CancellationFlag::new())
            .await
            .unwrap();
        assert!(matches!(second, ProcessResult::SkippedCompleted));
    }

    #[tokio::test]
    async fn cancellation_marks_file_failed() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_log(dir.path(), "access.log", r#"time:"2025-08-29T07:15:37+08:00" status:"200""#);

        let warehouse = Arc::new(RecordingWarehouse::new());
        let state = Arc::new(StateStore::open(dir.path(), Duration::from_secs(7200)).unwrap());
        let processor = BatchProcessor::new(Config::default(), warehouse, state.clone());

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let result = processor.process_file(&file, opts(), &cancel).await.unwrap();
        assert!(matches!(result, ProcessResult::Failed { .. }));

        let rows = state.list_all().unwrap();
        assert_eq!(rows[0].status, FileStatus::Failed);
        assert_eq!(rows[0].error_message.as_deref(), Some("cancelled"));
    }
}
