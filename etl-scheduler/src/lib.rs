//! Discovery and scheduling (C6): walks the date-partitioned log tree,
//! filters candidates by date and processing state, dispatches them
//! across a bounded worker pool, and optionally loops as a long-lived
//! daemon that rescans on an interval.

pub mod discovery;
pub mod filter;
pub mod lock;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use etl_core::Config;
use etl_processor::{BatchProcessor, CancellationFlag, ProcessOptions, ProcessResult};
use etl_state::StateStore;

pub use filter::{DateSelector, RunMode};

/// End-of-run tally, printed as the user-visible summary table.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub discovered: u64,
    pub skipped_completed: u64,
    pub skipped_in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub parse_failures_total: u64,
    pub records_ingested_total: u64,
    pub elapsed: Duration,
    pub failed_files: Vec<(PathBuf, String)>,
}

impl RunSummary {
    /// 0 = nothing failed (including "nothing to do"); 1 = at least one
    /// file failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.discovered += other.discovered;
        self.skipped_completed += other.skipped_completed;
        self.skipped_in_progress += other.skipped_in_progress;
        self.completed += other.completed;
        self.failed += other.failed;
        self.parse_failures_total += other.parse_failures_total;
        self.records_ingested_total += other.records_ingested_total;
        self.failed_files.extend(other.failed_files);
    }
}

pub struct Scheduler {
    config: Config,
    processor: Arc<BatchProcessor>,
    state: Arc<StateStore>,
}

impl Scheduler {
    pub fn new(config: Config, processor: Arc<BatchProcessor>, state: Arc<StateStore>) -> Self {
        Self {
            config,
            processor,
            state,
        }
    }

    /// Discovers, filters, and dispatches one pass over `root`.
    pub async fn run_once(
        &self,
        root: &Path,
        selector: DateSelector,
        mode: RunMode,
        opts: ProcessOptions,
        cancel: CancellationFlag,
    ) -> RunSummary {
        let start = Instant::now();
        let mut candidates = discovery::walk(root);
        candidates = filter::filter_by_date(candidates, &selector);
        discovery::sort_for_dispatch(&mut candidates);

        let opts = if mode == RunMode::Full {
            // `--mode full` bypasses the state store: every candidate is
            // dispatched with `force` semantics regardless of prior runs.
            ProcessOptions { force: true, ..opts }
        } else {
            opts
        };

        let mut summary = dispatch(
            &candidates,
            self.processor.clone(),
            opts,
            cancel,
            self.config.workers,
            self.config.queue_depth,
        )
        .await;
        summary.elapsed = start.elapsed();
        summary
    }

    /// `--auto-monitor`: repeats `run_once` every `refresh_minutes` until
    /// `monitor_duration_secs` elapses or `cancel` fires. A process-wide
    /// lock file under `root` prevents two daemons racing the same tree.
    pub async fn run_daemon(
        &self,
        root: &Path,
        selector: DateSelector,
        mode: RunMode,
        opts: ProcessOptions,
        cancel: CancellationFlag,
    ) -> etl_core::Result<RunSummary> {
        let _lock = lock::DaemonLock::acquire(root)
            .map_err(|e| etl_core::Error::Config(format!("daemon lock: {e}")))?;

        let wall_budget = Duration::from_secs(self.config.monitor_duration_secs);
        let refresh = Duration::from_secs_f64((self.config.refresh_minutes * 60.0).max(0.0));
        let started = Instant::now();
        let mut total = RunSummary::default();

        loop {
            if cancel.is_cancelled() || started.elapsed() >= wall_budget {
                break;
            }
            let pass = self
                .run_once(root, selector.clone(), mode, opts, cancel.clone())
                .await;
            tracing::info!(
                discovered = pass.discovered,
                completed = pass.completed,
                failed = pass.failed,
                "daemon scan complete"
            );
            total.merge(pass);

            if cancel.is_cancelled() || started.elapsed() >= wall_budget {
                break;
            }
            let remaining = wall_budget.saturating_sub(started.elapsed());
            tokio::time::sleep(refresh.min(remaining)).await;
        }

        total.elapsed = started.elapsed();
        Ok(total)
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }
}

/// Fans `files` out across a bounded worker pool (size `config.workers`,
/// queue depth `config.queue_depth`). Dispatch is non-blocking; discovery
/// naturally stalls once the queue is full, providing backpressure.
async fn dispatch(
    files: &[etl_core::types::LogFile],
    processor: Arc<BatchProcessor>,
    opts: ProcessOptions,
    cancel: CancellationFlag,
    workers: usize,
    queue_depth: usize,
) -> RunSummary {
    let workers = workers.max(1);
    let (tx, rx) = tokio::sync::mpsc::channel::<etl_core::types::LogFile>(queue_depth.max(1));
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let summary = Arc::new(StdMutex::new(RunSummary::default()));

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx = rx.clone();
        let processor = processor.clone();
        let summary = summary.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let next = { rx.lock().await.recv().await };
                let Some(file) = next else { break };
                let result = processor.process_file(&file, opts, &cancel).await;
                record(&summary, &file.path, result);
            }
        }));
    }

    for file in files {
        if cancel.is_cancelled() {
            break;
        }
        if tx.send(file.clone()).await.is_err() {
            break;
        }
    }
    drop(tx);

    for handle in handles {
        let _ = handle.await;
    }

    Arc::try_unwrap(summary)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default()
}

fn record(
    summary: &Arc<StdMutex<RunSummary>>,
    path: &Path,
    result: etl_core::Result<ProcessResult>,
) {
    let mut summary = summary.lock().unwrap();
    summary.discovered += 1;
    match result {
        Ok(ProcessResult::Completed(stats)) => {
            summary.completed += 1;
            summary.records_ingested_total += stats.records_ingested;
            summary.parse_failures_total += stats.parse_failures;
        }
        Ok(ProcessResult::Failed { stats, error }) => {
            summary.failed += 1;
            summary.records_ingested_total += stats.records_ingested;
            summary.parse_failures_total += stats.parse_failures;
            summary.failed_files.push((path.to_path_buf(), error));
        }
        Ok(ProcessResult::SkippedCompleted) => summary.skipped_completed += 1,
        Ok(ProcessResult::SkippedInProgress) => summary.skipped_in_progress += 1,
        Err(e) => {
            summary.failed += 1;
            summary.failed_files.push((path.to_path_buf(), e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use etl_warehouse::{InsertOutcome, WarehouseClient, WarehouseMetrics};
    use serde_json::{Map, Value};
    use std::io::Write;

    struct NullWarehouse;

    #[async_trait]
    impl WarehouseClient for NullWarehouse {
        async fn insert(&self, _table: &str, _columns: &[String], rows: Vec<Map<String, Value>>) -> etl_core::Result<InsertOutcome> {
            Ok(InsertOutcome {
                ingested: rows.len() as u64,
                retried: 0,
            })
        }
        async fn exec_ddl(&self, _statements: &[String]) -> etl_core::Result<()> {
            Ok(())
        }
        async fn ping(&self) -> etl_core::Result<()> {
            Ok(())
        }
        fn metrics(&self) -> WarehouseMetrics {
            WarehouseMetrics::new()
        }
    }

    fn write_partition(root: &Path, partition: &str, name: &str, contents: &str) {
        let dir = root.join(partition);
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn opts() -> ProcessOptions {
        ProcessOptions {
            force: true,
            dry_run: false,
            limit: None,
            today: chrono::NaiveDate::from_ymd_opt(2025, 8, 29).unwrap(),
        }
    }

    #[tokio::test]
    async fn run_once_processes_discovered_files_and_tallies_summary() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "2025-08-29", "a.log", "time:\"2025-08-29T07:15:37+08:00\" status:\"200\"\n");
        write_partition(dir.path(), "2025-08-29", "b.log", "not a log\n");

        let state = Arc::new(StateStore::open(dir.path(), Duration::from_secs(7200)).unwrap());
        let warehouse: Arc<dyn WarehouseClient> = Arc::new(NullWarehouse);
        let config = Config::default();
        let processor = Arc::new(BatchProcessor::new(config.clone(), warehouse, state.clone()));
        let scheduler = Scheduler::new(config, processor, state);

        let summary = scheduler
            .run_once(dir.path(), DateSelector::All, RunMode::Incremental, opts(), CancellationFlag::new())
            .await;

        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.records_ingested_total, 1);
        assert_eq!(summary.parse_failures_total, 1);
    }

    #[tokio::test]
    async fn second_incremental_run_skips_completed_files() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), "2025-08-29", "a.log", "time:\"2025-08-29T07:15:37+08:00\" status:\"200\"\n");

        let state = Arc::new(StateStore::open(dir.path(), Duration::from_secs(7200)).unwrap());
        let warehouse: Arc<dyn WarehouseClient> = Arc::new(NullWarehouse);
        let config = Config::default();
        let processor = Arc::new(BatchProcessor::new(config.clone(), warehouse, state.clone()));
        let scheduler = Scheduler::new(config, processor, state);

        let mut non_force = opts();
        non_force.force = false;

        let first = scheduler
            .run_once(dir.path(), DateSelector::All, RunMode::Incremental, non_force, CancellationFlag::new())
            .await;
        assert_eq!(first.completed, 1);

        let second = scheduler
            .run_once(dir.path(), DateSelector::All, RunMode::Incremental, non_force, CancellationFlag::new())
            .await;
        assert_eq!(second.completed, 0);
        assert_eq!(second.skipped_completed, 1);
    }
}
