//! `nginx-etl`: discover, claim, parse, enrich, and load nginx access
//! logs into the analytics warehouse.

mod ddl;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use etl_core::Config;
use etl_processor::{BatchProcessor, CancellationFlag, ProcessOptions};
use etl_scheduler::{DateSelector, RunMode, Scheduler};
use etl_state::StateStore;
use etl_warehouse::{HttpWarehouseClient, WarehouseClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "nginx-etl", about = "Incremental ETL for nginx access logs")]
struct Cli {
    /// Root of the date-partitioned log tree.
    #[arg(long)]
    log_dir: PathBuf,

    /// Process only this partition (YYYYMMDD or YYYY-MM-DD).
    #[arg(long)]
    date: Option<String>,

    /// Process all unfinished partitions.
    #[arg(long)]
    all: bool,

    #[arg(long, value_enum, default_value_t = ModeArg::Incremental)]
    mode: ModeArg,

    /// Re-process completed files and skip stabilization.
    #[arg(long)]
    force: bool,

    /// Cap records ingested per file (debug aid).
    #[arg(long)]
    limit: Option<u64>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    /// Enter daemon mode: rescan every `--refresh-minutes` until
    /// `--monitor-duration` elapses.
    #[arg(long)]
    auto_monitor: bool,

    #[arg(long)]
    monitor_duration: Option<u64>,

    #[arg(long)]
    refresh_minutes: Option<f64>,

    /// Print state store contents and exit without processing anything.
    #[arg(long)]
    status: bool,

    /// Transition failed rows back to pending and exit.
    #[arg(long)]
    reset_failed: bool,

    /// Dry run: parse and enrich but never insert into the warehouse.
    #[arg(long)]
    test: bool,

    /// Create the raw and enriched detail tables, then exit.
    #[arg(long)]
    bootstrap_ddl: bool,

    /// Optional TOML configuration file, layered under environment
    /// variables and these flags.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Full,
    Incremental,
}

impl From<ModeArg> for RunMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Full => RunMode::Full,
            ModeArg::Incremental => RunMode::Incremental,
        }
    }
}

impl std::fmt::Display for ModeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeArg::Full => write!(f, "full"),
            ModeArg::Incremental => write!(f, "incremental"),
        }
    }
}

const EXIT_OK: u8 = 0;
const EXIT_FAILURES: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_ENVIRONMENT: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
        config.queue_depth = workers * 2;
    }
    if let Some(secs) = cli.monitor_duration {
        config.monitor_duration_secs = secs;
    }
    if let Some(minutes) = cli.refresh_minutes {
        config.refresh_minutes = minutes;
    }

    init_tracing(&config);
    install_metrics_recorder();

    if !cli.log_dir.is_dir() {
        tracing::error!(path = %cli.log_dir.display(), "log root does not exist");
        return ExitCode::from(EXIT_ENVIRONMENT);
    }

    let state = match StateStore::open(&cli.log_dir, config.stale_after) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "failed to open state store");
            return ExitCode::from(EXIT_ENVIRONMENT);
        }
    };

    if cli.status {
        return match state.list_all() {
            Ok(rows) => {
                report::print_status(&rows);
                ExitCode::from(EXIT_OK)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read state store");
                ExitCode::from(EXIT_ENVIRONMENT)
            }
        };
    }

    if cli.reset_failed {
        return match state.reset_failed(cli.date.as_deref()) {
            Ok(count) => {
                println!("reset {count} failed file(s) to pending");
                ExitCode::from(EXIT_OK)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to reset failed rows");
                ExitCode::from(EXIT_ENVIRONMENT)
            }
        };
    }

    let warehouse = match HttpWarehouseClient::from_config(&config) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "failed to build warehouse client");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    if let Err(e) = warehouse.ping().await {
        tracing::error!(error = %e, "warehouse unreachable");
        return ExitCode::from(EXIT_ENVIRONMENT);
    }
    let warehouse: Arc<dyn WarehouseClient> = Arc::new(warehouse);

    if cli.bootstrap_ddl {
        let statements = ddl::statements(&config.warehouse_database);
        return match warehouse.exec_ddl(&statements).await {
            Ok(()) => {
                println!("bootstrapped {} DDL statement(s)", statements.len());
                ExitCode::from(EXIT_OK)
            }
            Err(e) => {
                tracing::error!(error = %e, "DDL bootstrap failed");
                ExitCode::from(EXIT_ENVIRONMENT)
            }
        };
    }

    let selector = match (&cli.date, cli.all) {
        (Some(date), _) => DateSelector::Single(date.clone()),
        (None, true) => DateSelector::All,
        (None, false) => {
            eprintln!("one of --date or --all is required");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let processor = Arc::new(BatchProcessor::new(config.clone(), warehouse, state.clone()));
    let scheduler = Scheduler::new(config.clone(), processor, state);

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("received interrupt, finishing in-flight files then stopping");
                cancel.cancel();
            }
        });
    }

    let opts = ProcessOptions {
        force: cli.force,
        dry_run: cli.test,
        limit: cli.limit,
        today: chrono::Local::now().date_naive(),
    };

    let summary = if cli.auto_monitor {
        match scheduler
            .run_daemon(&cli.log_dir, selector, cli.mode.into(), opts, cancel)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(error = %e, "daemon run failed to start");
                return ExitCode::from(EXIT_ENVIRONMENT);
            }
        }
    } else {
        scheduler
            .run_once(&cli.log_dir, selector, cli.mode.into(), opts, cancel)
            .await
    };

    report::print_summary(&summary);
    if summary.exit_code() == 0 {
        ExitCode::from(EXIT_OK)
    } else {
        ExitCode::from(EXIT_FAILURES)
    }
}

/// Exposes `etl_*` counters/histograms for scraping. Failure to bind (a
/// second instance, a taken port) is logged and otherwise ignored — the
/// run still produces its stdout summary without Prometheus.
fn install_metrics_recorder() {
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        tracing::warn!(error = %e, "failed to install Prometheus metrics exporter");
    }
}

fn init_tracing(config: &Config) {
    let filter = config
        .log_level()
        .map(EnvFilter::new)
        .or_else(|| std::env::var("RUST_LOG").ok().map(EnvFilter::new))
        .unwrap_or_else(|| EnvFilter::new("nginx_etl=info,etl_scheduler=info,etl_processor=info"));

    let file_appender = tracing_appender::rolling::daily("logs", "nginx-etl.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked so the writer outlives `main` without threading a guard
    // through every exit path of this function.
    Box::leak(Box::new(guard));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_arg_maps_to_run_mode() {
        assert_eq!(RunMode::from(ModeArg::Full), RunMode::Full);
        assert_eq!(RunMode::from(ModeArg::Incremental), RunMode::Incremental);
    }
}
