//! HTTP client for the columnar warehouse the pipeline loads into.
//!
//! Speaks a ClickHouse-style native HTTP interface: `INSERT ... FORMAT
//! JSONEachRow` for inserts, raw SQL over POST for DDL, and a plain
//! `/ping` for health probing. A fixed connection-pool semaphore caps
//! concurrent in-flight batches; exponential backoff retries transient
//! errors, while schema/constraint errors surface immediately.

mod metrics;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etl_core::config::{Config, RetryConfig};
use etl_core::error::{Error, Result};
use serde_json::{Map, Value};
use tokio::sync::{RwLock, Semaphore};
use tokio::time::Instant;

pub use metrics::WarehouseMetrics;

#[derive(Debug, Clone, Default)]
pub struct InsertOutcome {
    pub ingested: u64,
    pub retried: u32,
}

#[async_trait]
pub trait WarehouseClient: Send + Sync {
    async fn insert(&self, table: &str, columns: &[String], rows: Vec<Map<String, Value>>) -> Result<InsertOutcome>;
    async fn exec_ddl(&self, statements: &[String]) -> Result<()>;
    async fn ping(&self) -> Result<()>;
    fn metrics(&self) -> WarehouseMetrics;
}

pub struct HttpWarehouseClient {
    base_url: String,
    database: String,
    http: RwLock<reqwest::Client>,
    pool_size: usize,
    insert_timeout: Duration,
    pool: Arc<Semaphore>,
    metrics: Arc<WarehouseMetrics>,
    retry: RetryConfig,
}

impl HttpWarehouseClient {
    /// Builds a client from assembled configuration. The pool is sized
    /// `max(workers, 4)` per the batching contract, never shared across
    /// in-flight batches beyond that cap.
    pub fn from_config(config: &Config) -> Result<Self> {
        let pool_size = config.workers.max(4);
        let insert_timeout = config.warehouse_insert_timeout;
        let http = build_http_client(insert_timeout, pool_size)?;

        let scheme = if config.warehouse_port == 443 { "https" } else { "http" };
        let base_url = format!("{scheme}://{}:{}", config.warehouse_host, config.warehouse_port);

        Ok(Self {
            base_url,
            database: config.warehouse_database.clone(),
            http: RwLock::new(http),
            pool_size,
            insert_timeout,
            pool: Arc::new(Semaphore::new(pool_size)),
            metrics: Arc::new(WarehouseMetrics::new()),
            retry: config.retry.clone(),
        })
    }

    /// Probes health with a lightweight `/ping` before a batch is
    /// attempted. On failure, the pooled connection is evicted — the
    /// underlying `reqwest::Client` (and whatever keep-alive sockets it
    /// holds) is rebuilt — and probed once more so a warehouse restart
    /// mid-run is recovered from without spending a batch's retry budget
    /// on a connection that's already dead.
    async fn probe_and_evict(&self) -> Result<()> {
        if self.ping_with_current_client().await.is_ok() {
            return Ok(());
        }

        tracing::warn!("warehouse ping failed, evicting pooled connection");
        let fresh = build_http_client(self.insert_timeout, self.pool_size)?;
        *self.http.write().await = fresh;

        self.ping_with_current_client().await
    }

    async fn ping_with_current_client(&self) -> Result<()> {
        let url = format!("{}/ping", self.base_url);
        let http = self.http.read().await;
        let response = http
            .get(&url)
            .send()
            .await
            .map_err(Self::classify_transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::classify_response_error(response.status(), String::new()))
        }
    }

    async fn with_retry<F, Fut, T>(&self, mut attempt_fn: F) -> Result<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        let mut delay_ms = self.retry.base_delay_ms;

        loop {
            match attempt_fn().await {
                Ok(value) => return Ok((value, attempt)),
                Err(Error::WarehouseTransient(reason)) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        self.metrics.record_failure();
                        return Err(Error::WarehouseTransient(reason));
                    }
                    tracing::warn!(attempt, %reason, delay_ms, "transient warehouse error, retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = ((delay_ms as f64) * self.retry.factor) as u64;
                    delay_ms = delay_ms.min(self.retry.max_delay_ms);
                }
                Err(other) => {
                    self.metrics.record_failure();
                    return Err(other);
                }
            }
        }
    }

    fn classify_response_error(status: reqwest::StatusCode, body: String) -> Error {
        if status.is_server_error() {
            Error::WarehouseTransient(format!("{status}: {body}"))
        } else {
            Error::WarehousePermanent(format!("{status}: {body}"))
        }
    }

    fn classify_transport_error(err: reqwest::Error) -> Error {
        if err.is_timeout() || err.is_connect() {
            Error::WarehouseTransient(err.to_string())
        } else {
            Error::WarehousePermanent(err.to_string())
        }
    }

    async fn acquire_permit(&self) -> tokio::sync::SemaphorePermit<'_> {
        let permit = self
            .pool
            .acquire()
            .await
            .expect("warehouse connection semaphore is never closed");
        self.metrics
            .set_active_connections(self.pool.available_permits() as u64);
        permit
    }

    /// Filters a row down to `columns`, logging once per insert call (not
    /// per row) when the row carries fields the target table doesn't —
    /// the narrower of the two enriched-table layouts this warehouse may
    /// present.
    fn project_row(row: &Map<String, Value>, columns: &[String], warned: &mut bool) -> Map<String, Value> {
        if !*warned && row.len() > columns.len() {
            tracing::warn!(
                row_fields = row.len(),
                table_columns = columns.len(),
                "enriched record has more fields than the target table; writing column subset"
            );
            *warned = true;
        }
        let mut projected = Map::with_capacity(columns.len());
        for column in columns {
            if let Some(value) = row.get(column) {
                projected.insert(column.clone(), value.clone());
            }
        }
        projected
    }
}

#[async_trait]
impl WarehouseClient for HttpWarehouseClient {
    async fn insert(&self, table: &str, columns: &[String], rows: Vec<Map<String, Value>>) -> Result<InsertOutcome> {
        if rows.is_empty() {
            return Ok(InsertOutcome::default());
        }

        self.probe_and_evict().await?;

        let mut warned = false;
        let body = rows
            .iter()
            .map(|row| {
                let projected = Self::project_row(row, columns, &mut warned);
                serde_json::to_string(&Value::Object(projected))
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::Serialization)?
            .join("\n");

        let url = format!(
            "{}/?query={}",
            self.base_url,
            urlencode_insert_query(&self.database, table)
        );

        let start = Instant::now();
        let row_count = rows.len() as u64;

        let (_, retried) = self
            .with_retry(|| {
                let url = url.clone();
                let body = body.clone();
                async move {
                    let _permit = self.acquire_permit().await;
                    let response = self
                        .http
                        .read()
                        .await
                        .post(&url)
                        .body(body)
                        .send()
                        .await
                        .map_err(Self::classify_transport_error)?;

                    if response.status().is_success() {
                        Ok(())
                    } else {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        Err(Self::classify_response_error(status, text))
                    }
                }
            })
            .await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_insert(row_count, retried as u64, latency_ms);

        Ok(InsertOutcome {
            ingested: row_count,
            retried,
        })
    }

    async fn exec_ddl(&self, statements: &[String]) -> Result<()> {
        for statement in statements {
            let url = self.base_url.clone();
            let statement = statement.clone();
            self.with_retry(|| {
                let url = url.clone();
                let statement = statement.clone();
                async move {
                    let _permit = self.acquire_permit().await;
                    let response = self
                        .http
                        .read()
                        .await
                        .post(&url)
                        .body(statement)
                        .send()
                        .await
                        .map_err(Self::classify_transport_error)?;

                    if response.status().is_success() {
                        Ok(())
                    } else {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        Err(Self::classify_response_error(status, text))
                    }
                }
            })
            .await?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.ping_with_current_client().await
    }

    fn metrics(&self) -> WarehouseMetrics {
        (*self.metrics).clone()
    }
}

fn urlencode_insert_query(database: &str, table: &str) -> String {
    format!("INSERT%20INTO%20{database}.{table}%20FORMAT%20JSONEachRow")
}

fn build_http_client(insert_timeout: Duration, pool_size: usize) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(insert_timeout)
        .pool_max_idle_per_host(pool_size)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        let mut cfg = Config::default();
        cfg.workers = 2;
        cfg.warehouse_host = "localhost".to_string();
        cfg.warehouse_port = 8123;
        cfg
    }

    #[test]
    fn pool_size_is_at_least_four() {
        let cfg = sample_config();
        let client = HttpWarehouseClient::from_config(&cfg).unwrap();
        assert_eq!(client.pool.available_permits(), 4);
    }

    #[test]
    fn project_row_drops_unlisted_columns() {
        let mut row = Map::new();
        row.insert("id".to_string(), Value::String("abc".to_string()));
        row.insert("extra_field".to_string(), Value::String("x".to_string()));
        let columns = vec!["id".to_string()];
        let mut warned = false;
        let projected = HttpWarehouseClient::project_row(&row, &columns, &mut warned);
        assert_eq!(projected.len(), 1);
        assert!(projected.contains_key("id"));
        assert!(warned);
    }

    #[tokio::test]
    async fn empty_batch_never_flushes() {
        let cfg = sample_config();
        let client = HttpWarehouseClient::from_config(&cfg).unwrap();
        let outcome = client.insert("nginx_enriched", &["id".to_string()], vec![]).await.unwrap();
        assert_eq!(outcome.ingested, 0);
    }

    #[tokio::test]
    async fn insert_probes_health_before_attempting_the_batch() {
        let mut cfg = sample_config();
        cfg.warehouse_port = 1; // nothing listens here
        let client = HttpWarehouseClient::from_config(&cfg).unwrap();

        let mut row = Map::new();
        row.insert("id".to_string(), Value::String("x".to_string()));

        let result = client.insert("nginx_enriched", &["id".to_string()], vec![row]).await;
        assert!(result.is_err());
    }

    #[test]
    fn server_errors_classify_as_transient() {
        let err = HttpWarehouseClient::classify_response_error(
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            "overloaded".to_string(),
        );
        assert!(matches!(err, Error::WarehouseTransient(_)));
    }

    #[test]
    fn client_errors_classify_as_permanent() {
        let err = HttpWarehouseClient::classify_response_error(
            reqwest::StatusCode::BAD_REQUEST,
            "schema mismatch".to_string(),
        );
        assert!(matches!(err, Error::WarehousePermanent(_)));
    }
}
