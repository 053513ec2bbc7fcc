use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};

/// A single priority-ordered, first-match-wins user-agent classification
/// rule. Rules are data, loaded from configuration — never hardcoded
/// `match` arms — per the design note that classification tables are
/// part of configuration, not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAgentRule {
    /// Regex matched against the raw `User-Agent` string.
    pub pattern: String,
    /// Lower values are evaluated first.
    pub priority: i32,
    pub platform: Option<String>,
    pub platform_version_group: Option<usize>,
    pub device_type: Option<String>,
    pub browser_type: Option<String>,
    pub os_type: Option<String>,
    pub bot_type: Option<String>,
}

/// A single priority-ordered, first-match-wins API-category rule, matched
/// against the normalized URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRule {
    /// Regex matched against the normalized URI.
    pub pattern: String,
    pub priority: i32,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

/// Assembled runtime configuration: defaults, layered with an optional
/// TOML file, then environment variables, then CLI flags (the CLI crate
/// applies flags last via `Config::apply_overrides`).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(range(min = 1))]
    pub batch_size: usize,
    /// Soft cap on lines read before a flush is considered, in addition to
    /// `batch_size` and `flush_interval`.
    #[validate(range(min = 1))]
    pub batch_line_cap: usize,
    pub flush_interval: Duration,

    #[validate(range(min = 1))]
    pub workers: usize,
    /// Bounded dispatch queue depth; defaults to `2 * workers`.
    pub queue_depth: usize,

    pub stabilization_wait: Duration,
    pub stale_after: Duration,

    pub slow_threshold_secs: f64,
    pub success_status_codes: HashSet<String>,

    pub warehouse_insert_timeout: Duration,
    pub retry: RetryConfig,

    pub parse_failure_log_limit: usize,

    pub refresh_minutes: f64,
    pub monitor_duration_secs: u64,

    pub warehouse_host: String,
    pub warehouse_port: u16,
    pub warehouse_user: String,
    #[serde(default)]
    pub warehouse_password: String,
    pub warehouse_database: String,

    pub user_agent_rules: Vec<UserAgentRule>,
    pub api_rules: Vec<ApiRule>,

    /// Overridden from `ETL_LOG_LEVEL` after assembly; not part of the
    /// warehouse/processing contract, so it has no `config`-file key.
    #[serde(default)]
    pub log_level_hint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let workers = 6;
        Self {
            batch_size: 3000,
            batch_line_cap: 50_000,
            flush_interval: Duration::from_secs(10),
            workers,
            queue_depth: workers * 2,
            stabilization_wait: Duration::from_secs(30),
            stale_after: Duration::from_secs(2 * 3600),
            slow_threshold_secs: 3.0,
            success_status_codes: [200, 201, 202, 204, 206, 301, 302, 304]
                .into_iter()
                .map(|c| c.to_string())
                .collect(),
            warehouse_insert_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            parse_failure_log_limit: 20,
            refresh_minutes: 3.0,
            monitor_duration_secs: 7200,
            warehouse_host: "localhost".to_string(),
            warehouse_port: 8123,
            warehouse_user: "default".to_string(),
            warehouse_password: String::new(),
            warehouse_database: "nginx_logs".to_string(),
            user_agent_rules: default_user_agent_rules(),
            api_rules: default_api_rules(),
            log_level_hint: None,
        }
    }
}

impl Config {
    /// Load defaults, optionally layered with a TOML file, then
    /// `WAREHOUSE_*`/`ETL_*` environment variables. The five `WAREHOUSE_*`
    /// variables are applied explicitly rather than through
    /// `config::Environment`'s generic prefix/separator splitting: that
    /// splitting treats every underscore as a nesting boundary, which
    /// collides with this struct's already-underscored flat field names
    /// (`warehouse_host`, not a nested `warehouse.host`).
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let assembled = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to assemble configuration: {e}")))?;

        let mut cfg: Config = assembled
            .try_deserialize()
            .map_err(|e| Error::Config(format!("failed to deserialize configuration: {e}")))?;

        if let Ok(host) = std::env::var("WAREHOUSE_HOST") {
            cfg.warehouse_host = host;
        }
        if let Ok(port) = std::env::var("WAREHOUSE_PORT") {
            cfg.warehouse_port = port
                .parse()
                .map_err(|_| Error::Config(format!("WAREHOUSE_PORT is not a valid port: {port}")))?;
        }
        if let Ok(user) = std::env::var("WAREHOUSE_USER") {
            cfg.warehouse_user = user;
        }
        if let Ok(password) = std::env::var("WAREHOUSE_PASSWORD") {
            cfg.warehouse_password = password;
        }
        if let Ok(database) = std::env::var("WAREHOUSE_DATABASE") {
            cfg.warehouse_database = database;
        }
        if let Ok(level) = std::env::var("ETL_LOG_LEVEL") {
            cfg.log_level_hint = Some(level);
        }

        cfg.validate()
            .map_err(|e| Error::Config(format!("invalid configuration: {e}")))?;

        Ok(cfg)
    }
}

impl Config {
    /// Read by the CLI crate's tracing setup.
    pub fn log_level(&self) -> Option<&str> {
        self.log_level_hint.as_deref()
    }

    pub fn with_log_level_hint(mut self, hint: Option<String>) -> Self {
        self.log_level_hint = hint;
        self
    }
}

fn default_user_agent_rules() -> Vec<UserAgentRule> {
    vec![
        UserAgentRule {
            pattern: r"(?i)bot|spider|crawl|slurp".to_string(),
            priority: 0,
            platform: None,
            platform_version_group: None,
            device_type: Some("bot".to_string()),
            browser_type: None,
            os_type: None,
            bot_type: Some("generic".to_string()),
        },
        UserAgentRule {
            pattern: r"(?i)iPhone|iPad|iOS".to_string(),
            priority: 10,
            platform: Some("iOS".to_string()),
            platform_version_group: None,
            device_type: Some("mobile".to_string()),
            browser_type: None,
            os_type: Some("iOS".to_string()),
            bot_type: None,
        },
        UserAgentRule {
            pattern: r"(?i)Android".to_string(),
            priority: 20,
            platform: Some("Android".to_string()),
            platform_version_group: None,
            device_type: Some("mobile".to_string()),
            browser_type: None,
            os_type: Some("Android".to_string()),
            bot_type: None,
        },
        UserAgentRule {
            pattern: r"(?i)Windows".to_string(),
            priority: 30,
            platform: Some("Windows".to_string()),
            platform_version_group: None,
            device_type: Some("desktop".to_string()),
            browser_type: None,
            os_type: Some("Windows".to_string()),
            bot_type: None,
        },
        UserAgentRule {
            pattern: r"(?i)Macintosh|Mac OS X".to_string(),
            priority: 40,
            platform: Some("macOS".to_string()),
            platform_version_group: None,
            device_type: Some("desktop".to_string()),
            browser_type: None,
            os_type: Some("macOS".to_string()),
            bot_type: None,
        },
        UserAgentRule {
            pattern: r"(?i)Linux".to_string(),
            priority: 50,
            platform: Some("Linux".to_string()),
            platform_version_group: None,
            device_type: Some("desktop".to_string()),
            browser_type: None,
            os_type: Some("Linux".to_string()),
            bot_type: None,
        },
        UserAgentRule {
            pattern: r"(?i)Mozilla|Chrome|Safari|Firefox".to_string(),
            priority: 60,
            platform: Some("Web".to_string()),
            platform_version_group: None,
            device_type: Some("desktop".to_string()),
            browser_type: None,
            os_type: None,
            bot_type: None,
        },
    ]
}

fn default_api_rules() -> Vec<ApiRule> {
    vec![
        ApiRule {
            pattern: r"^/health".to_string(),
            priority: 0,
            category: "health".to_string(),
        },
        ApiRule {
            pattern: r"^/(static|assets|css|js|images)/".to_string(),
            priority: 10,
            category: "static".to_string(),
        },
        ApiRule {
            pattern: r"^/api/v\d+/auth".to_string(),
            priority: 20,
            category: "auth".to_string(),
        },
        ApiRule {
            pattern: r"^/api/v\d+/admin".to_string(),
            priority: 30,
            category: "admin".to_string(),
        },
        ApiRule {
            pattern: r"^/api/".to_string(),
            priority: 40,
            category: "business".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes tests that mutate process-wide env vars so they don't
    // stomp on each other under cargo's parallel test runner.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_load_without_a_config_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.warehouse_host, "localhost");
        assert_eq!(cfg.workers, 6);
    }

    #[test]
    fn warehouse_env_vars_override_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("WAREHOUSE_HOST", "warehouse.internal");
        std::env::set_var("WAREHOUSE_PORT", "9000");
        std::env::set_var("WAREHOUSE_DATABASE", "nginx_logs_test");
        std::env::set_var("ETL_LOG_LEVEL", "debug");

        let cfg = Config::load(None).unwrap();

        std::env::remove_var("WAREHOUSE_HOST");
        std::env::remove_var("WAREHOUSE_PORT");
        std::env::remove_var("WAREHOUSE_DATABASE");
        std::env::remove_var("ETL_LOG_LEVEL");

        assert_eq!(cfg.warehouse_host, "warehouse.internal");
        assert_eq!(cfg.warehouse_port, 9000);
        assert_eq!(cfg.warehouse_database, "nginx_logs_test");
        assert_eq!(cfg.log_level().unwrap(), "debug");
    }

    #[test]
    fn invalid_warehouse_port_is_a_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("WAREHOUSE_PORT", "not-a-port");
        let result = Config::load(None);
        std::env::remove_var("WAREHOUSE_PORT");
        assert!(result.is_err());
    }
}
