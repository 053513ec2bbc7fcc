use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Source log format, either sniffed from the file or forced by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// `key:"value"` tokens separated by whitespace (the base-platform format).
    KeyValueText,
    /// One flat JSON object per line.
    Json,
}

/// On-disk compression of a log file, detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    Plain,
    Gzip,
}

/// Union of fields the parser recognizes across both source formats.
///
/// Missing fields are represented as `None`, never as zero or an empty
/// string — a numeric field written as `-` in the source is absent, not 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub server_name: Option<String>,
    pub client_ip: Option<String>,
    pub client_port: Option<u16>,
    pub method: Option<String>,
    pub uri: Option<String>,
    pub full_uri: Option<String>,
    pub protocol: Option<String>,
    pub status: Option<String>,
    pub response_body_size: Option<u64>,
    pub total_bytes_sent: Option<u64>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub upstream_addr: Option<String>,
    pub upstream_connect_time: Option<f64>,
    pub upstream_header_time: Option<f64>,
    pub upstream_response_time: Option<f64>,
    pub total_request_duration: Option<f64>,
    pub query_string: Option<String>,
    pub connection_requests: Option<u64>,
    pub trace_id: Option<String>,
    pub business_sign: Option<String>,
    pub application_name: Option<String>,
    pub cache_status: Option<String>,
    pub cluster_node: Option<String>,
    /// Unknown source keys, kept for diagnostics only — never required.
    pub extras: HashMap<String, String>,
}

/// Tag describing why a phase/speed value was clamped or flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyType {
    PhaseInconsistency,
    SpeedOutlier,
    Slow,
    Error,
}

impl AnomalyType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyType::PhaseInconsistency => "phase_inconsistency",
            AnomalyType::SpeedOutlier => "speed_outlier",
            AnomalyType::Slow => "slow",
            AnomalyType::Error => "error",
        }
    }
}

/// The seven HTTP-phase sub-timings plus backend_total, in seconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub backend_connect: f64,
    pub backend_process: f64,
    pub backend_transfer: f64,
    pub backend_total: f64,
    pub nginx_transfer: f64,
    pub network: f64,
    pub processing: f64,
    pub transfer: f64,
}

/// Percentage efficiency indicators, all in [0, 100].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EfficiencyIndicators {
    pub backend_efficiency: f64,
    pub network_overhead: f64,
    pub transfer_ratio: f64,
    pub connection_cost_ratio: f64,
    pub processing_efficiency_index: f64,
}

/// KB/s transfer speeds derived from response size and phase duration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TransferSpeeds {
    pub response_kbs: f64,
    pub total_kbs: f64,
    pub nginx_kbs: f64,
}

/// Output of the enricher, conforming to the enriched-detail table DDL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// Deterministic `hash(path, byte_offset, content_digest_prefix)`.
    pub id: String,

    pub timestamp: DateTime<FixedOffset>,
    pub date: NaiveDate,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,

    pub server_name: Option<String>,
    pub client_ip: Option<String>,
    pub method: Option<String>,
    pub uri: Option<String>,
    pub normalized_uri: String,
    pub protocol: Option<String>,
    pub status: Option<String>,
    pub response_body_size: Option<u64>,
    pub total_bytes_sent: Option<u64>,
    pub referer: Option<String>,
    pub referer_domain: Option<String>,
    pub user_agent: Option<String>,
    pub upstream_addr: Option<String>,

    pub platform: String,
    pub platform_version: Option<String>,
    pub device_type: String,
    pub browser_type: Option<String>,
    pub os_type: Option<String>,
    pub bot_type: Option<String>,
    pub entry_source: Option<String>,
    pub api_category: String,
    pub application_name: Option<String>,

    pub phases: PhaseTimings,
    pub efficiency: EfficiencyIndicators,
    pub speeds: TransferSpeeds,

    pub is_success: bool,
    pub is_slow: bool,
    pub is_error: bool,
    pub is_internal_ip: bool,
    pub has_anomaly: bool,
    pub anomaly_type: Option<String>,

    pub data_quality_score: f64,

    pub trace_id: Option<String>,
    pub cache_status: Option<String>,
    pub cluster_node: Option<String>,
}

/// A physical log file discovered under the log root, before any
/// processing state is consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFile {
    pub path: PathBuf,
    /// The `YYYY-MM-DD` or `YYYYMMDD` partition the file's parent directory
    /// names, normalized to `YYYY-MM-DD`.
    pub date_partition: String,
    pub size_bytes: u64,
    pub modified: NaiveDateTime,
    pub format_hint: LogFormat,
    pub compression: Compression,
}

impl LogFile {
    /// The cheap identity key used before a strong content digest is
    /// computed: size, modification time, and path. Collisions here only
    /// ever cause an unnecessary digest recomputation, never a missed one.
    pub fn cheap_hash(&self) -> String {
        format!("{}:{}:{}", self.path.display(), self.size_bytes, self.modified)
    }
}

/// Lifecycle status of a [`FileState`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Persistent per-file processing record, keyed by `(path, content_hash)`.
/// At most one row per path is in a non-terminal status at a time; a path
/// whose content hash no longer matches the stored completed row's hash is
/// treated as a new file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    pub path: PathBuf,
    /// Strong content digest (blake3), computed on first claim.
    pub content_hash: String,
    pub cheap_hash: String,
    pub status: FileStatus,
    pub records_ingested: u64,
    pub parse_failures: u64,
    pub bytes_consumed: u64,
    pub start_time: Option<DateTime<FixedOffset>>,
    pub end_time: Option<DateTime<FixedOffset>>,
    pub error_message: Option<String>,
    pub processor_version: String,
}
