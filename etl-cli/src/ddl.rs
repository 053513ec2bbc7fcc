//! Logical DDL for the two tables this pipeline writes. The warehouse
//! engine owns aggregate tables and materialized views; `--bootstrap-ddl`
//! only ever creates the raw and enriched detail tables it loads into.

use etl_processor::row::{ENRICHED_COLUMNS, RAW_COLUMNS};

const NUMERIC_COLUMNS: &[&str] = &[
    "hour",
    "minute",
    "second",
    "client_port",
    "response_body_size",
    "total_bytes_sent",
    "upstream_connect_time",
    "upstream_header_time",
    "upstream_response_time",
    "total_request_duration",
    "connection_requests",
    "backend_connect_phase",
    "backend_process_phase",
    "backend_transfer_phase",
    "backend_total_phase",
    "nginx_transfer_phase",
    "network_phase",
    "processing_phase",
    "transfer_phase",
    "backend_efficiency",
    "network_overhead",
    "transfer_ratio",
    "connection_cost_ratio",
    "processing_efficiency_index",
    "response_transfer_speed",
    "total_transfer_speed",
    "nginx_transfer_speed",
    "data_quality_score",
];

const BOOL_COLUMNS: &[&str] = &["is_success", "is_slow", "is_error", "is_internal_ip", "has_anomaly"];

fn column_type(name: &str) -> &'static str {
    if NUMERIC_COLUMNS.contains(&name) {
        "Float64"
    } else if BOOL_COLUMNS.contains(&name) {
        "UInt8"
    } else if name == "date" {
        "Date"
    } else if name == "timestamp" {
        "DateTime64(3)"
    } else {
        "Nullable(String)"
    }
}

fn create_table(database: &str, table: &str, columns: &[&str], order_by: &str) -> String {
    let cols = columns
        .iter()
        .map(|c| format!("    {c} {}", column_type(c)))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "CREATE TABLE IF NOT EXISTS {database}.{table} (\n{cols}\n) ENGINE = ReplacingMergeTree ORDER BY {order_by}"
    )
}

/// The statements `--bootstrap-ddl` executes, in order. Creating the
/// database first makes the table statements idempotent against a bare
/// warehouse.
pub fn statements(database: &str) -> Vec<String> {
    vec![
        format!("CREATE DATABASE IF NOT EXISTS {database}"),
        create_table(database, etl_processor::RAW_TABLE, RAW_COLUMNS, "(date, hour, server_name, client_ip, timestamp)"),
        create_table(
            database,
            etl_processor::ENRICHED_TABLE,
            ENRICHED_COLUMNS,
            "(date, hour, api_category, platform, timestamp)",
        ),
    ]
}
