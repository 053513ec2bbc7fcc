use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use etl_core::types::RawRecord;

use crate::coerce;

/// Matches `key:"quoted value"` or `key:bareword` tokens separated by
/// whitespace. The quoted alternative allows backslash-escaped quotes.
static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?P<key>[A-Za-z_][A-Za-z0-9_]*):(?:"(?P<quoted>(?:[^"\\]|\\.)*)"|(?P<bare>\S+))"#)
        .expect("static token regex is valid")
});

fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parses one `key:"value"` formatted access log line into a [`RawRecord`].
///
/// Unrecognized keys are kept in `extras` for diagnostics. A numeric
/// field that fails to coerce does not fail the whole line — it becomes
/// `None` and the raw token is preserved under `extras` so a systematic
/// format problem is still visible in a sample.
pub fn parse(line: &str) -> Result<RawRecord, String> {
    let mut record = RawRecord::default();
    let mut matched_any = false;
    let mut extras = HashMap::new();

    for caps in TOKEN.captures_iter(line) {
        matched_any = true;
        let key = &caps["key"];
        let value = caps
            .name("quoted")
            .map(|m| unescape(m.as_str()))
            .unwrap_or_else(|| caps.name("bare").map(|m| m.as_str().to_string()).unwrap());

        assign_field(&mut record, &mut extras, key, &value);
    }

    if !matched_any {
        return Err("no key:\"value\" tokens found".to_string());
    }

    record.extras = extras;
    Ok(record)
}

fn assign_field(record: &mut RawRecord, extras: &mut HashMap<String, String>, key: &str, value: &str) {
    match key {
        "time" | "time_local" | "time_iso8601" => record.timestamp = coerce::parse_timestamp(value),
        "host" | "http_host" | "server_name" => record.server_name = coerce::parse_str(value),
        "remote_addr" | "client_ip" => record.client_ip = coerce::parse_str(value),
        "remote_port" | "client_port" => record.client_port = coerce::parse_u16(value),
        "request" => {
            let parsed = coerce::parse_request_line(value);
            record.method = parsed.method;
            record.uri = parsed.uri;
            record.full_uri = parsed.full_uri;
            record.protocol = parsed.protocol;
            record.query_string = parsed.query_string;
        }
        "request_method" | "method" => record.method = coerce::parse_str(value),
        "request_uri" | "uri" => record.uri = coerce::parse_str(value),
        "request_full_uri" | "full_uri" => record.full_uri = coerce::parse_str(value),
        "server_protocol" | "protocol" => record.protocol = coerce::parse_str(value),
        "status" => record.status = coerce::parse_str(value),
        "body_bytes_sent" | "body" | "body_bytes" | "response_body_size" => {
            record.response_body_size = coerce::parse_u64(value)
        }
        "bytes_sent" | "total_bytes_sent" => record.total_bytes_sent = coerce::parse_u64(value),
        "http_referer" | "referer" => record.referer = coerce::parse_str(value),
        "http_user_agent" | "agent" | "user_agent" => record.user_agent = coerce::parse_str(value),
        "upstream_addr" => record.upstream_addr = coerce::parse_str(value),
        "upstream_connect_time" => record.upstream_connect_time = coerce::parse_f64(value),
        "upstream_header_time" => record.upstream_header_time = coerce::parse_f64(value),
        "upstream_response_time" => record.upstream_response_time = coerce::parse_f64(value),
        "request_time" | "ar_time" | "total_request_duration" => {
            record.total_request_duration = coerce::parse_f64(value)
        }
        "query_string" => record.query_string = coerce::parse_str(value),
        "connection_requests" => record.connection_requests = coerce::parse_u64(value),
        "trace_id" | "request_id" => record.trace_id = coerce::parse_str(value),
        "business_sign" => record.business_sign = coerce::parse_str(value),
        "application_name" | "app_name" => record.application_name = coerce::parse_str(value),
        "upstream_cache_status" | "cache_status" => record.cache_status = coerce::parse_str(value),
        "cluster_node" => record.cluster_node = coerce::parse_str(value),
        _ => {
            extras.insert(key.to_string(), value.to_string());
        }
    }
}
