use std::collections::HashMap;

use etl_core::types::RawRecord;
use serde_json::Value;

use crate::coerce;

fn value_as_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => coerce::parse_str(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => coerce::parse_u64(s),
        _ => None,
    }
}

fn value_as_u16(value: &Value) -> Option<u16> {
    value_as_u64(value).and_then(|v| u16::try_from(v).ok())
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => coerce::parse_f64(s),
        _ => None,
    }
}

/// Parses one flat JSON object per line into a [`RawRecord`]. Field
/// lookups mirror [`crate::key_value::parse`]'s key aliases so the same
/// downstream enrichment logic applies regardless of source format.
pub fn parse(line: &str) -> Result<RawRecord, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;
    let object = value
        .as_object()
        .ok_or_else(|| "JSON line is not an object".to_string())?;

    let mut record = RawRecord::default();
    let mut extras = HashMap::new();

    for (key, v) in object {
        match key.as_str() {
            "time" | "time_local" | "timestamp" => {
                record.timestamp = value_as_str(v).as_deref().and_then(coerce::parse_timestamp)
            }
            "host" | "http_host" | "server_name" => record.server_name = value_as_str(v),
            "remote_addr" | "client_ip" => record.client_ip = value_as_str(v),
            "remote_port" | "client_port" => record.client_port = value_as_u16(v),
            "request" => {
                if let Some(s) = value_as_str(v) {
                    let parsed = coerce::parse_request_line(&s);
                    record.method = parsed.method;
                    record.uri = parsed.uri;
                    record.full_uri = parsed.full_uri;
                    record.protocol = parsed.protocol;
                    record.query_string = parsed.query_string;
                }
            }
            "request_method" | "method" => record.method = value_as_str(v),
            "request_uri" | "uri" => record.uri = value_as_str(v),
            "request_full_uri" | "full_uri" => record.full_uri = value_as_str(v),
            "server_protocol" | "protocol" => record.protocol = value_as_str(v),
            "status" => record.status = value_as_str(v),
            "body_bytes_sent" | "body" | "body_bytes" | "response_body_size" => {
                record.response_body_size = value_as_u64(v)
            }
            "bytes_sent" | "total_bytes_sent" => record.total_bytes_sent = value_as_u64(v),
            "http_referer" | "referer" => record.referer = value_as_str(v),
            "http_user_agent" | "agent" | "user_agent" => record.user_agent = value_as_str(v),
            "upstream_addr" => record.upstream_addr = value_as_str(v),
            "upstream_connect_time" => record.upstream_connect_time = value_as_f64(v),
            "upstream_header_time" => record.upstream_header_time = value_as_f64(v),
            "upstream_response_time" => record.upstream_response_time = value_as_f64(v),
            "request_time" | "ar_time" | "total_request_duration" => {
                record.total_request_duration = value_as_f64(v)
            }
            "query_string" => record.query_string = value_as_str(v),
            "connection_requests" => record.connection_requests = value_as_u64(v),
            "trace_id" | "request_id" => record.trace_id = value_as_str(v),
            "business_sign" => record.business_sign = value_as_str(v),
            "application_name" | "app_name" => record.application_name = value_as_str(v),
            "upstream_cache_status" | "cache_status" => record.cache_status = value_as_str(v),
            "cluster_node" => record.cluster_node = value_as_str(v),
            _ => {
                if let Some(s) = value_as_str(v) {
                    extras.insert(key.clone(), s);
                }
            }
        }
    }

    record.extras = extras;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_typical_json_line() {
        let line = r#"{"time":"2024-01-01T00:00:05+00:00","remote_addr":"10.0.0.1","request_method":"GET","status":200,"body_bytes_sent":512,"request_time":0.013}"#;
        let record = parse(line).unwrap();
        assert_eq!(record.client_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(record.status.as_deref(), Some("200"));
        assert_eq!(record.response_body_size, Some(512));
        assert_eq!(record.total_request_duration, Some(0.013));
    }

    #[test]
    fn combined_request_field_splits_into_method_and_uri() {
        let line = r#"{"status":200,"request":"GET /api/v1/users?id=42 HTTP/1.1"}"#;
        let record = parse(line).unwrap();
        assert_eq!(record.method.as_deref(), Some("GET"));
        assert_eq!(record.uri.as_deref(), Some("/api/v1/users"));
        assert_eq!(record.protocol.as_deref(), Some("HTTP/1.1"));
    }

    #[test]
    fn common_log_format_aliases_map_to_canonical_fields() {
        let line = r#"{"status":"200","http_host":"example.com","ar_time":"0.150","body":"123","agent":"zgt-ios/1.4.1"}"#;
        let record = parse(line).unwrap();
        assert_eq!(record.server_name.as_deref(), Some("example.com"));
        assert_eq!(record.total_request_duration, Some(0.150));
        assert_eq!(record.response_body_size, Some(123));
        assert_eq!(record.user_agent.as_deref(), Some("zgt-ios/1.4.1"));
    }

    #[test]
    fn null_fields_are_absent() {
        let line = r#"{"status":200,"upstream_addr":null}"#;
        let record = parse(line).unwrap();
        assert!(record.upstream_addr.is_none());
    }

    #[test]
    fn non_object_json_is_an_error() {
        assert!(parse("[1,2,3]").is_err());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse("{not json").is_err());
    }

    #[test]
    fn unknown_keys_land_in_extras() {
        let line = r#"{"status":200,"x_custom":"abc"}"#;
        let record = parse(line).unwrap();
        assert_eq!(record.extras.get("x_custom").map(String::as_str), Some("abc"));
    }
}
