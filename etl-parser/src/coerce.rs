use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};

/// `-` is nginx's convention for "field not present"; it must decode to
/// `None`, never to `0` or an empty string.
pub fn is_absent(raw: &str) -> bool {
    raw == "-" || raw.is_empty()
}

pub fn parse_u64(raw: &str) -> Option<u64> {
    if is_absent(raw) {
        return None;
    }
    raw.parse().ok()
}

pub fn parse_u16(raw: &str) -> Option<u16> {
    if is_absent(raw) {
        return None;
    }
    raw.parse().ok()
}

pub fn parse_f64(raw: &str) -> Option<f64> {
    if is_absent(raw) {
        return None;
    }
    raw.parse().ok()
}

pub fn parse_str(raw: &str) -> Option<String> {
    if is_absent(raw) {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Accepts RFC 3339 (`2024-01-01T00:00:05+00:00`) and the Common Log
/// Format timestamp (`01/Jan/2024:00:00:05 +0000`) nginx can be
/// configured to emit.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if is_absent(raw) {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%d/%b/%Y:%H:%M:%S %z") {
        return Some(ts);
    }
    // Common Log Format without explicit offset: assume UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%d/%b/%Y:%H:%M:%S") {
        return FixedOffset::east_opt(0)
            .and_then(|offset| offset.from_local_datetime(&naive).single());
    }
    None
}

/// Splits a combined `request` token (`"GET /api/v1/users?id=42 HTTP/1.1"`)
/// into method, full URI (with query string), path-only URI, protocol, and
/// query string. Falls back to treating the whole value as the URI when it
/// doesn't have the expected three whitespace-separated parts (some nginx
/// configs log a bare `$uri`, and malformed requests can omit the protocol).
pub fn parse_request_line(raw: &str) -> RequestLine {
    if is_absent(raw) {
        return RequestLine::default();
    }

    let mut parts = raw.split_whitespace();
    let (method, target, protocol) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), proto) => (Some(m.to_string()), Some(t.to_string()), proto.map(str::to_string)),
        (Some(single), None, None) => (None, Some(single.to_string()), None),
        _ => (None, None, None),
    };

    let (uri, query_string) = match &target {
        Some(full) => match full.split_once('?') {
            Some((path, query)) => (Some(path.to_string()), Some(query.to_string())),
            None => (Some(full.clone()), None),
        },
        None => (None, None),
    };

    RequestLine {
        method,
        uri,
        full_uri: target,
        protocol,
        query_string,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Option<String>,
    pub uri: Option<String>,
    pub full_uri: Option<String>,
    pub protocol: Option<String>,
    pub query_string: Option<String>,
}
