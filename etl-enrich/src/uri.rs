use once_cell::sync::Lazy;
use regex::Regex;

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());
static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

/// Strips the query string and collapses numeric/UUID path segments to
/// stable placeholders so `/users/42/orders/7f3e...` and
/// `/users/17/orders/9ab1...` both normalize to `/users/{id}/orders/{uuid}`.
/// Case is preserved; only segment *shape* drives the collapse.
pub fn normalize(uri: &str) -> String {
    let path = uri.split('?').next().unwrap_or(uri);

    let segments: Vec<&str> = path.split('/').collect();
    let normalized: Vec<String> = segments
        .into_iter()
        .map(|segment| {
            if segment.is_empty() {
                String::new()
            } else if NUMERIC_SEGMENT.is_match(segment) {
                "{id}".to_string()
            } else if UUID_SEGMENT.is_match(segment) {
                "{uuid}".to_string()
            } else {
                segment.to_string()
            }
        })
        .collect();

    normalized.join("/")
}

/// Extracts the host portion of a referer URL, without pulling in a full
/// URL-parsing dependency for what is just `scheme://host[/...]`.
pub fn referer_domain(referer: &str) -> Option<String> {
    let without_scheme = referer.split("://").nth(1).unwrap_or(referer);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_string() {
        assert_eq!(normalize("/search?q=rust&page=2"), "/search");
    }

    #[test]
    fn collapses_numeric_ids() {
        assert_eq!(normalize("/users/42/orders/7"), "/users/{id}/orders/{id}");
    }

    #[test]
    fn collapses_uuid_segments() {
        assert_eq!(
            normalize("/widgets/7f3e9b1a-4c2d-4a1e-9f0b-1234567890ab"),
            "/widgets/{uuid}"
        );
    }

    #[test]
    fn preserves_case_of_non_id_segments() {
        assert_eq!(normalize("/API/UserProfile"), "/API/UserProfile");
    }

    #[test]
    fn extracts_referer_domain() {
        assert_eq!(
            referer_domain("https://example.com/search?q=x"),
            Some("example.com".to_string())
        );
        assert_eq!(referer_domain("-"), Some("-".to_string()));
    }
}
