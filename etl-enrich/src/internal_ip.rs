use std::net::IpAddr;

/// RFC1918 private ranges, loopback, and link-local — both IPv4 and IPv6.
pub fn is_internal(client_ip: &str) -> bool {
    let Ok(ip) = client_ip.parse::<IpAddr>() else {
        return false;
    };

    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}
