//! Host and address utilities for master URIs and machine locality

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

/// Parse `http://host:port` into its host and port.
pub fn parse_http_host_port(uri: &str) -> Result<(String, u16), NetError> {
    let parsed = url::Url::parse(uri).map_err(|e| NetError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != "http" {
        return Err(NetError::InvalidUri {
            uri: uri.to_string(),
            reason: format!("expected http scheme, got '{}'", parsed.scheme()),
        });
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| NetError::InvalidUri {
            uri: uri.to_string(),
            reason: "missing host".to_string(),
        })?
        .to_string();
    let port = parsed.port().ok_or_else(|| NetError::InvalidUri {
        uri: uri.to_string(),
        reason: "missing port".to_string(),
    })?;
    Ok((host, port))
}

/// Check whether a host literal names the loopback interface.
pub fn is_localhost(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Canonical hostname of this machine.
pub fn local_hostname() -> Option<String> {
    hostname::get().ok().map(|h| h.to_string_lossy().into_owned())
}

/// Addresses assigned to local interfaces. Always contains at least the
/// IPv4 loopback address.
#[cfg(unix)]
pub fn get_local_addresses() -> Vec<IpAddr> {
    let mut out = Vec::new();
    if let Ok(ifaddrs) = nix::ifaddrs::getifaddrs() {
        for ifa in ifaddrs {
            if let Some(storage) = ifa.address {
                if let Some(sin) = storage.as_sockaddr_in() {
                    out.push(IpAddr::V4(sin.ip()));
                } else if let Some(sin6) = storage.as_sockaddr_in6() {
                    out.push(IpAddr::V6(sin6.ip()));
                }
            }
        }
    }
    if out.is_empty() {
        out.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    out
}

#[cfg(not(unix))]
pub fn get_local_addresses() -> Vec<IpAddr> {
    vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
}

/// Resolve a hostname to its addresses via the system resolver.
pub fn resolve_host(host: &str) -> std::io::Result<Vec<IpAddr>> {
    Ok((host, 0u16)
        .to_socket_addrs()?
        .map(|sa| sa.ip())
        .collect())
}

/// Check whether an address refers to this machine.
pub fn is_local_address(address: &str) -> bool {
    if is_localhost(address) {
        return true;
    }
    if let Some(name) = local_hostname() {
        if name.eq_ignore_ascii_case(address) {
            return true;
        }
    }
    let locals = get_local_addresses();
    match resolve_host(address) {
        Ok(addrs) => addrs.iter().any(|a| a.is_loopback() || locals.contains(a)),
        Err(_) => false,
    }
}

/// Rewrite a loopback master URI to use this machine's canonical hostname
/// so that remote children can reach it. Non-loopback URIs pass through.
pub fn remap_localhost_uri(uri: &str) -> Result<String, NetError> {
    let (host, port) = parse_http_host_port(uri)?;
    if !is_localhost(&host) {
        return Ok(uri.to_string());
    }
    let name = local_hostname().unwrap_or_else(|| "localhost".to_string());
    Ok(format!("http://{name}:{port}/"))
}

/// Errors from URI and address handling
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("Invalid master URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_host_port() {
        assert_eq!(
            parse_http_host_port("http://localhost:11311").unwrap(),
            ("localhost".to_string(), 11311)
        );
        assert!(parse_http_host_port("ftp://host:21").is_err());
        assert!(parse_http_host_port("http://host").is_err());
        assert!(parse_http_host_port("not a uri").is_err());
    }

    #[test]
    fn test_is_localhost() {
        assert!(is_localhost("localhost"));
        assert!(is_localhost("127.0.0.1"));
        assert!(is_localhost("127.1.2.3"));
        assert!(!is_localhost("192.168.1.5"));
        assert!(!is_localhost("example.com"));
    }

    #[test]
    fn test_local_addresses_contains_loopback_or_real() {
        let addrs = get_local_addresses();
        assert!(!addrs.is_empty());
    }

    #[test]
    fn test_loopback_is_local() {
        assert!(is_local_address("localhost"));
        assert!(is_local_address("127.0.0.1"));
    }

    #[test]
    fn test_remap_localhost_uri_passthrough() {
        let uri = "http://gateway:11311";
        assert_eq!(remap_localhost_uri(uri).unwrap(), uri);
    }

    #[test]
    fn test_remap_localhost_uri_rewrites() {
        let rewritten = remap_localhost_uri("http://localhost:11311").unwrap();
        assert!(rewritten.ends_with(":11311/"));
        assert!(rewritten.starts_with("http://"));
    }
}
