//! Trusted-proxy header rewriting: hop-by-hop stripping plus
//! `Forwarded`/`X-Forwarded-*`/`X-Real-IP` resolution and augmentation.

use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_ip_in_cidrs(ip: IpAddr, cidrs: &[String]) -> bool {
    cidrs.iter().any(|cidr| {
        cidr.parse::<ipnet::IpNet>()
            .map(|net| net.contains(&ip))
            .unwrap_or(false)
    })
}

/// Extracts the leftmost `for=` parameter from an RFC 7239 `Forwarded`
/// header value, unwrapping IPv6 brackets and stripping an IPv4 port.
pub fn parse_forwarded_header(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        if part.len() < 4 || !part[..4].eq_ignore_ascii_case("for=") {
            continue;
        }
        let mut v = part[4..].trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        if let Some(rest) = v.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                return Some(rest[..end].to_string());
            }
        }
        if v.matches(':').count() == 1 {
            if let Some((host, _port)) = v.split_once(':') {
                v = host.to_string();
            }
        }
        return Some(v);
    }
    None
}

/// Extracts the leftmost (originating) IP from an `X-Forwarded-For` list.
pub fn parse_x_forwarded_for(value: &str) -> Option<String> {
    value.split(',').next().map(|s| s.trim().to_string())
}

/// Resolves the client's real IP, honoring proxy headers only when the
/// direct peer is itself inside a trusted CIDR.
pub fn resolve_client_ip(
    direct_ip: IpAddr,
    headers: &HeaderMap,
    trust_proxy_headers: bool,
    trusted_cidrs: &[String],
) -> String {
    if !trust_proxy_headers || trusted_cidrs.is_empty() {
        return direct_ip.to_string();
    }
    if !is_ip_in_cidrs(direct_ip, trusted_cidrs) {
        return direct_ip.to_string();
    }

    if let Some(forwarded) = headers.get("forwarded").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = parse_forwarded_header(forwarded) {
            return ip;
        }
    }
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = parse_x_forwarded_for(xff) {
            return ip;
        }
    }

    direct_ip.to_string()
}

/// Builds the headers sent upstream: inbound headers minus hop-by-hop,
/// `Host`, and `Content-Length`, with `X-Forwarded-*`/`Forwarded`/
/// `X-Real-IP` resolved and appended.
pub fn build_upstream_headers(
    inbound: &HeaderMap,
    direct_ip: IpAddr,
    scheme: &str,
    upstream_host: &str,
    trust_proxy_headers: bool,
    trusted_cidrs: &[String],
) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in inbound.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str())
            || lower == "host"
            || lower == "content-length"
        {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }

    let client_ip = resolve_client_ip(direct_ip, inbound, trust_proxy_headers, trusted_cidrs);
    let host_header = inbound
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(upstream_host)
        .to_string();

    let xff_value = match out.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => {
            format!("{}, {client_ip}", existing.trim())
        }
        _ => client_ip.clone(),
    };
    set_header(&mut out, "x-forwarded-for", &xff_value);

    let forwarded_elem = format!("for={client_ip};proto={scheme};host={host_header}");
    let forwarded_value = match out.get("forwarded").and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => {
            format!("{}, {forwarded_elem}", existing.trim())
        }
        _ => forwarded_elem,
    };
    set_header(&mut out, "forwarded", &forwarded_value);
    set_header(&mut out, "x-real-ip", &client_ip);

    if !out.contains_key("x-forwarded-proto") {
        set_header(&mut out, "x-forwarded-proto", scheme);
    }
    if !out.contains_key("x-forwarded-host") {
        set_header(&mut out, "x-forwarded-host", &host_header);
    }
    if !out.contains_key("x-forwarded-port") {
        let default_port = if scheme == "https" { "443" } else { "80" };
        let port = host_header
            .rsplit_once(':')
            .map(|(_, p)| p)
            .unwrap_or(default_port);
        set_header(&mut out, "x-forwarded-port", port);
    }

    out
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidrs() -> Vec<String> {
        vec!["10.0.0.0/8".to_string(), "127.0.0.0/8".to_string()]
    }

    #[test]
    fn test_is_ip_in_cidrs() {
        assert!(is_ip_in_cidrs("10.1.2.3".parse().unwrap(), &cidrs()));
        assert!(!is_ip_in_cidrs("8.8.8.8".parse().unwrap(), &cidrs()));
    }

    #[test]
    fn test_parse_forwarded_header_plain() {
        assert_eq!(
            parse_forwarded_header("for=192.0.2.60;proto=http;by=203.0.113.43"),
            Some("192.0.2.60".to_string())
        );
    }

    #[test]
    fn test_parse_forwarded_header_ipv4_with_port() {
        assert_eq!(
            parse_forwarded_header("for=192.0.2.60:8080"),
            Some("192.0.2.60".to_string())
        );
    }

    #[test]
    fn test_parse_forwarded_header_ipv6_brackets() {
        assert_eq!(
            parse_forwarded_header("for=\"[2001:db8::1]:8080\""),
            Some("2001:db8::1".to_string())
        );
    }

    #[test]
    fn test_parse_x_forwarded_for_takes_leftmost() {
        assert_eq!(
            parse_x_forwarded_for("203.0.113.195, 70.41.3.18, 150.172.238.178"),
            Some("203.0.113.195".to_string())
        );
    }

    #[test]
    fn test_resolve_client_ip_ignores_headers_when_untrusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
        let ip = resolve_client_ip("8.8.8.8".parse().unwrap(), &headers, true, &cidrs());
        assert_eq!(ip, "8.8.8.8");
    }

    #[test]
    fn test_resolve_client_ip_honors_headers_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
        let ip = resolve_client_ip("10.0.0.5".parse().unwrap(), &headers, true, &cidrs());
        assert_eq!(ip, "1.2.3.4");
    }

    #[test]
    fn test_build_upstream_headers_strips_hop_by_hop_and_content_length() {
        let mut inbound = HeaderMap::new();
        inbound.insert("connection", "keep-alive".parse().unwrap());
        inbound.insert("content-length", "42".parse().unwrap());
        inbound.insert("authorization", "Bearer sk-test".parse().unwrap());

        let out = build_upstream_headers(
            &inbound,
            "8.8.8.8".parse().unwrap(),
            "https",
            "api.openai.com",
            false,
            &[],
        );

        assert!(!out.contains_key("connection"));
        assert!(!out.contains_key("content-length"));
        assert!(out.contains_key("authorization"));
        assert_eq!(out.get("x-forwarded-for").unwrap(), "8.8.8.8");
        assert_eq!(out.get("x-forwarded-proto").unwrap(), "https");
    }
}
