use std::net::IpAddr;

use url::{Host, Url};

use crate::error::ProxyError;

// Upstream URL extraction and SSRF validation.
//
// The proxy addresses upstreams by embedding an absolute URL in the request
// path (`/<absolute-upstream-url>`). Before any bytes are forwarded, the
// target must survive the checks below; rejections surface as 403
// `security_error` responses. DNS failures are allowed to proceed so the
// upstream fetch can fail on its own terms.

/// Pull the upstream URL out of the raw request target.
///
/// The first character after the leading `/` must begin `http://` or
/// `https://`; the remainder (query string included) is the upstream URL.
#[must_use]
pub fn extract_upstream_url(path_and_query: &str) -> Option<&str> {
    let raw = path_and_query.strip_prefix('/')?;
    (raw.starts_with("http://") || raw.starts_with("https://")).then_some(raw)
}

fn deny(reason: &str) -> ProxyError {
    ProxyError::Security(reason.to_string())
}

fn is_private_v4(ip: std::net::Ipv4Addr) -> bool {
    // 10/8, 172.16/12, 192.168/16, 127/8
    ip.is_private() || ip.is_loopback()
}

/// Validate an extracted upstream URL against the SSRF policy.
///
/// Rejects non-HTTP schemes, localhost aliases, and private IPv4 ranges on
/// literal or DNS-resolved addresses. `allow_local_net` disables the
/// private-network checks entirely (local development against loopback
/// upstreams).
///
/// # Errors
///
/// Returns [`ProxyError::Security`] with a human-readable reason on any
/// policy violation.
pub async fn validate_upstream(raw: &str, allow_local_net: bool) -> Result<Url, ProxyError> {
    let url = Url::parse(raw).map_err(|_| deny("Invalid upstream URL"))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(deny("Only http and https upstreams are allowed"));
    }

    let Some(host) = url.host() else {
        return Err(deny("Upstream URL has no host"));
    };

    if allow_local_net {
        return Ok(url);
    }

    match host {
        Host::Domain(domain) => {
            if domain.eq_ignore_ascii_case("localhost") {
                return Err(deny("Localhost access denied"));
            }
            let port = url.port_or_known_default().unwrap_or(443);
            let domain = domain.to_string();
            // DNS failures proceed; the upstream fetch will fail naturally.
            let lookup_result = tokio::net::lookup_host((domain.as_str(), port)).await;
            if let Ok(addrs) = lookup_result {
                for addr in addrs {
                    if let IpAddr::V4(v4) = addr.ip() {
                        if v4.is_loopback() {
                            return Err(deny("Localhost access denied"));
                        }
                        if is_private_v4(v4) {
                            return Err(deny("Private network access denied"));
                        }
                    }
                }
            }
        }
        Host::Ipv4(ip) => {
            if ip.is_loopback() || ip.is_unspecified() {
                return Err(deny("Localhost access denied"));
            }
            if is_private_v4(ip) {
                return Err(deny("Private network access denied"));
            }
        }
        Host::Ipv6(ip) => {
            if ip.is_loopback() || ip.is_unspecified() {
                return Err(deny("Localhost access denied"));
            }
        }
    }

    Ok(url)
}
