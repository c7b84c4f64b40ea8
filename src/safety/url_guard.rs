//! Webhook URL validation against SSRF.
//!
//! A URL is accepted only if its scheme is http/https (https-only in
//! production), its hostname clears the name blocklist and the optional
//! domain allowlist, and every address it resolves to clears the IPv4 and
//! IPv6 block tables. IPv4-mapped IPv6 addresses are unwrapped and re-tested
//! against the IPv4 table so `::ffff:10.0.0.1` cannot slip through.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tokio::net::lookup_host;
use url::{Host, Url};

use super::SafetyError;

/// Hostnames (exact or `*.` suffix) that never resolve to something we want
/// to talk to: loopback aliases, mDNS, cloud metadata and cluster DNS.
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "*.localhost",
    "*.local",
    "*.internal",
    "metadata.google.internal",
    "metadata.goog",
    "instance-data",
    "kubernetes.default",
    "*.svc",
    "*.cluster.local",
];

/// Non-routable / internal IPv4 space: loopback, RFC1918, link-local,
/// CGNAT, protocol assignments, documentation nets, multicast, reserved,
/// broadcast.
const BLOCKED_V4: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
    (Ipv4Addr::new(255, 255, 255, 255), 32),
];

/// Validation policy derived from server configuration.
#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    /// Reject plain http (production).
    pub require_https: bool,
    /// When non-empty, the hostname must be one of these domains or a
    /// subdomain of one.
    pub allowed_domains: Vec<String>,
}

/// A URL that passed validation, with the addresses it resolved to.
#[derive(Debug, Clone)]
pub struct ValidatedUrl {
    pub url: Url,
    pub host: String,
    pub port: u16,
    pub addrs: Vec<IpAddr>,
}

fn v4_in_block(ip: Ipv4Addr, net: Ipv4Addr, prefix: u8) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (u32::from(ip) & mask) == (u32::from(net) & mask)
}

/// Test an IPv4 address against the block table.
pub fn ipv4_blocked(ip: Ipv4Addr) -> bool {
    BLOCKED_V4
        .iter()
        .any(|&(net, prefix)| v4_in_block(ip, net, prefix))
}

/// Test an IPv6 address against the block table. IPv4-mapped addresses are
/// unwrapped and re-tested against the IPv4 table.
pub fn ipv6_blocked(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return ipv4_blocked(v4);
    }

    let seg = ip.segments();

    // ::1 loopback, :: unspecified
    if ip == Ipv6Addr::LOCALHOST || ip == Ipv6Addr::UNSPECIFIED {
        return true;
    }
    // fe80::/10 link-local
    if seg[0] & 0xffc0 == 0xfe80 {
        return true;
    }
    // fc00::/7 unique-local (covers fd00::/8)
    if seg[0] & 0xfe00 == 0xfc00 {
        return true;
    }
    // ff00::/8 multicast
    if seg[0] & 0xff00 == 0xff00 {
        return true;
    }
    // 2001:db8::/32 documentation
    if seg[0] == 0x2001 && seg[1] == 0x0db8 {
        return true;
    }
    // 100::/64 discard-only
    if seg[0] == 0x0100 && seg[1] == 0 && seg[2] == 0 && seg[3] == 0 {
        return true;
    }
    // 64:ff9b::/96 NAT64 translation
    if seg[0] == 0x0064 && seg[1] == 0xff9b && seg[2..6] == [0, 0, 0, 0] {
        return true;
    }

    false
}

/// Test any address against the block tables.
pub fn ip_blocked(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => ipv4_blocked(v4),
        IpAddr::V6(v6) => ipv6_blocked(v6),
    }
}

/// Test a hostname against the name blocklist (exact match or `*.` suffix).
pub fn hostname_blocked(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    BLOCKED_HOSTNAMES.iter().any(|entry| {
        if let Some(suffix) = entry.strip_prefix("*.") {
            host == suffix || host.ends_with(&format!(".{suffix}"))
        } else {
            host == *entry
        }
    })
}

fn domain_allowed(host: &str, allowed: &[String]) -> bool {
    allowed
        .iter()
        .any(|domain| host == domain || host.ends_with(&format!(".{domain}")))
}

/// Validate a proposed webhook target URL.
///
/// Resolution happens here so the caller can pin the connection to one of
/// the returned addresses; re-run immediately before sending to defeat DNS
/// rebinding between registration and dispatch.
pub async fn validate_webhook_url(
    url_str: &str,
    policy: &UrlPolicy,
) -> Result<ValidatedUrl, SafetyError> {
    let url = Url::parse(url_str).map_err(|e| SafetyError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if policy.require_https {
                return Err(SafetyError::HttpsRequired);
            }
        }
        other => return Err(SafetyError::SchemeNotAllowed(other.to_string())),
    }

    let port = url
        .port_or_known_default()
        .ok_or_else(|| SafetyError::InvalidUrl("missing port".to_string()))?;

    let (host, addrs) = match url.host() {
        Some(Host::Ipv4(ip)) => {
            if ipv4_blocked(ip) {
                return Err(SafetyError::IpBlocked(IpAddr::V4(ip)));
            }
            (ip.to_string(), vec![IpAddr::V4(ip)])
        }
        Some(Host::Ipv6(ip)) => {
            if ipv6_blocked(ip) {
                return Err(SafetyError::IpBlocked(IpAddr::V6(ip)));
            }
            (ip.to_string(), vec![IpAddr::V6(ip)])
        }
        Some(Host::Domain(domain)) => {
            let host = domain.to_ascii_lowercase();
            if hostname_blocked(&host) {
                return Err(SafetyError::HostnameBlocked(host));
            }
            if !policy.allowed_domains.is_empty() && !domain_allowed(&host, &policy.allowed_domains)
            {
                return Err(SafetyError::DomainNotAllowed(host));
            }

            let resolved: Vec<IpAddr> = lookup_host((host.as_str(), port))
                .await
                .map_err(|_| SafetyError::DnsFailure(host.clone()))?
                .map(|sa| sa.ip())
                .collect();
            if resolved.is_empty() {
                return Err(SafetyError::DnsFailure(host));
            }
            for addr in &resolved {
                if ip_blocked(*addr) {
                    return Err(SafetyError::IpBlocked(*addr));
                }
            }
            (host, resolved)
        }
        None => return Err(SafetyError::InvalidUrl("missing host".to_string())),
    };

    Ok(ValidatedUrl {
        url,
        host,
        port,
        addrs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_ipv4_block_table_entry_is_blocked() {
        let samples = [
            "127.0.0.1",
            "127.255.255.255",
            "10.0.0.1",
            "10.255.0.1",
            "172.16.0.1",
            "172.31.255.254",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "0.1.2.3",
            "100.64.0.1",
            "100.127.255.254",
            "192.0.0.1",
            "192.0.2.44",
            "198.51.100.7",
            "203.0.113.9",
            "224.0.0.1",
            "239.255.255.255",
            "240.0.0.1",
            "255.255.255.255",
        ];
        for s in samples {
            let ip: Ipv4Addr = s.parse().unwrap();
            assert!(ipv4_blocked(ip), "{s} should be blocked");
        }
    }

    #[test]
    fn public_ipv4_is_not_blocked() {
        for s in ["1.1.1.1", "8.8.8.8", "93.184.216.34", "172.32.0.1", "100.128.0.1"] {
            let ip: Ipv4Addr = s.parse().unwrap();
            assert!(!ipv4_blocked(ip), "{s} should be allowed");
        }
    }

    #[test]
    fn every_ipv6_block_table_entry_is_blocked() {
        let samples = [
            "::1",
            "::",
            "fe80::1",
            "febf::1",
            "fc00::1",
            "fd12:3456:789a::1",
            "ff02::1",
            "2001:db8::1",
            "100::1",
            "64:ff9b::a00:1",
        ];
        for s in samples {
            let ip: Ipv6Addr = s.parse().unwrap();
            assert!(ipv6_blocked(ip), "{s} should be blocked");
        }
    }

    #[test]
    fn ipv4_mapped_addresses_unwrap_to_the_v4_table() {
        // Every blocked v4 literal must also be blocked in ::ffff: form.
        for s in ["127.0.0.1", "10.0.0.1", "192.168.1.1", "169.254.169.254"] {
            let mapped: Ipv6Addr = format!("::ffff:{s}").parse().unwrap();
            assert!(ipv6_blocked(mapped), "::ffff:{s} should be blocked");
        }
        let public: Ipv6Addr = "::ffff:8.8.8.8".parse().unwrap();
        assert!(!ipv6_blocked(public));
    }

    #[test]
    fn public_ipv6_is_not_blocked() {
        for s in ["2606:4700:4700::1111", "2001:4860:4860::8888"] {
            let ip: Ipv6Addr = s.parse().unwrap();
            assert!(!ipv6_blocked(ip), "{s} should be allowed");
        }
    }

    #[test]
    fn hostname_blocklist_matches_exact_and_suffix() {
        assert!(hostname_blocked("localhost"));
        assert!(hostname_blocked("LOCALHOST"));
        assert!(hostname_blocked("foo.local"));
        assert!(hostname_blocked("printer.home.local"));
        assert!(hostname_blocked("metadata.google.internal"));
        assert!(hostname_blocked("api.cluster.local"));
        assert!(hostname_blocked("my-service.svc"));
        assert!(!hostname_blocked("example.com"));
        assert!(!hostname_blocked("localhost.example.com"));
    }

    #[tokio::test]
    async fn ip_literal_urls_are_checked_without_dns() {
        let policy = UrlPolicy::default();
        let err = validate_webhook_url("http://169.254.169.254/latest/meta-data", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyError::IpBlocked(_)));

        let err = validate_webhook_url("http://[::1]:8080/hook", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyError::IpBlocked(_)));
    }

    #[tokio::test]
    async fn scheme_and_https_rules() {
        let policy = UrlPolicy::default();
        let err = validate_webhook_url("ftp://example.com/x", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyError::SchemeNotAllowed(_)));

        let strict = UrlPolicy {
            require_https: true,
            ..Default::default()
        };
        let err = validate_webhook_url("http://example.com/x", &strict)
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyError::HttpsRequired));
    }

    #[tokio::test]
    async fn allowlist_restricts_domains() {
        let policy = UrlPolicy {
            require_https: false,
            allowed_domains: vec!["hooks.example.com".to_string()],
        };
        let err = validate_webhook_url("https://evil.test/x", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyError::DomainNotAllowed(_)));
    }

    #[tokio::test]
    async fn blocked_hostnames_fail_before_dns() {
        let policy = UrlPolicy::default();
        let err = validate_webhook_url("http://metadata.google.internal/computeMetadata", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyError::HostnameBlocked(_)));
    }
}
