//! Client key resolution shared by the logging, auth and rate limiting stages.
//!
//! The rate limiter partitions its quota by a *client key*, normally the
//! caller's IP address. It is derived from request metadata in this order:
//!
//! 1. `X-Forwarded-For`: the first entry of the comma-separated hop list,
//!    trimmed of surrounding whitespace
//! 2. `X-Real-Ip`: the raw value, if the forwarding header was absent or empty
//! 3. The transport peer address with any port suffix stripped
//! 4. [`UNKNOWN_IP`] when no peer address is attached to the request
//!
//! # Security Warning: IP Spoofing Risk
//!
//! **Steps 1 and 2 trust client-provided headers.** A client talking to this
//! service directly can put any value in `X-Forwarded-For` and so pick its own
//! rate limit bucket, or exhaust someone else's. Keys are also not unique:
//! every client behind one NAT shares a bucket.
//!
//! Header-based identity is only sound when:
//!
//! 1. The service is **deployed behind a trusted reverse proxy**
//! 2. **Direct access** from the internet is blocked
//! 3. The proxy **overwrites** (not appends to) the client IP headers:
//!
//!    ```nginx
//!    proxy_set_header X-Real-IP $remote_addr;
//!    proxy_set_header X-Forwarded-For $remote_addr;
//!    ```
//!
//! Setting `TRUSTED_PROXIES` narrows the risk: forwarding headers are then
//! ignored unless the peer address lies in one of the configured CIDR ranges,
//! and untrusted peers are keyed by their own address.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use tracing::{debug, warn};

/// Fallback key when no client address can be determined.
///
/// All such requests share one bucket. This only happens when the server is
/// not started with connect info (e.g. in-process tests).
pub const UNKNOWN_IP: &str = "unknown";

/// Forwarding header listing the proxy hops, client first.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Single client IP header set by some proxies.
pub const REAL_IP_HEADER: &str = "x-real-ip";

// =============================================================================
// Header Extraction
// =============================================================================

/// Where a header-derived client IP came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    /// First entry of X-Forwarded-For.
    FromXff(&'a str),
    /// Value of X-Real-Ip.
    FromRealIp(&'a str),
    /// Neither header present (or both empty).
    NotFound,
}

/// Read the client IP from the proxy headers without allocating.
#[inline]
fn extract_ip_from_headers(headers: &HeaderMap) -> ExtractedIp<'_> {
    if let Some(forwarded) = headers.get(FORWARDED_FOR_HEADER)
        && let Ok(value) = forwarded.to_str()
        && !value.is_empty()
        && let Some(first_ip) = value.split(',').next()
    {
        return ExtractedIp::FromXff(first_ip.trim());
    }

    if let Some(real_ip) = headers.get(REAL_IP_HEADER)
        && let Ok(value) = real_ip.to_str()
        && !value.is_empty()
    {
        return ExtractedIp::FromRealIp(value);
    }

    ExtractedIp::NotFound
}

/// Strip a `:port` suffix from a transport address.
///
/// Handles `host:port` and `[v6]:port`. Anything else (a bare IPv4 or IPv6
/// address, or garbage) is returned verbatim.
pub fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail))
                if tail
                    .strip_prefix(':')
                    .is_some_and(|port| !port.contains(':')) =>
            {
                host
            }
            _ => addr,
        };
    }

    match addr.split_once(':') {
        Some((host, port)) if !port.contains(':') => host,
        _ => addr,
    }
}

/// Resolve the client key from headers and the optional peer address.
///
/// This is the plain precedence rule with no trusted-proxy filtering; see
/// [`ClientKeyResolver`] for the configurable version used by the middleware.
pub fn resolve_client_key<'a>(headers: &'a HeaderMap, peer: Option<&'a str>) -> Cow<'a, str> {
    match extract_ip_from_headers(headers) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Cow::Borrowed(ip),
        ExtractedIp::NotFound => match peer {
            Some(addr) => Cow::Borrowed(strip_port(addr)),
            None => Cow::Borrowed(UNKNOWN_IP),
        },
    }
}

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation (`"10.0.0.0/8"`, `"::1/128"`) or a bare IP
    /// (implicit `/32` or `/128`).
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();

        let (ip, prefix_len) = match cidr.split_once('/') {
            Some((ip, prefix)) => (ip.parse::<IpAddr>().ok()?, Some(prefix.parse::<u8>().ok()?)),
            None => (cidr.parse::<IpAddr>().ok()?, None),
        };

        let max_prefix = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = prefix_len.unwrap_or(max_prefix);
        if prefix_len > max_prefix {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    /// Check if an IP address is inside this range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Proxies whose forwarding headers are believed.
///
/// Empty means every peer is trusted, which is only safe behind a proxy that
/// overwrites the headers.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    /// Whether headers from `ip` should be believed.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Derives the client key for a request, honouring trusted proxies.
#[derive(Debug, Clone, Default)]
pub struct ClientKeyResolver {
    trusted_proxies: TrustedProxyConfig,
}

impl ClientKeyResolver {
    pub fn new(trusted_proxies: TrustedProxyConfig) -> Self {
        Self { trusted_proxies }
    }

    /// Resolve the key for `req`.
    ///
    /// The peer address comes from Axum's `ConnectInfo<SocketAddr>` extension.
    pub fn resolve<B>(&self, req: &Request<B>) -> String {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        if let Some(addr) = peer
            && !self.trusted_proxies.is_trusted(&addr.ip())
        {
            if extract_ip_from_headers(req.headers()) != ExtractedIp::NotFound {
                debug!(
                    peer = %addr.ip(),
                    "Ignoring forwarding headers from untrusted peer"
                );
            }
            return addr.ip().to_string();
        }

        let peer = peer.map(|addr| addr.to_string());
        resolve_client_key(req.headers(), peer.as_deref()).into_owned()
    }
}
