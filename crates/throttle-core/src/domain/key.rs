//! Client identity and rate limit key encoding.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::error::RateLimitError;

/// Identity of the client a counter is kept for.
///
/// Addresses are parsed so that textual variants of the same address
/// (`::ffff:1.2.3.4` vs `1.2.3.4`, with or without a port) share one counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    Ip(IpAddr),
    /// Anything that does not parse as an address (hostnames, "unknown", ...).
    Opaque(String),
}

impl ClientIdentity {
    /// Parse a raw address value. Returns `None` for empty input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let ip = raw
            .parse::<IpAddr>()
            .or_else(|_| raw.parse::<SocketAddr>().map(|addr| addr.ip()));

        Some(match ip {
            Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
                Some(v4) => Self::Ip(IpAddr::V4(v4)),
                None => Self::Ip(IpAddr::V6(v6)),
            },
            Ok(ip) => Self::Ip(ip),
            Err(_) => Self::Opaque(raw.to_string()),
        })
    }

    /// Resolve the identity of a request.
    ///
    /// Precedence: `Client-IP` header, then the leftmost non-empty entry of
    /// `X-Forwarded-For`, then the transport peer address. The first non-empty
    /// value wins. Both headers are client-controlled, so callers should only
    /// pass them when running behind a trusted reverse proxy.
    pub fn resolve(
        client_ip: Option<&str>,
        forwarded_for: Option<&str>,
        peer_addr: Option<&str>,
    ) -> Option<Self> {
        let forwarded = forwarded_for.and_then(|value| {
            value
                .split(',')
                .map(str::trim)
                .find(|entry| !entry.is_empty())
        });

        [client_ip, forwarded, peer_addr]
            .into_iter()
            .flatten()
            .find_map(Self::parse)
    }

    /// Store-safe token for this identity.
    ///
    /// The address family is tagged and the raw octets are hex encoded, which
    /// keeps the encoding injective: `1.2.3.4` and `12.3.4` never share a token.
    pub fn token(&self) -> String {
        match self {
            Self::Ip(IpAddr::V4(v4)) => format!("v4-{}", hex::encode(v4.octets())),
            Self::Ip(IpAddr::V6(v6)) => format!("v6-{}", hex::encode(v6.octets())),
            Self::Opaque(raw) => format!("raw-{}", hex::encode(raw)),
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{}", ip),
            Self::Opaque(raw) => write!(f, "{}", raw),
        }
    }
}

/// Identity of a window counter: a resource name plus a client identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    resource: String,
    identity: ClientIdentity,
}

impl RateLimitKey {
    pub fn new(resource: impl Into<String>, identity: ClientIdentity) -> Result<Self, RateLimitError> {
        let resource = resource.into();
        if resource.is_empty() {
            return Err(RateLimitError::InvalidConfiguration(
                "resource name must not be empty".to_string(),
            ));
        }

        Ok(Self { resource, identity })
    }

    /// Encode as a single store key: `<prefix>:<resource>:<identity token>`.
    ///
    /// `%` and `:` in the resource name are percent-escaped so the delimiter
    /// only ever separates segments.
    pub fn encode(&self, prefix: &str) -> String {
        let resource = self.resource.replace('%', "%25").replace(':', "%3A");
        let token = self.identity.token();

        if prefix.is_empty() {
            format!("{}:{}", resource, token)
        } else {
            format!("{}:{}:{}", prefix, resource, token)
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resource, self.identity)
    }
}
