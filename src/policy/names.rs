//! Expected peer names and SAN matching.

use std::fmt;
use std::net::IpAddr;

use rustls::pki_types::ServerName;

use crate::keystore::{Certificate, SubjectAltName};

/// A name the leaf certificate must carry in its SAN extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedName {
    /// DNS host name, stored lowercase without a trailing dot.
    Dns(String),
    /// IP address, matched exactly against IP SANs.
    Ip(IpAddr),
}

impl ExpectedName {
    /// Parse a configured name: IP literals become [`ExpectedName::Ip`],
    /// everything else a DNS name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        if let Ok(ip) = name.parse::<IpAddr>() {
            return Some(Self::Ip(ip));
        }
        Some(Self::Dns(normalize_dns(name)))
    }

    /// The name a client expects the server to present.
    pub fn from_server_name(name: &ServerName<'_>) -> Option<Self> {
        match name {
            ServerName::DnsName(dns) => Some(Self::Dns(normalize_dns(dns.as_ref()))),
            ServerName::IpAddress(ip) => Some(Self::Ip(IpAddr::from(*ip))),
            _ => None,
        }
    }

    /// Whether any SAN of `cert` matches this name.
    pub fn matches(&self, cert: &Certificate) -> bool {
        cert.subject_alt_names().iter().any(|san| match (self, san) {
            (Self::Dns(expected), SubjectAltName::Dns(pattern)) => dns_matches(pattern, expected),
            (Self::Ip(expected), SubjectAltName::Ip(ip)) => expected == ip,
            _ => false,
        })
    }
}

impl fmt::Display for ExpectedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns(name) => f.write_str(name),
            Self::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

fn normalize_dns(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Case-insensitive DNS match. A `*.` prefix on the pattern stands for
/// exactly one left-most label.
fn dns_matches(pattern: &str, expected: &str) -> bool {
    let pattern = normalize_dns(pattern);
    match pattern.strip_prefix("*.") {
        Some(suffix) => expected
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == expected,
    }
}
