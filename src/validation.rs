//! Centralized validation functions for allowlistd.
//!
//! This module provides unified validation for:
//! - IP addresses and CIDR networks (allowlist entries)
//! - Time of day (daily revert schedule)

use anyhow::{bail, Result};
use chrono::NaiveTime;
use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;

/// A validated allowlist address: either a single host or a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    Host(IpAddr),
    Network(IpNet),
}

impl Address {
    /// Whether `other` is covered by this address.
    ///
    /// A host covers only itself. A network covers every host inside it and
    /// every network that is a subnet of it.
    pub fn covers(&self, other: &Address) -> bool {
        match (self, other) {
            (Address::Host(a), Address::Host(b)) => a == b,
            (Address::Host(a), Address::Network(b)) => {
                b.prefix_len() == b.max_prefix_len() && b.addr() == *a
            }
            (Address::Network(a), Address::Host(b)) => a.contains(b),
            (Address::Network(a), Address::Network(b)) => a.contains(b),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Host(ip) => write!(f, "{}", ip),
            Address::Network(net) => write!(f, "{}", net),
        }
    }
}

/// Parse a single IPv4/IPv6 host or CIDR network.
///
/// Networks are normalised to their network address, so `10.0.0.7/24`
/// becomes `10.0.0.0/24`. Surrounding whitespace is rejected.
pub fn parse_address(candidate: &str) -> Option<Address> {
    if candidate.contains('/') {
        candidate
            .parse::<IpNet>()
            .ok()
            .map(|net| Address::Network(net.trunc()))
    } else {
        candidate.parse::<IpAddr>().ok().map(Address::Host)
    }
}

/// Check if a string is a valid IPv4/IPv6 host or CIDR network.
///
/// # Examples
/// ```
/// use allowlistd::validation::is_valid;
/// assert!(is_valid("192.168.1.1"));
/// assert!(is_valid("192.168.0.0/24"));
/// assert!(is_valid("2001:db8::/32"));
/// assert!(!is_valid("192.168.1.0/33"));
/// assert!(!is_valid("hello"));
/// ```
pub fn is_valid(candidate: &str) -> bool {
    parse_address(candidate).is_some()
}

/// Validate an IP address string and return the parsed IpAddr.
///
/// # Examples
/// ```
/// use allowlistd::validation::validate_ip;
/// assert!(validate_ip("192.168.1.1").is_ok());
/// assert!(validate_ip("::1").is_ok());
/// assert!(validate_ip("invalid").is_err());
/// ```
pub fn validate_ip(ip_str: &str) -> Result<IpAddr> {
    ip_str
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid IP address: {}", ip_str))
}

/// Validate an IP address or CIDR string with a descriptive error.
///
/// # Examples
/// ```
/// use allowlistd::validation::validate_ip_or_cidr;
/// assert!(validate_ip_or_cidr("192.168.1.1").is_ok());
/// assert!(validate_ip_or_cidr("192.168.0.0/24").is_ok());
/// assert!(validate_ip_or_cidr("invalid").is_err());
/// ```
pub fn validate_ip_or_cidr(ip_str: &str) -> Result<Address> {
    if ip_str.contains('/') {
        parse_address(ip_str).ok_or_else(|| anyhow::anyhow!("Invalid CIDR: {}", ip_str))
    } else {
        Ok(Address::Host(validate_ip(ip_str)?))
    }
}

/// Validate a time of day in `HH:MM` format.
///
/// Requires ASCII-only input to prevent Unicode-related edge cases.
///
/// # Examples
/// ```
/// use allowlistd::validation::validate_time_of_day;
/// assert!(validate_time_of_day("04:00").is_ok());
/// assert!(validate_time_of_day("4am").is_err());
/// ```
pub fn validate_time_of_day(value: &str) -> Result<NaiveTime> {
    if value.is_empty() {
        bail!("Time of day cannot be empty");
    }

    if !value.is_ascii() {
        bail!("Invalid time of day '{}'. Only ASCII characters allowed", value);
    }

    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| anyhow::anyhow!("Invalid time of day '{}'. Use format like '04:00'", value))
}
