/* src/cidr.rs */

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{RealIpError, Result};

/// A network address plus prefix length.
///
/// The network address is kept as written, so `10.0.0.1/24` and `10.0.0.0/24` are distinct
/// entries that match the same addresses. A bare address parses as a single-host range
/// (`/32` or `/128`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidrRange {
    network: IpAddr,
    prefix: u8,
}

impl CidrRange {
    /// Create a range, validating the prefix against the address family.
    pub fn new(network: IpAddr, prefix: u8) -> Result<Self> {
        let max = max_prefix(network);
        if prefix > max {
            return Err(RealIpError::PrefixOutOfRange {
                prefix: prefix.into(),
                max,
            });
        }
        Ok(Self { network, prefix })
    }

    /// Single-host range covering exactly `ip`.
    pub fn host(ip: IpAddr) -> Self {
        Self {
            network: ip,
            prefix: max_prefix(ip),
        }
    }

    // Only for compile-time tables whose prefixes are known to be in range.
    pub(crate) const fn from_parts(network: IpAddr, prefix: u8) -> Self {
        Self { network, prefix }
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Returns true if `ip` lies inside this range. Different families never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (ip, self.network) {
            (IpAddr::V4(ip), IpAddr::V4(net)) => {
                prefix_matches(&ip.octets(), &net.octets(), self.prefix)
            }
            (IpAddr::V6(ip), IpAddr::V6(net)) => {
                prefix_matches(&ip.octets(), &net.octets(), self.prefix)
            }
            _ => false,
        }
    }
}

impl fmt::Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for CidrRange {
    type Err = RealIpError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        let Some((addr, prefix)) = s.split_once('/') else {
            return parse_ip(s).map(Self::host);
        };

        let network = parse_ip(addr)?;
        let prefix: u16 = prefix
            .trim()
            .parse()
            .map_err(|_| RealIpError::InvalidCidr(s.to_string()))?;

        let max = max_prefix(network);
        match u8::try_from(prefix) {
            Ok(prefix) if prefix <= max => Ok(Self { network, prefix }),
            _ => Err(RealIpError::PrefixOutOfRange { prefix, max }),
        }
    }
}

impl Serialize for CidrRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CidrRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Parse a trimmed IP literal.
pub fn parse_ip(value: &str) -> Result<IpAddr> {
    let value = value.trim();
    value
        .parse()
        .map_err(|_| RealIpError::InvalidIpFormat(value.to_string()))
}

/// Returns true if `ip` falls within any of `ranges`.
pub fn ip_in_ranges(ip: IpAddr, ranges: &[CidrRange]) -> bool {
    ranges.iter().any(|range| range.contains(ip))
}

/// Returns true if the literal `address` falls within any of `ranges`.
///
/// Malformed addresses never match.
pub fn matches(address: &str, ranges: &[CidrRange]) -> bool {
    match parse_ip(address) {
        Ok(ip) => ip_in_ranges(ip, ranges),
        Err(_) => false,
    }
}

fn max_prefix(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Compare the whole bytes covered by `prefix`, then the high-order bits of the boundary byte.
fn prefix_matches(addr: &[u8], network: &[u8], prefix: u8) -> bool {
    let bytes = usize::from(prefix / 8);
    let bits = prefix % 8;

    if addr[..bytes] != network[..bytes] {
        return false;
    }
    if bits == 0 {
        return true;
    }

    let mask = !((1u8 << (8 - bits)) - 1);
    addr[bytes] & mask == network[bytes] & mask
}
