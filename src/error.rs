/* src/error.rs */

use thiserror::Error;

/// Result type alias for operations that may fail with `RealIpError`.
pub type Result<T> = std::result::Result<T, RealIpError>;

/// Errors surfaced by parsing, fetching and extension hooks.
///
/// None of these ever escape [`RealIpResolver`](crate::RealIpResolver); the resolution path
/// degrades to a non-match, a stale cache or a fallback address instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RealIpError {
    /// Invalid IP address format.
    #[error("Invalid IP address format: {0}")]
    InvalidIpFormat(String),

    /// CIDR literal that is not `address[/prefix]`.
    #[error("Invalid CIDR range: {0}")]
    InvalidCidr(String),

    /// Prefix length larger than the address family allows.
    #[error("Prefix length {prefix} exceeds maximum of {max}")]
    PrefixOutOfRange { prefix: u16, max: u8 },

    /// Transport failure or timeout while fetching upstream ranges.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Upstream answered with something other than 200.
    #[error("Unexpected upstream status: {0}")]
    UnexpectedStatus(u16),

    /// Upstream answered 200 with nothing in the body.
    #[error("Upstream returned an empty body")]
    EmptyBody,

    /// No usable range came out of any upstream source.
    #[error("No ranges could be fetched")]
    NoRanges,

    /// An extension hook rejected its input.
    #[error("Extension hook failed: {0}")]
    Hook(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            RealIpError::PrefixOutOfRange { prefix: 33, max: 32 }.to_string(),
            "Prefix length 33 exceeds maximum of 32"
        );
        assert_eq!(
            RealIpError::UnexpectedStatus(503).to_string(),
            "Unexpected upstream status: 503"
        );
    }
}
