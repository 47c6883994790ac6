/* src/trust.rs */

use std::collections::HashSet;
use std::net::IpAddr;

use crate::cache::CdnRangeCache;
use crate::cidr::{CidrRange, ip_in_ranges};
use crate::error::Result;
use crate::settings::Settings;

/// Hook that may add, remove or replace entries of the assembled trust set.
///
/// An error leaves the set as it was before the hook ran.
pub trait TrustSetFilter: Send + Sync {
    fn filter(&self, ranges: &[CidrRange]) -> Result<Vec<CidrRange>>;
}

impl<F> TrustSetFilter for F
where
    F: Fn(&[CidrRange]) -> Result<Vec<CidrRange>> + Send + Sync,
{
    fn filter(&self, ranges: &[CidrRange]) -> Result<Vec<CidrRange>> {
        self(ranges)
    }
}

/// Proxy ranges whose forwarding headers are honored, plus the CDN's own ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustSet {
    ranges: Vec<CidrRange>,
    cdn: Vec<CidrRange>,
}

impl TrustSet {
    pub fn new(ranges: Vec<CidrRange>, cdn: Vec<CidrRange>) -> Self {
        Self { ranges, cdn }
    }

    /// The deduplicated trust set, in insertion order.
    pub fn ranges(&self) -> &[CidrRange] {
        &self.ranges
    }

    /// CDN ranges, empty unless CDN ranges are enabled.
    pub fn cdn_ranges(&self) -> &[CidrRange] {
        &self.cdn
    }

    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        ip_in_ranges(ip, &self.ranges)
    }

    pub fn is_cdn(&self, ip: IpAddr) -> bool {
        ip_in_ranges(ip, &self.cdn)
    }
}

/// Assemble the trust set from the operator's ranges and, when enabled, the CDN's ranges.
///
/// Invalid operator lines are logged and skipped. The filter runs before deduplication.
pub fn trusted_ranges(
    settings: &Settings,
    cdn_cache: &CdnRangeCache,
    filter: Option<&dyn TrustSetFilter>,
) -> TrustSet {
    let mut ranges: Vec<CidrRange> = settings
        .custom_range_lines()
        .filter_map(|line| match line.parse() {
            Ok(range) => Some(range),
            Err(err) => {
                tracing::warn!(range = %line, error = %err, "ignoring invalid trusted range");
                None
            }
        })
        .collect();

    let cdn = if settings.include_cdn_ranges {
        cdn_cache.get_ranges()
    } else {
        Vec::new()
    };
    ranges.extend_from_slice(&cdn);

    if let Some(filter) = filter {
        match filter.filter(&ranges) {
            Ok(filtered) => ranges = filtered,
            Err(err) => tracing::warn!(error = %err, "trust set filter failed, using unfiltered set"),
        }
    }

    let mut seen = HashSet::new();
    ranges.retain(|range| seen.insert(*range));

    TrustSet::new(ranges, cdn)
}
