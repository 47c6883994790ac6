/* src/cache.rs */

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::cidr::CidrRange;
use crate::error::{RealIpError, Result};
use crate::settings::Settings;

/// Cloudflare's published IPv4 ranges, one CIDR per line.
pub const CF_URL_IPS_V4: &str = "https://www.cloudflare.com/ips-v4";

/// Cloudflare's published IPv6 ranges, one CIDR per line.
pub const CF_URL_IPS_V6: &str = "https://www.cloudflare.com/ips-v6";

/// Name under which persistent stores should keep the CDN range entry.
pub const CDN_CACHE_KEY: &str = "real_ip_cdn_ranges";

/// Upper bound for a single upstream request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(8);

/// How long a fetched range list stays fresh.
pub fn default_ttl() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Status and body of an upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Blocking `GET` capability used to pull the CDN's range lists.
///
/// Implementations must give up after `timeout`.
pub trait HttpFetcher: Send + Sync {
    fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse>;
}

/// A fetched range list and when it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub ranges: Vec<CidrRange>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(ranges: Vec<CidrRange>) -> Self {
        Self {
            ranges,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, ttl: TimeDelta, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.fetched_at) >= ttl
    }
}

/// Storage for the single CDN range entry.
///
/// `store` replaces the entry as a whole; concurrent writers race with last-writer-wins.
pub trait CacheStore: Send + Sync {
    fn load(&self) -> Option<Arc<CacheEntry>>;
    fn store(&self, entry: CacheEntry);
    fn delete(&self);
}

/// In-process [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entry: ArcSwapOption<CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self) -> Option<Arc<CacheEntry>> {
        self.entry.load_full()
    }

    fn store(&self, entry: CacheEntry) {
        self.entry.store(Some(Arc::new(entry)));
    }

    fn delete(&self) {
        self.entry.store(None);
    }
}

/// Result of an operator-triggered or scheduled sync, shown as an advisory banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// CDN ranges are switched off; nothing was fetched.
    Disabled,
    /// Fresh ranges were stored.
    Updated { ranges: usize },
    /// Fetch failed; the existing cache (or nothing) remains in use.
    Failed,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("CDN ranges are disabled; nothing to sync."),
            Self::Updated { ranges } => write!(f, "CDN ranges updated ({ranges} ranges)."),
            Self::Failed => f.write_str("Sync failed; keeping the existing cache or an empty list."),
        }
    }
}

/// Time-limited cache of a CDN's published address ranges.
pub struct CdnRangeCache {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn HttpFetcher>,
    sources: Vec<String>,
    ttl: TimeDelta,
    timeout: Duration,
}

impl fmt::Debug for CdnRangeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdnRangeCache")
            .field("sources", &self.sources)
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CdnRangeCache {
    /// Cache over Cloudflare's v4 and v6 lists with a 24 hour TTL.
    pub fn new(store: Arc<dyn CacheStore>, fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            store,
            fetcher,
            sources: vec![CF_URL_IPS_V4.to_string(), CF_URL_IPS_V6.to_string()],
            ttl: default_ttl(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Replace the upstream list URLs.
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current ranges, refetching when the entry is missing or expired.
    ///
    /// A failed refetch serves the previous entry even if it is stale, or an empty list
    /// when there has never been one.
    pub fn get_ranges(&self) -> Vec<CidrRange> {
        let cached = self.store.load();

        if let Some(entry) = &cached {
            if !entry.is_expired(self.ttl, Utc::now()) {
                tracing::debug!(ranges = entry.ranges.len(), "serving cached CDN ranges");
                return entry.ranges.clone();
            }
        }

        match self.fetch_and_store() {
            Ok(ranges) => ranges,
            Err(err) => {
                tracing::warn!(error = %err, stale = cached.is_some(), "CDN range refresh failed");
                cached.map(|entry| entry.ranges.clone()).unwrap_or_default()
            }
        }
    }

    /// Fetch fresh ranges now, ignoring the TTL. Only runs while `include_cdn_ranges` is on.
    ///
    /// On failure the existing entry is left untouched.
    pub fn force_refresh(&self, settings: &Settings) -> SyncOutcome {
        if !settings.include_cdn_ranges {
            tracing::debug!("skipping CDN refresh, CDN ranges disabled");
            return SyncOutcome::Disabled;
        }

        match self.fetch_and_store() {
            Ok(ranges) => SyncOutcome::Updated {
                ranges: ranges.len(),
            },
            Err(err) => {
                tracing::warn!(error = %err, "forced CDN range refresh failed");
                SyncOutcome::Failed
            }
        }
    }

    /// Remove the cached entry.
    pub fn invalidate(&self) {
        self.store.delete();
    }

    /// Number of ranges in the stored entry, fresh or not.
    pub fn cached_len(&self) -> usize {
        self.store.load().map_or(0, |entry| entry.ranges.len())
    }

    fn fetch_and_store(&self) -> Result<Vec<CidrRange>> {
        let ranges = self.fetch()?;
        tracing::info!(ranges = ranges.len(), "fetched CDN ranges");
        self.store.store(CacheEntry::new(ranges.clone()));
        Ok(ranges)
    }

    fn fetch(&self) -> Result<Vec<CidrRange>> {
        let mut seen = HashSet::new();
        let mut ranges = Vec::new();

        for url in &self.sources {
            tracing::debug!(%url, "fetching CDN ranges");
            let body = match self.fetch_source(url) {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(%url, error = %err, "skipping CDN range source");
                    continue;
                }
            };

            for line in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
                match line.parse::<CidrRange>() {
                    Ok(range) => {
                        if seen.insert(range) {
                            ranges.push(range);
                        }
                    }
                    Err(err) => tracing::warn!(%url, range = %line, error = %err, "ignoring invalid CDN range"),
                }
            }
        }

        if ranges.is_empty() {
            return Err(RealIpError::NoRanges);
        }
        Ok(ranges)
    }

    fn fetch_source(&self, url: &str) -> Result<String> {
        let res = self.fetcher.get(url, self.timeout)?;
        if res.status != 200 {
            return Err(RealIpError::UnexpectedStatus(res.status));
        }
        if res.body.trim().is_empty() {
            return Err(RealIpError::EmptyBody);
        }
        Ok(res.body)
    }
}
