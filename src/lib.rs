/* src/lib.rs */
//! # Real IP Resolver
//!
//! Trustworthy client IP resolution behind reverse proxies and CDNs. Forwarding headers are
//! only honored when the connecting peer is inside a trust set assembled from operator
//! supplied CIDR ranges and, optionally, Cloudflare's published ranges.
//!
//! ## Features
//!
//! - IPv4/IPv6 CIDR matching, bare addresses treated as single hosts
//! - Trusted-proxy gate against header spoofing
//! - `CF-Connecting-IP` / `True-Client-IP` for peers inside the CDN's ranges
//! - Generic `X-Forwarded-For`, `X-Real-IP`, ... scan accepting public addresses only
//! - CDN range cache with a 24 hour TTL that serves stale data when upstream fails
//! - Hooks over the trust set and the forwarding header list
//! - `fetch`: blocking `reqwest` fetcher for the CDN range lists
//! - `axum`: tower layer and `RealIp` extractor
//!
//! ## Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use real::{CdnRangeCache, HeaderMap, HttpFetcher, HttpResponse, MemoryStore, RealIpResolver, Settings};
//!
//! struct Offline;
//!
//! impl HttpFetcher for Offline {
//!     fn get(&self, _url: &str, _timeout: Duration) -> real::Result<HttpResponse> {
//!         Err(real::RealIpError::Fetch("offline".into()))
//!     }
//! }
//!
//! let settings = Settings {
//!     custom_trusted_ranges: "10.0.0.0/8".into(),
//!     ..Settings::default()
//! };
//! let cdn = Arc::new(CdnRangeCache::new(Arc::new(MemoryStore::new()), Arc::new(Offline)));
//! let resolver = RealIpResolver::new(Arc::new(settings), cdn);
//!
//! let mut headers = HeaderMap::new();
//! headers.insert("x-forwarded-for".to_string(), "10.0.0.5, 198.51.100.9".to_string());
//!
//! // trusted proxy: first public entry wins
//! let ip = resolver.context("10.0.0.2", &headers).real_ip();
//! assert_eq!(ip, "198.51.100.9".parse::<std::net::IpAddr>().unwrap());
//!
//! // anyone else: the header is ignored
//! let ip = resolver.context("203.0.113.7", &headers).real_ip();
//! assert_eq!(ip, "203.0.113.7".parse::<std::net::IpAddr>().unwrap());
//! ```

pub mod cache;
pub mod cidr;
pub mod debug;
pub mod error;
pub mod extractor;
pub mod schedule;
pub mod settings;
pub mod trust;

#[cfg(feature = "fetch")]
pub mod fetch;

#[cfg(feature = "axum")]
pub mod middleware;

pub use cache::{
    CDN_CACHE_KEY, CF_URL_IPS_V4, CF_URL_IPS_V6, CacheEntry, CacheStore, CdnRangeCache,
    HttpFetcher, HttpResponse, MemoryStore, SyncOutcome,
};
pub use cidr::{CidrRange, ip_in_ranges, matches};
pub use debug::{Caller, DebugReport};
pub use error::{RealIpError, Result};
pub use extractor::{
    CF_CONNECTING_IP, DEFAULT_FORWARDING_HEADERS, HeaderFilter, HeaderMap, LOOPBACK_SENTINEL,
    RealIpResolver, ResolutionContext, TRUE_CLIENT_IP, is_public_ip, resolve,
};
pub use schedule::{RefreshSchedule, Scheduler};
pub use settings::{Settings, SettingsProvider, SharedSettings};
pub use trust::{TrustSet, TrustSetFilter, trusted_ranges};

#[cfg(feature = "fetch")]
pub use fetch::ReqwestFetcher;

#[cfg(feature = "axum")]
pub use middleware::{RealIp, RealIpLayer, RealIpService};

/// Re-export commonly used types
pub use std::net::IpAddr;
