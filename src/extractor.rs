/* src/extractor.rs */

use std::cell::OnceCell;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use crate::cache::CdnRangeCache;
use crate::cidr::{CidrRange, ip_in_ranges, parse_ip};
use crate::debug::{Caller, DebugReport};
use crate::error::Result;
use crate::settings::{Settings, SettingsProvider};
use crate::trust::{TrustSet, TrustSetFilter, trusted_ranges};

/// Type alias for header maps. Keys are lowercase header names.
pub type HeaderMap = HashMap<String, String>;

/// Cloudflare's connecting client address header.
pub const CF_CONNECTING_IP: &str = "cf-connecting-ip";

/// Client address header set by Cloudflare Enterprise and Akamai.
pub const TRUE_CLIENT_IP: &str = "true-client-ip";

/// Generic forwarding headers, in the order they are consulted.
pub const DEFAULT_FORWARDING_HEADERS: [&str; 6] = [
    "X-Forwarded-For",
    "X-Real-IP",
    "Client-IP",
    "X-Forwarded",
    "Forwarded-For",
    "Forwarded",
];

/// Returned when the peer address itself is unusable.
pub const LOOPBACK_SENTINEL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

const NON_PUBLIC_RANGES: [CidrRange; 12] = [
    // private use
    CidrRange::from_parts(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 8),
    CidrRange::from_parts(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 0)), 12),
    CidrRange::from_parts(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 0)), 16),
    CidrRange::from_parts(IpAddr::V6(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0)), 7),
    // reserved
    CidrRange::from_parts(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8),
    CidrRange::from_parts(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 0)), 8),
    CidrRange::from_parts(IpAddr::V4(Ipv4Addr::new(169, 254, 0, 0)), 16),
    CidrRange::from_parts(IpAddr::V4(Ipv4Addr::new(240, 0, 0, 0)), 4),
    CidrRange::from_parts(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 128),
    CidrRange::from_parts(IpAddr::V6(Ipv6Addr::LOCALHOST), 128),
    CidrRange::from_parts(IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0, 0)), 96),
    CidrRange::from_parts(IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0)), 10),
];

/// Check if IP is outside private-use and reserved ranges.
pub fn is_public_ip(ip: IpAddr) -> bool {
    !ip_in_ranges(ip, &NON_PUBLIC_RANGES)
}

/// Parse a header value and accept it only if it is a public address.
pub fn parse_public_ip(value: &str) -> Option<IpAddr> {
    parse_ip(value).ok().filter(|ip| is_public_ip(*ip))
}

/// Hook over the ordered list of generic forwarding header names.
///
/// The returned list fully replaces the default order. An error keeps the default.
pub trait HeaderFilter: Send + Sync {
    fn filter(&self, headers: &[String]) -> Result<Vec<String>>;
}

impl<F> HeaderFilter for F
where
    F: Fn(&[String]) -> Result<Vec<String>> + Send + Sync,
{
    fn filter(&self, headers: &[String]) -> Result<Vec<String>> {
        self(headers)
    }
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(&name.to_lowercase())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// Resolve the originating client address.
///
/// Headers are honored only when the peer is trusted or trust is not required. Peers in the
/// CDN's ranges are read from the CDN's own headers; everyone else goes through
/// `forwarding_headers` in order. Whatever happens, the peer address is the fallback.
pub fn resolve(
    peer: &str,
    headers: &HeaderMap,
    settings: &Settings,
    trust: &TrustSet,
    forwarding_headers: &[String],
) -> IpAddr {
    let Ok(peer) = parse_ip(peer) else {
        return LOOPBACK_SENTINEL;
    };

    if settings.require_trusted_proxy && !trust.is_trusted(peer) {
        return peer;
    }

    let from_cdn = settings.include_cdn_ranges && trust.is_cdn(peer);
    if from_cdn {
        return [CF_CONNECTING_IP, TRUE_CLIENT_IP]
            .into_iter()
            .filter_map(|name| header(headers, name))
            .find_map(parse_public_ip)
            .unwrap_or(peer);
    }

    for name in forwarding_headers {
        let Some(value) = header(headers, name) else {
            continue;
        };

        // leftmost public entry is the client-declared origin
        let found = if name.eq_ignore_ascii_case("x-forwarded-for") {
            value.split(',').find_map(parse_public_ip)
        } else {
            parse_public_ip(value)
        };

        if let Some(ip) = found {
            return ip;
        }
    }

    peer
}

/// Long-lived resolver: settings source, CDN cache and optional hooks.
///
/// Create one [`ResolutionContext`] per request with [`RealIpResolver::context`].
#[derive(Clone)]
pub struct RealIpResolver {
    settings: Arc<dyn SettingsProvider>,
    cdn: Arc<CdnRangeCache>,
    trust_filter: Option<Arc<dyn TrustSetFilter>>,
    header_filter: Option<Arc<dyn HeaderFilter>>,
}

impl std::fmt::Debug for RealIpResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealIpResolver")
            .field("cdn", &self.cdn)
            .field("trust_filter", &self.trust_filter.is_some())
            .field("header_filter", &self.header_filter.is_some())
            .finish_non_exhaustive()
    }
}

impl RealIpResolver {
    pub fn new(settings: Arc<dyn SettingsProvider>, cdn: Arc<CdnRangeCache>) -> Self {
        Self {
            settings,
            cdn,
            trust_filter: None,
            header_filter: None,
        }
    }

    /// Register a hook over the assembled trust set.
    pub fn with_trust_filter(mut self, filter: impl TrustSetFilter + 'static) -> Self {
        self.trust_filter = Some(Arc::new(filter));
        self
    }

    /// Register a hook over the generic forwarding header list.
    pub fn with_header_filter(mut self, filter: impl HeaderFilter + 'static) -> Self {
        self.header_filter = Some(Arc::new(filter));
        self
    }

    pub fn cdn_cache(&self) -> &CdnRangeCache {
        &self.cdn
    }

    /// Start a resolution for one request, snapshotting the current settings.
    pub fn context<'a>(&'a self, peer: &'a str, headers: &'a HeaderMap) -> ResolutionContext<'a> {
        ResolutionContext {
            resolver: self,
            settings: self.settings.settings(),
            peer,
            headers,
            trust: OnceCell::new(),
            real_ip: OnceCell::new(),
        }
    }

    fn forwarding_headers(&self) -> Vec<String> {
        let defaults: Vec<String> = DEFAULT_FORWARDING_HEADERS.iter().map(|h| h.to_string()).collect();

        let Some(filter) = &self.header_filter else {
            return defaults;
        };

        match filter.filter(&defaults) {
            Ok(headers) => headers,
            Err(err) => {
                tracing::warn!(error = %err, "header filter failed, using default headers");
                defaults
            }
        }
    }
}

/// Per-request resolution state.
///
/// The trust set and the resolved address are computed at most once per context.
pub struct ResolutionContext<'a> {
    resolver: &'a RealIpResolver,
    settings: Settings,
    peer: &'a str,
    headers: &'a HeaderMap,
    trust: OnceCell<TrustSet>,
    real_ip: OnceCell<IpAddr>,
}

impl ResolutionContext<'_> {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn trust_set(&self) -> &TrustSet {
        self.trust.get_or_init(|| {
            trusted_ranges(
                &self.settings,
                &self.resolver.cdn,
                self.resolver.trust_filter.as_deref(),
            )
        })
    }

    /// Whether the peer address is inside the trust set.
    pub fn from_trusted_proxy(&self) -> bool {
        match parse_ip(self.peer) {
            Ok(peer) => self.trust_set().is_trusted(peer),
            Err(_) => false,
        }
    }

    /// The resolved client address.
    pub fn real_ip(&self) -> IpAddr {
        *self.real_ip.get_or_init(|| {
            let ip = resolve(
                self.peer,
                self.headers,
                &self.settings,
                self.trust_set(),
                &self.resolver.forwarding_headers(),
            );
            tracing::debug!(peer = %self.peer, real_ip = %ip, "resolved client address");
            ip
        })
    }

    /// Diagnostic view, only for operators and only while `show_debug` is on.
    pub fn debug_report(&self, caller: Caller) -> Option<DebugReport> {
        if !self.settings.show_debug || caller != Caller::Operator {
            return None;
        }

        Some(DebugReport {
            remote_addr: self.peer.to_string(),
            from_trusted_proxy: self.from_trusted_proxy(),
            resolved_real_ip: self.real_ip(),
            require_trusted_proxy: self.settings.require_trusted_proxy,
            cdn_cache_size: self.resolver.cdn.cached_len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::cache::tests::FakeFetcher;
    use crate::error::RealIpError;
    use crate::settings::SharedSettings;

    const CF_PEER: &str = "173.245.48.1";

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_string()))
            .collect()
    }

    fn defaults() -> Vec<String> {
        DEFAULT_FORWARDING_HEADERS.iter().map(|h| h.to_string()).collect()
    }

    fn trust(ranges: &[&str], cdn: &[&str]) -> TrustSet {
        let parse = |items: &[&str]| items.iter().map(|r| r.parse::<CidrRange>().unwrap()).collect::<Vec<_>>();
        let mut all = parse(ranges);
        all.extend(parse(cdn));
        TrustSet::new(all, parse(cdn))
    }

    fn strict() -> Settings {
        Settings::default()
    }

    fn with_cdn() -> Settings {
        Settings {
            include_cdn_ranges: true,
            ..Settings::default()
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_public_ip_validation() {
        for private in [
            "10.0.0.5", "172.16.3.4", "192.168.1.1", "127.0.0.1", "169.254.1.1", "0.1.2.3",
            "240.0.0.1", "255.255.255.255", "::1", "::", "fd00::1", "fe80::1", "::ffff:8.8.8.8",
        ] {
            assert!(!is_public_ip(ip(private)), "{private} should not be public");
        }
        for public in ["8.8.8.8", "198.51.100.7", "203.0.113.1", "172.32.0.1", "2606:4700::1"] {
            assert!(is_public_ip(ip(public)), "{public} should be public");
        }
        assert_eq!(parse_public_ip(" 8.8.4.4 "), Some(ip("8.8.4.4")));
        assert_eq!(parse_public_ip("unknown"), None);
    }

    #[test]
    fn test_invalid_peer_yields_loopback() {
        let h = headers(&[("x-forwarded-for", "198.51.100.9")]);
        let t = trust(&["0.0.0.0/0"], &[]);
        assert_eq!(resolve("", &h, &strict(), &t, &defaults()), LOOPBACK_SENTINEL);
        assert_eq!(resolve("garbage", &h, &strict(), &t, &defaults()), ip("127.0.0.1"));
    }

    #[test]
    fn test_untrusted_peer_ignores_headers() {
        let h = headers(&[
            ("X-Forwarded-For", "198.51.100.9"),
            ("X-Real-IP", "198.51.100.10"),
            ("CF-Connecting-IP", "198.51.100.7"),
        ]);
        let t = trust(&["10.0.0.0/8"], &[]);
        assert_eq!(resolve("203.0.113.5", &h, &strict(), &t, &defaults()), ip("203.0.113.5"));
        assert_eq!(resolve("203.0.113.5", &h, &strict(), &TrustSet::default(), &defaults()), ip("203.0.113.5"));
    }

    #[test]
    fn test_trust_not_required_reads_headers() {
        let settings = Settings {
            require_trusted_proxy: false,
            ..Settings::default()
        };
        let h = headers(&[("X-Real-IP", "198.51.100.10")]);
        assert_eq!(
            resolve("203.0.113.5", &h, &settings, &TrustSet::default(), &defaults()),
            ip("198.51.100.10")
        );
    }

    #[test]
    fn test_forwarded_for_skips_private_entries() {
        let h = headers(&[("X-Forwarded-For", "10.0.0.5, 198.51.100.9")]);
        let t = trust(&["10.0.0.0/8"], &[]);
        assert_eq!(resolve("10.1.1.1", &h, &strict(), &t, &defaults()), ip("198.51.100.9"));

        let h = headers(&[("X-Forwarded-For", "unknown, 198.51.100.1 ,198.51.100.2")]);
        assert_eq!(resolve("10.1.1.1", &h, &strict(), &t, &defaults()), ip("198.51.100.1"));
    }

    #[test]
    fn test_header_order_and_fallback() {
        let t = trust(&["10.0.0.0/8"], &[]);

        let h = headers(&[("Forwarded", "198.51.100.3"), ("Client-IP", "198.51.100.2")]);
        assert_eq!(resolve("10.1.1.1", &h, &strict(), &t, &defaults()), ip("198.51.100.2"));

        let h = headers(&[("X-Forwarded-For", "10.0.0.2, 192.168.0.1"), ("X-Real-IP", "198.51.100.4")]);
        assert_eq!(resolve("10.1.1.1", &h, &strict(), &t, &defaults()), ip("198.51.100.4"));

        let h = headers(&[("X-Real-IP", "192.168.0.9"), ("Forwarded", "for=198.51.100.3")]);
        assert_eq!(resolve("10.1.1.1", &h, &strict(), &t, &defaults()), ip("10.1.1.1"));

        assert_eq!(resolve("10.1.1.1", &HeaderMap::new(), &strict(), &t, &defaults()), ip("10.1.1.1"));
    }

    #[test]
    fn test_cdn_peer_prefers_cdn_headers() {
        let t = trust(&[], &["173.245.48.0/20"]);
        let h = headers(&[
            ("CF-Connecting-IP", "198.51.100.7"),
            ("True-Client-IP", "198.51.100.8"),
            ("X-Forwarded-For", "198.51.100.9"),
        ]);
        assert_eq!(resolve(CF_PEER, &h, &with_cdn(), &t, &defaults()), ip("198.51.100.7"));

        let h = headers(&[
            ("CF-Connecting-IP", "10.0.0.1"),
            ("True-Client-IP", "2001:4860::8888"),
        ]);
        assert_eq!(resolve(CF_PEER, &h, &with_cdn(), &t, &defaults()), ip("2001:4860::8888"));
    }

    #[test]
    fn test_cdn_peer_never_reads_generic_headers() {
        let t = trust(&[], &["173.245.48.0/20"]);
        let h = headers(&[("CF-Connecting-IP", "192.168.1.1"), ("X-Forwarded-For", "198.51.100.9")]);
        assert_eq!(resolve(CF_PEER, &h, &with_cdn(), &t, &defaults()), ip(CF_PEER));
    }

    #[test]
    fn test_cdn_disabled_uses_generic_headers() {
        let t = trust(&["173.245.48.0/20"], &["173.245.48.0/20"]);
        let h = headers(&[("CF-Connecting-IP", "198.51.100.7"), ("X-Forwarded-For", "198.51.100.9")]);
        assert_eq!(resolve(CF_PEER, &h, &strict(), &t, &defaults()), ip("198.51.100.9"));
    }

    #[test]
    fn test_custom_header_list() {
        let t = trust(&["10.0.0.0/8"], &[]);
        let h = headers(&[("X-Forwarded-For", "198.51.100.9"), ("X-Client-Addr", "198.51.100.20")]);
        let order = vec!["X-Client-Addr".to_string()];
        assert_eq!(resolve("10.1.1.1", &h, &strict(), &t, &order), ip("198.51.100.20"));
        assert_eq!(resolve("10.1.1.1", &h, &strict(), &t, &[]), ip("10.1.1.1"));
    }

    fn build_resolver(settings: Settings, fetcher: FakeFetcher) -> (RealIpResolver, Arc<FakeFetcher>) {
        let fetcher = Arc::new(fetcher);
        let cdn = Arc::new(CdnRangeCache::new(Arc::new(MemoryStore::new()), fetcher.clone()));
        (RealIpResolver::new(Arc::new(settings), cdn), fetcher)
    }

    #[test]
    fn test_context_end_to_end_with_cdn() {
        let (resolver, fetcher) = build_resolver(with_cdn(), FakeFetcher::cloudflare());
        let h = headers(&[("CF-Connecting-IP", "198.51.100.7"), ("X-Forwarded-For", "198.51.100.9")]);

        let ctx = resolver.context(CF_PEER, &h);
        assert!(ctx.from_trusted_proxy());
        assert_eq!(ctx.real_ip(), ip("198.51.100.7"));
        assert_eq!(fetcher.calls(), 2);

        // next request hits the warm cache
        let ctx = resolver.context("203.0.113.50", &h);
        assert_eq!(ctx.real_ip(), ip("203.0.113.50"));
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_context_memoizes() {
        let settings = Settings {
            custom_trusted_ranges: "10.0.0.0/8".into(),
            ..Settings::default()
        };
        let (resolver, _) = build_resolver(settings, FakeFetcher::new());
        let h = headers(&[("X-Forwarded-For", "10.0.0.5, 198.51.100.9")]);

        let ctx = resolver.context("10.2.3.4", &h);
        let first = ctx.real_ip();
        assert_eq!(first, ip("198.51.100.9"));
        assert_eq!(ctx.real_ip(), first);
        assert!(std::ptr::eq(ctx.trust_set(), ctx.trust_set()));

        // fresh context, identical inputs, identical result
        assert_eq!(resolver.context("10.2.3.4", &h).real_ip(), first);
    }

    #[test]
    fn test_context_sees_settings_updates() {
        let shared = Arc::new(SharedSettings::default());
        let cdn = Arc::new(CdnRangeCache::new(Arc::new(MemoryStore::new()), Arc::new(FakeFetcher::new())));
        let resolver = RealIpResolver::new(shared.clone(), cdn.clone());
        let h = headers(&[("X-Real-IP", "198.51.100.10")]);

        assert_eq!(resolver.context("10.2.3.4", &h).real_ip(), ip("10.2.3.4"));

        shared.update(
            Settings {
                custom_trusted_ranges: "10.0.0.0/8".into(),
                ..Settings::default()
            },
            &cdn,
        );
        assert_eq!(resolver.context("10.2.3.4", &h).real_ip(), ip("198.51.100.10"));
    }

    #[test]
    fn test_hooks() {
        let settings = Settings {
            custom_trusted_ranges: "10.0.0.0/8".into(),
            ..Settings::default()
        };
        let (resolver, _) = build_resolver(settings, FakeFetcher::new());
        let resolver = resolver
            .with_trust_filter(|ranges: &[CidrRange]| -> Result<Vec<CidrRange>> {
                let mut ranges = ranges.to_vec();
                ranges.push("203.0.113.0/24".parse()?);
                Ok(ranges)
            })
            .with_header_filter(|headers: &[String]| -> Result<Vec<String>> {
                let mut headers = headers.to_vec();
                headers.insert(0, "X-Edge-Client".to_string());
                Ok(headers)
            });

        let h = headers(&[("X-Edge-Client", "198.51.100.77"), ("X-Forwarded-For", "198.51.100.9")]);
        assert_eq!(resolver.context("203.0.113.5", &h).real_ip(), ip("198.51.100.77"));
    }

    #[test]
    fn test_failing_header_hook_keeps_defaults() {
        let settings = Settings {
            require_trusted_proxy: false,
            ..Settings::default()
        };
        let (resolver, _) = build_resolver(settings, FakeFetcher::new());
        let resolver = resolver
            .with_header_filter(|_: &[String]| -> Result<Vec<String>> { Err(RealIpError::Hook("nope".into())) });

        let h = headers(&[("X-Forwarded-For", "198.51.100.9")]);
        assert_eq!(resolver.context("203.0.113.5", &h).real_ip(), ip("198.51.100.9"));
    }

    #[test]
    fn test_debug_report_gating() {
        let settings = Settings {
            show_debug: true,
            custom_trusted_ranges: "10.0.0.0/8".into(),
            ..Settings::default()
        };
        let (resolver, _) = build_resolver(settings, FakeFetcher::new());
        let h = headers(&[("X-Forwarded-For", "198.51.100.9")]);
        let ctx = resolver.context("10.2.3.4", &h);

        assert!(ctx.debug_report(Caller::Anonymous).is_none());
        let report = ctx.debug_report(Caller::Operator).unwrap();
        assert_eq!(report.remote_addr, "10.2.3.4");
        assert!(report.from_trusted_proxy);
        assert_eq!(report.resolved_real_ip, ip("198.51.100.9"));
        assert!(report.require_trusted_proxy);
        assert_eq!(report.cdn_cache_size, 0);

        let (resolver, _) = build_resolver(Settings::default(), FakeFetcher::new());
        assert!(resolver.context("10.2.3.4", &h).debug_report(Caller::Operator).is_none());
    }
}
