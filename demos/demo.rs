/* demos/demo.rs */

use real::{
    CdnRangeCache, HeaderMap, HttpFetcher, HttpResponse, MemoryStore, RealIpResolver, Settings,
    SharedSettings,
};
use std::sync::Arc;
use std::time::Duration;

/// Serves a fixed copy of the Cloudflare lists so the demo runs offline.
struct CannedFetcher;

impl HttpFetcher for CannedFetcher {
    fn get(&self, url: &str, _timeout: Duration) -> real::Result<HttpResponse> {
        let body = if url.ends_with("v4") {
            "173.245.48.0/20\n103.21.244.0/22\n104.16.0.0/13\n"
        } else {
            "2400:cb00::/32\n2606:4700::/32\n"
        };
        Ok(HttpResponse::new(200, body))
    }
}

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    println!("=== Real IP Resolution Examples ===\n");

    let cdn = Arc::new(CdnRangeCache::new(
        Arc::new(MemoryStore::new()),
        Arc::new(CannedFetcher),
    ));
    let settings = Arc::new(SharedSettings::new(Settings {
        custom_trusted_ranges: "10.0.0.0/8\n2001:db8::/32".to_string(),
        ..Settings::default()
    }));
    let resolver = RealIpResolver::new(settings.clone(), cdn.clone());

    // Example 1: X-Forwarded-For from a trusted proxy
    let headers = header_map(&[("x-forwarded-for", "10.0.0.5, 198.51.100.9")]);
    show(&resolver, "Trusted proxy, private hop skipped", "10.0.0.2", &headers);

    // Example 2: the same header from an untrusted peer
    show(&resolver, "Untrusted peer, header ignored", "203.0.113.7", &headers);

    // Example 3: turning CDN ranges on warms the cache
    let outcome = settings.update(
        Settings {
            include_cdn_ranges: true,
            custom_trusted_ranges: "10.0.0.0/8".to_string(),
            ..Settings::default()
        },
        &cdn,
    );
    if let Some(outcome) = outcome {
        println!("Settings saved: {outcome}\n");
    }

    let headers = header_map(&[
        ("cf-connecting-ip", "198.51.100.7"),
        ("x-forwarded-for", "198.51.100.9"),
    ]);
    show(&resolver, "Cloudflare edge, CF-Connecting-IP wins", "173.245.48.10", &headers);

    // Example 4: malformed peer address
    show(&resolver, "Malformed peer", "", &HeaderMap::new());

    println!("=== All examples completed! ===");
}

fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn show(resolver: &RealIpResolver, title: &str, peer: &str, headers: &HeaderMap) {
    println!("{title}");
    println!("  peer: {peer:?}");
    for (name, value) in headers {
        println!("  {name}: {value}");
    }
    println!("  resolved: {}\n", resolver.context(peer, headers).real_ip());
}
