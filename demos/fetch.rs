/* demos/fetch.rs */

use real::{CdnRangeCache, MemoryStore, ReqwestFetcher, Settings, matches};
use std::sync::Arc;

fn main() -> real::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let cdn = CdnRangeCache::new(Arc::new(MemoryStore::new()), Arc::new(ReqwestFetcher::new()?));

    let settings = Settings {
        include_cdn_ranges: true,
        ..Settings::default()
    };
    println!("{}", cdn.force_refresh(&settings));

    let ranges = cdn.get_ranges();
    for range in &ranges {
        println!("{range}");
    }

    for ip in ["103.21.243.0", "103.21.244.0", "104.16.0.1", "8.8.8.8", "2606:4700::1111"] {
        println!("{ip}: {}", matches(ip, &ranges));
    }

    Ok(())
}
