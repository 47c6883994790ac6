/* demos/axum.rs */

use axum::{
    Router,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
};
use real::{
    Caller, CdnRangeCache, HttpFetcher, HttpResponse, MemoryStore, RealIp, RealIpLayer,
    RealIpResolver, Settings,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Offline stand-in for the Cloudflare endpoints; enable the `fetch` feature for the real one.
struct CannedFetcher;

impl HttpFetcher for CannedFetcher {
    fn get(&self, url: &str, _timeout: Duration) -> real::Result<HttpResponse> {
        let body = if url.ends_with("v4") { "173.245.48.0/20\n" } else { "2606:4700::/32\n" };
        Ok(HttpResponse::new(200, body))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cdn = Arc::new(CdnRangeCache::new(
        Arc::new(MemoryStore::new()),
        Arc::new(CannedFetcher),
    ));
    let settings = Settings {
        include_cdn_ranges: true,
        custom_trusted_ranges: "127.0.0.1\n::1".to_string(),
        show_debug: true,
        ..Settings::default()
    };
    let resolver = RealIpResolver::new(Arc::new(settings), cdn);

    let app = Router::new()
        .route("/ip", get(ip_handler))
        .route("/debug", get(debug_handler))
        .with_state(resolver.clone())
        .layer(RealIpLayer::new(resolver));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();

    println!("Server starting on http://localhost:3000");
    println!("  curl -H 'X-Forwarded-For: 10.0.0.5, 198.51.100.9' http://localhost:3000/ip");
    println!("  curl http://localhost:3000/debug");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

async fn ip_handler(RealIp(ip): RealIp) -> Json<serde_json::Value> {
    Json(json!({
        "real_ip": ip.to_string(),
        "ip_version": if ip.is_ipv4() { "IPv4" } else { "IPv6" },
    }))
}

/// Diagnostic view; local connections count as operators.
async fn debug_handler(
    State(resolver): State<RealIpResolver>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<real::DebugReport>, StatusCode> {
    let caller = if addr.ip().is_loopback() { Caller::Operator } else { Caller::Anonymous };
    let headers: real::HeaderMap = headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let peer = addr.ip().to_string();

    tokio::task::spawn_blocking(move || resolver.context(&peer, &headers).debug_report(caller))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
