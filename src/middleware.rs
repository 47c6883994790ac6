/* src/middleware.rs */

use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
    response::Response,
};
use futures_util::future::BoxFuture;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};

use crate::extractor::RealIpResolver;

/// Extension that holds the resolved client IP address.
#[derive(Debug, Clone)]
pub struct RealIp(pub IpAddr);

impl RealIp {
    /// Get the IP address.
    pub fn ip(&self) -> IpAddr {
        self.0
    }
}

/// Layer that resolves the client IP of each request and stores it as a [`RealIp`] extension.
///
/// The peer address comes from `ConnectInfo<SocketAddr>`, so serve the router with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use axum::{Router, routing::get};
/// use real::{CdnRangeCache, MemoryStore, RealIp, RealIpLayer, RealIpResolver, Settings};
/// # use real::{HttpFetcher, HttpResponse};
/// # struct Offline;
/// # impl HttpFetcher for Offline {
/// #     fn get(&self, _: &str, _: std::time::Duration) -> real::Result<HttpResponse> {
/// #         Err(real::RealIpError::Fetch("offline".into()))
/// #     }
/// # }
///
/// async fn handler(RealIp(ip): RealIp) -> String {
///     ip.to_string()
/// }
///
/// let cdn = Arc::new(CdnRangeCache::new(Arc::new(MemoryStore::new()), Arc::new(Offline)));
/// let resolver = RealIpResolver::new(Arc::new(Settings::default()), cdn);
///
/// let app: Router = Router::new()
///     .route("/", get(handler))
///     .layer(RealIpLayer::new(resolver));
/// ```
#[derive(Debug, Clone)]
pub struct RealIpLayer {
    resolver: Arc<RealIpResolver>,
}

impl RealIpLayer {
    pub fn new(resolver: RealIpResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }
}

impl<S> Layer<S> for RealIpLayer {
    type Service = RealIpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RealIpService {
            inner,
            resolver: Arc::clone(&self.resolver),
        }
    }
}

/// Service that resolves real IP addresses.
#[derive(Debug, Clone)]
pub struct RealIpService<S> {
    inner: S,
    resolver: Arc<RealIpResolver>,
}

impl<S> Service<Request> for RealIpService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let headers = headers_to_map(req.headers());

        // empty peer resolves to the loopback sentinel
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|connect_info| connect_info.0.ip().to_canonical().to_string())
            .unwrap_or_default();

        let resolver = Arc::clone(&self.resolver);

        // the ready service goes into the future, its clone stays behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            // may block on a bounded CDN range fetch
            let resolved =
                tokio::task::spawn_blocking(move || resolver.context(&peer, &headers).real_ip())
                    .await;

            match resolved {
                Ok(ip) => {
                    req.extensions_mut().insert(RealIp(ip));
                }
                Err(err) => tracing::error!(error = %err, "client IP resolution task failed"),
            }

            inner.call(req).await
        })
    }
}

/// Convert Axum headers to our internal header map format.
///
/// Repeated header lines are joined with `", "`.
fn headers_to_map(headers: &HeaderMap) -> crate::extractor::HeaderMap {
    let mut map = crate::extractor::HeaderMap::new();

    for (name, value) in headers.iter() {
        let Ok(value) = value.to_str() else {
            continue;
        };

        map.entry(name.as_str().to_lowercase())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    map
}

/// Axum extractor for the resolved client IP address.
///
/// Without [`RealIpLayer`] this falls back to the connection's peer address, then loopback.
impl<S> axum::extract::FromRequestParts<S> for RealIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        if let Some(real_ip) = parts.extensions.get::<RealIp>() {
            return Ok(real_ip.clone());
        }

        match parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            Some(connect_info) => Ok(RealIp(connect_info.0.ip().to_canonical())),
            None => Ok(RealIp(IpAddr::V4(Ipv4Addr::LOCALHOST))),
        }
    }
}
