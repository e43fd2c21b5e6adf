use crate::cache_control;
use crate::upstream::{UpstreamClient, UpstreamResponse};
use bytes::Bytes;
use http::request::Parts;
use http::{header, HeaderName, HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::Service;
use ossfe_cache::{ResolveError, Route, RouteBundle, SharedCache};
use ossfe_metrics::{ResourceKind, TrafficMetrics};
use prometheus_client::registry::Registry;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub(crate) struct ProxyCtx {
    pub cache: SharedCache,
    pub metrics: Arc<TrafficMetrics>,
    pub registry: Arc<Registry>,
    pub client: UpstreamClient,
}

/// The client-facing service. One instance is shared by every connection.
#[derive(Clone)]
pub(crate) struct ProxyService(Arc<ProxyCtx>);

// === impl ProxyService ===

impl ProxyService {
    pub(crate) fn new(ctx: Arc<ProxyCtx>) -> Self {
        Self(ctx)
    }
}

impl Service<Request<Incoming>> for ProxyService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Infallible>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let ctx = self.0.clone();
        // Request bodies are never proxied; only the head matters.
        let (parts, _body) = req.into_parts();
        Box::pin(async move { Ok(handle(ctx, parts).await) })
    }
}

async fn handle(ctx: Arc<ProxyCtx>, parts: Parts) -> Response<Full<Bytes>> {
    match parts.uri.path() {
        "/health" => health(&ctx),
        "/metrics" => metrics_page(&ctx),
        _ => serve_object(ctx, parts).await,
    }
}

fn health(ctx: &ProxyCtx) -> Response<Full<Bytes>> {
    if ctx.cache.read().is_ready() {
        text(StatusCode::OK, "ok\n")
    } else {
        text(StatusCode::SERVICE_UNAVAILABLE, "initial sync incomplete\n")
    }
}

fn metrics_page(ctx: &ProxyCtx) -> Response<Full<Bytes>> {
    let mut buf = String::new();
    match prometheus_client::encoding::text::encode(&mut buf, ctx.registry.as_ref()) {
        Ok(()) => {
            let mut rsp = Response::new(Full::new(Bytes::from(buf)));
            rsp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(
                    "application/openmetrics-text; version=1.0.0; charset=utf-8",
                ),
            );
            rsp
        }
        Err(error) => {
            warn!(%error, "failed to encode metrics");
            text(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable\n")
        }
    }
}

async fn serve_object(ctx: Arc<ProxyCtx>, parts: Parts) -> Response<Full<Bytes>> {
    if !ctx.cache.read().is_ready() {
        return text(StatusCode::SERVICE_UNAVAILABLE, "proxy is not ready\n");
    }

    let Some(host) = client_host(&parts) else {
        return text(StatusCode::NOT_FOUND, "request has no Host header\n");
    };

    let resolved = ctx.cache.read().resolve(&host);
    let bundle = match resolved {
        Ok(bundle) => bundle,
        Err(error @ ResolveError::UnknownHost(_)) => {
            debug!(%host, "unroutable request");
            return text(StatusCode::NOT_FOUND, format!("{error}\n"));
        }
        Err(error) => {
            warn!(%host, %error, "route is not servable");
            return text(StatusCode::INTERNAL_SERVER_ERROR, format!("{error}\n"));
        }
    };

    let start = Instant::now();
    let response = fetch_and_shape(&ctx, &bundle, &parts).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let status = response.status();
    let error = status.is_client_error() || status.is_server_error();
    let route = &bundle.route.id;
    let upstream = &bundle.upstream.id;
    ctx.metrics.observe(
        ResourceKind::Route,
        &route.namespace,
        &route.name,
        elapsed_ms,
        error,
    );
    ctx.metrics.observe(
        ResourceKind::Upstream,
        &upstream.namespace,
        &upstream.name,
        elapsed_ms,
        error,
    );

    info!(
        target: "access",
        host = %host,
        method = %parts.method,
        path = %parts.uri.path(),
        status = status.as_u16(),
        route = %route,
        ms = elapsed_ms,
    );

    response
}

/// The `Host` header (port stripped), falling back to the request URI's host.
fn client_host(parts: &Parts) -> Option<String> {
    let raw = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host())?;
    raw.split(':').next().map(str::to_string)
}

async fn fetch_and_shape(
    ctx: &ProxyCtx,
    bundle: &RouteBundle,
    parts: &Parts,
) -> Response<Full<Bytes>> {
    let route = &bundle.route;
    let path = parts.uri.path();
    let object_path = if path == "/" {
        format!("/{}", route.index_file)
    } else {
        path.to_string()
    };
    let query = parts.uri.query();

    let primary = ctx
        .client
        .get_object(
            &bundle.upstream,
            &bundle.credentials,
            &route.bucket,
            &route.prefix,
            &object_path,
            query,
        )
        .await;

    match primary {
        Ok(rsp) if rsp.status.is_success() => pass_through(route, &object_path, rsp),
        Ok(rsp) if rsp.status == StatusCode::NOT_FOUND => not_found_fallback(ctx, bundle).await,
        Ok(rsp) => {
            debug!(route = %route.id, status = rsp.status.as_u16(), path = %object_path, "surfacing upstream status");
            text(rsp.status, format!("upstream returned {}\n", rsp.status))
        }
        Err(error) => {
            warn!(route = %route.id, %error, path = %object_path, "upstream request failed");
            text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "upstream request failed\n",
            )
        }
    }
}

/// 404 from the store: serve the SPA index, a custom error page, or plain 404.
async fn not_found_fallback(ctx: &ProxyCtx, bundle: &RouteBundle) -> Response<Full<Bytes>> {
    let route = &bundle.route;

    let fallback_key = if route.spa_app {
        Some((StatusCode::OK, route.index_file.clone()))
    } else {
        route
            .error_pages
            .get("404")
            .map(|page| (StatusCode::NOT_FOUND, page.clone()))
    };

    if let Some((status, key)) = fallback_key {
        let path = format!("/{key}");
        match ctx
            .client
            .get_object(
                &bundle.upstream,
                &bundle.credentials,
                &route.bucket,
                &route.prefix,
                &path,
                None,
            )
            .await
        {
            Ok(rsp) if rsp.status.is_success() => return html_response(status, rsp.body, route),
            Ok(rsp) => {
                debug!(route = %route.id, key = %key, status = rsp.status.as_u16(), "fallback object unavailable")
            }
            Err(error) => warn!(route = %route.id, key = %key, %error, "fallback request failed"),
        }
    }

    text(StatusCode::NOT_FOUND, "object not found\n")
}

fn pass_through(route: &Route, object_path: &str, rsp: UpstreamResponse) -> Response<Full<Bytes>> {
    let content_type = rsp
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let cache_header = cache_control::max_age(&route.cache, content_type, object_path)
        .map(cache_control::header_value);

    let mut response = Response::new(Full::new(rsp.body));
    *response.status_mut() = rsp.status;
    let headers = response.headers_mut();
    for (name, value) in rsp.headers.iter() {
        if skip_header(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Some(value) = cache_header {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_str(&value).expect("cache-control value is always valid"),
        );
    }
    response
}

fn html_response(status: StatusCode, body: Bytes, route: &Route) -> Response<Full<Bytes>> {
    let mut rsp = Response::new(Full::new(body));
    *rsp.status_mut() = status;
    let headers = rsp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    if route.cache.enabled {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_str(&cache_control::header_value(route.cache.html_max_age))
                .expect("cache-control value is always valid"),
        );
    }
    rsp
}

/// Hop-by-hop headers are dropped; content-length is re-framed from the
/// buffered body.
fn skip_header(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TRANSFER_ENCODING
        || name == header::CONTENT_LENGTH
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut rsp = Response::new(Full::new(body.into()));
    *rsp.status_mut() = status;
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    rsp
}

#[cfg(test)]
mod tests;
