use super::*;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use ossfe_cache::{Cache, CachePolicy, Credentials, CredentialsSource, ObjRef, Provider, Upstream};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

type StubRoutes = HashMap<&'static str, (u16, &'static str, &'static str)>;
type SeenRequests = Arc<Mutex<Vec<(String, bool)>>>;

/// A local object-store stand-in: serves the configured paths and records
/// each request URI along with whether it carried a SigV4 authorization.
async fn spawn_stub(routes: StubRoutes) -> (SocketAddr, SeenRequests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    let routes = Arc::new(routes);
    let seen: SeenRequests = Arc::new(Mutex::new(Vec::new()));

    let seen_srv = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            let seen = seen_srv.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let routes = routes.clone();
                    let seen = seen.clone();
                    async move {
                        let uri = req.uri().to_string();
                        let signed = req.headers().contains_key(header::AUTHORIZATION)
                            && req.headers().contains_key("x-amz-date")
                            && req.headers().contains_key("x-amz-content-sha256");
                        seen.lock().push((uri, signed));

                        let rsp = match routes.get(req.uri().path()) {
                            Some(&(status, content_type, body)) => {
                                let mut rsp =
                                    Response::new(Full::new(Bytes::from_static(body.as_bytes())));
                                *rsp.status_mut() =
                                    StatusCode::from_u16(status).expect("stub status");
                                rsp.headers_mut().insert(
                                    header::CONTENT_TYPE,
                                    HeaderValue::from_static(content_type),
                                );
                                rsp.headers_mut()
                                    .insert("x-stub", HeaderValue::from_static("1"));
                                rsp
                            }
                            None => {
                                let mut rsp = Response::new(Full::new(Bytes::new()));
                                *rsp.status_mut() = StatusCode::NOT_FOUND;
                                rsp
                            }
                        };
                        Ok::<_, Infallible>(rsp)
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, seen)
}

fn mk_route(spa_app: bool, error_pages: &[(&str, &str)]) -> Route {
    Route {
        id: ObjRef::new("web", "site"),
        resource_version: None,
        hosts: vec!["app.example.com".to_string()],
        upstream: ObjRef::new("web", "oss"),
        bucket: "assets".to_string(),
        prefix: String::new(),
        index_file: "index.html".to_string(),
        spa_app,
        error_pages: error_pages
            .iter()
            .map(|(code, key)| (code.to_string(), key.to_string()))
            .collect(),
        cache: CachePolicy::default(),
    }
}

fn mk_upstream(addr: SocketAddr) -> Upstream {
    Upstream {
        id: ObjRef::new("web", "oss"),
        resource_version: None,
        provider: Provider::Minio,
        region: "us-east-1".to_string(),
        endpoint: addr.to_string(),
        use_https: false,
        path_style: true,
        credentials: CredentialsSource::Inline(Credentials {
            access_key_id: "AKID".to_string(),
            secret_access_key: "SECRET".to_string(),
        }),
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(2),
        retry_attempts: 0,
    }
}

fn mk_ctx(addr: SocketAddr, route: Route) -> Arc<ProxyCtx> {
    let cache = Cache::shared();
    {
        let mut cache = cache.write();
        cache.update_route(route);
        cache.update_upstream(mk_upstream(addr));
    }
    Arc::new(ProxyCtx {
        cache,
        metrics: TrafficMetrics::shared(),
        registry: Arc::new(Registry::default()),
        client: UpstreamClient::new(),
    })
}

fn req(path_and_query: &str, host: &str) -> Parts {
    Request::builder()
        .uri(path_and_query)
        .header(header::HOST, host)
        .body(())
        .expect("request")
        .into_parts()
        .0
}

fn header_str<'a>(rsp: &'a Response<Full<Bytes>>, name: header::HeaderName) -> Option<&'a str> {
    rsp.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn body_bytes(rsp: Response<Full<Bytes>>) -> Bytes {
    use http_body_util::BodyExt;
    rsp.into_body().collect().await.expect("body").to_bytes()
}

#[tokio::test]
async fn root_serves_the_index_object() {
    let (addr, seen) = spawn_stub(HashMap::from([(
        "/assets/index.html",
        (200, "text/html; charset=utf-8", "<html>index</html>"),
    )]))
    .await;
    let ctx = mk_ctx(addr, mk_route(true, &[]));

    let rsp = handle(ctx.clone(), req("/", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::OK);
    assert_eq!(
        header_str(&rsp, header::CONTENT_TYPE),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(
        header_str(&rsp, header::CACHE_CONTROL),
        Some("public, max-age=300")
    );
    // Upstream headers pass through.
    assert!(rsp.headers().contains_key("x-stub"));

    // The stub saw exactly one signed GET for the index object.
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "/assets/index.html");
    assert!(seen[0].1, "request must carry SigV4 headers");

    // Both the route and upstream records were updated.
    assert_eq!(ctx.metrics.snapshot().len(), 2);
}

#[tokio::test]
async fn spa_fallback_serves_index_for_unknown_paths() {
    let (addr, seen) = spawn_stub(HashMap::from([(
        "/assets/index.html",
        (200, "application/octet-stream", "<html>spa</html>"),
    )]))
    .await;
    let ctx = mk_ctx(addr, mk_route(true, &[]));

    let rsp = handle(ctx, req("/unknown/path", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::OK);
    // The fallback is always declared HTML, whatever the store said.
    assert_eq!(
        header_str(&rsp, header::CONTENT_TYPE),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(
        header_str(&rsp, header::CACHE_CONTROL),
        Some("public, max-age=300")
    );
    assert_eq!(body_bytes(rsp).await, Bytes::from_static(b"<html>spa</html>"));

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "/assets/unknown/path");
    assert_eq!(seen[1].0, "/assets/index.html");
}

#[tokio::test]
async fn custom_error_page_keeps_the_404_status() {
    let (addr, _seen) = spawn_stub(HashMap::from([(
        "/assets/404.html",
        (200, "text/html", "custom not found"),
    )]))
    .await;
    let ctx = mk_ctx(addr, mk_route(false, &[("404", "404.html")]));

    let rsp = handle(ctx, req("/missing", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        header_str(&rsp, header::CONTENT_TYPE),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(body_bytes(rsp).await, Bytes::from_static(b"custom not found"));
}

#[tokio::test]
async fn plain_404_without_spa_or_error_page() {
    let (addr, _seen) = spawn_stub(HashMap::new()).await;
    let ctx = mk_ctx(addr, mk_route(false, &[]));

    let rsp = handle(ctx, req("/missing", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        header_str(&rsp, header::CONTENT_TYPE),
        Some("text/plain; charset=utf-8")
    );
}

#[tokio::test]
async fn unknown_host_is_a_404_naming_the_host() {
    let (addr, _seen) = spawn_stub(HashMap::new()).await;
    let ctx = mk_ctx(addr, mk_route(false, &[]));

    let rsp = handle(ctx, req("/", "unknown.example")).await;
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_bytes(rsp).await,
        Bytes::from("no route for host unknown.example\n")
    );
}

#[tokio::test]
async fn host_header_port_is_stripped() {
    let (addr, _seen) = spawn_stub(HashMap::from([(
        "/assets/index.html",
        (200, "text/html", "hi"),
    )]))
    .await;
    let ctx = mk_ctx(addr, mk_route(false, &[]));

    let rsp = handle(ctx, req("/", "app.example.com:8080")).await;
    assert_eq!(rsp.status(), StatusCode::OK);
}

#[tokio::test]
async fn not_ready_cache_gates_with_503() {
    let ctx = Arc::new(ProxyCtx {
        cache: Cache::shared(),
        metrics: TrafficMetrics::shared(),
        registry: Arc::new(Registry::default()),
        client: UpstreamClient::new(),
    });

    let rsp = handle(ctx.clone(), req("/", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let rsp = handle(ctx, req("/health", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn missing_upstream_is_a_500() {
    let cache = Cache::shared();
    cache.write().update_route(mk_route(false, &[]));
    let ctx = Arc::new(ProxyCtx {
        cache,
        metrics: TrafficMetrics::shared(),
        registry: Arc::new(Registry::default()),
        client: UpstreamClient::new(),
    });

    let rsp = handle(ctx, req("/", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn static_assets_get_the_long_max_age() {
    let (addr, _seen) = spawn_stub(HashMap::from([(
        "/assets/app.js",
        (200, "application/javascript", "js"),
    )]))
    .await;
    let ctx = mk_ctx(addr, mk_route(false, &[]));

    let rsp = handle(ctx, req("/app.js", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::OK);
    assert_eq!(
        header_str(&rsp, header::CACHE_CONTROL),
        Some("public, max-age=86400")
    );
}

#[tokio::test]
async fn other_upstream_statuses_are_surfaced() {
    let (addr, _seen) = spawn_stub(HashMap::from([(
        "/assets/boom",
        (503, "text/plain", "unavailable"),
    )]))
    .await;
    let ctx = mk_ctx(addr, mk_route(true, &[]));

    let rsp = handle(ctx, req("/boom", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_bytes(rsp).await,
        Bytes::from("upstream returned 503 Service Unavailable\n")
    );
}

#[tokio::test]
async fn transport_failures_are_a_500() {
    // Bind then drop a listener so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let ctx = mk_ctx(addr, mk_route(false, &[]));
    let rsp = handle(ctx, req("/", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn query_strings_reach_the_store() {
    let (addr, seen) = spawn_stub(HashMap::from([(
        "/assets/search",
        (200, "application/json", "{}"),
    )]))
    .await;
    let ctx = mk_ctx(addr, mk_route(false, &[]));

    let rsp = handle(ctx, req("/search?z=1&a=2", "app.example.com")).await;
    assert_eq!(rsp.status(), StatusCode::OK);

    let seen = seen.lock();
    assert_eq!(seen[0].0, "/assets/search?z=1&a=2");
}
