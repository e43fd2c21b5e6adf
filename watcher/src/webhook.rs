use ahash::{AHashMap, AHashSet};
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper_util::rt::TokioIo;
use kube::core::admission::{AdmissionResponse, Operation};
use kube::core::DynamicObject;
use kube::{Resource, ResourceExt};
use ossfe_k8s_api::{Api, ListParams, OSSProxyRoute, OSSProxyRouteSpec};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

/// Validates `OSSProxyRoute` writes: every host must be globally unique
/// across all routes, and unique within the object itself. Everything else is
/// allowed through unchanged.
#[derive(Clone)]
pub(crate) struct Admission {
    client: kube::Client,
}

/// A route already in the cluster, reduced to what conflict checking needs.
#[derive(Clone, Debug)]
pub(crate) struct ExistingRoute {
    pub namespace: String,
    pub name: String,
    pub hosts: Vec<String>,
}

// === impl Admission ===

impl Admission {
    pub(crate) fn new(client: kube::Client) -> Self {
        Self { client }
    }

    async fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        if !is_route(&req) {
            return AdmissionResponse::from(&req);
        }

        let rsp = AdmissionResponse::from(&req);
        let Some(obj) = req.object.as_ref() else {
            return rsp.deny("admission request has no object");
        };
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        let spec = match parse_spec(obj) {
            Ok(spec) => spec,
            Err(error) => {
                info!(%namespace, %name, %error, "unparseable OSSProxyRoute denied");
                return rsp.deny(format!("failed to parse OSSProxyRoute spec: {error}"));
            }
        };

        // On UPDATE the route's own current hosts are not conflicts.
        let exclude =
            matches!(req.operation, Operation::Update).then_some((namespace.as_str(), name.as_str()));

        let existing = match self.list_existing().await {
            Ok(existing) => existing,
            Err(error) => {
                // A failed conflict check denies the write; it never allows.
                warn!(%error, "host conflict check failed");
                return rsp.deny(format!("failed to list existing routes: {error:#}"));
            }
        };

        if let Err(error) = validate_hosts(&spec.hosts, &existing, exclude) {
            info!(%namespace, %name, %error, "denied");
            return rsp.deny(error.to_string());
        }

        rsp
    }

    async fn list_existing(&self) -> Result<Vec<ExistingRoute>> {
        let api: Api<OSSProxyRoute> = Api::all(self.client.clone());
        let routes = api
            .list(&ListParams::default())
            .await
            .context("failed to list OSSProxyRoutes")?;
        Ok(routes
            .items
            .into_iter()
            .map(|route| ExistingRoute {
                namespace: route.namespace().unwrap_or_default(),
                name: route.name_any(),
                hosts: route.spec.hosts,
            })
            .collect())
    }
}

fn is_route(req: &AdmissionRequest) -> bool {
    let dt = Default::default();
    req.kind
        .group
        .eq_ignore_ascii_case(&OSSProxyRoute::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&OSSProxyRoute::kind(&dt))
}

fn parse_spec(obj: &DynamicObject) -> Result<OSSProxyRouteSpec> {
    let spec = obj
        .data
        .get("spec")
        .cloned()
        .context("object has no spec")?;
    serde_json::from_value(spec).map_err(Into::into)
}

/// The host-uniqueness rules, kept pure so they are testable without a
/// cluster.
pub(crate) fn validate_hosts(
    hosts: &[String],
    existing: &[ExistingRoute],
    exclude: Option<(&str, &str)>,
) -> Result<()> {
    if hosts.is_empty() {
        bail!("route must specify at least one host");
    }

    let mut seen = AHashSet::new();
    for host in hosts {
        if !seen.insert(host.as_str()) {
            bail!("duplicate host '{host}' within the same route");
        }
    }

    let mut owners: AHashMap<&str, String> = AHashMap::new();
    for route in existing {
        if exclude == Some((route.namespace.as_str(), route.name.as_str())) {
            continue;
        }
        for host in &route.hosts {
            owners.insert(host, format!("{}/{}", route.namespace, route.name));
        }
    }

    let conflicts: Vec<String> = hosts
        .iter()
        .filter_map(|host| {
            owners
                .get(host.as_str())
                .map(|owner| format!("host '{host}' already used by route {owner}"))
        })
        .collect();
    if !conflicts.is_empty() {
        bail!("duplicate hosts detected: {}", conflicts.join("; "));
    }

    Ok(())
}

#[derive(Clone)]
struct WebhookService(Arc<Admission>);

impl Service<Request<Incoming>> for WebhookService {
    type Response = Response<Full<Bytes>>;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let admission = self.0.clone();
        Box::pin(async move {
            Ok(match (req.method(), req.uri().path()) {
                (&Method::POST, "/validate") => review(&admission, req).await,
                (&Method::GET, "/health") => text(StatusCode::OK, "OK"),
                _ => text(StatusCode::NOT_FOUND, "not found"),
            })
        })
    }
}

async fn review(admission: &Admission, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            warn!(%error, "failed to read admission request body");
            return text(StatusCode::BAD_REQUEST, "unreadable body");
        }
    };

    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(error) => {
            warn!(%error, "failed to parse admission review");
            return json_response(AdmissionResponse::invalid(error).into_review());
        }
    };

    let rsp = match review.try_into() {
        Ok(req) => {
            debug!(?req, "admission request");
            admission.admit(req).await
        }
        Err(error) => {
            warn!(%error, "invalid admission request");
            AdmissionResponse::invalid(error)
        }
    };
    json_response(rsp.into_review())
}

fn json_response(review: AdmissionReview) -> Response<Full<Bytes>> {
    match serde_json::to_vec(&review) {
        Ok(body) => {
            let mut rsp = Response::new(Full::new(Bytes::from(body)));
            rsp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            rsp
        }
        Err(error) => {
            warn!(%error, "failed to encode admission review");
            text(StatusCode::INTERNAL_SERVER_ERROR, "encoding failure")
        }
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut rsp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *rsp.status_mut() = status;
    rsp
}

/// Serves the webhook over TLS until shutdown.
pub(crate) async fn serve(
    addr: SocketAddr,
    tls: TlsAcceptor,
    admission: Admission,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind webhook listener on {addr}"))?;
    info!(%addr, "admission webhook listening");

    let service = WebhookService(Arc::new(admission));
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _peer)) => stream,
                    Err(error) => {
                        warn!(%error, "failed to accept webhook connection");
                        continue;
                    }
                };
                let tls = tls.clone();
                let service = service.clone();
                tokio::spawn(async move {
                    match tls.accept(stream).await {
                        Ok(tls_stream) => {
                            let conn = hyper::server::conn::http1::Builder::new()
                                .serve_connection(TokioIo::new(tls_stream), service);
                            if let Err(error) = conn.await {
                                debug!(%error, "webhook connection terminated");
                            }
                        }
                        Err(error) => debug!(%error, "TLS handshake failed"),
                    }
                });
            }
        }
    }
}
