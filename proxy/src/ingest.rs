use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::Service;
use ossfe_cache::{ObjRef, Route, SecretData, SharedCache, Upstream, DEFAULT_NAMESPACE};
use ossfe_k8s_api::{ObjectMeta, OSSProxyRoute, OSSProxyUpstream, Secret};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{info, warn};

const API_KEY_HEADER: &str = "x-api-key";

/// The loopback ingestion surface the watcher pushes cluster state through.
/// Six endpoints, all POST, gated on the shared random key.
#[derive(Clone)]
pub(crate) struct IngestService {
    cache: SharedCache,
    api_key: Arc<String>,
}

#[derive(Debug, thiserror::Error)]
enum IngestError {
    #[error("invalid JSON payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("object is not usable: {0}")]
    Convert(#[from] ossfe_cache::ConvertError),

    #[error("object has no name")]
    MissingName,
}

// === impl IngestService ===

impl IngestService {
    pub(crate) fn new(cache: SharedCache, api_key: Arc<String>) -> Self {
        Self { cache, api_key }
    }
}

impl Service<Request<Incoming>> for IngestService {
    type Response = Response<Full<Bytes>>;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            // The watcher polls `GET /` while waiting for the proxy to come up.
            if req.method() == Method::GET {
                return Ok(match req.uri().path() {
                    "/" | "/health" => text(StatusCode::OK, "ok\n"),
                    _ => text(StatusCode::NOT_FOUND, "not found\n"),
                });
            }
            if req.method() != Method::POST {
                return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "POST only\n"));
            }

            let presented = req
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok());
            if presented != Some(this.api_key.as_str()) {
                warn!(path = %req.uri().path(), "ingestion request with bad API key");
                return Ok(text(StatusCode::UNAUTHORIZED, "invalid API key\n"));
            }

            let path = req.uri().path().to_string();
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(error) => {
                    warn!(%error, "failed to read ingestion body");
                    return Ok(text(StatusCode::BAD_REQUEST, "unreadable body\n"));
                }
            };

            Ok(match apply(&this.cache, &path, &body) {
                Ok(()) => text(StatusCode::OK, "ok\n"),
                Err(NotFound) => text(StatusCode::NOT_FOUND, "unknown endpoint\n"),
                Err(Rejected(error)) => {
                    warn!(%path, %error, "rejected ingestion payload");
                    text(StatusCode::BAD_REQUEST, format!("{error}\n"))
                }
            })
        })
    }
}

use ApplyError::{NotFound, Rejected};

#[derive(Debug)]
enum ApplyError {
    NotFound,
    Rejected(IngestError),
}

impl From<IngestError> for ApplyError {
    fn from(e: IngestError) -> Self {
        Rejected(e)
    }
}

impl From<serde_json::Error> for ApplyError {
    fn from(e: serde_json::Error) -> Self {
        Rejected(e.into())
    }
}

impl From<ossfe_cache::ConvertError> for ApplyError {
    fn from(e: ossfe_cache::ConvertError) -> Self {
        Rejected(e.into())
    }
}

/// Dispatches one ingestion call against the cache.
fn apply(cache: &SharedCache, path: &str, body: &[u8]) -> Result<(), ApplyError> {
    match path {
        "/api/routes/update" => {
            let obj: OSSProxyRoute = serde_json::from_slice(body)?;
            let route = Route::try_from(obj)?;
            info!(route = %route.id, hosts = route.hosts.len(), "route updated");
            cache.write().update_route(route);
        }
        "/api/routes/delete" => {
            let id = object_id(body)?;
            info!(route = %id, "route deleted");
            cache.write().delete_route(&id);
        }
        "/api/upstreams/update" => {
            let obj: OSSProxyUpstream = serde_json::from_slice(body)?;
            let upstream = Upstream::try_from(obj)?;
            info!(upstream = %upstream.id, "upstream updated");
            cache.write().update_upstream(upstream);
        }
        "/api/upstreams/delete" => {
            let id = object_id(body)?;
            info!(upstream = %id, "upstream deleted");
            cache.write().delete_upstream(&id);
        }
        "/api/secrets/update" => {
            let obj: Secret = serde_json::from_slice(body)?;
            let secret = SecretData::try_from(obj)?;
            info!(secret = %secret.id, "secret updated");
            cache.write().update_secret(secret);
        }
        "/api/secrets/delete" => {
            let id = object_id(body)?;
            info!(secret = %id, "secret deleted");
            cache.write().delete_secret(&id);
        }
        _ => return Err(NotFound),
    }
    Ok(())
}

/// Delete payloads may arrive with a stripped spec; only the metadata matters.
fn object_id(body: &[u8]) -> Result<ObjRef, ApplyError> {
    #[derive(Deserialize)]
    struct MetaOnly {
        metadata: ObjectMeta,
    }

    let meta: MetaOnly = serde_json::from_slice(body)?;
    let name = meta.metadata.name.ok_or(Rejected(IngestError::MissingName))?;
    let namespace = meta
        .metadata
        .namespace
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    Ok(ObjRef::new(namespace, name))
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
