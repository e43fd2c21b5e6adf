use bytes::Bytes;
use chrono::Utc;
use http::{header, HeaderMap, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use ossfe_cache::{Credentials, Upstream};
use ossfe_signer::SignRequest;
use std::time::Duration;
use tracing::warn;

/// Connector-level connect timeout; per-request deadlines come from the
/// upstream spec.
const CONNECTOR_TIMEOUT: Duration = Duration::from_secs(10);

/// A buffered upstream response. Bodies are static frontend assets, so
/// buffering keeps the fallback logic simple.
#[derive(Debug)]
pub(crate) struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum UpstreamError {
    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream request failed: {0}")]
    Connect(#[from] hyper_util::client::legacy::Error),

    #[error("upstream body read failed: {0}")]
    Body(#[from] hyper::Error),

    #[error("invalid upstream uri: {0}")]
    Uri(#[from] http::uri::InvalidUri),

    #[error("invalid upstream request: {0}")]
    Request(#[from] http::Error),
}

/// Where one object lookup goes on the wire.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Target {
    pub host: String,
    pub uri_path: String,
}

/// `prefix` + request path without its leading slash.
pub(crate) fn object_key(prefix: &str, object_path: &str) -> String {
    format!(
        "{prefix}{}",
        object_path.strip_prefix('/').unwrap_or(object_path)
    )
}

/// Path-style puts the bucket in the URI; virtual-host style puts it in front
/// of the endpoint. Both address the same logical object.
pub(crate) fn target(upstream: &Upstream, bucket: &str, object_key: &str) -> Target {
    if upstream.path_style {
        Target {
            host: upstream.endpoint.clone(),
            uri_path: format!("/{bucket}/{object_key}"),
        }
    } else {
        Target {
            host: format!("{bucket}.{}", upstream.endpoint),
            uri_path: format!("/{object_key}"),
        }
    }
}

pub(crate) struct UpstreamClient {
    client: Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>,
}

// === impl UpstreamClient ===

impl UpstreamClient {
    pub(crate) fn new() -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(CONNECTOR_TIMEOUT));

        // Peer verification happens exactly when the scheme is https; plain
        // http upstreams (minio in-cluster, tests) skip TLS entirely.
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        Self {
            client: Client::builder(TokioExecutor::new()).build(https),
        }
    }

    /// Issues one signed, bodyless GET for `object_path` (leading slash, no
    /// prefix applied yet). Retries transport failures per the upstream's
    /// retry budget; status codes are never retried.
    pub(crate) async fn get_object(
        &self,
        upstream: &Upstream,
        credentials: &Credentials,
        bucket: &str,
        prefix: &str,
        object_path: &str,
        query: Option<&str>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let key = object_key(prefix, object_path);
        let target = target(upstream, bucket, &key);
        let scheme = if upstream.use_https { "https" } else { "http" };

        let uri: Uri = match query {
            Some(q) if !q.is_empty() => {
                format!("{scheme}://{}{}?{q}", target.host, target.uri_path)
            }
            _ => format!("{scheme}://{}{}", target.host, target.uri_path),
        }
        .parse()?;

        let signed = ossfe_signer::sign(&SignRequest {
            method: "GET",
            host: &target.host,
            path: &target.uri_path,
            query,
            region: &upstream.region,
            access_key_id: &credentials.access_key_id,
            secret_access_key: &credentials.secret_access_key,
            time: Utc::now(),
        });

        let deadline = upstream.connect_timeout + upstream.read_timeout;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let req = Request::builder()
                .method(Method::GET)
                .uri(uri.clone())
                .header(header::HOST, &signed.host)
                .header("x-amz-date", &signed.x_amz_date)
                .header("x-amz-content-sha256", signed.x_amz_content_sha256)
                .header(header::AUTHORIZATION, &signed.authorization)
                .body(Full::default())?;

            match tokio::time::timeout(deadline, self.fetch(req)).await {
                Ok(Ok(rsp)) => return Ok(rsp),
                Ok(Err(error)) if attempt <= upstream.retry_attempts => {
                    warn!(%error, attempt, uri = %uri, "upstream request failed; retrying");
                }
                Ok(Err(error)) => return Err(error),
                Err(_) if attempt <= upstream.retry_attempts => {
                    warn!(attempt, uri = %uri, "upstream request timed out; retrying");
                }
                Err(_) => return Err(UpstreamError::Timeout),
            }
        }
    }

    async fn fetch(&self, req: Request<Full<Bytes>>) -> Result<UpstreamResponse, UpstreamError> {
        let rsp = self.client.request(req).await?;
        let (parts, body) = rsp.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(UpstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
