use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

pub(crate) const ROUTES_UPDATE: &str = "/api/routes/update";
pub(crate) const ROUTES_DELETE: &str = "/api/routes/delete";
pub(crate) const UPSTREAMS_UPDATE: &str = "/api/upstreams/update";
pub(crate) const UPSTREAMS_DELETE: &str = "/api/upstreams/delete";
pub(crate) const SECRETS_UPDATE: &str = "/api/secrets/update";
pub(crate) const SECRETS_DELETE: &str = "/api/secrets/delete";

const PUSH_TIMEOUT: Duration = Duration::from_secs(5);
const READY_TIMEOUT: Duration = Duration::from_secs(30);
const READY_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub(crate) enum PushError {
    #[error("push timed out")]
    Timeout,

    #[error("push transport failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("object serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("proxy answered {0}")]
    Status(StatusCode),

    #[error("invalid push request: {0}")]
    Request(#[from] http::Error),
}

/// Sends reflected objects to the proxy's loopback ingestion API. The next
/// event (or a watch resync) covers any push that fails; there is no retry
/// here.
pub(crate) struct PushClient {
    base: String,
    api_key: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

// === impl PushClient ===

impl PushClient {
    pub(crate) fn new(base: String, api_key: String) -> Self {
        Self {
            base,
            api_key,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    pub(crate) async fn push<T: Serialize>(
        &self,
        endpoint: &str,
        obj: &T,
    ) -> Result<(), PushError> {
        let body = serde_json::to_vec(obj)?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("{}{endpoint}", self.base))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.api_key)
            .body(Full::new(Bytes::from(body)))?;

        let rsp = timeout(PUSH_TIMEOUT, self.client.request(req))
            .await
            .map_err(|_| PushError::Timeout)??;
        let status = rsp.status();
        // Drain so the connection can be reused.
        let _ = rsp.into_body().collect().await;

        if status == StatusCode::OK {
            debug!(%endpoint, "pushed");
            Ok(())
        } else {
            Err(PushError::Status(status))
        }
    }
}

/// Polls the ingestion API until the proxy answers, mirroring the startup
/// handshake: the proxy writes the key file before it starts listening.
pub(crate) async fn wait_for_proxy(base: &str) -> anyhow::Result<()> {
    let client: Client<HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build_http();
    let deadline = Instant::now() + READY_TIMEOUT;

    loop {
        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("{base}/"))
            .body(Full::default())?;
        match timeout(Duration::from_secs(2), client.request(req)).await {
            Ok(Ok(rsp)) if rsp.status() == StatusCode::OK => return Ok(()),
            Ok(Ok(rsp)) => debug!(status = rsp.status().as_u16(), "proxy not ready"),
            Ok(Err(error)) => debug!(%error, "proxy not reachable"),
            Err(_) => debug!("proxy readiness probe timed out"),
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for the proxy ingestion API at {base}");
        }
        sleep(READY_POLL).await;
    }
}
