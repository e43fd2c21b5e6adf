use crate::handler::{ProxyCtx, ProxyService};
use crate::ingest::IngestService;
use crate::upstream::UpstreamClient;
use crate::{apikey, server, telemetry};
use anyhow::{Context, Result};
use clap::Parser;
use ossfe_cache::Cache;
use ossfe_metrics::TrafficMetrics;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "ossfe-proxy", about = "S3 frontend proxy: request serving half")]
pub struct Args {
    /// Client-facing listener.
    #[clap(long, env = "PROXY_ADDR", default_value = "0.0.0.0:80")]
    addr: SocketAddr,

    /// Loopback ingestion API the watcher pushes cluster state to.
    #[clap(long, env = "INGEST_ADDR", default_value = "127.0.0.1:9180")]
    ingest_addr: SocketAddr,

    /// Where the generated ingestion key is written for the watcher.
    #[clap(long, env = "API_KEY_FILE", default_value = "/tmp/api.key")]
    api_key_file: PathBuf,

    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Access log destination; stdout-only when unset.
    #[clap(long, env = "ACCESS_LOG_FILE")]
    access_log_file: Option<PathBuf>,
}

// === impl Args ===

impl Args {
    pub async fn run(self) -> Result<()> {
        let _guard = telemetry::init(&self.log_level, self.access_log_file.as_deref())?;

        // The workspace compiles more than one rustls crypto backend; pin the
        // process default before any TLS config is built.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let api_key = apikey::generate();
        apikey::write_file(&self.api_key_file, &api_key)?;
        info!(path = %self.api_key_file.display(), "ingestion API key written");

        let cache = Cache::shared();
        let metrics = TrafficMetrics::shared();

        let mut registry = Registry::default();
        let sub = registry.sub_registry_with_prefix("ossfe");
        ossfe_cache::metrics::register(sub, cache.clone());
        ossfe_metrics::prom::register(sub, metrics.clone());

        let ctx = Arc::new(ProxyCtx {
            cache: cache.clone(),
            metrics,
            registry: Arc::new(registry),
            client: UpstreamClient::new(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        });

        let ingest_listener = TcpListener::bind(self.ingest_addr)
            .await
            .with_context(|| format!("failed to bind ingestion listener on {}", self.ingest_addr))?;
        info!(addr = %self.ingest_addr, "ingestion API listening");
        let ingest = tokio::spawn(
            server::serve(
                ingest_listener,
                IngestService::new(cache, Arc::new(api_key)),
                shutdown_rx.clone(),
            )
            .instrument(info_span!("ingest")),
        );

        let proxy_listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind proxy listener on {}", self.addr))?;
        info!(addr = %self.addr, "proxy listening");
        let proxy = tokio::spawn(
            server::serve(proxy_listener, ProxyService::new(ctx), shutdown_rx)
                .instrument(info_span!("serve")),
        );

        let (ingest, proxy) = tokio::try_join!(ingest, proxy).context("server task panicked")?;
        ingest?;
        proxy?;
        Ok(())
    }
}
