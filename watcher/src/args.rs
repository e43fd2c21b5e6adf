use crate::reflector::Reflector;
use crate::webhook::Admission;
use crate::{push, tls, webhook};
use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(name = "ossfe-watcher", about = "S3 frontend proxy: cluster-state reflector")]
pub struct Args {
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Base URL of the proxy's loopback ingestion API.
    #[clap(long, env = "PROXY_API_BASE", default_value = "http://127.0.0.1:9180")]
    proxy_api_base: String,

    /// Shared ingestion key, written by the proxy at startup.
    #[clap(long, env = "API_KEY_FILE", default_value = "/tmp/api.key")]
    api_key_file: PathBuf,

    /// Fallback namespace for objects the API hands us without one.
    #[clap(long, env = "POD_NAMESPACE", default_value = "default")]
    pod_namespace: String,

    #[clap(long, env = "WEBHOOK_ENABLED", default_value_t = false, action = clap::ArgAction::Set)]
    webhook_enabled: bool,

    #[clap(long, env = "WEBHOOK_PORT", default_value = "8443")]
    webhook_port: u16,

    #[clap(
        long,
        env = "WEBHOOK_CERT_PATH",
        default_value = "/tmp/webhook-certs/tls.crt"
    )]
    webhook_cert_path: PathBuf,

    #[clap(
        long,
        env = "WEBHOOK_KEY_PATH",
        default_value = "/tmp/webhook-certs/tls.key"
    )]
    webhook_key_path: PathBuf,
}

// === impl Args ===

impl Args {
    pub async fn run(self) -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();

        // The workspace compiles more than one rustls crypto backend; pin the
        // process default before any TLS config is built.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let client = kube::Client::try_default()
            .await
            .context("failed to create in-cluster Kubernetes client")?;

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

        let mut tasks = Vec::new();

        if self.webhook_enabled {
            let config =
                tls::load_server_config(&self.webhook_cert_path, &self.webhook_key_path).await?;
            let addr = SocketAddr::from(([0, 0, 0, 0], self.webhook_port));
            let admission = Admission::new(client.clone());
            let webhook_shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(
                async move {
                    if let Err(error) =
                        webhook::serve(addr, TlsAcceptor::from(config), admission, webhook_shutdown)
                            .await
                    {
                        error!(%error, "webhook server failed");
                    }
                }
                .instrument(info_span!("webhook")),
            ));
        } else {
            info!("admission webhook disabled");
        }

        push::wait_for_proxy(&self.proxy_api_base).await?;
        let api_key = load_api_key(&self.api_key_file).await?;
        let push = push::PushClient::new(self.proxy_api_base.clone(), api_key);

        let reflector = Arc::new(Reflector::new(client, push, self.pod_namespace.clone()));

        info!("performing initial full sync");
        reflector.initial_sync().await?;
        info!("initial sync complete");

        tasks.push(tokio::spawn(
            reflector
                .clone()
                .watch_routes(shutdown_rx.clone())
                .instrument(info_span!("routes")),
        ));
        tasks.push(tokio::spawn(
            reflector
                .clone()
                .watch_upstreams(shutdown_rx.clone())
                .instrument(info_span!("upstreams")),
        ));
        tasks.push(tokio::spawn(
            reflector
                .watch_secrets(shutdown_rx)
                .instrument(info_span!("secrets")),
        ));

        for task in tasks {
            if let Err(error) = task.await {
                anyhow::bail!("background task panicked: {error}");
            }
        }
        Ok(())
    }
}

async fn load_api_key(path: &std::path::Path) -> Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read API key from {}", path.display()))?;
    let key = raw.trim().to_string();
    anyhow::ensure!(!key.is_empty(), "API key file {} is empty", path.display());
    let prefix = &key[..8.min(key.len())];
    info!(%prefix, "loaded ingestion API key");
    Ok(key)
}
