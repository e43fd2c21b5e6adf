use crate::push::{self, PushClient};
use ahash::AHashMap as HashMap;
use anyhow::{Context, Result};
use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use ossfe_k8s_api::{Api, ListParams, OSSProxyRoute, OSSProxyUpstream, ResourceExt, Secret};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Namespace/name pair, with the namespace already defaulted.
type Key = (String, String);

/// Reflects cluster state into the proxy. One instance drives the initial
/// list-and-push plus the three long-running watch loops.
pub(crate) struct Reflector {
    client: kube::Client,
    push: PushClient,
    /// Which secret each known upstream references; the secret watch only
    /// forwards events for secrets present here.
    secret_refs: Mutex<HashMap<Key, Key>>,
    fallback_namespace: String,
}

// === impl Reflector ===

impl Reflector {
    pub(crate) fn new(client: kube::Client, push: PushClient, fallback_namespace: String) -> Self {
        Self {
            client,
            push,
            secret_refs: Mutex::new(HashMap::new()),
            fallback_namespace,
        }
    }

    /// Full synchronization at startup: list everything, push everything.
    /// Any failure here is fatal; the pod restarts rather than serving a
    /// half-populated cache.
    pub(crate) async fn initial_sync(&self) -> Result<()> {
        let mut failures = 0usize;

        let routes: Api<OSSProxyRoute> = Api::all(self.client.clone());
        let routes = routes
            .list(&ListParams::default())
            .await
            .context("failed to list OSSProxyRoutes")?;
        let route_count = routes.items.len();
        for route in routes.items {
            if let Err(error) = self.push.push(push::ROUTES_UPDATE, &route).await {
                warn!(route = %object_key(&route, &self.fallback_namespace), %error, "failed to sync route");
                failures += 1;
            }
        }
        info!(count = route_count, "synced routes");

        let upstreams: Api<OSSProxyUpstream> = Api::all(self.client.clone());
        let upstreams = upstreams
            .list(&ListParams::default())
            .await
            .context("failed to list OSSProxyUpstreams")?;
        let upstream_count = upstreams.items.len();
        for upstream in upstreams.items {
            if let Err(error) = self.push.push(push::UPSTREAMS_UPDATE, &upstream).await {
                warn!(upstream = %object_key(&upstream, &self.fallback_namespace), %error, "failed to sync upstream");
                failures += 1;
            }
            if let Err(error) = self.sync_upstream_secret(&upstream).await {
                warn!(upstream = %object_key(&upstream, &self.fallback_namespace), %error, "failed to sync referenced secret");
                failures += 1;
            }
        }
        info!(count = upstream_count, "synced upstreams");

        anyhow::ensure!(failures == 0, "initial sync failed for {failures} objects");
        Ok(())
    }

    /// Streams route events into the proxy until shutdown.
    pub(crate) async fn watch_routes(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let api: Api<OSSProxyRoute> = Api::all(self.client.clone());
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        tokio::pin!(stream);

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                event = stream.next() => match event {
                    Some(Ok(watcher::Event::Apply(route) | watcher::Event::InitApply(route))) => {
                        let key = object_key(&route, &self.fallback_namespace);
                        if let Err(error) = self.push.push(push::ROUTES_UPDATE, &route).await {
                            warn!(route = %key, %error, "failed to push route update");
                        } else {
                            info!(route = %key, "route update pushed");
                        }
                    }
                    Some(Ok(watcher::Event::Delete(route))) => {
                        let key = object_key(&route, &self.fallback_namespace);
                        if let Err(error) = self.push.push(push::ROUTES_DELETE, &route).await {
                            warn!(route = %key, %error, "failed to push route delete");
                        } else {
                            info!(route = %key, "route delete pushed");
                        }
                    }
                    Some(Ok(watcher::Event::Init)) => debug!("route watch (re)synchronizing"),
                    Some(Ok(watcher::Event::InitDone)) => debug!("route watch synchronized"),
                    Some(Err(error)) => warn!(%error, "route watch disconnected; backing off"),
                    None => return,
                },
            }
        }
    }

    /// Streams upstream events, cascading a fresh read of the referenced
    /// secret on every add/modify.
    pub(crate) async fn watch_upstreams(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let api: Api<OSSProxyUpstream> = Api::all(self.client.clone());
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        tokio::pin!(stream);

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                event = stream.next() => match event {
                    Some(Ok(watcher::Event::Apply(upstream) | watcher::Event::InitApply(upstream))) => {
                        let key = object_key(&upstream, &self.fallback_namespace);
                        if let Err(error) = self.push.push(push::UPSTREAMS_UPDATE, &upstream).await {
                            warn!(upstream = %key, %error, "failed to push upstream update");
                        } else {
                            info!(upstream = %key, "upstream update pushed");
                        }
                        if let Err(error) = self.sync_upstream_secret(&upstream).await {
                            warn!(upstream = %key, %error, "failed to sync referenced secret");
                        }
                    }
                    Some(Ok(watcher::Event::Delete(upstream))) => {
                        let key = resource_key(&upstream, &self.fallback_namespace);
                        self.secret_refs.lock().remove(&key);
                        if let Err(error) = self.push.push(push::UPSTREAMS_DELETE, &upstream).await {
                            warn!(upstream = %format_key(&key), %error, "failed to push upstream delete");
                        } else {
                            info!(upstream = %format_key(&key), "upstream delete pushed");
                        }
                    }
                    Some(Ok(watcher::Event::Init)) => debug!("upstream watch (re)synchronizing"),
                    Some(Ok(watcher::Event::InitDone)) => debug!("upstream watch synchronized"),
                    Some(Err(error)) => warn!(%error, "upstream watch disconnected; backing off"),
                    None => return,
                },
            }
        }
    }

    /// Forwards secret events, but only for secrets some upstream references.
    /// This catches secret-only rotations that the upstream watch would miss.
    pub(crate) async fn watch_secrets(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let api: Api<Secret> = Api::all(self.client.clone());
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        tokio::pin!(stream);

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                event = stream.next() => match event {
                    Some(Ok(watcher::Event::Apply(secret) | watcher::Event::InitApply(secret))) => {
                        let key = resource_key(&secret, &self.fallback_namespace);
                        if !self.is_referenced(&key) {
                            continue;
                        }
                        if let Err(error) = self.push.push(push::SECRETS_UPDATE, &secret).await {
                            warn!(secret = %format_key(&key), %error, "failed to push secret update");
                        } else {
                            info!(secret = %format_key(&key), "secret rotation pushed");
                        }
                    }
                    Some(Ok(watcher::Event::Delete(secret))) => {
                        let key = resource_key(&secret, &self.fallback_namespace);
                        if !self.is_referenced(&key) {
                            continue;
                        }
                        if let Err(error) = self.push.push(push::SECRETS_DELETE, &secret).await {
                            warn!(secret = %format_key(&key), %error, "failed to push secret delete");
                        }
                    }
                    Some(Ok(watcher::Event::Init)) => debug!("secret watch (re)synchronizing"),
                    Some(Ok(watcher::Event::InitDone)) => debug!("secret watch synchronized"),
                    Some(Err(error)) => warn!(%error, "secret watch disconnected; backing off"),
                    None => return,
                },
            }
        }
    }

    /// Fetches and pushes the secret an upstream references, if any, and
    /// records the reference for the secret watch.
    async fn sync_upstream_secret(&self, upstream: &OSSProxyUpstream) -> Result<()> {
        let upstream_key = resource_key(upstream, &self.fallback_namespace);

        let Some((namespace, name)) = secret_ref_target(upstream, &self.fallback_namespace) else {
            self.secret_refs.lock().remove(&upstream_key);
            return Ok(());
        };

        debug!(secret = %format!("{namespace}/{name}"), upstream = %format_key(&upstream_key), "syncing referenced secret");
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let secret = api
            .get(&name)
            .await
            .with_context(|| format!("failed to get secret {namespace}/{name}"))?;
        self.push.push(push::SECRETS_UPDATE, &secret).await?;

        self.secret_refs
            .lock()
            .insert(upstream_key, (namespace, name));
        Ok(())
    }

    fn is_referenced(&self, key: &Key) -> bool {
        self.secret_refs.lock().values().any(|v| v == key)
    }
}

/// The secret an upstream's credentials point at, with the namespace
/// defaulted to the upstream's own (then the pod's).
fn secret_ref_target(upstream: &OSSProxyUpstream, fallback_namespace: &str) -> Option<Key> {
    let secret_ref = upstream.spec.credentials.secret_ref.as_ref()?;
    let namespace = secret_ref
        .namespace
        .clone()
        .or_else(|| upstream.namespace())
        .unwrap_or_else(|| fallback_namespace.to_string());
    Some((namespace, secret_ref.name.clone()))
}

fn resource_key(obj: &impl ResourceExt, fallback_namespace: &str) -> Key {
    (
        obj.namespace()
            .unwrap_or_else(|| fallback_namespace.to_string()),
        obj.name_any(),
    )
}

fn object_key(obj: &impl ResourceExt, fallback_namespace: &str) -> String {
    format_key(&resource_key(obj, fallback_namespace))
}

fn format_key((namespace, name): &Key) -> String {
    format!("{namespace}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_upstream(namespace: Option<&str>, credentials: serde_json::Value) -> OSSProxyUpstream {
        let mut metadata = serde_json::json!({"name": "oss"});
        if let Some(ns) = namespace {
            metadata["namespace"] = serde_json::Value::String(ns.to_string());
        }
        serde_json::from_value(serde_json::json!({
            "apiVersion": "ossfe.imvictor.tech/v1",
            "kind": "OSSProxyUpstream",
            "metadata": metadata,
            "spec": {
                "provider": "aws",
                "region": "us-east-1",
                "endpoint": "s3.amazonaws.com",
                "credentials": credentials
            }
        }))
        .expect("upstream object")
    }

    #[test]
    fn secret_ref_defaults_to_the_upstream_namespace() {
        let upstream = mk_upstream(
            Some("storage"),
            serde_json::json!({"secretRef": {"name": "keys"}}),
        );
        assert_eq!(
            secret_ref_target(&upstream, "default"),
            Some(("storage".to_string(), "keys".to_string()))
        );
    }

    #[test]
    fn secret_ref_namespace_override_wins() {
        let upstream = mk_upstream(
            Some("storage"),
            serde_json::json!({"secretRef": {"name": "keys", "namespace": "vault"}}),
        );
        assert_eq!(
            secret_ref_target(&upstream, "default"),
            Some(("vault".to_string(), "keys".to_string()))
        );
    }

    #[test]
    fn namespace_less_upstream_falls_back_to_the_pod_namespace() {
        let upstream = mk_upstream(None, serde_json::json!({"secretRef": {"name": "keys"}}));
        assert_eq!(
            secret_ref_target(&upstream, "ossfe-system"),
            Some(("ossfe-system".to_string(), "keys".to_string()))
        );
    }

    #[test]
    fn inline_credentials_reference_no_secret() {
        let upstream = mk_upstream(
            Some("storage"),
            serde_json::json!({"accessKeyId": "AKID", "secretAccessKey": "S"}),
        );
        assert_eq!(secret_ref_target(&upstream, "default"), None);
    }
}
