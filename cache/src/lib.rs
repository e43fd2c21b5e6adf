//! Shared routing cache.
//!
//! The watcher reflects `OSSProxyRoute`, `OSSProxyUpstream`, and referenced
//! `Secret` objects into this cache through the proxy's ingestion API; every
//! request worker resolves `Host` headers against it. Writers serialize on the
//! outer lock; readers assemble a complete bundle (route + upstream + decoded
//! credentials) under a single read acquisition so lookups never observe a
//! torn state.
//!
//! Readiness is a monotonic latch: once the initial synchronization has
//! ingested at least one route the cache reports ready forever, even if every
//! route is later deleted. Transient control-plane blips therefore cannot
//! cascade into 503 storms; operators watch the route-count metric instead.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
mod route;
mod secret;
mod upstream;

pub use self::route::{CachePolicy, ConvertError, Route, DEFAULT_NAMESPACE};
pub use self::secret::SecretData;
pub use self::upstream::{Credentials, CredentialsSource, Upstream};
pub use ossfe_k8s_api::upstream::Provider;

use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub type SharedCache = Arc<RwLock<Cache>>;

/// Namespace/name identity of a cluster object.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ObjRef {
    pub namespace: String,
    pub name: String,
}

impl ObjRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A complete, consistent snapshot for one host.
#[derive(Clone, Debug)]
pub struct RouteBundle {
    pub route: Arc<Route>,
    pub upstream: Arc<Upstream>,
    pub credentials: Credentials,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no route for host {0}")]
    UnknownHost(String),

    #[error("route {route} references missing upstream {upstream}")]
    UpstreamNotFound { route: ObjRefDisplay, upstream: ObjRefDisplay },

    #[error("upstream {upstream} references missing secret {secret}")]
    SecretNotFound { upstream: ObjRefDisplay, secret: ObjRefDisplay },

    #[error("upstream {upstream}: secret {secret} has no key {key}")]
    MissingCredentialKey {
        upstream: ObjRefDisplay,
        secret: ObjRefDisplay,
        key: String,
    },

    #[error("upstream {upstream}: credential value for key {key} is not UTF-8")]
    InvalidCredentialValue { upstream: ObjRefDisplay, key: String },
}

/// `ObjRef` clone usable inside error values.
#[derive(Clone, Debug)]
pub struct ObjRefDisplay(pub String);

impl fmt::Display for ObjRefDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&ObjRef> for ObjRefDisplay {
    fn from(r: &ObjRef) -> Self {
        Self(r.to_string())
    }
}

/// Point-in-time counters surfaced on `/health` logs and `/metrics`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub ready: bool,
    pub synced_once: bool,
    pub route_count: usize,
    pub upstream_count: usize,
    pub secret_count: usize,
    pub last_sync_epoch: Option<u64>,
    pub resource_version: Option<String>,
}

#[derive(Debug, Default)]
pub struct Cache {
    routes_by_host: HashMap<String, Arc<Route>>,
    /// Inverse index so a delete drops every host the route ever claimed,
    /// even when the delete event arrives with a stripped spec.
    hosts_by_route: HashMap<ObjRef, Vec<String>>,
    upstreams: HashMap<ObjRef, Arc<Upstream>>,
    secrets: HashMap<ObjRef, Arc<SecretData>>,
    ready: bool,
    synced_once: bool,
    last_sync_epoch: Option<u64>,
    resource_version: Option<String>,
}

// === impl Cache ===

impl Cache {
    pub fn shared() -> SharedCache {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Indexes a route under all of its hosts, replacing any prior entry for
    /// the same object. Host collisions across routes are last-writer-wins;
    /// the admission webhook is the authoritative guard.
    pub fn update_route(&mut self, route: Route) {
        let id = route.id.clone();
        self.unindex_hosts(&id);

        let route = Arc::new(route);
        let mut hosts = Vec::with_capacity(route.hosts.len());
        for host in &route.hosts {
            if let Some(prev) = self.routes_by_host.insert(host.clone(), route.clone()) {
                if prev.id != route.id {
                    tracing::warn!(
                        host = %host,
                        prev = %prev.id,
                        route = %route.id,
                        "host reassigned; admission enforcement was bypassed"
                    );
                }
            }
            hosts.push(host.clone());
        }
        self.hosts_by_route.insert(id, hosts);

        self.touch(route.resource_version.clone());
        if !self.hosts_by_route.is_empty() {
            self.synced_once = true;
            self.ready = true;
        }
    }

    pub fn delete_route(&mut self, id: &ObjRef) {
        self.unindex_hosts(id);
        self.touch(None);
    }

    pub fn update_upstream(&mut self, upstream: Upstream) {
        let rv = upstream.resource_version.clone();
        self.upstreams.insert(upstream.id.clone(), Arc::new(upstream));
        self.touch(rv);
    }

    pub fn delete_upstream(&mut self, id: &ObjRef) {
        self.upstreams.remove(id);
        self.touch(None);
    }

    pub fn update_secret(&mut self, secret: SecretData) {
        let rv = secret.resource_version.clone();
        self.secrets.insert(secret.id.clone(), Arc::new(secret));
        self.touch(rv);
    }

    pub fn delete_secret(&mut self, id: &ObjRef) {
        self.secrets.remove(id);
        self.touch(None);
    }

    /// The hot-path lookup. Either every piece of the bundle is present and
    /// decoded, or a typed error says exactly which piece was missing.
    pub fn resolve(&self, host: &str) -> Result<RouteBundle, ResolveError> {
        let route = self
            .routes_by_host
            .get(host)
            .ok_or_else(|| ResolveError::UnknownHost(host.to_string()))?;

        let upstream =
            self.upstreams
                .get(&route.upstream)
                .ok_or_else(|| ResolveError::UpstreamNotFound {
                    route: (&route.id).into(),
                    upstream: (&route.upstream).into(),
                })?;

        let credentials = self.credentials_for(upstream)?;

        Ok(RouteBundle {
            route: route.clone(),
            upstream: upstream.clone(),
            credentials,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn status(&self) -> Status {
        Status {
            ready: self.ready,
            synced_once: self.synced_once,
            route_count: self.hosts_by_route.len(),
            upstream_count: self.upstreams.len(),
            secret_count: self.secrets.len(),
            last_sync_epoch: self.last_sync_epoch,
            resource_version: self.resource_version.clone(),
        }
    }

    fn credentials_for(&self, upstream: &Upstream) -> Result<Credentials, ResolveError> {
        match &upstream.credentials {
            CredentialsSource::Inline(creds) => Ok(creds.clone()),
            CredentialsSource::SecretRef {
                secret,
                access_key_id_key,
                secret_access_key_key,
            } => {
                let data =
                    self.secrets
                        .get(secret)
                        .ok_or_else(|| ResolveError::SecretNotFound {
                            upstream: (&upstream.id).into(),
                            secret: secret.into(),
                        })?;

                let access_key_id =
                    data.utf8_value(access_key_id_key)
                        .map_err(|err| err.into_resolve_error(&upstream.id, secret))?;
                let secret_access_key = data
                    .utf8_value(secret_access_key_key)
                    .map_err(|err| err.into_resolve_error(&upstream.id, secret))?;

                Ok(Credentials {
                    access_key_id,
                    secret_access_key,
                })
            }
        }
    }

    fn unindex_hosts(&mut self, id: &ObjRef) {
        if let Some(hosts) = self.hosts_by_route.remove(id) {
            for host in hosts {
                // Only drop the entry if this route still owns the host; a
                // later writer may have taken it over.
                if self.routes_by_host.get(&host).is_some_and(|r| &r.id == id) {
                    self.routes_by_host.remove(&host);
                }
            }
        }
    }

    fn touch(&mut self, resource_version: Option<String>) {
        self.last_sync_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs());
        if resource_version.is_some() {
            self.resource_version = resource_version;
        }
    }
}

#[cfg(test)]
mod tests;
