use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declares how a set of public hostnames maps onto a bucket served through an
/// [`OSSProxyUpstream`](crate::OSSProxyUpstream).
///
/// Hosts are globally unique across all routes; the admission webhook enforces
/// this at create/update time.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ossfe.imvictor.tech",
    version = "v1",
    kind = "OSSProxyRoute",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OSSProxyRouteSpec {
    /// DNS names served by this route.
    pub hosts: Vec<String>,

    /// The upstream object store this route reads from.
    pub upstream_ref: UpstreamRef,

    /// Bucket name on the upstream store.
    pub bucket: String,

    /// Key prefix prepended to every object lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Object served for `/`. Defaults to `index.html`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_file: Option<String>,

    /// Serve the index object for any 404 so client-side routing works.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spa_app: Option<bool>,

    /// Status code (`"404"`, ...) to object key suffix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_pages: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSpec>,
}

/// References an `OSSProxyUpstream`, defaulting to the route's namespace.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Cache-control policy knobs. All durations are seconds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    /// Disables `Cache-Control` emission entirely when false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// max-age for responses that are neither HTML nor static assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_max_age: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_max_age: Option<u32>,
}
