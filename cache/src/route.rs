use crate::ObjRef;
use ahash::AHashMap as HashMap;
use ossfe_k8s_api::{OSSProxyRoute, ResourceExt};

pub const DEFAULT_INDEX_FILE: &str = "index.html";
pub const DEFAULT_MAX_AGE: u32 = 3600;
pub const DEFAULT_HTML_MAX_AGE: u32 = 300;
pub const DEFAULT_STATIC_MAX_AGE: u32 = 86400;

/// Namespace applied to objects the API hands us without one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A route with every optional field defaulted, ready for request serving.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub id: ObjRef,
    pub resource_version: Option<String>,
    pub hosts: Vec<String>,
    pub upstream: ObjRef,
    pub bucket: String,
    /// Key prefix, possibly empty. Stored verbatim.
    pub prefix: String,
    pub index_file: String,
    pub spa_app: bool,
    /// Status code string to object key suffix.
    pub error_pages: HashMap<String, String>,
    pub cache: CachePolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub max_age: u32,
    pub html_max_age: u32,
    pub static_max_age: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: DEFAULT_MAX_AGE,
            html_max_age: DEFAULT_HTML_MAX_AGE,
            static_max_age: DEFAULT_STATIC_MAX_AGE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("object has no name")]
    MissingName,
}

impl TryFrom<OSSProxyRoute> for Route {
    type Error = ConvertError;

    fn try_from(obj: OSSProxyRoute) -> Result<Self, Self::Error> {
        let name = obj.metadata.name.clone().ok_or(ConvertError::MissingName)?;
        let namespace = obj
            .namespace()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let resource_version = obj.resource_version();

        let spec = obj.spec;
        let upstream = ObjRef::new(
            spec.upstream_ref
                .namespace
                .unwrap_or_else(|| namespace.clone()),
            spec.upstream_ref.name,
        );

        let cache = spec
            .cache
            .map(|c| CachePolicy {
                enabled: c.enabled.unwrap_or(true),
                max_age: c.max_age.unwrap_or(DEFAULT_MAX_AGE),
                html_max_age: c.html_max_age.unwrap_or(DEFAULT_HTML_MAX_AGE),
                static_max_age: c.static_max_age.unwrap_or(DEFAULT_STATIC_MAX_AGE),
            })
            .unwrap_or_default();

        Ok(Route {
            id: ObjRef::new(namespace, name),
            resource_version,
            hosts: spec.hosts,
            upstream,
            bucket: spec.bucket,
            prefix: spec.prefix.unwrap_or_default(),
            index_file: spec
                .index_file
                .unwrap_or_else(|| DEFAULT_INDEX_FILE.to_string()),
            spa_app: spec.spa_app.unwrap_or(false),
            error_pages: spec.error_pages.into_iter().flatten().collect(),
            cache,
        })
    }
}
