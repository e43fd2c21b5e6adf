#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod route;
pub mod upstream;

pub use self::route::{CacheSpec, OSSProxyRoute, OSSProxyRouteSpec, UpstreamRef};
pub use self::upstream::{
    CredentialsSpec, OSSProxyUpstream, OSSProxyUpstreamSpec, Provider, RetrySpec, SecretKeyRef,
    TimeoutSpec,
};

pub use k8s_openapi::{api::core::v1::Secret, ByteString};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Resource, ResourceExt},
    runtime::watcher,
    Client, Error,
};

/// The API group every ossfe resource lives under.
pub const GROUP: &str = "ossfe.imvictor.tech";
