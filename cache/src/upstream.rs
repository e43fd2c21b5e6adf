use crate::route::{ConvertError, DEFAULT_NAMESPACE};
use crate::ObjRef;
use ossfe_k8s_api::{upstream::Provider, OSSProxyUpstream, ResourceExt};
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_ACCESS_KEY_ID_KEY: &str = "accessKeyId";
pub const DEFAULT_SECRET_ACCESS_KEY_KEY: &str = "secretAccessKey";

/// An upstream with defaults applied, ready for URL construction and signing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upstream {
    pub id: ObjRef,
    pub resource_version: Option<String>,
    pub provider: Provider,
    pub region: String,
    /// `host[:port]`, no scheme.
    pub endpoint: String,
    pub use_https: bool,
    pub path_style: bool,
    pub credentials: CredentialsSource,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Additional attempts after a transport failure.
    pub retry_attempts: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialsSource {
    Inline(Credentials),
    SecretRef {
        secret: ObjRef,
        access_key_id_key: String,
        secret_access_key_key: String,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

// Keeps key material out of debug logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl Upstream {
    /// The secret this upstream reads credentials from, if any.
    pub fn secret_ref(&self) -> Option<&ObjRef> {
        match &self.credentials {
            CredentialsSource::SecretRef { secret, .. } => Some(secret),
            CredentialsSource::Inline(_) => None,
        }
    }
}

impl TryFrom<OSSProxyUpstream> for Upstream {
    type Error = ConvertError;

    fn try_from(obj: OSSProxyUpstream) -> Result<Self, Self::Error> {
        let name = obj.metadata.name.clone().ok_or(ConvertError::MissingName)?;
        let namespace = obj
            .namespace()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let resource_version = obj.resource_version();

        let spec = obj.spec;
        let credentials = match spec.credentials.secret_ref {
            Some(secret_ref) => CredentialsSource::SecretRef {
                secret: ObjRef::new(
                    secret_ref.namespace.unwrap_or_else(|| namespace.clone()),
                    secret_ref.name,
                ),
                access_key_id_key: secret_ref
                    .access_key_id_key
                    .unwrap_or_else(|| DEFAULT_ACCESS_KEY_ID_KEY.to_string()),
                secret_access_key_key: secret_ref
                    .secret_access_key_key
                    .unwrap_or_else(|| DEFAULT_SECRET_ACCESS_KEY_KEY.to_string()),
            },
            None => CredentialsSource::Inline(Credentials {
                access_key_id: spec.credentials.access_key_id.unwrap_or_default(),
                secret_access_key: spec.credentials.secret_access_key.unwrap_or_default(),
            }),
        };

        let connect_timeout = spec
            .timeout
            .as_ref()
            .and_then(|t| t.connect)
            .map(|secs| Duration::from_secs(secs.into()))
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let read_timeout = spec
            .timeout
            .as_ref()
            .and_then(|t| t.read)
            .map(|secs| Duration::from_secs(secs.into()))
            .unwrap_or(connect_timeout);

        Ok(Upstream {
            id: ObjRef::new(namespace, name),
            resource_version,
            provider: spec.provider,
            region: spec.region,
            endpoint: spec.endpoint,
            use_https: spec.use_https.unwrap_or(true),
            path_style: spec.path_style.unwrap_or(false),
            credentials,
            connect_timeout,
            read_timeout,
            retry_attempts: spec.retry.and_then(|r| r.attempts).unwrap_or(0),
        })
    }
}
