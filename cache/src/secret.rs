use crate::route::{ConvertError, DEFAULT_NAMESPACE};
use crate::{ObjRef, ResolveError};
use ahash::AHashMap as HashMap;
use ossfe_k8s_api::{ResourceExt, Secret};

/// Decoded secret payload. k8s serialization carries `data` base64-encoded;
/// deserialization already yields raw bytes here.
#[derive(Clone, Debug)]
pub struct SecretData {
    pub id: ObjRef,
    pub resource_version: Option<String>,
    data: HashMap<String, Vec<u8>>,
}

pub(crate) enum SecretValueError {
    MissingKey(String),
    NotUtf8(String),
}

impl SecretValueError {
    pub(crate) fn into_resolve_error(self, upstream: &ObjRef, secret: &ObjRef) -> ResolveError {
        match self {
            Self::MissingKey(key) => ResolveError::MissingCredentialKey {
                upstream: upstream.into(),
                secret: secret.into(),
                key,
            },
            Self::NotUtf8(key) => ResolveError::InvalidCredentialValue {
                upstream: upstream.into(),
                key,
            },
        }
    }
}

impl SecretData {
    pub(crate) fn utf8_value(&self, key: &str) -> Result<String, SecretValueError> {
        let bytes = self
            .data
            .get(key)
            .ok_or_else(|| SecretValueError::MissingKey(key.to_string()))?;
        String::from_utf8(bytes.clone()).map_err(|_| SecretValueError::NotUtf8(key.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn for_test(id: ObjRef, entries: Vec<(&str, &[u8])>) -> Self {
        Self {
            id,
            resource_version: None,
            data: entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
        }
    }
}

impl TryFrom<Secret> for SecretData {
    type Error = ConvertError;

    fn try_from(obj: Secret) -> Result<Self, Self::Error> {
        let name = obj.metadata.name.clone().ok_or(ConvertError::MissingName)?;
        let namespace = obj
            .namespace()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let resource_version = obj.resource_version();

        let mut data: HashMap<String, Vec<u8>> = obj
            .data
            .into_iter()
            .flatten()
            .map(|(k, v)| (k, v.0))
            .collect();
        // stringData is normally folded into data by the API server, but the
        // ingestion API accepts hand-built objects too.
        for (k, v) in obj.string_data.into_iter().flatten() {
            data.entry(k).or_insert_with(|| v.into_bytes());
        }

        Ok(SecretData {
            id: ObjRef::new(namespace, name),
            resource_version,
            data,
        })
    }
}
