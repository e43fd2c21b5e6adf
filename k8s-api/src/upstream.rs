use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares an S3-compatible object store endpoint and how to authenticate
/// against it.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ossfe.imvictor.tech",
    version = "v1",
    kind = "OSSProxyUpstream",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OSSProxyUpstreamSpec {
    pub provider: Provider,

    /// SigV4 signing region, e.g. `us-east-1` or `oss-cn-hangzhou`.
    pub region: String,

    /// Store endpoint as `host[:port]`, without a scheme.
    pub endpoint: String,

    /// Defaults to true. Peer certificates are only verified over HTTPS.
    #[serde(default, rename = "useHTTPS", skip_serializing_if = "Option::is_none")]
    pub use_https: Option<bool>,

    /// Put the bucket in the URL path instead of the endpoint subdomain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_style: Option<bool>,

    pub credentials: CredentialsSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Aliyun,
    Tencent,
    Minio,
    Generic,
}

/// Either inline keys or a reference to a `Secret` carrying them.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeyRef>,
}

/// Reference to a `Secret` holding the access keys. The namespace defaults to
/// the upstream's own.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Data key holding the access key id. Defaults to `accessKeyId`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id_key: Option<String>,

    /// Data key holding the secret access key. Defaults to `secretAccessKey`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key_key: Option<String>,
}

/// Upstream timeouts, seconds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrySpec {
    /// Additional attempts after a transport failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_spec_deserializes_wire_names() {
        let spec: OSSProxyUpstreamSpec = serde_json::from_value(serde_json::json!({
            "provider": "aliyun",
            "region": "oss-cn-hangzhou",
            "endpoint": "oss-cn-hangzhou.aliyuncs.com",
            "useHTTPS": false,
            "pathStyle": true,
            "credentials": {
                "secretRef": {"name": "oss-keys", "accessKeyIdKey": "ak"}
            },
            "timeout": {"connect": 3}
        }))
        .expect("spec must parse");

        assert_eq!(spec.provider, Provider::Aliyun);
        assert_eq!(spec.use_https, Some(false));
        assert_eq!(spec.path_style, Some(true));
        let secret_ref = spec.credentials.secret_ref.expect("secretRef");
        assert_eq!(secret_ref.name, "oss-keys");
        assert_eq!(secret_ref.access_key_id_key.as_deref(), Some("ak"));
        assert!(secret_ref.secret_access_key_key.is_none());
        assert_eq!(spec.timeout.unwrap().connect, Some(3));
    }

    #[test]
    fn provider_names_are_lowercase() {
        for (json, provider) in [
            ("\"aws\"", Provider::Aws),
            ("\"minio\"", Provider::Minio),
            ("\"generic\"", Provider::Generic),
        ] {
            let parsed: Provider = serde_json::from_str(json).expect("provider");
            assert_eq!(parsed, provider);
        }
    }
}
