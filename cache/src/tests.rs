use crate::route::DEFAULT_INDEX_FILE;
use crate::upstream::DEFAULT_CONNECT_TIMEOUT;
use crate::*;
use ossfe_k8s_api::{OSSProxyRoute, OSSProxyUpstream, Secret};
use std::time::Duration;

fn mk_route(ns: &str, name: &str, hosts: &[&str], upstream: (&str, &str)) -> Route {
    Route {
        id: ObjRef::new(ns, name),
        resource_version: Some("1".to_string()),
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        upstream: ObjRef::new(upstream.0, upstream.1),
        bucket: "assets".to_string(),
        prefix: String::new(),
        index_file: DEFAULT_INDEX_FILE.to_string(),
        spa_app: false,
        error_pages: Default::default(),
        cache: CachePolicy::default(),
    }
}

fn mk_upstream(ns: &str, name: &str, credentials: CredentialsSource) -> Upstream {
    Upstream {
        id: ObjRef::new(ns, name),
        resource_version: Some("1".to_string()),
        provider: ossfe_k8s_api::Provider::Aws,
        region: "us-east-1".to_string(),
        endpoint: "s3.amazonaws.com".to_string(),
        use_https: true,
        path_style: false,
        credentials,
        connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        read_timeout: DEFAULT_CONNECT_TIMEOUT,
        retry_attempts: 0,
    }
}

fn inline_creds() -> CredentialsSource {
    CredentialsSource::Inline(Credentials {
        access_key_id: "AKID".to_string(),
        secret_access_key: "SECRET".to_string(),
    })
}

#[test]
fn readiness_latches_once_a_route_is_ingested() {
    let mut cache = Cache::default();
    assert!(!cache.is_ready());
    assert!(!cache.status().synced_once);

    cache.update_route(mk_route("ns", "site", &["app.example.com"], ("ns", "oss")));
    assert!(cache.is_ready());
    assert!(cache.status().synced_once);

    // Deleting every route must not drop readiness.
    cache.delete_route(&ObjRef::new("ns", "site"));
    assert_eq!(cache.status().route_count, 0);
    assert!(cache.is_ready());
}

#[test]
fn resolve_returns_a_complete_bundle() {
    let mut cache = Cache::default();
    cache.update_route(mk_route("ns", "site", &["app.example.com"], ("ns", "oss")));
    cache.update_upstream(mk_upstream("ns", "oss", inline_creds()));

    let bundle = cache.resolve("app.example.com").expect("bundle");
    assert_eq!(bundle.route.bucket, "assets");
    assert_eq!(bundle.upstream.endpoint, "s3.amazonaws.com");
    assert_eq!(bundle.credentials.access_key_id, "AKID");
}

#[test]
fn resolve_distinguishes_each_missing_piece() {
    let mut cache = Cache::default();
    assert!(matches!(
        cache.resolve("app.example.com"),
        Err(ResolveError::UnknownHost(_))
    ));

    cache.update_route(mk_route("ns", "site", &["app.example.com"], ("ns", "oss")));
    assert!(matches!(
        cache.resolve("app.example.com"),
        Err(ResolveError::UpstreamNotFound { .. })
    ));

    cache.update_upstream(mk_upstream(
        "ns",
        "oss",
        CredentialsSource::SecretRef {
            secret: ObjRef::new("ns", "oss-keys"),
            access_key_id_key: "accessKeyId".to_string(),
            secret_access_key_key: "secretAccessKey".to_string(),
        },
    ));
    assert!(matches!(
        cache.resolve("app.example.com"),
        Err(ResolveError::SecretNotFound { .. })
    ));

    cache.update_secret(SecretData::for_test(
        ObjRef::new("ns", "oss-keys"),
        vec![("accessKeyId", b"AKID" as &[u8])],
    ));
    assert!(matches!(
        cache.resolve("app.example.com"),
        Err(ResolveError::MissingCredentialKey { ref key, .. }) if key == "secretAccessKey"
    ));

    cache.update_secret(SecretData::for_test(
        ObjRef::new("ns", "oss-keys"),
        vec![
            ("accessKeyId", b"AKID" as &[u8]),
            ("secretAccessKey", b"SECRET" as &[u8]),
        ],
    ));
    let bundle = cache.resolve("app.example.com").expect("bundle");
    assert_eq!(bundle.credentials.secret_access_key, "SECRET");
}

#[test]
fn route_update_replaces_its_host_set() {
    let mut cache = Cache::default();
    cache.update_upstream(mk_upstream("ns", "oss", inline_creds()));
    cache.update_route(mk_route("ns", "site", &["a.example", "b.example"], ("ns", "oss")));
    cache.update_route(mk_route("ns", "site", &["b.example", "c.example"], ("ns", "oss")));

    assert!(matches!(
        cache.resolve("a.example"),
        Err(ResolveError::UnknownHost(_))
    ));
    assert!(cache.resolve("b.example").is_ok());
    assert!(cache.resolve("c.example").is_ok());
    assert_eq!(cache.status().route_count, 1);
}

#[test]
fn delete_clears_every_host_without_a_spec() {
    let mut cache = Cache::default();
    cache.update_upstream(mk_upstream("ns", "oss", inline_creds()));
    cache.update_route(mk_route("ns", "site", &["a.example", "b.example"], ("ns", "oss")));

    // Delete events may arrive stripped; the inverse index covers them.
    cache.delete_route(&ObjRef::new("ns", "site"));
    assert!(matches!(
        cache.resolve("a.example"),
        Err(ResolveError::UnknownHost(_))
    ));
    assert!(matches!(
        cache.resolve("b.example"),
        Err(ResolveError::UnknownHost(_))
    ));
}

#[test]
fn host_takeover_survives_deletion_of_the_loser() {
    let mut cache = Cache::default();
    cache.update_upstream(mk_upstream("ns", "oss", inline_creds()));
    cache.update_route(mk_route("ns", "site-a", &["h.example"], ("ns", "oss")));
    // Admission bypassed: a second route claims the same host (last writer wins).
    cache.update_route(mk_route("ns", "site-b", &["h.example"], ("ns", "oss")));

    let bundle = cache.resolve("h.example").expect("bundle");
    assert_eq!(bundle.route.id, ObjRef::new("ns", "site-b"));

    // Deleting the loser must not take the host down with it.
    cache.delete_route(&ObjRef::new("ns", "site-a"));
    let bundle = cache.resolve("h.example").expect("bundle");
    assert_eq!(bundle.route.id, ObjRef::new("ns", "site-b"));
}

#[test]
fn route_conversion_applies_defaults() {
    let obj: OSSProxyRoute = serde_json::from_value(serde_json::json!({
        "apiVersion": "ossfe.imvictor.tech/v1",
        "kind": "OSSProxyRoute",
        "metadata": {"name": "site", "namespace": "web", "resourceVersion": "42"},
        "spec": {
            "hosts": ["app.example.com"],
            "upstreamRef": {"name": "oss"},
            "bucket": "assets"
        }
    }))
    .expect("route object");

    let route = Route::try_from(obj).expect("convert");
    assert_eq!(route.id, ObjRef::new("web", "site"));
    assert_eq!(route.resource_version.as_deref(), Some("42"));
    // upstreamRef namespace defaults to the route's.
    assert_eq!(route.upstream, ObjRef::new("web", "oss"));
    assert_eq!(route.index_file, "index.html");
    assert!(!route.spa_app);
    assert!(route.cache.enabled);
    assert_eq!(route.cache.max_age, 3600);
    assert_eq!(route.cache.html_max_age, 300);
    assert_eq!(route.cache.static_max_age, 86400);
}

#[test]
fn upstream_conversion_applies_defaults() {
    let obj: OSSProxyUpstream = serde_json::from_value(serde_json::json!({
        "apiVersion": "ossfe.imvictor.tech/v1",
        "kind": "OSSProxyUpstream",
        "metadata": {"name": "oss", "namespace": "web"},
        "spec": {
            "provider": "minio",
            "region": "us-east-1",
            "endpoint": "minio.storage.svc:9000",
            "credentials": {"secretRef": {"name": "keys"}}
        }
    }))
    .expect("upstream object");

    let upstream = Upstream::try_from(obj).expect("convert");
    assert!(upstream.use_https);
    assert!(!upstream.path_style);
    assert_eq!(upstream.connect_timeout, Duration::from_secs(10));
    assert_eq!(upstream.read_timeout, Duration::from_secs(10));
    match upstream.credentials {
        CredentialsSource::SecretRef {
            secret,
            access_key_id_key,
            secret_access_key_key,
        } => {
            assert_eq!(secret, ObjRef::new("web", "keys"));
            assert_eq!(access_key_id_key, "accessKeyId");
            assert_eq!(secret_access_key_key, "secretAccessKey");
        }
        other => panic!("expected secretRef credentials, got {other:?}"),
    }
}

#[test]
fn secret_conversion_decodes_data() {
    let obj: Secret = serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": "keys", "namespace": "web"},
        "data": {"accessKeyId": "QUtJRA=="}
    }))
    .expect("secret object");

    let secret = SecretData::try_from(obj).expect("convert");
    assert_eq!(secret.id, ObjRef::new("web", "keys"));
    assert_eq!(secret.utf8_value("accessKeyId").ok().as_deref(), Some("AKID"));
}
