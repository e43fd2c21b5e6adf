//! AWS Signature Version 4 for S3-style GET requests.
//!
//! Every supported object store (AWS S3, Aliyun OSS, Tencent COS, MinIO,
//! generic) accepts the same scheme. Requests are always bodyless, so the
//! payload hash is the SHA-256 of the empty string rather than
//! `UNSIGNED-PAYLOAD`; sending any body would invalidate the signature.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hex SHA-256 of the empty string.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// The only headers that participate in the signature.
pub const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// One bodyless GET to be signed. `path` is the percent-encoded URI path as it
/// will be sent on the wire; `query` is the raw query string, if any.
#[derive(Clone, Copy, Debug)]
pub struct SignRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub region: &'a str,
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub time: DateTime<Utc>,
}

/// Headers to attach to the outbound request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedHeaders {
    pub host: String,
    pub x_amz_date: String,
    pub x_amz_content_sha256: &'static str,
    pub authorization: String,
}

pub fn sign(req: &SignRequest<'_>) -> SignedHeaders {
    let amz_date = req.time.format("%Y%m%dT%H%M%SZ").to_string();
    let date = req.time.format("%Y%m%d").to_string();

    let canonical = canonical_request(req, &amz_date);
    let scope = format!("{date}/{}/{SERVICE}/aws4_request", req.region);
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex_sha256(canonical.as_bytes())
    );

    let mut key = hmac(
        format!("AWS4{}", req.secret_access_key).as_bytes(),
        date.as_bytes(),
    );
    for part in [req.region, SERVICE, "aws4_request"] {
        key = hmac(&key, part.as_bytes());
    }
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        req.access_key_id
    );

    SignedHeaders {
        host: req.host.to_string(),
        x_amz_date: amz_date,
        x_amz_content_sha256: EMPTY_PAYLOAD_SHA256,
        authorization,
    }
}

fn canonical_request(req: &SignRequest<'_>, amz_date: &str) -> String {
    let canonical_headers = format!(
        "host:{}\nx-amz-content-sha256:{EMPTY_PAYLOAD_SHA256}\nx-amz-date:{amz_date}\n",
        req.host
    );
    format!(
        "{}\n{}\n{}\n{canonical_headers}\n{SIGNED_HEADERS}\n{EMPTY_PAYLOAD_SHA256}",
        req.method,
        req.path,
        canonical_query(req.query)
    )
}

/// Parses `k[=v]` pairs, sorts them, and rejoins `k=v` with `&`. Values are
/// emitted as received; the store sees the same percent-encoding the client
/// sent.
fn canonical_query(query: Option<&str>) -> String {
    let Some(query) = query else {
        return String::new();
    };
    let mut pairs: Vec<(&str, &str)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect();
    pairs.sort_unstable();
    let mut out = String::with_capacity(query.len());
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    fn request<'a>(path: &'a str, query: Option<&'a str>) -> SignRequest<'a> {
        SignRequest {
            method: "GET",
            host: "assets.s3.amazonaws.com",
            path,
            query,
            region: "us-east-1",
            access_key_id: "AKIDEXAMPLE",
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            time: fixed_time(),
        }
    }

    #[test]
    fn empty_payload_hash_is_sha256_of_nothing() {
        assert_eq!(hex_sha256(b""), EMPTY_PAYLOAD_SHA256);
    }

    #[test]
    fn canonical_query_sorts_by_key() {
        assert_eq!(canonical_query(Some("z=1&a=2")), "a=2&z=1");
        assert_eq!(canonical_query(Some("a=2&z=1")), "a=2&z=1");
        assert_eq!(canonical_query(Some("flag")), "flag=");
        assert_eq!(canonical_query(None), "");
        assert_eq!(canonical_query(Some("")), "");
    }

    #[test]
    fn canonical_request_is_exactly_the_documented_shape() {
        let req = request("/index.html", Some("z=1&a=2"));
        let got = canonical_request(&req, "20240102T030405Z");
        let want = "GET\n\
                    /index.html\n\
                    a=2&z=1\n\
                    host:assets.s3.amazonaws.com\n\
                    x-amz-content-sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\n\
                    x-amz-date:20240102T030405Z\n\
                    \n\
                    host;x-amz-content-sha256;x-amz-date\n\
                    e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(got, want);
    }

    #[test]
    fn signing_is_deterministic_for_a_fixed_timestamp() {
        let first = sign(&request("/index.html", Some("a=2&z=1")));
        let second = sign(&request("/index.html", Some("a=2&z=1")));
        assert_eq!(first, second);
    }

    #[test]
    fn signature_is_invariant_under_query_permutation() {
        let forward = sign(&request("/x", Some("z=1&a=2")));
        let reversed = sign(&request("/x", Some("a=2&z=1")));
        assert_eq!(forward.authorization, reversed.authorization);
    }

    #[test]
    fn authorization_carries_scope_and_signed_headers() {
        let signed = sign(&request("/index.html", None));
        assert_eq!(signed.x_amz_date, "20240102T030405Z");
        assert_eq!(signed.x_amz_content_sha256, EMPTY_PAYLOAD_SHA256);

        let prefix = "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240102/us-east-1/s3/aws4_request, \
                      SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=";
        let auth = &signed.authorization;
        assert!(auth.starts_with(prefix), "unexpected header: {auth}");
        let signature = &auth[prefix.len()..];
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_regions_produce_different_signatures() {
        let us = sign(&request("/index.html", None));
        let mut eu_req = request("/index.html", None);
        eu_req.region = "eu-west-1";
        let eu = sign(&eu_req);
        assert_ne!(us.authorization, eu.authorization);
    }
}
