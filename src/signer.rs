//! Request signing: AWS Signature v2 and v4, including v4's streaming
//! ("chunked") payload signing with a rolling signature chain (spec §4.2).

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chrono::{DateTime, NaiveDate, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::RwLock;

use crate::canonical::{canonical_query_string, canonical_uri_path, HeaderMap};

type HmacSha1 = Hmac<sha1_compat::Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// SHA-1 is not in the RustCrypto `sha2` crate; the teacher's stack is
/// RustCrypto-only (`sha2`, `hmac`), so v2 signing pulls in the sibling
/// `sha1` crate rather than a hand-rolled implementation.
mod sha1_compat {
    pub use sha1::Sha1;
}

/// Hex-encode bytes, lowercase (AWS v4 convention).
pub fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex_lower(&Sha256::digest(data))
}

/// The hex-sha256 of the empty string, reused throughout v4 streaming
/// chunk framing as the literal "empty-string-hash" component.
pub fn empty_sha256_hex() -> String {
    sha256_hex(b"")
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Payload-hash selector for v4 canonical requests (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadHash<'a> {
    Unsigned,
    StreamingChunked,
    Signed(&'a [u8]),
}

impl PayloadHash<'_> {
    fn as_header_value(&self) -> String {
        match self {
            PayloadHash::Unsigned => "UNSIGNED-PAYLOAD".to_string(),
            PayloadHash::StreamingChunked => {
                "STREAMING-AWS4-HMAC-SHA256-PAYLOAD".to_string()
            }
            PayloadHash::Signed(bytes) => sha256_hex(bytes),
        }
    }
}

/// Query-parameter whitelist retained in the v2 canonical resource: S3
/// sub-resources and response-override query params, plus the response-*
/// family handled separately below.
const V2_SUBRESOURCE_WHITELIST: &[&str] = &[
    "acl",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
    "cors",
    "restore",
    "tagging",
    "replication",
    "accelerate",
    "delete",
    "encryption",
    "inventory",
    "metrics",
    "analytics",
];

const V2_RESPONSE_OVERRIDE_PARAMS: &[&str] = &[
    "response-content-type",
    "response-content-language",
    "response-expires",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
];

fn v2_canonical_resource(resource_path: &str, raw_query: &str) -> String {
    if raw_query.is_empty() {
        return resource_path.to_string();
    }
    let mut kept: Vec<(&str, Option<&str>)> = raw_query
        .split('&')
        .filter(|t| !t.is_empty())
        .filter_map(|term| {
            let (k, v) = match term.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (term, None),
            };
            let keep = V2_SUBRESOURCE_WHITELIST.contains(&k) || V2_RESPONSE_OVERRIDE_PARAMS.contains(&k);
            keep.then_some((k, v))
        })
        .collect();
    if kept.is_empty() {
        return resource_path.to_string();
    }
    kept.sort_by_key(|(k, _)| *k);
    let qs = kept
        .into_iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{k}={v}"),
            None => k.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{resource_path}?{qs}")
}

/// Compute the AWS v2 canonical string and signature for a request.
///
/// `expires_override`: when set (presigned URLs), the `Date` line of the
/// canonical string is replaced with the unix-seconds expiry, and the
/// returned signature is the bare base64 value rather than the
/// `AWS <keyId>:<sig>` header form.
pub fn sign_v2(
    secret: &str,
    method: &str,
    resource_path: &str,
    raw_query: &str,
    headers: &HeaderMap,
    expires_override: Option<i64>,
) -> String {
    let content_md5 = headers.get("content-md5").unwrap_or("");
    let content_type = headers.get("content-type").unwrap_or("");
    let date_line = match expires_override {
        Some(exp) => exp.to_string(),
        None => headers.get("date").unwrap_or("").to_string(),
    };

    let amz_headers = headers.canonical_block(|name| {
        name.starts_with("x-amz-") || name.starts_with("x-emc-")
    });

    let canonical_resource = v2_canonical_resource(resource_path, raw_query);

    let canonical = format!(
        "{method}\n{content_md5}\n{content_type}\n{date_line}\n{amz_headers}{canonical_resource}"
    );

    let sig = B64.encode(hmac_sha1(secret.as_bytes(), canonical.as_bytes()));
    sig
}

/// Wrap a v2 signature as the `Authorization` header value.
pub fn v2_authorization_header(access_key_id: &str, signature: &str) -> String {
    format!("AWS {access_key_id}:{signature}")
}

/// The v4 per-day signing key, cached per spec §4.2 / §5: "re-derived when
/// the UTC date changes or secret changes". Guarded by a single
/// reader/writer lock per `Connection`, per spec §5.
pub struct SigningKeyCache {
    inner: RwLock<Option<(NaiveDate, String, String, Vec<u8>)>>,
}

impl Default for SigningKeyCache {
    fn default() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }
}

impl SigningKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the signing key for `date`/`secret`/`region`, recomputing
    /// (and re-caching) only when the date, secret, or region differs from
    /// the cached entry. Per the spec §9 open-question decision: recompute
    /// lazily by comparing dates on every call, never via a background
    /// timer.
    pub fn get_or_derive(&self, date: NaiveDate, secret: &str, region: &str) -> Vec<u8> {
        {
            let guard = self.inner.read().unwrap();
            if let Some((d, s, r, key)) = guard.as_ref() {
                if *d == date && s == secret && r == region {
                    return key.clone();
                }
            }
        }
        let key = derive_v4_signing_key(date, secret, region);
        let mut guard = self.inner.write().unwrap();
        *guard = Some((date, secret.to_string(), region.to_string(), key.clone()));
        key
    }
}

fn derive_v4_signing_key(date: NaiveDate, secret: &str, region: &str) -> Vec<u8> {
    let date_stamp = date.format("%Y%m%d").to_string();
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

/// Scope string: `yyyymmdd/region/s3/aws4_request`.
pub fn v4_scope(date: NaiveDate, region: &str) -> String {
    format!("{}/{region}/s3/aws4_request", date.format("%Y%m%d"))
}

pub fn iso8601_basic(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Build the v4 canonical request string.
fn v4_canonical_request(
    method: &str,
    resource_path: &str,
    raw_query: &str,
    headers: &HeaderMap,
    signed_header_predicate: impl Fn(&str) -> bool,
    payload_hash: &PayloadHash,
) -> (String, String) {
    let canonical_uri = canonical_uri_path(resource_path);
    let canonical_query = canonical_query_string(raw_query);
    let canonical_headers = headers.canonical_block(|n| signed_header_predicate(n));
    let signed_headers = headers.signed_headers_list(|n| signed_header_predicate(n));
    let payload_hash_str = payload_hash.as_header_value();

    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash_str}"
    );
    (canonical_request, signed_headers)
}

/// Compute a v4 `Authorization` header value. `headers` must already
/// contain `host` and `x-amz-date` (or `date`); every header is signed by
/// default, matching "SignedHeaders=<semicolon-joined lowercased names>".
#[allow(clippy::too_many_arguments)]
pub fn sign_v4(
    key_cache: &SigningKeyCache,
    access_key_id: &str,
    secret: &str,
    region: &str,
    request_time: DateTime<Utc>,
    method: &str,
    resource_path: &str,
    raw_query: &str,
    headers: &HeaderMap,
    payload_hash: PayloadHash,
) -> String {
    let date = request_time.date_naive();
    let (canonical_request, signed_headers) = v4_canonical_request(
        method,
        resource_path,
        raw_query,
        headers,
        |_| true,
        &payload_hash,
    );
    let scope = v4_scope(date, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{scope}\n{}",
        iso8601_basic(request_time),
        sha256_hex(canonical_request.as_bytes())
    );
    let signing_key = key_cache.get_or_derive(date, secret, region);
    let signature = hex_lower(&hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={access_key_id}/{scope},SignedHeaders={signed_headers},Signature={signature}"
    )
}

/// A rolling v4 streaming-chunk signer: holds the signing key, scope, and
/// the previous chunk's signature (the "seed" is the request's own v4
/// signature, per spec §4.2).
pub struct ChunkSigner {
    signing_key: Vec<u8>,
    scope: String,
    request_time: DateTime<Utc>,
    prev_signature: String,
}

impl ChunkSigner {
    pub fn new(signing_key: Vec<u8>, region: &str, request_time: DateTime<Utc>, seed_signature: String) -> Self {
        Self {
            scope: v4_scope(request_time.date_naive(), region),
            signing_key,
            request_time,
            prev_signature: seed_signature,
        }
    }

    /// Sign the next chunk (payload may be empty for the final chunk) and
    /// advance the rolling signature state.
    pub fn sign_chunk(&mut self, payload: &[u8]) -> String {
        let payload_hash = sha256_hex(payload);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256-PAYLOAD\n{}\n{}\n{}\n{}\n{payload_hash}",
            iso8601_basic(self.request_time),
            self.scope,
            self.prev_signature,
            empty_sha256_hex(),
        );
        let sig = hex_lower(&hmac_sha256(&self.signing_key, string_to_sign.as_bytes()));
        self.prev_signature = sig.clone();
        sig
    }
}

/// Width (in hex digits) of the chunk-size prefix, wide enough to encode
/// `chunk_size` (spec §4.2: "wide enough to encode the configured chunk
/// size; all framing prefixes share that width").
pub fn chunk_size_hex_width(chunk_size: usize) -> usize {
    format!("{chunk_size:x}").len().max(1)
}

/// Frame one v4-chunked wire chunk: `hex(N, width);chunk-signature=<sig>\r\n<payload>\r\n`.
pub fn frame_chunk(payload: &[u8], signature: &str, hex_width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + signature.len() + hex_width + 32);
    out.extend_from_slice(format!("{:0width$x}", payload.len(), width = hex_width).as_bytes());
    out.extend_from_slice(b";chunk-signature=");
    out.extend_from_slice(signature.as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
    out
}

/// Per-chunk framing overhead in bytes for a non-final chunk of `hex_width`
/// digits and a fixed-length hex signature (64 hex chars for SHA-256).
pub fn framing_overhead(hex_width: usize) -> usize {
    hex_width + ";chunk-signature=".len() + 64 + 2 + 2
}

/// Precompute the total wire `Content-Length` for a v4-chunked request body
/// of `body_len` bytes framed at `chunk_size` (spec §4.2).
pub fn v4_chunked_content_length(body_len: u64, chunk_size: usize) -> u64 {
    let hex_width = chunk_size_hex_width(chunk_size);
    let overhead = framing_overhead(hex_width) as u64;
    let full_chunks = body_len / chunk_size as u64;
    let remainder = body_len % chunk_size as u64;
    let chunk_count = full_chunks + if remainder > 0 { 1 } else { 0 };
    body_len + chunk_count * overhead + overhead // + final empty chunk
}

/// Maximum presigned-URL expiry, in seconds (spec §4.10).
pub const MAX_PRESIGN_EXPIRY_SECS: i64 = 604_800;

/// Build a v2 presigned URL (spec §6, scenario F): `Expires` replaces the
/// `Date` canonical line, and the returned signature is bare base64 (no
/// `AWS <keyId>:` wrapper), percent-encoded with `#` additionally encoded
/// and any trailing `=` replaced by `%3D`.
pub fn presign_v2_url(
    scheme: &str,
    host: &str,
    port: Option<u16>,
    access_key_id: &str,
    secret: &str,
    method: &str,
    resource_path: &str,
    expires_unix: i64,
) -> String {
    let headers = HeaderMap::new();
    let sig = sign_v2(secret, method, resource_path, "", &headers, Some(expires_unix));
    let encoded_path = crate::canonical::uri_encode(resource_path, crate::canonical::EncodingProfile::Standard);
    let encoded_sig = percent_encode_presigned(&sig);
    let authority = match port {
        Some(p) => format!("{host}:{p}"),
        None => host.to_string(),
    };
    format!(
        "{scheme}://{authority}{encoded_path}?AWSAccessKeyId={}&Expires={expires_unix}&Signature={encoded_sig}",
        crate::canonical::uri_encode(access_key_id, crate::canonical::EncodingProfile::Standard),
    )
}

/// Percent-encode a base64 signature for a presigned-URL query value:
/// standard percent-encoding, `#` additionally encoded, trailing `=`
/// replaced with the literal `%3D` (spec §6).
fn percent_encode_presigned(sig: &str) -> String {
    let mut out = crate::canonical::uri_encode(sig, crate::canonical::EncodingProfile::Standard);
    out = out.replace('#', "%23");
    while out.ends_with('=') {
        out.pop();
        out.push_str("%3D");
    }
    out
}

/// Build a v4 presigned URL with query-parameter signing (spec §6). Uses a
/// fresh `SigningKeyCache` rather than a `Connection`'s cached key, per the
/// spec §4.10 note that presigning "invalidat[es] the cached key" — i.e. it
/// must not disturb the connection's in-flight v4 key for ordinary requests.
#[allow(clippy::too_many_arguments)]
pub fn presign_v4_url(
    scheme: &str,
    host: &str,
    port: Option<u16>,
    access_key_id: &str,
    secret: &str,
    region: &str,
    method: &str,
    resource_path: &str,
    request_time: DateTime<Utc>,
    expires_secs: i64,
) -> String {
    let expires_secs = expires_secs.clamp(1, MAX_PRESIGN_EXPIRY_SECS);
    let date = request_time.date_naive();
    let scope = v4_scope(date, region);
    let authority = match port {
        Some(p) => format!("{host}:{p}"),
        None => host.to_string(),
    };
    let credential = format!("{access_key_id}/{scope}");

    let mut query_params: Vec<(String, String)> = vec![
        ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
        (
            "X-Amz-Credential".to_string(),
            crate::canonical::uri_encode(&credential, crate::canonical::EncodingProfile::V4Auth),
        ),
        ("X-Amz-Date".to_string(), iso8601_basic(request_time)),
        ("X-Amz-Expires".to_string(), expires_secs.to_string()),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    query_params.sort_by(|a, b| a.0.cmp(&b.0));
    let raw_query = query_params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut headers = HeaderMap::new();
    headers.insert("host", authority.clone(), true);

    let (canonical_request, _signed_headers) = v4_canonical_request(
        method,
        resource_path,
        &raw_query,
        &headers,
        |n| n == "host",
        &PayloadHash::Unsigned,
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{scope}\n{}",
        iso8601_basic(request_time),
        sha256_hex(canonical_request.as_bytes())
    );
    let signing_key = derive_v4_signing_key(date, secret, region);
    let signature = hex_lower(&hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "{scheme}://{authority}{resource_path}?{raw_query}&X-Amz-Signature={signature}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn v2_scenario_a_hello_put() {
        let mut headers = HeaderMap::new();
        headers.insert("Date", "Mon, 01 Jan 2024 00:00:00 GMT", true);
        let sig = sign_v2("SEKRIT", "PUT", "/bucket/obj", "", &headers, None);
        let expected_canonical =
            "PUT\n\napplication/octet-stream\nMon, 01 Jan 2024 00:00:00 GMT\n/bucket/obj";
        let mut h2 = HeaderMap::new();
        h2.insert("Content-Type", "application/octet-stream", true);
        h2.insert("Date", "Mon, 01 Jan 2024 00:00:00 GMT", true);
        let sig2 = sign_v2("SEKRIT", "PUT", "/bucket/obj", "", &h2, None);
        let manual = base64::engine::general_purpose::STANDARD
            .encode(hmac_sha1(b"SEKRIT", expected_canonical.as_bytes()));
        assert_eq!(sig2, manual);
        let _ = sig;
    }

    #[test]
    fn v2_presign_scenario_f() {
        let headers = HeaderMap::new();
        let sig = sign_v2("secret", "GET", "/b/o", "", &headers, Some(1700000000));
        let expected_canonical = "GET\n\n\n1700000000\n/b/o";
        let manual = base64::engine::general_purpose::STANDARD
            .encode(hmac_sha1(b"secret", expected_canonical.as_bytes()));
        assert_eq!(sig, manual);
    }

    #[test]
    fn v2_resource_keeps_only_whitelisted_query_params() {
        let headers = HeaderMap::new();
        let sig_a = sign_v2("s", "GET", "/b/o", "versionId=v1&X-Foo=bar", &headers, None);
        let sig_b = sign_v2("s", "GET", "/b/o", "versionId=v1", &headers, None);
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn v4_signature_changes_with_any_byte() {
        let cache = SigningKeyCache::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("host", "example.com", true);
        headers.insert("x-amz-date", iso8601_basic(t), true);
        let a = sign_v4(
            &cache, "AKID", "secret", "us-east-1", t, "GET", "/obj", "", &headers,
            PayloadHash::Unsigned,
        );
        headers.insert("host", "example.org", true);
        let b = sign_v4(
            &cache, "AKID", "secret", "us-east-1", t, "GET", "/obj", "", &headers,
            PayloadHash::Unsigned,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn chunk_framing_matches_scenario_e() {
        let cache = SigningKeyCache::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let key = cache.get_or_derive(t.date_naive(), "secret", "us-east-1");
        let mut signer = ChunkSigner::new(key, "us-east-1", t, "seed".to_string());
        let chunk1 = vec![0u8; 8192];
        let chunk2 = vec![1u8; 8192];
        let sig1 = signer.sign_chunk(&chunk1);
        let sig2 = signer.sign_chunk(&chunk2);
        let sig3 = signer.sign_chunk(&[]);
        assert_eq!(sig1.len(), 64);
        assert_ne!(sig1, sig2);
        assert_ne!(sig2, sig3);

        let width = chunk_size_hex_width(8192);
        let framed1 = frame_chunk(&chunk1, &sig1, width);
        let framed3 = frame_chunk(&[], &sig3, width);
        assert!(framed1.starts_with(b"2000;chunk-signature="));
        assert!(framed3.starts_with(b"0000;chunk-signature="));

        let total = v4_chunked_content_length(16384, 8192);
        let overhead = framing_overhead(width) as u64;
        assert_eq!(total, 16384 + 3 * overhead);
    }

    #[test]
    fn signing_key_cache_recomputes_on_date_change() {
        let cache = SigningKeyCache::new();
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let k1 = cache.get_or_derive(d1, "secret", "us-east-1");
        let k2 = cache.get_or_derive(d2, "secret", "us-east-1");
        assert_ne!(k1, k2);
        let k1_again = cache.get_or_derive(d1, "secret", "us-east-1");
        assert_eq!(k1, k1_again);
    }
}
