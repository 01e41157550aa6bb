//! `RequestEngine`: the state machine that drives one logical request —
//! session acquisition, IP selection, signing, send/receive, auth replay,
//! retry and failover (spec §4.6).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use http::{Request, Response, StatusCode};
use hyper::client::HttpConnector;
use hyper::Body as HyperBody;
use hyper_rustls::HttpsConnector;

use crate::body_stream::{BodyStreamConsumer, BodyStreamProducer};
use crate::canonical::HeaderMap as CanonicalHeaders;
use crate::config::Connection;
use crate::error::{ErrorContext, S3ClientError, S3ErrorCode, TransportErrorKind};
use crate::signer::{self, ChunkSigner, PayloadHash};
use crate::throttle::Direction;
use crate::xml::parsers::parse_error_body;

/// Outgoing request body. v4-chunked framing is applied before the body
/// reaches `Transport` (see `RequestEngine::frame_upload`), so `Transport`
/// itself only ever sees a flat byte stream (spec §4.6.1).
pub enum TransportBody {
    Buffered(Bytes),
    Streamed(BodyStreamConsumer),
}

/// Transport-layer failure, independent of any HTTP status the server may
/// have returned.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The async boundary RequestEngine is generic over (spec §4.6.1). The
/// production implementation wraps a pooled hyper client; tests substitute
/// a stub returning canned responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        req: Request<TransportBody>,
    ) -> Result<Response<HyperBody>, TransportError>;
}

/// Production transport: a `hyper::Client` over `hyper_rustls`'s
/// webpki-root HTTPS connector, built the way the teacher's `Storage::new`
/// builds its own (`storage.rs`): `with_webpki_roots().https_or_http()
/// .enable_http1().enable_http2()`.
pub struct HyperTransport {
    client: hyper::Client<HttpsConnector<HttpConnector>>,
}

impl HyperTransport {
    pub fn new() -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        Self {
            client: hyper::Client::builder().build(https),
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn execute(
        &self,
        req: Request<TransportBody>,
    ) -> Result<Response<HyperBody>, TransportError> {
        let (parts, body) = req.into_parts();
        let hyper_body = match body {
            TransportBody::Buffered(bytes) => HyperBody::from(bytes),
            TransportBody::Streamed(mut consumer) => {
                let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(4);
                tokio::spawn(async move {
                    while let Some(frame) = consumer.recv().await {
                        if tx.send(Ok(frame.bytes)).await.is_err() {
                            break;
                        }
                        if frame.is_last {
                            break;
                        }
                    }
                });
                HyperBody::wrap_stream(tokio_stream_from_receiver(rx))
            }
        };
        let req = Request::from_parts(parts, hyper_body);
        self.client.request(req).await.map_err(|e| {
            let kind = if e.is_connect() {
                TransportErrorKind::ConnectFailed
            } else if e.is_timeout() {
                TransportErrorKind::Timeout
            } else {
                TransportErrorKind::Other
            };
            TransportError::new(kind, e.to_string())
        })
    }
}

/// Drain `consumer`, signing and wire-framing each chunk through
/// `chunk_signer`, re-chunked to `chunk_size` bytes, and hand the framed
/// bytes to a fresh `BodyStreamConsumer` the transport can read from
/// directly (spec §4.2's wire-chunk format).
fn spawn_v4_chunk_framer(
    mut consumer: BodyStreamConsumer,
    mut chunk_signer: ChunkSigner,
    chunk_size: usize,
) -> BodyStreamConsumer {
    let (mut producer, framed_consumer) = crate::body_stream::channel(8);
    let hex_width = signer::chunk_size_hex_width(chunk_size);
    tokio::spawn(async move {
        let mut pending = BytesMut::new();
        loop {
            match consumer.recv().await {
                Some(frame) => {
                    pending.extend_from_slice(&frame.bytes);
                    while pending.len() >= chunk_size {
                        let chunk = pending.split_to(chunk_size).freeze();
                        let sig = chunk_signer.sign_chunk(&chunk);
                        let framed = signer::frame_chunk(&chunk, &sig, hex_width);
                        if producer.push(Bytes::from(framed), false).await.is_err() {
                            return;
                        }
                    }
                    if frame.is_last {
                        break;
                    }
                }
                None => break,
            }
        }
        if !pending.is_empty() {
            let chunk = pending.split().freeze();
            let sig = chunk_signer.sign_chunk(&chunk);
            let framed = signer::frame_chunk(&chunk, &sig, hex_width);
            if producer.push(Bytes::from(framed), false).await.is_err() {
                return;
            }
        }
        let final_sig = chunk_signer.sign_chunk(&[]);
        let final_framed = signer::frame_chunk(&[], &final_sig, hex_width);
        producer.push(Bytes::from(final_framed), true).await.ok();
    });
    framed_consumer
}

fn tokio_stream_from_receiver(
    rx: tokio::sync::mpsc::Receiver<Result<Bytes, std::io::Error>>,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> {
    use futures_util::stream::unfold;
    unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

/// HTTP auth scheme priority order for 401/407 replay (spec §4.6 phase 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Negotiate,
    Ntlm,
    Passport,
    Digest,
    Basic,
}

const AUTH_PRIORITY: [AuthScheme; 5] = [
    AuthScheme::Negotiate,
    AuthScheme::Ntlm,
    AuthScheme::Passport,
    AuthScheme::Digest,
    AuthScheme::Basic,
];

fn pick_auth_scheme(www_authenticate: &str) -> Option<AuthScheme> {
    let offered: Vec<&str> = www_authenticate.split(',').map(|s| s.trim()).collect();
    for scheme in AUTH_PRIORITY {
        let token = match scheme {
            AuthScheme::Negotiate => "Negotiate",
            AuthScheme::Ntlm => "NTLM",
            AuthScheme::Passport => "Passport",
            AuthScheme::Digest => "Digest",
            AuthScheme::Basic => "Basic",
        };
        if offered.iter().any(|o| o.starts_with(token)) {
            return Some(scheme);
        }
    }
    None
}

/// What to do with the response body on the way out.
pub enum DownloadSink {
    Buffer,
    Stream(BodyStreamProducer),
}

/// One logical request's inputs (spec §4.6: "Inputs: method, resource
/// path, optional payload buffer, optional upload BodyStream and total
/// length, optional download BodyStream, requested response headers").
pub struct RequestSpec {
    pub method: http::Method,
    pub resource_path: String,
    pub raw_query: String,
    pub headers: CanonicalHeaders,
    pub upload: UploadBody,
    pub download: DownloadSink,
    /// Admin-mode requests bypass S3 signing entirely (spec §4.10).
    pub admin_mode: bool,
}

pub enum UploadBody {
    Empty,
    Buffered(Bytes),
    Stream { consumer: BodyStreamConsumer, total_len: u64 },
}

/// Outcome of a successful request.
pub struct RequestOutcome {
    pub status: u16,
    pub headers: http::HeaderMap,
    pub body: Option<Bytes>,
}

pub struct RequestEngine {
    connection: Arc<Connection>,
    transport: Arc<dyn Transport>,
}

impl RequestEngine {
    pub fn new(connection: Arc<Connection>, transport: Arc<dyn Transport>) -> Self {
        Self {
            connection,
            transport,
        }
    }

    /// Drive `spec` to completion: up to `max_retry_count` attempts with IP
    /// failover and bad-IP bookkeeping (spec §4.6's retry loop).
    pub async fn execute(&self, spec: RequestSpec) -> Result<RequestOutcome, S3ClientError> {
        let is_stream_request = matches!(spec.upload, UploadBody::Stream { .. })
            || matches!(spec.download, DownloadSink::Stream(_));

        let mut used_ips: HashSet<String> = HashSet::new();
        let mut last_err: Option<S3ClientError> = None;
        let max_attempts = self.connection.max_retry_count.max(1);
        let mut timeout_retries = 0u32;

        let RequestSpec {
            method,
            resource_path,
            raw_query,
            mut headers,
            upload,
            download,
            admin_mode,
        } = spec;

        let mut upload = Some(upload);
        let mut download = Some(download);

        for attempt in 0..max_attempts {
            let now = Instant::now();
            let ip = self.connection.runtime.ip_roster.next_ip(
                &self.connection.host_label,
                &self.connection.candidate_ips,
                &used_ips,
                &self.connection.runtime.bad_ips,
                self.connection.timeouts.bad_ip_ttl,
                now,
            );
            let ip = match ip {
                Some(ip) => ip,
                None => {
                    return Err(last_err.unwrap_or_else(|| {
                        S3ClientError::transport(TransportErrorKind::ConnectFailed, "no candidate IPs remaining")
                    }))
                }
            };

            let body_for_attempt = upload.take().unwrap_or(UploadBody::Empty);
            let download_for_attempt = download.take().unwrap_or(DownloadSink::Buffer);

            let result = self
                .send_once(
                    &method,
                    &resource_path,
                    &raw_query,
                    &mut headers,
                    body_for_attempt,
                    download_for_attempt,
                    &ip,
                    admin_mode,
                )
                .await;

            match result {
                Ok(outcome) if (200..300).contains(&outcome.status) => return Ok(outcome),
                Ok(outcome) => {
                    // Got a server response with a non-2xx status. Stream
                    // requests never retry (spec §4.6).
                    if outcome.status >= 500 && !is_stream_request && attempt + 1 < max_attempts {
                        last_err = Some(status_to_error(outcome.status, None));
                        tokio::time::sleep(self.connection.pause_after_500).await;
                        continue;
                    }
                    return Ok(outcome);
                }
                Err(err) => {
                    if matches!(err, S3ClientError::Aborted) {
                        return Err(err);
                    }
                    if is_stream_request {
                        return Err(err);
                    }
                    if matches!(err, S3ClientError::Timeout) {
                        timeout_retries += 1;
                        if timeout_retries > 2 {
                            return Err(err);
                        }
                    }
                    if let Some(kind) = err.transport_kind() {
                        if kind.qualifies_for_bad_ip() {
                            self.connection.runtime.bad_ips.mark_bad(
                                &self.connection.host_label,
                                &ip,
                                kind,
                                Instant::now(),
                            );
                            used_ips.insert(ip.clone());
                        }
                    }
                    last_err = Some(err);
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(self.connection.pause_between_retries).await;
                    }
                }
            }
        }

        self.connection.runtime.bad_ips.test_all_bad(
            &self.connection.host_label,
            &self.connection.candidate_ips,
            self.connection.timeouts.bad_ip_ttl,
            Instant::now(),
        );

        Err(last_err.unwrap_or(S3ClientError::Aborted))
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_once(
        &self,
        method: &http::Method,
        resource_path: &str,
        raw_query: &str,
        headers: &mut CanonicalHeaders,
        upload: UploadBody,
        download: DownloadSink,
        ip: &str,
        admin_mode: bool,
    ) -> Result<RequestOutcome, S3ClientError> {
        let session = self
            .connection
            .runtime
            .sessions
            .lease(&self.connection.host_label, ip);

        let outcome = self
            .send_with_auth_replay(method, resource_path, raw_query, headers, upload, download, ip, admin_mode)
            .await;

        self.connection.runtime.sessions.release(&session);
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_with_auth_replay(
        &self,
        method: &http::Method,
        resource_path: &str,
        raw_query: &str,
        headers: &mut CanonicalHeaders,
        mut upload: UploadBody,
        download: DownloadSink,
        ip: &str,
        admin_mode: bool,
    ) -> Result<RequestOutcome, S3ClientError> {
        let mut auth_cycles = 0;
        let mut download = Some(download);

        loop {
            let request_time = Utc::now();
            headers.insert("host", format!("{}:{}", ip, self.connection.port), true);
            headers.insert("x-amz-date", signer::iso8601_basic(request_time), true);
            self.stamp_length_headers(headers, &upload);

            let seed_signature = if !admin_mode {
                self.sign_request(method.as_str(), resource_path, raw_query, headers, &upload, request_time)
            } else {
                None
            };

            let uri = build_uri(&self.connection.scheme(), ip, self.connection.port, resource_path, raw_query);
            let mut builder = Request::builder().method(method.clone()).uri(uri);
            for (name, value) in headers.iter_display() {
                builder = builder.header(name, value);
            }

            let (transport_body, byte_count) = self.frame_upload(&mut upload, request_time, seed_signature)?;
            let req = builder
                .body(transport_body)
                .map_err(|e| S3ClientError::Config(e.to_string()))?;

            if let Some(n) = byte_count {
                self.connection.runtime.throttle.wait_for_capacity(&self.connection.host_label, Direction::Upload).await;
                self.connection.runtime.throttle.consume(&self.connection.host_label, Direction::Upload, n);
            }

            let response = self.transport.execute(req).await.map_err(|e| {
                S3ClientError::Transport {
                    kind: e.kind,
                    message: e.message,
                    ctx: ErrorContext {
                        host_addr: Some(format!("{ip}:{}", self.connection.port)),
                        ..Default::default()
                    },
                }
            })?;

            let status = response.status();
            if (status == StatusCode::UNAUTHORIZED || status == StatusCode::PROXY_AUTHENTICATION_REQUIRED)
                && auth_cycles < 3
            {
                if let Some(www) = response
                    .headers()
                    .get(http::header::WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                {
                    if pick_auth_scheme(www).is_some() {
                        auth_cycles += 1;
                        continue;
                    }
                }
            }

            let dl = download.take().unwrap_or(DownloadSink::Buffer);
            return self.drain_body(response, dl).await;
        }
    }

    /// Stamp `Content-Length` (or the v4-chunked framing equivalents)
    /// before signing, since every header present at signing time is
    /// covered by `SignedHeaders` (spec §4.2).
    fn stamp_length_headers(&self, headers: &mut CanonicalHeaders, upload: &UploadBody) {
        match upload {
            UploadBody::Empty => {
                headers.insert("content-length", "0", true);
            }
            UploadBody::Buffered(bytes) => {
                headers.insert("content-length", bytes.len().to_string(), true);
            }
            UploadBody::Stream { total_len, .. } => {
                if self.connection.use_v4 {
                    let wire_len = signer::v4_chunked_content_length(*total_len, self.connection.v4_chunk_size());
                    headers.insert("x-amz-decoded-content-length", total_len.to_string(), true);
                    headers.insert("content-length", wire_len.to_string(), true);
                } else {
                    headers.insert("content-length", total_len.to_string(), true);
                }
            }
        }
    }

    /// Sign `headers` in place, returning the bare hex signature (the v4
    /// seed signature streaming chunks chain from; `None` under v2).
    fn sign_request(
        &self,
        method: &str,
        resource_path: &str,
        raw_query: &str,
        headers: &mut CanonicalHeaders,
        upload: &UploadBody,
        request_time: chrono::DateTime<Utc>,
    ) -> Option<String> {
        if self.connection.use_v4 {
            let payload_hash = match upload {
                UploadBody::Buffered(bytes) => PayloadHash::Signed(bytes),
                UploadBody::Empty => PayloadHash::Signed(b""),
                UploadBody::Stream { .. } => PayloadHash::StreamingChunked,
            };
            if matches!(payload_hash, PayloadHash::StreamingChunked) {
                headers.insert("content-encoding", "aws-chunked", true);
                headers.insert("x-amz-content-sha256", "STREAMING-AWS4-HMAC-SHA256-PAYLOAD", true);
            } else if let PayloadHash::Signed(bytes) = payload_hash {
                headers.insert("x-amz-content-sha256", signer::sha256_hex(bytes), true);
            }
            let auth = signer::sign_v4(
                &self.connection.runtime.signing_keys,
                &self.connection.access_key_id,
                &self.connection.secret_access_key,
                &self.connection.region,
                request_time,
                method,
                resource_path,
                raw_query,
                headers,
                payload_hash,
            );
            let seed_signature = auth
                .rsplit_once("Signature=")
                .map(|(_, sig)| sig.to_string())
                .unwrap_or_default();
            headers.insert("authorization", auth, true);
            Some(seed_signature)
        } else {
            headers.insert(
                "date",
                request_time.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                true,
            );
            let sig = signer::sign_v2(
                &self.connection.secret_access_key,
                method,
                resource_path,
                raw_query,
                headers,
                None,
            );
            headers.insert(
                "authorization",
                signer::v2_authorization_header(&self.connection.access_key_id, &sig),
                true,
            );
            None
        }
    }

    /// Build the outgoing `TransportBody` for this attempt, framing as v4
    /// chunks when streaming under v4 signing (spec §4.2/§4.6 phase 2).
    fn frame_upload(
        &self,
        upload: &mut UploadBody,
        request_time: chrono::DateTime<Utc>,
        seed_signature: Option<String>,
    ) -> Result<(TransportBody, Option<u64>), S3ClientError> {
        let taken = std::mem::replace(upload, UploadBody::Empty);
        match taken {
            UploadBody::Empty => Ok((TransportBody::Buffered(Bytes::new()), Some(0))),
            UploadBody::Buffered(bytes) => {
                let len = bytes.len() as u64;
                Ok((TransportBody::Buffered(bytes), Some(len)))
            }
            UploadBody::Stream { consumer, total_len } => {
                if self.connection.use_v4 {
                    let signing_key = self.connection.runtime.signing_keys.get_or_derive(
                        request_time.date_naive(),
                        &self.connection.secret_access_key,
                        &self.connection.region,
                    );
                    let chunk_signer = ChunkSigner::new(
                        signing_key,
                        &self.connection.region,
                        request_time,
                        seed_signature.unwrap_or_default(),
                    );
                    let framed = spawn_v4_chunk_framer(consumer, chunk_signer, self.connection.v4_chunk_size());
                    Ok((TransportBody::Streamed(framed), Some(total_len)))
                } else {
                    Ok((TransportBody::Streamed(consumer), Some(total_len)))
                }
            }
        }
    }

    /// Phase 5: drain the response body, buffering always when the status
    /// indicates an error (spec §9 decision) regardless of stream mode.
    async fn drain_body(
        &self,
        response: Response<HyperBody>,
        download: DownloadSink,
    ) -> Result<RequestOutcome, S3ClientError> {
        let status = response.status().as_u16();
        let (parts, mut body) = response.into_parts();

        let force_buffer = status >= 400;

        match (download, force_buffer) {
            (DownloadSink::Stream(mut producer), false) => {
                use http_body::Body as _;
                use std::pin::Pin;

                let mut pinned = Pin::new(&mut body);
                loop {
                    match pinned.as_mut().data().await {
                        Some(Ok(chunk)) => {
                            let len = chunk.len() as u64;
                            self.connection
                                .runtime
                                .throttle
                                .wait_for_capacity(&self.connection.host_label, Direction::Download)
                                .await;
                            self.connection.runtime.throttle.consume(
                                &self.connection.host_label,
                                Direction::Download,
                                len,
                            );
                            if producer.push(chunk, false).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            return Err(S3ClientError::transport(
                                TransportErrorKind::InvalidServerResponse,
                                e.to_string(),
                            ))
                        }
                        None => {
                            producer.finish().await.ok();
                            break;
                        }
                    }
                }
                Ok(RequestOutcome {
                    status,
                    headers: parts.headers,
                    body: None,
                })
            }
            (_, _) => {
                let bytes = hyper::body::to_bytes(&mut body).await.map_err(|e| {
                    S3ClientError::transport(TransportErrorKind::InvalidServerResponse, e.to_string())
                })?;
                if status >= 400 {
                    return Err(self.classify_error_body(status, &bytes, &parts.headers));
                }
                Ok(RequestOutcome {
                    status,
                    headers: parts.headers,
                    body: Some(bytes),
                })
            }
        }
    }

    fn classify_error_body(
        &self,
        status: u16,
        bytes: &Bytes,
        _headers: &http::HeaderMap,
    ) -> S3ClientError {
        // Stash the raw body on `details` so admin-mode callers (whose
        // error bodies use a distinct `//error/*` casing, spec §6) can
        // re-parse it with their own parser.
        let raw_body = String::from_utf8_lossy(bytes).into_owned();
        match parse_error_body(bytes) {
            Ok(body) => S3ClientError::Http {
                status,
                code: body.error_code(),
                message: body.message.clone(),
                ctx: ErrorContext {
                    s3_resource: body.resource,
                    s3_request_id: body.request_id,
                    details: Some(raw_body),
                    ..Default::default()
                },
            },
            Err(_) => {
                let mut err = status_to_error(status, None);
                if let S3ClientError::Http { ctx, .. } = &mut err {
                    ctx.details = Some(raw_body);
                }
                err
            }
        }
    }
}

fn status_to_error(status: u16, message: Option<String>) -> S3ClientError {
    let code = match status {
        404 => S3ErrorCode::NoSuchKey,
        403 => S3ErrorCode::AccessDenied,
        409 => S3ErrorCode::BucketAlreadyExists,
        500 => S3ErrorCode::InternalError,
        503 => S3ErrorCode::ServiceUnavailable,
        _ => S3ErrorCode::Unknown,
    };
    S3ClientError::http(status, code, message)
}

fn build_uri(scheme: &str, ip: &str, port: u16, resource_path: &str, raw_query: &str) -> String {
    let mut uri = format!("{scheme}://{ip}:{port}{resource_path}");
    if !raw_query.is_empty() {
        uri.push('?');
        uri.push_str(raw_query);
    }
    uri
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTransport {
        responses: Vec<Result<(u16, Vec<u8>), TransportErrorKind>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn execute(
            &self,
            _req: Request<TransportBody>,
        ) -> Result<Response<HyperBody>, TransportError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.responses[idx.min(self.responses.len() - 1)] {
                Ok((status, body)) => Ok(Response::builder()
                    .status(*status)
                    .body(HyperBody::from(body.clone()))
                    .unwrap()),
                Err(kind) => Err(TransportError::new(*kind, "stub failure")),
            }
        }
    }

    fn test_connection(runtime: Arc<RuntimeContext>) -> Arc<Connection> {
        Arc::new(
            Connection::new("host", "AKID", "secret", "us-east-1", runtime)
                .with_candidate_ips(vec!["1.1.1.1".to_string()]),
        )
    }

    #[tokio::test]
    async fn successful_get_returns_buffered_body() {
        let runtime = RuntimeContext::new();
        let connection = test_connection(runtime);
        let transport = Arc::new(StubTransport {
            responses: vec![Ok((200, b"hello".to_vec()))],
            calls: AtomicUsize::new(0),
        });
        let engine = RequestEngine::new(connection, transport);
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: "/bucket/obj".to_string(),
            raw_query: String::new(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = engine.execute(spec).await.unwrap();
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.body.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn four_hundred_four_surfaces_as_nosuchkey() {
        let runtime = RuntimeContext::new();
        let connection = test_connection(runtime);
        let body = br#"<Error><Code>NoSuchKey</Code><Message>missing</Message></Error>"#.to_vec();
        let transport = Arc::new(StubTransport {
            responses: vec![Ok((404, body))],
            calls: AtomicUsize::new(0),
        });
        let engine = RequestEngine::new(connection, transport);
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: "/bucket/missing".to_string(),
            raw_query: String::new(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let err = engine.execute(spec).await.unwrap_err();
        match err {
            S3ClientError::Http { code, status, .. } => {
                assert_eq!(code, S3ErrorCode::NoSuchKey);
                assert_eq!(status, 404);
            }
            _ => panic!("expected Http error"),
        }
    }

    #[test]
    fn auth_scheme_priority_prefers_negotiate() {
        let scheme = pick_auth_scheme("Basic realm=x, Negotiate, NTLM");
        assert_eq!(scheme, Some(AuthScheme::Negotiate));
    }

    #[test]
    fn auth_scheme_falls_back_to_basic() {
        let scheme = pick_auth_scheme("Basic realm=x");
        assert_eq!(scheme, Some(AuthScheme::Basic));
    }
}
