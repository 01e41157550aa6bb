//! Bulk delete: accumulate keys in a draft list, flush as a single
//! `POST /<bucket>/?delete` once the draft reaches 1000 entries or the
//! caller explicitly flushes (spec §4.10, §3 "accumulator for the bulk-
//! delete draft").

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use bytes::Bytes;
use md5::{Digest, Md5};

use crate::canonical::HeaderMap as CanonicalHeaders;
use crate::config::Connection;
use crate::engine::{DownloadSink, RequestEngine, RequestSpec, Transport, UploadBody};
use crate::error::{S3ClientError, S3ErrorCode};
use crate::xml::parsers;

const FLUSH_THRESHOLD: usize = 1000;

/// Per-bucket draft of pending delete keys. Not `Send`-shared across
/// threads by design, mirroring the spec's "per-thread draft list" — a
/// caller wanting concurrent accumulation owns one `BulkDeleteAccumulator`
/// per task.
pub struct BulkDeleteAccumulator {
    connection: Arc<Connection>,
    transport: Arc<dyn Transport>,
    bucket: String,
    draft: Vec<String>,
}

impl BulkDeleteAccumulator {
    pub fn new(connection: Arc<Connection>, transport: Arc<dyn Transport>, bucket: impl Into<String>) -> Self {
        Self {
            connection,
            transport,
            bucket: bucket.into(),
            draft: Vec::new(),
        }
    }

    fn engine(&self) -> RequestEngine {
        RequestEngine::new(self.connection.clone(), self.transport.clone())
    }

    /// Queue `key` for deletion, flushing automatically once the draft
    /// reaches 1000 entries.
    pub async fn add(&mut self, key: impl Into<String>) -> Result<(), S3ClientError> {
        self.draft.push(key.into());
        if self.draft.len() >= FLUSH_THRESHOLD {
            self.flush().await?;
        }
        Ok(())
    }

    /// Emit one `POST /<bucket>/?delete` for whatever is currently
    /// queued, sorted and de-duplicated, with `<Quiet>true</Quiet>` (spec
    /// scenario C). A 200 response whose body opportunistically contains
    /// `<DeleteResult><Error>` entries classifies the whole flush as HTTP
    /// 500 (spec §9 open-question decision: always parse regardless of
    /// quiet mode).
    pub async fn flush(&mut self) -> Result<(), S3ClientError> {
        if self.draft.is_empty() {
            return Ok(());
        }
        let keys = std::mem::take(&mut self.draft);
        let body = parsers::build_bulk_delete_body(&keys);
        let digest = Md5::digest(body.as_bytes());

        let mut headers = CanonicalHeaders::new();
        headers.insert("content-md5", B64.encode(digest), true);
        headers.insert("content-type", "application/xml", true);

        let spec = RequestSpec {
            method: http::Method::POST,
            resource_path: format!("/{}/", self.bucket),
            raw_query: "delete".to_string(),
            headers,
            upload: UploadBody::Buffered(Bytes::from(body)),
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = self.engine().execute(spec).await?;
        let body = outcome.body.unwrap_or_default();
        let errors = parsers::parse_delete_result_errors(&body)?;
        if let Some(first) = errors.into_iter().next() {
            return Err(S3ClientError::http(
                500,
                S3ErrorCode::from_code_str(&first.code),
                Some(first.message),
            ));
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.draft.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{TransportBody, TransportError};
    use crate::error::TransportErrorKind;
    use crate::runtime::RuntimeContext;
    use async_trait::async_trait;
    use http::{Request, Response};
    use hyper::Body as HyperBody;

    #[test]
    fn add_without_flush_just_queues() {
        let runtime = RuntimeContext::new();
        let conn = Arc::new(Connection::new("h", "k", "s", "r", runtime));
        let transport = Arc::new(crate::engine::HyperTransport::new());
        let acc = BulkDeleteAccumulator::new(conn, transport, "bucket");
        assert_eq!(acc.pending_count(), 0);
    }

    struct StubTransport {
        status: u16,
        body: Vec<u8>,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn execute(&self, _req: Request<TransportBody>) -> Result<Response<HyperBody>, TransportError> {
            Ok(Response::builder().status(self.status).body(HyperBody::from(self.body.clone())).unwrap())
        }
    }

    fn test_accumulator(status: u16, body: Vec<u8>) -> BulkDeleteAccumulator {
        let runtime = RuntimeContext::new();
        let conn = Arc::new(
            Connection::new("host", "AKID", "secret", "us-east-1", runtime)
                .with_candidate_ips(vec!["1.1.1.1".to_string()]),
        );
        let transport = Arc::new(StubTransport { status, body });
        BulkDeleteAccumulator::new(conn, transport, "bucket")
    }

    #[tokio::test]
    async fn flush_on_empty_draft_is_a_noop() {
        let mut acc = test_accumulator(200, Vec::new());
        acc.flush().await.unwrap();
        assert_eq!(acc.pending_count(), 0);
    }

    #[tokio::test]
    async fn flush_drains_draft_on_clean_response() {
        let mut acc = test_accumulator(200, b"<DeleteResult/>".to_vec());
        acc.add("b").await.unwrap();
        acc.add("a").await.unwrap();
        acc.flush().await.unwrap();
        assert_eq!(acc.pending_count(), 0);
    }

    #[tokio::test]
    async fn flush_promotes_delete_result_error_to_http_500() {
        let body = br#"<DeleteResult><Error><Key>a</Key><Code>AccessDenied</Code><Message>nope</Message></Error></DeleteResult>"#.to_vec();
        let mut acc = test_accumulator(200, body);
        acc.add("a").await.unwrap();
        let err = acc.flush().await.unwrap_err();
        match err {
            S3ClientError::Http { status, code, .. } => {
                assert_eq!(status, 500);
                assert_eq!(code, S3ErrorCode::AccessDenied);
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn add_auto_flushes_at_threshold() {
        let mut acc = test_accumulator(200, b"<DeleteResult/>".to_vec());
        for i in 0..FLUSH_THRESHOLD {
            acc.add(format!("key-{i}")).await.unwrap();
        }
        assert_eq!(acc.pending_count(), 0);
    }
}
