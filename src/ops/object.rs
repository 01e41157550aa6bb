//! Object-level operations: PUT, GET, DELETE, HEAD, COPY (spec §4.10).
//!
//! Method naming follows the teacher's `Storage::upload_file` /
//! `download_file` / `delete_file` (`storage.rs`), generalized from a
//! fixed bucket to an explicit resource path per call.

use std::sync::Arc;

use bytes::Bytes;

use crate::body_stream::{BodyStreamConsumer, BodyStreamProducer};
use crate::canonical::HeaderMap as CanonicalHeaders;
use crate::config::Connection;
use crate::engine::{DownloadSink, RequestEngine, RequestOutcome, RequestSpec, Transport, UploadBody};
use crate::error::S3ClientError;
use crate::multipart::{BufferSource, MultipartCoordinator, MultipartSettings, DEFAULT_UPLOAD_PART_SIZE, MIN_PART_SIZE};

/// Thin façade over `RequestEngine` for single-object verbs. Holds no
/// state of its own beyond the connection/transport pair every call needs.
pub struct ObjectOps {
    connection: Arc<Connection>,
    transport: Arc<dyn Transport>,
}

fn object_path(bucket: &str, key: &str) -> String {
    format!("/{bucket}/{key}")
}

impl ObjectOps {
    pub fn new(connection: Arc<Connection>, transport: Arc<dyn Transport>) -> Self {
        Self {
            connection,
            transport,
        }
    }

    fn engine(&self) -> RequestEngine {
        RequestEngine::new(self.connection.clone(), self.transport.clone())
    }

    /// PUT a small-to-medium object. Automatically escalates to
    /// `MultipartCoordinator` when `body` exceeds `MIN_PART_SIZE`.
    pub async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<String, S3ClientError> {
        let path = object_path(bucket, key);
        if (body.len() as u64) <= MIN_PART_SIZE {
            let spec = RequestSpec {
                method: http::Method::PUT,
                resource_path: path,
                raw_query: String::new(),
                headers: CanonicalHeaders::new(),
                upload: UploadBody::Buffered(body),
                download: DownloadSink::Buffer,
                admin_mode: false,
            };
            let outcome = self.engine().execute(spec).await?;
            return Ok(etag_of(&outcome));
        }

        let total_len = body.len() as u64;
        let coordinator = MultipartCoordinator::new(
            self.connection.clone(),
            self.transport.clone(),
            MultipartSettings::default(),
        );
        coordinator
            .upload(&path, Arc::new(BufferSource(body)), total_len, DEFAULT_UPLOAD_PART_SIZE)
            .await
    }

    /// PUT a streaming object of known total length, without ever
    /// buffering it whole. Always goes through the single-request path;
    /// callers that need multipart streaming semantics should feed
    /// `MultipartCoordinator` directly with a `PartSource`.
    pub async fn put_object_stream(
        &self,
        bucket: &str,
        key: &str,
        consumer: BodyStreamConsumer,
        total_len: u64,
    ) -> Result<String, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::PUT,
            resource_path: object_path(bucket, key),
            raw_query: String::new(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Stream { consumer, total_len },
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = self.engine().execute(spec).await?;
        Ok(etag_of(&outcome))
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: object_path(bucket, key),
            raw_query: String::new(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = self.engine().execute(spec).await?;
        Ok(outcome.body.unwrap_or_default())
    }

    /// Stream a GET's body into `producer` rather than buffering it
    /// whole, for large downloads (spec §4.7's BodyStream).
    pub async fn get_object_stream(
        &self,
        bucket: &str,
        key: &str,
        producer: BodyStreamProducer,
    ) -> Result<(), S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: object_path(bucket, key),
            raw_query: String::new(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Stream(producer),
            admin_mode: false,
        };
        self.engine().execute(spec).await?;
        Ok(())
    }

    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<http::HeaderMap, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::HEAD,
            resource_path: object_path(bucket, key),
            raw_query: String::new(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = self.engine().execute(spec).await?;
        Ok(outcome.headers)
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::DELETE,
            resource_path: object_path(bucket, key),
            raw_query: String::new(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        self.engine().execute(spec).await?;
        Ok(())
    }

    /// COPY: small objects go through a single request with
    /// `x-amz-copy-source`; objects at or above `content_length_hint`
    /// escalate to `MultipartCoordinator::copy` (spec §4.10 "Rename").
    pub async fn copy_object(
        &self,
        dest_bucket: &str,
        dest_key: &str,
        source_bucket: &str,
        source_key: &str,
        content_length_hint: u64,
    ) -> Result<String, S3ClientError> {
        let dest_path = object_path(dest_bucket, dest_key);
        let source_path = object_path(source_bucket, source_key);

        if content_length_hint <= MIN_PART_SIZE {
            let mut headers = CanonicalHeaders::new();
            headers.insert("x-amz-copy-source", source_path, true);
            let spec = RequestSpec {
                method: http::Method::PUT,
                resource_path: dest_path,
                raw_query: String::new(),
                headers,
                upload: UploadBody::Empty,
                download: DownloadSink::Buffer,
                admin_mode: false,
            };
            let outcome = self.engine().execute(spec).await?;
            return Ok(etag_of(&outcome));
        }

        let coordinator = MultipartCoordinator::new(
            self.connection.clone(),
            self.transport.clone(),
            MultipartSettings::default(),
        );
        coordinator
            .copy(&dest_path, &source_path, content_length_hint, crate::multipart::DEFAULT_COPY_PART_SIZE)
            .await
    }
}

fn etag_of(outcome: &RequestOutcome) -> String {
    outcome
        .headers
        .get(http::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTransport {
        responses: Vec<Result<(u16, Vec<u8>, Vec<(&'static str, &'static str)>), TransportErrorKind>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn execute(&self, _req: Request<TransportBody>) -> Result<Response<HyperBody>, TransportError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.responses[idx.min(self.responses.len() - 1)] {
                Ok((status, body, headers)) => {
                    let mut builder = Response::builder().status(*status);
                    for (name, value) in headers {
                        builder = builder.header(*name, *value);
                    }
                    Ok(builder.body(HyperBody::from(body.clone())).unwrap())
                }
                Err(kind) => Err(TransportError::new(*kind, "stub failure")),
            }
        }
    }

    fn test_ops(responses: Vec<Result<(u16, Vec<u8>, Vec<(&'static str, &'static str)>), TransportErrorKind>>) -> ObjectOps {
        let runtime = RuntimeContext::new();
        let connection = Arc::new(
            Connection::new("host", "AKID", "secret", "us-east-1", runtime)
                .with_candidate_ips(vec!["1.1.1.1".to_string()]),
        );
        let transport = Arc::new(StubTransport {
            responses,
            calls: AtomicUsize::new(0),
        });
        ObjectOps::new(connection, transport)
    }

    #[tokio::test]
    async fn put_object_returns_etag_from_response_header() {
        let ops = test_ops(vec![Ok((200, Vec::new(), vec![("etag", "\"abc123\"")]))]);
        let etag = ops.put_object("bucket", "key", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(etag, "\"abc123\"");
    }

    #[tokio::test]
    async fn get_object_returns_body_bytes() {
        let ops = test_ops(vec![Ok((200, b"payload".to_vec(), vec![]))]);
        let body = ops.get_object("bucket", "key").await.unwrap();
        assert_eq!(body, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn head_object_surfaces_response_headers() {
        let ops = test_ops(vec![Ok((200, Vec::new(), vec![("content-length", "42")]))]);
        let headers = ops.head_object("bucket", "key").await.unwrap();
        assert_eq!(headers.get(http::header::CONTENT_LENGTH).unwrap(), "42");
    }

    #[tokio::test]
    async fn delete_object_propagates_http_errors() {
        let body = br#"<Error><Code>NoSuchKey</Code><Message>missing</Message></Error>"#.to_vec();
        let ops = test_ops(vec![Ok((404, body, vec![]))]);
        let err = ops.delete_object("bucket", "key").await.unwrap_err();
        match err {
            S3ClientError::Http { status, .. } => assert_eq!(status, 404),
            other => panic!("expected Http error, got {other:?}"),
        }
    }
}
