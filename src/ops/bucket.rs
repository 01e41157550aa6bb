//! Bucket-level operations: create/delete/head, ACL read/write,
//! versioning, and lifecycle (spec §4.10).

use std::sync::Arc;

use bytes::Bytes;

use crate::canonical::HeaderMap as CanonicalHeaders;
use crate::config::Connection;
use crate::engine::{DownloadSink, RequestEngine, RequestSpec, Transport, UploadBody};
use crate::error::S3ClientError;
use crate::xml::parsers::{self, Grant, LifecycleRule, VersioningStatus};

pub struct BucketOps {
    connection: Arc<Connection>,
    transport: Arc<dyn Transport>,
}

fn bucket_path(bucket: &str) -> String {
    format!("/{bucket}/")
}

impl BucketOps {
    pub fn new(connection: Arc<Connection>, transport: Arc<dyn Transport>) -> Self {
        Self { connection, transport }
    }

    fn engine(&self) -> RequestEngine {
        RequestEngine::new(self.connection.clone(), self.transport.clone())
    }

    pub async fn create_bucket(&self, bucket: &str) -> Result<(), S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::PUT,
            resource_path: bucket_path(bucket),
            raw_query: String::new(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        self.engine().execute(spec).await?;
        Ok(())
    }

    pub async fn delete_bucket(&self, bucket: &str) -> Result<(), S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::DELETE,
            resource_path: bucket_path(bucket),
            raw_query: String::new(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        self.engine().execute(spec).await?;
        Ok(())
    }

    /// HEAD the bucket; returns `Ok(true)` if it exists, `Ok(false)` on a
    /// 404/`NoSuchBucket`.
    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::HEAD,
            resource_path: bucket_path(bucket),
            raw_query: String::new(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        match self.engine().execute(spec).await {
            Ok(_) => Ok(true),
            Err(S3ClientError::Http { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn resource_for(bucket: &str, key: Option<&str>) -> String {
        match key {
            Some(k) => format!("/{bucket}/{k}"),
            None => bucket_path(bucket),
        }
    }

    pub async fn get_acl(&self, bucket: &str, key: Option<&str>) -> Result<Vec<Grant>, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: Self::resource_for(bucket, key),
            raw_query: "acl".to_string(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = self.engine().execute(spec).await?;
        parsers::parse_acl(&outcome.body.unwrap_or_default())
    }

    /// Replace the canned ACL on a bucket (or object, if `key` is given)
    /// using a pre-built `<AccessControlPolicy>` XML document.
    pub async fn put_acl(&self, bucket: &str, key: Option<&str>, acl_xml: String) -> Result<(), S3ClientError> {
        let mut headers = CanonicalHeaders::new();
        headers.insert("content-type", "application/xml", true);
        let spec = RequestSpec {
            method: http::Method::PUT,
            resource_path: Self::resource_for(bucket, key),
            raw_query: "acl".to_string(),
            headers,
            upload: UploadBody::Buffered(Bytes::from(acl_xml)),
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        self.engine().execute(spec).await?;
        Ok(())
    }

    pub async fn get_versioning(&self, bucket: &str) -> Result<Option<VersioningStatus>, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: bucket_path(bucket),
            raw_query: "versioning".to_string(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = self.engine().execute(spec).await?;
        parsers::parse_versioning_status(&outcome.body.unwrap_or_default())
    }

    pub async fn put_versioning(&self, bucket: &str, status: VersioningStatus) -> Result<(), S3ClientError> {
        let status_str = match status {
            VersioningStatus::Enabled => "Enabled",
            VersioningStatus::Suspended => "Suspended",
        };
        let body = format!("<VersioningConfiguration><Status>{status_str}</Status></VersioningConfiguration>");
        let mut headers = CanonicalHeaders::new();
        headers.insert("content-type", "application/xml", true);
        let spec = RequestSpec {
            method: http::Method::PUT,
            resource_path: bucket_path(bucket),
            raw_query: "versioning".to_string(),
            headers,
            upload: UploadBody::Buffered(Bytes::from(body)),
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        self.engine().execute(spec).await?;
        Ok(())
    }

    pub async fn get_lifecycle(&self, bucket: &str) -> Result<Vec<LifecycleRule>, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: bucket_path(bucket),
            raw_query: "lifecycle".to_string(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = self.engine().execute(spec).await?;
        parsers::parse_lifecycle(&outcome.body.unwrap_or_default())
    }

    /// Replace the bucket's lifecycle configuration with a caller-built
    /// `<LifecycleConfiguration>` XML document. Every field on
    /// `LifecycleRule` is optional per spec, so building the document is
    /// left to the caller rather than constrained to a fixed builder shape.
    pub async fn put_lifecycle(&self, bucket: &str, lifecycle_xml: String) -> Result<(), S3ClientError> {
        let mut headers = CanonicalHeaders::new();
        headers.insert("content-type", "application/xml", true);
        let spec = RequestSpec {
            method: http::Method::PUT,
            resource_path: bucket_path(bucket),
            raw_query: "lifecycle".to_string(),
            headers,
            upload: UploadBody::Buffered(Bytes::from(lifecycle_xml)),
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        self.engine().execute(spec).await?;
        Ok(())
    }

    pub async fn delete_lifecycle(&self, bucket: &str) -> Result<(), S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::DELETE,
            resource_path: bucket_path(bucket),
            raw_query: "lifecycle".to_string(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        self.engine().execute(spec).await?;
        Ok(())
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTransport {
        responses: Vec<Result<(u16, Vec<u8>), TransportErrorKind>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn execute(&self, _req: Request<TransportBody>) -> Result<Response<HyperBody>, TransportError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.responses[idx.min(self.responses.len() - 1)] {
                Ok((status, body)) => Ok(Response::builder().status(*status).body(HyperBody::from(body.clone())).unwrap()),
                Err(kind) => Err(TransportError::new(*kind, "stub failure")),
            }
        }
    }

    fn test_ops(responses: Vec<Result<(u16, Vec<u8>), TransportErrorKind>>) -> BucketOps {
        let runtime = RuntimeContext::new();
        let connection = Arc::new(
            Connection::new("host", "AKID", "secret", "us-east-1", runtime)
                .with_candidate_ips(vec!["1.1.1.1".to_string()]),
        );
        let transport = Arc::new(StubTransport {
            responses,
            calls: AtomicUsize::new(0),
        });
        BucketOps::new(connection, transport)
    }

    #[tokio::test]
    async fn bucket_exists_maps_404_to_false() {
        let ops = test_ops(vec![Ok((404, br#"<Error><Code>NoSuchBucket</Code><Message>x</Message></Error>"#.to_vec()))]);
        assert_eq!(ops.bucket_exists("missing").await.unwrap(), false);
    }

    #[tokio::test]
    async fn bucket_exists_true_on_200() {
        let ops = test_ops(vec![Ok((200, Vec::new()))]);
        assert_eq!(ops.bucket_exists("present").await.unwrap(), true);
    }

    #[tokio::test]
    async fn get_versioning_parses_status() {
        let body = b"<VersioningConfiguration><Status>Enabled</Status></VersioningConfiguration>".to_vec();
        let ops = test_ops(vec![Ok((200, body))]);
        let status = ops.get_versioning("bucket").await.unwrap();
        assert_eq!(status, Some(VersioningStatus::Enabled));
    }

    #[tokio::test]
    async fn get_acl_parses_grants() {
        let body = br#"<AccessControlPolicy><AccessControlList><Grant><Grantee xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="CanonicalUser"><ID>abc</ID></Grantee><Permission>FULL_CONTROL</Permission></Grant></AccessControlList></AccessControlPolicy>"#.to_vec();
        let ops = test_ops(vec![Ok((200, body))]);
        let grants = ops.get_acl("bucket", None).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].permission, "FULL_CONTROL");
    }
}
