//! Metadata search: capability probe (`?searchMetadata`) and query
//! execution (`?query=<expr>`), the latter paginated the same way
//! non-delimiter listing is (spec §4.10 "Metadata search", ADDED — named in
//! §6 but undetailed in the distilled OperationLayer row).

use std::sync::Arc;

use crate::canonical::HeaderMap as CanonicalHeaders;
use crate::config::Connection;
use crate::engine::{DownloadSink, RequestEngine, RequestSpec, Transport, UploadBody};
use crate::error::S3ClientError;
use crate::xml::parsers::{self, BucketQueryResult, MetadataSearchCapabilities, ObjectMatch};

pub struct MetadataSearchOps {
    connection: Arc<Connection>,
    transport: Arc<dyn Transport>,
}

impl MetadataSearchOps {
    pub fn new(connection: Arc<Connection>, transport: Arc<dyn Transport>) -> Self {
        Self { connection, transport }
    }

    fn engine(&self) -> RequestEngine {
        RequestEngine::new(self.connection.clone(), self.transport.clone())
    }

    /// `GET /<bucket>/?searchMetadata`: probe whether metadata search is
    /// enabled and which keys are indexable.
    pub async fn capabilities(&self, bucket: &str) -> Result<MetadataSearchCapabilities, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: format!("/{bucket}/"),
            raw_query: "searchMetadata".to_string(),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = self.engine().execute(spec).await?;
        parsers::parse_metadata_search_list(&outcome.body.unwrap_or_default())
    }

    /// `GET /<bucket>/?query=<expr>`: one page of a metadata-search query,
    /// optionally starting from `marker`.
    pub async fn query_page(&self, bucket: &str, expr: &str, marker: Option<&str>) -> Result<BucketQueryResult, S3ClientError> {
        let encoded_expr = crate::canonical::uri_encode(expr, crate::canonical::EncodingProfile::AllSafe);
        let mut raw_query = format!("query={encoded_expr}");
        if let Some(m) = marker {
            raw_query.push_str(&format!("&marker={}", crate::canonical::uri_encode(m, crate::canonical::EncodingProfile::AllSafe)));
        }
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: format!("/{bucket}/"),
            raw_query,
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = self.engine().execute(spec).await?;
        parsers::parse_bucket_query_result(&outcome.body.unwrap_or_default())
    }

    /// Page automatically until `IsTruncated` is false (the same
    /// marker-chasing shape as non-delimiter object listing).
    pub async fn query_all(&self, bucket: &str, expr: &str) -> Result<Vec<ObjectMatch>, S3ClientError> {
        let mut matches = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self.query_page(bucket, expr, marker.as_deref()).await?;
            matches.extend(page.matches);
            if !page.is_truncated {
                break;
            }
            marker = page.next_marker;
            if marker.is_none() {
                break;
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Connection;
    use crate::engine::{TransportBody, TransportError};
    use crate::error::TransportErrorKind;
    use crate::runtime::RuntimeContext;
    use async_trait::async_trait;
    use http::{Request, Response};
    use hyper::Body as HyperBody;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedTransport {
        pages: Vec<Vec<u8>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, _req: Request<TransportBody>) -> Result<Response<HyperBody>, TransportError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::builder()
                .status(200)
                .body(HyperBody::from(self.pages[idx.min(self.pages.len() - 1)].clone()))
                .unwrap())
        }
    }

    #[tokio::test]
    async fn capabilities_parses_metadata_search_list() {
        let runtime = RuntimeContext::new();
        let connection = Arc::new(
            Connection::new("host", "AKID", "secret", "us-east-1", runtime)
                .with_candidate_ips(vec!["1.1.1.1".to_string()]),
        );
        let body = br#"<MetadataSearchList><MetadataSearchEnabled>true</MetadataSearchEnabled></MetadataSearchList>"#.to_vec();
        let transport = Arc::new(ScriptedTransport {
            pages: vec![body],
            calls: AtomicUsize::new(0),
        });
        let ops = MetadataSearchOps::new(connection, transport);
        let caps = ops.capabilities("bucket").await.unwrap();
        assert!(caps.enabled);
    }

    #[tokio::test]
    async fn query_all_pages_until_not_truncated() {
        let runtime = RuntimeContext::new();
        let connection = Arc::new(
            Connection::new("host", "AKID", "secret", "us-east-1", runtime)
                .with_candidate_ips(vec!["1.1.1.1".to_string()]),
        );
        let page1 = br#"<BucketQueryResult><Name>b</Name><IsTruncated>true</IsTruncated><NextMarker>m1</NextMarker>
            <ObjectMatches><object><objectName>a</objectName></object></ObjectMatches></BucketQueryResult>"#.to_vec();
        let page2 = br#"<BucketQueryResult><Name>b</Name><IsTruncated>false</IsTruncated>
            <ObjectMatches><object><objectName>b</objectName></object></ObjectMatches></BucketQueryResult>"#.to_vec();
        let transport = Arc::new(ScriptedTransport {
            pages: vec![page1, page2],
            calls: AtomicUsize::new(0),
        });
        let ops = MetadataSearchOps::new(connection, transport);
        let matches = ops.query_all("bucket", "color==red").await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].object_name, "a");
        assert_eq!(matches[1].object_name, "b");
    }
}
