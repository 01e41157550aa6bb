//! Rename: HEAD source, COPY (single or multipart by size), re-apply the
//! source ACL, then DELETE the source unless the caller asked to keep it
//! (spec §4.10 "Rename").

use std::sync::Arc;

use crate::config::Connection;
use crate::engine::Transport;
use crate::error::S3ClientError;
use crate::ops::bucket::BucketOps;
use crate::ops::object::ObjectOps;

pub struct RenameRequest<'a> {
    pub source_bucket: &'a str,
    pub source_key: &'a str,
    pub dest_bucket: &'a str,
    pub dest_key: &'a str,
    /// Keep the source object instead of deleting it after a successful
    /// copy (the spec's `bCopy` flag).
    pub keep_source: bool,
}

/// Rename (or copy, if `keep_source` is set) an object, carrying its ACL
/// across the move. Metadata is always read from the source's HEAD
/// response; COPY re-applies it implicitly by copying headers through
/// (the S3 COPY directive defaults to `COPY` metadata-directive).
pub async fn rename_object(
    connection: Arc<Connection>,
    transport: Arc<dyn Transport>,
    req: RenameRequest<'_>,
) -> Result<String, S3ClientError> {
    let objects = ObjectOps::new(connection.clone(), transport.clone());
    let buckets = BucketOps::new(connection.clone(), transport.clone());

    let source_headers = objects.head_object(req.source_bucket, req.source_key).await?;
    let content_length: u64 = source_headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let source_acl = buckets.get_acl(req.source_bucket, Some(req.source_key)).await.ok();

    let etag = objects
        .copy_object(req.dest_bucket, req.dest_key, req.source_bucket, req.source_key, content_length)
        .await?;

    if let Some(grants) = source_acl {
        if !grants.is_empty() {
            let acl_xml = build_acl_xml(&grants);
            buckets
                .put_acl(req.dest_bucket, Some(req.dest_key), acl_xml)
                .await
                .ok();
        }
    }

    if !req.keep_source {
        objects.delete_object(req.source_bucket, req.source_key).await?;
    }

    Ok(etag)
}

fn build_acl_xml(grants: &[crate::xml::parsers::Grant]) -> String {
    let mut body = String::from(
        r#"<AccessControlPolicy><AccessControlList>"#,
    );
    for g in grants {
        body.push_str("<Grant><Grantee xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:type=\"");
        body.push_str(&g.grantee_type);
        body.push_str("\">");
        if let Some(id) = &g.id {
            body.push_str(&format!("<ID>{id}</ID>"));
        }
        if let Some(uri) = &g.uri {
            body.push_str(&format!("<URI>{uri}</URI>"));
        }
        if let Some(name) = &g.display_name {
            body.push_str(&format!("<DisplayName>{name}</DisplayName>"));
        }
        body.push_str("</Grantee>");
        body.push_str(&format!("<Permission>{}</Permission></Grant>", g.permission));
    }
    body.push_str("</AccessControlList></AccessControlPolicy>");
    body
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

    struct ScriptedTransport {
        responses: Vec<(u16, Vec<u8>, Vec<(&'static str, &'static str)>)>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, _req: Request<TransportBody>) -> Result<Response<HyperBody>, TransportError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let (status, body, headers) = &self.responses[idx.min(self.responses.len() - 1)];
            let mut builder = Response::builder().status(*status);
            for (name, value) in headers {
                builder = builder.header(*name, *value);
            }
            Ok(builder.body(HyperBody::from(body.clone())).unwrap())
        }
    }

    #[tokio::test]
    async fn rename_carries_acl_and_deletes_source_by_default() {
        let runtime = RuntimeContext::new();
        let connection = Arc::new(
            Connection::new("host", "AKID", "secret", "us-east-1", runtime)
                .with_candidate_ips(vec!["1.1.1.1".to_string()]),
        );
        let acl_xml = br#"<AccessControlPolicy><AccessControlList><Grant><Grantee xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="CanonicalUser"><ID>owner</ID></Grantee><Permission>FULL_CONTROL</Permission></Grant></AccessControlList></AccessControlPolicy>"#.to_vec();
        let transport = Arc::new(ScriptedTransport {
            responses: vec![
                (200, Vec::new(), vec![("content-length", "100")]), // HEAD source
                (200, acl_xml, vec![]),                             // GET ?acl on source
                (200, Vec::new(), vec![("etag", "\"dest-etag\"")]), // PUT copy
                (200, Vec::new(), vec![]),                          // PUT ?acl on dest
                (200, Vec::new(), vec![]),                          // DELETE source
            ],
            calls: AtomicUsize::new(0),
        });

        let etag = rename_object(
            connection,
            transport.clone(),
            RenameRequest {
                source_bucket: "src",
                source_key: "a",
                dest_bucket: "dst",
                dest_key: "b",
                keep_source: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(etag, "\"dest-etag\"");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn rename_keeps_source_when_requested() {
        let runtime = RuntimeContext::new();
        let connection = Arc::new(
            Connection::new("host", "AKID", "secret", "us-east-1", runtime)
                .with_candidate_ips(vec!["1.1.1.1".to_string()]),
        );
        let transport = Arc::new(ScriptedTransport {
            responses: vec![
                (200, Vec::new(), vec![("content-length", "10")]),
                (200, b"<AccessControlPolicy><AccessControlList></AccessControlList></AccessControlPolicy>".to_vec(), vec![]),
                (200, Vec::new(), vec![("etag", "\"e\"")]),
            ],
            calls: AtomicUsize::new(0),
        });

        rename_object(
            connection,
            transport.clone(),
            RenameRequest {
                source_bucket: "src",
                source_key: "a",
                dest_bucket: "dst",
                dest_key: "b",
                keep_source: true,
            },
        )
        .await
        .unwrap();

        // No ACL re-apply (empty grants) and no DELETE call: 3 calls total.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }
}
