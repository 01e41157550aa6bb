//! Bucket listing: non-versioned (`ListBucketResult`) and versioned
//! (`ListVersionsResult`) flavors, each pageable one-at-a-time or
//! automatically to completion (spec §4.10 "Listing").

use std::collections::HashSet;
use std::sync::Arc;

use crate::canonical::HeaderMap as CanonicalHeaders;
use crate::config::Connection;
use crate::engine::{DownloadSink, RequestEngine, RequestSpec, Transport, UploadBody};
use crate::error::S3ClientError;
use crate::xml::parsers::{self, ListBucketResult, ListedObject};

/// One page's worth of listing parameters. `delimiter` defaults to `/`;
/// pass `Some("")` to disable delimiter folding.
#[derive(Debug, Clone, Default)]
pub struct ListPageRequest {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
    pub marker: Option<String>,
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
}

pub struct ListingOps {
    connection: Arc<Connection>,
    transport: Arc<dyn Transport>,
}

fn bucket_path(bucket: &str) -> String {
    format!("/{bucket}/")
}

fn build_query(req: &ListPageRequest, versions: bool) -> String {
    let mut terms: Vec<String> = Vec::new();
    if versions {
        terms.push("versions".to_string());
    }
    if let Some(p) = &req.prefix {
        terms.push(format!("prefix={}", encode(p)));
    }
    let delim = req.delimiter.clone().unwrap_or_else(|| "/".to_string());
    if !delim.is_empty() {
        terms.push(format!("delimiter={}", encode(&delim)));
    }
    if let Some(mk) = req.max_keys {
        terms.push(format!("max-keys={mk}"));
    }
    if versions {
        if let Some(km) = &req.key_marker {
            terms.push(format!("key-marker={}", encode(km)));
        }
        if let Some(vm) = &req.version_id_marker {
            terms.push(format!("version-id-marker={}", encode(vm)));
        }
    } else if let Some(m) = &req.marker {
        terms.push(format!("marker={}", encode(m)));
    }
    terms.join("&")
}

fn encode(s: &str) -> String {
    crate::canonical::uri_encode(s, crate::canonical::EncodingProfile::AllSafe)
}

impl ListingOps {
    pub fn new(connection: Arc<Connection>, transport: Arc<dyn Transport>) -> Self {
        Self { connection, transport }
    }

    fn engine(&self) -> RequestEngine {
        RequestEngine::new(self.connection.clone(), self.transport.clone())
    }

    async fn fetch_page(&self, bucket: &str, req: &ListPageRequest, versions: bool) -> Result<ListBucketResult, S3ClientError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            resource_path: bucket_path(bucket),
            raw_query: build_query(req, versions),
            headers: CanonicalHeaders::new(),
            upload: UploadBody::Empty,
            download: DownloadSink::Buffer,
            admin_mode: false,
        };
        let outcome = self.engine().execute(spec).await?;
        let body = outcome.body.unwrap_or_default();
        parsers::parse_listing(&body)
    }

    /// Fetch exactly one page of a non-versioned listing.
    pub async fn list_page(&self, bucket: &str, req: ListPageRequest) -> Result<ListBucketResult, S3ClientError> {
        self.fetch_page(bucket, &req, false).await
    }

    /// Fetch exactly one page of a versioned listing.
    pub async fn list_versions_page(&self, bucket: &str, req: ListPageRequest) -> Result<ListBucketResult, S3ClientError> {
        self.fetch_page(bucket, &req, true).await
    }

    /// Page automatically until `IsTruncated` is false, suppressing
    /// duplicate keys across pages (spec §4.10, testable property 4).
    pub async fn list_all(&self, bucket: &str, prefix: Option<String>, delimiter: Option<String>) -> Result<Vec<ListedObject>, S3ClientError> {
        let mut seen = HashSet::new();
        let mut objects = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let req = ListPageRequest {
                prefix: prefix.clone(),
                delimiter: delimiter.clone(),
                marker: marker.clone(),
                ..Default::default()
            };
            let page = match self.list_page(bucket, req).await {
                Ok(page) => page,
                Err(S3ClientError::Http { code, .. }) if code == crate::error::S3ErrorCode::NoSuchKey && objects.is_empty() => {
                    return Ok(objects);
                }
                Err(e) => return Err(e),
            };
            for obj in page.objects {
                if seen.insert(obj.key.clone()) {
                    objects.push(obj);
                }
            }
            if !page.is_truncated {
                break;
            }
            marker = page.next_marker.or_else(|| objects.last().map(|o| o.key.clone()));
            if marker.is_none() {
                break;
            }
        }
        Ok(objects)
    }

    /// Page automatically over a versioned listing until non-truncated.
    pub async fn list_all_versions(&self, bucket: &str, prefix: Option<String>) -> Result<Vec<ListedObject>, S3ClientError> {
        let mut seen = HashSet::new();
        let mut objects = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;
        loop {
            let req = ListPageRequest {
                prefix: prefix.clone(),
                key_marker: key_marker.clone(),
                version_id_marker: version_id_marker.clone(),
                ..Default::default()
            };
            let page = match self.list_versions_page(bucket, req).await {
                Ok(page) => page,
                Err(S3ClientError::Http { code, .. }) if code == crate::error::S3ErrorCode::NoSuchKey && objects.is_empty() => {
                    return Ok(objects);
                }
                Err(e) => return Err(e),
            };
            for obj in page.objects {
                let dedup_key = format!("{}\0{}", obj.key, obj.version_id.as_deref().unwrap_or(""));
                if seen.insert(dedup_key) {
                    objects.push(obj);
                }
            }
            if !page.is_truncated {
                break;
            }
            key_marker = page.next_key_marker;
            version_id_marker = page.next_version_id_marker;
            if key_marker.is_none() {
                break;
            }
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_includes_versions_flag_and_markers() {
        let req = ListPageRequest {
            key_marker: Some("k".to_string()),
            version_id_marker: Some("v".to_string()),
            ..Default::default()
        };
        let q = build_query(&req, true);
        assert!(q.contains("versions"));
        assert!(q.contains("key-marker=k"));
        assert!(q.contains("version-id-marker=v"));
    }

    #[test]
    fn query_defaults_delimiter_to_slash() {
        let q = build_query(&ListPageRequest::default(), false);
        assert!(q.contains("delimiter=%2F") || q.contains("delimiter=/"));
    }

    #[test]
    fn disabled_delimiter_omits_param() {
        let req = ListPageRequest {
            delimiter: Some(String::new()),
            ..Default::default()
        };
        let q = build_query(&req, false);
        assert!(!q.contains("delimiter"));
    }
}
