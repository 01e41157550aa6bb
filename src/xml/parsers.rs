//! Typed response parsers built on top of `XmlDispatch` (spec §6).

use super::{NodeType, XmlDispatch};
use crate::error::{S3ClientError, S3ErrorCode};

fn text_sink(store: &std::cell::RefCell<String>) -> impl FnMut(&str, NodeType, &[super::XmlAttribute], Option<&str>) -> bool + '_ {
    move |_, nt, _, text| {
        if nt == NodeType::Text {
            if let Some(t) = text {
                store.borrow_mut().push_str(t);
            }
        }
        false
    }
}

// ---------------------------------------------------------------------
// Errors: //Error/{Code,Message,Resource,RequestId}
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct S3ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub resource: Option<String>,
    pub request_id: Option<String>,
}

pub fn parse_error_body(xml: &[u8]) -> Result<S3ErrorBody, S3ClientError> {
    let code = std::cell::RefCell::new(String::new());
    let message = std::cell::RefCell::new(String::new());
    let resource = std::cell::RefCell::new(String::new());
    let request_id = std::cell::RefCell::new(String::new());
    let mut dispatch = XmlDispatch::new();
    dispatch.on("/Error/Code", text_sink(&code));
    dispatch.on("/Error/Message", text_sink(&message));
    dispatch.on("/Error/Resource", text_sink(&resource));
    dispatch.on("/Error/RequestId", text_sink(&request_id));
    dispatch.run(xml)?;
    Ok(S3ErrorBody {
        code: non_empty(code.into_inner()),
        message: non_empty(message.into_inner()),
        resource: non_empty(resource.into_inner()),
        request_id: non_empty(request_id.into_inner()),
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl S3ErrorBody {
    pub fn error_code(&self) -> S3ErrorCode {
        self.code
            .as_deref()
            .map(S3ErrorCode::from_code_str)
            .unwrap_or(S3ErrorCode::Unknown)
    }
}

// ---------------------------------------------------------------------
// Listing: //ListBucketResult and //ListVersionsResult
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ListedObject {
    pub key: String,
    pub last_modified: String,
    pub etag: String,
    pub size: u64,
    pub owner_id: String,
    pub owner_display_name: String,
    /// Populated only for versioned listings.
    pub version_id: Option<String>,
    pub is_latest: Option<bool>,
    pub is_delete_marker: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
    pub next_key_marker: Option<String>,
    pub next_version_id_marker: Option<String>,
    pub objects: Vec<ListedObject>,
    pub common_prefixes: Vec<String>,
}

/// Parse either `<ListBucketResult>` or `<ListVersionsResult>`. The root
/// element name selects versioned vs non-versioned handling.
pub fn parse_listing(xml: &[u8]) -> Result<ListBucketResult, S3ClientError> {
    use std::cell::RefCell;

    let versioned = RefCell::new(false);
    let name = RefCell::new(String::new());
    let prefix = RefCell::new(String::new());
    let is_truncated = RefCell::new(false);
    let next_marker = RefCell::new(None::<String>);
    let next_key_marker = RefCell::new(None::<String>);
    let next_version_id_marker = RefCell::new(None::<String>);
    let common_prefixes = RefCell::new(Vec::<String>::new());
    let objects = RefCell::new(Vec::<ListedObject>::new());
    let current = RefCell::new(ListedObject::default());
    let text_buf = RefCell::new(String::new());

    {
        let mut dispatch = XmlDispatch::new();

        dispatch.on("", |path, _, _, _| {
            if path == "/ListVersionsResult" {
                *versioned.borrow_mut() = true;
            }
            false
        });

        for root in ["ListBucketResult", "ListVersionsResult"] {
            dispatch.on(format!("/{root}/Name"), text_sink(&name));
            dispatch.on(format!("/{root}/Prefix"), text_sink(&prefix));
            dispatch.on(format!("/{root}/IsTruncated"), |_, nt, _, t| {
                if nt == NodeType::Text {
                    *is_truncated.borrow_mut() = t == Some("true");
                }
                false
            });
            dispatch.on(format!("/{root}/NextMarker"), |_, nt, _, t| {
                if nt == NodeType::Text {
                    *next_marker.borrow_mut() = t.map(str::to_string);
                }
                false
            });
            dispatch.on(format!("/{root}/NextKeyMarker"), |_, nt, _, t| {
                if nt == NodeType::Text {
                    *next_key_marker.borrow_mut() = t.map(str::to_string);
                }
                false
            });
            dispatch.on(format!("/{root}/NextVersionIdMarker"), |_, nt, _, t| {
                if nt == NodeType::Text {
                    *next_version_id_marker.borrow_mut() = t.map(str::to_string);
                }
                false
            });
            dispatch.on(format!("/{root}/CommonPrefixes/Prefix"), |_, nt, _, t| {
                if nt == NodeType::Text {
                    if let Some(t) = t {
                        common_prefixes.borrow_mut().push(t.to_string());
                    }
                }
                false
            });

            for (entry, is_marker) in [("Contents", false), ("Version", false), ("DeleteMarker", true)] {
                let entry_path = format!("/{root}/{entry}");
                let current_ref = &current;
                let objects_ref = &objects;
                dispatch.on(entry_path, move |_, nt, _, _| {
                    match nt {
                        NodeType::ElementStart => {
                            *current_ref.borrow_mut() = ListedObject {
                                is_delete_marker: is_marker,
                                ..Default::default()
                            };
                        }
                        NodeType::ElementEnd => {
                            objects_ref.borrow_mut().push(current_ref.borrow().clone());
                        }
                        _ => {}
                    }
                    false
                });
                dispatch.on(format!("/{root}/{entry}/Key"), |_, nt, _, t| {
                    if nt == NodeType::Text {
                        current.borrow_mut().key = t.unwrap_or_default().to_string();
                    }
                    false
                });
                dispatch.on(format!("/{root}/{entry}/LastModified"), |_, nt, _, t| {
                    if nt == NodeType::Text {
                        current.borrow_mut().last_modified = t.unwrap_or_default().to_string();
                    }
                    false
                });
                dispatch.on(format!("/{root}/{entry}/ETag"), |_, nt, _, t| {
                    if nt == NodeType::Text {
                        current.borrow_mut().etag = t.unwrap_or_default().to_string();
                    }
                    false
                });
                dispatch.on(format!("/{root}/{entry}/Size"), |_, nt, _, t| {
                    if nt == NodeType::Text {
                        current.borrow_mut().size = t.unwrap_or_default().parse().unwrap_or(0);
                    }
                    false
                });
                dispatch.on(format!("/{root}/{entry}/VersionId"), |_, nt, _, t| {
                    if nt == NodeType::Text {
                        current.borrow_mut().version_id = t.map(str::to_string);
                    }
                    false
                });
                dispatch.on(format!("/{root}/{entry}/IsLatest"), |_, nt, _, t| {
                    if nt == NodeType::Text {
                        current.borrow_mut().is_latest = t.map(|v| v == "true");
                    }
                    false
                });
                dispatch.on(format!("/{root}/{entry}/Owner/ID"), |_, nt, _, t| {
                    if nt == NodeType::Text {
                        current.borrow_mut().owner_id = t.unwrap_or_default().to_string();
                    }
                    false
                });
                dispatch.on(format!("/{root}/{entry}/Owner/DisplayName"), |_, nt, _, t| {
                    if nt == NodeType::Text {
                        current.borrow_mut().owner_display_name = t.unwrap_or_default().to_string();
                    }
                    false
                });
            }
        }

        dispatch.run(xml)?;
    }
    let _ = text_buf;

    let is_truncated_val = *is_truncated.borrow();
    let objects_val = objects.into_inner();
    let name_val = name.into_inner();
    let prefix_val = prefix.into_inner();

    // A missing prefix with no keys and non-truncated synthesizes
    // NoSuchKey (spec §4.10).
    if objects_val.is_empty() && prefix_val.is_empty() && !is_truncated_val {
        return Err(S3ClientError::http(404, S3ErrorCode::NoSuchKey, None));
    }

    Ok(ListBucketResult {
        name: name_val,
        prefix: prefix_val,
        is_truncated: is_truncated_val,
        next_marker: next_marker.into_inner(),
        next_key_marker: next_key_marker.into_inner(),
        next_version_id_marker: next_version_id_marker.into_inner(),
        objects: objects_val,
        common_prefixes: common_prefixes.into_inner(),
    })
}

// ---------------------------------------------------------------------
// Multipart: Initiate / Complete / CopyPartResult
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

pub fn parse_initiate_multipart(xml: &[u8]) -> Result<InitiateMultipartUploadResult, S3ClientError> {
    use std::cell::RefCell;
    let bucket = RefCell::new(String::new());
    let key = RefCell::new(String::new());
    let upload_id = RefCell::new(String::new());
    let mut dispatch = XmlDispatch::new();
    dispatch.on("/InitiateMultipartUploadResult/Bucket", text_sink(&bucket));
    dispatch.on("/InitiateMultipartUploadResult/Key", text_sink(&key));
    dispatch.on("/InitiateMultipartUploadResult/UploadId", text_sink(&upload_id));
    dispatch.run(xml)?;
    Ok(InitiateMultipartUploadResult {
        bucket: bucket.into_inner(),
        key: key.into_inner(),
        upload_id: upload_id.into_inner(),
    })
}

#[derive(Debug, Clone, Default)]
pub struct CompleteMultipartUploadResult {
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

pub fn parse_complete_multipart(xml: &[u8]) -> Result<CompleteMultipartUploadResult, S3ClientError> {
    use std::cell::RefCell;
    let location = RefCell::new(String::new());
    let bucket = RefCell::new(String::new());
    let key = RefCell::new(String::new());
    let etag = RefCell::new(String::new());
    let mut dispatch = XmlDispatch::new();
    dispatch.on("/CompleteMultipartUploadResult/Location", text_sink(&location));
    dispatch.on("/CompleteMultipartUploadResult/Bucket", text_sink(&bucket));
    dispatch.on("/CompleteMultipartUploadResult/Key", text_sink(&key));
    dispatch.on("/CompleteMultipartUploadResult/ETag", text_sink(&etag));
    dispatch.run(xml)?;
    Ok(CompleteMultipartUploadResult {
        location: location.into_inner(),
        bucket: bucket.into_inner(),
        key: key.into_inner(),
        etag: etag.into_inner(),
    })
}

pub fn parse_copy_part_result(xml: &[u8]) -> Result<String, S3ClientError> {
    use std::cell::RefCell;
    let etag = RefCell::new(String::new());
    let mut dispatch = XmlDispatch::new();
    dispatch.on("/CopyPartResult/ETag", text_sink(&etag));
    dispatch.run(xml)?;
    Ok(etag.into_inner())
}

/// Build the ascending-by-partNumber manifest body for S3MultiPartComplete.
pub fn build_complete_multipart_body(parts: &[(u32, String)]) -> String {
    let mut sorted = parts.to_vec();
    sorted.sort_by_key(|(n, _)| *n);
    let mut body = String::from("<CompleteMultipartUpload>");
    for (number, etag) in sorted {
        body.push_str(&format!(
            "<Part><PartNumber>{number}</PartNumber><ETag>{}</ETag></Part>",
            xml_escape(&etag)
        ));
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

// ---------------------------------------------------------------------
// Bulk delete: //DeleteResult/Error/*
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DeleteResultError {
    pub code: String,
    pub message: String,
    pub key: String,
    pub request_id: String,
    pub host_id: String,
}

pub fn parse_delete_result_errors(xml: &[u8]) -> Result<Vec<DeleteResultError>, S3ClientError> {
    use std::cell::RefCell;
    let errors = RefCell::new(Vec::<DeleteResultError>::new());
    let current = RefCell::new(DeleteResultError::default());
    let mut dispatch = XmlDispatch::new();
    dispatch.on("/DeleteResult/Error", |path, nt, _, _| {
        if path == "/DeleteResult/Error" {
            match nt {
                NodeType::ElementStart => *current.borrow_mut() = DeleteResultError::default(),
                NodeType::ElementEnd => errors.borrow_mut().push(current.borrow().clone()),
                _ => {}
            }
        }
        false
    });
    dispatch.on("/DeleteResult/Error/Code", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().code = t.unwrap_or_default().to_string();
        }
        false
    });
    dispatch.on("/DeleteResult/Error/Message", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().message = t.unwrap_or_default().to_string();
        }
        false
    });
    dispatch.on("/DeleteResult/Error/Key", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().key = t.unwrap_or_default().to_string();
        }
        false
    });
    dispatch.on("/DeleteResult/Error/RequestId", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().request_id = t.unwrap_or_default().to_string();
        }
        false
    });
    dispatch.on("/DeleteResult/Error/HostId", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().host_id = t.unwrap_or_default().to_string();
        }
        false
    });
    dispatch.run(xml)?;
    Ok(errors.into_inner())
}

/// Build the bulk-delete request body: sorted-unique keys, always
/// `<Quiet>true</Quiet>` (spec §4.10).
pub fn build_bulk_delete_body(keys: &[String]) -> String {
    let mut sorted: Vec<&String> = keys.iter().collect();
    sorted.sort();
    sorted.dedup();
    let mut body = String::from("<Delete><Quiet>true</Quiet>");
    for key in sorted {
        body.push_str(&format!("<Object><Key>{}</Key></Object>", xml_escape(key)));
    }
    body.push_str("</Delete>");
    body
}

// ---------------------------------------------------------------------
// ACL: //AccessControlPolicy/AccessControlList/Grant/*
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Grant {
    pub grantee_type: String,
    pub id: Option<String>,
    pub uri: Option<String>,
    pub display_name: Option<String>,
    pub permission: String,
}

pub fn parse_acl(xml: &[u8]) -> Result<Vec<Grant>, S3ClientError> {
    use std::cell::RefCell;
    let grants = RefCell::new(Vec::<Grant>::new());
    let current = RefCell::new(Grant::default());
    let mut dispatch = XmlDispatch::new();
    dispatch.on(
        "/AccessControlPolicy/AccessControlList/Grant",
        |path, nt, _, _| {
            if path == "/AccessControlPolicy/AccessControlList/Grant" {
                match nt {
                    NodeType::ElementStart => *current.borrow_mut() = Grant::default(),
                    NodeType::ElementEnd => grants.borrow_mut().push(current.borrow().clone()),
                    _ => {}
                }
            }
            false
        },
    );
    dispatch.on(
        "/AccessControlPolicy/AccessControlList/Grant/Grantee",
        |path, nt, attrs, _| {
            if path == "/AccessControlPolicy/AccessControlList/Grant/Grantee" && nt == NodeType::ElementStart {
                if let Some(a) = attrs.iter().find(|a| a.name == "type" || a.name.ends_with(":type")) {
                    current.borrow_mut().grantee_type = a.value.clone();
                }
            }
            false
        },
    );
    dispatch.on(
        "/AccessControlPolicy/AccessControlList/Grant/Grantee/ID",
        |_, nt, _, t| {
            if nt == NodeType::Text {
                current.borrow_mut().id = t.map(str::to_string);
            }
            false
        },
    );
    dispatch.on(
        "/AccessControlPolicy/AccessControlList/Grant/Grantee/URI",
        |_, nt, _, t| {
            if nt == NodeType::Text {
                current.borrow_mut().uri = t.map(str::to_string);
            }
            false
        },
    );
    dispatch.on(
        "/AccessControlPolicy/AccessControlList/Grant/Grantee/DisplayName",
        |_, nt, _, t| {
            if nt == NodeType::Text {
                current.borrow_mut().display_name = t.map(str::to_string);
            }
            false
        },
    );
    dispatch.on(
        "/AccessControlPolicy/AccessControlList/Grant/Permission",
        |_, nt, _, t| {
            if nt == NodeType::Text {
                current.borrow_mut().permission = t.unwrap_or_default().to_string();
            }
            false
        },
    );
    dispatch.run(xml)?;
    Ok(grants.into_inner())
}

// ---------------------------------------------------------------------
// Versioning: //VersioningConfiguration/Status
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersioningStatus {
    Enabled,
    Suspended,
}

pub fn parse_versioning_status(xml: &[u8]) -> Result<Option<VersioningStatus>, S3ClientError> {
    use std::cell::RefCell;
    let status = RefCell::new(String::new());
    let mut dispatch = XmlDispatch::new();
    dispatch.on("/VersioningConfiguration/Status", text_sink(&status));
    dispatch.run(xml)?;
    Ok(match status.into_inner().as_str() {
        "Enabled" => Some(VersioningStatus::Enabled),
        "Suspended" => Some(VersioningStatus::Suspended),
        _ => None,
    })
}

// ---------------------------------------------------------------------
// Lifecycle: //LifecycleConfiguration/Rule/*
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct LifecycleRule {
    pub id: Option<String>,
    pub prefix: Option<String>,
    pub status: Option<String>,
    pub expiration_days: Option<u32>,
    pub expiration_date: Option<String>,
    pub expired_object_delete_marker: Option<bool>,
    pub noncurrent_version_expiration_days: Option<u32>,
    pub abort_incomplete_multipart_days: Option<u32>,
}

pub fn parse_lifecycle(xml: &[u8]) -> Result<Vec<LifecycleRule>, S3ClientError> {
    use std::cell::RefCell;
    let rules = RefCell::new(Vec::<LifecycleRule>::new());
    let current = RefCell::new(LifecycleRule::default());
    let mut dispatch = XmlDispatch::new();
    dispatch.on("/LifecycleConfiguration/Rule", |path, nt, _, _| {
        if path == "/LifecycleConfiguration/Rule" {
            match nt {
                NodeType::ElementStart => *current.borrow_mut() = LifecycleRule::default(),
                NodeType::ElementEnd => rules.borrow_mut().push(current.borrow().clone()),
                _ => {}
            }
        }
        false
    });
    dispatch.on("/LifecycleConfiguration/Rule/ID", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().id = t.map(str::to_string);
        }
        false
    });
    dispatch.on("/LifecycleConfiguration/Rule/Prefix", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().prefix = t.map(str::to_string);
        }
        false
    });
    dispatch.on("/LifecycleConfiguration/Rule/Status", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().status = t.map(str::to_string);
        }
        false
    });
    dispatch.on("/LifecycleConfiguration/Rule/Expiration/Days", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().expiration_days = t.and_then(|v| v.parse().ok());
        }
        false
    });
    dispatch.on("/LifecycleConfiguration/Rule/Expiration/Date", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().expiration_date = t.map(str::to_string);
        }
        false
    });
    dispatch.on(
        "/LifecycleConfiguration/Rule/Expiration/ExpiredObjectDeleteMarker",
        |_, nt, _, t| {
            if nt == NodeType::Text {
                current.borrow_mut().expired_object_delete_marker = t.map(|v| v == "true");
            }
            false
        },
    );
    dispatch.on(
        "/LifecycleConfiguration/Rule/NoncurrentVersionExpiration/NoncurrentDays",
        |_, nt, _, t| {
            if nt == NodeType::Text {
                current.borrow_mut().noncurrent_version_expiration_days = t.and_then(|v| v.parse().ok());
            }
            false
        },
    );
    dispatch.on(
        "/LifecycleConfiguration/Rule/AbortIncompleteMultipartUpload/DaysAfterInitiation",
        |_, nt, _, t| {
            if nt == NodeType::Text {
                current.borrow_mut().abort_incomplete_multipart_days = t.and_then(|v| v.parse().ok());
            }
            false
        },
    );
    dispatch.run(xml)?;
    Ok(rules.into_inner())
}

// ---------------------------------------------------------------------
// Metadata search: //MetadataSearchList/*
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MetadataSearchKey {
    pub name: String,
    pub datatype: String,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataSearchCapabilities {
    pub enabled: bool,
    pub optional_attributes: Vec<MetadataSearchKey>,
    pub indexable_keys: Vec<MetadataSearchKey>,
}

pub fn parse_metadata_search_list(xml: &[u8]) -> Result<MetadataSearchCapabilities, S3ClientError> {
    use std::cell::RefCell;
    let enabled = RefCell::new(false);
    let optional = RefCell::new(Vec::<MetadataSearchKey>::new());
    let indexable = RefCell::new(Vec::<MetadataSearchKey>::new());
    let current = RefCell::new(MetadataSearchKey::default());

    let mut dispatch = XmlDispatch::new();
    dispatch.on("/MetadataSearchList/MetadataSearchEnabled", |_, nt, _, t| {
        if nt == NodeType::Text {
            *enabled.borrow_mut() = t == Some("true");
        }
        false
    });
    for (section, bucket) in [
        ("OptionalAttributes/Attribute", &optional),
        ("IndexableKeys/Key", &indexable),
    ] {
        let path = format!("/MetadataSearchList/{section}");
        let current_ref = &current;
        dispatch.on(path.clone(), move |_, nt, _, _| {
            match nt {
                NodeType::ElementStart => *current_ref.borrow_mut() = MetadataSearchKey::default(),
                NodeType::ElementEnd => bucket.borrow_mut().push(current_ref.borrow().clone()),
                _ => {}
            }
            false
        });
        dispatch.on(format!("{path}/Name"), |_, nt, _, t| {
            if nt == NodeType::Text {
                current.borrow_mut().name = t.unwrap_or_default().to_string();
            }
            false
        });
        dispatch.on(format!("{path}/Datatype"), |_, nt, _, t| {
            if nt == NodeType::Text {
                current.borrow_mut().datatype = t.unwrap_or_default().to_string();
            }
            false
        });
    }
    dispatch.run(xml)?;
    Ok(MetadataSearchCapabilities {
        enabled: enabled.into_inner(),
        optional_attributes: optional.into_inner(),
        indexable_keys: indexable.into_inner(),
    })
}

// ---------------------------------------------------------------------
// Metadata-search query: //BucketQueryResult/*
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MdEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectMatch {
    pub object_name: String,
    pub object_id: String,
    pub version_id: String,
    pub sysmd: Vec<MdEntry>,
    pub usermd: Vec<MdEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct BucketQueryResult {
    pub name: String,
    pub next_marker: Option<String>,
    pub is_truncated: bool,
    pub matches: Vec<ObjectMatch>,
}

pub fn parse_bucket_query_result(xml: &[u8]) -> Result<BucketQueryResult, S3ClientError> {
    use std::cell::RefCell;
    let name = RefCell::new(String::new());
    let next_marker = RefCell::new(None::<String>);
    let is_truncated = RefCell::new(false);
    let matches = RefCell::new(Vec::<ObjectMatch>::new());
    let current = RefCell::new(ObjectMatch::default());
    let current_md_type = RefCell::new(String::new());
    let current_entry = RefCell::new(MdEntry::default());

    let mut dispatch = XmlDispatch::new();
    dispatch.on("/BucketQueryResult/Name", text_sink(&name));
    dispatch.on("/BucketQueryResult/IsTruncated", |_, nt, _, t| {
        if nt == NodeType::Text {
            *is_truncated.borrow_mut() = t == Some("true");
        }
        false
    });
    dispatch.on("/BucketQueryResult/NextMarker", |_, nt, _, t| {
        if nt == NodeType::Text {
            *next_marker.borrow_mut() = t.map(str::to_string);
        }
        false
    });
    dispatch.on("/BucketQueryResult/ObjectMatches/object", |path, nt, _, _| {
        if path == "/BucketQueryResult/ObjectMatches/object" {
            match nt {
                NodeType::ElementStart => *current.borrow_mut() = ObjectMatch::default(),
                NodeType::ElementEnd => matches.borrow_mut().push(current.borrow().clone()),
                _ => {}
            }
        }
        false
    });
    dispatch.on("/BucketQueryResult/ObjectMatches/object/objectName", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().object_name = t.unwrap_or_default().to_string();
        }
        false
    });
    dispatch.on("/BucketQueryResult/ObjectMatches/object/objectId", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().object_id = t.unwrap_or_default().to_string();
        }
        false
    });
    dispatch.on("/BucketQueryResult/ObjectMatches/object/versionId", |_, nt, _, t| {
        if nt == NodeType::Text {
            current.borrow_mut().version_id = t.unwrap_or_default().to_string();
        }
        false
    });
    let qmd = "/BucketQueryResult/ObjectMatches/object/queryMds";
    dispatch.on(format!("{qmd}/type"), |_, nt, _, t| {
        if nt == NodeType::Text {
            *current_md_type.borrow_mut() = t.unwrap_or_default().to_string();
        }
        false
    });
    dispatch.on(format!("{qmd}/mdMap/entry"), |path, nt, _, _| {
        if path == format!("{qmd}/mdMap/entry") {
            match nt {
                NodeType::ElementStart => *current_entry.borrow_mut() = MdEntry::default(),
                NodeType::ElementEnd => {
                    let entry = current_entry.borrow().clone();
                    match current_md_type.borrow().as_str() {
                        "SYSMD" => current.borrow_mut().sysmd.push(entry),
                        _ => current.borrow_mut().usermd.push(entry),
                    }
                }
                _ => {}
            }
        }
        false
    });
    dispatch.on(format!("{qmd}/mdMap/entry/key"), |_, nt, _, t| {
        if nt == NodeType::Text {
            current_entry.borrow_mut().key = t.unwrap_or_default().to_string();
        }
        false
    });
    dispatch.on(format!("{qmd}/mdMap/entry/value"), |_, nt, _, t| {
        if nt == NodeType::Text {
            current_entry.borrow_mut().value = t.unwrap_or_default().to_string();
        }
        false
    });
    dispatch.run(xml)?;

    Ok(BucketQueryResult {
        name: name.into_inner(),
        next_marker: next_marker.into_inner(),
        is_truncated: is_truncated.into_inner(),
        matches: matches.into_inner(),
    })
}

// ---------------------------------------------------------------------
// ECS admin errors: //error/{code,description,details,retryable}
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AdminErrorBody {
    pub code: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub retryable: bool,
}

pub fn parse_admin_error_body(xml: &[u8]) -> Result<AdminErrorBody, S3ClientError> {
    use std::cell::RefCell;
    let code = RefCell::new(String::new());
    let description = RefCell::new(String::new());
    let details = RefCell::new(String::new());
    let retryable = RefCell::new(false);
    let mut dispatch = XmlDispatch::new();
    dispatch.on("/error/code", text_sink(&code));
    dispatch.on("/error/description", text_sink(&description));
    dispatch.on("/error/details", text_sink(&details));
    dispatch.on("/error/retryable", |_, nt, _, t| {
        if nt == NodeType::Text {
            *retryable.borrow_mut() = t == Some("true");
        }
        false
    });
    dispatch.run(xml)?;
    Ok(AdminErrorBody {
        code: non_empty(code.into_inner()),
        description: non_empty(description.into_inner()),
        details: non_empty(details.into_inner()),
        retryable: retryable.into_inner(),
    })
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_error_body() {
        let xml = br#"<Error><Code>NoSuchBucket</Code><Message>nope</Message><Resource>/b</Resource><RequestId>rid</RequestId></Error>"#;
        let e = parse_error_body(xml).unwrap();
        assert_eq!(e.error_code(), S3ErrorCode::NoSuchBucket);
        assert_eq!(e.request_id.as_deref(), Some("rid"));
    }

    #[test]
    fn parses_listing_with_common_prefixes() {
        let xml = br#"<ListBucketResult>
            <Name>b</Name><Prefix>p/</Prefix><IsTruncated>false</IsTruncated>
            <Contents><Key>p/a</Key><LastModified>t</LastModified><ETag>"x"</ETag><Size>10</Size>
                <Owner><ID>o1</ID><DisplayName>me</DisplayName></Owner></Contents>
            <CommonPrefixes><Prefix>p/dir/</Prefix></CommonPrefixes>
        </ListBucketResult>"#;
        let r = parse_listing(xml).unwrap();
        assert_eq!(r.name, "b");
        assert_eq!(r.objects.len(), 1);
        assert_eq!(r.objects[0].key, "p/a");
        assert_eq!(r.objects[0].size, 10);
        assert_eq!(r.common_prefixes, vec!["p/dir/".to_string()]);
        assert!(!r.is_truncated);
    }

    #[test]
    fn empty_nontruncated_listing_without_prefix_is_nosuchkey() {
        let xml = br#"<ListBucketResult><Name>b</Name><IsTruncated>false</IsTruncated></ListBucketResult>"#;
        let err = parse_listing(xml).unwrap_err();
        assert!(matches!(
            err,
            S3ClientError::Http { code: S3ErrorCode::NoSuchKey, .. }
        ));
    }

    #[test]
    fn parses_versioned_listing() {
        let xml = br#"<ListVersionsResult>
            <Name>b</Name>
            <Version><Key>k</Key><VersionId>v1</VersionId><IsLatest>true</IsLatest><ETag>"e"</ETag><Size>1</Size></Version>
            <DeleteMarker><Key>k2</Key><VersionId>v2</VersionId><IsLatest>true</IsLatest></DeleteMarker>
        </ListVersionsResult>"#;
        let r = parse_listing(xml).unwrap();
        assert_eq!(r.objects.len(), 2);
        assert_eq!(r.objects[0].version_id.as_deref(), Some("v1"));
        assert!(r.objects[1].is_delete_marker);
    }

    #[test]
    fn builds_bulk_delete_body_sorted_unique() {
        let body = build_bulk_delete_body(&["b".into(), "a".into(), "a".into()]);
        assert_eq!(
            body,
            "<Delete><Quiet>true</Quiet><Object><Key>a</Key></Object><Object><Key>b</Key></Object></Delete>"
        );
    }

    #[test]
    fn parses_delete_result_errors() {
        let xml = br#"<DeleteResult><Error><Code>AccessDenied</Code><Key>k</Key></Error></DeleteResult>"#;
        let errs = parse_delete_result_errors(xml).unwrap();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].code, "AccessDenied");
    }

    #[test]
    fn builds_complete_multipart_body_ascending() {
        let body = build_complete_multipart_body(&[(2, "e2".into()), (1, "e1".into())]);
        assert!(body.find("PartNumber>1<").unwrap() < body.find("PartNumber>2<").unwrap());
    }

    #[test]
    fn parses_acl_with_grantee_type() {
        let xml = br#"<AccessControlPolicy><AccessControlList>
            <Grant><Grantee type="CanonicalUser"><ID>abc</ID></Grantee><Permission>FULL_CONTROL</Permission></Grant>
        </AccessControlList></AccessControlPolicy>"#;
        let grants = parse_acl(xml).unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].grantee_type, "CanonicalUser");
        assert_eq!(grants[0].id.as_deref(), Some("abc"));
    }

    #[test]
    fn parses_lifecycle_rule() {
        let xml = br#"<LifecycleConfiguration><Rule>
            <ID>r1</ID><Prefix>logs/</Prefix><Status>Enabled</Status>
            <Expiration><Days>30</Days></Expiration>
        </Rule></LifecycleConfiguration>"#;
        let rules = parse_lifecycle(xml).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].expiration_days, Some(30));
    }

    #[test]
    fn parses_metadata_search_list() {
        let xml = br#"<MetadataSearchList><MetadataSearchEnabled>true</MetadataSearchEnabled>
            <IndexableKeys><Key><Name>k1</Name><Datatype>String</Datatype></Key></IndexableKeys>
        </MetadataSearchList>"#;
        let caps = parse_metadata_search_list(xml).unwrap();
        assert!(caps.enabled);
        assert_eq!(caps.indexable_keys.len(), 1);
        assert_eq!(caps.indexable_keys[0].datatype, "String");
    }

    #[test]
    fn parses_bucket_query_result() {
        let xml = br#"<BucketQueryResult><Name>b</Name><IsTruncated>false</IsTruncated>
            <ObjectMatches><object><objectName>k</objectName><objectId>id</objectId>
                <queryMds><type>USERMD</type><mdMap><entry><key>color</key><value>red</value></entry></mdMap></queryMds>
            </object></ObjectMatches>
        </BucketQueryResult>"#;
        let r = parse_bucket_query_result(xml).unwrap();
        assert_eq!(r.matches.len(), 1);
        assert_eq!(r.matches[0].usermd[0].key, "color");
    }

    #[test]
    fn parses_admin_error_body_lowercase_casing() {
        let xml = br#"<error><code>1004</code><description>bad request</description><retryable>false</retryable></error>"#;
        let body = parse_admin_error_body(xml).unwrap();
        assert_eq!(body.code.as_deref(), Some("1004"));
        assert_eq!(body.description.as_deref(), Some("bad request"));
        assert!(!body.retryable);
    }
}
