//! Client SDK for S3-compatible object storage (Dell ECS): request
//! signing (v2/v4, including streaming chunked uploads), session pooling
//! with IP failover, throttling, multipart upload/copy, XML response
//! parsing, and the object/bucket/admin operation surface built on top of
//! all of it.

pub mod body_stream;
pub mod canonical;
pub mod config;
pub mod engine;
pub mod error;
pub mod ip_roster;
pub mod multipart;
pub mod ops;
pub mod runtime;
pub mod session;
pub mod signer;
pub mod throttle;
pub mod xml;

pub use config::Connection;
pub use engine::{HyperTransport, RequestEngine, Transport};
pub use error::{S3ClientError, S3ErrorCode, TransportErrorKind};
pub use runtime::RuntimeContext;

pub use ops::admin::AdminOps;
pub use ops::bucket::BucketOps;
pub use ops::bulk_delete::BulkDeleteAccumulator;
pub use ops::listing::ListingOps;
pub use ops::metadata_search::MetadataSearchOps;
pub use ops::object::ObjectOps;
pub use ops::presign::{presign_get_url, presign_url};
pub use ops::rename::{rename_object, RenameRequest};
