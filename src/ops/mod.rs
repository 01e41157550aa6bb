//! OperationLayer (spec §4.10): object, bucket, listing, bulk-delete,
//! rename, admin, metadata-search and presign operations, each a thin
//! state machine built on top of `engine::RequestEngine`.

pub mod admin;
pub mod bucket;
pub mod bulk_delete;
pub mod listing;
pub mod metadata_search;
pub mod object;
pub mod presign;
pub mod rename;
