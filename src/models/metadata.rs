//! Key/value rows hanging off a version entry or a pending upload.
//!
//! `object_id` points at either an `object_versions.id` or a
//! `multipart_uploads.id`; the rows carry no foreign key so the same tables
//! serve both owners. Whoever deletes the owner deletes these rows in the
//! same transaction.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One `x-amz-meta-*` pair, stored with the prefix stripped and the name
/// lowercased.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectMetadata {
    pub id: Uuid,
    pub object_id: Uuid,
    pub key: String,
    pub value: String,
}

/// One object tag. Keys are unique per owner.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectTag {
    pub id: Uuid,
    pub object_id: Uuid,
    pub key: String,
    pub value: String,
}
