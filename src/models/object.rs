//! Object versions as stored in SQLite and as seen by the service layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Version id reported for entries written while a bucket was unversioned or
/// suspended.
pub const NULL_VERSION_ID: &str = "null";

/// One row of `object_versions`.
///
/// Rows are ordered per key by `seq`, which grows with every insert; the row
/// with the highest `seq` for a key is that key's current entry.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectVersionRow {
    /// Creation order across the whole store.
    pub seq: i64,

    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Client-visible version id, or `"null"`.
    pub version_id: String,

    pub is_delete_marker: bool,

    /// Name of the payload file; absent for delete markers.
    pub payload_id: Option<Uuid>,

    pub content_type: Option<String>,

    pub size_bytes: i64,

    /// Hex MD5 of the payload, or the multipart composite tag.
    pub etag: Option<String>,

    pub storage_class: String,

    pub owner_id: Uuid,

    pub last_modified: DateTime<Utc>,
}

/// Payload description of a content entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectContent {
    pub payload_id: Uuid,
    pub etag: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub storage_class: String,
}

/// What a version entry holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Content(ObjectContent),
    DeleteMarker,
}

/// A single entry of a key's version history.
#[derive(Clone, Debug)]
pub struct VersionEntry {
    pub row_id: Uuid,
    pub seq: i64,
    pub key: String,
    pub version_id: String,
    pub owner_id: Uuid,
    pub last_modified: DateTime<Utc>,
    pub kind: EntryKind,
}

impl VersionEntry {
    pub fn is_delete_marker(&self) -> bool {
        matches!(self.kind, EntryKind::DeleteMarker)
    }

    pub fn content(&self) -> Option<&ObjectContent> {
        match &self.kind {
            EntryKind::Content(content) => Some(content),
            EntryKind::DeleteMarker => None,
        }
    }

    pub fn payload_id(&self) -> Option<Uuid> {
        self.content().map(|c| c.payload_id)
    }
}

/// A readable object version together with its user metadata.
#[derive(Clone, Debug)]
pub struct StoredObject {
    /// Row id of the version entry; owns its metadata and tag rows.
    pub row_id: Uuid,
    pub key: String,
    pub version_id: String,
    pub owner_id: Uuid,
    pub last_modified: DateTime<Utc>,
    pub content: ObjectContent,

    /// `x-amz-meta-*` pairs, names without the prefix.
    pub metadata: Vec<(String, String)>,

    /// Number of tags on this version, reported as `x-amz-tagging-count`.
    pub tag_count: i64,

    /// True when the owning bucket is not `Unversioned`; the version id is
    /// reported to clients only then.
    pub versioned: bool,
}

impl StoredObject {
    /// Version id as reported on the wire.
    pub fn reported_version_id(&self) -> Option<&str> {
        self.versioned.then_some(self.version_id.as_str())
    }
}
