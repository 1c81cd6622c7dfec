//! Pending multipart uploads and their staged parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An upload between `CreateMultipartUpload` and complete/abort.
///
/// `id` doubles as the owner of the upload's metadata and tag rows and names
/// the directory its part files are staged in. `upload_id` is the opaque
/// token handed to clients.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartUpload {
    pub id: Uuid,
    pub bucket_id: Uuid,
    pub key: String,
    pub upload_id: String,

    /// Applied to the object version produced on completion.
    pub content_type: Option<String>,

    pub initiated_at: DateTime<Utc>,
}

/// The accepted body for one part number of an upload.
///
/// Every upload of a part gets a fresh `file_id`; the row is switched to the
/// new file only after its digest checks out, so a rejected re-upload never
/// disturbs the part that was already accepted.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartPart {
    pub id: Uuid,

    /// Row id of the owning `MultipartUpload`, not the client token.
    pub upload_id: Uuid,

    /// 1..=10000.
    pub part_number: i32,

    /// File name of the staged body inside the upload directory.
    pub file_id: Uuid,

    pub size_bytes: i64,

    /// Hex MD5 of the part body, unquoted.
    pub etag: String,

    pub uploaded_at: DateTime<Utc>,
}
