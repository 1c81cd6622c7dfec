//! src/services/storage_service.rs
//!
//! StorageService: bucket management, payload I/O and current-object listing
//! backed by SQLite for metadata and local disk for object payloads. Version
//! history semantics live in `versioning.rs` and multipart sessions in
//! `multipart.rs`; both extend this type.
//!
//! Payloads are sharded beneath `base_path/{bucket}/{shard}/{shard}/{payload-id}`,
//! one file per content entry.

use super::key_locks::KeyLocks;
use crate::models::{
    bucket::{Bucket, VersioningState},
    object::{EntryKind, ObjectContent, ObjectVersionRow, VersionEntry},
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{QueryBuilder, SqliteConnection, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Column list matching `ObjectVersionRow`.
pub(crate) const VERSION_COLUMNS: &str = "seq, id, bucket_id, key, version_id, is_delete_marker, \
     payload_id, content_type, size_bytes, etag, storage_class, owner_id, last_modified";

/// Directory under `base_path` holding in-flight multipart parts. Bucket
/// names cannot start with a dot, so it never collides with a bucket root.
pub(crate) const MULTIPART_DIR: &str = ".multipart";

/// Upper bound on `max-keys` for every listing.
pub const MAX_LIST_KEYS: usize = 1000;

/// Rows fetched per query while filling a listing page.
const LIST_BATCH: usize = 256;

#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    /// Listing starts strictly after this key: a continuation token,
    /// `start-after` or a v1 `marker`.
    pub start_after: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug, Default)]
pub struct ListObjectsResult {
    pub objects: Vec<VersionEntry>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Last key or common prefix of a truncated page; the next page starts
    /// after it.
    pub next_marker: Option<String>,
    /// Keys plus common prefixes on this page.
    pub key_count: usize,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("version `{version_id}` of `{key}` not found in bucket `{bucket}`")]
    VersionNotFound {
        bucket: String,
        key: String,
        version_id: String,
    },
    /// Resolution landed on a delete marker. `explicit` is true when the
    /// caller named the marker's version id.
    #[error("`{key}` in bucket `{bucket}` resolves to delete marker `{version_id}`")]
    DeleteMarker {
        bucket: String,
        key: String,
        version_id: String,
        explicit: bool,
    },
    #[error("multipart upload `{0}` not found")]
    UploadNotFound(String),
    #[error("part {0} is missing or its etag does not match")]
    InvalidPart(i32),
    #[error("parts must be listed in ascending order")]
    InvalidPartOrder,
    #[error("payload digest does not match Content-MD5")]
    BadDigest,
    #[error("invalid tag: {0}")]
    InvalidTag(String),
    #[error("object tags cannot be greater than {0}")]
    TooManyTags(usize),
    #[error("requested range not satisfiable for {size} bytes")]
    InvalidRange { size: u64 },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("not modified")]
    NotModified { etag: String },
    #[error("corrupted metadata: {0}")]
    Corrupted(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A payload file that has been fully written and synced but is not yet
/// referenced by any version row.
#[derive(Debug)]
pub(crate) struct WrittenPayload {
    pub payload_id: Uuid,
    pub path: PathBuf,
    pub size_bytes: i64,
    pub etag: String,
}

/// StorageService provides the S3-like operations of the store. Bucket
/// management, payload I/O and listing of current objects are implemented
/// here; version history and multipart sessions in sibling modules.
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Serializes history mutations per `(bucket, key)`.
    pub(crate) locks: Arc<KeyLocks>,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const SUPPORTED_REGIONS: [&str; 16] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-2",
    "ap-northeast-3",
    "me-south-1",
];

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            locks: Arc::new(KeyLocks::new()),
        }
    }

    /// Reject empty, oversized or control-character keys.
    ///
    /// Keys never reach the filesystem (payload files are named by id), so
    /// path-like keys such as `../a` or ` ` are legal.
    pub(crate) fn ensure_key_valid(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.bytes().any(|b| b == b'\0') {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.trim() != name {
            return Err(invalid("cannot begin or end with whitespace"));
        }

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }

        if name.starts_with('.')
            || name.ends_with('.')
            || name.starts_with('-')
            || name.ends_with('-')
        {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    /// Validate region string against SUPPORTED_REGIONS (case-insensitive).
    fn ensure_region_valid(&self, region: &str) -> StorageResult<()> {
        if SUPPORTED_REGIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(region))
        {
            Ok(())
        } else {
            Err(StorageError::UnsupportedRegion(region.to_string()))
        }
    }

    /// Physical base folder of a bucket. Does not check for existence.
    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard identifiers for an object key: the first two bytes
    /// of MD5(bucket/key) as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Path of one payload file: base_path/bucket/{shard}/{shard}/{payload_id}.
    /// Parent directories may not exist yet.
    pub(crate) fn payload_path(&self, bucket_name: &str, key: &str, payload_id: Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(payload_id.simple().to_string());
        path
    }

    /// Directory holding the parts of one multipart upload.
    pub(crate) fn upload_dir(&self, upload_row_id: Uuid) -> PathBuf {
        self.base_path
            .join(MULTIPART_DIR)
            .join(upload_row_id.simple().to_string())
    }

    /// Fetch bucket metadata from SQLite. Returns BucketNotFound if missing.
    pub(crate) async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, Bucket>(
            "SELECT id, name, owner_id, region, created_at, versioning
             FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Stream bytes into a fresh payload file for `bucket/key`.
    ///
    /// - Writes incrementally to a temporary file beside the final location.
    /// - Computes MD5 and size while streaming.
    /// - fsyncs, then renames into place.
    ///
    /// Temp files are removed on every error path.
    pub(crate) async fn write_payload<S>(
        &self,
        bucket_name: &str,
        key: &str,
        stream: S,
    ) -> StorageResult<WrittenPayload>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let payload_id = Uuid::new_v4();
        let file_path = self.payload_path(bucket_name, key, payload_id);
        let (size_bytes, etag) = write_stream_to(&file_path, stream).await?;

        Ok(WrittenPayload {
            payload_id,
            path: file_path,
            size_bytes,
            etag,
        })
    }

    /// Open the payload file of a content entry.
    pub(crate) async fn open_payload(
        &self,
        bucket_name: &str,
        key: &str,
        content: &ObjectContent,
    ) -> StorageResult<File> {
        let path = self.payload_path(bucket_name, key, content.payload_id);
        File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket_name.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })
    }

    /// Delete a payload file that is no longer referenced and prune the
    /// shard directories it leaves empty. Failures are logged, not returned:
    /// the metadata change has already committed.
    pub(crate) async fn discard_payload(&self, bucket_name: &str, key: &str, payload_id: Uuid) {
        let file_path = self.payload_path(bucket_name, key, payload_id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => {
                warn!("failed to remove payload {}: {}", file_path.display(), err);
                return;
            }
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket_name);
            prune_empty_dirs(parent, &bucket_root).await;
        }
    }

    /// List current objects following S3 ListObjects rules.
    ///
    /// Only keys whose current entry holds content are listed; keys hidden
    /// behind a delete marker and non-current versions are skipped.
    ///
    /// With a delimiter, every key sharing a rolled-up prefix collapses into
    /// one common prefix, and each prefix counts as a single entry against
    /// `max_keys`. The page is truncated only when another entry follows
    /// it. Resuming from a position that is itself a common prefix skips
    /// every key beneath that prefix.
    pub async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StorageResult<ListObjectsResult> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = params.max_keys.min(MAX_LIST_KEYS);
        let prefix = params.prefix.as_deref().filter(|p| !p.is_empty());
        let delimiter = params.delimiter.as_deref().filter(|d| !d.is_empty());

        let mut result = ListObjectsResult::default();
        if max_keys == 0 {
            return Ok(result);
        }

        let mut cursor = params.start_after.clone();
        let mut skip = match (cursor.as_deref(), delimiter) {
            (Some(position), Some(delim))
                if compute_common_prefix(position, prefix, delim).as_deref()
                    == Some(position) =>
            {
                Some(position.to_string())
            }
            _ => None,
        };

        let mut entries = 0;
        let mut last_entry = None;
        'scan: loop {
            let rows = self
                .current_rows_after(
                    bucket_rec.id,
                    prefix,
                    cursor.as_deref(),
                    skip.as_deref(),
                    LIST_BATCH,
                )
                .await?;
            let exhausted = rows.len() < LIST_BATCH;

            for row in rows {
                if entries == max_keys {
                    result.is_truncated = true;
                    break 'scan;
                }
                entries += 1;

                if let Some(common) =
                    delimiter.and_then(|delim| compute_common_prefix(&row.key, prefix, delim))
                {
                    // Re-query past everything under the new prefix.
                    result.common_prefixes.push(common.clone());
                    last_entry = Some(common.clone());
                    cursor = Some(common.clone());
                    skip = Some(common);
                    continue 'scan;
                }

                cursor = Some(row.key.clone());
                last_entry = Some(row.key.clone());
                result.objects.push(entry_from_row(row)?);
            }

            if exhausted {
                break;
            }
        }

        result.key_count = entries;
        if result.is_truncated {
            result.next_marker = last_entry;
        }
        Ok(result)
    }

    /// Current content rows of a bucket strictly after `after`, ascending by
    /// key, leaving out keys that start with `skip`.
    async fn current_rows_after(
        &self,
        bucket_id: Uuid,
        prefix: Option<&str>,
        after: Option<&str>,
        skip: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ObjectVersionRow>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM object_versions o WHERE o.bucket_id = ",
            VERSION_COLUMNS
        ));
        builder.push_bind(bucket_id);
        builder.push(
            " AND o.is_delete_marker = 0 AND o.seq = (SELECT MAX(l.seq) FROM object_versions l \
             WHERE l.bucket_id = o.bucket_id AND l.key = o.key)",
        );

        if let Some(prefix) = prefix {
            push_prefix_filter(&mut builder, prefix);
        }
        if let Some(after) = after {
            builder.push(" AND o.key > ");
            builder.push_bind(after.to_string());
        }
        if let Some(skip) = skip {
            builder.push(" AND substr(o.key, 1, length(");
            builder.push_bind(skip.to_string());
            builder.push(")) <> ");
            builder.push_bind(skip.to_string());
        }

        builder.push(" ORDER BY o.key ASC LIMIT ");
        builder.push_bind(limit as i64);

        let rows = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    /// All buckets, ascending by name.
    pub async fn list_buckets(&self) -> StorageResult<Vec<Bucket>> {
        let buckets = sqlx::query_as::<Sqlite, Bucket>(
            "SELECT id, name, owner_id, region, created_at, versioning
             FROM buckets ORDER BY name ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(buckets)
    }

    /// Create a bucket and initialize its directory.
    ///
    /// Validates name and region. New buckets start `Unversioned`.
    /// Returns BucketAlreadyExists if name conflict occurs.
    pub async fn create_bucket(&self, name: &str, region: String) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        let normalized_region = region.to_lowercase();
        self.ensure_region_valid(&normalized_region)?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner_id: Uuid::new_v4(),
            region: normalized_region,
            created_at: Utc::now(),
            versioning: VersioningState::Unversioned,
        };

        match sqlx::query(
            "INSERT INTO buckets (id, name, owner_id, region, created_at, versioning)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(bucket.owner_id)
        .bind(&bucket.region)
        .bind(bucket.created_at)
        .bind(bucket.versioning)
        .execute(&*self.db)
        .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StorageError::BucketAlreadyExists(name.to_string()));
            }
            Err(err) => return Err(StorageError::Sqlx(err)),
        }

        fs::create_dir_all(self.bucket_root(name)).await?;
        info!(bucket = %name, region = %bucket.region, "bucket created");
        Ok(bucket)
    }

    /// Verify a bucket exists.
    pub async fn head_bucket(&self, name: &str) -> StorageResult<Bucket> {
        self.fetch_bucket(name).await
    }

    /// Delete an empty bucket.
    ///
    /// Any remaining version entry, content or delete marker, makes the
    /// bucket non-empty. Pending multipart uploads are discarded together
    /// with their part files.
    pub async fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        let bucket = self.fetch_bucket(name).await?;

        // Write statements only: the emptiness check is part of the final
        // DELETE, so an entry committed concurrently rolls everything back.
        let mut tx = self.db.begin().await?;
        let uploads: Vec<Uuid> =
            sqlx::query_scalar("DELETE FROM multipart_uploads WHERE bucket_id = ? RETURNING id")
                .bind(bucket.id)
                .fetch_all(&mut *tx)
                .await?;
        for upload in &uploads {
            delete_owned_rows(&mut tx, *upload).await?;
        }

        let removed = sqlx::query(
            "DELETE FROM buckets WHERE id = ?
             AND NOT EXISTS (SELECT 1 FROM object_versions WHERE bucket_id = ?)",
        )
        .bind(bucket.id)
        .bind(bucket.id)
        .execute(&mut *tx)
        .await?;
        if removed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::BucketNotEmpty(name.to_string()));
        }
        tx.commit().await?;

        for upload in uploads {
            remove_dir_best_effort(&self.upload_dir(upload)).await;
        }
        remove_dir_best_effort(&self.bucket_root(name)).await;

        info!(bucket = %name, "bucket deleted");
        Ok(())
    }
}

/// Remove the metadata and tag rows owned by a version entry or upload.
pub(crate) async fn delete_owned_rows(
    conn: &mut SqliteConnection,
    owner_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
        .bind(owner_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
        .bind(owner_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Convert a stored row into the tagged entry type.
pub(crate) fn entry_from_row(row: ObjectVersionRow) -> StorageResult<VersionEntry> {
    let kind = if row.is_delete_marker {
        EntryKind::DeleteMarker
    } else {
        let payload_id = row.payload_id.ok_or_else(|| {
            StorageError::Corrupted(format!(
                "content version `{}` of `{}` has no payload",
                row.version_id, row.key
            ))
        })?;
        EntryKind::Content(ObjectContent {
            payload_id,
            etag: row.etag.unwrap_or_default(),
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            storage_class: row.storage_class,
        })
    };

    Ok(VersionEntry {
        row_id: row.id,
        seq: row.seq,
        key: row.key,
        version_id: row.version_id,
        owner_id: row.owner_id,
        last_modified: row.last_modified,
        kind,
    })
}

/// Restrict a query on alias `o` to keys starting with `prefix`. Compares
/// the leading characters directly so `%` and `_` in a prefix stay literal.
pub(crate) fn push_prefix_filter(builder: &mut QueryBuilder<'_, Sqlite>, prefix: &str) {
    builder.push(" AND substr(o.key, 1, length(");
    builder.push_bind(prefix.to_string());
    builder.push(")) = ");
    builder.push_bind(prefix.to_string());
}

/// Write `stream` to `final_path` via a synced temp file. Returns the byte
/// count and hex MD5.
pub(crate) async fn write_stream_to<S>(final_path: &Path, stream: S) -> StorageResult<(i64, String)>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let parent = final_path.parent().map(Path::to_path_buf).ok_or_else(|| {
        StorageError::Io(io::Error::new(
            ErrorKind::Other,
            "payload path missing parent directory",
        ))
    })?;
    fs::create_dir_all(&parent).await?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

    let result = stream_into_file(&tmp_path, stream).await;
    let (size_bytes, etag) = match result {
        Ok(done) => done,
        Err(err) => {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
    };

    if let Err(err) = fs::rename(&tmp_path, final_path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StorageError::Io(err));
    }

    Ok((size_bytes, etag))
}

async fn stream_into_file<S>(path: &Path, stream: S) -> StorageResult<(i64, String)>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: i64 = 0;
    let mut digest = Context::new();

    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as i64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok((size_bytes, format!("{:x}", digest.compute())))
}

/// Recursively remove empty directories from `start` up to (not including)
/// `stop`. Stops at the first non-empty or missing directory.
pub(crate) async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => {
                if let Some(parent) = current.parent() {
                    current = parent.to_path_buf();
                } else {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

pub(crate) async fn remove_dir_best_effort(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path).await {
        if err.kind() != ErrorKind::NotFound {
            warn!("failed to remove directory {}: {}", path.display(), err);
        }
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Compute a synthetic "common prefix" for S3 list semantics.
///
/// Used only when a delimiter is provided. Returns Some(prefix) if the key
/// belongs to a grouped prefix, otherwise None.
pub(crate) fn compute_common_prefix(
    key: &str,
    requested_prefix: Option<&str>,
    delimiter: &str,
) -> Option<String> {
    let after_prefix = match requested_prefix {
        Some(prefix) => key.strip_prefix(prefix)?,
        None => key,
    };

    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::new();
    if let Some(prefix) = requested_prefix {
        combined.push_str(prefix);
    }
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    /// A service over a fresh SQLite file and payload directory. Keep the
    /// `TempDir` alive for the duration of the test.
    pub async fn service() -> (StorageService, TempDir) {
        let temp = TempDir::new().unwrap();
        let pool = db::connect_file(&temp.path().join("meta.db"), 4)
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let service = StorageService::new(Arc::new(pool), temp.path().join("objects"));
        (service, temp)
    }

    pub fn body(data: &'static str) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures::stream::iter(vec![Ok(Bytes::from_static(data.as_bytes()))])
    }
}
