//! Per-key version history: put, get, delete, copy and version listing under
//! the three bucket versioning modes.
//!
//! Every key owns an ordered history of entries (content or delete marker).
//! The entry with the highest `seq` is current. Enabled buckets append
//! entries under fresh version ids; unversioned and suspended buckets write
//! the single `"null"` entry, displacing any earlier `"null"` entry of the
//! key wherever it sits in history.

use super::{
    conditions::Preconditions,
    key_locks::KeyGuard,
    ranges::ByteRange,
    storage_service::{
        MAX_LIST_KEYS, StorageError, StorageResult, StorageService, VERSION_COLUMNS,
        WrittenPayload, delete_owned_rows, entry_from_row, push_prefix_filter,
    },
    tagging::{TagSet, insert_tags, validate_tags},
};
use crate::models::{
    bucket::{Bucket, VersioningState},
    metadata::ObjectMetadata,
    object::{EntryKind, NULL_VERSION_ID, ObjectVersionRow, StoredObject, VersionEntry},
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use sqlx::{FromRow, QueryBuilder, SqliteConnection, sqlite::Sqlite};
use std::io::{self, SeekFrom};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, Take},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_STORAGE_CLASS: &str = "STANDARD";

/// Attributes supplied with a new content entry.
#[derive(Clone, Debug, Default)]
pub struct ObjectWrite {
    pub content_type: Option<String>,

    /// `x-amz-meta-*` pairs, names without the prefix.
    pub metadata: Vec<(String, String)>,

    /// Hex MD5 the payload must hash to, from `Content-MD5`.
    pub content_md5: Option<String>,

    /// Tags from `x-amz-tagging`.
    pub tags: TagSet,
}

/// Result of writing a content entry.
#[derive(Debug)]
pub struct PutOutcome {
    pub entry: VersionEntry,

    /// Version id returned to the client; only Enabled buckets report one.
    pub version_id: Option<String>,
}

/// Result of a delete request.
#[derive(Debug, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Id of the created marker or of the removed version.
    pub version_id: Option<String>,

    /// True when a marker was created or the removed version was a marker.
    pub delete_marker: bool,
}

/// How the destination of a copy obtains its content type and metadata.
///
/// `Replace` carries the content type and metadata only; tags follow the
/// separate `TaggingDirective`.
#[derive(Clone, Debug, Default)]
pub enum MetadataDirective {
    #[default]
    Copy,
    Replace(ObjectWrite),
}

/// How the destination of a copy obtains its tags.
#[derive(Clone, Debug, Default)]
pub enum TaggingDirective {
    #[default]
    Copy,
    Replace(TagSet),
}

/// A readable version opened for streaming, limited to the requested range.
#[derive(Debug)]
pub struct ObjectBody {
    pub object: StoredObject,

    /// `None` when the whole object is served.
    pub range: Option<ByteRange>,

    pub reader: Take<fs::File>,
}

/// The resolved source of a CopyObject request.
#[derive(Clone, Debug)]
pub struct CopySource {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
    pub conditions: Preconditions,
}

#[derive(Debug)]
pub struct CopyOutcome {
    pub put: PutOutcome,
    pub source_version_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ListVersionsParams {
    pub prefix: Option<String>,
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug)]
pub struct ListedVersion {
    pub entry: VersionEntry,
    pub is_latest: bool,
}

#[derive(Debug, Default)]
pub struct ListVersionsResult {
    /// Keys ascending, newest first within a key.
    pub entries: Vec<ListedVersion>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_version_id_marker: Option<String>,
}

#[derive(FromRow)]
struct ListedRow {
    #[sqlx(flatten)]
    row: ObjectVersionRow,
    is_latest: bool,
}

/// Entry to append to a key's history.
enum NewEntry {
    Content {
        payload: WrittenPayload,
        etag: String,
        write: ObjectWrite,
    },
    DeleteMarker,
}

/// Fresh opaque version id. Ordering is tracked by `seq`, never by the id.
pub fn new_version_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl StorageService {
    /// Apply a `PutBucketVersioning` request.
    ///
    /// Re-applying the current state is a no-op; no request can return a
    /// bucket to `Unversioned`.
    pub async fn put_bucket_versioning(
        &self,
        bucket: &str,
        state: VersioningState,
    ) -> StorageResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        if !bucket_rec.versioning.can_transition_to(state) {
            return Err(StorageError::InvalidArgument(format!(
                "versioning of bucket `{}` cannot return to {}",
                bucket, state
            )));
        }
        if bucket_rec.versioning == state {
            return Ok(());
        }

        sqlx::query("UPDATE buckets SET versioning = ? WHERE id = ?")
            .bind(state)
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;

        info!(bucket = %bucket, from = %bucket_rec.versioning, to = %state, "versioning changed");
        Ok(())
    }

    pub async fn get_bucket_versioning(&self, bucket: &str) -> StorageResult<VersioningState> {
        Ok(self.fetch_bucket(bucket).await?.versioning)
    }

    /// Stream-upload an object and append it to the key's history.
    pub async fn put_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        write: ObjectWrite,
        stream: S,
    ) -> StorageResult<PutOutcome>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_key_valid(key)?;
        validate_tags(&write.tags)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let payload = self.write_payload(&bucket_rec.name, key, stream).await?;
        if let Some(expected) = &write.content_md5 {
            if !expected.eq_ignore_ascii_case(&payload.etag) {
                let _ = fs::remove_file(&payload.path).await;
                return Err(StorageError::BadDigest);
            }
        }
        let etag = payload.etag.clone();
        self.commit_content(&bucket_rec, key, payload, etag, write)
            .await
    }

    /// Record an already written payload as the key's new current entry.
    ///
    /// The payload file is removed again if the metadata commit fails.
    pub(crate) async fn commit_content(
        &self,
        bucket: &Bucket,
        key: &str,
        payload: WrittenPayload,
        etag: String,
        write: ObjectWrite,
    ) -> StorageResult<PutOutcome> {
        let path = payload.path.clone();
        let guard = self.locks.lock(&bucket.name, key).await;
        let result = async {
            let state = self.current_versioning(bucket.id).await?;
            let entry = self
                .append_locked(
                    &guard,
                    bucket,
                    key,
                    state,
                    NewEntry::Content {
                        payload,
                        etag,
                        write,
                    },
                )
                .await?;
            Ok::<_, StorageError>((entry, state))
        }
        .await;
        drop(guard);

        match result {
            Ok((entry, state)) => {
                debug!(bucket = %bucket.name, key, version_id = %entry.version_id, "version created");
                let version_id = state
                    .assigns_version_ids()
                    .then(|| entry.version_id.clone());
                Ok(PutOutcome { entry, version_id })
            }
            Err(err) => {
                let _ = fs::remove_file(&path).await;
                Err(err)
            }
        }
    }

    /// Fetch the metadata of a readable version.
    ///
    /// Without a version id the key's current entry is resolved; a current
    /// delete marker reads as `DeleteMarker { explicit: false }`.
    pub async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        conditions: &Preconditions,
    ) -> StorageResult<StoredObject> {
        let object = self.resolve_object(bucket, key, version_id).await?;
        if !conditions.is_empty() {
            conditions.check_read(&object.content.etag, object.last_modified)?;
        }
        Ok(object)
    }

    /// Resolve a version and open its payload for streaming.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        conditions: &Preconditions,
    ) -> StorageResult<(StoredObject, fs::File)> {
        let object = self.head_object(bucket, key, version_id, conditions).await?;
        let file = self.open_payload(bucket, key, &object.content).await?;
        Ok((object, file))
    }

    /// Like `get_object_reader`, honouring a `Range` header. Preconditions
    /// are evaluated before the range.
    pub async fn get_object_body(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        conditions: &Preconditions,
        range_header: Option<&str>,
    ) -> StorageResult<ObjectBody> {
        let (object, mut file) = self
            .get_object_reader(bucket, key, version_id, conditions)
            .await?;
        let size = u64::try_from(object.content.size_bytes).unwrap_or_default();

        let range = match range_header {
            Some(header) => ByteRange::resolve(header, size)?,
            None => None,
        };
        let reader = match range {
            Some(range) => {
                file.seek(SeekFrom::Start(range.start)).await?;
                file.take(range.length())
            }
            None => file.take(size),
        };

        Ok(ObjectBody {
            object,
            range,
            reader,
        })
    }

    /// Delete an object or one of its versions.
    ///
    /// - With a version id: removes exactly that entry; an unknown id is a
    ///   no-op.
    /// - Without, in a versioned bucket: appends a delete marker.
    /// - Without, in an unversioned bucket: removes the object.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<DeleteOutcome> {
        self.ensure_key_valid(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let guard = self.locks.lock(&bucket_rec.name, key).await;

        if let Some(version_id) = version_id {
            let removed = self.remove_locked(&guard, &bucket_rec, key, version_id).await?;
            return Ok(DeleteOutcome {
                version_id: Some(version_id.to_string()),
                delete_marker: removed.is_some_and(|entry| entry.is_delete_marker()),
            });
        }

        let state = self.current_versioning(bucket_rec.id).await?;
        if !state.keeps_history() {
            self.remove_locked(&guard, &bucket_rec, key, NULL_VERSION_ID)
                .await?;
            return Ok(DeleteOutcome {
                version_id: None,
                delete_marker: false,
            });
        }

        let marker = self
            .append_locked(&guard, &bucket_rec, key, state, NewEntry::DeleteMarker)
            .await?;
        debug!(bucket = %bucket, key, version_id = %marker.version_id, "delete marker created");
        Ok(DeleteOutcome {
            version_id: Some(marker.version_id),
            delete_marker: true,
        })
    }

    /// Copy a readable source version into a new entry of the destination
    /// key, following the destination bucket's versioning mode.
    pub async fn copy_object(
        &self,
        source: &CopySource,
        dst_bucket: &str,
        dst_key: &str,
        directive: MetadataDirective,
        tagging: TaggingDirective,
    ) -> StorageResult<CopyOutcome> {
        self.ensure_key_valid(dst_key)?;
        if let TaggingDirective::Replace(tags) = &tagging {
            validate_tags(tags)?;
        }
        let src = self
            .resolve_object(&source.bucket, &source.key, source.version_id.as_deref())
            .await
            .map_err(|err| match err {
                StorageError::DeleteMarker { bucket, key, .. } => {
                    StorageError::ObjectNotFound { bucket, key }
                }
                other => other,
            })?;
        source
            .conditions
            .check_copy_source(&src.content.etag, src.last_modified)?;

        let dst_bucket_rec = self.fetch_bucket(dst_bucket).await?;
        let file = self
            .open_payload(&source.bucket, &source.key, &src.content)
            .await?;
        let payload = self
            .write_payload(&dst_bucket_rec.name, dst_key, ReaderStream::new(file))
            .await?;

        let mut write = match directive {
            MetadataDirective::Copy => ObjectWrite {
                content_type: src.content.content_type.clone(),
                metadata: src.metadata.clone(),
                ..Default::default()
            },
            MetadataDirective::Replace(write) => write,
        };
        write.tags = match tagging {
            TaggingDirective::Copy => self.load_tags(src.row_id).await?,
            TaggingDirective::Replace(tags) => tags,
        };
        let etag = payload.etag.clone();
        let put = self
            .commit_content(&dst_bucket_rec, dst_key, payload, etag, write)
            .await?;

        Ok(CopyOutcome {
            put,
            source_version_id: src.reported_version_id().map(str::to_string),
        })
    }

    /// List every version entry and delete marker of a bucket.
    ///
    /// Ordered by key ascending, newest first within a key. Pagination
    /// resumes strictly after `(key_marker, version_id_marker)`; a version
    /// marker that no longer exists resumes after the whole key.
    pub async fn list_object_versions(
        &self,
        bucket: &str,
        params: ListVersionsParams,
    ) -> StorageResult<ListVersionsResult> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = params.max_keys.min(MAX_LIST_KEYS);
        let key_marker = params.key_marker.filter(|m| !m.is_empty());
        let version_marker = params.version_id_marker.filter(|m| !m.is_empty());

        if version_marker.is_some() && key_marker.is_none() {
            return Err(StorageError::InvalidArgument(
                "a version-id marker cannot be specified without a key marker".into(),
            ));
        }
        if max_keys == 0 {
            return Ok(ListVersionsResult::default());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {}, (o.seq = (SELECT MAX(l.seq) FROM object_versions l \
             WHERE l.bucket_id = o.bucket_id AND l.key = o.key)) AS is_latest \
             FROM object_versions o WHERE o.bucket_id = ",
            VERSION_COLUMNS
        ));
        builder.push_bind(bucket_rec.id);

        if let Some(prefix) = params.prefix.as_deref().filter(|p| !p.is_empty()) {
            push_prefix_filter(&mut builder, prefix);
        }

        if let Some(key_marker) = &key_marker {
            let marker_seq = match &version_marker {
                Some(version_id) => self
                    .find_entry(bucket_rec.id, key_marker, version_id)
                    .await?
                    .map(|entry| entry.seq),
                None => None,
            };
            match marker_seq {
                Some(seq) => {
                    builder.push(" AND (o.key > ");
                    builder.push_bind(key_marker.clone());
                    builder.push(" OR (o.key = ");
                    builder.push_bind(key_marker.clone());
                    builder.push(" AND o.seq < ");
                    builder.push_bind(seq);
                    builder.push("))");
                }
                None => {
                    builder.push(" AND o.key > ");
                    builder.push_bind(key_marker.clone());
                }
            }
        }

        builder.push(" ORDER BY o.key ASC, o.seq DESC LIMIT ");
        builder.push_bind((max_keys + 1) as i64);

        let mut rows: Vec<ListedRow> = builder.build_query_as().fetch_all(&*self.db).await?;

        let is_truncated = rows.len() > max_keys;
        rows.truncate(max_keys);

        let entries = rows
            .into_iter()
            .map(|listed| {
                Ok(ListedVersion {
                    entry: entry_from_row(listed.row)?,
                    is_latest: listed.is_latest,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let (next_key_marker, next_version_id_marker) = match entries.last() {
            Some(last) if is_truncated => (
                Some(last.entry.key.clone()),
                Some(last.entry.version_id.clone()),
            ),
            _ => (None, None),
        };

        Ok(ListVersionsResult {
            entries,
            is_truncated,
            next_key_marker,
            next_version_id_marker,
        })
    }

    /// Resolve `(key, version_id?)` to a readable content version.
    pub(crate) async fn resolve_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<StoredObject> {
        self.ensure_key_valid(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let entry = match version_id {
            None => self
                .current_entry(bucket_rec.id, key)
                .await?
                .ok_or_else(|| StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })?,
            Some(version_id) => self
                .find_entry(bucket_rec.id, key, version_id)
                .await?
                .ok_or_else(|| StorageError::VersionNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    version_id: version_id.to_string(),
                })?,
        };

        let content = match entry.kind {
            EntryKind::Content(content) => content,
            EntryKind::DeleteMarker => {
                return Err(StorageError::DeleteMarker {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    version_id: entry.version_id,
                    explicit: version_id.is_some(),
                });
            }
        };

        let metadata = self.load_metadata(entry.row_id).await?;
        let tag_count = self.count_tags(entry.row_id).await?;
        Ok(StoredObject {
            row_id: entry.row_id,
            key: entry.key,
            version_id: entry.version_id,
            owner_id: entry.owner_id,
            last_modified: entry.last_modified,
            content,
            metadata,
            tag_count,
            versioned: bucket_rec.versioning != VersioningState::Unversioned,
        })
    }

    /// Append an entry as the key's new current entry. Caller holds the
    /// key guard.
    ///
    /// Under `Unversioned` and `Suspended` the entry takes version id
    /// `"null"` and displaces the key's previous `"null"` entry.
    async fn append_locked(
        &self,
        _guard: &KeyGuard,
        bucket: &Bucket,
        key: &str,
        state: VersioningState,
        new: NewEntry,
    ) -> StorageResult<VersionEntry> {
        let version_id = if state.assigns_version_ids() {
            new_version_id()
        } else {
            NULL_VERSION_ID.to_string()
        };
        let displaced = if version_id == NULL_VERSION_ID {
            self.find_entry(bucket.id, key, NULL_VERSION_ID).await?
        } else {
            None
        };

        let row_id = Uuid::new_v4();
        let (is_delete_marker, payload_id, size_bytes, etag, write) = match new {
            NewEntry::Content {
                payload,
                etag,
                write,
            } => (
                false,
                Some(payload.payload_id),
                payload.size_bytes,
                Some(etag),
                write,
            ),
            NewEntry::DeleteMarker => (true, None, 0, None, ObjectWrite::default()),
        };

        let insert = format!(
            "INSERT INTO object_versions (
                id, bucket_id, key, version_id, is_delete_marker, payload_id,
                content_type, size_bytes, etag, storage_class, owner_id, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}",
            VERSION_COLUMNS
        );

        // Write statements only: the transaction never upgrades from a read
        // lock, so concurrent writers wait on the busy timeout instead of
        // failing.
        let mut tx = self.db.begin().await?;
        if let Some(old) = &displaced {
            delete_entry_rows(&mut tx, old.row_id).await?;
        }
        let row = sqlx::query_as::<_, ObjectVersionRow>(&insert)
            .bind(row_id)
            .bind(bucket.id)
            .bind(key)
            .bind(&version_id)
            .bind(is_delete_marker)
            .bind(payload_id)
            .bind(write.content_type.as_deref())
            .bind(size_bytes)
            .bind(etag.as_deref())
            .bind(DEFAULT_STORAGE_CLASS)
            .bind(bucket.owner_id)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;
        insert_metadata(&mut tx, row_id, &write.metadata).await?;
        insert_tags(&mut tx, row_id, &write.tags).await?;
        tx.commit().await?;

        if let Some(old) = displaced {
            debug!(bucket = %bucket.name, key, "null version replaced");
            if let Some(payload_id) = old.payload_id() {
                self.discard_payload(&bucket.name, key, payload_id).await;
            }
        }

        entry_from_row(row)
    }

    /// Remove the entry with `version_id`, if any. Caller holds the key
    /// guard.
    async fn remove_locked(
        &self,
        _guard: &KeyGuard,
        bucket: &Bucket,
        key: &str,
        version_id: &str,
    ) -> StorageResult<Option<VersionEntry>> {
        let Some(entry) = self.find_entry(bucket.id, key, version_id).await? else {
            debug!(bucket = %bucket.name, key, version_id, "no such version; nothing removed");
            return Ok(None);
        };

        let mut tx = self.db.begin().await?;
        delete_entry_rows(&mut tx, entry.row_id).await?;
        tx.commit().await?;

        debug!(bucket = %bucket.name, key, version_id, "version removed");
        if let Some(payload_id) = entry.payload_id() {
            self.discard_payload(&bucket.name, key, payload_id).await;
        }
        Ok(Some(entry))
    }

    /// Read the bucket's versioning mode as of now.
    async fn current_versioning(&self, bucket_id: Uuid) -> StorageResult<VersioningState> {
        let state = sqlx::query_scalar::<_, VersioningState>(
            "SELECT versioning FROM buckets WHERE id = ?",
        )
        .bind(bucket_id)
        .fetch_one(&*self.db)
        .await?;
        Ok(state)
    }

    async fn current_entry(&self, bucket_id: Uuid, key: &str) -> StorageResult<Option<VersionEntry>> {
        let sql = format!(
            "SELECT {} FROM object_versions WHERE bucket_id = ? AND key = ?
             ORDER BY seq DESC LIMIT 1",
            VERSION_COLUMNS
        );
        sqlx::query_as::<_, ObjectVersionRow>(&sql)
            .bind(bucket_id)
            .bind(key)
            .fetch_optional(&*self.db)
            .await?
            .map(entry_from_row)
            .transpose()
    }

    async fn find_entry(
        &self,
        bucket_id: Uuid,
        key: &str,
        version_id: &str,
    ) -> StorageResult<Option<VersionEntry>> {
        let sql = format!(
            "SELECT {} FROM object_versions WHERE bucket_id = ? AND key = ? AND version_id = ?",
            VERSION_COLUMNS
        );
        sqlx::query_as::<_, ObjectVersionRow>(&sql)
            .bind(bucket_id)
            .bind(key)
            .bind(version_id)
            .fetch_optional(&*self.db)
            .await?
            .map(entry_from_row)
            .transpose()
    }

    pub(crate) async fn load_metadata(&self, object_id: Uuid) -> StorageResult<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, ObjectMetadata>(
            "SELECT id, object_id, key, value FROM object_metadata WHERE object_id = ? ORDER BY key",
        )
        .bind(object_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
    }
}

async fn delete_entry_rows(conn: &mut SqliteConnection, row_id: Uuid) -> Result<(), sqlx::Error> {
    delete_owned_rows(&mut *conn, row_id).await?;
    sqlx::query("DELETE FROM object_versions WHERE id = ?")
        .bind(row_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn insert_metadata(
    conn: &mut SqliteConnection,
    object_id: Uuid,
    metadata: &[(String, String)],
) -> Result<(), sqlx::Error> {
    for (key, value) in metadata {
        sqlx::query("INSERT INTO object_metadata (id, object_id, key, value) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(object_id)
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_service::test_support::{body, service};
    use std::collections::HashSet;
    use tokio::io::AsyncReadExt;

    async fn read_body(service: &StorageService, bucket: &str, key: &str, version: Option<&str>) -> String {
        let (_, mut file) = service
            .get_object_reader(bucket, key, version, &Preconditions::default())
            .await
            .unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).await.unwrap();
        out
    }

    async fn versioned_bucket(service: &StorageService, name: &str) {
        service.create_bucket(name, "local".into()).await.unwrap();
        service
            .put_bucket_versioning(name, VersioningState::Enabled)
            .await
            .unwrap();
    }

    async fn put(service: &StorageService, bucket: &str, key: &str, data: &'static str) -> PutOutcome {
        service
            .put_object_stream(bucket, key, ObjectWrite::default(), body(data))
            .await
            .unwrap()
    }

    async fn list_all(service: &StorageService, bucket: &str) -> Vec<ListedVersion> {
        service
            .list_object_versions(
                bucket,
                ListVersionsParams {
                    max_keys: 1000,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .entries
    }

    fn is_not_found(err: &StorageError) -> bool {
        matches!(
            err,
            StorageError::ObjectNotFound { .. } | StorageError::DeleteMarker { explicit: false, .. }
        )
    }

    #[tokio::test]
    async fn versioning_transitions() {
        let (service, _temp) = service().await;
        service.create_bucket("bucket", "local".into()).await.unwrap();
        assert_eq!(
            service.get_bucket_versioning("bucket").await.unwrap(),
            VersioningState::Unversioned
        );

        for state in [
            VersioningState::Suspended,
            VersioningState::Enabled,
            VersioningState::Enabled,
            VersioningState::Suspended,
        ] {
            service.put_bucket_versioning("bucket", state).await.unwrap();
            assert_eq!(service.get_bucket_versioning("bucket").await.unwrap(), state);
        }

        assert!(matches!(
            service
                .put_bucket_versioning("bucket", VersioningState::Unversioned)
                .await,
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            service
                .put_bucket_versioning("missing", VersioningState::Enabled)
                .await,
            Err(StorageError::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn enabling_twice_creates_no_history() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;
        put(&service, "bucket", "k", "a").await;
        service
            .put_bucket_versioning("bucket", VersioningState::Enabled)
            .await
            .unwrap();
        assert_eq!(list_all(&service, "bucket").await.len(), 1);
    }

    #[tokio::test]
    async fn unversioned_put_overwrites_and_delete_removes() {
        let (service, _temp) = service().await;
        service.create_bucket("bucket", "local".into()).await.unwrap();

        let first = put(&service, "bucket", "k", "one").await;
        assert_eq!(first.version_id, None);
        let second = put(&service, "bucket", "k", "two").await;
        assert_eq!(second.version_id, None);

        let listed = list_all(&service, "bucket").await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].entry.version_id, NULL_VERSION_ID);
        assert_eq!(read_body(&service, "bucket", "k", None).await, "two");

        let object = service
            .head_object("bucket", "k", None, &Preconditions::default())
            .await
            .unwrap();
        assert_eq!(object.reported_version_id(), None);

        let outcome = service.delete_object("bucket", "k", None).await.unwrap();
        assert_eq!(
            outcome,
            DeleteOutcome {
                version_id: None,
                delete_marker: false
            }
        );
        assert!(list_all(&service, "bucket").await.is_empty());

        let again = service.delete_object("bucket", "k", None).await.unwrap();
        assert!(!again.delete_marker);
    }

    #[tokio::test]
    async fn enabled_puts_append_newest_first() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;

        let mut ids = Vec::new();
        for data in ["content-0", "content-1", "content-2", "content-3", "content-4"] {
            let outcome = put(&service, "bucket", "testobj", data).await;
            ids.push(outcome.version_id.expect("enabled puts report a version id"));
        }
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 5);

        let listed = list_all(&service, "bucket").await;
        let listed_ids: Vec<_> = listed.iter().map(|l| l.entry.version_id.clone()).collect();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(listed_ids, expected);
        assert!(listed[0].is_latest);
        assert!(listed[1..].iter().all(|l| !l.is_latest));

        for (i, id) in ids.iter().enumerate() {
            let data = read_body(&service, "bucket", "testobj", Some(id)).await;
            assert_eq!(data, format!("content-{}", i));
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_etag_and_metadata() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;

        let write = ObjectWrite {
            content_type: Some("text/plain".into()),
            metadata: vec![("author".into(), "kim".into()), ("color".into(), "blue".into())],
            ..Default::default()
        };
        let outcome = service
            .put_object_stream("bucket", "doc", write, body("Hello, World!"))
            .await
            .unwrap();
        let version_id = outcome.version_id.unwrap();

        let object = service
            .head_object("bucket", "doc", Some(&version_id), &Preconditions::default())
            .await
            .unwrap();
        assert_eq!(object.content.etag, format!("{:x}", md5::compute("Hello, World!")));
        assert_eq!(object.content.size_bytes, 13);
        assert_eq!(object.content.content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            object.metadata,
            vec![
                ("author".to_string(), "kim".to_string()),
                ("color".to_string(), "blue".to_string())
            ]
        );
        assert_eq!(object.reported_version_id(), Some(version_id.as_str()));
    }

    #[tokio::test]
    async fn delete_marker_hides_object_until_removed() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;
        put(&service, "bucket", "k", "v1").await;

        let marker = service.delete_object("bucket", "k", None).await.unwrap();
        assert!(marker.delete_marker);
        let marker_id = marker.version_id.unwrap();
        assert_ne!(marker_id, NULL_VERSION_ID);

        let err = service
            .head_object("bucket", "k", None, &Preconditions::default())
            .await
            .unwrap_err();
        assert!(is_not_found(&err));

        let err = service
            .head_object("bucket", "k", Some(&marker_id), &Preconditions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DeleteMarker { explicit: true, .. }));

        let listed = list_all(&service, "bucket").await;
        assert_eq!(listed.len(), 2);
        assert!(listed[0].entry.is_delete_marker() && listed[0].is_latest);
        assert!(!listed[1].entry.is_delete_marker() && !listed[1].is_latest);

        let removed = service
            .delete_object("bucket", "k", Some(&marker_id))
            .await
            .unwrap();
        assert!(removed.delete_marker);
        assert_eq!(read_body(&service, "bucket", "k", None).await, "v1");
    }

    #[tokio::test]
    async fn delete_on_missing_key_creates_marker() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;

        let outcome = service.delete_object("bucket", "key", None).await.unwrap();
        let listed = list_all(&service, "bucket").await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].entry.key, "key");
        assert_eq!(Some(listed[0].entry.version_id.clone()), outcome.version_id);
        assert!(listed[0].entry.is_delete_marker());
    }

    #[tokio::test]
    async fn removing_head_promotes_previous_version() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;

        let mut stack = Vec::new();
        for data in ["a", "bb", "ccc", "dddd", "eeeee"] {
            stack.push(put(&service, "bucket", "foo", data).await.version_id.unwrap());
        }

        let mut last = stack.pop().unwrap();
        while stack.len() > 1 {
            service
                .delete_object("bucket", "foo", Some(&last))
                .await
                .unwrap();
            last = stack.pop().unwrap();
            let current = service
                .head_object("bucket", "foo", None, &Preconditions::default())
                .await
                .unwrap();
            assert_eq!(current.version_id, last);
        }
    }

    #[tokio::test]
    async fn plain_null_version_survives_enabling() {
        let (service, _temp) = service().await;
        service.create_bucket("bucket", "local".into()).await.unwrap();
        put(&service, "bucket", "k", "fooz").await;

        service
            .put_bucket_versioning("bucket", VersioningState::Enabled)
            .await
            .unwrap();
        let v1 = put(&service, "bucket", "k", "zzz").await.version_id.unwrap();
        assert_eq!(read_body(&service, "bucket", "k", None).await, "zzz");
        assert_eq!(
            read_body(&service, "bucket", "k", Some(NULL_VERSION_ID)).await,
            "fooz"
        );

        service.delete_object("bucket", "k", Some(&v1)).await.unwrap();
        assert_eq!(read_body(&service, "bucket", "k", None).await, "fooz");

        service
            .delete_object("bucket", "k", Some(NULL_VERSION_ID))
            .await
            .unwrap();
        let err = service
            .head_object("bucket", "k", None, &Preconditions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
        assert!(list_all(&service, "bucket").await.is_empty());
    }

    #[tokio::test]
    async fn suspended_overwrite_of_plain_null_keeps_one_version() {
        let (service, _temp) = service().await;
        service.create_bucket("bucket", "local".into()).await.unwrap();
        put(&service, "bucket", "k", "fooz").await;
        service
            .put_bucket_versioning("bucket", VersioningState::Enabled)
            .await
            .unwrap();
        service
            .put_bucket_versioning("bucket", VersioningState::Suspended)
            .await
            .unwrap();

        let outcome = put(&service, "bucket", "k", "zzz").await;
        assert_eq!(outcome.version_id, None);
        assert_eq!(read_body(&service, "bucket", "k", None).await, "zzz");
        assert_eq!(list_all(&service, "bucket").await.len(), 1);

        service
            .delete_object("bucket", "k", Some(NULL_VERSION_ID))
            .await
            .unwrap();
        assert!(list_all(&service, "bucket").await.is_empty());
    }

    #[tokio::test]
    async fn suspended_writes_collapse_onto_single_null_entry() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;

        let mut enabled_ids = Vec::new();
        for data in ["content-0", "content-1", "content-2"] {
            enabled_ids.push(put(&service, "bucket", "testobj", data).await.version_id.unwrap());
        }

        service
            .put_bucket_versioning("bucket", VersioningState::Suspended)
            .await
            .unwrap();

        let marker = service.delete_object("bucket", "testobj", None).await.unwrap();
        assert_eq!(marker.version_id.as_deref(), Some(NULL_VERSION_ID));
        assert!(marker.delete_marker);
        service.delete_object("bucket", "testobj", None).await.unwrap();
        put(&service, "bucket", "testobj", "null content 1").await;
        put(&service, "bucket", "testobj", "null content 2").await;

        let listed = list_all(&service, "bucket").await;
        let nulls = listed
            .iter()
            .filter(|l| l.entry.version_id == NULL_VERSION_ID)
            .count();
        assert_eq!(nulls, 1);
        assert_eq!(listed.len(), 4);
        assert_eq!(listed[0].entry.version_id, NULL_VERSION_ID);
        assert!(listed[0].is_latest);
        let rest: Vec<_> = listed[1..].iter().map(|l| l.entry.version_id.clone()).collect();
        let mut expected = enabled_ids.clone();
        expected.reverse();
        assert_eq!(rest, expected);
        assert_eq!(
            read_body(&service, "bucket", "testobj", None).await,
            "null content 2"
        );

        service
            .put_bucket_versioning("bucket", VersioningState::Enabled)
            .await
            .unwrap();
        let fresh = put(&service, "bucket", "testobj", "content-3").await;
        assert!(fresh.version_id.is_some());
        assert_eq!(list_all(&service, "bucket").await.len(), 5);
        assert_eq!(
            read_body(&service, "bucket", "testobj", Some(NULL_VERSION_ID)).await,
            "null content 2"
        );
    }

    #[tokio::test]
    async fn unknown_version_delete_is_a_no_op() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;
        let v = put(&service, "bucket", "key", "x").await.version_id.unwrap();

        service.delete_object("bucket", "key", Some(&v)).await.unwrap();
        let again = service.delete_object("bucket", "key", Some(&v)).await.unwrap();
        assert_eq!(
            again,
            DeleteOutcome {
                version_id: Some(v.clone()),
                delete_marker: false
            }
        );

        let err = service
            .head_object("bucket", "key", Some(&v), &Preconditions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::VersionNotFound { .. }));
    }

    #[tokio::test]
    async fn listing_groups_keys_and_paginates_with_markers() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;

        let mut first = Vec::new();
        let mut second = Vec::new();
        for _ in 0..3 {
            first.push(put(&service, "bucket", "testobj", "a").await.version_id.unwrap());
        }
        for _ in 0..3 {
            second.push(put(&service, "bucket", "testobj-1", "b").await.version_id.unwrap());
        }

        let all = list_all(&service, "bucket").await;
        let keys: Vec<_> = all.iter().map(|l| l.entry.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["testobj", "testobj", "testobj", "testobj-1", "testobj-1", "testobj-1"]
        );

        let mut collected = Vec::new();
        let mut params = ListVersionsParams {
            max_keys: 2,
            ..Default::default()
        };
        loop {
            let page = service
                .list_object_versions("bucket", params.clone())
                .await
                .unwrap();
            collected.extend(page.entries.into_iter().map(|l| l.entry.version_id));
            if !page.is_truncated {
                break;
            }
            params.key_marker = page.next_key_marker;
            params.version_id_marker = page.next_version_id_marker;
        }

        let mut expected: Vec<_> = first.into_iter().rev().collect();
        expected.extend(second.into_iter().rev());
        assert_eq!(collected, expected);

        let prefixed = service
            .list_object_versions(
                "bucket",
                ListVersionsParams {
                    prefix: Some("testobj-".into()),
                    max_keys: 1000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(prefixed.entries.len(), 3);

        assert!(matches!(
            service
                .list_object_versions(
                    "bucket",
                    ListVersionsParams {
                        version_id_marker: Some("abc".into()),
                        max_keys: 10,
                        ..Default::default()
                    },
                )
                .await,
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn copy_specific_versions_across_buckets() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "source").await;
        service.create_bucket("target", "local".into()).await.unwrap();

        let write = ObjectWrite {
            content_type: Some("text/csv".into()),
            metadata: vec![("origin".into(), "source".into())],
            ..Default::default()
        };
        let v0 = service
            .put_object_stream("source", "testobj", write, body("content-0"))
            .await
            .unwrap()
            .version_id
            .unwrap();
        put(&service, "source", "testobj", "content-1").await;

        let source = CopySource {
            bucket: "source".into(),
            key: "testobj".into(),
            version_id: Some(v0.clone()),
            conditions: Preconditions::default(),
        };
        let copied = service
            .copy_object(&source, "target", "key_0", MetadataDirective::Copy, TaggingDirective::Copy)
            .await
            .unwrap();
        assert_eq!(copied.source_version_id.as_deref(), Some(v0.as_str()));
        assert_eq!(copied.put.version_id, None);
        assert_eq!(read_body(&service, "target", "key_0", None).await, "content-0");

        let object = service
            .head_object("target", "key_0", None, &Preconditions::default())
            .await
            .unwrap();
        assert_eq!(object.content.content_type.as_deref(), Some("text/csv"));
        assert_eq!(object.metadata, vec![("origin".to_string(), "source".to_string())]);

        let latest = CopySource {
            version_id: None,
            ..source.clone()
        };
        let replaced = service
            .copy_object(
                &latest,
                "source",
                "new_key",
                MetadataDirective::Replace(ObjectWrite::default()),
                TaggingDirective::Copy,
            )
            .await
            .unwrap();
        assert!(replaced.put.version_id.is_some());
        assert_eq!(read_body(&service, "source", "new_key", None).await, "content-1");
        let object = service
            .head_object("source", "new_key", None, &Preconditions::default())
            .await
            .unwrap();
        assert!(object.metadata.is_empty());
    }

    #[tokio::test]
    async fn copy_from_delete_marker_is_not_found() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;
        put(&service, "bucket", "k", "x").await;
        let marker = service
            .delete_object("bucket", "k", None)
            .await
            .unwrap()
            .version_id;

        for version_id in [None, marker] {
            let source = CopySource {
                bucket: "bucket".into(),
                key: "k".into(),
                version_id,
                conditions: Preconditions::default(),
            };
            let err = service
                .copy_object(&source, "bucket", "dst", MetadataDirective::Copy, TaggingDirective::Copy)
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::ObjectNotFound { .. }));
        }
    }

    #[tokio::test]
    async fn copy_source_conditions_are_checked() {
        let (service, _temp) = service().await;
        service.create_bucket("bucket", "local".into()).await.unwrap();
        put(&service, "bucket", "src", "payload").await;

        let source = CopySource {
            bucket: "bucket".into(),
            key: "src".into(),
            version_id: None,
            conditions: Preconditions {
                if_match: Some("\"not-the-etag\"".into()),
                ..Default::default()
            },
        };
        let err = service
            .copy_object(&source, "bucket", "dst", MetadataDirective::Copy, TaggingDirective::Copy)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed));
    }

    #[tokio::test]
    async fn get_checks_read_preconditions() {
        let (service, _temp) = service().await;
        service.create_bucket("bucket", "local".into()).await.unwrap();
        let etag = put(&service, "bucket", "k", "abc")
            .await
            .entry
            .content()
            .unwrap()
            .etag
            .clone();

        let not_modified = Preconditions {
            if_none_match: Some(format!("\"{}\"", etag)),
            ..Default::default()
        };
        assert!(matches!(
            service.get_object_reader("bucket", "k", None, &not_modified).await,
            Err(StorageError::NotModified { .. })
        ));

        let failed = Preconditions {
            if_match: Some("\"zzz\"".into()),
            ..Default::default()
        };
        assert!(matches!(
            service.head_object("bucket", "k", None, &failed).await,
            Err(StorageError::PreconditionFailed)
        ));
    }

    #[tokio::test]
    async fn removed_versions_release_payload_files() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;
        let outcome = put(&service, "bucket", "k", "bytes").await;
        let payload_id = outcome.entry.payload_id().unwrap();
        let path = service.payload_path("bucket", "k", payload_id);
        assert!(path.exists());

        service
            .delete_object("bucket", "k", outcome.version_id.as_deref())
            .await
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn content_md5_mismatch_stores_nothing() {
        let (service, _temp) = service().await;
        service.create_bucket("bucket", "local".into()).await.unwrap();

        let write = ObjectWrite {
            content_md5: Some(format!("{:x}", md5::compute("other"))),
            ..Default::default()
        };
        assert!(matches!(
            service.put_object_stream("bucket", "k", write, body("data")).await,
            Err(StorageError::BadDigest)
        ));
        assert!(list_all(&service, "bucket").await.is_empty());

        let write = ObjectWrite {
            content_md5: Some(format!("{:x}", md5::compute("data"))),
            ..Default::default()
        };
        service
            .put_object_stream("bucket", "k", write, body("data"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_bucket_and_key_errors() {
        let (service, _temp) = service().await;
        assert!(matches!(
            service.delete_object("nobucket", "k", None).await,
            Err(StorageError::BucketNotFound(_))
        ));

        service.create_bucket("bucket", "local".into()).await.unwrap();
        assert!(matches!(
            service
                .head_object("bucket", "nokey", None, &Preconditions::default())
                .await,
            Err(StorageError::ObjectNotFound { .. })
        ));
        assert!(matches!(
            service
                .put_object_stream("bucket", "", ObjectWrite::default(), body("x"))
                .await,
            Err(StorageError::InvalidObjectKey)
        ));
    }

    #[tokio::test]
    async fn special_key_names_round_trip() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;

        for key in ["_testobj", "_", ":", " ", "../escape"] {
            let v = put(&service, "bucket", key, "data").await.version_id.unwrap();
            assert_eq!(read_body(&service, "bucket", key, Some(&v)).await, "data");
            service.delete_object("bucket", key, Some(&v)).await.unwrap();
        }
        assert!(list_all(&service, "bucket").await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_puts_each_get_their_own_version() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { put(&service, "bucket", "myobj", "data").await })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().version_id.unwrap());
        }
        assert_eq!(ids.len(), 8);

        let listed = list_all(&service, "bucket").await;
        assert_eq!(listed.len(), 8);
        assert_eq!(listed.iter().filter(|l| l.is_latest).count(), 1);
    }

    #[tokio::test]
    async fn concurrent_create_and_remove_drains_bucket() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;

        let mut tasks = Vec::new();
        for _ in 0..3 {
            for _ in 0..3 {
                let service = service.clone();
                tasks.push(tokio::spawn(async move {
                    put(&service, "bucket", "myobj", "data").await;
                }));
            }
            for listed in list_all(&service, "bucket").await {
                let service = service.clone();
                tasks.push(tokio::spawn(async move {
                    service
                        .delete_object("bucket", &listed.entry.key, Some(&listed.entry.version_id))
                        .await
                        .unwrap();
                }));
            }
        }
        for task in tasks {
            task.await.unwrap();
        }

        let remaining = list_all(&service, "bucket").await;
        let clears: Vec<_> = remaining
            .into_iter()
            .map(|listed| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .delete_object("bucket", &listed.entry.key, Some(&listed.entry.version_id))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in clears {
            task.await.unwrap();
        }

        assert!(list_all(&service, "bucket").await.is_empty());
    }

    #[tokio::test]
    async fn ranged_reads_select_bytes_of_the_resolved_version() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;
        let first = put(&service, "bucket", "k", "testcontent").await;
        put(&service, "bucket", "k", "other").await;

        let mut body = service
            .get_object_body(
                "bucket",
                "k",
                first.version_id.as_deref(),
                &Preconditions::default(),
                Some("bytes=4-7"),
            )
            .await
            .unwrap();
        let mut out = String::new();
        body.reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "cont");
        assert_eq!(body.range, Some(ByteRange { start: 4, end: 7 }));

        let err = service
            .get_object_body("bucket", "k", None, &Preconditions::default(), Some("bytes=40-50"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRange { size: 5 }));

        let mut whole = service
            .get_object_body("bucket", "k", None, &Preconditions::default(), None)
            .await
            .unwrap();
        let mut out = String::new();
        whole.reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "other");
        assert_eq!(whole.range, None);
    }

    #[tokio::test]
    async fn zero_max_keys_lists_nothing() {
        let (service, _temp) = service().await;
        versioned_bucket(&service, "bucket").await;
        put(&service, "bucket", "k", "data").await;

        let result = service
            .list_object_versions("bucket", ListVersionsParams::default())
            .await
            .unwrap();
        assert!(result.entries.is_empty());
        assert!(!result.is_truncated);
        assert_eq!(result.next_key_marker, None);
    }

    #[tokio::test]
    async fn copy_carries_or_replaces_tags() {
        let (service, _temp) = service().await;
        service.create_bucket("bucket", "local".into()).await.unwrap();
        let write = ObjectWrite {
            tags: vec![("team".into(), "storage".into())],
            ..Default::default()
        };
        service
            .put_object_stream("bucket", "src", write, body("data"))
            .await
            .unwrap();
        let source = CopySource {
            bucket: "bucket".into(),
            key: "src".into(),
            version_id: None,
            conditions: Preconditions::default(),
        };

        service
            .copy_object(&source, "bucket", "kept", MetadataDirective::Copy, TaggingDirective::Copy)
            .await
            .unwrap();
        let (object, tags) = service.get_object_tagging("bucket", "kept", None).await.unwrap();
        assert_eq!(tags, vec![("team".to_string(), "storage".to_string())]);
        assert_eq!(object.tag_count, 1);

        service
            .copy_object(
                &source,
                "bucket",
                "retagged",
                MetadataDirective::Copy,
                TaggingDirective::Replace(vec![("a".into(), "1".into()), ("b".into(), "2".into())]),
            )
            .await
            .unwrap();
        let (_, tags) = service.get_object_tagging("bucket", "retagged", None).await.unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0], ("a".to_string(), "1".to_string()));
    }
}
