//! Multipart upload sessions: parts are staged under
//! `base_path/.multipart/{upload-row-id}/{file-id}` and concatenated into a
//! single content entry on completion.
//!
//! Uploading a part, completing and aborting all serialize on the upload's
//! guard. Part bodies are streamed and verified before the guard is taken.

use super::{
    storage_service::{
        MULTIPART_DIR, StorageError, StorageResult, StorageService, delete_owned_rows,
        prune_empty_dirs, remove_dir_best_effort, write_stream_to,
    },
    tagging::{insert_tags, validate_tags},
    versioning::{ObjectWrite, PutOutcome, insert_metadata},
};
use crate::models::{
    bucket::Bucket,
    multipart::{MultipartPart, MultipartUpload},
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use md5::Context;
use sqlx::sqlite::Sqlite;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MAX_PART_NUMBER: i32 = 10_000;

/// One `<Part>` of a CompleteMultipartUpload request.
#[derive(Clone, Debug)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

impl StorageService {
    /// Start a multipart session for `bucket/key`. Content type, user
    /// metadata and tags are kept until completion.
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        write: ObjectWrite,
    ) -> StorageResult<MultipartUpload> {
        self.ensure_key_valid(key)?;
        validate_tags(&write.tags)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let upload = MultipartUpload {
            id: Uuid::new_v4(),
            bucket_id: bucket_rec.id,
            key: key.to_string(),
            upload_id: Uuid::new_v4().simple().to_string(),
            content_type: write.content_type,
            initiated_at: Utc::now(),
        };

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO multipart_uploads (id, bucket_id, key, upload_id, content_type, initiated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(upload.id)
        .bind(upload.bucket_id)
        .bind(&upload.key)
        .bind(&upload.upload_id)
        .bind(upload.content_type.as_deref())
        .bind(upload.initiated_at)
        .execute(&mut *tx)
        .await?;
        insert_metadata(&mut tx, upload.id, &write.metadata).await?;
        insert_tags(&mut tx, upload.id, &write.tags).await?;
        tx.commit().await?;

        fs::create_dir_all(self.upload_dir(upload.id)).await?;
        info!(bucket = %bucket, key, upload_id = %upload.upload_id, "multipart upload started");
        Ok(upload)
    }

    /// Store (or replace) one part of an upload.
    ///
    /// The body lands in a fresh file first. A digest mismatch discards
    /// only that file, so an earlier accepted body of the same part number
    /// stays intact.
    pub async fn upload_part<S>(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        content_md5: Option<&str>,
        stream: S,
    ) -> StorageResult<MultipartPart>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(StorageError::InvalidArgument(format!(
                "part number must be an integer between 1 and {}",
                MAX_PART_NUMBER
            )));
        }
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(&bucket_rec, key, upload_id).await?;

        let file_id = Uuid::new_v4();
        let staged = self.part_path(upload.id, file_id);
        let (size_bytes, etag) = write_stream_to(&staged, stream).await?;
        if let Some(expected) = content_md5 {
            if !expected.eq_ignore_ascii_case(&etag) {
                discard_part_file(&staged).await;
                return Err(StorageError::BadDigest);
            }
        }

        let guard = self.locks.lock(MULTIPART_DIR, &upload.upload_id).await;
        let result = async {
            // Completed or aborted while the body was streaming.
            let upload = self.fetch_upload(&bucket_rec, key, upload_id).await?;
            let replaced: Option<Uuid> = sqlx::query_scalar(
                "SELECT file_id FROM multipart_parts WHERE upload_id = ? AND part_number = ?",
            )
            .bind(upload.id)
            .bind(part_number)
            .fetch_optional(&*self.db)
            .await?;

            let part = sqlx::query_as::<Sqlite, MultipartPart>(
                "INSERT INTO multipart_parts
                    (id, upload_id, part_number, file_id, size_bytes, etag, uploaded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(upload_id, part_number) DO UPDATE SET
                    file_id = excluded.file_id,
                    size_bytes = excluded.size_bytes,
                    etag = excluded.etag,
                    uploaded_at = excluded.uploaded_at
                 RETURNING id, upload_id, part_number, file_id, size_bytes, etag, uploaded_at",
            )
            .bind(Uuid::new_v4())
            .bind(upload.id)
            .bind(part_number)
            .bind(file_id)
            .bind(size_bytes)
            .bind(&etag)
            .bind(Utc::now())
            .fetch_one(&*self.db)
            .await?;

            if let Some(old) = replaced {
                if let Err(err) = fs::remove_file(self.part_path(upload.id, old)).await {
                    warn!(upload_id = %upload.upload_id, part_number, "failed to remove replaced part: {}", err);
                }
            }
            Ok::<_, StorageError>(part)
        }
        .await;
        drop(guard);

        match result {
            Ok(part) => {
                debug!(upload_id = %upload.upload_id, part_number, size_bytes, "part stored");
                Ok(part)
            }
            Err(err) => {
                discard_part_file(&staged).await;
                if matches!(err, StorageError::UploadNotFound(_)) {
                    // Staging may have recreated the directory of a finished upload.
                    prune_empty_dirs(
                        &self.upload_dir(upload.id),
                        &self.base_path.join(MULTIPART_DIR),
                    )
                    .await;
                }
                Err(err)
            }
        }
    }

    /// Parts stored so far, ascending by part number.
    pub async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<(MultipartUpload, Vec<MultipartPart>)> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(&bucket_rec, key, upload_id).await?;
        let parts = self.stored_parts(upload.id).await?;
        Ok((upload, parts))
    }

    /// Discard an upload and its staged parts.
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let _guard = self.locks.lock(MULTIPART_DIR, upload_id).await;
        let upload = self.fetch_upload(&bucket_rec, key, upload_id).await?;

        self.forget_upload(&upload).await?;
        info!(bucket = %bucket, key, upload_id, "multipart upload aborted");
        Ok(())
    }

    /// Assemble the listed parts into a new content entry of `key`.
    ///
    /// The entry follows the bucket's versioning mode at the moment of
    /// completion, not at the moment the upload started.
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<PutOutcome> {
        if parts.is_empty() {
            return Err(StorageError::InvalidArgument(
                "at least one part must be specified".into(),
            ));
        }
        if parts
            .windows(2)
            .any(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(StorageError::InvalidPartOrder);
        }

        let bucket_rec = self.fetch_bucket(bucket).await?;
        let _guard = self.locks.lock(MULTIPART_DIR, upload_id).await;
        let upload = self.fetch_upload(&bucket_rec, key, upload_id).await?;

        let stored: HashMap<i32, MultipartPart> = self
            .stored_parts(upload.id)
            .await?
            .into_iter()
            .map(|part| (part.part_number, part))
            .collect();

        let mut composite = Context::new();
        let mut paths: Vec<PathBuf> = Vec::with_capacity(parts.len());
        for requested in parts {
            let part = stored
                .get(&requested.part_number)
                .filter(|part| part.etag == requested.etag.trim().trim_matches('"'))
                .ok_or(StorageError::InvalidPart(requested.part_number))?;
            let digest = hex::decode(&part.etag).map_err(|_| {
                StorageError::Corrupted(format!("part {} has a malformed etag", part.part_number))
            })?;
            composite.consume(&digest);
            paths.push(self.part_path(upload.id, part.file_id));
        }
        let etag = format!("{:x}-{}", composite.compute(), parts.len());

        let body = stream::iter(paths)
            .then(File::open)
            .map_ok(ReaderStream::new)
            .try_flatten();
        let payload = self.write_payload(&bucket_rec.name, key, body).await?;

        let write = ObjectWrite {
            content_type: upload.content_type.clone(),
            metadata: self.load_metadata(upload.id).await?,
            tags: self.load_tags(upload.id).await?,
            content_md5: None,
        };
        let outcome = self
            .commit_content(&bucket_rec, key, payload, etag, write)
            .await?;

        self.forget_upload(&upload).await?;
        info!(bucket = %bucket, key, upload_id, parts = parts.len(), "multipart upload completed");
        Ok(outcome)
    }

    async fn fetch_upload(
        &self,
        bucket: &Bucket,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<MultipartUpload> {
        sqlx::query_as::<Sqlite, MultipartUpload>(
            "SELECT id, bucket_id, key, upload_id, content_type, initiated_at
             FROM multipart_uploads WHERE upload_id = ? AND bucket_id = ? AND key = ?",
        )
        .bind(upload_id)
        .bind(bucket.id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))
    }

    async fn stored_parts(&self, upload_row_id: Uuid) -> StorageResult<Vec<MultipartPart>> {
        let parts = sqlx::query_as::<Sqlite, MultipartPart>(
            "SELECT id, upload_id, part_number, file_id, size_bytes, etag, uploaded_at
             FROM multipart_parts WHERE upload_id = ? ORDER BY part_number",
        )
        .bind(upload_row_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(parts)
    }

    fn part_path(&self, upload_row_id: Uuid, file_id: Uuid) -> PathBuf {
        self.upload_dir(upload_row_id)
            .join(file_id.simple().to_string())
    }

    /// Drop the session rows (parts cascade) and the staging directory.
    async fn forget_upload(&self, upload: &MultipartUpload) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;
        delete_owned_rows(&mut tx, upload.id).await?;
        sqlx::query("DELETE FROM multipart_uploads WHERE id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        remove_dir_best_effort(&self.upload_dir(upload.id)).await;
        Ok(())
    }
}

/// Remove a staged part body that was never accepted.
async fn discard_part_file(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove staged part {}: {}", path.display(), err);
        }
    }
}
