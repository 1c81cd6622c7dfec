//! Object tags: a small key/value set attached to one version entry.
//!
//! Tags are replaced as a whole, never merged. Writes hold the key guard so
//! the tagged version cannot be removed halfway through.

use super::storage_service::{StorageError, StorageResult, StorageService};
use crate::models::{metadata::ObjectTag, object::StoredObject};
use sqlx::SqliteConnection;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

pub const MAX_TAGS: usize = 10;
const MAX_TAG_KEY_LEN: usize = 128;
const MAX_TAG_VALUE_LEN: usize = 256;

/// Tags as `(key, value)` pairs in request order.
pub type TagSet = Vec<(String, String)>;

/// Check a tag set against S3 limits: at most ten tags, keys of 1 to 128
/// characters, values of at most 256, no repeated key.
pub fn validate_tags(tags: &[(String, String)]) -> StorageResult<()> {
    if tags.len() > MAX_TAGS {
        return Err(StorageError::TooManyTags(MAX_TAGS));
    }

    let mut seen = HashSet::with_capacity(tags.len());
    for (key, value) in tags {
        let key_len = key.chars().count();
        if key_len == 0 || key_len > MAX_TAG_KEY_LEN {
            return Err(StorageError::InvalidTag(format!(
                "the tag key must be between 1 and {} characters",
                MAX_TAG_KEY_LEN
            )));
        }
        if value.chars().count() > MAX_TAG_VALUE_LEN {
            return Err(StorageError::InvalidTag(format!(
                "the tag value must be at most {} characters",
                MAX_TAG_VALUE_LEN
            )));
        }
        if !seen.insert(key.as_str()) {
            return Err(StorageError::InvalidTag(format!(
                "cannot provide multiple tags with the key `{}`",
                key
            )));
        }
    }
    Ok(())
}

impl StorageService {
    /// Tags of a readable version together with the version itself.
    pub async fn get_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<(StoredObject, TagSet)> {
        let object = self.resolve_object(bucket, key, version_id).await?;
        let tags = self.load_tags(object.row_id).await?;
        Ok((object, tags))
    }

    /// Replace the tag set of a readable version.
    pub async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        tags: TagSet,
    ) -> StorageResult<StoredObject> {
        validate_tags(&tags)?;
        self.replace_tags(bucket, key, version_id, &tags).await
    }

    /// Remove every tag of a readable version.
    pub async fn delete_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<StoredObject> {
        self.replace_tags(bucket, key, version_id, &[]).await
    }

    async fn replace_tags(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        tags: &[(String, String)],
    ) -> StorageResult<StoredObject> {
        let _guard = self.locks.lock(bucket, key).await;
        let mut object = self.resolve_object(bucket, key, version_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_tags WHERE object_id = ?")
            .bind(object.row_id)
            .execute(&mut *tx)
            .await?;
        insert_tags(&mut tx, object.row_id, tags).await?;
        tx.commit().await?;

        info!(bucket = %bucket, key, version_id = %object.version_id, tags = tags.len(), "object tags replaced");
        object.tag_count = tags.len() as i64;
        Ok(object)
    }

    pub(crate) async fn load_tags(&self, object_id: Uuid) -> StorageResult<TagSet> {
        let rows = sqlx::query_as::<_, ObjectTag>(
            "SELECT id, object_id, key, value FROM object_tags WHERE object_id = ? ORDER BY key",
        )
        .bind(object_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(|tag| (tag.key, tag.value)).collect())
    }

    pub(crate) async fn count_tags(&self, object_id: Uuid) -> StorageResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM object_tags WHERE object_id = ?")
            .bind(object_id)
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }
}

pub(crate) async fn insert_tags(
    conn: &mut SqliteConnection,
    object_id: Uuid,
    tags: &[(String, String)],
) -> Result<(), sqlx::Error> {
    for (key, value) in tags {
        sqlx::query("INSERT INTO object_tags (id, object_id, key, value) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(object_id)
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
