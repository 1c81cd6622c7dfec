//! HTTP handlers for bucket-level operations: create/delete/head, listing,
//! versioning configuration and multi-object delete.

use super::xml::{
    CreateBucketConfiguration, DeleteRequest, VersioningConfiguration, XmlWriter, element,
    iso8601, optional_text, owner, parse_xml, text_element, to_xml, xml_response,
};
use crate::{
    errors::AppError,
    models::{
        bucket::VersioningState,
        object::{EntryKind, VersionEntry},
    },
    services::{
        storage_service::{ListObjectsParams, ListObjectsResult, MAX_LIST_KEYS, StorageService},
        versioning::{ListVersionsParams, ListVersionsResult},
    },
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use tracing::debug;

/// Query params accepted on `/{bucket}`. Sub-resource flags (`?versioning`,
/// `?versions`, `?delete`) arrive with empty values.
#[derive(Debug, Default, Deserialize)]
pub struct BucketQuery {
    pub versioning: Option<String>,
    pub versions: Option<String>,
    pub delete: Option<String>,
    #[serde(rename = "list-type")]
    pub list_type: Option<u8>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    pub marker: Option<String>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
    #[serde(rename = "key-marker")]
    pub key_marker: Option<String>,
    #[serde(rename = "version-id-marker")]
    pub version_id_marker: Option<String>,
}

/// GET `/`: ListBuckets.
pub async fn list_buckets(State(service): State<StorageService>) -> Result<Response, AppError> {
    let buckets = service.list_buckets().await?;
    let xml = to_xml("ListAllMyBucketsResult", |w| {
        element(w, "Buckets", |w| {
            for bucket in &buckets {
                element(w, "Bucket", |w| {
                    text_element(w, "Name", &bucket.name)?;
                    text_element(w, "CreationDate", &iso8601(&bucket.created_at))
                })?;
            }
            Ok(())
        })
    })?;
    Ok(xml_response(xml))
}

/// PUT `/{bucket}`: create bucket, or `?versioning` to configure versioning.
pub async fn put_bucket(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
    Query(q): Query<BucketQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    if q.versioning.is_some() {
        return put_bucket_versioning(&service, &bucket, &body).await;
    }

    let config = if body.iter().all(u8::is_ascii_whitespace) {
        CreateBucketConfiguration::default()
    } else {
        parse_xml::<CreateBucketConfiguration>(&body)?
    };
    let region = config
        .location_constraint
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "local".into());

    service.create_bucket(&bucket, region).await?;

    let mut response = Response::new(Body::empty());
    response.headers_mut().insert(
        header::LOCATION,
        HeaderValue::from_str(&format!("/{}", bucket))
            .unwrap_or_else(|_| HeaderValue::from_static("/")),
    );
    Ok(response)
}

async fn put_bucket_versioning(
    service: &StorageService,
    bucket: &str,
    body: &Bytes,
) -> Result<Response, AppError> {
    let config: VersioningConfiguration = parse_xml(body)?;
    let status = config.status.unwrap_or_default();
    let state = VersioningState::from_status(&status).ok_or_else(|| {
        AppError::invalid_argument(format!("invalid versioning status `{}`", status))
    })?;

    service.put_bucket_versioning(bucket, state).await?;
    Ok(StatusCode::OK.into_response())
}

/// DELETE `/{bucket}`: delete an empty bucket.
pub async fn delete_bucket(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// HEAD `/{bucket}`.
pub async fn head_bucket(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.head_bucket(&bucket).await?;
    Ok(StatusCode::OK)
}

/// GET `/{bucket}`: `?versioning`, `?versions` or ListObjects (v1 unless
/// `list-type=2`).
pub async fn get_bucket(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
    Query(q): Query<BucketQuery>,
) -> Result<Response, AppError> {
    if q.versioning.is_some() {
        let state = service.get_bucket_versioning(&bucket).await?;
        let xml = to_xml("VersioningConfiguration", |w| {
            optional_text(w, "Status", state.status())
        })?;
        return Ok(xml_response(xml));
    }

    if q.versions.is_some() {
        return list_object_versions(&service, &bucket, q).await;
    }

    match q.list_type {
        None | Some(1) => list_objects_v1(&service, &bucket, q).await,
        Some(2) => list_objects_v2(&service, &bucket, q).await,
        Some(other) => Err(AppError::invalid_argument(format!(
            "unsupported list-type {}",
            other
        ))),
    }
}

fn max_keys(q: &BucketQuery) -> usize {
    q.max_keys.unwrap_or(MAX_LIST_KEYS).min(MAX_LIST_KEYS)
}

async fn list_object_versions(
    service: &StorageService,
    bucket: &str,
    q: BucketQuery,
) -> Result<Response, AppError> {
    let params = ListVersionsParams {
        max_keys: max_keys(&q),
        prefix: q.prefix,
        key_marker: q.key_marker,
        version_id_marker: q.version_id_marker,
    };
    let result = service
        .list_object_versions(bucket, params.clone())
        .await?;
    Ok(xml_response(list_versions_xml(bucket, &params, &result)?))
}

async fn list_objects_v1(
    service: &StorageService,
    bucket: &str,
    q: BucketQuery,
) -> Result<Response, AppError> {
    let params = ListObjectsParams {
        max_keys: max_keys(&q),
        prefix: q.prefix,
        delimiter: q.delimiter,
        start_after: q.marker.clone(),
    };
    let result = service.list_objects(bucket, params.clone()).await?;

    let xml = to_xml("ListBucketResult", |w| {
        text_element(w, "Name", bucket)?;
        text_element(w, "Prefix", params.prefix.as_deref().unwrap_or(""))?;
        text_element(w, "Marker", q.marker.as_deref().unwrap_or(""))?;
        text_element(w, "MaxKeys", &params.max_keys.to_string())?;
        optional_text(w, "Delimiter", params.delimiter.as_deref())?;
        text_element(w, "IsTruncated", &result.is_truncated.to_string())?;
        optional_text(w, "NextMarker", result.next_marker.as_deref())?;
        write_listing(w, &result, true)
    })?;
    Ok(xml_response(xml))
}

async fn list_objects_v2(
    service: &StorageService,
    bucket: &str,
    q: BucketQuery,
) -> Result<Response, AppError> {
    // A continuation token takes precedence over start-after.
    let resume = q
        .continuation_token
        .as_deref()
        .map(decode_continuation_token)
        .or_else(|| q.start_after.clone());
    let params = ListObjectsParams {
        max_keys: max_keys(&q),
        prefix: q.prefix.clone(),
        delimiter: q.delimiter.clone(),
        start_after: resume,
    };
    let result = service.list_objects(bucket, params.clone()).await?;
    let next_token = result.next_marker.as_deref().map(encode_continuation_token);

    let xml = to_xml("ListBucketResult", |w| {
        text_element(w, "Name", bucket)?;
        text_element(w, "Prefix", params.prefix.as_deref().unwrap_or(""))?;
        text_element(w, "MaxKeys", &params.max_keys.to_string())?;
        text_element(w, "KeyCount", &result.key_count.to_string())?;
        optional_text(w, "ContinuationToken", q.continuation_token.as_deref())?;
        optional_text(w, "StartAfter", q.start_after.as_deref())?;
        optional_text(w, "Delimiter", params.delimiter.as_deref())?;
        text_element(w, "IsTruncated", &result.is_truncated.to_string())?;
        optional_text(w, "NextContinuationToken", next_token.as_deref())?;
        write_listing(w, &result, false)
    })?;
    Ok(xml_response(xml))
}

/// `<Contents>` then `<CommonPrefixes>` of a ListObjects page.
fn write_listing(
    w: &mut XmlWriter,
    result: &ListObjectsResult,
    with_owner: bool,
) -> quick_xml::Result<()> {
    for obj in &result.objects {
        let Some(content) = obj.content() else {
            continue;
        };
        element(w, "Contents", |w| {
            text_element(w, "Key", &obj.key)?;
            text_element(w, "LastModified", &iso8601(&obj.last_modified))?;
            text_element(w, "ETag", &format!("\"{}\"", content.etag))?;
            text_element(w, "Size", &content.size_bytes.to_string())?;
            if with_owner {
                owner(w, &obj.owner_id.simple().to_string())?;
            }
            text_element(w, "StorageClass", &content.storage_class)
        })?;
    }
    for prefix in &result.common_prefixes {
        element(w, "CommonPrefixes", |w| text_element(w, "Prefix", prefix))?;
    }
    Ok(())
}

/// Per-object outcome of a multi-object delete.
enum DeleteResultEntry {
    Deleted {
        key: String,
        version_id: Option<String>,
        marker_version_id: Option<Option<String>>,
    },
    Failed {
        key: String,
        version_id: Option<String>,
        code: &'static str,
        message: String,
    },
}

/// POST `/{bucket}?delete`: multi-object delete.
pub async fn post_bucket(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
    Query(q): Query<BucketQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    if q.delete.is_none() {
        return Err(AppError::invalid_argument(
            "unsupported bucket POST; expected ?delete",
        ));
    }

    let request: DeleteRequest = parse_xml(&body)?;
    if request.objects.len() > 1000 {
        return Err(AppError::malformed_xml(
            "a delete request may name at most 1000 objects",
        ));
    }
    // The bucket must exist even when the object list is empty.
    service.head_bucket(&bucket).await?;

    let mut entries = Vec::with_capacity(request.objects.len());
    for object in request.objects {
        match service
            .delete_object(&bucket, &object.key, object.version_id.as_deref())
            .await
        {
            // Quiet mode reports failures only.
            Ok(_) if request.quiet => {}
            Ok(outcome) => entries.push(DeleteResultEntry::Deleted {
                key: object.key,
                version_id: object.version_id,
                marker_version_id: outcome.delete_marker.then_some(outcome.version_id),
            }),
            Err(err) => {
                let err = AppError::from(err);
                debug!(bucket = %bucket, key = %object.key, code = err.code, "multi-delete entry failed");
                entries.push(DeleteResultEntry::Failed {
                    key: object.key,
                    version_id: object.version_id,
                    code: err.code,
                    message: err.message,
                });
            }
        }
    }

    let xml = to_xml("DeleteResult", |w| {
        for entry in &entries {
            match entry {
                DeleteResultEntry::Deleted {
                    key,
                    version_id,
                    marker_version_id,
                } => element(w, "Deleted", |w| {
                    text_element(w, "Key", key)?;
                    optional_text(w, "VersionId", version_id.as_deref())?;
                    if let Some(marker_id) = marker_version_id {
                        text_element(w, "DeleteMarker", "true")?;
                        optional_text(w, "DeleteMarkerVersionId", marker_id.as_deref())?;
                    }
                    Ok(())
                })?,
                DeleteResultEntry::Failed {
                    key,
                    version_id,
                    code,
                    message,
                } => element(w, "Error", |w| {
                    text_element(w, "Key", key)?;
                    optional_text(w, "VersionId", version_id.as_deref())?;
                    text_element(w, "Code", code)?;
                    text_element(w, "Message", message)
                })?,
            }
        }
        Ok(())
    })?;
    Ok(xml_response(xml))
}

fn list_versions_xml(
    bucket: &str,
    params: &ListVersionsParams,
    result: &ListVersionsResult,
) -> quick_xml::Result<Vec<u8>> {
    to_xml("ListVersionsResult", |w| {
        text_element(w, "Name", bucket)?;
        text_element(w, "Prefix", params.prefix.as_deref().unwrap_or(""))?;
        text_element(w, "KeyMarker", params.key_marker.as_deref().unwrap_or(""))?;
        text_element(
            w,
            "VersionIdMarker",
            params.version_id_marker.as_deref().unwrap_or(""),
        )?;
        text_element(w, "MaxKeys", &params.max_keys.to_string())?;
        text_element(w, "IsTruncated", &result.is_truncated.to_string())?;
        optional_text(w, "NextKeyMarker", result.next_key_marker.as_deref())?;
        optional_text(
            w,
            "NextVersionIdMarker",
            result.next_version_id_marker.as_deref(),
        )?;
        for listed in &result.entries {
            write_version(w, &listed.entry, listed.is_latest)?;
        }
        Ok(())
    })
}

fn write_version(w: &mut XmlWriter, entry: &VersionEntry, is_latest: bool) -> quick_xml::Result<()> {
    let tag = match entry.kind {
        EntryKind::Content(_) => "Version",
        EntryKind::DeleteMarker => "DeleteMarker",
    };
    element(w, tag, |w| {
        text_element(w, "Key", &entry.key)?;
        text_element(w, "VersionId", &entry.version_id)?;
        text_element(w, "IsLatest", &is_latest.to_string())?;
        text_element(w, "LastModified", &iso8601(&entry.last_modified))?;
        if let EntryKind::Content(content) = &entry.kind {
            text_element(w, "ETag", &format!("\"{}\"", content.etag))?;
            text_element(w, "Size", &content.size_bytes.to_string())?;
            text_element(w, "StorageClass", &content.storage_class)?;
        }
        owner(w, &entry.owner_id.simple().to_string())
    })
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
