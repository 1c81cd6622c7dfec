//! HTTP handlers for object operations.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `StorageService`. Multipart sub-resources (`?uploads`,
//! `?uploadId`) are forwarded to `multipart_handlers`; `?tagging` is handled
//! here.

use super::{
    multipart_handlers,
    xml::{Tagging, element, http_date, iso8601, parse_xml, text_element, to_xml, xml_response},
};
use crate::{
    errors::AppError,
    models::object::StoredObject,
    services::{
        conditions::Preconditions,
        storage_service::StorageService,
        tagging::TagSet,
        versioning::{CopySource, MetadataDirective, ObjectWrite, TaggingDirective},
    },
};
use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;

const META_PREFIX: &str = "x-amz-meta-";
const VERSION_ID_HEADER: &str = "x-amz-version-id";
const TAGGING_HEADER: &str = "x-amz-tagging";

/// Largest `PUT ?tagging` document accepted.
const MAX_TAGGING_BODY: usize = 64 * 1024;

/// Query params accepted on `/{bucket}/{*key}`.
#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    #[serde(rename = "versionId")]
    pub version_id: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    #[serde(rename = "partNumber")]
    pub part_number: Option<String>,
    pub uploads: Option<String>,
    pub tagging: Option<String>,
}

/// PUT `/{bucket}/{*key}`: upload, copy (`x-amz-copy-source`), upload a
/// multipart part (`?partNumber&uploadId`) or replace tags (`?tagging`).
pub async fn put_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    if let Some(upload_id) = q.upload_id.as_deref() {
        return multipart_handlers::upload_part(
            &service,
            &bucket,
            &key,
            upload_id,
            q.part_number.as_deref(),
            &headers,
            body,
        )
        .await;
    }

    if q.tagging.is_some() {
        return put_object_tagging(&service, &bucket, &key, q.version_id.as_deref(), body).await;
    }

    if let Some(source) = headers.get("x-amz-copy-source") {
        return copy_object(&service, &bucket, &key, source, &headers).await;
    }

    let write = ObjectWrite {
        content_type: content_type(&headers),
        metadata: user_metadata(&headers),
        content_md5: content_md5(&headers)?,
        tags: tagging_header(&headers)?,
    };
    let outcome = service
        .put_object_stream(&bucket, &key, write, body_stream(body))
        .await?;

    let mut response = Response::new(Body::empty());
    let resp_headers = response.headers_mut();
    if let Some(content) = outcome.entry.content() {
        insert_header(resp_headers, header::ETAG, &format!("\"{}\"", content.etag));
    }
    if let Some(version_id) = &outcome.version_id {
        insert_header(
            resp_headers,
            HeaderName::from_static(VERSION_ID_HEADER),
            version_id,
        );
    }
    Ok(response)
}

async fn copy_object(
    service: &StorageService,
    bucket: &str,
    key: &str,
    source: &HeaderValue,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let raw = source
        .to_str()
        .map_err(|_| AppError::invalid_argument("copy source is not valid UTF-8"))?;
    let (src_bucket, src_key, src_version) = parse_copy_source(raw)?;

    let directive = match header_str(headers, "x-amz-metadata-directive") {
        None | Some("COPY") => MetadataDirective::Copy,
        Some("REPLACE") => MetadataDirective::Replace(ObjectWrite {
            content_type: content_type(headers),
            metadata: user_metadata(headers),
            ..Default::default()
        }),
        Some(other) => {
            return Err(AppError::invalid_argument(format!(
                "unknown metadata directive `{}`",
                other
            )));
        }
    };
    let tagging = match header_str(headers, "x-amz-tagging-directive") {
        None | Some("COPY") => TaggingDirective::Copy,
        Some("REPLACE") => TaggingDirective::Replace(tagging_header(headers)?),
        Some(other) => {
            return Err(AppError::invalid_argument(format!(
                "unknown tagging directive `{}`",
                other
            )));
        }
    };

    let source = CopySource {
        bucket: src_bucket,
        key: src_key,
        version_id: src_version,
        conditions: preconditions(headers, "x-amz-copy-source-"),
    };
    let outcome = service
        .copy_object(&source, bucket, key, directive, tagging)
        .await?;

    let etag = outcome
        .put
        .entry
        .content()
        .map(|c| c.etag.clone())
        .unwrap_or_default();
    let xml = to_xml("CopyObjectResult", |w| {
        text_element(w, "LastModified", &iso8601(&outcome.put.entry.last_modified))?;
        text_element(w, "ETag", &format!("\"{}\"", etag))
    })?;
    let mut response = xml_response(xml);
    let resp_headers = response.headers_mut();
    if let Some(version_id) = &outcome.put.version_id {
        insert_header(
            resp_headers,
            HeaderName::from_static(VERSION_ID_HEADER),
            version_id,
        );
    }
    if let Some(version_id) = &outcome.source_version_id {
        insert_header(
            resp_headers,
            HeaderName::from_static("x-amz-copy-source-version-id"),
            version_id,
        );
    }
    Ok(response)
}

/// GET `/{bucket}/{*key}`: stream an object version (or the byte range named
/// by `Range`), list parts (`?uploadId`) or read tags (`?tagging`).
pub async fn get_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Some(upload_id) = q.upload_id.as_deref() {
        return multipart_handlers::list_parts(&service, &bucket, &key, upload_id).await;
    }

    if q.tagging.is_some() {
        return get_object_tagging(&service, &bucket, &key, q.version_id.as_deref()).await;
    }

    let conditions = preconditions(&headers, "");
    let body = service
        .get_object_body(
            &bucket,
            &key,
            q.version_id.as_deref(),
            &conditions,
            header_str(&headers, header::RANGE.as_str()),
        )
        .await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(body.reader)));
    let resp_headers = response.headers_mut();
    set_object_headers(resp_headers, &body.object);
    if let Some(range) = body.range {
        let size = u64::try_from(body.object.content.size_bytes).unwrap_or_default();
        resp_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.length()));
        insert_header(resp_headers, header::CONTENT_RANGE, &range.content_range(size));
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    }
    Ok(response)
}

/// HEAD `/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let conditions = preconditions(&headers, "");
    let object = service
        .head_object(&bucket, &key, q.version_id.as_deref(), &conditions)
        .await?;

    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &object);
    Ok(response)
}

/// DELETE `/{bucket}/{*key}`: delete an object or one version, abort a
/// multipart upload (`?uploadId`) or drop its tags (`?tagging`).
pub async fn delete_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
) -> Result<Response, AppError> {
    if let Some(upload_id) = q.upload_id.as_deref() {
        return multipart_handlers::abort_upload(&service, &bucket, &key, upload_id).await;
    }
    if q.tagging.is_some() {
        let object = service
            .delete_object_tagging(&bucket, &key, q.version_id.as_deref())
            .await?;
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        set_version_header(response.headers_mut(), &object);
        return Ok(response);
    }

    let outcome = service
        .delete_object(&bucket, &key, q.version_id.as_deref())
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    let resp_headers = response.headers_mut();
    if outcome.delete_marker {
        resp_headers.insert(
            HeaderName::from_static("x-amz-delete-marker"),
            HeaderValue::from_static("true"),
        );
    }
    if let Some(version_id) = &outcome.version_id {
        insert_header(
            resp_headers,
            HeaderName::from_static(VERSION_ID_HEADER),
            version_id,
        );
    }
    Ok(response)
}

/// POST `/{bucket}/{*key}`: `?uploads` starts a multipart upload,
/// `?uploadId` completes one.
pub async fn post_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if q.uploads.is_some() {
        return multipart_handlers::create_upload(&service, &bucket, &key, &headers).await;
    }
    if let Some(upload_id) = q.upload_id.as_deref() {
        return multipart_handlers::complete_upload(&service, &bucket, &key, upload_id, &body)
            .await;
    }
    Err(AppError::invalid_argument(
        "unsupported object POST; expected ?uploads or ?uploadId",
    ))
}

async fn get_object_tagging(
    service: &StorageService,
    bucket: &str,
    key: &str,
    version_id: Option<&str>,
) -> Result<Response, AppError> {
    let (object, tags) = service.get_object_tagging(bucket, key, version_id).await?;
    let xml = to_xml("Tagging", |w| {
        element(w, "TagSet", |w| {
            for (key, value) in &tags {
                element(w, "Tag", |w| {
                    text_element(w, "Key", key)?;
                    text_element(w, "Value", value)
                })?;
            }
            Ok(())
        })
    })?;
    let mut response = xml_response(xml);
    set_version_header(response.headers_mut(), &object);
    Ok(response)
}

async fn put_object_tagging(
    service: &StorageService,
    bucket: &str,
    key: &str,
    version_id: Option<&str>,
    body: Body,
) -> Result<Response, AppError> {
    let body = to_bytes(body, MAX_TAGGING_BODY)
        .await
        .map_err(|_| AppError::malformed_xml("tagging document is too large"))?;
    let tagging: Tagging = parse_xml(&body)?;
    let tags = tagging
        .tag_set
        .tags
        .into_iter()
        .map(|tag| (tag.key, tag.value))
        .collect();

    let object = service
        .put_object_tagging(bucket, key, version_id, tags)
        .await?;
    let mut response = Response::new(Body::empty());
    set_version_header(response.headers_mut(), &object);
    Ok(response)
}

fn set_version_header(headers: &mut HeaderMap, object: &StoredObject) {
    if let Some(version_id) = object.reported_version_id() {
        insert_header(headers, HeaderName::from_static(VERSION_ID_HEADER), version_id);
    }
}

fn set_object_headers(headers: &mut HeaderMap, object: &StoredObject) {
    let content_type = object
        .content
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(object.content.size_bytes.max(0)),
    );
    insert_header(
        headers,
        header::ETAG,
        &format!("\"{}\"", object.content.etag),
    );
    insert_header(
        headers,
        header::LAST_MODIFIED,
        &http_date(&object.last_modified),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    set_version_header(headers, object);
    if object.tag_count > 0 {
        headers.insert(
            HeaderName::from_static("x-amz-tagging-count"),
            HeaderValue::from(object.tag_count),
        );
    }

    for (name, value) in &object.metadata {
        if let Ok(name) = HeaderName::from_bytes(format!("{}{}", META_PREFIX, name).as_bytes()) {
            insert_header(headers, name, value);
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Request body as the byte stream the storage layer consumes.
pub(super) fn body_stream(body: Body) -> impl Stream<Item = io::Result<Bytes>> + Send {
    body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other))
}

pub(super) fn content_type(headers: &HeaderMap) -> Option<String> {
    header_str(headers, header::CONTENT_TYPE.as_str()).map(str::to_string)
}

/// `x-amz-meta-*` headers with the prefix stripped, sorted by name.
pub(super) fn user_metadata(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut metadata: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().strip_prefix(META_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect();
    metadata.sort();
    metadata
}

/// `Content-MD5` as lowercase hex. The header carries base64 of the raw
/// 16-byte digest.
pub(super) fn content_md5(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    let Some(raw) = headers.get("content-md5") else {
        return Ok(None);
    };
    let invalid = || {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "InvalidDigest",
            "the Content-MD5 you specified was invalid",
        )
    };
    let decoded = raw
        .to_str()
        .ok()
        .and_then(|value| general_purpose::STANDARD.decode(value.trim()).ok())
        .filter(|digest| digest.len() == 16)
        .ok_or_else(invalid)?;
    Ok(Some(hex::encode(decoded)))
}

/// `x-amz-tagging` (`k1=v1&k2=v2`, form-encoded) as tag pairs.
pub(super) fn tagging_header(headers: &HeaderMap) -> Result<TagSet, AppError> {
    let Some(raw) = headers.get(TAGGING_HEADER) else {
        return Ok(Vec::new());
    };
    let raw = raw
        .to_str()
        .map_err(|_| AppError::invalid_argument("x-amz-tagging must be URL-encoded"))?;
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((form_decode(key)?, form_decode(value)?))
        })
        .collect()
}

fn form_decode(value: &str) -> Result<String, AppError> {
    percent_decode(&value.replace('+', " "))
}

/// Conditional headers, optionally under a prefix such as
/// `x-amz-copy-source-`. Unparseable dates are ignored.
fn preconditions(headers: &HeaderMap, prefix: &str) -> Preconditions {
    let text = |name: &str| header_str(headers, &format!("{}{}", prefix, name)).map(str::to_string);
    let date = |name: &str| {
        header_str(headers, &format!("{}{}", prefix, name))
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|value| value.with_timezone(&Utc))
    };

    Preconditions {
        if_match: text("if-match"),
        if_none_match: text("if-none-match"),
        if_modified_since: date("if-modified-since"),
        if_unmodified_since: date("if-unmodified-since"),
    }
}

/// Split `x-amz-copy-source` (`[/]bucket/key[?versionId=id]`, key
/// percent-encoded) into its parts.
fn parse_copy_source(source: &str) -> Result<(String, String, Option<String>), AppError> {
    let source = source.strip_prefix('/').unwrap_or(source);
    let (path, version_id) = match source.split_once('?') {
        Some((path, query)) => {
            let version_id = query
                .split('&')
                .find_map(|param| param.strip_prefix("versionId="))
                .map(percent_decode)
                .transpose()?;
            (path, version_id)
        }
        None => (source, None),
    };

    let (bucket, key) = path
        .split_once('/')
        .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
        .ok_or_else(|| AppError::invalid_argument("copy source must be in the form bucket/key"))?;

    Ok((bucket.to_string(), percent_decode(key)?, version_id))
}

fn percent_decode(value: &str) -> Result<String, AppError> {
    percent_encoding::percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| AppError::invalid_argument("percent-encoded value is not valid UTF-8"))
}
