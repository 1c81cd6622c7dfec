//! Multipart upload sub-resources of `/{bucket}/{*key}`.

use super::{
    object_handlers::{body_stream, content_md5, content_type, tagging_header, user_metadata},
    xml::{
        CompleteMultipartUpload, element, iso8601, parse_xml, text_element, to_xml, xml_response,
    },
};
use crate::{
    errors::AppError,
    services::{
        multipart::CompletedPart, storage_service::StorageService, versioning::ObjectWrite,
    },
};
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};

/// `POST ?uploads`: CreateMultipartUpload.
pub(super) async fn create_upload(
    service: &StorageService,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let write = ObjectWrite {
        content_type: content_type(headers),
        metadata: user_metadata(headers),
        tags: tagging_header(headers)?,
        content_md5: None,
    };
    let upload = service.create_multipart_upload(bucket, key, write).await?;

    let xml = to_xml("InitiateMultipartUploadResult", |w| {
        text_element(w, "Bucket", bucket)?;
        text_element(w, "Key", key)?;
        text_element(w, "UploadId", &upload.upload_id)
    })?;
    Ok(xml_response(xml))
}

/// `PUT ?partNumber&uploadId`: UploadPart.
pub(super) async fn upload_part(
    service: &StorageService,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: Option<&str>,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let part_number = part_number
        .and_then(|n| n.parse::<i32>().ok())
        .ok_or_else(|| AppError::invalid_argument("partNumber must be an integer"))?;
    let digest = content_md5(headers)?;

    let part = service
        .upload_part(
            bucket,
            key,
            upload_id,
            part_number,
            digest.as_deref(),
            body_stream(body),
        )
        .await?;

    let mut response = Response::new(Body::empty());
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", part.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// `GET ?uploadId`: ListParts.
pub(super) async fn list_parts(
    service: &StorageService,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<Response, AppError> {
    let (upload, parts) = service.list_parts(bucket, key, upload_id).await?;

    let xml = to_xml("ListPartsResult", |w| {
        text_element(w, "Bucket", bucket)?;
        text_element(w, "Key", key)?;
        text_element(w, "UploadId", &upload.upload_id)?;
        text_element(w, "IsTruncated", "false")?;
        for part in &parts {
            element(w, "Part", |w| {
                text_element(w, "PartNumber", &part.part_number.to_string())?;
                text_element(w, "LastModified", &iso8601(&part.uploaded_at))?;
                text_element(w, "ETag", &format!("\"{}\"", part.etag))?;
                text_element(w, "Size", &part.size_bytes.to_string())
            })?;
        }
        Ok(())
    })?;
    Ok(xml_response(xml))
}

/// `DELETE ?uploadId`: AbortMultipartUpload.
pub(super) async fn abort_upload(
    service: &StorageService,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<Response, AppError> {
    service.abort_multipart_upload(bucket, key, upload_id).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    Ok(response)
}

/// `POST ?uploadId`: CompleteMultipartUpload.
pub(super) async fn complete_upload(
    service: &StorageService,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: &Bytes,
) -> Result<Response, AppError> {
    let request: CompleteMultipartUpload = parse_xml(body)?;
    let parts: Vec<CompletedPart> = request
        .parts
        .into_iter()
        .map(|part| CompletedPart {
            part_number: part.part_number,
            etag: part.etag,
        })
        .collect();

    let outcome = service
        .complete_multipart_upload(bucket, key, upload_id, &parts)
        .await?;
    let etag = outcome
        .entry
        .content()
        .map(|c| c.etag.clone())
        .unwrap_or_default();

    let xml = to_xml("CompleteMultipartUploadResult", |w| {
        text_element(w, "Location", &format!("/{}/{}", bucket, key))?;
        text_element(w, "Bucket", bucket)?;
        text_element(w, "Key", key)?;
        text_element(w, "ETag", &format!("\"{}\"", etag))
    })?;
    let mut response = xml_response(xml);
    if let Some(version_id) = &outcome.version_id {
        if let Ok(value) = HeaderValue::from_str(version_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-amz-version-id"), value);
        }
    }
    Ok(response)
}
