use crate::{
    handlers::xml::{XmlWriter, element, text_element},
    services::storage_service::StorageError,
};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use quick_xml::events::{BytesDecl, Event};
use std::fmt;

/// An S3 error: HTTP status, S3 error code and message, plus any headers the
/// response must still carry (delete-marker flags, ETag on 304).
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub headers: HeaderMap,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
    }

    /// Shortcut for 400 InvalidArgument
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidArgument", msg)
    }

    pub fn malformed_xml(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "MalformedXML", msg)
    }

    fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // 304 carries no body.
        let body = if self.status == StatusCode::NOT_MODIFIED {
            Body::empty()
        } else {
            match error_document(self.code, &self.message) {
                Ok(xml) => Body::from(xml),
                Err(err) => {
                    tracing::error!(error = %err, code = self.code, "failed to render error body");
                    Body::empty()
                }
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        if self.status != StatusCode::NOT_MODIFIED {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/xml"),
            );
        }
        headers.extend(self.headers);
        response
    }
}

/// `<Error>` documents are not namespaced.
fn error_document(code: &str, message: &str) -> quick_xml::Result<Vec<u8>> {
    let mut writer = XmlWriter::new(Vec::with_capacity(128));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    element(&mut writer, "Error", |w| {
        text_element(w, "Code", code)?;
        text_element(w, "Message", message)
    })?;
    Ok(writer.into_inner())
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::BucketNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "NoSuchBucket", message)
            }
            StorageError::BucketAlreadyExists(_) => {
                Self::new(StatusCode::CONFLICT, "BucketAlreadyExists", message)
            }
            StorageError::BucketNotEmpty(_) => {
                Self::new(StatusCode::CONFLICT, "BucketNotEmpty", message)
            }
            StorageError::InvalidBucketName { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "InvalidBucketName", message)
            }
            StorageError::UnsupportedRegion(_) => {
                Self::new(StatusCode::BAD_REQUEST, "InvalidLocationConstraint", message)
            }
            StorageError::ObjectNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "NoSuchKey", message)
            }
            StorageError::VersionNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "NoSuchVersion", message)
            }
            StorageError::DeleteMarker {
                version_id,
                explicit,
                ..
            } => {
                let base = if explicit {
                    Self::new(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", message)
                } else {
                    Self::new(StatusCode::NOT_FOUND, "NoSuchKey", message)
                };
                base.with_header(HeaderName::from_static("x-amz-delete-marker"), "true")
                    .with_header(HeaderName::from_static("x-amz-version-id"), &version_id)
            }
            StorageError::UploadNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "NoSuchUpload", message)
            }
            StorageError::InvalidPart(_) => Self::new(StatusCode::BAD_REQUEST, "InvalidPart", message),
            StorageError::InvalidPartOrder => {
                Self::new(StatusCode::BAD_REQUEST, "InvalidPartOrder", message)
            }
            StorageError::BadDigest => Self::new(StatusCode::BAD_REQUEST, "BadDigest", message),
            StorageError::InvalidTag(_) => Self::new(StatusCode::BAD_REQUEST, "InvalidTag", message),
            StorageError::TooManyTags(_) => Self::new(StatusCode::BAD_REQUEST, "BadRequest", message),
            StorageError::InvalidRange { size } => {
                Self::new(StatusCode::RANGE_NOT_SATISFIABLE, "InvalidRange", message)
                    .with_header(header::CONTENT_RANGE, &format!("bytes */{}", size))
            }
            StorageError::InvalidObjectKey | StorageError::InvalidArgument(_) => {
                Self::invalid_argument(message)
            }
            StorageError::PreconditionFailed => {
                Self::new(StatusCode::PRECONDITION_FAILED, "PreconditionFailed", message)
            }
            StorageError::NotModified { etag } => {
                Self::new(StatusCode::NOT_MODIFIED, "NotModified", message)
                    .with_header(header::ETAG, &format!("\"{}\"", etag))
            }
            StorageError::Corrupted(_) | StorageError::Sqlx(_) | StorageError::Io(_) => {
                tracing::error!(error = %message, "storage failure");
                Self::internal(message)
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<quick_xml::Error> for AppError {
    fn from(err: quick_xml::Error) -> Self {
        tracing::error!(error = %err, "failed to render response document");
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_marker_errors_carry_marker_headers() {
        let err: AppError = StorageError::DeleteMarker {
            bucket: "b".into(),
            key: "k".into(),
            version_id: "abc".into(),
            explicit: false,
        }
        .into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "NoSuchKey");
        assert_eq!(err.headers["x-amz-delete-marker"], "true");
        assert_eq!(err.headers["x-amz-version-id"], "abc");

        let err: AppError = StorageError::DeleteMarker {
            bucket: "b".into(),
            key: "k".into(),
            version_id: "abc".into(),
            explicit: true,
        }
        .into();
        assert_eq!(err.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(err.code, "MethodNotAllowed");
    }

    #[test]
    fn storage_errors_map_to_s3_codes() {
        let cases: Vec<(StorageError, StatusCode, &str)> = vec![
            (StorageError::BucketNotFound("b".into()), StatusCode::NOT_FOUND, "NoSuchBucket"),
            (StorageError::BucketNotEmpty("b".into()), StatusCode::CONFLICT, "BucketNotEmpty"),
            (
                StorageError::VersionNotFound {
                    bucket: "b".into(),
                    key: "k".into(),
                    version_id: "v".into(),
                },
                StatusCode::NOT_FOUND,
                "NoSuchVersion",
            ),
            (StorageError::UploadNotFound("u".into()), StatusCode::NOT_FOUND, "NoSuchUpload"),
            (StorageError::InvalidPartOrder, StatusCode::BAD_REQUEST, "InvalidPartOrder"),
            (StorageError::InvalidTag("k".into()), StatusCode::BAD_REQUEST, "InvalidTag"),
            (StorageError::TooManyTags(10), StatusCode::BAD_REQUEST, "BadRequest"),
            (
                StorageError::InvalidRange { size: 0 },
                StatusCode::RANGE_NOT_SATISFIABLE,
                "InvalidRange",
            ),
            (
                StorageError::InvalidArgument("x".into()),
                StatusCode::BAD_REQUEST,
                "InvalidArgument",
            ),
            (
                StorageError::PreconditionFailed,
                StatusCode::PRECONDITION_FAILED,
                "PreconditionFailed",
            ),
        ];
        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!((app.status, app.code), (status, code));
        }
    }

    #[test]
    fn not_modified_has_etag_and_no_body() {
        let response = AppError::from(StorageError::NotModified { etag: "e1".into() }).into_response();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[header::ETAG], "\"e1\"");
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn error_bodies_are_escaped_xml() {
        let response = AppError::invalid_argument("bad <key> & \"value\"").into_response();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/xml");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("<Error><Code>InvalidArgument</Code>"));
        assert!(text.contains("<Message>bad &lt;key&gt; &amp; &quot;value&quot;</Message>"));
    }

    #[test]
    fn unsatisfiable_ranges_report_the_object_size() {
        let err = AppError::from(StorageError::InvalidRange { size: 11 });
        assert_eq!(err.headers[header::CONTENT_RANGE], "bytes */11");
    }
}
