//! Defines routes for all S3-like bucket and object operations.
//!
//! ## Structure
//! - `GET /` -> ListBuckets
//!
//! - **Bucket-level endpoints**
//!   - `PUT    /{bucket}` -> create bucket; `?versioning` sets versioning
//!   - `GET    /{bucket}` -> ListObjects (v1, or v2 with `list-type=2`);
//!     `?versions` lists versions, `?versioning` reads the versioning state
//!   - `HEAD   /{bucket}` -> bucket exists
//!   - `DELETE /{bucket}` -> delete empty bucket
//!   - `POST   /{bucket}?delete` -> multi-object delete
//!
//! - **Object-level endpoints** (all accept `?versionId=` where meaningful)
//!   - `PUT    /{bucket}/{*key}` -> upload, copy, upload part; `?tagging`
//!   - `GET    /{bucket}/{*key}` -> download (honours `Range`), list parts;
//!     `?tagging`
//!   - `HEAD   /{bucket}/{*key}` -> metadata only
//!   - `DELETE /{bucket}/{*key}` -> delete / remove version / abort upload;
//!     `?tagging`
//!   - `POST   /{bucket}/{*key}` -> start or complete a multipart upload
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        bucket_handlers::{
            delete_bucket, get_bucket, head_bucket, list_buckets, post_bucket, put_bucket,
        },
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, head_object, post_object, put_object},
    },
    services::storage_service::StorageService,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build the router for all S3-compatible routes.
///
/// The router carries shared state (`StorageService`) to all handlers.
pub fn routes() -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(list_buckets))
        // Object-level routes
        .route(
            "/{bucket}/{*key}",
            put(put_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object)
                .post(post_object),
        )
        // Bucket-level routes
        .route(
            "/{bucket}",
            put(put_bucket)
                .get(get_bucket)
                .head(head_bucket)
                .delete(delete_bucket)
                .post(post_bucket),
        )
}
