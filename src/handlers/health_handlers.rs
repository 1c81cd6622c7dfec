//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness ("ok"), no I/O
//! - GET /readyz   -> readiness: metadata database and payload directory

use crate::services::storage_service::StorageService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(error) => {
                warn!(check = name, %error, "readiness check failed");
                Self {
                    ok: false,
                    error: Some(error),
                }
            }
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 200 when SQLite answers `SELECT 1` and a scratch file can be written,
/// read back and removed under the payload directory; 503 otherwise.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert(
        "sqlite",
        CheckStatus::from_result("sqlite", check_sqlite(&service).await),
    );
    checks.insert(
        "disk",
        CheckStatus::from_result("disk", check_disk(&service).await),
    );

    let ready = checks.values().all(|check| check.ok);
    let (status, label) = if ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };
    (
        status,
        Json(ReadyResponse {
            status: label,
            checks,
        }),
    )
}

async fn check_sqlite(service: &StorageService) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(other) => Err(format!("unexpected result: {}", other)),
        Err(err) => Err(format!("error: {}", err)),
    }
}

async fn check_disk(service: &StorageService) -> Result<(), String> {
    fs::create_dir_all(&service.base_path)
        .await
        .map_err(|e| format!("could not create payload directory: {}", e))?;

    let scratch = service.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    let result = async {
        fs::write(&scratch, b"readyz")
            .await
            .map_err(|e| format!("could not write scratch file: {}", e))?;
        let bytes = fs::read(&scratch)
            .await
            .map_err(|e| format!("could not read scratch file: {}", e))?;
        if bytes != b"readyz" {
            return Err("scratch file content mismatch".to_string());
        }
        Ok(())
    }
    .await;

    let _ = fs::remove_file(&scratch).await;
    result
}
