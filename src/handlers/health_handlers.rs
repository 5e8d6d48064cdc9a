//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, never touches I/O
//! - GET /readyz   -> readiness of the document store and the scratch directory

use crate::services::ingest_service::IngestService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const PROBE_BYTES: &[u8] = b"readyz";

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// Pings the document store (`SELECT 1` on SQLite, no-op for Firestore) and
/// round-trips a small file through the scratch directory, since every event
/// needs both. Responds 200 when all checks pass and 503 otherwise.
pub async fn readyz(State(service): State<IngestService>) -> impl IntoResponse {
    let documents = CheckStatus::from(
        service
            .documents()
            .ping()
            .await
            .map_err(|e| format!("error: {}", e)),
    );
    let scratch = CheckStatus::from(probe_scratch(service.scratch_root()).await);

    let ready = documents.ok && scratch.ok;
    let checks = HashMap::from([("documents", documents), ("scratch", scratch)]);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            status: if ready { "ok" } else { "error" },
            checks,
        }),
    )
}

/// Write, read back and delete a uniquely named file under `root`.
async fn probe_scratch(root: &Path) -> Result<(), String> {
    let path = root.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&path, PROBE_BYTES)
        .await
        .map_err(|e| format!("could not write probe file: {}", e))?;

    let read = fs::read(&path).await;
    let removed = fs::remove_file(&path).await;

    match read {
        Ok(bytes) if bytes == PROBE_BYTES => {}
        Ok(_) => return Err("probe file content mismatch".into()),
        Err(e) => return Err(format!("could not read probe file: {}", e)),
    }
    removed.map_err(|e| format!("could not remove probe file: {}", e))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<Result<(), String>> for CheckStatus {
    fn from(result: Result<(), String>) -> Self {
        Self {
            ok: result.is_ok(),
            error: result.err(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scratch_probe_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        probe_scratch(dir.path()).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn scratch_probe_reports_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = probe_scratch(&dir.path().join("gone")).await.unwrap_err();
        assert!(err.starts_with("could not write probe file"));
    }
}
