//! Liveness and readiness probes.

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    database: CheckStatus,
    buffer_dir: CheckStatus,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// `GET /healthz` — cheap liveness probe, no I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz` — checks SQLite connectivity and that the chunk buffer
/// directory is writable. 200 when both pass, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let database = check_database(&state).await;
    let buffer_dir = check_buffer_dir(&state).await;
    let ready = database.ok && buffer_dir.ok;

    (
        if ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        },
        Json(ReadyResponse {
            status: if ready { "ok" } else { "error" },
            database,
            buffer_dir,
        }),
    )
}

async fn check_database(state: &AppState) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.chunk_store.db)
        .await
    {
        Ok(1) => CheckStatus { ok: true, error: None },
        Ok(other) => CheckStatus {
            ok: false,
            error: Some(format!("unexpected result: {other}")),
        },
        Err(e) => CheckStatus {
            ok: false,
            error: Some(e.to_string()),
        },
    }
}

/// Best-effort write/read/delete round trip under the buffer directory.
async fn check_buffer_dir(state: &AppState) -> CheckStatus {
    let probe = state
        .chunk_store
        .base_path
        .join(format!(".readyz-{}", Uuid::new_v4()));

    let result: Result<(), std::io::Error> = async {
        fs::write(&probe, b"readyz").await?;
        let bytes = fs::read(&probe).await?;
        fs::remove_file(&probe).await?;
        if bytes == b"readyz" {
            Ok(())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "probe content mismatch",
            ))
        }
    }
    .await;

    match result {
        Ok(()) => CheckStatus { ok: true, error: None },
        Err(e) => CheckStatus {
            ok: false,
            error: Some(e.to_string()),
        },
    }
}
