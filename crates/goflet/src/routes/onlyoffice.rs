//! OnlyOffice editor callback route.
//!
//! The editor posts `{status, url}`; status 2 means the document changed
//! and the service downloads the new content, stages it and runs the
//! normal promotion path.

use axum::{Json, Router, extract::State, extract::rejection::JsonRejection, routing::post};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::middleware::ResolvedPath;
use crate::state::AppState;

/// Editor status signalling a changed document ready for download.
const STATUS_MUST_SAVE: i32 = 2;

/// Callback body posted by the editor.
#[derive(Debug, Deserialize)]
pub struct OnlyOfficeUpdate {
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub url: String,
}

/// Create the OnlyOffice router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/onlyoffice/{*rpath}", post(update_file))
}

/// POST /api/onlyoffice/{path}
async fn update_file(
    State(state): State<AppState>,
    ResolvedPath(parsed): ResolvedPath,
    body: Result<Json<OnlyOfficeUpdate>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(update) = body.map_err(|e| {
        warn!(error = %e, "failed to bind editor callback body");
        AppError::BadRequest("Invalid JSON".to_string())
    })?;

    if update.status != STATUS_MUST_SAVE {
        return Ok(Json(json!({ "error": 0 })));
    }

    let storage = state.storage();
    storage.get_file_info(&parsed.fs).await?;

    let response = state
        .http()
        .get(&update.url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| {
            warn!(error = %e, "failed to download editor document");
            AppError::Internal(anyhow::anyhow!("Error downloading file"))
        })?;

    let body = response.bytes().await.map_err(|e| {
        warn!(error = %e, "failed to read editor document");
        AppError::Internal(anyhow::anyhow!("Error downloading file"))
    })?;

    storage.write_staging(&parsed.relative, &body).await?;
    storage.complete_upload(&parsed).await?;

    Ok(Json(json!({ "error": 0 })))
}
