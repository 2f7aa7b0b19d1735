//! File operation routes: copy, move, create.

use axum::{Json, Router, extract::State, extract::rejection::JsonRejection, routing::post};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::cache::CacheLockGuard;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage::{ParsedPath, UPLOADING_CACHE_PREFIX, UPLOADING_LOCK_TTL};

/// Conflict handling when the target of a copy or move already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnConflict {
    Overwrite,
    Abort,
}

/// Request body for copy and move.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyMoveRequest {
    pub source_path: String,
    pub target_path: String,
    pub on_conflict: OnConflict,
}

/// Request body for create.
#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub path: String,
}

/// Create the action router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/action/copy", post(copy_file))
        .route("/api/action/move", post(move_file))
        .route("/api/action/create", post(create_file))
}

/// POST /api/action/copy
async fn copy_file(
    State(state): State<AppState>,
    body: Result<Json<CopyMoveRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(req) = body.map_err(invalid_request)?;
    let (source, target) = pre_check_copy_move(&state, &req).await?;

    let _lock = lock_target(&state, &target);
    state
        .storage()
        .copy_file(&source, &target)
        .await
        .map_err(|e| {
            debug!(error = %e, "failed to copy file");
            AppError::Internal(anyhow::anyhow!("Error copying file"))
        })?;

    Ok(Json(json!({ "message": "File copied" })))
}

/// POST /api/action/move
async fn move_file(
    State(state): State<AppState>,
    body: Result<Json<CopyMoveRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(req) = body.map_err(invalid_request)?;
    let (source, target) = pre_check_copy_move(&state, &req).await?;

    let _lock = lock_target(&state, &target);
    state
        .storage()
        .move_file(&source, &target)
        .await
        .map_err(|e| {
            debug!(error = %e, "failed to move file");
            AppError::Internal(anyhow::anyhow!("Error moving file"))
        })?;

    Ok(Json(json!({ "message": "File moved" })))
}

/// POST /api/action/create
async fn create_file(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(req) = body.map_err(invalid_request)?;
    let parsed = check_path(&state, &req.path)?;

    if state.storage().file_exists(&parsed.fs).await {
        return Err(AppError::Conflict("File already exists"));
    }

    let _lock = lock_target(&state, &parsed);
    state.storage().create_file(&parsed).await.map_err(|e| {
        debug!(error = %e, "failed to create file");
        AppError::Internal(anyhow::anyhow!("Error creating file"))
    })?;

    Ok(Json(json!({ "message": "File created" })))
}

/// Validate both paths and resolve the conflict policy before any
/// operation touches the disk.
async fn pre_check_copy_move(
    state: &AppState,
    req: &CopyMoveRequest,
) -> AppResult<(ParsedPath, ParsedPath)> {
    let source = check_path(state, &req.source_path)?;
    let target = check_path(state, &req.target_path)?;

    if source.fs == target.fs {
        return Err(AppError::BadRequest(
            "Source and target paths are the same".to_string(),
        ));
    }

    let storage = state.storage();
    if !storage.file_exists(&source.fs).await {
        return Err(AppError::NotFound("Source file not found"));
    }

    if storage.file_exists(&target.fs).await {
        match req.on_conflict {
            OnConflict::Abort => return Err(AppError::Conflict("File already exists")),
            OnConflict::Overwrite => {
                storage.delete_file(&target.fs).await.map_err(|e| {
                    debug!(error = %e, "failed to delete target file");
                    AppError::Internal(anyhow::anyhow!("Error deleting target file"))
                })?;
            }
        }
    }

    Ok((source, target))
}

fn invalid_request(rejection: JsonRejection) -> AppError {
    debug!(error = %rejection, "failed to bind request body");
    AppError::BadRequest("Invalid request".to_string())
}

fn check_path(state: &AppState, raw: &str) -> AppResult<ParsedPath> {
    if raw.is_empty() {
        return Err(AppError::BadRequest("Path is required".to_string()));
    }
    Ok(state.storage().parse_path(raw)?)
}

/// Hold the same per-file lock a promotion takes, so copy/move/create and
/// upload completion for one fingerprint never interleave.
fn lock_target(state: &AppState, target: &ParsedPath) -> CacheLockGuard {
    let key = format!("{UPLOADING_CACHE_PREFIX}{}", target.fs.display());
    CacheLockGuard::acquire(state.cache(), &key, UPLOADING_LOCK_TTL)
}
