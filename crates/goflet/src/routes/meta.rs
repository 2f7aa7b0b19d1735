//! File metadata route.

use axum::{Json, Router, extract::State, routing::get};

use crate::error::AppResult;
use crate::middleware::ResolvedPath;
use crate::state::AppState;
use crate::storage::FileInfo;

/// Create the metadata router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/meta/{*rpath}", get(get_file_meta))
}

/// GET /api/meta/{path}: file information as JSON. The served `filePath`
/// is the relative path, never the on-disk location.
async fn get_file_meta(
    State(state): State<AppState>,
    ResolvedPath(parsed): ResolvedPath,
) -> AppResult<Json<FileInfo>> {
    let mut info = state.storage().get_file_info(&parsed.fs).await?;
    info.file_path = parsed.relative;
    Ok(Json(info))
}
