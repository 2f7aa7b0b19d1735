//! Image derivative route.
//!
//! Serves parameterized re-encodings of image payloads, cached on disk
//! next to the source. Cache hits stream the stored derivative; misses
//! process the source on a blocking thread and write the result back
//! asynchronously.

use std::collections::HashMap;

use axum::{
    Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::httpx;
use crate::middleware::ResolvedPath;
use crate::state::AppState;
use crate::storage::image::ProcessParams;

/// Create the image router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/image/{*rpath}", get(get_image))
}

/// GET /api/image/{path}: serve a cached or freshly generated derivative.
async fn get_image(
    State(state): State<AppState>,
    ResolvedPath(parsed): ResolvedPath,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let storage = state.storage();
    let image_config = &state.config().image;

    let info = storage.get_file_info(&parsed.fs).await?;
    if !info.is_image() {
        return Err(AppError::NotFound("File not found"));
    }
    if info.file_size > image_config.max_file_size {
        return Err(AppError::TooLarge("File too large".to_string()));
    }

    let params = ProcessParams::from_query(&query, image_config);

    // Cache hit: the derivative's own mtime drives conditional requests.
    if let Some(cached) = storage.open_derivative(&parsed.fs, &params).await? {
        if let Some(since) = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
            .and_then(httpx::header_date_to_unix)
            && cached.last_modified <= since
        {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }

        let response = Response::builder()
            .header(header::CONTENT_TYPE, format!("image/{}", params.format.as_str()))
            .header(header::CONTENT_LENGTH, cached.size)
            .header(
                header::LAST_MODIFIED,
                httpx::unix_to_header_date(cached.last_modified),
            )
            .header("X-Cache", "HIT")
            .body(Body::from_stream(ReaderStream::new(cached.file)))
            .map_err(|e| AppError::Internal(e.into()))?;
        return Ok(response);
    }

    // Miss: decode and transform on a blocking thread; the runtime keeps
    // serving requests meanwhile.
    let source = tokio::fs::read(parsed.fs.join(crate::storage::FILE_APPEND))
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    let blocking_params = params.clone();
    let blocking_config = image_config.clone();
    let encoded = tokio::task::spawn_blocking(move || {
        crate::storage::image::process_image(&source, &blocking_params, &blocking_config)
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))??;

    // Write-back happens off the response path; a failed write only costs
    // the next request a regeneration.
    {
        let storage = storage.clone();
        let fs_path = parsed.fs.clone();
        let params = params.clone();
        let bytes = encoded.clone();
        tokio::spawn(async move {
            if let Err(e) = storage.save_derivative(&fs_path, &params, &bytes).await {
                warn!(error = %e, "failed to save image derivative");
            }
        });
    }

    let response = Response::builder()
        .header(header::CONTENT_TYPE, format!("image/{}", params.format.as_str()))
        .header(header::CONTENT_LENGTH, encoded.len())
        .header(
            header::LAST_MODIFIED,
            httpx::unix_to_header_date(info.last_modified),
        )
        .header("X-Cache", "MISS")
        .body(Body::from(encoded))
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(response)
}
