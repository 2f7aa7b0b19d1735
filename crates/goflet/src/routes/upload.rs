//! Resumable upload routes: ranged writes, completion, cancellation.

use axum::{
    Router,
    extract::{Request, State},
    http::{StatusCode, header},
    routing::put,
};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::httpx;
use crate::middleware::ResolvedPath;
use crate::state::AppState;

/// Create the upload router.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/upload/{*rpath}",
        put(put_upload).post(post_upload).delete(delete_upload),
    )
}

/// PUT /upload/{path}: write one byte range into the staging file.
async fn put_upload(
    State(state): State<AppState>,
    ResolvedPath(parsed): ResolvedPath,
    request: Request,
) -> AppResult<StatusCode> {
    let file_config = &state.config().file;

    let content_range = header_str(&request, header::CONTENT_RANGE);
    let content_length = header_str(&request, header::CONTENT_LENGTH);

    // The transport-level body cap applies before any range bookkeeping.
    if let Some(length) = content_length.as_deref().and_then(|v| v.parse::<i64>().ok())
        && length > file_config.max_post_size
    {
        return Err(AppError::TooLarge(
            "File too large, please use Content-Range header to upload large files".to_string(),
        ));
    }

    let (start, end, _total) = httpx::parse_range_upload(
        content_range.as_deref(),
        content_length.as_deref(),
        file_config.upload_limit,
    )?;
    let expected = end - start + 1;

    let mut staging = state.storage().open_staging(&parsed.relative).await?;
    staging
        .seek(std::io::SeekFrom::Start(start as u64))
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    let written = copy_body(request, &mut staging, expected as u64)
        .await
        .map_err(|e| {
            warn!(error = %e, "failed to write upload body");
            AppError::Internal(e.into())
        })?;
    if written != expected as u64 {
        warn!(expected, written, "incomplete range write");
        return Err(AppError::Internal(anyhow::anyhow!("incomplete write")));
    }

    debug!(
        written,
        relative = %parsed.relative,
        "accepted upload range"
    );
    Ok(StatusCode::ACCEPTED)
}

/// POST /upload/{path}: promote the staging file.
async fn post_upload(
    State(state): State<AppState>,
    ResolvedPath(parsed): ResolvedPath,
) -> AppResult<StatusCode> {
    state.storage().complete_upload(&parsed).await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /upload/{path}: cancel the upload session.
async fn delete_upload(
    State(state): State<AppState>,
    ResolvedPath(parsed): ResolvedPath,
) -> AppResult<StatusCode> {
    state
        .storage()
        .remove_staging(&parsed.relative)
        .await
        .map_err(|e| match e {
            crate::storage::StorageError::NotFound => {
                AppError::NotFound("Upload session not found")
            }
            other => other.into(),
        })?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream exactly `limit` bytes of the request body into the staging file.
async fn copy_body(
    request: Request,
    staging: &mut tokio::fs::File,
    limit: u64,
) -> std::io::Result<u64> {
    let stream = into_io_stream(request.into_body().into_data_stream());
    let mut reader = tokio::io::AsyncReadExt::take(StreamReader::new(stream), limit);
    let written = tokio::io::copy(&mut reader, staging).await?;
    staging.flush().await?;
    Ok(written)
}

fn into_io_stream(
    stream: axum::body::BodyDataStream,
) -> impl tokio_stream::Stream<Item = std::io::Result<axum::body::Bytes>> {
    use tokio_stream::StreamExt;
    stream.map(|chunk| chunk.map_err(std::io::Error::other))
}

fn header_str(request: &Request, name: header::HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
