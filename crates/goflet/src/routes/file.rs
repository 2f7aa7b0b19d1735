//! File download, single-shot upload and delete routes.

use axum::{
    Router,
    body::Body,
    extract::{Multipart, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::Response,
    routing::get,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::httpx;
use crate::middleware::ResolvedPath;
use crate::state::AppState;
use crate::storage::FileInfo;

/// Create the file router.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/file/{*rpath}",
        get(download_file)
            .post(upload_single)
            .delete(delete_file),
    )
}

/// GET/HEAD /file/{path}: download with range and conditional support.
async fn download_file(
    State(state): State<AppState>,
    ResolvedPath(parsed): ResolvedPath,
    method: Method,
    headers: HeaderMap,
) -> AppResult<Response> {
    let storage = state.storage();
    let info = storage.get_file_info(&parsed.fs).await?;

    let etag = httpx::etag(&info);
    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type(&info))
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", info.file_meta.file_name),
        )
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::LAST_MODIFIED,
            httpx::unix_to_header_date(info.last_modified),
        )
        .header(header::ETAG, etag.clone())
        .header(
            "X-Uploaded-At",
            httpx::unix_to_header_date(info.file_meta.uploaded_at),
        )
        .header("X-Hash-Sha1", info.file_meta.hash.sha1.clone())
        .header("X-Hash-Sha256", info.file_meta.hash.sha256.clone())
        .header("X-Hash-Md5", info.file_meta.hash.md5.clone());

    if state.config().client_cache.enabled {
        builder = builder.header(
            header::CACHE_CONTROL,
            format!("max-age={}", state.config().client_cache.max_age),
        );
    }

    // Conditional short-circuits need no body at all.
    if let Some(status) = httpx::check_conditionals(&headers, &etag, info.last_modified) {
        let response = builder
            .status(status)
            .body(Body::empty())
            .map_err(|e| AppError::Internal(e.into()))?;
        return Ok(response);
    }

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    let (start, end) = httpx::parse_range_download(range_header, info.file_size)?;
    let content_length = end - start + 1;

    builder = builder.header(header::CONTENT_LENGTH, content_length);

    // Any present, satisfiable Range gets 206, even one spanning the
    // whole file; 200 is reserved for requests without a Range header.
    let status = if range_header.is_some() {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", info.file_size),
        );
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    if method == Method::HEAD {
        let response = builder
            .status(status)
            .body(Body::empty())
            .map_err(|e| AppError::Internal(e.into()))?;
        return Ok(response);
    }

    let mut file = storage.file_reader(&parsed.fs).await?;
    file.seek(std::io::SeekFrom::Start(start as u64))
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    let body = Body::from_stream(ReaderStream::new(file.take(content_length as u64)));
    let response = builder
        .status(status)
        .body(body)
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(response)
}

/// POST /file/{path}: multipart single-shot upload, then promotion.
async fn upload_single(
    State(state): State<AppState>,
    ResolvedPath(parsed): ResolvedPath,
    mut multipart: Multipart,
) -> AppResult<StatusCode> {
    let max_post_size = state.config().file.max_post_size;

    let mut data: Option<Vec<u8>> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "failed to read multipart form");
        AppError::BadRequest("Bad request".to_string())
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let bytes = field.bytes().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::TooLarge(
                    "File too large, please use PUT method to upload large files".to_string(),
                )
            } else {
                warn!(error = %e, "failed to read upload data");
                AppError::BadRequest("Failed to read file data".to_string())
            }
        })?;
        if bytes.len() as i64 > max_post_size {
            return Err(AppError::TooLarge(
                "File too large, please use PUT method to upload large files".to_string(),
            ));
        }
        data = Some(bytes.to_vec());
        break; // only the first file field counts
    }

    let Some(data) = data else {
        return Err(AppError::BadRequest("No file provided".to_string()));
    };

    let storage = state.storage();
    storage.write_staging(&parsed.relative, &data).await?;
    storage.complete_upload(&parsed).await?;

    Ok(StatusCode::CREATED)
}

/// DELETE /file/{path}: remove a logical file entirely.
async fn delete_file(
    State(state): State<AppState>,
    ResolvedPath(parsed): ResolvedPath,
) -> AppResult<StatusCode> {
    state.storage().delete_file(&parsed.fs).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The stored MIME type, defaulting to a binary stream.
fn content_type(info: &FileInfo) -> String {
    if info.file_meta.mime_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        info.file_meta.mime_type.clone()
    }
}
