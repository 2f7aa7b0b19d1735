//! HTTP protocol helpers: range parsing, header dates, ETags and
//! conditional request evaluation.

use axum::http::HeaderMap;
use axum::http::StatusCode;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::storage::FileInfo;

/// Range parsing failures; the message is echoed in the 416 body.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RangeError(pub &'static str);

/// Parse `Content-Range: bytes S-E/T` plus `Content-Length: L` for an
/// upload, returning `(start, end, total)`.
pub fn parse_range_upload(
    content_range: Option<&str>,
    content_length: Option<&str>,
    upload_limit: i64,
) -> Result<(i64, i64, i64), RangeError> {
    let content_length: i64 = content_length
        .and_then(|v| v.parse().ok())
        .ok_or(RangeError("invalid content length"))?;
    if content_length > upload_limit {
        return Err(RangeError("file size exceeds the upload limit"));
    }

    // No header: the body is the whole file.
    let Some(content_range) = content_range.filter(|v| !v.is_empty()) else {
        return Ok((0, content_length - 1, content_length));
    };

    let range = content_range
        .strip_prefix("bytes ")
        .ok_or(RangeError("invalid range header format"))?;

    let (range_part, total_part) = range
        .split_once('/')
        .ok_or(RangeError("invalid range header format"))?;

    let total: i64 = total_part
        .parse()
        .map_err(|_| RangeError("invalid total value"))?;

    let (start_part, end_part) = range_part
        .split_once('-')
        .ok_or(RangeError("invalid range format"))?;

    let start: i64 = if start_part.is_empty() {
        0
    } else {
        start_part
            .parse()
            .map_err(|_| RangeError("invalid start value"))?
    };

    let end: i64 = if end_part.is_empty() {
        start + content_length - 1
    } else {
        end_part
            .parse()
            .map_err(|_| RangeError("invalid end value"))?
    };

    if start > end {
        return Err(RangeError("invalid range: start must be less than or equal to end"));
    }
    if end >= total {
        return Err(RangeError("range exceeds total content length"));
    }
    if content_length != end - start + 1 {
        return Err(RangeError("content length does not match the range"));
    }
    if total > upload_limit {
        return Err(RangeError("file size exceeds the upload limit"));
    }

    Ok((start, end, total))
}

/// Parse `Range: bytes=S-E` for a download, returning `(start, end)`
/// clamped to the file size.
pub fn parse_range_download(
    range_header: Option<&str>,
    file_size: i64,
) -> Result<(i64, i64), RangeError> {
    let Some(range_header) = range_header.filter(|v| !v.is_empty()) else {
        return Ok((0, file_size - 1));
    };

    let range = range_header
        .strip_prefix("bytes=")
        .ok_or(RangeError("invalid range header format"))?;

    let (start_part, end_part) = range
        .split_once('-')
        .ok_or(RangeError("invalid range format"))?;

    // Suffix form `bytes=-N`: the last N bytes, clamped to the file.
    if start_part.is_empty() {
        if !end_part.is_empty() {
            let last_n: i64 = end_part
                .parse()
                .map_err(|_| RangeError("invalid end value"))?;
            return Ok(((file_size - last_n).max(0), file_size - 1));
        }
        return Err(RangeError("invalid range format"));
    }

    let start: i64 = start_part
        .parse()
        .map_err(|_| RangeError("invalid start value"))?;
    let mut end: i64 = if end_part.is_empty() {
        file_size - 1
    } else {
        end_part
            .parse()
            .map_err(|_| RangeError("invalid end value"))?
    };

    if start > end {
        return Err(RangeError("invalid range: start must be less than or equal to end"));
    }
    if end >= file_size {
        end = file_size - 1;
    }
    if start >= file_size {
        return Err(RangeError("range exceeds total content length"));
    }

    Ok((start, end))
}

/// Parse an RFC 1123 header date (`Mon, 02 Jan 2006 15:04:05 GMT`) to unix
/// seconds. Unparseable dates return `None` and are ignored by callers.
pub fn header_date_to_unix(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Format unix seconds as an RFC 1123 header date with a literal `GMT`.
pub fn unix_to_header_date(timestamp: i64) -> String {
    let dt = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap_or_default());
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `"{lastModifiedHex}-{sizeHex}-{sha1OrEmpty}"`, quoted.
pub fn etag(info: &FileInfo) -> String {
    format!(
        "\"{:x}-{:x}-{}\"",
        info.last_modified, info.file_size, info.file_meta.hash.sha1
    )
}

/// Evaluate conditional request headers against an ETag and modification
/// time. Returns the short-circuit status, if any. Evaluation order
/// matters: `If-Match`, `If-None-Match`, `If-Modified-Since`,
/// `If-Unmodified-Since`.
pub fn check_conditionals(
    headers: &HeaderMap,
    etag: &str,
    last_modified: i64,
) -> Option<StatusCode> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(if_match) = header("if-match")
        && if_match != etag
    {
        return Some(StatusCode::PRECONDITION_FAILED);
    }

    if let Some(if_none_match) = header("if-none-match")
        && if_none_match == etag
    {
        return Some(StatusCode::NOT_MODIFIED);
    }

    if let Some(since) = header("if-modified-since").and_then(header_date_to_unix)
        && since >= last_modified
    {
        return Some(StatusCode::NOT_MODIFIED);
    }

    if let Some(since) = header("if-unmodified-since").and_then(header_date_to_unix)
        && since < last_modified
    {
        return Some(StatusCode::PRECONDITION_FAILED);
    }

    None
}
