//! Shared harness for integration tests: a router over throwaway storage
//! directories, plus request/response helpers.
#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::path::Path;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use goflet::config::{
    CacheConfig, ClientCacheConfig, Config, CronConfig, FileConfig, ImageConfig, JwtConfig,
};
use goflet::state::AppState;

/// A test configuration rooted in a temporary directory. Auth is off by
/// default; tests that exercise it flip `jwt.enabled`.
pub fn test_config(dir: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        file: FileConfig {
            base_path: dir.join("data"),
            upload_path: dir.join("upload"),
            allow_folder_creation: true,
            upload_limit: 1024 * 1024 * 1024,
            upload_timeout: 7200,
            max_post_size: 20 * 1024 * 1024,
        },
        cache: CacheConfig {
            max_entries: 100,
            default_ttl: 60,
        },
        image: ImageConfig {
            default_format: "jpeg".to_string(),
            allowed_formats: vec!["jpeg".into(), "png".into(), "gif".into()],
            strict_mode: false,
            allowed_sizes: vec![],
            max_width: 4096,
            max_height: 4096,
            max_file_size: 20 * 1024 * 1024,
        },
        cron: CronConfig {
            delete_empty_folder: 0,
            clean_outdated_file: 0,
        },
        client_cache: ClientCacheConfig {
            enabled: false,
            max_age: 3600,
        },
        jwt: JwtConfig {
            enabled: false,
            algorithm: "HS256".to_string(),
            signing_key: "test-secret".to_string(),
            trust_any_issuer: true,
            trusted_issuers: vec![],
        },
    }
}

/// Build the router and state over a fresh config.
pub async fn test_app(config: Config) -> (Router, AppState) {
    let state = AppState::new(config).await.unwrap();
    (goflet::app(state.clone()), state)
}

/// Send one request through the router.
pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

/// Read the whole response body.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// PUT one byte range of a resumable upload; asserts 202.
pub async fn put_range(app: &Router, path: &str, range: &str, body: &[u8]) {
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/upload{path}"))
        .header(header::CONTENT_RANGE, range)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body.to_vec()))
        .unwrap();
    let response = send(app, request).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

/// Complete a resumable upload; asserts 201.
pub async fn complete_upload(app: &Router, path: &str) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/upload{path}"))
        .body(Body::empty())
        .unwrap();
    let response = send(app, request).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

/// Upload a whole file through the resumable endpoints.
pub async fn upload_file(app: &Router, path: &str, content: &[u8]) {
    let total = content.len();
    put_range(
        app,
        path,
        &format!("bytes 0-{}/{}", total - 1, total),
        content,
    )
    .await;
    complete_upload(app, path).await;
}

/// Build a `multipart/form-data` body holding one `file` field.
pub fn multipart_body(filename: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = "goflet-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

/// A tiny valid PNG with distinguishable pixels.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    use image::{Rgba, RgbaImage};
    let img = image::DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 200, 255])
    }));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}
