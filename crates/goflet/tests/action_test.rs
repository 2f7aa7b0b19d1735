//! Copy, move and create action scenarios.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;

use common::*;

async fn post_action(app: &Router, action: &str, body: serde_json::Value) -> StatusCode {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/action/{action}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await.status()
}

async fn download(app: &Router, path: &str) -> (StatusCode, Vec<u8>) {
    let response = send(
        app,
        Request::builder()
            .uri(format!("/file{path}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let status = response.status();
    (status, body_bytes(response).await)
}

#[tokio::test]
async fn copy_conflict_abort_then_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path())).await;

    upload_file(&app, "/a", b"source content").await;
    upload_file(&app, "/b", b"target content").await;

    // Abort refuses to clobber the target.
    let status = post_action(
        &app,
        "copy",
        json!({"sourcePath": "/a", "targetPath": "/b", "onConflict": "abort"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(download(&app, "/b").await.1, b"target content");

    // Overwrite replaces it.
    let status = post_action(
        &app,
        "copy",
        json!({"sourcePath": "/a", "targetPath": "/b", "onConflict": "overwrite"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(download(&app, "/b").await.1, b"source content");
    // The source survives a copy.
    assert_eq!(download(&app, "/a").await.1, b"source content");
}

#[tokio::test]
async fn copy_missing_source_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path())).await;

    upload_file(&app, "/present", b"x").await;

    let status = post_action(
        &app,
        "copy",
        json!({"sourcePath": "/ghost", "targetPath": "/present", "onConflict": "overwrite"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn copy_onto_itself_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path())).await;

    upload_file(&app, "/self", b"x").await;

    let status = post_action(
        &app,
        "copy",
        json!({"sourcePath": "/self", "targetPath": "/self", "onConflict": "overwrite"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn copy_rewrites_target_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path())).await;

    upload_file(&app, "/orig/src.txt", b"carry my mime").await;

    let status = post_action(
        &app,
        "copy",
        json!({"sourcePath": "/orig/src.txt", "targetPath": "/copies/dst.txt", "onConflict": "abort"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = send(
        &app,
        Request::builder()
            .uri("/api/meta/copies/dst.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["fileMeta"]["relativePath"], "copies/dst.txt");
    assert_eq!(body["fileMeta"]["fileName"], "dst.txt");
    // The sniffed mime carries over from the source.
    assert_eq!(body["fileMeta"]["mimeType"], "text/plain");
}

#[tokio::test]
async fn move_relocates_and_removes_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path())).await;

    upload_file(&app, "/from.txt", b"mobile content").await;

    let status = post_action(
        &app,
        "move",
        json!({"sourcePath": "/from.txt", "targetPath": "/to.txt", "onConflict": "abort"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(download(&app, "/to.txt").await.1, b"mobile content");
    assert_eq!(download(&app, "/from.txt").await.0, StatusCode::NOT_FOUND);

    let response = send(
        &app,
        Request::builder()
            .uri("/api/meta/to.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["fileMeta"]["relativePath"], "to.txt");
    assert_eq!(body["fileMeta"]["fileName"], "to.txt");
}

#[tokio::test]
async fn create_makes_an_empty_file_once() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path())).await;

    let status = post_action(&app, "create", json!({"path": "/fresh.txt"})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = download(&app, "/fresh.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    // A second create conflicts.
    let status = post_action(&app, "create", json!({"path": "/fresh.txt"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn create_rejects_invalid_paths() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _state) = test_app(test_config(dir.path())).await;

    let status = post_action(&app, "create", json!({"path": "/../escape"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let status = post_action(&app, "create", json!({"path": ""})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
