//! Goflet library.
//!
//! A lightweight, authenticated HTTP file service with resumable uploads,
//! ranged downloads, on-the-fly image derivatives and a content-addressed
//! storage layer. This library exposes the internals for integration
//! testing; the server entry point is the `goflet` binary.

pub mod cache;
pub mod config;
pub mod cron;
pub mod error;
pub mod hash;
pub mod httpx;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod storage;
pub mod worker;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::AppState;

/// Build the application router with all middleware attached.
pub fn app(state: AppState) -> Router {
    let max_post_size = state.config().file.max_post_size.max(0) as usize;

    Router::new()
        .merge(routes::file::router())
        .merge(routes::upload::router())
        .merge(routes::image::router())
        .merge(routes::meta::router())
        .merge(routes::action::router())
        .merge(routes::onlyoffice::router())
        .merge(routes::health::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_permission,
        ))
        .layer(DefaultBodyLimit::max(max_post_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
