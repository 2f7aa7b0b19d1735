//! Virtual path extraction.
//!
//! Handlers addressing a logical file take a [`ResolvedPath`], which runs
//! the wildcard path segment through the path resolver and rejects empty
//! or traversing paths with a 400 before the handler body runs.

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;

use crate::error::AppError;
use crate::state::AppState;
use crate::storage::ParsedPath;

/// The resolved `{cleaned, relative, fs}` triple of a request path.
#[derive(Debug, Clone)]
pub struct ResolvedPath(pub ParsedPath);

impl FromRequestParts<AppState> for ResolvedPath {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Path(rpath) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::BadRequest("Path is required".to_string()))?;

        let parsed = state.storage().parse_path(&rpath)?;
        Ok(Self(parsed))
    }
}
