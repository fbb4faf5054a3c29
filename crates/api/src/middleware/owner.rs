//! Caller identity extractor.
//!
//! Credentials are verified upstream; by the time a request reaches this
//! service the caller's id travels in the `x-owner-id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use pixfarm_core::types::DbId;

use crate::error::AppError;
use crate::state::AppState;

pub const OWNER_HEADER: &str = "x-owner-id";

/// The owner on whose behalf a request is made.
///
/// ```ignore
/// async fn my_handler(owner: Owner) -> AppResult<Json<()>> {
///     tracing::info!(owner_id = owner.id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Owner {
    pub id: DbId,
}

impl FromRequestParts<AppState> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {OWNER_HEADER} header")))?;

        let id: DbId = raw
            .trim()
            .parse()
            .map_err(|_| AppError::Unauthorized(format!("Invalid {OWNER_HEADER} header")))?;

        Ok(Owner { id })
    }
}
