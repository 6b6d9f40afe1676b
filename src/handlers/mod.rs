//! Thin Axum handlers (§4.12): translate inbound HTTP and event-bus messages
//! into calls on the three cores. No business logic lives here.

pub mod ingest;
pub mod sync;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use uuid::Uuid;

use crate::error::AppError;

/// The user identity and catalog API token an upstream auth layer is assumed
/// to have already attached to the request (§1 Non-goals: this service does
/// not implement authentication itself).
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub token: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| AppError::Internal("request missing authenticated user context".to_string()))
    }
}

/// Helper shared by both handler modules for mapping a missing resource.
pub(crate) fn not_found(resource: &str) -> AppError {
    AppError::NotFound {
        resource: resource.to_string(),
    }
}

pub(crate) const ACCEPTED: StatusCode = StatusCode::ACCEPTED;
