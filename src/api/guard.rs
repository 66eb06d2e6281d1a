use super::ApiState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Admit the request through the quota gate, or answer 401/429/503.
/// Admitted requests carry the caller's `ApiKey` as an extension.
pub async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let raw_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match state.gate.authenticate(raw_key.as_deref()).await {
        Ok(key) => {
            request.extensions_mut().insert(key);
            next.run(request).await
        }
        Err(e) => {
            warn!("Rejected {} {}: {}", request.method(), request.uri().path(), e);
            ApiError::from(e).into_response()
        }
    }
}
