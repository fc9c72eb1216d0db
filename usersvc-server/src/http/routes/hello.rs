//! Passthrough to a local upstream

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use tracing::debug;

use crate::http::error::ApiError;
use crate::http::server::HttpState;

/// GET /hello - Proxy to the configured upstream
///
/// Returns the upstream body, whatever its status, encoded as a JSON string.
pub async fn hello(State(state): State<Arc<HttpState>>) -> Result<Json<String>, ApiError> {
    debug!(upstream = %state.hello_upstream, "proxying hello");
    let body = state
        .client
        .get(&state.hello_upstream)
        .send()
        .await?
        .text()
        .await?;
    Ok(Json(body))
}
