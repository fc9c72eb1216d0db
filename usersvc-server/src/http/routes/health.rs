//! Health check route

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use usersvc_core::PoolStatus;

use crate::http::server::HttpState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pool: PoolHealth,
}

#[derive(Debug, Serialize)]
pub struct PoolHealth {
    pub open: usize,
    pub idle: usize,
    pub borrowed: usize,
    pub max_open: usize,
    pub max_idle: usize,
    pub closed: bool,
}

impl From<PoolStatus> for PoolHealth {
    fn from(s: PoolStatus) -> Self {
        Self {
            open: s.open,
            idle: s.idle,
            borrowed: s.borrowed,
            max_open: s.max_open,
            max_idle: s.max_idle,
            closed: s.closed,
        }
    }
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<Arc<HttpState>>) -> Json<HealthResponse> {
    let pool = state.ctx.store().pool_status();
    let status = if pool.closed { "closing" } else { "ok" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pool: PoolHealth::from(pool),
    })
}
