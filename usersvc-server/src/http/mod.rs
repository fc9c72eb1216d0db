//! HTTP front end
//!
//! Axum server with:
//! - `POST /users/`, `GET /users/{id}`
//! - `GET /hello` passthrough and `GET /health`
//! - a timing/logging decorator around every route
//! - per-request timeout and graceful shutdown
//! - JSON error responses

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use server::{build_router, serve, HttpState};
