//! User routes and their JSON shapes

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use usersvc_core::{Address, Lifecycle, NewAddress, NewUser, User, UserId, ValidationError};

use crate::http::error::ApiError;
use crate::http::server::HttpState;

/// Body of `POST /users/`. Every field is required.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub firstname: String,
    pub age: u8,
    pub address: CreateAddressRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAddressRequest {
    pub city: String,
    pub zip_code: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: i64,
}

/// Row metadata, named the way existing clients read it
#[derive(Debug, Serialize)]
pub struct ModelResponse {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "UpdatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "DeletedAt")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    #[serde(flatten)]
    pub model: ModelResponse,
    pub firstname: String,
    pub age: u8,
    pub address: AddressResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressResponse {
    #[serde(flatten)]
    pub model: ModelResponse,
    pub user_id: i64,
    pub city: String,
    pub zip_code: String,
}

impl From<CreateUserRequest> for NewUser {
    fn from(req: CreateUserRequest) -> Self {
        NewUser {
            first_name: req.firstname,
            age: req.age,
            address: NewAddress {
                city: req.address.city,
                zip_code: req.address.zip_code,
            },
        }
    }
}

impl ModelResponse {
    fn new(id: i64, lifecycle: Lifecycle) -> Self {
        Self {
            id,
            created_at: lifecycle.created_at,
            updated_at: lifecycle.updated_at,
            deleted_at: lifecycle.deleted_at,
        }
    }
}

impl From<Address> for AddressResponse {
    fn from(address: Address) -> Self {
        Self {
            model: ModelResponse::new(address.id, address.lifecycle),
            user_id: address.user_id.get(),
            city: address.city,
            zip_code: address.zip_code,
        }
    }
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            model: ModelResponse::new(user.id.get(), user.lifecycle),
            firstname: user.first_name,
            age: user.age,
            address: AddressResponse::from(user.address),
        }
    }
}

/// POST /users/ - Create a user with its address
///
/// The body is decoded by hand so that every decode failure, wrong types
/// included, is a 400 rather than axum's 422.
pub async fn create_user(
    State(state): State<Arc<HttpState>>,
    body: Bytes,
) -> Result<Json<CreatedResponse>, ApiError> {
    let req: CreateUserRequest =
        serde_json::from_slice(&body).map_err(|e| ValidationError::Malformed {
            reason: e.to_string(),
        })?;
    debug!(?req, "create user body");

    let id = state.ctx.store().create_user(NewUser::from(req)).await?;
    info!(%id, "user created");
    Ok(Json(CreatedResponse { id: id.get() }))
}

/// GET /users/{id} - Fetch a user with its address
pub async fn get_user(
    State(state): State<Arc<HttpState>>,
    Path(raw): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let id: UserId = raw.parse()?;
    let user = state.ctx.store().get_user(id).await?;
    Ok(Json(UserResponse::from(user)))
}
