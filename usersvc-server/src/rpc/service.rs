//! `UserService` implementation and protobuf <-> domain conversions

use tonic::{Request, Response, Status};
use tracing::{info, warn};

use usersvc_core::model::age_from_wire;
use usersvc_core::{NewAddress, NewUser, StoreError, User, UserId, ValidationError};

use super::proto::{self, user_service_server::UserService};
use crate::state::AppContext;

/// gRPC handler. Holds nothing but the shared context, so concurrent calls
/// only meet at the connection pool.
pub struct UserRpc {
    ctx: AppContext,
}

impl UserRpc {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl UserService for UserRpc {
    async fn create_user(
        &self,
        request: Request<proto::CreateUserRequest>,
    ) -> Result<Response<proto::CreateUserResponse>, Status> {
        info!("rpc CreateUser");
        let user = request
            .into_inner()
            .user
            .ok_or(ValidationError::Missing { field: "user" })
            .and_then(NewUser::try_from)
            .map_err(invalid_argument)?;

        let id = self
            .ctx
            .store()
            .create_user(user)
            .await
            .map_err(status_from_store)?;

        Ok(Response::new(proto::CreateUserResponse { id: id.get() }))
    }

    async fn get_user(
        &self,
        request: Request<proto::GetUserRequest>,
    ) -> Result<Response<proto::GetUserResponse>, Status> {
        let raw = request.into_inner().id;
        info!(id = raw, "rpc GetUser");
        let id = UserId::new(raw).map_err(invalid_argument)?;

        let user = self
            .ctx
            .store()
            .get_user(id)
            .await
            .map_err(status_from_store)?;

        Ok(Response::new(proto::GetUserResponse {
            user: Some(proto::User::from(&user)),
        }))
    }
}

impl TryFrom<proto::User> for NewUser {
    type Error = ValidationError;

    fn try_from(user: proto::User) -> Result<Self, Self::Error> {
        let address = user
            .address
            .ok_or(ValidationError::Missing { field: "address" })?;

        Ok(NewUser {
            first_name: user.firstname,
            age: age_from_wire(user.age)?,
            address: NewAddress {
                city: address.city,
                zip_code: address.zip_code,
            },
        })
    }
}

impl From<&User> for proto::User {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.get(),
            firstname: user.first_name.clone(),
            age: u32::from(user.age),
            address: Some(proto::Address {
                city: user.address.city.clone(),
                zip_code: user.address.zip_code.clone(),
            }),
        }
    }
}

fn invalid_argument(err: ValidationError) -> Status {
    Status::invalid_argument(err.to_string())
}

/// Not-found keeps its own code; every other failure is INTERNAL carrying
/// the original error text.
fn status_from_store(err: StoreError) -> Status {
    match err {
        StoreError::NotFound { .. } => Status::not_found(err.to_string()),
        other => {
            warn!(error = %other, "rpc call failed");
            Status::internal(other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;
    use usersvc_core::{MemoryBackend, PoolConfig, UserRepo};

    async fn rpc() -> (UserRpc, MemoryBackend) {
        let backend = MemoryBackend::new();
        let repo = UserRepo::connect(backend.clone(), PoolConfig::default())
            .await
            .unwrap();
        (UserRpc::new(AppContext::new(repo)), backend)
    }

    fn wire_user(age: u32) -> proto::User {
        proto::User {
            id: 0,
            firstname: "cris".into(),
            age,
            address: Some(proto::Address {
                city: "jakbar".into(),
                zip_code: "12345".into(),
            }),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let (rpc, _) = rpc().await;
        let created = rpc
            .create_user(Request::new(proto::CreateUserRequest {
                user: Some(wire_user(26)),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(created.id > 0);

        let fetched = rpc
            .get_user(Request::new(proto::GetUserRequest { id: created.id }))
            .await
            .unwrap()
            .into_inner()
            .user
            .unwrap();

        assert_eq!(fetched, proto::User { id: created.id, ..wire_user(26) });
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (rpc, _) = rpc().await;
        let status = rpc
            .get_user(Request::new(proto::GetUserRequest { id: 404 }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn malformed_requests_never_reach_the_store() {
        let (rpc, backend) = rpc().await;

        let missing = rpc
            .create_user(Request::new(proto::CreateUserRequest { user: None }))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), Code::InvalidArgument);

        let too_old = rpc
            .create_user(Request::new(proto::CreateUserRequest {
                user: Some(wire_user(300)),
            }))
            .await
            .unwrap_err();
        assert_eq!(too_old.code(), Code::InvalidArgument);

        let bad_id = rpc
            .get_user(Request::new(proto::GetUserRequest { id: 0 }))
            .await
            .unwrap_err();
        assert_eq!(bad_id.code(), Code::InvalidArgument);

        assert_eq!(backend.user_count(), 0);
    }

    #[tokio::test]
    async fn store_failure_is_internal_with_original_text() {
        let (rpc, backend) = rpc().await;
        backend.reject_writes(true);
        let status = rpc
            .create_user(Request::new(proto::CreateUserRequest {
                user: Some(wire_user(26)),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("write rejected"));
    }
}
