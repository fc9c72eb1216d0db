//! gRPC front end
//!
//! `usersvc.v1.UserService` with `CreateUser` and `GetUser`, served with a
//! shutdown future so the supervisor can drain it like the HTTP listener.

pub mod proto;
mod service;

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use crate::state::AppContext;
use proto::user_service_server::UserServiceServer;

pub use service::UserRpc;

/// Serve gRPC on an already bound listener until `shutdown` resolves, then
/// stop accepting and wait for in-flight calls. Each call is bounded by
/// `request_timeout`.
pub async fn serve<F>(
    listener: TcpListener,
    ctx: AppContext,
    request_timeout: Duration,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    F: Future<Output = ()> + Send,
{
    if let Ok(addr) = listener.local_addr() {
        info!("gRPC server listening at {}", addr);
    }

    Server::builder()
        .timeout(request_timeout)
        .add_service(UserServiceServer::new(UserRpc::new(ctx)))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;

    info!("gRPC server shutdown complete");
    Ok(())
}
