//! usersvc-server: HTTP and gRPC front ends over one shared store
//!
//! Both services are built from the same [`AppContext`], so every request,
//! whichever door it came through, borrows from the same connection pool.
//! The [`Supervisor`] starts them side by side and drains them on shutdown.

pub mod config;
pub mod http;
pub mod rpc;
pub mod state;
pub mod supervisor;

pub use config::ServerConfig;
pub use state::AppContext;
pub use supervisor::{shutdown_signal, Phase, Running, Supervisor, SupervisorError};
