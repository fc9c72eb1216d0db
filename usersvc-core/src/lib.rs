//! usersvc-core: the user aggregate and everything below the network
//!
//! - [`model`] - domain types and request-shape validation
//! - [`config`] - database settings and pool limits
//! - [`pool`] - bounded connection pool shared by both front ends
//! - [`store`] - data access layer with PostgreSQL and in-memory backends

pub mod config;
pub mod model;
pub mod pool;
pub mod store;

pub use config::{ConfigError, DbConfig, PoolConfig};
pub use model::{Address, Lifecycle, NewAddress, NewUser, User, UserId, ValidationError};
pub use pool::{Connector, Pool, PoolError, PoolStatus, PooledConnection};
pub use store::{MemoryBackend, PgBackend, StoreError, UserBackend, UserRepo, UserStore};
