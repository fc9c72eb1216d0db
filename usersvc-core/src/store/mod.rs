//! Data access layer for the user aggregate
//!
//! [`UserRepo`] runs every operation on exactly one connection borrowed from
//! the shared [`Pool`]; that borrow is the only point where concurrent
//! requests meet. Backends supply the connector and the two queries:
//!
//! - [`postgres::PgBackend`] - the relational store used in production
//! - [`memory::MemoryBackend`] - an in-process stand-in with the same pool
//!   semantics, for tests and local runs

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::model::{NewUser, User, UserId};
use crate::pool::{Connector, Pool, PoolError, PoolStatus, PooledConnection};

pub use memory::MemoryBackend;
pub use postgres::PgBackend;

/// Data access error type
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user {id} not found")]
    NotFound { id: UserId },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A stored row no longer fits the domain model
    #[error("stored row is invalid: {0}")]
    Corrupt(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The connection that produced this error cannot be trusted again.
    pub fn is_connection_broken(&self) -> bool {
        matches!(
            self,
            Self::Database(
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}

/// Queries a backend runs on one of its own connections.
#[async_trait]
pub trait UserBackend: Connector {
    /// Create missing tables. Never drops anything.
    async fn migrate(&self, conn: &mut Self::Connection) -> Result<(), StoreError>;

    /// Insert a user and its address as one unit.
    async fn insert_user(
        &self,
        conn: &mut Self::Connection,
        user: &NewUser,
    ) -> Result<UserId, StoreError>;

    /// Load a live user with its address, `None` if there is no such row.
    async fn fetch_user(
        &self,
        conn: &mut Self::Connection,
        id: UserId,
    ) -> Result<Option<User>, StoreError>;
}

/// Operations both front ends call. Object safe so the context can hold any
/// backend behind one pointer.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    async fn create_user(&self, user: NewUser) -> Result<UserId, StoreError>;

    async fn get_user(&self, id: UserId) -> Result<User, StoreError>;

    fn pool_status(&self) -> PoolStatus;

    /// Close the underlying pool, waiting for borrowed connections.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Pool-backed implementation of [`UserStore`]
pub struct UserRepo<B: UserBackend> {
    pool: Pool<B>,
}

impl<B: UserBackend> UserRepo<B> {
    pub fn new(pool: Pool<B>) -> Self {
        Self { pool }
    }

    /// Build the pool and open the first connection eagerly.
    pub async fn connect(backend: B, config: PoolConfig) -> Result<Self, StoreError> {
        let pool = Pool::connect(backend, config).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool<B> {
        &self.pool
    }

    pub fn backend(&self) -> &B {
        self.pool.connector()
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        let result = self.backend().migrate(&mut *conn).await;
        give_back(conn, &result).await;
        result
    }
}

#[async_trait]
impl<B: UserBackend> UserStore for UserRepo<B> {
    async fn create_user(&self, user: NewUser) -> Result<UserId, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let result = self.backend().insert_user(&mut *conn, &user).await;
        give_back(conn, &result).await;

        match &result {
            Ok(id) => debug!(%id, "user inserted"),
            Err(e) => warn!(error = %e, "user insert failed"),
        }
        result
    }

    async fn get_user(&self, id: UserId) -> Result<User, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let result = self.backend().fetch_user(&mut *conn, id).await;
        give_back(conn, &result).await;

        result?.ok_or(StoreError::NotFound { id })
    }

    fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close_all().await?;
        Ok(())
    }
}

/// Return a connection after a query, closing it instead when the query
/// broke it. A failed close does not change the outcome of the query.
async fn give_back<B: UserBackend, T>(
    conn: PooledConnection<B>,
    result: &Result<T, StoreError>,
) {
    let returned = match result {
        Err(e) if e.is_connection_broken() => {
            warn!(error = %e, "dropping broken connection");
            conn.discard().await
        }
        _ => conn.release().await,
    };
    if let Err(e) = returned {
        warn!(error = %e, "releasing connection failed");
    }
}
