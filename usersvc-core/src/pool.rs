//! Bounded connection pool
//!
//! A semaphore caps lent connections at `max_open`. Returned connections are
//! parked in an idle list holding at most `max_idle`; the rest are closed.
//! All bookkeeping (idle list, open and borrowed counts, closed flag) sits
//! behind one mutex that is never held across an await.
//!
//! `close_all` flips the closed flag and closes the semaphore, so new callers
//! and tasks already waiting for a permit fail with [`PoolError::Closed`].
//! It then waits until every borrowed connection has come back and closes
//! the idle ones.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pool error type
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool is closed")]
    Closed,

    #[error("failed to open connection: {0}")]
    Connect(#[source] BoxError),

    #[error("failed to close connection: {0}")]
    Close(#[source] BoxError),
}

impl PoolError {
    pub fn connect(err: impl Into<BoxError>) -> Self {
        Self::Connect(err.into())
    }

    pub fn close(err: impl Into<BoxError>) -> Self {
        Self::Close(err.into())
    }
}

/// Opens and closes the connections a [`Pool`] hands out.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    async fn close(&self, conn: Self::Connection) -> Result<(), PoolError>;
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections that exist, borrowed or idle
    pub open: usize,
    pub idle: usize,
    pub borrowed: usize,
    pub max_open: usize,
    pub max_idle: usize,
    pub closed: bool,
}

struct PoolState<T> {
    idle: Vec<T>,
    open: usize,
    /// Lent handles, counting ones whose connection is still being opened
    borrowed: usize,
    closed: bool,
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState<C::Connection>>,
    returned: Notify,
}

/// Shared handle to a bounded set of connections. Cheap to clone.
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> Pool<C> {
    /// Create a pool that opens connections lazily.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                permits: Arc::new(Semaphore::new(config.max_open)),
                state: Mutex::new(PoolState {
                    idle: Vec::with_capacity(config.max_idle),
                    open: 0,
                    borrowed: 0,
                    closed: false,
                }),
                returned: Notify::new(),
            }),
        }
    }

    /// Create a pool and open one connection up front, so bad credentials or
    /// an unreachable store surface here instead of on the first request.
    pub async fn connect(connector: C, config: PoolConfig) -> Result<Self, PoolError> {
        let pool = Self::new(connector, config);
        let conn = pool.acquire().await?;
        conn.release().await?;
        info!(
            max_open = config.max_open,
            max_idle = config.max_idle,
            "connection pool ready"
        );
        Ok(pool)
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    pub fn config(&self) -> PoolConfig {
        self.inner.config
    }

    /// Borrow a connection, waiting while `max_open` are already lent out.
    ///
    /// Reuses an idle connection when one is parked, otherwise opens a new
    /// one. A failed open is returned to the caller as is; nothing retries.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, PoolError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let parked = {
            let mut state = self.inner.state();
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.borrowed += 1;
            state.idle.pop()
        };
        // Gives the slot back if connect fails or this future is dropped.
        let slot = BorrowSlot { pool: self };

        let conn = match parked {
            Some(conn) => conn,
            None => {
                let conn = self.inner.connector.connect().await?;
                let open = {
                    let mut state = self.inner.state();
                    state.open += 1;
                    state.open
                };
                debug!(open, "opened pool connection");
                conn
            }
        };
        std::mem::forget(slot);

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.clone(),
            _permit: permit,
        })
    }

    /// Refuse further acquisitions, wait for borrowed connections to come
    /// back, then close every idle connection.
    ///
    /// Returns the first close failure; the remaining connections are still
    /// closed. Calling it again is a no-op.
    pub async fn close_all(&self) -> Result<(), PoolError> {
        self.inner.state().closed = true;
        self.inner.permits.close();

        loop {
            let returned = self.inner.returned.notified();
            let borrowed = self.inner.state().borrowed;
            if borrowed == 0 {
                break;
            }
            debug!(borrowed, "waiting for borrowed connections");
            returned.await;
        }

        let idle = {
            let mut state = self.inner.state();
            let idle = std::mem::take(&mut state.idle);
            state.open -= idle.len();
            idle
        };

        let count = idle.len();
        let mut first_err = None;
        for conn in idle {
            if let Err(e) = self.inner.connector.close(conn).await {
                warn!(error = %e, "closing pooled connection failed");
                first_err.get_or_insert(e);
            }
        }
        info!(closed = count, "connection pool closed");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state();
        PoolStatus {
            open: state.open,
            idle: state.idle.len(),
            borrowed: state.borrowed,
            max_open: self.inner.config.max_open,
            max_idle: self.inner.config.max_idle,
            closed: state.closed,
        }
    }

    /// Take back a lent connection. Returns it when it should be closed
    /// rather than parked.
    fn check_in(&self, conn: C::Connection) -> Option<C::Connection> {
        let discard = {
            let mut state = self.inner.state();
            state.borrowed -= 1;
            if !state.closed && state.idle.len() < self.inner.config.max_idle {
                state.idle.push(conn);
                None
            } else {
                state.open -= 1;
                Some(conn)
            }
        };
        self.inner.returned.notify_waiters();
        discard
    }

    /// Take back a lent connection that must never be reused.
    fn check_in_broken(&self) {
        {
            let mut state = self.inner.state();
            state.borrowed -= 1;
            state.open -= 1;
        }
        self.inner.returned.notify_waiters();
    }

    fn release_slot(&self) {
        self.inner.state().borrowed -= 1;
        self.inner.returned.notify_waiters();
    }
}

/// A borrowed count taken by `acquire` before it holds a connection.
struct BorrowSlot<'a, C: Connector> {
    pool: &'a Pool<C>,
}

impl<C: Connector> Drop for BorrowSlot<'_, C> {
    fn drop(&mut self) {
        self.pool.release_slot();
    }
}

impl<C: Connector> PoolInner<C> {
    fn state(&self) -> MutexGuard<'_, PoolState<C::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A borrowed connection. Returned to the pool on [`release`] or drop.
///
/// [`release`]: PooledConnection::release
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    pool: Pool<C>,
    // Dropped after `Drop::drop` has checked the connection back in, so the
    // next waiter always finds it parked.
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    /// Return the connection, closing it gracefully if it is not parked.
    pub async fn release(mut self) -> Result<(), PoolError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        match self.pool.check_in(conn) {
            Some(conn) => self.pool.connector().close(conn).await,
            None => Ok(()),
        }
    }

    /// Close the connection instead of parking it, for connections whose
    /// socket or protocol state can no longer be trusted.
    pub async fn discard(mut self) -> Result<(), PoolError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.pool.check_in_broken();
        debug!("discarding broken pool connection");
        self.pool.connector().close(conn).await
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `release`, `discard` and `drop` take the connection, and all consume self.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection already released"))
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection already released"))
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let Some(conn) = self.pool.check_in(conn) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.pool.clone();
                handle.spawn(async move {
                    if let Err(e) = pool.connector().close(conn).await {
                        warn!(error = %e, "closing surplus connection failed");
                    }
                });
            }
            Err(_) => drop(conn),
        }
    }
}
