//! In-process backend
//!
//! Keeps the aggregate in a map behind a mutex. Connections are tokens that
//! only exist so the pool has something to count; every query goes through
//! one, exactly as with the relational backend.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{StoreError, UserBackend};
use crate::model::{Address, Lifecycle, NewUser, User, UserId};
use crate::pool::{Connector, PoolError};

#[derive(Default)]
struct Tables {
    last_user_id: i64,
    last_address_id: i64,
    users: BTreeMap<UserId, User>,
}

#[derive(Default)]
struct MemoryInner {
    tables: Mutex<Tables>,
    live: AtomicUsize,
    opened: AtomicUsize,
    reject_writes: AtomicBool,
    refuse_connections: AtomicBool,
    sever_connections: AtomicBool,
    latency: Duration,
}

/// In-memory user backend. Clones share the same tables and counters.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

/// Token handed out by [`MemoryBackend`] in place of a socket
#[derive(Debug)]
pub struct MemoryConnection {
    id: usize,
}

impl MemoryConnection {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every query take at least `latency`, so concurrent callers
    /// actually overlap on the pool.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                latency,
                ..MemoryInner::default()
            }),
        }
    }

    /// Fail inserts as a constraint violation would.
    pub fn reject_writes(&self, reject: bool) {
        self.inner.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Fail new connections as an unreachable store would.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Fail queries with an I/O error, as a dropped socket would.
    pub fn sever_connections(&self, sever: bool) {
        self.inner.sever_connections.store(sever, Ordering::SeqCst);
    }

    fn check_link(&self, conn: &MemoryConnection) -> Result<(), StoreError> {
        if self.inner.sever_connections.load(Ordering::SeqCst) {
            let err = io::Error::new(
                io::ErrorKind::ConnectionReset,
                format!("connection {} reset by peer", conn.id),
            );
            return Err(StoreError::Database(sqlx::Error::Io(err)));
        }
        Ok(())
    }

    /// Connections opened and not yet closed
    pub fn live_connections(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Connections opened over the backend's lifetime
    pub fn opened_connections(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn user_count(&self) -> usize {
        self.tables().users.len()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if !self.inner.latency.is_zero() {
            tokio::time::sleep(self.inner.latency).await;
        }
    }
}

#[async_trait]
impl Connector for MemoryBackend {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, PoolError> {
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(PoolError::connect("in-memory store refused the connection"));
        }
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        let id = self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection { id })
    }

    async fn close(&self, conn: MemoryConnection) -> Result<(), PoolError> {
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
        debug!(conn = conn.id, "closed in-memory connection");
        Ok(())
    }
}

#[async_trait]
impl UserBackend for MemoryBackend {
    async fn migrate(&self, _conn: &mut MemoryConnection) -> Result<(), StoreError> {
        debug!("in-memory schema needs no migration");
        Ok(())
    }

    async fn insert_user(
        &self,
        conn: &mut MemoryConnection,
        user: &NewUser,
    ) -> Result<UserId, StoreError> {
        self.simulate_latency().await;
        self.check_link(conn)?;
        if self.inner.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(format!(
                "insert on connection {} violates a constraint",
                conn.id
            )));
        }

        // One lock for both rows keeps the pair atomic.
        let mut tables = self.tables();
        tables.last_user_id += 1;
        tables.last_address_id += 1;
        let id = UserId::new(tables.last_user_id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let now = Utc::now();
        let stored = User {
            id,
            first_name: user.first_name.clone(),
            age: user.age,
            address: Address {
                id: tables.last_address_id,
                user_id: id,
                city: user.address.city.clone(),
                zip_code: user.address.zip_code.clone(),
                lifecycle: Lifecycle::fresh(now),
            },
            lifecycle: Lifecycle::fresh(now),
        };
        tables.users.insert(id, stored);
        Ok(id)
    }

    async fn fetch_user(
        &self,
        conn: &mut MemoryConnection,
        id: UserId,
    ) -> Result<Option<User>, StoreError> {
        self.simulate_latency().await;
        self.check_link(conn)?;
        let user = self
            .tables()
            .users
            .get(&id)
            .filter(|u| u.lifecycle.deleted_at.is_none())
            .cloned();
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewAddress;

    fn new_user() -> NewUser {
        NewUser {
            first_name: "ana".into(),
            age: 31,
            address: NewAddress {
                city: "bandung".into(),
                zip_code: "40111".into(),
            },
        }
    }

    #[tokio::test]
    async fn ids_increase_and_are_not_reused() {
        let backend = MemoryBackend::new();
        let mut conn = backend.connect().await.unwrap();
        let a = backend.insert_user(&mut conn, &new_user()).await.unwrap();
        let b = backend.insert_user(&mut conn, &new_user()).await.unwrap();
        assert!(b > a);
        backend.close(conn).await.unwrap();
        assert_eq!(backend.live_connections(), 0);
        assert_eq!(backend.opened_connections(), 1);
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let backend = MemoryBackend::new();
        backend.refuse_connections(true);
        assert!(matches!(backend.connect().await, Err(PoolError::Connect(_))));
        assert_eq!(backend.live_connections(), 0);
    }
}
