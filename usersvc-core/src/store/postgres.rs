//! PostgreSQL backend
//!
//! Each pooled connection is a plain `PgConnection`; the pool in
//! [`crate::pool`] owns the limits, so sqlx's own pool is not used here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, FromRow};
use tracing::info;

use super::{StoreError, UserBackend};
use crate::config::DbConfig;
use crate::model::{Address, Lifecycle, NewUser, User, UserId};
use crate::pool::{Connector, PoolError};

/// Connects to PostgreSQL and runs the user queries
#[derive(Debug, Clone)]
pub struct PgBackend {
    options: PgConnectOptions,
}

impl PgBackend {
    pub fn new(config: &DbConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.server)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.service);
        Self { options }
    }

    /// Build from a `postgres://` URL.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        let options = url.parse::<PgConnectOptions>()?;
        Ok(Self { options })
    }
}

#[async_trait]
impl Connector for PgBackend {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, PoolError> {
        PgConnection::connect_with(&self.options)
            .await
            .map_err(PoolError::connect)
    }

    async fn close(&self, conn: PgConnection) -> Result<(), PoolError> {
        conn.close().await.map_err(PoolError::close)
    }
}

/// Joined user + address row
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    first_name: String,
    age: i16,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    address_id: i64,
    city: String,
    zip_code: String,
    address_created_at: DateTime<Utc>,
    address_updated_at: DateTime<Utc>,
    address_deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let id = UserId::new(row.id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let age = u8::try_from(row.age)
            .map_err(|_| StoreError::Corrupt(format!("user {} has age {}", row.id, row.age)))?;

        Ok(User {
            id,
            first_name: row.first_name,
            age,
            address: Address {
                id: row.address_id,
                user_id: id,
                city: row.city,
                zip_code: row.zip_code,
                lifecycle: Lifecycle {
                    created_at: row.address_created_at,
                    updated_at: row.address_updated_at,
                    deleted_at: row.address_deleted_at,
                },
            },
            lifecycle: Lifecycle {
                created_at: row.created_at,
                updated_at: row.updated_at,
                deleted_at: row.deleted_at,
            },
        })
    }
}

#[async_trait]
impl UserBackend for PgBackend {
    async fn migrate(&self, conn: &mut PgConnection) -> Result<(), StoreError> {
        info!("Running user schema migrations...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ,
                first_name TEXT NOT NULL,
                age SMALLINT NOT NULL CHECK (age BETWEEN 0 AND 255)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_deleted_at ON users (deleted_at)")
            .execute(&mut *conn)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS addresses (
                id BIGSERIAL PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ,
                user_id BIGINT NOT NULL UNIQUE REFERENCES users(id),
                city TEXT NOT NULL,
                zip_code TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_addresses_deleted_at ON addresses (deleted_at)",
        )
        .execute(&mut *conn)
        .await?;

        info!("User schema ready");
        Ok(())
    }

    async fn insert_user(
        &self,
        conn: &mut PgConnection,
        user: &NewUser,
    ) -> Result<UserId, StoreError> {
        let mut tx = conn.begin().await?;

        let (id,): (i64,) =
            sqlx::query_as("INSERT INTO users (first_name, age) VALUES ($1, $2) RETURNING id")
                .bind(&user.first_name)
                .bind(i16::from(user.age))
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("INSERT INTO addresses (user_id, city, zip_code) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(&user.address.city)
            .bind(&user.address.zip_code)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        UserId::new(id).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn fetch_user(
        &self,
        conn: &mut PgConnection,
        id: UserId,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT
                u.id, u.first_name, u.age,
                u.created_at, u.updated_at, u.deleted_at,
                a.id AS address_id, a.city, a.zip_code,
                a.created_at AS address_created_at,
                a.updated_at AS address_updated_at,
                a.deleted_at AS address_deleted_at
            FROM users u
            JOIN addresses a ON a.user_id = u.id AND a.deleted_at IS NULL
            WHERE u.id = $1 AND u.deleted_at IS NULL
            "#,
        )
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(User::try_from).transpose()
    }
}
