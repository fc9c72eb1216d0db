//! User aggregate: a user row and the one address row it owns.
//!
//! Types here carry no wire concerns. The HTTP and gRPC front ends convert
//! into and out of them explicitly at their own boundaries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Surrogate key assigned by the store on insert. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(i64);

impl UserId {
    /// Wrap a raw key, rejecting zero and negative values.
    pub fn new(raw: i64) -> Result<Self, ValidationError> {
        if raw <= 0 {
            return Err(ValidationError::InvalidFormat {
                field: "id",
                reason: "must be a positive integer",
            });
        }
        Ok(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().parse::<i64>().map_err(|_| ValidationError::InvalidFormat {
            field: "id",
            reason: "must be numeric",
        })?;
        Self::new(raw)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Soft lifecycle metadata stamped by the store on every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Lifecycle {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Fields supplied by a caller creating a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub first_name: String,
    pub age: u8,
    pub address: NewAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAddress {
    pub city: String,
    pub zip_code: String,
}

/// A persisted user with its address eagerly loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub age: u8,
    pub address: Address,
    pub lifecycle: Lifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub id: i64,
    pub user_id: UserId,
    pub city: String,
    pub zip_code: String,
    pub lifecycle: Lifecycle,
}

/// Narrow a wire integer into the age range.
pub fn age_from_wire(raw: u32) -> Result<u8, ValidationError> {
    u8::try_from(raw).map_err(|_| ValidationError::OutOfRange {
        field: "age",
        max: u64::from(u8::MAX),
    })
}

/// Validation error for request shapes that cannot become domain values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field or sub-record is absent
    #[error("{field} is required")]
    Missing { field: &'static str },

    /// String doesn't match the required format
    #[error("{field}: {reason}")]
    InvalidFormat { field: &'static str, reason: &'static str },

    /// Numeric value exceeds its domain
    #[error("{field} exceeds maximum value of {max}")]
    OutOfRange { field: &'static str, max: u64 },

    /// Body could not be decoded at all
    #[error("malformed body: {reason}")]
    Malformed { reason: String },
}
