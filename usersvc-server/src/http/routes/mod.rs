//! Route handlers
//!
//! - users: create and fetch the user aggregate
//! - hello: passthrough to a local upstream
//! - health: liveness and pool status

pub mod health;
pub mod hello;
pub mod users;

pub use health::*;
pub use hello::*;
pub use users::*;
