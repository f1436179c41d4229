//! Trunkgate Database Layer
//!
//! This crate provides storage backends for the admission-control subsystem:
//!
//! - Connection pool management with sqlx
//! - PostgreSQL repositories whose admit/release operations are single
//!   conditional UPDATEs (the atomicity the capacity contract relies on)
//! - An in-memory backend with per-trunk locks, used by tests and
//!   single-process deployments

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::{InMemoryCallRepository, InMemoryTrunkRepository};
pub use pool::create_pool;
pub use repositories::*;

// Re-export commonly used types
pub use sqlx::{PgPool, Postgres, Transaction};
pub use trunkgate_core::{AppError, AppResult};
