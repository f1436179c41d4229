//! Repository implementations
//!
//! PostgreSQL-backed implementations of the trunkgate-core repository traits.

pub mod call_repo;
pub mod trunk_repo;

pub use call_repo::PgCallRepository;
pub use trunk_repo::PgTrunkRepository;
