//! Domain models for Trunkgate
//!
//! This module contains the core domain models used throughout the subsystem.

pub mod call;
pub mod trunk;

pub use call::{CallEvent, CallRecord, CallState};
pub use trunk::{CallDirection, HealthStatus, NewTrunk, Trunk, TrunkProvider, TrunkStatus};
