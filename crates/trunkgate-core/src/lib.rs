//! Trunkgate Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the Trunkgate trunk admission-control subsystem. It includes:
//!
//! - Domain models (Trunk, CallRecord and their state enums)
//! - Common traits for repositories and provider clients
//! - Unified error handling with stable error codes
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
