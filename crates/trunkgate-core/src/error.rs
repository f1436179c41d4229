//! Unified error handling for Trunkgate
//!
//! This module provides a comprehensive error type that covers all possible
//! failure scenarios in trunk selection, capacity accounting, and call
//! lifecycle processing, with stable error codes for the API layer.

use crate::models::CallState;
use thiserror::Error;

/// Main application error type
///
/// All errors in the subsystem should be converted to this type.
/// The API layer maps it to wire responses via `error_code()` and
/// `is_retryable()`.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Admission & Selection Errors ====================
    #[error("No trunk available for this call")]
    NoTrunkAvailable,

    #[error("Trunk not found: {0}")]
    TrunkNotFound(String),

    #[error("Trunk not eligible for admission: {0}")]
    TrunkIneligible(String),

    #[error("Trunk {trunk_id} still has {active} active calls")]
    ActiveCallsPresent { trunk_id: String, active: i32 },

    #[error("Failover chain cycle detected at trunk {0}")]
    CycleDetected(String),

    #[error("Failover chain exceeded maximum depth of {0}")]
    MaxDepthExceeded(usize),

    // ==================== Call Lifecycle Errors ====================
    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("Invalid call transition: {from} -> {to}")]
    InvalidTransition { from: CallState, to: CallState },

    // ==================== Provider Errors ====================
    #[error("Provider {provider} error: {message}")]
    ProviderError { provider: String, message: String },

    #[error("No provider client configured for: {0}")]
    ProviderNotConfigured(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the stable error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::NoTrunkAvailable => "no_trunk_available",
            AppError::TrunkNotFound(_) => "trunk_not_found",
            AppError::TrunkIneligible(_) => "trunk_ineligible",
            AppError::ActiveCallsPresent { .. } => "active_calls_present",
            AppError::CycleDetected(_) => "failover_cycle_detected",
            AppError::MaxDepthExceeded(_) => "failover_max_depth_exceeded",
            AppError::CallNotFound(_) => "call_not_found",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::ProviderError { .. } => "provider_error",
            AppError::ProviderNotConfigured(_) => "provider_not_configured",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the caller may retry the operation later
    ///
    /// `NoTrunkAvailable` is a capacity condition, not a fault: the API layer
    /// may queue or retry. Transient infrastructure and provider failures are
    /// retryable as well; contract violations are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NoTrunkAvailable
                | AppError::Pool(_)
                | AppError::Transaction(_)
                | AppError::ProviderError { .. }
        )
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::NoTrunkAvailable.error_code(), "no_trunk_available");
        assert_eq!(
            AppError::InvalidTransition {
                from: CallState::Ended,
                to: CallState::Ringing,
            }
            .error_code(),
            "invalid_transition"
        );
        assert_eq!(
            AppError::CycleDetected("a1".to_string()).error_code(),
            "failover_cycle_detected"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::NoTrunkAvailable.is_retryable());
        assert!(AppError::ProviderError {
            provider: "twilio".to_string(),
            message: "timeout".to_string(),
        }
        .is_retryable());

        assert!(!AppError::InvalidTransition {
            from: CallState::Ended,
            to: CallState::Ringing,
        }
        .is_retryable());
        assert!(!AppError::TrunkNotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_transition_error_message() {
        let err = AppError::InvalidTransition {
            from: CallState::Ended,
            to: CallState::Ringing,
        };
        assert_eq!(err.to_string(), "Invalid call transition: ended -> ringing");
    }
}
