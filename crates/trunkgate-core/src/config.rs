//! Application configuration
//!
//! This module provides centralized configuration management using the
//! `config` crate. Configuration can be loaded from environment variables
//! and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Health monitor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Seconds between probe cycles for each trunk
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Consecutive probe failures before a trunk is marked Error
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Per-probe timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Upper bound on concurrently running probes in one sweep
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

fn default_check_interval() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_max_concurrent_probes() -> usize {
    num_cpus::get()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            failure_threshold: default_failure_threshold(),
            probe_timeout_secs: default_probe_timeout(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

/// Failover chain walking configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FailoverConfig {
    /// Hard bound on chain depth, independent of cycle detection
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,
}

fn default_max_chain_depth() -> usize {
    10
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: default_max_chain_depth(),
        }
    }
}

/// Provider credential configuration
///
/// Providers without credentials simply don't get a registered client;
/// trunks bound to them fail admission-path provider operations with
/// `ProviderNotConfigured`.
#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub twilio: Option<TwilioConfig>,

    #[serde(default)]
    pub telnyx: Option<TelnyxConfig>,

    /// Custom SIP probing is credential-free and enabled by default
    #[serde(default = "default_custom_enabled")]
    pub custom_enabled: bool,
}

fn default_custom_enabled() -> bool {
    true
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            twilio: None,
            telnyx: None,
            custom_enabled: default_custom_enabled(),
        }
    }
}

/// Twilio API credentials
#[derive(Debug, Deserialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
}

/// Telnyx API credentials
#[derive(Debug, Deserialize, Clone)]
pub struct TelnyxConfig {
    pub api_key: String,
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("database.max_connections", 20)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("health.check_interval_secs", 60)?
            .set_default("health.failure_threshold", 3)?
            .set_default("health.probe_timeout_secs", 10)?
            .set_default("health.max_concurrent_probes", num_cpus::get() as i64)?
            .set_default("failover.max_chain_depth", 10)?
            .set_default("providers.custom_enabled", true)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with TRUNKGATE_ prefix
            .add_source(
                Environment::with_prefix("TRUNKGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("TRUNKGATE").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
