//! Telephony provider clients for Trunkgate
//!
//! One `TelephonyProviderClient` implementation per provider, each
//! translating the narrow client interface into that provider's control API:
//!
//! - `TwilioClient` - Twilio REST API (account validation, call control)
//! - `TelnyxClient` - Telnyx v2 API (account validation, call control)
//! - `CustomSipClient` - direct SIP trunks, probed via endpoint reachability
//!
//! Provider failures surface as `AppError::ProviderError`; no provider wire
//! format leaks past this crate.

pub mod custom;
pub mod telnyx;
pub mod twilio;

pub use custom::CustomSipClient;
pub use telnyx::TelnyxClient;
pub use twilio::TwilioClient;

use std::sync::Arc;
use tracing::info;
use trunkgate_core::config::ProvidersConfig;
use trunkgate_core::traits::ProviderRegistry;
use trunkgate_core::AppResult;

/// Build the provider registry from configuration
///
/// Providers without credentials are simply absent from the registry; trunks
/// bound to them fail provider operations with `ProviderNotConfigured`.
pub fn build_registry(config: &ProvidersConfig) -> AppResult<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    if let Some(twilio) = &config.twilio {
        registry.register(Arc::new(TwilioClient::new(twilio)?));
        info!("Registered Twilio provider client");
    }

    if let Some(telnyx) = &config.telnyx {
        registry.register(Arc::new(TelnyxClient::new(telnyx)?));
        info!("Registered Telnyx provider client");
    }

    if config.custom_enabled {
        registry.register(Arc::new(CustomSipClient::new()));
        info!("Registered custom SIP provider client");
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trunkgate_core::models::TrunkProvider;

    #[test]
    fn test_registry_from_default_config() {
        let registry = build_registry(&ProvidersConfig::default()).unwrap();
        // custom is credential-free and enabled by default
        assert!(registry.get(TrunkProvider::Custom).is_ok());
        assert!(registry.get(TrunkProvider::Twilio).is_err());
    }
}
