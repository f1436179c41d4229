//! Telnyx provider client
//!
//! Uses the Telnyx v2 API for account validation and call control.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};
use trunkgate_core::{
    config::TelnyxConfig,
    models::{Trunk, TrunkProvider},
    traits::{ProbeReport, TelephonyProviderClient},
    AppError, AppResult,
};

const TELNYX_BASE_URL: &str = "https://api.telnyx.com/v2";

/// HTTP timeout for Telnyx API requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Telnyx implementation of TelephonyProviderClient
pub struct TelnyxClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl TelnyxClient {
    /// Create a client from credentials
    pub fn new(config: &TelnyxConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: TELNYX_BASE_URL.to_string(),
            http,
        })
    }

    fn provider_error(message: impl Into<String>) -> AppError {
        AppError::ProviderError {
            provider: TrunkProvider::Telnyx.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl TelephonyProviderClient for TelnyxClient {
    fn provider(&self) -> TrunkProvider {
        TrunkProvider::Telnyx
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn initialize(&self, trunk: &Trunk) -> AppResult<()> {
        let response = self
            .http
            .get(format!("{}/account", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Self::provider_error(format!("Account validation failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::provider_error(format!(
                "Account validation returned HTTP {}",
                response.status()
            )));
        }

        let account: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Self::provider_error(format!("Malformed account response: {}", e)))?;

        info!(
            "Telnyx trunk initialized for account: {}",
            account
                .pointer("/data/company_name")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
        );

        Ok(())
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn health_check(&self, trunk: &Trunk) -> AppResult<ProbeReport> {
        let started = Instant::now();

        let response = self
            .http
            .get(format!("{}/account", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Self::provider_error(format!("Health check failed: {}", e)))?;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        if !response.status().is_success() {
            debug!(
                "Telnyx health check returned HTTP {} for trunk {}",
                response.status(),
                trunk.id
            );
            return Ok(ProbeReport::unhealthy(Some(latency_ms)));
        }

        Ok(ProbeReport::healthy(latency_ms))
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn make_call(
        &self,
        trunk: &Trunk,
        from_number: &str,
        to_number: &str,
    ) -> AppResult<String> {
        let body = serde_json::json!({
            "to": to_number,
            "from": from_number,
            "connection_id": trunk.sip_domain,
        });

        let response = self
            .http
            .post(format!("{}/calls", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::provider_error(format!("Call origination failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Telnyx call failed: HTTP {} - {}", status, body);
            return Err(Self::provider_error(format!(
                "Call origination returned HTTP {}",
                status
            )));
        }

        let call: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Self::provider_error(format!("Malformed call response: {}", e)))?;

        call.pointer("/data/call_control_id")
            .and_then(|v| v.as_str())
            .map(|id| id.to_string())
            .ok_or_else(|| Self::provider_error("Call response missing call_control_id"))
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn hangup_call(&self, trunk: &Trunk, provider_call_id: &str) -> AppResult<()> {
        let url = format!("{}/calls/{}/actions/hangup", self.base_url, provider_call_id);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Self::provider_error(format!("Hangup failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::provider_error(format!(
                "Hangup returned HTTP {}",
                response.status()
            )));
        }

        debug!("Hung up Telnyx call {}", provider_call_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_provider() {
        let client = TelnyxClient::new(&TelnyxConfig {
            api_key: "KEY123".to_string(),
        })
        .unwrap();

        assert_eq!(client.provider(), TrunkProvider::Telnyx);
        assert_eq!(client.base_url, "https://api.telnyx.com/v2");
    }
}
