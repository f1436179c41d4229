//! Twilio provider client
//!
//! Validates trunk credentials against the account resource and drives call
//! control through the Calls API.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};
use trunkgate_core::{
    config::TwilioConfig,
    models::{Trunk, TrunkProvider},
    traits::{ProbeReport, TelephonyProviderClient},
    AppError, AppResult,
};

const TWILIO_BASE_URL: &str = "https://api.twilio.com/2010-04-01";

/// HTTP timeout for Twilio API requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Twilio implementation of TelephonyProviderClient
pub struct TwilioClient {
    account_sid: String,
    auth_token: String,
    base_url: String,
    http: reqwest::Client,
}

impl TwilioClient {
    /// Create a client from credentials
    pub fn new(config: &TwilioConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            base_url: TWILIO_BASE_URL.to_string(),
            http,
        })
    }

    fn account_url(&self) -> String {
        format!("{}/Accounts/{}.json", self.base_url, self.account_sid)
    }

    fn provider_error(message: impl Into<String>) -> AppError {
        AppError::ProviderError {
            provider: TrunkProvider::Twilio.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl TelephonyProviderClient for TwilioClient {
    fn provider(&self) -> TrunkProvider {
        TrunkProvider::Twilio
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn initialize(&self, trunk: &Trunk) -> AppResult<()> {
        // Twilio trunks are configured in the console; initialization just
        // validates the credentials by fetching the account resource.
        let response = self
            .http
            .get(self.account_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
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
            "Twilio trunk initialized for account: {}",
            account
                .get("friendly_name")
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
            .get(self.account_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| Self::provider_error(format!("Health check failed: {}", e)))?;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        if !response.status().is_success() {
            debug!(
                "Twilio health check returned HTTP {} for trunk {}",
                response.status(),
                trunk.id
            );
            return Ok(ProbeReport::unhealthy(Some(latency_ms)));
        }

        let account: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Self::provider_error(format!("Malformed account response: {}", e)))?;

        let account_status = account
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        Ok(ProbeReport {
            healthy: account_status == "active",
            latency_ms: Some(latency_ms),
            packet_loss_percent: None,
        })
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn make_call(
        &self,
        trunk: &Trunk,
        from_number: &str,
        to_number: &str,
    ) -> AppResult<String> {
        let url = format!("{}/Accounts/{}/Calls.json", self.base_url, self.account_sid);
        let params = [
            ("From", from_number),
            ("To", to_number),
            ("Url", trunk.sip_domain.as_str()),
            ("Method", "POST"),
        ];

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| Self::provider_error(format!("Call origination failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Twilio call failed: HTTP {} - {}", status, body);
            return Err(Self::provider_error(format!(
                "Call origination returned HTTP {}",
                status
            )));
        }

        let call: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Self::provider_error(format!("Malformed call response: {}", e)))?;

        call.get("sid")
            .and_then(|v| v.as_str())
            .map(|sid| sid.to_string())
            .ok_or_else(|| Self::provider_error("Call response missing sid"))
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn hangup_call(&self, trunk: &Trunk, provider_call_id: &str) -> AppResult<()> {
        let url = format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, provider_call_id
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(|e| Self::provider_error(format!("Hangup failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::provider_error(format!(
                "Hangup returned HTTP {}",
                response.status()
            )));
        }

        debug!("Hung up Twilio call {}", provider_call_id);
        Ok(())
    }
}
