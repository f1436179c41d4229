//! Custom SIP provider client
//!
//! For trunks pointing at a customer-operated SIP endpoint. Signaling is
//! handled by the SIP edge outside this subsystem; this client validates
//! configuration and probes endpoint reachability for the health monitor.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};
use trunkgate_core::{
    models::{Trunk, TrunkProvider},
    traits::{ProbeReport, TelephonyProviderClient},
    AppError, AppResult,
};
use uuid::Uuid;

/// Connect timeout for the reachability probe
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Custom SIP implementation of TelephonyProviderClient
#[derive(Default)]
pub struct CustomSipClient;

impl CustomSipClient {
    /// Create a client; custom SIP needs no credentials
    pub fn new() -> Self {
        Self
    }

    fn provider_error(message: impl Into<String>) -> AppError {
        AppError::ProviderError {
            provider: TrunkProvider::Custom.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl TelephonyProviderClient for CustomSipClient {
    fn provider(&self) -> TrunkProvider {
        TrunkProvider::Custom
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn initialize(&self, trunk: &Trunk) -> AppResult<()> {
        if trunk.sip_domain.is_empty() {
            return Err(Self::provider_error(
                "SIP domain is required for custom trunks",
            ));
        }

        info!("Custom SIP trunk initialized: {}", trunk.sip_domain);
        Ok(())
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn health_check(&self, trunk: &Trunk) -> AppResult<ProbeReport> {
        let endpoint = format!("{}:{}", trunk.sip_domain, trunk.sip_port);
        let started = Instant::now();

        let connect = tokio::time::timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(&endpoint));

        match connect.await {
            Ok(Ok(_stream)) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                debug!("SIP endpoint {} reachable in {:.1}ms", endpoint, latency_ms);
                Ok(ProbeReport::healthy(latency_ms))
            }
            Ok(Err(e)) => Err(Self::provider_error(format!(
                "SIP endpoint {} unreachable: {}",
                endpoint, e
            ))),
            Err(_) => Err(Self::provider_error(format!(
                "SIP endpoint {} connect timed out",
                endpoint
            ))),
        }
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn make_call(
        &self,
        trunk: &Trunk,
        from_number: &str,
        to_number: &str,
    ) -> AppResult<String> {
        // Origination is delegated to the SIP edge; this subsystem only
        // mints the call identifier the edge will report events under.
        let call_id = format!("custom-{}", Uuid::new_v4());
        info!(
            "Custom SIP call {} queued on {}: {} -> {}",
            call_id, trunk.sip_domain, from_number, to_number
        );
        Ok(call_id)
    }

    #[instrument(skip(self, trunk), fields(trunk_id = %trunk.id))]
    async fn hangup_call(&self, trunk: &Trunk, provider_call_id: &str) -> AppResult<()> {
        debug!(
            "Custom SIP hangup for {} delegated to edge {}",
            provider_call_id, trunk.sip_domain
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trunkgate_core::models::{NewTrunk, Trunk};

    fn custom_trunk(domain: &str, port: i32) -> Trunk {
        Trunk::from_new(
            Uuid::new_v4(),
            &NewTrunk {
                name: "edge".to_string(),
                provider: TrunkProvider::Custom,
                sip_domain: domain.to_string(),
                sip_port: port,
                cost_per_minute: dec!(0.005),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_initialize_requires_domain() {
        let client = CustomSipClient::new();
        let trunk = custom_trunk("", 5060);
        assert!(client.initialize(&trunk).await.is_err());

        let trunk = custom_trunk("sip.example.com", 5060);
        assert!(client.initialize(&trunk).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_reachable_endpoint() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = CustomSipClient::new();
        let trunk = custom_trunk("127.0.0.1", port as i32);

        let report = client.health_check(&trunk).await.unwrap();
        assert!(report.healthy);
        assert!(report.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_probe_unreachable_endpoint() {
        let client = CustomSipClient::new();
        // bind-then-drop guarantees a closed port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let trunk = custom_trunk("127.0.0.1", port as i32);
        let result = client.health_check(&trunk).await;
        assert!(matches!(result, Err(AppError::ProviderError { .. })));
    }

    #[tokio::test]
    async fn test_make_call_mints_identifier() {
        let client = CustomSipClient::new();
        let trunk = custom_trunk("sip.example.com", 5060);

        let id = client.make_call(&trunk, "+15550100", "+15550199").await.unwrap();
        assert!(id.starts_with("custom-"));
        assert!(client.hangup_call(&trunk, &id).await.is_ok());
    }
}
