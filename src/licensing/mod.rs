// License server client
//
// The wizard verifies the purchase code once, against the vendor's license server, and keeps
// the answer in the session. Transport failures are retried with backoff; a rejection is final.

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::LicenseServerConfig;
use crate::utils::logging::mask_purchase_code;

/// Accepted license details as reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LicenseVerification {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub license_type: Option<String>,
    #[serde(default)]
    pub supported_until: Option<String>,
    #[serde(default)]
    pub buyer: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LicenseError {
    /// The server answered and refused the code; the message is shown to the user.
    #[error("{0}")]
    Rejected(String),
    #[error("license server unreachable: {details}")]
    Unreachable { details: String },
}

#[async_trait]
pub trait LicenseVerifier: Send + Sync {
    async fn verify(
        &self,
        purchase_code: &str,
        domain: &str,
    ) -> Result<LicenseVerification, LicenseError>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    purchase_code: &'a str,
    domain: &'a str,
    product: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    license_type: Option<String>,
    #[serde(default)]
    supported_until: Option<String>,
    #[serde(default)]
    buyer: Option<String>,
}

/// HTTP client for `<base_url>/api/license/verify`.
pub struct RemoteLicenseServer {
    client: reqwest::Client,
    endpoint: String,
    product: String,
}

impl RemoteLicenseServer {
    pub fn new(cfg: &LicenseServerConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .user_agent(concat!("licensehub-installer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/license/verify", cfg.base_url.trim_end_matches('/')),
            product: cfg.product.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_once(&self, purchase_code: &str, domain: &str) -> anyhow::Result<VerifyResponse> {
        let body = VerifyRequest {
            purchase_code,
            domain,
            product: &self.product,
        };
        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = resp.status();

        if status.is_server_error() {
            return Err(anyhow!("HTTP {} from license server", status));
        }
        // Refusals may come back as 4xx with the usual body.
        match resp.json::<VerifyResponse>().await {
            Ok(parsed) => Ok(parsed),
            Err(e) if status.is_success() => Err(anyhow!("Malformed license server response: {}", e)),
            Err(_) => Err(anyhow!("HTTP {} from license server", status)),
        }
    }
}

fn is_transient(e: &anyhow::Error) -> bool {
    if let Some(re) = e.downcast_ref::<reqwest::Error>() {
        return re.is_timeout() || re.is_connect() || re.is_request();
    }
    let msg = e.to_string().to_ascii_lowercase();
    msg.contains("timeout") || msg.contains("timed out") || msg.contains("http 5")
}

#[async_trait]
impl LicenseVerifier for RemoteLicenseServer {
    async fn verify(
        &self,
        purchase_code: &str,
        domain: &str,
    ) -> Result<LicenseVerification, LicenseError> {
        info!(
            "[PHASE: license] [STEP: verify] Verifying purchase code {} for domain {}",
            mask_purchase_code(purchase_code),
            domain
        );

        let retry_strategy = ExponentialBackoff::from_millis(150)
            .factor(2)
            .max_delay(Duration::from_secs(2))
            .take(3)
            .map(jitter);

        let parsed = RetryIf::spawn(
            retry_strategy,
            || self.post_once(purchase_code, domain),
            is_transient,
        )
        .await
        .map_err(|e| {
            warn!(
                "[PHASE: license] [STEP: verify] License server unreachable: {:#}",
                e
            );
            LicenseError::Unreachable {
                details: format!("{:#}", e),
            }
        })?;

        if !parsed.valid {
            let message = parsed
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "Invalid purchase code.".to_string());
            info!(
                "[PHASE: license] [STEP: verify] Purchase code {} rejected: {}",
                mask_purchase_code(purchase_code),
                message
            );
            return Err(LicenseError::Rejected(message));
        }

        info!(
            "[PHASE: license] [STEP: verify] Purchase code {} accepted",
            mask_purchase_code(purchase_code)
        );
        Ok(LicenseVerification {
            message: parsed.message,
            license_type: parsed.license_type,
            supported_until: parsed.supported_until,
            buyer: parsed.buyer,
        })
    }
}
