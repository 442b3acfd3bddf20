//! Payment provider HTTP client
//!
//! Thin wrapper over the provider's REST API. Two calls matter to the core:
//! creating a checkout transaction and retrieving a transaction's
//! authoritative status. Webhook and redirect handlers must never act on a
//! client-supplied status; they re-fetch it here.
//!
//! Requests carry a hard timeout. A timeout or provider 5xx surfaces as
//! `ProviderUnavailable` so the HTTP layer can answer 5xx and let the
//! provider's own retry mechanism redeliver; the core performs no retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LedgerError, LedgerResult};
use crate::webhooks::CheckoutMetadata;

/// Authoritative transaction states at the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Pending,
    Approved,
    Declined,
    Canceled,
}

/// A transaction as reported by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTransaction {
    pub id: String,
    pub status: ProviderStatus,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub custom_metadata: Option<serde_json::Value>,
}

/// Request body for creating a checkout transaction.
#[derive(Debug, Serialize)]
pub struct CreateTransactionRequest {
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub return_url: String,
    pub custom_metadata: CheckoutMetadata,
}

/// Provider response to a created transaction.
#[derive(Debug, Deserialize)]
pub struct CreatedTransaction {
    pub id: String,
    pub checkout_url: String,
}

/// Provider API configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn from_env() -> LedgerResult<Self> {
        let api_url = std::env::var("PAYMENT_API_URL")
            .map_err(|_| LedgerError::Config("PAYMENT_API_URL not set".to_string()))?;
        let api_key = std::env::var("PAYMENT_API_KEY")
            .map_err(|_| LedgerError::Config("PAYMENT_API_KEY not set".to_string()))?;
        let timeout_secs = std::env::var("PAYMENT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            api_url,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// HTTP client for the payment provider.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> LedgerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LedgerError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> LedgerResult<Self> {
        Self::new(ProviderConfig::from_env()?)
    }

    /// Provider name recorded on purchase rows.
    pub fn provider_name(&self) -> &'static str {
        "moneyflow"
    }

    /// Retrieve a transaction's authoritative status by id.
    pub async fn get_transaction(&self, transaction_id: &str) -> LedgerResult<ProviderTransaction> {
        let url = format!("{}/v1/transactions/{}", self.config.api_url, transaction_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "Provider transaction lookup failed"
                );
                LedgerError::ProviderUnavailable(e.to_string())
            })?;

        match response.status() {
            status if status.is_success() => {
                response.json::<ProviderTransaction>().await.map_err(|e| {
                    LedgerError::ProviderUnavailable(format!(
                        "malformed provider response: {}",
                        e
                    ))
                })
            }
            reqwest::StatusCode::NOT_FOUND => {
                Err(LedgerError::TransactionNotFound(transaction_id.to_string()))
            }
            status => Err(LedgerError::ProviderUnavailable(format!(
                "provider returned {}",
                status
            ))),
        }
    }

    /// Create a checkout transaction and return its hosted payment URL.
    pub async fn create_transaction(
        &self,
        request: &CreateTransactionRequest,
    ) -> LedgerResult<CreatedTransaction> {
        let url = format!("{}/v1/transactions", self.config.api_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| LedgerError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %body,
                "Provider rejected transaction creation"
            );
            return Err(LedgerError::ProviderUnavailable(format!(
                "provider returned {} creating transaction",
                status
            )));
        }

        response.json::<CreatedTransaction>().await.map_err(|e| {
            LedgerError::ProviderUnavailable(format!("malformed provider response: {}", e))
        })
    }
}
