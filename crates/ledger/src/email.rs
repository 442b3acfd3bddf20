//! Purchase notification emails
//!
//! Fire-and-forget dispatch through a Resend-compatible HTTP API. Cleanly
//! disabled when `RESEND_API_KEY` is unset; a send failure is logged by the
//! caller and never rolls back a ledger change.

use serde_json::json;

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: String,
    pub from_address: String,
    pub api_url: String,
}

/// Email sender for ledger notifications.
#[derive(Clone)]
pub struct LedgerEmailService {
    config: Option<EmailConfig>,
    http: reqwest::Client,
}

impl LedgerEmailService {
    pub fn from_env() -> Self {
        let config = std::env::var("RESEND_API_KEY").ok().map(|api_key| EmailConfig {
            api_key,
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "billing@promptly.app".to_string()),
            api_url: std::env::var("RESEND_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com".to_string()),
        });

        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// A sender with no configuration; every send is a no-op.
    pub fn disabled() -> Self {
        Self {
            config: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Send a purchase confirmation. No-op when unconfigured.
    pub async fn send_purchase_confirmation(
        &self,
        to: &str,
        total_credits: i64,
    ) -> LedgerResult<()> {
        let Some(config) = &self.config else {
            tracing::debug!("Email not configured, skipping purchase confirmation");
            return Ok(());
        };

        let body = json!({
            "from": config.from_address,
            "to": [to],
            "subject": format!("{} credits added to your account", total_credits),
            "html": format!(
                "<p>Your payment was received and <strong>{}</strong> credits \
                 are now available in your account.</p>",
                total_credits
            ),
        });

        let response = self
            .http
            .post(format!("{}/emails", config.api_url))
            .bearer_auth(&config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Config(format!("email dispatch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(LedgerError::Config(format!(
                "email API returned {}",
                response.status()
            )));
        }

        tracing::info!(to = %to, total_credits = total_credits, "Purchase confirmation sent");
        Ok(())
    }
}
