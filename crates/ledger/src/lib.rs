// Ledger crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Promptly Monetization Ledger
//!
//! Converts payment-provider events into durable, auditable changes to a
//! user's credit balance and loyalty tier.
//!
//! ## Features
//!
//! - **Credit Ledger**: purchase/use/gift/refund with full transaction history
//! - **Tier Engine**: lifetime-spend tiers with lazy 30-day expiration
//! - **Promotions**: automatic promotions and promo codes with usage caps
//! - **Pricing**: multi-currency display prices from a canonical-currency catalog
//! - **Webhook Processing**: at-most-once crediting from at-least-once
//!   provider deliveries, with provider-verified statuses
//! - **Invariants**: runnable consistency checks over the ledger

pub mod checkout;
pub mod credits;
pub mod currency;
pub mod email;
pub mod error;
pub mod history;
pub mod invariants;
pub mod packs;
pub mod promotions;
pub mod provider;
pub mod tiers;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{CheckoutResponse, CheckoutService};

// Credits
pub use credits::{CreditKind, CreditLedger, TransactionType};

// Currency
pub use currency::{ConvertedAmount, CurrencyResolver, ExchangeRate, CANONICAL_CURRENCY};

// Email
pub use email::LedgerEmailService;

// Error
pub use error::{LedgerError, LedgerResult, PromoRejection};

// History
pub use history::{BalanceInfo, HistoryService, PurchaseRecord, TierInfo, TransactionRecord};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Packs
pub use packs::{CreditPack, PackCatalog};

// Promotions
pub use promotions::{AppliedDiscount, PriceQuote, PromotionEngine};

// Provider
pub use provider::{ProviderClient, ProviderConfig, ProviderStatus, ProviderTransaction};

// Tiers
pub use tiers::{compute_tier, effective_tier, next_tier, NextTier, Tier};

// Webhooks
pub use webhooks::{CheckoutMetadata, PaymentWebhookHandler, WebhookEvent, WebhookOutcome};

use sqlx::PgPool;
use std::sync::Arc;

/// Main ledger service that combines all monetization functionality
pub struct LedgerService {
    pub checkout: CheckoutService,
    pub credits: CreditLedger,
    pub currency: Arc<CurrencyResolver>,
    pub history: HistoryService,
    pub invariants: InvariantChecker,
    pub packs: PackCatalog,
    pub promotions: Arc<PromotionEngine>,
    pub webhooks: PaymentWebhookHandler,
}

impl LedgerService {
    /// Create a ledger service from environment variables
    pub fn from_env(pool: PgPool) -> LedgerResult<Self> {
        let provider = ProviderClient::from_env()?;
        let return_url = std::env::var("PAYMENT_RETURN_URL")
            .map_err(|_| LedgerError::Config("PAYMENT_RETURN_URL not set".to_string()))?;
        Ok(Self::new(pool, provider, return_url))
    }

    /// Create a ledger service with an explicit provider client
    pub fn new(pool: PgPool, provider: ProviderClient, return_url: String) -> Self {
        let currency = Arc::new(CurrencyResolver::new(pool.clone()));
        let promotions = Arc::new(PromotionEngine::new(pool.clone(), currency.clone()));
        let email = LedgerEmailService::from_env();

        Self {
            checkout: CheckoutService::new(
                pool.clone(),
                promotions.clone(),
                provider.clone(),
                return_url,
            ),
            credits: CreditLedger::new(pool.clone()),
            currency,
            history: HistoryService::new(pool.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            packs: PackCatalog::new(pool.clone()),
            promotions,
            webhooks: PaymentWebhookHandler::new(pool, provider, email),
        }
    }
}
