//! Checkout initiation
//!
//! Resolves the price the user will pay, then creates the provider
//! transaction whose metadata the webhook processor later trusts (after
//! re-verification). Checkout itself mutates nothing: promo budgets are only
//! consumed once the payment is confirmed.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::packs::PackCatalog;
use crate::promotions::{AppliedDiscount, PriceQuote, PromotionEngine};
use crate::provider::{CreateTransactionRequest, ProviderClient};
use crate::webhooks::CheckoutMetadata;

/// Response for a created checkout.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub transaction_id: String,
    pub checkout_url: String,
    pub quote: PriceQuote,
}

/// Checkout service.
pub struct CheckoutService {
    packs: PackCatalog,
    promotions: Arc<PromotionEngine>,
    provider: ProviderClient,
    return_url: String,
}

impl CheckoutService {
    pub fn new(
        pool: sqlx::PgPool,
        promotions: Arc<PromotionEngine>,
        provider: ProviderClient,
        return_url: String,
    ) -> Self {
        Self {
            packs: PackCatalog::new(pool),
            promotions,
            provider,
            return_url,
        }
    }

    /// Create a provider checkout for a pack purchase.
    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        pack_id: Uuid,
        currency: &str,
        promo_code: Option<&str>,
    ) -> LedgerResult<CheckoutResponse> {
        let pack = self.packs.get_pack(pack_id).await?;
        if !pack.is_active {
            return Err(LedgerError::PackNotFound(pack_id));
        }

        let quote = self
            .promotions
            .resolve_pack_price(pack_id, currency, Some(user_id), promo_code)
            .await?;

        let (promo_code_str, promo_code_id, promotion_id) = match &quote.applied {
            Some(AppliedDiscount::PromoCode { id, code }) => {
                (Some(code.clone()), Some(*id), None)
            }
            Some(AppliedDiscount::Promotion { id, .. }) => (None, None, Some(*id)),
            None => (None, None, None),
        };

        // Monetary metadata fields are canonical currency; the provider
        // charges the converted display amount.
        let metadata = CheckoutMetadata {
            user_id,
            purchase_type: "credit_purchase".to_string(),
            pack_id,
            credits: pack.credits,
            bonus_credits: pack.bonus_credits,
            final_amount: quote.final_canonical,
            discount_amount: quote.discount_canonical,
            promo_code: promo_code_str,
            promo_code_id,
            promotion_id,
        };

        let created = self
            .provider
            .create_transaction(&CreateTransactionRequest {
                amount: quote.final_amount,
                currency: quote.currency.clone(),
                description: format!("{} ({} credits)", pack.name, pack.total_credits()),
                return_url: self.return_url.clone(),
                custom_metadata: metadata,
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            pack_id = %pack_id,
            transaction_id = %created.id,
            final_amount = quote.final_amount,
            currency = %quote.currency,
            "Checkout created"
        );

        Ok(CheckoutResponse {
            transaction_id: created.id,
            checkout_url: created.checkout_url,
            quote,
        })
    }
}
