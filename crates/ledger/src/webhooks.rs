//! Webhook payment processing
//!
//! The orchestrator for "money received". The processor is entered twice per
//! real-world payment: once through the user-facing redirect callback
//! (untrusted query parameters) and once through the provider's
//! server-to-server push. Neither entry point trusts the status it was
//! handed; both re-fetch the transaction from the provider before acting.
//!
//! Crediting is at-most-once under at-least-once delivery. The approval path
//! claims the provider transaction id by inserting the purchase row under its
//! unique index inside the same Postgres transaction that credits the
//! account, so a concurrent duplicate delivery either blocks and then
//! observes the conflict, or sees the committed row. Either way it becomes an
//! idempotent no-op reported as success.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::credits::{apply_credit, CreditKind};
use crate::email::LedgerEmailService;
use crate::error::{LedgerError, LedgerResult};
use crate::promotions::{record_code_use, record_promotion_use};
use crate::provider::{ProviderClient, ProviderStatus, ProviderTransaction};
use crate::tiers::{self, Tier};

/// Checkout metadata round-tripped through the provider.
///
/// Arrives as loosely-typed JSON with inconsistent casing (the provider
/// re-serializes it snake_case); parsed strictly at this boundary and
/// rejected immediately when malformed. Monetary fields are canonical
/// currency units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    #[serde(alias = "userId")]
    pub user_id: Uuid,
    #[serde(rename = "type", alias = "purchaseType")]
    pub purchase_type: String,
    #[serde(alias = "packId")]
    pub pack_id: Uuid,
    pub credits: i64,
    #[serde(default, alias = "bonusCredits")]
    pub bonus_credits: i64,
    #[serde(alias = "finalAmount")]
    pub final_amount: i64,
    #[serde(default, alias = "discountAmount")]
    pub discount_amount: i64,
    #[serde(default, alias = "promoCode")]
    pub promo_code: Option<String>,
    #[serde(default, alias = "promoCodeId")]
    pub promo_code_id: Option<Uuid>,
    #[serde(default, alias = "promotionId")]
    pub promotion_id: Option<Uuid>,
}

/// Server-to-server webhook body.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub entity: String,
    /// e.g. `transaction.approved`; advisory only, never gates crediting
    pub event: String,
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub custom_metadata: Option<serde_json::Value>,
}

/// What a processed delivery amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Credits granted and purchase recorded
    Credited {
        user_id: Uuid,
        purchase_id: Uuid,
        total_credits: i64,
    },
    /// Transaction id already processed; idempotent no-op. Carries the
    /// credit total of the original delivery for user-facing messages.
    Duplicate { total_credits: i64 },
    /// Declined/canceled status recorded; ledger untouched
    StatusRecorded(ProviderStatus),
    /// Nothing actionable (still pending at the provider)
    Pending,
}

/// Parse and validate checkout metadata from a loosely-typed JSON value.
///
/// Fails fast with `Validation` so malformed shapes never reach storage.
pub fn parse_metadata(value: &serde_json::Value) -> LedgerResult<CheckoutMetadata> {
    let metadata: CheckoutMetadata = serde_json::from_value(value.clone())
        .map_err(|e| LedgerError::Validation(format!("malformed custom_metadata: {}", e)))?;

    if metadata.purchase_type != "credit_purchase" {
        return Err(LedgerError::Validation(format!(
            "unexpected purchase type '{}'",
            metadata.purchase_type
        )));
    }
    if metadata.credits <= 0 {
        return Err(LedgerError::Validation(format!(
            "credits must be positive, got {}",
            metadata.credits
        )));
    }
    if metadata.bonus_credits < 0 || metadata.final_amount < 0 || metadata.discount_amount < 0 {
        return Err(LedgerError::Validation(
            "negative monetary field in metadata".to_string(),
        ));
    }
    Ok(metadata)
}

/// Account fields the approval path snapshots before mutating.
#[derive(Debug, Clone, sqlx::FromRow)]
struct AccountSnapshot {
    tier: String,
    total_spent: i64,
}

/// Pure spend/tier planning for an approved payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPlan {
    pub tier_before: Tier,
    pub tier_after: Tier,
    pub total_spent_before: i64,
    pub total_spent_after: i64,
    pub tier_expires_at: OffsetDateTime,
    pub total_credits: i64,
}

/// Compute the spend and tier outcome of an approved payment.
pub fn plan_approval(
    stored_tier: Tier,
    total_spent_before: i64,
    final_amount: i64,
    credits: i64,
    bonus_credits: i64,
    now: OffsetDateTime,
) -> ApprovalPlan {
    let total_spent_after = total_spent_before + final_amount;
    ApprovalPlan {
        tier_before: stored_tier,
        tier_after: tiers::compute_tier(total_spent_after),
        total_spent_before,
        total_spent_after,
        tier_expires_at: tiers::expiry_from(now),
        total_credits: credits + bonus_credits,
    }
}

/// Webhook payment processor.
pub struct PaymentWebhookHandler {
    pool: PgPool,
    provider: ProviderClient,
    email: LedgerEmailService,
}

impl PaymentWebhookHandler {
    pub fn new(pool: PgPool, provider: ProviderClient, email: LedgerEmailService) -> Self {
        Self {
            pool,
            provider,
            email,
        }
    }

    /// Handle a server-to-server webhook delivery.
    pub async fn handle_event(&self, event: &WebhookEvent) -> LedgerResult<WebhookOutcome> {
        if event.entity != "transaction" {
            tracing::info!(
                entity = %event.entity,
                event = %event.event,
                "Ignoring webhook for unhandled entity"
            );
            return Ok(WebhookOutcome::Pending);
        }
        if event.id.is_empty() {
            return Err(LedgerError::Validation(
                "webhook event missing transaction id".to_string(),
            ));
        }

        tracing::info!(
            transaction_id = %event.id,
            event = %event.event,
            "Processing payment webhook"
        );

        // The event name and body are advisory. Resolve the real status.
        let txn = self.provider.get_transaction(&event.id).await?;

        self.process_transaction(&txn, event.custom_metadata.as_ref())
            .await
    }

    /// Handle the user-facing redirect callback.
    ///
    /// The `status` query parameter the user arrived with is advisory; this
    /// path runs the same provider verification as the webhook and returns
    /// the outcome for the redirect message.
    pub async fn handle_callback(&self, transaction_id: &str) -> LedgerResult<WebhookOutcome> {
        if transaction_id.is_empty() {
            return Err(LedgerError::Validation(
                "callback missing transaction id".to_string(),
            ));
        }

        tracing::info!(transaction_id = %transaction_id, "Processing payment callback");

        let txn = self.provider.get_transaction(transaction_id).await?;
        self.process_transaction(&txn, None).await
    }

    async fn process_transaction(
        &self,
        txn: &ProviderTransaction,
        event_metadata: Option<&serde_json::Value>,
    ) -> LedgerResult<WebhookOutcome> {
        match txn.status {
            ProviderStatus::Approved => {
                // Metadata from the webhook body when present, otherwise from
                // the provider's own record (redirect callbacks have no body).
                let raw = event_metadata
                    .or(txn.custom_metadata.as_ref())
                    .ok_or_else(|| {
                        LedgerError::Validation(format!(
                            "approved transaction {} has no checkout metadata",
                            txn.id
                        ))
                    })?;
                let metadata = parse_metadata(raw)?;
                self.process_approved(&txn.id, &txn.currency, &metadata).await
            }
            ProviderStatus::Declined | ProviderStatus::Canceled => {
                self.record_terminal_status(&txn.id, txn.status).await?;
                Ok(WebhookOutcome::StatusRecorded(txn.status))
            }
            ProviderStatus::Pending => {
                tracing::info!(transaction_id = %txn.id, "Transaction still pending at provider");
                Ok(WebhookOutcome::Pending)
            }
        }
    }

    /// Credit the account and record the purchase, exactly once per provider
    /// transaction id, in a single storage transaction.
    async fn process_approved(
        &self,
        transaction_id: &str,
        currency: &str,
        metadata: &CheckoutMetadata,
    ) -> LedgerResult<WebhookOutcome> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        // Lock the account first: the spend snapshot, tier recompute and
        // balance change must be one atomic unit.
        let account: AccountSnapshot = sqlx::query_as(
            "SELECT tier, total_spent FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(metadata.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::AccountNotFound(metadata.user_id))?;

        let plan = plan_approval(
            Tier::from_db(&account.tier),
            account.total_spent,
            metadata.final_amount,
            metadata.credits,
            metadata.bonus_credits,
            now,
        );

        // Idempotency claim: the unique index on provider_transaction_id
        // makes this insert the atomic check-then-act. No returned row means
        // another delivery already processed (or is committing) this id.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO credit_purchases
                (user_id, pack_id, credits_purchased, bonus_credits, total_credits,
                 amount, discount_amount, final_amount, currency, payment_provider,
                 provider_transaction_id, payment_status, promo_code, promo_code_id,
                 tier_before, tier_after, total_spent_before, total_spent_after)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'succeeded',
                    $12, $13, $14, $15, $16, $17)
            ON CONFLICT (provider_transaction_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(metadata.user_id)
        .bind(metadata.pack_id)
        .bind(metadata.credits)
        .bind(metadata.bonus_credits)
        .bind(plan.total_credits)
        .bind(metadata.final_amount + metadata.discount_amount)
        .bind(metadata.discount_amount)
        .bind(metadata.final_amount)
        .bind(currency)
        .bind(self.provider.provider_name())
        .bind(transaction_id)
        .bind(&metadata.promo_code)
        .bind(metadata.promo_code_id)
        .bind(plan.tier_before.as_str())
        .bind(plan.tier_after.as_str())
        .bind(plan.total_spent_before)
        .bind(plan.total_spent_after)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((purchase_id,)) = claimed else {
            tracing::info!(
                transaction_id = %transaction_id,
                user_id = %metadata.user_id,
                "Duplicate approval delivery, already processed"
            );
            // Redelivery carries the same metadata, so the plan's total is
            // what the first delivery credited.
            return Ok(WebhookOutcome::Duplicate {
                total_credits: plan.total_credits,
            });
        };

        // Base credits, then bonus credits: two ledger entries, counters
        // split between purchased and gifted.
        apply_credit(
            &mut tx,
            metadata.user_id,
            metadata.credits,
            CreditKind::Purchase,
            Some(purchase_id),
            "Credit pack purchase",
        )
        .await?;

        if metadata.bonus_credits > 0 {
            apply_credit(
                &mut tx,
                metadata.user_id,
                metadata.bonus_credits,
                CreditKind::Bonus,
                Some(purchase_id),
                "Credit pack bonus",
            )
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE accounts
            SET total_spent = $2,
                tier = $3,
                tier_expires_at = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(metadata.user_id)
        .bind(plan.total_spent_after)
        .bind(plan.tier_after.as_str())
        .bind(plan.tier_expires_at)
        .execute(&mut *tx)
        .await?;

        // Redemptions are recorded only now, after payment confirmation.
        if let Some(promo_code_id) = metadata.promo_code_id {
            record_code_use(&mut tx, promo_code_id, metadata.user_id, purchase_id).await?;
        }
        if let Some(promotion_id) = metadata.promotion_id {
            record_promotion_use(&mut tx, promotion_id, metadata.user_id, purchase_id).await?;
        }

        if let Err(e) = tx.commit().await {
            // Nothing was applied (the transaction rolled back), but the
            // approval is confirmed at the provider. Redelivery will retry;
            // flag it in case redelivery never comes.
            tracing::error!(
                transaction_id = %transaction_id,
                user_id = %metadata.user_id,
                error = %e,
                "RECONCILIATION NEEDED: approved payment failed to commit; \
                 awaiting provider redelivery"
            );
            return Err(LedgerError::Persistence(e.to_string()));
        }

        tracing::info!(
            transaction_id = %transaction_id,
            user_id = %metadata.user_id,
            purchase_id = %purchase_id,
            credits = metadata.credits,
            bonus_credits = metadata.bonus_credits,
            tier_before = %plan.tier_before,
            tier_after = %plan.tier_after,
            "Payment approved and credited"
        );

        // Fire-and-forget confirmation email; never affects the ledger result.
        self.send_confirmation(metadata.user_id, plan.total_credits);

        Ok(WebhookOutcome::Credited {
            user_id: metadata.user_id,
            purchase_id,
            total_credits: plan.total_credits,
        })
    }

    /// Idempotent status update for a declined/canceled transaction. The
    /// ledger is never touched on this path.
    async fn record_terminal_status(
        &self,
        transaction_id: &str,
        status: ProviderStatus,
    ) -> LedgerResult<()> {
        let payment_status = match status {
            ProviderStatus::Declined => "failed",
            ProviderStatus::Canceled => "canceled",
            _ => return Ok(()),
        };

        let result = sqlx::query(
            r#"
            UPDATE credit_purchases
            SET payment_status = $2, updated_at = NOW()
            WHERE provider_transaction_id = $1
              AND payment_status != 'succeeded'
            "#,
        )
        .bind(transaction_id)
        .bind(payment_status)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            transaction_id = %transaction_id,
            payment_status = %payment_status,
            rows_updated = result.rows_affected(),
            "Recorded terminal transaction status"
        );

        Ok(())
    }

    fn send_confirmation(&self, user_id: Uuid, total_credits: i64) {
        let pool = self.pool.clone();
        let email = self.email.clone();
        tokio::spawn(async move {
            let recipient: Option<(String,)> =
                sqlx::query_as("SELECT email FROM accounts WHERE id = $1")
                    .bind(user_id)
                    .fetch_optional(&pool)
                    .await
                    .ok()
                    .flatten();

            let Some((address,)) = recipient else {
                tracing::warn!(user_id = %user_id, "No email address for purchase confirmation");
                return;
            };

            if let Err(e) = email.send_purchase_confirmation(&address, total_credits).await {
                tracing::error!(
                    user_id = %user_id,
                    error = %e,
                    "Failed to send purchase confirmation email"
                );
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_metadata() -> serde_json::Value {
        json!({
            "user_id": "4fd2a4a6-9d5a-4f3e-8a6e-0a2b3c4d5e6f",
            "type": "credit_purchase",
            "pack_id": "7a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9",
            "credits": 100,
            "bonus_credits": 20,
            "final_amount": 2500,
            "discount_amount": 2500,
            "promo_code": "LAUNCH50"
        })
    }

    #[test]
    fn test_parse_metadata_snake_case() {
        let metadata = parse_metadata(&base_metadata()).unwrap();
        assert_eq!(metadata.credits, 100);
        assert_eq!(metadata.bonus_credits, 20);
        assert_eq!(metadata.final_amount, 2500);
        assert_eq!(metadata.promo_code.as_deref(), Some("LAUNCH50"));
    }

    #[test]
    fn test_parse_metadata_camel_case_aliases() {
        // The provider re-serializes metadata with inconsistent casing.
        let value = json!({
            "userId": "4fd2a4a6-9d5a-4f3e-8a6e-0a2b3c4d5e6f",
            "type": "credit_purchase",
            "packId": "7a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9",
            "credits": 50,
            "bonusCredits": 5,
            "finalAmount": 1000,
            "discountAmount": 0
        });
        let metadata = parse_metadata(&value).unwrap();
        assert_eq!(metadata.credits, 50);
        assert_eq!(metadata.bonus_credits, 5);
        assert_eq!(metadata.final_amount, 1000);
    }

    #[test]
    fn test_parse_metadata_rejects_wrong_type() {
        let mut value = base_metadata();
        value["type"] = json!("subscription");
        assert!(matches!(
            parse_metadata(&value),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_metadata_rejects_missing_fields() {
        let value = json!({ "type": "credit_purchase" });
        assert!(matches!(
            parse_metadata(&value),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_metadata_rejects_nonpositive_credits() {
        let mut value = base_metadata();
        value["credits"] = json!(0);
        assert!(matches!(
            parse_metadata(&value),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_metadata_rejects_negative_amounts() {
        let mut value = base_metadata();
        value["final_amount"] = json!(-1);
        assert!(matches!(
            parse_metadata(&value),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_plan_approval_launch50_scenario() {
        // 5000 XOF pack at 50% off: final 2500, spent 0 -> 2500, which is
        // exactly the BRONZE threshold (inclusive boundary).
        let now = OffsetDateTime::now_utc();
        let plan = plan_approval(Tier::Free, 0, 2_500, 100, 20, now);
        assert_eq!(plan.total_spent_after, 2_500);
        assert_eq!(plan.tier_after, Tier::Bronze);
        assert_eq!(plan.tier_before, Tier::Free);
        assert_eq!(plan.total_credits, 120);
    }

    #[test]
    fn test_plan_approval_spend_is_monotonic() {
        let now = OffsetDateTime::now_utc();
        let plan = plan_approval(Tier::Silver, 6_000, 0, 10, 0, now);
        // A free (fully discounted) purchase never decreases total_spent.
        assert_eq!(plan.total_spent_after, 6_000);
        assert_eq!(plan.tier_after, Tier::Silver);
    }

    #[test]
    fn test_plan_approval_sets_30_day_expiry() {
        let now = OffsetDateTime::now_utc();
        let plan = plan_approval(Tier::Free, 0, 1_000, 10, 0, now);
        assert_eq!(plan.tier_expires_at - now, time::Duration::days(30));
    }

    #[test]
    fn test_webhook_event_deserializes() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "entity": "transaction",
            "event": "transaction.approved",
            "id": "txn_abc",
            "amount": 2500,
            "custom_metadata": base_metadata()
        }))
        .unwrap();
        assert_eq!(event.entity, "transaction");
        assert_eq!(event.id, "txn_abc");
        assert!(event.custom_metadata.is_some());
    }

    fn test_handler(pool: PgPool) -> PaymentWebhookHandler {
        // The provider is never contacted on the approval path itself.
        let provider = ProviderClient::new(crate::provider::ProviderConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            api_key: "test_key".to_string(),
            timeout: std::time::Duration::from_secs(1),
        })
        .unwrap();
        PaymentWebhookHandler::new(pool, provider, LedgerEmailService::disabled())
    }

    async fn seed_account_and_pack(pool: &PgPool) -> (Uuid, Uuid) {
        let (user_id,): (Uuid,) =
            sqlx::query_as("INSERT INTO accounts (email) VALUES ($1) RETURNING id")
                .bind(format!("{}@example.test", Uuid::new_v4()))
                .fetch_one(pool)
                .await
                .unwrap();
        let (pack_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO credit_packs (name, credits, bonus_credits, price)
            VALUES ('Starter', 100, 20, 5000)
            RETURNING id
            "#,
        )
        .fetch_one(pool)
        .await
        .unwrap();
        (user_id, pack_id)
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_redelivered_approval_credits_once(pool: PgPool) {
        let handler = test_handler(pool.clone());
        let (user_id, pack_id) = seed_account_and_pack(&pool).await;
        let metadata = CheckoutMetadata {
            user_id,
            purchase_type: "credit_purchase".to_string(),
            pack_id,
            credits: 100,
            bonus_credits: 20,
            final_amount: 5_000,
            discount_amount: 0,
            promo_code: None,
            promo_code_id: None,
            promotion_id: None,
        };

        let first = handler
            .process_approved("txn_redelivered", "XOF", &metadata)
            .await
            .unwrap();
        assert!(matches!(
            first,
            WebhookOutcome::Credited {
                total_credits: 120,
                ..
            }
        ));

        // Same transaction id delivered again: the unique-index claim makes
        // the whole crediting block a no-op.
        let second = handler
            .process_approved("txn_redelivered", "XOF", &metadata)
            .await
            .unwrap();
        assert_eq!(second, WebhookOutcome::Duplicate { total_credits: 120 });

        let (purchases,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM credit_purchases WHERE provider_transaction_id = $1",
        )
        .bind("txn_redelivered")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(purchases, 1);

        let (balance, purchased, gifted, total_spent): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT credits_balance, credits_purchased, credits_gifted, total_spent
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(balance, 120);
        assert_eq!(purchased, 100);
        assert_eq!(gifted, 20);
        assert_eq!(total_spent, 5_000);
    }
}
