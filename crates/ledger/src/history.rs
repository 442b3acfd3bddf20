//! Read-side queries: balances, tier info, transaction and purchase history

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::tiers::{self, NextTier, Tier};

const MAX_PAGE_SIZE: i64 = 100;

/// A user's balance and cumulative counters.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BalanceInfo {
    pub credits_balance: i64,
    pub credits_purchased: i64,
    pub credits_used: i64,
    pub credits_gifted: i64,
}

/// Effective tier state for a user.
#[derive(Debug, Clone, Serialize)]
pub struct TierInfo {
    /// Tier honored for authorization (FREE once expired)
    pub tier: Tier,
    /// Stored tier cache, possibly stale past expiry
    pub stored_tier: Tier,
    #[serde(with = "time::serde::rfc3339::option")]
    pub tier_expires_at: Option<OffsetDateTime>,
    pub total_spent: i64,
    pub next_tier: Option<NextTier>,
}

/// One append-only ledger row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub r#type: String,
    pub credits_change: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub tier_at_time: String,
    pub prompt_id: Option<Uuid>,
    pub purchase_id: Option<Uuid>,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One processed purchase.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PurchaseRecord {
    pub id: Uuid,
    pub pack_id: Uuid,
    pub credits_purchased: i64,
    pub bonus_credits: i64,
    pub total_credits: i64,
    pub amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub currency: String,
    pub payment_provider: String,
    pub provider_transaction_id: String,
    pub payment_status: String,
    pub promo_code: Option<String>,
    pub tier_before: String,
    pub tier_after: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// History and balance queries.
pub struct HistoryService {
    pool: PgPool,
}

impl HistoryService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_balance(&self, user_id: Uuid) -> LedgerResult<BalanceInfo> {
        sqlx::query_as::<_, BalanceInfo>(
            r#"
            SELECT credits_balance, credits_purchased, credits_used, credits_gifted
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::AccountNotFound(user_id))
    }

    /// Tier info with lazy expiry applied: the stored column is returned as
    /// a cache value, the effective tier is what authorization should use.
    pub async fn get_tier_info(&self, user_id: Uuid) -> LedgerResult<TierInfo> {
        let row: Option<(String, Option<OffsetDateTime>, i64)> = sqlx::query_as(
            "SELECT tier, tier_expires_at, total_spent FROM accounts WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (tier, tier_expires_at, total_spent) =
            row.ok_or(LedgerError::AccountNotFound(user_id))?;

        let stored_tier = Tier::from_db(&tier);
        let now = OffsetDateTime::now_utc();
        let effective = tiers::effective_tier(stored_tier, tier_expires_at, now);

        Ok(TierInfo {
            tier: effective,
            stored_tier,
            tier_expires_at,
            total_spent,
            next_tier: tiers::next_tier(effective, total_spent),
        })
    }

    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        let records = sqlx::query_as::<_, TransactionRecord>(
            r#"
            SELECT id, type, credits_change, balance_before, balance_after,
                   tier_at_time, prompt_id, purchase_id, description, created_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit.clamp(1, MAX_PAGE_SIZE))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn list_purchases(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<PurchaseRecord>> {
        let records = sqlx::query_as::<_, PurchaseRecord>(
            r#"
            SELECT id, pack_id, credits_purchased, bonus_credits, total_credits,
                   amount, discount_amount, final_amount, currency, payment_provider,
                   provider_transaction_id, payment_status, promo_code,
                   tier_before, tier_after, created_at
            FROM credit_purchases
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit.clamp(1, MAX_PAGE_SIZE))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
