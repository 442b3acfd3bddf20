//! Credit pack catalog
//!
//! Read-side contract for the pack table. Prices live here in canonical
//! currency; they are snapshotted into `credit_purchases` at payment time, so
//! admin edits never rewrite purchase history.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Catalog row for a purchasable credit pack.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CreditPack {
    pub id: Uuid,
    pub name: String,
    pub credits: i64,
    pub bonus_credits: i64,
    /// Base price in canonical currency units
    pub price: i64,
    pub tier_unlock: Option<String>,
    pub is_active: bool,
    pub sort_order: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl CreditPack {
    pub fn total_credits(&self) -> i64 {
        self.credits + self.bonus_credits
    }
}

/// Catalog access for packs.
pub struct PackCatalog {
    pool: PgPool,
}

impl PackCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_pack(&self, pack_id: Uuid) -> LedgerResult<CreditPack> {
        sqlx::query_as::<_, CreditPack>(
            r#"
            SELECT id, name, credits, bonus_credits, price, tier_unlock,
                   is_active, sort_order, created_at
            FROM credit_packs
            WHERE id = $1
            "#,
        )
        .bind(pack_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::PackNotFound(pack_id))
    }

    /// Active packs in pricing-page order.
    pub async fn list_active(&self) -> LedgerResult<Vec<CreditPack>> {
        let packs = sqlx::query_as::<_, CreditPack>(
            r#"
            SELECT id, name, credits, bonus_credits, price, tier_unlock,
                   is_active, sort_order, created_at
            FROM credit_packs
            WHERE is_active = TRUE
            ORDER BY sort_order, price
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(packs)
    }
}
