//! Promotion engine and pack price resolution
//!
//! Resolves the single discount applicable to a pack purchase: either the
//! highest-priority automatic promotion or a user-entered promo code. The two
//! are mutually exclusive; a valid code overrides the automatic promotion
//! rather than stacking with it.
//!
//! Resolving a price never records a redemption. Uses are recorded by the
//! webhook processor after the provider confirms payment, so abandoned
//! checkouts never consume `max_uses` budgets.
//!
//! Discount arithmetic happens in the canonical currency; the display-facing
//! fields of a quote are conversions of the canonical figures. Spend
//! accounting downstream always uses the canonical final amount.

use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::currency::CurrencyResolver;
use crate::error::{LedgerError, LedgerResult, PromoRejection};
use crate::packs::PackCatalog;

/// Discount shapes shared by promo codes and automatic promotions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountType {
    Percentage,
    FixedAmount,
    FreeTrial,
    CreditBonus,
}

impl DiscountType {
    pub fn from_db(s: &str) -> Option<DiscountType> {
        match s {
            "percentage" => Some(DiscountType::Percentage),
            "fixed_amount" => Some(DiscountType::FixedAmount),
            "free_trial" => Some(DiscountType::FreeTrial),
            "credit_bonus" => Some(DiscountType::CreditBonus),
            _ => None,
        }
    }
}

/// A user-entered promo code row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub discount_type: String,
    pub value: i64,
    pub applies_to_packs: Vec<Uuid>,
    pub max_uses: Option<i32>,
    pub max_uses_per_user: i32,
    pub current_uses: i32,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub is_active: bool,
}

/// An automatic pricing-page promotion row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PackPromotion {
    pub id: Uuid,
    pub name: String,
    pub discount_type: String,
    pub value: i64,
    /// None = applies to all packs
    pub pack_id: Option<Uuid>,
    pub priority: i32,
    pub max_uses: Option<i32>,
    pub max_uses_per_user: Option<i32>,
    pub current_uses: i32,
}

/// Which discount a quote ended up applying.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppliedDiscount {
    PromoCode { id: Uuid, code: String },
    Promotion { id: Uuid, name: String },
}

/// A resolved pack price.
///
/// `amount`/`discount_amount`/`final_amount` are in the requested display
/// currency; the `*_canonical` fields are the same figures in the canonical
/// currency and are what spend accounting uses.
#[derive(Debug, Clone, Serialize)]
pub struct PriceQuote {
    pub pack_id: Uuid,
    pub currency: String,
    pub minor_units: i16,
    pub amount: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub amount_canonical: i64,
    pub discount_canonical: i64,
    pub final_canonical: i64,
    pub applied: Option<AppliedDiscount>,
}

/// Compute the discount a type/value pair takes off `price`.
///
/// Percentage floors; fixed amounts clamp to the price so the final amount
/// never goes negative; free_trial and credit_bonus discount the full price.
pub fn compute_discount(price: i64, discount_type: DiscountType, value: i64) -> i64 {
    match discount_type {
        DiscountType::Percentage => price * value.clamp(0, 100) / 100,
        DiscountType::FixedAmount => value.clamp(0, price),
        DiscountType::FreeTrial | DiscountType::CreditBonus => price,
    }
}

/// Validate a promo code against a pack for a user.
///
/// Checks run in a fixed order and short-circuit, so the caller can surface
/// the single most specific rejection reason. `user_use_count` counts
/// append-only redemption records, including ones attached to still-pending
/// purchases.
pub fn validate_promo_code(
    code: &PromoCode,
    pack_id: Uuid,
    user_use_count: i64,
    now: OffsetDateTime,
) -> Result<DiscountType, PromoRejection> {
    if !code.is_active {
        return Err(PromoRejection::Invalid);
    }
    let discount_type =
        DiscountType::from_db(&code.discount_type).ok_or(PromoRejection::Invalid)?;
    if now < code.valid_from {
        return Err(PromoRejection::NotYetValid);
    }
    if now > code.valid_until {
        return Err(PromoRejection::Expired);
    }
    // Empty applicability list = valid for every pack
    if !code.applies_to_packs.is_empty() && !code.applies_to_packs.contains(&pack_id) {
        return Err(PromoRejection::WrongScope);
    }
    if let Some(max_uses) = code.max_uses {
        if code.current_uses >= max_uses {
            return Err(PromoRejection::Exhausted);
        }
    }
    if user_use_count >= code.max_uses_per_user as i64 {
        return Err(PromoRejection::AlreadyUsed);
    }
    Ok(discount_type)
}

/// Whether an automatic promotion can apply for this user right now.
///
/// Window, activity and scope are filtered in SQL; this checks the caps.
pub fn promotion_usable(promotion: &PackPromotion, user_use_count: i64) -> bool {
    if let Some(max_uses) = promotion.max_uses {
        if promotion.current_uses >= max_uses {
            return false;
        }
    }
    if let Some(per_user) = promotion.max_uses_per_user {
        if user_use_count >= per_user as i64 {
            return false;
        }
    }
    true
}

/// The promotion engine.
pub struct PromotionEngine {
    pool: PgPool,
    currency: Arc<CurrencyResolver>,
    packs: PackCatalog,
}

impl PromotionEngine {
    pub fn new(pool: PgPool, currency: Arc<CurrencyResolver>) -> Self {
        let packs = PackCatalog::new(pool.clone());
        Self {
            pool,
            currency,
            packs,
        }
    }

    /// Resolve the price a user would pay for a pack in a display currency.
    ///
    /// A supplied promo code is validated fully (precise rejection reasons);
    /// without one, the best automatic promotion is applied when available.
    pub async fn resolve_pack_price(
        &self,
        pack_id: Uuid,
        currency: &str,
        user_id: Option<Uuid>,
        promo_code: Option<&str>,
    ) -> LedgerResult<PriceQuote> {
        let pack = self.packs.get_pack(pack_id).await?;
        let now = OffsetDateTime::now_utc();

        let (discount_canonical, applied) = match promo_code {
            Some(code) => {
                let (discount, applied) = self
                    .resolve_promo_code(code, pack_id, pack.price, user_id, now)
                    .await?;
                (discount, Some(applied))
            }
            None => match self
                .resolve_automatic_promotion(pack_id, pack.price, user_id, now)
                .await?
            {
                Some((discount, applied)) => (discount, Some(applied)),
                None => (0, None),
            },
        };

        let final_canonical = (pack.price - discount_canonical).max(0);

        let amount = self.currency.convert(pack.price, currency).await?;
        let final_display = self.currency.convert(final_canonical, currency).await?;

        Ok(PriceQuote {
            pack_id,
            currency: currency.to_uppercase(),
            minor_units: amount.minor_units,
            amount: amount.amount,
            // Derived from the converted figures so the displayed triple is
            // internally consistent despite per-currency rounding.
            discount_amount: amount.amount - final_display.amount,
            final_amount: final_display.amount,
            amount_canonical: pack.price,
            discount_canonical,
            final_canonical,
            applied,
        })
    }

    async fn resolve_promo_code(
        &self,
        code: &str,
        pack_id: Uuid,
        price_canonical: i64,
        user_id: Option<Uuid>,
        now: OffsetDateTime,
    ) -> LedgerResult<(i64, AppliedDiscount)> {
        let row: Option<PromoCode> = sqlx::query_as(
            r#"
            SELECT id, code, discount_type, value, applies_to_packs, max_uses,
                   max_uses_per_user, current_uses, valid_from, valid_until, is_active
            FROM promo_codes
            WHERE UPPER(code) = UPPER($1)
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        let promo = row.ok_or(LedgerError::PromoRejected(PromoRejection::Invalid))?;

        let user_use_count = match user_id {
            Some(uid) => self.count_code_uses(promo.id, uid).await?,
            None => 0,
        };

        let discount_type = validate_promo_code(&promo, pack_id, user_use_count, now)
            .map_err(LedgerError::PromoRejected)?;

        let discount = compute_discount(price_canonical, discount_type, promo.value);
        Ok((
            discount,
            AppliedDiscount::PromoCode {
                id: promo.id,
                code: promo.code,
            },
        ))
    }

    /// Highest-priority usable automatic promotion, first match wins.
    async fn resolve_automatic_promotion(
        &self,
        pack_id: Uuid,
        price_canonical: i64,
        user_id: Option<Uuid>,
        now: OffsetDateTime,
    ) -> LedgerResult<Option<(i64, AppliedDiscount)>> {
        let candidates: Vec<PackPromotion> = sqlx::query_as(
            r#"
            SELECT id, name, discount_type, value, pack_id, priority,
                   max_uses, max_uses_per_user, current_uses
            FROM pack_promotions
            WHERE is_active = TRUE
              AND show_on_pricing = TRUE
              AND starts_at <= $2
              AND ends_at >= $2
              AND (pack_id IS NULL OR pack_id = $1)
            ORDER BY priority DESC, created_at
            "#,
        )
        .bind(pack_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        for promotion in candidates {
            let user_use_count = match user_id {
                Some(uid) => self.count_promotion_uses(promotion.id, uid).await?,
                None => 0,
            };
            if !promotion_usable(&promotion, user_use_count) {
                continue;
            }
            let Some(discount_type) = DiscountType::from_db(&promotion.discount_type) else {
                tracing::warn!(
                    promotion_id = %promotion.id,
                    discount_type = %promotion.discount_type,
                    "Skipping promotion with unknown discount type"
                );
                continue;
            };
            let discount = compute_discount(price_canonical, discount_type, promotion.value);
            return Ok(Some((
                discount,
                AppliedDiscount::Promotion {
                    id: promotion.id,
                    name: promotion.name,
                },
            )));
        }

        Ok(None)
    }

    async fn count_code_uses(&self, promo_code_id: Uuid, user_id: Uuid) -> LedgerResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM promo_code_uses WHERE promo_code_id = $1 AND user_id = $2",
        )
        .bind(promo_code_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_promotion_uses(&self, promotion_id: Uuid, user_id: Uuid) -> LedgerResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pack_promotion_uses WHERE promotion_id = $1 AND user_id = $2",
        )
        .bind(promotion_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

/// Record a confirmed promo-code redemption. Runs inside the webhook
/// approval transaction, after payment is confirmed.
pub(crate) async fn record_code_use(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    promo_code_id: Uuid,
    user_id: Uuid,
    purchase_id: Uuid,
) -> LedgerResult<()> {
    sqlx::query(
        "INSERT INTO promo_code_uses (promo_code_id, user_id, purchase_id) VALUES ($1, $2, $3)",
    )
    .bind(promo_code_id)
    .bind(user_id)
    .bind(purchase_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE promo_codes SET current_uses = current_uses + 1 WHERE id = $1")
        .bind(promo_code_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Record a confirmed automatic-promotion redemption.
pub(crate) async fn record_promotion_use(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    promotion_id: Uuid,
    user_id: Uuid,
    purchase_id: Uuid,
) -> LedgerResult<()> {
    sqlx::query(
        "INSERT INTO pack_promotion_uses (promotion_id, user_id, purchase_id) VALUES ($1, $2, $3)",
    )
    .bind(promotion_id)
    .bind(user_id)
    .bind(purchase_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE pack_promotions SET current_uses = current_uses + 1 WHERE id = $1")
        .bind(promotion_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn sample_code(now: OffsetDateTime) -> PromoCode {
        PromoCode {
            id: Uuid::new_v4(),
            code: "LAUNCH50".to_string(),
            discount_type: "percentage".to_string(),
            value: 50,
            applies_to_packs: vec![],
            max_uses: Some(1000),
            max_uses_per_user: 1,
            current_uses: 0,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(30),
            is_active: true,
        }
    }

    #[test]
    fn test_percentage_discount_floors() {
        assert_eq!(compute_discount(5_000, DiscountType::Percentage, 50), 2_500);
        // 33% of 1000 = 330, exact; 33% of 101 = 33.33 floors to 33
        assert_eq!(compute_discount(101, DiscountType::Percentage, 33), 33);
        assert_eq!(compute_discount(5_000, DiscountType::Percentage, 0), 0);
        assert_eq!(compute_discount(5_000, DiscountType::Percentage, 100), 5_000);
    }

    #[test]
    fn test_fixed_discount_never_exceeds_price() {
        assert_eq!(compute_discount(5_000, DiscountType::FixedAmount, 1_000), 1_000);
        assert_eq!(compute_discount(5_000, DiscountType::FixedAmount, 9_999), 5_000);
        assert_eq!(compute_discount(0, DiscountType::FixedAmount, 100), 0);
    }

    #[test]
    fn test_free_trial_discounts_full_price() {
        assert_eq!(compute_discount(5_000, DiscountType::FreeTrial, 0), 5_000);
        assert_eq!(compute_discount(5_000, DiscountType::CreditBonus, 10), 5_000);
    }

    #[test]
    fn test_validate_accepts_valid_code() {
        let now = OffsetDateTime::now_utc();
        let code = sample_code(now);
        let result = validate_promo_code(&code, Uuid::new_v4(), 0, now);
        assert_eq!(result, Ok(DiscountType::Percentage));
    }

    #[test]
    fn test_validate_inactive_is_invalid() {
        let now = OffsetDateTime::now_utc();
        let mut code = sample_code(now);
        code.is_active = false;
        assert_eq!(
            validate_promo_code(&code, Uuid::new_v4(), 0, now),
            Err(PromoRejection::Invalid)
        );
    }

    #[test]
    fn test_validate_window_edges() {
        let now = OffsetDateTime::now_utc();
        let mut code = sample_code(now);

        code.valid_from = now + Duration::hours(1);
        assert_eq!(
            validate_promo_code(&code, Uuid::new_v4(), 0, now),
            Err(PromoRejection::NotYetValid)
        );

        code.valid_from = now - Duration::days(2);
        code.valid_until = now - Duration::hours(1);
        assert_eq!(
            validate_promo_code(&code, Uuid::new_v4(), 0, now),
            Err(PromoRejection::Expired)
        );

        // Boundary: now exactly inside [valid_from, valid_until] is accepted
        code.valid_from = now;
        code.valid_until = now;
        assert!(validate_promo_code(&code, Uuid::new_v4(), 0, now).is_ok());
    }

    #[test]
    fn test_validate_scope() {
        let now = OffsetDateTime::now_utc();
        let pack_a = Uuid::new_v4();
        let pack_b = Uuid::new_v4();
        let mut code = sample_code(now);
        code.applies_to_packs = vec![pack_a];

        assert!(validate_promo_code(&code, pack_a, 0, now).is_ok());
        assert_eq!(
            validate_promo_code(&code, pack_b, 0, now),
            Err(PromoRejection::WrongScope)
        );

        // Empty list applies to everything
        code.applies_to_packs = vec![];
        assert!(validate_promo_code(&code, pack_b, 0, now).is_ok());
    }

    #[test]
    fn test_validate_global_cap() {
        let now = OffsetDateTime::now_utc();
        let mut code = sample_code(now);
        code.max_uses = Some(10);
        code.current_uses = 10;
        assert_eq!(
            validate_promo_code(&code, Uuid::new_v4(), 0, now),
            Err(PromoRejection::Exhausted)
        );
    }

    #[test]
    fn test_validate_per_user_cap_counts_pending_uses() {
        let now = OffsetDateTime::now_utc();
        let code = sample_code(now);
        // One recorded redemption, even against a still-pending purchase,
        // blocks a second attempt when max_uses_per_user = 1.
        assert_eq!(
            validate_promo_code(&code, Uuid::new_v4(), 1, now),
            Err(PromoRejection::AlreadyUsed)
        );
    }

    #[test]
    fn test_validation_order_most_specific_first() {
        let now = OffsetDateTime::now_utc();
        let mut code = sample_code(now);
        code.is_active = false;
        code.valid_until = now - Duration::days(1);
        // Inactive wins over expired: first failing check short-circuits
        assert_eq!(
            validate_promo_code(&code, Uuid::new_v4(), 5, now),
            Err(PromoRejection::Invalid)
        );
    }

    #[test]
    fn test_promotion_usable_caps() {
        let promo = PackPromotion {
            id: Uuid::new_v4(),
            name: "Summer".to_string(),
            discount_type: "percentage".to_string(),
            value: 10,
            pack_id: None,
            priority: 5,
            max_uses: Some(100),
            max_uses_per_user: Some(1),
            current_uses: 99,
        };
        assert!(promotion_usable(&promo, 0));
        assert!(!promotion_usable(&promo, 1));

        let exhausted = PackPromotion {
            current_uses: 100,
            ..promo
        };
        assert!(!promotion_usable(&exhausted, 0));
    }
}
