//! Credit balance ledger
//!
//! Owns the mutable balance fields on `accounts` and the append-only
//! `credit_transactions` log. Every mutation is one short Postgres
//! transaction: lock the account row with `FOR UPDATE`, apply the balance
//! change and the matching cumulative counter, append exactly one
//! transaction row, commit. Concurrent mutations for the same user serialize
//! on the row lock; cross-user mutations are independent.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::tiers::Tier;

/// Ledger entry types. The sign of `credits_change` follows from the type:
/// only `usage` is negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Purchase,
    Usage,
    Gift,
    Bonus,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Usage => "usage",
            TransactionType::Gift => "gift",
            TransactionType::Bonus => "bonus",
            TransactionType::Refund => "refund",
        }
    }
}

/// Credit addition kinds accepted by [`CreditLedger::add_credits`].
/// Usage goes through [`CreditLedger::use_credits`], which owns the
/// insufficient-balance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditKind {
    Purchase,
    Gift,
    Bonus,
    Refund,
}

impl CreditKind {
    fn transaction_type(&self) -> TransactionType {
        match self {
            CreditKind::Purchase => TransactionType::Purchase,
            CreditKind::Gift => TransactionType::Gift,
            CreditKind::Bonus => TransactionType::Bonus,
            CreditKind::Refund => TransactionType::Refund,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LockedAccount {
    credits_balance: i64,
    credits_used: i64,
    tier: String,
}

/// The balance ledger service.
pub struct CreditLedger {
    pool: PgPool,
}

impl CreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add credits to a user's balance.
    ///
    /// Updates the balance, the matching cumulative counter (`purchased` for
    /// purchases, `gifted` for gifts and bonuses) and appends one transaction
    /// row, atomically. Returns the new balance.
    pub async fn add_credits(
        &self,
        user_id: Uuid,
        amount: i64,
        kind: CreditKind,
        purchase_id: Option<Uuid>,
        description: &str,
    ) -> LedgerResult<i64> {
        if amount <= 0 {
            return Err(LedgerError::Validation(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }

        let mut tx = self.pool.begin().await?;
        let new_balance =
            apply_credit(&mut tx, user_id, amount, kind, purchase_id, description).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            kind = ?kind,
            new_balance = new_balance,
            "Credits added"
        );

        Ok(new_balance)
    }

    /// Consume credits for an in-app action (prompt generation etc.).
    ///
    /// The insufficiency check runs against the row-locked balance, never a
    /// stale read: two concurrent calls that would jointly overdraw resolve
    /// as one success and one `InsufficientCredits`.
    pub async fn use_credits(
        &self,
        user_id: Uuid,
        amount: i64,
        action: &str,
        prompt_id: Option<Uuid>,
    ) -> LedgerResult<i64> {
        if amount <= 0 {
            return Err(LedgerError::Validation(format!(
                "usage amount must be positive, got {}",
                amount
            )));
        }

        let mut tx = self.pool.begin().await?;

        let account = lock_account(&mut tx, user_id).await?;
        if account.credits_balance < amount {
            return Err(LedgerError::InsufficientCredits {
                balance: account.credits_balance,
                requested: amount,
            });
        }

        let new_balance = account.credits_balance - amount;
        sqlx::query(
            r#"
            UPDATE accounts
            SET credits_balance = $2,
                credits_used = credits_used + $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(new_balance)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        append_transaction(
            &mut tx,
            user_id,
            TransactionType::Usage,
            -amount,
            account.credits_balance,
            new_balance,
            Tier::from_db(&account.tier),
            prompt_id,
            None,
            action,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            action = %action,
            new_balance = new_balance,
            "Credits consumed"
        );

        Ok(new_balance)
    }
}

/// Low-level credit application, usable inside a caller-owned transaction.
///
/// The webhook processor runs this inside the same transaction that inserts
/// the purchase row, so crediting and recording commit together or not at
/// all.
pub(crate) async fn apply_credit(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    amount: i64,
    kind: CreditKind,
    purchase_id: Option<Uuid>,
    description: &str,
) -> LedgerResult<i64> {
    let account = lock_account(tx, user_id).await?;
    let new_balance = account.credits_balance + amount;

    match kind {
        CreditKind::Purchase => {
            sqlx::query(
                r#"
                UPDATE accounts
                SET credits_balance = $2,
                    credits_purchased = credits_purchased + $3,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(user_id)
            .bind(new_balance)
            .bind(amount)
            .execute(&mut **tx)
            .await?;
        }
        CreditKind::Gift | CreditKind::Bonus => {
            sqlx::query(
                r#"
                UPDATE accounts
                SET credits_balance = $2,
                    credits_gifted = credits_gifted + $3,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(user_id)
            .bind(new_balance)
            .bind(amount)
            .execute(&mut **tx)
            .await?;
        }
        CreditKind::Refund => {
            // A credit refund restores previously consumed credits, so it
            // unwinds the `used` counter. This keeps the balance equation
            // (balance = purchased + gifted - used) intact.
            if amount > account.credits_used {
                return Err(LedgerError::Validation(format!(
                    "refund of {} exceeds credits used ({})",
                    amount, account.credits_used
                )));
            }
            sqlx::query(
                r#"
                UPDATE accounts
                SET credits_balance = $2,
                    credits_used = credits_used - $3,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(user_id)
            .bind(new_balance)
            .bind(amount)
            .execute(&mut **tx)
            .await?;
        }
    }

    append_transaction(
        tx,
        user_id,
        kind.transaction_type(),
        amount,
        account.credits_balance,
        new_balance,
        Tier::from_db(&account.tier),
        None,
        purchase_id,
        description,
    )
    .await?;

    Ok(new_balance)
}

async fn lock_account(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> LedgerResult<LockedAccount> {
    sqlx::query_as::<_, LockedAccount>(
        "SELECT credits_balance, credits_used, tier FROM accounts WHERE id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(LedgerError::AccountNotFound(user_id))
}

#[allow(clippy::too_many_arguments)]
async fn append_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    tx_type: TransactionType,
    credits_change: i64,
    balance_before: i64,
    balance_after: i64,
    tier_at_time: Tier,
    prompt_id: Option<Uuid>,
    purchase_id: Option<Uuid>,
    description: &str,
) -> LedgerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO credit_transactions
            (user_id, type, credits_change, balance_before, balance_after,
             tier_at_time, prompt_id, purchase_id, description)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(user_id)
    .bind(tx_type.as_str())
    .bind(credits_change)
    .bind(balance_before)
    .bind(balance_after)
    .bind(tier_at_time.as_str())
    .bind(prompt_id)
    .bind(purchase_id)
    .bind(description)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_wire_values() {
        assert_eq!(TransactionType::Purchase.as_str(), "purchase");
        assert_eq!(TransactionType::Usage.as_str(), "usage");
        assert_eq!(TransactionType::Bonus.as_str(), "bonus");
    }

    #[test]
    fn test_credit_kind_maps_to_transaction_type() {
        assert_eq!(
            CreditKind::Purchase.transaction_type(),
            TransactionType::Purchase
        );
        assert_eq!(CreditKind::Bonus.transaction_type(), TransactionType::Bonus);
        assert_eq!(
            CreditKind::Refund.transaction_type(),
            TransactionType::Refund
        );
    }

    async fn seed_account(pool: &PgPool) -> Uuid {
        let (id,): (Uuid,) =
            sqlx::query_as("INSERT INTO accounts (email) VALUES ($1) RETURNING id")
                .bind(format!("{}@example.test", Uuid::new_v4()))
                .fetch_one(pool)
                .await
                .unwrap();
        id
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_concurrent_overdraw_has_one_winner(pool: PgPool) {
        let ledger = CreditLedger::new(pool.clone());
        let user = seed_account(&pool).await;
        ledger
            .add_credits(user, 60, CreditKind::Gift, None, "seed")
            .await
            .unwrap();

        // Two debits that jointly overdraw; the row lock serializes them and
        // the second sees the post-debit balance.
        let other = CreditLedger::new(pool.clone());
        let (first, second) = tokio::join!(
            ledger.use_credits(user, 40, "prompt_generation", None),
            other.use_credits(user, 40, "prompt_generation", None),
        );

        let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let loser = if first.is_err() { first } else { second };
        assert!(matches!(
            loser,
            Err(LedgerError::InsufficientCredits {
                balance: 20,
                requested: 40
            })
        ));

        let (balance,): (i64,) =
            sqlx::query_as("SELECT credits_balance FROM accounts WHERE id = $1")
                .bind(user)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(balance, 20);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_ledger_replays_to_stored_balance(pool: PgPool) {
        let ledger = CreditLedger::new(pool.clone());
        let user = seed_account(&pool).await;

        ledger
            .add_credits(user, 100, CreditKind::Purchase, None, "Credit pack purchase")
            .await
            .unwrap();
        ledger
            .add_credits(user, 20, CreditKind::Bonus, None, "Credit pack bonus")
            .await
            .unwrap();
        ledger
            .use_credits(user, 30, "prompt_generation", None)
            .await
            .unwrap();
        ledger
            .add_credits(user, 10, CreditKind::Refund, None, "Support refund")
            .await
            .unwrap();

        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT credits_change, balance_before, balance_after
            FROM credit_transactions
            WHERE user_id = $1
            "#,
        )
        .bind(user)
        .fetch_all(&pool)
        .await
        .unwrap();

        assert_eq!(rows.len(), 4);
        for (change, before, after) in &rows {
            assert_eq!(before + change, *after);
        }

        // Replaying the full ledger reproduces the stored balance exactly.
        let replayed: i64 = rows.iter().map(|(change, _, _)| change).sum();

        let (balance, purchased, gifted, used): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT credits_balance, credits_purchased, credits_gifted, credits_used
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(user)
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(replayed, balance);
        assert_eq!(balance, 100);
        assert_eq!(purchased, 100);
        assert_eq!(gifted, 20);
        assert_eq!(used, 20);
        assert_eq!(balance, purchased + gifted - used);
    }
}
