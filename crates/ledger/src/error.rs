//! Ledger error taxonomy
//!
//! Business-rule failures (insufficient credits, promo rejection) carry a
//! precise reason for UI display. Storage and provider faults are separate
//! variants so callers can decide whether a webhook response should trigger
//! redelivery.

use uuid::Uuid;

/// Why a promo code or automatic promotion was rejected.
///
/// Validation short-circuits on the first failing check, so a caller always
/// gets the single most specific reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromoRejection {
    /// Code does not exist or is disabled
    Invalid,
    /// Validity window has not opened yet
    NotYetValid,
    /// Validity window has closed
    Expired,
    /// Code does not apply to the requested pack
    WrongScope,
    /// Global max_uses reached
    Exhausted,
    /// This user already redeemed it max_uses_per_user times
    AlreadyUsed,
}

impl std::fmt::Display for PromoRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PromoRejection::Invalid => "invalid",
            PromoRejection::NotYetValid => "not-yet-valid",
            PromoRejection::Expired => "expired",
            PromoRejection::WrongScope => "wrong-scope",
            PromoRejection::Exhausted => "exhausted",
            PromoRejection::AlreadyUsed => "already-used",
        };
        write!(f, "{}", s)
    }
}

/// Errors produced by the monetization core
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed input, rejected before touching storage
    #[error("validation error: {0}")]
    Validation(String),

    #[error("account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("credit pack not found: {0}")]
    PackNotFound(Uuid),

    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    /// Business rule, not a system fault
    #[error("insufficient credits: balance {balance}, requested {requested}")]
    InsufficientCredits { balance: i64, requested: i64 },

    #[error("promo code rejected: {0}")]
    PromoRejected(PromoRejection),

    /// Idempotent no-op: this provider transaction was already processed.
    /// Callers treat this as success.
    #[error("duplicate provider transaction: {0}")]
    DuplicateTransaction(String),

    /// Transient provider fault; surface as 5xx so the provider redelivers
    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider rejected or cannot find the transaction id
    #[error("provider transaction not found: {0}")]
    TransactionNotFound(String),

    /// Storage fault. Must never be reported as "processed".
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Persistence(e.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
