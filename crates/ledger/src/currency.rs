//! Currency conversion for display pricing
//!
//! All prices are stored in the canonical currency (XOF, zero minor-unit
//! decimals). Conversion to a display currency is pure arithmetic over the
//! `exchange_rates` table, which is held in an explicit TTL cache owned by
//! the resolver. The admin pricing-write path calls [`CurrencyResolver::invalidate`]
//! after edits instead of waiting for the TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::error::{LedgerError, LedgerResult};

/// The single currency prices are stored in.
pub const CANONICAL_CURRENCY: &str = "XOF";

const RATE_CACHE_TTL: Duration = Duration::from_secs(300);

/// One exchange-rate table row.
///
/// `rate_ppm` is the value of one canonical minor unit expressed in target
/// minor units, times 1e6. The canonical currency's own row is 1_000_000.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExchangeRate {
    pub currency: String,
    pub rate_ppm: i64,
    pub minor_units: i16,
}

/// A converted price in a display currency, minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertedAmount {
    pub amount: i64,
    pub minor_units: i16,
}

/// Convert a canonical-currency amount using a rate.
///
/// Rounds half-up to the target currency's minor unit, which is what the
/// ppm arithmetic below produces directly (rate_ppm already targets minor
/// units, so rounding to an integer is rounding to the minor-unit
/// convention: zero decimals for XOF, two for EUR/USD).
pub fn convert_amount(amount_canonical: i64, rate: &ExchangeRate) -> i64 {
    let scaled = amount_canonical as i128 * rate.rate_ppm as i128;
    ((scaled + 500_000) / 1_000_000) as i64
}

struct CachedRates {
    rates: HashMap<String, ExchangeRate>,
    loaded_at: Instant,
}

/// Resolves display-currency prices from the canonical price.
///
/// Stateless apart from the rate cache; cross-request reads share the cached
/// table behind an RwLock.
pub struct CurrencyResolver {
    pool: PgPool,
    cache: RwLock<Option<CachedRates>>,
}

impl CurrencyResolver {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: RwLock::new(None),
        }
    }

    /// Convert a canonical-currency price into `currency`.
    ///
    /// Fails with `UnknownCurrency` when no rate row exists.
    pub async fn convert(&self, amount_canonical: i64, currency: &str) -> LedgerResult<ConvertedAmount> {
        let currency = currency.to_uppercase();
        if currency == CANONICAL_CURRENCY {
            return Ok(ConvertedAmount {
                amount: amount_canonical,
                minor_units: 0,
            });
        }

        let rate = self.rate_for(&currency).await?;
        Ok(ConvertedAmount {
            amount: convert_amount(amount_canonical, &rate),
            minor_units: rate.minor_units,
        })
    }

    /// Drop the cached rate table. Called by the admin write path after
    /// editing exchange rates so the next read reloads from Postgres.
    pub async fn invalidate(&self) {
        let mut guard = self.cache.write().await;
        *guard = None;
        tracing::info!("Exchange rate cache invalidated");
    }

    async fn rate_for(&self, currency: &str) -> LedgerResult<ExchangeRate> {
        // Fast path: unexpired cache
        {
            let guard = self.cache.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.loaded_at.elapsed() < RATE_CACHE_TTL {
                    return cached
                        .rates
                        .get(currency)
                        .cloned()
                        .ok_or_else(|| LedgerError::UnknownCurrency(currency.to_string()));
                }
            }
        }

        // Reload under the write lock. A concurrent reloader may have won;
        // that is fine, both load the same table.
        let rows: Vec<ExchangeRate> =
            sqlx::query_as("SELECT currency, rate_ppm, minor_units FROM exchange_rates")
                .fetch_all(&self.pool)
                .await?;

        let rates: HashMap<String, ExchangeRate> = rows
            .into_iter()
            .map(|r| (r.currency.clone(), r))
            .collect();

        tracing::debug!(currencies = rates.len(), "Exchange rate table loaded");

        let mut guard = self.cache.write().await;
        *guard = Some(CachedRates {
            rates,
            loaded_at: Instant::now(),
        });

        guard
            .as_ref()
            .and_then(|c| c.rates.get(currency).cloned())
            .ok_or_else(|| LedgerError::UnknownCurrency(currency.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(currency: &str, rate_ppm: i64, minor_units: i16) -> ExchangeRate {
        ExchangeRate {
            currency: currency.to_string(),
            rate_ppm,
            minor_units,
        }
    }

    #[test]
    fn test_convert_canonical_identity() {
        let xof = rate("XOF", 1_000_000, 0);
        assert_eq!(convert_amount(5_000, &xof), 5_000);
        assert_eq!(convert_amount(0, &xof), 0);
    }

    #[test]
    fn test_convert_to_two_decimal_currency() {
        // 1 EUR = 655.957 XOF, so 1 XOF = 0.15245 euro cents
        let eur = rate("EUR", 152_450, 2);
        // 5000 XOF -> 762.25 cents, rounds to 762 (7.62 EUR)
        assert_eq!(convert_amount(5_000, &eur), 762);
        // 10_000 XOF -> 1524.5 cents, half-up to 1525
        assert_eq!(convert_amount(10_000, &eur), 1_525);
    }

    #[test]
    fn test_convert_rounds_half_up() {
        let r = rate("USD", 165_000, 2);
        // 3 XOF -> 0.495 cents, rounds to 0
        assert_eq!(convert_amount(3, &r), 0);
        // 4 XOF -> 0.66 cents, rounds to 1
        assert_eq!(convert_amount(4, &r), 1);
    }

    #[test]
    fn test_convert_large_amount_no_overflow() {
        let r = rate("USD", 165_000, 2);
        let big = i64::MAX / 2_000_000;
        // i128 intermediate keeps this exact
        assert!(convert_amount(big, &r) > 0);
    }
}
