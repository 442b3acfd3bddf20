//! Loyalty tier engine
//!
//! Pure mapping from lifetime spend (canonical currency units) to a tier.
//! The stored `accounts.tier` column is a cache: ground truth is the pair
//! `(total_spent, tier_expires_at)`. Expiry is evaluated lazily wherever the
//! tier is read; nothing sweeps accounts in the background, so there is a
//! single writer for tier state (the purchase path).

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// How long a purchased tier stays active before lapsing back to FREE.
pub const TIER_VALIDITY_DAYS: i64 = 30;

/// Loyalty tiers, ordered. Spend exactly equal to a threshold qualifies
/// for that tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Bronze,
    Silver,
    Gold,
    Platinum,
}

/// Ascending (threshold, tier) table in canonical currency units.
const TIER_THRESHOLDS: &[(i64, Tier)] = &[
    (0, Tier::Free),
    (2_500, Tier::Bronze),
    (5_000, Tier::Silver),
    (12_000, Tier::Gold),
    (30_000, Tier::Platinum),
];

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Platinum => "platinum",
        }
    }

    /// Parse a stored tier value. Unknown strings map to FREE rather than
    /// erroring: a corrupted cache column must never block reads, and the
    /// next purchase recomputes it from spend.
    pub fn from_db(s: &str) -> Tier {
        match s {
            "bronze" => Tier::Bronze,
            "silver" => Tier::Silver,
            "gold" => Tier::Gold,
            "platinum" => Tier::Platinum,
            _ => Tier::Free,
        }
    }

    /// Minimum lifetime spend required for this tier.
    pub fn required_spend(&self) -> i64 {
        TIER_THRESHOLDS
            .iter()
            .find(|(_, t)| t == self)
            .map(|(threshold, _)| *threshold)
            .unwrap_or(0)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Map lifetime spend to a tier. Monotonic non-decreasing in its input.
pub fn compute_tier(total_spent: i64) -> Tier {
    let mut tier = Tier::Free;
    for (threshold, candidate) in TIER_THRESHOLDS {
        if total_spent >= *threshold {
            tier = *candidate;
        }
    }
    tier
}

/// The next tier above `current`, with the spend required to reach it.
pub fn next_tier(current: Tier, total_spent: i64) -> Option<NextTier> {
    TIER_THRESHOLDS
        .iter()
        .find(|(_, t)| *t > current)
        .map(|(required, t)| NextTier {
            tier: *t,
            required_spend: *required,
            remaining_spend: (*required - total_spent).max(0),
        })
}

/// Distance to the next tier
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NextTier {
    pub tier: Tier,
    pub required_spend: i64,
    pub remaining_spend: i64,
}

/// The tier to use for authorization decisions.
///
/// The stored tier is honored only while unexpired; past `tier_expires_at`
/// the effective tier is FREE. The stored column is left untouched until the
/// next purchase recomputes it.
pub fn effective_tier(stored: Tier, expires_at: Option<OffsetDateTime>, now: OffsetDateTime) -> Tier {
    match expires_at {
        Some(expiry) if now > expiry => Tier::Free,
        _ => stored,
    }
}

/// Expiry assigned when a purchase (re)computes the tier.
pub fn expiry_from(now: OffsetDateTime) -> OffsetDateTime {
    now + Duration::days(TIER_VALIDITY_DAYS)
}
