//! # Tier Catalog
//!
//! Immutable table of lock-duration tiers. Committing value for longer earns a
//! larger reputation multiplier.
//!
//! ## Reference Catalog
//!
//! | Tier | Lock | Multiplier |
//! |------|------|------------|
//! | 0 | 5 days | 0.618 |
//! | 1 | 13 days | 0.787 |
//! | 2 | 34 days | 1.001 |
//! | 3 | 89 days | 1.273 |
//! | 4 | 233 days | 1.619 |
//! | 5 | 610 days | 2.059 |
//! | 6 | 1597 days | 2.618 |

use crate::constants::{SECONDS_PER_DAY, WAD};
use crate::error::{FundError, Result};
use crate::math::mul_div;
use crate::types::{Amount, Seconds};
use serde::{Deserialize, Serialize};

/// Largest catalog addressable by a `u8` tier index
pub const MAX_TIERS: usize = u8::MAX as usize + 1;

/// Longest lock that still yields a representable unlock timestamp
pub const MAX_LOCK_DURATION: Seconds = i64::MAX as Seconds;

const REFERENCE_TIERS: [(u64, u128); 7] = [
    (5, 618_000_000_000_000_000),
    (13, 787_000_000_000_000_000),
    (34, 1_001_000_000_000_000_000),
    (89, 1_273_000_000_000_000_000),
    (233, 1_619_000_000_000_000_000),
    (610, 2_059_000_000_000_000_000),
    (1597, 2_618_000_000_000_000_000),
];

/// A lock duration paired with a reputation multiplier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// Lock duration in seconds
    pub lock_duration: Seconds,
    /// Reputation multiplier (WAD)
    pub reputation_multiplier: u128,
}

impl Tier {
    /// Create a tier from a lock length in days
    ///
    /// Lengths past [`MAX_LOCK_DURATION`] saturate and are refused by
    /// [`TierCatalog::new`].
    pub const fn from_days(days: u64, reputation_multiplier: u128) -> Self {
        Self {
            lock_duration: days.saturating_mul(SECONDS_PER_DAY),
            reputation_multiplier,
        }
    }

    /// Lock length in whole days
    pub fn lock_days(&self) -> u64 {
        self.lock_duration / SECONDS_PER_DAY
    }

    /// Reputation earned by committing `amount` to this tier
    pub fn reputation_for(&self, amount: Amount) -> Result<u128> {
        mul_div(amount, self.reputation_multiplier, WAD)
    }
}

/// The catalog of tiers, fixed at construction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCatalog {
    tiers: Vec<Tier>,
}

impl TierCatalog {
    /// Build a catalog, rejecting tables that break the tier ordering
    pub fn new(tiers: Vec<Tier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(FundError::InvalidTierCatalog("catalog is empty".into()));
        }
        if tiers.len() > MAX_TIERS {
            return Err(FundError::InvalidTierCatalog(format!(
                "{} tiers exceeds maximum of {}",
                tiers.len(),
                MAX_TIERS
            )));
        }
        if let Some(i) = tiers.iter().position(|t| t.lock_duration > MAX_LOCK_DURATION) {
            return Err(FundError::InvalidTierCatalog(format!(
                "tier {i} lock duration exceeds {MAX_LOCK_DURATION} seconds"
            )));
        }
        if let Some(i) = tiers.iter().position(|t| t.reputation_multiplier == 0) {
            return Err(FundError::InvalidTierCatalog(format!(
                "tier {i} has a zero multiplier"
            )));
        }
        for (i, pair) in tiers.windows(2).enumerate() {
            if pair[1].lock_duration <= pair[0].lock_duration {
                return Err(FundError::InvalidTierCatalog(format!(
                    "tier {} lock duration must exceed tier {}",
                    i + 1,
                    i
                )));
            }
            if pair[1].reputation_multiplier < pair[0].reputation_multiplier {
                return Err(FundError::InvalidTierCatalog(format!(
                    "tier {} multiplier is below tier {}",
                    i + 1,
                    i
                )));
            }
        }
        Ok(Self { tiers })
    }

    /// The seven-tier reference catalog
    pub fn reference() -> Self {
        Self {
            tiers: REFERENCE_TIERS
                .iter()
                .map(|&(days, multiplier)| Tier::from_days(days, multiplier))
                .collect(),
        }
    }

    /// Look up a tier
    pub fn get_tier(&self, index: usize) -> Result<&Tier> {
        self.tiers.get(index).ok_or(FundError::InvalidTierIndex(index))
    }

    /// `floor(amount * multiplier / WAD)` for the given tier
    pub fn reputation_for(&self, amount: Amount, index: usize) -> Result<u128> {
        self.get_tier(index)?.reputation_for(amount)
    }

    /// Number of tiers
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always false for a constructed catalog
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Iterate tiers in index order
    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }
}

impl Default for TierCatalog {
    fn default() -> Self {
        Self::reference()
    }
}
