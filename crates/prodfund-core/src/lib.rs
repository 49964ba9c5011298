//! # Production Fund Core
//!
//! Core building blocks shared by every production fund crate:
//! - `math` - WAD fixed-point helpers that never wrap silently
//! - `tiers` - the immutable duration/multiplier catalog
//! - `types` - participant identities and time units
//! - `clock` - the time source consulted by every state change
//!
//! ## Fixed-Point Convention
//!
//! ```text
//!   1 unit        = 1_000_000_000_000_000_000   (WAD = 10^18)
//!   multiplier    = 0.618 -> 618_000_000_000_000_000
//!   annual rate   = 6.182% -> 61_820_000_000_000_000
//! ```
//!
//! All divisions truncate toward zero, so every rounding error favours the pool.

pub mod clock;
pub mod error;
pub mod math;
pub mod tiers;
pub mod types;

pub use clock::*;
pub use error::*;
pub use math::*;
pub use tiers::*;
pub use types::*;

/// Fund-wide constants
pub mod constants {
    /// Fixed-point scale (10^18)
    pub const WAD: u128 = 1_000_000_000_000_000_000;

    /// One whole unit of the fund's value token
    pub const ONE_UNIT: u128 = WAD;

    /// Decimal places of the value token
    pub const DECIMALS: u8 = 18;

    /// Annual yield rate of the pool balance: 6.182%
    pub const ANNUAL_RATE: u128 = 61_820_000_000_000_000;

    /// One day in seconds
    pub const SECONDS_PER_DAY: u64 = 24 * 3600;

    /// 365-day year in seconds
    pub const SECONDS_PER_YEAR: u64 = 365 * SECONDS_PER_DAY; // 31,536,000

    /// Width of the identity suffix appended by a trusted relayer
    pub const IDENTITY_LEN: usize = 32;
}

pub use constants::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::constants::*;
    pub use crate::error::{FundError, Result};
    pub use crate::math::{mul_div, wad_mul, U256};
    pub use crate::tiers::{Tier, TierCatalog};
    pub use crate::types::{Amount, ParticipantId, Timestamp};
}
