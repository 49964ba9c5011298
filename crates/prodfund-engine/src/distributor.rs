//! # Production Distributor
//!
//! Lazily-updated reward accumulator. The pool balance yields continuously at
//! a fixed annual rate; the yield is credited to a global per-reputation index
//! and each participant keeps a debt snapshot of that index.
//!
//! ```text
//! generated = balance * rate * elapsed / (WAD * SECONDS_PER_YEAR)
//! applied   = min(generated, balance - reserved)
//! index    += applied * WAD / total_reputation
//!
//! pending   = accrued + reputation * index / WAD - debt
//! ```
//!
//! Every state-changing operation syncs the index first, so the balance used
//! for an interval is always the balance that sat in the pool during it.
//!
//! The distributor holds no state of its own. It mutates the caller's copies,
//! which lets the engine discard them when a later check fails.

use prodfund_core::math::{checked_add, checked_sub, index_increment, min, mul_div, to_u128, wad_mul_wide};
use prodfund_core::{Amount, FundError, Result, Timestamp, ANNUAL_RATE, SECONDS_PER_YEAR, U256, WAD};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shared pool state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalFundState {
    /// Value sitting in the pool
    pub balance: Amount,

    /// Sum of every participant's reputation
    pub total_reputation: u128,

    /// Cumulative yield per unit of reputation (WAD-scaled), never decreases
    pub accumulated_yield_per_reputation: U256,

    /// Last sync instant
    pub last_update_time: Timestamp,

    /// Yield credited to the index but not yet claimed
    pub reserved_yield: Amount,

    /// Principal held in open positions
    pub total_principal: Amount,
}

impl GlobalFundState {
    /// Pool value not yet promised to anyone
    pub fn unreserved(&self) -> Amount {
        self.balance.saturating_sub(self.reserved_yield)
    }
}

/// A participant's reputation and yield bookkeeping
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantAccount {
    /// Sum of reputation over open positions
    pub total_reputation: u128,

    /// `total_reputation * index / WAD` at the last checkpoint
    pub yield_debt: U256,

    /// Yield settled at a reputation change but not yet claimed
    pub accrued_yield: Amount,
}

impl ParticipantAccount {
    /// True when the account carries nothing worth persisting
    pub fn is_empty(&self) -> bool {
        self.total_reputation == 0 && self.accrued_yield == 0 && self.yield_debt.is_zero()
    }
}

/// Accumulator arithmetic over fund and participant state
#[derive(Clone, Copy, Debug)]
pub struct ProductionDistributor {
    annual_rate: u128,
}

impl Default for ProductionDistributor {
    fn default() -> Self {
        Self::new(ANNUAL_RATE)
    }
}

impl ProductionDistributor {
    /// Create a distributor yielding `annual_rate` (WAD) per year
    pub fn new(annual_rate: u128) -> Self {
        Self { annual_rate }
    }

    pub fn annual_rate(&self) -> u128 {
        self.annual_rate
    }

    /// Yield the pool would generate over `elapsed` seconds, before the cap
    pub fn generated(&self, balance: Amount, elapsed: u64) -> Result<Amount> {
        let rate_time = self
            .annual_rate
            .checked_mul(elapsed as u128)
            .ok_or(FundError::ArithmeticOverflow)?;
        mul_div(balance, rate_time, WAD * SECONDS_PER_YEAR as u128)
    }

    /// Bring the index up to `now`, returning the amount newly reserved
    ///
    /// Idempotent within one instant. A clock reading behind the last sync
    /// leaves the sync time where it is.
    pub fn sync(&self, fund: &mut GlobalFundState, now: Timestamp) -> Result<Amount> {
        let elapsed = now.saturating_sub(fund.last_update_time);
        if elapsed <= 0 || fund.total_reputation == 0 {
            fund.last_update_time = fund.last_update_time.max(now);
            return Ok(0);
        }

        let generated = self.generated(fund.balance, elapsed as u64)?;
        let applied = min(generated, fund.unreserved());
        let increment = index_increment(applied, fund.total_reputation)?;
        let distributed = to_u128(wad_mul_wide(fund.total_reputation, increment)?)?;

        fund.accumulated_yield_per_reputation = fund
            .accumulated_yield_per_reputation
            .checked_add(increment)
            .ok_or(FundError::ArithmeticOverflow)?;
        fund.reserved_yield = checked_add(fund.reserved_yield, distributed)?;
        fund.last_update_time = now;

        debug!(
            "Fund synced: elapsed={}s generated={} applied={} distributed={}",
            elapsed, generated, applied, distributed
        );
        Ok(distributed)
    }

    /// Yield earned through the index since the account's last checkpoint
    pub fn earned(&self, account: &ParticipantAccount, fund: &GlobalFundState) -> Result<Amount> {
        let entitled = wad_mul_wide(account.total_reputation, fund.accumulated_yield_per_reputation)?;
        to_u128(entitled.saturating_sub(account.yield_debt))
    }

    /// Claimable yield against an already-synced fund
    pub fn pending(&self, account: &ParticipantAccount, fund: &GlobalFundState) -> Result<Amount> {
        checked_add(account.accrued_yield, self.earned(account, fund)?)
    }

    /// Claimable yield as of `now`, without touching the stored fund
    pub fn projected_pending(
        &self,
        account: &ParticipantAccount,
        mut fund: GlobalFundState,
        now: Timestamp,
    ) -> Result<Amount> {
        self.sync(&mut fund, now)?;
        self.pending(account, &fund)
    }

    fn settle(&self, account: &mut ParticipantAccount, fund: &GlobalFundState) -> Result<()> {
        account.accrued_yield = checked_add(account.accrued_yield, self.earned(account, fund)?)?;
        Ok(())
    }

    fn checkpoint(&self, account: &mut ParticipantAccount, fund: &GlobalFundState) -> Result<()> {
        account.yield_debt = wad_mul_wide(account.total_reputation, fund.accumulated_yield_per_reputation)?;
        Ok(())
    }

    /// Add a new position's reputation and principal
    pub fn open(
        &self,
        fund: &mut GlobalFundState,
        account: &mut ParticipantAccount,
        reputation: u128,
        principal: Amount,
        now: Timestamp,
    ) -> Result<()> {
        self.sync(fund, now)?;
        self.settle(account, fund)?;

        account.total_reputation = checked_add(account.total_reputation, reputation)?;
        fund.total_reputation = checked_add(fund.total_reputation, reputation)?;
        fund.total_principal = checked_add(fund.total_principal, principal)?;

        self.checkpoint(account, fund)
    }

    /// Remove a closed position's reputation and principal
    pub fn close(
        &self,
        fund: &mut GlobalFundState,
        account: &mut ParticipantAccount,
        reputation: u128,
        principal: Amount,
        now: Timestamp,
    ) -> Result<()> {
        self.sync(fund, now)?;
        self.settle(account, fund)?;

        account.total_reputation = checked_sub(account.total_reputation, reputation)?;
        fund.total_reputation = checked_sub(fund.total_reputation, reputation)?;
        fund.total_principal = checked_sub(fund.total_principal, principal)?;

        self.checkpoint(account, fund)
    }

    /// Pay out everything pending, returning the amount leaving the pool
    pub fn claim(
        &self,
        fund: &mut GlobalFundState,
        account: &mut ParticipantAccount,
        now: Timestamp,
    ) -> Result<Amount> {
        self.sync(fund, now)?;

        let pending = self.pending(account, fund)?;
        let payout = min(pending, fund.balance);
        if payout == 0 {
            return Err(FundError::NoYieldToClaim);
        }

        fund.balance -= payout;
        fund.reserved_yield = fund.reserved_yield.saturating_sub(payout);
        account.accrued_yield = pending - payout;

        self.checkpoint(account, fund)?;
        Ok(payout)
    }

    /// Add external value to the pool after crediting the elapsed interval
    pub fn fund_pool(&self, fund: &mut GlobalFundState, amount: Amount, now: Timestamp) -> Result<()> {
        self.sync(fund, now)?;
        fund.balance = checked_add(fund.balance, amount)?;
        Ok(())
    }
}
