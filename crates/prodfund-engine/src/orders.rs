//! # Order Manager
//!
//! Per-participant lists of open positions ("orders").
//!
//! Removal is O(1) swap-and-truncate: the last order is moved into the freed
//! slot, so an index is only meaningful until the next removal for that owner.
//! Callers must re-read positions after any close.

use prodfund_core::{Amount, FundError, ParticipantId, Result, Seconds, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A committed deposit locked for a tier's duration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Owner
    pub owner: ParticipantId,

    /// Committed principal
    pub amount: Amount,

    /// Tier index in the catalog
    pub tier_index: u8,

    /// `floor(amount * multiplier / WAD)`
    pub reputation: u128,

    /// Open timestamp
    pub start_time: Timestamp,

    /// Lock duration in seconds
    pub duration: Seconds,
}

impl Position {
    /// First instant at which the position may be closed
    pub fn unlock_time(&self) -> Timestamp {
        let duration = i64::try_from(self.duration).unwrap_or(i64::MAX);
        self.start_time.saturating_add(duration)
    }

    /// Check if the lock has elapsed
    pub fn is_unlocked(&self, now: Timestamp) -> bool {
        now >= self.unlock_time()
    }
}

/// Open positions keyed by owner
///
/// Changes are computed on a copy of one owner's list and installed with
/// [`OrderManager::replace`] once they are durable.
#[derive(Clone, Debug, Default)]
pub struct OrderManager {
    orders: HashMap<ParticipantId, Vec<Position>>,
}

impl OrderManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// The owner's list with `position` pushed onto the end
    pub fn appended(&self, owner: &ParticipantId, position: Position) -> Vec<Position> {
        let mut list = self.get(owner).to_vec();
        list.push(position);
        list
    }

    /// The owner's list with `index` removed and the last position moved into its slot
    pub fn removed(&self, owner: &ParticipantId, index: usize) -> Result<(Position, Vec<Position>)> {
        self.position(owner, index)?;
        let mut list = self.get(owner).to_vec();
        let removed = list.swap_remove(index);
        Ok((removed, list))
    }

    /// Read-only view of the owner's positions
    pub fn get(&self, owner: &ParticipantId) -> &[Position] {
        self.orders.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Look up one position
    pub fn position(&self, owner: &ParticipantId, index: usize) -> Result<&Position> {
        let list = self.get(owner);
        list.get(index).ok_or(FundError::InvalidOrderIndex {
            index,
            len: list.len(),
        })
    }

    /// Install the owner's whole list; an empty list drops the owner
    pub fn replace(&mut self, owner: ParticipantId, positions: Vec<Position>) {
        if positions.is_empty() {
            self.orders.remove(&owner);
        } else {
            self.orders.insert(owner, positions);
        }
    }

    /// Number of owners holding at least one position
    pub fn owner_count(&self) -> usize {
        self.orders.len()
    }
}
