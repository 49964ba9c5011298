//! # Value Ledger
//!
//! Deposits and withdrawals between participants and the engine's custody.
//! Transfers are all-or-nothing.
//!
//! A ledger that lives in the same store as the engine stages its records
//! into the engine's batch, so balances and fund records land together.

use parking_lot::RwLock;
use prodfund_core::math::{checked_add, checked_sub};
use prodfund_core::{Amount, FundError, ParticipantId, Result};
use prodfund_storage::{codec, StateStore, WriteBatch};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Moves value in and out of engine custody
pub trait ValueLedger: Send + Sync {
    /// Debit `from` and credit custody
    fn transfer_in(&self, from: &ParticipantId, amount: Amount) -> Result<()>;

    /// Debit custody and credit `to`
    fn transfer_out(&self, to: &ParticipantId, amount: Amount) -> Result<()>;

    /// Add the stored form of `who`'s balance and of custody to `batch`
    ///
    /// Ledgers persisted elsewhere leave the batch alone.
    fn stage_records(&self, _who: &ParticipantId, _batch: &mut WriteBatch) -> Result<()> {
        Ok(())
    }
}

impl<L: ValueLedger + ?Sized> ValueLedger for Arc<L> {
    fn transfer_in(&self, from: &ParticipantId, amount: Amount) -> Result<()> {
        (**self).transfer_in(from, amount)
    }

    fn transfer_out(&self, to: &ParticipantId, amount: Amount) -> Result<()> {
        (**self).transfer_out(to, amount)
    }

    fn stage_records(&self, who: &ParticipantId, batch: &mut WriteBatch) -> Result<()> {
        (**self).stage_records(who, batch)
    }
}

const LEDGER_PREFIX: &str = "ledger/";
const CUSTODY_KEY: &str = "custody";

/// Serializable contents of a [`BalanceBook`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub balances: Vec<(ParticipantId, Amount)>,
    pub custody: Amount,
}

#[derive(Default)]
struct BookState {
    balances: HashMap<ParticipantId, Amount>,
    custody: Amount,
}

/// In-process ledger of spendable balances plus the engine's custody account
#[derive(Default)]
pub struct BalanceBook {
    state: RwLock<BookState>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a book from a snapshot
    pub fn from_snapshot(snapshot: BookSnapshot) -> Self {
        Self {
            state: RwLock::new(BookState {
                balances: snapshot.balances.into_iter().collect(),
                custody: snapshot.custody,
            }),
        }
    }

    /// Rebuild a book from `ledger/<id>` and `custody` records
    pub fn load(store: &dyn StateStore) -> Result<Self> {
        let mut balances = Vec::new();
        for key in store.keys_with_prefix(LEDGER_PREFIX)? {
            let Some(bytes) = store.get(&key)? else {
                continue;
            };
            let id = ParticipantId::from_hex(&key[LEDGER_PREFIX.len()..])?;
            balances.push((id, codec::decode::<Amount>(&bytes)?));
        }
        let custody = match store.get(CUSTODY_KEY)? {
            Some(bytes) => codec::decode(&bytes)?,
            None => 0,
        };
        Ok(Self::from_snapshot(BookSnapshot { balances, custody }))
    }

    /// Credit external value to a participant
    pub fn deposit(&self, who: &ParticipantId, amount: Amount) -> Result<()> {
        let mut state = self.state.write();
        let balance = state.balances.entry(*who).or_insert(0);
        *balance = checked_add(*balance, amount)?;
        Ok(())
    }

    /// Remove value from a participant to outside the system
    pub fn withdraw(&self, who: &ParticipantId, amount: Amount) -> Result<()> {
        let mut state = self.state.write();
        Self::debit(&mut state.balances, who, amount)
    }

    /// Spendable balance
    pub fn balance_of(&self, who: &ParticipantId) -> Amount {
        self.state.read().balances.get(who).copied().unwrap_or(0)
    }

    /// Value held by the engine
    pub fn custody(&self) -> Amount {
        self.state.read().custody
    }

    /// All spendable balances plus custody
    pub fn total_supply(&self) -> Amount {
        let state = self.state.read();
        state
            .balances
            .values()
            .fold(state.custody, |acc, b| acc.saturating_add(*b))
    }

    /// Copy out the book for persistence
    pub fn snapshot(&self) -> BookSnapshot {
        let state = self.state.read();
        let mut balances: Vec<_> = state.balances.iter().map(|(k, v)| (*k, *v)).collect();
        balances.sort();
        BookSnapshot {
            balances,
            custody: state.custody,
        }
    }

    fn debit(
        balances: &mut HashMap<ParticipantId, Amount>,
        who: &ParticipantId,
        amount: Amount,
    ) -> Result<()> {
        let available = balances.get(who).copied().unwrap_or(0);
        if available < amount {
            return Err(FundError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        balances.insert(*who, available - amount);
        Ok(())
    }
}

impl ValueLedger for BalanceBook {
    fn transfer_in(&self, from: &ParticipantId, amount: Amount) -> Result<()> {
        let mut state = self.state.write();
        let custody = checked_add(state.custody, amount)?;
        Self::debit(&mut state.balances, from, amount)?;
        state.custody = custody;
        Ok(())
    }

    fn transfer_out(&self, to: &ParticipantId, amount: Amount) -> Result<()> {
        let mut state = self.state.write();
        let custody = checked_sub(state.custody, amount).map_err(|_| FundError::InsufficientBalance {
            required: amount,
            available: state.custody,
        })?;
        let credited = checked_add(state.balances.get(to).copied().unwrap_or(0), amount)?;
        state.balances.insert(*to, credited);
        state.custody = custody;
        Ok(())
    }

    fn stage_records(&self, who: &ParticipantId, batch: &mut WriteBatch) -> Result<()> {
        let state = self.state.read();
        let key = format!("{}{}", LEDGER_PREFIX, who.to_hex());
        match state.balances.get(who).copied().unwrap_or(0) {
            0 => batch.delete(key),
            balance => batch.put(key, codec::encode(&balance)?),
        }
        batch.put(CUSTODY_KEY, codec::encode(&state.custody)?);
        Ok(())
    }
}
