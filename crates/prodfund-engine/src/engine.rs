//! # Production Engine
//!
//! Facade over the tier catalog, order manager and distributor. Each
//! state-changing entry point follows the same shape:
//!
//! 1. enter the call gate (rejects re-entrant calls)
//! 2. resolve the acting participant from the call context
//! 3. validate and run the accumulator on copies of the touched state
//! 4. move value through the ledger
//! 5. write every touched record, ledger included, in one batch
//! 6. install the copies and emit the event
//!
//! A failure at steps 1-5 leaves the engine, the ledger and the store as they
//! were. A failed write reverses the ledger movement from step 4.

use crate::distributor::{GlobalFundState, ParticipantAccount, ProductionDistributor};
use crate::events::EngineEvent;
use crate::ledger::ValueLedger;
use crate::orders::{OrderManager, Position};
use crate::sender::{resolve_sender, CallContext, RelayerRegistry, TrustedForwarders};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use prodfund_core::{
    Amount, Clock, FundError, ParticipantId, Result, TierCatalog, ANNUAL_RATE,
};
use prodfund_storage::{codec, StateStore, WriteBatch};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const FUND_KEY: &str = "fund";
const PARTICIPANT_PREFIX: &str = "participant/";
const EVENT_CAPACITY: usize = 1024;

/// Fixed parameters of an engine instance
#[derive(Clone)]
pub struct EngineSettings {
    /// Identity allowed to pause and unpause
    pub admin: ParticipantId,
    /// Tier catalog
    pub catalog: TierCatalog,
    /// Annual pool yield rate (WAD)
    pub annual_rate: u128,
    /// Trusted forwarders for relayed calls
    pub relayers: Arc<dyn RelayerRegistry>,
}

impl EngineSettings {
    /// Reference catalog and rate with no relayers
    pub fn with_admin(admin: ParticipantId) -> Self {
        Self {
            admin,
            catalog: TierCatalog::reference(),
            annual_rate: ANNUAL_RATE,
            relayers: Arc::new(TrustedForwarders::none()),
        }
    }
}

/// Stored form of the global record
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct FundRecord {
    fund: GlobalFundState,
    paused: bool,
}

/// Stored form of one participant
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ParticipantRecord {
    account: ParticipantAccount,
    positions: Vec<Position>,
}

impl ParticipantRecord {
    fn is_empty(&self) -> bool {
        self.account.is_empty() && self.positions.is_empty()
    }
}

fn participant_key(who: &ParticipantId) -> String {
    format!("{}{}", PARTICIPANT_PREFIX, who.to_hex())
}

/// Ledger movement made by one operation
#[derive(Clone, Copy, Debug)]
enum Transfer {
    In(Amount),
    Out(Amount),
}

/// Post-operation copies of everything one call changes
struct Changes {
    fund: GlobalFundState,
    paused: bool,
    participant: Option<(ParticipantId, ParticipantRecord)>,
    transfer: Option<(ParticipantId, Transfer)>,
}

#[derive(Default)]
struct EngineState {
    fund: GlobalFundState,
    paused: bool,
    accounts: HashMap<ParticipantId, ParticipantAccount>,
    orders: OrderManager,
}

impl EngineState {
    fn account(&self, who: &ParticipantId) -> ParticipantAccount {
        self.accounts.get(who).copied().unwrap_or_default()
    }

    fn record(&self, who: &ParticipantId) -> ParticipantRecord {
        ParticipantRecord {
            account: self.account(who),
            positions: self.orders.get(who).to_vec(),
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.paused {
            return Err(FundError::SystemPaused);
        }
        Ok(())
    }
}

/// Marks a state-changing call as in progress until dropped
struct CallGuard<'a> {
    gate: ReentrantMutexGuard<'a, Cell<bool>>,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.gate.set(false);
    }
}

/// The production fund engine
pub struct ProductionEngine<L: ValueLedger, C: Clock> {
    admin: ParticipantId,
    catalog: TierCatalog,
    distributor: ProductionDistributor,
    relayers: Arc<dyn RelayerRegistry>,
    ledger: L,
    clock: C,
    state: RwLock<EngineState>,
    /// Serialises calls across threads, detects nesting on one thread
    gate: ReentrantMutex<Cell<bool>>,
    event_tx: broadcast::Sender<EngineEvent>,
    store: Option<Arc<dyn StateStore>>,
}

impl<L: ValueLedger, C: Clock> ProductionEngine<L, C> {
    /// Create an engine with empty state
    pub fn new(settings: EngineSettings, ledger: L, clock: C) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            admin: settings.admin,
            catalog: settings.catalog,
            distributor: ProductionDistributor::new(settings.annual_rate),
            relayers: settings.relayers,
            ledger,
            clock,
            state: RwLock::new(EngineState::default()),
            gate: ReentrantMutex::new(Cell::new(false)),
            event_tx,
            store: None,
        }
    }

    /// Rebuild an engine from a store and keep persisting to it
    ///
    /// An empty store yields a fresh engine.
    pub fn restore(
        settings: EngineSettings,
        ledger: L,
        clock: C,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let mut engine = Self::new(settings, ledger, clock);
        {
            let state = engine.state.get_mut();

            if let Some(bytes) = store.get(FUND_KEY)? {
                let record: FundRecord = codec::decode(&bytes)?;
                state.fund = record.fund;
                state.paused = record.paused;
            }

            for key in store.keys_with_prefix(PARTICIPANT_PREFIX)? {
                let Some(bytes) = store.get(&key)? else {
                    continue;
                };
                let record: ParticipantRecord = codec::decode(&bytes)?;
                let id = ParticipantId::from_hex(&key[PARTICIPANT_PREFIX.len()..])?;
                state.accounts.insert(id, record.account);
                state.orders.replace(id, record.positions);
            }

            info!(
                "Restored fund: balance={} participants={} holders={} paused={}",
                state.fund.balance,
                state.accounts.len(),
                state.orders.owner_count(),
                state.paused
            );
        }
        engine.store = Some(store);
        Ok(engine)
    }

    /// Subscribe to committed events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// The value ledger
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// The clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    // === State-changing operations ===

    /// Commit `amount` to tier `tier_index`, returning the new position
    pub fn open_position(&self, ctx: &CallContext, amount: Amount, tier_index: usize) -> Result<Position> {
        let _call = self.enter()?;
        let sender = resolve_sender(self.relayers.as_ref(), ctx);
        let now = self.clock.now();

        let (changes, position, order_index) = {
            let state = self.state.read();
            state.ensure_running()?;
            if amount == 0 {
                return Err(FundError::InvalidAmount);
            }
            let tier = self.catalog.get_tier(tier_index)?;
            let reputation = tier.reputation_for(amount)?;

            let mut fund = state.fund;
            let mut account = state.account(&sender);
            self.distributor
                .open(&mut fund, &mut account, reputation, amount, now)?;

            let position = Position {
                owner: sender,
                amount,
                tier_index: tier_index as u8,
                reputation,
                start_time: now,
                duration: tier.lock_duration,
            };
            let positions = state.orders.appended(&sender, position.clone());
            let order_index = positions.len() - 1;
            let changes = Changes {
                fund,
                paused: state.paused,
                participant: Some((sender, ParticipantRecord { account, positions })),
                transfer: Some((sender, Transfer::In(amount))),
            };
            (changes, position, order_index)
        };

        self.commit(changes)?;
        info!(
            "Position opened: participant={} index={} amount={} tier={} reputation={}",
            sender, order_index, amount, tier_index, position.reputation
        );
        self.emit(EngineEvent::PositionOpened {
            participant: sender,
            order_index,
            amount,
            tier_index: position.tier_index,
            reputation: position.reputation,
            timestamp: now,
        });
        Ok(position)
    }

    /// Close an unlocked position and return its principal
    ///
    /// The last position moves into `index`; re-read positions afterwards.
    pub fn close_position(&self, ctx: &CallContext, index: usize) -> Result<Position> {
        let _call = self.enter()?;
        let sender = resolve_sender(self.relayers.as_ref(), ctx);
        let now = self.clock.now();

        let (changes, position) = {
            let state = self.state.read();
            state.ensure_running()?;
            let (position, remaining) = state.orders.removed(&sender, index)?;
            if !position.is_unlocked(now) {
                return Err(FundError::PositionLocked {
                    unlock_time: position.unlock_time(),
                });
            }

            let mut fund = state.fund;
            let mut account = state.account(&sender);
            self.distributor.close(
                &mut fund,
                &mut account,
                position.reputation,
                position.amount,
                now,
            )?;
            let changes = Changes {
                fund,
                paused: state.paused,
                participant: Some((sender, ParticipantRecord { account, positions: remaining })),
                transfer: Some((sender, Transfer::Out(position.amount))),
            };
            (changes, position)
        };

        self.commit(changes)?;
        info!(
            "Position closed: participant={} index={} amount={}",
            sender, index, position.amount
        );
        self.emit(EngineEvent::PositionClosed {
            participant: sender,
            order_index: index,
            amount: position.amount,
            reputation: position.reputation,
            timestamp: now,
        });
        Ok(position)
    }

    /// Pay out the caller's pending yield
    pub fn claim_yield(&self, ctx: &CallContext) -> Result<Amount> {
        let _call = self.enter()?;
        let sender = resolve_sender(self.relayers.as_ref(), ctx);
        let now = self.clock.now();

        let (changes, payout) = {
            let state = self.state.read();
            state.ensure_running()?;
            let mut fund = state.fund;
            let mut record = state.record(&sender);
            let payout = self.distributor.claim(&mut fund, &mut record.account, now)?;
            let changes = Changes {
                fund,
                paused: state.paused,
                participant: Some((sender, record)),
                transfer: Some((sender, Transfer::Out(payout))),
            };
            (changes, payout)
        };

        self.commit(changes)?;
        info!("Yield claimed: participant={} amount={}", sender, payout);
        self.emit(EngineEvent::YieldClaimed {
            participant: sender,
            amount: payout,
            timestamp: now,
        });
        Ok(payout)
    }

    /// Add external value to the pool
    pub fn fund_pool(&self, ctx: &CallContext, amount: Amount) -> Result<()> {
        let _call = self.enter()?;
        let sender = resolve_sender(self.relayers.as_ref(), ctx);
        let now = self.clock.now();

        let changes = {
            let state = self.state.read();
            state.ensure_running()?;
            if amount == 0 {
                return Err(FundError::InvalidAmount);
            }
            let mut fund = state.fund;
            self.distributor.fund_pool(&mut fund, amount, now)?;
            Changes {
                fund,
                paused: state.paused,
                participant: None,
                transfer: Some((sender, Transfer::In(amount))),
            }
        };

        let new_balance = changes.fund.balance;
        self.commit(changes)?;
        info!(
            "Pool funded: participant={} amount={} balance={}",
            sender, amount, new_balance
        );
        self.emit(EngineEvent::PoolFunded {
            participant: sender,
            amount,
            new_balance,
            timestamp: now,
        });
        Ok(())
    }

    /// Suspend every state-changing operation
    pub fn pause(&self, ctx: &CallContext) -> Result<()> {
        self.set_paused(ctx, true)
    }

    /// Resume state-changing operations
    pub fn unpause(&self, ctx: &CallContext) -> Result<()> {
        self.set_paused(ctx, false)
    }

    fn set_paused(&self, ctx: &CallContext, paused: bool) -> Result<()> {
        let _call = self.enter()?;
        let sender = resolve_sender(self.relayers.as_ref(), ctx);
        if sender != self.admin {
            warn!("Rejected pause change from non-admin {}", sender);
            return Err(FundError::Unauthorized);
        }
        let now = self.clock.now();

        let changes = {
            let state = self.state.read();
            if state.paused == paused {
                return Ok(());
            }
            Changes {
                fund: state.fund,
                paused,
                participant: None,
                transfer: None,
            }
        };

        self.commit(changes)?;
        let event = if paused {
            info!("Engine paused by {}", sender);
            EngineEvent::Paused {
                admin: sender,
                timestamp: now,
            }
        } else {
            info!("Engine unpaused by {}", sender);
            EngineEvent::Unpaused {
                admin: sender,
                timestamp: now,
            }
        };
        self.emit(event);
        Ok(())
    }

    // === Read operations ===

    /// Stored fund state, as of the last state change
    pub fn get_fund(&self) -> GlobalFundState {
        self.state.read().fund
    }

    /// Open positions in current index order
    pub fn get_positions(&self, who: &ParticipantId) -> Vec<Position> {
        self.state.read().orders.get(who).to_vec()
    }

    /// Yield claimable right now
    pub fn get_pending_yield(&self, who: &ParticipantId) -> Result<Amount> {
        let now = self.clock.now();
        let state = self.state.read();
        self.distributor
            .projected_pending(&state.account(who), state.fund, now)
    }

    /// Reputation and debt bookkeeping for a participant
    pub fn get_participant(&self, who: &ParticipantId) -> ParticipantAccount {
        self.state.read().account(who)
    }

    /// Reputation `amount` would earn in tier `tier_index`
    pub fn preview_reputation(&self, amount: Amount, tier_index: usize) -> Result<u128> {
        self.catalog.reputation_for(amount, tier_index)
    }

    pub fn tiers(&self) -> &TierCatalog {
        &self.catalog
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().paused
    }

    pub fn admin(&self) -> ParticipantId {
        self.admin
    }

    pub fn annual_rate(&self) -> u128 {
        self.distributor.annual_rate()
    }

    /// Principal locked across all open positions
    pub fn total_principal(&self) -> Amount {
        self.state.read().fund.total_principal
    }

    /// Every participant with an account, sorted
    pub fn participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.state.read().accounts.keys().copied().collect();
        ids.sort();
        ids
    }

    // === Internals ===

    fn enter(&self) -> Result<CallGuard<'_>> {
        let gate = self.gate.lock();
        if gate.get() {
            warn!("Re-entrant call rejected");
            return Err(FundError::ReentrantCall);
        }
        gate.set(true);
        Ok(CallGuard { gate })
    }

    fn emit(&self, event: EngineEvent) {
        debug!("Emitting {}", event.name());
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Move value, persist, then install `changes`
    fn commit(&self, changes: Changes) -> Result<()> {
        if let Some((who, transfer)) = changes.transfer {
            self.move_value(&who, transfer)?;
        }

        if let Err(e) = self.persist(&changes) {
            warn!("Failed to persist engine state: {}", e);
            if let Some((who, transfer)) = changes.transfer {
                self.reverse_value(&who, transfer);
            }
            return Err(e);
        }

        let mut state = self.state.write();
        state.fund = changes.fund;
        state.paused = changes.paused;
        if let Some((who, record)) = changes.participant {
            if record.is_empty() {
                state.accounts.remove(&who);
            } else {
                state.accounts.insert(who, record.account);
            }
            state.orders.replace(who, record.positions);
        }
        Ok(())
    }

    fn move_value(&self, who: &ParticipantId, transfer: Transfer) -> Result<()> {
        match transfer {
            Transfer::In(amount) => self.ledger.transfer_in(who, amount),
            Transfer::Out(amount) => self.ledger.transfer_out(who, amount),
        }
    }

    fn reverse_value(&self, who: &ParticipantId, transfer: Transfer) {
        let result = match transfer {
            Transfer::In(amount) => self.ledger.transfer_out(who, amount),
            Transfer::Out(amount) => self.ledger.transfer_in(who, amount),
        };
        if let Err(e) = result {
            error!("Failed to reverse {:?} for {}: {}", transfer, who, e);
        }
    }

    fn persist(&self, changes: &Changes) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let mut batch = WriteBatch::new();
        let fund = FundRecord {
            fund: changes.fund,
            paused: changes.paused,
        };
        batch.put(FUND_KEY, codec::encode(&fund)?);

        if let Some((who, record)) = &changes.participant {
            if record.is_empty() {
                batch.delete(participant_key(who));
            } else {
                batch.put(participant_key(who), codec::encode(record)?);
            }
        }
        if let Some((who, _)) = &changes.transfer {
            self.ledger.stage_records(who, &mut batch)?;
        }
        store.write(batch)
    }
}
