//! # Production Fund Engine
//!
//! Proportional, time-weighted reward accounting. Participants lock principal
//! into fixed-duration tiers and receive reputation; the shared pool generates
//! yield continuously at a fixed annual rate and distributes it pro rata to
//! reputation through a lazily updated accumulator.
//!
//! ## Accumulator
//!
//! ```text
//!   generated = balance * rate * elapsed / (WAD * SECONDS_PER_YEAR)
//!   applied   = min(generated, balance - reserved)
//!   index    += applied * WAD / total_reputation
//!   pending   = accrued + reputation * index / WAD - debt
//! ```
//!
//! ## Modules
//!
//! - `distributor` - accumulator sync and per-participant settlement
//! - `orders` - per-participant position lists with swap-remove
//! - `sender` - relayed-call sender resolution
//! - `ledger` - value movement in and out of custody
//! - `engine` - the guarded, transactional facade
//! - `events` - committed-change notifications
//! - `config` - file/env configuration

pub mod config;
pub mod distributor;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod orders;
pub mod sender;

// Re-exports
pub use config::{EngineConfig, EngineSection, LoggingConfig, StorageConfig, TierConfig};
pub use distributor::{GlobalFundState, ParticipantAccount, ProductionDistributor};
pub use engine::{EngineSettings, ProductionEngine};
pub use events::EngineEvent;
pub use ledger::{BalanceBook, BookSnapshot, ValueLedger};
pub use orders::{OrderManager, Position};
pub use sender::{resolve_data, resolve_sender, CallContext, RelayerRegistry, TrustedForwarders};
