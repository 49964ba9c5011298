//! Observable engine events

use prodfund_core::{Amount, ParticipantId, Timestamp};
use serde::{Deserialize, Serialize};

/// Events emitted after a state change commits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Position created
    PositionOpened {
        participant: ParticipantId,
        order_index: usize,
        amount: Amount,
        tier_index: u8,
        reputation: u128,
        timestamp: Timestamp,
    },
    /// Position closed and principal returned
    PositionClosed {
        participant: ParticipantId,
        order_index: usize,
        amount: Amount,
        reputation: u128,
        timestamp: Timestamp,
    },
    /// Yield paid out of the pool
    YieldClaimed {
        participant: ParticipantId,
        amount: Amount,
        timestamp: Timestamp,
    },
    /// External value added to the pool
    PoolFunded {
        participant: ParticipantId,
        amount: Amount,
        new_balance: Amount,
        timestamp: Timestamp,
    },
    /// State changes suspended
    Paused {
        admin: ParticipantId,
        timestamp: Timestamp,
    },
    /// State changes resumed
    Unpaused {
        admin: ParticipantId,
        timestamp: Timestamp,
    },
}

impl EngineEvent {
    /// Identity that triggered the event
    pub fn participant(&self) -> &ParticipantId {
        match self {
            Self::PositionOpened { participant, .. }
            | Self::PositionClosed { participant, .. }
            | Self::YieldClaimed { participant, .. }
            | Self::PoolFunded { participant, .. } => participant,
            Self::Paused { admin, .. } | Self::Unpaused { admin, .. } => admin,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::PositionOpened { timestamp, .. }
            | Self::PositionClosed { timestamp, .. }
            | Self::YieldClaimed { timestamp, .. }
            | Self::PoolFunded { timestamp, .. }
            | Self::Paused { timestamp, .. }
            | Self::Unpaused { timestamp, .. } => *timestamp,
        }
    }

    /// Short event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::PositionOpened { .. } => "PositionOpened",
            Self::PositionClosed { .. } => "PositionClosed",
            Self::YieldClaimed { .. } => "YieldClaimed",
            Self::PoolFunded { .. } => "PoolFunded",
            Self::Paused { .. } => "Paused",
            Self::Unpaused { .. } => "Unpaused",
        }
    }
}
