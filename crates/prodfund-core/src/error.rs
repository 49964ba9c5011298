//! Error types for production fund operations

use thiserror::Error;

/// Result type alias for fund operations
pub type Result<T> = std::result::Result<T, FundError>;

/// Errors that can occur in production fund operations
///
/// Every error is a rejected operation: the engine never applies a partial
/// mutation before returning one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FundError {
    // === Input Validation ===
    /// Zero amount supplied
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    /// Tier index outside the catalog
    #[error("Invalid tier index: {0}")]
    InvalidTierIndex(usize),

    /// Position index outside the participant's list
    #[error("Invalid order index {index} (participant holds {len} positions)")]
    InvalidOrderIndex { index: usize, len: usize },

    // === Lifecycle ===
    /// Position still inside its lock period
    #[error("Position locked until {unlock_time}")]
    PositionLocked { unlock_time: i64 },

    /// Nothing pending for the participant
    #[error("No yield to claim")]
    NoYieldToClaim,

    /// State changes are paused
    #[error("System is paused")]
    SystemPaused,

    // === Access Control ===
    /// Caller lacks the privileged identity
    #[error("Unauthorized caller")]
    Unauthorized,

    /// Nested call into a state-changing operation
    #[error("Re-entrant call rejected")]
    ReentrantCall,

    /// Participant identity could not be parsed
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Malformed input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // === Arithmetic ===
    /// Result exceeds the working integer width
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    /// Division by a zero denominator
    #[error("Division by zero")]
    DivisionByZero,

    // === Value Ledger ===
    /// Ledger refused the debit
    #[error("Insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: u128, available: u128 },

    // === Configuration ===
    /// Rejected custom tier table
    #[error("Invalid tier catalog: {0}")]
    InvalidTierCatalog(String),

    // === Storage Errors ===
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FundError {
    /// Get the stable error code
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidAmount => 1001,
            Self::InvalidTierIndex(_) => 1002,
            Self::InvalidOrderIndex { .. } => 1003,
            Self::PositionLocked { .. } => 1004,
            Self::NoYieldToClaim => 1005,
            Self::SystemPaused => 1006,
            Self::Unauthorized => 1007,
            Self::ReentrantCall => 1008,
            Self::InvalidIdentity(_) => 1009,
            Self::InvalidInput(_) => 1010,
            Self::ArithmeticOverflow => 2001,
            Self::DivisionByZero => 2002,
            Self::InsufficientBalance { .. } => 3001,
            Self::InvalidTierCatalog(_) => 4001,
            Self::Storage(_) => 5001,
            Self::Serialization(_) => 5002,
        }
    }

    /// Check if the same call may succeed later without other changes
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::PositionLocked { .. } | Self::ReentrantCall)
    }
}
