//! Error types for the mixing service.

use std::io;

use thiserror::Error;

use crate::pool::PoolState;
use crate::types::{OutPoint, ParticipantId, format_amount};

fn coins(amount: &u64) -> String {
    format_amount(*amount)
}

/// Main error type for the mixing service.
#[derive(Debug, Error)]
pub enum MixingError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Entry rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: PoolState,
        to: PoolState,
    },

    #[error("Mixing is disabled in {0}")]
    Unavailable(&'static str),

    #[error("Mixing is not enabled")]
    Disabled,

    #[error("Mixing requires at least {} to use", coins(.minimum))]
    InsufficientBalance {
        minimum: u64,
    },

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Mixing service has stopped")]
    ServiceStopped,
}

/// Reasons an entry is refused admission. Never a round failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("session is not accepting entries (state {0})")]
    NotAccepting(PoolState),

    #[error("pool is full ({max} entries)")]
    PoolFull {
        max: usize,
    },

    #[error("input {0} is already part of this session")]
    DuplicateInput(OutPoint),

    #[error("entry has no inputs")]
    Empty,

    #[error(
        "inputs total {} but {} x {} plus fee {} is required",
        coins(.total), .inputs, coins(.denomination), coins(.fee)
    )]
    WrongDenomination {
        total: u64,
        inputs: usize,
        denomination: u64,
        fee: u64,
    },

    #[error("outputs do not match the session denomination {}", coins(.denomination))]
    OutputMismatch {
        denomination: u64,
    },

    #[error("{0} already has an entry in this session")]
    DuplicateParticipant(ParticipantId),
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("conflicting mode flags: {0}")]
    ConflictingModes(&'static str),

    #[error("rounds must be > 0")]
    ZeroRounds,

    #[error("max_pool_transactions must be > 0")]
    ZeroPoolSize,

    #[error("min_participants ({min}) must be between 1 and max_pool_transactions ({max})")]
    MinParticipants {
        min: usize,
        max: usize,
    },

    #[error("{0} must be > 0")]
    ZeroDuration(&'static str),

    #[error("denomination ladder is invalid: {0}")]
    Denominations(String),
}

/// Errors reported by the wallet collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("wallet is locked")]
    Locked,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("wallet unavailable: {0}")]
    Unavailable(String),
}

/// A broadcast refused by the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct BroadcastRejection {
    pub reason: String,
}

impl BroadcastRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Transport-level delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Message codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("message of {0} bytes exceeds the size limit")]
    TooLarge(usize),

    #[error("message claims more memory than the decode limit allows")]
    LimitExceeded,
}

/// Logging-related errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[from] io::Error),

    #[error("Subscriber initialization failed: {0}")]
    SubscriberInit(String),

    #[error("Log rotation failed: {0}")]
    RotationFailed(String),
}

/// Type alias for mixing service results.
pub type Result<T> = std::result::Result<T, MixingError>;

/// Type alias for admission results.
pub type AdmissionResult<T> = std::result::Result<T, AdmissionError>;

/// Type alias for wallet results.
pub type WalletResult<T> = std::result::Result<T, WalletError>;

/// Type alias for logging results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;
