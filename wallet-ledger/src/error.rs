//! Error types for the wallet ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// No wallet exists for the owner
    #[error("Wallet not found for owner: {0}")]
    WalletNotFound(String),

    /// Owner already has a wallet
    #[error("Wallet already exists for owner: {0}")]
    DuplicateWallet(String),

    /// Amount is zero, negative or outside the accepted precision
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed request at the boundary (blank owner id, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Operation would drive the balance negative
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Balance at the time of the check
        balance: Decimal,
        /// Amount the operation tried to take out
        requested: Decimal,
    },

    /// Optimistic version check failed
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Atomic two-wallet commit could not complete; nothing was written
    #[error("Transfer aborted: {0}")]
    TransferAborted(String),

    /// Staged change set breaks a ledger invariant
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error (RocksDB, poisoned state, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How an error should be surfaced to a caller of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Looked-up resource does not exist
    NotFound,
    /// Request conflicts with existing state
    Conflict,
    /// Caller supplied bad input
    BadInput,
    /// Transient conflict, safe to retry
    Transient,
    /// Server-side fault
    ServerFault,
}

impl Error {
    /// Category used by a request-handling layer to pick a response
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::WalletNotFound(_) => ErrorCategory::NotFound,
            Error::DuplicateWallet(_) => ErrorCategory::Conflict,
            Error::InvalidAmount(_)
            | Error::InvalidRequest(_)
            | Error::InsufficientFunds { .. } => ErrorCategory::BadInput,
            Error::ConcurrencyConflict(_) => ErrorCategory::Transient,
            Error::TransferAborted(_)
            | Error::InvariantViolation(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Metrics(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorCategory::ServerFault,
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
