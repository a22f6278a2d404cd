//! Wallet Ledger
//!
//! Per-owner wallets backed by an append-only log of balance changes, with
//! current and point-in-time balance queries.
//!
//! # Architecture
//!
//! - **Unit of Work**: Wallet writes and entry appends commit together or not at all
//! - **Optimistic Concurrency**: Version-checked commits, retried from a fresh read
//! - **Canonical Lock Order**: Multi-wallet commits take guards by ascending wallet ID
//! - **Pluggable Storage**: In-memory or RocksDB behind the same traits
//!
//! # Invariants
//!
//! - Replaying a wallet's entries from zero reproduces every `balance_after`
//!   and the current balance
//! - Balances are never negative
//! - A transfer writes exactly one outgoing and one incoming entry, atomically
//! - One wallet per owner

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod history;
pub mod ledger;
pub mod metrics;
pub mod request;
pub mod storage;
pub mod types;

// Re-exports
pub use config::{Config, EngineConfig, StorageBackend};
pub use error::{Error, ErrorCategory, Result};
pub use history::HistoricalBalanceResolver;
pub use ledger::Ledger;
pub use request::{AmountRequest, TransferRequest};
pub use storage::{LedgerStore, MemoryStore, RocksStore, StorageStats, UnitOfWork};
pub use types::{
    EntryKind, HistoricalWallet, LedgerEntry, OwnerId, ReplayReport, Wallet, WalletId,
};
