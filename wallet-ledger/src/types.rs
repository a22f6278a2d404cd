//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Append-only history (entries are never mutated once committed)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Wallet identifier (UUIDv7 for time-ordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletId(Uuid);

impl WalletId {
    /// Generate a fresh wallet ID
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Raw bytes (storage keys)
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner identifier, unique across wallets
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create new owner ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty or whitespace-only
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OwnerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Ledger entry identifier, strictly increasing in append order
pub type EntryId = u64;

/// Kind of balance-changing event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// Money paid in by the owner
    Deposit,
    /// Money taken out by the owner
    Withdrawal,
    /// Incoming leg of a transfer
    TransferIn,
    /// Outgoing leg of a transfer
    TransferOut,
}

impl EntryKind {
    /// Stable code
    pub fn code(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "DEPOSIT",
            EntryKind::Withdrawal => "WITHDRAWAL",
            EntryKind::TransferIn => "TRANSFER_IN",
            EntryKind::TransferOut => "TRANSFER_OUT",
        }
    }

    /// Inflows carry a positive amount, outflows a negative one
    pub fn is_inflow(&self) -> bool {
        matches!(self, EntryKind::Deposit | EntryKind::TransferIn)
    }

    /// Transfer legs must name the counterparty wallet
    pub fn is_transfer(&self) -> bool {
        matches!(self, EntryKind::TransferIn | EntryKind::TransferOut)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Current-state projection of one owner's ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID
    pub id: WalletId,

    /// Owner, one wallet per owner
    pub owner_id: OwnerId,

    /// Current balance, never negative
    pub balance: Decimal,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last successful mutation
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency counter
    pub version: u64,
}

impl Wallet {
    /// New zero-balance wallet
    pub fn new(owner_id: OwnerId, now: DateTime<Utc>) -> Self {
        Self {
            id: WalletId::generate(),
            owner_id,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Credit the wallet, returning the new balance
    pub fn deposit(&mut self, amount: Decimal) -> Result<Decimal> {
        ensure_positive(amount)?;
        self.balance += amount;
        Ok(self.balance)
    }

    /// Debit the wallet, returning the new balance
    pub fn withdraw(&mut self, amount: Decimal) -> Result<Decimal> {
        ensure_positive(amount)?;
        if self.balance < amount {
            return Err(Error::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        Ok(self.balance)
    }
}

/// Engine-level amount check. Precision is validated at the boundary.
pub(crate) fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

/// Committed, immutable record of one balance change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID (assigned at append)
    pub id: EntryId,

    /// Owning wallet
    pub wallet_id: WalletId,

    /// Signed amount: positive for inflows, negative for outflows
    pub amount: Decimal,

    /// Kind of event
    pub kind: EntryKind,

    /// Free-text description
    pub description: Option<String>,

    /// Instant the entry was recorded
    pub timestamp: DateTime<Utc>,

    /// Wallet balance immediately after this entry
    pub balance_after: Decimal,

    /// Counterparty wallet (transfers only)
    pub related_wallet_id: Option<WalletId>,
}

impl LedgerEntry {
    /// Per-wallet total order
    pub fn ordering_key(&self) -> (DateTime<Utc>, EntryId) {
        (self.timestamp, self.id)
    }
}

/// Entry staged in a unit of work; the store assigns `id` and `timestamp`
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    /// Owning wallet
    pub wallet_id: WalletId,
    /// Signed amount
    pub amount: Decimal,
    /// Kind of event
    pub kind: EntryKind,
    /// Free-text description
    pub description: Option<String>,
    /// Wallet balance immediately after this entry
    pub balance_after: Decimal,
    /// Counterparty wallet (transfers only)
    pub related_wallet_id: Option<WalletId>,
}

impl NewEntry {
    /// Deposit entry for a wallet that already has the amount applied
    pub fn deposit(wallet: &Wallet, amount: Decimal, description: Option<String>) -> Self {
        Self::build(wallet, EntryKind::Deposit, amount, description, None)
    }

    /// Withdrawal entry for a wallet that already has the amount applied
    pub fn withdrawal(wallet: &Wallet, amount: Decimal, description: Option<String>) -> Self {
        Self::build(wallet, EntryKind::Withdrawal, amount, description, None)
    }

    /// Outgoing transfer leg
    pub fn transfer_out(
        wallet: &Wallet,
        amount: Decimal,
        description: Option<String>,
        counterparty: WalletId,
    ) -> Self {
        Self::build(wallet, EntryKind::TransferOut, amount, description, Some(counterparty))
    }

    /// Incoming transfer leg
    pub fn transfer_in(
        wallet: &Wallet,
        amount: Decimal,
        description: Option<String>,
        counterparty: WalletId,
    ) -> Self {
        Self::build(wallet, EntryKind::TransferIn, amount, description, Some(counterparty))
    }

    fn build(
        wallet: &Wallet,
        kind: EntryKind,
        amount: Decimal,
        description: Option<String>,
        related_wallet_id: Option<WalletId>,
    ) -> Self {
        let magnitude = amount.abs();
        Self {
            wallet_id: wallet.id,
            amount: if kind.is_inflow() { magnitude } else { -magnitude },
            kind,
            description,
            balance_after: wallet.balance,
            related_wallet_id,
        }
    }

    /// Finalize with the store-assigned ID and timestamp
    pub fn into_entry(self, id: EntryId, timestamp: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id,
            wallet_id: self.wallet_id,
            amount: self.amount,
            kind: self.kind,
            description: self.description,
            timestamp,
            balance_after: self.balance_after,
            related_wallet_id: self.related_wallet_id,
        }
    }
}

/// Wallet as it stood at a past instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalWallet {
    /// Wallet ID
    pub id: WalletId,
    /// Owner
    pub owner_id: OwnerId,
    /// Balance in effect at `as_of`
    pub balance: Decimal,
    /// Creation timestamp of the wallet
    pub created_at: DateTime<Utc>,
    /// Instant the balance was resolved for
    pub as_of: DateTime<Utc>,
    /// `as_of` is earlier than the wallet's creation; balance is zero
    pub predates_wallet: bool,
}

/// Result of replaying a wallet's log against its record
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    /// Wallet that was replayed
    pub wallet_id: WalletId,
    /// Number of entries replayed
    pub entry_count: usize,
    /// Sum of all signed amounts
    pub replayed_balance: Decimal,
    /// Balance stored on the wallet record
    pub recorded_balance: Decimal,
    /// Entries whose `balance_after` disagrees with the running sum
    pub mismatched_entries: Vec<EntryId>,
    /// Running sum dropped below zero at some point
    pub went_negative: bool,
}

impl ReplayReport {
    /// Replay reproduced every cached balance and the current one
    pub fn is_consistent(&self) -> bool {
        self.replayed_balance == self.recorded_balance
            && self.mismatched_entries.is_empty()
            && !self.went_negative
    }
}
