//! Storage collaborators
//!
//! The engine talks to two logical stores:
//!
//! - [`WalletStore`] - current wallet records, keyed by owner
//! - [`TransactionLog`] - append-only ledger entries, queryable by wallet and time
//!
//! Writes to both go through a [`UnitOfWork`]: wallet saves and entry appends are
//! staged in memory and handed to [`LedgerStore::commit`], which applies all of
//! them or none. Dropping an uncommitted unit discards it.
//!
//! # Commit rules (all backends)
//!
//! - Every staged wallet must carry the version currently stored, otherwise
//!   the commit fails with [`Error::ConcurrencyConflict`]
//! - Saved wallets get `version + 1` and `updated_at = commit time`
//! - Entries get strictly increasing IDs in staging order and the commit time
//!   as timestamp
//! - Commit time never goes backwards for a wallet

use crate::{
    config::StorageBackend,
    types::{EntryId, LedgerEntry, NewEntry, OwnerId, Wallet, WalletId},
    Config, Error, Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

/// Keyed persistence of current wallet records
pub trait WalletStore: Send + Sync {
    /// Wallet owned by `owner_id`, if any
    fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Option<Wallet>>;

    /// Whether `owner_id` already has a wallet
    fn exists_by_owner(&self, owner_id: &OwnerId) -> Result<bool> {
        Ok(self.find_by_owner(owner_id)?.is_some())
    }

    /// Insert a brand new wallet; fails with `DuplicateWallet` if the owner has one
    fn insert(&self, wallet: Wallet) -> Result<Wallet>;

    /// Number of wallets
    fn count(&self) -> Result<u64>;
}

/// Append-only persistence of ledger entries
pub trait TransactionLog: Send + Sync {
    /// All entries of a wallet, newest first
    fn list_for_wallet(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>>;

    /// Entry with the greatest `(timestamp, id)` not after `timestamp`
    fn latest_at_or_before(
        &self,
        wallet_id: WalletId,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>>;

    /// Number of entries across all wallets
    fn entry_count(&self) -> Result<u64>;
}

/// Both stores plus the atomic commit primitive
pub trait LedgerStore: WalletStore + TransactionLog {
    /// Apply every staged change atomically, or none of them
    fn commit(&self, unit: UnitOfWork) -> Result<Committed>;

    /// Storage statistics
    fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            wallets: self.count()?,
            entries: self.entry_count()?,
        })
    }
}

/// Open the store selected by the configuration
pub fn open_store(config: &Config) -> Result<Arc<dyn LedgerStore>> {
    match config.storage {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory wallet store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Rocksdb => Ok(Arc::new(RocksStore::open(config)?)),
    }
}

/// Staged wallet saves and entry appends
#[derive(Debug, Default)]
pub struct UnitOfWork {
    wallets: Vec<Wallet>,
    entries: Vec<NewEntry>,
}

impl UnitOfWork {
    /// Empty unit
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a wallet write. Staging the same wallet twice keeps the latest copy.
    pub fn save(&mut self, wallet: Wallet) -> &mut Self {
        match self.wallets.iter_mut().find(|staged| staged.id == wallet.id) {
            Some(staged) => *staged = wallet,
            None => self.wallets.push(wallet),
        }
        self
    }

    /// Stage an entry append
    pub fn append(&mut self, entry: NewEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Staged wallets
    pub fn wallets(&self) -> &[Wallet] {
        &self.wallets
    }

    /// Staged entries, in append order
    pub fn entries(&self) -> &[NewEntry] {
        &self.entries
    }

    /// Nothing staged
    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty() && self.entries.is_empty()
    }

    /// Wallet IDs in the order their commit guards must be taken
    pub fn lock_order(&self) -> Vec<WalletId> {
        let mut ids: Vec<WalletId> = self.wallets.iter().map(|w| w.id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Check the staged change set before touching storage
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvariantViolation(
                "Cannot commit an empty unit of work".to_string(),
            ));
        }

        for wallet in &self.wallets {
            if wallet.balance < Decimal::ZERO {
                return Err(Error::InvariantViolation(format!(
                    "Wallet {} would have negative balance {}",
                    wallet.id, wallet.balance
                )));
            }
        }

        for entry in &self.entries {
            if !self.wallets.iter().any(|w| w.id == entry.wallet_id) {
                return Err(Error::InvariantViolation(format!(
                    "Entry for wallet {} staged without its wallet update",
                    entry.wallet_id
                )));
            }
            if entry.kind.is_transfer() != entry.related_wallet_id.is_some() {
                return Err(Error::InvariantViolation(format!(
                    "{} entry has inconsistent counterparty",
                    entry.kind
                )));
            }
        }

        Ok(())
    }

    pub(crate) fn into_parts(self) -> (Vec<Wallet>, Vec<NewEntry>) {
        (self.wallets, self.entries)
    }
}

/// What a successful commit wrote
#[derive(Debug, Clone)]
pub struct Committed {
    /// Saved wallets, with bumped versions
    pub wallets: Vec<Wallet>,
    /// Appended entries, with assigned IDs and timestamps
    pub entries: Vec<LedgerEntry>,
}

impl Committed {
    /// Saved copy of one wallet
    pub fn wallet(&self, id: WalletId) -> Option<&Wallet> {
        self.wallets.iter().find(|w| w.id == id)
    }
}

/// Storage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Wallet records
    pub wallets: u64,
    /// Ledger entries
    pub entries: u64,
}

/// Version check for a staged wallet against the stored record
pub(crate) fn check_version(staged: &Wallet, stored: &Wallet) -> Result<()> {
    if staged.version != stored.version {
        return Err(Error::ConcurrencyConflict(format!(
            "wallet {} is at version {}, write was based on {}",
            stored.id, stored.version, staged.version
        )));
    }
    Ok(())
}

/// Commit time: wall clock, but never before the wallets' last update
pub(crate) fn commit_time<'a>(stored: impl IntoIterator<Item = &'a Wallet>) -> DateTime<Utc> {
    stored
        .into_iter()
        .map(|w| w.updated_at)
        .fold(Utc::now(), |now, last| now.max(last))
}

/// Stamp staged wallets and entries with commit metadata
pub(crate) fn stamp(
    wallets: Vec<Wallet>,
    entries: Vec<NewEntry>,
    first_entry_id: EntryId,
    now: DateTime<Utc>,
) -> Committed {
    let wallets = wallets
        .into_iter()
        .map(|mut wallet| {
            wallet.version += 1;
            wallet.updated_at = now;
            wallet
        })
        .collect();

    let entries = entries
        .into_iter()
        .zip(first_entry_id..)
        .map(|(entry, id)| entry.into_entry(id, now))
        .collect();

    Committed { wallets, entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OwnerId;

    fn wallet(owner: &str) -> Wallet {
        Wallet::new(OwnerId::new(owner), Utc::now())
    }

    #[test]
    fn test_empty_unit_rejected() {
        let unit = UnitOfWork::new();
        assert!(unit.is_empty());
        assert!(matches!(unit.validate(), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_save_same_wallet_keeps_latest() {
        let mut w = wallet("alice");
        let mut unit = UnitOfWork::new();
        unit.save(w.clone());
        w.balance = Decimal::new(500, 2);
        unit.save(w.clone());

        assert_eq!(unit.wallets().len(), 1);
        assert_eq!(unit.wallets()[0].balance, Decimal::new(500, 2));
    }

    #[test]
    fn test_entry_requires_wallet_update() {
        let mut w = wallet("alice");
        w.deposit(Decimal::new(100, 2)).unwrap();

        let mut unit = UnitOfWork::new();
        unit.append(NewEntry::deposit(&w, Decimal::new(100, 2), None));
        assert!(matches!(unit.validate(), Err(Error::InvariantViolation(_))));

        unit.save(w);
        assert!(unit.validate().is_ok());
    }

    #[test]
    fn test_negative_balance_rejected() {
        let mut w = wallet("alice");
        w.balance = Decimal::new(-1, 2);
        let mut unit = UnitOfWork::new();
        unit.save(w);
        assert!(matches!(unit.validate(), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_lock_order_is_sorted() {
        let a = wallet("alice");
        let b = wallet("bob");
        let mut unit = UnitOfWork::new();
        unit.save(b.clone()).save(a.clone());

        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(unit.lock_order(), expected);
    }

    #[test]
    fn test_stamp_assigns_sequential_ids() {
        let mut w = wallet("alice");
        w.deposit(Decimal::new(100, 2)).unwrap();
        let first = NewEntry::deposit(&w, Decimal::new(100, 2), None);
        w.deposit(Decimal::new(100, 2)).unwrap();
        let second = NewEntry::deposit(&w, Decimal::new(100, 2), None);

        let now = Utc::now();
        let committed = stamp(vec![w.clone()], vec![first, second], 10, now);
        assert_eq!(committed.wallets[0].version, 1);
        assert_eq!(committed.wallets[0].updated_at, now);
        assert_eq!(committed.entries[0].id, 10);
        assert_eq!(committed.entries[1].id, 11);
        assert!(committed.entries.iter().all(|e| e.timestamp == now));
    }

    #[test]
    fn test_commit_time_never_goes_backwards() {
        let mut w = wallet("alice");
        w.updated_at = Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(commit_time([&w]), w.updated_at);
    }
}
