//! In-memory store
//!
//! Each wallet lives behind its own mutex; a commit locks the wallets it touches
//! in ascending wallet-ID order, checks versions, appends the entries and
//! writes the wallets back before releasing any guard.

use super::{
    check_version, commit_time, stamp, Committed, LedgerStore, TransactionLog, UnitOfWork,
    WalletStore,
};
use crate::{
    types::{EntryId, LedgerEntry, OwnerId, Wallet, WalletId},
    Error, Result,
};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Entry log, guarded as a whole so IDs follow append order
#[derive(Debug, Default)]
struct EntryLog {
    next_id: EntryId,
    by_wallet: HashMap<WalletId, Vec<LedgerEntry>>,
    total: u64,
}

/// Process-local ledger store
#[derive(Debug)]
pub struct MemoryStore {
    wallets: DashMap<WalletId, Arc<Mutex<Wallet>>>,
    owners: DashMap<OwnerId, WalletId>,
    log: RwLock<EntryLog>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
            owners: DashMap::new(),
            log: RwLock::new(EntryLog {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    fn handle(&self, wallet_id: WalletId) -> Result<Arc<Mutex<Wallet>>> {
        self.wallets
            .get(&wallet_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| Error::Storage(format!("Wallet {} not found in store", wallet_id)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletStore for MemoryStore {
    fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Option<Wallet>> {
        let Some(wallet_id) = self.owners.get(owner_id).map(|id| *id.value()) else {
            return Ok(None);
        };
        let wallet = self.handle(wallet_id)?.lock().clone();
        Ok(Some(wallet))
    }

    fn exists_by_owner(&self, owner_id: &OwnerId) -> Result<bool> {
        Ok(self.owners.contains_key(owner_id))
    }

    fn insert(&self, wallet: Wallet) -> Result<Wallet> {
        match self.owners.entry(wallet.owner_id.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateWallet(wallet.owner_id.to_string())),
            Entry::Vacant(slot) => {
                self.wallets.insert(wallet.id, Arc::new(Mutex::new(wallet.clone())));
                slot.insert(wallet.id);
                tracing::debug!(
                    wallet_id = %wallet.id,
                    owner_id = %wallet.owner_id,
                    "Wallet inserted"
                );
                Ok(wallet)
            }
        }
    }

    fn count(&self) -> Result<u64> {
        Ok(self.owners.len() as u64)
    }
}

impl TransactionLog for MemoryStore {
    fn list_for_wallet(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        let log = self.log.read();
        let mut entries = log.by_wallet.get(&wallet_id).cloned().unwrap_or_default();
        entries.sort_by_key(|e| std::cmp::Reverse(e.ordering_key()));
        Ok(entries)
    }

    fn latest_at_or_before(
        &self,
        wallet_id: WalletId,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>> {
        let log = self.log.read();
        let latest = log
            .by_wallet
            .get(&wallet_id)
            .and_then(|entries| {
                entries
                    .iter()
                    .filter(|e| e.timestamp <= timestamp)
                    .max_by_key(|e| e.ordering_key())
            })
            .cloned();
        Ok(latest)
    }

    fn entry_count(&self) -> Result<u64> {
        Ok(self.log.read().total)
    }
}

impl LedgerStore for MemoryStore {
    fn commit(&self, unit: UnitOfWork) -> Result<Committed> {
        unit.validate()?;
        let order = unit.lock_order();
        let (staged, new_entries) = unit.into_parts();

        // Guards in canonical order, held until the end of the commit
        let handles = order
            .iter()
            .map(|id| self.handle(*id))
            .collect::<Result<Vec<_>>>()?;
        let mut guards: Vec<_> = handles.iter().map(|handle| handle.lock()).collect();

        for wallet in &staged {
            let stored = guards
                .iter()
                .find(|guard| guard.id == wallet.id)
                .ok_or_else(|| Error::Storage(format!("Wallet {} not locked", wallet.id)))?;
            check_version(wallet, stored)?;
        }

        let now = commit_time(guards.iter().map(|guard| &**guard));

        let mut log = self.log.write();
        let committed = stamp(staged, new_entries, log.next_id, now);
        log.next_id += committed.entries.len() as EntryId;
        log.total += committed.entries.len() as u64;
        for entry in &committed.entries {
            log.by_wallet
                .entry(entry.wallet_id)
                .or_default()
                .push(entry.clone());
        }
        drop(log);

        for wallet in &committed.wallets {
            if let Some(guard) = guards.iter_mut().find(|guard| guard.id == wallet.id) {
                **guard = wallet.clone();
            }
        }

        tracing::debug!(
            wallets = committed.wallets.len(),
            entries = committed.entries.len(),
            "Unit of work committed"
        );

        Ok(committed)
    }
}
