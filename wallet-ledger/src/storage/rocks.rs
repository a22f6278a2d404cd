//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Current wallet records (key: wallet_id)
//! - `owners` - Owner lookup (key: owner_id, value: wallet_id)
//! - `entries` - Append-only entry log (key: entry_id, big endian)
//! - `indices` - Per-wallet time index (key: wallet_id || timestamp || entry_id)
//! - `meta` - Entry sequence
//!
//! Every commit is a single `WriteBatch`. Version checks and sequence
//! allocation happen under a short commit mutex, so two commits never
//! validate against the same stored versions.

use super::{
    check_version, commit_time, stamp, Committed, LedgerStore, TransactionLog, UnitOfWork,
    WalletStore,
};
use crate::{
    types::{EntryId, LedgerEntry, OwnerId, Wallet, WalletId},
    Config, Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::sync::Arc;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_OWNERS: &str = "owners";
const CF_ENTRIES: &str = "entries";
const CF_INDICES: &str = "indices";
const CF_META: &str = "meta";

const META_NEXT_ENTRY_ID: &[u8] = b"next_entry_id";

/// RocksDB-backed ledger store
pub struct RocksStore {
    db: Arc<DB>,
    // Guards version checks; holds the next entry ID
    commit_lock: Mutex<EntryId>,
    sync_writes: bool,
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_OWNERS, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let next_entry_id = {
            let cf_meta = Self::cf(&db, CF_META)?;
            match db.get_cf(&cf_meta, META_NEXT_ENTRY_ID)? {
                Some(bytes) => decode_u64(&bytes)?,
                None => 1,
            }
        };

        tracing::info!(?path, next_entry_id, "Opened RocksDB wallet store");

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Mutex::new(next_entry_id),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // State is frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf<'a>(db: &'a DB, name: &str) -> Result<Arc<BoundColumnFamily<'a>>> {
        db.cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        Self::cf(&self.db, name)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    fn get_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        match self.db.get_cf(&cf, wallet_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn get_entry(&self, entry_id: EntryId) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let value = self
            .db
            .get_cf(&cf, entry_id.to_be_bytes())?
            .ok_or_else(|| Error::Storage(format!("Entry {} missing from log", entry_id)))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Scan the time index of one wallet
    fn scan_index(&self, wallet_id: WalletId, mode: IteratorMode<'_>) -> Result<Vec<EntryId>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = wallet_id.as_bytes();
        let mut ids = Vec::new();

        for item in self.db.iterator_cf(&cf, mode) {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            ids.push(index_entry_id(&key)?);
        }

        Ok(ids)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl WalletStore for RocksStore {
    fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Option<Wallet>> {
        let cf = self.cf_handle(CF_OWNERS)?;
        let Some(bytes) = self.db.get_cf(&cf, owner_id.as_str().as_bytes())? else {
            return Ok(None);
        };
        let wallet_id = decode_wallet_id(&bytes)?;
        self.get_wallet(wallet_id)?.map(Some).ok_or_else(|| {
            Error::Storage(format!("Owner index points at missing wallet {}", wallet_id))
        })
    }

    fn exists_by_owner(&self, owner_id: &OwnerId) -> Result<bool> {
        let cf = self.cf_handle(CF_OWNERS)?;
        Ok(self.db.get_cf(&cf, owner_id.as_str().as_bytes())?.is_some())
    }

    fn insert(&self, wallet: Wallet) -> Result<Wallet> {
        let _guard = self.commit_lock.lock();

        if self.exists_by_owner(&wallet.owner_id)? {
            return Err(Error::DuplicateWallet(wallet.owner_id.to_string()));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &self.cf_handle(CF_WALLETS)?,
            wallet.id.as_bytes(),
            bincode::serialize(&wallet)?,
        );
        batch.put_cf(
            &self.cf_handle(CF_OWNERS)?,
            wallet.owner_id.as_str().as_bytes(),
            wallet.id.as_bytes(),
        );
        self.write(batch)?;

        tracing::debug!(wallet_id = %wallet.id, owner_id = %wallet.owner_id, "Wallet inserted");
        Ok(wallet)
    }

    fn count(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_OWNERS)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

impl TransactionLog for RocksStore {
    fn list_for_wallet(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        let mut upper = wallet_id.as_bytes().to_vec();
        upper.extend_from_slice(&[0xff; 16]);

        self.scan_index(wallet_id, IteratorMode::From(&upper[..], Direction::Reverse))?
            .into_iter()
            .map(|id| self.get_entry(id))
            .collect()
    }

    fn latest_at_or_before(
        &self,
        wallet_id: WalletId,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>> {
        let seek = index_key(wallet_id, timestamp, EntryId::MAX);
        let cf = self.cf_handle(CF_INDICES)?;

        let mut iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&seek[..], Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                if !key.starts_with(wallet_id.as_bytes()) {
                    return Ok(None);
                }
                Ok(Some(self.get_entry(index_entry_id(&key)?)?))
            }
            None => Ok(None),
        }
    }

    fn entry_count(&self) -> Result<u64> {
        Ok(*self.commit_lock.lock() - 1)
    }
}

impl LedgerStore for RocksStore {
    fn commit(&self, unit: UnitOfWork) -> Result<Committed> {
        unit.validate()?;
        let order = unit.lock_order();
        let (staged, new_entries) = unit.into_parts();

        let mut next_entry_id = self.commit_lock.lock();

        // Stored versions, read in canonical order
        let mut stored = Vec::with_capacity(order.len());
        for wallet_id in &order {
            let wallet = self
                .get_wallet(*wallet_id)?
                .ok_or_else(|| Error::Storage(format!("Wallet {} not found in store", wallet_id)))?;
            stored.push(wallet);
        }
        for wallet in &staged {
            if let Some(current) = stored.iter().find(|s| s.id == wallet.id) {
                check_version(wallet, current)?;
            }
        }

        let now = commit_time(&stored);
        let committed = stamp(staged, new_entries, *next_entry_id, now);
        let after = *next_entry_id + committed.entries.len() as EntryId;

        let mut batch = WriteBatch::default();

        // 1. Wallets
        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        for wallet in &committed.wallets {
            batch.put_cf(&cf_wallets, wallet.id.as_bytes(), bincode::serialize(wallet)?);
        }

        // 2. Entries and their time index
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        for entry in &committed.entries {
            batch.put_cf(&cf_entries, entry.id.to_be_bytes(), bincode::serialize(entry)?);
            batch.put_cf(
                &cf_indices,
                index_key(entry.wallet_id, entry.timestamp, entry.id),
                b"",
            );
        }

        // 3. Sequence
        batch.put_cf(&self.cf_handle(CF_META)?, META_NEXT_ENTRY_ID, after.to_be_bytes());

        // Atomic commit
        self.write(batch)?;
        *next_entry_id = after;

        tracing::debug!(
            wallets = committed.wallets.len(),
            entries = committed.entries.len(),
            next_entry_id = after,
            "Unit of work committed"
        );

        Ok(committed)
    }
}

// Key helpers

/// Order-preserving encoding of a signed nanosecond timestamp
fn timestamp_key(timestamp: DateTime<Utc>) -> [u8; 8] {
    let nanos = timestamp.timestamp_nanos_opt().unwrap_or(if timestamp.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    });
    ((nanos as u64) ^ (1 << 63)).to_be_bytes()
}

fn index_key(wallet_id: WalletId, timestamp: DateTime<Utc>, entry_id: EntryId) -> Vec<u8> {
    let mut key = wallet_id.as_bytes().to_vec();
    key.extend_from_slice(&timestamp_key(timestamp));
    key.extend_from_slice(&entry_id.to_be_bytes());
    key
}

fn index_entry_id(key: &[u8]) -> Result<EntryId> {
    if key.len() != 32 {
        return Err(Error::Storage(format!("Malformed index key of {} bytes", key.len())));
    }
    decode_u64(&key[24..32])
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("Expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn decode_wallet_id(bytes: &[u8]) -> Result<WalletId> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("Expected 16-byte wallet id, got {}", bytes.len())))?;
    Ok(WalletId::from_uuid(uuid::Uuid::from_bytes(raw)))
}
