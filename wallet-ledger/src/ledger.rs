//! Main ledger orchestration layer
//!
//! This module ties together storage, history and metrics into the
//! owner-facing wallet API.
//!
//! Every mutation runs as a unit of work: read the wallet(s), apply the
//! operation, stage the wallet writes and entry appends, commit. A commit that
//! fails its version check is retried from the read step with a short
//! jittered backoff, so balance checks always run against fresh state.
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use wallet_ledger::{Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> wallet_ledger::Result<()> {
//!     let config = Config::default();
//!     let ledger = Ledger::open(&config)?;
//!
//!     ledger.create_wallet("alice").await?;
//!     ledger.deposit("alice", Decimal::new(10000, 2), None).await?;
//!     let balance = ledger.balance("alice").await?;
//!     assert_eq!(balance, Decimal::new(10000, 2));
//!
//!     Ok(())
//! }
//! ```

use crate::{
    config::EngineConfig,
    history::{replay, HistoricalBalanceResolver},
    metrics::{Metrics, Operation},
    request::{AmountRequest, TransferRequest},
    storage::{open_store, Committed, LedgerStore, StorageStats, UnitOfWork},
    types::{
        ensure_positive, HistoricalWallet, LedgerEntry, NewEntry, OwnerId, ReplayReport, Wallet,
        WalletId,
    },
    Config, Error, Result,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::Duration;

/// Main ledger interface
pub struct Ledger {
    /// Wallet store, transaction log and commit primitive
    store: Arc<dyn LedgerStore>,

    /// Point-in-time reads over the same log
    history: HistoricalBalanceResolver<dyn LedgerStore>,

    /// Operation counters
    metrics: Metrics,

    /// Retry policy
    engine: EngineConfig,
}

impl Ledger {
    /// Create ledger over an existing store
    pub fn new(store: Arc<dyn LedgerStore>, engine: EngineConfig) -> Result<Self> {
        Ok(Self {
            history: HistoricalBalanceResolver::new(Arc::clone(&store)),
            store,
            metrics: Metrics::new()?,
            engine,
        })
    }

    /// Open ledger over the store selected by the configuration
    pub fn open(config: &Config) -> Result<Self> {
        let store = open_store(config)?;
        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            backend = ?config.storage,
            "Ledger opened"
        );
        Self::new(store, config.engine.clone())
    }

    /// Create a zero-balance wallet for `owner_id`
    pub async fn create_wallet(&self, owner_id: impl Into<OwnerId>) -> Result<Wallet> {
        let owner_id = owner_id.into();

        let wallet = self
            .run(Operation::CreateWallet, || {
                self.store.insert(Wallet::new(owner_id.clone(), Utc::now()))
            })
            .await?;

        tracing::info!(owner_id = %owner_id, wallet_id = %wallet.id, "Wallet created");
        Ok(wallet)
    }

    /// Credit `amount` to the owner's wallet
    pub async fn deposit(
        &self,
        owner_id: impl Into<OwnerId>,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Wallet> {
        let owner_id = owner_id.into();

        let wallet = self
            .run(Operation::Deposit, || {
                ensure_positive(amount)?;
                let mut wallet = self.load(&owner_id)?;
                wallet.deposit(amount)?;

                let wallet_id = wallet.id;
                let mut unit = UnitOfWork::new();
                unit.append(NewEntry::deposit(&wallet, amount, description.clone()))
                    .save(wallet);
                saved(self.store.commit(unit)?, wallet_id)
            })
            .await?;

        tracing::info!(
            owner_id = %owner_id,
            %amount,
            balance = %wallet.balance,
            version = wallet.version,
            "Deposit committed"
        );
        Ok(wallet)
    }

    /// Debit `amount` from the owner's wallet
    pub async fn withdraw(
        &self,
        owner_id: impl Into<OwnerId>,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Wallet> {
        let owner_id = owner_id.into();

        let wallet = self
            .run(Operation::Withdraw, || {
                ensure_positive(amount)?;
                let mut wallet = self.load(&owner_id)?;
                // Checked against the balance read in this attempt
                wallet.withdraw(amount)?;

                let wallet_id = wallet.id;
                let mut unit = UnitOfWork::new();
                unit.append(NewEntry::withdrawal(&wallet, amount, description.clone()))
                    .save(wallet);
                saved(self.store.commit(unit)?, wallet_id)
            })
            .await?;

        tracing::info!(
            owner_id = %owner_id,
            %amount,
            balance = %wallet.balance,
            version = wallet.version,
            "Withdrawal committed"
        );
        Ok(wallet)
    }

    /// Move `amount` from one owner's wallet to another's
    ///
    /// Both wallet updates and both entries commit together or not at all.
    /// Returns the updated source wallet.
    pub async fn transfer(
        &self,
        source_owner_id: impl Into<OwnerId>,
        target_owner_id: impl Into<OwnerId>,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Wallet> {
        let source_owner_id = source_owner_id.into();
        let target_owner_id = target_owner_id.into();

        let outgoing = description
            .clone()
            .unwrap_or_else(|| format!("Transfer to {}", target_owner_id));
        let incoming =
            description.unwrap_or_else(|| format!("Transfer from {}", source_owner_id));

        let source = self
            .run(Operation::Transfer, || {
                ensure_positive(amount)?;
                let mut unit = UnitOfWork::new();

                let source_id = if source_owner_id == target_owner_id {
                    // Out then in against the same wallet; net zero
                    let mut wallet = self.load(&source_owner_id)?;
                    wallet.withdraw(amount)?;
                    unit.append(NewEntry::transfer_out(
                        &wallet,
                        amount,
                        Some(outgoing.clone()),
                        wallet.id,
                    ));
                    wallet.deposit(amount)?;
                    unit.append(NewEntry::transfer_in(
                        &wallet,
                        amount,
                        Some(incoming.clone()),
                        wallet.id,
                    ));

                    let wallet_id = wallet.id;
                    unit.save(wallet);
                    wallet_id
                } else {
                    let (mut source, mut target) =
                        self.load_pair(&source_owner_id, &target_owner_id)?;
                    source.withdraw(amount)?;
                    target.deposit(amount)?;

                    unit.append(NewEntry::transfer_out(
                        &source,
                        amount,
                        Some(outgoing.clone()),
                        target.id,
                    ))
                    .append(NewEntry::transfer_in(
                        &target,
                        amount,
                        Some(incoming.clone()),
                        source.id,
                    ));

                    let source_id = source.id;
                    unit.save(source).save(target);
                    source_id
                };

                let committed = self.store.commit(unit).map_err(abort_transfer)?;
                saved(committed, source_id)
            })
            .await?;

        tracing::info!(
            source = %source_owner_id,
            target = %target_owner_id,
            %amount,
            source_balance = %source.balance,
            "Transfer committed"
        );
        Ok(source)
    }

    /// Validate a typed transfer request and execute it
    pub async fn transfer_request(&self, request: TransferRequest) -> Result<Wallet> {
        request.validate()?;
        self.transfer(
            request.source_owner_id,
            request.target_owner_id,
            request.amount,
            request.description,
        )
        .await
    }

    /// Validate a typed deposit request and execute it
    pub async fn deposit_request(&self, request: AmountRequest) -> Result<Wallet> {
        request.validate()?;
        self.deposit(request.owner_id, request.amount, request.description).await
    }

    /// Validate a typed withdrawal request and execute it
    pub async fn withdraw_request(&self, request: AmountRequest) -> Result<Wallet> {
        request.validate()?;
        self.withdraw(request.owner_id, request.amount, request.description).await
    }

    /// Current wallet record
    pub async fn wallet(&self, owner_id: impl Into<OwnerId>) -> Result<Wallet> {
        self.load(&owner_id.into())
    }

    /// Current balance
    pub async fn balance(&self, owner_id: impl Into<OwnerId>) -> Result<Decimal> {
        Ok(self.load(&owner_id.into())?.balance)
    }

    /// All entries of the owner's wallet, newest first
    pub async fn transactions(&self, owner_id: impl Into<OwnerId>) -> Result<Vec<LedgerEntry>> {
        let wallet = self.load(&owner_id.into())?;
        let entries = self.store.list_for_wallet(wallet.id)?;
        tracing::debug!(wallet_id = %wallet.id, count = entries.len(), "Listed transactions");
        Ok(entries)
    }

    /// Balance in effect at `at`; zero before the first entry
    pub async fn historical_balance(
        &self,
        owner_id: impl Into<OwnerId>,
        at: DateTime<Utc>,
    ) -> Result<Decimal> {
        let wallet = self.load(&owner_id.into())?;
        self.history.balance_at(wallet.id, at)
    }

    /// Wallet as it stood at `at`
    pub async fn historical_wallet(
        &self,
        owner_id: impl Into<OwnerId>,
        at: DateTime<Utc>,
    ) -> Result<HistoricalWallet> {
        let wallet = self.load(&owner_id.into())?;
        self.history.snapshot(&wallet, at)
    }

    /// Replay the owner's log and compare it with the stored wallet
    ///
    /// The wallet is read before and after listing its log; a version change
    /// in between means a commit raced the read, and the pair is read again.
    pub async fn verify_wallet(&self, owner_id: impl Into<OwnerId>) -> Result<ReplayReport> {
        let owner_id = owner_id.into();
        let max_attempts = self.engine.max_attempts.max(1);
        let mut tries = 0;

        let (wallet, entries) = loop {
            tries += 1;
            let wallet = self.load(&owner_id)?;
            let entries = self.store.list_for_wallet(wallet.id)?;
            let current = self.load(&owner_id)?;
            if current.version == wallet.version {
                break (wallet, entries);
            }
            if tries >= max_attempts {
                return Err(Error::ConcurrencyConflict(format!(
                    "wallet {} kept changing during verification",
                    wallet.id
                )));
            }
            tokio::time::sleep(self.backoff(tries)).await;
        };
        let report = replay(&wallet, &entries);

        if !report.is_consistent() {
            tracing::warn!(
                wallet_id = %wallet.id,
                replayed = %report.replayed_balance,
                recorded = %report.recorded_balance,
                mismatched = report.mismatched_entries.len(),
                "Wallet log does not replay to its balance"
            );
        }
        Ok(report)
    }

    /// Wallet and entry counts
    pub async fn stats(&self) -> Result<StorageStats> {
        self.store.stats()
    }

    /// Operation metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn load(&self, owner_id: &OwnerId) -> Result<Wallet> {
        self.store
            .find_by_owner(owner_id)?
            .ok_or_else(|| Error::WalletNotFound(owner_id.to_string()))
    }

    /// Read both transfer wallets in owner order, whatever their roles
    fn load_pair(&self, source: &OwnerId, target: &OwnerId) -> Result<(Wallet, Wallet)> {
        if source <= target {
            let source = self.load(source)?;
            let target = self.load(target)?;
            Ok((source, target))
        } else {
            let target = self.load(target)?;
            let source = self.load(source)?;
            Ok((source, target))
        }
    }

    /// Run one mutation with optimistic retries, timing and counters
    async fn run<T>(
        &self,
        operation: Operation,
        mut attempt: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let _timer = self.metrics.duration(operation).start_timer();
        let max_attempts = self.engine.max_attempts.max(1);
        let mut tries = 0;

        let result = loop {
            tries += 1;
            match attempt() {
                Err(Error::ConcurrencyConflict(reason)) if tries < max_attempts => {
                    self.metrics.record_conflict_retry();
                    tracing::warn!(
                        operation = operation.as_str(),
                        attempt = tries,
                        %reason,
                        "Version conflict, retrying"
                    );
                    tokio::time::sleep(self.backoff(tries)).await;
                }
                other => break other,
            }
        };

        match &result {
            Ok(_) => self.metrics.record_success(operation),
            Err(e) => {
                self.metrics.record_failure(operation, e.category());
                tracing::debug!(operation = operation.as_str(), error = %e, "Operation rejected");
            }
        }
        result
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.engine.retry_backoff_ms;
        let jitter = rand::thread_rng().gen_range(0..=base);
        Duration::from_millis(base.saturating_mul(u64::from(attempt)).saturating_add(jitter))
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("engine", &self.engine)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

fn saved(committed: Committed, wallet_id: WalletId) -> Result<Wallet> {
    committed
        .wallet(wallet_id)
        .cloned()
        .ok_or_else(|| Error::Storage(format!("Commit did not return wallet {}", wallet_id)))
}

/// Storage faults during a transfer commit surface as an aborted transfer
fn abort_transfer(err: Error) -> Error {
    match err {
        Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => {
            Error::TransferAborted(err.to_string())
        }
        other => other,
    }
}
