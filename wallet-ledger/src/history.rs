//! Point-in-time balances and log replay
//!
//! The balance at instant `T` is the `balance_after` of the wallet's last
//! entry (by `(timestamp, id)`) recorded at or before `T`, or zero when there
//! is none. Reads only; nothing here writes.

use crate::{
    storage::TransactionLog,
    types::{HistoricalWallet, LedgerEntry, ReplayReport, Wallet, WalletId},
    Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Resolves balances as of past instants from the transaction log
pub struct HistoricalBalanceResolver<L: TransactionLog + ?Sized> {
    log: Arc<L>,
}

impl<L: TransactionLog + ?Sized> HistoricalBalanceResolver<L> {
    /// Create resolver over a log
    pub fn new(log: Arc<L>) -> Self {
        Self { log }
    }

    /// Balance of `wallet_id` in effect at `at`
    pub fn balance_at(&self, wallet_id: WalletId, at: DateTime<Utc>) -> Result<Decimal> {
        let balance = self
            .log
            .latest_at_or_before(wallet_id, at)?
            .map(|entry| entry.balance_after)
            .unwrap_or(Decimal::ZERO);

        tracing::debug!(%wallet_id, %at, %balance, "Resolved historical balance");
        Ok(balance)
    }

    /// Wallet record as it stood at `at`
    pub fn snapshot(&self, wallet: &Wallet, at: DateTime<Utc>) -> Result<HistoricalWallet> {
        Ok(HistoricalWallet {
            id: wallet.id,
            owner_id: wallet.owner_id.clone(),
            balance: self.balance_at(wallet.id, at)?,
            created_at: wallet.created_at,
            as_of: at,
            predates_wallet: at < wallet.created_at,
        })
    }
}

impl<L: TransactionLog + ?Sized> std::fmt::Debug for HistoricalBalanceResolver<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoricalBalanceResolver").finish_non_exhaustive()
    }
}

/// Replay a wallet's entries from zero and compare against the stored record
///
/// Entries may be given in any order; they are replayed by `(timestamp, id)`.
pub fn replay(wallet: &Wallet, entries: &[LedgerEntry]) -> ReplayReport {
    let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
    ordered.sort_by_key(|entry| entry.ordering_key());

    let mut running = Decimal::ZERO;
    let mut mismatched_entries = Vec::new();
    let mut went_negative = false;

    for entry in ordered {
        running += entry.amount;
        if running < Decimal::ZERO {
            went_negative = true;
        }
        if running != entry.balance_after {
            mismatched_entries.push(entry.id);
        }
    }

    ReplayReport {
        wallet_id: wallet.id,
        entry_count: entries.len(),
        replayed_balance: running,
        recorded_balance: wallet.balance,
        mismatched_entries,
        went_negative,
    }
}
