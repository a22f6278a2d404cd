//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the engine.
//!
//! # Metrics
//!
//! - `wallet_created_total` - Wallets created
//! - `wallet_operations_total{operation}` - Successful mutations
//! - `wallet_operation_failures_total{operation,category}` - Rejected mutations
//! - `wallet_conflict_retries_total` - Optimistic retries
//! - `wallet_operation_duration_seconds{operation}` - Mutation latency

use crate::error::ErrorCategory;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use std::sync::Arc;

/// Mutating engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Wallet creation
    CreateWallet,
    /// Deposit
    Deposit,
    /// Withdrawal
    Withdraw,
    /// Two-wallet transfer
    Transfer,
}

impl Operation {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateWallet => "create_wallet",
            Operation::Deposit => "deposit",
            Operation::Withdraw => "withdraw",
            Operation::Transfer => "transfer",
        }
    }
}

fn category_label(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::NotFound => "not_found",
        ErrorCategory::Conflict => "conflict",
        ErrorCategory::BadInput => "bad_input",
        ErrorCategory::Transient => "transient",
        ErrorCategory::ServerFault => "server_fault",
    }
}

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Wallets created
    pub wallets_created: IntCounter,

    /// Successful mutations by operation
    pub operations: IntCounterVec,

    /// Failed mutations by operation and error category
    pub failures: IntCounterVec,

    /// Optimistic retries
    pub conflict_retries: IntCounter,

    /// Mutation latency by operation
    pub operation_duration: HistogramVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let wallets_created = IntCounter::new("wallet_created_total", "Wallets created")?;
        registry.register(Box::new(wallets_created.clone()))?;

        let operations = IntCounterVec::new(
            Opts::new("wallet_operations_total", "Successful wallet mutations"),
            &["operation"],
        )?;
        registry.register(Box::new(operations.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new(
                "wallet_operation_failures_total",
                "Rejected wallet mutations",
            ),
            &["operation", "category"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let conflict_retries = IntCounter::new(
            "wallet_conflict_retries_total",
            "Optimistic concurrency retries",
        )?;
        registry.register(Box::new(conflict_retries.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "wallet_operation_duration_seconds",
                "Histogram of mutation latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            wallets_created,
            operations,
            failures,
            conflict_retries,
            operation_duration,
            registry,
        })
    }

    /// Latency histogram for one operation
    pub fn duration(&self, operation: Operation) -> Histogram {
        self.operation_duration
            .with_label_values(&[operation.as_str()])
    }

    /// Record a successful mutation
    pub fn record_success(&self, operation: Operation) {
        self.operations
            .with_label_values(&[operation.as_str()])
            .inc();
        if operation == Operation::CreateWallet {
            self.wallets_created.inc();
        }
    }

    /// Record a rejected mutation
    pub fn record_failure(&self, operation: Operation, category: ErrorCategory) {
        self.failures
            .with_label_values(&[operation.as_str(), category_label(category)])
            .inc();
    }

    /// Record an optimistic retry
    pub fn record_conflict_retry(&self) {
        self.conflict_retries.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("wallets_created", &self.wallets_created.get())
            .field("conflict_retries", &self.conflict_retries.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.wallets_created.get(), 0);
        assert_eq!(metrics.conflict_retries.get(), 0);

        // Independent registries, no global name clashes
        let other = Metrics::new().unwrap();
        assert_eq!(other.wallets_created.get(), 0);
    }

    #[test]
    fn test_record_success() {
        let metrics = Metrics::new().unwrap();
        metrics.record_success(Operation::CreateWallet);
        metrics.record_success(Operation::Deposit);
        metrics.record_success(Operation::Deposit);

        assert_eq!(metrics.wallets_created.get(), 1);
        assert_eq!(
            metrics.operations.with_label_values(&["deposit"]).get(),
            2
        );
    }

    #[test]
    fn test_record_failure() {
        let metrics = Metrics::new().unwrap();
        metrics.record_failure(Operation::Withdraw, ErrorCategory::BadInput);
        assert_eq!(
            metrics
                .failures
                .with_label_values(&["withdraw", "bad_input"])
                .get(),
            1
        );
    }

    #[test]
    fn test_registry_gathers_all_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_success(Operation::Transfer);
        metrics.record_failure(Operation::Transfer, ErrorCategory::Transient);
        metrics.duration(Operation::Transfer).observe(0.002);
        metrics.record_conflict_retry();

        let names: Vec<String> = metrics
            .registry()
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"wallet_operations_total".to_string()));
        assert!(names.contains(&"wallet_operation_duration_seconds".to_string()));
        assert!(names.contains(&"wallet_conflict_retries_total".to_string()));
    }
}
