//! Prometheus metrics for transfers
//!
//! # Metrics
//!
//! - `stock_ledger_transfers_total{kind}` - Committed transfers
//! - `stock_ledger_transfers_failed_total{reason}` - Rejected or failed transfers by error kind
//! - `stock_ledger_transfer_duration_seconds` - Histogram of committed transfer latencies
//! - `stock_ledger_units_transferred_total{kind}` - Units moved by committed transfers
//!
//! Every collector is registered on the registry owned by [`Metrics`], never the
//! process-wide default, so independent ledgers can coexist in one process.

use crate::types::TransferKind;
use crate::ErrorKind;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed transfers by kind
    pub transfers_total: IntCounterVec,

    /// Failed transfers by error kind
    pub transfers_failed: IntCounterVec,

    /// Transfer duration histogram
    pub transfer_duration: Histogram,

    /// Units moved by kind
    pub units_transferred: IntCounterVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_total = IntCounterVec::new(
            Opts::new("stock_ledger_transfers_total", "Total number of committed transfers"),
            &["kind"],
        )?;
        registry.register(Box::new(transfers_total.clone()))?;

        let transfers_failed = IntCounterVec::new(
            Opts::new(
                "stock_ledger_transfers_failed_total",
                "Total number of failed transfers",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(transfers_failed.clone()))?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "stock_ledger_transfer_duration_seconds",
                "Histogram of transfer latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        let units_transferred = IntCounterVec::new(
            Opts::new(
                "stock_ledger_units_transferred_total",
                "Total number of units moved by committed transfers",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(units_transferred.clone()))?;

        Ok(Self {
            transfers_total,
            transfers_failed,
            transfer_duration,
            units_transferred,
            registry,
        })
    }

    /// Record a committed transfer
    pub fn record_transfer(&self, kind: TransferKind, units: u64, duration_seconds: f64) {
        self.transfers_total.with_label_values(&[kind.label()]).inc();
        self.units_transferred
            .with_label_values(&[kind.label()])
            .inc_by(units);
        self.transfer_duration.observe(duration_seconds);
    }

    /// Record a failed transfer
    pub fn record_failure(&self, reason: ErrorKind) {
        self.transfers_failed
            .with_label_values(&[reason.label()])
            .inc();
    }

    /// Committed transfers of `kind` so far
    pub fn transfers(&self, kind: TransferKind) -> u64 {
        self.transfers_total.with_label_values(&[kind.label()]).get()
    }

    /// Failed transfers with `reason` so far
    pub fn failures(&self, reason: ErrorKind) -> u64 {
        self.transfers_failed
            .with_label_values(&[reason.label()])
            .get()
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.transfers(TransferKind::OwnerPurchase), 0);
        assert_eq!(metrics.failures(ErrorKind::Conflict), 0);
    }

    #[test]
    fn test_independent_registries() {
        // Two collectors in one process must not clash
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_failure(ErrorKind::Validation);
        assert_eq!(first.failures(ErrorKind::Validation), 1);
        assert_eq!(second.failures(ErrorKind::Validation), 0);
    }

    #[test]
    fn test_record_transfer() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transfer(TransferKind::CustomerPurchase, 7, 0.002);
        metrics.record_transfer(TransferKind::CustomerPurchase, 3, 0.004);

        assert_eq!(metrics.transfers(TransferKind::CustomerPurchase), 2);
        assert_eq!(metrics.transfers(TransferKind::OwnerPurchase), 0);
        assert_eq!(
            metrics
                .units_transferred
                .with_label_values(&["customer_purchase"])
                .get(),
            10
        );
        assert_eq!(metrics.transfer_duration.get_sample_count(), 2);
    }

    #[test]
    fn test_render_exposition() {
        let metrics = Metrics::new().unwrap();
        metrics.record_failure(ErrorKind::InsufficientStock);

        let text = metrics.render().unwrap();
        assert!(text.contains("stock_ledger_transfers_failed_total"));
        assert!(text.contains("insufficient_stock"));
    }
}
