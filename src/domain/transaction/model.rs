//! Transaction domain entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Transaction is active
    Active,
    /// Transaction completed
    Completed,
}

/// Charging session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i32,
    pub charge_point_id: String,
    pub connector_id: u32,
    /// ID tag that started the transaction
    pub id_tag: String,
    /// Meter value at start (Wh)
    pub meter_start: i32,
    /// Meter value at stop (Wh)
    pub meter_stop: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
    pub status: TransactionStatus,
}

impl Transaction {
    pub fn new(
        id: i32,
        charge_point_id: impl Into<String>,
        connector_id: u32,
        id_tag: impl Into<String>,
        meter_start: i32,
    ) -> Self {
        Self {
            id,
            charge_point_id: charge_point_id.into(),
            connector_id,
            id_tag: id_tag.into(),
            meter_start,
            meter_stop: None,
            started_at: Utc::now(),
            stopped_at: None,
            stop_reason: None,
            status: TransactionStatus::Active,
        }
    }

    pub fn stop(&mut self, meter_stop: i32, reason: Option<String>) {
        self.meter_stop = Some(meter_stop);
        self.stopped_at = Some(Utc::now());
        self.stop_reason = reason;
        self.status = TransactionStatus::Completed;
    }

    /// Energy delivered in Wh, once stopped. Never negative.
    pub fn energy_consumed(&self) -> Option<i64> {
        self.meter_stop
            .map(|stop| (i64::from(stop) - i64::from(self.meter_start)).max(0))
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction::new(1, "A001", 1, "CARD-001", 1000)
    }

    #[test]
    fn new_transaction_is_active() {
        let tx = sample_tx();
        assert!(tx.is_active());
        assert_eq!(tx.meter_start, 1000);
        assert!(tx.meter_stop.is_none());
        assert!(tx.stopped_at.is_none());
    }

    #[test]
    fn stop_sets_completed() {
        let mut tx = sample_tx();
        tx.stop(5000, Some("EVDisconnected".into()));
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.meter_stop, Some(5000));
        assert_eq!(tx.stop_reason.as_deref(), Some("EVDisconnected"));
        assert!(!tx.is_active());
    }

    #[test]
    fn energy_consumed_after_stop() {
        let mut tx = sample_tx();
        assert_eq!(tx.energy_consumed(), None);
        tx.stop(6000, None);
        assert_eq!(tx.energy_consumed(), Some(5000));
    }

    #[test]
    fn meter_rollback_books_nothing() {
        let mut tx = sample_tx();
        tx.stop(900, None);
        assert_eq!(tx.energy_consumed(), Some(0));
    }
}
