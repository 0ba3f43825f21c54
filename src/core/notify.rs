//! Best-effort notifications about ledger outcomes.
//!
//! Notifiers run after the database transaction has committed. A failing
//! notifier is logged and otherwise ignored; it can never undo a credit or a
//! payment confirmation.

use crate::entities::pending_revenue::RevenueType;
use thiserror::Error;
use tracing::{info, warn};

/// Something a user or operator may want to hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// A pending entry was approved and its wallet credited
    RevenueApproved {
        /// Approved entry
        entry_id: i64,
        /// Credited wallet
        wallet_id: i64,
        /// Kind of accrual
        revenue_type: RevenueType,
        /// Amount accrued at creation time
        original_amount: i64,
        /// Amount actually credited
        credited_amount: i64,
    },
    /// A pending entry was rejected
    RevenueRejected {
        /// Rejected entry
        entry_id: i64,
        /// Wallet that was not credited
        wallet_id: i64,
        /// Kind of accrual
        revenue_type: RevenueType,
        /// Amount that will not be paid
        amount: i64,
        /// Reason given by the admin
        note: String,
    },
    /// A bank transfer settled an invoice
    TransferMatched {
        /// Settled intent
        intent_id: i64,
        /// Paid invoice
        invoice_id: i64,
        /// Amount received
        amount: i64,
    },
}

/// Delivery failure reported by a notifier
#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Receives ledger events once they are durable
pub trait Notifier: Send + Sync {
    /// Delivers one event. Errors are logged by the caller and dropped.
    fn notify(&self, event: &LedgerEvent) -> Result<(), NotifyError>;
}

/// Notifier that only writes the event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &LedgerEvent) -> Result<(), NotifyError> {
        info!(?event, "Ledger event");
        Ok(())
    }
}

pub(crate) fn dispatch(notifier: &dyn Notifier, event: &LedgerEvent) {
    if let Err(err) = notifier.notify(event) {
        warn!(error = %err, ?event, "Notifier failed; ledger state is unaffected");
    }
}
