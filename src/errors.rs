//! Unified error types for the revenue ledger.
//!
//! Validation and state errors are returned as-is and never retried. Only
//! database errors classified by [`Error::is_transient`] are retried, and only
//! on the wallet-credit path.

use sea_orm::DbErr;
use thiserror::Error;

/// All errors surfaced by ledger and reconciliation operations
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced record does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up (e.g. `"wallet"`)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// A status change was requested from a state that does not allow it
    #[error("Invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        /// Kind of record
        entity: &'static str,
        /// Record identifier
        id: i64,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Monetary amount is zero, negative or overflows
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: i64,
    },

    /// A debit would drive the wallet balance below zero
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Balance at the time of the debit
        balance: i64,
        /// Amount that was requested
        requested: i64,
    },

    /// Input rejected before any state change
    #[error("Validation error: {message}")]
    Validation {
        /// Human-readable reason
        message: String,
    },

    /// No awaiting payment intent resolves to this amount
    #[error("No awaiting payment matches amount {amount}")]
    NoMatch {
        /// Transferred amount
        amount: i64,
    },

    /// More than one awaiting payment intent resolves to this amount
    #[error("Amount {amount} matches several awaiting payments: {intent_ids:?}")]
    AmbiguousMatch {
        /// Transferred amount
        amount: i64,
        /// Candidate intents, for manual disambiguation
        intent_ids: Vec<i64>,
    },

    /// Every unique code in the configured range is taken for this amount
    #[error("No free unique code left for invoice amount {invoice_amount}")]
    UniqueCodeExhausted {
        /// Nominal invoice amount
        invoice_amount: i64,
    },

    /// Storage stayed unavailable after the bounded retries
    #[error("Transient storage error: {message}")]
    Transient {
        /// Last underlying error
        message: String,
    },

    /// Configuration could not be read or is inconsistent
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable reason
        message: String,
    },

    /// Underlying `SeaORM` error
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for storage errors worth retrying: pool exhaustion, lost
    /// connections, lock contention and serialization failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Database(DbErr::ConnectionAcquire(_) | DbErr::Conn(_)) => true,
            Self::Database(err) => {
                let message = err.to_string().to_lowercase();
                ["database is locked", "database is busy", "deadlock", "could not serialize"]
                    .iter()
                    .any(|needle| message.contains(needle))
            }
            _ => false,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
