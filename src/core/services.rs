//! Collaborators shared by ledger operations.

use crate::config::settings::{ReconciliationSettings, RetrySettings};
use crate::core::notify::{LogNotifier, Notifier};
use std::sync::Arc;

/// Notifier, retry policy and replay window handed to every state-changing
/// operation
#[derive(Clone)]
pub struct LedgerServices {
    /// Receives events after commit
    pub notifier: Arc<dyn Notifier>,
    /// Backoff for the wallet-credit path
    pub retry: RetrySettings,
    /// How far back a repeated transfer still counts as already paid
    pub replay_window_hours: i64,
}

impl LedgerServices {
    /// Builds services from explicit collaborators
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, retry: RetrySettings) -> Self {
        Self {
            notifier,
            retry,
            replay_window_hours: ReconciliationSettings::default().replay_window_hours,
        }
    }

    #[must_use]
    pub fn with_replay_window_hours(mut self, hours: i64) -> Self {
        self.replay_window_hours = hours;
        self
    }
}

impl Default for LedgerServices {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier), RetrySettings::default())
    }
}

impl std::fmt::Debug for LedgerServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerServices")
            .field("retry", &self.retry)
            .field("replay_window_hours", &self.replay_window_hours)
            .finish_non_exhaustive()
    }
}
