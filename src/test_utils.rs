//! Shared test utilities for the revenue ledger.
//!
//! This module provides common helper functions for setting up test databases
//! and creating wallets, ledger entries and invoices with sensible defaults.

#![allow(clippy::unwrap_used)]

use crate::{
    config::settings::{CodeModeSetting, RetrySettings},
    core::{
        invoice,
        ledger,
        notify::{LedgerEvent, Notifier, NotifyError},
        reconciliation::UniqueCodePolicy,
        services::LedgerServices,
        wallet,
    },
    entities::{self, pending_revenue::RevenueType},
    errors::Result,
};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};
use tempfile::TempDir;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database with a pool of several
/// connections, so concurrent transactions really overlap.
/// Keep the returned directory alive for the duration of the test.
pub async fn setup_concurrent_test_db() -> Result<(DatabaseConnection, TempDir)> {
    let dir = TempDir::new()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.sqlite").display());
    let mut options = ConnectOptions::new(url);
    options.max_connections(4).min_connections(2).sqlx_logging(false);

    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok((db, dir))
}

/// Creates (or fetches) the wallet owned by `user_id`.
pub async fn create_test_wallet(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<entities::wallet::Model> {
    wallet::get_or_create_wallet(db, user_id).await
}

/// Sets up a complete test environment with one empty wallet.
/// Returns (db, wallet) for common test scenarios.
///
/// # Defaults
/// * `user_id`: `"test_user"`
pub async fn setup_with_wallet() -> Result<(DatabaseConnection, entities::wallet::Model)> {
    let db = setup_test_db().await?;
    let wallet = create_test_wallet(&db, "test_user").await?;
    Ok((db, wallet))
}

/// Creates a pending affiliate commission without a transaction reference.
pub async fn create_test_entry(
    db: &DatabaseConnection,
    wallet_id: i64,
    amount: i64,
) -> Result<entities::pending_revenue::Model> {
    ledger::create_pending_revenue(db, wallet_id, RevenueType::AffiliateCommission, amount, None)
        .await
}

static NEXT_INVOICE: AtomicU64 = AtomicU64::new(1);

/// Creates an unpaid invoice with a unique `INV-TEST-n` reference.
pub async fn create_test_invoice(
    db: &DatabaseConnection,
    amount: i64,
) -> Result<entities::invoice::Model> {
    let n = NEXT_INVOICE.fetch_add(1, Ordering::Relaxed);
    invoice::create_invoice(db, &format!("INV-TEST-{n}"), amount).await
}

/// Policy that always draws `code`, applied per `mode` when there is room.
pub fn fixed_policy(code: i64, mode: CodeModeSetting) -> UniqueCodePolicy {
    UniqueCodePolicy {
        enabled: true,
        min: code,
        max: code,
        mode,
        max_resample_attempts: 1,
        replay_window_hours: 168,
    }
}

/// Notifier that keeps every event it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LedgerEvent>>,
}

impl RecordingNotifier {
    /// Events received so far, oldest first
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &LedgerEvent) -> std::result::Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Notifier that always fails
#[derive(Debug, Default)]
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&self, _event: &LedgerEvent) -> std::result::Result<(), NotifyError> {
        Err(NotifyError("webhook unreachable".to_string()))
    }
}

fn fast_retry() -> RetrySettings {
    RetrySettings {
        min_delay_ms: 1,
        max_delay_ms: 5,
        max_retries: 3,
    }
}

/// Services with a [`RecordingNotifier`], returned alongside for assertions.
pub fn recording_services() -> (LedgerServices, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let services = LedgerServices::new(Arc::<RecordingNotifier>::clone(&notifier), fast_retry());
    (services, notifier)
}

/// Services whose notifier always fails.
pub fn failing_services() -> LedgerServices {
    LedgerServices::new(Arc::new(FailingNotifier), fast_retry())
}
