use dotenvy::dotenv;
use revenue_ledger::{
    config::{database, settings},
    core::{ledger, reconciliation},
    errors::Result,
};
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Makes sure the directory of a file-backed `SQLite` URL exists, since
/// `mode=rwc` creates the file but not its parents.
fn ensure_sqlite_dir(database_url: &str) -> Result<()> {
    let Some(rest) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = rest.split('?').next().unwrap_or_default();
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, non-fatal since env vars can be set externally
    dotenv().ok();

    // 3. Load settings
    let settings = settings::load_default_settings()
        .inspect_err(|e| error!("Failed to load settings: {}", e))?;
    info!(
        unique_codes = settings.reconciliation.unique_code_enabled,
        expiry_hours = settings.reconciliation.expiry_hours,
        "Settings loaded"
    );

    // 4. Connect and ensure tables
    ensure_sqlite_dir(&database::get_database_url())?;
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db).await?;

    // 5. One expiry sweep; the scheduler runs this binary periodically
    let sweep = reconciliation::expire_overdue_intents(&db)
        .await
        .inspect_err(|e| error!("Expiry sweep failed: {}", e))?;
    info!(
        expired = sweep.expired,
        invoices_expired = sweep.invoices_expired,
        swept_at = %sweep.swept_at,
        "Expiry sweep finished"
    );

    let awaiting = reconciliation::list_awaiting_intents(&db).await?;
    let stats = ledger::pending_revenue_stats(&db).await?;
    info!(
        awaiting_transfers = awaiting.len(),
        pending_entries = stats.pending,
        pending_amount = stats.total_pending_amount,
        approved_entries = stats.approved,
        paid_amount = stats.total_paid_amount,
        rejected_entries = stats.rejected,
        "Ledger status"
    );

    Ok(())
}
