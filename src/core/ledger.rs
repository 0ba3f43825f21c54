//! Pending revenue ledger - Accruals waiting for an admin decision.
//!
//! Entries are created in `PENDING` and are never deleted. Creating an entry
//! also raises the wallet's pending counter in the same transaction; the
//! approval workflow in `core::approval` is the only code that moves an entry
//! out of `PENDING`.

use crate::{
    core::wallet,
    entities::{
        PendingRevenue, Wallet,
        pending_revenue::{self, RevenueStatus, RevenueType},
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// Optional filters for [`list_pending_revenues`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevenueFilter {
    /// Only entries in this state
    pub status: Option<RevenueStatus>,
    /// Only entries for this wallet
    pub wallet_id: Option<i64>,
    /// Only entries of this kind
    pub revenue_type: Option<RevenueType>,
}

/// Counters shown on the admin pending-revenue dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingRevenueStats {
    /// All entries
    pub total: u64,
    /// Entries awaiting a decision
    pub pending: u64,
    /// Approved entries
    pub approved: u64,
    /// Rejected entries
    pub rejected: u64,
    /// Sum of `amount` over pending entries
    pub total_pending_amount: i64,
    /// Sum of `resolved_amount` over approved entries
    pub total_paid_amount: i64,
}

/// Inserts a pending entry and raises the wallet's pending counter, inside
/// the caller's transaction.
pub(crate) async fn insert_pending_revenue<C>(
    db: &C,
    wallet_id: i64,
    revenue_type: RevenueType,
    amount: i64,
    transaction_ref: Option<String>,
) -> Result<pending_revenue::Model>
where
    C: ConnectionTrait,
{
    if amount <= 0 {
        return Err(Error::InvalidAmount { amount });
    }

    Wallet::find_by_id(wallet_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("wallet", wallet_id))?;

    let entry = pending_revenue::ActiveModel {
        wallet_id: Set(wallet_id),
        revenue_type: Set(revenue_type),
        amount: Set(amount),
        status: Set(RevenueStatus::Pending),
        resolved_amount: Set(None),
        note: Set(None),
        transaction_ref: Set(transaction_ref),
        resolved_by: Set(None),
        created_at: Set(Utc::now()),
        resolved_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;

    wallet::adjust_pending(db, wallet_id, amount).await?;

    info!(
        entry_id = entry.id,
        wallet_id,
        %revenue_type,
        amount,
        transaction_ref = ?entry.transaction_ref,
        "Pending revenue accrued"
    );
    Ok(entry)
}

/// Records a new accrual in `PENDING`.
///
/// Fails with [`Error::InvalidAmount`] for non-positive amounts and
/// [`Error::NotFound`] when the wallet does not exist.
#[instrument(skip(db))]
pub async fn create_pending_revenue(
    db: &DatabaseConnection,
    wallet_id: i64,
    revenue_type: RevenueType,
    amount: i64,
    transaction_ref: Option<String>,
) -> Result<pending_revenue::Model> {
    if amount <= 0 {
        return Err(Error::InvalidAmount { amount });
    }

    let txn = db.begin().await?;
    let entry = insert_pending_revenue(&txn, wallet_id, revenue_type, amount, transaction_ref).await?;
    txn.commit().await?;
    Ok(entry)
}

/// Finds a pending revenue entry by ID, whatever its state.
pub async fn get_pending_revenue(
    db: &DatabaseConnection,
    entry_id: i64,
) -> Result<Option<pending_revenue::Model>> {
    PendingRevenue::find_by_id(entry_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists entries matching `filter`, newest first.
pub async fn list_pending_revenues(
    db: &DatabaseConnection,
    filter: RevenueFilter,
) -> Result<Vec<pending_revenue::Model>> {
    let mut query = PendingRevenue::find();
    if let Some(status) = filter.status {
        query = query.filter(pending_revenue::Column::Status.eq(status));
    }
    if let Some(wallet_id) = filter.wallet_id {
        query = query.filter(pending_revenue::Column::WalletId.eq(wallet_id));
    }
    if let Some(revenue_type) = filter.revenue_type {
        query = query.filter(pending_revenue::Column::RevenueType.eq(revenue_type));
    }

    query
        .order_by_desc(pending_revenue::Column::CreatedAt)
        .order_by_desc(pending_revenue::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Computes the dashboard counters over every entry.
pub async fn pending_revenue_stats(db: &DatabaseConnection) -> Result<PendingRevenueStats> {
    let rows: Vec<(RevenueStatus, i64, Option<i64>)> = PendingRevenue::find()
        .select_only()
        .column(pending_revenue::Column::Status)
        .column(pending_revenue::Column::Amount)
        .column(pending_revenue::Column::ResolvedAmount)
        .into_tuple()
        .all(db)
        .await?;

    let stats = rows.into_iter().fold(
        PendingRevenueStats::default(),
        |mut stats, (status, amount, resolved_amount)| {
            stats.total += 1;
            match status {
                RevenueStatus::Pending => {
                    stats.pending += 1;
                    stats.total_pending_amount += amount;
                }
                RevenueStatus::Approved => {
                    stats.approved += 1;
                    stats.total_paid_amount += resolved_amount.unwrap_or(amount);
                }
                RevenueStatus::Rejected => stats.rejected += 1,
            }
            stats
        },
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_create_pending_revenue_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        for amount in [0, -100] {
            let result =
                create_pending_revenue(&db, 1, RevenueType::AffiliateCommission, amount, None).await;
            assert!(matches!(result, Err(Error::InvalidAmount { .. })));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_create_pending_revenue_unknown_wallet() -> Result<()> {
        let db = setup_test_db().await?;

        let result =
            create_pending_revenue(&db, 404, RevenueType::FounderShare, 1_000, None).await;
        assert!(matches!(result, Err(Error::NotFound { entity: "wallet", .. })));
        assert!(list_pending_revenues(&db, RevenueFilter::default()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_create_pending_revenue_starts_pending() -> Result<()> {
        let (db, wallet) = setup_with_wallet().await?;

        let entry = create_pending_revenue(
            &db,
            wallet.id,
            RevenueType::MentorShare,
            42_000,
            Some("TX-100".to_string()),
        )
        .await?;

        assert_eq!(entry.status, RevenueStatus::Pending);
        assert_eq!(entry.amount, 42_000);
        assert_eq!(entry.resolved_amount, None);
        assert_eq!(entry.resolved_at, None);
        assert_eq!(entry.transaction_ref.as_deref(), Some("TX-100"));

        // Accrual raises the pending counter only
        let wallet = crate::core::wallet::get_wallet(&db, wallet.id).await?.unwrap();
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.balance_pending, 42_000);

        let found = get_pending_revenue(&db, entry.id).await?.unwrap();
        assert_eq!(found, entry);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_pending_revenues_filters() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_wallet(&db, "alice").await?;
        let bob = create_test_wallet(&db, "bob").await?;

        create_test_entry(&db, alice.id, 1_000).await?;
        create_test_entry(&db, alice.id, 2_000).await?;
        create_pending_revenue(&db, bob.id, RevenueType::CofounderShare, 3_000, None).await?;

        let all = list_pending_revenues(&db, RevenueFilter::default()).await?;
        assert_eq!(all.len(), 3);
        // Newest first
        assert_eq!(all[0].amount, 3_000);

        let alice_only = list_pending_revenues(
            &db,
            RevenueFilter {
                wallet_id: Some(alice.id),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(alice_only.len(), 2);

        let cofounder_only = list_pending_revenues(
            &db,
            RevenueFilter {
                revenue_type: Some(RevenueType::CofounderShare),
                status: Some(RevenueStatus::Pending),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(cofounder_only.len(), 1);
        assert_eq!(cofounder_only[0].wallet_id, bob.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_revenue_stats_empty() -> Result<()> {
        let db = setup_test_db().await?;
        assert_eq!(pending_revenue_stats(&db).await?, PendingRevenueStats::default());
        Ok(())
    }
}
