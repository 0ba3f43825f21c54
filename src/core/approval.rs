//! Approval workflow - Moves pending revenue to `APPROVED` or `REJECTED`.
//!
//! Approval and the wallet credit are one database transaction. The first
//! statement of every decision is the status compare-and-swap
//! (`UPDATE ... WHERE status = 'PENDING'`), so the transaction takes the write
//! lock before it reads anything. Of two concurrent decisions on the same
//! entry exactly one wins and the other sees [`Error::InvalidTransition`]. A
//! retried approval after a transient failure re-runs the whole transaction
//! and can therefore never credit twice.

use crate::{
    core::{
        notify::{LedgerEvent, dispatch},
        retry::retry_transient,
        services::LedgerServices,
        wallet::{self, LedgerMemo},
    },
    entities::{
        PendingRevenue,
        pending_revenue::{self, RevenueStatus},
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    Set, TransactionTrait,
    prelude::*,
    sea_query::{Expr, SimpleExpr},
};
use tracing::{debug, info, instrument};

/// Admin input for an approval
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalRequest {
    /// Amount to pay instead of the accrued amount; ignored unless positive
    pub adjusted_amount: Option<i64>,
    /// Optional note, e.g. why the amount was adjusted
    pub note: Option<String>,
    /// Admin making the decision
    pub approved_by: Option<String>,
}

/// Amount actually paid: the adjustment when positive, otherwise the accrual.
#[must_use]
pub fn final_amount(entry: &pending_revenue::Model, adjusted_amount: Option<i64>) -> i64 {
    match adjusted_amount {
        Some(adjusted) if adjusted > 0 => adjusted,
        _ => entry.amount,
    }
}

fn invalid_transition(entry: &pending_revenue::Model, to: RevenueStatus) -> Error {
    Error::InvalidTransition {
        entity: "pending revenue",
        id: entry.id,
        from: entry.status.to_string(),
        to: to.to_string(),
    }
}

/// Swaps the status of `entry_id` from `PENDING` to `to`, applying `update`
/// in the same statement. Returns the entry as stored after the swap,
/// `NotFound` for an unknown entry, or `InvalidTransition` when the entry
/// had already left `PENDING`.
async fn swap_status<C>(
    db: &C,
    entry_id: i64,
    update: sea_orm::UpdateMany<PendingRevenue>,
    to: RevenueStatus,
) -> Result<pending_revenue::Model>
where
    C: ConnectionTrait,
{
    if !RevenueStatus::Pending.can_transition_to(to) {
        return Err(Error::Validation {
            message: format!("{to} is not a decision"),
        });
    }

    let updated = update
        .filter(pending_revenue::Column::Id.eq(entry_id))
        .filter(pending_revenue::Column::Status.eq(RevenueStatus::Pending))
        .exec(db)
        .await?;

    let current = PendingRevenue::find_by_id(entry_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("pending revenue", entry_id))?;
    if updated.rows_affected == 0 {
        return Err(invalid_transition(&current, to));
    }
    Ok(current)
}

async fn approve_once(
    db: &DatabaseConnection,
    entry_id: i64,
    request: &ApprovalRequest,
) -> Result<(pending_revenue::Model, i64)> {
    let resolved_amount: SimpleExpr = match request.adjusted_amount {
        Some(adjusted) if adjusted > 0 => Expr::value(adjusted),
        Some(adjusted) => {
            debug!(entry_id, adjusted, "Ignoring non-positive adjustment");
            Expr::col(pending_revenue::Column::Amount).into()
        }
        None => Expr::col(pending_revenue::Column::Amount).into(),
    };

    let txn = db.begin().await?;

    let approved = swap_status(
        &txn,
        entry_id,
        PendingRevenue::update_many()
            .set(pending_revenue::ActiveModel {
                status: Set(RevenueStatus::Approved),
                note: Set(request.note.clone()),
                resolved_by: Set(request.approved_by.clone()),
                resolved_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .col_expr(pending_revenue::Column::ResolvedAmount, resolved_amount),
        RevenueStatus::Approved,
    )
    .await?;

    let amount = final_amount(&approved, request.adjusted_amount);
    let mut memo = LedgerMemo::new(if amount == approved.amount {
        format!("Approved {}", approved.revenue_type)
    } else {
        format!("Approved {} (adjusted from {})", approved.revenue_type, approved.amount)
    });
    if let Some(reference) = &approved.transaction_ref {
        memo = memo.with_reference(reference.clone());
    }

    wallet::adjust_pending(&txn, approved.wallet_id, -approved.amount).await?;
    let balance = wallet::apply_credit(&txn, approved.wallet_id, amount, &memo).await?;

    txn.commit().await?;
    Ok((approved, balance))
}

/// Approves a pending entry and credits its wallet, atomically.
///
/// # Errors
/// - [`Error::NotFound`] if the entry does not exist
/// - [`Error::InvalidTransition`] if the entry is not `PENDING`, including a
///   second approval of the same entry and a lost race with a rejection
/// - [`Error::Transient`] if storage stayed unavailable through the retries;
///   the entry is then still `PENDING` and the call can be repeated
#[instrument(skip(db, services, request))]
pub async fn approve(
    db: &DatabaseConnection,
    services: &LedgerServices,
    entry_id: i64,
    request: ApprovalRequest,
) -> Result<pending_revenue::Model> {
    let request = &request;
    let (approved, balance) = retry_transient(&services.retry, "approve pending revenue", || async move {
        approve_once(db, entry_id, request).await
    })
    .await?;

    let credited = approved.resolved_amount.unwrap_or(approved.amount);
    info!(
        entry_id,
        wallet_id = approved.wallet_id,
        from = %RevenueStatus::Pending,
        to = %approved.status,
        original_amount = approved.amount,
        credited,
        balance_before = balance - credited,
        balance_after = balance,
        approved_by = ?approved.resolved_by,
        "Pending revenue approved"
    );

    dispatch(
        services.notifier.as_ref(),
        &LedgerEvent::RevenueApproved {
            entry_id,
            wallet_id: approved.wallet_id,
            revenue_type: approved.revenue_type,
            original_amount: approved.amount,
            credited_amount: credited,
        },
    );
    Ok(approved)
}

/// Rejects a pending entry. The wallet balance is not touched; only the
/// pending counter is released.
///
/// # Errors
/// - [`Error::Validation`] if `note` is empty or blank, before any lookup
/// - [`Error::NotFound`] if the entry does not exist
/// - [`Error::InvalidTransition`] if the entry is not `PENDING`
#[instrument(skip(db, services))]
pub async fn reject(
    db: &DatabaseConnection,
    services: &LedgerServices,
    entry_id: i64,
    note: &str,
    rejected_by: Option<String>,
) -> Result<pending_revenue::Model> {
    let note = note.trim();
    if note.is_empty() {
        return Err(Error::Validation {
            message: "A rejection note is required".to_string(),
        });
    }

    let txn = db.begin().await?;
    let rejected = swap_status(
        &txn,
        entry_id,
        PendingRevenue::update_many().set(pending_revenue::ActiveModel {
            status: Set(RevenueStatus::Rejected),
            note: Set(Some(note.to_string())),
            resolved_by: Set(rejected_by),
            resolved_at: Set(Some(Utc::now())),
            ..Default::default()
        }),
        RevenueStatus::Rejected,
    )
    .await?;
    wallet::adjust_pending(&txn, rejected.wallet_id, -rejected.amount).await?;
    txn.commit().await?;

    info!(
        entry_id,
        wallet_id = rejected.wallet_id,
        from = %RevenueStatus::Pending,
        to = %rejected.status,
        amount = rejected.amount,
        note,
        rejected_by = ?rejected.resolved_by,
        "Pending revenue rejected"
    );

    dispatch(
        services.notifier.as_ref(),
        &LedgerEvent::RevenueRejected {
            entry_id,
            wallet_id: rejected.wallet_id,
            revenue_type: rejected.revenue_type,
            amount: rejected.amount,
            note: note.to_string(),
        },
    );
    Ok(rejected)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::ledger::create_pending_revenue;
    use crate::core::wallet::{get_balance, get_wallet, list_wallet_transactions};
    use crate::entities::pending_revenue::RevenueType;
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_approve_credits_original_amount() -> Result<()> {
        let (db, wallet) = setup_with_wallet().await?;
        let (services, notifier) = recording_services();
        let entry = create_test_entry(&db, wallet.id, 50_000).await?;

        let approved = approve(&db, &services, entry.id, ApprovalRequest::default()).await?;

        assert_eq!(approved.status, RevenueStatus::Approved);
        assert_eq!(approved.resolved_amount, Some(50_000));
        assert!(approved.resolved_at.is_some());
        assert_eq!(get_balance(&db, wallet.id).await?, 50_000);

        let wallet = get_wallet(&db, wallet.id).await?.unwrap();
        assert_eq!(wallet.balance_pending, 0);
        assert_eq!(wallet.total_earnings, 50_000);

        assert_eq!(
            notifier.events(),
            vec![LedgerEvent::RevenueApproved {
                entry_id: entry.id,
                wallet_id: wallet.id,
                revenue_type: RevenueType::AffiliateCommission,
                original_amount: 50_000,
                credited_amount: 50_000,
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_approve_with_adjustment_keeps_original_amount() -> Result<()> {
        let (db, wallet) = setup_with_wallet().await?;
        let services = LedgerServices::default();
        let entry = create_pending_revenue(
            &db,
            wallet.id,
            RevenueType::AffiliateCommission,
            50_000,
            Some("TX-7".to_string()),
        )
        .await?;

        let approved = approve(
            &db,
            &services,
            entry.id,
            ApprovalRequest {
                adjusted_amount: Some(40_000),
                note: Some("partial".to_string()),
                approved_by: Some("admin-1".to_string()),
            },
        )
        .await?;

        assert_eq!(approved.amount, 50_000);
        assert_eq!(approved.resolved_amount, Some(40_000));
        assert_eq!(approved.note.as_deref(), Some("partial"));
        assert_eq!(approved.resolved_by.as_deref(), Some("admin-1"));
        assert_eq!(get_balance(&db, wallet.id).await?, 40_000);

        let movements = list_wallet_transactions(&db, wallet.id).await?;
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].amount, 40_000);
        assert_eq!(movements[0].reference.as_deref(), Some("TX-7"));

        // The whole accrual leaves the pending counter, not just the paid part
        assert_eq!(get_wallet(&db, wallet.id).await?.unwrap().balance_pending, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_non_positive_adjustment_falls_back_to_amount() -> Result<()> {
        let (db, wallet) = setup_with_wallet().await?;
        let services = LedgerServices::default();
        let entry = create_test_entry(&db, wallet.id, 12_000).await?;

        let approved = approve(
            &db,
            &services,
            entry.id,
            ApprovalRequest {
                adjusted_amount: Some(0),
                ..Default::default()
            },
        )
        .await?;

        assert_eq!(approved.resolved_amount, Some(12_000));
        assert_eq!(get_balance(&db, wallet.id).await?, 12_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_approve_is_invalid_and_does_not_credit() -> Result<()> {
        let (db, wallet) = setup_with_wallet().await?;
        let services = LedgerServices::default();
        let entry = create_test_entry(&db, wallet.id, 9_000).await?;

        approve(&db, &services, entry.id, ApprovalRequest::default()).await?;
        let second = approve(&db, &services, entry.id, ApprovalRequest::default()).await;

        assert!(matches!(
            second,
            Err(Error::InvalidTransition { ref from, ref to, .. })
                if from == "APPROVED" && to == "APPROVED"
        ));
        assert_eq!(get_balance(&db, wallet.id).await?, 9_000);
        assert_eq!(list_wallet_transactions(&db, wallet.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_approve_unknown_entry() -> Result<()> {
        let db = setup_test_db().await?;
        let services = LedgerServices::default();

        let result = approve(&db, &services, 77, ApprovalRequest::default()).await;
        assert!(matches!(
            result,
            Err(Error::NotFound {
                entity: "pending revenue",
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reject_requires_note() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let services = LedgerServices::default();

        for note in ["", "   "] {
            let result = reject(&db, &services, 1, note, None).await;
            assert!(matches!(result, Err(Error::Validation { .. })));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_reject_with_note_leaves_balance_unchanged() -> Result<()> {
        let (db, wallet) = setup_with_wallet().await?;
        let (services, notifier) = recording_services();
        let entry = create_test_entry(&db, wallet.id, 20_000).await?;

        let empty = reject(&db, &services, entry.id, "", None).await;
        assert!(matches!(empty, Err(Error::Validation { .. })));

        let rejected = reject(
            &db,
            &services,
            entry.id,
            "duplicate",
            Some("admin-2".to_string()),
        )
        .await?;

        assert_eq!(rejected.status, RevenueStatus::Rejected);
        assert_eq!(rejected.note.as_deref(), Some("duplicate"));
        assert_eq!(rejected.resolved_amount, None);
        assert!(rejected.resolved_at.is_some());

        let wallet = get_wallet(&db, wallet.id).await?.unwrap();
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.balance_pending, 0);
        assert!(list_wallet_transactions(&db, wallet.id).await?.is_empty());
        assert_eq!(notifier.events().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_transition_out_of_terminal_states() -> Result<()> {
        let (db, wallet) = setup_with_wallet().await?;
        let services = LedgerServices::default();
        let approved = create_test_entry(&db, wallet.id, 1_000).await?;
        let rejected = create_test_entry(&db, wallet.id, 2_000).await?;

        approve(&db, &services, approved.id, ApprovalRequest::default()).await?;
        reject(&db, &services, rejected.id, "not eligible", None).await?;

        assert!(matches!(
            reject(&db, &services, approved.id, "too late", None).await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            approve(&db, &services, rejected.id, ApprovalRequest::default()).await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            reject(&db, &services, rejected.id, "again", None).await,
            Err(Error::InvalidTransition { .. })
        ));
        assert_eq!(get_balance(&db, wallet.id).await?, 1_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_approve_and_reject_in_turn_single_winner() -> Result<()> {
        let (db, wallet) = setup_with_wallet().await?;
        let services = LedgerServices::default();
        let entry = create_test_entry(&db, wallet.id, 5_000).await?;

        let (approved, rejected) = tokio::join!(
            approve(&db, &services, entry.id, ApprovalRequest::default()),
            reject(&db, &services, entry.id, "race", None),
        );

        let approve_won = approved.is_ok();
        assert!(approve_won ^ rejected.is_ok());
        let loser = if approve_won { rejected.err() } else { approved.err() };
        assert!(matches!(loser, Some(Error::InvalidTransition { .. })));

        let expected = if approve_won { 5_000 } else { 0 };
        assert_eq!(get_balance(&db, wallet.id).await?, expected);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_decisions_on_separate_connections() -> Result<()> {
        let (db, _dir) = setup_concurrent_test_db().await?;
        let db = std::sync::Arc::new(db);
        let wallet = create_test_wallet(&db, "racer").await?;
        let services = LedgerServices::default();

        let mut entries = Vec::new();
        for _ in 0..8 {
            entries.push(create_test_entry(&db, wallet.id, 1_000).await?);
        }

        let mut credited = 0;
        for entry in &entries {
            let approving = tokio::spawn({
                let (db, services, id) = (db.clone(), services.clone(), entry.id);
                async move { approve(&db, &services, id, ApprovalRequest::default()).await }
            });
            let rejecting = tokio::spawn({
                let (db, services, id) = (db.clone(), services.clone(), entry.id);
                async move { reject(&db, &services, id, "race", None).await }
            });
            let approved = approving.await.unwrap();
            let rejected = rejecting.await.unwrap();

            let approve_won = approved.is_ok();
            assert!(approve_won ^ rejected.is_ok(), "{approved:?} / {rejected:?}");
            let loser = if approve_won { rejected.err() } else { approved.err() };
            assert!(
                matches!(loser, Some(Error::InvalidTransition { .. })),
                "loser saw {loser:?}"
            );
            if approve_won {
                credited += 1_000;
            }
        }

        let wallet = get_wallet(&db, wallet.id).await?.unwrap();
        assert_eq!(wallet.balance, credited);
        assert_eq!(wallet.balance_pending, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_approvals_same_wallet_both_apply() -> Result<()> {
        let (db, _dir) = setup_concurrent_test_db().await?;
        let db = std::sync::Arc::new(db);
        let wallet = create_test_wallet(&db, "busy").await?;
        let services = LedgerServices::default();
        let first = create_test_entry(&db, wallet.id, 1_500).await?;
        let second = create_test_entry(&db, wallet.id, 2_500).await?;

        let a = tokio::spawn({
            let (db, services) = (db.clone(), services.clone());
            async move { approve(&db, &services, first.id, ApprovalRequest::default()).await }
        });
        let b = tokio::spawn({
            let (db, services) = (db.clone(), services.clone());
            async move { approve(&db, &services, second.id, ApprovalRequest::default()).await }
        });
        a.await.unwrap()?;
        b.await.unwrap()?;

        assert_eq!(get_balance(&db, wallet.id).await?, 4_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_swap_on_decided_entry_reports_current_status() -> Result<()> {
        let (db, wallet) = setup_with_wallet().await?;
        let services = LedgerServices::default();
        let entry = create_test_entry(&db, wallet.id, 4_000).await?;
        reject(&db, &services, entry.id, "fraud", None).await?;

        // A decision computed against the entry while it was still PENDING
        let result = swap_status(
            &db,
            entry.id,
            PendingRevenue::update_many().set(pending_revenue::ActiveModel {
                status: Set(RevenueStatus::Approved),
                ..Default::default()
            }),
            RevenueStatus::Approved,
        )
        .await;

        assert!(matches!(
            result,
            Err(Error::InvalidTransition { ref from, ref to, .. })
                if from == "REJECTED" && to == "APPROVED"
        ));
        let stored = crate::core::ledger::get_pending_revenue(&db, entry.id).await?.unwrap();
        assert_eq!(stored.status, RevenueStatus::Rejected);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_notifier_does_not_undo_approval() -> Result<()> {
        let (db, wallet) = setup_with_wallet().await?;
        let services = failing_services();
        let entry = create_test_entry(&db, wallet.id, 3_000).await?;

        let approved = approve(&db, &services, entry.id, ApprovalRequest::default()).await?;

        assert_eq!(approved.status, RevenueStatus::Approved);
        assert_eq!(get_balance(&db, wallet.id).await?, 3_000);
        Ok(())
    }
}
