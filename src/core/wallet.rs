//! Wallet store - Per-user balances.
//!
//! Balances only move through [`credit`] and [`debit`] (and their in-transaction
//! forms used by the approval workflow). Both are single atomic SQL updates:
//! `UPDATE wallets SET balance = balance + ?` for credits and a conditional
//! `... SET balance = balance - ? WHERE balance >= ?` for debits, so concurrent
//! writers on the same wallet never lose an update and a debit can never drive
//! the balance negative. Every movement appends a `wallet_transactions` row
//! with the balance before and after.

use crate::{
    config::settings::RetrySettings,
    core::retry::retry_transient,
    entities::{
        Wallet, WalletTransaction, wallet,
        wallet_transaction::{self, MovementKind},
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr, sea_query::OnConflict,
};
use tracing::{debug, info, instrument};

/// Description attached to a balance movement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMemo {
    /// Human-readable reason
    pub description: String,
    /// Optional external reference
    pub reference: Option<String>,
}

impl LedgerMemo {
    /// Memo without a reference
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            reference: None,
        }
    }

    /// Attaches an external reference
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Returns the wallet owned by `user_id`, creating an empty one on first use.
///
/// Safe under concurrent first use: the insert is `ON CONFLICT DO NOTHING`
/// and the wallet is read back afterwards.
pub async fn get_or_create_wallet<C>(db: &C, user_id: &str) -> Result<wallet::Model>
where
    C: ConnectionTrait,
{
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(Error::Validation {
            message: "Wallet owner cannot be empty".to_string(),
        });
    }

    if let Some(existing) = find_by_user(db, user_id).await? {
        return Ok(existing);
    }

    let now = Utc::now();
    let new_wallet = wallet::ActiveModel {
        user_id: Set(user_id.to_string()),
        balance: Set(0),
        balance_pending: Set(0),
        total_earnings: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    Wallet::insert(new_wallet)
        .on_conflict(
            OnConflict::column(wallet::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    let created = find_by_user(db, user_id)
        .await?
        .ok_or_else(|| Error::not_found("wallet", user_id))?;
    debug!(wallet_id = created.id, user_id, "Wallet ready");
    Ok(created)
}

async fn find_by_user<C>(db: &C, user_id: &str) -> Result<Option<wallet::Model>>
where
    C: ConnectionTrait,
{
    Wallet::find()
        .filter(wallet::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a wallet by its ID.
pub async fn get_wallet(db: &DatabaseConnection, wallet_id: i64) -> Result<Option<wallet::Model>> {
    Wallet::find_by_id(wallet_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds the wallet owned by a user, if it has been created.
pub async fn get_wallet_by_user(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Option<wallet::Model>> {
    find_by_user(db, user_id.trim()).await
}

/// Current spendable balance of a wallet.
pub async fn get_balance(db: &DatabaseConnection, wallet_id: i64) -> Result<i64> {
    get_wallet(db, wallet_id)
        .await?
        .map(|w| w.balance)
        .ok_or_else(|| Error::not_found("wallet", wallet_id))
}

/// Balance movements of a wallet, newest first.
pub async fn list_wallet_transactions(
    db: &DatabaseConnection,
    wallet_id: i64,
) -> Result<Vec<wallet_transaction::Model>> {
    WalletTransaction::find()
        .filter(wallet_transaction::Column::WalletId.eq(wallet_id))
        .order_by_desc(wallet_transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

fn ensure_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(())
}

async fn load<C>(db: &C, wallet_id: i64) -> Result<wallet::Model>
where
    C: ConnectionTrait,
{
    Wallet::find_by_id(wallet_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("wallet", wallet_id))
}

async fn record_movement<C>(
    db: &C,
    wallet_id: i64,
    kind: MovementKind,
    amount: i64,
    balance_after: i64,
    memo: &LedgerMemo,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let balance_before = match kind {
        MovementKind::Credit => balance_after - amount,
        MovementKind::Debit => balance_after + amount,
    };
    wallet_transaction::ActiveModel {
        wallet_id: Set(wallet_id),
        kind: Set(kind),
        amount: Set(amount),
        balance_before: Set(balance_before),
        balance_after: Set(balance_after),
        description: Set(memo.description.clone()),
        reference: Set(memo.reference.clone()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(
        wallet_id,
        ?kind,
        amount,
        balance_before,
        balance_after,
        description = %memo.description,
        "Wallet balance moved"
    );
    Ok(())
}

/// Credits a wallet inside the caller's transaction and returns the new
/// balance. Also counts the amount towards lifetime earnings.
pub(crate) async fn apply_credit<C>(
    db: &C,
    wallet_id: i64,
    amount: i64,
    memo: &LedgerMemo,
) -> Result<i64>
where
    C: ConnectionTrait,
{
    ensure_positive(amount)?;

    let updated = Wallet::update_many()
        .col_expr(
            wallet::Column::Balance,
            Expr::col(wallet::Column::Balance).add(amount),
        )
        .col_expr(
            wallet::Column::TotalEarnings,
            Expr::col(wallet::Column::TotalEarnings).add(amount),
        )
        .col_expr(wallet::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(wallet::Column::Id.eq(wallet_id))
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        return Err(Error::not_found("wallet", wallet_id));
    }

    let balance_after = load(db, wallet_id).await?.balance;
    record_movement(db, wallet_id, MovementKind::Credit, amount, balance_after, memo).await?;
    Ok(balance_after)
}

/// Debits a wallet inside the caller's transaction and returns the new
/// balance. Fails with [`Error::InsufficientFunds`] instead of clamping.
pub(crate) async fn apply_debit<C>(
    db: &C,
    wallet_id: i64,
    amount: i64,
    memo: &LedgerMemo,
) -> Result<i64>
where
    C: ConnectionTrait,
{
    ensure_positive(amount)?;

    let updated = Wallet::update_many()
        .col_expr(
            wallet::Column::Balance,
            Expr::col(wallet::Column::Balance).sub(amount),
        )
        .col_expr(wallet::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(wallet::Column::Id.eq(wallet_id))
        .filter(wallet::Column::Balance.gte(amount))
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        let current = load(db, wallet_id).await?;
        return Err(Error::InsufficientFunds {
            balance: current.balance,
            requested: amount,
        });
    }

    let balance_after = load(db, wallet_id).await?.balance;
    record_movement(db, wallet_id, MovementKind::Debit, amount, balance_after, memo).await?;
    Ok(balance_after)
}

/// Adds `delta` to the pending counter (negative to release).
pub(crate) async fn adjust_pending<C>(db: &C, wallet_id: i64, delta: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let updated = Wallet::update_many()
        .col_expr(
            wallet::Column::BalancePending,
            Expr::col(wallet::Column::BalancePending).add(delta),
        )
        .col_expr(wallet::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(wallet::Column::Id.eq(wallet_id))
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        return Err(Error::not_found("wallet", wallet_id));
    }
    Ok(())
}

/// Credits a wallet and returns the new balance.
///
/// Runs as its own transaction and is retried with bounded backoff on
/// transient storage errors; a failed attempt never leaves a partial credit.
#[instrument(skip(db, retry, memo))]
pub async fn credit(
    db: &DatabaseConnection,
    retry: &RetrySettings,
    wallet_id: i64,
    amount: i64,
    memo: &LedgerMemo,
) -> Result<i64> {
    ensure_positive(amount)?;

    retry_transient(retry, "wallet credit", || async move {
        let txn = db.begin().await?;
        let balance = apply_credit(&txn, wallet_id, amount, memo).await?;
        txn.commit().await?;
        Ok(balance)
    })
    .await
}

/// Debits a wallet and returns the new balance.
///
/// Fails fast: no retries, and [`Error::InsufficientFunds`] when the balance
/// does not cover the amount.
#[instrument(skip(db, memo))]
pub async fn debit(
    db: &DatabaseConnection,
    wallet_id: i64,
    amount: i64,
    memo: &LedgerMemo,
) -> Result<i64> {
    ensure_positive(amount)?;

    let txn = db.begin().await?;
    let balance = apply_debit(&txn, wallet_id, amount, memo).await?;
    txn.commit().await?;
    Ok(balance)
}
