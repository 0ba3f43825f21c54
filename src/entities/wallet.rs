//! Wallet entity - One balance holder per user.
//!
//! Balances are only ever changed through `core::wallet` (credit/debit and the
//! pending counters); nothing else writes these columns.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Wallet database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallets")]
pub struct Model {
    /// Unique identifier for the wallet
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the wallet, one wallet per user
    #[sea_orm(unique)]
    pub user_id: String,
    /// Spendable balance in the smallest currency unit, never negative
    pub balance: i64,
    /// Sum of accruals still waiting for an admin decision
    pub balance_pending: i64,
    /// Lifetime sum of credits
    pub total_earnings: i64,
    /// When the wallet was created
    pub created_at: DateTimeUtc,
    /// When any balance column last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Wallet and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One wallet has many ledger movements
    #[sea_orm(has_many = "super::wallet_transaction::Entity")]
    WalletTransactions,
    /// One wallet has many pending revenue entries
    #[sea_orm(has_many = "super::pending_revenue::Entity")]
    PendingRevenues,
}

impl Related<super::wallet_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WalletTransactions.def()
    }
}

impl Related<super::pending_revenue::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PendingRevenues.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
