//! Wallet transaction entity - Append-only audit trail of balance movements.
//!
//! Every credit and debit writes one row holding the balance before and after,
//! so a wallet's history can be replayed and checked against its balance.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of a balance movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
pub enum MovementKind {
    /// Balance increased
    #[sea_orm(string_value = "CREDIT")]
    Credit,
    /// Balance decreased
    #[sea_orm(string_value = "DEBIT")]
    Debit,
}

/// Wallet transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_transactions")]
pub struct Model {
    /// Unique identifier for the movement
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Wallet that moved
    pub wallet_id: i64,
    /// Credit or debit
    pub kind: MovementKind,
    /// Positive amount moved
    pub amount: i64,
    /// Balance right before the movement
    pub balance_before: i64,
    /// Balance right after the movement
    pub balance_after: i64,
    /// Human-readable reason
    pub description: String,
    /// Optional external reference (originating transaction, payout id)
    pub reference: Option<String>,
    /// When the movement happened
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `WalletTransaction` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each movement belongs to one wallet
    #[sea_orm(
        belongs_to = "super::wallet::Entity",
        from = "Column::WalletId",
        to = "super::wallet::Column::Id"
    )]
    Wallet,
}

impl Related<super::wallet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallet.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
