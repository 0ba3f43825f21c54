//! Pending revenue entity - Accrued commissions and profit shares awaiting an
//! admin decision.
//!
//! `amount` is fixed at accrual time and kept for audit; `resolved_amount` is
//! what was actually paid out on approval and may differ.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of accrual
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevenueType {
    /// Commission earned by a referring affiliate
    #[sea_orm(string_value = "AFFILIATE_COMMISSION")]
    AffiliateCommission,
    /// Share earned by a course mentor or event creator
    #[sea_orm(string_value = "MENTOR_SHARE")]
    MentorShare,
    /// Founder profit share
    #[sea_orm(string_value = "FOUNDER_SHARE")]
    FounderShare,
    /// Co-founder profit share
    #[sea_orm(string_value = "COFOUNDER_SHARE")]
    CofounderShare,
}

impl fmt::Display for RevenueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AffiliateCommission => "AFFILIATE_COMMISSION",
            Self::MentorShare => "MENTOR_SHARE",
            Self::FounderShare => "FOUNDER_SHARE",
            Self::CofounderShare => "COFOUNDER_SHARE",
        })
    }
}

/// Approval state. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
pub enum RevenueStatus {
    /// Awaiting an admin decision
    #[sea_orm(string_value = "PENDING")]
    Pending,
    /// Paid into the wallet
    #[sea_orm(string_value = "APPROVED")]
    Approved,
    /// Closed without payment
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
}

impl RevenueStatus {
    /// Checks a requested transition. Only `Pending` may move, and only to a
    /// terminal state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved | Self::Rejected)
        )
    }
}

impl fmt::Display for RevenueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        })
    }
}

/// Pending revenue database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_revenues")]
pub struct Model {
    /// Unique identifier for the entry
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Wallet credited on approval
    pub wallet_id: i64,
    /// Kind of accrual
    #[sea_orm(column_name = "type")]
    pub revenue_type: RevenueType,
    /// Amount accrued at creation time
    pub amount: i64,
    /// Approval state
    pub status: RevenueStatus,
    /// Amount actually credited, set on approval
    pub resolved_amount: Option<i64>,
    /// Admin note; mandatory on rejection
    pub note: Option<String>,
    /// Originating transaction or product, if any
    pub transaction_ref: Option<String>,
    /// Admin who approved or rejected the entry
    pub resolved_by: Option<String>,
    /// When the entry was accrued
    pub created_at: DateTimeUtc,
    /// When the entry left `Pending`
    pub resolved_at: Option<DateTimeUtc>,
}

/// Defines relationships between `PendingRevenue` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry belongs to one wallet
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pending_can_move() {
        use RevenueStatus::{Approved, Pending, Rejected};

        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Pending));
        for terminal in [Approved, Rejected] {
            for next in [Pending, Approved, Rejected] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
