//! Manual payment intent entity - A bank transfer we are waiting for.
//!
//! The transfer amount is the invoice amount perturbed by a small unique code
//! so an incoming transfer can be attributed to exactly one invoice.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the unique code is applied to the invoice amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "lowercase")]
pub enum UniqueCodeMode {
    /// `resolved = invoice + code`
    #[sea_orm(string_value = "ADD")]
    Add,
    /// `resolved = invoice - code`
    #[sea_orm(string_value = "SUBTRACT")]
    Subtract,
}

impl UniqueCodeMode {
    /// Applies the code to an invoice amount. Returns `None` when the result
    /// would overflow or not be strictly positive.
    #[must_use]
    pub fn apply(self, invoice_amount: i64, unique_code: i64) -> Option<i64> {
        let resolved = match self {
            Self::Add => invoice_amount.checked_add(unique_code)?,
            Self::Subtract => invoice_amount.checked_sub(unique_code)?,
        };
        (resolved > 0).then_some(resolved)
    }
}

/// Intent state. `Paid` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
pub enum IntentStatus {
    /// Waiting for the transfer
    #[sea_orm(string_value = "AWAITING")]
    Awaiting,
    /// Transfer matched and invoice paid
    #[sea_orm(string_value = "PAID")]
    Paid,
    /// Deadline passed without a match
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Awaiting => "AWAITING",
            Self::Paid => "PAID",
            Self::Expired => "EXPIRED",
        })
    }
}

/// Manual payment intent database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "manual_payment_intents")]
pub struct Model {
    /// Unique identifier for the intent
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Invoice this intent settles (one intent per invoice)
    #[sea_orm(unique)]
    pub invoice_id: i64,
    /// Original invoice price
    pub invoice_amount: i64,
    /// Perturbation applied to the price, 0 when unique codes are disabled
    pub unique_code: i64,
    /// Whether the code was added or subtracted
    pub unique_code_mode: UniqueCodeMode,
    /// Exact amount the customer must transfer
    pub resolved_amount: i64,
    /// Intent state
    pub status: IntentStatus,
    /// Transfers after this instant no longer match
    pub expires_at: DateTimeUtc,
    /// When the intent was created
    pub created_at: DateTimeUtc,
    /// When the transfer was matched
    pub paid_at: Option<DateTimeUtc>,
}

/// Defines relationships between `ManualPaymentIntent` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each intent belongs to one invoice
    #[sea_orm(
        belongs_to = "super::invoice::Entity",
        from = "Column::InvoiceId",
        to = "super::invoice::Column::Id"
    )]
    Invoice,
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
