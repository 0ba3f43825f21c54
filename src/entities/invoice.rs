//! Invoice entity - The purchase record a payment settles.
//!
//! The ledger treats invoices as an external record: it reads `amount` and
//! writes only `status`, `paid_at` and `resolved_amount`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment state of an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
pub enum InvoiceStatus {
    /// Not paid yet
    #[sea_orm(string_value = "PENDING")]
    Pending,
    /// Settled
    #[sea_orm(string_value = "PAID")]
    Paid,
    /// Payment window closed without settlement
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Expired => "EXPIRED",
        })
    }
}

/// Invoice database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    /// Unique identifier for the invoice
    #[sea_orm(primary_key)]
    pub id: i64,
    /// External invoice number
    #[sea_orm(unique)]
    pub reference: String,
    /// Original price in the smallest currency unit
    pub amount: i64,
    /// Payment state
    pub status: InvoiceStatus,
    /// Amount actually received, set when paid
    pub resolved_amount: Option<i64>,
    /// When the payment was confirmed
    pub paid_at: Option<DateTimeUtc>,
    /// When the invoice was issued
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Invoice and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// An invoice has at most one manual payment intent
    #[sea_orm(has_one = "super::manual_payment_intent::Entity")]
    ManualPaymentIntent,
}

impl Related<super::manual_payment_intent::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ManualPaymentIntent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
