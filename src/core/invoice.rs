//! Invoice glue - The minimal purchase record manual payments settle.
//!
//! Payment gateways and the manual reconciliation both end in [`mark_paid`],
//! which is idempotent so a replayed confirmation never reprocesses a paid
//! invoice.

use crate::{
    entities::{
        Invoice,
        invoice::{self, InvoiceStatus},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{Set, prelude::*};
use tracing::{debug, info, instrument};

/// Issues a new unpaid invoice.
#[instrument(skip(db))]
pub async fn create_invoice(
    db: &DatabaseConnection,
    reference: &str,
    amount: i64,
) -> Result<invoice::Model> {
    if amount <= 0 {
        return Err(Error::InvalidAmount { amount });
    }
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(Error::Validation {
            message: "Invoice reference cannot be empty".to_string(),
        });
    }

    let invoice = invoice::ActiveModel {
        reference: Set(reference.to_string()),
        amount: Set(amount),
        status: Set(InvoiceStatus::Pending),
        resolved_amount: Set(None),
        paid_at: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(invoice_id = invoice.id, reference, amount, "Invoice created");
    Ok(invoice)
}

/// Finds an invoice by ID.
pub async fn get_invoice(db: &DatabaseConnection, invoice_id: i64) -> Result<Option<invoice::Model>> {
    Invoice::find_by_id(invoice_id)
        .one(db)
        .await
        .map_err(Into::into)
}

async fn load<C>(db: &C, invoice_id: i64) -> Result<invoice::Model>
where
    C: ConnectionTrait,
{
    Invoice::find_by_id(invoice_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("invoice", invoice_id))
}

/// Marks an invoice paid with the amount actually received.
///
/// Accepts `PENDING` and `EXPIRED` invoices (a late transfer confirmed by an
/// operator still settles the purchase). An invoice that is already `PAID`
/// is returned unchanged.
pub async fn mark_paid<C>(
    db: &C,
    invoice_id: i64,
    resolved_amount: i64,
    paid_at: DateTime<Utc>,
) -> Result<invoice::Model>
where
    C: ConnectionTrait,
{
    if resolved_amount <= 0 {
        return Err(Error::InvalidAmount {
            amount: resolved_amount,
        });
    }

    let current = load(db, invoice_id).await?;
    if current.status == InvoiceStatus::Paid {
        debug!(invoice_id, "Invoice already paid, nothing to do");
        return Ok(current);
    }

    let result = Invoice::update_many()
        .set(invoice::ActiveModel {
            status: Set(InvoiceStatus::Paid),
            resolved_amount: Set(Some(resolved_amount)),
            paid_at: Set(Some(paid_at)),
            ..Default::default()
        })
        .filter(invoice::Column::Id.eq(invoice_id))
        .filter(invoice::Column::Status.ne(InvoiceStatus::Paid))
        .exec(db)
        .await?;

    let updated = load(db, invoice_id).await?;
    if result.rows_affected == 1 {
        info!(
            invoice_id,
            from = %current.status,
            to = %updated.status,
            invoice_amount = updated.amount,
            resolved_amount,
            "Invoice paid"
        );
    }
    Ok(updated)
}

/// Closes an unpaid invoice whose payment window has passed. Expiring an
/// already expired invoice is a no-op; a paid invoice cannot expire.
pub async fn mark_expired<C>(db: &C, invoice_id: i64) -> Result<invoice::Model>
where
    C: ConnectionTrait,
{
    let current = load(db, invoice_id).await?;
    match current.status {
        InvoiceStatus::Expired => return Ok(current),
        InvoiceStatus::Paid => {
            return Err(Error::InvalidTransition {
                entity: "invoice",
                id: invoice_id,
                from: current.status.to_string(),
                to: InvoiceStatus::Expired.to_string(),
            });
        }
        InvoiceStatus::Pending => {}
    }

    Invoice::update_many()
        .set(invoice::ActiveModel {
            status: Set(InvoiceStatus::Expired),
            ..Default::default()
        })
        .filter(invoice::Column::Id.eq(invoice_id))
        .filter(invoice::Column::Status.eq(InvoiceStatus::Pending))
        .exec(db)
        .await?;

    debug!(invoice_id, "Invoice expired");
    load(db, invoice_id).await
}

/// Expires every still-unpaid invoice in `invoice_ids`. Paid invoices are
/// left alone. Returns how many invoices changed.
pub(crate) async fn expire_unpaid<C>(db: &C, invoice_ids: &[i64]) -> Result<u64>
where
    C: ConnectionTrait,
{
    if invoice_ids.is_empty() {
        return Ok(0);
    }
    let result = Invoice::update_many()
        .set(invoice::ActiveModel {
            status: Set(InvoiceStatus::Expired),
            ..Default::default()
        })
        .filter(invoice::Column::Id.is_in(invoice_ids.iter().copied()))
        .filter(invoice::Column::Status.eq(InvoiceStatus::Pending))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}
