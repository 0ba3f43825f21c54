//! Manual payment reconciliation - Attributes bank transfers to invoices.
//!
//! Each awaiting invoice gets an intent whose `resolved_amount` is the invoice
//! amount shifted by a small unique code. An incoming transfer is matched on
//! that exact amount. Intents move `AWAITING -> PAID` through a match or an
//! operator confirmation, or `AWAITING -> EXPIRED` through the sweep; both
//! targets are terminal.
//!
//! While codes are enabled, creation avoids every resolved amount already
//! held by an awaiting intent or paid within the replay window. The matcher
//! still refuses to pick between two candidates and reports
//! [`Error::AmbiguousMatch`] instead. A replayed transfer only counts as
//! already paid inside that same window.

use crate::{
    config::settings::{CodeModeSetting, ReconciliationSettings},
    core::{
        invoice,
        notify::{LedgerEvent, dispatch},
        services::LedgerServices,
    },
    entities::{
        Invoice, ManualPaymentIntent,
        invoice::InvoiceStatus,
        manual_payment_intent::{self, IntentStatus, UniqueCodeMode},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng};
use sea_orm::{Condition, QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// How unique codes are chosen for new intents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueCodePolicy {
    /// When false every intent uses code 0
    pub enabled: bool,
    /// Smallest code
    pub min: i64,
    /// Largest code
    pub max: i64,
    /// Add, subtract or random
    pub mode: CodeModeSetting,
    /// Random draws before scanning the range
    pub max_resample_attempts: u32,
    /// Hours a paid resolved amount stays reserved against reuse
    pub replay_window_hours: i64,
}

impl From<&ReconciliationSettings> for UniqueCodePolicy {
    fn from(settings: &ReconciliationSettings) -> Self {
        Self {
            enabled: settings.unique_code_enabled,
            min: settings.unique_code_min,
            max: settings.unique_code_max,
            mode: settings.unique_code_mode,
            max_resample_attempts: settings.max_resample_attempts,
            replay_window_hours: settings.replay_window_hours,
        }
    }
}

impl Default for UniqueCodePolicy {
    fn default() -> Self {
        Self::from(&ReconciliationSettings::default())
    }
}

/// A chosen code and the amount the customer must transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeAssignment {
    /// Code applied to the invoice amount
    pub unique_code: i64,
    /// Direction it was applied in
    pub mode: UniqueCodeMode,
    /// Exact transfer amount
    pub resolved_amount: i64,
}

impl UniqueCodePolicy {
    /// Modes worth trying for `code`, most preferred first. Subtraction is
    /// only offered when the invoice amount leaves room for it.
    fn candidate_modes<R>(&self, invoice_amount: i64, code: i64, rng: &mut R) -> Vec<UniqueCodeMode>
    where
        R: Rng + ?Sized,
    {
        let room_to_subtract = invoice_amount > code;
        match (self.mode, room_to_subtract) {
            (CodeModeSetting::Add, _) | (_, false) => vec![UniqueCodeMode::Add],
            (CodeModeSetting::Subtract, true) => {
                vec![UniqueCodeMode::Subtract, UniqueCodeMode::Add]
            }
            (CodeModeSetting::Random, true) if rng.gen_bool(0.5) => {
                vec![UniqueCodeMode::Add, UniqueCodeMode::Subtract]
            }
            (CodeModeSetting::Random, true) => vec![UniqueCodeMode::Subtract, UniqueCodeMode::Add],
        }
    }

    fn try_code<R>(
        &self,
        invoice_amount: i64,
        code: i64,
        taken: &HashSet<i64>,
        rng: &mut R,
    ) -> Option<CodeAssignment>
    where
        R: Rng + ?Sized,
    {
        self.candidate_modes(invoice_amount, code, rng)
            .into_iter()
            .find_map(|mode| {
                let resolved_amount = mode.apply(invoice_amount, code)?;
                (!taken.contains(&resolved_amount)).then_some(CodeAssignment {
                    unique_code: code,
                    mode,
                    resolved_amount,
                })
            })
    }

    /// Picks a code whose resolved amount is not in `taken`.
    ///
    /// Draws at random up to `max_resample_attempts` times, then scans the
    /// whole range in order. With codes disabled the result is always code 0
    /// and `taken` is ignored.
    ///
    /// # Errors
    /// - [`Error::InvalidAmount`] for a non-positive invoice amount
    /// - [`Error::UniqueCodeExhausted`] when every code in range collides
    pub fn assign<R>(
        &self,
        invoice_amount: i64,
        taken: &HashSet<i64>,
        rng: &mut R,
    ) -> Result<CodeAssignment>
    where
        R: Rng + ?Sized,
    {
        if invoice_amount <= 0 {
            return Err(Error::InvalidAmount {
                amount: invoice_amount,
            });
        }
        if !self.enabled {
            return Ok(CodeAssignment {
                unique_code: 0,
                mode: UniqueCodeMode::Add,
                resolved_amount: invoice_amount,
            });
        }
        if self.min < 1 || self.min > self.max {
            return Err(Error::Config {
                message: format!("Invalid unique code range {}..={}", self.min, self.max),
            });
        }

        for attempt in 0..self.max_resample_attempts {
            let code = rng.gen_range(self.min..=self.max);
            if let Some(assignment) = self.try_code(invoice_amount, code, taken, rng) {
                return Ok(assignment);
            }
            debug!(invoice_amount, code, attempt, "Unique code collides, resampling");
        }

        (self.min..=self.max)
            .find_map(|code| self.try_code(invoice_amount, code, taken, rng))
            .ok_or(Error::UniqueCodeExhausted { invoice_amount })
    }

    /// Range of resolved amounts this policy can produce for `invoice_amount`
    fn reach(&self, invoice_amount: i64) -> (i64, i64) {
        (
            invoice_amount.saturating_sub(self.max),
            invoice_amount.saturating_add(self.max),
        )
    }
}

/// Result of a successful match or confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The intent moved to `PAID` now
    Matched(manual_payment_intent::Model),
    /// The intent was already `PAID`; nothing changed
    AlreadyPaid(manual_payment_intent::Model),
}

impl MatchOutcome {
    /// The intent concerned
    #[must_use]
    pub const fn intent(&self) -> &manual_payment_intent::Model {
        match self {
            Self::Matched(intent) | Self::AlreadyPaid(intent) => intent,
        }
    }

    /// Whether this call changed anything
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// What an expiry sweep did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirySweepResult {
    /// Intents moved to `EXPIRED`
    pub expired: u64,
    /// Invoices moved to `EXPIRED` alongside them
    pub invoices_expired: u64,
    /// Clock value the sweep used
    pub swept_at: DateTime<Utc>,
}

/// `now` shifted by `hours`, or a validation error when that leaves the
/// representable range.
fn shift_hours(now: DateTime<Utc>, hours: i64, what: &str) -> Result<DateTime<Utc>> {
    Duration::try_hours(hours)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| Error::Validation {
            message: format!("{what} of {} hours is out of range", hours.unsigned_abs()),
        })
}

/// Opens a manual payment intent for an unpaid invoice, with a fresh random
/// generator and the current time.
pub async fn create_intent(
    db: &DatabaseConnection,
    invoice_id: i64,
    expiry_hours: i64,
    policy: &UniqueCodePolicy,
) -> Result<manual_payment_intent::Model> {
    let mut rng = StdRng::from_entropy();
    create_intent_with_rng(db, invoice_id, expiry_hours, policy, &mut rng, Utc::now()).await
}

/// Opens a manual payment intent using the given generator and clock.
///
/// The invoice amount is read from the invoice. The new resolved amount
/// avoids every awaiting intent and every intent paid within the replay
/// window, so a replayed transfer for an old invoice can never settle this
/// one. Fails with [`Error::Validation`] when the invoice is not `PENDING`,
/// already has an intent, or the expiry is out of range.
#[instrument(skip(db, policy, rng))]
pub async fn create_intent_with_rng<R>(
    db: &DatabaseConnection,
    invoice_id: i64,
    expiry_hours: i64,
    policy: &UniqueCodePolicy,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Result<manual_payment_intent::Model>
where
    R: Rng + ?Sized,
{
    if expiry_hours <= 0 {
        return Err(Error::Validation {
            message: format!("Expiry must be a positive number of hours, got {expiry_hours}"),
        });
    }
    let expires_at = shift_hours(now, expiry_hours, "Expiry")?;
    let replay_cutoff =
        shift_hours(now, policy.replay_window_hours.saturating_neg(), "Replay window")?;

    let txn = db.begin().await?;

    let invoice = Invoice::find_by_id(invoice_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("invoice", invoice_id))?;
    if invoice.status != InvoiceStatus::Pending {
        return Err(Error::Validation {
            message: format!("Invoice {invoice_id} is {}, not awaiting payment", invoice.status),
        });
    }
    if find_for_invoice(&txn, invoice_id).await?.is_some() {
        return Err(Error::Validation {
            message: format!("Invoice {invoice_id} already has a payment intent"),
        });
    }

    let taken: HashSet<i64> = if policy.enabled {
        let (low, high) = policy.reach(invoice.amount);
        ManualPaymentIntent::find()
            .select_only()
            .column(manual_payment_intent::Column::ResolvedAmount)
            .filter(manual_payment_intent::Column::ResolvedAmount.between(low, high))
            .filter(
                Condition::any()
                    .add(manual_payment_intent::Column::Status.eq(IntentStatus::Awaiting))
                    .add(
                        Condition::all()
                            .add(manual_payment_intent::Column::Status.eq(IntentStatus::Paid))
                            .add(manual_payment_intent::Column::PaidAt.gt(replay_cutoff)),
                    ),
            )
            .into_tuple::<i64>()
            .all(&txn)
            .await?
            .into_iter()
            .collect()
    } else {
        HashSet::new()
    };

    let assignment = policy.assign(invoice.amount, &taken, rng)?;

    let intent = manual_payment_intent::ActiveModel {
        invoice_id: Set(invoice_id),
        invoice_amount: Set(invoice.amount),
        unique_code: Set(assignment.unique_code),
        unique_code_mode: Set(assignment.mode),
        resolved_amount: Set(assignment.resolved_amount),
        status: Set(IntentStatus::Awaiting),
        expires_at: Set(expires_at),
        created_at: Set(now),
        paid_at: Set(None),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    info!(
        intent_id = intent.id,
        invoice_id,
        invoice_amount = intent.invoice_amount,
        unique_code = intent.unique_code,
        mode = ?intent.unique_code_mode,
        resolved_amount = intent.resolved_amount,
        expires_at = %intent.expires_at,
        "Manual payment intent created"
    );
    Ok(intent)
}

async fn find_for_invoice<C>(db: &C, invoice_id: i64) -> Result<Option<manual_payment_intent::Model>>
where
    C: ConnectionTrait,
{
    ManualPaymentIntent::find()
        .filter(manual_payment_intent::Column::InvoiceId.eq(invoice_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds an intent by ID.
pub async fn get_intent(
    db: &DatabaseConnection,
    intent_id: i64,
) -> Result<Option<manual_payment_intent::Model>> {
    ManualPaymentIntent::find_by_id(intent_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds the intent opened for an invoice.
pub async fn get_intent_for_invoice(
    db: &DatabaseConnection,
    invoice_id: i64,
) -> Result<Option<manual_payment_intent::Model>> {
    find_for_invoice(db, invoice_id).await
}

/// Intents still waiting for a transfer, soonest deadline first.
pub async fn list_awaiting_intents(db: &DatabaseConnection) -> Result<Vec<manual_payment_intent::Model>> {
    ManualPaymentIntent::find()
        .filter(manual_payment_intent::Column::Status.eq(IntentStatus::Awaiting))
        .order_by_asc(manual_payment_intent::Column::ExpiresAt)
        .order_by_asc(manual_payment_intent::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Moves an awaiting intent to `PAID` and settles its invoice, inside the
/// caller's transaction. Returns `None` when the intent was no longer
/// awaiting by the time of the update.
async fn settle<C>(
    db: &C,
    intent: &manual_payment_intent::Model,
    now: DateTime<Utc>,
) -> Result<Option<manual_payment_intent::Model>>
where
    C: ConnectionTrait,
{
    let updated = ManualPaymentIntent::update_many()
        .set(manual_payment_intent::ActiveModel {
            status: Set(IntentStatus::Paid),
            paid_at: Set(Some(now)),
            ..Default::default()
        })
        .filter(manual_payment_intent::Column::Id.eq(intent.id))
        .filter(manual_payment_intent::Column::Status.eq(IntentStatus::Awaiting))
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        return Ok(None);
    }

    invoice::mark_paid(db, intent.invoice_id, intent.resolved_amount, now).await?;

    let paid = ManualPaymentIntent::find_by_id(intent.id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("payment intent", intent.id))?;
    info!(
        intent_id = paid.id,
        invoice_id = paid.invoice_id,
        from = %intent.status,
        to = %paid.status,
        resolved_amount = paid.resolved_amount,
        "Manual payment settled"
    );
    Ok(Some(paid))
}

fn announce(services: &LedgerServices, intent: &manual_payment_intent::Model) {
    dispatch(
        services.notifier.as_ref(),
        &LedgerEvent::TransferMatched {
            intent_id: intent.id,
            invoice_id: intent.invoice_id,
            amount: intent.resolved_amount,
        },
    );
}

/// Matches an incoming transfer against awaiting intents at the current time.
pub async fn match_incoming_transfer(
    db: &DatabaseConnection,
    services: &LedgerServices,
    amount: i64,
) -> Result<MatchOutcome> {
    match_incoming_transfer_at(db, services, amount, Utc::now()).await
}

/// Matches an incoming transfer of `amount` received at `now`.
///
/// Exactly one awaiting, unexpired intent with this resolved amount is moved
/// to `PAID` and its invoice marked paid, in one transaction. A transfer that
/// only matches an intent paid within the replay window returns
/// [`MatchOutcome::AlreadyPaid`].
///
/// # Errors
/// - [`Error::NoMatch`] when nothing awaits this amount and no recent
///   payment used it
/// - [`Error::AmbiguousMatch`] when several intents await it; nothing is
///   resolved and an operator must pick one with [`confirm_intent`]
#[instrument(skip(db, services))]
pub async fn match_incoming_transfer_at(
    db: &DatabaseConnection,
    services: &LedgerServices,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<MatchOutcome> {
    if amount <= 0 {
        return Err(Error::InvalidAmount { amount });
    }
    let replay_cutoff =
        shift_hours(now, services.replay_window_hours.saturating_neg(), "Replay window")?;

    let txn = db.begin().await?;

    let candidates = ManualPaymentIntent::find()
        .filter(manual_payment_intent::Column::Status.eq(IntentStatus::Awaiting))
        .filter(manual_payment_intent::Column::ResolvedAmount.eq(amount))
        .filter(manual_payment_intent::Column::ExpiresAt.gt(now))
        .order_by_asc(manual_payment_intent::Column::Id)
        .all(&txn)
        .await?;

    let intent = match candidates.as_slice() {
        [] => {
            let already_paid = ManualPaymentIntent::find()
                .filter(manual_payment_intent::Column::Status.eq(IntentStatus::Paid))
                .filter(manual_payment_intent::Column::ResolvedAmount.eq(amount))
                .filter(manual_payment_intent::Column::PaidAt.gt(replay_cutoff))
                .order_by_desc(manual_payment_intent::Column::PaidAt)
                .one(&txn)
                .await?;
            return match already_paid {
                Some(paid) => {
                    info!(intent_id = paid.id, amount, "Transfer already matched, ignoring replay");
                    Ok(MatchOutcome::AlreadyPaid(paid))
                }
                None => {
                    warn!(amount, "Transfer matches no awaiting payment, needs manual review");
                    Err(Error::NoMatch { amount })
                }
            };
        }
        [single] => single,
        several => {
            let intent_ids: Vec<i64> = several.iter().map(|i| i.id).collect();
            warn!(amount, ?intent_ids, "Transfer matches several awaiting payments");
            return Err(Error::AmbiguousMatch { amount, intent_ids });
        }
    };

    let Some(paid) = settle(&txn, intent, now).await? else {
        return Err(Error::NoMatch { amount });
    };
    txn.commit().await?;

    announce(services, &paid);
    Ok(MatchOutcome::Matched(paid))
}

/// Operator confirmation of one specific intent at the current time.
pub async fn confirm_intent(
    db: &DatabaseConnection,
    services: &LedgerServices,
    intent_id: i64,
) -> Result<MatchOutcome> {
    confirm_intent_at(db, services, intent_id, Utc::now()).await
}

/// Marks `intent_id` paid on an operator's word, e.g. to settle an
/// ambiguous transfer. The deadline is not checked; an expired intent can
/// no longer be confirmed.
#[instrument(skip(db, services))]
pub async fn confirm_intent_at(
    db: &DatabaseConnection,
    services: &LedgerServices,
    intent_id: i64,
    now: DateTime<Utc>,
) -> Result<MatchOutcome> {
    let txn = db.begin().await?;

    let intent = ManualPaymentIntent::find_by_id(intent_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("payment intent", intent_id))?;

    match intent.status {
        IntentStatus::Paid => return Ok(MatchOutcome::AlreadyPaid(intent)),
        IntentStatus::Expired => {
            return Err(Error::InvalidTransition {
                entity: "payment intent",
                id: intent_id,
                from: intent.status.to_string(),
                to: IntentStatus::Paid.to_string(),
            });
        }
        IntentStatus::Awaiting => {}
    }

    let paid = match settle(&txn, &intent, now).await? {
        Some(paid) => paid,
        None => {
            let current = ManualPaymentIntent::find_by_id(intent_id)
                .one(&txn)
                .await?
                .ok_or_else(|| Error::not_found("payment intent", intent_id))?;
            return if current.status == IntentStatus::Paid {
                Ok(MatchOutcome::AlreadyPaid(current))
            } else {
                Err(Error::InvalidTransition {
                    entity: "payment intent",
                    id: intent_id,
                    from: current.status.to_string(),
                    to: IntentStatus::Paid.to_string(),
                })
            };
        }
    };
    txn.commit().await?;

    announce(services, &paid);
    Ok(MatchOutcome::Matched(paid))
}

/// Expires overdue intents at the current time.
pub async fn expire_overdue_intents(db: &DatabaseConnection) -> Result<ExpirySweepResult> {
    expire_overdue_intents_at(db, Utc::now()).await
}

/// Moves every awaiting intent with `expires_at <= now` to `EXPIRED`, and its
/// invoice too unless something else already paid it. Paid intents are never
/// touched, so running the sweep twice is harmless.
#[instrument(skip(db))]
pub async fn expire_overdue_intents_at(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
) -> Result<ExpirySweepResult> {
    let txn = db.begin().await?;

    let overdue: Vec<(i64, i64)> = ManualPaymentIntent::find()
        .select_only()
        .column(manual_payment_intent::Column::Id)
        .column(manual_payment_intent::Column::InvoiceId)
        .filter(manual_payment_intent::Column::Status.eq(IntentStatus::Awaiting))
        .filter(manual_payment_intent::Column::ExpiresAt.lte(now))
        .into_tuple()
        .all(&txn)
        .await?;

    if overdue.is_empty() {
        txn.commit().await?;
        debug!(swept_at = %now, "No overdue payment intents");
        return Ok(ExpirySweepResult {
            expired: 0,
            invoices_expired: 0,
            swept_at: now,
        });
    }

    let (intent_ids, invoice_ids): (Vec<i64>, Vec<i64>) = overdue.into_iter().unzip();

    let expired = ManualPaymentIntent::update_many()
        .set(manual_payment_intent::ActiveModel {
            status: Set(IntentStatus::Expired),
            ..Default::default()
        })
        .filter(manual_payment_intent::Column::Id.is_in(intent_ids.iter().copied()))
        .filter(manual_payment_intent::Column::Status.eq(IntentStatus::Awaiting))
        .exec(&txn)
        .await?
        .rows_affected;
    let invoices_expired = invoice::expire_unpaid(&txn, &invoice_ids).await?;

    txn.commit().await?;

    info!(
        expired,
        invoices_expired,
        ?intent_ids,
        from = %IntentStatus::Awaiting,
        to = %IntentStatus::Expired,
        swept_at = %now,
        "Expired overdue payment intents"
    );
    Ok(ExpirySweepResult {
        expired,
        invoices_expired,
        swept_at: now,
    })
}
