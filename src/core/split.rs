//! Revenue split - How a sale is divided between affiliate, mentor, company
//! and founders, and the accrual of those shares as pending revenue.
//!
//! All arithmetic is integer. Each step's last share takes the remainder, so
//! the shares always add up to the sale amount exactly.

use crate::{
    config::settings::RevenueSplitSettings,
    core::{ledger::insert_pending_revenue, wallet::get_or_create_wallet},
    entities::pending_revenue::{self, RevenueType},
    errors::{Error, Result},
};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{info, instrument};

/// Affiliate commission as configured on the product
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffiliateCommission {
    /// Percent of the sale amount
    Percentage(u32),
    /// Fixed amount, capped at the sale amount
    Flat(i64),
}

impl AffiliateCommission {
    /// Commission for a referred sale: the product's own when it defines
    /// one, the configured default percentage otherwise.
    #[must_use]
    pub const fn for_product(product: Option<Self>, rates: &RevenueSplitSettings) -> Self {
        match product {
            Some(commission) => commission,
            None => Self::Percentage(rates.default_affiliate_percent),
        }
    }
}

/// Which split rules apply to a sale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleKind {
    /// Company fee, then founder / co-founder split
    Standard,
    /// Course by a mentor: mentor takes a percent of what the affiliate left,
    /// the company keeps the rest
    MentoredCourse {
        /// Mentor's percent of the remainder
        mentor_percent: u32,
    },
    /// Course taught by a founder: the company keeps everything after the
    /// affiliate
    FounderCourse,
    /// Paid event: the creator takes a percent of the full price, the rest
    /// follows the standard split
    Event {
        /// Creator's percent of the sale amount
        creator_percent: u32,
    },
}

/// A sale to split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitRequest {
    /// Sale amount
    pub amount: i64,
    /// Affiliate commission, when the sale came through a referral
    pub affiliate: Option<AffiliateCommission>,
    /// Split rules
    pub kind: SaleKind,
}

/// Result of a split. `affiliate + mentor + company + founder + cofounder == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevenueSplit {
    /// Sale amount
    pub total: i64,
    /// Affiliate commission
    pub affiliate: i64,
    /// Mentor or event creator share
    pub mentor: i64,
    /// Company fee
    pub company: i64,
    /// Founder share
    pub founder: i64,
    /// Co-founder share
    pub cofounder: i64,
}

/// Users receiving the shares of a split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRecipients {
    /// Referring affiliate
    pub affiliate: Option<String>,
    /// Course mentor or event creator
    pub mentor: Option<String>,
    /// Founder
    pub founder: String,
    /// Co-founder
    pub cofounder: String,
}

fn percent_of(amount: i64, percent: u32) -> Result<i64> {
    if percent > 100 {
        return Err(Error::Validation {
            message: format!("Percentage {percent} exceeds 100"),
        });
    }
    // amount * percent / 100 cannot exceed amount, so the cast back is lossless
    let share = i128::from(amount) * i128::from(percent) / 100;
    i64::try_from(share).map_err(|_| Error::InvalidAmount { amount })
}

fn standard_split(
    remaining: i64,
    rates: &RevenueSplitSettings,
) -> Result<(i64, i64, i64)> {
    let company = percent_of(remaining, rates.company_percent)?;
    let for_founders = remaining - company;
    let founder = percent_of(for_founders, rates.founder_percent)?;
    Ok((company, founder, for_founders - founder))
}

/// Splits a sale according to `request.kind` and the configured rates.
///
/// # Errors
/// - [`Error::InvalidAmount`] for a non-positive sale or negative flat fee
/// - [`Error::Validation`] for percentages above 100 or shares exceeding the
///   sale amount
pub fn calculate_split(request: &SplitRequest, rates: &RevenueSplitSettings) -> Result<RevenueSplit> {
    let amount = request.amount;
    if amount <= 0 {
        return Err(Error::InvalidAmount { amount });
    }

    let affiliate = match request.affiliate {
        None => 0,
        Some(AffiliateCommission::Percentage(percent)) => percent_of(amount, percent)?,
        Some(AffiliateCommission::Flat(flat)) if flat < 0 => {
            return Err(Error::InvalidAmount { amount: flat });
        }
        Some(AffiliateCommission::Flat(flat)) => flat.min(amount),
    };
    let remaining = amount - affiliate;

    let mut split = RevenueSplit {
        total: amount,
        affiliate,
        ..Default::default()
    };

    match request.kind {
        SaleKind::Standard => {
            (split.company, split.founder, split.cofounder) = standard_split(remaining, rates)?;
        }
        SaleKind::MentoredCourse { mentor_percent } => {
            split.mentor = percent_of(remaining, mentor_percent)?;
            split.company = remaining - split.mentor;
        }
        SaleKind::FounderCourse => split.company = remaining,
        SaleKind::Event { creator_percent } => {
            split.mentor = percent_of(amount, creator_percent)?;
            let after_creator = remaining - split.mentor;
            if after_creator < 0 {
                return Err(Error::Validation {
                    message: format!(
                        "Affiliate ({affiliate}) and creator ({}) shares exceed sale amount {amount}",
                        split.mentor
                    ),
                });
            }
            (split.company, split.founder, split.cofounder) = standard_split(after_creator, rates)?;
        }
    }

    Ok(split)
}

fn share_recipient<'a>(
    share: i64,
    recipient: Option<&'a str>,
    role: &str,
) -> Result<Option<&'a str>> {
    match (share, recipient) {
        (0, _) => Ok(None),
        (_, Some(user_id)) => Ok(Some(user_id)),
        (_, None) => Err(Error::Validation {
            message: format!("A {role} share of {share} has no recipient"),
        }),
    }
}

/// Accrues every non-zero share of `split` as a pending entry on the
/// recipient's wallet, creating wallets on first use. All entries are
/// written in one transaction. The company fee is not accrued.
#[instrument(skip(db, split, recipients))]
pub async fn accrue_split(
    db: &DatabaseConnection,
    transaction_ref: &str,
    split: &RevenueSplit,
    recipients: &SplitRecipients,
) -> Result<Vec<pending_revenue::Model>> {
    let shares = [
        (
            RevenueType::AffiliateCommission,
            split.affiliate,
            share_recipient(split.affiliate, recipients.affiliate.as_deref(), "affiliate")?,
        ),
        (
            RevenueType::MentorShare,
            split.mentor,
            share_recipient(split.mentor, recipients.mentor.as_deref(), "mentor")?,
        ),
        (
            RevenueType::FounderShare,
            split.founder,
            share_recipient(split.founder, Some(recipients.founder.as_str()), "founder")?,
        ),
        (
            RevenueType::CofounderShare,
            split.cofounder,
            share_recipient(split.cofounder, Some(recipients.cofounder.as_str()), "co-founder")?,
        ),
    ];

    let txn = db.begin().await?;
    let mut entries = Vec::new();
    for (revenue_type, amount, recipient) in shares {
        let Some(user_id) = recipient else { continue };
        let wallet = get_or_create_wallet(&txn, user_id).await?;
        let entry = insert_pending_revenue(
            &txn,
            wallet.id,
            revenue_type,
            amount,
            Some(transaction_ref.to_string()),
        )
        .await?;
        entries.push(entry);
    }
    txn.commit().await?;

    info!(
        transaction_ref,
        total = split.total,
        company = split.company,
        accrued = entries.len(),
        "Revenue split accrued"
    );
    Ok(entries)
}
