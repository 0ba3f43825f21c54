/// Approve and reject pending revenue
pub mod approval;

/// Invoice records settled by payments
pub mod invoice;

/// Pending revenue ledger
pub mod ledger;

/// Best-effort event notifications
pub mod notify;

/// Manual bank transfer reconciliation
pub mod reconciliation;

/// Bounded retry for transient storage errors
pub mod retry;

/// Collaborators shared by state-changing operations
pub mod services;

/// Revenue split calculation and accrual
pub mod split;

/// Wallet balances and movements
pub mod wallet;
