//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod invoice;
pub mod manual_payment_intent;
pub mod pending_revenue;
pub mod wallet;
pub mod wallet_transaction;

// Re-export specific types to avoid conflicts
pub use invoice::{Column as InvoiceColumn, Entity as Invoice, Model as InvoiceModel};
pub use manual_payment_intent::{
    Column as ManualPaymentIntentColumn, Entity as ManualPaymentIntent,
    Model as ManualPaymentIntentModel,
};
pub use pending_revenue::{
    Column as PendingRevenueColumn, Entity as PendingRevenue, Model as PendingRevenueModel,
};
pub use wallet::{Column as WalletColumn, Entity as Wallet, Model as WalletModel};
pub use wallet_transaction::{
    Column as WalletTransactionColumn, Entity as WalletTransaction,
    Model as WalletTransactionModel,
};
