//! Per-request building blocks used by the orchestrator.

pub mod accounts;
pub mod classifier;
pub mod transaction;

pub use accounts::AccountRegistrar;
pub use classifier::AddressClassifier;
pub use transaction::TransactionService;
