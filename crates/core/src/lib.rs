pub mod account;
pub mod money;
pub mod store;
pub mod transaction;

pub use account::{AccountId, CategoryId, RuleId, TransactionId};
pub use money::{Money, MoneyError};
pub use store::{ImportBatch, InsertOutcome, StoreError, StoredTransaction, TransactionStore};
pub use transaction::TransactionRecord;
