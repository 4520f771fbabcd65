use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::account::{AccountId, CategoryId, TransactionId};
use super::transaction::TransactionRecord;

/// Result of an atomic insert attempt keyed by `(account_id, fingerprint)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(TransactionId),
    Duplicate,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),
    #[error("Unknown category: {0}")]
    UnknownCategory(CategoryId),
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransaction {
    pub id: TransactionId,
    pub record: TransactionRecord,
    pub category_id: Option<CategoryId>,
}

/// Summary row written once per finished file import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub file_name: String,
    pub account_id: AccountId,
    pub format: String,
    pub version: Option<String>,
    pub imported: usize,
    pub duplicates: usize,
    pub errors: usize,
}

/// Persistence boundary of the import pipeline.
///
/// `insert_transaction_if_absent` must be atomic with respect to the
/// per-account fingerprint uniqueness constraint: a conflicting insert reports
/// [`InsertOutcome::Duplicate`] instead of failing, and no caller may observe
/// "absent" for a fingerprint another caller has already written.
pub trait TransactionStore: Send + Sync {
    fn account_exists(
        &self,
        account: AccountId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn insert_transaction_if_absent(
        &self,
        record: &TransactionRecord,
    ) -> impl Future<Output = Result<InsertOutcome, StoreError>> + Send;

    fn set_category(
        &self,
        transaction: TransactionId,
        category: CategoryId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Transactions without a category, oldest first. `None` means all accounts.
    fn uncategorized_transactions(
        &self,
        account: Option<AccountId>,
    ) -> impl Future<Output = Result<Vec<StoredTransaction>, StoreError>> + Send;

    fn record_import(
        &self,
        batch: &ImportBatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
