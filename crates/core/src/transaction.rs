use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::money::Money;

/// A bank statement line after extraction and normalization.
///
/// `fingerprint` is derived from the account and the core transaction fields;
/// two records with the same fingerprint are the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub account_id: AccountId,
    pub date_value: NaiveDate,
    pub amount: Money,
    pub description: String,
    pub iban: Option<String>,
    pub bic: Option<String>,
    pub recipient_applicant: Option<String>,
    /// Account number as printed in the statement, when the format maps one.
    pub account_number: Option<String>,
    pub fingerprint: String,
}
