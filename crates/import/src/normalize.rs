//! Header validation and conversion of extracted strings into typed fields.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tally_core::{AccountId, Money, TransactionRecord};
use thiserror::Error;

use crate::csv::RawRow;
use crate::dedup;
use crate::extract::extract_all;
use crate::format::{DecimalSeparator, FieldName, FormatVersion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField {
    pub field: FieldName,
    pub expected: Vec<String>,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (expected: {})", self.field, self.expected.join(" | "))
    }
}

/// The file header cannot feed every mapped field of the chosen version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Header does not fit version '{version}', missing {}", join_missing(.missing))]
pub struct HeaderValidationError {
    pub version: String,
    pub missing: Vec<MissingField>,
}

fn join_missing(missing: &[MissingField]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid amount '{raw}': {reason}")]
pub struct AmountParseError {
    pub raw: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid date '{raw}' for format '{format}'")]
pub struct DateParseError {
    pub raw: String,
    pub format: String,
}

/// Row-scoped failure: the row is skipped and the file continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error(transparent)]
    Amount(#[from] AmountParseError),
    #[error(transparent)]
    Date(#[from] DateParseError),
    #[error("Malformed row: {0}")]
    Malformed(String),
}

/// Every mapped field needs at least one of its source columns in the header.
pub fn validate_headers(
    version: &FormatVersion,
    headers: &[String],
) -> Result<(), HeaderValidationError> {
    let present: HashSet<&str> = headers.iter().map(String::as_str).collect();
    let missing: Vec<MissingField> = version
        .columns
        .iter()
        .filter(|(_, spec)| !spec.is_absent())
        .filter(|(_, spec)| !spec.source_columns().iter().any(|c| present.contains(c)))
        .map(|(field, spec)| MissingField {
            field: *field,
            expected: spec.source_columns().into_iter().map(str::to_string).collect(),
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(HeaderValidationError {
            version: version.name.clone(),
            missing,
        })
    }
}

pub fn parse_amount(raw: &str, separator: DecimalSeparator) -> Result<Money, AmountParseError> {
    let fail = |reason: &str| AmountParseError {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut s: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '€' | '$' | '£' | '\''))
        .collect();
    for code in ["EUR", "USD", "GBP", "CHF"] {
        if let Some(rest) = s.strip_suffix(code).or_else(|| s.strip_prefix(code)) {
            s = rest.to_string();
        }
    }

    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        s = inner.to_string();
    }
    if let Some(rest) = s.strip_suffix('-') {
        negative = !negative;
        s = rest.to_string();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.to_string();
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest.to_string();
    }

    if s.is_empty() {
        return Err(fail("empty value"));
    }

    let (int_part, frac_part) = match s.split_once(separator.as_char()) {
        Some((i, f)) => (i, Some(f)),
        None => (s.as_str(), None),
    };
    let int_digits = strip_grouping(int_part, separator.thousands_char())
        .ok_or_else(|| fail("misplaced thousands separator"))?;
    let frac_digits = frac_part.unwrap_or("");
    if !frac_digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(fail("unexpected characters"));
    }
    if int_digits.is_empty() && frac_digits.is_empty() {
        return Err(fail("no digits"));
    }

    let canonical = format!(
        "{}{}.{}",
        if negative { "-" } else { "" },
        if int_digits.is_empty() { "0" } else { &int_digits },
        if frac_digits.is_empty() { "0" } else { frac_digits },
    );
    let decimal = Decimal::from_str(&canonical).map_err(|e| fail(&e.to_string()))?;
    Money::from_decimal(decimal).map_err(|e| fail(&e.to_string()))
}

/// Removes grouping characters, which must split the digits into groups of
/// three after a leading group of one to three.
fn strip_grouping(int_part: &str, thousands: char) -> Option<String> {
    let groups: Vec<&str> = int_part.split(thousands).collect();
    if !int_part.chars().all(|c| c.is_ascii_digit() || c == thousands) {
        return None;
    }
    if groups.len() > 1 {
        let first_ok = (1..=3).contains(&groups[0].len());
        let rest_ok = groups[1..].iter().all(|g| g.len() == 3);
        if !first_ok || !rest_ok {
            return None;
        }
    }
    Some(groups.concat())
}

pub fn parse_date(raw: &str, format: &str) -> Result<NaiveDate, DateParseError> {
    NaiveDate::parse_from_str(raw.trim(), format).map_err(|_| DateParseError {
        raw: raw.to_string(),
        format: format.to_string(),
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// Turns one raw row into a fingerprinted record for `account_id`.
pub fn normalize(
    row: &RawRow,
    version: &FormatVersion,
    account_id: AccountId,
) -> Result<TransactionRecord, RowError> {
    let fields = extract_all(row, version);
    let text = |field: FieldName| fields.get(&field).map(String::as_str).unwrap_or_default();

    let date_value = parse_date(text(FieldName::DateValue), &version.date_format)?;
    let amount = parse_amount(text(FieldName::Amount), version.decimal_separator)?;
    let description = text(FieldName::Description).to_string();
    let iban = non_empty(fields.get(&FieldName::Iban));

    let fingerprint =
        dedup::fingerprint(account_id, iban.as_deref(), &description, amount, date_value);

    Ok(TransactionRecord {
        account_id,
        date_value,
        amount,
        description,
        iban,
        bic: non_empty(fields.get(&FieldName::Bic)),
        recipient_applicant: non_empty(fields.get(&FieldName::RecipientApplicant)),
        account_number: non_empty(fields.get(&FieldName::Account)),
        fingerprint,
    })
}
