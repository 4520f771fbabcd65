use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tally_core::{AccountId, Money};

/// Separates fingerprint components so `("ab", "c")` and `("a", "bc")` differ.
const UNIT_SEPARATOR: &[u8] = b"\x1f";

/// Stable dedup key over the account and the core transaction fields.
/// Lowercase hex SHA-256, 64 chars.
pub fn fingerprint(
    account_id: AccountId,
    iban: Option<&str>,
    description: &str,
    amount: Money,
    date_value: NaiveDate,
) -> String {
    let mut hasher = Sha256::new();
    let parts = [
        account_id.to_string(),
        iban.unwrap_or_default().to_string(),
        description.to_string(),
        amount.to_string(),
        date_value.format("%Y-%m-%d").to_string(),
    ];
    for part in &parts {
        hasher.update(part.as_bytes());
        hasher.update(UNIT_SEPARATOR);
    }
    to_hex(&hasher.finalize().into())
}

fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn base() -> String {
        fingerprint(
            AccountId(1),
            Some("DE89370400440532013000"),
            "REWE Markt",
            Money::from_cents(-2000),
            date(2024, 3, 1),
        )
    }

    #[test]
    fn fingerprint_is_deterministic_hex() {
        assert_eq!(base(), base());
        assert_eq!(base().len(), 64);
        assert!(base().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_changes_with_each_component() {
        let iban = Some("DE89370400440532013000");
        let amount = Money::from_cents(-2000);
        let day = date(2024, 3, 1);
        let variants = [
            fingerprint(AccountId(2), iban, "REWE Markt", amount, day),
            fingerprint(AccountId(1), None, "REWE Markt", amount, day),
            fingerprint(AccountId(1), iban, "REWE Markt 2", amount, day),
            fingerprint(AccountId(1), iban, "REWE Markt", Money::from_cents(-2001), day),
            fingerprint(AccountId(1), iban, "REWE Markt", amount, date(2024, 3, 2)),
        ];
        for v in &variants {
            assert_ne!(v, &base());
        }
    }

    #[test]
    fn component_boundaries_are_unambiguous() {
        let a = fingerprint(AccountId(1), Some("AB"), "C", Money::from_cents(0), date(2024, 1, 1));
        let b = fingerprint(AccountId(1), Some("A"), "BC", Money::from_cents(0), date(2024, 1, 1));
        assert_ne!(a, b);
    }

    #[test]
    fn equal_amounts_with_different_scale_match() {
        let a = fingerprint(AccountId(1), None, "x", "5".parse().unwrap(), date(2024, 1, 1));
        let b = fingerprint(AccountId(1), None, "x", "5.00".parse().unwrap(), date(2024, 1, 1));
        assert_eq!(a, b);
    }
}
