//! Stable content fingerprints for listing deduplication.
//!
//! Two digests are computed for every listing: the primary hash identifies a
//! listing by its source and source-assigned id and backs the uniqueness index
//! in storage, the semantic hash fingerprints the normalized content (title,
//! price, phone) for cross-source duplicate detection. Both are plain SHA-256
//! with no salt so the same inputs always hash the same across restarts.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Country prefix applied to phone numbers that carry no explicit one.
pub const DEFAULT_PHONE_PREFIX: &str = "+48";

/// Identity fingerprint of a listing: `source_id | external_id`.
pub fn primary_hash(source_id: &str, external_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(external_id.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Content fingerprint over normalized title, price and phone.
///
/// Absent price/phone hash as empty segments so records with and without
/// them still produce comparable digests.
pub fn semantic_hash(title: &str, price: Option<&Decimal>, phone: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    if let Some(price) = price {
        hasher.update(price.to_string().as_bytes());
    }
    hasher.update(b"|");
    if let Some(phone) = phone {
        hasher.update(digits_only(phone).as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Normalize a raw phone capture (`tel:` links, separator noise) into a
/// `+`-prefixed number. Numbers without a country prefix gain
/// [`DEFAULT_PHONE_PREFIX`]; empty input normalizes to `None`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_scheme = trimmed.strip_prefix("tel:").unwrap_or(trimmed);

    let has_prefix = without_scheme.trim_start().starts_with('+');
    let digits = digits_only(without_scheme);
    if digits.is_empty() {
        return None;
    }

    if has_prefix {
        Some(format!("+{}", digits))
    } else {
        Some(format!("{}{}", DEFAULT_PHONE_PREFIX, digits))
    }
}

fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_primary_hash_is_stable() {
        let a = primary_hash("olx", "abc123");
        let b = primary_hash("olx", "abc123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_primary_hash_normalizes_source_casing() {
        assert_eq!(primary_hash("OLX", "abc123"), primary_hash("olx", "abc123"));
    }

    #[test]
    fn test_primary_hash_distinct_pairs() {
        assert_ne!(primary_hash("olx", "abc123"), primary_hash("olx", "abc124"));
        assert_ne!(
            primary_hash("olx", "abc123"),
            primary_hash("gumtree", "abc123")
        );
    }

    #[test]
    fn test_semantic_hash_normalizes_title() {
        let price = Decimal::from_str("45000").unwrap();
        let a = semantic_hash("Audi A4", Some(&price), None);
        let b = semantic_hash("  audi a4  ", Some(&price), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_semantic_hash_price_sensitivity() {
        let p1 = Decimal::from_str("45000").unwrap();
        let p2 = Decimal::from_str("44000").unwrap();
        assert_ne!(
            semantic_hash("Audi A4", Some(&p1), None),
            semantic_hash("Audi A4", Some(&p2), None)
        );
        assert_ne!(
            semantic_hash("Audi A4", Some(&p1), None),
            semantic_hash("Audi A4", None, None)
        );
    }

    #[test]
    fn test_semantic_hash_phone_digits_only() {
        let a = semantic_hash("Audi A4", None, Some("+48 123 456 789"));
        let b = semantic_hash("Audi A4", None, Some("48123456789"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_phone_adds_country_prefix() {
        assert_eq!(
            normalize_phone("tel:123456789"),
            Some("+48123456789".to_string())
        );
        assert_eq!(
            normalize_phone("123 456 789"),
            Some("+48123456789".to_string())
        );
    }

    #[test]
    fn test_normalize_phone_keeps_existing_prefix() {
        assert_eq!(
            normalize_phone("tel:+48123456789"),
            Some("+48123456789".to_string())
        );
        assert_eq!(
            normalize_phone("+49 151 2345 678"),
            Some("+491512345678".to_string())
        );
    }

    #[test]
    fn test_normalize_phone_empty() {
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("tel:"), None);
        assert_eq!(normalize_phone("call me"), None);
    }
}
