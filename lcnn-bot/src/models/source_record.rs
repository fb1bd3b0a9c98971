//! Authority records as observed in the change feed

use chrono::{DateTime, Utc};
use lcnn_common::time::canonical;
use serde::{Deserialize, Serialize};

/// One change-feed item before its payload has been fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecordRef {
    /// LCCN, the last path segment of the record URI
    pub record_id: String,
    /// Record URI as published in the feed
    pub uri: String,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceRecordRef {
    /// Idempotency key of this record version
    pub fn ledger_key(&self) -> String {
        ledger_key(&self.record_id, &self.published_at, &self.updated_at)
    }
}

/// `recordId|publishedAt|updatedAt` with canonical RFC 3339 timestamps.
///
/// Any change to either timestamp yields a new key.
pub fn ledger_key(record_id: &str, published_at: &DateTime<Utc>, updated_at: &DateTime<Utc>) -> String {
    format!(
        "{}|{}|{}",
        record_id,
        canonical(published_at),
        canonical(updated_at)
    )
}

/// One `$code value` pair of a data field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subfield {
    pub code: char,
    pub value: String,
}

/// A tagged field of the authority record.
///
/// Control fields (`001`–`009`) carry `value`; data fields carry subfields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawField {
    pub tag: String,
    pub value: Option<String>,
    pub subfields: Vec<Subfield>,
}

impl RawField {
    pub fn control(tag: &str, value: &str) -> Self {
        Self {
            tag: tag.to_string(),
            value: Some(value.to_string()),
            subfields: Vec::new(),
        }
    }

    pub fn data(tag: &str, subfields: &[(char, &str)]) -> Self {
        Self {
            tag: tag.to_string(),
            value: None,
            subfields: subfields
                .iter()
                .map(|(code, value)| Subfield {
                    code: *code,
                    value: value.to_string(),
                })
                .collect(),
        }
    }

    pub fn subfield_values(&self, code: char) -> impl Iterator<Item = &str> {
        self.subfields
            .iter()
            .filter(move |s| s.code == code)
            .map(|s| s.value.as_str())
    }

    pub fn first_subfield(&self, code: char) -> Option<&str> {
        self.subfield_values(code).next()
    }

    /// Flattened field text: the control value, or subfield values joined by spaces
    pub fn text(&self) -> String {
        match &self.value {
            Some(value) => value.clone(),
            None => self
                .subfields
                .iter()
                .map(|s| s.value.trim())
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// A fully fetched authority record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub record_id: String,
    pub uri: String,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Authorized heading text
    pub preferred_label: String,
    pub raw_fields: Vec<RawField>,
}

impl SourceRecord {
    pub fn from_ref(reference: &SourceRecordRef, preferred_label: String, raw_fields: Vec<RawField>) -> Self {
        Self {
            record_id: reference.record_id.clone(),
            uri: reference.uri.clone(),
            published_at: reference.published_at,
            updated_at: reference.updated_at,
            preferred_label,
            raw_fields,
        }
    }

    pub fn ledger_key(&self) -> String {
        ledger_key(&self.record_id, &self.published_at, &self.updated_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference(updated_minute: u32) -> SourceRecordRef {
        SourceRecordRef {
            record_id: "n79021164".to_string(),
            uri: "http://id.loc.gov/authorities/names/n79021164".to_string(),
            published_at: Utc.with_ymd_and_hms(2025, 10, 1, 9, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 10, 17, 14, updated_minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_ledger_key_format() {
        assert_eq!(
            reference(2).ledger_key(),
            "n79021164|2025-10-01T09:00:00Z|2025-10-17T14:02:00Z"
        );
    }

    #[test]
    fn test_ledger_key_changes_with_update_timestamp() {
        assert_ne!(reference(2).ledger_key(), reference(3).ledger_key());
    }

    #[test]
    fn test_record_key_matches_ref_key() {
        let r = reference(2);
        let record = SourceRecord::from_ref(&r, "Twain, Mark, 1835-1910".to_string(), vec![]);
        assert_eq!(record.ledger_key(), r.ledger_key());
    }

    #[test]
    fn test_field_text() {
        let field = RawField::data("100", &[('a', "Twain, Mark,"), ('d', "1835-1910")]);
        assert_eq!(field.text(), "Twain, Mark, 1835-1910");
        assert_eq!(field.first_subfield('d'), Some("1835-1910"));
        assert_eq!(field.first_subfield('q'), None);

        let control = RawField::control("001", "n 79021164");
        assert_eq!(control.text(), "n 79021164");
    }
}
