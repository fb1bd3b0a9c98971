//! Identifier extraction from authority record fields
//!
//! Two fields carry links to other systems: `024` (other standard
//! identifier, scanned whole) and `670` (source citation, `$u` only).
//! Every match is collected in field order; plurality is the decision
//! engine's problem.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{CandidateIdentifier, ExtractedIdentifiers, RawField};

/// Tag of the "other standard identifier" field
pub const TAG_STANDARD_IDENTIFIER: &str = "024";
/// Tag of the "source data found" citation field
pub const TAG_SOURCE_CITATION: &str = "670";

/// Knowledge-base entity URL, any path shape ending in a QID
static PRIMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)wikidata\.org/(?:[\w:.-]+/)*(Q[0-9]+)\b").expect("primary pattern is valid")
});

/// Bare QID as used in `024 $a` with `$2 wikidata`
static BARE_QID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(Q[0-9]+)\s*$").expect("bare QID pattern is valid"));

/// Cross-reference authority URL
static CROSS_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)viaf\.org/viaf/([0-9]+)").expect("cross-reference pattern is valid"));

/// Pull candidate identifiers out of a record's fields
pub fn extract(fields: &[RawField]) -> ExtractedIdentifiers {
    let mut extracted = ExtractedIdentifiers::default();

    for field in fields {
        let texts: Vec<&str> = match field.tag.as_str() {
            TAG_STANDARD_IDENTIFIER => field.subfields.iter().map(|s| s.value.as_str()).collect(),
            TAG_SOURCE_CITATION => field.subfield_values('u').collect(),
            _ => continue,
        };

        for text in &texts {
            collect_matches(text, &mut extracted);
        }

        if field.tag == TAG_STANDARD_IDENTIFIER && is_wikidata_source(field) {
            for value in field.subfield_values('a') {
                if let Some(caps) = BARE_QID_RE.captures(value) {
                    extracted
                        .primary
                        .push(CandidateIdentifier::primary(&caps[1].to_uppercase()));
                }
            }
        }
    }

    extracted
}

/// True when any field names the knowledge base but no candidate could be
/// pulled out of the identifier fields
pub fn mentions_knowledge_base(fields: &[RawField], extracted: &ExtractedIdentifiers) -> bool {
    if !extracted.primary.is_empty() {
        return false;
    }
    fields.iter().any(|f| f.text().to_ascii_lowercase().contains("wikidata"))
}

fn collect_matches(text: &str, extracted: &mut ExtractedIdentifiers) {
    for caps in PRIMARY_RE.captures_iter(text) {
        extracted
            .primary
            .push(CandidateIdentifier::primary(&caps[1].to_uppercase()));
    }
    for caps in CROSS_REF_RE.captures_iter(text) {
        extracted
            .cross_references
            .push(CandidateIdentifier::cross_reference(&caps[1]));
    }
}

fn is_wikidata_source(field: &RawField) -> bool {
    field
        .subfield_values('2')
        .any(|source| source.trim().eq_ignore_ascii_case("wikidata"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandidateKind;

    fn values(candidates: &[CandidateIdentifier]) -> Vec<&str> {
        candidates.iter().map(|c| c.value.as_str()).collect()
    }

    #[test]
    fn test_no_identifier_fields_yields_empty() {
        let fields = vec![
            RawField::control("001", "n 79021164"),
            RawField::data("100", &[('a', "Twain, Mark,"), ('d', "1835-1910")]),
        ];
        let extracted = extract(&fields);
        assert!(extracted.is_empty());
    }

    #[test]
    fn test_024_uri_yields_primary() {
        let fields = vec![RawField::data(
            "024",
            &[('a', "http://www.wikidata.org/entity/Q7245"), ('2', "uri")],
        )];
        let extracted = extract(&fields);
        assert_eq!(values(&extracted.primary), vec!["Q7245"]);
        assert_eq!(extracted.primary[0].kind, CandidateKind::PrimaryTarget);
    }

    #[test]
    fn test_024_bare_qid_with_wikidata_source() {
        let fields = vec![RawField::data("024", &[('a', "Q42"), ('2', "wikidata")])];
        assert_eq!(values(&extract(&fields).primary), vec!["Q42"]);
    }

    #[test]
    fn test_bare_qid_without_wikidata_source_ignored() {
        let fields = vec![RawField::data("024", &[('a', "Q42"), ('2', "isni")])];
        assert!(extract(&fields).primary.is_empty());
    }

    #[test]
    fn test_670_only_subfield_u_is_scanned() {
        let fields = vec![RawField::data(
            "670",
            &[
                ('a', "Wikidata, viewed Oct. 1, 2025 (https://www.wikidata.org/wiki/Q99999)"),
                ('b', "(Mark Twain)"),
                ('u', "https://www.wikidata.org/wiki/Q7245"),
            ],
        )];
        assert_eq!(values(&extract(&fields).primary), vec!["Q7245"]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let fields = vec![
            RawField::data("024", &[('a', "http://www.wikidata.org/entity/Q7245"), ('2', "uri")]),
            RawField::data("670", &[('a', "Wikidata"), ('u', "https://www.wikidata.org/wiki/Q7245")]),
        ];
        let extracted = extract(&fields);
        assert_eq!(values(&extracted.primary), vec!["Q7245", "Q7245"]);
        assert_eq!(extracted.distinct_primary(), vec!["Q7245"]);
    }

    #[test]
    fn test_viaf_cross_reference() {
        let fields = vec![RawField::data(
            "024",
            &[('a', "http://viaf.org/viaf/50566653"), ('2', "uri")],
        )];
        let extracted = extract(&fields);
        assert!(extracted.primary.is_empty());
        assert_eq!(values(&extracted.cross_references), vec!["50566653"]);
    }

    #[test]
    fn test_special_entity_page_path() {
        let fields = vec![RawField::data(
            "670",
            &[('u', "https://www.wikidata.org/wiki/Special:EntityPage/Q1339")],
        )];
        assert_eq!(values(&extract(&fields).primary), vec!["Q1339"]);
    }

    #[test]
    fn test_pattern_miss_is_reported() {
        let fields = vec![RawField::data(
            "670",
            &[('a', "Wikidata, Oct. 2, 2025"), ('u', "https://m.wikidata.org/item-without-id")],
        )];
        let extracted = extract(&fields);
        assert!(extracted.primary.is_empty());
        assert!(mentions_knowledge_base(&fields, &extracted));
    }

    #[test]
    fn test_mention_outside_identifier_fields_is_reported() {
        let fields = vec![
            RawField::data("100", &[('a', "Twain, Mark,"), ('d', "1835-1910")]),
            RawField::data("510", &[('a', "Indexed in Wikidata")]),
        ];
        let extracted = extract(&fields);
        assert!(extracted.primary.is_empty());
        assert!(mentions_knowledge_base(&fields, &extracted));
    }

    #[test]
    fn test_no_mention_is_not_reported() {
        let fields = vec![RawField::data("670", &[('a', "Tom Sawyer, 1876")])];
        assert!(!mentions_knowledge_base(&fields, &extract(&fields)));
    }
}
