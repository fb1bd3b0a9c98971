//! Knowledge-base claim snapshots for the tracked identifier property

use serde::{Deserialize, Serialize};

/// A qualifier attached to a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualifier {
    /// Qualifier property id, e.g. `P1810` ("subject named as")
    pub property: String,
    pub value: String,
    /// Snak hash, needed to replace this qualifier in place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// One statement of the tracked property on the target entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Statement GUID, absent for claims not yet written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    pub value: String,
    #[serde(default)]
    pub qualifiers: Vec<Qualifier>,
}

impl Claim {
    pub fn new(value: &str) -> Self {
        Self {
            claim_id: None,
            value: value.to_string(),
            qualifiers: Vec::new(),
        }
    }

    pub fn with_qualifier(mut self, property: &str, value: &str) -> Self {
        self.qualifiers.push(Qualifier {
            property: property.to_string(),
            value: value.to_string(),
            hash: None,
        });
        self
    }

    /// Qualifier entries for one property, in statement order
    pub fn qualifiers_for<'a>(&'a self, property: &'a str) -> impl Iterator<Item = &'a Qualifier> + 'a {
        self.qualifiers.iter().filter(move |q| q.property == property)
    }

    /// Identifier values compare case-insensitively
    pub fn has_value(&self, value: &str) -> bool {
        self.value.trim().eq_ignore_ascii_case(value.trim())
    }
}

/// State of a target entity's claims for one property, fetched just before deciding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSnapshot {
    pub entity_id: String,
    pub property: String,
    pub claims: Vec<Claim>,
}

impl ClaimSnapshot {
    pub fn empty(entity_id: &str, property: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            property: property.to_string(),
            claims: Vec::new(),
        }
    }

    pub fn with_claims(entity_id: &str, property: &str, claims: Vec<Claim>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            property: property.to_string(),
            claims,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// First claim whose value equals `value`, scanning every claim
    pub fn find_claim(&self, value: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.has_value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_claim_is_case_insensitive() {
        let snapshot = ClaimSnapshot::with_claims(
            "Q7245",
            "P244",
            vec![Claim::new("n80126307"), Claim::new("N79021164")],
        );

        let found = snapshot.find_claim("n79021164").unwrap();
        assert_eq!(found.value, "N79021164");
        assert!(snapshot.find_claim("n00000000").is_none());
    }

    #[test]
    fn test_qualifiers_for_filters_property() {
        let claim = Claim::new("n79021164")
            .with_qualifier("P1810", "Twain, Mark, 1835-1910")
            .with_qualifier("P580", "1900")
            .with_qualifier("P1810", "Clemens, Samuel");

        let named_as: Vec<_> = claim.qualifiers_for("P1810").map(|q| q.value.as_str()).collect();
        assert_eq!(named_as, vec!["Twain, Mark, 1835-1910", "Clemens, Samuel"]);
    }
}
