//! AI-assisted matching
//!
//! Asks a language model whether an authority record and a knowledge-base
//! entity describe the same thing (one-to-one), or which of several entities
//! it describes (one-to-many). Fails closed: thin input never reaches the
//! model, and any response that does not fit the schema exactly is an error
//! rather than a verdict.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::error::ReconcileError;
use crate::models::{RawField, SourceRecord};
use crate::types::{EntityDescriber, LanguageModel, ModelRequest, VerdictShape};

/// Minimum non-empty lines per attribute block
pub const MIN_ATTRIBUTE_LINES: usize = 3;

/// Selection value meaning "none of the candidates"
pub const NO_SELECTION: &str = "None";

#[derive(Debug, Error)]
pub enum MatchError {
    /// A block had fewer than [`MIN_ATTRIBUTE_LINES`] lines; the model was not called
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// The response did not fit the schema
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    /// The model or a describer could not be reached
    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

impl From<MatchError> for ReconcileError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::InsufficientData(msg) => ReconcileError::InsufficientData(msg),
            other => ReconcileError::Match(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// One-to-one answer
    SameEntity(bool),
    /// One-to-many answer naming a candidate
    Selected(String),
    /// One-to-many answer rejecting every candidate
    NoneSelected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub verdict: Verdict,
    pub reason: String,
}

/// Labelled description of one side of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeBlock {
    pub id: String,
    pub lines: Vec<String>,
}

impl AttributeBlock {
    pub fn new(id: &str, lines: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            lines: lines
                .into_iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
        }
    }

    fn ensure_sufficient(&self, side: &str) -> Result<(), MatchError> {
        if self.lines.len() < MIN_ATTRIBUTE_LINES {
            return Err(MatchError::InsufficientData(format!(
                "{} {} has {} attribute lines, need {}",
                side,
                self.id,
                self.lines.len(),
                MIN_ATTRIBUTE_LINES
            )));
        }
        Ok(())
    }

    fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// Render an authority record as `label: value` lines
pub fn render_source_attributes(record: &SourceRecord) -> Vec<String> {
    let mut lines = vec![format!("Preferred label: {}", record.preferred_label)];
    for field in &record.raw_fields {
        lines.extend(render_field(field));
    }
    lines
}

fn render_field(field: &RawField) -> Vec<String> {
    let tag = field.tag.as_str();
    let label = match tag {
        "400" | "410" | "411" | "430" | "451" => "Variant name",
        "500" | "510" | "511" | "530" | "551" => "Related name",
        "372" => "Field of activity",
        "374" => "Occupation",
        "375" => "Gender",
        "377" => "Language",
        "678" => "Biographical note",
        "046" => return render_dates(field),
        "370" => return render_places(field),
        "670" => {
            let citation = [field.first_subfield('a'), field.first_subfield('b')]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            return vec![format!("Source citation: {}", citation)];
        }
        _ => return Vec::new(),
    };
    vec![format!("{}: {}", label, field.text())]
}

fn render_dates(field: &RawField) -> Vec<String> {
    let mut lines = Vec::new();
    for (code, label) in [('f', "Birth date"), ('g', "Death date"), ('s', "Active from"), ('t', "Active until")] {
        for value in field.subfield_values(code) {
            lines.push(format!("{}: {}", label, value));
        }
    }
    lines
}

fn render_places(field: &RawField) -> Vec<String> {
    let mut lines = Vec::new();
    for (code, label) in [
        ('a', "Place of birth"),
        ('b', "Place of death"),
        ('c', "Associated country"),
        ('e', "Place of residence"),
        ('f', "Other associated place"),
    ] {
        for value in field.subfield_values(code) {
            lines.push(format!("{}: {}", label, value));
        }
    }
    lines
}

/// Prompt for a yes/no comparison of one record with one entity
pub fn build_one_to_one_prompt(source: &AttributeBlock, candidate: &AttributeBlock) -> Result<String, MatchError> {
    source.ensure_sufficient("Source record")?;
    candidate.ensure_sufficient("Candidate")?;

    Ok(format!(
        "You compare entities described by two different databases. Decide whether the \
         library authority record and the knowledge-base item below describe the same entity. \
         Answer with a JSON object with two keys: \"match\", a boolean that is true only if they \
         are the same entity, and \"reason\", one short sentence explaining why.\n\n\
         Library authority record {}:\n{}\n\n\
         -------------------------------\n\
         Knowledge-base item {}:\n{}\n",
        source.id,
        source.render(),
        candidate.id,
        candidate.render()
    ))
}

/// Prompt for choosing among several entities
pub fn build_selection_prompt(source: &AttributeBlock, candidates: &[AttributeBlock]) -> Result<String, MatchError> {
    source.ensure_sufficient("Source record")?;
    for candidate in candidates {
        candidate.ensure_sufficient("Candidate")?;
    }

    let mut prompt = format!(
        "You compare entities described by two different databases. The library authority \
         record below cites several knowledge-base items; pick the one that describes the same \
         entity. Answer with a JSON object with two keys: \"match\", the identifier of the \
         matching item, or \"{}\" if none of them match, and \"reason\", one short sentence \
         explaining your choice.\n\n\
         Library authority record {}:\n{}\n",
        NO_SELECTION,
        source.id,
        source.render()
    );
    for candidate in candidates {
        prompt.push_str(&format!(
            "\n-------------------------------\nPossible match {}:\n{}\n",
            candidate.id,
            candidate.render()
        ));
    }
    Ok(prompt)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BooleanVerdict {
    #[serde(rename = "match")]
    matched: bool,
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SelectionVerdict {
    #[serde(rename = "match")]
    selected: String,
    reason: String,
}

/// Parse a raw model response strictly
pub fn parse_verdict(raw: &str, shape: VerdictShape, candidate_ids: &[String]) -> Result<MatchOutcome, MatchError> {
    let outcome = match shape {
        VerdictShape::Boolean => {
            let parsed: BooleanVerdict =
                serde_json::from_str(raw).map_err(|e| MatchError::InvalidResponse(e.to_string()))?;
            MatchOutcome {
                verdict: Verdict::SameEntity(parsed.matched),
                reason: parsed.reason,
            }
        }
        VerdictShape::Selection => {
            let parsed: SelectionVerdict =
                serde_json::from_str(raw).map_err(|e| MatchError::InvalidResponse(e.to_string()))?;
            let selected = parsed.selected.trim();
            let verdict = if selected.eq_ignore_ascii_case(NO_SELECTION) {
                Verdict::NoneSelected
            } else if let Some(id) = candidate_ids.iter().find(|id| id.eq_ignore_ascii_case(selected)) {
                Verdict::Selected(id.clone())
            } else {
                return Err(MatchError::InvalidResponse(format!(
                    "selection {:?} is not one of the candidates",
                    selected
                )));
            };
            MatchOutcome {
                verdict,
                reason: parsed.reason,
            }
        }
    };

    if outcome.reason.trim().is_empty() {
        return Err(MatchError::InvalidResponse("empty reason".to_string()));
    }
    Ok(outcome)
}

/// Matcher wired to a model and an entity describer
#[derive(Clone)]
pub struct AiMatcher {
    model: Arc<dyn LanguageModel>,
    describer: Arc<dyn EntityDescriber>,
}

impl AiMatcher {
    pub fn new(model: Arc<dyn LanguageModel>, describer: Arc<dyn EntityDescriber>) -> Self {
        Self { model, describer }
    }

    /// Compare prepared blocks: one candidate gives a boolean verdict, more give a selection
    pub async fn match_attributes(
        &self,
        source: &AttributeBlock,
        candidates: &[AttributeBlock],
    ) -> Result<MatchOutcome, MatchError> {
        let (prompt, shape) = match candidates {
            [] => return Err(MatchError::InsufficientData("no candidates to compare".to_string())),
            [single] => (build_one_to_one_prompt(source, single)?, VerdictShape::Boolean),
            many => (build_selection_prompt(source, many)?, VerdictShape::Selection),
        };

        let request = ModelRequest { prompt, shape };
        let raw = self
            .model
            .generate(&request)
            .await
            .map_err(|e| MatchError::Unavailable(e.to_string()))?;

        let candidate_ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let outcome = parse_verdict(&raw, shape, &candidate_ids)?;

        tracing::debug!(
            source = %source.id,
            candidates = candidate_ids.len(),
            verdict = ?outcome.verdict,
            reason = %outcome.reason,
            "Model verdict"
        );
        Ok(outcome)
    }

    /// One-to-one: is `target` the entity `record` describes?
    pub async fn match_one(&self, record: &SourceRecord, target: &str) -> Result<MatchOutcome, MatchError> {
        let source = AttributeBlock::new(&record.record_id, render_source_attributes(record));
        let candidate = self.describe(target).await?;
        self.match_attributes(&source, &[candidate]).await
    }

    /// One-to-many: which of `targets` does `record` describe?
    pub async fn select(&self, record: &SourceRecord, targets: &[String]) -> Result<MatchOutcome, MatchError> {
        let source = AttributeBlock::new(&record.record_id, render_source_attributes(record));
        // Check the source side before spending requests on candidates
        source.ensure_sufficient("Source record")?;

        let mut candidates = Vec::with_capacity(targets.len());
        for target in targets {
            candidates.push(self.describe(target).await?);
        }
        let outcome = self.match_attributes(&source, &candidates).await?;

        // A lone candidate is asked one-to-one; express the answer as a selection
        Ok(match (outcome.verdict, candidates.as_slice()) {
            (Verdict::SameEntity(true), [only]) => MatchOutcome {
                verdict: Verdict::Selected(only.id.clone()),
                reason: outcome.reason,
            },
            (Verdict::SameEntity(_), _) => MatchOutcome {
                verdict: Verdict::NoneSelected,
                reason: outcome.reason,
            },
            (verdict, _) => MatchOutcome {
                verdict,
                reason: outcome.reason,
            },
        })
    }

    async fn describe(&self, target: &str) -> Result<AttributeBlock, MatchError> {
        let lines = self
            .describer
            .describe(target)
            .await
            .map_err(|e| MatchError::Unavailable(e.to_string()))?;
        Ok(AttributeBlock::new(target, lines))
    }
}
