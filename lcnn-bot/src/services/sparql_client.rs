//! Wikidata Query Service client
//!
//! Reverse lookups by identifier value (cross references and the tracked
//! property) and labelled statements for the matcher.

use governor::{Quota, RateLimiter};
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{ReconcileError, ReconcileResult};
use crate::types::{ClaimIndex, CrossReferenceResolver};
use crate::utils::{retry_transient, RetryPolicy};

static ENTITY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[QP][0-9]+$").expect("entity id pattern is valid"));

static ENTITY_URI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/entity/([QP][0-9]+)$").expect("entity uri pattern is valid"));

/// Quote a value as a SPARQL string literal
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.trim().chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Reject anything that is not a bare entity id before it reaches a query
pub fn checked_entity_id(id: &str) -> ReconcileResult<&str> {
    let id = id.trim();
    if ENTITY_ID_RE.is_match(id) {
        Ok(id)
    } else {
        Err(ReconcileError::MalformedInput(format!("not an entity id: {:?}", id)))
    }
}

/// Items carrying `value` under `property`
pub fn holders_query(property: &str, value: &str) -> String {
    format!(
        "SELECT DISTINCT ?item WHERE {{ ?item wdt:{} {} . }}",
        property,
        string_literal(value)
    )
}

/// Labelled statements of an entity, external identifiers excluded
pub fn statements_query(entity_id: &str) -> String {
    format!(
        "SELECT ?propLabel ?valueLabel WHERE {{ \
         wd:{} ?p ?value . \
         ?prop wikibase:directClaim ?p ; wikibase:propertyType ?type . \
         FILTER(?type != wikibase:ExternalId) \
         SERVICE wikibase:label {{ bd:serviceParam wikibase:language \"en\". }} \
         }}",
        entity_id
    )
}

fn bindings(results: &Value) -> ReconcileResult<&Vec<Value>> {
    results
        .pointer("/results/bindings")
        .and_then(Value::as_array)
        .ok_or_else(|| ReconcileError::MalformedInput("SPARQL response without bindings".to_string()))
}

/// Distinct entity ids bound to `var`, in result order
pub fn entity_ids(results: &Value, var: &str) -> ReconcileResult<Vec<String>> {
    let mut ids: Vec<String> = Vec::new();
    for row in bindings(results)? {
        let Some(uri) = row.get(var).and_then(|b| b.get("value")).and_then(Value::as_str) else {
            continue;
        };
        if let Some(caps) = ENTITY_URI_RE.captures(uri) {
            let id = caps[1].to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

/// `property label: value label` lines
pub fn statement_lines(results: &Value) -> ReconcileResult<Vec<String>> {
    let mut lines: Vec<String> = Vec::new();
    for row in bindings(results)? {
        let prop = row.pointer("/propLabel/value").and_then(Value::as_str);
        let value = row.pointer("/valueLabel/value").and_then(Value::as_str);
        if let (Some(prop), Some(value)) = (prop, value) {
            let line = format!("{}: {}", prop.trim(), value.trim());
            if !lines.contains(&line) {
                lines.push(line);
            }
        }
    }
    Ok(lines)
}

pub struct SparqlClient {
    client: Client,
    endpoint: String,
    identifier_property: String,
    cross_reference_property: String,
    retry: RetryPolicy,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl SparqlClient {
    pub fn new(
        endpoint: &str,
        identifier_property: &str,
        cross_reference_property: &str,
        user_agent: &str,
        retry: RetryPolicy,
    ) -> ReconcileResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ReconcileError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            identifier_property: identifier_property.to_string(),
            cross_reference_property: cross_reference_property.to_string(),
            retry,
            // WDQS asks bots to stay well under its per-minute budget
            rate_limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::MIN)),
        })
    }

    async fn select(&self, query: &str) -> ReconcileResult<Value> {
        retry_transient("sparql", self.retry, || async move {
            self.rate_limiter.until_ready().await;
            tracing::trace!(query = %query, "SPARQL");

            let response = self
                .client
                .get(&self.endpoint)
                .query(&[("query", query), ("format", "json")])
                .header(reqwest::header::ACCEPT, "application/sparql-results+json")
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ReconcileError::from_status(status, &body));
            }
            Ok(response.json::<Value>().await?)
        })
        .await
    }

    /// Entities holding `value` under `property`
    pub async fn holders_of(&self, property: &str, value: &str) -> ReconcileResult<Vec<String>> {
        let results = self.select(&holders_query(property, value)).await?;
        entity_ids(&results, "item")
    }

    pub async fn labelled_statements(&self, entity_id: &str) -> ReconcileResult<Vec<String>> {
        let entity_id = checked_entity_id(entity_id)?;
        let results = self.select(&statements_query(entity_id)).await?;
        statement_lines(&results)
    }
}

#[async_trait::async_trait]
impl CrossReferenceResolver for SparqlClient {
    async fn resolve(&self, cross_ref: &str) -> ReconcileResult<Option<String>> {
        let mut holders = self.holders_of(&self.cross_reference_property, cross_ref).await?;
        if holders.len() > 1 {
            tracing::debug!(viaf = %cross_ref, holders = ?holders, "Cross reference held by several entities");
            return Ok(None);
        }
        Ok(holders.pop())
    }
}

#[async_trait::async_trait]
impl ClaimIndex for SparqlClient {
    async fn holders(&self, value: &str) -> ReconcileResult<Vec<String>> {
        self.holders_of(&self.identifier_property, value).await
    }
}
