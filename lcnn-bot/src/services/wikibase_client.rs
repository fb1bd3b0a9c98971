//! Wikibase Action API client
//!
//! Reads claim snapshots for the tracked property and performs the three
//! kinds of write the bot makes. Writes authenticate with an OAuth2
//! owner-only consumer (client-credentials grant); the access token and
//! CSRF token are cached and re-issued when the API rejects them.
//!
//! Writes are never retried after the server accepted the request; a
//! request refused for an expired token is re-sent once with fresh tokens.

use chrono::Utc;
use governor::{Quota, RateLimiter};
use lcnn_common::config::WikibaseConfig;
use lcnn_common::time::wikibase_day;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::WikibaseCredentials;
use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{Claim, ClaimSnapshot, Decision, Qualifier};
use crate::services::sparql_client::{checked_entity_id, SparqlClient};
use crate::types::{AppliedId, EntityDescriber, MutationApplier, SnapshotFetcher};
use crate::utils::{retry_transient, RetryPolicy};

const SUMMARY_ADD_CLAIM: &str = "Add P244 Library of Congress LCCN External Identifier";
const SUMMARY_ADD_QUALIFIER: &str = "Add authorized heading for P244 Library of Congress LCCN subject named as";
const SUMMARY_UPDATE_QUALIFIER: &str = "Updating the subject named as to LCCN authorized heading value";

/// Property ids used in writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedProperties {
    pub identifier: String,
    pub named_as: String,
    pub stated_in_item: String,
}

impl From<&WikibaseConfig> for TrackedProperties {
    fn from(config: &WikibaseConfig) -> Self {
        Self {
            identifier: config.identifier_property.clone(),
            named_as: config.named_as_qualifier.clone(),
            stated_in_item: config.stated_in_item.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct AuthState {
    access_token: Option<String>,
    csrf_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

/// Why a write attempt was refused
#[derive(Debug)]
enum WriteRefusal {
    /// Access token expired or revoked
    Authorization,
    /// CSRF token stale
    BadToken,
}

fn string_value(snak: &Value) -> Option<&str> {
    snak.pointer("/datavalue/value").and_then(Value::as_str)
}

/// Parse a `wbgetclaims` response
pub fn parse_claims(body: &Value, entity_id: &str, property: &str) -> ReconcileResult<ClaimSnapshot> {
    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown");
        return Err(ReconcileError::MalformedInput(format!("wbgetclaims {}: {}", entity_id, code)));
    }

    let statements = body
        .pointer(&format!("/claims/{}", property))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut claims = Vec::with_capacity(statements.len());
    for statement in &statements {
        // somevalue/novalue snaks carry no identifier
        let Some(value) = statement.get("mainsnak").and_then(string_value) else {
            continue;
        };

        let mut qualifiers = Vec::new();
        if let Some(by_property) = statement.get("qualifiers").and_then(Value::as_object) {
            let order: Vec<&str> = statement
                .get("qualifiers-order")
                .and_then(Value::as_array)
                .map(|o| o.iter().filter_map(Value::as_str).collect())
                .unwrap_or_else(|| by_property.keys().map(String::as_str).collect());

            for qualifier_property in order {
                let Some(snaks) = by_property.get(qualifier_property).and_then(Value::as_array) else {
                    continue;
                };
                for snak in snaks {
                    if let Some(q_value) = string_value(snak) {
                        qualifiers.push(Qualifier {
                            property: qualifier_property.to_string(),
                            value: q_value.to_string(),
                            hash: snak.get("hash").and_then(Value::as_str).map(str::to_string),
                        });
                    }
                }
            }
        }

        claims.push(Claim {
            claim_id: statement.get("id").and_then(Value::as_str).map(str::to_string),
            value: value.to_string(),
            qualifiers,
        });
    }

    Ok(ClaimSnapshot::with_claims(entity_id, property, claims))
}

/// `label: value` lines from a `Special:EntityData` document (English only)
pub fn parse_entity_data(body: &Value, entity_id: &str) -> ReconcileResult<Vec<String>> {
    let entity = body
        .get("entities")
        .and_then(Value::as_object)
        .and_then(|entities| entities.get(entity_id).or_else(|| entities.values().next()))
        .ok_or_else(|| ReconcileError::MalformedInput(format!("no entity data for {}", entity_id)))?;

    let mut lines = Vec::new();
    if let Some(label) = entity.pointer("/labels/en/value").and_then(Value::as_str) {
        lines.push(format!("Label: {}", label));
    }
    if let Some(description) = entity.pointer("/descriptions/en/value").and_then(Value::as_str) {
        lines.push(format!("Description: {}", description));
    }
    if let Some(aliases) = entity.pointer("/aliases/en").and_then(Value::as_array) {
        for alias in aliases.iter().filter_map(|a| a.get("value").and_then(Value::as_str)) {
            lines.push(format!("Also known as: {}", alias));
        }
    }
    if let Some(title) = entity.pointer("/sitelinks/enwiki/title").and_then(Value::as_str) {
        lines.push(format!("English Wikipedia article: {}", title));
    }
    Ok(lines)
}

/// Reference block for new claims: "stated in" plus "retrieved" today
pub fn reference_snaks(stated_in_item: &str, retrieved: &str) -> Value {
    let numeric_id: u64 = stated_in_item.trim_start_matches('Q').parse().unwrap_or_default();
    json!({
        "P248": [{
            "snaktype": "value",
            "property": "P248",
            "datavalue": {
                "type": "wikibase-entityid",
                "value": { "entity-type": "item", "numeric-id": numeric_id, "id": stated_in_item }
            }
        }],
        "P813": [{
            "snaktype": "value",
            "property": "P813",
            "datavalue": {
                "type": "time",
                "value": {
                    "time": retrieved,
                    "timezone": 0,
                    "before": 0,
                    "after": 0,
                    "precision": 11,
                    "calendarmodel": "http://www.wikidata.org/entity/Q1985727"
                }
            }
        }]
    })
}

fn string_snak(property: &str, value: &str) -> Value {
    json!({
        "snaktype": "value",
        "property": property,
        "datavalue": { "type": "string", "value": value }
    })
}

/// `wbeditentity` payload adding one identifier statement with its
/// qualifier and reference in a single edit
pub fn new_claim_payload(properties: &TrackedProperties, value: &str, named_as: &str, retrieved: &str) -> Value {
    json!({
        "claims": [{
            "type": "statement",
            "rank": "normal",
            "mainsnak": {
                "snaktype": "value",
                "property": properties.identifier,
                "datavalue": { "type": "string", "value": value }
            },
            "qualifiers": { (properties.named_as.clone()): [string_snak(&properties.named_as, named_as)] },
            "qualifiers-order": [properties.named_as],
            "references": [{ "snaks": reference_snaks(&properties.stated_in_item, retrieved) }]
        }]
    })
}

pub struct WikibaseClient {
    client: Client,
    api_url: String,
    entity_data_url: String,
    oauth_token_url: String,
    credentials: Option<WikibaseCredentials>,
    properties: TrackedProperties,
    sparql: Arc<SparqlClient>,
    retry: RetryPolicy,
    auth: Mutex<AuthState>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl WikibaseClient {
    /// `credentials` may be `None` for read-only (dry) runs
    pub fn new(
        config: &WikibaseConfig,
        credentials: Option<WikibaseCredentials>,
        sparql: Arc<SparqlClient>,
        user_agent: &str,
        retry: RetryPolicy,
    ) -> ReconcileResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ReconcileError::Configuration(format!("HTTP client: {}", e)))?;

        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            entity_data_url: config.entity_data_url.trim_end_matches('/').to_string(),
            oauth_token_url: config.oauth_token_url.clone(),
            credentials,
            properties: TrackedProperties::from(config),
            sparql,
            retry,
            auth: Mutex::new(AuthState::default()),
            rate_limiter: RateLimiter::direct(Quota::per_second(rate)),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> ReconcileResult<Value> {
        retry_transient("wikibase read", self.retry, || async move {
            self.rate_limiter.until_ready().await;
            let response = self.client.get(url).query(query).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ReconcileError::from_status(status, &body));
            }
            Ok(response.json::<Value>().await?)
        })
        .await
    }

    async fn request_access_token(&self) -> ReconcileResult<String> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ReconcileError::Configuration("knowledge-base credentials are required for writes".to_string())
        })?;

        let response = self
            .client
            .post(&self.oauth_token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.consumer_token.as_str()),
                ("client_secret", credentials.consumer_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ReconcileError::Apply(format!("OAuth token request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReconcileError::Apply(format!("OAuth token request: HTTP {}: {}", status.as_u16(), body)));
        }

        let token: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| ReconcileError::Apply(format!("OAuth token response: {}", e)))?;
        tracing::info!("Obtained OAuth2 access token");
        Ok(token.access_token)
    }

    async fn request_csrf_token(&self, access_token: &str) -> ReconcileResult<String> {
        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .get(&self.api_url)
            .bearer_auth(access_token)
            .query(&[("action", "query"), ("meta", "tokens"), ("type", "csrf"), ("format", "json")])
            .send()
            .await
            .map_err(|e| ReconcileError::Apply(format!("CSRF token request: {}", e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| ReconcileError::Apply(format!("CSRF token response: {}", e)))?;
        body.pointer("/query/tokens/csrftoken")
            .and_then(Value::as_str)
            .filter(|t| *t != "+\\")
            .map(str::to_string)
            .ok_or_else(|| ReconcileError::Apply("CSRF token refused (not logged in)".to_string()))
    }

    /// Cached tokens, fetching whichever is missing
    async fn tokens(&self) -> ReconcileResult<(String, String)> {
        let mut auth = self.auth.lock().await;
        let access = match &auth.access_token {
            Some(token) => token.clone(),
            None => {
                let token = self.request_access_token().await?;
                auth.access_token = Some(token.clone());
                token
            }
        };
        let csrf = match &auth.csrf_token {
            Some(token) => token.clone(),
            None => {
                let token = self.request_csrf_token(&access).await?;
                auth.csrf_token = Some(token.clone());
                token
            }
        };
        Ok((access, csrf))
    }

    async fn forget_tokens(&self, refusal: &WriteRefusal) {
        let mut auth = self.auth.lock().await;
        if matches!(refusal, WriteRefusal::Authorization) {
            auth.access_token = None;
        }
        auth.csrf_token = None;
    }

    async fn write_once(&self, params: &[(&str, String)]) -> ReconcileResult<Result<Value, WriteRefusal>> {
        let (access, csrf) = self.tokens().await?;
        self.rate_limiter.until_ready().await;

        let mut form: Vec<(&str, String)> = params.to_vec();
        form.push(("token", csrf));
        form.push(("bot", "1".to_string()));
        form.push(("format", "json".to_string()));

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&access)
            .form(&form)
            .send()
            .await
            .map_err(|e| ReconcileError::Apply(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(Err(WriteRefusal::Authorization));
        }

        let body: Value = response.json().await.map_err(|e| ReconcileError::Apply(e.to_string()))?;
        if let Some(error) = body.get("error") {
            let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown");
            if code.starts_with("mwoauth-invalid-authorization") {
                return Ok(Err(WriteRefusal::Authorization));
            }
            if code == "badtoken" {
                return Ok(Err(WriteRefusal::BadToken));
            }
            let info = error.get("info").and_then(Value::as_str).unwrap_or_default();
            return Err(ReconcileError::Apply(format!("{}: {}", code, info)));
        }
        Ok(Ok(body))
    }

    /// POST a write, re-issuing tokens once if they were refused
    async fn write(&self, params: Vec<(&str, String)>) -> ReconcileResult<Value> {
        match self.write_once(&params).await? {
            Ok(body) => Ok(body),
            Err(refusal) => {
                tracing::warn!(refusal = ?refusal, "Write refused, re-issuing tokens");
                self.forget_tokens(&refusal).await;
                match self.write_once(&params).await? {
                    Ok(body) => Ok(body),
                    Err(refusal) => Err(ReconcileError::Apply(format!("write refused after token refresh: {:?}", refusal))),
                }
            }
        }
    }

    /// Statement GUID from the decision, or from a fresh snapshot
    async fn statement_id(&self, target: &str, claim_id: &Option<String>, claim_value: &str) -> ReconcileResult<String> {
        if let Some(id) = claim_id {
            return Ok(id.clone());
        }
        let snapshot = self.snapshot(target).await?;
        snapshot
            .find_claim(claim_value)
            .and_then(|c| c.claim_id.clone())
            .ok_or_else(|| ReconcileError::Apply(format!("claim {} no longer on {}", claim_value, target)))
    }

    async fn add_claim(&self, target: &str, value: &str, named_as: &str) -> ReconcileResult<AppliedId> {
        let payload = new_claim_payload(&self.properties, value, named_as, &wikibase_day(&Utc::now()));
        let body = self
            .write(vec![
                ("action", "wbeditentity".to_string()),
                ("id", target.to_string()),
                ("data", payload.to_string()),
                ("summary", SUMMARY_ADD_CLAIM.to_string()),
            ])
            .await?;

        let statements = body
            .pointer(&format!("/entity/claims/{}", self.properties.identifier))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        statements
            .iter()
            .find(|s| {
                s.get("mainsnak")
                    .and_then(string_value)
                    .is_some_and(|v| v.eq_ignore_ascii_case(value))
            })
            .and_then(|s| s.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| ReconcileError::Apply("edit accepted but new statement not returned".to_string()))
    }

    async fn set_qualifier(
        &self,
        statement_id: &str,
        value: &str,
        snak_hash: Option<&str>,
        summary: &str,
    ) -> ReconcileResult<AppliedId> {
        let mut params = vec![
            ("action", "wbsetqualifier".to_string()),
            ("claim", statement_id.to_string()),
            ("property", self.properties.named_as.clone()),
            ("snaktype", "value".to_string()),
            ("value", Value::String(value.to_string()).to_string()),
            ("summary", summary.to_string()),
        ];
        if let Some(hash) = snak_hash {
            params.push(("snakhash", hash.to_string()));
        }

        let body = self.write(params).await?;
        let hash = body
            .pointer(&format!("/claim/qualifiers/{}", self.properties.named_as))
            .and_then(Value::as_array)
            .and_then(|snaks| snaks.iter().find(|s| string_value(s) == Some(value)))
            .and_then(|s| s.get("hash").and_then(Value::as_str))
            .map(str::to_string);
        Ok(hash.unwrap_or_else(|| statement_id.to_string()))
    }
}

#[async_trait::async_trait]
impl SnapshotFetcher for WikibaseClient {
    async fn snapshot(&self, entity_id: &str) -> ReconcileResult<ClaimSnapshot> {
        let entity_id = checked_entity_id(entity_id)?;
        let body = self
            .get_json(
                &self.api_url,
                &[
                    ("action", "wbgetclaims"),
                    ("entity", entity_id),
                    ("property", self.properties.identifier.as_str()),
                    ("format", "json"),
                ],
            )
            .await?;
        parse_claims(&body, entity_id, &self.properties.identifier)
    }
}

#[async_trait::async_trait]
impl MutationApplier for WikibaseClient {
    async fn apply(&self, decision: &Decision) -> ReconcileResult<AppliedId> {
        match decision {
            Decision::AddClaim { target, value, named_as } => {
                let id = self.add_claim(target, value, named_as).await?;
                tracing::info!(qid = %target, lccn = %value, statement = %id, "Added identifier claim");
                Ok(id)
            }
            Decision::AddQualifier {
                target,
                claim_id,
                claim_value,
                qualifier_value,
            } => {
                let statement = self.statement_id(target, claim_id, claim_value).await?;
                let hash = self
                    .set_qualifier(&statement, qualifier_value, None, SUMMARY_ADD_QUALIFIER)
                    .await?;
                tracing::info!(qid = %target, lccn = %claim_value, "Added named-as qualifier");
                Ok(hash)
            }
            Decision::UpdateQualifier {
                target,
                claim_id,
                claim_value,
                old_qualifier_value,
                old_qualifier_hash,
                new_qualifier_value,
            } => {
                let statement = self.statement_id(target, claim_id, claim_value).await?;
                let old_hash = match old_qualifier_hash {
                    Some(hash) => hash.clone(),
                    None => self
                        .snapshot(target)
                        .await?
                        .find_claim(claim_value)
                        .and_then(|c| {
                            c.qualifiers_for(&self.properties.named_as)
                                .find(|q| q.value == *old_qualifier_value)
                                .and_then(|q| q.hash.clone())
                        })
                        .ok_or_else(|| ReconcileError::Apply(format!("qualifier {:?} no longer present", old_qualifier_value)))?,
                };
                let hash = self
                    .set_qualifier(&statement, new_qualifier_value, Some(&old_hash), SUMMARY_UPDATE_QUALIFIER)
                    .await?;
                tracing::info!(
                    qid = %target,
                    lccn = %claim_value,
                    old = %old_qualifier_value,
                    new = %new_qualifier_value,
                    "Updated named-as qualifier"
                );
                Ok(hash)
            }
            other => Err(ReconcileError::Apply(format!("{} is not a write", other.kind().as_str()))),
        }
    }
}

#[async_trait::async_trait]
impl EntityDescriber for WikibaseClient {
    async fn describe(&self, entity_id: &str) -> ReconcileResult<Vec<String>> {
        let entity_id = checked_entity_id(entity_id)?;
        let url = format!("{}/{}.json", self.entity_data_url, entity_id);
        let body = self.get_json(&url, &[]).await?;

        let mut lines = parse_entity_data(&body, entity_id)?;
        lines.extend(self.sparql.labelled_statements(entity_id).await?);
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn properties() -> TrackedProperties {
        TrackedProperties::from(&WikibaseConfig::default())
    }

    fn client(server: &MockServer, credentials: Option<WikibaseCredentials>) -> WikibaseClient {
        let config = WikibaseConfig {
            api_url: server.url("/w/api.php"),
            sparql_url: server.url("/sparql"),
            entity_data_url: server.url("/wiki/Special:EntityData"),
            oauth_token_url: server.url("/oauth2/access_token"),
            requests_per_second: 50,
            ..WikibaseConfig::default()
        };
        let sparql = Arc::new(
            SparqlClient::new(&config.sparql_url, "P244", "P214", "test", RetryPolicy::default()).unwrap(),
        );
        WikibaseClient::new(&config, credentials, sparql, "test", RetryPolicy::default()).unwrap()
    }

    fn credentials() -> Option<WikibaseCredentials> {
        Some(WikibaseCredentials {
            consumer_token: "ctoken".into(),
            consumer_secret: "csecret".into(),
        })
    }

    #[test]
    fn test_parse_claims() {
        let body = json!({"claims": {"P244": [
            {
                "id": "Q7245$1",
                "mainsnak": {"snaktype": "value", "property": "P244", "datavalue": {"type": "string", "value": "n79021164"}},
                "qualifiers": {"P1810": [
                    {"hash": "abc", "snaktype": "value", "property": "P1810", "datavalue": {"type": "string", "value": "Twain, Mark"}}
                ]},
                "qualifiers-order": ["P1810"]
            },
            { "id": "Q7245$2", "mainsnak": {"snaktype": "novalue", "property": "P244"} }
        ]}});
        let snapshot = parse_claims(&body, "Q7245", "P244").unwrap();
        assert_eq!(snapshot.claims.len(), 1);
        let claim = &snapshot.claims[0];
        assert_eq!(claim.claim_id.as_deref(), Some("Q7245$1"));
        assert_eq!(claim.qualifiers[0].hash.as_deref(), Some("abc"));
        assert_eq!(claim.qualifiers[0].value, "Twain, Mark");
    }

    #[test]
    fn test_parse_claims_empty_and_error() {
        assert!(parse_claims(&json!({"claims": {}}), "Q1", "P244").unwrap().is_empty());
        assert!(matches!(
            parse_claims(&json!({"error": {"code": "no-such-entity"}}), "Q0", "P244"),
            Err(ReconcileError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_new_claim_payload_shape() {
        let payload = new_claim_payload(&properties(), "n79021164", "Twain, Mark", "+2026-10-19T00:00:00Z");
        let claim = &payload["claims"][0];
        assert_eq!(claim["mainsnak"]["datavalue"]["value"], "n79021164");
        assert_eq!(claim["qualifiers"]["P1810"][0]["datavalue"]["value"], "Twain, Mark");
        let snaks = &claim["references"][0]["snaks"];
        assert_eq!(snaks["P248"][0]["datavalue"]["value"]["id"], "Q18912790");
        assert_eq!(snaks["P248"][0]["datavalue"]["value"]["numeric-id"], 18912790);
        assert_eq!(snaks["P813"][0]["datavalue"]["value"]["time"], "+2026-10-19T00:00:00Z");
    }

    #[test]
    fn test_parse_entity_data() {
        let body = json!({"entities": {"Q7245": {
            "labels": {"en": {"language": "en", "value": "Mark Twain"}},
            "descriptions": {"en": {"language": "en", "value": "American author and humorist"}},
            "aliases": {"en": [{"value": "Samuel Clemens"}]},
            "sitelinks": {"enwiki": {"title": "Mark Twain"}}
        }}});
        assert_eq!(
            parse_entity_data(&body, "Q7245").unwrap(),
            vec![
                "Label: Mark Twain",
                "Description: American author and humorist",
                "Also known as: Samuel Clemens",
                "English Wikipedia article: Mark Twain"
            ]
        );
    }

    #[tokio::test]
    async fn test_snapshot_reads_claims() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/w/api.php")
                    .query_param("action", "wbgetclaims")
                    .query_param("entity", "Q7245")
                    .query_param("property", "P244");
                then.status(200).json_body(json!({"claims": {}}));
            })
            .await;

        let snapshot = client(&server, None).snapshot("Q7245").await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_write_without_credentials_is_configuration_error() {
        let server = MockServer::start_async().await;
        let decision = Decision::AddClaim {
            target: "Q7245".into(),
            value: "n79021164".into(),
            named_as: "Twain, Mark".into(),
        };
        let err = client(&server, None).apply(&decision).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_non_mutation_is_rejected() {
        let server = MockServer::start_async().await;
        let err = client(&server, credentials()).apply(&Decision::NoOp).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Apply(_)));
    }

    #[tokio::test]
    async fn test_add_claim_writes_with_tokens() {
        let server = MockServer::start_async().await;
        let oauth = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth2/access_token")
                    .body_includes("grant_type=client_credentials");
                then.status(200).json_body(json!({"access_token": "atoken", "token_type": "Bearer"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/w/api.php").query_param("meta", "tokens");
                then.status(200).json_body(json!({"query": {"tokens": {"csrftoken": "csrf+\\"}}}));
            })
            .await;
        let edit = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/w/api.php")
                    .header("authorization", "Bearer atoken")
                    .body_includes("action=wbeditentity")
                    .body_includes("bot=1");
                then.status(200).json_body(json!({"success": 1, "entity": {"claims": {"P244": [
                    {"id": "Q7245$NEW", "mainsnak": {"datavalue": {"type": "string", "value": "n79021164"}}}
                ]}}}));
            })
            .await;

        let decision = Decision::AddClaim {
            target: "Q7245".into(),
            value: "n79021164".into(),
            named_as: "Twain, Mark".into(),
        };
        let id = client(&server, credentials()).apply(&decision).await.unwrap();

        oauth.assert_async().await;
        edit.assert_async().await;
        assert_eq!(id, "Q7245$NEW");
    }

    #[tokio::test]
    async fn test_rejected_write_is_apply_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/access_token");
                then.status(200).json_body(json!({"access_token": "atoken"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/w/api.php").query_param("meta", "tokens");
                then.status(200).json_body(json!({"query": {"tokens": {"csrftoken": "csrf+\\"}}}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/w/api.php");
                then.status(200)
                    .json_body(json!({"error": {"code": "modification-failed", "info": "Statement GUID is invalid"}}));
            })
            .await;

        let decision = Decision::AddQualifier {
            target: "Q7245".into(),
            claim_id: Some("Q7245$1".into()),
            claim_value: "n79021164".into(),
            qualifier_value: "Twain, Mark".into(),
        };
        let err = client(&server, credentials()).apply(&decision).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Apply(ref m) if m.contains("modification-failed")));
    }
}
