//! id.loc.gov client
//!
//! Reads the name-authority activity stream, fetches records as MARC-XML
//! and asks for the authorized heading through the `X-PrefLabel-Encoded`
//! response header.

use governor::{Quota, RateLimiter};
use lcnn_common::time::parse_timestamp;
use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{RawField, SourceRecord, SourceRecordRef, Subfield};
use crate::types::{ChangeFeed, FeedPage, RecordFetcher, RejectedItem};
use crate::utils::{retry_transient, RetryPolicy};

const PREF_LABEL_HEADER: &str = "x-preflabel-encoded";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityPage {
    #[serde(default)]
    ordered_items: Vec<Activity>,
    #[serde(default)]
    next: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Activity {
    published: Option<String>,
    object: Option<ActivityObject>,
}

#[derive(Debug, Deserialize)]
struct ActivityObject {
    id: Option<String>,
    update: Option<String>,
}

/// Parse one activity-stream page.
///
/// `has_more` follows the page's `next` link when present, otherwise any
/// non-empty page is assumed to have a successor.
pub fn parse_feed_page(body: &str) -> ReconcileResult<FeedPage> {
    let page: ActivityPage =
        serde_json::from_str(body).map_err(|e| ReconcileError::MalformedInput(format!("feed page: {}", e)))?;

    let has_more = page.next.is_some() || !page.ordered_items.is_empty();
    let mut result = FeedPage {
        has_more,
        ..FeedPage::default()
    };

    for item in page.ordered_items {
        match to_reference(item) {
            Ok(reference) => result.records.push(reference),
            Err(rejected) => {
                tracing::warn!(lccn = %rejected.record_id, reason = %rejected.reason, "Rejected feed item");
                result.rejected.push(rejected);
            }
        }
    }

    Ok(result)
}

fn to_reference(item: Activity) -> Result<SourceRecordRef, RejectedItem> {
    let uri = item.object.as_ref().and_then(|o| o.id.clone()).unwrap_or_default();
    let record_id = record_id_from_uri(&uri);
    let reject = |reason: &str| RejectedItem {
        record_id: if record_id.is_empty() { uri.clone() } else { record_id.clone() },
        reason: reason.to_string(),
    };

    if record_id.is_empty() {
        return Err(reject("missing object id"));
    }
    let published_at = item
        .published
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or_else(|| reject("unparsable published timestamp"))?;
    let updated_at = item
        .object
        .as_ref()
        .and_then(|o| o.update.as_deref())
        .and_then(parse_timestamp)
        .ok_or_else(|| reject("unparsable update timestamp"))?;

    Ok(SourceRecordRef {
        record_id,
        uri,
        published_at,
        updated_at,
    })
}

/// Last path segment of a record URI
pub fn record_id_from_uri(uri: &str) -> String {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

const LOC_HOST: &str = "id.loc.gov/";

/// `https://` form of an id.loc.gov record URI; other hosts are left alone
pub fn secure_url(uri: &str) -> String {
    match uri.strip_prefix("http://") {
        Some(rest) if rest.starts_with(LOC_HOST) => format!("https://{}", rest),
        _ => uri.to_string(),
    }
}

/// Parse a MARC-XML record into fields, in document order
pub fn parse_marcxml(xml: &str) -> ReconcileResult<Vec<RawField>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let malformed = |e: &dyn std::fmt::Display| ReconcileError::MalformedInput(format!("MARC-XML: {}", e));

    let mut fields: Vec<RawField> = Vec::new();
    let mut current: Option<RawField> = None;
    let mut subfield_code: Option<char> = None;
    let mut text = String::new();
    let mut saw_record = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                text.clear();
                match e.local_name().as_ref() {
                    b"record" => saw_record = true,
                    b"controlfield" => {
                        current = Some(RawField {
                            tag: attribute(e, b"tag").map_err(|e| malformed(&e))?.unwrap_or_default(),
                            value: None,
                            subfields: Vec::new(),
                        });
                    }
                    b"datafield" => {
                        current = Some(RawField {
                            tag: attribute(e, b"tag").map_err(|e| malformed(&e))?.unwrap_or_default(),
                            value: None,
                            subfields: Vec::new(),
                        });
                    }
                    b"subfield" => {
                        subfield_code = attribute(e, b"code")
                            .map_err(|e| malformed(&e))?
                            .and_then(|c| c.chars().next());
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                if e.local_name().as_ref() == b"datafield" {
                    fields.push(RawField {
                        tag: attribute(e, b"tag").map_err(|e| malformed(&e))?.unwrap_or_default(),
                        value: None,
                        subfields: Vec::new(),
                    });
                }
            }
            Ok(Event::Text(ref e)) => {
                let unescaped = e.unescape().map_err(|e| malformed(&e))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(ref e)) => {
                text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"controlfield" => {
                    if let Some(mut field) = current.take() {
                        field.value = Some(std::mem::take(&mut text));
                        fields.push(field);
                    }
                }
                b"subfield" => {
                    if let (Some(field), Some(code)) = (current.as_mut(), subfield_code.take()) {
                        field.subfields.push(Subfield {
                            code,
                            value: std::mem::take(&mut text),
                        });
                    }
                }
                b"datafield" => {
                    if let Some(field) = current.take() {
                        fields.push(field);
                    }
                }
                _ => text.clear(),
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(&e)),
            _ => {}
        }
    }

    if !saw_record {
        return Err(ReconcileError::MalformedInput("MARC-XML: no record element".to_string()));
    }
    Ok(fields)
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Decode a percent-encoded header value as UTF-8
pub fn decode_pref_label(encoded: &str) -> ReconcileResult<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .map(|label| label.into_owned())
        .map_err(|e| ReconcileError::MalformedInput(format!("preferred label: {}", e)))
}

pub struct LocClient {
    client: Client,
    /// HEAD requests must not follow the redirect, the header sits on the first response
    head_client: Client,
    feed_base_url: String,
    retry: RetryPolicy,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl LocClient {
    pub fn new(feed_base_url: &str, requests_per_second: u32, user_agent: &str, retry: RetryPolicy) -> ReconcileResult<Self> {
        let build = |redirects: reqwest::redirect::Policy| {
            Client::builder()
                .user_agent(user_agent)
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(10))
                .redirect(redirects)
                .build()
                .map_err(|e| ReconcileError::Configuration(format!("HTTP client: {}", e)))
        };

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client: build(reqwest::redirect::Policy::default())?,
            head_client: build(reqwest::redirect::Policy::none())?,
            feed_base_url: feed_base_url.trim_end_matches('/').to_string(),
            retry,
            rate_limiter: RateLimiter::direct(Quota::per_second(rate)),
        })
    }

    async fn get_text(&self, url: &str) -> ReconcileResult<String> {
        self.rate_limiter.until_ready().await;
        tracing::debug!(url = %url, "GET");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReconcileError::from_status(status, &body));
        }
        Ok(response.text().await?)
    }

    /// Authorized heading of a record
    pub async fn preferred_label(&self, uri: &str) -> ReconcileResult<String> {
        let url = secure_url(uri);
        let url = url.as_str();
        retry_transient("preferred label", self.retry, || async move {
            self.rate_limiter.until_ready().await;
            let response = self.head_client.head(url).send().await?;
            let status = response.status();
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ReconcileError::from_status(status, ""));
            }
            let header = response
                .headers()
                .get(PREF_LABEL_HEADER)
                .ok_or_else(|| ReconcileError::MalformedInput(format!("no preferred label header for {}", url)))?;
            let encoded = header
                .to_str()
                .map_err(|e| ReconcileError::MalformedInput(format!("preferred label header: {}", e)))?;
            decode_pref_label(encoded)
        })
        .await
    }

    /// Raw MARC-XML of a record
    pub async fn marcxml(&self, uri: &str) -> ReconcileResult<String> {
        let url = format!("{}.marcxml.xml", secure_url(uri));
        retry_transient("record fetch", self.retry, || self.get_text(&url)).await
    }
}

#[async_trait::async_trait]
impl ChangeFeed for LocClient {
    async fn page(&self, page: u32) -> ReconcileResult<FeedPage> {
        let url = format!("{}/{}.json", self.feed_base_url, page);
        let result = retry_transient("feed page", self.retry, || self.get_text(&url)).await;

        match result {
            Ok(body) => parse_feed_page(&body),
            // Past the end of the stream
            Err(ReconcileError::MalformedInput(msg)) if msg.starts_with("HTTP 404") => {
                tracing::info!(page, "Feed page not found, treating as end of feed");
                Ok(FeedPage::default())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl RecordFetcher for LocClient {
    async fn fetch(&self, reference: &SourceRecordRef) -> ReconcileResult<SourceRecord> {
        let xml = self.marcxml(&reference.uri).await?;
        let fields = parse_marcxml(&xml)?;
        let label = self.preferred_label(&reference.uri).await?;

        tracing::debug!(lccn = %reference.record_id, fields = fields.len(), label = %label, "Fetched record");
        Ok(SourceRecord::from_ref(reference, label, fields))
    }
}
