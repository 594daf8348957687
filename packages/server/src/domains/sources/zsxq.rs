//! Zsxq (Knowledge Planet): topics per joined group.
//!
//! The API answers 200 even when refusing: outcomes live in the JSON
//! envelope. Code 1059 is an application-level rate limit waited out with
//! a fixed cooldown that does not consume a retry attempt; code 401 means
//! the cookie is dead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::StatusCode;
use serde_json::Value;

use crate::domains::content::{ContentItem, ContentStore};
use crate::domains::crawler::incremental::{self, CrawlError, CrawlPage, PageFetcher};
use crate::domains::sources::{CrawlSession, SessionError, SourcePlatform, SourceType};
use crate::kernel::credentials::CredentialStore;
use crate::kernel::deps::ServerDeps;
use crate::kernel::rate_limit::{RateGate, RateGateConfig};
use crate::kernel::request::{Classification, FetchError, RequestClient, ResponseClassifier};

const CATEGORIES: [&str; 1] = ["topic"];
const PAGE_SIZE: usize = 20;
const GATE_BASE: Duration = Duration::from_secs(7);
const GATE_JITTER: Duration = Duration::from_secs(6);
/// Fixed wait after an application-level 1059 refusal.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(10);

const CODE_TOO_MANY_REQUESTS: i64 = 1059;
const CODE_UNAUTHORIZED: i64 = 401;

pub struct ZsxqPlatform {
    deps: Arc<ServerDeps>,
    gate: Arc<RateGate>,
}

impl ZsxqPlatform {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self {
            deps,
            gate: Arc::new(RateGate::new(RateGateConfig::new(GATE_BASE, GATE_JITTER))),
        }
    }
}

#[async_trait]
impl SourcePlatform for ZsxqPlatform {
    fn source_type(&self) -> SourceType {
        SourceType::Zsxq
    }

    async fn open_session(&self) -> Result<Box<dyn CrawlSession>, SessionError> {
        let credential = self
            .deps
            .credentials
            .get(SourceType::Zsxq)
            .await?
            .ok_or(SessionError::MissingCredential(SourceType::Zsxq))?;

        self.gate.start();

        let client = RequestClient::new(self.gate.clone(), Arc::new(ZsxqClassifier))
            .with_header("Cookie", &credential.value)
            .with_cooldown(RATE_LIMIT_COOLDOWN);

        Ok(Box::new(ZsxqSession {
            deps: self.deps.clone(),
            client: Arc::new(client),
        }))
    }
}

struct ZsxqSession {
    deps: Arc<ServerDeps>,
    client: Arc<RequestClient>,
}

#[async_trait]
impl CrawlSession for ZsxqSession {
    fn categories(&self) -> &'static [&'static str] {
        &CATEGORIES
    }

    async fn entities(&self) -> anyhow::Result<Vec<String>> {
        self.deps.content.list_entities(SourceType::Zsxq).await
    }

    async fn crawl(&self, entity: &str, category: &str) -> Result<u64, CrawlError> {
        let fetcher = ZsxqFetcher {
            client: self.client.clone(),
        };
        incremental::crawl_with_baseline(
            &fetcher,
            self.deps.content.as_ref(),
            SourceType::Zsxq,
            entity,
            category,
        )
        .await
    }
}

struct ZsxqFetcher {
    client: Arc<RequestClient>,
}

#[async_trait]
impl PageFetcher for ZsxqFetcher {
    async fn fetch_page(&self, entity: &str, page: u32) -> Result<CrawlPage, FetchError> {
        let url = format!(
            "https://api.zsxq.com/v2/groups/{entity}/topics?scope=all&count={PAGE_SIZE}&index={page}"
        );
        let body = self.client.fetch(&url).await?;
        parse_page(&body)
    }
}

fn parse_page(body: &[u8]) -> Result<CrawlPage, FetchError> {
    let page: Value = serde_json::from_slice(body)
        .map_err(|error| FetchError::BadResponse(format!("invalid json: {error}")))?;
    let topics = page["resp_data"]["topics"]
        .as_array()
        .ok_or_else(|| FetchError::BadResponse("missing topics array".to_string()))?;

    let mut items = Vec::with_capacity(topics.len());
    for topic in topics {
        let id = match &topic["topic_id"] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return Err(FetchError::BadResponse("topic without id".to_string())),
        };
        let create_time = topic["create_time"]
            .as_str()
            .ok_or_else(|| FetchError::BadResponse("topic without create_time".to_string()))?;
        let published_at = parse_create_time(create_time)?;
        items.push(ContentItem {
            id,
            published_at,
            payload: topic.clone(),
        });
    }

    let has_more = items.len() == PAGE_SIZE;
    Ok(CrawlPage { items, has_more })
}

// Timestamps arrive as "2026-08-01T10:20:30.000+0800".
fn parse_create_time(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, FetchError> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|time| time.with_timezone(&chrono::Utc))
        .map_err(|error| FetchError::BadResponse(format!("bad create_time {raw:?}: {error}")))
}

struct ZsxqClassifier;

impl ResponseClassifier for ZsxqClassifier {
    fn classify(&self, status: StatusCode, body: &[u8]) -> Classification {
        if status == StatusCode::UNAUTHORIZED {
            return Classification::Fatal(FetchError::NeedsCredential);
        }
        if !status.is_success() {
            return Classification::Retry(format!("unexpected status {status}"));
        }

        // A garbled envelope is usually a truncated body; retry it.
        let envelope: Value = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(error) => return Classification::Retry(format!("invalid json envelope: {error}")),
        };
        if envelope["succeeded"].as_bool().unwrap_or(false) {
            return Classification::Success;
        }
        match envelope["code"].as_i64() {
            Some(CODE_TOO_MANY_REQUESTS) => Classification::Cooldown,
            Some(CODE_UNAUTHORIZED) => Classification::Fatal(FetchError::NeedsCredential),
            code => Classification::Retry(format!("refused with code {code:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_code_triggers_a_cooldown() {
        let body = br#"{"succeeded": false, "code": 1059}"#;
        let classification = ZsxqClassifier.classify(StatusCode::OK, body);
        assert!(matches!(classification, Classification::Cooldown));
    }

    #[test]
    fn unauthorized_code_invalidates_the_cookie() {
        let body = br#"{"succeeded": false, "code": 401}"#;
        let classification = ZsxqClassifier.classify(StatusCode::OK, body);
        assert!(matches!(
            classification,
            Classification::Fatal(FetchError::NeedsCredential)
        ));
    }

    #[test]
    fn truncated_envelope_is_retried() {
        let body = br#"{"succeeded": tr"#;
        let classification = ZsxqClassifier.classify(StatusCode::OK, body);
        assert!(matches!(classification, Classification::Retry(_)));
    }

    #[test]
    fn succeeded_envelope_is_a_success() {
        let body = br#"{"succeeded": true, "resp_data": {"topics": []}}"#;
        let classification = ZsxqClassifier.classify(StatusCode::OK, body);
        assert!(matches!(classification, Classification::Success));
    }

    #[test]
    fn parses_a_topics_page() {
        let body = br#"{
            "succeeded": true,
            "resp_data": {
                "topics": [
                    {"topic_id": 9001, "create_time": "2026-08-01T10:20:30.000+0800", "title": "t"}
                ]
            }
        }"#;
        let page = parse_page(body).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "9001");
        assert!(!page.has_more);
    }
}
