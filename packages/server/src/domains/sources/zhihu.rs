//! Zhihu: answers, articles and pins per followed member.
//!
//! Zhihu signs API requests in a way we cannot reproduce locally, so
//! fetches go through the helper service pool. The rate gate is the
//! slowest of all sources; a full crawl takes hours, which is why this
//! source is resumable.

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

const CATEGORIES: [&str; 3] = ["answer", "article", "pin"];
const PAGE_SIZE: u32 = 20;
const GATE_BASE: Duration = Duration::from_secs(150);
const GATE_JITTER: Duration = Duration::from_secs(80);
const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko)";

pub struct ZhihuPlatform {
    deps: Arc<ServerDeps>,
    // One gate for the whole process; every session shares it.
    gate: Arc<RateGate>,
}

impl ZhihuPlatform {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self {
            deps,
            gate: Arc::new(RateGate::new(RateGateConfig::new(GATE_BASE, GATE_JITTER))),
        }
    }
}

#[async_trait]
impl SourcePlatform for ZhihuPlatform {
    fn source_type(&self) -> SourceType {
        SourceType::Zhihu
    }

    async fn open_session(&self) -> Result<Box<dyn CrawlSession>, SessionError> {
        let credential = self
            .deps
            .credentials
            .get(SourceType::Zhihu)
            .await?
            .ok_or(SessionError::MissingCredential(SourceType::Zhihu))?;

        self.gate.start();

        let mut client = RequestClient::new(self.gate.clone(), Arc::new(ZhihuClassifier))
            .with_header("Cookie", &credential.value)
            .with_header("User-Agent", USER_AGENT);
        if let Some(pool) = &self.deps.helper_pool {
            client = client.with_helper_pool(pool.clone());
        }

        Ok(Box::new(ZhihuSession {
            deps: self.deps.clone(),
            client: Arc::new(client),
        }))
    }
}

struct ZhihuSession {
    deps: Arc<ServerDeps>,
    client: Arc<RequestClient>,
}

#[async_trait]
impl CrawlSession for ZhihuSession {
    fn categories(&self) -> &'static [&'static str] {
        &CATEGORIES
    }

    async fn entities(&self) -> anyhow::Result<Vec<String>> {
        self.deps.content.list_entities(SourceType::Zhihu).await
    }

    async fn crawl(&self, entity: &str, category: &str) -> Result<u64, CrawlError> {
        let fetcher = ZhihuFetcher {
            client: self.client.clone(),
            category: category.to_string(),
        };
        incremental::crawl_with_baseline(
            &fetcher,
            self.deps.content.as_ref(),
            SourceType::Zhihu,
            entity,
            category,
        )
        .await
    }
}

struct ZhihuFetcher {
    client: Arc<RequestClient>,
    category: String,
}

#[async_trait]
impl PageFetcher for ZhihuFetcher {
    async fn fetch_page(&self, entity: &str, page: u32) -> Result<CrawlPage, FetchError> {
        let url = page_url(entity, &self.category, page);
        let body = self.client.fetch(&url).await?;
        parse_page(&body, &self.category)
    }
}

fn page_url(entity: &str, category: &str, page: u32) -> String {
    let offset = page * PAGE_SIZE;
    match category {
        "answer" => format!(
            "https://www.zhihu.com/api/v4/members/{entity}/answers?limit={PAGE_SIZE}&offset={offset}&sort_by=created"
        ),
        "article" => format!(
            "https://www.zhihu.com/api/v4/members/{entity}/articles?limit={PAGE_SIZE}&offset={offset}&sort_by=created"
        ),
        // "pin"
        _ => format!(
            "https://www.zhihu.com/api/v4/members/{entity}/pins?limit={PAGE_SIZE}&offset={offset}"
        ),
    }
}

fn parse_page(body: &[u8], category: &str) -> Result<CrawlPage, FetchError> {
    let page: Value = serde_json::from_slice(body)
        .map_err(|error| FetchError::BadResponse(format!("invalid json: {error}")))?;
    let data = page["data"]
        .as_array()
        .ok_or_else(|| FetchError::BadResponse("missing data array".to_string()))?;

    // Answers carry `created_time`; articles and pins carry `created`.
    let time_key = if category == "answer" { "created_time" } else { "created" };

    let mut items = Vec::with_capacity(data.len());
    for value in data {
        let id = match &value["id"] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return Err(FetchError::BadResponse("item without id".to_string())),
        };
        let seconds = value[time_key]
            .as_i64()
            .ok_or_else(|| FetchError::BadResponse(format!("item without {time_key}")))?;
        let published_at = DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| FetchError::BadResponse(format!("timestamp out of range: {seconds}")))?;
        items.push(ContentItem {
            id,
            published_at,
            payload: value.clone(),
        });
    }

    let has_more = !page["paging"]["is_end"].as_bool().unwrap_or(true);
    Ok(CrawlPage { items, has_more })
}

struct ZhihuClassifier;

impl ResponseClassifier for ZhihuClassifier {
    fn classify(&self, status: StatusCode, body: &[u8]) -> Classification {
        match status {
            StatusCode::OK => Classification::Success,
            StatusCode::FORBIDDEN => {
                // 403 with need_login means the session is dead; without
                // it the cookie exists but has gone stale.
                let need_login = serde_json::from_slice::<Value>(body)
                    .ok()
                    .and_then(|v| v["error"]["need_login"].as_bool())
                    .unwrap_or(false);
                if need_login {
                    Classification::Fatal(FetchError::NeedsCredential)
                } else {
                    Classification::Fatal(FetchError::CredentialExpired)
                }
            }
            StatusCode::UNAUTHORIZED => Classification::Fatal(FetchError::NeedsCredential),
            StatusCode::NOT_FOUND => Classification::Fatal(FetchError::Unreachable),
            status if status.is_server_error() => {
                Classification::HelperFailure(format!("helper returned {status}"))
            }
            status => Classification::Retry(format!("unexpected status {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_with_need_login_demands_a_credential() {
        let body = br#"{"error": {"need_login": true, "code": 100}}"#;
        let classification = ZhihuClassifier.classify(StatusCode::FORBIDDEN, body);
        assert!(matches!(
            classification,
            Classification::Fatal(FetchError::NeedsCredential)
        ));
    }

    #[test]
    fn forbidden_without_need_login_is_a_stale_credential() {
        let body = br#"{"error": {"code": 100}}"#;
        let classification = ZhihuClassifier.classify(StatusCode::FORBIDDEN, body);
        assert!(matches!(
            classification,
            Classification::Fatal(FetchError::CredentialExpired)
        ));
    }

    #[test]
    fn server_errors_bench_the_helper() {
        let classification = ZhihuClassifier.classify(StatusCode::INTERNAL_SERVER_ERROR, b"");
        assert!(matches!(classification, Classification::HelperFailure(_)));
    }

    #[test]
    fn parses_an_answers_page() {
        let body = br#"{
            "data": [
                {"id": 42, "created_time": 1754904000, "content": "x"},
                {"id": "43", "created_time": 1754900400}
            ],
            "paging": {"is_end": false}
        }"#;
        let page = parse_page(body, "answer").unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "42");
        assert!(page.has_more);
    }

    #[test]
    fn malformed_page_is_a_bad_response() {
        assert!(matches!(
            parse_page(b"not json", "answer"),
            Err(FetchError::BadResponse(_))
        ));
        assert!(matches!(
            parse_page(br#"{"paging": {}}"#, "answer"),
            Err(FetchError::BadResponse(_))
        ));
    }
}
