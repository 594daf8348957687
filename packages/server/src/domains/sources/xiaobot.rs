//! Xiaobot: posts per subscribed paper. Bearer-token auth, cheap to
//! crawl, so interrupted runs are never resumed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::Value;

use crate::domains::content::{ContentItem, ContentStore};
use crate::domains::crawler::incremental::{self, CrawlError, CrawlPage, PageFetcher};
use crate::domains::sources::{CrawlSession, SessionError, SourcePlatform, SourceType};
use crate::kernel::credentials::CredentialStore;
use crate::kernel::deps::ServerDeps;
use crate::kernel::rate_limit::{RateGate, RateGateConfig};
use crate::kernel::request::{Classification, FetchError, RequestClient, ResponseClassifier};

const CATEGORIES: [&str; 1] = ["post"];
const PAGE_SIZE: usize = 20;
const GATE_BASE: Duration = Duration::from_secs(5);
const GATE_JITTER: Duration = Duration::from_secs(3);

pub struct XiaobotPlatform {
    deps: Arc<ServerDeps>,
    gate: Arc<RateGate>,
}

impl XiaobotPlatform {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self {
            deps,
            gate: Arc::new(RateGate::new(RateGateConfig::new(GATE_BASE, GATE_JITTER))),
        }
    }
}

#[async_trait]
impl SourcePlatform for XiaobotPlatform {
    fn source_type(&self) -> SourceType {
        SourceType::Xiaobot
    }

    async fn open_session(&self) -> Result<Box<dyn CrawlSession>, SessionError> {
        let credential = self
            .deps
            .credentials
            .get(SourceType::Xiaobot)
            .await?
            .ok_or(SessionError::MissingCredential(SourceType::Xiaobot))?;

        self.gate.start();

        let client = RequestClient::new(self.gate.clone(), Arc::new(XiaobotClassifier))
            .with_header("Authorization", &format!("Bearer {}", credential.value));

        Ok(Box::new(XiaobotSession {
            deps: self.deps.clone(),
            client: Arc::new(client),
        }))
    }
}

struct XiaobotSession {
    deps: Arc<ServerDeps>,
    client: Arc<RequestClient>,
}

#[async_trait]
impl CrawlSession for XiaobotSession {
    fn categories(&self) -> &'static [&'static str] {
        &CATEGORIES
    }

    async fn entities(&self) -> anyhow::Result<Vec<String>> {
        self.deps.content.list_entities(SourceType::Xiaobot).await
    }

    async fn crawl(&self, entity: &str, category: &str) -> Result<u64, CrawlError> {
        let fetcher = XiaobotFetcher {
            client: self.client.clone(),
        };
        incremental::crawl_with_baseline(
            &fetcher,
            self.deps.content.as_ref(),
            SourceType::Xiaobot,
            entity,
            category,
        )
        .await
    }
}

struct XiaobotFetcher {
    client: Arc<RequestClient>,
}

#[async_trait]
impl PageFetcher for XiaobotFetcher {
    async fn fetch_page(&self, entity: &str, page: u32) -> Result<CrawlPage, FetchError> {
        let offset = page as usize * PAGE_SIZE;
        let url = format!(
            "https://api.xiaobot.net/paper/{entity}/post?limit={PAGE_SIZE}&offset={offset}&order_by=created_at%20desc"
        );
        let body = self.client.fetch(&url).await?;
        parse_page(&body)
    }
}

fn parse_page(body: &[u8]) -> Result<CrawlPage, FetchError> {
    let page: Value = serde_json::from_slice(body)
        .map_err(|error| FetchError::BadResponse(format!("invalid json: {error}")))?;
    let posts = page["data"]
        .as_array()
        .ok_or_else(|| FetchError::BadResponse("missing data array".to_string()))?;

    let mut items = Vec::with_capacity(posts.len());
    for post in posts {
        let id = post["uuid"]
            .as_str()
            .ok_or_else(|| FetchError::BadResponse("post without uuid".to_string()))?
            .to_string();
        let created_at = post["created_at"]
            .as_str()
            .ok_or_else(|| FetchError::BadResponse("post without created_at".to_string()))?;
        items.push(ContentItem {
            id,
            published_at: parse_created_at(created_at)?,
            payload: post.clone(),
        });
    }

    let has_more = items.len() == PAGE_SIZE;
    Ok(CrawlPage { items, has_more })
}

// Timestamps arrive as naive "2026-08-01 10:20:30" in UTC+8.
fn parse_created_at(raw: &str) -> Result<chrono::DateTime<Utc>, FetchError> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map_err(|error| FetchError::BadResponse(format!("bad created_at {raw:?}: {error}")))?;
    let offset = FixedOffset::east_opt(8 * 3600)
        .ok_or_else(|| FetchError::BadResponse("invalid timezone offset".to_string()))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|time| time.with_timezone(&Utc))
        .ok_or_else(|| FetchError::BadResponse(format!("ambiguous created_at {raw:?}")))
}

struct XiaobotClassifier;

impl ResponseClassifier for XiaobotClassifier {
    fn classify(&self, status: StatusCode, _body: &[u8]) -> Classification {
        match status {
            StatusCode::OK => Classification::Success,
            StatusCode::UNAUTHORIZED => Classification::Fatal(FetchError::NeedsCredential),
            StatusCode::FORBIDDEN => Classification::Fatal(FetchError::CredentialExpired),
            StatusCode::NOT_FOUND => Classification::Fatal(FetchError::Unreachable),
            StatusCode::TOO_MANY_REQUESTS => Classification::Cooldown,
            status => Classification::Retry(format!("unexpected status {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_credential_errors() {
        assert!(matches!(
            XiaobotClassifier.classify(StatusCode::UNAUTHORIZED, b""),
            Classification::Fatal(FetchError::NeedsCredential)
        ));
        assert!(matches!(
            XiaobotClassifier.classify(StatusCode::FORBIDDEN, b""),
            Classification::Fatal(FetchError::CredentialExpired)
        ));
    }

    #[test]
    fn parses_a_posts_page() {
        let body = br#"{
            "data": [
                {"uuid": "p-1", "created_at": "2026-08-01 10:20:30", "title": "t"}
            ]
        }"#;
        let page = parse_page(body).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "p-1");
        assert!(!page.has_more);
    }

    #[test]
    fn created_at_is_read_as_utc_plus_eight() {
        let time = parse_created_at("2026-08-01 10:20:30").unwrap();
        assert_eq!(time, Utc.with_ymd_and_hms(2026, 8, 1, 2, 20, 30).unwrap());
    }
}
