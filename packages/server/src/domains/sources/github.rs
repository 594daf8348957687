//! GitHub: releases per watched repository. Entities are `owner/repo`
//! strings. Cheapest source in the set; never resumed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;

use crate::domains::content::{ContentItem, ContentStore};
use crate::domains::crawler::incremental::{self, CrawlError, CrawlPage, PageFetcher};
use crate::domains::sources::{CrawlSession, SessionError, SourcePlatform, SourceType};
use crate::kernel::credentials::CredentialStore;
use crate::kernel::deps::ServerDeps;
use crate::kernel::rate_limit::{RateGate, RateGateConfig};
use crate::kernel::request::{Classification, FetchError, RequestClient, ResponseClassifier};

const CATEGORIES: [&str; 1] = ["release"];
const PAGE_SIZE: usize = 30;
const GATE_BASE: Duration = Duration::from_secs(2);
const GATE_JITTER: Duration = Duration::from_secs(1);
const USER_AGENT: &str = "feedmill";

pub struct GithubPlatform {
    deps: Arc<ServerDeps>,
    gate: Arc<RateGate>,
}

impl GithubPlatform {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self {
            deps,
            gate: Arc::new(RateGate::new(RateGateConfig::new(GATE_BASE, GATE_JITTER))),
        }
    }
}

#[async_trait]
impl SourcePlatform for GithubPlatform {
    fn source_type(&self) -> SourceType {
        SourceType::Github
    }

    async fn open_session(&self) -> Result<Box<dyn CrawlSession>, SessionError> {
        let credential = self
            .deps
            .credentials
            .get(SourceType::Github)
            .await?
            .ok_or(SessionError::MissingCredential(SourceType::Github))?;

        self.gate.start();

        let client = RequestClient::new(self.gate.clone(), Arc::new(GithubClassifier))
            .with_header("Authorization", &format!("Bearer {}", credential.value))
            .with_header("Accept", "application/vnd.github+json")
            .with_header("User-Agent", USER_AGENT);

        Ok(Box::new(GithubSession {
            deps: self.deps.clone(),
            client: Arc::new(client),
        }))
    }
}

struct GithubSession {
    deps: Arc<ServerDeps>,
    client: Arc<RequestClient>,
}

#[async_trait]
impl CrawlSession for GithubSession {
    fn categories(&self) -> &'static [&'static str] {
        &CATEGORIES
    }

    async fn entities(&self) -> anyhow::Result<Vec<String>> {
        self.deps.content.list_entities(SourceType::Github).await
    }

    async fn crawl(&self, entity: &str, category: &str) -> Result<u64, CrawlError> {
        let fetcher = GithubFetcher {
            client: self.client.clone(),
        };
        incremental::crawl_with_baseline(
            &fetcher,
            self.deps.content.as_ref(),
            SourceType::Github,
            entity,
            category,
        )
        .await
    }
}

struct GithubFetcher {
    client: Arc<RequestClient>,
}

#[async_trait]
impl PageFetcher for GithubFetcher {
    async fn fetch_page(&self, entity: &str, page: u32) -> Result<CrawlPage, FetchError> {
        // GitHub pages are 1-based.
        let url = format!(
            "https://api.github.com/repos/{entity}/releases?per_page={PAGE_SIZE}&page={}",
            page + 1
        );
        let body = self.client.fetch(&url).await?;
        parse_page(&body)
    }
}

fn parse_page(body: &[u8]) -> Result<CrawlPage, FetchError> {
    let releases: Vec<Value> = serde_json::from_slice(body)
        .map_err(|error| FetchError::BadResponse(format!("invalid json: {error}")))?;

    let mut items = Vec::with_capacity(releases.len());
    for release in &releases {
        let id = release["id"]
            .as_i64()
            .ok_or_else(|| FetchError::BadResponse("release without id".to_string()))?
            .to_string();
        let published_at = release["published_at"]
            .as_str()
            .ok_or_else(|| FetchError::BadResponse("release without published_at".to_string()))?;
        let published_at = DateTime::parse_from_rfc3339(published_at)
            .map_err(|error| {
                FetchError::BadResponse(format!("bad published_at {published_at:?}: {error}"))
            })?
            .with_timezone(&Utc);
        items.push(ContentItem {
            id,
            published_at,
            payload: release.clone(),
        });
    }

    let has_more = items.len() == PAGE_SIZE;
    Ok(CrawlPage { items, has_more })
}

struct GithubClassifier;

impl ResponseClassifier for GithubClassifier {
    fn classify(&self, status: StatusCode, _body: &[u8]) -> Classification {
        match status {
            StatusCode::OK => Classification::Success,
            StatusCode::UNAUTHORIZED => Classification::Fatal(FetchError::NeedsCredential),
            // Secondary rate limits come back as 403 as well as 429.
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => Classification::Cooldown,
            StatusCode::NOT_FOUND => Classification::Fatal(FetchError::Unreachable),
            status => Classification::Retry(format!("unexpected status {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_cool_down_instead_of_failing() {
        assert!(matches!(
            GithubClassifier.classify(StatusCode::FORBIDDEN, b""),
            Classification::Cooldown
        ));
        assert!(matches!(
            GithubClassifier.classify(StatusCode::TOO_MANY_REQUESTS, b""),
            Classification::Cooldown
        ));
    }

    #[test]
    fn parses_a_releases_page() {
        let body = br#"[
            {"id": 7, "published_at": "2026-08-01T10:20:30Z", "tag_name": "v1.0"}
        ]"#;
        let page = parse_page(body).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "7");
        assert!(!page.has_more);
    }

    #[test]
    fn missing_repo_is_unreachable() {
        assert!(matches!(
            GithubClassifier.classify(StatusCode::NOT_FOUND, b""),
            Classification::Fatal(FetchError::Unreachable)
        ));
    }
}
