//! Incremental crawl over newest-first pages.
//!
//! Upstreams return content newest-first. We walk pages forward, storing
//! every item published strictly after the baseline (the newest item we
//! already hold), and stop the moment an item at or before the baseline
//! appears: everything behind it is already known. An entity we have
//! never crawled gets one-time mode instead, a single page as the initial
//! snapshot, so a first crawl cannot walk an unbounded history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::domains::content::{ContentItem, ContentStore};
use crate::domains::sources::SourceType;
use crate::kernel::request::FetchError;

/// Baseline for entities never crawled: nothing is older.
pub fn long_ago() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

#[derive(Debug, Clone)]
pub struct CrawlPage {
    /// Items in upstream order, newest first.
    pub items: Vec<ContentItem>,
    pub has_more: bool,
}

/// Source-specific page retrieval and parsing.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, entity: &str, page: u32) -> Result<CrawlPage, FetchError>;
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("content store failure: {0}")]
    Store(#[source] anyhow::Error),
}

impl CrawlError {
    pub fn is_credential(&self) -> bool {
        matches!(self, CrawlError::Fetch(error) if error.is_credential())
    }
}

/// Crawl one entity's category down to `target_time`. Returns the number
/// of items stored.
pub async fn crawl_entity(
    fetcher: &dyn PageFetcher,
    content: &dyn ContentStore,
    source: SourceType,
    entity: &str,
    category: &str,
    target_time: DateTime<Utc>,
    one_time: bool,
) -> Result<u64, CrawlError> {
    let mut page = 0u32;
    let mut stored = 0u64;

    loop {
        let fetched = fetcher.fetch_page(entity, page).await?;
        for item in &fetched.items {
            if item.published_at <= target_time {
                debug!(entity = %entity, category = %category, stored, "reached baseline");
                return Ok(stored);
            }
            content
                .upsert_item(source, entity, category, item)
                .await
                .map_err(CrawlError::Store)?;
            stored += 1;
        }
        if !fetched.has_more || one_time {
            return Ok(stored);
        }
        page += 1;
    }
}

/// Crawl one entity's category against its stored baseline: incremental
/// when items exist, one-time snapshot when the entity is brand new.
pub async fn crawl_with_baseline(
    fetcher: &dyn PageFetcher,
    content: &dyn ContentStore,
    source: SourceType,
    entity: &str,
    category: &str,
) -> Result<u64, CrawlError> {
    let baseline = content
        .latest_known_time(source, entity, category)
        .await
        .map_err(CrawlError::Store)?;
    let (target_time, one_time) = match baseline {
        Some(time) => (time, false),
        None => (long_ago(), true),
    };
    crawl_entity(fetcher, content, source, entity, category, target_time, one_time).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::domains::content::InMemoryContentStore;

    fn item(id: &str, minute: u32) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            published_at: Utc.with_ymd_and_hms(2026, 8, 1, 10, minute, 0).unwrap(),
            payload: json!({ "id": id }),
        }
    }

    /// Serves pre-built pages and counts fetches.
    struct PagedFetcher {
        pages: Vec<CrawlPage>,
        fetches: AtomicU32,
    }

    impl PagedFetcher {
        fn new(pages: Vec<CrawlPage>) -> Self {
            Self {
                pages,
                fetches: AtomicU32::new(0),
            }
        }

        fn fetch_count(&self) -> u32 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageFetcher for PagedFetcher {
        async fn fetch_page(&self, _entity: &str, page: u32) -> Result<CrawlPage, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(page as usize)
                .cloned()
                .ok_or_else(|| FetchError::BadResponse("page out of range".into()))
        }
    }

    #[tokio::test]
    async fn stops_at_the_baseline_item() {
        let fetcher = PagedFetcher::new(vec![CrawlPage {
            items: vec![item("c", 30), item("b", 20), item("a", 10)],
            has_more: true,
        }]);
        let content = InMemoryContentStore::new();

        let baseline = Utc.with_ymd_and_hms(2026, 8, 1, 10, 20, 0).unwrap();
        let stored = crawl_entity(
            &fetcher,
            &content,
            SourceType::Xiaobot,
            "e1",
            "post",
            baseline,
            false,
        )
        .await
        .unwrap();

        // Only "c" is newer than the baseline; "b" equals it and stops the walk.
        assert_eq!(stored, 1);
        assert_eq!(fetcher.fetch_count(), 1);
        let ids: Vec<String> = content
            .items_for(SourceType::Xiaobot, "e1", "post")
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[tokio::test]
    async fn walks_pages_until_the_baseline() {
        let fetcher = PagedFetcher::new(vec![
            CrawlPage {
                items: vec![item("d", 40), item("c", 30)],
                has_more: true,
            },
            CrawlPage {
                items: vec![item("b", 20), item("a", 10)],
                has_more: true,
            },
        ]);
        let content = InMemoryContentStore::new();

        let baseline = Utc.with_ymd_and_hms(2026, 8, 1, 10, 15, 0).unwrap();
        let stored = crawl_entity(
            &fetcher,
            &content,
            SourceType::Xiaobot,
            "e1",
            "post",
            baseline,
            false,
        )
        .await
        .unwrap();

        assert_eq!(stored, 3);
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn one_time_mode_fetches_exactly_one_page() {
        let fetcher = PagedFetcher::new(vec![
            CrawlPage {
                items: vec![item("b", 20), item("a", 10)],
                has_more: true,
            },
            CrawlPage {
                items: vec![],
                has_more: true,
            },
        ]);
        let content = InMemoryContentStore::new();

        let stored = crawl_entity(
            &fetcher,
            &content,
            SourceType::Xiaobot,
            "e1",
            "post",
            long_ago(),
            true,
        )
        .await
        .unwrap();

        assert_eq!(stored, 2);
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_pages_end_the_crawl() {
        let fetcher = PagedFetcher::new(vec![CrawlPage {
            items: vec![item("a", 10)],
            has_more: false,
        }]);
        let content = InMemoryContentStore::new();

        let stored = crawl_entity(
            &fetcher,
            &content,
            SourceType::Xiaobot,
            "e1",
            "post",
            long_ago(),
            false,
        )
        .await
        .unwrap();

        assert_eq!(stored, 1);
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn recrawl_of_a_window_is_idempotent() {
        let pages = vec![CrawlPage {
            items: vec![item("b", 20), item("a", 10)],
            has_more: false,
        }];
        let content = InMemoryContentStore::new();

        for _ in 0..2 {
            let fetcher = PagedFetcher::new(pages.clone());
            crawl_entity(
                &fetcher,
                &content,
                SourceType::Xiaobot,
                "e1",
                "post",
                long_ago(),
                false,
            )
            .await
            .unwrap();
        }

        assert_eq!(content.items_for(SourceType::Xiaobot, "e1", "post").len(), 2);
    }

    #[tokio::test]
    async fn fetch_errors_propagate() {
        let fetcher = PagedFetcher::new(vec![]);
        let content = InMemoryContentStore::new();

        let result = crawl_entity(
            &fetcher,
            &content,
            SourceType::Xiaobot,
            "e1",
            "post",
            long_ago(),
            false,
        )
        .await;

        assert!(matches!(
            result,
            Err(CrawlError::Fetch(FetchError::BadResponse(_)))
        ));
    }
}
