//! Content sources.
//!
//! A source is an upstream platform we crawl. The set is closed: adding a
//! source means adding a variant here and a module implementing
//! `SourcePlatform`, and the compiler walks every dispatch site.

pub mod github;
pub mod testing;
pub mod xiaobot;
pub mod zhihu;
pub mod zsxq;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domains::crawler::incremental::CrawlError;
use crate::kernel::deps::ServerDeps;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    sqlx::Type,
)]
#[sqlx(type_name = "source_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Zhihu,
    Zsxq,
    Xiaobot,
    Github,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Zhihu => "zhihu",
            SourceType::Zsxq => "zsxq",
            SourceType::Xiaobot => "xiaobot",
            SourceType::Github => "github",
        }
    }

    /// Whether an interrupted crawl is worth resuming after a restart.
    /// Expensive sources (tight rate gates, many pages) resume from the
    /// cursor; cheap ones just run fresh on the next scheduled fire.
    pub fn is_resumable(&self) -> bool {
        matches!(self, SourceType::Zhihu | SourceType::Zsxq)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown source type: {0}")]
pub struct UnknownSourceType(pub String);

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zhihu" => Ok(SourceType::Zhihu),
            "zsxq" => Ok(SourceType::Zsxq),
            "xiaobot" => Ok(SourceType::Xiaobot),
            "github" => Ok(SourceType::Github),
            other => Err(UnknownSourceType(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no {0} credential on file")]
    MissingCredential(SourceType),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A platform knows how to open crawl sessions against one source.
#[async_trait]
pub trait SourcePlatform: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Resolve the credential and build the rate-gated request client.
    /// Fails fast when no credential is on file.
    async fn open_session(&self) -> Result<Box<dyn CrawlSession>, SessionError>;
}

/// One authenticated, rate-gated pass over a source.
#[async_trait]
pub trait CrawlSession: Send + Sync {
    /// Content categories this source splits an entity into.
    fn categories(&self) -> &'static [&'static str];

    /// The full universe of subscribed entities for this source.
    async fn entities(&self) -> anyhow::Result<Vec<String>>;

    /// Crawl one entity's category down to its baseline. Returns the
    /// number of items stored.
    async fn crawl(&self, entity: &str, category: &str) -> Result<u64, CrawlError>;
}

/// Maps a source type to its platform.
pub trait PlatformFactory: Send + Sync {
    fn platform(&self, source: SourceType) -> Arc<dyn SourcePlatform>;
}

/// Production platform table. A match, not a registry: a missing arm is a
/// compile error, and construction cannot fail at runtime.
///
/// Each platform is built exactly once and handed out by reference, so
/// per-source state (the rate gate above all) is process-wide: however
/// many task definitions share a source type, their sessions share one
/// gate.
pub struct DefaultPlatformFactory {
    zhihu: Arc<dyn SourcePlatform>,
    zsxq: Arc<dyn SourcePlatform>,
    xiaobot: Arc<dyn SourcePlatform>,
    github: Arc<dyn SourcePlatform>,
}

impl DefaultPlatformFactory {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self {
            zhihu: Arc::new(zhihu::ZhihuPlatform::new(deps.clone())),
            zsxq: Arc::new(zsxq::ZsxqPlatform::new(deps.clone())),
            xiaobot: Arc::new(xiaobot::XiaobotPlatform::new(deps.clone())),
            github: Arc::new(github::GithubPlatform::new(deps)),
        }
    }
}

impl PlatformFactory for DefaultPlatformFactory {
    fn platform(&self, source: SourceType) -> Arc<dyn SourcePlatform> {
        match source {
            SourceType::Zhihu => self.zhihu.clone(),
            SourceType::Zsxq => self.zsxq.clone(),
            SourceType::Xiaobot => self.xiaobot.clone(),
            SourceType::Github => self.github.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_round_trips_through_strings() {
        for source in [
            SourceType::Zhihu,
            SourceType::Zsxq,
            SourceType::Xiaobot,
            SourceType::Github,
        ] {
            assert_eq!(source.as_str().parse::<SourceType>().ok(), Some(source));
        }
        assert!("weibo".parse::<SourceType>().is_err());
    }

    #[test]
    fn factory_hands_out_one_platform_per_source() {
        use crate::domains::content::InMemoryContentStore;
        use crate::domains::tasks::testing::{InMemoryJobStore, InMemoryTaskStore};
        use crate::kernel::credentials::InMemoryCredentialStore;
        use crate::kernel::notify::NoopNotifier;

        let deps = Arc::new(ServerDeps::new(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemoryContentStore::new()),
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(NoopNotifier),
        ));
        let factory = DefaultPlatformFactory::new(deps);

        // Two definitions with the same source type must reach the same
        // platform instance, and with it the same rate gate.
        for source in [
            SourceType::Zhihu,
            SourceType::Zsxq,
            SourceType::Xiaobot,
            SourceType::Github,
        ] {
            let first = factory.platform(source);
            let second = factory.platform(source);
            assert!(Arc::ptr_eq(&first, &second), "{source} platform rebuilt");
        }
    }

    #[test]
    fn only_expensive_sources_resume() {
        assert!(SourceType::Zhihu.is_resumable());
        assert!(SourceType::Zsxq.is_resumable());
        assert!(!SourceType::Xiaobot.is_resumable());
        assert!(!SourceType::Github.is_resumable());
    }
}
