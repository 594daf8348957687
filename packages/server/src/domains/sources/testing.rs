//! Scripted platform double for orchestration tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domains::crawler::incremental::CrawlError;
use crate::domains::sources::{
    CrawlSession, PlatformFactory, SessionError, SourcePlatform, SourceType,
};
use crate::kernel::request::FetchError;

#[derive(Debug, Clone, Copy)]
pub enum ScriptedFailure {
    /// The upstream rejects the credential for this entity.
    Credential,
    /// A transient failure the orchestrator should tolerate.
    Transient,
}

/// A platform whose sessions follow a script: fixed entity universe and
/// categories, per-entity failures, and a log of every crawl call.
pub struct ScriptedPlatform {
    source: SourceType,
    categories: &'static [&'static str],
    entities: Vec<String>,
    failures: HashMap<String, ScriptedFailure>,
    missing_credential: bool,
    crawled: Arc<RwLock<Vec<(String, String)>>>,
}

impl ScriptedPlatform {
    pub fn new(source: SourceType) -> Self {
        Self {
            source,
            categories: &["post"],
            entities: Vec::new(),
            failures: HashMap::new(),
            missing_credential: false,
            crawled: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_categories(mut self, categories: &'static [&'static str]) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_entities(mut self, entities: &[&str]) -> Self {
        self.entities = entities.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn fail_entity(mut self, entity: &str, failure: ScriptedFailure) -> Self {
        self.failures.insert(entity.to_string(), failure);
        self
    }

    pub fn without_credential(mut self) -> Self {
        self.missing_credential = true;
        self
    }

    /// Every (entity, category) crawl call, in order.
    pub fn crawled(&self) -> Vec<(String, String)> {
        self.crawled.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Distinct entities that were crawled, in first-seen order.
    pub fn crawled_entities(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (entity, _) in self.crawled() {
            if !seen.contains(&entity) {
                seen.push(entity);
            }
        }
        seen
    }
}

#[async_trait]
impl SourcePlatform for ScriptedPlatform {
    fn source_type(&self) -> SourceType {
        self.source
    }

    async fn open_session(&self) -> Result<Box<dyn CrawlSession>, SessionError> {
        if self.missing_credential {
            return Err(SessionError::MissingCredential(self.source));
        }
        Ok(Box::new(ScriptedSession {
            categories: self.categories,
            entities: self.entities.clone(),
            failures: self.failures.clone(),
            crawled: self.crawled.clone(),
        }))
    }
}

struct ScriptedSession {
    categories: &'static [&'static str],
    entities: Vec<String>,
    failures: HashMap<String, ScriptedFailure>,
    crawled: Arc<RwLock<Vec<(String, String)>>>,
}

#[async_trait]
impl CrawlSession for ScriptedSession {
    fn categories(&self) -> &'static [&'static str] {
        self.categories
    }

    async fn entities(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.entities.clone())
    }

    async fn crawl(&self, entity: &str, category: &str) -> Result<u64, CrawlError> {
        self.crawled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((entity.to_string(), category.to_string()));
        match self.failures.get(entity) {
            Some(ScriptedFailure::Credential) => {
                Err(CrawlError::Fetch(FetchError::NeedsCredential))
            }
            Some(ScriptedFailure::Transient) => Err(CrawlError::Fetch(FetchError::BadResponse(
                "scripted failure".to_string(),
            ))),
            None => Ok(1),
        }
    }
}

/// Factory serving pre-registered scripted platforms.
pub struct ScriptedFactory {
    platforms: HashMap<SourceType, Arc<ScriptedPlatform>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            platforms: HashMap::new(),
        }
    }

    pub fn with_platform(mut self, platform: Arc<ScriptedPlatform>) -> Self {
        self.platforms.insert(platform.source_type(), platform);
        self
    }
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformFactory for ScriptedFactory {
    fn platform(&self, source: SourceType) -> Arc<dyn SourcePlatform> {
        self.platforms
            .get(&source)
            .cloned()
            .map(|platform| platform as Arc<dyn SourcePlatform>)
            .unwrap_or_else(|| panic!("no scripted platform registered for {source}"))
    }
}
