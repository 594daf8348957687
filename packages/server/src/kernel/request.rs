//! Resilient request layer.
//!
//! Every upstream fetch goes through `RequestClient::fetch`: wait on the
//! rate gate, send the request (directly or through a helper service),
//! classify the response, then retry, cool down, or fail. Sources differ
//! only in the `ResponseClassifier` they supply; the retry loop itself
//! lives here, once.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use crate::kernel::helper_pool::{HelperPool, HelperPoolError, HelperService};
use crate::kernel::rate_limit::RateGate;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);
const DEFAULT_MAX_COOLDOWNS: u32 = 10;

/// Terminal fetch outcomes, classified so callers can react precisely.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No usable credential: the upstream demands a fresh login.
    #[error("upstream requires a fresh credential")]
    NeedsCredential,
    /// The stored credential exists but was rejected as stale.
    #[error("credential is expired")]
    CredentialExpired,
    /// No helper service is available to route the request through.
    #[error("no helper service available")]
    ServiceUnavailable,
    /// The upstream rate limit could not be waited out.
    #[error("upstream rate limit persisted through cooldowns")]
    RateLimited,
    /// The resource is gone or never existed; retrying is pointless.
    #[error("resource unreachable")]
    Unreachable,
    /// The upstream answered with something we cannot use.
    #[error("bad upstream response: {0}")]
    BadResponse(String),
    /// Transient failures exhausted the retry budget.
    #[error("giving up after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
}

impl FetchError {
    /// Credential-class failures abort the whole crawl run and cascade
    /// into credential invalidation.
    pub fn is_credential(&self) -> bool {
        matches!(self, FetchError::NeedsCredential | FetchError::CredentialExpired)
    }
}

/// What the classifier decided about one response.
#[derive(Debug)]
pub enum Classification {
    /// Body is usable.
    Success,
    /// Transient; consumes a retry attempt.
    Retry(String),
    /// Application-level rate limit; sleep the cooldown and retry
    /// without consuming an attempt.
    Cooldown,
    /// The helper (not the upstream) is broken; bench it and retry.
    HelperFailure(String),
    /// Terminal; surface the error as-is.
    Fatal(FetchError),
}

/// Per-source response classification.
pub trait ResponseClassifier: Send + Sync {
    fn classify(&self, status: StatusCode, body: &[u8]) -> Classification;
}

enum Route {
    Direct,
    HelperPool(Arc<HelperPool>),
}

pub struct RequestClient {
    http: reqwest::Client,
    gate: Arc<RateGate>,
    classifier: Arc<dyn ResponseClassifier>,
    route: Route,
    headers: Vec<(String, String)>,
    max_retries: u32,
    cooldown: Duration,
    max_cooldowns: u32,
}

impl RequestClient {
    pub fn new(gate: Arc<RateGate>, classifier: Arc<dyn ResponseClassifier>) -> Self {
        Self {
            http: reqwest::Client::new(),
            gate,
            classifier,
            route: Route::Direct,
            headers: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            cooldown: DEFAULT_COOLDOWN,
            max_cooldowns: DEFAULT_MAX_COOLDOWNS,
        }
    }

    /// Attach a header to every request (credential cookie, user agent).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Route fetches through the helper pool instead of hitting the
    /// upstream directly.
    pub fn with_helper_pool(mut self, pool: Arc<HelperPool>) -> Self {
        self.route = Route::HelperPool(pool);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Fetch a URL, returning the raw body on success.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempts = 0u32;
        let mut cooldowns = 0u32;

        while attempts < self.max_retries {
            self.gate.acquire().await;

            let helper = match &self.route {
                Route::Direct => None,
                Route::HelperPool(pool) => match pool.select().await {
                    Ok(helper) => Some(helper),
                    Err(HelperPoolError::NoneAvailable) => {
                        return Err(FetchError::ServiceUnavailable)
                    }
                    Err(HelperPoolError::Database(error)) => {
                        warn!(error = %error, "helper selection failed, retrying");
                        attempts += 1;
                        continue;
                    }
                },
            };

            let response = match self.send(url, helper.as_ref()).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(url = %url, error = %error, "request transport failed, retrying");
                    self.note_helper_failure(helper.as_ref()).await;
                    attempts += 1;
                    continue;
                }
            };

            let status = response.status();
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(error) => {
                    warn!(url = %url, error = %error, "failed to read response body, retrying");
                    self.note_helper_failure(helper.as_ref()).await;
                    attempts += 1;
                    continue;
                }
            };

            match self.classifier.classify(status, &body) {
                Classification::Success => return Ok(body.to_vec()),
                Classification::Cooldown => {
                    cooldowns += 1;
                    if cooldowns > self.max_cooldowns {
                        return Err(FetchError::RateLimited);
                    }
                    debug!(url = %url, cooldown = ?self.cooldown, "rate limited, cooling down");
                    tokio::time::sleep(self.cooldown).await;
                }
                Classification::Retry(reason) => {
                    debug!(url = %url, status = %status, reason = %reason, "retrying fetch");
                    self.note_helper_failure(helper.as_ref()).await;
                    attempts += 1;
                }
                Classification::HelperFailure(reason) => {
                    warn!(url = %url, reason = %reason, "helper service failed, benching it");
                    if let (Route::HelperPool(pool), Some(helper)) = (&self.route, helper.as_ref())
                    {
                        if let Err(error) = pool.mark_unavailable(helper.id).await {
                            warn!(helper_id = %helper.id, error = %error, "failed to bench helper");
                        }
                    }
                    attempts += 1;
                }
                Classification::Fatal(error) => {
                    if matches!(error, FetchError::Unreachable | FetchError::BadResponse(_)) {
                        self.note_helper_failure(helper.as_ref()).await;
                    }
                    return Err(error);
                }
            }
        }

        Err(FetchError::MaxRetriesExceeded { attempts })
    }

    async fn send(
        &self,
        url: &str,
        helper: Option<&HelperService>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = match helper {
            // Helpers expose a single endpoint that signs and forwards.
            Some(helper) => self
                .http
                .post(format!("{}/fetch", helper.url.trim_end_matches('/')))
                .json(&serde_json::json!({ "url": url })),
            None => self.http.get(url),
        };
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        request.send().await
    }

    async fn note_helper_failure(&self, helper: Option<&HelperService>) {
        if let (Route::HelperPool(pool), Some(helper)) = (&self.route, helper) {
            if let Err(error) = pool.mark_failed(helper.id).await {
                warn!(helper_id = %helper.id, error = %error, "failed to record helper failure");
            }
        }
    }
}
