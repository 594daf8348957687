//! Orchestration behavior against in-memory doubles: start handshake,
//! mutual exclusion, cursor persistence, resume, failure handling and
//! the startup resume policy.

use std::sync::Arc;
use std::time::Duration;

use feedmill_core::domains::crawler::orchestrator::{
    CrawlOrchestrator, Resume, StartSignal,
};
use feedmill_core::domains::crawler::startup;
use feedmill_core::domains::sources::testing::{
    ScriptedFactory, ScriptedFailure, ScriptedPlatform,
};
use feedmill_core::domains::sources::{PlatformFactory, SourceType};
use feedmill_core::domains::tasks::models::{JobStatus, NewTaskDefinition, TaskDefinition};
use feedmill_core::domains::tasks::store::{JobStore, TaskStore};
use feedmill_core::domains::tasks::testing::{InMemoryJobStore, InMemoryTaskStore};
use feedmill_core::kernel::credentials::{CredentialStore, InMemoryCredentialStore};
use feedmill_core::kernel::notify::RecordingNotifier;
use feedmill_core::kernel::ServerDeps;
use feedmill_core::domains::content::InMemoryContentStore;

const HANDSHAKE_BOUND: Duration = Duration::from_secs(5);

struct Harness {
    deps: Arc<ServerDeps>,
    tasks: Arc<InMemoryTaskStore>,
    jobs: Arc<InMemoryJobStore>,
    credentials: Arc<InMemoryCredentialStore>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let tasks = Arc::new(InMemoryTaskStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let content = Arc::new(InMemoryContentStore::new());
    let credentials = Arc::new(InMemoryCredentialStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let deps = Arc::new(ServerDeps::new(
        tasks.clone(),
        jobs.clone(),
        content,
        credentials.clone(),
        notifier.clone(),
    ));
    Harness {
        deps,
        tasks,
        jobs,
        credentials,
        notifier,
    }
}

async fn add_definition(harness: &Harness, source: SourceType) -> TaskDefinition {
    harness
        .tasks
        .add(NewTaskDefinition {
            source_type: source,
            schedule: "0 0 * * * *".to_string(),
            include: vec![],
            exclude: vec![],
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn successful_run_walks_entities_in_order_and_finishes() {
    let h = harness();
    let definition = add_definition(&h, SourceType::Xiaobot).await;
    let platform = Arc::new(
        ScriptedPlatform::new(SourceType::Xiaobot).with_entities(&["e1", "e2", "e3"]),
    );

    let (receipt, handle) =
        CrawlOrchestrator::new(h.deps.clone(), platform.clone(), definition).spawn();
    let signal = receipt.wait(HANDSHAKE_BOUND).await;
    let job_id = match signal {
        Some(StartSignal::Accepted(record)) => record.id,
        other => panic!("expected acceptance, got {other:?}"),
    };
    handle.await.unwrap();

    // Cursor only ever moves forward through the selection order.
    assert_eq!(h.jobs.cursor_history(job_id), vec!["e1", "e2", "e3"]);
    let record = h.jobs.get(job_id).unwrap();
    assert_eq!(record.status, JobStatus::Finished);
    assert_eq!(record.cursor.as_deref(), Some("e3"));
    assert_eq!(h.notifier.count(), 0);
}

#[tokio::test]
async fn second_start_is_refused_while_a_run_is_in_flight() {
    let h = harness();
    let definition = add_definition(&h, SourceType::Xiaobot).await;
    let existing = h.jobs.create(None, definition.id).await.unwrap();

    let platform = Arc::new(ScriptedPlatform::new(SourceType::Xiaobot).with_entities(&["e1"]));
    let (receipt, handle) =
        CrawlOrchestrator::new(h.deps.clone(), platform.clone(), definition).spawn();

    match receipt.wait(HANDSHAKE_BOUND).await {
        Some(StartSignal::AlreadyRunning { job_id }) => assert_eq!(job_id, existing.id),
        other => panic!("expected refusal, got {other:?}"),
    }
    handle.await.unwrap();

    // The refused run did no work and created no record.
    assert!(platform.crawled().is_empty());
    assert_eq!(h.jobs.all().len(), 1);
}

#[tokio::test]
async fn every_category_is_crawled_per_entity() {
    let h = harness();
    let definition = add_definition(&h, SourceType::Zhihu).await;
    let platform = Arc::new(
        ScriptedPlatform::new(SourceType::Zhihu)
            .with_categories(&["answer", "article", "pin"])
            .with_entities(&["e1", "e2"]),
    );

    let (receipt, handle) =
        CrawlOrchestrator::new(h.deps.clone(), platform.clone(), definition).spawn();
    receipt.wait(HANDSHAKE_BOUND).await;
    handle.await.unwrap();

    let expected: Vec<(String, String)> = [
        ("e1", "answer"),
        ("e1", "article"),
        ("e1", "pin"),
        ("e2", "answer"),
        ("e2", "article"),
        ("e2", "pin"),
    ]
    .iter()
    .map(|(e, c)| (e.to_string(), c.to_string()))
    .collect();
    assert_eq!(platform.crawled(), expected);
}

#[tokio::test]
async fn include_and_exclude_shape_the_crawl_plan() {
    let h = harness();
    let definition = h
        .tasks
        .add(NewTaskDefinition {
            source_type: SourceType::Xiaobot,
            schedule: "0 0 * * * *".to_string(),
            include: vec!["e1".to_string(), "e2".to_string(), "e3".to_string()],
            exclude: vec!["e2".to_string()],
        })
        .await
        .unwrap();
    let platform = Arc::new(
        ScriptedPlatform::new(SourceType::Xiaobot).with_entities(&["e1", "e2", "e3", "e4"]),
    );

    let (receipt, handle) =
        CrawlOrchestrator::new(h.deps.clone(), platform.clone(), definition).spawn();
    receipt.wait(HANDSHAKE_BOUND).await;
    handle.await.unwrap();

    assert_eq!(platform.crawled_entities(), vec!["e1", "e3"]);
}

#[tokio::test]
async fn resumed_run_starts_after_the_cursor() {
    let h = harness();
    let definition = add_definition(&h, SourceType::Zsxq).await;
    let record = h.jobs.create(None, definition.id).await.unwrap();
    h.jobs.record_cursor(record.id, "e2").await.unwrap();

    let platform = Arc::new(
        ScriptedPlatform::new(SourceType::Zsxq).with_entities(&["e1", "e2", "e3", "e4"]),
    );
    let resume = Resume {
        job_id: record.id,
        cursor: Some("e2".to_string()),
    };
    let (receipt, handle) =
        CrawlOrchestrator::resuming(h.deps.clone(), platform.clone(), definition, resume).spawn();

    match receipt.wait(HANDSHAKE_BOUND).await {
        Some(StartSignal::Resumed { job_id }) => assert_eq!(job_id, record.id),
        other => panic!("expected resume signal, got {other:?}"),
    }
    handle.await.unwrap();

    assert_eq!(platform.crawled_entities(), vec!["e3", "e4"]);
    assert_eq!(h.jobs.get(record.id).unwrap().status, JobStatus::Finished);
}

#[tokio::test]
async fn resume_with_a_vanished_cursor_fails_open_to_the_full_plan() {
    let h = harness();
    let definition = add_definition(&h, SourceType::Zsxq).await;
    let record = h.jobs.create(None, definition.id).await.unwrap();

    let platform =
        Arc::new(ScriptedPlatform::new(SourceType::Zsxq).with_entities(&["e1", "e2"]));
    let resume = Resume {
        job_id: record.id,
        cursor: Some("gone".to_string()),
    };
    let (receipt, handle) =
        CrawlOrchestrator::resuming(h.deps.clone(), platform.clone(), definition, resume).spawn();
    receipt.wait(HANDSHAKE_BOUND).await;
    handle.await.unwrap();

    assert_eq!(platform.crawled_entities(), vec!["e1", "e2"]);
}

#[tokio::test]
async fn transient_entity_failures_are_tolerated_but_mark_the_run_failed() {
    let h = harness();
    let definition = add_definition(&h, SourceType::Xiaobot).await;
    let platform = Arc::new(
        ScriptedPlatform::new(SourceType::Xiaobot)
            .with_entities(&["e1", "e2", "e3"])
            .fail_entity("e2", ScriptedFailure::Transient),
    );

    let (receipt, handle) =
        CrawlOrchestrator::new(h.deps.clone(), platform.clone(), definition).spawn();
    let job_id = match receipt.wait(HANDSHAKE_BOUND).await {
        Some(StartSignal::Accepted(record)) => record.id,
        other => panic!("expected acceptance, got {other:?}"),
    };
    handle.await.unwrap();

    // The failing entity did not stop the walk, and its cursor still
    // advanced so a resume would not retry it forever.
    assert_eq!(platform.crawled_entities(), vec!["e1", "e2", "e3"]);
    assert_eq!(h.jobs.cursor_history(job_id), vec!["e1", "e2", "e3"]);
    let record = h.jobs.get(job_id).unwrap();
    assert_eq!(record.status, JobStatus::Error);
    // One aggregate notification, not one per failed entity.
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn credential_rejection_aborts_and_invalidates_the_credential() {
    let h = harness();
    h.credentials
        .put(SourceType::Zsxq, "stale-cookie", None)
        .await
        .unwrap();
    let definition = add_definition(&h, SourceType::Zsxq).await;
    let platform = Arc::new(
        ScriptedPlatform::new(SourceType::Zsxq)
            .with_entities(&["e1", "e2", "e3"])
            .fail_entity("e1", ScriptedFailure::Credential),
    );

    let (receipt, handle) =
        CrawlOrchestrator::new(h.deps.clone(), platform.clone(), definition).spawn();
    let job_id = match receipt.wait(HANDSHAKE_BOUND).await {
        Some(StartSignal::Accepted(record)) => record.id,
        other => panic!("expected acceptance, got {other:?}"),
    };
    handle.await.unwrap();

    // The run stopped at the first credential rejection.
    assert_eq!(platform.crawled_entities(), vec!["e1"]);
    assert_eq!(h.jobs.get(job_id).unwrap().status, JobStatus::Error);
    // Credential gone, operator told exactly once.
    assert!(!h.credentials.contains(SourceType::Zsxq));
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn missing_credential_fails_the_run_before_any_crawl() {
    let h = harness();
    let definition = add_definition(&h, SourceType::Xiaobot).await;
    let platform = Arc::new(
        ScriptedPlatform::new(SourceType::Xiaobot)
            .with_entities(&["e1"])
            .without_credential(),
    );

    let (receipt, handle) =
        CrawlOrchestrator::new(h.deps.clone(), platform.clone(), definition).spawn();
    let job_id = match receipt.wait(HANDSHAKE_BOUND).await {
        Some(StartSignal::Accepted(record)) => record.id,
        other => panic!("expected acceptance, got {other:?}"),
    };
    handle.await.unwrap();

    assert!(platform.crawled().is_empty());
    assert_eq!(h.jobs.get(job_id).unwrap().status, JobStatus::Error);
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn startup_resumes_expensive_sources_and_stops_cheap_ones() {
    let h = harness();

    let zhihu_def = add_definition(&h, SourceType::Zhihu).await;
    let zhihu_record = h.jobs.create(None, zhihu_def.id).await.unwrap();
    h.jobs.record_cursor(zhihu_record.id, "e1").await.unwrap();

    let github_def = add_definition(&h, SourceType::Github).await;
    let github_record = h.jobs.create(None, github_def.id).await.unwrap();

    let zhihu_platform = Arc::new(
        ScriptedPlatform::new(SourceType::Zhihu).with_entities(&["e1", "e2", "e3"]),
    );
    let github_platform =
        Arc::new(ScriptedPlatform::new(SourceType::Github).with_entities(&["r1"]));
    let factory: Arc<dyn PlatformFactory> = Arc::new(
        ScriptedFactory::new()
            .with_platform(zhihu_platform.clone())
            .with_platform(github_platform.clone()),
    );

    startup::resume_running_jobs(&h.deps, &factory).await.unwrap();

    // Cheap source: stopped immediately, never crawled.
    assert_eq!(
        h.jobs.get(github_record.id).unwrap().status,
        JobStatus::Stopped
    );
    assert!(github_platform.crawled().is_empty());

    // Expensive source: resumed in the background from the cursor.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if h.jobs.get(zhihu_record.id).unwrap().status == JobStatus::Finished {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "resumed job never finished"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(zhihu_platform.crawled_entities(), vec!["e2", "e3"]);
}
