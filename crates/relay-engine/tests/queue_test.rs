//! Integration tests for the producer-facing queue surface.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::Utc;
use relay_core::{DeliveryId, DeliveryJob, EventPayload, TargetId, TestClock};
use relay_engine::{
    AllowAllGuard, DeliveryQueue, EngineError, InMemoryBroker, InMemoryDeliveryStore, JobBroker,
    JobState, UrlGuard, UrlVerdict,
};

/// Guard that refuses URLs containing a marker substring.
struct DenyMarked;

impl UrlGuard for DenyMarked {
    fn validate<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = UrlVerdict> + Send + 'a>> {
        Box::pin(async move {
            if url.contains("internal") {
                UrlVerdict::unsafe_because("resolves to a private address")
            } else {
                UrlVerdict::safe()
            }
        })
    }
}

struct Harness {
    broker: Arc<InMemoryBroker>,
    queue: DeliveryQueue,
}

fn harness_with_guard(guard: Arc<dyn UrlGuard>) -> Harness {
    let clock = TestClock::new();
    let broker = Arc::new(InMemoryBroker::new(Arc::new(clock.clone())));
    let store = Arc::new(InMemoryDeliveryStore::new());
    let queue = DeliveryQueue::new(broker.clone(), store, guard, Arc::new(clock));
    Harness { broker, queue }
}

fn harness() -> Harness {
    harness_with_guard(Arc::new(AllowAllGuard))
}

fn job_for(target_id: TargetId, url: &str) -> DeliveryJob {
    DeliveryJob::new(
        target_id,
        DeliveryId::new(),
        url,
        EventPayload::new("order.created", Utc::now(), serde_json::json!({"n": 1})),
    )
}

#[tokio::test]
async fn enqueue_is_idempotent_per_delivery_id() {
    let h = harness();
    let job = job_for(TargetId::new(), "https://example.com/hook");

    let first = h.queue.enqueue(job.clone(), None).await.expect("enqueue");
    let second = h.queue.enqueue(job, None).await.expect("enqueue");

    assert_eq!(first, second);
    assert_eq!(h.broker.counts().await.expect("counts").total(), 1);
}

#[tokio::test]
async fn unsafe_urls_are_refused_before_enqueue() {
    let h = harness_with_guard(Arc::new(DenyMarked));
    let job = job_for(TargetId::new(), "https://internal.service/hook");

    let result = h.queue.enqueue(job, None).await;
    assert!(matches!(result, Err(EngineError::UnsafeUrl { .. })));
    assert_eq!(h.broker.counts().await.expect("counts").total(), 0);
}

#[tokio::test]
async fn bulk_enqueue_fails_closed_as_a_whole() {
    let h = harness_with_guard(Arc::new(DenyMarked));
    let target = TargetId::new();
    let jobs = vec![
        job_for(target, "https://example.com/a"),
        job_for(target, "https://internal.service/b"),
        job_for(target, "https://example.com/c"),
    ];

    let result = h.queue.enqueue_bulk(jobs).await;
    assert!(matches!(result, Err(EngineError::UnsafeUrl { .. })));
    assert_eq!(h.broker.counts().await.expect("counts").total(), 0);
}

#[tokio::test]
async fn bulk_enqueue_returns_ids_in_order() {
    let h = harness();
    let target = TargetId::new();
    let jobs: Vec<_> =
        (0..3).map(|_| job_for(target, "https://example.com/hook")).collect();
    let expected: Vec<_> = jobs.iter().map(|j| j.job_id.clone()).collect();

    let ids = h.queue.enqueue_bulk(jobs).await.expect("bulk enqueue");
    assert_eq!(ids, expected);
    assert_eq!(h.broker.counts().await.expect("counts").waiting, 3);
}

#[tokio::test]
async fn missing_jobs_report_false_not_error() {
    let h = harness();
    let missing = relay_core::JobId::for_delivery(DeliveryId::new());

    assert!(!h.queue.remove_job(missing.clone()).await.expect("remove"));
    assert!(!h.queue.retry_job(missing.clone()).await.expect("retry"));
    assert!(h.queue.job(missing).await.expect("lookup").is_none());
}

#[tokio::test]
async fn retry_job_promotes_a_delayed_job() {
    let h = harness();
    let job = job_for(TargetId::new(), "https://example.com/hook");
    let job_id = job.job_id.clone();
    h.queue.enqueue(job, Some(Duration::from_secs(3_600))).await.expect("enqueue");

    assert!(h.broker.claim(10).await.expect("claim").is_empty());
    assert!(h.queue.retry_job(job_id).await.expect("retry"));
    assert_eq!(h.broker.claim(10).await.expect("claim").len(), 1);
}

#[tokio::test]
async fn cancel_by_owner_touches_only_queued_jobs() {
    let h = harness();
    let owner = TargetId::new();
    let other = TargetId::new();

    let running = job_for(owner, "https://example.com/hook")
        .with_priority(relay_core::JobPriority::High);
    h.queue.enqueue(running.clone(), None).await.expect("enqueue");
    h.queue.enqueue(job_for(owner, "https://example.com/hook"), None).await.expect("enqueue");
    h.queue
        .enqueue(job_for(owner, "https://example.com/hook"), Some(Duration::from_secs(60)))
        .await
        .expect("enqueue");
    h.queue.enqueue(job_for(other, "https://example.com/hook"), None).await.expect("enqueue");

    let claimed = h.broker.claim(1).await.expect("claim");
    assert_eq!(claimed[0].job_id, running.job_id);

    let cancelled = h.queue.cancel_by_owner(owner).await.expect("cancel");
    assert_eq!(cancelled, 2);

    let counts = h.broker.counts().await.expect("counts");
    assert_eq!(counts.active, 1);
    assert_eq!(counts.waiting, 1);

    // The other owner's job survives.
    let foreign = h.queue.list_by_owner(other, None).await.expect("list");
    assert_eq!(foreign.len(), 1);
}

#[tokio::test]
async fn list_by_owner_filters_by_state() {
    let h = harness();
    let owner = TargetId::new();

    h.queue.enqueue(job_for(owner, "https://example.com/hook"), None).await.expect("enqueue");
    h.queue
        .enqueue(job_for(owner, "https://example.com/hook"), Some(Duration::from_secs(60)))
        .await
        .expect("enqueue");

    let waiting =
        h.queue.list_by_owner(owner, Some(JobState::Waiting)).await.expect("list");
    assert_eq!(waiting.len(), 1);

    let all = h.queue.list_by_owner(owner, None).await.expect("list");
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn list_by_state_respects_range_bounds() {
    let h = harness();
    let owner = TargetId::new();
    for _ in 0..5 {
        h.queue.enqueue(job_for(owner, "https://example.com/hook"), None).await.expect("enqueue");
    }

    let first_two = h.queue.list_by_state(JobState::Waiting, 0, 2).await.expect("list");
    assert_eq!(first_two.len(), 2);

    let rest = h.queue.list_by_state(JobState::Waiting, 2, 100).await.expect("list");
    assert_eq!(rest.len(), 3);

    // Delayed jobs stay out of the waiting listing until due.
    h.queue
        .enqueue(job_for(owner, "https://example.com/hook"), Some(Duration::from_secs(60)))
        .await
        .expect("enqueue");
    assert_eq!(
        h.queue.list_by_state(JobState::Delayed, 0, 100).await.expect("list").len(),
        1
    );
}
