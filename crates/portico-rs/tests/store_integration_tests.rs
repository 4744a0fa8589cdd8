//! Integration tests against a live shared store.
//!
//! Every test probes store connectivity first and returns early when no
//! store is reachable, so the suite still passes on machines without one.
//! Point `STORE_HOST`/`STORE_PORT` at a scratch instance to run them for
//! real. All keys are suffixed with fresh UUIDs, so concurrent runs and
//! leftover state cannot collide.

use portico_rs::models::error::GatewayError;
use portico_rs::models::job::{HttpJob, HttpMethod, JobStatus};
use portico_rs::models::route::StrategyKind;
use portico_rs::models::settings::Settings;
use portico_rs::services::dispatcher::{DispatchConfig, DispatchRequest, JobDispatcher};
use portico_rs::services::registry::RouteRegistry;
use portico_rs::services::repository::{JobRepository, Transition};
use portico_rs::services::store::StoreClient;
use portico_rs::services::strategy::RouteStrategy;
use portico_rs::services::worker::{HandlerFn, HandlerResponse, Worker};
use portico_rs::utils::keys;

use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

async fn test_store() -> Option<Arc<StoreClient>> {
    let settings = Settings::from_env().ok()?;
    let url = settings.store.url();
    let connect = StoreClient::connect(&url);
    match tokio::time::timeout(Duration::from_secs(2), connect).await {
        Ok(Ok(store)) => Some(Arc::new(store)),
        _ => {
            eprintln!("skipping: shared store not reachable");
            None
        }
    }
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

fn pending_job(path: &str, target: &str) -> HttpJob {
    HttpJob::new(
        unique("req"),
        HttpMethod::Get,
        path.to_string(),
        HashMap::new(),
        HashMap::new(),
        Vec::new(),
        target.to_string(),
    )
}

fn json_handler(body: serde_json::Value) -> HandlerFn {
    Arc::new(move |_job: HttpJob| {
        let body = body.clone();
        async move { Ok(HandlerResponse::json(200, &body)) }.boxed()
    })
}

/// Waits until the route has at least `count` candidates, or panics.
async fn wait_for_candidates(
    registry: &RouteRegistry,
    method: HttpMethod,
    path: &str,
    count: usize,
) {
    for _ in 0..100 {
        let candidates = registry.match_route(method, path).await.unwrap();
        if candidates.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("route {} {} never reached {} candidates", method, path, count);
}

#[tokio::test]
async fn register_is_idempotent_per_triple() {
    let Some(store) = test_store().await else { return };
    let registry = RouteRegistry::new(store);
    let path = format!("/it/{}", unique("idem"));
    let version = unique("v");

    for _ in 0..3 {
        registry
            .register(&version, HttpMethod::Get, &path)
            .await
            .unwrap();
    }

    let candidates = registry.match_route(HttpMethod::Get, &path).await.unwrap();
    assert_eq!(candidates, vec![version.clone()]);

    registry.deregister(&version).await.unwrap();
}

#[tokio::test]
async fn match_returns_sorted_candidates_and_deregister_removes_them() {
    let Some(store) = test_store().await else { return };
    let registry = RouteRegistry::new(store);
    let path = format!("/it/{}", unique("multi"));
    let suffix = unique("");
    let v_a = format!("a{}", suffix);
    let v_b = format!("b{}", suffix);

    // Register out of order; match must come back sorted.
    registry.register(&v_b, HttpMethod::Get, &path).await.unwrap();
    registry.register(&v_a, HttpMethod::Get, &path).await.unwrap();

    let candidates = registry.match_route(HttpMethod::Get, &path).await.unwrap();
    assert_eq!(candidates, vec![v_a.clone(), v_b.clone()]);

    // A registered route is visible through list_all.
    let listed = registry.list_all().await.unwrap();
    assert!(listed
        .iter()
        .any(|r| r.path == path && r.worker_version == v_a));

    registry.deregister(&v_b).await.unwrap();
    let candidates = registry.match_route(HttpMethod::Get, &path).await.unwrap();
    assert_eq!(candidates, vec![v_a.clone()]);

    registry.deregister(&v_a).await.unwrap();
    let candidates = registry.match_route(HttpMethod::Get, &path).await.unwrap();
    assert!(candidates.is_empty());

    let listed = registry.list_all().await.unwrap();
    assert!(!listed.iter().any(|r| r.path == path));
}

#[tokio::test]
async fn repository_round_trips_and_deletes_jobs() {
    let Some(store) = test_store().await else { return };
    let repository = JobRepository::new(store);
    let job = pending_job("/it/roundtrip", "v1");

    repository.save(&job).await.unwrap();
    let loaded = repository.load(&job.request_id).await.unwrap().unwrap();
    assert_eq!(loaded.request_id, job.request_id);
    assert_eq!(loaded.status, JobStatus::Pending);

    repository.delete(&job.request_id).await.unwrap();
    assert!(repository.load(&job.request_id).await.unwrap().is_none());
}

#[tokio::test]
async fn claim_is_won_exactly_once() {
    let Some(store) = test_store().await else { return };
    let repository = JobRepository::new(store);
    let job = pending_job("/it/claim", "v1");
    repository.save(&job).await.unwrap();

    assert!(repository.claim(&job.request_id, "v1").await.unwrap());
    assert!(!repository.claim(&job.request_id, "v2").await.unwrap());

    repository.delete(&job.request_id).await.unwrap();
}

#[tokio::test]
async fn transitions_respect_the_status_machine() {
    let Some(store) = test_store().await else { return };
    let repository = JobRepository::new(store);
    let job = pending_job("/it/transition", "v1");
    repository.save(&job).await.unwrap();
    let id = job.request_id.clone();

    // Skipping straight to COMPLETED is refused.
    let refused = repository
        .transition(&id, JobStatus::Completed, |_| {})
        .await
        .unwrap();
    assert!(matches!(refused, Transition::Refused(JobStatus::Pending)));

    let applied = repository
        .transition(&id, JobStatus::InProgress, |_| {})
        .await
        .unwrap();
    assert!(matches!(applied, Transition::Applied(_)));

    let applied = repository
        .transition(&id, JobStatus::Completed, |job| {
            job.response_status = Some(204);
        })
        .await
        .unwrap();
    let Transition::Applied(done) = applied else {
        panic!("completion should apply");
    };
    assert_eq!(done.response_status, Some(204));

    // Terminal states are never overwritten, not even by EXPIRED.
    let refused = repository
        .transition(&id, JobStatus::Expired, |_| {})
        .await
        .unwrap();
    assert!(matches!(refused, Transition::Refused(JobStatus::Completed)));

    let missing = repository
        .transition(&unique("ghost"), JobStatus::Expired, |_| {})
        .await
        .unwrap();
    assert!(matches!(missing, Transition::Missing));

    repository.delete(&id).await.unwrap();
}

#[tokio::test]
async fn queues_are_fifo_and_report_their_depth() {
    let Some(store) = test_store().await else { return };
    let repository = JobRepository::new(Arc::clone(&store));
    let version = unique("qdepth");
    let queue = keys::queue(&version);

    for id in ["one", "two", "three"] {
        store.queue_push(&queue, id).await.unwrap();
    }
    assert_eq!(repository.queue_depth(&version).await.unwrap(), 3);

    let first = store
        .queue_pop_blocking(&queue, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some("one"));
    assert_eq!(repository.queue_depth(&version).await.unwrap(), 2);

    store.kv_delete(&queue).await.unwrap();
    assert_eq!(repository.queue_depth(&version).await.unwrap(), 0);

    let empty = store
        .queue_pop_blocking(&queue, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(empty.is_none());
}

#[tokio::test]
async fn round_robin_alternates_between_two_candidates() {
    let Some(store) = test_store().await else { return };
    let strategy = RouteStrategy::new(StrategyKind::RoundRobin, store);
    let path = format!("/it/{}", unique("rr"));
    let candidates = vec!["v1".to_string(), "v2".to_string()];

    let mut picks = Vec::new();
    for _ in 0..4 {
        let pick = strategy
            .select(HttpMethod::Get, &path, &candidates, None)
            .await
            .unwrap()
            .unwrap();
        picks.push(pick);
    }
    assert_eq!(picks, vec!["v1", "v2", "v1", "v2"]);
}

#[tokio::test]
async fn round_robin_splits_a_hundred_dispatches_evenly() {
    let Some(store) = test_store().await else { return };
    let strategy = RouteStrategy::new(StrategyKind::RoundRobin, store);
    let path = format!("/it/{}", unique("rr100"));
    let candidates = vec!["a".to_string(), "b".to_string()];

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..100 {
        let pick = strategy
            .select(HttpMethod::Get, &path, &candidates, None)
            .await
            .unwrap()
            .unwrap();
        *counts.entry(pick).or_default() += 1;
    }
    assert_eq!(counts.get("a"), Some(&50));
    assert_eq!(counts.get("b"), Some(&50));
}

#[tokio::test]
async fn pinned_version_restricts_selection() {
    let Some(store) = test_store().await else { return };
    let strategy = RouteStrategy::new(StrategyKind::RoundRobin, store);
    let path = format!("/it/{}", unique("pin"));
    let candidates = vec!["v1".to_string(), "v2".to_string()];

    for _ in 0..3 {
        let pick = strategy
            .select(HttpMethod::Get, &path, &candidates, Some("v2"))
            .await
            .unwrap();
        assert_eq!(pick.as_deref(), Some("v2"));
    }

    let none = strategy
        .select(HttpMethod::Get, &path, &candidates, Some("v9"))
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn dispatch_round_trips_through_a_live_worker() {
    let Some(store) = test_store().await else { return };
    // The worker gets its own connection, as a separate process would; its
    // blocking pops must not stall the dispatcher's commands.
    let Some(worker_store) = test_store().await else { return };
    let repository = Arc::new(JobRepository::new(Arc::clone(&store)));
    let registry = Arc::new(RouteRegistry::new(Arc::clone(&store)));
    let version = unique("e2e");
    let path = format!("/it/{}", unique("dispatch"));

    let mut worker = Worker::new(
        version.clone(),
        Arc::clone(&worker_store),
        Arc::new(JobRepository::new(Arc::clone(&worker_store))),
        Arc::new(RouteRegistry::new(Arc::clone(&worker_store))),
    );
    worker.register_handler(
        HttpMethod::Post,
        path.clone(),
        json_handler(serde_json::json!({ "ok": true })),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(worker.run(shutdown_rx));
    wait_for_candidates(&registry, HttpMethod::Post, &path, 1).await;

    let dispatcher = JobDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&repository),
        Arc::clone(&registry),
        RouteStrategy::new(StrategyKind::RoundRobin, Arc::clone(&store)),
        DispatchConfig::with_timeout_ms(10_000),
    );
    let reply = dispatcher
        .dispatch(DispatchRequest {
            method: HttpMethod::Post,
            path: path.clone(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: b"{}".to_vec(),
        })
        .await
        .unwrap();

    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, br#"{"ok":true}"#);
    assert_eq!(
        reply.headers.get("X-Served-By").map(String::as_str),
        Some(version.as_str())
    );

    // The client-visible request id matches the persisted job.
    let job = repository.load(&reply.request_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.target_worker, version);

    let _ = shutdown_tx.send(true);
    let _ = worker_task.await;
}

#[tokio::test]
async fn dispatch_without_a_route_returns_no_route() {
    let Some(store) = test_store().await else { return };
    let repository = Arc::new(JobRepository::new(Arc::clone(&store)));
    let registry = Arc::new(RouteRegistry::new(Arc::clone(&store)));
    let dispatcher = JobDispatcher::new(
        Arc::clone(&store),
        repository,
        registry,
        RouteStrategy::new(StrategyKind::RoundRobin, Arc::clone(&store)),
        DispatchConfig::default(),
    );

    let outcome = dispatcher
        .dispatch(DispatchRequest {
            method: HttpMethod::Get,
            path: format!("/it/{}", unique("nope")),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: Vec::new(),
        })
        .await;

    assert!(matches!(outcome, Err(GatewayError::NoRoute { .. })));
}

#[tokio::test]
async fn slow_handlers_expire_at_the_dispatch_deadline() {
    let Some(store) = test_store().await else { return };
    let Some(worker_store) = test_store().await else { return };
    let repository = Arc::new(JobRepository::new(Arc::clone(&store)));
    let registry = Arc::new(RouteRegistry::new(Arc::clone(&store)));
    let version = unique("slow");
    let path = format!("/it/{}", unique("slow"));

    let mut worker = Worker::new(
        version.clone(),
        Arc::clone(&worker_store),
        Arc::new(JobRepository::new(Arc::clone(&worker_store))),
        Arc::new(RouteRegistry::new(Arc::clone(&worker_store))),
    );
    worker.register_handler(
        HttpMethod::Post,
        path.clone(),
        Arc::new(|_job: HttpJob| {
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(HandlerResponse::json(200, &serde_json::json!({})))
            }
            .boxed()
        }),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(worker.run(shutdown_rx));
    wait_for_candidates(&registry, HttpMethod::Post, &path, 1).await;

    let dispatcher = JobDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&repository),
        Arc::clone(&registry),
        RouteStrategy::new(StrategyKind::RoundRobin, Arc::clone(&store)),
        DispatchConfig {
            timeout: Duration::from_millis(800),
            // Keep the stuck check out of this scenario.
            stuck_after: Duration::from_secs(30),
            ..DispatchConfig::default()
        },
    );

    let started = std::time::Instant::now();
    let outcome = dispatcher
        .dispatch(DispatchRequest {
            method: HttpMethod::Post,
            path: path.clone(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: b"{}".to_vec(),
        })
        .await;
    assert!(started.elapsed() < Duration::from_secs(3));

    let Err(GatewayError::DispatchTimeout { request_id }) = outcome else {
        panic!("slow dispatch should time out");
    };

    // The persisted job ends EXPIRED (either side may have marked it).
    let job = repository.load(&request_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Expired);

    let _ = shutdown_tx.send(true);
    let _ = worker_task.await;
}

#[tokio::test]
async fn workers_skip_jobs_that_expired_before_the_pop() {
    let Some(store) = test_store().await else { return };
    let Some(worker_store) = test_store().await else { return };
    let repository = Arc::new(JobRepository::new(Arc::clone(&store)));
    let version = unique("skip");
    let path = format!("/it/{}", unique("skip"));

    // Persist an already-expired job and queue its id, as happens when the
    // dispatcher gives up while the id still sits in the queue.
    let mut job = pending_job(&path, &version);
    job.status = JobStatus::Expired;
    repository.save(&job).await.unwrap();
    store
        .queue_push(&keys::queue(&version), &job.request_id)
        .await
        .unwrap();

    let mut worker = Worker::new(
        version.clone(),
        Arc::clone(&worker_store),
        Arc::new(JobRepository::new(Arc::clone(&worker_store))),
        Arc::new(RouteRegistry::new(Arc::clone(&worker_store))),
    );
    worker.register_handler(
        HttpMethod::Get,
        path.clone(),
        json_handler(serde_json::json!({ "should": "never run" })),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(worker.run(shutdown_rx));

    // Give the worker time to pop and (correctly) drop the job.
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let job = repository.load(&job.request_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Expired);
    assert_eq!(job.response_status, None);

    let _ = shutdown_tx.send(true);
    let _ = worker_task.await;
    repository.delete(&job.request_id).await.unwrap();
}
