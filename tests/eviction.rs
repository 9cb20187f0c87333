// Integration tests for unused-entry eviction

mod common;

use serde_json::json;
use tokio::time::{Duration, advance};
use usable_query::cache::QueryStatus;
use usable_query::mock::MockHttpClient;

#[tokio::test(start_paused = true)]
async fn test_entry_evicted_after_cache_time_without_subscribers() {
    let mock = MockHttpClient::new();
    mock.respond("GET /jobs/stats", 200, json!({ "data": { "applied": 1 } }));
    let jobs = common::job_api(&mock);
    let hook = jobs.get_jobs_stat().expect("hook");

    let mut subscription = hook.subscribe(&()).expect("subscribe");
    subscription.settled().await;
    let key = subscription.key().clone();
    drop(subscription);

    advance(Duration::from_secs(59)).await;
    assert_eq!(jobs.api().evict_unused(), 0);
    assert!(jobs.api().snapshot(&key).is_some());

    advance(Duration::from_secs(2)).await;
    assert_eq!(jobs.api().evict_unused(), 1);
    assert!(jobs.api().snapshot(&key).is_none());

    // A new subscriber starts from an empty entry and fetches again.
    let subscription = hook.subscribe(&()).expect("subscribe");
    let current = subscription.current();
    assert_eq!(current.status, QueryStatus::Loading);
    assert!(current.data.is_none());
    mock.wait_for_requests(2).await;
}

#[tokio::test(start_paused = true)]
async fn test_watched_entry_never_evicted() {
    let mock = MockHttpClient::new();
    mock.respond("GET /jobs/me", 200, json!({ "data": [] }));
    let jobs = common::job_api(&mock);

    let mut subscription = jobs
        .get_user_jobs()
        .expect("hook")
        .subscribe(&())
        .expect("subscribe");
    subscription.settled().await;

    advance(Duration::from_secs(600)).await;
    assert_eq!(jobs.api().evict_unused(), 0);
    assert_eq!(jobs.api().cache_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper() {
    let mock = MockHttpClient::new();
    mock.respond("GET /jobs/me", 200, json!({ "data": [] }));
    let jobs = common::job_api(&mock);
    let sweeper = jobs.api().spawn_sweeper();

    jobs.get_user_jobs()
        .expect("hook")
        .fetch(&())
        .await
        .expect("fetch succeeds");
    assert_eq!(jobs.api().cache_len(), 1);

    tokio::time::sleep(Duration::from_secs(75)).await;
    assert_eq!(jobs.api().cache_len(), 0);

    sweeper.cancel().await;
}
