// Integration tests for endpoint registration and cache keys

mod common;

use serde_json::Value;
use usable_query::endpoint::QueryDef;
use usable_query::error::ApiError;
use usable_query::mock::MockHttpClient;
use usable_query::transport::RequestSpec;
use usable_query::SmartApi;

#[test]
fn test_duplicate_endpoint_key_generates_no_hooks() {
    let result = SmartApi::builder("job", common::config())
        .http_client(MockHttpClient::new())
        .build(|b| {
            b.query("getJobs", QueryDef::new("get-jobs", |_: Value| RequestSpec::get("/jobs")))
                .query(
                    "searchJobs",
                    QueryDef::new("get-jobs", |_: Value| RequestSpec::get("/jobs/search")),
                );
        });

    let err = result.unwrap_err();
    assert_eq!(
        err,
        ApiError::DuplicateEndpointKey {
            namespace: "job".to_string(),
            key: "get-jobs".to_string(),
        }
    );
    assert!(err.is_registration());
}

#[test]
fn test_names_colliding_on_hook_name_fail() {
    let result = SmartApi::builder("job", common::config())
        .http_client(MockHttpClient::new())
        .build(|b| {
            b.query("getJobs", QueryDef::new("get-jobs", |_: Value| RequestSpec::get("/jobs")))
                .query("get-jobs", QueryDef::new("jobs-v2", |_: Value| RequestSpec::get("/v2/jobs")));
        });

    assert!(matches!(
        result,
        Err(ApiError::DuplicateEndpointName { ref name, .. }) if name == "get-jobs"
    ));
}

#[test]
fn test_cache_key_ignores_field_order() {
    let api = SmartApi::builder("job", common::config())
        .http_client(MockHttpClient::new())
        .build(|b| {
            b.query("getJobs", QueryDef::new("get-jobs", |_: Value| RequestSpec::get("/jobs")));
        })
        .expect("api should build");
    let hook = api
        .query_hook::<Value, Value>("useGetJobsQuery")
        .expect("hook");

    let a: Value = serde_json::from_str(r#"{"query":{"page":"1","q":"rust"},"sort":"new"}"#)
        .expect("valid json");
    let b: Value = serde_json::from_str(r#"{"sort":"new","query":{"q":"rust","page":"1"}}"#)
        .expect("valid json");

    let key_a = hook.cache_key(&a).expect("key");
    let key_b = hook.cache_key(&b).expect("key");
    assert_eq!(key_a, key_b);
    assert_eq!(key_a.fingerprint(), key_b.fingerprint());
    assert_eq!(key_a.endpoint(), "get-jobs");

    let other: Value = serde_json::from_str(r#"{"query":{"page":"2","q":"rust"},"sort":"new"}"#)
        .expect("valid json");
    assert_ne!(hook.cache_key(&other).expect("key"), key_a);
}

#[test]
fn test_typed_and_untyped_args_share_a_key() {
    use usable_query::jobs::{GET_JOBS, JobsQuery};
    use usable_query::key::CacheKey;

    let typed = CacheKey::from_args(GET_JOBS, &JobsQuery::page(1).with("q", "rust"))
        .expect("key");
    let raw: Value = serde_json::from_str(r#"{"query":{"q":"rust","page":"1"}}"#)
        .expect("valid json");
    assert_eq!(typed, CacheKey::new(GET_JOBS, &raw));
}
