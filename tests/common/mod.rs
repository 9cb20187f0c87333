// Shared setup for integration tests
#![allow(dead_code)]

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use usable_query::config::{ApiConfig, QueryConfig};
use usable_query::jobs::{JobApi, NAMESPACE};
use usable_query::mock::MockHttpClient;
use usable_query::SmartApi;

pub const BASE_URL: &str = "http://api.test";

/// Installs a `RUST_LOG`-driven subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> ApiConfig {
    ApiConfig::new(BASE_URL).with_query(QueryConfig::new(
        Duration::from_secs(30),
        Duration::from_secs(60),
    ))
}

pub fn job_api(mock: &MockHttpClient) -> JobApi {
    init_tracing();
    JobApi::from_builder(SmartApi::builder(NAMESPACE, config()).http_client(mock.clone()))
        .expect("job api should build")
}
