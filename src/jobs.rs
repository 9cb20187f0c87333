//! The `job` API: job listings, applications and application status.
//!
//! | hook                              | endpoint key             | request               |
//! |-----------------------------------|--------------------------|-----------------------|
//! | `useGetJobsQuery`                 | `get-jobs`               | `GET /jobs?<query>`   |
//! | `useGetUserJobsQuery`             | `user-jobs`              | `GET /jobs/me`        |
//! | `useGetJobsStatQuery`             | `jobs-stat`              | `GET /jobs/stats`     |
//! | `useCreateJobApplicationMutation` | `create-job-application` | `POST /jobs/apply`    |
//! | `useUpdateJobStatusMutation`      | `user-job-status`        | `POST /jobs/status`   |
//!
//! Both mutations invalidate `user-jobs`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::{SmartApi, SmartApiBuilder};
use crate::config::ApiConfig;
use crate::endpoint::{EndpointBuilder, MutationDef, QueryDef};
use crate::error::ApiError;
use crate::hooks::{MutationHook, QueryHook};
use crate::transport::RequestSpec;

pub const NAMESPACE: &str = "job";

pub const GET_JOBS: &str = "get-jobs";
pub const USER_JOBS: &str = "user-jobs";
pub const JOBS_STAT: &str = "jobs-stat";
pub const CREATE_JOB_APPLICATION: &str = "create-job-application";
pub const USER_JOB_STATUS: &str = "user-job-status";

/// The `{ "data": ... }` wrapper every job endpoint responds with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

/// A job listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponseData {
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A job the current user has applied to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJobData {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Aggregate counters for the current user's applications.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobsStatData {
    #[serde(flatten)]
    pub counters: Map<String, Value>,
}

/// Filters for `getJobs`, sent as the URL query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsQuery {
    pub query: BTreeMap<String, String>,
}

impl JobsQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn page(page: u32) -> Self {
        Self::new().with("page", page.to_string())
    }
}

pub type JobsResponse = DataEnvelope<Vec<JobResponseData>>;
pub type UserJobsResponse = DataEnvelope<Vec<UserJobData>>;
pub type JobsStatResponse = DataEnvelope<JobsStatData>;

/// Declares the job endpoints on `builder`.
pub fn endpoints(builder: &mut EndpointBuilder) {
    builder
        .query(
            "getJobs",
            QueryDef::new(GET_JOBS, |args: JobsQuery| {
                RequestSpec::get("/jobs").params(args.query)
            }),
        )
        .mutation(
            "createJobApplication",
            MutationDef::new(CREATE_JOB_APPLICATION, |data: Value| {
                RequestSpec::post("/jobs/apply").body(data)
            })
            .invalidates([USER_JOBS]),
        )
        .query(
            "getUserJobs",
            QueryDef::new(USER_JOBS, |_: Value| RequestSpec::get("/jobs/me")),
        )
        .query(
            "getJobsStat",
            QueryDef::new(JOBS_STAT, |_: Value| RequestSpec::get("/jobs/stats")),
        )
        .mutation(
            "updateJobStatus",
            MutationDef::new(USER_JOB_STATUS, |data: Value| {
                RequestSpec::post("/jobs/status").body(data)
            })
            .invalidates([USER_JOBS]),
        );
}

/// Typed access to the job hooks.
#[derive(Debug)]
pub struct JobApi {
    api: SmartApi,
}

impl JobApi {
    /// Builds the job API with the default HTTP client and credential jar.
    ///
    /// # Errors
    ///
    /// See [`SmartApiBuilder::build`].
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        Self::from_builder(SmartApi::builder(NAMESPACE, config))
    }

    /// Builds the job API from a pre-configured builder.
    ///
    /// # Errors
    ///
    /// See [`SmartApiBuilder::build`].
    pub fn from_builder(builder: SmartApiBuilder) -> Result<Self, ApiError> {
        builder.build(endpoints).map(|api| Self { api })
    }

    #[must_use]
    pub const fn api(&self) -> &SmartApi {
        &self.api
    }

    /// `useGetJobsQuery`
    ///
    /// # Errors
    ///
    /// Never fails for a registry built by [`endpoints`].
    pub fn get_jobs(&self) -> Result<QueryHook<JobsQuery, JobsResponse>, ApiError> {
        self.api.query_hook("useGetJobsQuery")
    }

    /// `useGetUserJobsQuery`
    ///
    /// # Errors
    ///
    /// Never fails for a registry built by [`endpoints`].
    pub fn get_user_jobs(&self) -> Result<QueryHook<(), UserJobsResponse>, ApiError> {
        self.api.query_hook("useGetUserJobsQuery")
    }

    /// `useGetJobsStatQuery`
    ///
    /// # Errors
    ///
    /// Never fails for a registry built by [`endpoints`].
    pub fn get_jobs_stat(&self) -> Result<QueryHook<(), JobsStatResponse>, ApiError> {
        self.api.query_hook("useGetJobsStatQuery")
    }

    /// `useCreateJobApplicationMutation`
    ///
    /// # Errors
    ///
    /// Never fails for a registry built by [`endpoints`].
    pub fn create_job_application(&self) -> Result<MutationHook<Value, Value>, ApiError> {
        self.api.mutation_hook("useCreateJobApplicationMutation")
    }

    /// `useUpdateJobStatusMutation`
    ///
    /// # Errors
    ///
    /// Never fails for a registry built by [`endpoints`].
    pub fn update_job_status(&self) -> Result<MutationHook<Value, Value>, ApiError> {
        self.api.mutation_hook("useUpdateJobStatusMutation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointRegistry;
    use crate::mock::MockHttpClient;
    use serde_json::json;

    fn job_api(mock: &MockHttpClient) -> JobApi {
        JobApi::from_builder(
            SmartApi::builder(NAMESPACE, ApiConfig::new("http://api.test")).http_client(mock.clone()),
        )
        .expect("job api should build")
    }

    #[test]
    fn test_generated_hook_names() {
        let registry = EndpointRegistry::build(NAMESPACE, endpoints).expect("registry should build");
        assert_eq!(
            registry.hook_names().collect::<Vec<_>>(),
            [
                "useCreateJobApplicationMutation",
                "useGetJobsQuery",
                "useGetJobsStatQuery",
                "useGetUserJobsQuery",
                "useUpdateJobStatusMutation",
            ]
        );
    }

    #[test]
    fn test_mutations_invalidate_user_jobs() {
        let registry = EndpointRegistry::build(NAMESPACE, endpoints).expect("registry should build");
        for key in [CREATE_JOB_APPLICATION, USER_JOB_STATUS] {
            let descriptor = registry.get(key).expect("endpoint registered");
            let tags: Vec<&str> = descriptor.invalidates().iter().map(|t| t.as_str()).collect();
            assert_eq!(tags, [USER_JOBS]);
        }
    }

    #[test]
    fn test_get_jobs_resolves_query_string() {
        let registry = EndpointRegistry::build(NAMESPACE, endpoints).expect("registry should build");
        let args = serde_json::to_value(JobsQuery::page(2).with("q", "rust")).expect("serializable");
        let spec = registry
            .get(GET_JOBS)
            .expect("endpoint registered")
            .resolve(&args)
            .expect("args should decode");
        assert_eq!(spec.url, "/jobs");
        assert_eq!(
            spec.params,
            vec![
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "rust".to_string()),
            ]
        );
    }

    #[test]
    fn test_typed_accessors() {
        let api = job_api(&MockHttpClient::new());
        assert!(api.get_jobs().is_ok());
        assert!(api.get_user_jobs().is_ok());
        assert!(api.get_jobs_stat().is_ok());
        assert!(api.create_job_application().is_ok());
        assert!(api.update_job_status().is_ok());
    }

    #[tokio::test]
    async fn test_stats_decode_envelope() {
        let mock = MockHttpClient::new();
        mock.respond(
            "GET /jobs/stats",
            200,
            json!({ "data": { "applied": 3, "interviewing": 1 } }),
        );
        let api = job_api(&mock);

        let stats = api
            .get_jobs_stat()
            .expect("hook")
            .fetch(&())
            .await
            .expect("fetch succeeds");
        assert_eq!(stats.data.counters.get("applied"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_user_jobs_decode() {
        let mock = MockHttpClient::new();
        mock.respond(
            "GET /jobs/me",
            200,
            json!({ "data": [{ "id": 7, "status": "applied", "title": "Engineer" }] }),
        );
        let api = job_api(&mock);

        let jobs = api
            .get_user_jobs()
            .expect("hook")
            .fetch(&())
            .await
            .expect("fetch succeeds");
        let job = &jobs.data[0];
        assert_eq!(job.id, json!(7));
        assert_eq!(job.status.as_deref(), Some("applied"));
        assert_eq!(job.fields.get("title"), Some(&json!("Engineer")));
    }
}
