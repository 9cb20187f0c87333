//! Mock HTTP client for testing.
//!
//! This module provides a scripted [`HttpClient`] that answers from queued
//! responses, enabling deterministic tests without a real server.
//!
//! # Basic Usage
//!
//! ```
//! use usable_query::mock::MockHttpClient;
//! use serde_json::json;
//!
//! let mock = MockHttpClient::new();
//! mock.respond("GET /jobs/me", 200, json!({ "data": [] }));
//! mock.respond("POST /jobs/status", 400, json!({ "message": "invalid" }));
//! assert_eq!(mock.request_count(), 0);
//! ```
//!
//! # Holding a request in flight
//!
//! [`MockHttpClient::respond_gated`] returns a [`Gate`]. The matching request
//! is recorded immediately but its response is held until the gate is opened,
//! which makes it possible to observe what happens while a call is outstanding.
//!
//! # Routing
//!
//! Responses are keyed by `"METHOD /path"`, where the path excludes the query
//! string. Each request takes the next queued response for its route; the
//! last one is reused once the queue is down to a single response. Requests
//! with no scripted route get a `404` with a JSON message.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::transport::{HttpClient, HttpRequest, HttpResponse};

/// Releases a response scripted with [`MockHttpClient::respond_gated`].
#[derive(Debug, Clone, Default)]
pub struct Gate {
    token: CancellationToken,
}

impl Gate {
    /// Lets the held response (and any later reuse of it) complete.
    pub fn open(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Response {
        response: HttpResponse,
        gate: Option<Gate>,
    },
    Failure(ApiError),
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<String, VecDeque<Reply>>,
    requests: Vec<HttpRequest>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    recorded: Notify,
}

/// A scripted in-memory [`HttpClient`].
///
/// Clones share the same script and request log, so one clone can be handed
/// to the runtime while the test keeps another.
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    inner: Arc<Inner>,
}

impl MockHttpClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Poisoning only means another test thread panicked mid-update.
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn push(&self, route: &str, reply: Reply) {
        self.state()
            .routes
            .entry(route.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queues a response for `route` (`"GET /jobs/me"`).
    pub fn respond(&self, route: &str, status: u16, body: Value) {
        self.push(
            route,
            Reply::Response {
                response: HttpResponse::new(status, body),
                gate: None,
            },
        );
    }

    /// Queues a response that is held until the returned gate is opened.
    pub fn respond_gated(&self, route: &str, status: u16, body: Value) -> Gate {
        let gate = Gate::default();
        self.push(
            route,
            Reply::Response {
                response: HttpResponse::new(status, body),
                gate: Some(gate.clone()),
            },
        );
        gate
    }

    /// Queues a failure with no response, such as a refused connection.
    pub fn fail(&self, route: &str, error: ApiError) {
        self.push(route, Reply::Failure(error));
    }

    /// All requests received so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state().requests.clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }

    /// Number of requests received for `route`.
    #[must_use]
    pub fn count(&self, route: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|request| route_of(request) == route)
            .count()
    }

    /// Waits until at least `n` requests have been received.
    pub async fn wait_for_requests(&self, n: usize) {
        loop {
            let recorded = self.inner.recorded.notified();
            if self.request_count() >= n {
                return;
            }
            recorded.await;
        }
    }

    fn next_reply(&self, request: HttpRequest) -> Reply {
        let route = route_of(&request);
        let mut state = self.state();
        state.requests.push(request);
        let reply = match state.routes.get_mut(&route) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        reply.unwrap_or_else(|| Reply::Response {
            response: HttpResponse::new(
                404,
                json!({ "message": format!("no mock response for {route}") }),
            ),
            gate: None,
        })
    }
}

fn route_of(request: &HttpRequest) -> String {
    format!("{} {}", request.method, request.url.path())
}

impl HttpClient for MockHttpClient {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, ApiError>> {
        let reply = self.next_reply(request);
        self.inner.recorded.notify_waiters();

        async move {
            match reply {
                Reply::Response { response, gate } => {
                    if let Some(gate) = gate {
                        gate.token.cancelled().await;
                    }
                    Ok(response)
                }
                Reply::Failure(error) => Err(error),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use reqwest::{Method, Url};
    use std::time::Duration;

    fn request(method: Method, url: &str) -> HttpRequest {
        HttpRequest {
            method,
            url: Url::parse(url).expect("valid url"),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_sequence_reuses_last() {
        let mock = MockHttpClient::new();
        mock.respond("GET /jobs/me", 500, Value::Null);
        mock.respond("GET /jobs/me", 200, json!({ "data": [] }));

        let statuses = [
            mock.execute(request(Method::GET, "http://api.test/jobs/me")).await,
            mock.execute(request(Method::GET, "http://api.test/jobs/me")).await,
            mock.execute(request(Method::GET, "http://api.test/jobs/me?x=1")).await,
        ]
        .map(|result| result.expect("scripted response").status);

        assert_eq!(statuses, [500, 200, 200]);
        assert_eq!(mock.count("GET /jobs/me"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_route_is_404() {
        let mock = MockHttpClient::new();
        let response = mock
            .execute(request(Method::DELETE, "http://api.test/jobs/1"))
            .await
            .expect("mock always answers");
        assert_eq!(response.status, 404);
        assert_eq!(
            response.body,
            json!({ "message": "no mock response for DELETE /jobs/1" })
        );
    }

    #[tokio::test]
    async fn test_failure_reply() {
        let mock = MockHttpClient::new();
        mock.fail("GET /jobs", ApiError::Network("connection refused".into()));
        let err = mock
            .execute(request(Method::GET, "http://api.test/jobs"))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Network("connection refused".into()));
    }

    #[tokio::test]
    async fn test_gate_holds_response() {
        let mock = MockHttpClient::new();
        let gate = mock.respond_gated("GET /jobs/stats", 200, json!({ "data": {} }));

        let pending = mock.execute(request(Method::GET, "http://api.test/jobs/stats"));
        let held = tokio::time::timeout(Duration::from_millis(20), pending).await;
        assert!(held.is_err(), "response should wait for the gate");
        assert_eq!(mock.request_count(), 1);

        gate.open();
        let response = mock
            .execute(request(Method::GET, "http://api.test/jobs/stats"))
            .await
            .expect("gate is open");
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_wait_for_requests() {
        let mock = MockHttpClient::new();
        let waiter = {
            let mock = mock.clone();
            tokio::spawn(async move { mock.wait_for_requests(2).await })
        };
        let _ = mock.execute(request(Method::GET, "http://api.test/a")).await;
        let _ = mock.execute(request(Method::GET, "http://api.test/b")).await;

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .expect("waiter should not panic");
    }
}
