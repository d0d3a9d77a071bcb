//! HTTP transport abstraction.
//!
//! Mirrors the `HttpClient` trait used elsewhere in this codebase: a thin
//! `async_trait` seam between request assembly (signing, retry, rotation)
//! and the actual bytes-on-the-wire, with a production `reqwest` backend and
//! a `MockRequestSender` test double recording calls and replaying queued
//! responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

/// An outbound request, already fully assembled (path, query, form body,
/// headers) — everything the sender needs to put bytes on the wire.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: reqwest::Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: reqwest::Method::GET,
            path: path.into(),
            query: Vec::new(),
            form: Vec::new(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn post(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: reqwest::Method::POST,
            path: path.into(),
            query: Vec::new(),
            form: Vec::new(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn delete(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: reqwest::Method::DELETE,
            path: path.into(),
            query: Vec::new(),
            form: Vec::new(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Response from a single request attempt. Status codes are carried as data
/// rather than errors — callers decide what's retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes a single request against a given server's base URL. One attempt,
/// no retry or rotation — those live one layer up, in the caller that holds
/// the [`crate::server_pool::ServerPool`].
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send(&self, base_url: &str, request: &ApiRequest) -> Result<ApiResponse>;
}

/// Production sender backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestSender for ReqwestSender {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn send(&self, base_url: &str, request: &ApiRequest) -> Result<ApiResponse> {
        let url = format!("{base_url}{}", request.path);

        let mut req = self
            .client
            .request(request.method.clone(), &url)
            .timeout(request.timeout);

        if !request.query.is_empty() {
            req = req.query(&request.query);
        }

        for (k, v) in &request.headers {
            req = req.header(k, v);
        }

        if !request.form.is_empty() {
            req = req.form(&request.form);
        }

        tracing::debug!(url = %url, "sending request");
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        tracing::debug!(status, body_len = body.len(), "received response");

        Ok(ApiResponse { status, body })
    }
}

/// Recorded call to [`MockRequestSender`], for test assertions.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub base_url: String,
    pub request: ApiRequest,
}

/// Deterministic in-memory sender, keyed by `"{method} {path}"` with a FIFO
/// queue of responses per key — same shape as the mock HTTP client used for
/// the daemon tests elsewhere in this codebase.
#[derive(Clone, Default)]
pub struct MockRequestSender {
    responses: Arc<Mutex<HashMap<String, Vec<Result<ApiResponse>>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockRequestSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response(&self, method: &reqwest::Method, path: &str, response: Result<ApiResponse>) {
        self.responses
            .lock()
            .entry(format!("{method} {path}"))
            .or_default()
            .push(response);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RequestSender for MockRequestSender {
    async fn send(&self, base_url: &str, request: &ApiRequest) -> Result<ApiResponse> {
        self.calls.lock().push(MockCall {
            base_url: base_url.to_string(),
            request: request.clone(),
        });

        let key = format!("{} {}", request.method, request.path);
        let mut responses = self.responses.lock();
        if let Some(queue) = responses.get_mut(&key) {
            if !queue.is_empty() {
                return queue.remove(0);
            }
        }

        Ok(ApiResponse {
            status: 599,
            body: format!("no mock response configured for {key}"),
        })
    }
}
