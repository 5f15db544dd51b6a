//! # RPC Transport
//!
//! The request/response channel to the sync server.
//!
//! ## Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Transport                                      │
//! │                                                                         │
//! │  PullCoordinator / PushCoordinator                                     │
//! │            │                                                            │
//! │            ▼                                                            │
//! │  ┌──────────────────────┐                                              │
//! │  │  SyncRpc (trait)     │  pull(&PullRequest) / push(&PushRequest)     │
//! │  └──────────┬───────────┘                                              │
//! │             │                                                           │
//! │     ┌───────┴─────────┐                                                │
//! │     ▼                 ▼                                                 │
//! │  HttpRpcClient      MockRpc                                            │
//! │  POST {base}/sync/pull      queued responses,                          │
//! │  POST {base}/sync/push      recorded requests,                         │
//! │  Bearer token               injected failures                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Error Mapping
//! ```text
//! timeout            → SyncError::Timeout(request_timeout_secs)
//! connect            → SyncError::ConnectionFailed
//! non-2xx status     → SyncError::HttpStatus { status, body }
//! undecodable body   → SyncError::DeserializationFailed
//! ```
//!
//! Retrying is the caller's job; see the agent.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::ServerSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{PullRequest, PullResponse, PushRequest, PushResponse};

// =============================================================================
// Trait
// =============================================================================

/// Remote side of the sync protocol.
#[async_trait]
pub trait SyncRpc: Send + Sync {
    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse>;

    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;
}

// =============================================================================
// HTTP Client
// =============================================================================

/// JSON-over-HTTP client for the sync endpoints.
#[derive(Debug, Clone)]
pub struct HttpRpcClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    request_timeout_secs: u64,
}

impl HttpRpcClient {
    pub fn new(settings: &ServerSettings) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("strata-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(HttpRpcClient {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
            request_timeout_secs: settings.request_timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, endpoint: &str, body: &Req) -> SyncResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/sync/{}", self.base_url, endpoint);
        debug!(url = %url, "Sending sync request");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.map_error(e))?;
        debug!(url = %url, status = %status, bytes = bytes.len(), "Sync response received");

        serde_json::from_slice(&bytes).map_err(|e| {
            SyncError::DeserializationFailed(format!("{} response: {}", endpoint, e))
        })
    }

    fn map_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.request_timeout_secs)
        } else {
            SyncError::from(err)
        }
    }
}

#[async_trait]
impl SyncRpc for HttpRpcClient {
    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.post("pull", request).await
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.post("push", request).await
    }
}

// =============================================================================
// Mock
// =============================================================================

/// In-process [`SyncRpc`] for tests and offline demos.
///
/// Responses are served from per-endpoint queues in order. With an empty
/// queue, pull answers with no results and push echoes the request's
/// revision with no changes. Every request is recorded.
#[derive(Default)]
pub struct MockRpc {
    pulls: Mutex<VecDeque<SyncResult<PullResponse>>>,
    pushes: Mutex<VecDeque<SyncResult<PushResponse>>>,
    pull_log: Mutex<Vec<PullRequest>>,
    push_log: Mutex<Vec<PushRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_pull(&self, response: PullResponse) {
        lock(&self.pulls).push_back(Ok(response));
    }

    pub fn queue_push(&self, response: PushResponse) {
        lock(&self.pushes).push_back(Ok(response));
    }

    /// The next pull fails with `error`.
    pub fn fail_pull(&self, error: SyncError) {
        lock(&self.pulls).push_back(Err(error));
    }

    /// The next push fails with `error`.
    pub fn fail_push(&self, error: SyncError) {
        lock(&self.pushes).push_back(Err(error));
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        lock(&self.pull_log).clone()
    }

    pub fn push_requests(&self) -> Vec<PushRequest> {
        lock(&self.push_log).clone()
    }
}

#[async_trait]
impl SyncRpc for MockRpc {
    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        lock(&self.pull_log).push(request.clone());
        lock(&self.pulls)
            .pop_front()
            .unwrap_or_else(|| Ok(PullResponse::default()))
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        lock(&self.push_log).push(request.clone());
        lock(&self.pushes).pop_front().unwrap_or_else(|| {
            Ok(PushResponse {
                current_revision: request.last_revision.clone(),
                ..Default::default()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_serves_queue_in_order() {
        let rpc = MockRpc::new();
        rpc.fail_pull(SyncError::ConnectionFailed("down".into()));
        rpc.queue_pull(PullResponse {
            total_records: 7,
            ..Default::default()
        });

        let request = PullRequest::default();
        assert!(rpc.pull(&request).await.is_err());
        assert_eq!(rpc.pull(&request).await.unwrap().total_records, 7);
        assert_eq!(rpc.pull(&request).await.unwrap().total_records, 0);
        assert_eq!(rpc.pull_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_push_echoes_revision() {
        let rpc = MockRpc::new();
        let request = PushRequest {
            last_revision: Some("55".into()),
            ..Default::default()
        };

        let response = rpc.push(&request).await.unwrap();
        assert_eq!(response.current_revision.as_deref(), Some("55"));
        assert!(response.changes.is_empty());
    }

    #[test]
    fn test_http_client_trims_base_url() {
        let settings = ServerSettings {
            base_url: "https://sync.example.com/api/".into(),
            ..Default::default()
        };
        let client = HttpRpcClient::new(&settings).unwrap();
        assert_eq!(client.base_url(), "https://sync.example.com/api");
    }
}
