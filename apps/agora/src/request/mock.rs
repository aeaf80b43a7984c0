//! Scripted [`Fetcher`] for tests and offline hosts.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;

use super::{FetchError, Fetcher};
use crate::resources::{ApiRequest, ApiResponse};

enum Scripted {
    Ready(ApiResponse),
    Gated(oneshot::Receiver<ApiResponse>),
    Fail(FetchError),
}

/// Answers by request path. Queued answers are consumed in order; once a
/// path's queue is empty its fallback (if any) is used, else a 404.
#[derive(Default)]
pub struct MockFetcher {
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallback: Mutex<HashMap<String, ApiResponse>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, path: &str, scripted: Scripted) {
        self.queued
            .lock()
            .entry(path.to_owned())
            .or_default()
            .push_back(scripted);
    }

    pub fn respond(&self, path: &str, response: ApiResponse) {
        self.enqueue(path, Scripted::Ready(response));
    }

    /// Queues an answer that is held back until the returned sender fires.
    /// Dropping the sender turns the call into a transport error.
    pub fn respond_gated(&self, path: &str) -> oneshot::Sender<ApiResponse> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(path, Scripted::Gated(rx));
        tx
    }

    pub fn fail(&self, path: &str, reason: &str) {
        self.enqueue(path, Scripted::Fail(FetchError::Connect(reason.to_owned())));
    }

    /// Answer used for `path` whenever nothing is queued.
    pub fn route(&self, path: &str, response: ApiResponse) {
        self.fallback.lock().insert(path.to_owned(), response);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &ApiRequest) -> Result<ApiResponse, FetchError> {
        self.calls.lock().push(request.clone());
        let next = self
            .queued
            .lock()
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Ready(response)) => Ok(response),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Gated(gate)) => gate
                .await
                .map_err(|_| FetchError::Connect("gate dropped".into())),
            None => Ok(self.fallback.lock().get(&request.path).cloned().unwrap_or(ApiResponse {
                status: 404,
                body: json!({ "errors": format!("no route for {}", request.path) }),
            })),
        }
    }
}
