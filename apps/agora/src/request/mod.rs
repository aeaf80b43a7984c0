//! Request lifecycle: at most one authoritative in-flight call per resource.
//!
//! Every call for a [`ResourceKey`] supersedes the previous one. The superseded
//! call resolves to [`Outcome::Cancelled`] no matter how its fetch ended, so a
//! late response can never overwrite a newer one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use event_bus::Bus;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::ChannelKey;
use crate::events::{BusEvent, EventBus};
use crate::metrics;
use crate::report::{Reporter, Severity, TracingReporter};
use crate::resources::{ApiRequest, ApiResponse, Resource, ResourceKey};
use crate::session::SessionContext;

pub mod http;
pub mod mock;

pub use http::HttpFetcher;
pub use mock::MockFetcher;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid response body: {0}")]
    Body(String),
}

/// Fetch-like collaborator that performs one HTTP call.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &ApiRequest) -> Result<ApiResponse, FetchError>;
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("server answered {status}")]
    Http { status: u16, errors: Option<Value> },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("undecodable response: {0}")]
    Decode(String),
    #[error("session could not be stored: {0}")]
    Session(String),
}

impl RequestError {
    /// Text suitable for a toast: the server's own `errors` when it sent any.
    pub fn user_message(&self) -> String {
        match self {
            RequestError::Http {
                errors: Some(errors),
                status,
            } => {
                let parts = flatten_errors(errors);
                if parts.is_empty() {
                    format!("request failed with status {status}")
                } else {
                    parts.join(", ")
                }
            }
            other => other.to_string(),
        }
    }
}

fn flatten_errors(errors: &Value) -> Vec<String> {
    match errors {
        Value::String(text) => vec![text.clone()],
        Value::Array(items) => items.iter().flat_map(flatten_errors).collect(),
        Value::Object(map) => map.values().flat_map(flatten_errors).collect(),
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(RequestError),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failure(err) => Outcome::Failure(err),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Failure(RequestError::NotAuthenticated) => "unauthenticated",
            Outcome::Failure(_) => "failure",
            Outcome::Cancelled => "cancelled",
        }
    }
}

struct Slot {
    generation: u64,
    token: CancellationToken,
}

/// Owns the request slots of one client session. Clones share the slots.
#[derive(Clone)]
pub struct RequestManager {
    fetcher: Arc<dyn Fetcher>,
    session: SessionContext,
    slots: Arc<Mutex<HashMap<ResourceKey, Slot>>>,
    generation: Arc<AtomicU64>,
    reporter: Arc<dyn Reporter>,
    bus: Option<EventBus>,
}

impl RequestManager {
    pub fn new(fetcher: Arc<dyn Fetcher>, session: SessionContext) -> Self {
        Self {
            fetcher,
            session,
            slots: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            reporter: Arc::new(TracingReporter),
            bus: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Successful results are also published under [`ChannelKey::completion`].
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub async fn request<T: DeserializeOwned>(&self, resource: Resource<T>) -> Outcome<T> {
        let key = resource.key;
        if resource.requires_session && !self.session.is_authenticated() {
            debug!(target: "agora::request", resource = %key, "no session; not sending");
            let outcome = Outcome::Failure(RequestError::NotAuthenticated);
            record_outcome(&key, &outcome);
            return outcome;
        }

        let (generation, token) = self.install(&key);
        let slot = SlotGuard {
            manager: self,
            key: &key,
            generation,
            settled: false,
        };
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.fetcher.fetch(&resource.request) => Some(result),
        };
        let current = slot.settle();

        let outcome = match fetched {
            Some(result) if current => match result {
                Ok(response) => self.settle(&key, resource.envelope, response),
                Err(err) => Outcome::Failure(RequestError::Transport(err.to_string())),
            },
            _ => {
                debug!(target: "agora::request", resource = %key, generation, "superseded");
                Outcome::Cancelled
            }
        };

        if let Outcome::Failure(err) = &outcome {
            warn!(target: "agora::request", resource = %key, error = %err, "request failed");
            self.reporter.report(&err.user_message(), Severity::Error);
        }
        record_outcome(&key, &outcome);
        outcome
    }

    /// Cancels whatever is in flight for `key`. Returns whether anything was.
    pub fn cancel(&self, key: &ResourceKey) -> bool {
        let removed = self.slots.lock().remove(key);
        match removed {
            Some(slot) => {
                slot.token.cancel();
                debug!(target: "agora::request", resource = %key, generation = slot.generation, "cancelled");
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self, key: &ResourceKey) -> bool {
        self.slots.lock().contains_key(key)
    }

    fn install(&self, key: &ResourceKey) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let previous = self.slots.lock().insert(
            key.clone(),
            Slot {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            debug!(
                target: "agora::request",
                resource = %key,
                previous = previous.generation,
                generation,
                "replacing in-flight request"
            );
        }
        (generation, token)
    }

    /// Frees the slot if it still belongs to `generation`.
    fn release(&self, key: &ResourceKey, generation: u64) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) if slot.generation == generation => {
                slots.remove(key);
                true
            }
            _ => false,
        }
    }

    fn settle<T: DeserializeOwned>(
        &self,
        key: &ResourceKey,
        envelope: Option<&'static str>,
        response: ApiResponse,
    ) -> Outcome<T> {
        let errors = match &response.body {
            Value::String(text) if !response.is_success() && !text.trim().is_empty() => {
                Some(Value::String(text.trim().to_owned()))
            }
            body => body.get("errors").filter(|errors| !errors.is_null()).cloned(),
        };
        if !response.is_success() || errors.is_some() {
            return Outcome::Failure(RequestError::Http {
                status: response.status,
                errors,
            });
        }

        let payload = match envelope {
            Some(field) => response.body.get(field).cloned().unwrap_or(Value::Null),
            None => response.body,
        };
        let value = match T::deserialize(&payload) {
            Ok(value) => value,
            Err(err) => return Outcome::Failure(RequestError::Decode(err.to_string())),
        };

        if let Some(bus) = &self.bus {
            let event = BusEvent::Completed {
                resource: key.clone(),
                body: payload,
            };
            bus.publish(&ChannelKey::completion(key), &event);
        }
        Outcome::Success(value)
    }
}

/// Frees the slot when a `request` future is dropped before its fetch settles.
struct SlotGuard<'a> {
    manager: &'a RequestManager,
    key: &'a ResourceKey,
    generation: u64,
    settled: bool,
}

impl SlotGuard<'_> {
    /// Releases the slot; true if this call was still the current one.
    fn settle(mut self) -> bool {
        self.settled = true;
        self.manager.release(self.key, self.generation)
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.manager.release(self.key, self.generation) {
            debug!(target: "agora::request", resource = %self.key, generation = self.generation, "request dropped");
            record_outcome(self.key, &Outcome::<()>::Cancelled);
        }
    }
}

fn record_outcome<T>(key: &ResourceKey, outcome: &Outcome<T>) {
    metrics::REQUEST_OUTCOMES
        .with_label_values(&[key.family(), outcome.label()])
        .inc();
}
