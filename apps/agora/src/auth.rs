use event_bus::Bus;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::channel::ChannelKey;
use crate::events::{BusEvent, EventBus, SessionEvent};
use crate::protocol::User;
use crate::request::{Outcome, RequestError, RequestManager};
use crate::resources;

/// Sign-in, sign-up and who-am-I on top of the request manager.
#[derive(Clone)]
pub struct AuthApi {
    requests: RequestManager,
    bus: Option<EventBus>,
}

impl AuthApi {
    pub fn new(requests: RequestManager) -> Self {
        Self {
            requests,
            bus: None,
        }
    }

    /// Session changes are announced on [`ChannelKey::session`].
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Asks the server who the stored session belongs to.
    ///
    /// A genuine failure means the stored identity is stale and it is cleared.
    /// A cancelled check says nothing about the session and leaves it alone.
    pub async fn whoami(&self) -> Outcome<User> {
        let outcome = self.requests.request(resources::whoami()).await;
        let session = self.requests.session();
        match &outcome {
            Outcome::Success(user) => {
                if let Err(err) = serde_json::to_value(user)
                    .map_err(|err| err.to_string())
                    .and_then(|record| session.refresh(record).map_err(|err| err.to_string()))
                {
                    warn!(target: "agora::session", error = %err, "could not refresh session record");
                }
            }
            Outcome::Failure(RequestError::NotAuthenticated) => {}
            Outcome::Failure(err) => {
                debug!(target: "agora::session", error = %err, "who-am-I failed; clearing session");
                let user_id = session.clear();
                self.announce(SessionEvent::SignedOut { user_id });
            }
            Outcome::Cancelled => {}
        }
        outcome
    }

    pub async fn sign_in(&self, identifier: &str, password: &str) -> Outcome<User> {
        let outcome = self
            .requests
            .request(resources::sign_in(identifier, password))
            .await;
        self.install(outcome)
    }

    pub async fn sign_up(&self, registration: Value) -> Outcome<User> {
        let outcome = self.requests.request(resources::sign_up(registration)).await;
        self.install(outcome)
    }

    /// Ends the server session; the local identity is dropped either way.
    pub async fn sign_out(&self) -> Outcome<Value> {
        let outcome = self.requests.request(resources::sign_out()).await;
        if !outcome.is_cancelled() {
            let user_id = self.requests.session().clear();
            self.announce(SessionEvent::SignedOut { user_id });
        }
        outcome
    }

    fn install(&self, outcome: Outcome<User>) -> Outcome<User> {
        let Outcome::Success(user) = outcome else {
            return outcome;
        };
        let stored = serde_json::to_value(&user)
            .map_err(|err| err.to_string())
            .and_then(|record| {
                self.requests
                    .session()
                    .sign_in(record)
                    .map_err(|err| err.to_string())
            });
        match stored {
            Ok(user_id) => {
                info!(target: "agora::session", %user_id, "signed in");
                self.announce(SessionEvent::SignedIn { user_id });
                Outcome::Success(user)
            }
            Err(err) => {
                warn!(target: "agora::session", error = %err, "sign-in answer unusable");
                Outcome::Failure(RequestError::Session(err))
            }
        }
    }

    fn announce(&self, event: SessionEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(&ChannelKey::session(), &BusEvent::Session(event));
        }
    }
}
