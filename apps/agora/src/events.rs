use serde_json::Value;

use event_bus::LocalBus;

use crate::channel::ChannelKey;
use crate::protocol::InboundFrame;
use crate::resources::ResourceKey;

/// Payload of every publication on the client bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Push(InboundFrame),
    Completed { resource: ResourceKey, body: Value },
    Session(SessionEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    /// Navigation-away signal; consumers drop everything bound to the old user.
    SignedOut { user_id: Option<String> },
}

pub type EventBus = LocalBus<ChannelKey, BusEvent>;
