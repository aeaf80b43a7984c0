//! Channel keys: the routing identity of every bus publication.
//!
//! Two-party channels are keyed by the canonically ordered pair of participant
//! ids, so the author and the receiver of a message derive the same key without
//! coordinating.

use std::cmp::Ordering;
use std::fmt;

use crate::protocol::InboundFrame;
use crate::resources::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Post,
    Comment,
    Status,
    Message,
    Typing,
    Session,
    Completion,
}

/// How many entity ids a kind is scoped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Broadcast,
    Single,
    Pair,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Post => "post",
            EventKind::Comment => "comment",
            EventKind::Status => "status",
            EventKind::Message => "conv",
            EventKind::Typing => "typing",
            EventKind::Session => "session",
            EventKind::Completion => "done",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            EventKind::Post | EventKind::Session => Arity::Broadcast,
            EventKind::Comment | EventKind::Status | EventKind::Completion => Arity::Single,
            EventKind::Message | EventKind::Typing => Arity::Pair,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Broadcast,
    Single(String),
    /// Always stored in canonical order.
    Pair(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    kind: EventKind,
    scope: Scope,
}

/// Builds the key for `kind` from whatever ids are available.
///
/// Empty ids count as missing. Missing ids degrade the key (pair to single,
/// single to broadcast); surplus ids are ignored.
pub fn key_for(kind: EventKind, ids: &[&str]) -> ChannelKey {
    let mut present = ids.iter().copied().filter(|id| !id.is_empty());
    let first = present.next();
    let second = present.next();
    let scope = match (kind.arity(), first, second) {
        (Arity::Broadcast, _, _) | (_, None, _) => Scope::Broadcast,
        (Arity::Single, Some(id), _) | (Arity::Pair, Some(id), None) => Scope::Single(id.to_owned()),
        (Arity::Pair, Some(a), Some(b)) => {
            let (lo, hi) = canonical_pair(a, b);
            Scope::Pair(lo.to_owned(), hi.to_owned())
        }
    };
    ChannelKey { kind, scope }
}

/// Orders two participant ids: numeric ids by value and ahead of textual ids,
/// textual ids lexically, lexical order breaking any remaining tie.
pub fn participant_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if participant_order(a, b) == Ordering::Greater {
        (b, a)
    } else {
        (a, b)
    }
}

impl ChannelKey {
    pub fn broadcast(kind: EventKind) -> Self {
        key_for(kind, &[])
    }

    pub fn conversation(me: &str, peer: &str) -> Self {
        key_for(EventKind::Message, &[me, peer])
    }

    pub fn typing(me: &str, peer: &str) -> Self {
        key_for(EventKind::Typing, &[me, peer])
    }

    pub fn status(user: &str) -> Self {
        key_for(EventKind::Status, &[user])
    }

    pub fn comments(post_id: &str) -> Self {
        key_for(EventKind::Comment, &[post_id])
    }

    pub fn session() -> Self {
        Self::broadcast(EventKind::Session)
    }

    pub fn completion(resource: &ResourceKey) -> Self {
        let resource = resource.to_string();
        key_for(EventKind::Completion, &[resource.as_str()])
    }

    pub fn for_frame(frame: &InboundFrame) -> Self {
        match frame {
            InboundFrame::Post { .. } => Self::broadcast(EventKind::Post),
            InboundFrame::Comment { post_id, .. } => Self::comments(post_id),
            InboundFrame::Status { username, .. } => Self::status(username),
            InboundFrame::Message { message } => key_for(
                EventKind::Message,
                &[message.author_id.as_str(), message.receiver_id.as_str()],
            ),
            InboundFrame::Typing {
                author_id,
                receiver_id,
                ..
            } => key_for(EventKind::Typing, &[author_id.as_str(), receiver_id.as_str()]),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Broadcast => write!(f, "{}", self.kind),
            Scope::Single(id) => write!(f, "{}:{id}", self.kind),
            Scope::Pair(lo, hi) => write!(f, "{}:{lo}:{hi}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;

    const IDS: [&str; 8] = ["7", "42", "007", "100", "alice", "bob", "9a", "18446744073709551616"];

    #[test]
    fn pair_keys_are_symmetric() {
        for a in IDS {
            for b in IDS {
                assert_eq!(
                    key_for(EventKind::Message, &[a, b]),
                    key_for(EventKind::Message, &[b, a]),
                    "{a} / {b}"
                );
                assert_eq!(ChannelKey::typing(a, b), ChannelKey::typing(b, a));
            }
        }
    }

    #[test]
    fn numeric_ids_order_by_value() {
        assert_eq!(ChannelKey::conversation("42", "7").to_string(), "conv:7:42");
        assert_eq!(ChannelKey::conversation("7", "42").to_string(), "conv:7:42");
        assert_eq!(ChannelKey::conversation("alice", "7").to_string(), "conv:7:alice");
        assert_eq!(ChannelKey::conversation("bob", "alice").to_string(), "conv:alice:bob");
    }

    #[test]
    fn missing_ids_degrade_to_defined_keys() {
        assert_eq!(key_for(EventKind::Message, &["7"]).to_string(), "conv:7");
        assert_eq!(key_for(EventKind::Message, &["", "7"]).to_string(), "conv:7");
        assert_eq!(key_for(EventKind::Message, &[]).to_string(), "conv");
        assert_eq!(key_for(EventKind::Comment, &[]).scope(), &Scope::Broadcast);
        assert_eq!(key_for(EventKind::Post, &["ignored"]).to_string(), "post");
        assert_eq!(key_for(EventKind::Status, &["7", "8"]).to_string(), "status:7");
    }

    #[test]
    fn frame_key_matches_observer_independent_conversation_key() {
        let frame = InboundFrame::Message {
            message: Message {
                author_id: "7".into(),
                receiver_id: "42".into(),
                text: "hey".into(),
                ..Message::default()
            },
        };
        let key = ChannelKey::for_frame(&frame);
        assert_eq!(key.to_string(), "conv:7:42");
        // receiver "42" computes its conversation with "7"
        assert_eq!(key, ChannelKey::conversation("42", "7"));
        // author "7" computes its conversation with "42"
        assert_eq!(key, ChannelKey::conversation("7", "42"));
    }

    #[test]
    fn single_party_frames_use_their_id() {
        let status = InboundFrame::Status {
            username: "neo".into(),
            online: true,
        };
        assert_eq!(ChannelKey::for_frame(&status).to_string(), "status:neo");
        assert_eq!(ChannelKey::comments("12").kind(), EventKind::Comment);
        assert_eq!(ChannelKey::session().to_string(), "session");
    }
}
