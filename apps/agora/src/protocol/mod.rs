//! Wire shapes shared with the forum server: push frames and the records they
//! carry.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub mod models;

pub use models::{Comment, Message, Post, User};

/// Server-initiated frame received over the push connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    Post {
        post: Post,
    },
    Comment {
        #[serde(rename = "postID", deserialize_with = "id_string")]
        post_id: String,
        comment: Comment,
    },
    Status {
        username: String,
        #[serde(default)]
        online: bool,
    },
    Message {
        message: Message,
    },
    Typing {
        #[serde(rename = "authorID", deserialize_with = "id_string")]
        author_id: String,
        #[serde(rename = "receiverID", deserialize_with = "id_string")]
        receiver_id: String,
        #[serde(default = "typing_default")]
        typing: bool,
    },
}

fn typing_default() -> bool {
    true
}

impl InboundFrame {
    pub const KNOWN_TYPES: [&'static str; 5] = ["post", "comment", "status", "message", "typing"];

    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Post { .. } => "post",
            InboundFrame::Comment { .. } => "comment",
            InboundFrame::Status { .. } => "status",
            InboundFrame::Message { .. } => "message",
            InboundFrame::Typing { .. } => "typing",
        }
    }
}

/// Identify/unidentify frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutboundFrame {
    Login(Identify),
    Logout(Identify),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    #[serde(rename = "userID")]
    pub user_id: String,
}

impl OutboundFrame {
    pub fn login(user_id: impl Into<String>) -> Self {
        OutboundFrame::Login(Identify {
            user_id: user_id.into(),
        })
    }

    pub fn logout(user_id: impl Into<String>) -> Self {
        OutboundFrame::Logout(Identify {
            user_id: user_id.into(),
        })
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid json: {0}")]
    Json(#[source] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("invalid `{kind}` frame: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Result of decoding a text frame that was at least well-formed JSON with a type.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(InboundFrame),
    Unknown(String),
}

pub fn decode_frame(text: &str) -> Result<Decoded, FrameError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(FrameError::Json)?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_owned();
    if !InboundFrame::KNOWN_TYPES.contains(&kind.as_str()) {
        return Ok(Decoded::Unknown(kind));
    }
    serde_json::from_value(value)
        .map(Decoded::Frame)
        .map_err(|source| FrameError::Payload { kind, source })
}

/// Accepts identifiers the server sends either as strings or as integers.
pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Int(value) => value.to_string(),
    })
}

pub(crate) fn id_string_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Int(value) => value.to_string(),
        Raw::Null(()) => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_message_frame() {
        let text = json!({
            "type": "message",
            "message": {"authorID": "7", "receiverID": "42", "text": "hey"}
        })
        .to_string();
        let Decoded::Frame(InboundFrame::Message { message }) = decode_frame(&text).unwrap() else {
            panic!("expected message frame");
        };
        assert_eq!(message.author_id, "7");
        assert_eq!(message.receiver_id, "42");
        assert_eq!(message.text, "hey");
        assert!(message.id.is_empty());
    }

    #[test]
    fn comment_post_id_may_be_numeric() {
        let text = r#"{"type":"comment","postID":12,"comment":{"id":"c1","text":"nice"}}"#;
        match decode_frame(text).unwrap() {
            Decoded::Frame(InboundFrame::Comment { post_id, comment }) => {
                assert_eq!(post_id, "12");
                assert_eq!(comment.text, "nice");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_reported_not_failed() {
        let decoded = decode_frame(r#"{"type":"reaction","emoji":"+1"}"#).unwrap();
        assert_eq!(decoded, Decoded::Unknown("reaction".into()));
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(decode_frame("not json"), Err(FrameError::Json(_))));
        assert!(matches!(decode_frame(r#"{"kind":"post"}"#), Err(FrameError::MissingType)));
        assert!(matches!(
            decode_frame(r#"{"type":"status","online":true}"#),
            Err(FrameError::Payload { .. })
        ));
    }

    #[test]
    fn outbound_identify_shape() {
        let login = OutboundFrame::login("7").encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&login).unwrap();
        assert_eq!(value, json!({"type": "login", "data": {"userID": "7"}}));

        let logout = OutboundFrame::logout("7").encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&logout).unwrap();
        assert_eq!(value, json!({"type": "logout", "data": {"userID": "7"}}));
    }

    #[test]
    fn typing_defaults_to_active() {
        let text = r#"{"type":"typing","authorID":42,"receiverID":"7"}"#;
        match decode_frame(text).unwrap() {
            Decoded::Frame(InboundFrame::Typing { author_id, typing, .. }) => {
                assert_eq!(author_id, "42");
                assert!(typing);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
