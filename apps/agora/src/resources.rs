//! Catalogue of the HTTP resources the client fetches.
//!
//! Every resource has a [`ResourceKey`] naming its request slot, the request to
//! issue, and the response field that carries the payload.

use std::fmt;
use std::marker::PhantomData;

use serde_json::{json, Value};

use crate::channel::ChannelKey;
use crate::protocol::{Comment, Message, Post, User};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Me,
    SignIn,
    SignUp,
    SignOut,
    ChatUsers,
    /// Message history of one conversation.
    Conversation(ChannelKey),
    SendMessage(ChannelKey),
    Posts,
    Post(String),
    PublishPost,
    Comments(String),
    AddComment(String),
}

impl ResourceKey {
    /// Low-cardinality label used for metrics.
    pub fn family(&self) -> &'static str {
        match self {
            ResourceKey::Me => "me",
            ResourceKey::SignIn => "sign_in",
            ResourceKey::SignUp => "sign_up",
            ResourceKey::SignOut => "sign_out",
            ResourceKey::ChatUsers => "chat_users",
            ResourceKey::Conversation(_) => "conversation",
            ResourceKey::SendMessage(_) => "send_message",
            ResourceKey::Posts => "posts",
            ResourceKey::Post(_) => "post",
            ResourceKey::PublishPost => "publish_post",
            ResourceKey::Comments(_) => "comments",
            ResourceKey::AddComment(_) => "add_comment",
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Me => f.write_str("me"),
            ResourceKey::SignIn => f.write_str("sign-in"),
            ResourceKey::SignUp => f.write_str("sign-up"),
            ResourceKey::SignOut => f.write_str("sign-out"),
            ResourceKey::ChatUsers => f.write_str("chat-users"),
            ResourceKey::Conversation(key) => write!(f, "{key}"),
            ResourceKey::SendMessage(key) => write!(f, "send:{key}"),
            ResourceKey::Posts => f.write_str("posts"),
            ResourceKey::Post(slug) => write!(f, "post:{slug}"),
            ResourceKey::PublishPost => f.write_str("publish-post"),
            ResourceKey::Comments(post_id) => write!(f, "comments:{post_id}"),
            ResourceKey::AddComment(post_id) => write!(f, "add-comment:{post_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Transport-neutral description of one HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_owned(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

/// A typed resource: what to send and how to read the answer as `T`.
#[derive(Debug, Clone)]
pub struct Resource<T> {
    pub key: ResourceKey,
    pub request: ApiRequest,
    /// Response field holding the payload; `None` decodes the whole body.
    pub envelope: Option<&'static str>,
    pub requires_session: bool,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Resource<T> {
    fn new(key: ResourceKey, request: ApiRequest, envelope: Option<&'static str>) -> Self {
        Self {
            key,
            request,
            envelope,
            requires_session: true,
            _payload: PhantomData,
        }
    }

    fn public(mut self) -> Self {
        self.requires_session = false;
        self
    }
}

pub fn whoami() -> Resource<User> {
    Resource::new(ResourceKey::Me, ApiRequest::get("/me"), Some("user"))
}

pub fn sign_in(identifier: &str, password: &str) -> Resource<User> {
    let body = json!({ "identifiant": identifier, "password": password });
    Resource::new(ResourceKey::SignIn, ApiRequest::post("/sign-in", body), Some("user")).public()
}

/// `registration` is forwarded verbatim (nickname, names, age, gender, email, password).
pub fn sign_up(registration: Value) -> Resource<User> {
    Resource::new(
        ResourceKey::SignUp,
        ApiRequest::post("/sign-up", registration),
        Some("user"),
    )
    .public()
}

pub fn sign_out() -> Resource<Value> {
    Resource::new(ResourceKey::SignOut, ApiRequest::post("/logout", json!({})), None)
}

pub fn chat_users() -> Resource<Option<Vec<User>>> {
    Resource::new(ResourceKey::ChatUsers, ApiRequest::get("/chat/users"), Some("users"))
}

/// One page of a conversation, newest first as the server sends it.
pub fn message_page(me: &str, peer: &str, page: u32, page_size: u32) -> Resource<Option<Vec<Message>>> {
    let offset = page.saturating_sub(1).saturating_mul(page_size);
    let request = ApiRequest::get(format!("/chat/messages/{peer}"))
        .with_query("offset", offset)
        .with_query("limit", page_size);
    Resource::new(
        ResourceKey::Conversation(ChannelKey::conversation(me, peer)),
        request,
        Some("messages"),
    )
}

pub fn send_message(me: &str, peer: &str, text: &str) -> Resource<Message> {
    let body = json!({ "authorID": me, "receiverID": peer, "text": text });
    Resource::new(
        ResourceKey::SendMessage(ChannelKey::conversation(me, peer)),
        ApiRequest::post("/chat/new", body),
        Some("message"),
    )
}

pub fn posts() -> Resource<Option<Vec<Post>>> {
    Resource::new(ResourceKey::Posts, ApiRequest::get("/posts"), Some("posts"))
}

pub fn post(slug: &str) -> Resource<Post> {
    Resource::new(
        ResourceKey::Post(slug.to_owned()),
        ApiRequest::get(format!("/post/{slug}")),
        Some("post"),
    )
}

pub fn publish_post(draft: Value) -> Resource<Post> {
    Resource::new(ResourceKey::PublishPost, ApiRequest::post("/post", draft), Some("post"))
}

pub fn comments(post_id: &str) -> Resource<Option<Vec<Comment>>> {
    Resource::new(
        ResourceKey::Comments(post_id.to_owned()),
        ApiRequest::get(format!("/comments/{post_id}")),
        Some("comments"),
    )
    .public()
}

pub fn add_comment(post_id: &str, text: &str, parent_id: Option<&str>) -> Resource<Comment> {
    let body = json!({
        "postID": post_id,
        "text": text,
        "parentID": parent_id.unwrap_or_default(),
    });
    Resource::new(
        ResourceKey::AddComment(post_id.to_owned()),
        ApiRequest::post(format!("/comment/{post_id}"), body),
        Some("comment"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_page_offsets_follow_page_number() {
        let first = message_page("42", "7", 1, 10);
        assert_eq!(first.request.path, "/chat/messages/7");
        assert_eq!(
            first.request.query,
            vec![("offset".into(), "0".into()), ("limit".into(), "10".into())]
        );
        let third = message_page("42", "7", 3, 10);
        assert_eq!(third.request.query[0].1, "20");
        assert_eq!(first.key.to_string(), "conv:7:42");
        assert_eq!(first.key, third.key);
    }

    #[test]
    fn keys_render_stable_names() {
        assert_eq!(whoami().key.to_string(), "me");
        assert_eq!(send_message("7", "42", "hi").key.to_string(), "send:conv:7:42");
        assert_eq!(comments("12").key.to_string(), "comments:12");
        assert_eq!(post("hello-1").key.to_string(), "post:hello-1");
    }

    #[test]
    fn public_resources_skip_the_session_check() {
        assert!(!sign_in("neo", "pw").requires_session);
        assert!(!sign_up(json!({})).requires_session);
        assert!(!comments("1").requires_session);
        assert!(whoami().requires_session);
        assert!(chat_users().requires_session);
    }

    #[test]
    fn success_range_is_inclusive() {
        assert!(ApiResponse { status: 299, body: Value::Null }.is_success());
        assert!(!ApiResponse { status: 300, body: Value::Null }.is_success());
        assert!(!ApiResponse { status: 199, body: Value::Null }.is_success());
    }
}
