use anyhow::Result;
use async_trait::async_trait;

pub mod mock;
pub mod websocket;

pub use websocket::{WebSocketConfig, WebSocketConnector, WebSocketTransport};

/// One live duplex connection carrying JSON text frames.
#[async_trait]
pub trait PushTransport: Send {
    /// Queue a text frame for the remote side
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Next inbound text frame; `None` once the connection is gone
    async fn recv(&mut self) -> Option<String>;

    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Opens connections to the fixed push endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PushTransport>>;
}
