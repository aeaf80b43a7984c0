//! In-memory push endpoint for tests and demos.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connector, PushTransport};

#[derive(Default)]
struct Shared {
    fail_next: usize,
    attempts: usize,
}

/// Client half: hands out [`MockTransport`]s whose server ends surface on the
/// paired [`MockServer`].
#[derive(Clone)]
pub struct MockConnector {
    shared: Arc<Mutex<Shared>>,
    accepted: mpsc::UnboundedSender<MockPeer>,
}

pub struct MockServer {
    shared: Arc<Mutex<Shared>>,
    accepted: mpsc::UnboundedReceiver<MockPeer>,
}

pub fn mock_endpoint() -> (MockConnector, MockServer) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockConnector {
            shared: shared.clone(),
            accepted: tx,
        },
        MockServer {
            shared,
            accepted: rx,
        },
    )
}

impl MockServer {
    /// Next connection opened by the client.
    pub async fn accept(&mut self) -> Option<MockPeer> {
        self.accepted.recv().await
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next(&self, count: usize) {
        self.shared.lock().fail_next = count;
    }

    pub fn attempts(&self) -> usize {
        self.shared.lock().attempts
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn PushTransport>> {
        {
            let mut shared = self.shared.lock();
            shared.attempts += 1;
            if shared.fail_next > 0 {
                shared.fail_next -= 1;
                return Err(anyhow!("connection refused"));
            }
        }
        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(MockPeer {
                to_client: Some(to_client),
                from_client,
            })
            .map_err(|_| anyhow!("mock server is gone"))?;
        Ok(Box::new(MockTransport {
            to_server,
            from_server,
            connected: true,
        }))
    }
}

/// Server end of one mock connection.
pub struct MockPeer {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    /// Delivers a frame to the client; false once disconnected.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    pub fn push_json(&self, frame: &serde_json::Value) -> bool {
        self.push(frame.to_string())
    }

    /// Next frame the client sent; `None` after the client closed.
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Frames the client already sent, without waiting.
    pub fn drain_outbound(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Simulates a dropped connection.
    pub fn disconnect(&mut self) {
        self.to_client.take();
    }
}

pub struct MockTransport {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<String>,
    connected: bool,
}

#[async_trait]
impl PushTransport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if !self.connected {
            return Err(anyhow!("mock transport closed"));
        }
        self.to_server
            .send(text)
            .map_err(|_| anyhow!("mock peer is gone"))
    }

    async fn recv(&mut self) -> Option<String> {
        let frame = self.from_server.recv().await;
        if frame.is_none() {
            self.connected = false;
        }
        frame
    }

    async fn close(&mut self) {
        self.connected = false;
        self.from_server.close();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
