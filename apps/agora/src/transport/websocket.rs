use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::{Connector, PushTransport};

/// Configuration for the push WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// The WebSocket URL or bare host
    pub url: String,
    /// Whether to use TLS (wss:// vs ws://) when the url has no scheme
    pub use_tls: bool,
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        // bare remote hosts default to wss
        let use_tls = url.starts_with("wss://")
            || (!url.starts_with("ws://")
                && !url.contains("127.0.0.1")
                && !url.contains("localhost"));
        Self { url, use_tls }
    }

    /// Absolute `ws://` or `wss://` url to dial.
    pub fn build_url(&self) -> String {
        let mut url = self.url.clone();

        if let Some(rest) = url.strip_prefix("https://") {
            url = format!("wss://{rest}");
        } else if let Some(rest) = url.strip_prefix("http://") {
            url = format!("ws://{rest}");
        } else if !url.starts_with("ws://") && !url.starts_with("wss://") {
            url = if self.use_tls {
                format!("wss://{url}")
            } else {
                format!("ws://{url}")
            };
        }

        crate::config::normalize_localhost(&url)
    }
}

/// WebSocket implementation of [`PushTransport`]
pub struct WebSocketTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
    ws_task: Option<tokio::task::JoinHandle<()>>,
}

impl WebSocketTransport {
    pub async fn connect(config: &WebSocketConfig) -> Result<Self> {
        let url = config.build_url();
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        debug!(target: "agora::push", %url, "websocket connected");

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<String>();

        let connected = Arc::new(AtomicBool::new(true));
        let connected_clone = connected.clone();

        let ws_task = tokio::spawn(async move {
            handle_websocket(ws_stream, rx_out, tx_in, connected_clone).await;
        });

        Ok(Self {
            tx: tx_out,
            rx: rx_in,
            connected,
            ws_task: Some(ws_task),
        })
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("WebSocket not connected"));
        }
        self.tx
            .send(text)
            .map_err(|e| anyhow!("Failed to send frame: {}", e))
    }

    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.ws_task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn handle_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    tx_in: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let send_task = tokio::spawn(async move {
        while let Some(text) = rx_out.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if tx_in.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => {
                    if tx_in.send(text).is_err() {
                        break;
                    }
                }
                Err(_) => trace!(target: "agora::push", "ignoring non-utf8 binary frame"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {} // Ping, Pong and raw frames
        }
    }

    connected.store(false, Ordering::SeqCst);
    send_task.abort();
    let _ = send_task.await;
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.ws_task.take() {
            task.abort();
        }
    }
}

/// Dials a fresh [`WebSocketTransport`] on every connect.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn PushTransport>> {
        let transport = WebSocketTransport::connect(&self.config).await?;
        Ok(Box::new(transport))
    }
}
