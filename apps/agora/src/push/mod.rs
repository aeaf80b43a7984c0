//! Push adapter: owns the single duplex connection and republishes every
//! inbound frame on the bus under its channel key.
//!
//! The connection is re-established on any unexpected drop, with exponential
//! backoff, and the identify frame is replayed each time it opens. Logging out
//! only sends the logout frame; the connection itself stays up.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use event_bus::Bus;

use crate::channel::ChannelKey;
use crate::config::ReconnectPolicy;
use crate::events::{BusEvent, EventBus, SessionEvent};
use crate::metrics;
use crate::protocol::{decode_frame, Decoded, OutboundFrame};
use crate::session::SessionContext;
use crate::transport::{Connector, PushTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Terminal; reached only through [`PushHandle::shutdown`].
    Closed,
}

#[derive(Debug)]
enum Command {
    Login,
    Logout { user_id: String },
    Shutdown,
}

enum Step {
    Command(Option<Command>),
    Frame(Option<String>),
}

enum Served {
    Dropped,
    Shutdown,
}

pub struct PushAdapter {
    connector: Arc<dyn Connector>,
    bus: EventBus,
    session: SessionContext,
    reconnect: ReconnectPolicy,
}

impl PushAdapter {
    pub fn new(connector: Arc<dyn Connector>, bus: EventBus, session: SessionContext) -> Self {
        Self {
            connector,
            bus,
            session,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Starts the connection task on the current runtime.
    pub fn spawn(self) -> PushHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let bus = self.bus.clone();
        let session = self.session.clone();
        let task = tokio::spawn(self.run(commands_rx, state_tx));
        PushHandle {
            commands: commands_tx,
            state: state_rx,
            bus,
            session,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
    ) {
        let mut attempts: u64 = 0;
        loop {
            state.send_replace(ConnectionState::Connecting);
            let Some(mut transport) = self.establish(&mut commands, &mut attempts).await else {
                break;
            };
            state.send_replace(ConnectionState::Open);
            info!(target: "agora::push", attempts, "push connection open");

            match self.serve(transport.as_mut(), &mut commands).await {
                Served::Shutdown => {
                    transport.close().await;
                    break;
                }
                Served::Dropped => {
                    warn!(target: "agora::push", "push connection dropped; reconnecting");
                }
            }
        }
        state.send_replace(ConnectionState::Closed);
        debug!(target: "agora::push", "push adapter stopped");
    }

    /// Connects with backoff. `None` means shutdown was requested meanwhile.
    async fn establish(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        attempts: &mut u64,
    ) -> Option<Box<dyn PushTransport>> {
        let mut delay = self.reconnect.initial;
        loop {
            if *attempts > 0 {
                metrics::PUSH_RECONNECTS.inc();
            }
            *attempts += 1;

            let mut connect = self.connector.connect();
            let result = loop {
                tokio::select! {
                    biased;
                    command = commands.recv() => {
                        if !self.defer(command) {
                            return None;
                        }
                    }
                    result = &mut connect => break result,
                }
            };

            match result {
                Ok(transport) => return Some(transport),
                Err(err) => {
                    warn!(
                        target: "agora::push",
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "push connect failed"
                    );
                }
            }

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    biased;
                    command = commands.recv() => {
                        if !self.defer(command) {
                            return None;
                        }
                    }
                    _ = &mut sleep => break,
                }
            }
            delay = self.reconnect.next_delay(delay);
        }
    }

    /// Handles a command that arrived while offline; false on shutdown.
    fn defer(&self, command: Option<Command>) -> bool {
        match command {
            None | Some(Command::Shutdown) => false,
            Some(Command::Login) => {
                debug!(target: "agora::push", "not connected; identifying once open");
                true
            }
            Some(Command::Logout { user_id }) => {
                debug!(target: "agora::push", %user_id, "not connected; logout frame skipped");
                true
            }
        }
    }

    async fn serve(
        &self,
        transport: &mut dyn PushTransport,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Served {
        if let Some(user_id) = self.session.user_id() {
            send_frame(transport, OutboundFrame::login(user_id)).await;
        }

        loop {
            let step = tokio::select! {
                biased;
                command = commands.recv() => Step::Command(command),
                frame = transport.recv() => Step::Frame(frame),
            };
            match step {
                Step::Command(None | Some(Command::Shutdown)) => return Served::Shutdown,
                Step::Command(Some(Command::Login)) => match self.session.user_id() {
                    Some(user_id) => send_frame(transport, OutboundFrame::login(user_id)).await,
                    None => warn!(target: "agora::push", "login requested without a session"),
                },
                Step::Command(Some(Command::Logout { user_id })) => {
                    send_frame(transport, OutboundFrame::logout(user_id)).await;
                }
                Step::Frame(Some(text)) => self.dispatch(&text),
                Step::Frame(None) => return Served::Dropped,
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match decode_frame(text) {
            Ok(Decoded::Frame(frame)) => {
                let key = ChannelKey::for_frame(&frame);
                metrics::PUSH_FRAMES_RECEIVED
                    .with_label_values(&[frame.kind()])
                    .inc();
                let delivered = self.bus.publish(&key, &BusEvent::Push(frame));
                trace!(target: "agora::push", %key, delivered, "push frame published");
            }
            Ok(Decoded::Unknown(kind)) => {
                metrics::PUSH_FRAMES_DROPPED
                    .with_label_values(&["unknown"])
                    .inc();
                debug!(target: "agora::push", %kind, "dropping frame of unknown type");
            }
            Err(err) => {
                metrics::PUSH_FRAMES_DROPPED
                    .with_label_values(&["malformed"])
                    .inc();
                warn!(target: "agora::push", error = %err, "dropping malformed frame");
            }
        }
    }
}

async fn send_frame(transport: &mut dyn PushTransport, frame: OutboundFrame) {
    let text = match frame.encode() {
        Ok(text) => text,
        Err(err) => {
            warn!(target: "agora::push", error = %err, "failed to encode outbound frame");
            return;
        }
    };
    if let Err(err) = transport.send_text(text).await {
        warn!(target: "agora::push", error = %err, "failed to send outbound frame");
    }
}

/// Control surface of a running [`PushAdapter`].
pub struct PushHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    bus: EventBus,
    session: SessionContext,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PushHandle {
    /// Identifies the current session user on the connection.
    pub fn login(&self) {
        if !self.session.is_authenticated() {
            warn!(target: "agora::push", "login requested without a session");
            return;
        }
        let _ = self.commands.send(Command::Login);
    }

    /// Sends the logout frame, clears the session and announces the sign-out.
    pub fn logout(&self) {
        let user_id = self.session.clear();
        if let Some(user_id) = &user_id {
            let _ = self.commands.send(Command::Logout {
                user_id: user_id.clone(),
            });
        }
        info!(target: "agora::session", user_id = ?user_id, "signed out");
        self.bus.publish(
            &ChannelKey::session(),
            &BusEvent::Session(SessionEvent::SignedOut { user_id }),
        );
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the adapter reports `target`; false if it stopped first.
    pub async fn wait_for(&self, target: ConnectionState) -> bool {
        let mut state = self.state.clone();
        state.wait_for(|current| *current == target).await.is_ok()
    }

    /// Closes the connection and waits for the task to finish.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for PushHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::mock_endpoint;
    use std::time::Duration;

    fn adapter(session: SessionContext) -> (PushAdapter, crate::transport::mock::MockServer, EventBus) {
        let (connector, server) = mock_endpoint();
        let bus = EventBus::new();
        let adapter = PushAdapter::new(Arc::new(connector), bus.clone(), session).with_reconnect(
            ReconnectPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(40),
            },
        );
        (adapter, server, bus)
    }

    #[tokio::test]
    async fn identifies_on_open_when_signed_in() {
        let (adapter, mut server, _bus) = adapter(SessionContext::for_user("7"));
        let handle = adapter.spawn();
        let mut peer = server.accept().await.unwrap();
        assert_eq!(
            peer.next_outbound().await.as_deref(),
            Some(r#"{"type":"login","data":{"userID":"7"}}"#)
        );
        assert!(handle.wait_for(ConnectionState::Open).await);
        handle.shutdown().await;
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn login_without_session_is_a_no_op() {
        let (adapter, mut server, _bus) = adapter(SessionContext::in_memory());
        let handle = adapter.spawn();
        let mut peer = server.accept().await.unwrap();
        handle.login();
        handle.shutdown().await;
        assert_eq!(peer.next_outbound().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_back_off_and_retry() {
        let (adapter, mut server, _bus) = adapter(SessionContext::in_memory());
        server.fail_next(3);
        let handle = adapter.spawn();
        let _peer = server.accept().await.unwrap();
        assert!(handle.wait_for(ConnectionState::Open).await);
        assert_eq!(server.attempts(), 4);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let (adapter, server, _bus) = adapter(SessionContext::in_memory());
        server.fail_next(usize::MAX);
        let handle = adapter.spawn();
        tokio::time::sleep(Duration::from_millis(25)).await;
        handle.shutdown().await;
        assert_eq!(handle.state(), ConnectionState::Closed);
    }
}
