//! Backward paging through one conversation's history.
//!
//! The newest page is loaded on attach; scrolling to the top loads the next
//! older page and splices it above everything already rendered. Live messages
//! from the push connection are appended at the bottom. Every message id is
//! rendered at most once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use event_bus::Subscription;

use crate::channel::ChannelKey;
use crate::config::Config;
use crate::events::{BusEvent, EventBus};
use crate::protocol::{InboundFrame, Message};
use crate::request::{Outcome, RequestError, RequestManager};
use crate::resources::{self, ResourceKey};
use crate::throttle::Throttle;

pub mod view;

pub use view::{ListChange, MemoryView, MessageView};

/// Scroll offset reported by the view host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollPosition {
    pub offset_from_top: u32,
}

impl ScrollPosition {
    pub const TOP: ScrollPosition = ScrollPosition { offset_from_top: 0 };

    pub fn at(offset_from_top: u32) -> Self {
        Self { offset_from_top }
    }

    pub fn at_top(self) -> bool {
        self.offset_from_top == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotReady,
    /// First scroll event after attach; produced by layout, not by the user.
    LayoutScroll,
    NotAtTop,
    InFlight,
    Exhausted,
    Throttled,
    Detached,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageLoad {
    Loaded { page: u32, inserted: usize },
    /// The server had nothing older.
    Exhausted,
    Skipped(SkipReason),
    Failed(RequestError),
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct CursorOptions {
    pub page_size: u32,
    pub scroll_throttle: Duration,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            page_size: 10,
            scroll_throttle: Duration::from_millis(300),
        }
    }
}

impl From<&Config> for CursorOptions {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            scroll_throttle: config.scroll_throttle,
        }
    }
}

#[derive(Debug)]
struct CursorState {
    /// Highest page delivered so far.
    page: u32,
    loading: bool,
    initial_load_done: bool,
    armed: bool,
    exhausted: bool,
    detached: bool,
    messages: Vec<Message>,
    seen: HashSet<String>,
}

impl CursorState {
    fn new() -> Self {
        Self {
            page: 1,
            loading: false,
            initial_load_done: false,
            armed: false,
            exhausted: false,
            detached: false,
            messages: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Records `message` as rendered; false if its id already was.
    /// Messages without an id are never considered duplicates.
    fn remember(&mut self, message: &Message) -> bool {
        message.id.is_empty() || self.seen.insert(message.id.clone())
    }
}

fn append_live(state: &Mutex<CursorState>, view: &dyn MessageView, message: &Message) -> bool {
    let mut state = state.lock();
    if state.detached || !state.remember(message) {
        return false;
    }
    state.messages.push(message.clone());
    // before the first page lands, the reset will carry it
    if state.initial_load_done {
        view.apply(ListChange::Appended(message));
        view.scroll_to(&message.id);
    }
    true
}

/// Clears `loading` if a page load is dropped before it settles. A dropped
/// first load also gives up its live subscription.
struct PendingLoad<'a> {
    cursor: &'a ConversationCursor,
    first_page: bool,
    settled: bool,
}

impl PendingLoad<'_> {
    fn settle(mut self, state: &mut CursorState) {
        state.loading = false;
        self.settled = true;
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        {
            let mut state = self.cursor.state.lock();
            state.loading = false;
            if self.first_page {
                state.messages.clear();
                state.seen.clear();
            }
        }
        if self.first_page {
            self.cursor.unsubscribe();
        }
        debug!(target: "agora::pagination", conversation = %self.cursor.key, "page load dropped");
    }
}

/// Paging state of one open conversation.
pub struct ConversationCursor {
    me: String,
    peer: String,
    key: ChannelKey,
    options: CursorOptions,
    requests: RequestManager,
    bus: EventBus,
    view: Arc<dyn MessageView>,
    state: Arc<Mutex<CursorState>>,
    throttle: Mutex<Throttle>,
    subscription: Mutex<Option<Subscription<ChannelKey, BusEvent>>>,
}

impl ConversationCursor {
    pub fn new(
        me: &str,
        peer: &str,
        requests: RequestManager,
        bus: EventBus,
        view: Arc<dyn MessageView>,
        options: CursorOptions,
    ) -> Self {
        Self {
            me: me.to_owned(),
            peer: peer.to_owned(),
            key: ChannelKey::conversation(me, peer),
            options,
            requests,
            bus,
            view,
            state: Arc::new(Mutex::new(CursorState::new())),
            throttle: Mutex::new(Throttle::new(options.scroll_throttle)),
            subscription: Mutex::new(None),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    fn resource_key(&self) -> ResourceKey {
        ResourceKey::Conversation(self.key.clone())
    }

    /// Subscribes to live messages and renders the newest page.
    ///
    /// Resolves to the number of rendered messages.
    pub async fn attach(&self) -> Outcome<usize> {
        {
            let mut state = self.state.lock();
            if state.detached {
                return Outcome::Cancelled;
            }
            state.loading = true;
        }

        let subscription = {
            let state = self.state.clone();
            let view = self.view.clone();
            self.bus.subscribe(self.key.clone(), move |_, event| {
                if let BusEvent::Push(InboundFrame::Message { message }) = event {
                    if !append_live(&state, view.as_ref(), message) {
                        trace!(target: "agora::pagination", id = %message.id, "duplicate live message");
                    }
                }
            })
        };
        *self.subscription.lock() = Some(subscription);
        let pending = PendingLoad {
            cursor: self,
            first_page: true,
            settled: false,
        };

        let outcome = self
            .requests
            .request(resources::message_page(&self.me, &self.peer, 1, self.options.page_size))
            .await;

        let mut state = self.state.lock();
        pending.settle(&mut state);
        if state.detached {
            return Outcome::Cancelled;
        }
        let newest_first = match outcome {
            Outcome::Success(page) => page.unwrap_or_default(),
            failed => {
                // a later attach subscribes afresh
                state.messages.clear();
                state.seen.clear();
                drop(state);
                self.unsubscribe();
                return match failed {
                    Outcome::Failure(err) => Outcome::Failure(err),
                    _ => Outcome::Cancelled,
                };
            }
        };

        let live = std::mem::take(&mut state.messages);
        state.seen.clear();
        let mut rendered = Vec::with_capacity(newest_first.len() + live.len());
        for message in newest_first.into_iter().rev().chain(live) {
            if state.remember(&message) {
                rendered.push(message);
            }
        }
        state.exhausted = rendered.is_empty();
        state.messages = rendered;
        state.page = 1;
        state.initial_load_done = true;

        self.view.apply(ListChange::Reset(&state.messages));
        if let Some(newest) = state.messages.last() {
            self.view.scroll_to(&newest.id);
        }
        debug!(
            target: "agora::pagination",
            conversation = %self.key,
            rendered = state.messages.len(),
            "conversation attached"
        );
        Outcome::Success(state.messages.len())
    }

    /// Loads the next older page when the view sits at the top.
    pub async fn on_scroll(&self, position: ScrollPosition) -> PageLoad {
        let next_page = {
            let mut state = self.state.lock();
            if state.detached {
                return PageLoad::Skipped(SkipReason::Detached);
            }
            if !state.initial_load_done {
                return PageLoad::Skipped(SkipReason::NotReady);
            }
            if !state.armed {
                state.armed = true;
                return PageLoad::Skipped(SkipReason::LayoutScroll);
            }
            if !position.at_top() {
                return PageLoad::Skipped(SkipReason::NotAtTop);
            }
            if state.loading {
                return PageLoad::Skipped(SkipReason::InFlight);
            }
            if state.exhausted {
                return PageLoad::Skipped(SkipReason::Exhausted);
            }
            if !self.throttle.lock().try_acquire() {
                return PageLoad::Skipped(SkipReason::Throttled);
            }
            state.loading = true;
            state.page + 1
        };
        let pending = PendingLoad {
            cursor: self,
            first_page: false,
            settled: false,
        };

        trace!(target: "agora::pagination", conversation = %self.key, page = next_page, "loading older page");
        let outcome = self
            .requests
            .request(resources::message_page(
                &self.me,
                &self.peer,
                next_page,
                self.options.page_size,
            ))
            .await;

        let mut state = self.state.lock();
        pending.settle(&mut state);
        if state.detached {
            return PageLoad::Cancelled;
        }
        let newest_first = match outcome {
            Outcome::Success(page) => page.unwrap_or_default(),
            Outcome::Failure(err) => return PageLoad::Failed(err),
            Outcome::Cancelled => return PageLoad::Cancelled,
        };

        state.page = next_page;
        if newest_first.is_empty() {
            state.exhausted = true;
            debug!(target: "agora::pagination", conversation = %self.key, page = next_page, "history exhausted");
            return PageLoad::Exhausted;
        }

        let mut older = Vec::with_capacity(newest_first.len());
        for message in newest_first.into_iter().rev() {
            if state.remember(&message) {
                older.push(message);
            }
        }
        if !older.is_empty() {
            let anchor = self.view.first_visible();
            state.messages.splice(0..0, older.iter().cloned());
            self.view.apply(ListChange::Prepended(&older));
            if let Some(anchor) = anchor {
                self.view.scroll_to(&anchor);
            }
        }
        PageLoad::Loaded {
            page: next_page,
            inserted: older.len(),
        }
    }

    /// Sends a message to the peer and renders it once the server accepts it.
    pub async fn send(&self, text: &str) -> Outcome<Message> {
        let outcome = self
            .requests
            .request(resources::send_message(&self.me, &self.peer, text))
            .await;
        if let Outcome::Success(message) = &outcome {
            append_live(&self.state, self.view.as_ref(), message);
        }
        outcome
    }

    /// Stops listening and abandons any in-flight page. Idempotent.
    pub fn detach(&self) {
        {
            let mut state = self.state.lock();
            if state.detached {
                return;
            }
            state.detached = true;
        }
        self.unsubscribe();
        self.requests.cancel(&self.resource_key());
        debug!(target: "agora::pagination", conversation = %self.key, "conversation detached");
    }

    fn unsubscribe(&self) {
        let subscription = self.subscription.lock().take();
        drop(subscription);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn page(&self) -> u32 {
        self.state.lock().page
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.lock().exhausted
    }

    pub fn is_detached(&self) -> bool {
        self.state.lock().detached
    }
}

impl Drop for ConversationCursor {
    fn drop(&mut self) {
        self.detach();
    }
}

/// The chat panel: at most one conversation is open at a time.
pub struct ChatPane {
    requests: RequestManager,
    bus: EventBus,
    view: Arc<dyn MessageView>,
    options: CursorOptions,
    active: Mutex<Option<Arc<ConversationCursor>>>,
}

impl ChatPane {
    pub fn new(
        requests: RequestManager,
        bus: EventBus,
        view: Arc<dyn MessageView>,
        options: CursorOptions,
    ) -> Self {
        Self {
            requests,
            bus,
            view,
            options,
            active: Mutex::new(None),
        }
    }

    /// Switches to the conversation with `peer`, detaching the current one first.
    pub async fn open(&self, peer: &str) -> Outcome<usize> {
        let Some(me) = self.requests.session().user_id() else {
            return Outcome::Failure(RequestError::NotAuthenticated);
        };
        let cursor = Arc::new(ConversationCursor::new(
            &me,
            peer,
            self.requests.clone(),
            self.bus.clone(),
            self.view.clone(),
            self.options,
        ));
        let previous = self.active.lock().replace(cursor.clone());
        if let Some(previous) = previous {
            previous.detach();
        }
        cursor.attach().await
    }

    pub fn active(&self) -> Option<Arc<ConversationCursor>> {
        self.active.lock().clone()
    }

    pub async fn on_scroll(&self, position: ScrollPosition) -> PageLoad {
        match self.active() {
            Some(cursor) => cursor.on_scroll(position).await,
            None => PageLoad::Skipped(SkipReason::Detached),
        }
    }

    pub fn close(&self) {
        let active = self.active.lock().take();
        if let Some(cursor) = active {
            cursor.detach();
        }
    }
}
