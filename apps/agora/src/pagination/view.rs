use parking_lot::Mutex;

use crate::protocol::Message;

/// Change to the rendered message list, oldest at the top.
#[derive(Debug, Clone, Copy)]
pub enum ListChange<'a> {
    Reset(&'a [Message]),
    /// Older messages spliced in before everything already rendered.
    Prepended(&'a [Message]),
    Appended(&'a Message),
}

/// The scrollable host that renders one conversation.
pub trait MessageView: Send + Sync {
    fn apply(&self, change: ListChange<'_>);

    /// Id of the topmost message currently on screen.
    fn first_visible(&self) -> Option<String>;

    fn scroll_to(&self, message_id: &str);
}

#[derive(Debug, Default)]
struct Rendered {
    items: Vec<Message>,
    scrolls: Vec<String>,
    pinned_first_visible: Option<String>,
    resets: usize,
}

/// Headless view that keeps what it was told to render.
#[derive(Debug, Default)]
pub struct MemoryView {
    rendered: Mutex<Rendered>,
}

impl MemoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.rendered.lock().items.clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.rendered.lock().items.iter().map(|m| m.id.clone()).collect()
    }

    pub fn scrolls(&self) -> Vec<String> {
        self.rendered.lock().scrolls.clone()
    }

    pub fn resets(&self) -> usize {
        self.rendered.lock().resets
    }

    /// Overrides the topmost visible id; by default it is the first rendered item.
    pub fn pin_first_visible(&self, id: Option<&str>) {
        self.rendered.lock().pinned_first_visible = id.map(str::to_owned);
    }
}

impl MessageView for MemoryView {
    fn apply(&self, change: ListChange<'_>) {
        let mut rendered = self.rendered.lock();
        match change {
            ListChange::Reset(items) => {
                rendered.items = items.to_vec();
                rendered.resets += 1;
            }
            ListChange::Prepended(items) => {
                rendered.items.splice(0..0, items.iter().cloned());
            }
            ListChange::Appended(item) => rendered.items.push(item.clone()),
        }
    }

    fn first_visible(&self) -> Option<String> {
        let rendered = self.rendered.lock();
        rendered
            .pinned_first_visible
            .clone()
            .or_else(|| rendered.items.first().map(|m| m.id.clone()))
    }

    fn scroll_to(&self, message_id: &str) {
        self.rendered.lock().scrolls.push(message_id.to_owned());
    }
}
