use crate::message::Message;

/// Counts messages that arrive while the visitor is not looking at the chat.
///
/// The badge itself belongs to the presentation layer; this only owns the number.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnreadTracker {
    count: usize,
    focused: bool,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Add newly arrived messages to the badge. No-op while focused.
    pub fn on_arrived(&mut self, messages: &[Message]) {
        if self.focused || messages.is_empty() {
            return;
        }
        self.count += messages.len();
        tracing::debug!(unread = self.count, "unread messages accumulated");
    }

    /// The chat became visible: everything counts as read.
    pub fn on_focus(&mut self) {
        self.focused = true;
        self.count = 0;
    }

    /// The chat is no longer visible.
    pub fn on_blur(&mut self) {
        self.focused = false;
    }
}
