//! Merge freshly polled message batches into the known message list.
//!
//! Each poll returns the current window of the conversation, so the batch
//! replaces what was shown before. Re-applying a batch that changes nothing
//! hands back the very same list (`Arc::ptr_eq`), which lets the renderer
//! skip the frame.

use crate::message::{Message, Ts};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Outcome of one merge.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// The welcome placeholder (if any) followed by the fetched messages,
    /// ascending by `ts`, no duplicate `ts`.
    pub merged: Arc<Vec<Message>>,
    /// Newly seen messages not authored by the widget owner, ascending.
    pub arrived: Vec<Message>,
}

impl Reconciliation {
    /// Whether `merged` differs from the list it was computed from.
    pub fn changed_from(&self, previous: &Arc<Vec<Message>>) -> bool {
        !Arc::ptr_eq(&self.merged, previous)
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    bot_id: String,
    placeholder: Option<Message>,
}

impl Reconciler {
    pub fn new(bot_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            placeholder: None,
        }
    }

    /// Show `text` as a welcome message stamped at `session_started`.
    ///
    /// It always heads the list, ahead of older history, and is never
    /// reported as arrived.
    #[must_use]
    pub fn with_default_message(mut self, text: impl Into<String>, session_started: Ts) -> Self {
        self.placeholder = Some(Message::new(session_started, text));
        self
    }

    /// Replace `previous` with `fetched` (platform order: newest first).
    ///
    /// A fetched message is already known only if an identical message sits
    /// in `previous`; a same-`ts` variant (an edit) counts as arrived.
    /// Messages absent from `fetched` drop out of the list.
    pub fn reconcile(&self, previous: &Arc<Vec<Message>>, fetched: Vec<Message>) -> Reconciliation {
        let known: HashMap<&Ts, &Message> = previous.iter().map(|m| (&m.ts, m)).collect();

        let mut batch: BTreeMap<Ts, Message> = BTreeMap::new();
        for message in fetched.into_iter().rev() {
            batch.insert(message.ts.clone(), message);
        }
        if let Some(placeholder) = &self.placeholder {
            batch.remove(&placeholder.ts);
        }

        let arrived: Vec<Message> = batch
            .values()
            .filter(|m| known.get(&m.ts).is_none_or(|k| *k != *m))
            .filter(|m| !m.is_from(&self.bot_id))
            .cloned()
            .collect();

        let mut merged: Vec<Message> = Vec::with_capacity(batch.len() + 1);
        merged.extend(self.placeholder.iter().cloned());
        merged.extend(batch.into_values());

        if merged == **previous {
            return Reconciliation {
                merged: Arc::clone(previous),
                arrived: Vec::new(),
            };
        }

        Reconciliation {
            merged: Arc::new(merged),
            arrived,
        }
    }
}

/// One-shot merge without a welcome placeholder.
pub fn reconcile(
    previous: &Arc<Vec<Message>>,
    fetched: Vec<Message>,
    bot_id: &str,
) -> Reconciliation {
    Reconciler::new(bot_id).reconcile(previous, fetched)
}
