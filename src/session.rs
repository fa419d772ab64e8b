//! The chat session owned by one mounted widget.
//!
//! `ChatSession` ties the pieces together: it connects to the workspace,
//! resolves the configured channels, drives the [`ChannelSyncScheduler`],
//! merges polled batches through the [`Reconciler`], keeps the unread badge
//! and the single-user thread cursors, and publishes a [`WidgetView`]
//! snapshot for the presentation layer after every change.

use crate::channels::{online_users, resolve_channels};
use crate::classify::{upload_title, Classifier, HeuristicClassifier, RenderedMessage};
use crate::config::WidgetConfig;
use crate::cursor_store::{CursorMap, CursorStore};
use crate::error::SyncError;
use crate::message::{Channel, FileUpload, Message, PostedMessage, Ts, User};
use crate::reconcile::Reconciler;
use crate::remote::RemoteClient;
use crate::scheduler::{Activation, ChannelSyncScheduler, PollHandler, SyncPhase};
use crate::unread::UnreadTracker;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Which screen the panel shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanelView {
    #[default]
    Channels,
    Chat,
}

/// Busy flags of the message composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComposerState {
    pub input_disabled: bool,
    pub uploading: bool,
}

/// Everything the presentation layer needs to draw the widget.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetView {
    /// Terminal failure: render nothing further.
    pub failed: bool,
    pub panel_open: bool,
    pub view: PanelView,
    pub channels: Vec<Channel>,
    pub active_channel: Option<Channel>,
    pub messages: Arc<Vec<Message>>,
    pub unread: usize,
    pub online_users: Vec<User>,
    pub composer: ComposerState,
    pub help_text: String,
    pub user_image: Option<String>,
    pub close_chat_button: bool,
}

#[derive(Default)]
struct SessionState {
    failed: bool,
    panel_open: bool,
    view: PanelView,
    channels: Vec<Channel>,
    active: Option<Channel>,
    messages: Arc<Vec<Message>>,
    unread: UnreadTracker,
    online_users: Vec<User>,
    cursors: CursorMap,
    composer: ComposerState,
}

impl SessionState {
    /// Keep the unread tracker's focus in line with what is on screen.
    fn sync_focus(&mut self) {
        let focused = self.panel_open && self.view == PanelView::Chat && self.active.is_some();
        match (focused, self.unread.is_focused()) {
            (true, false) => self.unread.on_focus(),
            (false, true) => self.unread.on_blur(),
            _ => {}
        }
    }
}

struct SessionShared {
    config: WidgetConfig,
    remote: Arc<dyn RemoteClient>,
    store: Arc<dyn CursorStore>,
    reconciler: Reconciler,
    classifier: HeuristicClassifier,
    state: Mutex<SessionState>,
    view_tx: watch::Sender<WidgetView>,
}

impl SessionShared {
    fn snapshot(&self, state: &SessionState) -> WidgetView {
        WidgetView {
            failed: state.failed,
            panel_open: state.panel_open,
            view: state.view,
            channels: state.channels.clone(),
            active_channel: state.active.clone(),
            messages: Arc::clone(&state.messages),
            unread: state.unread.count(),
            online_users: state.online_users.clone(),
            composer: state.composer,
            help_text: self.config.help_text.clone(),
            user_image: self.config.user_image.clone(),
            close_chat_button: self.config.close_chat_button,
        }
    }

    fn publish(&self, state: &SessionState) {
        self.view_tx.send_replace(self.snapshot(state));
    }

    fn cursor_for(&self, state: &SessionState, channel: &Channel) -> Option<String> {
        if !self.config.single_user_mode {
            return None;
        }
        state.cursors.get(channel.key()).cloned()
    }

    fn active_channel(&self, state: &SessionState) -> Result<Channel, SyncError> {
        if state.failed {
            return Err(SyncError::Failed);
        }
        state.active.clone().ok_or(SyncError::NoActiveChannel)
    }
}

#[async_trait]
impl PollHandler for SessionShared {
    async fn poll(&self, activation: &Activation) -> Result<(), SyncError> {
        let channel = activation.channel();
        let thread_ts = self.cursor_for(&self.state.lock(), channel);

        let fetched = self
            .remote
            .list_messages(&channel.id, thread_ts.as_deref())
            .await
            .map_err(|source| SyncError::Fetch {
                channel: channel.key().to_string(),
                source,
            })?;

        let mut state = self.state.lock();
        if !activation.is_live() {
            tracing::debug!(channel = %channel.key(), "dropping poll result for inactive channel");
            return Ok(());
        }
        let outcome = self.reconciler.reconcile(&state.messages, fetched);
        if !outcome.changed_from(&state.messages) {
            return Ok(());
        }
        tracing::debug!(
            channel = %channel.key(),
            total = outcome.merged.len(),
            arrived = outcome.arrived.len(),
            "messages merged"
        );
        state.unread.on_arrived(&outcome.arrived);
        state.messages = outcome.merged;
        self.publish(&state);
        Ok(())
    }

    fn on_failed(&self, activation: &Activation, error: &SyncError) {
        let mut state = self.state.lock();
        if error.is_fatal() {
            state.failed = true;
        }
        tracing::error!(channel = %activation.channel().key(), "chat widget failed: {error}");
        self.publish(&state);
    }
}

pub struct ChatSession {
    shared: Arc<SessionShared>,
    scheduler: ChannelSyncScheduler,
}

impl ChatSession {
    pub fn new(
        config: WidgetConfig,
        remote: Arc<dyn RemoteClient>,
        store: Arc<dyn CursorStore>,
    ) -> Self {
        let mut reconciler = Reconciler::new(config.bot_id.clone());
        if let Some(text) = config.default_message.as_deref().filter(|t| !t.is_empty()) {
            reconciler = reconciler.with_default_message(text, Ts::now());
        }
        let classifier = HeuristicClassifier::new(config.bot_id.clone(), config.bot_name.clone());
        let scheduler = ChannelSyncScheduler::new(config.poll_interval(), config.failure);

        let state = SessionState::default();
        let shared = SessionShared {
            reconciler,
            classifier,
            remote,
            store,
            view_tx: watch::channel(WidgetView {
                failed: false,
                panel_open: false,
                view: PanelView::Channels,
                channels: Vec::new(),
                active_channel: None,
                messages: Arc::new(Vec::new()),
                unread: 0,
                online_users: Vec::new(),
                composer: ComposerState::default(),
                help_text: config.help_text.clone(),
                user_image: config.user_image.clone(),
                close_chat_button: config.close_chat_button,
            })
            .0,
            state: Mutex::new(state),
            config,
        };

        Self {
            shared: Arc::new(shared),
            scheduler,
        }
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.shared.config
    }

    /// Connect to the workspace and open the default channel, if any.
    ///
    /// Channel and user listing run concurrently; either failing puts the
    /// widget into the terminal failed state.
    pub async fn start(&self) -> Result<(), SyncError> {
        if self.shared.state.lock().failed {
            return Err(SyncError::Failed);
        }
        tracing::info!(remote = self.shared.remote.name(), "connecting to workspace");

        let listed = tokio::try_join!(
            self.shared.remote.list_channels(),
            self.shared.remote.list_users()
        );
        let (remote_channels, users) = match listed {
            Ok(listed) => listed,
            Err(source) => {
                let err = SyncError::Connection(source);
                tracing::error!("{err}");
                let mut state = self.shared.state.lock();
                state.failed = true;
                self.shared.publish(&state);
                return Err(err);
            }
        };

        let resolved = resolve_channels(
            remote_channels,
            &self.shared.config.channels,
            self.shared.config.default_channel.as_deref(),
        );
        let cursors = if self.shared.config.single_user_mode {
            self.shared
                .store
                .load(&resolved.channels)
                .unwrap_or_else(|e| {
                    tracing::warn!("could not load thread cursors, starting fresh: {e}");
                    CursorMap::new()
                })
        } else {
            CursorMap::new()
        };
        tracing::info!(
            channels = resolved.channels.len(),
            cursors = cursors.len(),
            "connected"
        );

        let mut state = self.shared.state.lock();
        state.channels = resolved.channels;
        state.online_users = online_users(users);
        state.cursors = cursors;
        match resolved.active {
            Some(channel) => self.activate(&mut state, channel),
            None => self.shared.publish(&state),
        }
        Ok(())
    }

    /// Point the session at `channel` and restart polling.
    ///
    /// Runs under the state lock so a poll for the previous channel that
    /// resolves afterwards sees its activation cancelled.
    fn activate(&self, state: &mut SessionState, channel: Channel) {
        state.active = Some(channel.clone());
        state.messages = Arc::new(Vec::new());
        state.view = PanelView::Chat;
        state.sync_focus();
        let handler: Arc<dyn PollHandler> = self.shared.clone();
        self.scheduler.start(channel, handler);
        self.shared.publish(state);
    }

    /// Open the chat on the channel named (or identified) by `selector`.
    ///
    /// Selecting the channel that is already being polled keeps its timer
    /// and messages.
    pub fn switch_channel(&self, selector: &str) -> Result<(), SyncError> {
        let mut state = self.shared.state.lock();
        if state.failed {
            return Err(SyncError::Failed);
        }
        let channel = state
            .channels
            .iter()
            .find(|c| c.matches(selector))
            .cloned()
            .ok_or_else(|| SyncError::UnknownChannel(selector.to_string()))?;
        let polling_it = self
            .scheduler
            .current()
            .is_some_and(|a| a.channel().id == channel.id);
        if polling_it && state.active.as_ref() == Some(&channel) {
            tracing::debug!(channel = %channel.key(), "channel already active");
            return Ok(());
        }
        tracing::info!(channel = %channel.key(), "switching channel");
        self.activate(&mut state, channel);
        Ok(())
    }

    /// Leave the chat for the channel list: polling stops, messages are dropped.
    pub fn back_to_channels(&self) {
        let mut state = self.shared.state.lock();
        self.scheduler.stop();
        state.active = None;
        state.messages = Arc::new(Vec::new());
        state.view = PanelView::Channels;
        state.sync_focus();
        self.shared.publish(&state);
    }

    /// The visitor opened the widget. Resets the unread badge when a chat is showing.
    pub fn open_panel(&self) {
        let mut state = self.shared.state.lock();
        state.panel_open = true;
        state.sync_focus();
        self.shared.publish(&state);
    }

    /// The visitor collapsed the widget. Polling continues in the background.
    pub fn close_panel(&self) {
        let mut state = self.shared.state.lock();
        state.panel_open = false;
        state.sync_focus();
        self.shared.publish(&state);
    }

    /// Tear down polling. The session can be restarted with [`Self::switch_channel`].
    pub fn stop(&self) {
        self.scheduler.stop();
        tracing::info!("chat session stopped");
    }

    /// Post `text` to the active channel as the bot.
    ///
    /// In single-user mode the post goes into the channel's pinned thread;
    /// the first post creates that thread and persists its cursor. Blank
    /// text is ignored and yields `Ok(None)`.
    pub async fn send_message(&self, text: &str) -> Result<Option<PostedMessage>, SyncError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let (channel, thread_ts) = {
            let mut state = self.shared.state.lock();
            let channel = self.shared.active_channel(&state)?;
            let thread_ts = self.shared.cursor_for(&state, &channel);
            state.composer.input_disabled = true;
            self.shared.publish(&state);
            (channel, thread_ts)
        };

        let result = self
            .shared
            .remote
            .post_message(
                &channel.id,
                text,
                &self.shared.config.bot_name,
                thread_ts.as_deref(),
            )
            .await;

        let mut state = self.shared.state.lock();
        state.composer.input_disabled = false;
        let posted = match result {
            Ok(posted) => posted,
            Err(source) => {
                let err = SyncError::Post(source);
                tracing::warn!(channel = %channel.key(), "{err}");
                self.shared.publish(&state);
                return Err(err);
            }
        };

        if self.shared.config.single_user_mode && !state.cursors.contains_key(channel.key()) {
            state
                .cursors
                .insert(channel.key().to_string(), posted.thread_root().to_string());
            tracing::debug!(channel = %channel.key(), thread_ts = posted.thread_root(), "thread pinned");
            if let Err(e) = self.shared.store.save(&state.cursors) {
                tracing::warn!("could not persist thread cursors: {e}");
            }
        }
        self.shared.publish(&state);
        Ok(Some(posted))
    }

    /// Upload a file to the active channel, titled after the bot.
    pub async fn upload_file(&self, file: FileUpload) -> Result<(), SyncError> {
        let (channel, thread_ts) = {
            let mut state = self.shared.state.lock();
            let channel = self.shared.active_channel(&state)?;
            let thread_ts = self.shared.cursor_for(&state, &channel);
            state.composer.uploading = true;
            self.shared.publish(&state);
            (channel, thread_ts)
        };

        let title = upload_title(&self.shared.config.bot_name);
        let result = self
            .shared
            .remote
            .upload_file(&channel.id, &file, &title, thread_ts.as_deref())
            .await;

        let mut state = self.shared.state.lock();
        state.composer.uploading = false;
        self.shared.publish(&state);
        result.map_err(|source| {
            let err = SyncError::Upload(source);
            tracing::warn!(channel = %channel.key(), file = %file.name, "{err}");
            err
        })
    }

    /// Watch the widget view; a new value is published after every change.
    pub fn subscribe(&self) -> watch::Receiver<WidgetView> {
        self.shared.view_tx.subscribe()
    }

    pub fn view(&self) -> WidgetView {
        self.shared.snapshot(&self.shared.state.lock())
    }

    /// Current messages, classified for display.
    pub fn rendered(&self) -> Vec<RenderedMessage> {
        let messages = Arc::clone(&self.shared.state.lock().messages);
        messages
            .iter()
            .map(|m| self.shared.classifier.render(m))
            .collect()
    }

    pub fn phase(&self) -> SyncPhase {
        self.scheduler.phase()
    }

    pub fn is_failed(&self) -> bool {
        self.shared.state.lock().failed
    }

    pub fn unread(&self) -> usize {
        self.shared.state.lock().unread.count()
    }

    /// Persisted thread cursors currently in use (single-user mode).
    pub fn cursors(&self) -> CursorMap {
        self.shared.state.lock().cursors.clone()
    }
}
