#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

//! Chat engine for an embeddable support widget that talks to a backend
//! team through Slack channels.
//!
//! The engine polls the active channel, merges batches idempotently,
//! classifies messages for display, tracks unread arrivals and pins a
//! per-channel support thread in single-user mode. Drawing is left to the
//! host: it reads [`session::WidgetView`] snapshots.

pub mod channels;
pub mod classify;
pub mod config;
pub mod cursor_store;
pub mod error;
pub mod logging;
pub mod message;
pub mod reconcile;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod unread;

pub use classify::{Classification, Classifier, HeuristicClassifier, MessageKind, RenderedMessage};
pub use config::{ChannelSpec, WidgetConfig};
pub use cursor_store::{CursorMap, CursorStore, FileCursorStore, MemoryCursorStore};
pub use error::{RemoteError, StoreError, SyncError};
pub use message::{Channel, FileRef, FileUpload, Message, PostedMessage, Ts, User};
pub use reconcile::{reconcile, Reconciler, Reconciliation};
pub use remote::{RemoteClient, SlackClient};
pub use scheduler::{ChannelSyncScheduler, FailurePolicy, SyncPhase};
pub use session::{ChatSession, ComposerState, PanelView, WidgetView};
pub use unread::UnreadTracker;
