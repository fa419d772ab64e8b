pub mod slack;

pub use slack::SlackClient;

use crate::error::RemoteError;
use crate::message::{Channel, FileUpload, Message, PostedMessage, User};
use async_trait::async_trait;

/// The messaging platform as seen by the chat engine.
///
/// Implementations own transport and authentication (the API token is bound
/// at construction). Delivery is at-least-once and there is no push channel;
/// the engine polls [`RemoteClient::list_messages`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Human-readable platform name for logs.
    fn name(&self) -> &str;

    async fn list_channels(&self) -> Result<Vec<Channel>, RemoteError>;

    async fn list_users(&self) -> Result<Vec<User>, RemoteError>;

    /// Messages of a channel, newest first. With `since_thread_ts`, only the
    /// thread rooted at that timestamp.
    async fn list_messages(
        &self,
        channel_id: &str,
        since_thread_ts: Option<&str>,
    ) -> Result<Vec<Message>, RemoteError>;

    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        username: &str,
        thread_ts: Option<&str>,
    ) -> Result<PostedMessage, RemoteError>;

    async fn upload_file(
        &self,
        channel_id: &str,
        file: &FileUpload,
        title: &str,
        thread_ts: Option<&str>,
    ) -> Result<(), RemoteError>;
}
