use thiserror::Error;

/// Failure talking to the messaging platform.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{method}: request failed: {source}")]
    Http {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} failed ({status}): {body}")]
    Status {
        method: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
    /// The platform answered 200 with `"ok": false`.
    #[error("{method} failed: {error}")]
    Api { method: &'static str, error: String },
    #[error("{method}: response is not valid JSON: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reading or writing persisted cursor state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cursor store I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cursor store contents are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the chat session.
///
/// `Connection` and `Fetch` are the fatal classes: they trip the widget's
/// failure flag (subject to the poll failure policy for `Fetch`). Post and
/// upload failures are local to the composer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not connect to the workspace: {0}")]
    Connection(#[source] RemoteError),
    #[error("could not load messages for {channel}: {source}")]
    Fetch {
        channel: String,
        #[source]
        source: RemoteError,
    },
    #[error("could not post message: {0}")]
    Post(#[source] RemoteError),
    #[error("could not upload file: {0}")]
    Upload(#[source] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no channel is active")]
    NoActiveChannel,
    #[error("channel {0} is not configured")]
    UnknownChannel(String),
    #[error("the chat widget is in the failed state")]
    Failed,
}

impl SyncError {
    /// Whether this error class takes the whole widget down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Fetch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(method: &'static str) -> RemoteError {
        RemoteError::Api {
            method,
            error: "channel_not_found".into(),
        }
    }

    #[test]
    fn fatal_classes_are_connection_and_fetch() {
        assert!(SyncError::Connection(api("conversations.list")).is_fatal());
        assert!(SyncError::Fetch {
            channel: "general".into(),
            source: api("conversations.history"),
        }
        .is_fatal());
        assert!(!SyncError::Post(api("chat.postMessage")).is_fatal());
        assert!(!SyncError::Upload(api("files.upload")).is_fatal());
        assert!(!SyncError::NoActiveChannel.is_fatal());
    }

    #[test]
    fn fetch_error_names_channel_and_cause() {
        let err = SyncError::Fetch {
            channel: "general".into(),
            source: api("conversations.history"),
        };
        let text = err.to_string();
        assert!(text.contains("general"));
        assert!(text.contains("conversations.history failed: channel_not_found"));
    }
}
