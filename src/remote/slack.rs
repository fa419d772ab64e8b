use super::RemoteClient;
use crate::error::RemoteError;
use crate::message::{Channel, FileUpload, Message, PostedMessage, Ts, User};
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Maximum pages fetched from paginated list endpoints (50 × 200 = 10,000 entries).
const MAX_PAGES: usize = 50;

const PAGE_LIMIT: &str = "200";

/// Messages requested per history poll.
const HISTORY_LIMIT: &str = "100";

pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// Slack Web API client bound to one bot token.
pub struct SlackClient {
    bot_token: String,
    api_base: String,
    http: reqwest::Client,
}

impl SlackClient {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self::with_api_base(bot_token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(bot_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: build_http_client(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    /// Send a prepared request and unwrap Slack's `{ "ok": … }` envelope.
    async fn call(
        method: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, RemoteError> {
        let resp = request
            .send()
            .await
            .map_err(|source| RemoteError::Http { method, source })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));

        if !status.is_success() {
            return Err(RemoteError::Status {
                method,
                status,
                body,
            });
        }

        let data: serde_json::Value = serde_json::from_str(&body)
            .map_err(|source| RemoteError::Decode { method, source })?;

        // Slack returns 200 for most app-level errors; check JSON "ok" field
        if data.get("ok") != Some(&serde_json::Value::Bool(true)) {
            let error = data
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown")
                .to_string();
            return Err(RemoteError::Api { method, error });
        }
        Ok(data)
    }

    async fn get(
        &self,
        method: &'static str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, RemoteError> {
        let request = self
            .http
            .get(self.endpoint(method))
            .bearer_auth(&self.bot_token)
            .query(params);
        Self::call(method, request).await
    }

    /// Walk a cursor-paginated list endpoint, concatenating `field` arrays.
    async fn collect_pages(
        &self,
        method: &'static str,
        field: &str,
        base_params: &[(&str, String)],
    ) -> Result<Vec<serde_json::Value>, RemoteError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages: usize = 0;

        loop {
            pages += 1;
            let mut params = base_params.to_vec();
            params.push(("limit", PAGE_LIMIT.to_string()));
            if let Some(ref next) = cursor {
                params.push(("cursor", next.clone()));
            }

            let data = self.get(method, &params).await?;
            if let Some(page) = data.get(field).and_then(|v| v.as_array()) {
                items.extend(page.iter().cloned());
            }

            cursor = next_cursor(&data);
            if cursor.is_none() {
                break;
            }
            if pages >= MAX_PAGES {
                tracing::warn!(
                    pages = MAX_PAGES,
                    "Slack: {method} reached page limit; list may be incomplete"
                );
                break;
            }
        }
        Ok(items)
    }
}

fn next_cursor(data: &serde_json::Value) -> Option<String> {
    data.get("response_metadata")
        .and_then(|rm| rm.get("next_cursor"))
        .and_then(|c| c.as_str())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(ToOwned::to_owned)
}

/// Channels from a `conversations.list` page, skipping archived ones.
fn parse_channels(raw: &[serde_json::Value]) -> Vec<Channel> {
    raw.iter()
        .filter_map(|channel| {
            let id = channel.get("id").and_then(|id| id.as_str())?;
            let is_archived = channel
                .get("is_archived")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if is_archived {
                return None;
            }
            let name = channel.get("name").and_then(|n| n.as_str()).unwrap_or("");
            Some(Channel::new(id, name))
        })
        .collect()
}

fn parse_users(raw: Vec<serde_json::Value>) -> Vec<User> {
    raw.into_iter()
        .filter_map(|member| match serde_json::from_value::<User>(member) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::debug!("Slack: skipping unparseable member: {e}");
                None
            }
        })
        .collect()
}

fn parse_messages(
    method: &'static str,
    data: &mut serde_json::Value,
) -> Result<Vec<Message>, RemoteError> {
    let raw = data
        .get_mut("messages")
        .map(serde_json::Value::take)
        .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
    serde_json::from_value(raw).map_err(|source| RemoteError::Decode { method, source })
}

/// `ts` and thread root from a `chat.postMessage` response.
fn parse_posted(data: &serde_json::Value) -> Option<PostedMessage> {
    let ts = data
        .get("ts")
        .or_else(|| data.pointer("/message/ts"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())?;
    let thread_ts = data
        .pointer("/message/thread_ts")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    Some(PostedMessage {
        ts: Ts::new(ts),
        thread_ts,
    })
}

/// JSON body for `chat.postMessage`.
fn build_post_body(
    channel_id: &str,
    text: &str,
    username: &str,
    thread_ts: Option<&str>,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "channel": channel_id,
        "text": text
    });
    if !username.is_empty() {
        body["username"] = serde_json::json!(username);
    }
    if let Some(ts) = thread_ts {
        body["thread_ts"] = serde_json::json!(ts);
    }
    body
}

#[async_trait]
impl RemoteClient for SlackClient {
    fn name(&self) -> &str {
        "slack"
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, RemoteError> {
        let raw = self
            .collect_pages(
                "conversations.list",
                "channels",
                &[
                    ("exclude_archived", "true".to_string()),
                    ("types", "public_channel,private_channel".to_string()),
                ],
            )
            .await?;
        let channels = parse_channels(&raw);
        tracing::debug!(count = channels.len(), "Slack: listed channels");
        Ok(channels)
    }

    async fn list_users(&self) -> Result<Vec<User>, RemoteError> {
        let raw = self.collect_pages("users.list", "members", &[]).await?;
        Ok(parse_users(raw))
    }

    async fn list_messages(
        &self,
        channel_id: &str,
        since_thread_ts: Option<&str>,
    ) -> Result<Vec<Message>, RemoteError> {
        match since_thread_ts {
            Some(thread_ts) => {
                let method = "conversations.replies";
                let mut data = self
                    .get(
                        method,
                        &[
                            ("channel", channel_id.to_string()),
                            ("ts", thread_ts.to_string()),
                            ("limit", HISTORY_LIMIT.to_string()),
                        ],
                    )
                    .await?;
                // Replies come oldest-first; hand them out newest-first like history
                let mut messages = parse_messages(method, &mut data)?;
                messages.reverse();
                Ok(messages)
            }
            None => {
                let method = "conversations.history";
                let mut data = self
                    .get(
                        method,
                        &[
                            ("channel", channel_id.to_string()),
                            ("limit", HISTORY_LIMIT.to_string()),
                        ],
                    )
                    .await?;
                parse_messages(method, &mut data)
            }
        }
    }

    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        username: &str,
        thread_ts: Option<&str>,
    ) -> Result<PostedMessage, RemoteError> {
        let method = "chat.postMessage";
        let request = self
            .http
            .post(self.endpoint(method))
            .bearer_auth(&self.bot_token)
            .json(&build_post_body(channel_id, text, username, thread_ts));
        let data = Self::call(method, request).await?;
        parse_posted(&data).ok_or_else(|| RemoteError::Api {
            method,
            error: "response missing ts".to_string(),
        })
    }

    async fn upload_file(
        &self,
        channel_id: &str,
        file: &FileUpload,
        title: &str,
        thread_ts: Option<&str>,
    ) -> Result<(), RemoteError> {
        let method = "files.upload";
        tracing::debug!(file = %file.name, size = file.bytes.len(), "Slack: uploading file");

        let part = reqwest::multipart::Part::bytes(file.bytes.clone()).file_name(file.name.clone());
        let mut form = reqwest::multipart::Form::new()
            .text("filename", file.name.clone())
            .text("title", title.to_string())
            .text("filetype", "auto")
            .text("channels", channel_id.to_string());
        if let Some(ts) = thread_ts {
            form = form.text("thread_ts", ts.to_string());
        }
        form = form.part("file", part);

        let request = self
            .http
            .post(self.endpoint(method))
            .bearer_auth(&self.bot_token)
            .multipart(form);
        Self::call(method, request).await?;
        Ok(())
    }
}
