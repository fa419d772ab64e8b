//! Data model shared by every layer of the chat engine.
//!
//! Records mirror the Slack Web API payloads closely enough to be
//! deserialized straight from `conversations.history` and friends, but
//! carry only what the sync engine and the renderer need.

use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

// ── Timestamps ───────────────────────────────────────────────────────────────

/// Slack message timestamp (`"1712345678.000200"`).
///
/// Unique per message within a channel and sortable as a decimal number.
/// Kept as the original string so it round-trips to the API untouched.
/// Equality, hashing and ordering go by numeric value (seconds, then
/// fraction), so `"100.5"` and `"100.500000"` are the same key. Strings
/// that are not decimal numbers sort first and compare verbatim.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Ts(String);

impl Ts {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Timestamp for "now", in the same `secs.micros` shape Slack uses.
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self(format!(
            "{}.{:06}",
            now.timestamp(),
            now.timestamp_subsec_micros()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `(seconds, fraction scaled to nanoseconds)`, or `None` when the
    /// string is not a plain decimal number.
    fn numeric_key(&self) -> Option<(u64, u32)> {
        let raw = self.0.trim();
        let (secs, frac) = raw.split_once('.').unwrap_or((raw, ""));
        let secs = secs.parse::<u64>().ok()?;
        if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let frac = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<9}").parse::<u32>().ok()?
        };
        Some((secs, frac))
    }
}

impl Ord for Ts {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_key(), other.numeric_key()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialEq for Ts {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ts {}

impl Hash for Ts {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.numeric_key() {
            Some(key) => key.hash(state),
            None => self.0.hash(state),
        }
    }
}

impl PartialOrd for Ts {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ts {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl<'de> Deserialize<'de> for Ts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawTs {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawTs::deserialize(deserializer)? {
            RawTs::Text(s) => Self(s),
            RawTs::Number(n) => Self(n.to_string()),
        })
    }
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// File attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "url_private")]
    pub url: String,
}

/// A single chat message as fetched from the platform.
///
/// Equality is structural over the whole payload, including fields the
/// engine does not interpret (`extra`), so an edited message with the same
/// `ts` compares unequal to its earlier version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub ts: Ts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    pub fn new(ts: impl Into<Ts>, text: impl Into<String>) -> Self {
        Self {
            ts: ts.into(),
            user: None,
            username: None,
            text: text.into(),
            files: Vec::new(),
            thread_ts: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn from_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.files.push(FileRef {
            name: name.into(),
            url: url.into(),
        });
        self
    }

    /// Whether this message was authored by the given platform identity.
    pub fn is_from(&self, user_id: &str) -> bool {
        self.user.as_deref() == Some(user_id)
    }
}

impl From<String> for Ts {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

// ── Channels & users ─────────────────────────────────────────────────────────

/// A conversation the visitor can talk in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub display_name: String,
}

impl Channel {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            display_name: name.clone(),
            name,
            icon: None,
        }
    }

    /// Key used for per-channel persisted state: the name when known, else the id.
    pub fn key(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Whether `selector` names this channel by name or id.
    pub fn matches(&self, selector: &str) -> bool {
        !selector.is_empty() && (self.name == selector || self.id == selector)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_72: Option<String>,
}

/// A member of the backend team's workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub profile: UserProfile,
}

impl User {
    /// Best human-readable label for the user.
    pub fn label(&self) -> &str {
        [
            self.profile.display_name.as_str(),
            self.profile.real_name.as_str(),
            self.name.as_str(),
        ]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or(&self.id)
    }
}

/// Result of posting a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub ts: Ts,
    pub thread_ts: Option<String>,
}

impl PostedMessage {
    /// Thread the post belongs to: its parent thread, or itself when top-level.
    pub fn thread_root(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(self.ts.as_str())
    }
}

/// File handed to the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_orders_numerically_not_lexically() {
        assert!(Ts::from("9.5") < Ts::from("10.1"));
        assert!(Ts::from("100.000200") > Ts::from("100.000199"));
        assert!(Ts::from("100.2") > Ts::from("100.000900"));
    }

    #[test]
    fn ts_equal_values_with_different_spelling_are_one_key() {
        let a = Ts::from("100.5");
        let b = Ts::from("100.500000");
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        let keys: std::collections::HashSet<Ts> = [a.clone(), b].into_iter().collect();
        assert_eq!(keys.len(), 1);
        assert_eq!(a.as_str(), "100.5");
    }

    #[test]
    fn ts_non_numeric_sorts_first_and_compares_verbatim() {
        assert!(Ts::from("pending") < Ts::from("1.0"));
        assert_ne!(Ts::from("abc"), Ts::from("xyz"));
        assert_eq!(Ts::from("abc"), Ts::from("abc"));
    }

    #[test]
    fn ts_deserializes_from_string_and_number() {
        let a: Ts = serde_json::from_str("\"1712345678.000200\"").unwrap();
        assert_eq!(a.as_str(), "1712345678.000200");
        let b: Ts = serde_json::from_str("100").unwrap();
        assert_eq!(b.as_str(), "100");
    }

    #[test]
    fn ts_now_has_micro_suffix() {
        let ts = Ts::now();
        let (_, frac) = ts.as_str().split_once('.').unwrap();
        assert_eq!(frac.len(), 6);
    }

    #[test]
    fn message_keeps_unknown_fields_for_equality() {
        let raw = serde_json::json!({
            "ts": "100.000001",
            "user": "U1",
            "text": "hi",
            "type": "message"
        });
        let a: Message = serde_json::from_value(raw.clone()).unwrap();
        let mut edited = raw;
        edited["edited"] = serde_json::json!({"ts": "101.0"});
        let b: Message = serde_json::from_value(edited).unwrap();
        assert_eq!(a.extra.get("type"), Some(&serde_json::json!("message")));
        assert_ne!(a, b);
    }

    #[test]
    fn message_files_accept_url_private() {
        let m: Message = serde_json::from_value(serde_json::json!({
            "ts": "1.0",
            "text": "",
            "files": [{"name": "a.png", "url_private": "https://files.slack.com/a.png"}]
        }))
        .unwrap();
        assert_eq!(m.files[0].url, "https://files.slack.com/a.png");
    }

    #[test]
    fn channel_key_prefers_name() {
        assert_eq!(Channel::new("C1", "general").key(), "general");
        assert_eq!(Channel::new("C1", "").key(), "C1");
    }

    #[test]
    fn channel_matches_name_or_id() {
        let ch = Channel::new("C1", "general");
        assert!(ch.matches("general"));
        assert!(ch.matches("C1"));
        assert!(!ch.matches(""));
        assert!(!ch.matches("random"));
    }

    #[test]
    fn user_label_falls_back_through_profile() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": "U1",
            "name": "jdoe",
            "profile": {"real_name": "Jane Doe"}
        }))
        .unwrap();
        assert_eq!(user.label(), "Jane Doe");
    }

    #[test]
    fn posted_message_thread_root_falls_back_to_ts() {
        let top = PostedMessage {
            ts: Ts::from("5.0"),
            thread_ts: None,
        };
        assert_eq!(top.thread_root(), "5.0");
        let reply = PostedMessage {
            ts: Ts::from("6.0"),
            thread_ts: Some("5.0".into()),
        };
        assert_eq!(reply.thread_root(), "5.0");
    }
}
