//! Message classification for rendering.
//!
//! The platform does not flag system notices or legacy file uploads, so
//! both are recognised from the message text. All of that guesswork lives
//! behind [`Classifier`]; callers only ever see a [`Classification`] or the
//! single [`MessageKind`] variant derived from it.

use crate::message::{Message, Ts};
use regex::Regex;
use std::sync::LazyLock;

/// `<@U123|name>`-style mention link.
static MENTION_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@.[^|]*[|].*>").expect("mention link pattern is valid"));

/// "… uploaded a file: <https://…|name>" as emitted by older upload notices.
static UPLOADED_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)uploaded a file:?\s*<?(https?://[^\s|>]+)")
        .expect("uploaded file pattern is valid")
});

static FIRST_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s|>]+").expect("url pattern is valid"));

static EMOJI_SHORTCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i):[a-z0-9_+\-]+:").expect("emoji pattern is valid"));

/// Independent facts about one message.
///
/// `is_attachment` and `is_system` may both be set alongside `is_mentioned`;
/// [`Classifier::render`] resolves the rendering priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub is_mine: bool,
    pub is_system: bool,
    pub is_attachment: bool,
    pub is_mentioned: bool,
}

/// The one shape a message is rendered as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Attachment {
        file_name: String,
        url: String,
        mine: bool,
    },
    /// Platform notice (member joined, topic changed, …). Text is decoded.
    System { text: String },
    Chat {
        text: String,
        mine: bool,
        mentioned: bool,
        /// Text carries `:shortcode:` emoji the renderer should expand.
        emoji: bool,
    },
}

/// A message ready for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub ts: Ts,
    pub kind: MessageKind,
}

pub trait Classifier: Send + Sync {
    fn classify(&self, message: &Message) -> Classification;

    /// Collapse a message into the variant the renderer should draw.
    fn render(&self, message: &Message) -> RenderedMessage;
}

/// Text-heuristic classifier keyed on the widget owner's identity.
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    bot_id: String,
    bot_name: String,
    upload_title: String,
}

impl HeuristicClassifier {
    pub fn new(bot_id: impl Into<String>, bot_name: impl Into<String>) -> Self {
        let bot_name = bot_name.into();
        Self {
            bot_id: bot_id.into(),
            upload_title: upload_title(&bot_name),
            bot_name,
        }
    }

    fn attachment(&self, message: &Message, class: Classification) -> Option<MessageKind> {
        if let Some(file) = message.files.first() {
            return Some(MessageKind::Attachment {
                file_name: file.name.clone(),
                url: file.url.clone(),
                mine: class.is_mine,
            });
        }
        let url = attachment_url(&message.text)?;
        let file_name = url.rsplit('/').next().unwrap_or(&url).to_string();
        Some(MessageKind::Attachment {
            file_name,
            mine: message.text.contains(&self.upload_title),
            url,
        })
    }
}

impl Classifier for HeuristicClassifier {
    fn classify(&self, message: &Message) -> Classification {
        Classification {
            is_mine: message.is_from(&self.bot_id),
            is_system: is_system_message(message),
            is_attachment: !message.files.is_empty() || attachment_url(&message.text).is_some(),
            is_mentioned: was_mentioned(message, &self.bot_name),
        }
    }

    fn render(&self, message: &Message) -> RenderedMessage {
        let class = self.classify(message);
        let attachment = if class.is_attachment {
            self.attachment(message, class)
        } else {
            None
        };
        let kind = attachment.unwrap_or_else(|| {
            if class.is_system {
                MessageKind::System {
                    text: decode_html(&message.text),
                }
            } else {
                MessageKind::Chat {
                    text: decode_html(&message.text),
                    mine: class.is_mine,
                    mentioned: class.is_mentioned,
                    emoji: has_emoji(&message.text),
                }
            }
        });
        RenderedMessage {
            ts: message.ts.clone(),
            kind,
        }
    }
}

/// Title given to files the visitor uploads.
pub fn upload_title(bot_name: &str) -> String {
    format!("Posted by {bot_name}")
}

/// A mention link plus the author's own id somewhere in the text.
///
/// Known approximation: a user who mentions themselves and pastes their
/// own id is classified as a system notice.
pub fn is_system_message(message: &Message) -> bool {
    let Some(user) = message.user.as_deref().filter(|u| !u.is_empty()) else {
        return false;
    };
    MENTION_LINK.is_match(&message.text) && message.text.contains(user)
}

/// `@{bot_name}` appears in the text and the message was not sent as `bot_name`.
pub fn was_mentioned(message: &Message, bot_name: &str) -> bool {
    if bot_name.is_empty() || message.username.as_deref() == Some(bot_name) {
        return false;
    }
    message.text.contains(&format!("@{bot_name}"))
}

/// URL of a file announced in the message text, if any.
pub fn attachment_url(text: &str) -> Option<String> {
    if let Some(caps) = UPLOADED_FILE.captures(text) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    if text.to_lowercase().contains("uploaded a file") {
        return FIRST_URL.find(text).map(|m| m.as_str().to_string());
    }
    None
}

pub fn has_emoji(text: &str) -> bool {
    EMOJI_SHORTCODE.is_match(text)
}

/// Undo the HTML entity escaping the platform applies to message text.
pub fn decode_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
