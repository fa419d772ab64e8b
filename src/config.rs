//! Widget configuration, read from TOML.

use crate::message::Channel;
use crate::remote::slack::DEFAULT_API_BASE;
use crate::scheduler::FailurePolicy;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when `api_token` is left empty.
pub const TOKEN_ENV: &str = "SLACKCHAT_API_TOKEN";

const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const MIN_POLL_INTERVAL_MS: u64 = 250;

/// One entry of the channel allow-list. Matches a remote channel by name or id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ChannelSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Whether this entry selects `channel`.
    pub fn selects(&self, channel: &Channel) -> bool {
        let by_name = self
            .name
            .as_deref()
            .is_some_and(|n| !n.is_empty() && n == channel.name);
        let by_id = self
            .id
            .as_deref()
            .is_some_and(|id| !id.is_empty() && id == channel.id);
        by_name || by_id
    }

    fn is_blank(&self) -> bool {
        self.name.as_deref().unwrap_or("").trim().is_empty()
            && self.id.as_deref().unwrap_or("").trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    /// Display name messages are posted under.
    pub bot_name: String,
    /// Platform user id of the widget owner; messages from it are "mine".
    pub bot_id: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub channels: Vec<ChannelSpec>,
    #[serde(default)]
    pub default_channel: Option<String>,
    /// Keep one persistent thread per channel instead of top-level posts.
    #[serde(default)]
    pub single_user_mode: bool,
    #[serde(default)]
    pub user_image: Option<String>,
    #[serde(default = "default_help_text")]
    pub help_text: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub default_message: Option<String>,
    #[serde(default)]
    pub close_chat_button: bool,
    #[serde(default)]
    pub cursor_store_path: Option<PathBuf>,
    #[serde(default)]
    pub failure: FailurePolicy,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_help_text() -> String {
    "Help?".to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl WidgetConfig {
    /// Minimal config with defaults for everything optional.
    pub fn new(
        bot_name: impl Into<String>,
        bot_id: impl Into<String>,
        api_token: impl Into<String>,
        channels: Vec<ChannelSpec>,
    ) -> Self {
        Self {
            bot_name: bot_name.into(),
            bot_id: bot_id.into(),
            api_token: api_token.into(),
            api_base: default_api_base(),
            channels,
            default_channel: None,
            single_user_mode: false,
            user_image: None,
            help_text: default_help_text(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            default_message: None,
            close_chat_button: false,
            cursor_store_path: None,
            failure: FailurePolicy::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config: {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config: {}", path.display()))
    }

    /// Parse, fill the token from the environment if needed, and validate.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(raw).context("failed to parse config TOML")?;
        let mut config: Self = serde_ignored::deserialize(value, |path| {
            tracing::warn!("config: ignoring unknown key `{path}`");
        })
        .context("config does not match the expected shape")?;

        if config.api_token.trim().is_empty() {
            if let Ok(token) = std::env::var(TOKEN_ENV) {
                config.api_token = token;
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot_id.trim().is_empty() {
            bail!("bot_id must be set");
        }
        if self.bot_name.trim().is_empty() {
            bail!("bot_name must be set");
        }
        if self.api_token.trim().is_empty() {
            bail!("api_token must be set (or export {TOKEN_ENV})");
        }
        if self.channels.is_empty() {
            bail!("at least one channel must be configured");
        }
        if let Some(pos) = self.channels.iter().position(ChannelSpec::is_blank) {
            bail!("channels[{pos}] needs a name or an id");
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            bail!(
                "poll_interval_ms must be at least {MIN_POLL_INTERVAL_MS} (got {})",
                self.poll_interval_ms
            );
        }
        if let Some(ref default) = self.default_channel {
            let known = self.channels.iter().any(|c| {
                c.name.as_deref() == Some(default.as_str())
                    || c.id.as_deref() == Some(default.as_str())
            });
            if !known {
                bail!("default_channel `{default}` is not in the channel list");
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        bot_name = "acme"
        bot_id = "U2"
        api_token = "xoxb-fake"

        [[channels]]
        name = "general"
        icon = "https://cdn.example/general.png"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = WidgetConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.bot_name, "acme");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.help_text, "Help?");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert!(!config.single_user_mode);
        assert_eq!(config.failure, FailurePolicy::default());
        assert_eq!(
            config.channels[0].icon.as_deref(),
            Some("https://cdn.example/general.png")
        );
    }

    #[test]
    fn full_config_parses_every_option() {
        let raw = r#"
            bot_name = "acme"
            bot_id = "U2"
            api_token = "xoxb-fake"
            default_channel = "general"
            single_user_mode = true
            user_image = "https://robohash.org/me"
            help_text = "Need a hand?"
            poll_interval_ms = 2000
            default_message = "Welcome!"
            close_chat_button = true
            cursor_store_path = "/tmp/slackchat.json"

            [[channels]]
            name = "general"

            [[channels]]
            id = "C999"

            [failure]
            policy = "strict"
        "#;
        let config = WidgetConfig::from_toml_str(raw).unwrap();
        assert!(config.single_user_mode);
        assert!(config.close_chat_button);
        assert_eq!(config.default_channel.as_deref(), Some("general"));
        assert_eq!(config.default_message.as_deref(), Some("Welcome!"));
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.failure, FailurePolicy::Strict);
        assert_eq!(config.channels[1].id.as_deref(), Some("C999"));
    }

    #[test]
    fn backoff_policy_fields_parse() {
        let raw = format!(
            "{MINIMAL}\n[failure]\npolicy = \"backoff\"\nmax_retries = 2\ninitial_ms = 500\nmax_ms = 4000\n"
        );
        let config = WidgetConfig::from_toml_str(&raw).unwrap();
        assert_eq!(
            config.failure,
            FailurePolicy::Backoff {
                max_retries: 2,
                initial_ms: 500,
                max_ms: 4000
            }
        );
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let raw = format!("theme = \"dark\"\n{MINIMAL}");
        assert!(WidgetConfig::from_toml_str(&raw).is_ok());
    }

    #[test]
    fn validate_rejects_missing_identity() {
        let mut config = WidgetConfig::new("acme", "", "xoxb", vec![ChannelSpec::named("general")]);
        assert!(config.validate().is_err());
        config.bot_id = "U2".into();
        assert!(config.validate().is_ok());
        config.bot_name = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_channel_entry() {
        let config = WidgetConfig::new("acme", "U2", "xoxb", vec![ChannelSpec::default()]);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("channels[0]"));
    }

    #[test]
    fn validate_rejects_unknown_default_channel() {
        let mut config =
            WidgetConfig::new("acme", "U2", "xoxb", vec![ChannelSpec::named("general")]);
        config.default_channel = Some("random".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_tiny_poll_interval() {
        let mut config =
            WidgetConfig::new("acme", "U2", "xoxb", vec![ChannelSpec::named("general")]);
        config.poll_interval_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn channel_spec_selects_by_name_or_id() {
        let general = Channel::new("C1", "general");
        assert!(ChannelSpec::named("general").selects(&general));
        let by_id = ChannelSpec {
            id: Some("C1".into()),
            ..ChannelSpec::default()
        };
        assert!(by_id.selects(&general));
        assert!(!ChannelSpec::named("random").selects(&general));
        assert!(!ChannelSpec::named("").selects(&Channel::new("C2", "")));
    }
}
