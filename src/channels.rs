//! Narrowing the workspace down to what the visitor may see.

use crate::config::ChannelSpec;
use crate::message::{Channel, User};

/// Built-in Slackbot; reported as a regular user by `users.list`.
const SLACKBOT_ID: &str = "USLACKBOT";

/// Configured channels found in the workspace, plus the one to open first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedChannels {
    pub channels: Vec<Channel>,
    pub active: Option<Channel>,
}

/// Keep remote channels selected by the allow-list, in workspace order.
///
/// The configured icon is copied onto the channel. `default_channel` picks
/// the initially active channel by name (or id).
pub fn resolve_channels(
    remote: Vec<Channel>,
    specs: &[ChannelSpec],
    default_channel: Option<&str>,
) -> ResolvedChannels {
    let mut resolved = ResolvedChannels::default();

    for mut channel in remote {
        let Some(spec) = specs.iter().find(|spec| spec.selects(&channel)) else {
            continue;
        };
        if resolved.channels.iter().any(|c| c.id == channel.id) {
            continue;
        }
        channel.icon = spec.icon.clone();
        if channel.display_name.is_empty() {
            channel.display_name = channel.key().to_string();
        }
        if resolved.active.is_none() && default_channel.is_some_and(|d| channel.matches(d)) {
            resolved.active = Some(channel.clone());
        }
        resolved.channels.push(channel);
    }

    let missing: Vec<&ChannelSpec> = specs
        .iter()
        .filter(|spec| !resolved.channels.iter().any(|c| spec.selects(c)))
        .collect();
    if !missing.is_empty() {
        tracing::debug!(?missing, "configured channels not found in workspace");
    }

    resolved
}

/// Humans the visitor could be talking to.
pub fn online_users(users: Vec<User>) -> Vec<User> {
    users
        .into_iter()
        .filter(|u| !u.is_bot && !u.deleted && u.id != SLACKBOT_ID)
        .collect()
}
