#![warn(clippy::all)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use slackchat::channels::resolve_channels;
use slackchat::cursor_store::default_state_path;
use slackchat::{
    ChatSession, CursorStore, FileCursorStore, FileUpload, MemoryCursorStore, MessageKind,
    RemoteClient, RenderedMessage, SlackClient, WidgetConfig,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "slackchat")]
#[command(version, about = "Headless harness for the Slack support-chat engine")]
struct Cli {
    /// Widget configuration file
    #[arg(short, long, default_value = "slackchat.toml")]
    config: PathBuf,

    /// Raise log verbosity (-v, -vv, -vvv). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the configured channels found in the workspace
    Channels,
    /// Follow a channel and print messages as they arrive (Ctrl-C to quit)
    Watch {
        /// Channel name or id; defaults to `default_channel`
        #[arg(long)]
        channel: Option<String>,
        /// Treat the chat as visible, so arrivals are not counted as unread
        #[arg(long)]
        open: bool,
    },
    /// Post a message as the bot
    Send {
        #[arg(long)]
        channel: String,
        text: String,
    },
    /// Upload a file as the bot
    Upload {
        #[arg(long)]
        channel: String,
        path: PathBuf,
    },
}

fn open_store(config: &WidgetConfig) -> Arc<dyn CursorStore> {
    match config.cursor_store_path.clone().or_else(default_state_path) {
        Some(path) => {
            let store = FileCursorStore::new(path);
            tracing::debug!(path = %store.path().display(), "using file cursor store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("no usable data directory, thread cursors will not persist");
            Arc::new(MemoryCursorStore::new())
        }
    }
}

fn describe(message: &RenderedMessage) -> String {
    match &message.kind {
        MessageKind::Attachment {
            file_name,
            url,
            mine,
        } => {
            let who = if *mine { "me" } else { "them" };
            format!("[{}] {who} shared {file_name} <{url}>", message.ts)
        }
        MessageKind::System { text } => format!("[{}] * {text}", message.ts),
        MessageKind::Chat {
            text,
            mine,
            mentioned,
            ..
        } => {
            let who = if *mine { "me" } else { "them" };
            let flag = if *mentioned { " (@)" } else { "" };
            format!("[{}] {who}{flag}: {text}", message.ts)
        }
    }
}

async fn connect(config: WidgetConfig, channel: Option<&str>) -> Result<ChatSession> {
    let remote: Arc<dyn RemoteClient> = Arc::new(SlackClient::with_api_base(
        config.api_token.clone(),
        config.api_base.clone(),
    ));
    let store = open_store(&config);
    let session = ChatSession::new(config, remote, store);
    session.start().await?;
    if let Some(channel) = channel {
        session.switch_channel(channel)?;
    }
    Ok(session)
}

async fn list_channels(config: &WidgetConfig) -> Result<()> {
    let remote = SlackClient::with_api_base(config.api_token.clone(), config.api_base.clone());
    let listed = remote.list_channels().await?;
    let resolved = resolve_channels(
        listed,
        &config.channels,
        config.default_channel.as_deref(),
    );
    if resolved.channels.is_empty() {
        println!("No configured channel exists in this workspace.");
        return Ok(());
    }
    for channel in &resolved.channels {
        let marker = if resolved.active.as_ref() == Some(channel) {
            "*"
        } else {
            " "
        };
        println!("{marker} {:<12} #{}", channel.id, channel.display_name);
    }
    Ok(())
}

async fn watch(config: WidgetConfig, channel: Option<String>, open: bool) -> Result<()> {
    let session = connect(config, channel.as_deref()).await?;
    if session.view().active_channel.is_none() {
        anyhow::bail!("no channel to watch: pass --channel or set default_channel");
    }
    if open {
        session.open_panel();
    }
    let view = session.view();
    let online: Vec<&str> = view.online_users.iter().map(|u| u.label()).collect();
    if !online.is_empty() {
        println!("online: {}", online.join(", "));
    }

    let mut updates = session.subscribe();
    let mut printed: HashSet<String> = HashSet::new();
    let mut last_unread = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                if view.failed {
                    session.stop();
                    anyhow::bail!("chat widget failed; see log output");
                }
                for message in session.rendered() {
                    if printed.insert(message.ts.to_string()) {
                        println!("{}", describe(&message));
                    }
                }
                if view.unread != last_unread {
                    last_unread = view.unread;
                    if last_unread > 0 {
                        println!("({last_unread} unread)");
                    }
                }
            }
        }
    }
    session.stop();
    Ok(())
}

async fn send(config: WidgetConfig, channel: &str, text: &str) -> Result<()> {
    let session = connect(config, Some(channel)).await?;
    let posted = session.send_message(text).await?;
    session.stop();
    match posted {
        Some(posted) => println!(
            "posted {} as {} (thread {})",
            posted.ts,
            session.config().bot_name,
            posted.thread_root()
        ),
        None => println!("nothing to send"),
    }
    Ok(())
}

async fn upload(config: WidgetConfig, channel: &str, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let session = connect(config, Some(channel)).await?;
    session.upload_file(FileUpload { name, bytes }).await?;
    session.stop();
    println!("uploaded {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    slackchat::logging::init(cli.verbose);

    let config = WidgetConfig::load(&cli.config)?;
    match cli.command {
        Commands::Channels => list_channels(&config).await,
        Commands::Watch { channel, open } => watch(config, channel, open).await,
        Commands::Send { channel, text } => send(config, &channel, &text).await,
        Commands::Upload { channel, path } => upload(config, &channel, &path).await,
    }
}
