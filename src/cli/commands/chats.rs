use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::sync::{ChatSync, HttpChatFeed, SnapshotSource, CHAT_LIST_POLL_INTERVAL};

#[derive(Subcommand)]
pub enum ChatsCommands {
    #[command(about = "Fetch the current chat snapshot")]
    List {
        #[arg(help = "Business phone number (tenant key)")]
        phone: String,
    },

    #[command(about = "Follow live updates until interrupted")]
    Watch {
        #[arg(help = "Business phone number (tenant key)")]
        phone: String,
        #[arg(long, env = "SYNC_POLL_INTERVAL_MS", help = "Fallback polling interval in milliseconds")]
        interval_ms: Option<u64>,
    },
}

pub async fn handle(cmd: ChatsCommands, feed: &HttpChatFeed, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ChatsCommands::List { phone } => {
            let envelope = feed
                .fetch_snapshot(&phone)
                .await
                .with_context(|| format!("failed to fetch chats from {}", feed.base_url()))?;

            if !envelope.success {
                let message = envelope.error.unwrap_or_else(|| "Unknown error occurred".to_string());
                output_error(&output_format, &message, None)?;
                anyhow::bail!("server rejected snapshot request");
            }

            output_chats(&output_format, &envelope.data.unwrap_or_default())
        }
        ChatsCommands::Watch { phone, interval_ms } => {
            let poll_interval = interval_ms.map(Duration::from_millis).unwrap_or(CHAT_LIST_POLL_INTERVAL);
            let sync = ChatSync::over_http(feed.clone()).with_poll_interval(poll_interval);

            let subscription = sync.subscribe(&phone);
            let mut updates = subscription.watch();
            output_sync_state(&output_format, &updates.borrow_and_update())?;

            loop {
                tokio::select! {
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = updates.borrow_and_update().clone();
                        output_sync_state(&output_format, &state)?;
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            subscription.close().await;
            Ok(())
        }
    }
}
