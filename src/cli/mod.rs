pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::sync::HttpChatFeed;

pub const DEFAULT_SERVER: &str = "http://localhost:3000";

#[derive(Parser)]
#[command(name = "wa-console")]
#[command(about = "WhatsApp console CLI - inspect and steer tenant chat inboxes")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(
        long,
        global = true,
        env = "WA_CONSOLE_URL",
        default_value = DEFAULT_SERVER,
        help = "Base URL of the console API"
    )]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Read a tenant's chat inbox")]
    Chats {
        #[command(subcommand)]
        cmd: commands::chats::ChatsCommands,
    },

    #[command(about = "Per-chat response mode")]
    Mode {
        #[command(subcommand)]
        cmd: commands::mode::ModeCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let feed = HttpChatFeed::new(&cli.server)?;

    match cli.command {
        Commands::Chats { cmd } => commands::chats::handle(cmd, &feed, output_format).await,
        Commands::Mode { cmd } => commands::mode::handle(cmd, &feed, output_format).await,
    }
}
