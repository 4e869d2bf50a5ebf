use anyhow::Context;
use clap::Subcommand;
use serde_json::{json, Value};

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::sync::HttpChatFeed;
use crate::types::ResponseMode;

#[derive(Subcommand)]
pub enum ModeCommands {
    #[command(about = "Show a chat's response mode")]
    Get {
        #[arg(help = "Business phone number (tenant key)")]
        phone: String,
        #[arg(help = "End user's WhatsApp id")]
        wa_id: String,
    },

    #[command(about = "Switch a chat between bot and human agent")]
    Set {
        #[arg(help = "Business phone number (tenant key)")]
        phone: String,
        #[arg(help = "End user's WhatsApp id")]
        wa_id: String,
        #[arg(help = "auto or manual", value_parser = parse_mode)]
        mode: ResponseMode,
    },
}

fn parse_mode(raw: &str) -> Result<ResponseMode, String> {
    raw.parse()
}

pub async fn handle(cmd: ModeCommands, feed: &HttpChatFeed, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ModeCommands::Get { phone, wa_id } => {
            let body = post(
                feed,
                "get-response-mode",
                json!({ "waId": wa_id, "businessPhoneNumber": phone }),
            )
            .await?;

            match body_error(&body) {
                Some(message) => {
                    output_error(&output_format, &message, body_code(&body))?;
                    anyhow::bail!(message);
                }
                None => {
                    let mode = body["responseMode"].as_str().unwrap_or("auto").to_string();
                    match output_format {
                        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
                        OutputFormat::Text => println!("{}: {}", wa_id, mode),
                    }
                    Ok(())
                }
            }
        }
        ModeCommands::Set { phone, wa_id, mode } => {
            let body = post(
                feed,
                "update-response-mode",
                json!({ "waId": wa_id, "responseMode": mode, "businessPhoneNumber": phone }),
            )
            .await?;

            match body_error(&body) {
                Some(message) => {
                    output_error(&output_format, &message, body_code(&body))?;
                    anyhow::bail!(message);
                }
                None => {
                    let message = body["message"].as_str().unwrap_or("Response mode updated");
                    output_success(
                        &output_format,
                        message,
                        Some(json!({ "waId": wa_id, "responseMode": mode })),
                    )
                }
            }
        }
    }
}

async fn post(feed: &HttpChatFeed, action: &str, payload: Value) -> anyhow::Result<Value> {
    let url = feed.api_url(&["Whatsapp", action])?;
    let response = feed
        .client()
        .post(url.clone())
        .json(&payload)
        .send()
        .await
        .with_context(|| format!("request to {} failed", url))?;

    // Error statuses still carry the JSON envelope
    response
        .json::<Value>()
        .await
        .with_context(|| format!("invalid response body from {}", url))
}

fn body_error(body: &Value) -> Option<String> {
    if body["success"].as_bool() == Some(true) {
        return None;
    }
    Some(body["error"].as_str().unwrap_or("Unknown error occurred").to_string())
}

fn body_code(body: &Value) -> Option<&str> {
    body["code"].as_str()
}
