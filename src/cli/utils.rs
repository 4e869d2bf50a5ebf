use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::sync::SyncState;
use crate::types::Chat;

/// Output a success message in the appropriate format
pub fn output_success(
    output_format: &OutputFormat,
    message: &str,
    data: Option<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(target), Some(Value::Object(extra))) = (response.as_object_mut(), data) {
                target.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an error message in the appropriate format
pub fn output_error(
    output_format: &OutputFormat,
    message: &str,
    error_code: Option<&str>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": false,
                "error": message
            });

            if let Some(code) = error_code {
                response["error_code"] = json!(code);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", message);
        }
    }
    Ok(())
}

/// Output a chat list as a table or a JSON array
pub fn output_chats(output_format: &OutputFormat, chats: &[Chat]) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "chats": chats }))?);
        }
        OutputFormat::Text => {
            if chats.is_empty() {
                println!("No chats");
                return Ok(());
            }

            println!("{:<20} {:<8} {:<9} {:<20} {}", "WA ID", "MODE", "MESSAGES", "LAST ACTIVITY", "LAST MESSAGE");
            println!("{}", "-".repeat(90));

            for chat in chats {
                let last = chat.last_exchange();
                let when = last
                    .map(|exchange| exchange.user.timestamp.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let preview = last
                    .map(|exchange| truncate(&exchange.user.message, 32))
                    .unwrap_or_default();

                println!(
                    "{:<20} {:<8} {:<9} {:<20} {}",
                    chat.wa_id,
                    chat.response_mode().as_str(),
                    chat.messages.len(),
                    when,
                    preview
                );
            }
        }
    }
    Ok(())
}

/// One line per sync state change
pub fn output_sync_state(output_format: &OutputFormat, state: &SyncState) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&json!({
                    "phase": format!("{:?}", state.phase),
                    "loading": state.loading,
                    "error": state.error,
                    "data": state.data,
                }))?
            );
        }
        OutputFormat::Text => {
            let messages: usize = state.data.iter().map(|chat| chat.messages.len()).sum();
            let mut line = format!(
                "[{:?}] {} chats, {} messages",
                state.phase,
                state.data.len(),
                messages
            );
            if state.loading {
                line.push_str(" (loading)");
            }
            if let Some(error) = &state.error {
                line.push_str(&format!(" error: {}", error));
            }
            println!("{}", line);
        }
    }
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
