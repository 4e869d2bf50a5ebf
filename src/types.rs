/// Shared chat document types used by the store, the HTTP API and the sync client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Per-chat flag deciding whether the bot or a human agent answers next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Auto,
    Manual,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Auto => "auto",
            ResponseMode::Manual => "manual",
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ResponseMode::Auto),
            "manual" => Ok(ResponseMode::Manual),
            other => Err(format!("unknown response mode '{}'", other)),
        }
    }
}

/// One side of an exchange: the text and when it was sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl MessagePart {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One inbound user message paired with the outbound response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageExchange {
    pub user: MessagePart,
    pub response: MessagePart,
}

/// A conversation thread with a single end user.
///
/// Wire shape matches the stored document: `wa_id`, `messages`, optional
/// `responseMode`, plus any extra fields carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub wa_id: String,

    #[serde(default)]
    pub messages: Vec<MessageExchange>,

    #[serde(rename = "responseMode", default, skip_serializing_if = "Option::is_none")]
    pub response_mode: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Chat {
    pub fn new(wa_id: impl Into<String>) -> Self {
        Self {
            wa_id: wa_id.into(),
            messages: Vec::new(),
            response_mode: None,
            extra: Map::new(),
        }
    }

    /// Effective response mode; missing or unrecognized values read as auto
    pub fn response_mode(&self) -> ResponseMode {
        self.response_mode
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn set_response_mode(&mut self, mode: ResponseMode) {
        self.response_mode = Some(mode.as_str().to_string());
    }

    pub fn last_exchange(&self) -> Option<&MessageExchange> {
        self.messages.last()
    }
}
