// handlers/whatsapp/exchange.rs - POST /api/Whatsapp/record-exchange handler

use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, JsonBody};
use crate::types::{Chat, MessageExchange, MessagePart};

use super::required_text;

#[derive(Debug, Deserialize)]
pub struct MessagePartInput {
    pub message: String,
    /// Defaults to the time the request is handled
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessagePartInput {
    fn into_part(self, received_at: DateTime<Utc>) -> MessagePart {
        MessagePart {
            message: self.message,
            timestamp: self.timestamp.unwrap_or(received_at),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordExchangeRequest {
    pub wa_id: Option<Value>,
    pub business_phone_number: Option<Value>,
    pub user: Option<MessagePartInput>,
    pub response: Option<MessagePartInput>,
}

/// POST /api/Whatsapp/record-exchange - Append an inbound message and its reply.
/// This is the hook inbound message processing calls; the chat is created on first contact.
pub async fn post(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RecordExchangeRequest>,
) -> ApiResult<Chat> {
    let (Some(wa_id), Some(phone_number), Some(user), Some(response)) = (
        required_text(&body.wa_id),
        required_text(&body.business_phone_number),
        body.user,
        body.response,
    ) else {
        return Err(ApiError::bad_request(
            "waId, businessPhoneNumber, user and response are required.",
        ));
    };

    let received_at = Utc::now();
    let exchange = MessageExchange {
        user: user.into_part(received_at),
        response: response.into_part(received_at),
    };

    let chat = state
        .chats
        .record_exchange(&phone_number, &wa_id, exchange)
        .await
        .map_err(|e| {
            ApiError::from_store(e, "POST /api/Whatsapp/record-exchange", "Failed to record message.")
        })?;

    Ok(ApiResponse::created(chat))
}
