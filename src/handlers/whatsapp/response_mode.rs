// handlers/whatsapp/response_mode.rs - POST /api/Whatsapp/get-response-mode and update-response-mode

use axum::{extract::State, response::Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::JsonBody;
use crate::types::ResponseMode;

use super::required_text;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseModeRequest {
    pub wa_id: Option<Value>,
    pub business_phone_number: Option<Value>,
    /// Only read by update-response-mode
    pub response_mode: Option<Value>,
}

/**
 * POST /api/Whatsapp/get-response-mode - Read a chat's response mode
 *
 * Expected Input:
 * ```json
 * { "waId": "123", "businessPhoneNumber": "+15550001111" }
 * ```
 *
 * Expected Output (Success):
 * ```json
 * { "success": true, "responseMode": "auto" }
 * ```
 */
pub async fn get_mode(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ResponseModeRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(wa_id), Some(phone_number)) = (
        required_text(&body.wa_id),
        required_text(&body.business_phone_number),
    ) else {
        return Err(ApiError::bad_request("waId and businessPhoneNumber are required."));
    };

    let chat = state
        .chats
        .find_chat(&phone_number, &wa_id)
        .await
        .map_err(|e| {
            ApiError::from_store(e, "POST /api/Whatsapp/get-response-mode", "Failed to get response mode.")
        })?
        .ok_or_else(|| ApiError::not_found("No chat found with the provided waId."))?;

    Ok(Json(json!({
        "success": true,
        "responseMode": chat.response_mode(),
    })))
}

/**
 * POST /api/Whatsapp/update-response-mode - Switch a chat between bot and human agent
 *
 * Expected Input:
 * ```json
 * { "waId": "123", "responseMode": "manual", "businessPhoneNumber": "+15550001111" }
 * ```
 *
 * Expected Output (Success):
 * ```json
 * { "success": true, "message": "Response mode updated to manual for user 123." }
 * ```
 */
pub async fn update_mode(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ResponseModeRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(wa_id), Some(mode), Some(phone_number)) = (
        required_text(&body.wa_id),
        required_text(&body.response_mode),
        required_text(&body.business_phone_number),
    ) else {
        return Err(ApiError::bad_request(
            "waId, responseMode, and businessPhoneNumber are required.",
        ));
    };

    let mode: ResponseMode = mode
        .parse()
        .map_err(|_| ApiError::bad_request("responseMode must be either 'auto' or 'manual'."))?;

    info!(wa_id = %wa_id, mode = %mode, tenant = %phone_number, "Updating response mode");

    let updated = state
        .chats
        .set_response_mode(&phone_number, &wa_id, mode)
        .await
        .map_err(|e| {
            ApiError::from_store(e, "POST /api/Whatsapp/update-response-mode", "Failed to update response mode.")
        })?;

    if !updated {
        return Err(ApiError::not_found("No chat found with the provided waId."));
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("Response mode updated to {} for user {}.", mode, wa_id),
    })))
}
