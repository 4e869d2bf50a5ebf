// handlers/whatsapp/data.rs - GET /api/Whatsapp/data/:business_phone_number handler

use axum::extract::{Path, State};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::types::Chat;

use super::require_phone_number;

/**
 * GET /api/Whatsapp/data/:business_phone_number - Full chat snapshot for a tenant
 *
 * Ensures the tenant's store exists, then returns every chat document.
 *
 * Expected Output (Success):
 * ```json
 * {
 *   "success": true,
 *   "data": [{ "wa_id": "123", "messages": [...], "responseMode": "auto" }],
 *   "message": "Data fetched successfully"
 * }
 * ```
 */
pub async fn get(
    State(state): State<AppState>,
    Path(business_phone_number): Path<String>,
) -> ApiResult<Vec<Chat>> {
    let phone_number = require_phone_number(&business_phone_number)?;
    let context = format!("GET /api/Whatsapp/data/{}", phone_number);

    state
        .chats
        .ensure_tenant(phone_number)
        .await
        .map_err(|e| ApiError::from_store(e, &context, "Failed to fetch data."))?;

    let chats = state
        .chats
        .list_chats(phone_number)
        .await
        .map_err(|e| ApiError::from_store(e, &context, "Failed to fetch data."))?;

    Ok(ApiResponse::success(chats).with_message("Data fetched successfully"))
}

/// Route target for `/data/` and `/stream/` with an empty phone number segment
pub async fn missing_phone_number() -> ApiError {
    ApiError::bad_request("Business phone number is required.")
}
