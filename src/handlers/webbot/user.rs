// handlers/webbot/user.rs - POST /api/webbot/create-user and /api/webbot/fetch-user

use axum::{extract::State, response::Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, JsonBody};
use crate::store::WebbotUser;

/**
 * POST /api/webbot/create-user - Store a webbot onboarding form
 *
 * The whole body is kept as `formData`; the owner is read from `webForm.clerkId`.
 *
 * Expected Input:
 * ```json
 * { "webForm": { "clerkId": "user_2abc", "businessName": "..." }, ... }
 * ```
 */
pub async fn create(
    State(state): State<AppState>,
    JsonBody(form_data): JsonBody<Value>,
) -> Result<Json<Value>, ApiError> {
    let clerk_id = form_data
        .pointer("/webForm/clerkId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("Missing webForm.clerkId in request body"))?;

    let id = state
        .users
        .insert_user(WebbotUser { clerk_id: clerk_id.clone(), form_data })
        .await
        .map_err(|e| ApiError::from_store(e, "POST /api/webbot/create-user", "Failed to insert user data"))?;

    info!(clerk_id = %clerk_id, id = %id, "Webbot user stored");

    Ok(Json(json!({
        "success": true,
        "message": format!("New user inserted with _id: {}", id),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchUserRequest {
    pub clerk_id: Option<String>,
}

/// POST /api/webbot/fetch-user - Look up a stored form by clerk id (`data` is null when absent)
pub async fn fetch(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<FetchUserRequest>,
) -> ApiResult<Option<WebbotUser>> {
    let clerk_id = body
        .clerk_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing clerkId in request body"))?;

    let user = state
        .users
        .find_user(&clerk_id)
        .await
        .map_err(|e| ApiError::from_store(e, "POST /api/webbot/fetch-user", "Failed to retrieve user data"))?;

    Ok(ApiResponse::success(user))
}
