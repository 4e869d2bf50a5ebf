// handlers/root/tenant.rs - GET /api/root/tenant handler

use axum::extract::State;

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::TenantInfo;

/// GET /api/root/tenant - Every tenant whose chat store has been ensured
pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<TenantInfo>> {
    let tenants = state.chats.list_tenants().await?;
    Ok(ApiResponse::success(tenants))
}
