use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{config, AppConfig, SecurityConfig, StoreBackend, StreamConfig};
use crate::handlers;
use crate::store::{ChatStore, MemoryChatStore, PgChatStore, StoreError, UserStore};

/// Shared handler state: the store backends plus push feed settings
#[derive(Clone)]
pub struct AppState {
    pub chats: Arc<dyn ChatStore>,
    pub users: Arc<dyn UserStore>,
    pub stream: StreamConfig,
}

impl AppState {
    pub fn new(chats: Arc<dyn ChatStore>, users: Arc<dyn UserStore>, stream: StreamConfig) -> Self {
        Self { chats, users, stream }
    }

    /// State backed by a fresh process-local store
    pub fn in_memory(stream: StreamConfig) -> Self {
        let store = Arc::new(MemoryChatStore::new(stream.channel_capacity));
        Self::new(store.clone(), store, stream)
    }

    /// Build state for the configured backend
    pub async fn from_config(app_config: &AppConfig) -> Result<Self, StoreError> {
        let stream = app_config.stream.clone();
        match app_config.database.backend {
            StoreBackend::Memory => Ok(Self::in_memory(stream)),
            StoreBackend::Postgres => {
                let store = Arc::new(PgChatStore::connect(stream.channel_capacity).await?);
                Ok(Self::new(store.clone(), store, stream))
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        .merge(whatsapp_routes())
        .merge(webbot_routes())
        .merge(root_routes())
        // Global middleware
        .layer(cors_layer(&config().security))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn whatsapp_routes() -> Router<AppState> {
    use handlers::whatsapp;

    Router::new()
        // Chat inbox snapshot and live push feed
        .route("/api/Whatsapp/data/:business_phone_number", get(whatsapp::data_get))
        .route("/api/Whatsapp/data/", get(whatsapp::missing_phone_number))
        .route("/api/Whatsapp/stream/:business_phone_number", get(whatsapp::stream_get))
        .route("/api/Whatsapp/stream/", get(whatsapp::missing_phone_number))
        // Per-chat response mode
        .route("/api/Whatsapp/get-response-mode", post(whatsapp::get_response_mode))
        .route("/api/Whatsapp/update-response-mode", post(whatsapp::update_response_mode))
        // Inbound message processing hook
        .route("/api/Whatsapp/record-exchange", post(whatsapp::record_exchange))
}

fn webbot_routes() -> Router<AppState> {
    use handlers::webbot;

    Router::new()
        .route("/api/webbot/create-user", post(webbot::create_user))
        .route("/api/webbot/fetch-user", post(webbot::fetch_user))
}

fn root_routes() -> Router<AppState> {
    use handlers::root;

    Router::new().route("/api/root/tenant", get(root::tenant_list))
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    if !security.enable_cors {
        return CorsLayer::new();
    }
    if security.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "WhatsApp Console API",
            "version": version,
            "description": "Multi-tenant chat inbox with live sync over server-sent events",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health",
                "data": "/api/Whatsapp/data/:businessPhoneNumber",
                "stream": "/api/Whatsapp/stream/:businessPhoneNumber (text/event-stream)",
                "response_mode": "/api/Whatsapp/get-response-mode, /api/Whatsapp/update-response-mode",
                "record_exchange": "/api/Whatsapp/record-exchange",
                "webbot": "/api/webbot/create-user, /api/webbot/fetch-user",
                "root": "/api/root/tenant",
            }
        }
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.chats.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
