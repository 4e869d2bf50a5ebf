// Chat and webbot user persistence behind backend-neutral traits

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::database::DatabaseError;
use crate::observer::ChangeSubscription;
use crate::services::TenantInfo;
use crate::types::{Chat, MessageExchange, ResponseMode};

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

/// Errors from store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Corrupt document for {wa_id}: {reason}")]
    Corrupt { wa_id: String, reason: String },

    #[error("Change feed error: {0}")]
    Feed(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Stored webbot onboarding form, keyed by the identity provider's user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebbotUser {
    #[serde(rename = "clerkId")]
    pub clerk_id: String,
    #[serde(rename = "formData")]
    pub form_data: Value,
}

/// Per-tenant chat collection with a change notification feed
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create the tenant's isolated store if needed (idempotent)
    async fn ensure_tenant(&self, phone_number: &str) -> Result<TenantInfo, StoreError>;

    async fn list_tenants(&self) -> Result<Vec<TenantInfo>, StoreError>;

    /// Full snapshot of every chat document for the tenant, ordered by `wa_id`
    async fn list_chats(&self, phone_number: &str) -> Result<Vec<Chat>, StoreError>;

    async fn find_chat(&self, phone_number: &str, wa_id: &str) -> Result<Option<Chat>, StoreError>;

    /// Returns false, touching nothing, when no chat has this `wa_id`
    async fn set_response_mode(
        &self,
        phone_number: &str,
        wa_id: &str,
        mode: ResponseMode,
    ) -> Result<bool, StoreError>;

    /// Append an exchange, creating the chat on first contact
    async fn record_exchange(
        &self,
        phone_number: &str,
        wa_id: &str,
        exchange: MessageExchange,
    ) -> Result<Chat, StoreError>;

    /// Subscribe to "chats changed" notifications for the tenant
    async fn subscribe(&self, phone_number: &str) -> Result<ChangeSubscription, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Returns the new record's id
    async fn insert_user(&self, user: WebbotUser) -> Result<String, StoreError>;

    /// First stored user with this clerk id
    async fn find_user(&self, clerk_id: &str) -> Result<Option<WebbotUser>, StoreError>;
}
