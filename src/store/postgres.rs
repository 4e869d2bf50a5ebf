use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{ChatStore, StoreError, UserStore, WebbotUser};
use crate::database::schema::{self, CHATS_CHANGED_CHANNEL};
use crate::database::DatabaseManager;
use crate::observer::{ChangeEvent, ChangeFeed, ChangeSubscription};
use crate::services::{TenantInfo, TenantService};
use crate::types::{Chat, MessageExchange, ResponseMode};

/// Postgres-backed store: one database per tenant holding a `chats` table
/// whose trigger feeds LISTEN/NOTIFY change notifications.
pub struct PgChatStore {
    main_pool: PgPool,
    feed: ChangeFeed,
    // Tenants whose database and schema were ensured by this process
    ensured: Mutex<HashSet<String>>,
}

impl PgChatStore {
    /// Connect to the system database, creating it and its tables if needed
    pub async fn connect(channel_capacity: usize) -> Result<Self, StoreError> {
        DatabaseManager::ensure_database(DatabaseManager::SYSTEM_DB_NAME).await?;
        let main_pool = DatabaseManager::main_pool().await?;
        schema::bootstrap_system(&main_pool).await?;
        info!("Chat store connected to {}", DatabaseManager::SYSTEM_DB_NAME);

        Ok(Self {
            main_pool,
            feed: ChangeFeed::new(channel_capacity),
            ensured: Mutex::new(HashSet::new()),
        })
    }

    /// Ensure the tenant and return its pool
    async fn tenant_pool(&self, phone_number: &str) -> Result<PgPool, StoreError> {
        let info = self.ensure_tenant(phone_number).await?;
        Ok(DatabaseManager::tenant_pool(&info.database).await?)
    }

    fn decode_chat(wa_id: &str, document: Value) -> Result<Chat, StoreError> {
        serde_json::from_value(document).map_err(|e| StoreError::Corrupt {
            wa_id: wa_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Forward NOTIFY payloads into the tenant's feed until the listener fails
    async fn forward_notifications(mut listener: PgListener, feed: ChangeFeed, tenant: String) {
        loop {
            match listener.recv().await {
                Ok(notification) => {
                    let wa_id = Some(notification.payload().to_string()).filter(|s| !s.is_empty());
                    feed.publish(&tenant, ChangeEvent::Changed { wa_id });
                }
                Err(e) => {
                    error!("Change listener for {} failed: {}", tenant, e);
                    // Subscribers see end-of-feed and their clients fall back to polling
                    feed.close_tenant(&tenant);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn ensure_tenant(&self, phone_number: &str) -> Result<TenantInfo, StoreError> {
        let phone_number = TenantService::validate_phone_number(phone_number)?;
        let database = TenantService::database_name(phone_number);

        // Serialize first-time setup; later calls only take the lock briefly
        let mut ensured = self.ensured.lock().await;
        if !ensured.contains(phone_number) {
            DatabaseManager::ensure_database(&database).await?;
            let pool = DatabaseManager::tenant_pool(&database).await?;
            schema::bootstrap_tenant(&pool).await?;

            sqlx::query(
                "INSERT INTO tenants (phone_number, database) VALUES ($1, $2) ON CONFLICT (phone_number) DO NOTHING",
            )
            .bind(phone_number)
            .bind(&database)
            .execute(&self.main_pool)
            .await?;

            ensured.insert(phone_number.to_string());
            info!("Tenant ensured: {} -> {}", phone_number, database);
        }
        drop(ensured);

        let row = sqlx::query("SELECT phone_number, database, created_at FROM tenants WHERE phone_number = $1")
            .bind(phone_number)
            .fetch_one(&self.main_pool)
            .await?;

        Ok(TenantInfo {
            phone_number: row.try_get("phone_number")?,
            database: row.try_get("database")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn list_tenants(&self) -> Result<Vec<TenantInfo>, StoreError> {
        let rows = sqlx::query("SELECT phone_number, database, created_at FROM tenants ORDER BY created_at")
            .fetch_all(&self.main_pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<TenantInfo, StoreError> {
                Ok(TenantInfo {
                    phone_number: row.try_get("phone_number")?,
                    database: row.try_get("database")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn list_chats(&self, phone_number: &str) -> Result<Vec<Chat>, StoreError> {
        let pool = self.tenant_pool(phone_number).await?;
        let rows: Vec<(String, Json<Value>)> =
            sqlx::query_as("SELECT wa_id, document FROM chats ORDER BY wa_id")
                .fetch_all(&pool)
                .await?;

        rows.into_iter()
            .map(|(wa_id, Json(document))| Self::decode_chat(&wa_id, document))
            .collect()
    }

    async fn find_chat(&self, phone_number: &str, wa_id: &str) -> Result<Option<Chat>, StoreError> {
        let pool = self.tenant_pool(phone_number).await?;
        let document: Option<Json<Value>> =
            sqlx::query_scalar("SELECT document FROM chats WHERE wa_id = $1")
                .bind(wa_id)
                .fetch_optional(&pool)
                .await?;

        document
            .map(|Json(document)| Self::decode_chat(wa_id, document))
            .transpose()
    }

    async fn set_response_mode(
        &self,
        phone_number: &str,
        wa_id: &str,
        mode: ResponseMode,
    ) -> Result<bool, StoreError> {
        let pool = self.tenant_pool(phone_number).await?;
        let result = sqlx::query(
            r#"
            UPDATE chats
            SET document = jsonb_set(document, '{responseMode}', to_jsonb($2::text)),
                updated_at = now()
            WHERE wa_id = $1
            "#,
        )
        .bind(wa_id)
        .bind(mode.as_str())
        .execute(&pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_exchange(
        &self,
        phone_number: &str,
        wa_id: &str,
        exchange: MessageExchange,
    ) -> Result<Chat, StoreError> {
        let pool = self.tenant_pool(phone_number).await?;

        let mut fresh = Chat::new(wa_id);
        fresh.messages.push(exchange.clone());
        let fresh = serde_json::to_value(&fresh).map_err(|e| StoreError::Query(e.to_string()))?;
        let exchange = serde_json::to_value(&exchange).map_err(|e| StoreError::Query(e.to_string()))?;

        let Json(document): Json<Value> = sqlx::query_scalar(
            r#"
            INSERT INTO chats (wa_id, document) VALUES ($1, $2)
            ON CONFLICT (wa_id) DO UPDATE
            SET document = jsonb_set(
                    chats.document,
                    '{messages}',
                    COALESCE(chats.document->'messages', '[]'::jsonb) || jsonb_build_array($3::jsonb)
                ),
                updated_at = now()
            RETURNING document
            "#,
        )
        .bind(wa_id)
        .bind(Json(fresh))
        .bind(Json(exchange))
        .fetch_one(&pool)
        .await?;

        Self::decode_chat(wa_id, document)
    }

    async fn subscribe(&self, phone_number: &str) -> Result<ChangeSubscription, StoreError> {
        let info = self.ensure_tenant(phone_number).await?;
        let tenant = info.phone_number;

        let subscription = self.feed.subscribe(&tenant);
        if self.feed.needs_upstream(&tenant) {
            // On failure the subscription drops and releases its slot
            let mut listener = DatabaseManager::tenant_listener(&info.database).await?;
            listener
                .listen(CHATS_CHANGED_CHANNEL)
                .await
                .map_err(|e| StoreError::Feed(e.to_string()))?;

            let handle = tokio::spawn(Self::forward_notifications(
                listener,
                self.feed.clone(),
                tenant.clone(),
            ));
            if !self.feed.attach_upstream(&tenant, handle) {
                warn!("Discarded duplicate change listener for {}", tenant);
            }
        }

        Ok(subscription)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        DatabaseManager::health_check()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl UserStore for PgChatStore {
    async fn insert_user(&self, user: WebbotUser) -> Result<String, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO webbot_users (clerk_id, form_data) VALUES ($1, $2) RETURNING id",
        )
        .bind(&user.clerk_id)
        .bind(Json(&user.form_data))
        .fetch_one(&self.main_pool)
        .await?;

        Ok(id.to_string())
    }

    async fn find_user(&self, clerk_id: &str) -> Result<Option<WebbotUser>, StoreError> {
        let form_data: Option<Json<Value>> = sqlx::query_scalar(
            "SELECT form_data FROM webbot_users WHERE clerk_id = $1 ORDER BY id LIMIT 1",
        )
        .bind(clerk_id)
        .fetch_optional(&self.main_pool)
        .await?;

        Ok(form_data.map(|Json(form_data)| WebbotUser {
            clerk_id: clerk_id.to_string(),
            form_data,
        }))
    }
}
