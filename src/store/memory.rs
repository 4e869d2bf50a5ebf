use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ChatStore, StoreError, UserStore, WebbotUser};
use crate::observer::{ChangeEvent, ChangeFeed, ChangeSubscription};
use crate::services::{TenantInfo, TenantService};
use crate::types::{Chat, MessageExchange, ResponseMode};

struct MemoryTenant {
    info: TenantInfo,
    chats: BTreeMap<String, Chat>,
}

/// Process-local store used by tests and `STORE_BACKEND=memory` dev mode.
/// Writes publish straight into the change feed.
pub struct MemoryChatStore {
    tenants: RwLock<BTreeMap<String, MemoryTenant>>,
    users: RwLock<Vec<WebbotUser>>,
    feed: ChangeFeed,
}

impl MemoryChatStore {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            tenants: RwLock::new(BTreeMap::new()),
            users: RwLock::new(Vec::new()),
            feed: ChangeFeed::new(channel_capacity),
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Insert or replace a whole chat document (seeding and fixtures)
    pub async fn put_chat(&self, phone_number: &str, chat: Chat) -> Result<(), StoreError> {
        let phone_number = TenantService::validate_phone_number(phone_number)?;
        let wa_id = chat.wa_id.clone();
        {
            let mut tenants = self.tenants.write().await;
            let tenant = Self::tenant_entry(&mut tenants, phone_number);
            tenant.chats.insert(wa_id.clone(), chat);
        }
        self.notify(phone_number, wa_id);
        Ok(())
    }

    fn tenant_entry<'a>(
        tenants: &'a mut BTreeMap<String, MemoryTenant>,
        phone_number: &str,
    ) -> &'a mut MemoryTenant {
        tenants
            .entry(phone_number.to_string())
            .or_insert_with(|| MemoryTenant {
                info: TenantInfo::new(phone_number),
                chats: BTreeMap::new(),
            })
    }

    fn notify(&self, phone_number: &str, wa_id: String) {
        let reached = self.feed.publish(phone_number, ChangeEvent::Changed { wa_id: Some(wa_id) });
        debug!("Change published for {} to {} subscribers", phone_number, reached);
    }
}

impl Default for MemoryChatStore {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn ensure_tenant(&self, phone_number: &str) -> Result<TenantInfo, StoreError> {
        let phone_number = TenantService::validate_phone_number(phone_number)?;
        let mut tenants = self.tenants.write().await;
        Ok(Self::tenant_entry(&mut tenants, phone_number).info.clone())
    }

    async fn list_tenants(&self) -> Result<Vec<TenantInfo>, StoreError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.values().map(|t| t.info.clone()).collect())
    }

    async fn list_chats(&self, phone_number: &str) -> Result<Vec<Chat>, StoreError> {
        let phone_number = TenantService::validate_phone_number(phone_number)?;
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(phone_number)
            .map(|t| t.chats.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_chat(&self, phone_number: &str, wa_id: &str) -> Result<Option<Chat>, StoreError> {
        let phone_number = TenantService::validate_phone_number(phone_number)?;
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(phone_number)
            .and_then(|t| t.chats.get(wa_id))
            .cloned())
    }

    async fn set_response_mode(
        &self,
        phone_number: &str,
        wa_id: &str,
        mode: ResponseMode,
    ) -> Result<bool, StoreError> {
        let phone_number = TenantService::validate_phone_number(phone_number)?;
        {
            let mut tenants = self.tenants.write().await;
            let Some(chat) = tenants
                .get_mut(phone_number)
                .and_then(|t| t.chats.get_mut(wa_id))
            else {
                return Ok(false);
            };
            chat.set_response_mode(mode);
        }
        self.notify(phone_number, wa_id.to_string());
        Ok(true)
    }

    async fn record_exchange(
        &self,
        phone_number: &str,
        wa_id: &str,
        exchange: MessageExchange,
    ) -> Result<Chat, StoreError> {
        let phone_number = TenantService::validate_phone_number(phone_number)?;
        let chat = {
            let mut tenants = self.tenants.write().await;
            let tenant = Self::tenant_entry(&mut tenants, phone_number);
            let chat = tenant
                .chats
                .entry(wa_id.to_string())
                .or_insert_with(|| Chat::new(wa_id));
            chat.messages.push(exchange);
            chat.clone()
        };
        self.notify(phone_number, wa_id.to_string());
        Ok(chat)
    }

    async fn subscribe(&self, phone_number: &str) -> Result<ChangeSubscription, StoreError> {
        let phone_number = TenantService::validate_phone_number(phone_number)?;
        Ok(self.feed.subscribe(phone_number))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryChatStore {
    async fn insert_user(&self, user: WebbotUser) -> Result<String, StoreError> {
        let mut users = self.users.write().await;
        users.push(user);
        Ok(users.len().to_string())
    }

    async fn find_user(&self, clerk_id: &str) -> Result<Option<WebbotUser>, StoreError> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.clerk_id == clerk_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessagePart;
    use serde_json::json;

    const TENANT: &str = "+15550001111";

    fn exchange(text: &str) -> MessageExchange {
        MessageExchange {
            user: MessagePart::now(text),
            response: MessagePart::now(format!("re: {}", text)),
        }
    }

    #[tokio::test]
    async fn unknown_tenant_has_empty_snapshot() {
        let store = MemoryChatStore::default();
        assert!(store.list_chats(TENANT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_exchange_creates_then_appends() {
        let store = MemoryChatStore::default();
        store.record_exchange(TENANT, "123", exchange("hi")).await.unwrap();
        let chat = store.record_exchange(TENANT, "123", exchange("again")).await.unwrap();
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.last_exchange().unwrap().user.message, "again");
        assert_eq!(store.list_chats(TENANT).await.unwrap().len(), 1);
        assert_eq!(store.list_tenants().await.unwrap()[0].phone_number, TENANT);
    }

    #[tokio::test]
    async fn unknown_wa_id_is_not_mutated() {
        let store = MemoryChatStore::default();
        store.record_exchange(TENANT, "123", exchange("hi")).await.unwrap();
        let before = store.list_chats(TENANT).await.unwrap();

        let mut sub = store.subscribe(TENANT).await.unwrap();
        let updated = store.set_response_mode(TENANT, "999", ResponseMode::Manual).await.unwrap();
        assert!(!updated);
        assert_eq!(store.list_chats(TENANT).await.unwrap(), before);

        // No change notification either
        let quiet = tokio::time::timeout(std::time::Duration::from_millis(20), sub.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn writes_notify_subscribers() {
        let store = MemoryChatStore::default();
        let mut sub = store.subscribe(TENANT).await.unwrap();
        store.record_exchange(TENANT, "123", exchange("hi")).await.unwrap();
        assert_eq!(sub.recv().await, Some(ChangeEvent::Changed { wa_id: Some("123".into()) }));

        store.set_response_mode(TENANT, "123", ResponseMode::Manual).await.unwrap();
        assert!(sub.recv().await.is_some());
        let chat = store.find_chat(TENANT, "123").await.unwrap().unwrap();
        assert_eq!(chat.response_mode(), ResponseMode::Manual);
    }

    #[tokio::test]
    async fn users_are_found_by_clerk_id() {
        let store = MemoryChatStore::default();
        store
            .insert_user(WebbotUser { clerk_id: "user_1".into(), form_data: json!({ "a": 1 }) })
            .await
            .unwrap();
        let found = store.find_user("user_1").await.unwrap().unwrap();
        assert_eq!(found.form_data["a"], 1);
        assert!(store.find_user("user_2").await.unwrap().is_none());
    }
}
