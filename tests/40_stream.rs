mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use wa_console::app::AppState;
use wa_console::observer::ChangeSubscription;
use wa_console::services::TenantInfo;
use wa_console::store::{ChatStore, MemoryChatStore, StoreError};
use wa_console::types::{Chat, MessageExchange, ResponseMode};

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

fn wa_ids(frame: &Value) -> Vec<String> {
    let mut ids: Vec<String> = frame
        .as_array()
        .map(|chats| chats.iter().filter_map(|c| c["wa_id"].as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    ids.sort();
    ids
}

#[tokio::test]
async fn stream_sends_snapshot_then_updates() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let phone = common::unique_phone("sse");
    common::record_exchange(&client, server, &phone, "1", "first").await?;

    let mut stream =
        common::StreamReader::open(&client, &server.url(&format!("/api/Whatsapp/stream/{}", phone))).await?;
    assert!(
        stream.content_type.as_deref().unwrap_or_default().starts_with("text/event-stream"),
        "unexpected content type {:?}",
        stream.content_type
    );

    let initial = stream.next_json(FRAME_TIMEOUT).await?;
    assert_eq!(wa_ids(&initial), vec!["1"]);

    common::record_exchange(&client, server, &phone, "2", "second").await?;
    let update = stream.next_json(FRAME_TIMEOUT).await?;
    assert_eq!(wa_ids(&update), vec!["1", "2"]);

    // Mode changes are pushed as full snapshots too
    common::post_json(
        &client,
        &server.url("/api/Whatsapp/update-response-mode"),
        json!({ "waId": "1", "responseMode": "manual", "businessPhoneNumber": phone }),
    )
    .await?;
    let update = stream.next_json(FRAME_TIMEOUT).await?;
    let chat = update
        .as_array()
        .and_then(|chats| chats.iter().find(|c| c["wa_id"] == "1"))
        .cloned()
        .unwrap_or(Value::Null);
    assert_eq!(chat["responseMode"], "manual");

    Ok(())
}

#[tokio::test]
async fn every_subscriber_gets_each_change() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let phone = common::unique_phone("fan");
    let url = server.url(&format!("/api/Whatsapp/stream/{}", phone));

    let mut first = common::StreamReader::open(&client, &url).await?;
    let mut second = common::StreamReader::open(&client, &url).await?;
    assert_eq!(first.next_json(FRAME_TIMEOUT).await?, json!([]));
    assert_eq!(second.next_json(FRAME_TIMEOUT).await?, json!([]));

    common::record_exchange(&client, server, &phone, "7", "hi").await?;
    assert_eq!(wa_ids(&first.next_json(FRAME_TIMEOUT).await?), vec!["7"]);
    assert_eq!(wa_ids(&second.next_json(FRAME_TIMEOUT).await?), vec!["7"]);

    Ok(())
}

#[tokio::test]
async fn other_tenants_changes_are_not_pushed() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let watched = common::unique_phone("w");
    let other = common::unique_phone("o");

    let mut stream =
        common::StreamReader::open(&client, &server.url(&format!("/api/Whatsapp/stream/{}", watched))).await?;
    assert_eq!(stream.next_json(FRAME_TIMEOUT).await?, json!([]));

    common::record_exchange(&client, server, &other, "1", "elsewhere").await?;
    common::record_exchange(&client, server, &watched, "2", "here").await?;

    // The first frame after the initial one is this tenant's change
    assert_eq!(wa_ids(&stream.next_json(FRAME_TIMEOUT).await?), vec!["2"]);

    Ok(())
}

/// Memory store whose snapshot reads can be made to fail
struct FlakyStore {
    inner: MemoryChatStore,
    failing: AtomicBool,
}

#[async_trait]
impl ChatStore for FlakyStore {
    async fn ensure_tenant(&self, phone_number: &str) -> Result<TenantInfo, StoreError> {
        self.inner.ensure_tenant(phone_number).await
    }

    async fn list_tenants(&self) -> Result<Vec<TenantInfo>, StoreError> {
        self.inner.list_tenants().await
    }

    async fn list_chats(&self, phone_number: &str) -> Result<Vec<Chat>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.list_chats(phone_number).await
    }

    async fn find_chat(&self, phone_number: &str, wa_id: &str) -> Result<Option<Chat>, StoreError> {
        self.inner.find_chat(phone_number, wa_id).await
    }

    async fn set_response_mode(
        &self,
        phone_number: &str,
        wa_id: &str,
        mode: ResponseMode,
    ) -> Result<bool, StoreError> {
        self.inner.set_response_mode(phone_number, wa_id, mode).await
    }

    async fn record_exchange(
        &self,
        phone_number: &str,
        wa_id: &str,
        exchange: MessageExchange,
    ) -> Result<Chat, StoreError> {
        self.inner.record_exchange(phone_number, wa_id, exchange).await
    }

    async fn subscribe(&self, phone_number: &str) -> Result<ChangeSubscription, StoreError> {
        self.inner.subscribe(phone_number).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn snapshot_failures_become_error_frames() -> Result<()> {
    let store = Arc::new(FlakyStore {
        inner: MemoryChatStore::new(16),
        failing: AtomicBool::new(false),
    });
    let users = Arc::new(MemoryChatStore::new(16));
    let server = common::spawn_server(AppState::new(store.clone(), users, common::test_stream_config())).await?;
    let client = reqwest::Client::new();
    let phone = "+15550007777";

    let mut stream =
        common::StreamReader::open(&client, &server.url(&format!("/api/Whatsapp/stream/{}", phone))).await?;
    assert_eq!(stream.next_json(FRAME_TIMEOUT).await?, json!([]));

    store.failing.store(true, Ordering::SeqCst);
    common::record_exchange(&client, &server, phone, "1", "hi").await?;
    assert_eq!(
        stream.next_json(FRAME_TIMEOUT).await?,
        json!({ "error": "Error processing update" })
    );

    // The stream stays open and recovers on the next change
    store.failing.store(false, Ordering::SeqCst);
    common::record_exchange(&client, &server, phone, "2", "again").await?;
    assert_eq!(wa_ids(&stream.next_json(FRAME_TIMEOUT).await?), vec!["1", "2"]);

    // The one-shot snapshot reports the failure as a 500
    store.failing.store(true, Ordering::SeqCst);
    let res = client.get(server.url(&format!("/api/Whatsapp/data/{}", phone))).send().await?;
    assert_eq!(res.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body = res.json::<Value>().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Failed to fetch data.");

    Ok(())
}

#[tokio::test]
async fn idle_stream_keeps_alive_and_disconnect_releases_subscription() -> Result<()> {
    let store = Arc::new(MemoryChatStore::new(16));
    let state = AppState::new(store.clone(), store.clone(), common::test_stream_config());
    let server = common::spawn_server(state).await?;
    let client = reqwest::Client::new();
    let phone = "+15550008888";

    let res = client
        .get(server.url(&format!("/api/Whatsapp/stream/{}", phone)))
        .header("accept", "text/event-stream")
        .send()
        .await?;
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    assert_eq!(
        res.headers().get(reqwest::header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );
    assert_eq!(store.feed().subscriber_count(phone), 1);

    // Initial snapshot, then a keep-alive comment once the feed goes idle
    let mut body = res.bytes_stream();
    let mut raw = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !raw.contains(": keep-alive\n\n") {
            match body.next().await {
                Some(Ok(chunk)) => raw.push_str(&String::from_utf8_lossy(&chunk)),
                _ => break,
            }
        }
    })
    .await?;
    assert!(raw.starts_with("data: []\n\n: keep-alive\n\n"), "unexpected stream body {:?}", raw);
    assert_eq!(store.feed().subscriber_count(phone), 1);

    drop(body);

    // The next keep-alive write fails and the server drops the feed
    let released = tokio::time::timeout(Duration::from_secs(5), async {
        while store.feed().subscriber_count(phone) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "subscription still held after disconnect");
    assert_eq!(store.feed().subscriber_count(phone), 0);

    Ok(())
}
