mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use wa_console::sync::{ChatSync, HttpChatFeed, Subscription, SyncPhase, SyncState};

async fn wait_for<F>(subscription: &Subscription, pred: F) -> Result<SyncState>
where
    F: Fn(&SyncState) -> bool,
{
    let mut updates = subscription.watch();
    let state = tokio::time::timeout(Duration::from_secs(5), updates.wait_for(|state| pred(state)))
        .await
        .context("timed out waiting for sync state")??
        .clone();
    Ok(state)
}

#[tokio::test]
async fn client_follows_live_pushes() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let phone = common::unique_phone("sync");
    common::record_exchange(&client, server, &phone, "1", "before").await?;

    let sync = ChatSync::over_http(HttpChatFeed::new(&server.base_url)?);
    let subscription = sync.subscribe(&phone);

    let state = wait_for(&subscription, |s| !s.loading && s.phase == SyncPhase::LivePush).await?;
    assert_eq!(state.error, None);
    assert_eq!(state.data.len(), 1);

    common::record_exchange(&client, server, &phone, "2", "after").await?;
    let state = wait_for(&subscription, |s| s.data.len() == 2).await?;
    assert_eq!(state.phase, SyncPhase::LivePush);

    subscription.close().await;
    Ok(())
}

#[tokio::test]
async fn client_switches_tenants() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let first = common::unique_phone("s1");
    let second = common::unique_phone("s2");
    common::record_exchange(&client, server, &first, "a", "one").await?;
    common::record_exchange(&client, server, &second, "b", "two").await?;
    common::record_exchange(&client, server, &second, "c", "three").await?;

    let sync = ChatSync::over_http(HttpChatFeed::new(&server.base_url)?);
    let mut subscription = sync.subscribe(&first);
    wait_for(&subscription, |s| !s.loading && s.data.len() == 1).await?;

    subscription.change_tenant(&second).await;
    let state = wait_for(&subscription, |s| !s.loading && s.phase == SyncPhase::LivePush).await?;
    let mut ids: Vec<_> = state.data.iter().map(|chat| chat.wa_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["b", "c"]);

    // Changes to the old tenant no longer reach this view
    common::record_exchange(&client, server, &first, "z", "late").await?;
    common::record_exchange(&client, server, &second, "d", "four").await?;
    let state = wait_for(&subscription, |s| s.data.len() == 3).await?;
    assert!(state.data.iter().all(|chat| chat.wa_id != "z"));

    subscription.close().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_push_feed_falls_back_to_polling() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let phone = common::unique_phone("poll");

    let dead_port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let snapshots = Arc::new(HttpChatFeed::new(&server.base_url)?);
    let push = Arc::new(HttpChatFeed::new(&format!("http://127.0.0.1:{}", dead_port))?);
    let sync = ChatSync::new(snapshots, push).with_poll_interval(Duration::from_millis(200));

    let subscription = sync.subscribe(&phone);
    let state = wait_for(&subscription, |s| !s.loading && s.phase == SyncPhase::LivePoll).await?;
    assert!(state.data.is_empty());

    common::record_exchange(&client, server, &phone, "1", "polled").await?;
    let state = wait_for(&subscription, |s| s.data.len() == 1).await?;
    assert_eq!(state.phase, SyncPhase::LivePoll);

    subscription.close().await;
    Ok(())
}

#[tokio::test]
async fn empty_tenant_key_stays_loading() -> Result<()> {
    let server = common::ensure_server().await?;
    let sync = ChatSync::over_http(HttpChatFeed::new(&server.base_url)?);

    let subscription = sync.subscribe("");
    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = subscription.state();
    assert!(state.loading);
    assert!(state.data.is_empty());
    assert_eq!(state.phase, SyncPhase::Init);

    Ok(())
}
