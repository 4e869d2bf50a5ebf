//! Live chat sync client.
//!
//! Keeps a read-only view of a tenant's chat list fresh: an initial snapshot
//! fetch, then full-snapshot frames from the push feed, degrading to fixed
//! interval polling once push delivery fails.
//!
//! ```text
//! Init -> FetchingInitial -> LivePush -> LivePoll -> TornDown
//! ```
//!
//! There is no promotion from `LivePoll` back to `LivePush`; a degraded
//! subscription stays on polling until it is recreated.

pub mod http;
pub mod source;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::types::Chat;

pub use http::HttpChatFeed;
pub use source::{PushChannel, PushSource, SnapshotEnvelope, SnapshotSource, SyncError};
pub use sse::{SseDecoder, SseFrame};

/// Fallback polling interval of the generic provider
pub const GENERIC_POLL_INTERVAL: Duration = Duration::from_millis(6000);

/// Fallback polling interval used by the chat list view
pub const CHAT_LIST_POLL_INTERVAL: Duration = Duration::from_millis(10000);

type OpenFuture<'a> = BoxFuture<'a, Result<Box<dyn PushChannel>, SyncError>>;

const FETCH_FAILED: &str = "Failed to fetch data";
const UNKNOWN_ERROR: &str = "Unknown error occurred";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No tenant key yet
    Init,
    FetchingInitial,
    LivePush,
    LivePoll,
    TornDown,
}

/// What consumers see. `data` is always the last applied full snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub data: Vec<Chat>,
    pub loading: bool,
    pub error: Option<String>,
    pub phase: SyncPhase,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            loading: true,
            error: None,
            phase: SyncPhase::Init,
        }
    }
}

/// Factory for subscriptions against one snapshot/push source pair
#[derive(Clone)]
pub struct ChatSync {
    snapshots: Arc<dyn SnapshotSource>,
    push: Arc<dyn PushSource>,
    poll_interval: Duration,
}

impl ChatSync {
    /// Generic provider defaults (6s fallback polling)
    pub fn new(snapshots: Arc<dyn SnapshotSource>, push: Arc<dyn PushSource>) -> Self {
        Self {
            snapshots,
            push,
            poll_interval: GENERIC_POLL_INTERVAL,
        }
    }

    /// Chat list defaults (10s fallback polling)
    pub fn for_chat_list(snapshots: Arc<dyn SnapshotSource>, push: Arc<dyn PushSource>) -> Self {
        Self::new(snapshots, push).with_poll_interval(CHAT_LIST_POLL_INTERVAL)
    }

    /// Both endpoints from one HTTP feed
    pub fn over_http(feed: HttpChatFeed) -> Self {
        let feed = Arc::new(feed);
        Self::new(feed.clone(), feed)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Start syncing `tenant_key`. An empty key starts nothing and leaves
    /// `loading` set indefinitely.
    pub fn subscribe(&self, tenant_key: &str) -> Subscription {
        let (state_tx, state_rx) = watch::channel(SyncState::default());
        let mut subscription = Subscription {
            sync: self.clone(),
            tenant_key: tenant_key.to_string(),
            state_tx: Arc::new(state_tx),
            state_rx,
            driver: None,
        };
        subscription.start();
        subscription
    }
}

struct Driver {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

/// A live view of one tenant's chats. Dropping it tears the sync down.
pub struct Subscription {
    sync: ChatSync,
    tenant_key: String,
    state_tx: Arc<watch::Sender<SyncState>>,
    state_rx: watch::Receiver<SyncState>,
    driver: Option<Driver>,
}

impl Subscription {
    pub fn tenant_key(&self) -> &str {
        &self.tenant_key
    }

    /// Current state snapshot
    pub fn state(&self) -> SyncState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    /// True while a driver task owns a push channel or poll timer
    pub fn is_active(&self) -> bool {
        self.driver.as_ref().map(|d| !d.handle.is_finished()).unwrap_or(false)
    }

    /// Switch tenants: the old channel and timer are fully released before
    /// the new subscription starts, and the view resets to its initial state.
    pub async fn change_tenant(&mut self, tenant_key: &str) {
        if tenant_key == self.tenant_key {
            return;
        }
        self.teardown().await;
        self.tenant_key = tenant_key.to_string();
        self.state_tx.send_replace(SyncState::default());
        self.start();
    }

    /// Tear down and wait until the push channel is closed and the timer cancelled
    pub async fn close(mut self) {
        self.teardown().await;
    }

    fn start(&mut self) {
        if self.tenant_key.is_empty() {
            debug!("No tenant key; sync not started");
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ctx = DriverContext {
            tenant_key: self.tenant_key.clone(),
            snapshots: self.sync.snapshots.clone(),
            push: self.sync.push.clone(),
            poll_interval: self.sync.poll_interval,
            state: self.state_tx.clone(),
        };
        let handle = tokio::spawn(ctx.run(shutdown_rx));
        self.driver = Some(Driver {
            shutdown: Some(shutdown_tx),
            handle,
        });
    }

    async fn teardown(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            if let Some(shutdown) = driver.shutdown.take() {
                let _ = shutdown.send(());
            }
            if let Err(e) = driver.handle.await {
                error!("Sync driver for {} ended abnormally: {}", self.tenant_key, e);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The driver closes its channel and timer once it sees the signal
        if let Some(driver) = self.driver.as_mut() {
            if let Some(shutdown) = driver.shutdown.take() {
                let _ = shutdown.send(());
            }
        }
    }
}

struct DriverContext {
    tenant_key: String,
    snapshots: Arc<dyn SnapshotSource>,
    push: Arc<dyn PushSource>,
    poll_interval: Duration,
    state: Arc<watch::Sender<SyncState>>,
}

impl DriverContext {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let tenant = self.tenant_key.as_str();
        info!(tenant, "Chat sync started");
        self.set_phase(SyncPhase::FetchingInitial);

        // Initial fetch and push channel open race; whichever snapshot lands last wins
        let initial = self.snapshots.fetch_snapshot(tenant);
        tokio::pin!(initial);
        let mut initial_pending = true;

        let mut opening: Option<OpenFuture<'_>> = Some(self.push.open(tenant));
        let mut channel: Option<Box<dyn PushChannel>> = None;
        let mut poll: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                outcome = &mut initial, if initial_pending => {
                    initial_pending = false;
                    self.apply_fetch(outcome);
                }

                opened = open_channel(&mut opening), if opening.is_some() => {
                    opening = None;
                    match opened {
                        Ok(opened) => {
                            debug!(tenant, "Push channel open");
                            channel = Some(opened);
                        }
                        Err(e) => {
                            error!(tenant, "Push channel failed to open: {}", e);
                            self.start_polling(&mut poll);
                        }
                    }
                }

                frame = next_frame(&mut channel), if channel.is_some() => match frame {
                    Some(Ok(payload)) => self.apply_frame(&payload),
                    Some(Err(e)) => {
                        error!(tenant, "Push channel error: {}", e);
                        close_channel(&mut channel).await;
                        self.start_polling(&mut poll);
                    }
                    None => {
                        warn!(tenant, "Push channel ended by server");
                        close_channel(&mut channel).await;
                        self.start_polling(&mut poll);
                    }
                },

                _ = tick(&mut poll), if poll.is_some() => {
                    // A teardown during the fetch discards its result
                    let stopped = tokio::select! {
                        biased;
                        _ = &mut shutdown => true,
                        outcome = self.snapshots.fetch_snapshot(tenant) => {
                            self.apply_fetch(outcome);
                            false
                        }
                    };
                    if stopped {
                        break;
                    }
                }
            }

            self.refresh_phase(initial_pending, poll.is_some());
        }

        close_channel(&mut channel).await;
        drop(poll);
        self.set_phase(SyncPhase::TornDown);
        info!(tenant, "Chat sync torn down");
    }

    /// Begin fallback polling; a second call never adds a second timer
    fn start_polling(&self, poll: &mut Option<Interval>) {
        if poll.is_some() {
            return;
        }
        let mut timer = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        *poll = Some(timer);
        info!(
            tenant = %self.tenant_key,
            interval_ms = self.poll_interval.as_millis() as u64,
            "Falling back to polling"
        );
    }

    fn apply_fetch(&self, outcome: Result<SnapshotEnvelope, SyncError>) {
        self.state.send_modify(|state| {
            match outcome {
                Ok(envelope) if envelope.success => {
                    state.data = envelope.data.unwrap_or_default();
                }
                Ok(envelope) => {
                    state.error = Some(envelope.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()));
                }
                Err(e) => {
                    error!(tenant = %self.tenant_key, "Error fetching data: {}", e);
                    state.error = Some(FETCH_FAILED.to_string());
                }
            }
            state.loading = false;
        });
    }

    /// Only a JSON array of chats replaces the view; anything else is dropped
    fn apply_frame(&self, payload: &str) {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(tenant = %self.tenant_key, "Error parsing push frame: {}", e);
                return;
            }
        };
        if !value.is_array() {
            debug!(tenant = %self.tenant_key, "Ignoring non-snapshot push frame: {}", payload);
            return;
        }
        match serde_json::from_value::<Vec<Chat>>(value) {
            Ok(chats) => self.state.send_modify(|state| state.data = chats),
            Err(e) => warn!(tenant = %self.tenant_key, "Push frame is not a chat list: {}", e),
        }
    }

    fn refresh_phase(&self, initial_pending: bool, polling: bool) {
        let phase = if initial_pending {
            SyncPhase::FetchingInitial
        } else if polling {
            SyncPhase::LivePoll
        } else {
            SyncPhase::LivePush
        };
        self.set_phase(phase);
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.state.send_if_modified(|state| {
            if state.phase == phase {
                return false;
            }
            state.phase = phase;
            true
        });
    }
}

async fn open_channel(opening: &mut Option<OpenFuture<'_>>) -> Result<Box<dyn PushChannel>, SyncError> {
    match opening.as_mut() {
        Some(open) => open.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(channel: &mut Option<Box<dyn PushChannel>>) -> Option<Result<String, SyncError>> {
    match channel.as_mut() {
        Some(channel) => channel.next_frame().await,
        None => std::future::pending().await,
    }
}

async fn tick(poll: &mut Option<Interval>) {
    match poll.as_mut() {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn close_channel(channel: &mut Option<Box<dyn PushChannel>>) {
    if let Some(mut open) = channel.take() {
        open.close().await;
    }
}
