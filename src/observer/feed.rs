use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A "chats changed" notification for one tenant.
///
/// Consumers re-read the full snapshot on every event, so the payload is
/// informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A chat document was written (payload is the `wa_id` when known)
    Changed { wa_id: Option<String> },
    /// The subscriber fell behind and missed notifications
    Lagged(u64),
}

struct TenantChannel {
    id: u64,
    sender: broadcast::Sender<ChangeEvent>,
    subscribers: usize,
    upstream: Option<JoinHandle<()>>,
}

struct FeedInner {
    channels: Mutex<HashMap<String, TenantChannel>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// Fan-out hub: at most one upstream change subscription per tenant, any
/// number of downstream subscribers. The upstream is released together with
/// the last subscriber.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                channels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, TenantChannel>> {
        // A poisoned map is still structurally valid
        self.inner.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a downstream subscriber for the tenant
    pub fn subscribe(&self, tenant: &str) -> ChangeSubscription {
        let mut channels = self.channels();
        let channel = channels.entry(tenant.to_string()).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.inner.capacity);
            TenantChannel {
                id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
                sender,
                subscribers: 0,
                upstream: None,
            }
        });
        channel.subscribers += 1;
        debug!("Change feed subscriber added for {} ({} active)", tenant, channel.subscribers);

        ChangeSubscription {
            tenant: tenant.to_string(),
            channel_id: channel.id,
            receiver: channel.sender.subscribe(),
            feed: self.clone(),
        }
    }

    /// True when the tenant has subscribers but nothing feeding them yet
    pub fn needs_upstream(&self, tenant: &str) -> bool {
        self.channels()
            .get(tenant)
            .map(|c| c.subscribers > 0 && c.upstream.is_none())
            .unwrap_or(false)
    }

    /// Attach the upstream task that publishes into this tenant's channel.
    /// Returns false (and aborts the task) if another upstream won the race
    /// or the subscribers already left.
    pub fn attach_upstream(&self, tenant: &str, handle: JoinHandle<()>) -> bool {
        let mut channels = self.channels();
        match channels.get_mut(tenant) {
            Some(channel) if channel.upstream.is_none() && channel.subscribers > 0 => {
                channel.upstream = Some(handle);
                info!("Change feed upstream attached for {}", tenant);
                true
            }
            _ => {
                handle.abort();
                false
            }
        }
    }

    /// Notify every subscriber of the tenant. Returns how many were reached.
    pub fn publish(&self, tenant: &str, event: ChangeEvent) -> usize {
        let channels = self.channels();
        match channels.get(tenant) {
            Some(channel) => channel.sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the tenant's channel; subscribers observe end-of-feed
    pub fn close_tenant(&self, tenant: &str) {
        if let Some(channel) = self.channels().remove(tenant) {
            if let Some(upstream) = channel.upstream {
                upstream.abort();
            }
            info!("Change feed closed for {}", tenant);
        }
    }

    pub fn subscriber_count(&self, tenant: &str) -> usize {
        self.channels().get(tenant).map(|c| c.subscribers).unwrap_or(0)
    }

    pub fn has_upstream(&self, tenant: &str) -> bool {
        self.channels()
            .get(tenant)
            .map(|c| c.upstream.is_some())
            .unwrap_or(false)
    }

    fn release(&self, tenant: &str, channel_id: u64) {
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(tenant) else {
            return;
        };
        // The channel may have been closed and recreated since this subscriber joined
        if channel.id != channel_id {
            return;
        }
        channel.subscribers = channel.subscribers.saturating_sub(1);
        debug!("Change feed subscriber released for {} ({} active)", tenant, channel.subscribers);

        if channel.subscribers == 0 {
            if let Some(channel) = channels.remove(tenant) {
                if let Some(upstream) = channel.upstream {
                    upstream.abort();
                    info!("Change feed upstream released for {}", tenant);
                }
            }
        }
    }
}

/// One downstream subscription. Dropping it unsubscribes.
pub struct ChangeSubscription {
    tenant: String,
    channel_id: u64,
    receiver: broadcast::Receiver<ChangeEvent>,
    feed: ChangeFeed,
}

impl ChangeSubscription {
    /// Wait for the next notification; `None` once the feed is closed
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(ChangeEvent::Lagged(missed)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.feed.release(&self.tenant, self.channel_id);
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("tenant", &self.tenant)
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let feed = ChangeFeed::new(8);
        let mut a = feed.subscribe("t1");
        let mut b = feed.subscribe("t1");
        let mut other = feed.subscribe("t2");

        let reached = feed.publish("t1", ChangeEvent::Changed { wa_id: Some("42".into()) });
        assert_eq!(reached, 2);

        assert_eq!(a.recv().await, Some(ChangeEvent::Changed { wa_id: Some("42".into()) }));
        assert_eq!(b.recv().await, Some(ChangeEvent::Changed { wa_id: Some("42".into()) }));
        let nothing = tokio::time::timeout(Duration::from_millis(20), other.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn last_subscriber_releases_upstream() {
        let feed = ChangeFeed::new(8);
        let first = feed.subscribe("t1");
        let second = feed.subscribe("t1");
        assert!(feed.needs_upstream("t1"));

        let upstream = tokio::spawn(std::future::pending::<()>());
        assert!(feed.attach_upstream("t1", upstream));
        assert!(!feed.needs_upstream("t1"));

        drop(first);
        assert_eq!(feed.subscriber_count("t1"), 1);
        assert!(feed.has_upstream("t1"));

        drop(second);
        assert_eq!(feed.subscriber_count("t1"), 0);
        assert!(!feed.has_upstream("t1"));
    }

    #[tokio::test]
    async fn second_upstream_is_rejected() {
        let feed = ChangeFeed::new(8);
        let _sub = feed.subscribe("t1");
        assert!(feed.attach_upstream("t1", tokio::spawn(std::future::pending::<()>())));

        let loser = tokio::spawn(std::future::pending::<()>());
        assert!(!feed.attach_upstream("t1", loser));
    }

    #[tokio::test]
    async fn closing_tenant_ends_subscriptions() {
        let feed = ChangeFeed::new(8);
        let mut stale = feed.subscribe("t1");
        feed.close_tenant("t1");
        assert_eq!(stale.recv().await, None);

        // A fresh channel for the same tenant is unaffected by the stale drop
        let _fresh = feed.subscribe("t1");
        drop(stale);
        assert_eq!(feed.subscriber_count("t1"), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_sees_lag() {
        let feed = ChangeFeed::new(1);
        let mut sub = feed.subscribe("t1");
        feed.publish("t1", ChangeEvent::Changed { wa_id: None });
        feed.publish("t1", ChangeEvent::Changed { wa_id: None });
        assert!(matches!(sub.recv().await, Some(ChangeEvent::Lagged(_))));
    }
}
