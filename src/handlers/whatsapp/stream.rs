// handlers/whatsapp/stream.rs - GET /api/Whatsapp/stream/:business_phone_number handler

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::observer::{ChangeEvent, ChangeSubscription};
use crate::store::{ChatStore, StoreError};

use super::require_phone_number;

/// Error payload sent in-band once the stream is open
const UPDATE_ERROR: &str = "Error processing update";

/// Per-connection push state. Dropping it (client disconnect) releases the
/// change subscription; the keep-alive timer lives in the `Sse` wrapper and
/// goes with it.
struct PushFeed {
    connection: Uuid,
    tenant: String,
    store: Arc<dyn ChatStore>,
    subscription: ChangeSubscription,
    initial_sent: bool,
}

impl Drop for PushFeed {
    fn drop(&mut self) {
        info!(connection = %self.connection, tenant = %self.tenant, "Push feed closed");
    }
}

/**
 * GET /api/Whatsapp/stream/:business_phone_number - Live chat snapshots as server-sent events
 *
 * Frames:
 * - `data: [<chat>, ...]` once on connect, then after every change notification
 * - `data: {"error":"Error processing update"}` when a snapshot cannot be produced
 * - `: keep-alive` comment every keep-alive interval (30s by default)
 *
 * Errors before the stream opens are plain JSON with 400/500 status.
 */
pub async fn get(
    State(state): State<AppState>,
    Path(business_phone_number): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let tenant = require_phone_number(&business_phone_number)?.to_string();

    let subscription = state.chats.subscribe(&tenant).await.map_err(|e| match e {
        StoreError::InvalidTenant(msg) => ApiError::bad_request(msg),
        other => {
            error!("Error in stream API for {}: {}", tenant, other);
            ApiError::internal_server_error("Failed to set up change stream")
        }
    })?;

    let feed = PushFeed {
        connection: Uuid::new_v4(),
        tenant,
        store: state.chats.clone(),
        subscription,
        initial_sent: false,
    };
    info!(connection = %feed.connection, tenant = %feed.tenant, "Push feed opened");

    let events = stream::unfold(feed, |mut feed| async move {
        if feed.initial_sent {
            // None: the change feed closed underneath us, end the response
            match feed.subscription.recv().await? {
                ChangeEvent::Changed { wa_id } => {
                    debug!(connection = %feed.connection, ?wa_id, "Chats changed");
                }
                ChangeEvent::Lagged(missed) => {
                    debug!(connection = %feed.connection, missed, "Push feed lagged; resending snapshot");
                }
            }
        } else {
            feed.initial_sent = true;
        }

        let event = snapshot_event(feed.store.as_ref(), &feed.tenant).await;
        Some((Ok(event), feed))
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(state.stream.keep_alive_interval())
            .text("keep-alive"),
    ))
}

/// Full snapshot as one `data:` frame, or the in-band error frame
async fn snapshot_event(store: &dyn ChatStore, tenant: &str) -> Event {
    let payload = match store.list_chats(tenant).await {
        Ok(chats) => serde_json::to_string(&chats).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match payload {
        Ok(json) => Event::default().data(json),
        Err(reason) => {
            error!("Error processing change stream update for {}: {}", tenant, reason);
            Event::default().data(json!({ "error": UPDATE_ERROR }).to_string())
        }
    }
}
