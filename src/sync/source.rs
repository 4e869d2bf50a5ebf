use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Chat;

/// Errors seen by the sync client
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Body of the snapshot endpoint: `{ success, data?, error? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Vec<Chat>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SnapshotEnvelope {
    pub fn ok(data: Vec<Chat>) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

/// One-shot fetch of the tenant's full chat list
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, tenant_key: &str) -> Result<SnapshotEnvelope, SyncError>;
}

/// Opens long-lived push channels
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn open(&self, tenant_key: &str) -> Result<Box<dyn PushChannel>, SyncError>;
}

/// A single open push channel delivering raw frame payloads
#[async_trait]
pub trait PushChannel: Send {
    /// Next frame payload; `Err` on transport failure, `None` once the server ends the stream
    async fn next_frame(&mut self) -> Option<Result<String, SyncError>>;

    /// Release the underlying connection
    async fn close(&mut self);
}
