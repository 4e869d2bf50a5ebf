use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::source::{PushChannel, PushSource, SnapshotEnvelope, SnapshotSource, SyncError};
use super::sse::SseDecoder;

/// Snapshot and push endpoints of a running console API
#[derive(Debug, Clone)]
pub struct HttpChatFeed {
    client: Client,
    base_url: Url,
}

impl HttpChatFeed {
    pub fn new(base_url: &str) -> Result<Self, SyncError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url).map_err(|e| SyncError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { client, base_url })
    }

    /// `<base>/api/Whatsapp/<kind>/<tenant>` with the tenant percent-encoded
    fn endpoint(&self, kind: &str, tenant_key: &str) -> Result<Url, SyncError> {
        self.api_url(&["Whatsapp", kind, tenant_key])
    }

    /// `<base>/api/<segments...>`, each segment percent-encoded
    pub fn api_url(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl SnapshotSource for HttpChatFeed {
    async fn fetch_snapshot(&self, tenant_key: &str) -> Result<SnapshotEnvelope, SyncError> {
        let url = self.endpoint("data", tenant_key)?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::Status(response.status().as_u16()));
        }
        Ok(response.json::<SnapshotEnvelope>().await?)
    }
}

#[async_trait]
impl PushSource for HttpChatFeed {
    async fn open(&self, tenant_key: &str) -> Result<Box<dyn PushChannel>, SyncError> {
        let url = self.endpoint("stream", tenant_key)?;
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SyncError::Status(response.status().as_u16()));
        }
        debug!("Push channel opened: {}", url);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Ok(Box::new(HttpPushChannel {
            body: Some(body),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        }))
    }
}

struct HttpPushChannel {
    body: Option<BoxStream<'static, Result<Vec<u8>, reqwest::Error>>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
}

#[async_trait]
impl PushChannel for HttpPushChannel {
    async fn next_frame(&mut self) -> Option<Result<String, SyncError>> {
        loop {
            if let Some(data) = self.pending.pop_front() {
                return Some(Ok(data));
            }
            let body = self.body.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => {
                    self.pending
                        .extend(self.decoder.push(&chunk).into_iter().map(|frame| frame.data));
                }
                Some(Err(e)) => return Some(Err(SyncError::Http(e))),
                None => {
                    self.body = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        // Dropping the body stream releases the connection
        self.body = None;
        self.pending.clear();
    }
}
