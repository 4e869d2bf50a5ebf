#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;

use wa_console::app::{router, AppState};
use wa_console::config::StreamConfig;
use wa_console::sync::SseDecoder;

static SERVER: OnceLock<TestServer> = OnceLock::new();

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
}

impl TestServer {
    /// Serve `state` on a fresh port from a dedicated runtime thread, so the
    /// server outlives any single `#[tokio::test]` runtime
    pub fn spawn(state: AppState) -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let listener = std::net::TcpListener::bind(("127.0.0.1", port)).context("failed to bind test port")?;
        listener.set_nonblocking(true)?;

        std::thread::Builder::new()
            .name(format!("test-server-{}", port))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .expect("failed to build server runtime");
                runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener).expect("failed to adopt listener");
                    axum::serve(listener, router(state)).await.expect("server exited");
                });
            })
            .context("failed to spawn server thread")?;

        Ok(Self { port, base_url })
    }

    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK || resp.status() == StatusCode::SERVICE_UNAVAILABLE {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Short keep-alives so streams show traffic quickly in tests
pub fn test_stream_config() -> StreamConfig {
    StreamConfig {
        keep_alive_secs: 1,
        ..StreamConfig::default()
    }
}

/// Shared in-memory server for the whole test binary
pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| {
        TestServer::spawn(AppState::in_memory(test_stream_config())).expect("failed to spawn test server")
    });
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// Dedicated server over a caller-built state
pub async fn spawn_server(state: AppState) -> Result<TestServer> {
    let server = TestServer::spawn(state)?;
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// Distinct tenant key per test so shared-server tests never see each other's chats
pub fn unique_phone(tag: &str) -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!("+1555{}{:04}{}", std::process::id() % 1000, COUNTER.fetch_add(1, Ordering::SeqCst), tag)
}

pub async fn post_json(client: &reqwest::Client, url: &str, body: Value) -> Result<(StatusCode, Value)> {
    let res = client.post(url).json(&body).send().await?;
    let status = res.status();
    let body = res.json::<Value>().await?;
    Ok((status, body))
}

pub async fn record_exchange(
    client: &reqwest::Client,
    server: &TestServer,
    phone: &str,
    wa_id: &str,
    text: &str,
) -> Result<Value> {
    let (status, body) = post_json(
        client,
        &server.url("/api/Whatsapp/record-exchange"),
        serde_json::json!({
            "businessPhoneNumber": phone,
            "waId": wa_id,
            "user": { "message": text },
            "response": { "message": format!("echo: {}", text) },
        }),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::CREATED, "record-exchange failed: {} {}", status, body);
    Ok(body)
}

/// Reads `data:` payloads off a live push feed
pub struct StreamReader {
    pub content_type: Option<String>,
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
}

impl StreamReader {
    pub async fn open(client: &reqwest::Client, url: &str) -> Result<Self> {
        let res = client.get(url).header("accept", "text/event-stream").send().await?;
        anyhow::ensure!(res.status() == StatusCode::OK, "stream open failed: {}", res.status());
        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Self {
            content_type,
            body: res.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed(),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        })
    }

    /// Next data frame parsed as JSON, failing after `timeout`
    pub async fn next_json(&mut self, timeout: Duration) -> Result<Value> {
        tokio::time::timeout(timeout, self.read_next())
            .await
            .context("timed out waiting for stream frame")?
    }

    async fn read_next(&mut self) -> Result<Value> {
        loop {
            if let Some(data) = self.pending.pop_front() {
                return Ok(serde_json::from_str(&data)?);
            }
            match self.body.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.pending
                        .extend(self.decoder.push(&chunk).into_iter().map(|frame| frame.data));
                }
                None => anyhow::bail!("stream ended"),
            }
        }
    }
}
