//! Remote Keeper Client
//!
//! A [`KeeperClient`] talking to a keeper served over HTTP (see
//! [`handlers`](super::handlers)). Each `RemoteKeeper` owns one server-side
//! session and keeps it alive with a background heartbeat task. Transport
//! failures are reported as `ConnectionLoss` / `OperationTimeout`, so callers
//! treat them as hardware errors.

use super::client::{Connector, KeeperClient};
use super::protocol::{
    ENDPOINT_HEARTBEAT, ENDPOINT_REQUEST, ENDPOINT_SESSION, KeeperRequest, KeeperRequestEnvelope,
    KeeperResponse, SessionResponse,
};
use super::types::{Code, CreateMode, KeeperError, KeeperResult, MultiError, Op, OpResult, Stat};

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const CONNECT_ATTEMPTS: usize = 3;

/// Opens [`RemoteKeeper`] sessions against one server.
pub struct RemoteConnector {
    base_url: String,
    http_client: reqwest::Client,
    request_timeout: Duration,
}

impl RemoteConnector {
    pub fn new(base_url: &str, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            request_timeout,
        }
    }
}

#[async_trait]
impl Connector for RemoteConnector {
    async fn connect(&self) -> KeeperResult<Arc<dyn KeeperClient>> {
        let keeper = RemoteKeeper::open(
            self.http_client.clone(),
            &self.base_url,
            self.request_timeout,
        )
        .await?;
        Ok(keeper)
    }
}

pub struct RemoteKeeper {
    http_client: reqwest::Client,
    base_url: String,
    session_id: u64,
    expired: Arc<AtomicBool>,
    heartbeat: tokio::task::JoinHandle<()>,
    request_timeout: Duration,
}

impl RemoteKeeper {
    pub async fn open(
        http_client: reqwest::Client,
        base_url: &str,
        request_timeout: Duration,
    ) -> KeeperResult<Arc<Self>> {
        let url = format!("{}{}", base_url, ENDPOINT_SESSION);
        let response = post_with_retry(&http_client, url, request_timeout, CONNECT_ATTEMPTS)
            .await
            .map_err(|e| {
                tracing::warn!("Failed to open keeper session at {}: {}", base_url, e);
                KeeperError::new(Code::ConnectionLoss, "/")
            })?;

        if !response.status().is_success() {
            tracing::warn!("Keeper refused session: {}", response.status());
            return Err(KeeperError::new(Code::ConnectionLoss, "/"));
        }
        let session: SessionResponse = response
            .json()
            .await
            .map_err(|_| KeeperError::new(Code::MarshallingError, "/"))?;

        tracing::info!(
            "Opened keeper session {} at {} (timeout {} ms)",
            session.session_id,
            base_url,
            session.session_timeout_ms
        );

        let expired = Arc::new(AtomicBool::new(false));
        let heartbeat = spawn_heartbeat(
            http_client.clone(),
            format!(
                "{}{}/{}{}",
                base_url, ENDPOINT_SESSION, session.session_id, ENDPOINT_HEARTBEAT
            ),
            Duration::from_millis(session.heartbeat_interval_ms),
            expired.clone(),
        );

        Ok(Arc::new(Self {
            http_client,
            base_url: base_url.to_string(),
            session_id: session.session_id,
            expired,
            heartbeat,
            request_timeout,
        }))
    }

    async fn call(&self, request: KeeperRequest) -> Result<KeeperResponse, Code> {
        if self.expired.load(Ordering::SeqCst) {
            return Err(Code::SessionExpired);
        }

        let envelope = KeeperRequestEnvelope {
            session_id: self.session_id,
            request,
        };
        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, ENDPOINT_REQUEST))
            .json(&envelope)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!("Keeper request failed: {}", e);
                if e.is_timeout() {
                    Code::OperationTimeout
                } else {
                    Code::ConnectionLoss
                }
            })?;

        if !response.status().is_success() {
            tracing::warn!("Keeper request rejected: {}", response.status());
            return Err(Code::ConnectionLoss);
        }

        let body: KeeperResponse = response.json().await.map_err(|_| Code::MarshallingError)?;
        if let KeeperResponse::Error {
            code: Code::SessionExpired,
            ..
        } = body
        {
            self.expired.store(true, Ordering::SeqCst);
        }
        Ok(body)
    }
}

fn into_error(response: KeeperResponse, path: &str) -> KeeperError {
    match response {
        KeeperResponse::Error { code, path, .. } => KeeperError::new(code, path),
        other => {
            tracing::error!("Unexpected keeper response for {}: {:?}", path, other);
            KeeperError::new(Code::MarshallingError, path)
        }
    }
}

#[async_trait]
impl KeeperClient for RemoteKeeper {
    fn session_id(&self) -> u64 {
        self.session_id
    }

    fn expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    async fn exists(&self, path: &str) -> KeeperResult<Option<Stat>> {
        let request = KeeperRequest::Exists {
            path: path.to_string(),
        };
        match self.call(request).await {
            Ok(KeeperResponse::Exists(stat)) => Ok(stat),
            Ok(other) => Err(into_error(other, path)),
            Err(code) => Err(KeeperError::new(code, path)),
        }
    }

    async fn get(&self, path: &str) -> KeeperResult<(Vec<u8>, Stat)> {
        let request = KeeperRequest::Get {
            path: path.to_string(),
        };
        match self.call(request).await {
            Ok(KeeperResponse::Data { data, stat }) => Ok((data, stat)),
            Ok(other) => Err(into_error(other, path)),
            Err(code) => Err(KeeperError::new(code, path)),
        }
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> KeeperResult<String> {
        let request = KeeperRequest::Create {
            path: path.to_string(),
            data,
            mode,
        };
        match self.call(request).await {
            Ok(KeeperResponse::Created { path }) => Ok(path),
            Ok(other) => Err(into_error(other, path)),
            Err(code) => Err(KeeperError::new(code, path)),
        }
    }

    async fn set(&self, path: &str, data: Vec<u8>, version: Option<i32>) -> KeeperResult<Stat> {
        let request = KeeperRequest::Set {
            path: path.to_string(),
            data,
            version,
        };
        match self.call(request).await {
            Ok(KeeperResponse::Set(stat)) => Ok(stat),
            Ok(other) => Err(into_error(other, path)),
            Err(code) => Err(KeeperError::new(code, path)),
        }
    }

    async fn remove(&self, path: &str, version: Option<i32>) -> KeeperResult<()> {
        let request = KeeperRequest::Remove {
            path: path.to_string(),
            version,
        };
        match self.call(request).await {
            Ok(KeeperResponse::Removed) => Ok(()),
            Ok(other) => Err(into_error(other, path)),
            Err(code) => Err(KeeperError::new(code, path)),
        }
    }

    async fn children(&self, path: &str) -> KeeperResult<Vec<String>> {
        let request = KeeperRequest::Children {
            path: path.to_string(),
        };
        match self.call(request).await {
            Ok(KeeperResponse::Children(children)) => Ok(children),
            Ok(other) => Err(into_error(other, path)),
            Err(code) => Err(KeeperError::new(code, path)),
        }
    }

    async fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>, MultiError> {
        let first_path = ops.first().map(|op| op.path().to_string()).unwrap_or_default();
        match self.call(KeeperRequest::Multi { ops }).await {
            Ok(KeeperResponse::Multi(results)) => Ok(results),
            Ok(KeeperResponse::Error { code, path, index }) => {
                Err(MultiError::new(code, index.unwrap_or(0), path))
            }
            Ok(other) => {
                tracing::error!("Unexpected keeper multi response: {:?}", other);
                Err(MultiError::new(Code::MarshallingError, 0, first_path))
            }
            Err(code) => Err(MultiError::new(code, 0, first_path)),
        }
    }

    async fn sync(&self, path: &str) -> KeeperResult<()> {
        let request = KeeperRequest::Sync {
            path: path.to_string(),
        };
        match self.call(request).await {
            Ok(KeeperResponse::Synced) => Ok(()),
            Ok(other) => Err(into_error(other, path)),
            Err(code) => Err(KeeperError::new(code, path)),
        }
    }
}

impl Drop for RemoteKeeper {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if self.expired.load(Ordering::SeqCst) {
            return;
        }
        // Closing releases our ephemeral nodes right away instead of waiting
        // for the server to reap the session.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.http_client.clone();
            let url = format!("{}{}/{}", self.base_url, ENDPOINT_SESSION, self.session_id);
            handle.spawn(async move {
                if let Err(e) = client.delete(url).send().await {
                    tracing::debug!("Failed to close keeper session: {}", e);
                }
            });
        }
    }
}

fn spawn_heartbeat(
    http_client: reqwest::Client,
    url: String,
    interval: Duration,
    expired: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            match http_client.post(url.clone()).timeout(interval).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::GONE => {
                    tracing::warn!("Keeper session expired ({})", url);
                    expired.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!("Heartbeat rejected: {}", resp.status());
                }
                Ok(_) => {
                    tracing::trace!("Heartbeat ok");
                }
                Err(e) => {
                    tracing::warn!("Heartbeat failed: {}", e);
                }
            }
        }
    })
}

async fn post_with_retry(
    http_client: &reqwest::Client,
    url: String,
    timeout: Duration,
    attempts: usize,
) -> Result<reqwest::Response> {
    let mut delay_ms = 150u64;

    for attempt in 0..attempts {
        let response = http_client.post(url.clone()).timeout(timeout).send().await;

        match response {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                if attempt + 1 == attempts {
                    return Err(anyhow::anyhow!(e));
                }
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(1200);
            }
        }
    }

    Err(anyhow::anyhow!("Retry attempts exhausted"))
}
