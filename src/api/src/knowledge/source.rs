//! Where snapshot artifacts come from: local disk, a remote release, or both.
//!
//! A successful remote fetch is persisted into the data directory so that
//! later process starts find the artifact locally.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::retry::{retry, RetryConfig};

/// Fetches raw artifact bytes by file name.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Fetch an artifact. `refresh` asks the source to bypass any local copy.
    async fn fetch(&self, name: &str, refresh: bool) -> KnowledgeResult<Vec<u8>>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Artifacts on local disk
#[derive(Debug, Clone)]
pub struct LocalSource {
    base_dir: PathBuf,
}

impl LocalSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Write an artifact atomically (temp file, then rename).
    pub async fn persist(&self, name: &str, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.path(name);
        let partial = self.base_dir.join(format!("{}.part", name));
        tokio::fs::write(&partial, bytes).await?;
        tokio::fs::rename(&partial, &path).await
    }
}

#[async_trait]
impl ChunkSource for LocalSource {
    async fn fetch(&self, name: &str, _refresh: bool) -> KnowledgeResult<Vec<u8>> {
        let path = self.path(name);
        tokio::fs::read(&path)
            .await
            .map_err(|e| KnowledgeError::unavailable(path.display().to_string(), e))
    }

    fn describe(&self) -> String {
        self.base_dir.display().to_string()
    }
}

/// Artifacts published at a fixed release location
#[derive(Debug, Clone)]
pub struct RemoteSource {
    client: Client,
    base_url: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl RemoteSource {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryConfig) -> KnowledgeResult<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| KnowledgeError::unavailable(base_url, e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            retry,
        })
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    async fn get(&self, url: &str, whole_body_timeout: bool) -> KnowledgeResult<reqwest::Response> {
        let mut request = self.client.get(url);
        if whole_body_timeout {
            request = request.timeout(self.timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| KnowledgeError::transient(format!("requesting {}", url), e))?;
        check_status(url, response.status())?;
        Ok(response)
    }

    /// Fetch a whole artifact, retrying transient failures.
    pub async fn fetch_bytes(&self, name: &str) -> KnowledgeResult<Vec<u8>> {
        let url = self.url(name);
        let url = url.as_str();
        retry(&self.retry, &format!("GET {}", url), || async move {
            let response = self.get(url, true).await?;
            let body = response
                .bytes()
                .await
                .map_err(|e| KnowledgeError::transient(format!("reading {}", url), e))?;
            Ok(body.to_vec())
        })
        .await
    }

    /// Open an artifact for incremental reading. Only the request itself is
    /// retried; the body is consumed by the caller.
    pub async fn open(&self, name: &str) -> KnowledgeResult<reqwest::Response> {
        let url = self.url(name);
        let url = url.as_str();
        retry(&self.retry, &format!("GET {}", url), || self.get(url, false)).await
    }
}

fn check_status(url: &str, status: StatusCode) -> KnowledgeResult<()> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(KnowledgeError::transient(format!("requesting {}", url), status))
    } else {
        Err(KnowledgeError::unavailable(url, status))
    }
}

#[async_trait]
impl ChunkSource for RemoteSource {
    async fn fetch(&self, name: &str, _refresh: bool) -> KnowledgeResult<Vec<u8>> {
        self.fetch_bytes(name).await
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

/// Local disk first, remote release on miss; remote results are persisted.
#[derive(Debug, Clone)]
pub struct TieredSource {
    local: LocalSource,
    remote: Option<RemoteSource>,
}

impl TieredSource {
    pub fn new(local: LocalSource, remote: Option<RemoteSource>) -> Self {
        Self { local, remote }
    }

    pub fn local(&self) -> &LocalSource {
        &self.local
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Open an artifact as a byte stream without loading it whole.
    pub async fn open_stream(&self, name: &str) -> KnowledgeResult<ByteStream> {
        let path = self.local.path(name);
        if path.is_file() {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| KnowledgeError::unavailable(path.display().to_string(), e))?;
            return Ok(ByteStream::File(file));
        }

        match &self.remote {
            Some(remote) => Ok(ByteStream::Http(remote.open(name).await?)),
            None => Err(KnowledgeError::unavailable(
                path.display().to_string(),
                "not present locally and no remote configured",
            )),
        }
    }

    async fn fetch_remote(&self, remote: &RemoteSource, name: &str) -> KnowledgeResult<Vec<u8>> {
        let bytes = remote.fetch_bytes(name).await?;
        match self.local.persist(name, &bytes).await {
            Ok(()) => info!("Persisted {} ({} bytes) from {}", name, bytes.len(), remote.describe()),
            Err(e) => warn!("Failed to persist {} locally: {}", name, e),
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ChunkSource for TieredSource {
    async fn fetch(&self, name: &str, refresh: bool) -> KnowledgeResult<Vec<u8>> {
        if refresh {
            if let Some(remote) = &self.remote {
                debug!("Refreshing {} from remote", name);
                return self.fetch_remote(remote, name).await;
            }
        }

        match (self.local.fetch(name, refresh).await, &self.remote) {
            (Err(KnowledgeError::Unavailable { .. }), Some(remote)) => {
                debug!("{} missing locally, fetching from {}", name, remote.describe());
                self.fetch_remote(remote, name).await
            }
            (result, _) => result,
        }
    }

    fn describe(&self) -> String {
        match &self.remote {
            Some(remote) => format!("{} (remote: {})", self.local.describe(), remote.describe()),
            None => self.local.describe(),
        }
    }
}

/// Incremental reader over a local file or an HTTP body.
pub enum ByteStream {
    File(tokio::fs::File),
    Http(reqwest::Response),
}

impl ByteStream {
    /// Next block of at most `block_size` bytes (HTTP yields whatever chunk
    /// the transport delivers). `None` at end of stream.
    pub async fn next_block(&mut self, block_size: usize) -> KnowledgeResult<Option<Vec<u8>>> {
        match self {
            ByteStream::File(file) => {
                let mut buf = vec![0u8; block_size.max(1)];
                let n = file
                    .read(&mut buf)
                    .await
                    .map_err(|e| KnowledgeError::transient("reading snapshot file", e))?;
                if n == 0 {
                    return Ok(None);
                }
                buf.truncate(n);
                Ok(Some(buf))
            }
            ByteStream::Http(response) => response
                .chunk()
                .await
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .map_err(|e| KnowledgeError::transient("streaming remote snapshot", e)),
        }
    }
}
