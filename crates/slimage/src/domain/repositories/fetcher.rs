use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("source {0} not found")]
    NotFound(String),
    #[error("invalid source path {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error request source: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("other error: {0}")]
    Other(String),
}

/// Reads raw source bytes from wherever the originals live.
///
/// `path` is already sanitized: it starts with `/`, has no query string and
/// no `.` or `..` segments.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError>;
}
