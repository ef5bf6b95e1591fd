use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::repositories::fetcher::{FetchError, Fetcher};

/// Reads sources below a root directory.
#[derive(Debug, Clone)]
pub struct FilesystemFetcher {
    root: PathBuf,
}

impl FilesystemFetcher {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: PathBuf::new().join(root),
        }
    }

    fn source_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Fetcher for FilesystemFetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        let source = self.source_path(path);

        match tokio::fs::read(&source).await {
            Ok(data) => Ok(data.into()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(FetchError::NotFound(path.to_string())),
            Err(e) => Err(FetchError::Io(e)),
        }
    }
}
