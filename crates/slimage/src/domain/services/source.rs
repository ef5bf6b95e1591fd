use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::Uri;
use percent_encoding::percent_decode_str;
use slimage_cache::{CacheStats, Getter, Group, GroupError, MEGABYTE};
use thiserror::Error;

use crate::domain::{
    entities::request::ImageRequest,
    repositories::fetcher::{FetchError, Fetcher},
};

pub const SOURCE_CACHE_NAME: &str = "slimage_source";
pub const DEFAULT_SOURCE_CACHE_BYTES: usize = 128 * MEGABYTE;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid locator {0}")]
    InvalidLocator(String),
    #[error("fetch error: {0}")]
    Fetch(#[from] GroupError<FetchError>),
}

struct FetchGetter {
    fetcher: Arc<dyn Fetcher>,
}

#[async_trait]
impl Getter for FetchGetter {
    type Error = FetchError;

    async fn get(&self, path: &str) -> Result<Bytes, Self::Error> {
        match self.fetcher.fetch(path).await {
            Ok(bytes) => {
                debug!("fetched {path} ({} bytes)", bytes.len());
                Ok(bytes)
            }
            Err(e) => {
                error!("error fetch source {path}: {e}");
                Err(e)
            }
        }
    }
}

/// Returns raw source bytes for a request, coalescing and caching fetches
/// of the same path.
#[derive(Clone)]
pub struct SourceResolver {
    cache: Group<FetchGetter>,
}

impl SourceResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, cache_bytes: usize) -> Self {
        Self::with_cache(fetcher, SOURCE_CACHE_NAME, cache_bytes)
    }

    pub fn with_cache(fetcher: Arc<dyn Fetcher>, name: &str, cache_bytes: usize) -> Self {
        Self {
            cache: Group::new(name, cache_bytes, FetchGetter { fetcher }),
        }
    }

    pub async fn get_source_bytes(&self, req: &ImageRequest) -> Result<Bytes, SourceError> {
        let path = fetch_path(&req.url)?;

        Ok(self.cache.get(&path).await?)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// Derives the fetch key of a locator: the decoded URI path with empty and
/// `.` segments removed. Any `..` segment is rejected.
pub fn fetch_path(locator: &str) -> Result<String, SourceError> {
    let invalid = || SourceError::InvalidLocator(locator.to_string());

    let uri: Uri = locator.parse().map_err(|_| invalid())?;
    let decoded = percent_decode_str(uri.path())
        .decode_utf8()
        .map_err(|_| invalid())?;

    let mut path = String::with_capacity(decoded.len());
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(invalid()),
            segment => {
                path.push('/');
                path.push_str(segment);
            }
        }
    }

    if path.is_empty() {
        return Err(invalid());
    }

    Ok(path)
}
