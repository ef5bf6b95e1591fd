use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use slimage_cache::{CacheStats, Getter, Group, GroupError, MEGABYTE};
use thiserror::Error;

use super::{source::SourceResolver, usage::UsageCounter};
use crate::{
    application::worker::{WorkerError, WorkerPool},
    domain::{
        entities::{
            image::Image,
            request::{ImageRequest, RequestError},
        },
        repositories::usage::UsageRepository,
    },
};

pub const RESIZE_CACHE_NAME: &str = "slimage_resized";
pub const DEFAULT_RESIZE_CACHE_BYTES: usize = 512 * MEGABYTE;

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("error decode cache key: {0}")]
    Key(#[from] RequestError),
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("error parse request: {0}")]
    Request(#[from] RequestError),
    #[error("{0}")]
    Resize(#[from] GroupError<ResizeError>),
}

impl ImageError {
    /// True when the request failed only because the worker pool no longer
    /// accepts jobs.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ImageError::Resize(e)
                if matches!(e.fill_error(), Some(ResizeError::Worker(WorkerError::Closed)))
        )
    }
}

/// Fills the resize cache: decodes the key back into a request and runs it
/// through the worker pool.
struct ResizeGetter {
    resolver: SourceResolver,
    pool: Arc<WorkerPool>,
}

#[async_trait]
impl Getter for ResizeGetter {
    type Error = ResizeError;

    async fn get(&self, key: &str) -> Result<Bytes, Self::Error> {
        let req = ImageRequest::from_cache_key(key)?;
        Ok(self.pool.submit(&self.resolver, req).await?)
    }
}

/// Serves resized images: counts the requested size, then answers from the
/// resize cache, filling misses through the worker pool.
pub struct ImageService<R: UsageRepository> {
    cache: Group<ResizeGetter>,
    resolver: SourceResolver,
    counter: UsageCounter<R>,
}

impl<R: UsageRepository> Clone for ImageService<R> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            resolver: self.resolver.clone(),
            counter: self.counter.clone(),
        }
    }
}

impl<R: UsageRepository> ImageService<R> {
    pub fn new(
        resolver: SourceResolver,
        pool: Arc<WorkerPool>,
        counter: UsageCounter<R>,
        cache_bytes: usize,
    ) -> Self {
        let getter = ResizeGetter {
            resolver: resolver.clone(),
            pool,
        };

        Self {
            cache: Group::new(RESIZE_CACHE_NAME, cache_bytes, getter),
            resolver,
            counter,
        }
    }

    /// Resized bytes for `req`, from the cache or freshly computed.
    pub async fn resolve(&self, req: &ImageRequest) -> Result<Bytes, ImageError> {
        let key = req.cache_key()?;

        Ok(self.cache.get(&key).await?)
    }

    /// Parses `raw_url`, records its size and returns the resized image.
    pub async fn fetch_image(&self, raw_url: &str) -> Result<Image, ImageError> {
        let req = ImageRequest::from_url(raw_url)?;

        if let Some(size) = req.size() {
            if let Err(e) = self.counter.increment(size) {
                debug!("size {size} not counted: {e}");
            }
        }

        let data = self.resolve(&req).await?;

        Ok(Image::jpeg(data))
    }

    pub fn counter(&self) -> &UsageCounter<R> {
        &self.counter
    }

    pub fn resize_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn source_stats(&self) -> CacheStats {
        self.resolver.stats()
    }
}
