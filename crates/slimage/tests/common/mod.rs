#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, RgbImage};
use slimage::{
    application::worker::{Pipeline, WorkerPool},
    domain::{
        repositories::fetcher::{FetchError, Fetcher},
        services::{image::ImageService, source::SourceResolver, usage::UsageCounter},
    },
    infrastructure::domain::repositories::usage::UsageRepositoryImpl,
};
use tempfile::TempDir;

pub fn png(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    Bytes::from(buf.into_inner())
}

/// In-memory sources that take `delay` to answer and count every fetch.
pub struct SlowFetcher {
    files: HashMap<String, Bytes>,
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowFetcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            files: HashMap::new(),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_file(mut self, path: &str, data: Bytes) -> Self {
        self.files.insert(path.to_string(), data);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for SlowFetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(path.to_string()))
    }
}

pub struct Stack {
    pub svc: ImageService<UsageRepositoryImpl>,
    pub pool: Arc<WorkerPool>,
    pub counter: UsageCounter<UsageRepositoryImpl>,
    pub fetcher: Arc<SlowFetcher>,
    pub dir: TempDir,
}

impl Stack {
    pub fn counter_path(&self) -> std::path::PathBuf {
        self.dir.path().join("sizes.json")
    }
}

/// The whole request pipeline over `fetcher`, counting sizes into a
/// temporary directory.
pub async fn stack(fetcher: SlowFetcher, num_workers: usize) -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(fetcher);

    let resolver = SourceResolver::new(fetcher.clone(), 16 << 20);
    let pool = Arc::new(WorkerPool::start(num_workers, Pipeline::default()));
    let counter = UsageCounter::open(UsageRepositoryImpl::new(dir.path().join("sizes.json")))
        .await
        .unwrap();
    counter.start(Duration::from_secs(3600)).unwrap();

    let svc = ImageService::new(resolver, pool.clone(), counter.clone(), 16 << 20);

    Stack {
        svc,
        pool,
        counter,
        fetcher,
        dir,
    }
}
