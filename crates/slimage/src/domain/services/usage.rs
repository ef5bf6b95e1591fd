use std::{
    mem,
    sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::domain::{
    entities::size::Size,
    repositories::usage::{SizeCounts, UsageRepository, UsageRepositoryError},
};

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("usage counter is closed")]
    Closed,
    #[error("usage counter is already started")]
    AlreadyStarted,
    #[error("repository error: {0}")]
    RepositoryError(#[from] UsageRepositoryError),
}

struct State {
    counts: SizeCounts,
    closed: bool,
}

struct Inner<R> {
    state: RwLock<State>,
    repo: R,
    // one save at a time, so an older snapshot never lands after a newer one
    persist_lock: tokio::sync::Mutex<()>,
}

impl<R: UsageRepository> Inner<R> {
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn persist(&self) -> Result<(), UsageRepositoryError> {
        let _guard = self.persist_lock.lock().await;
        let counts = self.read().counts.clone();
        self.repo.save(&counts).await
    }
}

enum Lifecycle {
    Idle,
    Running {
        stop: oneshot::Sender<()>,
        handle: JoinHandle<()>,
    },
    Closed,
}

/// Counts how often each output size is requested and periodically saves
/// the counts through a [`UsageRepository`].
///
/// Lifecycle: [`UsageCounter::open`] loads the saved counts,
/// [`UsageCounter::start`] begins the periodic flush and
/// [`UsageCounter::close`] saves a final time. Increments are rejected once
/// the counter is closed.
pub struct UsageCounter<R: UsageRepository> {
    inner: Arc<Inner<R>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl<R: UsageRepository> Clone for UsageCounter<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl<R: UsageRepository> UsageCounter<R> {
    /// Loads previously saved counts. Nothing saved yet is an empty counter;
    /// unreadable or corrupt data is an error.
    pub async fn open(repo: R) -> Result<Self, UsageError> {
        let counts = repo.load().await?;
        info!("loaded usage counts for {} sizes", counts.len());

        Ok(Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    counts,
                    closed: false,
                }),
                repo,
                persist_lock: tokio::sync::Mutex::new(()),
            }),
            lifecycle: Arc::new(Mutex::new(Lifecycle::Idle)),
        })
    }

    /// Spawns the task that saves the counts every `interval`.
    pub fn start(&self, interval: Duration) -> Result<(), UsageError> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match *lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running { .. } => return Err(UsageError::AlreadyStarted),
            Lifecycle::Closed => return Err(UsageError::Closed),
        }

        let interval = interval.max(MIN_FLUSH_INTERVAL);
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(run_flusher(self.inner.clone(), interval, stopped));
        *lifecycle = Lifecycle::Running { stop, handle };

        debug!("usage counter flushing every {interval:?}");
        Ok(())
    }

    /// Adds one request for `size`. Never waits on storage.
    pub fn increment(&self, size: Size) -> Result<(), UsageError> {
        let mut state = self.inner.write();
        if state.closed {
            return Err(UsageError::Closed);
        }

        *state.counts.entry(size).or_insert(0) += 1;
        Ok(())
    }

    pub fn snapshot(&self) -> SizeCounts {
        self.inner.read().counts.clone()
    }

    pub fn count(&self, size: &Size) -> u64 {
        self.inner.read().counts.get(size).copied().unwrap_or(0)
    }

    /// Every size requested so far, smallest width first.
    pub fn all_sizes(&self) -> Vec<Size> {
        self.inner.read().counts.keys().copied().collect()
    }

    /// The `n` most requested sizes, most requested first. Ties are ordered
    /// by width, then height.
    pub fn top_sizes(&self, n: usize) -> Vec<(Size, u64)> {
        let mut sizes: Vec<(Size, u64)> = self
            .inner
            .read()
            .counts
            .iter()
            .map(|(size, count)| (*size, *count))
            .collect();

        sizes.sort_by(|(a_size, a_count), (b_size, b_count)| {
            b_count.cmp(a_count).then_with(|| a_size.cmp(b_size))
        });
        sizes.truncate(n);
        sizes
    }

    /// Saves the current counts now.
    pub async fn flush(&self) -> Result<(), UsageError> {
        Ok(self.inner.persist().await?)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Stops counting, stops the flush task and saves a final time. Closing
    /// an already closed counter does nothing.
    pub async fn close(&self) -> Result<(), UsageError> {
        let previous = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            mem::replace(&mut *lifecycle, Lifecycle::Closed)
        };

        if let Lifecycle::Closed = previous {
            return Ok(());
        }

        self.inner.write().closed = true;

        if let Lifecycle::Running { stop, handle } = previous {
            let _ = stop.send(());
            if let Err(e) = handle.await {
                error!("usage flush task did not exit cleanly: {e}");
            }
        }

        self.inner.persist().await?;
        info!("usage counter closed");

        Ok(())
    }
}

async fn run_flusher<R: UsageRepository>(
    inner: Arc<Inner<R>>,
    interval: Duration,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = inner.persist().await {
                    error!("error persist usage counts: {e}");
                }
            }
            _ = &mut stopped => break,
        }
    }

    debug!("usage flush task exited");
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Clone, Default)]
    struct MemoryRepository {
        saved: Arc<Mutex<Option<SizeCounts>>>,
        saves: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    impl MemoryRepository {
        fn saved(&self) -> Option<SizeCounts> {
            self.saved.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UsageRepository for MemoryRepository {
        async fn load(&self) -> Result<SizeCounts, UsageRepositoryError> {
            Ok(self.saved().unwrap_or_default())
        }

        async fn save(&self, counts: &SizeCounts) -> Result<(), UsageRepositoryError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(UsageRepositoryError::Other("disk full".to_string()));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.saved.lock().unwrap() = Some(counts.clone());
            Ok(())
        }
    }

    fn size(width: u32, height: u32) -> Size {
        Size::new(width, height).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments() {
        let counter = UsageCounter::open(MemoryRepository::default()).await.unwrap();

        let mut handles = vec![];
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..125 {
                    counter.increment(size(100, 100)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counter.count(&size(100, 100)), 1000);
    }

    #[tokio::test]
    async fn test_open_loads_saved_counts() {
        let repo = MemoryRepository::default();
        let mut counts = SizeCounts::new();
        counts.insert(size(15, 15), 3);
        *repo.saved.lock().unwrap() = Some(counts);

        let counter = UsageCounter::open(repo).await.unwrap();
        counter.increment(size(15, 15)).unwrap();

        assert_eq!(counter.count(&size(15, 15)), 4);
    }

    #[tokio::test]
    async fn test_close_persists_final_snapshot() {
        let repo = MemoryRepository::default();
        let counter = UsageCounter::open(repo.clone()).await.unwrap();
        // long enough that no periodic flush runs during the test
        counter.start(Duration::from_secs(3600)).unwrap();

        counter.increment(size(100, 50)).unwrap();
        counter.increment(size(100, 50)).unwrap();
        counter.increment(size(640, 480)).unwrap();
        let before = counter.snapshot();

        counter.close().await.unwrap();

        assert_eq!(repo.saved(), Some(before));
        assert_eq!(repo.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_increment_after_close() {
        let counter = UsageCounter::open(MemoryRepository::default()).await.unwrap();
        counter.close().await.unwrap();

        assert!(matches!(counter.increment(size(1, 1)), Err(UsageError::Closed)));
        assert!(matches!(counter.start(Duration::from_secs(1)), Err(UsageError::Closed)));
        assert!(counter.is_closed());
        // second close is a no-op
        counter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice() {
        let counter = UsageCounter::open(MemoryRepository::default()).await.unwrap();
        counter.start(Duration::from_secs(60)).unwrap();

        assert!(matches!(
            counter.start(Duration::from_secs(60)),
            Err(UsageError::AlreadyStarted)
        ));
        counter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_periodic_flush() {
        let repo = MemoryRepository::default();
        let counter = UsageCounter::open(repo.clone()).await.unwrap();
        counter.start(Duration::from_millis(20)).unwrap();

        counter.increment(size(10, 10)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(repo.saves.load(Ordering::SeqCst) >= 1);
        assert_eq!(repo.saved().unwrap().get(&size(10, 10)), Some(&1));
        counter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_failure_does_not_stop_counting() {
        let repo = MemoryRepository::default();
        repo.fail.store(true, Ordering::SeqCst);
        let counter = UsageCounter::open(repo.clone()).await.unwrap();
        counter.start(Duration::from_millis(10)).unwrap();

        counter.increment(size(10, 10)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        counter.increment(size(10, 10)).unwrap();

        assert!(counter.flush().await.is_err());
        assert_eq!(counter.count(&size(10, 10)), 2);

        repo.fail.store(false, Ordering::SeqCst);
        counter.close().await.unwrap();
        assert_eq!(repo.saved().unwrap().get(&size(10, 10)), Some(&2));
    }

    #[tokio::test]
    async fn test_top_sizes_by_count() {
        let counter = UsageCounter::open(MemoryRepository::default()).await.unwrap();
        let hits = [((640, 480), 5), ((100, 100), 2), ((50, 50), 2), ((10, 20), 9), ((10, 10), 2)];
        for ((width, height), n) in hits {
            for _ in 0..n {
                counter.increment(size(width, height)).unwrap();
            }
        }

        assert_eq!(
            counter.top_sizes(4),
            vec![
                (size(10, 20), 9),
                (size(640, 480), 5),
                (size(10, 10), 2),
                (size(50, 50), 2),
            ]
        );
        assert_eq!(counter.top_sizes(100).len(), 5);
        assert_eq!(
            counter.all_sizes(),
            vec![size(10, 10), size(10, 20), size(50, 50), size(100, 100), size(640, 480)]
        );
    }
}
