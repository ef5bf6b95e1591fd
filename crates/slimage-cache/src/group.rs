use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

use crate::{
    stats::{CacheStats, Counters},
    store::ByteLru,
};

/// Fills a key that is missing from a [`Group`].
///
/// Implementors carry their own dependencies; the group only hands them the
/// key that was requested.
#[async_trait]
pub trait Getter: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, key: &str) -> Result<Bytes, Self::Error>;
}

#[derive(Debug, Error)]
pub enum GroupError<E> {
    /// The fill failed. Every caller coalesced on that fill gets the same error.
    #[error("{0}")]
    Fill(Arc<E>),
    #[error("fill for key {0} did not complete")]
    Aborted(String),
}

impl<E> GroupError<E> {
    pub fn fill_error(&self) -> Option<&E> {
        match self {
            GroupError::Fill(e) => Some(e.as_ref()),
            GroupError::Aborted(_) => None,
        }
    }
}

impl<E> Clone for GroupError<E> {
    fn clone(&self) -> Self {
        match self {
            GroupError::Fill(e) => GroupError::Fill(Arc::clone(e)),
            GroupError::Aborted(key) => GroupError::Aborted(key.clone()),
        }
    }
}

type Flight<E> = Shared<BoxFuture<'static, Result<Bytes, GroupError<E>>>>;

struct State<E> {
    store: ByteLru,
    in_flight: HashMap<String, Flight<E>>,
}

struct Inner<G: Getter> {
    name: String,
    budget: usize,
    getter: G,
    state: Mutex<State<G::Error>>,
    counters: Counters,
}

impl<G: Getter> Inner<G> {
    fn lock(&self) -> MutexGuard<'_, State<G::Error>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the in-flight entry of one fill and clears it however the fill ends.
struct Landing<G: Getter> {
    inner: Arc<Inner<G>>,
    key: String,
    landed: bool,
}

impl<G: Getter> Landing<G> {
    fn land(mut self, value: Option<Bytes>) {
        let mut state = self.inner.lock();
        if let Some(value) = value {
            let evicted = state.store.insert(self.key.clone(), value);
            Counters::add(&self.inner.counters.evictions, evicted as u64);
        }
        state.in_flight.remove(&self.key);
        self.landed = true;
    }
}

impl<G: Getter> Drop for Landing<G> {
    fn drop(&mut self) {
        if !self.landed {
            warn!("[{}] fill for {} ended without a result", self.inner.name, self.key);
            self.inner.lock().in_flight.remove(&self.key);
        }
    }
}

/// A named cache of byte values with a memory budget and single-flight fills.
///
/// At most one fill runs per key at any time: callers that miss while a fill
/// is in flight wait for that fill and share its result. Fills run on their
/// own task, so a caller that goes away does not cancel the work.
pub struct Group<G: Getter> {
    inner: Arc<Inner<G>>,
}

impl<G: Getter> Clone for Group<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: Getter> Group<G> {
    pub fn new(name: impl Into<String>, cache_bytes: usize, getter: G) -> Self {
        let name = name.into();
        info!("cache group {name} with budget of {cache_bytes} bytes");

        Self {
            inner: Arc::new(Inner {
                name,
                budget: cache_bytes,
                getter,
                state: Mutex::new(State {
                    store: ByteLru::new(cache_bytes),
                    in_flight: HashMap::new(),
                }),
                counters: Counters::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, GroupError<G::Error>> {
        let inner = &self.inner;
        Counters::incr(&inner.counters.gets);

        let flight = {
            let mut state = inner.lock();
            if let Some(value) = state.store.get(key) {
                Counters::incr(&inner.counters.hits);
                return Ok(value);
            }

            match state.in_flight.get(key) {
                Some(flight) => {
                    Counters::incr(&inner.counters.loads_deduped);
                    flight.clone()
                }
                None => {
                    Counters::incr(&inner.counters.loads);
                    let flight = self.fill(key.to_string());
                    state.in_flight.insert(key.to_string(), flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let state = self.inner.lock();
            (state.store.len(), state.store.bytes())
        };

        CacheStats::collect(
            &self.inner.name,
            &self.inner.counters,
            entries,
            bytes,
            self.inner.budget,
        )
    }

    // must be called with the state lock held, the spawned fill lands under
    // the same lock
    fn fill(&self, key: String) -> Flight<G::Error> {
        let landing = Landing {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            landed: false,
        };

        let handle = tokio::spawn(async move {
            let result = landing.inner.getter.get(&landing.key).await;
            match result {
                Ok(value) => {
                    landing.land(Some(value.clone()));
                    Ok(value)
                }
                Err(e) => {
                    Counters::incr(&landing.inner.counters.fill_errors);
                    debug!("[{}] fill for {} failed: {e}", landing.inner.name, landing.key);
                    landing.land(None);
                    Err(GroupError::Fill(Arc::new(e)))
                }
            }
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("fill for {key} did not complete: {e}");
                    Err(GroupError::Aborted(key))
                }
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[derive(Debug, Error)]
    #[error("fill number {0} failed")]
    struct TestError(usize);

    struct SlowGetter {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail_first: bool,
    }

    #[async_trait]
    impl Getter for SlowGetter {
        type Error = TestError;

        async fn get(&self, key: &str) -> Result<Bytes, Self::Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail_first && call == 1 {
                return Err(TestError(call));
            }
            Ok(Bytes::from(key.to_uppercase()))
        }
    }

    fn group(budget: usize, delay_ms: u64, fail_first: bool) -> (Group<SlowGetter>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let getter = SlowGetter {
            calls: calls.clone(),
            delay: Duration::from_millis(delay_ms),
            fail_first,
        };
        (Group::new("test", budget, getter), calls)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gets_share_one_fill() {
        let (group, calls) = group(1024, 100, false);

        let mut handles = vec![];
        for _ in 0..10 {
            let group = group.clone();
            handles.push(tokio::spawn(async move { group.get("cat").await }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value, Bytes::from_static(b"CAT"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = group.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.loads_deduped + stats.hits, 9);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_second_get_is_a_hit() {
        let (group, calls) = group(1024, 0, false);

        group.get("dog").await.unwrap();
        let value = group.get("dog").await.unwrap();

        assert_eq!(value, Bytes::from_static(b"DOG"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().hits, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fill_error_reaches_every_waiter_then_retries() {
        let (group, calls) = group(1024, 100, true);

        let (first, second) = tokio::join!(group.get("bird"), group.get("bird"));

        let (first, second) = (first.unwrap_err(), second.unwrap_err());
        match (&first, &second) {
            (GroupError::Fill(a), GroupError::Fill(b)) => assert!(Arc::ptr_eq(a, b)),
            other => panic!("expected fill errors, got {other:?}"),
        }
        assert_eq!(first.fill_error().map(|e| e.0), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let value = group.get("bird").await.unwrap();
        assert_eq!(value, Bytes::from_static(b"BIRD"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(group.stats().fill_errors, 1);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_fill() {
        let (group, calls) = group(1024, 50, false);

        let caller = {
            let group = group.clone();
            tokio::spawn(async move { group.get("fish").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let value = group.get("fish").await.unwrap();

        assert_eq!(value, Bytes::from_static(b"FISH"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_budget_evicts_old_entries() {
        // "a" + "A" and "b" + "B" are two bytes each
        let (group, calls) = group(3, 0, false);

        group.get("a").await.unwrap();
        group.get("b").await.unwrap();
        group.get("a").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = group.stats();
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.bytes, 2);
    }
}
