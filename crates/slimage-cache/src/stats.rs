use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) gets: AtomicU64,
    pub(crate) hits: AtomicU64,
    pub(crate) loads: AtomicU64,
    pub(crate) loads_deduped: AtomicU64,
    pub(crate) fill_errors: AtomicU64,
    pub(crate) evictions: AtomicU64,
}

impl Counters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time view of a group's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub name: String,
    /// Every call to `Group::get`.
    pub gets: u64,
    /// Lookups answered from memory.
    pub hits: u64,
    /// Fills started.
    pub loads: u64,
    /// Lookups that joined a fill already in flight.
    pub loads_deduped: u64,
    pub fill_errors: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
    pub budget: usize,
}

impl CacheStats {
    pub(crate) fn collect(
        name: &str,
        counters: &Counters,
        entries: usize,
        bytes: usize,
        budget: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            gets: counters.gets.load(Ordering::Relaxed),
            hits: counters.hits.load(Ordering::Relaxed),
            loads: counters.loads.load(Ordering::Relaxed),
            loads_deduped: counters.loads_deduped.load(Ordering::Relaxed),
            fill_errors: counters.fill_errors.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            entries,
            bytes,
            budget,
        }
    }
}
