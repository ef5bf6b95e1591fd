use bytes::Bytes;
use lru::LruCache;

fn entry_size(key: &str, value: &Bytes) -> usize {
    key.len() + value.len()
}

/// LRU map bounded by the total size of its keys and values.
pub(crate) struct ByteLru {
    entries: LruCache<String, Bytes>,
    bytes: usize,
    budget: usize,
}

impl ByteLru {
    pub(crate) fn new(budget: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            budget,
        }
    }

    pub(crate) fn get(&mut self, key: &str) -> Option<Bytes> {
        self.entries.get(key).cloned()
    }

    /// Stores `value` and evicts least recently used entries until the map
    /// fits its budget again. Returns the number of evicted entries.
    ///
    /// A value that alone exceeds the budget is not stored.
    pub(crate) fn insert(&mut self, key: String, value: Bytes) -> usize {
        let size = entry_size(&key, &value);
        if size > self.budget {
            return 0;
        }

        let key_len = key.len();
        if let Some(old) = self.entries.put(key, value) {
            self.bytes -= key_len + old.len();
        }
        self.bytes += size;

        let mut evicted = 0;
        while self.bytes > self.budget {
            match self.entries.pop_lru() {
                Some((key, value)) => {
                    trace!("evict {key} ({} bytes)", value.len());
                    self.bytes -= entry_size(&key, &value);
                    evicted += 1;
                }
                None => break,
            }
        }

        evicted
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }
}
