//! Byte-budgeted LRU cache of opened raster tiles.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

/// least-recently-used cache bounded by the total byte size of its
/// entries. sizes are recorded per key (one `stat` per file); an entry
/// larger than the whole budget is still admitted once the rest of the
/// cache has been evicted.
pub struct TileCache<V> {
    entries: FxHashMap<String, V>,
    lru: VecDeque<String>,
    sizes: FxHashMap<String, u64>,
    used_bytes: u64,
    limit_bytes: u64,
}

impl<V> TileCache<V> {
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            entries: FxHashMap::default(),
            lru: VecDeque::new(),
            sizes: FxHashMap::default(),
            used_bytes: 0,
            limit_bytes,
        }
    }

    pub fn size_of(&self, key: &str) -> Option<u64> {
        self.sizes.get(key).copied()
    }

    pub fn record_size(&mut self, key: &str, size: u64) {
        self.sizes.insert(key.to_string(), size);
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// fetches an entry, refreshing its recently-used position.
    pub fn get(&mut self, key: &str) -> Option<&mut V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get_mut(key)
    }

    /// inserts an entry at the front of the use order, evicting from the
    /// back until the budget holds its recorded size.
    pub fn insert(&mut self, key: &str, value: V) {
        if self.entries.contains_key(key) {
            self.touch(key);
            return;
        }
        let size = self.size_of(key).unwrap_or(0);
        while !self.lru.is_empty() && self.used_bytes + size > self.limit_bytes {
            if let Some(evicted) = self.lru.pop_back() {
                self.entries.remove(&evicted);
                self.used_bytes -= self.sizes.get(&evicted).copied().unwrap_or(0);
            }
        }
        self.entries.insert(key.to_string(), value);
        self.used_bytes += size;
        self.lru.push_front(key.to_string());
    }

    fn touch(&mut self, key: &str) {
        if let Some(position) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(position);
        }
        self.lru.push_front(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::TileCache;

    fn insert_sized(cache: &mut TileCache<u32>, key: &str, size: u64, value: u32) {
        cache.record_size(key, size);
        cache.insert(key, value);
    }

    #[test]
    fn evicts_least_recently_used_entries_to_hold_the_budget() {
        let mut cache = TileCache::new(100);
        insert_sized(&mut cache, "a", 40, 1);
        insert_sized(&mut cache, "b", 40, 2);
        insert_sized(&mut cache, "c", 40, 3);

        // "a" fell off the back
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.used_bytes(), 80);
    }

    #[test]
    fn getting_an_entry_protects_it_from_eviction() {
        let mut cache = TileCache::new(100);
        insert_sized(&mut cache, "a", 40, 1);
        insert_sized(&mut cache, "b", 40, 2);
        assert_eq!(cache.get("a").copied(), Some(1));

        insert_sized(&mut cache, "c", 40, 3);
        // "b" was the least recently used entry now
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn an_oversized_entry_is_admitted_alone() {
        let mut cache = TileCache::new(100);
        insert_sized(&mut cache, "a", 40, 1);
        insert_sized(&mut cache, "big", 500, 2);

        assert_eq!(cache.len(), 1);
        assert!(cache.contains("big"));
        assert_eq!(cache.used_bytes(), 500);
    }

    #[test]
    fn reinserting_a_present_key_only_refreshes_it() {
        let mut cache = TileCache::new(100);
        insert_sized(&mut cache, "a", 40, 1);
        insert_sized(&mut cache, "b", 40, 2);
        cache.insert("a", 9);

        assert_eq!(cache.used_bytes(), 80);
        assert_eq!(cache.len(), 2);
        // the refreshed entry keeps its original value
        assert_eq!(cache.get("a").copied(), Some(1));
    }

    #[test]
    fn missing_entries_are_missing() {
        let mut cache: TileCache<u32> = TileCache::new(10);
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }
}
