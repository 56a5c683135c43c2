use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::query::request::{CohortRequest, CohortResponse};

/// LRU cache over whole cohort responses, keyed by the request itself.
pub struct QueryCache {
    cache: Mutex<LruCache<CohortRequest, CohortResponse>>,
    capacity: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl QueryCache {
    /// Returns `None` when `capacity` is 0, which disables caching.
    pub fn new(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(|cap| QueryCache {
            cache: Mutex::new(LruCache::new(cap)),
            capacity,
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        })
    }

    pub fn get(&self, request: &CohortRequest) -> Option<CohortResponse> {
        let mut cache = self.cache.lock();
        if let Some(response) = cache.get(request) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            Some(response.clone())
        } else {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn put(&self, request: CohortRequest, response: CohortResponse) {
        self.cache.lock().put(request, response);
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.lock().len(),
            capacity: self.capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_disables_cache() {
        assert!(QueryCache::new(0).is_none());
    }

    #[test]
    fn records_hits_and_misses() {
        let cache = QueryCache::new(4).unwrap();
        let request = CohortRequest::default();
        let response = CohortResponse {
            count: 7,
            patients: None,
            profile: None,
        };

        assert!(cache.get(&request).is_none());
        cache.put(request.clone(), response.clone());
        assert_eq!(cache.get(&request).unwrap(), response);

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
