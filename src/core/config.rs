#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ingest_shards: usize,            // Rounded up to a power of two
    pub ingest_workers: Option<usize>,   // Default: all cores
    pub ingest_queue_depth: usize,       // Bounded batch queue between driver and workers
    pub query_cache_entries: usize,      // 0 disables the result cache
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            ingest_shards: 16,
            ingest_workers: None,
            ingest_queue_depth: 256,
            query_cache_entries: 256,
        }
    }
}

impl EngineConfig {
    pub fn worker_count(&self) -> usize {
        self.ingest_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
