use crate::cache::CachingStore;
use crate::error::Result;
use crate::scheduler::{BackgroundTask, Context};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;

/// Runs [`CachingStore::run_evictions`] every `eviction_interval`.
pub struct EvictionTask<S: Store> {
    cache: Arc<CachingStore<S>>,
}

impl<S: Store> EvictionTask<S> {
    pub fn new(cache: Arc<CachingStore<S>>) -> Self {
        Self { cache }
    }
}

#[async_trait::async_trait]
impl<S: Store + 'static> BackgroundTask for EvictionTask<S> {
    fn name(&self) -> &'static str {
        "cache_eviction"
    }

    fn interval(&self) -> Duration {
        self.cache.config().eviction_interval
    }

    async fn execute(&self, ctx: Context) -> Result<()> {
        let removed = self.cache.run_evictions();
        tracing::debug!(run_id = ctx.run_id, removed, "Eviction pass complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CacheConfig, Eviction};
    use crate::scheduler::Scheduler;
    use crate::store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_eviction() -> Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let config = CacheConfig::default()
            .eviction(Eviction::LastRead(Duration::from_millis(10)))
            .eviction_interval(Duration::from_secs(10));
        let cache = Arc::new(CachingStore::with_clock(
            MemoryStore::new(16),
            config,
            clock.clone(),
        ));
        cache.put("k", 0, b"value")?;
        cache.flush(false)?;
        cache.get("k", 0)?;

        let scheduler = Scheduler::new();
        scheduler.register(Arc::new(EvictionTask::new(cache.clone())));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(cache.is_cached("k", 0));

        clock.advance(10);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!cache.is_cached("k", 0));
        assert_eq!(cache.get("k", 0)?, Some(b"value".to_vec()));

        scheduler.shutdown().await
    }
}
