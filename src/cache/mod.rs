//! Write-back cache over any [`Store`].
//!
//! Writes land in an in-memory `(key, column) -> value` table and are marked
//! as needing a flush; nothing reaches the backend until [`CachingStore::flush`]
//! (or every put, with `auto_flush`). Reads are served from the table and fall
//! through to the backend on a miss, populating the table.
//!
//! # Eviction
//!
//! [`CachingStore::run_evictions`] asks the configured [`EvictionPolicy`]
//! which clean entries to drop. It is normally driven by an [`EvictionTask`]
//! registered with the [`crate::scheduler::Scheduler`], but can be forced.
//! Entries still waiting for a flush are never evicted.
//!
//! # Locking
//!
//! `flush_lock` serializes flushes and eviction removals only; get and put
//! never take it. When `table` and `needs_flush` are held together, `table`
//! is always taken first.

pub mod eviction;
pub mod task;

pub use eviction::{policy, EvictionPolicy};
pub use task::EvictionTask;

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::store::Store;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

type Table = HashMap<String, HashMap<u64, Vec<u8>>>;
type Marks = HashMap<String, HashSet<u64>>;

pub struct CachingStore<S: Store> {
    inner: S,
    config: CacheConfig,
    policy: Box<dyn EvictionPolicy>,
    table: RwLock<Table>,
    needs_flush: Mutex<Marks>,
    flush_lock: Mutex<()>,
}

impl<S: Store> CachingStore<S> {
    pub fn new(inner: S, config: CacheConfig) -> Self {
        Self::with_clock(inner, config, Arc::new(SystemClock))
    }

    pub fn with_clock(inner: S, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let policy = policy(config.eviction, clock);
        Self {
            inner,
            config,
            policy,
            table: RwLock::new(HashMap::new()),
            needs_flush: Mutex::new(HashMap::new()),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of cached `(key, column)` entries.
    pub fn cached_len(&self) -> usize {
        self.table.read().unwrap().values().map(HashMap::len).sum()
    }

    pub fn is_cached(&self, key: &str, col: u64) -> bool {
        self.table
            .read()
            .unwrap()
            .get(key)
            .is_some_and(|row| row.contains_key(&col))
    }

    pub fn is_dirty(&self, key: &str, col: u64) -> bool {
        self.needs_flush
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|cols| cols.contains(&col))
    }

    /// Writes every pending entry to the backend in one pass, then optionally
    /// drops all clean entries from the table.
    ///
    /// On a backend error the entries not yet written stay marked, so a later
    /// flush retries them.
    pub fn flush(&self, empty_cache: bool) -> Result<()> {
        let _guard = self.flush_lock.lock().unwrap();

        let pending: Vec<(String, u64)> = {
            let mut marks = self.needs_flush.lock().unwrap();
            marks
                .drain()
                .flat_map(|(key, cols)| cols.into_iter().map(move |col| (key.clone(), col)))
                .collect()
        };

        let mut written = 0usize;
        for (i, (key, col)) in pending.iter().enumerate() {
            let value = self
                .table
                .read()
                .unwrap()
                .get(key)
                .and_then(|row| row.get(col))
                .cloned();
            let Some(value) = value else { continue };
            if let Err(e) = self.inner.put(key, *col, &value) {
                self.remark(&pending[i..]);
                return Err(e);
            }
            written += 1;
        }

        if empty_cache {
            self.drop_clean_entries();
        }

        tracing::debug!(written, empty_cache, "Flushed cache");
        Ok(())
    }

    /// Runs one eviction cycle and returns the number of entries dropped.
    pub fn run_evictions(&self) -> usize {
        let candidates: Vec<(String, u64)> = {
            let table = self.table.read().unwrap();
            let marks = self.needs_flush.lock().unwrap();
            table
                .iter()
                .flat_map(|(key, row)| row.keys().map(move |col| (key, *col)))
                .filter(|(key, col)| !marked(&marks, key, *col))
                .filter(|(key, col)| self.policy.should_evict(key, *col))
                .map(|(key, col)| (key.clone(), col))
                .collect()
        };
        if candidates.is_empty() {
            return 0;
        }

        let _guard = self.flush_lock.lock().unwrap();
        let mut table = self.table.write().unwrap();
        let marks = self.needs_flush.lock().unwrap();
        let mut removed = 0usize;
        for (key, col) in candidates {
            // Written again since the scan.
            if marked(&marks, &key, col) {
                continue;
            }
            if let Some(row) = table.get_mut(&key) {
                if row.remove(&col).is_some() {
                    removed += 1;
                    self.policy.remove(&key, col);
                }
                if row.is_empty() {
                    table.remove(&key);
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Evicted cache entries");
        }
        removed
    }

    fn remark(&self, entries: &[(String, u64)]) {
        let mut marks = self.needs_flush.lock().unwrap();
        for (key, col) in entries {
            marks.entry(key.clone()).or_default().insert(*col);
        }
    }

    fn drop_clean_entries(&self) {
        let mut table = self.table.write().unwrap();
        let marks = self.needs_flush.lock().unwrap();
        for (key, row) in table.iter_mut() {
            row.retain(|col, _| {
                let keep = marked(&marks, key, *col);
                if !keep {
                    self.policy.remove(key, *col);
                }
                keep
            });
        }
        table.retain(|_, row| !row.is_empty());
    }

    /// Pushes this row's pending entries to the backend.
    fn flush_row(&self, key: &str) -> Result<()> {
        let _guard = self.flush_lock.lock().unwrap();
        let cols: Vec<u64> = match self.needs_flush.lock().unwrap().remove(key) {
            Some(cols) => cols.into_iter().collect(),
            None => return Ok(()),
        };
        for (i, col) in cols.iter().enumerate() {
            let value = self
                .table
                .read()
                .unwrap()
                .get(key)
                .and_then(|row| row.get(col))
                .cloned();
            let Some(value) = value else { continue };
            if let Err(e) = self.inner.put(key, *col, &value) {
                let rest: Vec<(String, u64)> =
                    cols[i..].iter().map(|c| (key.to_string(), *c)).collect();
                self.remark(&rest);
                return Err(e);
            }
        }
        Ok(())
    }
}

fn marked(marks: &Marks, key: &str, col: u64) -> bool {
    marks.get(key).is_some_and(|cols| cols.contains(&col))
}

impl<S: Store> Store for CachingStore<S> {
    fn put(&self, key: &str, col: u64, value: &[u8]) -> Result<()> {
        {
            // Insert and mark under one table lock: eviction must never see
            // a fresh value unmarked.
            let mut table = self.table.write().unwrap();
            table
                .entry(key.to_string())
                .or_default()
                .insert(col, value.to_vec());
            self.needs_flush
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default()
                .insert(col);
        }
        self.policy.note_put(key, col);

        if self.config.auto_flush {
            self.flush(false)?;
        }
        Ok(())
    }

    fn get(&self, key: &str, col: u64) -> Result<Option<Vec<u8>>> {
        let cached = self
            .table
            .read()
            .unwrap()
            .get(key)
            .and_then(|row| row.get(&col))
            .cloned();
        if let Some(value) = cached {
            self.policy.note_get(key, col);
            return Ok(Some(value));
        }

        let Some(value) = self.inner.get(key, col)? else {
            return Ok(None);
        };
        // A put may have raced the backend read; the cached value wins.
        let value = self
            .table
            .write()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .entry(col)
            .or_insert(value)
            .clone();
        self.policy.note_get(key, col);
        Ok(Some(value))
    }

    fn delete(&self, key: &str) -> Result<()> {
        if let Some(row) = self.table.write().unwrap().remove(key) {
            for col in row.keys() {
                self.policy.remove(key, *col);
            }
        }
        self.needs_flush.lock().unwrap().remove(key);
        self.inner.delete(key)
    }

    /// Removes one column. If it was the row's last cached column the whole
    /// row is deleted from the backend, including columns that were never
    /// cached here.
    fn delete_col(&self, key: &str, col: u64) -> Result<()> {
        let (was_cached, row_emptied) = {
            let mut table = self.table.write().unwrap();
            match table.get_mut(key) {
                Some(row) => {
                    let was_cached = row.remove(&col).is_some();
                    let emptied = row.is_empty();
                    if emptied {
                        table.remove(key);
                    }
                    (was_cached, emptied)
                }
                None => (false, false),
            }
        };
        self.policy.remove(key, col);

        if was_cached && row_emptied {
            self.needs_flush.lock().unwrap().remove(key);
            self.inner.delete(key)
        } else {
            if let Some(cols) = self.needs_flush.lock().unwrap().get_mut(key) {
                cols.remove(&col);
            }
            self.inner.delete_col(key, col)
        }
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        let cached = self
            .table
            .read()
            .unwrap()
            .get(key)
            .is_some_and(|row| !row.is_empty());
        if cached {
            return Ok(true);
        }
        self.inner.has_key(key)
    }

    fn all_values(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        // Row scans are not cached; make pending writes visible first.
        self.flush_row(key)?;
        self.inner.all_values(key)
    }

    fn col_size(&self) -> usize {
        self.inner.col_size()
    }

    fn all_keys(&self) -> Result<Vec<String>> {
        let pending: Vec<String> = self
            .needs_flush
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, cols)| !cols.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        Ok(self
            .inner
            .all_keys()?
            .into_iter()
            .chain(pending)
            .unique()
            .collect())
    }

    fn sync(&self) -> Result<()> {
        self.flush(false)?;
        self.inner.sync()
    }

    fn uncached(&self) -> Option<&dyn Store> {
        Some(self.inner.uncached().unwrap_or(&self.inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Eviction;
    use crate::store::MemoryStore;
    use crate::testutil::{random_bytes, CountingStore};
    use std::time::Duration;

    const ROWS: u64 = 10;
    const COLS: u64 = 10;

    type Backend = Arc<CountingStore<MemoryStore>>;

    fn caching(eviction: Eviction, clock: Arc<ManualClock>) -> (Backend, CachingStore<Backend>) {
        let backend = Arc::new(CountingStore::new(MemoryStore::new(256)));
        let cache = CachingStore::with_clock(
            backend.clone(),
            CacheConfig::default().eviction(eviction),
            clock,
        );
        (backend, cache)
    }

    fn put_many_things(store: &impl Store) -> Result<()> {
        for r in 0..ROWS {
            let key = format!("{:x}", r);
            for c in 0..COLS {
                store.put(&key, c, &random_bytes(store.col_size()))?;
            }
        }
        Ok(())
    }

    fn get_few_things(store: &impl Store) -> Result<()> {
        for x in 0..ROWS.min(COLS) {
            store.get(&format!("{:x}", x), x)?;
        }
        Ok(())
    }

    fn put_few_things(store: &impl Store) -> Result<()> {
        for x in 0..ROWS.min(COLS) {
            store.put(&format!("{:x}", x), x, &random_bytes(store.col_size()))?;
        }
        Ok(())
    }

    #[test]
    fn test_writes_are_deferred_until_flush() -> Result<()> {
        let (backend, cache) = caching(Eviction::Never, Arc::new(ManualClock::new(0)));
        cache.put("k", 0, b"value")?;
        assert_eq!(backend.puts(), 0);
        assert_eq!(cache.get("k", 0)?, Some(b"value".to_vec()));
        assert!(cache.is_dirty("k", 0));

        cache.flush(false)?;
        assert_eq!(backend.puts(), 1);
        assert_eq!(backend.get("k", 0)?, Some(b"value".to_vec()));
        assert!(!cache.is_dirty("k", 0));
        assert!(cache.is_cached("k", 0));
        Ok(())
    }

    #[test]
    fn test_flush_twice_is_idempotent() -> Result<()> {
        let (backend, cache) = caching(Eviction::Never, Arc::new(ManualClock::new(0)));
        put_many_things(&cache)?;
        cache.flush(false)?;
        let puts = backend.puts();
        let snapshot: Vec<_> = (0..ROWS)
            .map(|r| backend.all_values(&format!("{:x}", r)))
            .collect::<Result<_>>()?;

        cache.flush(false)?;
        assert_eq!(backend.puts(), puts);
        let again: Vec<_> = (0..ROWS)
            .map(|r| backend.all_values(&format!("{:x}", r)))
            .collect::<Result<_>>()?;
        assert_eq!(snapshot, again);
        Ok(())
    }

    #[test]
    fn test_flush_empty_cache() -> Result<()> {
        let (backend, cache) = caching(Eviction::Never, Arc::new(ManualClock::new(0)));
        cache.put("k", 3, b"v")?;
        cache.flush(true)?;
        assert_eq!(cache.cached_len(), 0);

        assert_eq!(cache.get("k", 3)?, Some(b"v".to_vec()));
        assert_eq!(backend.gets(), 1);
        Ok(())
    }

    #[test]
    fn test_miss_populates_cache() -> Result<()> {
        let (backend, cache) = caching(Eviction::Never, Arc::new(ManualClock::new(0)));
        backend.put("k", 1, b"persisted")?;

        assert_eq!(cache.get("k", 1)?, Some(b"persisted".to_vec()));
        assert_eq!(cache.get("k", 1)?, Some(b"persisted".to_vec()));
        assert_eq!(backend.gets(), 1);
        assert!(!cache.is_dirty("k", 1));

        assert_eq!(cache.get("k", 2)?, None);
        assert!(!cache.is_cached("k", 2));
        Ok(())
    }

    #[test]
    fn test_auto_flush() -> Result<()> {
        let backend = Arc::new(MemoryStore::new(8));
        let cache = CachingStore::new(backend.clone(), CacheConfig::default().auto_flush(true));
        cache.put("k", 0, b"now")?;
        assert_eq!(backend.get("k", 0)?, Some(b"now".to_vec()));
        assert!(!cache.is_dirty("k", 0));
        Ok(())
    }

    #[test]
    fn test_never_evict() -> Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let (_backend, cache) = caching(Eviction::Never, clock.clone());
        put_many_things(&cache)?;
        clock.advance(10);
        get_few_things(&cache)?;
        clock.advance(10);
        cache.flush(false)?;
        cache.run_evictions();

        assert_eq!(cache.cached_len() as u64, ROWS * COLS);
        Ok(())
    }

    #[test]
    fn test_always_evict() -> Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let (_backend, cache) = caching(Eviction::Always, clock.clone());
        put_many_things(&cache)?;

        // Nothing is clean yet.
        assert_eq!(cache.run_evictions(), 0);

        cache.flush(false)?;
        assert_eq!(cache.run_evictions() as u64, ROWS * COLS);
        assert_eq!(cache.cached_len(), 0);
        Ok(())
    }

    #[test]
    fn test_evict_by_last_read() -> Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let (_backend, cache) =
            caching(Eviction::LastRead(Duration::from_millis(10)), clock.clone());
        put_many_things(&cache)?;
        cache.flush(false)?;
        get_few_things(&cache)?;

        // Never-read entries go as soon as they are clean.
        cache.run_evictions();
        assert_eq!(cache.cached_len() as u64, ROWS.min(COLS));

        clock.advance(9);
        cache.run_evictions();
        assert_eq!(cache.cached_len() as u64, ROWS.min(COLS));

        clock.advance(1);
        cache.run_evictions();
        assert_eq!(cache.cached_len(), 0);
        Ok(())
    }

    #[test]
    fn test_reread_keeps_entry() -> Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let (_backend, cache) =
            caching(Eviction::LastRead(Duration::from_millis(10)), clock.clone());
        cache.put("k", 0, b"v")?;
        cache.flush(false)?;
        cache.get("k", 0)?;
        clock.advance(9);
        cache.get("k", 0)?;
        clock.advance(9);
        cache.run_evictions();
        assert!(cache.is_cached("k", 0));
        Ok(())
    }

    #[test]
    fn test_evict_by_last_write() -> Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let (_backend, cache) =
            caching(Eviction::LastWrite(Duration::from_millis(10)), clock.clone());
        put_many_things(&cache)?;
        assert_eq!(cache.cached_len() as u64, ROWS * COLS);
        clock.advance(10);
        get_few_things(&cache)?;
        clock.advance(10);
        put_few_things(&cache)?;
        cache.flush(false)?;
        cache.run_evictions();

        assert_eq!(cache.cached_len() as u64, ROWS.min(COLS));

        clock.advance(10);
        cache.flush(false)?;
        cache.run_evictions();
        assert_eq!(cache.cached_len(), 0);
        Ok(())
    }

    #[test]
    fn test_dirty_entries_are_never_evicted() -> Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let (backend, cache) = caching(Eviction::Always, clock);
        cache.put("k", 0, b"pending")?;
        assert_eq!(cache.run_evictions(), 0);
        assert!(cache.is_cached("k", 0));
        assert_eq!(backend.puts(), 0);
        Ok(())
    }

    #[test]
    fn test_delete_row_purges_cache_and_backend() -> Result<()> {
        let (backend, cache) = caching(Eviction::Never, Arc::new(ManualClock::new(0)));
        cache.put("k", 0, b"a")?;
        cache.put("k", 1, b"b")?;
        cache.flush(false)?;
        cache.put("k", 2, b"c")?;

        cache.delete("k")?;
        assert!(!cache.has_key("k")?);
        assert_eq!(cache.get("k", 0)?, None);
        assert_eq!(cache.get("k", 2)?, None);
        assert!(!cache.all_keys()?.contains(&"k".to_string()));

        // The pending write to column 2 must not resurface.
        cache.flush(false)?;
        assert!(!backend.has_key("k")?);
        Ok(())
    }

    #[test]
    fn test_delete_last_cached_column_deletes_row() -> Result<()> {
        let (backend, cache) = caching(Eviction::Never, Arc::new(ManualClock::new(0)));
        cache.put("k", 0, b"a")?;
        cache.put("k", 1, b"b")?;
        cache.flush(false)?;

        cache.delete_col("k", 0)?;
        assert_eq!(backend.col_deletes(), 1);
        assert_eq!(backend.deletes(), 0);

        cache.delete_col("k", 1)?;
        assert_eq!(backend.deletes(), 1);
        assert!(!backend.has_key("k")?);
        Ok(())
    }

    #[test]
    fn test_all_values_sees_pending_writes() -> Result<()> {
        let (_backend, cache) = caching(Eviction::Never, Arc::new(ManualClock::new(0)));
        cache.put("meta", 7, b"x")?;
        cache.put("meta", 9, b"y")?;
        let mut values = cache.all_values("meta")?;
        values.sort();
        assert_eq!(values, vec![b"x".to_vec(), b"y".to_vec()]);
        assert!(!cache.is_dirty("meta", 7));
        Ok(())
    }

    #[test]
    fn test_all_keys_includes_pending_rows() -> Result<()> {
        let (_backend, cache) = caching(Eviction::Never, Arc::new(ManualClock::new(0)));
        cache.put("a", 0, b"x")?;
        cache.flush(false)?;
        cache.put("b", 0, b"y")?;
        let mut keys = cache.all_keys()?;
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        Ok(())
    }
}
