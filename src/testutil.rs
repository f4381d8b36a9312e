use crate::error::Result;
use crate::store::{Linker, Store};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill(&mut buf[..]);
    buf
}

/// Pass-through store that counts calls, for asserting what reached a backend.
pub struct CountingStore<S: Store> {
    inner: S,
    puts: AtomicUsize,
    put_bytes: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
    col_deletes: AtomicUsize,
}

impl<S: Store> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            put_bytes: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            col_deletes: AtomicUsize::new(0),
        }
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn put_bytes(&self) -> usize {
        self.put_bytes.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn col_deletes(&self) -> usize {
        self.col_deletes.load(Ordering::SeqCst)
    }
}

impl<S: Store> Store for CountingStore<S> {
    fn put(&self, key: &str, col: u64, value: &[u8]) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.put_bytes.fetch_add(value.len(), Ordering::SeqCst);
        self.inner.put(key, col, value)
    }

    fn get(&self, key: &str, col: u64) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key, col)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }

    fn delete_col(&self, key: &str, col: u64) -> Result<()> {
        self.col_deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_col(key, col)
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        self.inner.has_key(key)
    }

    fn all_values(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        self.inner.all_values(key)
    }

    fn col_size(&self) -> usize {
        self.inner.col_size()
    }

    fn all_keys(&self) -> Result<Vec<String>> {
        self.inner.all_keys()
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn linker(&self) -> Option<&dyn Linker> {
        self.inner.linker()
    }

    fn uncached(&self) -> Option<&dyn Store> {
        self.inner.uncached()
    }
}
