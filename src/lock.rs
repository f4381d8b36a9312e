//! Advisory locks built from plain store reads and writes.
//!
//! A lock named `n` lives in row `n` of the data store. Column 0 is the state
//! cell: one state byte followed by the big-endian millisecond timestamp of
//! the write. Every contender registers a random non-zero signature in the
//! column equal to the signature's own value, waits for the settle interval,
//! then compares: the largest signature present wins.
//!
//! This is best effort. Two processes that both read `UNLOCKED` before either
//! writes `TRYING` race on signatures, and a bidder slower than the settle
//! interval can be missed entirely. No compare-and-swap is assumed.
//!
//! The winner rewrites its bid as 16 bytes (signature, then the time it won),
//! so a row always shows whether someone holds the lock even when a late
//! bidder has overwritten the state cell with `TRYING`. A bidder that finds
//! an owned bid loses and writes `LOCKED` back.
//!
//! A `TRYING` state older than `trying_expiry` with no owned bid is treated as
//! `UNLOCKED`: the abandoned bids are deleted before bidding again. `LOCKED`
//! never expires; use [`crate::Directory::clear_lock`] to break it.
//!
//! Lock cells are read and written through [`Store::uncached`], so a lock
//! routed through a write-back cache still goes straight to the shared store.

use crate::clock::Clock;
use crate::config::LockConfig;
use crate::error::Result;
use crate::meta::RowMeta;
use crate::store::Store;
use byteorder::{BigEndian, ByteOrder};
use rand::Rng;
use std::sync::Arc;
use std::thread;

const STATE_COL: u64 = 0;
const STATE_CELL_LEN: usize = 9;
const BID_CELL_LEN: usize = 8;
const OWNED_BID_CELL_LEN: usize = 16;

struct Bid {
    signature: u64,
    owned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockState {
    Unlocked = 0,
    Trying = 1,
    Locked = 2,
}

impl LockState {
    fn from_byte(b: u8) -> Self {
        match b {
            0 => LockState::Unlocked,
            1 => LockState::Trying,
            _ => LockState::Locked,
        }
    }
}

pub struct StoreLock<S: Store, M: Store> {
    name: String,
    store: S,
    meta: Arc<RowMeta<M>>,
    config: LockConfig,
    clock: Arc<dyn Clock>,
    signature: u64,
    owned: bool,
}

impl<S: Store, M: Store> StoreLock<S, M> {
    pub fn new(
        name: &str,
        store: S,
        meta: Arc<RowMeta<M>>,
        config: LockConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let signature = rand::rng().random_range(1..=u64::MAX);
        Self::with_signature(name, store, meta, config, clock, signature)
    }

    /// Handle with a fixed signature. Zero is reserved for the state cell
    /// and is bumped to one.
    pub fn with_signature(
        name: &str,
        store: S,
        meta: Arc<RowMeta<M>>,
        config: LockConfig,
        clock: Arc<dyn Clock>,
        signature: u64,
    ) -> Self {
        Self {
            name: name.to_string(),
            store,
            meta,
            config,
            clock,
            signature: signature.max(1),
            owned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> u64 {
        self.signature
    }

    /// Whether this handle won the lock and has not closed it.
    pub fn is_owner(&self) -> bool {
        self.owned
    }

    /// Tries once to take the lock. Blocks for the settle interval when the
    /// lock looks free; returns `Ok(false)` without waiting when it does not.
    pub fn obtain(&mut self) -> Result<bool> {
        if self.owned {
            return Ok(true);
        }
        if !self.can_bid()? {
            return Ok(false);
        }
        self.register()?;
        thread::sleep(self.config.settle_interval);
        self.resolve()
    }

    /// Releases this handle's bid and, for the owner, the lock itself.
    pub fn close(&mut self) -> Result<()> {
        let cells = self.cells();
        cells.delete_col(&self.name, self.signature)?;
        if self.owned {
            cells.delete_col(&self.name, STATE_COL)?;
            self.meta.delete(&self.name)?;
            self.owned = false;
            tracing::debug!(lock = %self.name, "Released lock");
        }
        Ok(())
    }

    /// Point-in-time read of the shared state; another process may change it
    /// immediately after.
    pub fn is_locked(&self) -> Result<bool> {
        Ok(self
            .cells()
            .get(&self.name, STATE_COL)?
            .and_then(|cell| cell.first().copied())
            .is_some_and(|b| LockState::from_byte(b) != LockState::Unlocked))
    }

    /// Lock cells bypass any write-back cache: every read and write must hit
    /// the store other processes see.
    fn cells(&self) -> &dyn Store {
        match self.store.uncached() {
            Some(store) => store,
            None => &self.store,
        }
    }

    fn can_bid(&self) -> Result<bool> {
        let Some(cell) = self.cells().get(&self.name, STATE_COL)? else {
            return Ok(true);
        };
        let Some(&state) = cell.first() else {
            return Ok(true);
        };

        match LockState::from_byte(state) {
            LockState::Unlocked => Ok(true),
            LockState::Locked => Ok(false),
            LockState::Trying => {
                let written = if cell.len() >= STATE_CELL_LEN {
                    BigEndian::read_u64(&cell[1..STATE_CELL_LEN])
                } else {
                    0
                };
                let Some(expiry) = self.config.trying_expiry else {
                    return Ok(false);
                };
                let age = self.clock.now().saturating_sub(written);
                if age < expiry.as_millis() as u64 {
                    return Ok(false);
                }
                self.clear_stale_bids(age)
            }
        }
    }

    /// Handles an expired `TRYING` cell. An owned bid means a late bidder
    /// overwrote a live `LOCKED` cell, which is put back. Otherwise every bid
    /// left by the abandoned race is removed so it cannot outbid newcomers.
    fn clear_stale_bids(&self, age: u64) -> Result<bool> {
        let bids = self.bids()?;
        if let Some(holder) = bids.iter().find(|bid| bid.owned) {
            tracing::warn!(lock = %self.name, holder = holder.signature, "Restoring LOCKED state");
            self.write_state(LockState::Locked)?;
            return Ok(false);
        }

        tracing::warn!(lock = %self.name, age_ms = age, stale_bids = bids.len(), "Ignoring stale TRYING state");
        let cells = self.cells();
        for bid in bids {
            cells.delete_col(&self.name, bid.signature)?;
        }
        Ok(true)
    }

    fn register(&self) -> Result<()> {
        self.write_state(LockState::Trying)?;
        let mut cell = [0u8; BID_CELL_LEN];
        BigEndian::write_u64(&mut cell, self.signature);
        self.cells().put(&self.name, self.signature, &cell)
    }

    fn resolve(&mut self) -> Result<bool> {
        let bids = self.bids()?;
        let cells = self.cells();

        // Someone already won; we overwrote their LOCKED cell registering.
        if bids
            .iter()
            .any(|bid| bid.owned && bid.signature != self.signature)
        {
            cells.delete_col(&self.name, self.signature)?;
            self.write_state(LockState::Locked)?;
            return Ok(false);
        }

        let highest = bids.iter().map(|bid| bid.signature).max();
        if highest != Some(self.signature) {
            cells.delete_col(&self.name, self.signature)?;
            return Ok(false);
        }

        let mut cell = [0u8; OWNED_BID_CELL_LEN];
        BigEndian::write_u64(&mut cell[..8], self.signature);
        BigEndian::write_u64(&mut cell[8..], self.clock.now());
        cells.put(&self.name, self.signature, &cell)?;
        self.write_state(LockState::Locked)?;
        self.meta.set_length(&self.name, 1, true)?;
        self.owned = true;
        tracing::debug!(lock = %self.name, signature = self.signature, "Obtained lock");
        Ok(true)
    }

    /// Every bid in the lock row. Cells are told apart by length: the state
    /// cell is 9 bytes, a bid 8, and the winner's bid 16.
    fn bids(&self) -> Result<Vec<Bid>> {
        Ok(self
            .cells()
            .all_values(&self.name)?
            .iter()
            .filter_map(|cell| match cell.len() {
                BID_CELL_LEN => Some(Bid {
                    signature: BigEndian::read_u64(cell),
                    owned: false,
                }),
                OWNED_BID_CELL_LEN => Some(Bid {
                    signature: BigEndian::read_u64(&cell[..8]),
                    owned: true,
                }),
                _ => None,
            })
            .collect())
    }

    fn write_state(&self, state: LockState) -> Result<()> {
        let mut cell = [0u8; STATE_CELL_LEN];
        cell[0] = state as u8;
        BigEndian::write_u64(&mut cell[1..], self.clock.now());
        self.cells().put(&self.name, STATE_COL, &cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachingStore;
    use crate::clock::{ManualClock, SystemClock};
    use crate::config::CacheConfig;
    use crate::store::MemoryStore;
    use std::sync::Barrier;
    use std::time::Duration;

    type Lock = StoreLock<Arc<MemoryStore>, Arc<MemoryStore>>;

    struct Fixture {
        data: Arc<MemoryStore>,
        meta: Arc<RowMeta<Arc<MemoryStore>>>,
        clock: Arc<ManualClock>,
        config: LockConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                data: Arc::new(MemoryStore::new(64)),
                meta: Arc::new(RowMeta::new(Arc::new(MemoryStore::new(64)))),
                clock: Arc::new(ManualClock::new(1_000)),
                config: LockConfig::default().settle_interval(Duration::ZERO),
            }
        }

        fn lock(&self, signature: u64) -> Lock {
            StoreLock::with_signature(
                "write.lock",
                self.data.clone(),
                self.meta.clone(),
                self.config.clone(),
                self.clock.clone(),
                signature,
            )
        }
    }

    #[test]
    fn test_uncontended_obtain() -> Result<()> {
        let fx = Fixture::new();
        let mut lock = fx.lock(42);
        assert!(!lock.is_locked()?);
        assert!(lock.obtain()?);
        assert!(lock.is_owner());
        assert!(lock.is_locked()?);
        assert_eq!(fx.meta.length("write.lock")?, 1);

        // Idempotent while held.
        assert!(lock.obtain()?);
        Ok(())
    }

    #[test]
    fn test_held_lock_refuses_others() -> Result<()> {
        let fx = Fixture::new();
        let mut owner = fx.lock(1);
        let mut other = fx.lock(u64::MAX);
        assert!(owner.obtain()?);
        assert!(!other.obtain()?);
        assert!(fx.data.get("write.lock", u64::MAX)?.is_none());
        Ok(())
    }

    #[test]
    fn test_highest_signature_wins() -> Result<()> {
        let fx = Fixture::new();
        let mut bidders = vec![fx.lock(5), fx.lock(9), fx.lock(7)];

        for bidder in &bidders {
            assert!(bidder.can_bid()?);
        }
        for bidder in &bidders {
            bidder.register()?;
        }
        let won: Vec<bool> = bidders
            .iter_mut()
            .map(|b| b.resolve())
            .collect::<Result<_>>()?;

        assert_eq!(won, vec![false, true, false]);
        assert_eq!(fx.data.columns("write.lock"), vec![0, 9]);
        Ok(())
    }

    #[test]
    fn test_concurrent_obtain_has_one_winner() -> Result<()> {
        let fx = Fixture::new();
        let config = LockConfig::default().settle_interval(Duration::from_millis(100));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mut lock = StoreLock::new(
                    "write.lock",
                    fx.data.clone(),
                    fx.meta.clone(),
                    config.clone(),
                    Arc::new(SystemClock),
                );
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    lock.obtain()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Result<Vec<bool>>>()?
            .into_iter()
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        Ok(())
    }

    #[test]
    fn test_owner_close_releases() -> Result<()> {
        let fx = Fixture::new();
        let mut owner = fx.lock(3);
        assert!(owner.obtain()?);
        owner.close()?;

        assert!(!owner.is_owner());
        assert!(!owner.is_locked()?);
        assert!(!fx.data.has_key("write.lock")?);
        assert!(fx.meta.length("write.lock").unwrap_err().is_not_found());

        let mut next = fx.lock(2);
        assert!(next.obtain()?);
        Ok(())
    }

    #[test]
    fn test_non_owner_close_keeps_lock() -> Result<()> {
        let fx = Fixture::new();
        let mut owner = fx.lock(3);
        let mut loser = fx.lock(8);
        assert!(owner.obtain()?);
        assert!(!loser.obtain()?);
        loser.close()?;

        assert!(owner.is_locked()?);
        assert_eq!(fx.data.columns("write.lock"), vec![0, 3]);
        Ok(())
    }

    #[test]
    fn test_stale_trying_state_expires() -> Result<()> {
        let fx = Fixture::new();
        let crashed = fx.lock(1);
        crashed.register()?;

        let mut next = fx.lock(100);
        assert!(!next.obtain()?);

        fx.clock.advance(29_999);
        assert!(!next.obtain()?);

        fx.clock.advance(1);
        assert!(next.obtain()?);
        Ok(())
    }

    #[test]
    fn test_trying_without_expiry_never_clears() -> Result<()> {
        let mut fx = Fixture::new();
        fx.config = fx.config.clone().trying_expiry(None);
        fx.lock(1).register()?;

        fx.clock.advance(u32::MAX as u64);
        assert!(!fx.lock(100).obtain()?);
        Ok(())
    }

    #[test]
    fn test_abandoned_higher_bid_is_cleared_on_expiry() -> Result<()> {
        let fx = Fixture::new();
        fx.lock(u64::MAX - 1).register()?;

        let mut next = fx.lock(100);
        fx.clock.advance(60_000);
        assert!(next.obtain()?);
        assert_eq!(fx.data.columns("write.lock"), vec![0, 100]);
        Ok(())
    }

    #[test]
    fn test_late_bidder_restores_owner_state() -> Result<()> {
        let fx = Fixture::new();
        let mut owner = fx.lock(3);
        assert!(owner.obtain()?);

        // Read UNLOCKED before the owner wrote LOCKED, then registered.
        let mut late = fx.lock(9);
        late.register()?;
        assert!(!late.resolve()?);

        let state = fx.data.get("write.lock", 0)?.unwrap();
        assert_eq!(state[0], LockState::Locked as u8);
        assert_eq!(fx.data.columns("write.lock"), vec![0, 3]);

        fx.clock.advance(60_000);
        assert!(!fx.lock(u64::MAX).obtain()?);
        assert!(owner.is_locked()?);
        Ok(())
    }

    #[test]
    fn test_crashed_late_bidder_cannot_hand_over_held_lock() -> Result<()> {
        let fx = Fixture::new();
        let mut owner = fx.lock(3);
        assert!(owner.obtain()?);

        // Overwrites LOCKED with TRYING, then dies before resolving.
        fx.lock(9).register()?;
        fx.clock.advance(60_000);

        let mut next = fx.lock(u64::MAX);
        assert!(!next.obtain()?);
        let state = fx.data.get("write.lock", 0)?.unwrap();
        assert_eq!(state[0], LockState::Locked as u8);
        assert!(fx.data.get("write.lock", u64::MAX)?.is_none());
        Ok(())
    }

    #[test]
    fn test_cached_store_locks_hit_the_shared_backend() -> Result<()> {
        let fx = Fixture::new();
        let first = Arc::new(CachingStore::new(fx.data.clone(), CacheConfig::default()));
        let second = Arc::new(CachingStore::new(fx.data.clone(), CacheConfig::default()));
        let lock_on = |cache: &Arc<CachingStore<Arc<MemoryStore>>>, signature| {
            StoreLock::with_signature(
                "write.lock",
                cache.clone(),
                fx.meta.clone(),
                fx.config.clone(),
                fx.clock.clone(),
                signature,
            )
        };

        let mut p1 = lock_on(&first, 5);
        assert!(p1.obtain()?);
        let state = fx.data.get("write.lock", 0)?.unwrap();
        assert_eq!(state[0], LockState::Locked as u8);
        assert_eq!(first.cached_len(), 0);

        fx.clock.advance(31_000);
        let mut p2 = lock_on(&second, 9);
        assert!(p2.is_locked()?);
        assert!(!p2.obtain()?);
        assert!(p1.is_owner());

        p1.close()?;
        assert!(!fx.data.has_key("write.lock")?);
        assert!(p2.obtain()?);
        Ok(())
    }

    #[test]
    fn test_zero_signature_is_bumped() {
        let fx = Fixture::new();
        assert_eq!(fx.lock(0).signature(), 1);
    }
}
