use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Which cached, non-dirty entries the eviction task may drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eviction {
    /// Keep everything until the cache is explicitly emptied.
    Never,
    /// Drop every clean entry on each cycle.
    Always,
    /// Drop entries not read within the given age.
    LastRead(Duration),
    /// Drop entries not written within the given age.
    LastWrite(Duration),
}

/// Configuration for the write-back cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Persist every put immediately (default: false)
    pub auto_flush: bool,

    /// Eviction policy (default: never)
    pub eviction: Eviction,

    /// How often the eviction task runs (default: 10s)
    pub eviction_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            auto_flush: false,
            eviction: Eviction::Never,
            eviction_interval: Duration::from_secs(10),
        }
    }
}

impl CacheConfig {
    pub fn auto_flush(mut self, enabled: bool) -> Self {
        self.auto_flush = enabled;
        self
    }

    pub fn eviction(mut self, eviction: Eviction) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }
}

/// Configuration for spreading one logical row over several physical rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Number of physical rows per logical row (default: 20)
    pub splits: u64,

    /// Separator between the logical key and the shard number (default: "/")
    pub delimiter: String,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            splits: 20,
            delimiter: "/".to_string(),
        }
    }
}

impl SplitConfig {
    pub fn new(splits: u64, delimiter: impl Into<String>) -> Self {
        Self {
            splits,
            delimiter: delimiter.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.splits == 0 {
            return Err(Error::InvalidConfig("splits must be positive".to_string()));
        }
        if self.delimiter.is_empty() {
            return Err(Error::InvalidConfig(
                "delimiter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Consistency level applied uniformly to every wide-column read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Consistency {
    #[default]
    One,
    Quorum,
    LocalQuorum,
    All,
}

/// Configuration for a wide-column backed store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    /// Namespace prepended to every key so several stores can share a table
    pub prefix: String,

    /// Bytes per column (default: 8KB)
    pub col_size: usize,

    /// Consistency for all statements (default: one)
    pub consistency: Consistency,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            prefix: "colfs".to_string(),
            col_size: 8192,
            consistency: Consistency::One,
        }
    }
}

impl ColumnConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn col_size(mut self, size: usize) -> Self {
        self.col_size = size;
        self
    }

    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }
}

/// Configuration for the store-backed lock protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a bidder waits for competing bids before the tie-break (default: 1s)
    pub settle_interval: Duration,

    /// Age after which a TRYING state is considered abandoned (default: 30s).
    /// `None` keeps abandoned states forever.
    pub trying_expiry: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            settle_interval: Duration::from_secs(1),
            trying_expiry: Some(Duration::from_secs(30)),
        }
    }
}

impl LockConfig {
    pub fn settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    pub fn trying_expiry(mut self, expiry: Option<Duration>) -> Self {
        self.trying_expiry = expiry;
        self
    }
}

/// Configuration for the virtual file directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Allow pointer-swap copies between translated stores (default: true)
    pub fast_copy: bool,

    pub lock: LockConfig,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            fast_copy: true,
            lock: LockConfig::default(),
        }
    }
}

impl DirectoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fast_copy(mut self, enabled: bool) -> Self {
        self.fast_copy = enabled;
        self
    }

    pub fn lock(mut self, config: LockConfig) -> Self {
        self.lock = config;
        self
    }
}
