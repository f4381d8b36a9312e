pub mod cache;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod hasher;
pub mod lock;
pub mod meta;
pub mod row;
pub mod scheduler;
pub mod store;
pub mod translate;

#[cfg(test)]
mod testutil;

pub use cache::{CachingStore, EvictionTask};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, ColumnConfig, Consistency, DirectoryConfig, Eviction, LockConfig, SplitConfig,
};
pub use directory::Directory;
pub use error::{Error, Result};
pub use hasher::Hasher;
pub use lock::StoreLock;
pub use meta::RowMeta;
pub use row::{RowReader, RowWriter};
pub use scheduler::{BackgroundTask, Scheduler};
pub use store::{Linker, MemoryStore, SplitStore, Store, WideColumnStore};
pub use translate::{TableTranslator, TranslateStore, Translator};
