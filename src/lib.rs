//! Bounded, concurrent on-disk cache for reads of immutable cloud
//! object-storage content.
//!
//! The coordinator owns a byte-budgeted LRU index of [`FileInfo`] records
//! and a registry of in-flight [`DownloadJob`]s; `acquire` is the one entry
//! point that ties the two together into a [`CacheHandle`] a caller reads
//! from. Talking to an actual object-storage provider is the responsibility
//! of whatever implements [`store::ObjectStoreClient`] outside this crate.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod file_info;
pub mod handle;
pub mod job;
mod key;
mod local_file;
pub mod lru;
pub mod registry;
pub mod store;

pub use config::{Config, ConfigError, RawConfig};
pub use coordinator::{Coordinator, ObjectRef};
pub use error::{CacheError, Result};
pub use file_info::FileInfo;
pub use handle::{CacheHandle, READ_CHUNK_SIZE};
pub use job::{DownloadJob, JobError, Phase, Status};
pub use key::CacheKey;
pub use lru::{CacheValue, LruIndex};
pub use registry::JobRegistry;
pub use store::{ObjectMetadata, ObjectStoreClient, StoreError};
