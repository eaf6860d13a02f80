use std::sync::Arc;

use crate::config::Config;
use crate::error::CacheError;
use crate::file_info::FileInfo;
use crate::handle::CacheHandle;
use crate::job::{DownloadJob, Phase};
use crate::key::CacheKey;
use crate::local_file;
use crate::lru::LruIndex;
use crate::registry::JobRegistry;
use crate::store::ObjectStoreClient;

/// Single owner of the LRU index and the job registry, and the only
/// externally visible ingress into the cache.
///
/// All admit/invalidate decisions run under one mutex (`lock`), which is
/// held across the brief async file-system calls `acquire` needs (creating
/// a parent directory, opening the local file) but never across a blocking
/// download wait — only `CacheHandle::read` suspends on that.
pub struct Coordinator {
    config: Config,
    index: Arc<LruIndex<FileInfo>>,
    registry: Arc<JobRegistry>,
    store: Arc<dyn ObjectStoreClient>,
    lock: tokio::sync::Mutex<()>,
}

/// Identity of the remote object an `acquire` call is about, as observed by
/// the caller right now — this is what pins the admission decision to a
/// specific generation.
#[derive(Clone, Debug)]
pub struct ObjectRef {
    pub bucket_name: String,
    pub bucket_created_at: u64,
    pub object_name: String,
    pub generation: i64,
    pub size: u64,
}

impl Coordinator {
    pub async fn new(config: Config, store: Arc<dyn ObjectStoreClient>) -> std::io::Result<Arc<Self>> {
        local_file::ensure_root(&config.file_cache_root()).await?;
        let index = Arc::new(LruIndex::new(config.max_bytes));
        let registry = JobRegistry::new(config.max_parallel_downloads);

        Ok(Arc::new(Self {
            config,
            index,
            registry,
            store,
            lock: tokio::sync::Mutex::new(()),
        }))
    }

    fn local_path(&self, key: &CacheKey) -> std::path::PathBuf {
        local_file::object_path(
            &self.config.file_cache_root(),
            &key.bucket_name,
            &key.object_name,
        )
    }

    fn is_excluded(&self, bucket_name: &str, object_name: &str) -> bool {
        let name = format!("{bucket_name}/{object_name}");
        if let Some(re) = &self.config.exclude_regex {
            if re.is_match(&name) {
                return true;
            }
        }
        if let Some(re) = &self.config.include_regex {
            if !re.is_match(&name) {
                return true;
            }
        }
        false
    }

    /// Atomically admits a fresh entry or reuses an existing one, ensures a
    /// download job exists, and hands back a handle a reader can call
    /// `read` against.
    pub async fn acquire(
        self: &Arc<Self>,
        object: &ObjectRef,
        allow_random_prefetch: bool,
        initial_offset: u64,
    ) -> Result<CacheHandle, CacheError> {
        if self.is_excluded(&object.bucket_name, &object.object_name) {
            return Err(CacheError::ExcludedByRegex);
        }

        let key = CacheKey::new(
            object.bucket_name.clone(),
            object.bucket_created_at,
            object.object_name.clone(),
        )?;
        let key_bytes = key.to_bytes();

        // `cache_file_for_range_read = false` withdraws permission to admit a
        // fresh entry for a non-zero-offset first read (step 2 below); it does
        // not otherwise change the wait policy `CacheHandle` applies to reads
        // against an entry that already exists.
        let admits_for_random_read = allow_random_prefetch && self.config.cache_file_for_range_read;

        let _guard = self.lock.lock().await;

        if !admits_for_random_read && initial_offset != 0 && self.index.lookup_peek(&key_bytes).is_none() {
            return Err(CacheError::NotRequiredForRandomRead);
        }

        let mut need_admit = true;
        if let Some(fi) = self.index.lookup_peek(&key_bytes) {
            if !self.local_path(&fi.key).exists() {
                return Err(CacheError::NotPresentInCache);
            }

            let existing_job = self.registry.get(&key_bytes);
            let should_invalidate = fi.object_generation != object.generation
                || (existing_job.is_none() && fi.offset < fi.file_size)
                || existing_job
                    .as_ref()
                    .map(|job| matches!(job.status().phase, Phase::Failed | Phase::Invalid))
                    .unwrap_or(false);

            if should_invalidate {
                if let Some(erased) = self.index.erase(&key_bytes) {
                    self.cleanup(&erased).await;
                }
            } else {
                self.index.lookup(&key_bytes);
                need_admit = false;
            }
        }

        if need_admit {
            let fi = FileInfo::new(key.clone(), object.generation, object.size);
            let evicted = self.index.insert(key_bytes.clone(), fi)?;

            let path = self.local_path(&key);
            let store = Arc::clone(&self.store);
            let semaphore = self.registry.semaphore();
            let registry = Arc::downgrade(&self.registry);
            let chunk_size = self.config.download_chunk_size;
            let bucket_name = key.bucket_name.clone();
            let object_name = key.object_name.clone();
            let generation = object.generation;
            let file_size = object.size;
            let job_key = key_bytes.clone();
            let index = Arc::clone(&self.index);
            let cache_key = key.clone();

            self.registry.create_if_not_exists(key_bytes.clone(), move || {
                DownloadJob::new(
                    bucket_name,
                    object_name,
                    generation,
                    file_size,
                    path,
                    chunk_size,
                    store,
                    semaphore,
                    registry,
                    job_key,
                    index,
                    cache_key,
                )
            });

            for victim in evicted {
                self.cleanup(&victim).await;
            }

            local_file::ensure_local_file(&self.local_path(&key)).await?;
        }

        let job = self
            .registry
            .get(&key_bytes)
            .expect("a job must exist for an admitted or reused entry");

        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .open(self.local_path(&key))
            .await?;

        Ok(CacheHandle::new(
            file,
            job,
            Arc::clone(&self.index),
            key_bytes,
            allow_random_prefetch,
            initial_offset,
        ))
    }

    /// Removes `key` from the index when the filesystem layer observes the
    /// object itself was deleted.
    pub async fn invalidate(
        &self,
        bucket_name: &str,
        bucket_created_at: u64,
        object_name: &str,
    ) -> Result<(), CacheError> {
        let key = CacheKey::new(bucket_name, bucket_created_at, object_name)?;
        let key_bytes = key.to_bytes();

        let _guard = self.lock.lock().await;
        if let Some(fi) = self.index.erase(&key_bytes) {
            self.cleanup(&fi).await;
        }
        Ok(())
    }

    /// Removes every cached entry whose object name starts with
    /// `object_name_prefix`, for a directory deleted at the filesystem
    /// layer.
    pub async fn invalidate_prefix(
        &self,
        bucket_name: &str,
        bucket_created_at: u64,
        object_name_prefix: &str,
    ) {
        let prefix = CacheKey::prefix_bytes(bucket_name, bucket_created_at, object_name_prefix);

        let _guard = self.lock.lock().await;
        let erased = self.index.erase_prefix(&prefix);
        for fi in erased {
            self.cleanup(&fi).await;
        }
    }

    /// Invalidates every in-flight job. No on-disk cleanup: the cache
    /// directory is reclaimed wholesale on the next process start.
    pub async fn destroy(&self) {
        self.registry.destroy().await;
    }

    pub fn cache_file_for_range_read(&self) -> bool {
        self.config.cache_file_for_range_read
    }

    /// Invalidate-then-truncate-then-unlink: no writer can be active when
    /// the file shrinks, and disk accounting is reclaimed synchronously
    /// rather than whenever the OS gets around to freeing the inode.
    async fn cleanup(&self, fi: &FileInfo) {
        let key_bytes = fi.key.to_bytes();
        self.registry.invalidate_and_remove(&key_bytes).await;

        let path = self.local_path(&fi.key);
        if let Err(e) = local_file::truncate_to_zero(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to truncate evicted cache file");
        }
        if let Err(e) = local_file::unlink(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to unlink evicted cache file");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::test_support::InMemoryObjectStore;
    use crate::RawConfig;

    fn test_config(dir: &std::path::Path, max_size_mb: i64) -> Config {
        let raw = RawConfig {
            max_size_mb,
            cache_dir: dir.to_path_buf(),
            cache_file_for_range_read: true,
            download_chunk_size_mb: 1,
            max_parallel_downloads: 0,
            exclude_regex: None,
            include_regex: None,
            enable_crc: false,
            enable_o_direct: false,
        };
        Config::from_raw(&raw).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn acquire_then_read_round_trips_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("bkt", "obj", 1, vec![42u8; 4096]);

        let coordinator = Coordinator::new(test_config(dir.path(), 10), store).await.unwrap();
        let object = ObjectRef {
            bucket_name: "bkt".into(),
            bucket_created_at: 0,
            object_name: "obj".into(),
            generation: 1,
            size: 4096,
        };

        let mut handle = coordinator.acquire(&object, true, 0).await.unwrap();
        let cancel = tokio_util::sync::CancellationToken::new();
        let mut buf = vec![0u8; 4096];
        let (n, hit) = handle.read(1, 0, &mut buf, &cancel).await.unwrap();
        assert_eq!(n, 4096);
        assert!(hit);
        assert_eq!(buf, vec![42u8; 4096]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn generation_change_invalidates_and_readmits() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("bkt", "obj", 7, vec![1u8; 100]);

        let coordinator = Coordinator::new(test_config(dir.path(), 10), store.clone())
            .await
            .unwrap();

        let object_v7 = ObjectRef {
            bucket_name: "bkt".into(),
            bucket_created_at: 0,
            object_name: "obj".into(),
            generation: 7,
            size: 100,
        };
        let mut handle = coordinator.acquire(&object_v7, true, 0).await.unwrap();
        let cancel = tokio_util::sync::CancellationToken::new();
        let mut buf = vec![0u8; 50];
        handle.read(7, 0, &mut buf, &cancel).await.unwrap();

        store.bump_generation("bkt", "obj", 8, vec![2u8; 120]);
        let object_v8 = ObjectRef {
            generation: 8,
            size: 120,
            ..object_v7
        };

        let mut handle2 = coordinator.acquire(&object_v8, true, 0).await.unwrap();
        let mut buf2 = vec![0u8; 120];
        let (n, _) = handle2.read(8, 0, &mut buf2, &cancel).await.unwrap();
        assert_eq!(n, 120);
        assert_eq!(buf2, vec![2u8; 120]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reader_outliving_eviction_sees_invalid_file_info_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("bkt", "obj", 1, vec![5u8; 4096]);

        let coordinator = Coordinator::new(test_config(dir.path(), 10), store).await.unwrap();
        let object = ObjectRef {
            bucket_name: "bkt".into(),
            bucket_created_at: 0,
            object_name: "obj".into(),
            generation: 1,
            size: 4096,
        };

        let mut handle = coordinator.acquire(&object, true, 0).await.unwrap();
        let cancel = tokio_util::sync::CancellationToken::new();
        let mut buf = vec![0u8; 4096];
        handle.read(1, 0, &mut buf, &cancel).await.unwrap();

        coordinator.invalidate("bkt", 0, "obj").await.unwrap();

        let mut buf2 = vec![0u8; 4096];
        let err = handle.read(1, 0, &mut buf2, &cancel).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidFileInfoCache));
        handle.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn invalidate_prefix_erases_matching_directory_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("buk1ts", "a/f1", 1, vec![0u8; 8]);
        store.put("buk1ts", "a/f2", 1, vec![0u8; 8]);
        store.put("buk1ts", "b/f3", 1, vec![0u8; 8]);

        let coordinator = Coordinator::new(test_config(dir.path(), 10), store).await.unwrap();
        for object_name in ["a/f1", "a/f2", "b/f3"] {
            let object = ObjectRef {
                bucket_name: "buk1ts".into(),
                bucket_created_at: 0,
                object_name: object_name.into(),
                generation: 1,
                size: 8,
            };
            coordinator.acquire(&object, true, 0).await.unwrap();
        }

        coordinator.invalidate_prefix("buk1ts", 0, "a/").await;

        let remaining = coordinator
            .acquire(
                &ObjectRef {
                    bucket_name: "buk1ts".into(),
                    bucket_created_at: 0,
                    object_name: "b/f3".into(),
                    generation: 1,
                    size: 8,
                },
                true,
                0,
            )
            .await;
        assert!(remaining.is_ok());
    }
}
