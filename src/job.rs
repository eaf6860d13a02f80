use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;
use crate::file_info::FileInfo;
use crate::key::CacheKey;
use crate::lru::LruIndex;
use crate::registry::JobRegistry;
use crate::store::{ObjectStoreClient, StoreError};

/// Lifecycle of a single object's download into its local cache file.
///
/// ```text
///                 start()                progress(off>=size)
/// NotStarted ─────────────→ Downloading ─────────────────→ Completed
///                               │
///                               ├─── err ─────→ Failed
///                               │
///                               └─── invalidate() ─→ Invalid
/// Failed ────────── invalidate() ─────────────────→ Invalid
/// ```
///
/// `Invalid` is terminal: a job that reaches it never transitions again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Downloading,
    Completed,
    Failed,
    Invalid,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Invalid)
    }
}

/// A `Clone`-able reduction of a download failure, small enough to sit in a
/// `Status` snapshot without wrapping the whole error chain.
#[derive(Clone, Debug)]
pub enum JobError {
    GenerationChanged,
    Cancelled,
    Io(Arc<str>),
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::GenerationChanged => write!(f, "object generation changed mid-download"),
            JobError::Cancelled => write!(f, "download cancelled"),
            JobError::Io(msg) => write!(f, "{msg}"),
        }
    }
}

/// Atomic snapshot of a job's progress.
#[derive(Clone, Debug)]
pub struct Status {
    pub phase: Phase,
    pub offset: u64,
    pub err: Option<JobError>,
}

struct State {
    phase: Phase,
    offset: u64,
    err: Option<JobError>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// The single-writer task that brings a local cache file's authoritative
/// prefix up to the object's full size.
///
/// At most one download task runs per job; `offset` is published only by
/// that task. `status()` may be read concurrently from any number of
/// readers. `invalidate()` is idempotent and, once it returns, guarantees no
/// further writes will occur to the job's local file.
pub struct DownloadJob {
    bucket: String,
    object_name: String,
    generation: i64,
    file_size: u64,
    path: PathBuf,
    chunk_size: u64,
    store: Arc<dyn ObjectStoreClient>,
    semaphore: Arc<tokio::sync::Semaphore>,

    state: Mutex<State>,
    notify: Notify,
    cancel: CancellationToken,

    registry: Weak<JobRegistry>,
    registry_key: Vec<u8>,
    removed_from_registry: AtomicBool,

    // Publishing progress into the coordinator's index (rather than keeping
    // offset solely in `state`) is what lets `CacheHandle::read`'s
    // revalidation step see real download progress without polling the job.
    index: Arc<LruIndex<FileInfo>>,
    cache_key: CacheKey,
}

impl DownloadJob {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        bucket: String,
        object_name: String,
        generation: i64,
        file_size: u64,
        path: PathBuf,
        chunk_size: u64,
        store: Arc<dyn ObjectStoreClient>,
        semaphore: Arc<tokio::sync::Semaphore>,
        registry: Weak<JobRegistry>,
        registry_key: Vec<u8>,
        index: Arc<LruIndex<FileInfo>>,
        cache_key: CacheKey,
    ) -> Arc<Self> {
        Arc::new(Self {
            bucket,
            object_name,
            generation,
            file_size,
            path,
            chunk_size,
            store,
            semaphore,
            state: Mutex::new(State {
                phase: Phase::NotStarted,
                offset: 0,
                err: None,
                task: None,
            }),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
            registry,
            registry_key,
            removed_from_registry: AtomicBool::new(false),
            index,
            cache_key,
        })
    }

    pub fn status(&self) -> Status {
        let s = self.state.lock();
        Status {
            phase: s.phase,
            offset: s.offset,
            err: s.err.clone(),
        }
    }

    /// Starts the download task on first call (if `NotStarted`). If `wait`,
    /// blocks until `offset >= required_offset`, a terminal phase is
    /// reached, or `cancel` fires — whichever happens first. Otherwise
    /// returns the current status immediately.
    pub async fn download(
        self: &Arc<Self>,
        required_offset: u64,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<Status, CacheError> {
        self.ensure_started();

        if !wait {
            return Ok(self.status());
        }

        loop {
            // The `Notified` future must be created before the status check below,
            // not after: it snapshots the notification generation at creation time,
            // so a `notify_waiters()` landing between this line and the `select!`
            // still wakes it. Creating it only after finding the condition unmet
            // would leave a window where that wakeup is lost for good.
            let notified = self.notify.notified();

            let status = self.status();
            if status.offset >= required_offset || status.phase.is_terminal() {
                return Ok(status);
            }

            tokio::select! {
                _ = notified => continue,
                _ = cancel.cancelled() => return Err(CacheError::Cancelled),
                _ = self.cancel.cancelled() => continue,
            }
        }
    }

    fn ensure_started(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.phase == Phase::NotStarted {
            state.phase = Phase::Downloading;
            let this = Arc::clone(self);
            state.task = Some(tokio::spawn(async move { this.run().await }));
        }
    }

    async fn run(self: Arc<Self>) {
        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        tracing::debug!(
            bucket = %self.bucket,
            object = %self.object_name,
            generation = self.generation,
            "download started"
        );

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                self.finish(Phase::Failed, Some(JobError::Io(e.to_string().into())));
                return;
            }
        };

        let mut offset = 0u64;
        while offset < self.file_size {
            if self.cancel.is_cancelled() {
                tracing::trace!(
                    bucket = %self.bucket,
                    object = %self.object_name,
                    offset,
                    "download cancelled"
                );
                return;
            }

            let want = self.chunk_size.min(self.file_size - offset);
            match self
                .store
                .read_range(&self.bucket, &self.object_name, self.generation, offset, want)
                .await
            {
                Ok(chunk) => {
                    if chunk.is_empty() {
                        self.finish(
                            Phase::Failed,
                            Some(JobError::Io("object store returned an empty range".into())),
                        );
                        return;
                    }
                    if let Err(e) = write_chunk(&file, offset, &chunk).await {
                        self.finish(Phase::Failed, Some(JobError::Io(e.to_string().into())));
                        return;
                    }
                    offset += chunk.len() as u64;
                    self.publish_offset(offset);
                }
                Err(StoreError::GenerationChanged) => {
                    self.finish(Phase::Failed, Some(JobError::GenerationChanged));
                    return;
                }
                Err(StoreError::Other(e)) => {
                    self.finish(Phase::Failed, Some(JobError::Io(e.to_string().into())));
                    return;
                }
            }
        }

        tracing::debug!(
            bucket = %self.bucket,
            object = %self.object_name,
            generation = self.generation,
            "download completed"
        );
        self.finish(Phase::Completed, None);
    }

    fn publish_offset(&self, offset: u64) {
        {
            let mut s = self.state.lock();
            if s.phase.is_terminal() {
                return;
            }
            debug_assert!(offset >= s.offset, "download progress must be monotonic");
            s.offset = offset;
        }

        // Best-effort: if the entry was evicted from the index mid-download
        // this fails with `InvalidEntry`, which is fine — the coordinator's
        // cleanup protocol already invalidated this job on that path.
        let fi = FileInfo {
            key: self.cache_key.clone(),
            object_generation: self.generation,
            offset,
            file_size: self.file_size,
        };
        let _ = self.index.update_in_place(&self.registry_key, fi);

        self.notify.notify_waiters();
    }

    /// Called once, from exactly one of `run()` reaching a terminal phase or
    /// `invalidate()` forcing one. No-op if the job already reached a
    /// terminal phase through the other path.
    fn finish(&self, phase: Phase, err: Option<JobError>) {
        {
            let mut s = self.state.lock();
            if s.phase.is_terminal() {
                return;
            }
            s.phase = phase;
            s.err = err;
        }
        self.notify.notify_waiters();
        self.remove_from_registry();
    }

    /// Idempotent. If the download task is running, cancels it and blocks
    /// until it has observed the cancellation — no further writes to the
    /// local file can occur after this returns.
    pub async fn invalidate(self: &Arc<Self>) {
        let (was_downloading, task) = {
            let mut s = self.state.lock();
            if s.phase == Phase::Invalid {
                return;
            }
            let was_downloading = s.phase == Phase::Downloading;
            s.phase = Phase::Invalid;
            (was_downloading, s.task.take())
        };

        self.cancel.cancel();

        if was_downloading {
            if let Some(task) = task {
                let _ = task.await;
            }
        }

        self.notify.notify_waiters();
        self.remove_from_registry();
    }

    fn remove_from_registry(&self) {
        if self.removed_from_registry.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.registry_key);
        }
    }
}

async fn write_chunk(file: &tokio::fs::File, offset: u64, chunk: &[u8]) -> std::io::Result<()> {
    use std::io::SeekFrom;
    use tokio::io::AsyncSeekExt;

    let mut file = file.try_clone().await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(chunk).await?;
    file.flush().await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::test_support::InMemoryObjectStore;

    fn new_job(
        store: Arc<InMemoryObjectStore>,
        path: PathBuf,
        file_size: u64,
        generation: i64,
        semaphore: Arc<tokio::sync::Semaphore>,
    ) -> Arc<DownloadJob> {
        let key = CacheKey::new("bucket", 0, "object").unwrap();
        let key_bytes = key.to_bytes();
        let index: Arc<LruIndex<FileInfo>> = Arc::new(LruIndex::new(u64::MAX));
        index
            .insert(key_bytes.clone(), FileInfo::new(key.clone(), generation, file_size))
            .unwrap();

        DownloadJob::new(
            "bucket".into(),
            "object".into(),
            generation,
            file_size,
            path,
            4096,
            store,
            semaphore,
            Weak::new(),
            key_bytes,
            index,
            key,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn progress_is_published_into_the_shared_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object");
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("bucket", "object", 1, vec![7u8; 10_000]);

        let key = CacheKey::new("bucket", 0, "object").unwrap();
        let key_bytes = key.to_bytes();
        let index: Arc<LruIndex<FileInfo>> = Arc::new(LruIndex::new(u64::MAX));
        index
            .insert(key_bytes.clone(), FileInfo::new(key.clone(), 1, 10_000))
            .unwrap();

        let semaphore = Arc::new(tokio::sync::Semaphore::new(4));
        let job = DownloadJob::new(
            "bucket".into(),
            "object".into(),
            1,
            10_000,
            path,
            4096,
            store,
            semaphore,
            Weak::new(),
            key_bytes.clone(),
            Arc::clone(&index),
            key,
        );

        let cancel = CancellationToken::new();
        let status = job.download(10_000, true, &cancel).await.unwrap();
        assert_eq!(status.phase, Phase::Completed);

        let fi = index.lookup_peek(&key_bytes).unwrap();
        assert_eq!(fi.offset, 10_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn downloads_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object");
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("bucket", "object", 1, vec![7u8; 10_000]);

        let semaphore = Arc::new(tokio::sync::Semaphore::new(4));
        let job = new_job(store, path, 10_000, 1, semaphore);

        let cancel = CancellationToken::new();
        let status = job.download(10_000, true, &cancel).await.unwrap();
        assert_eq!(status.phase, Phase::Completed);
        assert_eq!(status.offset, 10_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn generation_change_fails_the_job_without_self_invalidating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object");
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("bucket", "object", 1, vec![1u8; 10_000]);

        let semaphore = Arc::new(tokio::sync::Semaphore::new(4));
        let job = new_job(store.clone(), path, 10_000, 1, semaphore);

        // generation observed by the download loop no longer matches storage
        store.put("bucket", "object", 2, vec![2u8; 10_000]);

        let cancel = CancellationToken::new();
        let status = job.download(10_000, true, &cancel).await.unwrap();
        assert_eq!(status.phase, Phase::Failed);
        assert!(matches!(status.err, Some(JobError::GenerationChanged)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wait_cancellation_does_not_invalidate_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object");
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("bucket", "object", 1, vec![9u8; 50 * 1024 * 1024]);

        let semaphore = Arc::new(tokio::sync::Semaphore::new(4));
        let job = new_job(store, path, 50 * 1024 * 1024, 1, semaphore);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = job.download(50 * 1024 * 1024, true, &cancel).await;
        assert!(matches!(result, Err(CacheError::Cancelled)));

        // another waiter may still ride the same job to completion
        let cancel2 = CancellationToken::new();
        let status = job.download(50 * 1024 * 1024, true, &cancel2).await.unwrap();
        assert_eq!(status.phase, Phase::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalidate_is_idempotent_and_blocks_for_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object");
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("bucket", "object", 1, vec![3u8; 50 * 1024 * 1024]);

        let semaphore = Arc::new(tokio::sync::Semaphore::new(4));
        let job = new_job(store, path, 50 * 1024 * 1024, 1, semaphore);

        let cancel = CancellationToken::new();
        let _ = job.download(4096, true, &cancel).await.unwrap();

        job.invalidate().await;
        job.invalidate().await;

        assert_eq!(job.status().phase, Phase::Invalid);
    }
}
