use std::sync::Arc;

use scc::HashMap as ConcurrentHashMap;

use crate::job::DownloadJob;

/// Process-wide registry of in-flight download jobs, keyed by the same byte
/// string as the LRU index.
///
/// `max_parallel_downloads` is enforced by a single semaphore shared by
/// every job this registry creates: a job's first `download(wait=true)`
/// call blocks on a permit before its task does any I/O, rather than the
/// registry refusing to create the job at all.
pub struct JobRegistry {
    jobs: ConcurrentHashMap<Vec<u8>, Arc<DownloadJob>>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl JobRegistry {
    pub fn new(max_parallel_downloads: Option<usize>) -> Arc<Self> {
        let permits = max_parallel_downloads.unwrap_or(tokio::sync::Semaphore::MAX_PERMITS);
        Arc::new(Self {
            jobs: ConcurrentHashMap::new(),
            semaphore: Arc::new(tokio::sync::Semaphore::new(permits)),
        })
    }

    pub fn semaphore(&self) -> Arc<tokio::sync::Semaphore> {
        Arc::clone(&self.semaphore)
    }

    pub fn get(&self, key: &[u8]) -> Option<Arc<DownloadJob>> {
        self.jobs.get(key).map(|entry| Arc::clone(entry.get()))
    }

    /// Returns the existing job for `key`, or builds one with `ctor` and
    /// stores it. `ctor` may run even if another thread wins the race to
    /// insert first; the loser's job is simply dropped, never started.
    pub fn create_if_not_exists(
        &self,
        key: Vec<u8>,
        ctor: impl FnOnce() -> Arc<DownloadJob>,
    ) -> Arc<DownloadJob> {
        if let Some(entry) = self.jobs.get(&key) {
            return Arc::clone(entry.get());
        }

        let job = ctor();
        match self.jobs.insert(key.clone(), Arc::clone(&job)) {
            Ok(()) => job,
            Err(_) => self
                .jobs
                .get(&key)
                .map(|entry| Arc::clone(entry.get()))
                .unwrap_or(job),
        }
    }

    pub(crate) fn remove(&self, key: &[u8]) {
        self.jobs.remove(key);
    }

    /// Fetches the job under no held lock (scc's map is lock-free per
    /// bucket), then invalidates it. Never call `invalidate()` while
    /// holding any lock the job's removal callback might re-enter.
    pub async fn invalidate_and_remove(&self, key: &[u8]) {
        if let Some(job) = self.get(key) {
            job.invalidate().await;
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Snapshots every live job, then invalidates each. Used at process
    /// shutdown.
    pub async fn destroy(&self) {
        let mut jobs = Vec::with_capacity(self.jobs.len());
        self.jobs
            .retain(|_, job| {
                jobs.push(Arc::clone(job));
                true
            });

        for job in jobs {
            job.invalidate().await;
        }
    }
}
