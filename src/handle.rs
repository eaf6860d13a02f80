//! The reader-facing handle returned by [`crate::coordinator::Coordinator::acquire`].

use std::io::SeekFrom;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;
use crate::file_info::FileInfo;
use crate::job::{DownloadJob, Phase};
use crate::lru::LruIndex;

/// Smallest unit the handle asks a [`DownloadJob`] to make progress to: a
/// read that falls within one already-downloaded chunk never blocks on a
/// fresh chunk boundary.
pub const READ_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// One reader's view of a single cached object.
///
/// Tracks the offset of its own previous read to distinguish a sequential
/// scan (worth blocking on, since the download is presumably already
/// heading that way) from a random access (worth blocking on only if the
/// caller opted into prefetching with `allow_random_prefetch`).
pub struct CacheHandle {
    file: tokio::fs::File,
    job: Arc<DownloadJob>,
    index: Arc<LruIndex<FileInfo>>,
    key_bytes: Vec<u8>,
    allow_random_prefetch: bool,
    prev_offset: u64,
    closed: bool,
}

impl CacheHandle {
    pub(crate) fn new(
        file: tokio::fs::File,
        job: Arc<DownloadJob>,
        index: Arc<LruIndex<FileInfo>>,
        key_bytes: Vec<u8>,
        allow_random_prefetch: bool,
        initial_offset: u64,
    ) -> Self {
        Self {
            file,
            job,
            index,
            key_bytes,
            allow_random_prefetch,
            prev_offset: initial_offset,
            closed: false,
        }
    }

    /// Reads up to `buf.len()` bytes starting at `offset` of the object at
    /// `generation`, returning the number of bytes actually placed in `buf`
    /// and whether the data was already resident rather than freshly
    /// awaited off a running download.
    ///
    /// A request past the object's recorded size is clamped rather than
    /// treated as an error: callers that read past EOF get a short read,
    /// the same as a local file.
    pub async fn read(
        &mut self,
        generation: i64,
        offset: u64,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<(usize, bool), CacheError> {
        if self.closed {
            return Err(CacheError::InvalidFileInfoCache);
        }

        let fi = self
            .index
            .lookup_peek(&self.key_bytes)
            .ok_or(CacheError::InvalidFileInfoCache)?;
        if fi.object_generation != generation {
            return Err(CacheError::InvalidFileInfoCache);
        }

        let file_size = fi.file_size;
        let required_offset = offset.saturating_add(buf.len() as u64).min(file_size);
        if required_offset <= offset {
            self.prev_offset = offset;
            return Ok((0, true));
        }

        let sequential = offset <= self.prev_offset.saturating_add(READ_CHUNK_SIZE);
        let wait = sequential || self.allow_random_prefetch;

        let status = self.job.download(required_offset, wait, cancel).await?;
        match status.phase {
            Phase::Failed => {
                return Err(status
                    .err
                    .clone()
                    .map(CacheError::from)
                    .unwrap_or(CacheError::InvalidFileInfoCache));
            }
            Phase::Invalid => return Err(CacheError::InvalidFileInfoCache),
            _ => {}
        }

        let available = status.offset.min(file_size);
        let read_end = available.min(required_offset);
        if read_end <= offset {
            self.prev_offset = offset;
            return Ok((0, false));
        }

        let to_read = (read_end - offset) as usize;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.read_exact(&mut buf[..to_read]).await?;
        self.prev_offset = offset + to_read as u64;

        match self.index.lookup(&self.key_bytes) {
            Some(current) if current.object_generation == generation && current.offset >= required_offset => {
                Ok((to_read, true))
            }
            // Eviction, generation change, or a truncation race landed between the read
            // above and this revalidation: the bytes just read are not trustworthy, so
            // this must fail clean rather than hand back stale or torn data.
            _ => {
                self.closed = true;
                Err(CacheError::InvalidFileInfoCache)
            }
        }
    }

    /// Marks the handle unusable for further reads. Does not touch the
    /// underlying download job or index entry — other handles and readers
    /// may still be using them.
    pub fn close(&mut self) {
        self.closed = true;
    }
}
