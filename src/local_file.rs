//! On-disk layout helpers: directory/file creation with the permissions the
//! design relies on, and the truncate-then-unlink half of the cleanup
//! protocol.

use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Creates `{cache_dir}/file-cache` (mode 0700) if it doesn't already exist.
pub async fn ensure_root(root: &Path) -> io::Result<()> {
    tokio::fs::create_dir_all(root).await?;
    set_permissions(root, 0o700).await
}

/// Creates the bucket sub-directory and an empty, owner-read-only (0600)
/// file at `path` if it does not already exist. Existing files are left
/// untouched.
pub async fn ensure_local_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
        set_permissions(parent, 0o700).await?;
    }

    match tokio::fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .await
    {
        Ok(_) => set_permissions(path, 0o600).await,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Frees the bytes backing `path` immediately, regardless of any open
/// descriptor. Treats a missing file as success (idempotent).
pub async fn truncate_to_zero(path: &Path) -> io::Result<()> {
    match tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Unlinks `path`. On POSIX the inode survives until the last open
/// descriptor closes — the property the whole eviction design leans on.
/// Treats a missing file as success (idempotent).
pub async fn unlink(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

pub fn object_path(root: &Path, bucket_name: &str, object_name: &str) -> PathBuf {
    root.join(bucket_name).join(object_name)
}

#[cfg(unix)]
async fn set_permissions(path: &Path, mode: u32) -> io::Result<()> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
    })
    .await
    .map_err(|e| io::Error::other(e.to_string()))?
}

#[cfg(not(unix))]
async fn set_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn ensure_local_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket").join("object");

        ensure_local_file(&path).await.unwrap();
        assert!(path.exists());
        ensure_local_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn truncate_and_unlink_are_idempotent_on_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-created");

        truncate_to_zero(&path).await.unwrap();
        unlink(&path).await.unwrap();
    }

    #[tokio::test]
    async fn truncate_frees_bytes_while_unlink_preserves_open_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket").join("object");
        ensure_local_file(&path).await.unwrap();
        tokio::fs::write(&path, vec![1u8; 4096]).await.unwrap();

        let open_handle = std::fs::File::open(&path).unwrap();

        truncate_to_zero(&path).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        unlink(&path).await.unwrap();
        assert!(!path.exists());

        // the already-open descriptor is still valid per POSIX semantics
        drop(open_handle);
    }
}
