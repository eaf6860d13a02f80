use std::path::PathBuf;

use crate::error::CacheError;

/// Identity of a cached object: `(bucket_name, bucket_creation_time, object_name)`.
///
/// The bucket creation time disambiguates a bucket name that was deleted and
/// re-created; two `CacheKey`s with the same name but different creation
/// times never collide in the index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub bucket_name: String,
    pub bucket_created_at: u64,
    pub object_name: String,
}

impl CacheKey {
    pub fn new(
        bucket_name: impl Into<String>,
        bucket_created_at: u64,
        object_name: impl Into<String>,
    ) -> Result<Self, CacheError> {
        let bucket_name = bucket_name.into();
        let object_name = object_name.into();
        if bucket_name.is_empty() || object_name.is_empty() {
            return Err(CacheError::InvalidKey);
        }

        Ok(Self {
            bucket_name,
            bucket_created_at,
            object_name,
        })
    }

    /// `bucket_name || decimal(bucket_created_at) || object_name`, the byte
    /// string the LRU index actually keys on.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.bucket_name.len() + 20 + self.object_name.len(),
        );
        out.extend_from_slice(self.bucket_name.as_bytes());
        out.extend_from_slice(self.bucket_created_at.to_string().as_bytes());
        out.extend_from_slice(self.object_name.as_bytes());
        out
    }

    /// Byte-string prefix for every key sharing this bucket (and creation
    /// time) whose object name starts with `object_prefix`. Used by
    /// directory deletion at the filesystem layer to erase a whole subtree
    /// from the index in one pass.
    pub fn prefix_bytes(
        bucket_name: &str,
        bucket_created_at: u64,
        object_prefix: &str,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(bucket_name.len() + 20 + object_prefix.len());
        out.extend_from_slice(bucket_name.as_bytes());
        out.extend_from_slice(bucket_created_at.to_string().as_bytes());
        out.extend_from_slice(object_prefix.as_bytes());
        out
    }

    /// Path of the local cache file relative to the `file-cache` root:
    /// `{bucket_name}/{object_name}`. Deliberately does not embed the
    /// creation time — the on-disk layout only needs to be unique within a
    /// live process, where a stale generation is caught by the generation
    /// check, not by the path.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.bucket_name).join(&self.object_name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_empty_names() {
        assert!(CacheKey::new("", 0, "object").is_err());
        assert!(CacheKey::new("bucket", 0, "").is_err());
    }

    #[test]
    fn renders_bucket_time_object() {
        let key = CacheKey::new("buk1ts", 7, "a/f1").unwrap();
        assert_eq!(key.to_bytes(), b"buk1ts7a/f1".to_vec());
    }

    #[test]
    fn prefix_matches_same_bucket_subtree() {
        let a = CacheKey::new("buk1ts", 0, "a/f1").unwrap();
        let b = CacheKey::new("buk1ts", 0, "a/f2").unwrap();
        let c = CacheKey::new("buk1ts", 0, "b/f3").unwrap();
        let prefix = CacheKey::prefix_bytes("buk1ts", 0, "a/");

        assert!(a.to_bytes().starts_with(&prefix));
        assert!(b.to_bytes().starts_with(&prefix));
        assert!(!c.to_bytes().starts_with(&prefix));
    }
}
