//! The object-store client contract.
//!
//! The file-cache core never talks to a real object-storage provider: it
//! only depends on this trait. Binding it to an HTTP-based SDK for a real
//! provider is the job of an external collaborator outside this crate.

use async_trait::async_trait;

/// Metadata for the current version of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub generation: i64,
    pub size: u64,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum StoreError {
    #[error("object generation changed mid-read")]
    GenerationChanged,
    #[error("object store error: {0}")]
    Other(std::sync::Arc<anyhow::Error>),
}

impl From<anyhow::Error> for StoreError {
    fn from(source: anyhow::Error) -> Self {
        StoreError::Other(std::sync::Arc::new(source))
    }
}

/// Ranged reads of an immutable `(bucket, object, generation)` tuple.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync + 'static {
    async fn stat(&self, bucket: &str, object_name: &str) -> anyhow::Result<ObjectMetadata>;

    /// Reads `[offset, offset + len)` of `object_name` at `generation`. Must
    /// fail with [`StoreError::GenerationChanged`], not silently return data
    /// from a newer version, if the store observes the object changed
    /// mid-read.
    async fn read_range(
        &self,
        bucket: &str,
        object_name: &str,
        generation: i64,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, StoreError>;
}

/// An in-memory double satisfying [`ObjectStoreClient`], used by this
/// crate's own tests so the coordinator and download job can be exercised
/// without a real network dependency.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryObjectStore {
        objects: Mutex<HashMap<(String, String), (i64, Vec<u8>)>>,
    }

    impl InMemoryObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, bucket: &str, object_name: &str, generation: i64, data: Vec<u8>) {
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.to_string(), object_name.to_string()), (generation, data));
        }

        pub fn bump_generation(&self, bucket: &str, object_name: &str, generation: i64, data: Vec<u8>) {
            self.put(bucket, object_name, generation, data);
        }
    }

    #[async_trait]
    impl ObjectStoreClient for InMemoryObjectStore {
        async fn stat(&self, bucket: &str, object_name: &str) -> anyhow::Result<ObjectMetadata> {
            let objects = self.objects.lock().unwrap();
            let (generation, data) = objects
                .get(&(bucket.to_string(), object_name.to_string()))
                .ok_or_else(|| anyhow::anyhow!("no such object: {bucket}/{object_name}"))?;
            Ok(ObjectMetadata {
                generation: *generation,
                size: data.len() as u64,
            })
        }

        async fn read_range(
            &self,
            bucket: &str,
            object_name: &str,
            generation: i64,
            offset: u64,
            len: u64,
        ) -> Result<Vec<u8>, StoreError> {
            let objects = self.objects.lock().unwrap();
            let (current_generation, data) = objects
                .get(&(bucket.to_string(), object_name.to_string()))
                .ok_or_else(|| anyhow::anyhow!("no such object: {bucket}/{object_name}"))?;

            if *current_generation != generation {
                return Err(StoreError::GenerationChanged);
            }

            let start = (offset as usize).min(data.len());
            let end = ((offset + len) as usize).min(data.len());
            Ok(data[start..end].to_vec())
        }
    }
}
