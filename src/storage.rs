// src/storage.rs

use std::path::PathBuf;

use async_trait::async_trait;
use log::{info, warn};

/// Object-storage capability: the workflows only ever discard images
/// (project deletion), so `delete` is the whole surface.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Best-effort delete. Failures are logged, never propagated; a
    /// leaked image must not block the deletion that triggered it.
    async fn delete(&self, url: &str);
}

/// Stores media as plain files under a root directory; URLs map to file
/// names by their last path segment.
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskStorage { root: root.into() }
    }
}

#[async_trait]
impl ObjectStorage for DiskStorage {
    async fn delete(&self, url: &str) {
        let name = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        if name.is_empty() || name.contains("..") {
            warn!("refusing to delete suspicious media url: {}", url);
            return;
        }
        let path = self.root.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("deleted media file {:?}", path),
            Err(err) => warn!("could not delete media file {:?}: {}", path, err),
        }
    }
}
