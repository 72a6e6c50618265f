use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::asset::ProcessedAsset;

/// Content- and metadata-keyed store of [`ProcessedAsset`] values (§4.2).
///
/// The cache itself has no notion of staleness beyond "present or absent" —
/// the caller (the [`crate::loader::GraphLoader`]) is the one that compares
/// `cache_data` against the live asset via
/// [`crate::asset::Asset::should_invalidate`] before trusting a hit.
pub trait CompileCache: Send + Sync {
    fn read(&self, path: &Path) -> Option<ProcessedAsset>;
    fn write(&self, path: &Path, processed: ProcessedAsset);
    fn invalidate(&self, path: &Path);
}

/// An in-process cache, durable only for the lifetime of the `Bundler`. This
/// is what a `cache: false` configuration effectively degrades the facade
/// to not calling at all; when `cache: true` without a persistent backing
/// store, this is the default.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<PathBuf, ProcessedAsset>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompileCache for MemoryCache {
    fn read(&self, path: &Path) -> Option<ProcessedAsset> {
        let hit = self.entries.lock().get(path).cloned();
        if hit.is_some() {
            tracing::trace!(path = %path.display(), "cache hit");
        } else {
            tracing::trace!(path = %path.display(), "cache miss");
        }
        hit
    }

    fn write(&self, path: &Path, processed: ProcessedAsset) {
        tracing::trace!(path = %path.display(), "cache write");
        self.entries.lock().insert(path.to_owned(), processed);
    }

    fn invalidate(&self, path: &Path) {
        tracing::trace!(path = %path.display(), "cache invalidate");
        self.entries.lock().remove(path);
    }
}

/// A cache that never stores anything, used when `cache: false` in
/// [`crate::config::ResolvedOptions`].
#[derive(Default)]
pub struct NullCache;

impl CompileCache for NullCache {
    fn read(&self, _path: &Path) -> Option<ProcessedAsset> {
        None
    }

    fn write(&self, _path: &Path, _processed: ProcessedAsset) {}

    fn invalidate(&self, _path: &Path) {}
}
