use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::{
    asset::{Asset, AssetId, PackageId},
    error::BundlerError,
    external::{Parser, ResolveError, Resolver},
};

/// Deduplicating map from canonical path to [`Asset`], plus the multi-
/// subscriber file-watch bookkeeping described in §4.3.
///
/// The registry is the single owner of `Asset` instances (§3); every other
/// component holds `AssetId`s (canonical paths) and looks assets up here.
pub struct AssetRegistry {
    assets: Mutex<HashMap<AssetId, Arc<Mutex<Asset>>>>,
    /// path -> set of asset ids subscribed to changes at that path. An entry
    /// with an empty set means "nothing references this path anymore";
    /// such entries are removed immediately so watch state stays minimal.
    watches: Mutex<HashMap<PathBuf, HashSet<AssetId>>>,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        AssetRegistry {
            assets: Mutex::new(HashMap::new()),
            watches: Mutex::new(HashMap::new()),
        }
    }
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `specifier` against `parent` and returns the (possibly
    /// freshly created) registry entry for it. Idempotent per canonical
    /// path: a second resolution to the same path returns the same
    /// [`AssetId`] identity (§8).
    #[tracing::instrument(skip(self, resolver, parser))]
    pub fn resolve_asset(
        &self,
        resolver: &dyn Resolver,
        parser: &dyn Parser,
        specifier: &str,
        parent: Option<&Path>,
    ) -> Result<AssetId, ResolveError> {
        let resolved = resolver.resolve(specifier, parent)?;
        let id: AssetId = Arc::from(resolved.path.as_path());
        self.get_or_create(id.clone(), resolved.package, parser);
        Ok(id)
    }

    fn get_or_create(&self, id: AssetId, package: PackageId, parser: &dyn Parser) -> AssetId {
        let mut lock = self.assets.lock();
        let is_new = !lock.contains_key(&id);
        lock.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(path = %id.display(), "registering new asset");
            let kind = parser.kind_of(&id);
            Arc::new(Mutex::new(Asset::new(id.clone(), package, kind)))
        });
        drop(lock);
        if is_new {
            // An asset always watches its own path, so editing it directly
            // (not just a dependency it pulls in via `included_in_parent`)
            // is enough to retrigger its rebuild (§4.3).
            self.watch(&id, id.clone());
        }
        id
    }

    /// Directly registers an asset at `id` if absent, bypassing resolution.
    /// Used by the facade to seed the entry asset (§4.9).
    pub fn ensure(&self, id: AssetId, package: PackageId, parser: &dyn Parser) -> AssetId {
        self.get_or_create(id, package, parser)
    }

    pub fn get(&self, id: &AssetId) -> Option<Arc<Mutex<Asset>>> {
        self.assets.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.assets.lock().contains_key(id)
    }

    pub fn all_ids(&self) -> Vec<AssetId> {
        self.assets.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.assets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes `subscriber` to changes at `path`. The path stays watched
    /// (from the caller's perspective, via the returned `true`) while any
    /// asset references it; callers are expected to register the watch with
    /// the underlying OS watcher only on the first subscriber.
    pub fn watch(&self, path: &Path, subscriber: AssetId) -> bool {
        let mut lock = self.watches.lock();
        let set = lock.entry(path.to_owned()).or_default();
        let first = set.is_empty();
        set.insert(subscriber);
        first
    }

    /// Removes `subscriber` from `path`'s watch set. Returns `true` if this
    /// was the last subscriber, meaning the caller should unwatch the path
    /// with the underlying OS watcher.
    pub fn unwatch(&self, path: &Path, subscriber: &AssetId) -> bool {
        let mut lock = self.watches.lock();
        if let Some(set) = lock.get_mut(path) {
            set.remove(subscriber);
            if set.is_empty() {
                lock.remove(path);
                return true;
            }
        }
        false
    }

    /// Assets currently subscribed to changes at `path`.
    pub fn subscribers(&self, path: &Path) -> Vec<AssetId> {
        self.watches
            .lock()
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes `id` from the registry entirely. Used to drop orphaned
    /// assets after a bundle-tree pass (§4.9).
    pub fn remove(&self, id: &AssetId) -> Option<Arc<Mutex<Asset>>> {
        let mut watches = self.watches.lock();
        watches.retain(|_, subs| {
            subs.remove(id);
            !subs.is_empty()
        });
        drop(watches);
        self.assets.lock().remove(id)
    }
}

impl From<ResolveError> for BundlerError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound => BundlerError::ResolveNotFound {
                specifier: String::new(),
                importer: PathBuf::new(),
            },
            ResolveError::Ambiguous => BundlerError::ResolveAmbiguous {
                specifier: String::new(),
                importer: PathBuf::new(),
            },
            ResolveError::Other(source) => BundlerError::Compile {
                path: PathBuf::new(),
                source,
            },
        }
    }
}
