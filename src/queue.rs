use std::{
    collections::HashSet,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{asset::AssetId, error::BundlerError};

/// Bounded-concurrency worklist driving one incremental build (§4.4).
///
/// `BuildQueue` knows nothing about assets beyond their id: the caller
/// supplies a `process_one` closure to [`BuildQueue::run`] that does the
/// actual resolving/compiling/caching and reports back any further ids it
/// discovered, which are folded into the same run before it completes.
pub struct BuildQueue {
    concurrency: Arc<Semaphore>,
    worklist: Mutex<HashSet<AssetId>>,
    seen_this_run: Mutex<HashSet<AssetId>>,
    /// Ids queued with `is_rebuild = true` whose flag hasn't been consumed by
    /// `drain` yet — `process_one` needs to know this so it can invalidate
    /// the asset and its cache entry before recompiling it (§4.5 step 1).
    rebuild_flags: Mutex<HashSet<AssetId>>,
    running: AtomicBool,
}

impl BuildQueue {
    pub fn new(concurrency: usize) -> Self {
        BuildQueue {
            concurrency: Arc::new(Semaphore::new(concurrency.max(1))),
            worklist: Mutex::new(HashSet::new()),
            seen_this_run: Mutex::new(HashSet::new()),
            rebuild_flags: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Queues `asset` for the next (or currently draining) run. Calling this
    /// twice for the same id within one run is a no-op unless `is_rebuild` is
    /// set, which forces it back onto the worklist even if already visited —
    /// used when a file-watch event invalidates an asset mid-run. Returns
    /// whether the call actually changed the worklist.
    pub fn add(&self, asset: AssetId, is_rebuild: bool) -> bool {
        if is_rebuild {
            self.seen_this_run.lock().remove(&asset);
            self.rebuild_flags.lock().insert(asset.clone());
        }
        if !self.seen_this_run.lock().insert(asset.clone()) {
            return false;
        }
        self.worklist.lock().insert(asset);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.worklist.lock().is_empty()
    }

    /// Drains the worklist to completion, running up to `concurrency` calls
    /// of `process_one` at a time, and returns every asset id visited.
    ///
    /// # Panics
    ///
    /// Panics if called while a previous call to `run` on the same queue has
    /// not yet returned (§9, resolved Open Question on re-entrancy: a second
    /// concurrent build against one `BuildQueue` is a caller bug, not a
    /// recoverable error).
    pub async fn run<F, Fut>(&self, process_one: F) -> Result<HashSet<AssetId>, BundlerError>
    where
        F: Fn(AssetId, bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<AssetId>, BundlerError>> + Send + 'static,
    {
        assert!(
            !self.running.swap(true, Ordering::SeqCst),
            "BuildQueue::run called re-entrantly"
        );
        let result = self.drain(process_one).await;
        self.running.store(false, Ordering::SeqCst);
        self.seen_this_run.lock().clear();
        self.rebuild_flags.lock().clear();
        result
    }

    async fn drain<F, Fut>(&self, process_one: F) -> Result<HashSet<AssetId>, BundlerError>
    where
        F: Fn(AssetId, bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<AssetId>, BundlerError>> + Send + 'static,
    {
        let process_one = Arc::new(process_one);
        let mut processed = HashSet::new();
        let mut tasks: JoinSet<Result<Vec<AssetId>, BundlerError>> = JoinSet::new();

        loop {
            let ready: Vec<AssetId> = self.worklist.lock().drain().collect();
            for asset in ready {
                processed.insert(asset.clone());
                let is_rebuild = self.rebuild_flags.lock().remove(&asset);
                let permit = self.concurrency.clone();
                let process_one = process_one.clone();
                tasks.spawn(async move {
                    let _permit = permit.acquire_owned().await.expect("build queue semaphore closed");
                    process_one(asset, is_rebuild).await
                });
            }

            if tasks.is_empty() {
                if self.worklist.lock().is_empty() {
                    break;
                }
                continue;
            }

            match tasks.join_next().await {
                Some(Ok(Ok(discovered))) => {
                    for id in discovered {
                        self.add(id, false);
                    }
                }
                Some(Ok(Err(err))) => return Err(err),
                Some(Err(_join_err)) => {
                    return Err(BundlerError::InternalInvariant(
                        "a build queue task panicked",
                    ))
                }
                None => {}
            }
        }

        Ok(processed)
    }
}
