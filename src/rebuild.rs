//! The watcher-driven debounced rebuild scheduler (§4.10) and, behind the
//! `watch` feature, a `notify`-backed implementation of the [`Watcher`]
//! collaborator trait that feeds it.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::sync::mpsc;

use crate::{queue::BuildQueue, registry::AssetRegistry};

/// The coalescing window for a burst of file-change events (§4.10 step 3).
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watcher-driven debounced scheduler. Knows nothing about the underlying OS
/// watcher; it is fed plain changed paths and looks up which assets (if any)
/// are subscribed to them via the [`AssetRegistry`] (§4.3).
pub struct RebuildController {
    registry: Arc<AssetRegistry>,
    queue: Arc<BuildQueue>,
    debounce: Duration,
}

impl RebuildController {
    pub fn new(registry: Arc<AssetRegistry>, queue: Arc<BuildQueue>) -> Self {
        RebuildController {
            registry,
            queue,
            debounce: DEBOUNCE,
        }
    }

    pub fn with_debounce(registry: Arc<AssetRegistry>, queue: Arc<BuildQueue>, debounce: Duration) -> Self {
        RebuildController { registry, queue, debounce }
    }

    /// Applies one changed path: queues every asset subscribed to it as a
    /// rebuild (§4.10 steps 1-2). Returns whether anything was queued, i.e.
    /// whether the debounce timer should be (re)armed.
    fn on_change(&self, path: &Path) -> bool {
        let subscribers = self.registry.subscribers(path);
        if subscribers.is_empty() {
            tracing::trace!(path = %path.display(), "change event with no subscribers, ignoring");
            return false;
        }
        for asset in subscribers {
            self.queue.add(asset, true);
        }
        tracing::debug!(path = %path.display(), "queued rebuild for subscribed assets");
        true
    }

    /// Drains `changes` until the channel closes (the `FsWatcher` producer
    /// was dropped), invoking `on_debounced` each time the coalescing window
    /// elapses with no further changes. A burst of changes that keeps
    /// arriving inside the window keeps resetting the timer rather than
    /// firing once per event (§4.10 step 3, §9 "a single rescheduleable
    /// timer ... any change event cancels and re-arms it").
    pub async fn run<F, Fut>(&self, mut changes: mpsc::UnboundedReceiver<PathBuf>, mut on_debounced: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut deadline: Option<tokio::time::Instant> = None;
        loop {
            let sleep = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                changed = changes.recv() => {
                    match changed {
                        Some(path) => {
                            if self.on_change(&path) {
                                deadline = Some(tokio::time::Instant::now() + self.debounce);
                            }
                        }
                        None => return,
                    }
                }
                _ = sleep, if deadline.is_some() => {
                    deadline = None;
                    tracing::debug!("rebuild debounce fired");
                    on_debounced().await;
                }
            }
        }
    }
}

/// `notify`-backed implementation of the [`crate::external::Watcher`]
/// collaborator trait. Bridges `notify`'s blocking-thread events into an
/// unbounded async channel a [`RebuildController`] can be driven from.
#[cfg(feature = "watch")]
pub struct FsWatcher {
    inner: notify::RecommendedWatcher,
}

#[cfg(feature = "watch")]
impl FsWatcher {
    /// Spawns the `notify` watcher and its forwarding thread, returning the
    /// `Watcher` handle (for `add`/`unwatch`) plus the channel of changed
    /// paths to hand to [`RebuildController::run`].
    pub fn spawn() -> notify::Result<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        use notify::Watcher as _;

        let (raw_tx, raw_rx) = std::sync::mpsc::channel();
        let inner = notify::watcher(raw_tx, Duration::from_millis(20))?;
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("bundler-watcher".into())
            .spawn(move || {
                while let Ok(event) = raw_rx.recv() {
                    if let Some(path) = changed_path(event) {
                        if tx.send(path).is_err() {
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn filesystem watcher thread");

        Ok((FsWatcher { inner }, rx))
    }
}

#[cfg(feature = "watch")]
fn changed_path(event: notify::DebouncedEvent) -> Option<PathBuf> {
    use notify::DebouncedEvent::*;
    match event {
        Create(path) | Write(path) | Chmod(path) => Some(path),
        Remove(path) => Some(path),
        Rename(_, to) => Some(to),
        NoticeWrite(_) | NoticeRemove(_) | Rescan | Error(..) => None,
    }
}

#[cfg(feature = "watch")]
impl crate::external::Watcher for FsWatcher {
    fn add(&mut self, path: &Path) -> std::io::Result<()> {
        use notify::Watcher as _;
        self.inner
            .watch(path, notify::RecursiveMode::NonRecursive)
            .map_err(notify_to_io)
    }

    fn unwatch(&mut self, path: &Path) -> std::io::Result<()> {
        use notify::Watcher as _;
        self.inner.unwatch(path).map_err(notify_to_io)
    }
}

#[cfg(feature = "watch")]
fn notify_to_io(err: notify::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(path: &str) -> crate::asset::AssetId {
        Arc::from(Path::new(path))
    }

    #[tokio::test]
    async fn unrelated_change_is_ignored() {
        let registry = Arc::new(AssetRegistry::new());
        let queue = Arc::new(BuildQueue::new(2));
        let controller = RebuildController::with_debounce(registry, queue.clone(), Duration::from_millis(10));

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(PathBuf::from("/untracked.css")).unwrap();
        drop(tx);

        controller.run(rx, || async {}).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn a_burst_of_changes_coalesces_into_one_fire() {
        let registry = Arc::new(AssetRegistry::new());
        let subscriber = id("/a.js");
        registry.watch(Path::new("/shared.css"), subscriber.clone());
        let queue = Arc::new(BuildQueue::new(2));
        let controller = RebuildController::with_debounce(registry, queue.clone(), Duration::from_millis(30));

        let (tx, rx) = mpsc::unbounded_channel();
        let fires = Arc::new(AtomicUsize::new(0));
        let fires2 = fires.clone();

        tx.send(PathBuf::from("/shared.css")).unwrap();
        let tx2 = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx2.send(PathBuf::from("/shared.css")).unwrap();
            drop(tx2);
        });
        drop(tx);

        controller
            .run(rx, || {
                let fires = fires2.clone();
                async move {
                    fires.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert!(!queue.is_empty(), "the subscribed asset should have been queued as a rebuild");
    }
}
