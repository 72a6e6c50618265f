//! Synchronous observer registry for the facade's lifecycle events (§9):
//! "a simple observer registry (subscribe/emit with sync delivery) —
//! sufficient for `bundled` and `buildEnd`".

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bundle::BundleTree;

pub type BundledCallback = Arc<dyn Fn(&BundleTree) + Send + Sync>;
pub type BuildEndCallback = Arc<dyn Fn() + Send + Sync>;

/// Holds the subscriber lists for the two facade events. Delivery is
/// synchronous and in subscription order; there is no backpressure or retry.
#[derive(Default)]
pub struct EventEmitter {
    bundled: Mutex<Vec<BundledCallback>>,
    build_end: Mutex<Vec<BuildEndCallback>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_bundled(&self, callback: BundledCallback) {
        self.bundled.lock().push(callback);
    }

    pub fn on_build_end(&self, callback: BuildEndCallback) {
        self.build_end.lock().push(callback);
    }

    pub fn emit_bundled(&self, tree: &BundleTree) {
        for callback in self.bundled.lock().iter() {
            callback(tree);
        }
    }

    pub fn emit_build_end(&self) {
        for callback in self.build_end.lock().iter() {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscribers_are_delivered_in_order() {
        let emitter = EventEmitter::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let a = calls.clone();
        emitter.on_build_end(Arc::new(move || a.lock().push(1)));
        let b = calls.clone();
        emitter.on_build_end(Arc::new(move || b.lock().push(2)));

        emitter.emit_build_end();
        assert_eq!(*calls.lock(), vec![1, 2]);
    }

    #[test]
    fn bundled_receives_the_tree() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        emitter.on_bundled(Arc::new(move |tree| {
            seen2.store(tree.walk().len(), Ordering::SeqCst);
        }));

        let tree = BundleTree::new();
        emitter.emit_bundled(&tree);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
