use std::{
    path::PathBuf,
    sync::{Arc, OnceLock, Weak},
};

use parking_lot::Mutex;

use crate::{
    asset::{PackageId, ProcessedAsset},
    config::ResolvedOptions,
    error::BundlerError,
    external::Compiler,
};

static SHARED: OnceLock<Mutex<Weak<WorkerPool>>> = OnceLock::new();

/// Fixed-size parallel executor running `compile` off the coordinator (§4.1).
///
/// The pool is process-wide and reference-counted: [`WorkerPool::shared`]
/// hands out the live instance if one exists, or builds a fresh one sized by
/// host parallelism. There is no explicit kill switch; it is torn down
/// simply by dropping every `Arc` that references it (the `Bundler`'s own
/// handle, released by `Bundler::stop`, and any in-flight `run` futures),
/// which `Bundler::bundle`'s `finally` clause does outside watch mode when
/// `kill_workers` is set (§4.9, §4.1).
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    compiler: Arc<dyn Compiler>,
}

impl WorkerPool {
    pub fn new(compiler: Arc<dyn Compiler>) -> Arc<Self> {
        Self::with_threads(compiler, num_cpus::get().max(1))
    }

    pub fn with_threads(compiler: Arc<dyn Compiler>, threads: usize) -> Arc<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("bundler-worker-{}", i))
            .build()
            .expect("failed to start worker pool");
        Arc::new(WorkerPool { pool, compiler })
    }

    /// Returns the process-wide shared pool, creating it on first use.
    /// Mirrors `WorkerPool.getShared(options)` (§6).
    pub fn shared(compiler: Arc<dyn Compiler>) -> Arc<Self> {
        let slot = SHARED.get_or_init(|| Mutex::new(Weak::new()));
        let mut lock = slot.lock();
        if let Some(existing) = lock.upgrade() {
            return existing;
        }
        let created = Self::new(compiler);
        *lock = Arc::downgrade(&created);
        created
    }

    /// Dispatches one compile to the pool and awaits its result. The
    /// coordinator suspends here (§5); the worker thread never touches
    /// coordinator state, only the plain values passed in.
    #[tracing::instrument(skip(self, options))]
    pub async fn run(
        &self,
        path: PathBuf,
        package: PackageId,
        options: Arc<ResolvedOptions>,
    ) -> Result<ProcessedAsset, BundlerError> {
        let compiler = self.compiler.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();

        self.pool.spawn(move || {
            let result = compiler.compile(&path, &package, &options);
            // The receiver may have been dropped if the coordinator gave up;
            // that is not this worker's problem.
            let _ = tx.send(result);
        });

        rx.await
            .map_err(|_| BundlerError::InternalInvariant("worker pool dropped a compile result"))?
    }
}
