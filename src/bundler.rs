//! The public facade (§4.9): ties the Worker Pool, Compile Cache, Asset
//! Registry, Build Queue, Graph Loader, Bundle-Tree Builder, Packager and
//! Rebuild Controller into the single `bundle()` entry point, and emits the
//! two lifecycle events plugins and hosts observe.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    asset::{AssetId, PackageId},
    bundle::{BundleId, BundleTree},
    cache::{CompileCache, MemoryCache, NullCache},
    config::{BundlerOptions, ResolvedOptions, Target},
    error::BundlerError,
    events::{BuildEndCallback, BundledCallback, EventEmitter},
    external::{
        Compiler, Delegate, DevServer, Installer, LiveReloadServer, NoDelegate, NoInstaller, Packager,
        Parser, Resolver,
    },
    loader::GraphLoader,
    package::{BundlePackager, PackagingOutcome},
    queue::BuildQueue,
    rebuild::RebuildController,
    registry::AssetRegistry,
    report::BuildReport,
    tree::BundleTreeBuilder,
    worker::WorkerPool,
};

#[cfg(feature = "watch")]
use crate::rebuild::FsWatcher;

/// Per-extension overrides layered in front of whatever [`Parser`] the
/// caller supplied, backing [`Bundler::add_asset_type`] /
/// `Parser.registerExtension` (§6).
#[derive(Default)]
struct ExtensionOverrides {
    table: Mutex<HashMap<String, String>>,
}

struct OverridingParser {
    inner: Arc<dyn Parser>,
    overrides: ExtensionOverrides,
}

impl OverridingParser {
    fn register(&self, ext: String, kind: String) {
        self.overrides.table.lock().insert(ext, kind);
    }
}

impl Parser for OverridingParser {
    fn kind_of(&self, path: &Path) -> String {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if let Some(kind) = self.overrides.table.lock().get(ext) {
                return kind.clone();
            }
        }
        self.inner.kind_of(path)
    }
}

fn default_bundle_loaders(target: Target) -> HashMap<String, String> {
    let dir = match target {
        Target::Node => "node",
        Target::Browser | Target::Electron => "browser",
    };
    ["wasm", "css", "js"]
        .iter()
        .map(|kind| (kind.to_string(), format!("builtin-loaders/{}/{}", dir, kind)))
        .collect()
}

struct FacadeState {
    pending: bool,
    errored: bool,
    initial: bool,
    previous_hashes: HashMap<BundleId, u64>,
}

/// Everything one `bundle()` pass produced, returned to the caller in
/// addition to the `bundled`/`buildEnd` events it also fires.
pub struct BundleOutcome {
    pub tree: BundleTree,
    pub packaging: PackagingOutcome,
    /// `orphanAssets ∪ drainedAssets` (§4.9) — what a live-reload client
    /// needs to know changed.
    pub changed_assets: HashSet<AssetId>,
    /// Assets unreachable from the entry after this pass, removed from the
    /// registry (§4.9's `unloadOrphanedAssets`).
    pub dropped_assets: Vec<AssetId>,
    pub report: Option<BuildReport>,
}

/// Builds a [`Bundler`], wiring in collaborators optional beyond the four
/// required ones (entry, resolver, parser, compiler).
pub struct BundlerBuilder {
    entry: PathBuf,
    entry_package: PackageId,
    resolver: Arc<dyn Resolver>,
    parser: Arc<dyn Parser>,
    compiler: Arc<dyn Compiler>,
    delegate: Arc<dyn Delegate>,
    installer: Arc<dyn Installer>,
    cache: Option<Arc<dyn CompileCache>>,
    live_reload: Option<Arc<dyn LiveReloadServer>>,
    dev_server: Option<Arc<dyn DevServer>>,
    options: BundlerOptions,
}

impl BundlerBuilder {
    pub fn new(
        entry: impl Into<PathBuf>,
        entry_package: PackageId,
        resolver: Arc<dyn Resolver>,
        parser: Arc<dyn Parser>,
        compiler: Arc<dyn Compiler>,
    ) -> Self {
        BundlerBuilder {
            entry: entry.into(),
            entry_package,
            resolver,
            parser,
            compiler,
            delegate: Arc::new(NoDelegate),
            installer: Arc::new(NoInstaller),
            cache: None,
            live_reload: None,
            dev_server: None,
            options: BundlerOptions::default(),
        }
    }

    pub fn options(mut self, options: BundlerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        self.delegate = delegate;
        self
    }

    /// Supplies the collaborator invoked when `autoinstall` is enabled and a
    /// non-local package specifier fails to resolve (§4.5's `resolveDep`
    /// policy). Unused, and harmless to leave unset, while `autoinstall`
    /// stays off (its default, and forced off in production).
    pub fn installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = installer;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CompileCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn live_reload(mut self, live_reload: Arc<dyn LiveReloadServer>) -> Self {
        self.live_reload = Some(live_reload);
        self
    }

    pub fn dev_server(mut self, dev_server: Arc<dyn DevServer>) -> Self {
        self.dev_server = Some(dev_server);
        self
    }

    pub fn build(self) -> Arc<Bundler> {
        let options = Arc::new(self.options.resolve());
        let cache: Arc<dyn CompileCache> = self.cache.unwrap_or_else(|| {
            if options.cache {
                Arc::new(MemoryCache::new())
            } else {
                Arc::new(NullCache::default())
            }
        });
        let parser = Arc::new(OverridingParser {
            inner: self.parser,
            overrides: ExtensionOverrides::default(),
        });

        Arc::new_cyclic(|weak| Bundler {
            entry: self.entry,
            entry_package: self.entry_package,
            resolver: self.resolver,
            parser,
            compiler: self.compiler,
            delegate: self.delegate,
            installer: self.installer,
            cache,
            live_reload: self.live_reload,
            dev_server: self.dev_server,
            packagers: Mutex::new(HashMap::new()),
            bundle_loaders: Mutex::new(default_bundle_loaders(options.target)),
            registry: Arc::new(AssetRegistry::new()),
            queue: Arc::new(BuildQueue::new(num_cpus::get().max(1))),
            events: EventEmitter::new(),
            options,
            worker: Mutex::new(None),
            #[cfg(feature = "watch")]
            watcher_handle: Mutex::new(None),
            started: AtomicBool::new(false),
            state: Mutex::new(FacadeState {
                pending: false,
                errored: false,
                initial: true,
                previous_hashes: HashMap::new(),
            }),
            build_end: Notify::new(),
            self_weak: weak.clone(),
        })
    }
}

/// Ties the Worker Pool, Compile Cache, Asset Registry, Build Queue, Graph
/// Loader, Bundle-Tree Builder, Packager and Rebuild Controller into one
/// `bundle()` entry point (§4.9). Construct with [`BundlerBuilder`].
pub struct Bundler {
    entry: PathBuf,
    entry_package: PackageId,

    resolver: Arc<dyn Resolver>,
    parser: Arc<OverridingParser>,
    compiler: Arc<dyn Compiler>,
    delegate: Arc<dyn Delegate>,
    installer: Arc<dyn Installer>,
    cache: Arc<dyn CompileCache>,
    live_reload: Option<Arc<dyn LiveReloadServer>>,
    dev_server: Option<Arc<dyn DevServer>>,

    packagers: Mutex<HashMap<String, Arc<dyn Packager>>>,
    bundle_loaders: Mutex<HashMap<String, String>>,

    registry: Arc<AssetRegistry>,
    queue: Arc<BuildQueue>,
    events: EventEmitter,

    options: Arc<ResolvedOptions>,

    worker: Mutex<Option<Arc<WorkerPool>>>,
    #[cfg(feature = "watch")]
    watcher_handle: Mutex<Option<FsWatcher>>,
    started: AtomicBool,

    state: Mutex<FacadeState>,
    build_end: Notify,

    /// Self-reference used only to hand the spawned watcher task a handle
    /// that doesn't keep the bundler alive on its own (§4.10).
    self_weak: Weak<Bundler>,
}

impl Bundler {
    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    pub fn errored(&self) -> bool {
        self.state.lock().errored
    }

    /// The nonzero process exit code a production CLI should use after a
    /// failed build (§7). The library itself never calls
    /// `std::process::exit` — that decision belongs to the host binary.
    pub fn exit_code(&self) -> i32 {
        if self.options.production && self.errored() {
            1
        } else {
            0
        }
    }

    pub fn on_bundled(&self, callback: BundledCallback) {
        self.events.on_bundled(callback);
    }

    pub fn on_build_end(&self, callback: BuildEndCallback) {
        self.events.on_build_end(callback);
    }

    pub fn get_asset(&self, name: &str, parent: Option<&Path>) -> Result<AssetId, BundlerError> {
        self.registry
            .resolve_asset(&*self.resolver, &*self.parser, name, parent)
            .map_err(BundlerError::from)
    }

    fn ensure_not_started(&self) -> Result<(), BundlerError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(BundlerError::InternalInvariant(
                "cannot register asset types, packagers or bundle loaders once the worker pool has started",
            ));
        }
        Ok(())
    }

    /// `addAssetType(ext, path)` (§6): registers which `kind` tag an
    /// extension should resolve to, consulted by [`OverridingParser`] ahead
    /// of whatever base [`Parser`] the bundler was built with.
    pub fn add_asset_type(&self, ext: impl Into<String>, kind: impl Into<String>) -> Result<(), BundlerError> {
        self.ensure_not_started()?;
        self.parser.register(ext.into(), kind.into());
        Ok(())
    }

    pub fn add_packager(&self, kind: impl Into<String>, packager: Arc<dyn Packager>) -> Result<(), BundlerError> {
        self.ensure_not_started()?;
        self.packagers.lock().insert(kind.into(), packager);
        Ok(())
    }

    pub fn add_bundle_loader(&self, kind: impl Into<String>, loader_module: impl Into<String>) -> Result<(), BundlerError> {
        self.ensure_not_started()?;
        self.bundle_loaders.lock().insert(kind.into(), loader_module.into());
        Ok(())
    }

    pub fn bundle_loaders(&self) -> HashMap<String, String> {
        self.bundle_loaders.lock().clone()
    }

    pub fn middleware(&self) -> Option<Arc<dyn Fn(&Path) -> Option<Vec<u8>> + Send + Sync>> {
        self.dev_server.as_ref().map(|dev| dev.middleware())
    }

    pub fn serve(&self, port: u16, https: bool) -> Result<u16, BundlerError> {
        let dev = self
            .dev_server
            .clone()
            .ok_or(BundlerError::InternalInvariant("no dev server collaborator configured"))?;
        dev.serve(port, https).map_err(|source| BundlerError::Io {
            path: self.options.out_dir.clone(),
            source,
        })
    }

    /// Lazily acquires the worker pool (and, in watch mode, the filesystem
    /// watcher and live-reload server). Idempotent: only the first call
    /// after construction, or after [`Bundler::stop`], does anything (§4.9,
    /// §5 "scoped acquisition").
    pub fn start(&self) -> Result<(), BundlerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let pool = WorkerPool::shared(self.compiler.clone());
        *self.worker.lock() = Some(pool);

        if let Some(live_reload) = &self.live_reload {
            live_reload.start(&self.options).map_err(|source| BundlerError::Io {
                path: self.options.out_dir.clone(),
                source,
            })?;
        }

        #[cfg(feature = "watch")]
        if self.options.watch {
            self.start_watcher()?;
        }

        Ok(())
    }

    #[cfg(feature = "watch")]
    fn start_watcher(&self) -> Result<(), BundlerError> {
        let (watcher, changes) = FsWatcher::spawn().map_err(|err| BundlerError::Io {
            path: self.options.out_dir.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
        })?;
        *self.watcher_handle.lock() = Some(watcher);

        let controller = RebuildController::new(self.registry.clone(), self.queue.clone());
        let weak = self.self_weak.clone();
        tokio::spawn(async move {
            controller
                .run(changes, move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(bundler) = weak.upgrade() {
                            if let Err(err) = bundler.bundle().await {
                                tracing::warn!(error = %err, "incremental rebuild failed");
                            }
                        }
                    }
                })
                .await;
        });

        Ok(())
    }

    /// Releases the worker pool, watcher and live-reload server (§5,
    /// "release is guaranteed on every exit path of `bundle()` when not in
    /// watch mode").
    pub fn stop(&self) {
        *self.worker.lock() = None;
        #[cfg(feature = "watch")]
        {
            self.watcher_handle.lock().take();
        }
        if let Some(live_reload) = &self.live_reload {
            live_reload.stop();
        }
        self.started.store(false, Ordering::SeqCst);
    }

    /// Runs one build pass (§4.9). Concurrent callers serialize: a second
    /// `bundle()` invoked while one is already in flight waits for
    /// `buildEnd` and then retries rather than running in parallel (§5,
    /// "serial builds").
    pub async fn bundle(&self) -> Result<BundleOutcome, BundlerError> {
        loop {
            let notified = self.build_end.notified();
            {
                let mut state = self.state.lock();
                if !state.pending {
                    state.pending = true;
                    state.errored = false;
                    break;
                }
            }
            notified.await;
        }

        self.start()?;

        let result = self.run_pass().await;

        {
            let mut state = self.state.lock();
            state.pending = false;
            state.errored = result.is_err();
        }
        self.events.emit_build_end();
        self.build_end.notify_waiters();

        if let Err(err) = &result {
            self.report_error(err);
        }

        // §4.1: the pool is retained across rebuilds in watch mode
        // regardless of `kill_workers` (rebuilds want it hot); outside watch
        // mode, `kill_workers` decides whether this one-shot build tears it
        // down or leaves it for a caller that will run another `bundle()`
        // against the same `Bundler` without watching.
        if !self.options.watch && self.options.kill_workers {
            self.stop();
        }

        result
    }

    fn report_error(&self, err: &BundlerError) {
        tracing::error!(error = %err, "build failed");
        if let Some(live_reload) = &self.live_reload {
            live_reload.emit_error(err);
        }
    }

    #[tracing::instrument(skip(self), fields(entry = %self.entry.display()))]
    async fn run_pass(&self) -> Result<BundleOutcome, BundlerError> {
        let initial = {
            let mut state = self.state.lock();
            let was_initial = state.initial;
            state.initial = false;
            was_initial
        };

        if initial {
            std::fs::create_dir_all(&self.options.out_dir).map_err(|source| BundlerError::Io {
                path: self.options.out_dir.clone(),
                source,
            })?;
            let entry_id: AssetId = Arc::from(self.entry.as_path());
            self.registry
                .ensure(entry_id.clone(), self.entry_package.clone(), &*self.parser);
            self.queue.add(entry_id, false);
        }

        let worker = self
            .worker
            .lock()
            .clone()
            .ok_or(BundlerError::InternalInvariant("bundle() ran before the worker pool was started"))?;

        let loader = Arc::new(GraphLoader::new(
            self.registry.clone(),
            self.resolver.clone(),
            self.parser.clone(),
            self.delegate.clone(),
            self.installer.clone(),
            self.cache.clone(),
            worker,
            self.entry_package.clone(),
            self.options.clone(),
        ));

        let drained = self
            .queue
            .run(move |asset, is_rebuild| {
                let loader = loader.clone();
                async move { loader.load_asset(asset, is_rebuild).await }
            })
            .await?;

        #[cfg(feature = "watch")]
        if self.options.watch {
            if let Some(watcher) = self.watcher_handle.lock().as_mut() {
                use crate::external::Watcher as _;
                for id in &drained {
                    if let Err(err) = watcher.add(id) {
                        tracing::trace!(path = %id.display(), error = %err, "watcher add failed");
                    }
                }
            }
        }

        let mut report = self.options.detailed_report.then(BuildReport::new);
        if let Some(report) = report.as_mut() {
            for id in &drained {
                if let Some(asset) = self.registry.get(id) {
                    let asset = asset.lock();
                    report.record_asset(id.to_path_buf(), asset.build_time);
                }
            }
        }

        let orphans_before: HashSet<AssetId> = self
            .registry
            .all_ids()
            .into_iter()
            .filter(|id| self.registry.get(id).map(|a| a.lock().is_orphan()).unwrap_or(false))
            .collect();

        for id in self.registry.all_ids() {
            if let Some(asset) = self.registry.get(&id) {
                asset.lock().invalidate_bundle();
            }
        }

        let entry_id: AssetId = Arc::from(self.entry.as_path());
        let packaged_kinds: HashSet<String> = self.packagers.lock().keys().cloned().collect();
        let builder = BundleTreeBuilder::new(self.registry.clone(), packaged_kinds);
        let tree = builder.build(entry_id)?;

        let changed_assets: HashSet<AssetId> = orphans_before.union(&drained).cloned().collect();

        if self.options.hmr && !initial {
            if let Some(live_reload) = &self.live_reload {
                let paths: Vec<PathBuf> = changed_assets.iter().map(|id| id.to_path_buf()).collect();
                live_reload.emit_update(&paths);
            }
        }

        let packagers = self.packagers.lock().clone();
        let packager_driver = BundlePackager::new(packagers, self.registry.clone());
        let previous_hashes = self.state.lock().previous_hashes.clone();
        let outcome = packager_driver.package(&tree, &self.options, &previous_hashes)?;
        self.state.lock().previous_hashes = outcome.hashes.clone();

        if let Some(report) = report.as_mut() {
            for (&bundle_id, &size) in &outcome.sizes {
                report.record_bundle_size(bundle_id, size);
            }
        }

        let dropped = self.unload_orphaned_assets();

        self.events.emit_bundled(&tree);

        Ok(BundleOutcome {
            tree,
            packaging: outcome,
            changed_assets,
            dropped_assets: dropped,
            report,
        })
    }

    /// Removes every asset that came out of the tree pass without a
    /// `parent_bundle`, dropping its watch subscriptions with it (§4.9,
    /// §8 "after `unloadOrphanedAssets`, no registry entry has
    /// `parentBundle == null`").
    fn unload_orphaned_assets(&self) -> Vec<AssetId> {
        let mut dropped = Vec::new();
        for id in self.registry.all_ids() {
            let is_orphan = self.registry.get(&id).map(|a| a.lock().is_orphan()).unwrap_or(false);
            if is_orphan {
                self.registry.remove(&id);
                dropped.push(id);
            }
        }
        dropped
    }
}

/// End-to-end scenarios (§8): drives the full facade — worker pool, queue,
/// loader, tree builder and packager together — through [`Bundler::bundle`]
/// with the fixture collaborators from [`crate::test_support`], rather than
/// exercising any one module in isolation the way the rest of the crate's
/// unit tests do. The worker pool is process-wide (`WorkerPool::shared`,
/// §4.1), so these tests always build with `watch: false` and the default
/// `kill_workers: true` so each `bundle()` call releases its pool before the
/// next test's `start()` asks for one.
#[cfg(test)]
mod facade_tests {
    use super::*;
    use crate::{
        asset::Dependency,
        test_support::{FixtureCompiler, FixtureParser, FixturePackager, FixtureResolver},
    };

    fn test_options(name: &str) -> BundlerOptions {
        let mut options = BundlerOptions::default();
        options.out_dir = std::env::temp_dir().join(format!(
            "bundler-facade-test-{}-{}-{:?}",
            name,
            std::process::id(),
            std::thread::current().id()
        ));
        options.watch = Some(false);
        options
    }

    fn build_bundler(name: &str, entry_file: &str, compiler: Arc<dyn Compiler>) -> Arc<Bundler> {
        let resolver = Arc::new(FixtureResolver::new());
        let parser = Arc::new(FixtureParser);
        let entry = PathBuf::from(format!("/{}/{}", name, entry_file));
        BundlerBuilder::new(entry, Arc::from("pkg"), resolver, parser, compiler)
            .options(test_options(name))
            .build()
    }

    fn cleanup(bundler: &Bundler) {
        let _ = std::fs::remove_dir_all(&bundler.options().out_dir);
    }

    fn id(path: &str) -> AssetId {
        Arc::from(Path::new(path))
    }

    #[tokio::test]
    async fn trivial_entry_with_no_dependencies_makes_one_bundle() {
        let compiler = Arc::new(FixtureCompiler::new());
        let bundler = build_bundler("trivial", "a.js", compiler.clone());
        bundler.add_packager("js", Arc::new(FixturePackager)).unwrap();

        let a = id("/trivial/a.js");
        let outcome = bundler.bundle().await.unwrap();
        let root = outcome.tree.root().expect("root bundle");

        assert!(outcome.tree.get(root).has_asset(&a));
        assert_eq!(outcome.tree.get(root).entry_asset, a);
        assert_eq!(outcome.tree.get(root).kind, "js");
        assert!(compiler.call_count(Path::new("/trivial/a.js")) >= 1);

        cleanup(&bundler);
    }

    #[tokio::test]
    async fn static_dependency_stays_in_one_bundle_with_declaration_order_preserved() {
        let compiler = Arc::new(FixtureCompiler::new().with_deps(
            "/static/a.js",
            vec![Dependency::new("./c.js"), Dependency::new("./b.js")],
        ));
        let bundler = build_bundler("static", "a.js", compiler.clone());
        bundler.add_packager("js", Arc::new(FixturePackager)).unwrap();

        let a = id("/static/a.js");
        let b = id("/static/b.js");
        let c = id("/static/c.js");
        let outcome = bundler.bundle().await.unwrap();
        let root = outcome.tree.root().expect("root bundle");

        assert!(outcome.tree.get(root).has_asset(&a));
        assert!(outcome.tree.get(root).has_asset(&b));
        assert!(outcome.tree.get(root).has_asset(&c));

        let dependencies = bundler.registry.get(&a).unwrap().lock().dependencies.clone();
        assert_eq!(dependencies[0].specifier, "./c.js");
        assert_eq!(dependencies[1].specifier, "./b.js");

        cleanup(&bundler);
    }

    #[tokio::test]
    async fn dynamic_import_creates_a_child_bundle() {
        let compiler = Arc::new(
            FixtureCompiler::new().with_deps("/dyn/a.js", vec![Dependency::new("./b.js").dynamic()]),
        );
        let bundler = build_bundler("dyn", "a.js", compiler);
        bundler.add_packager("js", Arc::new(FixturePackager)).unwrap();

        let b = id("/dyn/b.js");
        let outcome = bundler.bundle().await.unwrap();
        let root = outcome.tree.root().expect("root bundle");

        assert!(!outcome.tree.get(root).has_asset(&b));
        assert_eq!(outcome.tree.get(root).child_bundles.len(), 1);
        let child = outcome.tree.get(root).child_bundles[0];
        assert!(outcome.tree.get(child).has_asset(&b));
        assert_eq!(outcome.tree.get(child).entry_asset, b);

        cleanup(&bundler);
    }

    #[tokio::test]
    async fn mixed_type_static_import_lands_in_a_sibling_bundle() {
        let compiler = Arc::new(
            FixtureCompiler::new().with_deps("/mixed/a.js", vec![Dependency::new("./styles.css")]),
        );
        let bundler = build_bundler("mixed", "a.js", compiler);
        bundler.add_packager("js", Arc::new(FixturePackager)).unwrap();
        bundler.add_packager("css", Arc::new(FixturePackager)).unwrap();

        let a = id("/mixed/a.js");
        let styles = id("/mixed/styles.css");
        let outcome = bundler.bundle().await.unwrap();
        let root = outcome.tree.root().expect("root bundle");

        assert!(outcome.tree.get(root).has_asset(&a));
        assert!(!outcome.tree.get(root).has_asset(&styles));
        let css_sibling = outcome
            .tree
            .siblings(root)
            .into_iter()
            .find(|&b| outcome.tree.get(b).kind == "css")
            .expect("a css sibling bundle should have been created");
        assert!(outcome.tree.get(css_sibling).has_asset(&styles));

        cleanup(&bundler);
    }

    #[tokio::test]
    async fn shared_dynamic_dependency_is_hoisted_to_the_common_root() {
        let compiler = Arc::new(
            FixtureCompiler::new()
                .with_deps(
                    "/hoist/root.js",
                    vec![Dependency::new("./x.js").dynamic(), Dependency::new("./y.js").dynamic()],
                )
                .with_deps("/hoist/x.js", vec![Dependency::new("./shared.js")])
                .with_deps("/hoist/y.js", vec![Dependency::new("./shared.js")]),
        );
        let bundler = build_bundler("hoist", "root.js", compiler);
        bundler.add_packager("js", Arc::new(FixturePackager)).unwrap();

        let shared = id("/hoist/shared.js");
        let outcome = bundler.bundle().await.unwrap();
        let root = outcome.tree.root().expect("root bundle");

        assert!(outcome.tree.get(root).has_asset(&shared));
        for &child in &outcome.tree.get(root).child_bundles {
            assert!(!outcome.tree.get(child).has_asset(&shared));
        }
        assert_eq!(
            bundler.registry.get(&shared).unwrap().lock().parent_bundle,
            Some(root)
        );

        cleanup(&bundler);
    }

    #[tokio::test]
    async fn rebuild_recompiles_only_the_touched_leaf_and_is_idempotent_when_unchanged() {
        let compiler = Arc::new(
            FixtureCompiler::new().with_deps("/rebuild/a.js", vec![Dependency::new("./b.js")]),
        );
        let mut options = test_options("rebuild");
        options.kill_workers = false;
        let resolver = Arc::new(FixtureResolver::new());
        let parser = Arc::new(FixtureParser);
        let entry = PathBuf::from("/rebuild/a.js");
        let bundler = BundlerBuilder::new(entry, Arc::from("pkg"), resolver, parser, compiler.clone())
            .options(options)
            .build();
        bundler.add_packager("js", Arc::new(FixturePackager)).unwrap();

        let a = id("/rebuild/a.js");
        let b = id("/rebuild/b.js");

        let first = bundler.bundle().await.unwrap();
        assert_eq!(compiler.call_count(Path::new("/rebuild/a.js")), 1);
        assert_eq!(compiler.call_count(Path::new("/rebuild/b.js")), 1);

        // Build idempotence (§8): no changes queued, so the second pass
        // recompiles nothing and produces identical bundle hashes.
        let second = bundler.bundle().await.unwrap();
        assert_eq!(compiler.call_count(Path::new("/rebuild/a.js")), 1);
        assert_eq!(compiler.call_count(Path::new("/rebuild/b.js")), 1);
        assert_eq!(second.packaging.hashes, first.packaging.hashes);
        assert!(second.packaging.written.is_empty());

        // Rebuild minimality (§8): touching the leaf re-invokes the worker
        // for that asset only.
        bundler.registry.get(&b).unwrap().lock().invalidate();
        bundler.queue.add(b.clone(), true);
        let third = bundler.bundle().await.unwrap();
        assert_eq!(compiler.call_count(Path::new("/rebuild/a.js")), 1);
        assert_eq!(compiler.call_count(Path::new("/rebuild/b.js")), 2);
        assert!(third.changed_assets.contains(&b));

        bundler.stop();
        cleanup(&bundler);
    }
}
