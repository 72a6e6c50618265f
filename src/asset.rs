use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};

use hashbrown::HashMap;

use crate::bundle::BundleId;

/// Canonical absolute path identifying an [`Asset`] uniquely within the
/// registry. Cheap to clone and to use as a hash-map key.
pub type AssetId = Arc<Path>;

/// Opaque package descriptor. The core never inspects its contents; it is
/// handed back to the Resolver/Parser/Packager collaborators verbatim.
pub type PackageId = Arc<str>;

/// A declared dependency, as produced by the black-box `compile` step or by a
/// [`crate::external::Delegate::implicit_dependencies`] contribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// The specifier as written in source (e.g. `"./button.css"`).
    pub specifier: String,
    /// Source location of the import, when the compiler reported one.
    pub loc: Option<Location>,
    /// A `dynamic import()` rather than a static one: creates a child bundle.
    pub dynamic: bool,
    /// Resolution failures for optional deps are swallowed rather than raised.
    pub optional: bool,
    /// The dependency's output is folded into the parent's generated content
    /// instead of becoming a graph edge (e.g. a CSS `url()` reference).
    pub included_in_parent: bool,
}

impl Dependency {
    pub fn new(specifier: impl Into<String>) -> Self {
        Dependency {
            specifier: specifier.into(),
            loc: None,
            dynamic: false,
            optional: false,
            included_in_parent: false,
        }
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn included_in_parent(mut self) -> Self {
        self.included_in_parent = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// Opaque metadata returned alongside a compile result, used only through
/// [`Asset::should_invalidate`] to decide whether a cached entry is stale.
/// The core never interprets its contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheData(pub Vec<u8>);

/// The worker pool's output for one compile: generated representations keyed
/// by output type, a content hash, the declared dependencies, and opaque
/// cache metadata.
#[derive(Debug, Clone)]
pub struct ProcessedAsset {
    pub generated: HashMap<String, Vec<u8>>,
    pub hash: u64,
    pub dependencies: Vec<Dependency>,
    pub cache_data: CacheData,
}

/// One source file in the dependency graph.
///
/// Lifecycle: created by [`crate::registry::AssetRegistry::resolve_asset`] on
/// first resolution; mutated in place by the [`crate::loader::GraphLoader`]
/// (`processed`, `generated`, edges) and by the
/// [`crate::tree::BundleTreeBuilder`] (`parent_bundle`, `bundles`);
/// invalidated on a file change by clearing `processed` and the edge maps
/// before the next load.
#[derive(Debug, Clone)]
pub struct Asset {
    pub id: AssetId,
    pub package: PackageId,
    pub kind: String,

    pub processed: bool,
    pub generated: HashMap<String, Vec<u8>>,
    pub hash: Option<u64>,
    pub build_time: Option<Duration>,
    pub cache_data: Option<CacheData>,

    /// Declared dependencies, in declaration order.
    pub dependencies: Vec<Dependency>,
    /// Resolved edges: declared dependency -> the `Asset` it resolved to.
    /// Absent for deps skipped via `included_in_parent`.
    pub dep_assets: Vec<(Dependency, AssetId)>,
    /// Dependency descriptors, across the whole graph, that point at this
    /// asset.
    pub parent_deps: HashSet<Dependency>,

    pub parent_bundle: Option<BundleId>,
    pub bundles: HashSet<BundleId>,
}

impl Asset {
    pub fn new(id: AssetId, package: PackageId, kind: String) -> Self {
        Asset {
            id,
            package,
            kind,
            processed: false,
            generated: HashMap::new(),
            hash: None,
            build_time: None,
            cache_data: None,
            dependencies: Vec::new(),
            dep_assets: Vec::new(),
            parent_deps: HashSet::new(),
            parent_bundle: None,
            bundles: HashSet::new(),
        }
    }

    /// Applies a freshly produced (or cache-read) [`ProcessedAsset`].
    pub fn apply_processed(&mut self, processed: ProcessedAsset, build_time: Option<Duration>) {
        self.generated = processed.generated;
        self.hash = Some(processed.hash);
        self.cache_data = Some(processed.cache_data);
        self.build_time = build_time;
    }

    /// Whether the cached representation, if any, should be treated as stale.
    /// The default policy invalidates whenever no cache data is recorded yet;
    /// callers compile-time compose richer policies (mtime, option hash) by
    /// comparing `cache_data` themselves before calling `apply_processed`.
    pub fn should_invalidate(&self, cache_data: &CacheData) -> bool {
        match &self.cache_data {
            None => true,
            Some(current) => current != cache_data,
        }
    }

    /// Clears all state set by the Graph Loader, readying the asset for a
    /// fresh `load_asset` pass after an incremental change.
    pub fn invalidate(&mut self) {
        self.processed = false;
        self.generated.clear();
        self.hash = None;
        self.build_time = None;
        self.dependencies.clear();
        self.dep_assets.clear();
    }

    /// Clears bundle placement, readying the asset for a fresh
    /// `create_bundle_tree` pass. See DESIGN.md for why this clears `bundles`
    /// as well as `parent_bundle`.
    pub fn invalidate_bundle(&mut self) {
        self.parent_bundle = None;
        self.bundles.clear();
    }

    pub fn is_orphan(&self) -> bool {
        self.parent_bundle.is_none()
    }
}
