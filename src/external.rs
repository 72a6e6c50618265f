//! Narrow interfaces for the collaborators the orchestration core treats as
//! black boxes (§6): the resolver, the per-type compiler, packagers, the
//! file watcher and the live-reload transport. None of these are
//! respecified; the core only depends on the traits below.

use std::path::{Path, PathBuf};

use crate::{
    asset::{Asset, Dependency, PackageId, ProcessedAsset},
    bundle::Bundle,
    config::ResolvedOptions,
    error::BundlerError,
};

/// Outcome of resolving an import specifier against an importing asset.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub path: PathBuf,
    pub package: PackageId,
}

/// Failure classification consumed by [`crate::loader::GraphLoader::resolve_dep`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("module not found")]
    NotFound,
    #[error("specifier resolved to more than one module")]
    Ambiguous,
    #[error(transparent)]
    Other(#[from] std::sync::Arc<dyn std::error::Error + Send + Sync>),
}

/// `Resolver.resolve(name, parent) -> {path, pkg}` (§6).
pub trait Resolver: Send + Sync {
    fn resolve(
        &self,
        specifier: &str,
        parent: Option<&Path>,
    ) -> Result<ResolvedPath, ResolveError>;

    /// Splits a package specifier into its module name components, e.g.
    /// `"@scope/pkg/sub"` -> `["@scope/pkg", "sub"]`. Used to classify
    /// resolution failures in §4.5.
    fn module_parts<'a>(&self, specifier: &'a str) -> Vec<&'a str> {
        specifier.splitn(2, '/').collect()
    }
}

/// `Parser.getAsset(path, pkg, options) -> Asset`: classifies a resolved path
/// into the declared `type` a fresh [`Asset`] is created with. Extension
/// registration (`registerExtension`) is modeled as a plain lookup table
/// the caller populates before the pool starts (§6: mutating it after start
/// is rejected by the facade).
pub trait Parser: Send + Sync {
    fn kind_of(&self, path: &Path) -> String;
}

/// The compiler oracle: `compile(path, pkg, opts) -> ProcessedAsset`.
/// Invoked off the coordinator by the [`crate::worker::WorkerPool`].
pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        path: &Path,
        package: &PackageId,
        options: &ResolvedOptions,
    ) -> Result<ProcessedAsset, BundlerError>;
}

/// Result of packaging one bundle: its generated bytes, with any
/// [`crate::naming::bundle_placeholder`] tokens still unresolved, and a
/// content hash over the bundle's inputs used for naming and change
/// detection.
#[derive(Debug, Clone)]
pub struct PackageResult {
    pub content: Vec<u8>,
    pub hash: u64,
}

/// `package(bundle, assets) -> {content, hash}`, implemented per bundle
/// kind. The packager never writes to `out_dir` itself — final naming and
/// disk I/O belong to [`crate::package::BundlePackager`], which runs once
/// every bundle in a tree has been packaged so it can resolve cross-bundle
/// references. `out_dir` is passed through only for packagers that embed it
/// in emitted source maps or asset URLs.
pub trait Packager: Send + Sync {
    fn package(
        &self,
        bundle: &Bundle,
        assets: &[&Asset],
        out_dir: &Path,
    ) -> Result<PackageResult, BundlerError>;
}

/// Optional contribution of edges the compiler's direct parse did not
/// surface (§4.5 step 6, `getImplicitDependencies`).
pub trait Delegate: Send + Sync {
    fn implicit_dependencies(&self, _asset: &Asset) -> Vec<Dependency> {
        Vec::new()
    }
}

/// A no-op delegate, used when a bundler is built without one.
#[derive(Debug, Default)]
pub struct NoDelegate;
impl Delegate for NoDelegate {}

/// Auto-install of a missing package specifier (§4.5's `resolveDep` policy,
/// §1 "out of scope: auto-install of missing dependencies"). The core only
/// knows how to classify a resolution failure as install-worthy and retry
/// resolution afterward; the actual package-manager invocation is this
/// collaborator's concern.
pub trait Installer: Send + Sync {
    fn install(&self, specifier: &str) -> Result<(), std::sync::Arc<dyn std::error::Error + Send + Sync>>;
}

/// An installer that always fails, used when a bundler is built without one.
/// Harmless by default since `autoinstall` defaults to `false` and is always
/// forced off in production (§6); only reachable if a caller explicitly
/// turns `autoinstall` on without supplying a real [`Installer`].
#[derive(Debug, Default)]
pub struct NoInstaller;
impl Installer for NoInstaller {
    fn install(&self, specifier: &str) -> Result<(), std::sync::Arc<dyn std::error::Error + Send + Sync>> {
        Err(std::sync::Arc::new(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("no installer configured to auto-install '{}'", specifier),
        )))
    }
}

/// `Watcher` (§6): `add`/`unwatch`/`close` plus a change-event stream. The
/// concrete, `notify`-backed implementation lives in
/// [`crate::rebuild::FsWatcher`]; this trait exists so the
/// [`crate::rebuild::RebuildController`] can be driven by a fake one in
/// tests.
pub trait Watcher: Send {
    fn add(&mut self, path: &Path) -> std::io::Result<()>;
    fn unwatch(&mut self, path: &Path) -> std::io::Result<()>;
}

/// `LiveReloadServer` (§6). Transport and wire format are out of scope (§1);
/// the core only needs to be able to push an update/error notification.
pub trait LiveReloadServer: Send + Sync {
    fn start(&self, options: &ResolvedOptions) -> std::io::Result<u16>;
    fn emit_update(&self, changed: &[PathBuf]);
    fn emit_error(&self, err: &BundlerError);
    fn stop(&self);
}

/// Optional dev-server collaborator backing `serveOptions` (§10.5): the core
/// never speaks HTTP itself, it only hands a path-to-bytes middleware to
/// whatever server the host process already runs.
pub trait DevServer: Send + Sync {
    fn serve(&self, port: u16, https: bool) -> std::io::Result<u16>;
    fn middleware(&self) -> std::sync::Arc<dyn Fn(&Path) -> Option<Vec<u8>> + Send + Sync>;
}
