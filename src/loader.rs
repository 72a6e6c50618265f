//! The Graph Loader: turns one resolved path into a fully-linked [`Asset`]
//! node, recursively discoverable by the [`crate::queue::BuildQueue`] that
//! drives it (§4.5).

use std::{path::Path, sync::Arc, time::Instant};

use crate::{
    asset::{AssetId, Dependency, PackageId},
    cache::CompileCache,
    config::ResolvedOptions,
    error::{BundlerError, DepLocation},
    external::{Delegate, Installer, Parser, ResolveError, Resolver},
    registry::AssetRegistry,
    worker::WorkerPool,
};

fn is_local_specifier(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

/// Loads one asset at a time: reads it from cache or dispatches it to the
/// worker pool, then resolves its declared dependencies against the
/// registry. Stateless beyond its collaborators — all mutable state lives in
/// the [`AssetRegistry`] it's handed.
pub struct GraphLoader {
    registry: Arc<AssetRegistry>,
    resolver: Arc<dyn Resolver>,
    parser: Arc<dyn Parser>,
    delegate: Arc<dyn Delegate>,
    installer: Arc<dyn Installer>,
    cache: Arc<dyn CompileCache>,
    worker: Arc<WorkerPool>,
    /// The entry asset's package, used to tell first-party source (eligible
    /// for auto-install) apart from a dependency package importing its own
    /// nested dependency (never auto-installed, §4.5).
    entry_package: PackageId,
    options: Arc<ResolvedOptions>,
}

impl GraphLoader {
    pub fn new(
        registry: Arc<AssetRegistry>,
        resolver: Arc<dyn Resolver>,
        parser: Arc<dyn Parser>,
        delegate: Arc<dyn Delegate>,
        installer: Arc<dyn Installer>,
        cache: Arc<dyn CompileCache>,
        worker: Arc<WorkerPool>,
        entry_package: PackageId,
        options: Arc<ResolvedOptions>,
    ) -> Self {
        GraphLoader {
            registry,
            resolver,
            parser,
            delegate,
            installer,
            cache,
            worker,
            entry_package,
            options,
        }
    }

    /// Processes `id`: compiles it (or reuses a still-valid cache entry),
    /// links its resolved dependencies, and returns the dependency ids that
    /// still need their own pass. Returns an empty list for an asset already
    /// marked `processed` — a `BuildQueue` run may discover the same id
    /// through more than one parent. When `is_rebuild` is set (a file-watch
    /// event requeued this asset), the asset and its cache entry are
    /// invalidated first so the `processed` short-circuit below doesn't skip
    /// the recompile (§4.5 step 1).
    #[tracing::instrument(skip(self), fields(path = %id.display()))]
    pub async fn load_asset(&self, id: AssetId, is_rebuild: bool) -> Result<Vec<AssetId>, BundlerError> {
        let asset_lock = self.registry.get(&id).ok_or(BundlerError::InternalInvariant(
            "load_asset called for an unregistered asset",
        ))?;

        if is_rebuild {
            asset_lock.lock().invalidate();
            self.cache.invalidate(&id);
        }

        if asset_lock.lock().processed {
            return Ok(Vec::new());
        }

        let path = id.to_path_buf();
        let package: PackageId = asset_lock.lock().package.clone();

        let cached = if self.options.cache {
            self.cache.read(&path)
        } else {
            None
        };

        let (processed, build_time, from_cache) = match cached {
            Some(hit) if !asset_lock.lock().should_invalidate(&hit.cache_data) => (hit, None, true),
            _ => {
                let started = Instant::now();
                let result = self
                    .worker
                    .run(path.clone(), package, self.options.clone())
                    .await?;
                (result, Some(started.elapsed()), false)
            }
        };

        if !from_cache && self.options.cache {
            self.cache.write(&path, processed.clone());
        }

        let mut dependencies = processed.dependencies.clone();
        dependencies.extend(self.delegate.implicit_dependencies(&asset_lock.lock()));

        let mut discovered = Vec::new();
        let mut dep_assets = Vec::new();

        for dep in &dependencies {
            let resolved = {
                let importer = asset_lock.lock();
                self.resolve_dep(&importer, dep)?
            };
            let Some(dep_id) = resolved else { continue };

            if let Some(dep_lock) = self.registry.get(&dep_id) {
                dep_lock.lock().parent_deps.insert(dep.clone());
            }

            if dep.included_in_parent {
                self.registry.watch(&dep_id, id.clone());
            } else {
                dep_assets.push((dep.clone(), dep_id.clone()));
                discovered.push(dep_id);
            }
        }

        {
            let mut asset = asset_lock.lock();
            asset.apply_processed(processed, build_time);
            asset.processed = true;
            asset.dependencies = dependencies;
            asset.dep_assets = dep_assets;
        }

        tracing::debug!(
            dependencies = discovered.len(),
            cached = from_cache,
            "asset processed"
        );
        Ok(discovered)
    }

    fn resolve_dep(
        &self,
        importer: &crate::asset::Asset,
        dep: &Dependency,
    ) -> Result<Option<AssetId>, BundlerError> {
        match self.try_resolve(importer, dep) {
            Ok(id) => Ok(Some(id)),
            Err(ResolveError::NotFound) if is_local_specifier(&dep.specifier) => {
                // §4.5 resolveDep: a local-relative specifier never triggers
                // auto-install, regardless of the `autoinstall` option.
                tracing::warn!(specifier = %dep.specifier, "local dependency not found on disk");
                if dep.optional {
                    Ok(None)
                } else {
                    Err(self.not_found_error(importer, dep))
                }
            }
            Err(ResolveError::NotFound)
                if self.options.autoinstall && importer.package == self.entry_package =>
            {
                tracing::info!(specifier = %dep.specifier, "attempting auto-install of missing package specifier");
                let install_result = self.installer.install(&dep.specifier).map_err(|source| {
                    BundlerError::InstallFailed {
                        specifier: dep.specifier.clone(),
                        source,
                    }
                });
                match install_result.and_then(|()| {
                    self.try_resolve(importer, dep)
                        .map_err(|_| self.not_found_error(importer, dep))
                }) {
                    Ok(id) => Ok(Some(id)),
                    Err(err) if dep.optional => {
                        tracing::debug!(
                            specifier = %dep.specifier,
                            error = %err,
                            "optional dependency not found after auto-install attempt"
                        );
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
            Err(ResolveError::NotFound) if dep.optional => {
                tracing::debug!(specifier = %dep.specifier, "optional dependency not found");
                Ok(None)
            }
            Err(ResolveError::NotFound) => {
                tracing::warn!(specifier = %dep.specifier, "package specifier not found");
                Err(self.not_found_error(importer, dep))
            }
            Err(ResolveError::Ambiguous) => Err(BundlerError::ResolveAmbiguous {
                specifier: dep.specifier.clone(),
                importer: importer.id.to_path_buf(),
            }),
            Err(ResolveError::Other(source)) => Err(BundlerError::Compile {
                path: importer.id.to_path_buf(),
                source,
            }),
        }
    }

    fn try_resolve(
        &self,
        importer: &crate::asset::Asset,
        dep: &Dependency,
    ) -> Result<AssetId, ResolveError> {
        self.registry
            .resolve_asset(&*self.resolver, &*self.parser, &dep.specifier, Some(&importer.id))
    }

    fn not_found_error(&self, importer: &crate::asset::Asset, dep: &Dependency) -> BundlerError {
        match &dep.loc {
            Some(loc) => BundlerError::ResolveNotFoundAt {
                loc: DepLocation {
                    importer: importer.id.to_path_buf(),
                    specifier: dep.specifier.clone(),
                    line: loc.line,
                    column: loc.column,
                },
                source_line: format!("  at {}:{}:{}", importer.id.display(), loc.line, loc.column),
            },
            None => BundlerError::ResolveNotFound {
                specifier: dep.specifier.clone(),
                importer: importer.id.to_path_buf(),
            },
        }
    }
}
