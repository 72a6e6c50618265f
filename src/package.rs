//! Packaging driver (§4.8): invokes the registered [`Packager`] for every
//! bundle in a finished tree, resolves final file names once every hash is
//! known, rewrites cross-bundle references, and writes the changed outputs
//! to disk.

use std::{fs, path::PathBuf, sync::Arc};

use hashbrown::HashMap;

use crate::{
    asset::AssetId,
    bundle::{BundleId, BundleTree},
    config::ResolvedOptions,
    error::BundlerError,
    external::Packager,
    naming::{build_name_map, replace_bundle_names},
    registry::AssetRegistry,
};

pub struct BundlePackager {
    packagers: HashMap<String, Arc<dyn Packager>>,
    registry: Arc<AssetRegistry>,
}

/// What one packaging pass produced: the content hash and final name of
/// every bundle (fed back in as `previous_hashes` on the next incremental
/// run), and which files actually changed and were written.
pub struct PackagingOutcome {
    pub hashes: HashMap<BundleId, u64>,
    pub names: HashMap<BundleId, String>,
    pub written: Vec<PathBuf>,
    /// Packaged byte size per bundle, for [`crate::report::BuildReport`]
    /// when `detailed_report` is set (§10.5).
    pub sizes: HashMap<BundleId, usize>,
}

impl BundlePackager {
    pub fn new(packagers: HashMap<String, Arc<dyn Packager>>, registry: Arc<AssetRegistry>) -> Self {
        BundlePackager { packagers, registry }
    }

    #[tracing::instrument(skip(self, tree, options, previous_hashes))]
    pub fn package(
        &self,
        tree: &BundleTree,
        options: &ResolvedOptions,
        previous_hashes: &HashMap<BundleId, u64>,
    ) -> Result<PackagingOutcome, BundlerError> {
        let mut hashes = HashMap::new();
        let mut contents = HashMap::new();

        for bundle_id in tree.walk() {
            let bundle = tree.get(bundle_id);
            let packager = self.packagers.get(&bundle.kind).ok_or(BundlerError::InternalInvariant(
                "no packager registered for a bundle kind reached by the tree",
            ))?;

            let asset_ids: Vec<&AssetId> = bundle.assets.iter().collect();
            let locks: Vec<_> = asset_ids
                .iter()
                .map(|id| {
                    self.registry.get(id).expect(
                        "every asset placed in the bundle tree must still be registered",
                    )
                })
                .collect();
            let guards: Vec<_> = locks.iter().map(|lock| lock.lock()).collect();
            let refs: Vec<&crate::asset::Asset> = guards.iter().map(|g| &**g).collect();

            let result = packager
                .package(bundle, &refs, &options.out_dir)
                .map_err(|source| BundlerError::Packaging {
                    entry: bundle.entry_asset.to_path_buf(),
                    source: Arc::new(source),
                })?;

            hashes.insert(bundle_id, result.hash);
            contents.insert(bundle_id, result.content);
        }

        let names = build_name_map(tree, &hashes, options);

        let mut written = Vec::new();
        let mut sizes = HashMap::new();
        if !options.out_dir.exists() {
            fs::create_dir_all(&options.out_dir).map_err(|source| BundlerError::Io {
                path: options.out_dir.clone(),
                source,
            })?;
        }

        for bundle_id in tree.walk() {
            let content = &contents[&bundle_id];
            let resolved = replace_bundle_names(content, tree, &names);
            sizes.insert(bundle_id, resolved.len());

            let changed = previous_hashes.get(&bundle_id) != hashes.get(&bundle_id);
            if !changed {
                continue;
            }
            let out_path = options.out_dir.join(&names[&bundle_id]);
            fs::write(&out_path, &resolved).map_err(|source| BundlerError::Io {
                path: out_path.clone(),
                source,
            })?;
            written.push(out_path);
        }

        Ok(PackagingOutcome {
            hashes,
            names,
            written,
            sizes,
        })
    }
}
