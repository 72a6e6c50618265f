//! Builds a [`BundleTree`] from a linked asset graph (§4.6).
//!
//! Placement follows three rules applied to every graph edge, in order:
//! a `dynamic` import always starts a new child bundle; a same-kind static
//! import stays in the importer's bundle; a cross-kind static import moves
//! into (or creates) the importer bundle's sibling for that kind, or an
//! opaque single-asset bundle if no packager claims that kind. An asset
//! reached a second time through a different bundle is hoisted to the
//! lowest common ancestor of its two placements rather than duplicated.

use std::{collections::HashSet, sync::Arc};

use crate::{
    asset::{Asset, AssetId},
    bundle::{BundleId, BundleTree},
    error::BundlerError,
    registry::AssetRegistry,
};

pub struct BundleTreeBuilder {
    registry: Arc<AssetRegistry>,
    packaged_kinds: HashSet<String>,
}

impl BundleTreeBuilder {
    pub fn new(registry: Arc<AssetRegistry>, packaged_kinds: HashSet<String>) -> Self {
        BundleTreeBuilder {
            registry,
            packaged_kinds,
        }
    }

    #[tracing::instrument(skip(self), fields(entry = %entry.display()))]
    pub fn build(&self, entry: AssetId) -> Result<BundleTree, BundlerError> {
        let mut tree = BundleTree::new();
        let entry_kind = self.kind_of(&entry)?;
        let root = tree.create_root(entry.clone(), entry_kind);

        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        self.place(&mut tree, root, entry, &mut visited, &mut stack)?;
        Ok(tree)
    }

    fn kind_of(&self, id: &AssetId) -> Result<String, BundlerError> {
        let lock = self.registry.get(id).ok_or(BundlerError::InternalInvariant(
            "bundle tree referenced an asset missing from the registry",
        ))?;
        Ok(lock.lock().kind.clone())
    }

    fn place(
        &self,
        tree: &mut BundleTree,
        bundle: BundleId,
        asset_id: AssetId,
        visited: &mut HashSet<AssetId>,
        stack: &mut HashSet<AssetId>,
    ) -> Result<(), BundlerError> {
        if visited.contains(&asset_id) {
            self.hoist(tree, &asset_id, bundle, stack);
            return Ok(());
        }
        visited.insert(asset_id.clone());
        stack.insert(asset_id.clone());

        tree.add_asset(bundle, asset_id.clone());
        let dep_assets = {
            let asset_lock = self.registry.get(&asset_id).ok_or(BundlerError::InternalInvariant(
                "bundle tree referenced an asset missing from the registry",
            ))?;
            let mut asset = asset_lock.lock();
            asset.parent_bundle = Some(bundle);
            asset.bundles.insert(bundle);

            // Cross-type emission (§4.6 step 4): an asset whose compile step
            // produced output for more than its nominal kind also lands in
            // the matching per-kind siblings of `bundle` (e.g. a CSS module
            // that also emits a JS facade appears in both the css and js
            // bundles). Only kinds with a registered packager get a sibling;
            // an unpackaged extra output is simply not emitted as its own
            // bundle, same as the opaque-bundle fallback in step 3.
            let current_kind = tree.get(bundle).kind.clone();
            let extra_kinds: Vec<String> = asset
                .generated
                .keys()
                .filter(|kind| **kind != current_kind && self.packaged_kinds.contains(*kind))
                .cloned()
                .collect();
            for kind in extra_kinds {
                let sibling = tree.get_sibling_bundle(bundle, &kind);
                tree.add_asset(sibling, asset_id.clone());
                asset.bundles.insert(sibling);
            }

            asset.dep_assets.clone()
        };

        for (dep, dep_id) in dep_assets {
            let dep_kind = self.kind_of(&dep_id)?;
            let current_kind = tree.get(bundle).kind.clone();

            let target_bundle = if dep.dynamic {
                tree.create_child(bundle, dep_id.clone(), dep_kind)
            } else if dep_kind == current_kind {
                bundle
            } else if self.packaged_kinds.contains(&dep_kind) {
                tree.get_sibling_bundle(bundle, &dep_kind)
            } else {
                tree.create_opaque(bundle, dep_id.clone(), dep_kind)
            };

            self.place(tree, target_bundle, dep_id, visited, stack)?;
        }

        stack.remove(&asset_id);
        Ok(())
    }

    /// Moves an already-placed asset to the lowest common ancestor of its
    /// current bundle and a newly requested one, rather than duplicating it
    /// into both (§4.6 step 5).
    fn hoist(&self, tree: &mut BundleTree, asset_id: &AssetId, requested: BundleId, stack: &HashSet<AssetId>) {
        if stack.contains(asset_id) {
            tracing::warn!(path = %asset_id.display(), "dependency cycle detected while building bundle tree");
            return;
        }

        let asset_lock = self
            .registry
            .get(asset_id)
            .expect("asset placed in the bundle tree must still be registered");
        let mut asset = asset_lock.lock();
        let Some(current) = asset.parent_bundle else { return };
        if current == requested {
            return;
        }

        let lca = tree.find_common_ancestor(current, requested);
        if lca == current {
            // `requested` is a descendant of where the asset already lives;
            // record the extra placement without moving anything.
            tree.add_asset(requested, asset_id.clone());
            asset.bundles.insert(requested);
            return;
        }

        self.move_asset_to_bundle(tree, &mut asset, asset_id, lca);
    }

    /// Moves `asset` out of every bundle it currently occupies and into
    /// `to` (or, for a kind other than `to`'s own, `to`'s per-type sibling
    /// for that kind) — migrating across all per-type siblings the way
    /// §4.6's `moveAssetToBundle` requires, not just the single bundle the
    /// hoisting call happened to be triggered from.
    fn move_asset_to_bundle(
        &self,
        tree: &mut BundleTree,
        asset: &mut Asset,
        asset_id: &AssetId,
        to: BundleId,
    ) {
        let to_kind = tree.get(to).kind.clone();
        let old_bundles: Vec<BundleId> = asset.bundles.iter().copied().collect();
        let mut new_bundles = HashSet::new();

        for owner in old_bundles {
            let kind = tree.get(owner).kind.clone();
            tree.remove_asset(owner, asset_id);
            let target = if kind == to_kind {
                to
            } else {
                tree.get_sibling_bundle(to, &kind)
            };
            tree.add_asset(target, asset_id.clone());
            new_bundles.insert(target);
        }

        if new_bundles.is_empty() {
            tree.add_asset(to, asset_id.clone());
            new_bundles.insert(to);
        }

        asset.bundles = new_bundles;
        asset.parent_bundle = Some(to);
        // Open question (b): parent_deps is left untouched here — it records
        // who imports this asset, which doesn't change when its packaging
        // location moves.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Dependency;
    use std::path::Path;

    fn asset_id(path: &str) -> AssetId {
        Arc::from(Path::new(path))
    }

    fn register(registry: &AssetRegistry, path: &str, kind: &str) -> AssetId {
        let id = asset_id(path);
        registry.ensure(id.clone(), Arc::from("pkg"), &FixedKindParser(kind.to_owned()));
        id
    }

    struct FixedKindParser(String);
    impl crate::external::Parser for FixedKindParser {
        fn kind_of(&self, _path: &Path) -> String {
            self.0.clone()
        }
    }

    fn link(registry: &AssetRegistry, from: &AssetId, dep: Dependency, to: &AssetId) {
        registry.get(from).unwrap().lock().dep_assets.push((dep, to.clone()));
    }

    #[test]
    fn same_kind_static_dependency_stays_in_one_bundle() {
        let registry = Arc::new(AssetRegistry::new());
        let a = register(&registry, "/a.js", "js");
        let b = register(&registry, "/b.js", "js");
        link(&registry, &a, Dependency::new("./b.js"), &b);

        let builder = BundleTreeBuilder::new(registry, HashSet::new());
        let tree = builder.build(a.clone()).unwrap();
        let root = tree.root().unwrap();
        assert!(tree.get(root).has_asset(&a));
        assert!(tree.get(root).has_asset(&b));
    }

    #[test]
    fn cross_kind_with_packager_uses_sibling_bundle() {
        let registry = Arc::new(AssetRegistry::new());
        let a = register(&registry, "/a.js", "js");
        let style = register(&registry, "/a.css", "css");
        link(&registry, &a, Dependency::new("./a.css"), &style);

        let mut packaged = HashSet::new();
        packaged.insert("css".to_owned());
        let builder = BundleTreeBuilder::new(registry, packaged);
        let tree = builder.build(a.clone()).unwrap();
        let root = tree.root().unwrap();

        assert!(tree.get(root).has_asset(&a));
        assert!(!tree.get(root).has_asset(&style));
        let siblings = tree.siblings(root);
        assert_eq!(siblings.len(), 2);
        let css_bundle = siblings.into_iter().find(|&b| b != root).unwrap();
        assert!(tree.get(css_bundle).has_asset(&style));
    }

    #[test]
    fn cross_kind_without_packager_is_opaque() {
        let registry = Arc::new(AssetRegistry::new());
        let a = register(&registry, "/a.js", "js");
        let font = register(&registry, "/a.woff", "woff");
        link(&registry, &a, Dependency::new("./a.woff"), &font);

        let builder = BundleTreeBuilder::new(registry, HashSet::new());
        let tree = builder.build(a.clone()).unwrap();
        let root = tree.root().unwrap();

        let opaque = tree.get(root).opaque_bundles.clone();
        assert_eq!(opaque.len(), 1);
        assert!(tree.get(opaque[0]).has_asset(&font));
    }

    #[test]
    fn dynamic_import_starts_a_child_bundle() {
        let registry = Arc::new(AssetRegistry::new());
        let a = register(&registry, "/a.js", "js");
        let lazy = register(&registry, "/lazy.js", "js");
        link(&registry, &a, Dependency::new("./lazy.js").dynamic(), &lazy);

        let builder = BundleTreeBuilder::new(registry, HashSet::new());
        let tree = builder.build(a.clone()).unwrap();
        let root = tree.root().unwrap();

        assert!(!tree.get(root).has_asset(&lazy));
        assert_eq!(tree.get(root).child_bundles.len(), 1);
        let child = tree.get(root).child_bundles[0];
        assert!(tree.get(child).has_asset(&lazy));
    }

    #[test]
    fn shared_descendant_is_hoisted_to_common_ancestor() {
        let registry = Arc::new(AssetRegistry::new());
        let a = register(&registry, "/a.js", "js");
        let b = register(&registry, "/b.js", "js");
        let c = register(&registry, "/c.js", "js");
        let d = register(&registry, "/d.js", "js");
        link(&registry, &a, Dependency::new("./b.js").dynamic(), &b);
        link(&registry, &a, Dependency::new("./c.js").dynamic(), &c);
        link(&registry, &b, Dependency::new("./d.js"), &d);
        link(&registry, &c, Dependency::new("./d.js"), &d);

        let builder = BundleTreeBuilder::new(registry.clone(), HashSet::new());
        let tree = builder.build(a.clone()).unwrap();
        let root = tree.root().unwrap();

        assert!(tree.get(root).has_asset(&d));
        for &child in &tree.get(root).child_bundles {
            assert!(!tree.get(child).has_asset(&d));
        }
        assert_eq!(registry.get(&d).unwrap().lock().parent_bundle, Some(root));
    }

    #[test]
    fn asset_with_extra_generated_output_lands_in_matching_sibling_too() {
        let registry = Arc::new(AssetRegistry::new());
        let a = register(&registry, "/a.css", "css");
        registry
            .get(&a)
            .unwrap()
            .lock()
            .generated
            .insert("js".to_owned(), b"/* css-module facade */".to_vec());

        let mut packaged = HashSet::new();
        packaged.insert("css".to_owned());
        packaged.insert("js".to_owned());
        let builder = BundleTreeBuilder::new(registry.clone(), packaged);
        let tree = builder.build(a.clone()).unwrap();
        let root = tree.root().unwrap();

        assert!(tree.get(root).has_asset(&a));
        let js_sibling = tree
            .siblings(root)
            .into_iter()
            .find(|&b| tree.get(b).kind == "js")
            .expect("a js sibling bundle should have been created");
        assert!(tree.get(js_sibling).has_asset(&a));
        assert!(registry.get(&a).unwrap().lock().bundles.contains(&js_sibling));
    }
}
