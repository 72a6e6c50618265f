use std::collections::HashSet;

use hashbrown::HashMap;
use slab::Slab;

use crate::asset::AssetId;

/// Stable identity of a [`Bundle`] within a [`BundleTree`]. Bundles never
/// outlive the tree that owns them, so this is a plain arena index rather
/// than a reference-counted handle (§9: "the bundle tree is the owner of
/// bundle structure").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleId(usize);

impl BundleId {
    /// Raw arena index, used only to derive a stable textual placeholder
    /// token in [`crate::naming`].
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SiblingGroupId(usize);

/// A grouping of same-type assets that will be packaged into one artifact.
///
/// Invariants upheld by [`BundleTree`]: every id in `assets` names an asset of
/// `kind`; `entry_asset` never changes after creation; a given
/// `(sibling group, kind)` pair names at most one bundle.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub kind: String,
    pub entry_asset: AssetId,
    pub assets: HashSet<AssetId>,
    pub parent_bundle: Option<BundleId>,
    /// Dynamic-import children: a bundle created because some asset in this
    /// bundle reached another asset through a `dynamic` dependency.
    pub child_bundles: Vec<BundleId>,
    /// Opaque, packager-less bundles holding exactly one asset each (§4.6
    /// step 3, "no packager registered for that type").
    pub opaque_bundles: Vec<BundleId>,
    sibling_group: SiblingGroupId,
}

impl Bundle {
    pub fn has_asset(&self, id: &AssetId) -> bool {
        self.assets.contains(id)
    }
}

/// Owns every [`Bundle`] produced by one [`crate::tree::BundleTreeBuilder`]
/// pass. Bundles hold [`BundleId`] indices into this arena rather than owning
/// references to each other (§9).
#[derive(Debug, Default)]
pub struct BundleTree {
    bundles: Slab<Bundle>,
    sibling_groups: Slab<HashMap<String, BundleId>>,
    root: Option<BundleId>,
}

impl BundleTree {
    pub fn new() -> Self {
        BundleTree::default()
    }

    pub fn root(&self) -> Option<BundleId> {
        self.root
    }

    pub fn get(&self, id: BundleId) -> &Bundle {
        &self.bundles[id.0]
    }

    pub fn get_mut(&mut self, id: BundleId) -> &mut Bundle {
        &mut self.bundles[id.0]
    }

    /// Creates the single root bundle of the tree. May only be called once.
    pub fn create_root(&mut self, entry_asset: AssetId, kind: String) -> BundleId {
        assert!(self.root.is_none(), "bundle tree already has a root");
        let id = self.new_sibling_group_bundle(entry_asset, kind, None);
        self.root = Some(id);
        id
    }

    /// Creates a child bundle of `parent`, anchored by a dynamic import.
    pub fn create_child(
        &mut self,
        parent: BundleId,
        entry_asset: AssetId,
        kind: String,
    ) -> BundleId {
        let id = self.new_sibling_group_bundle(entry_asset, kind, Some(parent));
        self.bundles[parent.0].child_bundles.push(id);
        id
    }

    /// Creates a standalone, single-asset bundle for a type with no
    /// registered packager, parented under `owner` but tracked separately
    /// from both `child_bundles` and the sibling group.
    pub fn create_opaque(&mut self, owner: BundleId, entry_asset: AssetId, kind: String) -> BundleId {
        let parent = self.bundles[owner.0].parent_bundle;
        let id = self.new_sibling_group_bundle(entry_asset, kind, parent);
        self.bundles[owner.0].opaque_bundles.push(id);
        id
    }

    fn new_sibling_group_bundle(
        &mut self,
        entry_asset: AssetId,
        kind: String,
        parent: Option<BundleId>,
    ) -> BundleId {
        let group_id = SiblingGroupId(self.sibling_groups.insert(HashMap::new()));
        let bundle_id = BundleId(self.bundles.insert(Bundle {
            kind: kind.clone(),
            entry_asset,
            assets: HashSet::new(),
            parent_bundle: parent,
            child_bundles: Vec::new(),
            opaque_bundles: Vec::new(),
            sibling_group: group_id,
        }));
        self.sibling_groups[group_id.0].insert(kind, bundle_id);
        bundle_id
    }

    /// Returns the per-type peer of `bundle` sharing its sibling group,
    /// creating it (with the same `entry_asset` and parent) on first request.
    pub fn get_sibling_bundle(&mut self, bundle: BundleId, kind: &str) -> BundleId {
        let group_id = self.bundles[bundle.0].sibling_group;
        if let Some(&existing) = self.sibling_groups[group_id.0].get(kind) {
            return existing;
        }
        let entry_asset = self.bundles[bundle.0].entry_asset.clone();
        let parent = self.bundles[bundle.0].parent_bundle;
        let new_id = BundleId(self.bundles.insert(Bundle {
            kind: kind.to_owned(),
            entry_asset,
            assets: HashSet::new(),
            parent_bundle: parent,
            child_bundles: Vec::new(),
            opaque_bundles: Vec::new(),
            sibling_group: group_id,
        }));
        self.sibling_groups[group_id.0].insert(kind.to_owned(), new_id);
        new_id
    }

    /// All per-type peers of `bundle`'s sibling group, `bundle` itself
    /// included.
    pub fn siblings(&self, bundle: BundleId) -> Vec<BundleId> {
        let group_id = self.bundles[bundle.0].sibling_group;
        self.sibling_groups[group_id.0].values().copied().collect()
    }

    pub fn add_asset(&mut self, bundle: BundleId, asset: AssetId) {
        self.bundles[bundle.0].assets.insert(asset);
    }

    pub fn remove_asset(&mut self, bundle: BundleId, asset: &AssetId) {
        self.bundles[bundle.0].assets.remove(asset);
    }

    /// Ancestor chain of `bundle`, starting with `bundle` itself and ending
    /// at the root.
    pub fn ancestors(&self, bundle: BundleId) -> Vec<BundleId> {
        let mut chain = vec![bundle];
        let mut current = bundle;
        while let Some(parent) = self.bundles[current.0].parent_bundle {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// The deepest bundle common to both ancestor chains ("lowest common
    /// ancestor"), used by the hoisting rule in §4.6.
    pub fn find_common_ancestor(&self, a: BundleId, b: BundleId) -> BundleId {
        let ancestors_a: HashSet<BundleId> = self.ancestors(a).into_iter().collect();
        for candidate in self.ancestors(b) {
            if ancestors_a.contains(&candidate) {
                return candidate;
            }
        }
        self.root.expect("bundle tree has a root once any bundle exists")
    }

    /// Depth-first walk over `bundle`, its siblings, their opaque bundles,
    /// and (recursively) their dynamic-import children. Used by naming and
    /// packaging, which must visit every artifact exactly once.
    pub fn walk(&self) -> Vec<BundleId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        if let Some(root) = self.root {
            self.walk_from(root, &mut out, &mut seen);
        }
        out
    }

    fn walk_from(&self, bundle: BundleId, out: &mut Vec<BundleId>, seen: &mut HashSet<BundleId>) {
        for sibling in self.siblings(bundle) {
            if !seen.insert(sibling) {
                continue;
            }
            out.push(sibling);
            for &opaque in &self.bundles[sibling.0].opaque_bundles {
                if seen.insert(opaque) {
                    out.push(opaque);
                }
            }
            for &child in &self.bundles[sibling.0].child_bundles {
                self.walk_from(child, out, seen);
            }
        }
    }
}
