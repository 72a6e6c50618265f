//! Final file naming and reference rewriting (§4.7).
//!
//! Naming happens in one pass, after every bundle's content hash is known:
//! each [`Packager`](crate::external::Packager) writes its output with a
//! placeholder token wherever it needs to refer to a sibling or child
//! bundle, and [`replace_bundle_names`] substitutes the real file names once
//! they've all been assigned.

use std::collections::HashSet;

use hashbrown::HashMap;

use crate::{
    bundle::{BundleId, BundleTree},
    config::ResolvedOptions,
};

/// The token a packager embeds wherever its output needs another bundle's
/// eventual file name.
pub fn bundle_placeholder(id: BundleId) -> String {
    format!("\u{0}BUNDLE:{}\u{0}", id.index())
}

/// Assigns every bundle in `tree` a file name. The root bundle honors
/// `options.out_file` if set; every other bundle is named after its entry
/// asset's file stem, with a content hash suffix when `options.content_hash`
/// is set. Collisions (two bundles sharing a stem and kind) are broken with a
/// numeric suffix in traversal order.
pub fn build_name_map(
    tree: &BundleTree,
    hashes: &HashMap<BundleId, u64>,
    options: &ResolvedOptions,
) -> HashMap<BundleId, String> {
    let root = tree.root();
    let mut used = HashSet::new();
    let mut names = HashMap::new();

    for bundle_id in tree.walk() {
        let bundle = tree.get(bundle_id);
        let stem = bundle
            .entry_asset
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("bundle")
            .to_owned();
        let ext = bundle.kind.clone();

        let base = if Some(bundle_id) == root {
            options
                .out_file
                .clone()
                .unwrap_or_else(|| format!("{}.{}", stem, ext))
        } else if options.content_hash {
            let hash = hashes.get(&bundle_id).copied().unwrap_or(0);
            format!("{}.{:x}.{}", stem, hash, ext)
        } else {
            format!("{}.{}", stem, ext)
        };

        let mut candidate = base;
        let mut suffix = 1;
        while used.contains(&candidate) {
            candidate = format!("{}-{}.{}", stem, suffix, ext);
            suffix += 1;
        }
        used.insert(candidate.clone());
        names.insert(bundle_id, candidate);
    }

    names
}

/// Rewrites every [`bundle_placeholder`] occurrence in `content` with the
/// name assigned to the bundle it names. Tokens for bundles absent from
/// `names` (should not happen once `build_name_map` has run over the whole
/// tree) are left untouched.
pub fn replace_bundle_names(
    content: &[u8],
    tree: &BundleTree,
    names: &HashMap<BundleId, String>,
) -> Vec<u8> {
    let mut out = content.to_vec();
    for bundle_id in tree.walk() {
        if let Some(name) = names.get(&bundle_id) {
            let token = bundle_placeholder(bundle_id);
            out = replace_all_bytes(&out, token.as_bytes(), name.as_bytes());
        }
    }
    out
}

fn replace_all_bytes(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        asset::AssetId,
        bundle::BundleTree,
        config::BundlerOptions,
    };
    use std::{path::Path, sync::Arc};

    fn id(path: &str) -> AssetId {
        Arc::from(Path::new(path))
    }

    #[test]
    fn content_hash_suffixes_non_root_bundles() {
        let mut tree = BundleTree::new();
        let root = tree.create_root(id("/src/index.js"), "js".to_owned());
        let child = tree.create_child(root, id("/src/lazy.js"), "js".to_owned());

        let mut options = BundlerOptions::default();
        options.content_hash = Some(true);
        let options = options.resolve();

        let mut hashes = HashMap::new();
        hashes.insert(child, 0xBEEF);

        let names = build_name_map(&tree, &hashes, &options);
        assert_eq!(names[&root], "index.js");
        assert_eq!(names[&child], "lazy.beef.js");
    }

    #[test]
    fn colliding_stems_get_a_numeric_suffix() {
        let mut tree = BundleTree::new();
        let root = tree.create_root(id("/a/shared.js"), "js".to_owned());
        let _child = tree.create_child(root, id("/b/shared.js"), "js".to_owned());

        let options = BundlerOptions::default().resolve();
        let names = build_name_map(&tree, &HashMap::new(), &options);

        let mut values: Vec<_> = names.values().cloned().collect();
        values.sort();
        assert_eq!(values, vec!["shared-1.js".to_owned(), "shared.js".to_owned()]);
    }

    #[test]
    fn replace_bundle_names_substitutes_every_token() {
        let mut tree = BundleTree::new();
        let root = tree.create_root(id("/a.js"), "js".to_owned());
        let child = tree.create_child(root, id("/b.js"), "js".to_owned());

        let mut names = HashMap::new();
        names.insert(root, "a.js".to_owned());
        names.insert(child, "b.abc123.js".to_owned());

        let source = format!("import(\"{}\")", bundle_placeholder(child));
        let rewritten = replace_bundle_names(source.as_bytes(), &tree, &names);
        assert_eq!(rewritten, b"import(\"b.abc123.js\")");
    }
}
