//! In-memory fixtures standing in for the Resolver/Parser/Compiler/Packager
//! oracles (§10.4), shared by the unit tests in several modules. Only
//! compiled for `#[cfg(test)]`.

use std::{
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::Arc,
};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::{
    asset::{Asset, Dependency, PackageId, ProcessedAsset},
    bundle::Bundle,
    config::ResolvedOptions,
    error::BundlerError,
    external::{
        Compiler, Installer, Packager, PackageResult, Parser, ResolveError, ResolvedPath, Resolver,
    },
};

/// A resolver over a fixed, in-memory file system: every path is already
/// canonical, relative specifiers (`./x.js`) are joined against the
/// importer's directory, everything else is looked up as an absolute path.
#[derive(Default)]
pub struct FixtureResolver {
    pub missing: Mutex<Vec<String>>,
}

impl FixtureResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Resolver for FixtureResolver {
    fn resolve(&self, specifier: &str, parent: Option<&Path>) -> Result<ResolvedPath, ResolveError> {
        let path = if let Some(rest) = specifier.strip_prefix("./") {
            let dir = parent.and_then(Path::parent).unwrap_or_else(|| Path::new("/"));
            dir.join(rest)
        } else {
            PathBuf::from(specifier)
        };

        if self.missing.lock().iter().any(|m| m == specifier) {
            return Err(ResolveError::NotFound);
        }

        Ok(ResolvedPath {
            path,
            package: Arc::from("fixture-pkg"),
        })
    }
}

/// An installer that "installs" a specifier by striking it from a
/// [`FixtureResolver`]'s `missing` list, simulating a package manager making
/// a previously-absent package resolvable. Records every specifier it was
/// asked to install so tests can assert it was (or wasn't) called.
pub struct FixtureInstaller {
    pub resolver: Arc<FixtureResolver>,
    pub installed: Mutex<Vec<String>>,
    pub fail: bool,
}

impl FixtureInstaller {
    pub fn new(resolver: Arc<FixtureResolver>) -> Self {
        FixtureInstaller {
            resolver,
            installed: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing(resolver: Arc<FixtureResolver>) -> Self {
        FixtureInstaller {
            resolver,
            installed: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

impl Installer for FixtureInstaller {
    fn install(&self, specifier: &str) -> Result<(), Arc<dyn std::error::Error + Send + Sync>> {
        self.installed.lock().push(specifier.to_owned());
        if self.fail {
            return Err(Arc::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "install failed",
            )));
        }
        self.resolver.missing.lock().retain(|m| m != specifier);
        Ok(())
    }
}

/// Classifies an asset's `kind` by file extension.
pub struct FixtureParser;

impl Parser for FixtureParser {
    fn kind_of(&self, path: &Path) -> String {
        path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_owned()
    }
}

/// A compiler whose dependency graph and generated content are fabricated
/// ahead of time by the test, keyed by path.
#[derive(Default)]
pub struct FixtureCompiler {
    pub dependencies: Mutex<HashMap<PathBuf, Vec<Dependency>>>,
    pub calls: Mutex<Vec<PathBuf>>,
}

impl FixtureCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deps(self, path: impl Into<PathBuf>, deps: Vec<Dependency>) -> Self {
        self.dependencies.lock().insert(path.into(), deps);
        self
    }

    pub fn call_count(&self, path: &Path) -> usize {
        self.calls.lock().iter().filter(|p| p.as_path() == path).count()
    }
}

impl Compiler for FixtureCompiler {
    fn compile(
        &self,
        path: &Path,
        _package: &PackageId,
        _options: &ResolvedOptions,
    ) -> Result<ProcessedAsset, BundlerError> {
        self.calls.lock().push(path.to_owned());
        let dependencies = self.dependencies.lock().get(path).cloned().unwrap_or_default();

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        path.hash(&mut hasher);
        for dep in &dependencies {
            dep.specifier.hash(&mut hasher);
        }
        let hash = hasher.finish();

        let kind = path.extension().and_then(|e| e.to_str()).unwrap_or("bin").to_owned();
        let mut generated = HashMap::new();
        generated.insert(kind, format!("/* {} */", path.display()).into_bytes());

        Ok(ProcessedAsset {
            generated,
            hash,
            dependencies,
            cache_data: crate::asset::CacheData(hash.to_le_bytes().to_vec()),
        })
    }
}

/// Packages a bundle by combining its member assets' content hashes.
pub struct FixturePackager;

impl Packager for FixturePackager {
    fn package(
        &self,
        _bundle: &Bundle,
        assets: &[&Asset],
        _out_dir: &Path,
    ) -> Result<PackageResult, BundlerError> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for asset in assets {
            asset.hash.unwrap_or(0).hash(&mut hasher);
        }
        let hash = hasher.finish();
        let content = assets
            .iter()
            .flat_map(|asset| asset.generated.values().flat_map(|v| v.iter().copied()))
            .collect();
        Ok(PackageResult { content, hash })
    }
}
