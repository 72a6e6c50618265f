//! Incremental, multi-asset application bundler orchestration core.
//!
//! The crate implements the coordinator side of a bundler: resolving a
//! dependency graph asset by asset, dispatching compilation to a worker
//! pool, grouping the result into a bundle tree, packaging and naming the
//! output, and re-running the minimal necessary subset of that pipeline when
//! a watched file changes. Every concern specific to one language or file
//! format — parsing, resolution, code generation, packaging — is left to
//! collaborator traits in [`external`]; this crate only owns the
//! orchestration in between.
//!
//! Construct a [`bundler::Bundler`] through [`bundler::BundlerBuilder`] and
//! drive it with [`bundler::Bundler::bundle`].

pub mod asset;
pub mod bundle;
pub mod bundler;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod external;
pub mod loader;
pub mod naming;
pub mod package;
pub mod queue;
pub mod rebuild;
pub mod registry;
pub mod report;
pub mod tree;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use asset::{Asset, AssetId, CacheData, Dependency, Location, PackageId, ProcessedAsset};
pub use bundle::{Bundle, BundleId, BundleTree};
pub use bundler::{Bundler, BundlerBuilder, BundleOutcome};
pub use cache::{CompileCache, MemoryCache, NullCache};
pub use config::{BundlerOptions, ResolvedOptions, Target};
pub use error::{BundlerError, Result};
pub use external::{
    Compiler, Delegate, DevServer, Installer, LiveReloadServer, NoDelegate, NoInstaller, Packager,
    PackageResult, Parser, ResolveError, ResolvedPath, Resolver, Watcher,
};
pub use report::BuildReport;
