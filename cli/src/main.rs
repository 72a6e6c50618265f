use std::{
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::Arc,
};

use bundler::{
    Asset, BundlerBuilder, BundlerOptions, Bundle, CacheData, Compiler, PackageId, PackageResult,
    Packager, Parser as AssetParser, ProcessedAsset, ResolveError, ResolvedOptions, ResolvedPath,
    Resolver, Target,
};
use clap::Clap;
use tracing_subscriber::layer::SubscriberExt as _;

#[derive(Clap)]
#[clap(version = "0.1", author = "zakarumych")]
struct Opts {
    /// Directory bundled output is written to.
    #[clap(short, long, default_value = "dist")]
    out_dir: String,

    /// Compile target; disables HMR when set to "node".
    #[clap(long, default_value = "browser")]
    target: String,

    /// A level of verbosity, and can be used multiple times.
    #[clap(short, long, parse(from_occurrences))]
    verbose: i32,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Clap)]
enum SubCommand {
    Build(Build),
    Watch(Watch),
}

/// Runs one production build and exits.
#[derive(Clap)]
struct Build {
    /// Entry asset path.
    entry: String,

    #[clap(long)]
    minify: bool,
}

/// Builds once, then keeps rebuilding on every change until interrupted.
#[derive(Clap)]
struct Watch {
    /// Entry asset path.
    entry: String,
}

fn parse_target(raw: &str) -> Target {
    match raw {
        "node" => Target::Node,
        "electron" => Target::Electron,
        _ => Target::Browser,
    }
}

fn install_tracing(verbose: i32) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    if let Err(err) = tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_max_level(level)
            .finish()
            .with(tracing_error::ErrorLayer::default()),
    ) {
        tracing::error!("Failed to install tracing subscriber: {}", err);
    }
}

/// Resolves relative specifiers against the importer's directory and
/// everything else as a plain filesystem path. Real package resolution
/// (`node_modules`-style lookup, package.json `main` fields) is an external
/// collaborator concern this binary does not respecify; a host embedding the
/// bundler crate for a specific ecosystem supplies its own [`Resolver`].
struct FsResolver;

impl Resolver for FsResolver {
    fn resolve(&self, specifier: &str, parent: Option<&Path>) -> Result<ResolvedPath, ResolveError> {
        let candidate = if specifier.starts_with("./") || specifier.starts_with("../") {
            let dir = parent.and_then(Path::parent).unwrap_or_else(|| Path::new("."));
            dir.join(specifier)
        } else {
            PathBuf::from(specifier)
        };

        let canonical = candidate.canonicalize().map_err(|_| ResolveError::NotFound)?;
        Ok(ResolvedPath {
            path: canonical,
            package: Arc::from("entry"),
        })
    }
}

/// Classifies an asset's `kind` by file extension.
struct ExtensionParser;

impl AssetParser for ExtensionParser {
    fn kind_of(&self, path: &Path) -> String {
        path.extension().and_then(|e| e.to_str()).unwrap_or("bin").to_owned()
    }
}

/// Reads a file's bytes without parsing or transforming them. The
/// source-code transform pipeline itself is out of scope for this binary
/// (§1); a real integration supplies a [`Compiler`] that actually parses its
/// language and reports dependencies.
struct PassthroughCompiler;

impl Compiler for PassthroughCompiler {
    fn compile(
        &self,
        path: &Path,
        _package: &PackageId,
        _options: &ResolvedOptions,
    ) -> bundler::Result<ProcessedAsset> {
        let bytes = std::fs::read(path).map_err(|source| bundler::BundlerError::Io {
            path: path.to_owned(),
            source,
        })?;

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        bytes.hash(&mut hasher);
        let hash = hasher.finish();

        let kind = path.extension().and_then(|e| e.to_str()).unwrap_or("bin").to_owned();
        let mut generated = hashbrown::HashMap::new();
        generated.insert(kind, bytes.clone());

        Ok(ProcessedAsset {
            generated,
            hash,
            dependencies: Vec::new(),
            cache_data: CacheData(bytes),
        })
    }
}

/// Concatenates the generated bytes of every asset in a bundle for its kind,
/// in placement order, separated by a newline.
struct ConcatPackager;

impl Packager for ConcatPackager {
    fn package(&self, bundle: &Bundle, assets: &[&Asset], _out_dir: &Path) -> bundler::Result<PackageResult> {
        let mut content = Vec::new();
        for asset in assets {
            if let Some(bytes) = asset.generated.get(&bundle.kind) {
                content.extend_from_slice(bytes);
                content.push(b'\n');
            }
        }

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for asset in assets {
            asset.hash.unwrap_or(0).hash(&mut hasher);
        }

        Ok(PackageResult {
            content,
            hash: hasher.finish(),
        })
    }
}

fn build_bundler(entry: &str, out_dir: &str, target: Target, production: bool, watch: bool) -> eyre::Result<Arc<bundler::Bundler>> {
    let mut options = BundlerOptions::default();
    options.out_dir = PathBuf::from(out_dir);
    options.target = target;
    options.production = Some(production);
    options.watch = Some(watch);

    let bundler = BundlerBuilder::new(
        entry,
        Arc::from("entry"),
        Arc::new(FsResolver),
        Arc::new(ExtensionParser),
        Arc::new(PassthroughCompiler),
    )
    .options(options)
    .build();

    for kind in ["js", "css", "html", "json", "wasm", "txt", "bin"] {
        bundler.add_packager(kind, Arc::new(ConcatPackager))?;
    }

    Ok(bundler)
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    if let Err(err) = color_eyre::install() {
        tracing::error!("Failed to install eyre report handler: {}", err);
    }

    let opts: Opts = Opts::parse();
    install_tracing(opts.verbose);
    let target = parse_target(&opts.target);

    match opts.subcmd {
        SubCommand::Build(build) => {
            let bundler = build_bundler(&build.entry, &opts.out_dir, target, true, false)?;
            if build.minify {
                tracing::info!("minification requested explicitly on top of the production default");
            }
            let outcome = bundler.bundle().await?;
            println!(
                "bundled {} asset(s) into {} file(s), {} written",
                outcome.changed_assets.len(),
                outcome.packaging.names.len(),
                outcome.packaging.written.len()
            );
            std::process::exit(bundler.exit_code());
        }
        SubCommand::Watch(watch) => {
            let bundler = build_bundler(&watch.entry, &opts.out_dir, target, false, true)?;
            let outcome = bundler.bundle().await?;
            println!("initial build wrote {} file(s); watching for changes", outcome.packaging.written.len());
            tokio::signal::ctrl_c().await?;
            println!("shutting down");
        }
    }

    Ok(())
}
