use std::path::PathBuf;

/// Compile/bundle target environment. Determines the default set of built-in
/// bundle loaders (§6) and whether HMR is enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Target {
    Browser,
    Node,
    Electron,
}

impl Default for Target {
    fn default() -> Self {
        Target::Browser
    }
}

/// Options recognized by the bundler facade.
///
/// Fields left `None` are resolved by [`BundlerOptions::resolve`] using the
/// default-derivation rules of the specification: `watch` defaults to
/// `!production`, `hmr` defaults to `watch` (but never on `target: node`),
/// `minify`/`content_hash` default to `production`, and `autoinstall` is
/// forced off in production regardless of what was requested.
#[derive(Debug, Clone)]
pub struct BundlerOptions {
    pub production: Option<bool>,
    pub out_dir: PathBuf,
    pub out_file: Option<String>,
    pub public_url: Option<String>,
    pub watch: Option<bool>,
    pub cache: bool,
    pub cache_dir: PathBuf,
    pub kill_workers: bool,
    pub minify: Option<bool>,
    pub target: Target,
    pub hmr: Option<bool>,
    pub https: bool,
    pub log_level: tracing::Level,
    pub hmr_port: Option<u16>,
    pub source_maps: bool,
    pub hmr_hostname: Option<String>,
    pub detailed_report: bool,
    pub autoinstall: bool,
    pub content_hash: Option<bool>,
}

impl Default for BundlerOptions {
    fn default() -> Self {
        BundlerOptions {
            production: None,
            out_dir: PathBuf::from("dist"),
            out_file: None,
            public_url: None,
            watch: None,
            cache: true,
            cache_dir: PathBuf::from(".bundler-cache"),
            kill_workers: true,
            minify: None,
            target: Target::default(),
            hmr: None,
            https: false,
            log_level: tracing::Level::WARN,
            hmr_port: None,
            source_maps: true,
            hmr_hostname: None,
            detailed_report: false,
            autoinstall: false,
            content_hash: None,
        }
    }
}

/// [`BundlerOptions`] after the default-derivation rules of §6 have been
/// applied; every formerly-optional field is now concrete.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub production: bool,
    pub out_dir: PathBuf,
    pub out_file: Option<String>,
    pub public_url: Option<String>,
    pub watch: bool,
    pub cache: bool,
    pub cache_dir: PathBuf,
    pub kill_workers: bool,
    pub minify: bool,
    pub target: Target,
    pub hmr: bool,
    pub https: bool,
    pub log_level: tracing::Level,
    pub hmr_port: Option<u16>,
    pub source_maps: bool,
    pub hmr_hostname: Option<String>,
    pub detailed_report: bool,
    pub autoinstall: bool,
    pub content_hash: bool,
}

impl BundlerOptions {
    /// Applies the default-derivation rules from §6, consulting `BUNDLER_ENV`
    /// the way the original tool consults `NODE_ENV`.
    pub fn resolve(self) -> ResolvedOptions {
        let env_production = std::env::var("BUNDLER_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);
        let production = self.production.unwrap_or(false) || env_production;
        let watch = self.watch.unwrap_or(!production);
        let hmr = self.hmr.unwrap_or(watch) && !matches!(self.target, Target::Node);
        let minify = self.minify.unwrap_or(production);
        let content_hash = self.content_hash.unwrap_or(production);
        let autoinstall = self.autoinstall && !production;

        ResolvedOptions {
            production,
            out_dir: self.out_dir,
            out_file: self.out_file,
            public_url: self.public_url,
            watch,
            cache: self.cache,
            cache_dir: self.cache_dir,
            kill_workers: self.kill_workers,
            minify,
            target: self.target,
            hmr,
            https: self.https,
            log_level: self.log_level,
            hmr_port: self.hmr_port,
            source_maps: self.source_maps,
            hmr_hostname: self.hmr_hostname,
            detailed_report: self.detailed_report,
            autoinstall,
            content_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_defaults_to_not_production() {
        let opts = BundlerOptions::default().resolve();
        assert!(!opts.production);
        assert!(opts.watch);
        assert!(opts.hmr);
        assert!(!opts.minify);
        assert!(!opts.content_hash);
    }

    #[test]
    fn production_disables_autoinstall_and_enables_minify() {
        let mut raw = BundlerOptions::default();
        raw.production = Some(true);
        raw.autoinstall = true;
        let opts = raw.resolve();
        assert!(opts.production);
        assert!(!opts.watch);
        assert!(opts.minify);
        assert!(opts.content_hash);
        assert!(!opts.autoinstall);
    }

    #[test]
    fn node_target_never_gets_hmr() {
        let mut raw = BundlerOptions::default();
        raw.target = Target::Node;
        let opts = raw.resolve();
        assert!(!opts.hmr);
    }
}
