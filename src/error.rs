use std::{path::PathBuf, sync::Arc};

/// A dependency specifier together with enough context to render a code frame.
#[derive(Debug, Clone)]
pub struct DepLocation {
    pub importer: PathBuf,
    pub specifier: String,
    pub line: u32,
    pub column: u32,
}

/// Errors produced by the bundler core.
///
/// Mirrors the error kinds of the orchestration design: resolution failures,
/// compile failures relayed from the worker pool, and the handful of
/// invariant violations that indicate a bug in the orchestrator itself
/// rather than in user content.
#[derive(Debug, thiserror::Error)]
pub enum BundlerError {
    #[error("could not resolve '{specifier}' from '{}'", importer.display())]
    ResolveNotFound {
        specifier: String,
        importer: PathBuf,
    },

    #[error(
        "could not resolve '{}' imported from '{}' at {}:{}\n{source_line}",
        loc.specifier, loc.importer.display(), loc.line, loc.column
    )]
    ResolveNotFoundAt {
        loc: DepLocation,
        source_line: String,
    },

    #[error("specifier '{specifier}' resolved ambiguously from '{}'", importer.display())]
    ResolveAmbiguous {
        specifier: String,
        importer: PathBuf,
    },

    #[error("failed to compile '{}'", path.display())]
    Compile {
        path: PathBuf,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("auto-install of '{specifier}' failed")]
    InstallFailed {
        specifier: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("io error at '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("packaging failed for bundle rooted at '{}'", entry.display())]
    Packaging {
        entry: PathBuf,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// A violated internal invariant. Seeing this means the orchestrator has a
    /// bug; it is never produced by bad user input.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),
}

pub type Result<T, E = BundlerError> = std::result::Result<T, E>;
