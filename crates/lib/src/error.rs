//! Error types for the build pipeline.
//!
//! Every stage failure maps to one variant here and aborts the whole run.
//! There is no partial artifact and no retry at this layer; retries, if any,
//! belong to the external tools themselves.

use thiserror::Error;

use crate::install::InstallTarget;

/// Errors that can occur during a pipeline run.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The entrypoint path does not resolve to a `package.json` manifest.
  #[error("invalid entrypoint '{0}': must name a staged package.json manifest")]
  InvalidEntrypoint(String),

  /// A mandatory configuration field is absent or empty.
  #[error("missing required configuration field '{field}'")]
  MissingConfiguration { field: &'static str },

  /// The manifest declares no application modules.
  #[error("no applications declared in the manifest")]
  NoApplicationsDeclared,

  /// The external package manager exited with a failure.
  #[error("dependency install failed for {target} target (exit code {code:?}): {detail}")]
  DependencyInstallFailed {
    target: InstallTarget,
    code: Option<i32>,
    detail: String,
  },

  /// The bundler failed on one module.
  #[error("failed to compile module '{module}': {cause}")]
  ModuleCompileFailed { module: String, cause: String },

  /// The launcher template or its placeholder is broken.
  ///
  /// This is an internal invariant violation, not a user error: the template
  /// ships inside the crate and must carry exactly one substitution point.
  #[error("launcher synthesis failed: {0}")]
  LauncherSynthesisFailed(String),

  /// The assembled file set exceeds the declared size bound.
  #[error("artifact size {size} bytes exceeds the {limit} byte limit")]
  ArtifactTooLarge { size: u64, limit: u64 },

  /// Final assembly failed for a reason other than size.
  #[error("artifact assembly failed: {0}")]
  ArtifactAssemblyFailed(String),

  /// I/O error during staging, install or compilation.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// Malformed JSON in the manifest or a bundler payload.
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}
