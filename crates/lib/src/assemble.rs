//! Final artifact assembly.
//!
//! Assembly unions every produced file set into one (dependency trees
//! first, then compiled module outputs, then the launcher and the runtime
//! shim) and binds the result to its execution metadata: handler name,
//! runtime identifier, environment map, and the declared size bound. Later
//! sources win on key collision; collisions are not expected in correct
//! operation and are not an error, matching the permissive merge the deploy
//! side performs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::files::FileSet;

/// Exported entry function of the generated launcher.
pub const HANDLER: &str = "launcher.launcher";

/// Target execution runtime.
pub const RUNTIME: &str = "nodejs8.10";

/// Upper bound on total artifact size, in bytes.
pub const MAX_ARTIFACT_SIZE: u64 = 250 * 1024 * 1024;

/// Artifact path of the launcher program.
pub const LAUNCHER_FILE_NAME: &str = "launcher.js";

/// Artifact path of the runtime shim.
pub const SHIM_FILE_NAME: &str = "bridge.js";

/// The final deployable artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
  /// Complete file set: dependency trees, compiled modules, launcher, shim.
  pub files: FileSet,
  /// Name of the exported entry function.
  pub handler: String,
  /// Target runtime identifier.
  pub runtime: String,
  /// Environment variables, copied verbatim from configuration.
  pub environment: BTreeMap<String, String>,
  /// Declared maximum total size in bytes.
  pub max_size: u64,
}

/// Execution metadata serialized next to the artifact's files.
#[derive(Debug, Serialize)]
pub struct ArtifactMetadata<'a> {
  pub handler: &'a str,
  pub runtime: &'a str,
  pub environment: &'a BTreeMap<String, String>,
  pub max_size_bytes: u64,
  pub file_count: usize,
}

impl Artifact {
  pub fn metadata(&self) -> ArtifactMetadata<'_> {
    ArtifactMetadata {
      handler: &self.handler,
      runtime: &self.runtime,
      environment: &self.environment,
      max_size_bytes: self.max_size,
      file_count: self.files.len(),
    }
  }
}

/// Merge everything into the final artifact.
///
/// `dependency_trees` merge first, in order, then `compiled`, then the
/// launcher and the shim, so pipeline-synthesized files always take
/// precedence.
pub fn assemble(
  dependency_trees: Vec<FileSet>,
  compiled: FileSet,
  launcher_source: String,
  runtime_shim: &Path,
  config: &BuildConfig,
) -> Result<Artifact, BuildError> {
  assemble_with_limit(
    dependency_trees,
    compiled,
    launcher_source,
    runtime_shim,
    config,
    MAX_ARTIFACT_SIZE,
  )
}

fn assemble_with_limit(
  dependency_trees: Vec<FileSet>,
  compiled: FileSet,
  launcher_source: String,
  runtime_shim: &Path,
  config: &BuildConfig,
  max_size: u64,
) -> Result<Artifact, BuildError> {
  if !runtime_shim.is_file() {
    return Err(BuildError::ArtifactAssemblyFailed(format!(
      "runtime shim not found at '{}'",
      runtime_shim.display()
    )));
  }

  let mut files = FileSet::new();
  for tree in dependency_trees {
    files.merge(tree);
  }
  files.merge(compiled);
  files.insert_blob(LAUNCHER_FILE_NAME, launcher_source);
  files.insert_ref(SHIM_FILE_NAME, runtime_shim);

  let size = files.total_size()?;
  if size > max_size {
    return Err(BuildError::ArtifactTooLarge { size, limit: max_size });
  }

  info!(files = files.len(), size, "artifact assembled");

  Ok(Artifact {
    files,
    handler: HANDLER.to_string(),
    runtime: RUNTIME.to_string(),
    environment: config.environment(),
    max_size,
  })
}
