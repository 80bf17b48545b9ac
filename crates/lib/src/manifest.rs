//! Manifest reading and validation.
//!
//! The manifest is the user's `package.json`; the application modules it
//! declares live under the namespaced `probot.apps` key as an ordered list
//! of identifier strings. Order is preserved all the way through the
//! pipeline because it determines load order in the generated launcher.
//!
//! Parsing happens against the in-memory staged file set, before anything is
//! written to disk, so every validation error fires before the pipeline does
//! any real work.

use serde::Deserialize;

use crate::error::BuildError;
use crate::files::FileSet;

/// File name the entrypoint must carry.
pub const MANIFEST_FILE_NAME: &str = "package.json";

#[derive(Debug, Deserialize)]
struct PackageJson {
  #[serde(default)]
  probot: Option<ProbotSection>,
}

#[derive(Debug, Deserialize)]
struct ProbotSection {
  #[serde(default)]
  apps: Vec<String>,
}

/// The validated application manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
  /// Declared module identifiers, in declaration order.
  pub apps: Vec<String>,
}

/// Check that `entrypoint` names a manifest file.
///
/// This is a pure string check; the filesystem is never touched.
pub fn validate_entrypoint(entrypoint: &str) -> Result<(), BuildError> {
  let file_name = entrypoint.rsplit('/').next().unwrap_or(entrypoint);
  if file_name != MANIFEST_FILE_NAME {
    return Err(BuildError::InvalidEntrypoint(entrypoint.to_string()));
  }
  Ok(())
}

impl Manifest {
  /// Read and validate the manifest at `entrypoint` from the staged set.
  ///
  /// Fails with [`BuildError::InvalidEntrypoint`] if the path does not
  /// resolve to a staged manifest, and [`BuildError::NoApplicationsDeclared`]
  /// if the module list is absent or empty.
  pub fn from_file_set(files: &FileSet, entrypoint: &str) -> Result<Self, BuildError> {
    validate_entrypoint(entrypoint)?;

    let entry = files
      .get(entrypoint)
      .ok_or_else(|| BuildError::InvalidEntrypoint(entrypoint.to_string()))?;
    let bytes = entry.read()?;
    let package: PackageJson = serde_json::from_slice(&bytes)?;

    let apps = package.probot.map(|p| p.apps).unwrap_or_default();
    if apps.is_empty() {
      return Err(BuildError::NoApplicationsDeclared);
    }

    Ok(Manifest { apps })
  }
}
