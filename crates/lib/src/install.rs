//! Dependency installation via the external package manager.
//!
//! Three installs happen per run: the user's own dependencies (from the
//! user's manifest), the bundler toolchain and the framework toolchain
//! (each from a synthetic manifest pinning a fixed version). Toolchain
//! trees are isolated from the user tree; they are merged only at final
//! assembly, by path union.
//!
//! The install hands the package manager a "prefer cached" hint to cut
//! latency but accepts network fallback. A failing install is fatal for the
//! whole pipeline; retries belong to the tool itself.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::BuildError;

/// Bundler version pinned into the bundler toolchain manifest.
pub const BUNDLER_VERSION: &str = "0.6.0";

/// Framework version pinned into the framework toolchain manifest.
pub const FRAMEWORK_VERSION: &str = "7.5.0";

/// Which dependency tree an install materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallTarget {
  /// The user project's own dependencies.
  User,
  /// The bundler toolchain, pinned independently of user declarations.
  Bundler,
  /// The framework runtime toolchain, pinned independently as well.
  Framework,
}

impl InstallTarget {
  pub fn as_str(&self) -> &'static str {
    match self {
      InstallTarget::User => "user",
      InstallTarget::Bundler => "bundler",
      InstallTarget::Framework => "framework",
    }
  }
}

impl std::fmt::Display for InstallTarget {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Synthetic manifest pinning the bundler toolchain.
pub fn bundler_manifest() -> String {
  serde_json::json!({
    "dependencies": { "@zeit/ncc": BUNDLER_VERSION }
  })
  .to_string()
}

/// Synthetic manifest pinning the framework toolchain.
pub fn framework_manifest() -> String {
  serde_json::json!({
    "dependencies": { "probot": FRAMEWORK_VERSION }
  })
  .to_string()
}

/// Runs the external package manager.
///
/// The program name is injectable so tests can substitute a stub; the
/// default is the real `npm` on `PATH`.
#[derive(Debug, Clone)]
pub struct Installer {
  program: String,
}

impl Default for Installer {
  fn default() -> Self {
    Self::new("npm")
  }
}

impl Installer {
  pub fn new(program: impl Into<String>) -> Self {
    Self { program: program.into() }
  }

  /// Materialize one dependency tree under `dir`.
  ///
  /// Writes `manifest_override` as the directory's manifest first when
  /// supplied (toolchain installs pin their own versions this way), then
  /// invokes `<program> install --prefer-offline` in `dir` and waits for it.
  pub async fn install(
    &self,
    target: InstallTarget,
    dir: &Path,
    manifest_override: Option<&str>,
  ) -> Result<(), BuildError> {
    tokio::fs::create_dir_all(dir).await?;

    if let Some(manifest) = manifest_override {
      tokio::fs::write(dir.join("package.json"), manifest).await?;
      debug!(target = %target, dir = %dir.display(), "wrote synthetic manifest");
    }

    info!(target = %target, dir = %dir.display(), "installing dependencies");

    let output = Command::new(&self.program)
      .arg("install")
      .arg("--prefer-offline")
      .current_dir(dir)
      .output()
      .await
      .map_err(|e| BuildError::DependencyInstallFailed {
        target,
        code: None,
        detail: format!("failed to spawn '{}': {}", self.program, e),
      })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(BuildError::DependencyInstallFailed {
        target,
        code: output.status.code(),
        detail: stderr.trim().to_string(),
      });
    }

    info!(target = %target, "install complete");
    Ok(())
  }
}
