//! Module compilation through the external bundler.
//!
//! The bundler lives in the already-installed bundler toolchain directory.
//! It is driven out of process: a small Node driver script loads the bundler
//! from the toolchain's `node_modules`, bundles one staged module with
//! minification enabled, and prints a JSON payload on stdout:
//!
//! ```json
//! { "code": "...", "assets": { "relative-name": "..." } }
//! ```
//!
//! The minimized code lands at the module's own staged path; each auxiliary
//! asset lands next to it, at the module's directory joined with the asset's
//! relative name, which preserves relative-asset loading from the bundled
//! code. Per-module compilations are independent of each other: they read
//! shared staged input and write disjoint output keys, so the pipeline runs
//! them concurrently.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::BuildError;
use crate::files::FileSet;

/// File name of the driver script written into the toolchain directory.
pub const DRIVER_FILE_NAME: &str = "bundle-driver.js";

const DRIVER_SOURCE: &str = r#"'use strict'

const path = require('path')

const input = process.argv[2]
const bundler = require(path.join(process.cwd(), 'node_modules', '@zeit', 'ncc'))

bundler(input, { minify: true })
  .then(({ code, assets }) => {
    const payload = { code, assets: {} }
    for (const name of Object.keys(assets || {})) {
      const content = assets[name]
      payload.assets[name] = Buffer.isBuffer(content) ? content.toString('utf8') : String(content)
    }
    process.stdout.write(JSON.stringify(payload))
  })
  .catch((err) => {
    process.stderr.write(err && err.message ? err.message : String(err))
    process.exit(1)
  })
"#;

#[derive(Debug, Deserialize)]
struct BundlerPayload {
  code: String,
  #[serde(default)]
  assets: BTreeMap<String, String>,
}

/// Write the driver script into the bundler toolchain directory.
///
/// Done once per run, before any module compiles.
pub async fn write_driver(toolchain_dir: &Path) -> Result<(), BuildError> {
  tokio::fs::create_dir_all(toolchain_dir).await?;
  tokio::fs::write(toolchain_dir.join(DRIVER_FILE_NAME), DRIVER_SOURCE).await?;
  Ok(())
}

/// Compile one staged module, returning its output file fragment.
///
/// `module_path` is the staged-relative path of the module; the actual file
/// must already be materialized under `staged_root`. Any bundler failure
/// (bad syntax, unresolvable import, malformed payload) aborts with
/// [`BuildError::ModuleCompileFailed`].
pub async fn compile_module(
  node_program: &str,
  toolchain_dir: &Path,
  staged_root: &Path,
  module_path: &str,
) -> Result<FileSet, BuildError> {
  info!(module = %module_path, "compiling module");

  let input = staged_root.join(module_path);
  let output = Command::new(node_program)
    .arg(toolchain_dir.join(DRIVER_FILE_NAME))
    .arg(&input)
    .current_dir(toolchain_dir)
    .output()
    .await
    .map_err(|e| BuildError::ModuleCompileFailed {
      module: module_path.to_string(),
      cause: format!("failed to spawn '{}': {}", node_program, e),
    })?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(BuildError::ModuleCompileFailed {
      module: module_path.to_string(),
      cause: stderr.trim().to_string(),
    });
  }

  let payload: BundlerPayload =
    serde_json::from_slice(&output.stdout).map_err(|e| BuildError::ModuleCompileFailed {
      module: module_path.to_string(),
      cause: format!("malformed bundler payload: {}", e),
    })?;

  let mut compiled = FileSet::new();
  compiled.insert_blob(module_path, payload.code);
  for (name, content) in payload.assets {
    compiled.insert_blob(asset_path(module_path, &name), content);
  }

  debug!(module = %module_path, files = compiled.len(), "module compiled");
  Ok(compiled)
}

/// Output path for an asset: the module's directory joined with the asset's
/// own relative name.
fn asset_path(module_path: &str, asset_name: &str) -> String {
  let name = asset_name.strip_prefix("./").unwrap_or(asset_name);
  match module_path.rsplit_once('/') {
    Some((dir, _)) => format!("{dir}/{name}"),
    None => name.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn asset_path_joins_module_directory() {
    assert_eq!(asset_path("bot.js", "query.graphql"), "query.graphql");
    assert_eq!(asset_path("apps/bot.js", "query.graphql"), "apps/query.graphql");
    assert_eq!(asset_path("apps/bot.js", "./schema.json"), "apps/schema.json");
    assert_eq!(asset_path("a/b/c.js", "nested/asset.txt"), "a/b/nested/asset.txt");
  }

  #[cfg(unix)]
  fn stub_node(dir: &Path, script_body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("node-stub");
    std::fs::write(&path, format!("#!/bin/sh\n{script_body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
  }

  #[tokio::test]
  async fn write_driver_creates_script() {
    let temp = TempDir::new().unwrap();
    let toolchain = temp.path().join("ncc");
    write_driver(&toolchain).await.unwrap();

    let driver = std::fs::read_to_string(toolchain.join(DRIVER_FILE_NAME)).unwrap();
    assert!(driver.contains("minify: true"));
    assert!(driver.contains("@zeit"));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn compiles_payload_into_file_fragment() {
    let temp = TempDir::new().unwrap();
    let node = stub_node(
      temp.path(),
      r#"printf '{"code":"module.exports=()=>{}","assets":{"query.graphql":"{ viewer }"}}'"#,
    );

    let compiled = compile_module(&node, temp.path(), temp.path(), "apps/bot.js")
      .await
      .unwrap();

    assert_eq!(compiled.len(), 2);
    assert_eq!(
      compiled.get("apps/bot.js").unwrap().read().unwrap(),
      b"module.exports=()=>{}"
    );
    assert_eq!(
      compiled.get("apps/query.graphql").unwrap().read().unwrap(),
      b"{ viewer }"
    );
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn payload_without_assets_yields_single_file() {
    let temp = TempDir::new().unwrap();
    let node = stub_node(temp.path(), r#"printf '{"code":"x"}'"#);

    let compiled = compile_module(&node, temp.path(), temp.path(), "bot.js").await.unwrap();

    assert_eq!(compiled.len(), 1);
    assert!(compiled.contains("bot.js"));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn bundler_failure_carries_module_and_cause() {
    let temp = TempDir::new().unwrap();
    let node = stub_node(temp.path(), "echo 'Unexpected token' >&2; exit 1");

    let err = compile_module(&node, temp.path(), temp.path(), "broken.js")
      .await
      .unwrap_err();

    match err {
      BuildError::ModuleCompileFailed { module, cause } => {
        assert_eq!(module, "broken.js");
        assert!(cause.contains("Unexpected token"));
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn malformed_payload_is_a_compile_failure() {
    let temp = TempDir::new().unwrap();
    let node = stub_node(temp.path(), "printf 'not json'");

    let err = compile_module(&node, temp.path(), temp.path(), "bot.js").await.unwrap_err();

    assert!(matches!(err, BuildError::ModuleCompileFailed { .. }));
  }
}
