//! Pipeline orchestration.
//!
//! One call to [`build`] drives a full run through the stage machine:
//!
//! ```text
//! Init → ManifestValidated → FilesStaged → UserDepsInstalled
//!      → ToolchainsInstalled → ModulesCompiled → LauncherSynthesized
//!      → Assembled
//! ```
//!
//! Every stage can fail, failure is terminal, and a failed run yields no
//! artifact. Validation happens against the in-memory inputs before any file
//! is written or process spawned. The three dependency installs run
//! concurrently; per-module compiles run concurrently under a semaphore.
//! When a compile fails, in-flight siblings are abandoned and their results
//! never reach the artifact.
//!
//! Each run works in its own fresh working directory; nothing survives
//! across invocations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

use crate::assemble::{Artifact, assemble};
use crate::classify::classify;
use crate::compile::{compile_module, write_driver};
use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::files::FileSet;
use crate::install::{InstallTarget, Installer, bundler_manifest, framework_manifest};
use crate::manifest::Manifest;
use crate::launcher;

/// Pipeline stages, in order. Logged as each transition completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Init,
  ManifestValidated,
  FilesStaged,
  UserDepsInstalled,
  ToolchainsInstalled,
  ModulesCompiled,
  LauncherSynthesized,
  Assembled,
}

impl Stage {
  pub fn as_str(&self) -> &'static str {
    match self {
      Stage::Init => "init",
      Stage::ManifestValidated => "manifest-validated",
      Stage::FilesStaged => "files-staged",
      Stage::UserDepsInstalled => "user-deps-installed",
      Stage::ToolchainsInstalled => "toolchains-installed",
      Stage::ModulesCompiled => "modules-compiled",
      Stage::LauncherSynthesized => "launcher-synthesized",
      Stage::Assembled => "assembled",
    }
  }
}

impl std::fmt::Display for Stage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Inputs for one pipeline run.
#[derive(Debug, Clone)]
pub struct BuildParams {
  /// Staged file set delivered by the staging collaborator.
  pub files: FileSet,
  /// Path of the manifest within the staged set.
  pub entrypoint: String,
  /// Fresh working directory for this run.
  pub work_path: PathBuf,
  /// Path to the runtime shim packaged alongside the launcher.
  pub runtime_shim: PathBuf,
  /// Caller-supplied configuration.
  pub config: BuildConfig,
}

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
  /// Package manager program. Injectable for tests.
  pub npm_program: String,
  /// Node program used to drive the bundler. Injectable for tests.
  pub node_program: String,
  /// Maximum concurrent module compilations.
  pub parallelism: usize,
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self {
      npm_program: "npm".to_string(),
      node_program: "node".to_string(),
      parallelism: std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4),
    }
  }
}

/// Run the whole pipeline, producing exactly one artifact on success.
pub async fn build(params: &BuildParams, options: &PipelineOptions) -> Result<Artifact, BuildError> {
  info!(stage = %Stage::Init, entrypoint = %params.entrypoint, "starting build");

  // Everything that can be validated from in-memory inputs fails here,
  // before any file is written or process spawned.
  params.config.validate()?;
  let manifest = Manifest::from_file_set(&params.files, &params.entrypoint)?;
  info!(stage = %Stage::ManifestValidated, apps = manifest.apps.len(), "manifest validated");

  let classified = classify(&manifest.apps, &params.files);

  let user_root = params.work_path.join("user");
  let bundler_dir = params.work_path.join("ncc");
  let framework_dir = params.work_path.join("framework");

  params.files.stage(&user_root).await?;
  info!(stage = %Stage::FilesStaged, root = %user_root.display(), "files staged");

  // All three installs are independent and run concurrently. The bundler
  // toolchain gates compilation; the framework toolchain gates assembly.
  let installer = Installer::new(&options.npm_program);
  let user_dir = match Path::new(&params.entrypoint).parent() {
    Some(parent) if parent != Path::new("") => user_root.join(parent),
    _ => user_root.clone(),
  };

  let user_install = spawn_install(&installer, InstallTarget::User, &user_dir, None);
  let bundler_install = spawn_install(&installer, InstallTarget::Bundler, &bundler_dir, Some(bundler_manifest()));
  let framework_install =
    spawn_install(&installer, InstallTarget::Framework, &framework_dir, Some(framework_manifest()));

  await_install(user_install, InstallTarget::User).await?;
  info!(stage = %Stage::UserDepsInstalled, "user dependencies installed");

  await_install(bundler_install, InstallTarget::Bundler).await?;
  await_install(framework_install, InstallTarget::Framework).await?;
  info!(stage = %Stage::ToolchainsInstalled, "toolchains installed");

  let compiled = compile_all(&classified.local, &bundler_dir, &user_root, options).await?;
  info!(stage = %Stage::ModulesCompiled, modules = classified.local.len(), "modules compiled");

  let launcher_source = launcher::synthesize(&classified.local, &classified.external)?;
  info!(stage = %Stage::LauncherSynthesized, "launcher synthesized");

  let user_tree = FileSet::collect_dir(&user_dir.join("node_modules"), "node_modules")?;
  let framework_tree = FileSet::collect_dir(
    &framework_dir.join("node_modules").join("probot"),
    "node_modules/probot",
  )?;

  let artifact = assemble(
    vec![user_tree, framework_tree],
    compiled,
    launcher_source,
    &params.runtime_shim,
    &params.config,
  )?;
  info!(stage = %Stage::Assembled, files = artifact.files.len(), "build complete");

  Ok(artifact)
}

fn spawn_install(
  installer: &Installer,
  target: InstallTarget,
  dir: &Path,
  manifest_override: Option<String>,
) -> JoinHandle<Result<(), BuildError>> {
  let installer = installer.clone();
  let dir = dir.to_path_buf();
  tokio::spawn(async move { installer.install(target, &dir, manifest_override.as_deref()).await })
}

async fn await_install(
  handle: JoinHandle<Result<(), BuildError>>,
  target: InstallTarget,
) -> Result<(), BuildError> {
  match handle.await {
    Ok(result) => result,
    Err(e) => {
      error!(target = %target, error = %e, "install task panicked");
      Err(BuildError::DependencyInstallFailed {
        target,
        code: None,
        detail: format!("install task panicked: {e}"),
      })
    }
  }
}

/// Compile every local module concurrently and merge the outputs.
///
/// Outputs merge in classifier order regardless of completion order, and a
/// path produced by two different modules is rejected. On failure the
/// remaining tasks are dropped with the join set; their results are
/// discarded.
async fn compile_all(
  local: &[String],
  bundler_dir: &Path,
  user_root: &Path,
  options: &PipelineOptions,
) -> Result<FileSet, BuildError> {
  if local.is_empty() {
    return Ok(FileSet::new());
  }

  write_driver(bundler_dir).await?;

  let semaphore = Arc::new(Semaphore::new(options.parallelism.max(1)));
  let mut join_set = JoinSet::new();

  for module in local {
    let module = module.clone();
    let node = options.node_program.clone();
    let toolchain = bundler_dir.to_path_buf();
    let staged_root = user_root.to_path_buf();
    let semaphore = semaphore.clone();

    join_set.spawn(async move {
      let _permit = semaphore.acquire().await.unwrap();
      let result = compile_module(&node, &toolchain, &staged_root, &module).await;
      (module, result)
    });
  }

  let mut fragments: Vec<(String, FileSet)> = Vec::with_capacity(local.len());
  while let Some(join_result) = join_set.join_next().await {
    match join_result {
      Ok((module, Ok(fragment))) => fragments.push((module, fragment)),
      Ok((module, Err(e))) => {
        error!(module = %module, error = %e, "module compilation failed");
        return Err(e);
      }
      Err(e) => {
        error!(error = %e, "compile task panicked");
        return Err(BuildError::ModuleCompileFailed {
          module: "<unknown>".to_string(),
          cause: format!("compile task panicked: {e}"),
        });
      }
    }
  }

  // Deterministic merge in classifier order, with collision detection.
  fragments.sort_by_key(|(module, _)| local.iter().position(|m| m == module).unwrap_or(usize::MAX));

  let mut compiled = FileSet::new();
  for (module, fragment) in fragments {
    for (path, entry) in fragment.iter() {
      if compiled.contains(path) {
        return Err(BuildError::ModuleCompileFailed {
          module,
          cause: format!("output path '{path}' collides with another module's output"),
        });
      }
      match entry {
        crate::files::FileEntry::Blob(bytes) => compiled.insert_blob(path, bytes.clone()),
        crate::files::FileEntry::FsRef(p) => compiled.insert_ref(path, p.clone()),
      };
    }
  }

  Ok(compiled)
}
