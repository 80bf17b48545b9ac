use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use botpack_lib::{
    BuildConfig, BuildParams, FileSet, Manifest, PipelineOptions, build, classify,
};

/// botpack - package declarative bot manifests into serverless artifacts
#[derive(Parser)]
#[command(name = "botpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the artifact
    Build {
        /// Project directory holding the manifest and sources
        #[arg(default_value = ".")]
        project: PathBuf,

        /// Manifest path relative to the project directory
        #[arg(long, default_value = "package.json")]
        entrypoint: String,

        /// Directory the artifact file set is written to
        #[arg(short, long, default_value = "dist")]
        output: PathBuf,

        /// Path to the runtime shim packaged as bridge.js
        #[arg(long)]
        shim: PathBuf,

        /// Working directory for the run (default: a fresh temp dir)
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Maximum concurrent module compilations
        #[arg(long)]
        parallelism: Option<usize>,

        /// Application id (or BOTPACK_APP_ID)
        #[arg(long)]
        app_id: Option<String>,

        /// Webhook secret (or BOTPACK_WEBHOOK_SECRET)
        #[arg(long)]
        webhook_secret: Option<String>,

        /// PEM private key (or BOTPACK_PRIVATE_KEY)
        #[arg(long)]
        private_key: Option<String>,

        /// Error-reporting DSN (or BOTPACK_SENTRY_DSN)
        #[arg(long)]
        sentry_dsn: Option<String>,
    },

    /// Validate the manifest and show the local/external classification
    Inspect {
        /// Project directory holding the manifest and sources
        #[arg(default_value = ".")]
        project: PathBuf,

        /// Manifest path relative to the project directory
        #[arg(long, default_value = "package.json")]
        entrypoint: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).without_time().init();

    match cli.command {
        Commands::Build {
            project,
            entrypoint,
            output,
            shim,
            work_dir,
            parallelism,
            app_id,
            webhook_secret,
            private_key,
            sentry_dsn,
        } => {
            let config = resolve_config(app_id, webhook_secret, private_key, sentry_dsn);
            cmd_build(&project, &entrypoint, &output, &shim, work_dir, parallelism, config).await
        }
        Commands::Inspect { project, entrypoint } => cmd_inspect(&project, &entrypoint),
    }
}

/// Flags win over environment variables; absent fields stay empty and fail
/// pipeline validation with a field-specific message.
fn resolve_config(
    app_id: Option<String>,
    webhook_secret: Option<String>,
    private_key: Option<String>,
    sentry_dsn: Option<String>,
) -> BuildConfig {
    let from_env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

    BuildConfig {
        app_id: app_id.or_else(|| from_env("BOTPACK_APP_ID")).unwrap_or_default(),
        webhook_secret: webhook_secret
            .or_else(|| from_env("BOTPACK_WEBHOOK_SECRET"))
            .unwrap_or_default(),
        private_key: private_key
            .or_else(|| from_env("BOTPACK_PRIVATE_KEY"))
            .unwrap_or_default(),
        sentry_dsn: sentry_dsn.or_else(|| from_env("BOTPACK_SENTRY_DSN")),
    }
}

/// Load the project directory as the staged file set.
///
/// Installed dependencies and VCS metadata are not inputs; the pipeline
/// resolves dependencies itself.
fn load_project(project: &Path) -> Result<FileSet> {
    if !project.is_dir() {
        anyhow::bail!("project directory not found: {}", project.display());
    }
    let all = FileSet::collect_dir(project, "").map_err(|e| anyhow::anyhow!("{e}"))?;
    let files: FileSet = all
        .iter()
        .filter(|(path, _)| !path.starts_with("node_modules/") && !path.starts_with(".git/"))
        .map(|(path, entry)| (path.to_string(), entry.clone()))
        .collect();
    Ok(files)
}

async fn cmd_build(
    project: &Path,
    entrypoint: &str,
    output: &Path,
    shim: &Path,
    work_dir: Option<PathBuf>,
    parallelism: Option<usize>,
    config: BuildConfig,
) -> Result<()> {
    let files = load_project(project)?;

    // The temp dir handle must outlive the run.
    let _temp_work;
    let work_path = match work_dir {
        Some(dir) => dir,
        None => {
            let temp = tempfile::TempDir::new().context("failed to create working directory")?;
            let path = temp.path().to_path_buf();
            _temp_work = temp;
            path
        }
    };

    let params = BuildParams {
        files,
        entrypoint: entrypoint.to_string(),
        work_path,
        runtime_shim: shim.to_path_buf(),
        config,
    };

    let mut options = PipelineOptions::default();
    if let Some(parallelism) = parallelism {
        options.parallelism = parallelism.max(1);
    }

    let artifact = match build(&params, &options).await {
        Ok(artifact) => artifact,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    artifact
        .files
        .stage(output)
        .await
        .map_err(|e| anyhow::anyhow!("failed to write artifact: {e}"))?;

    let metadata = serde_json::to_string_pretty(&artifact.metadata())?;
    std::fs::write(output.join("artifact.json"), metadata)?;

    println!(
        "built artifact: {} file(s), handler {}, runtime {}",
        artifact.files.len(),
        artifact.handler,
        artifact.runtime
    );
    println!("written to {}", output.display());

    Ok(())
}

fn cmd_inspect(project: &Path, entrypoint: &str) -> Result<()> {
    let files = load_project(project)?;

    let manifest = match Manifest::from_file_set(&files, entrypoint) {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    let classified = classify(&manifest.apps, &files);

    println!("declared modules: {}", manifest.apps.len());
    println!("local ({}):", classified.local.len());
    for path in &classified.local {
        println!("  {path}");
    }
    println!("external ({}):", classified.external.len());
    for name in &classified.external {
        println!("  {name}");
    }

    Ok(())
}
