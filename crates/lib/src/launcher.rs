//! Launcher synthesis.
//!
//! The launcher is the generated entry-point program that wires every
//! resolved module into a running server at process start. Its source is a
//! fixed template with exactly one substitution point; the substituted block
//! changes the working directory to the staged user root and builds the
//! ordered module list.
//!
//! The ordered list of [`ModuleLoader`] variants is the single source of
//! truth: rendering is a pure function over it, testable against literal
//! expected strings, and the same list always produces byte-identical
//! output. Load order is load-bearing: middleware registered earlier can
//! intercept before later ones. Local modules come first (classifier order),
//! then external modules (classifier order), then the three fixed framework
//! modules, always last.

use crate::error::BuildError;

/// Substitution point in the launcher template.
pub const LOADER_PLACEHOLDER: &str = "// LOADERS";

/// The three framework modules appended after every user module, in fixed
/// order: default behavior, error reporting, usage statistics.
pub const FRAMEWORK_MODULES: [&str; 3] = [
  "probot/lib/apps/default",
  "probot/lib/apps/sentry",
  "probot/lib/apps/stats",
];

const TEMPLATE: &str = include_str!("../templates/launcher.js");

/// One entry in the launcher's ordered module list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLoader {
  /// A compiled local module, referenced by staged-relative path.
  Local(String),
  /// A registry module, referenced by package name and resolved at runtime.
  External(String),
  /// One of the fixed framework modules.
  Framework(&'static str),
}

impl ModuleLoader {
  /// The loader expression for this module.
  pub fn require_expr(&self) -> String {
    match self {
      ModuleLoader::Local(path) => format!("require('./{path}')"),
      ModuleLoader::External(name) => format!("require('{name}')"),
      ModuleLoader::Framework(id) => format!("require('{id}')"),
    }
  }
}

/// Build the full ordered loader list for the given classification.
pub fn loader_list(local: &[String], external: &[String]) -> Vec<ModuleLoader> {
  local
    .iter()
    .map(|path| ModuleLoader::Local(path.clone()))
    .chain(external.iter().map(|name| ModuleLoader::External(name.clone())))
    .chain(FRAMEWORK_MODULES.into_iter().map(ModuleLoader::Framework))
    .collect()
}

/// Render the substituted block: chdir plus the module list.
///
/// Empty local or external segments contribute no lines at all; the list is
/// built from the loader variants, so there is never a dangling separator.
fn render_block(loaders: &[ModuleLoader]) -> String {
  let entries: Vec<String> = loaders.iter().map(|l| format!("  {},", l.require_expr())).collect();
  format!("process.chdir('./user')\n\napps = [\n{}\n]", entries.join("\n"))
}

/// Generate the launcher source for the given classification.
///
/// Fails with [`BuildError::LauncherSynthesisFailed`] if the template does
/// not carry exactly one substitution point.
pub fn synthesize(local: &[String], external: &[String]) -> Result<String, BuildError> {
  synthesize_from(TEMPLATE, local, external)
}

fn synthesize_from(template: &str, local: &[String], external: &[String]) -> Result<String, BuildError> {
  match template.matches(LOADER_PLACEHOLDER).count() {
    1 => {}
    0 => {
      return Err(BuildError::LauncherSynthesisFailed(format!(
        "template is missing the '{LOADER_PLACEHOLDER}' placeholder"
      )));
    }
    n => {
      return Err(BuildError::LauncherSynthesisFailed(format!(
        "template carries {n} '{LOADER_PLACEHOLDER}' placeholders, expected exactly one"
      )));
    }
  }

  let block = render_block(&loader_list(local, external));
  Ok(template.replacen(LOADER_PLACEHOLDER, &block, 1))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn loader_list_orders_local_external_framework() {
    let loaders = loader_list(&strings(&["bot.js"]), &strings(&["registry-pkg"]));
    assert_eq!(
      loaders,
      vec![
        ModuleLoader::Local("bot.js".to_string()),
        ModuleLoader::External("registry-pkg".to_string()),
        ModuleLoader::Framework("probot/lib/apps/default"),
        ModuleLoader::Framework("probot/lib/apps/sentry"),
        ModuleLoader::Framework("probot/lib/apps/stats"),
      ]
    );
  }

  #[test]
  fn require_expressions() {
    assert_eq!(
      ModuleLoader::Local("apps/bot.js".to_string()).require_expr(),
      "require('./apps/bot.js')"
    );
    assert_eq!(
      ModuleLoader::External("my-pkg".to_string()).require_expr(),
      "require('my-pkg')"
    );
    assert_eq!(
      ModuleLoader::Framework("probot/lib/apps/stats").require_expr(),
      "require('probot/lib/apps/stats')"
    );
  }

  #[test]
  fn block_with_local_and_external() {
    let block = render_block(&loader_list(&strings(&["bot.js"]), &strings(&["registry-pkg"])));
    assert_eq!(
      block,
      "process.chdir('./user')\n\napps = [\n  require('./bot.js'),\n  require('registry-pkg'),\n  require('probot/lib/apps/default'),\n  require('probot/lib/apps/sentry'),\n  require('probot/lib/apps/stats'),\n]"
    );
  }

  #[test]
  fn empty_local_segment_leaves_no_stray_separator() {
    let block = render_block(&loader_list(&[], &strings(&["only-pkg"])));
    assert_eq!(
      block,
      "process.chdir('./user')\n\napps = [\n  require('only-pkg'),\n  require('probot/lib/apps/default'),\n  require('probot/lib/apps/sentry'),\n  require('probot/lib/apps/stats'),\n]"
    );
  }

  #[test]
  fn empty_external_segment_leaves_no_stray_separator() {
    let block = render_block(&loader_list(&strings(&["bot.js"]), &[]));
    assert!(!block.contains(",\n\n"));
    assert!(!block.contains(",,"));
    assert!(block.contains("require('./bot.js'),\n  require('probot/lib/apps/default')"));
  }

  #[test]
  fn both_segments_empty_yields_framework_modules_only() {
    let block = render_block(&loader_list(&[], &[]));
    assert_eq!(
      block,
      "process.chdir('./user')\n\napps = [\n  require('probot/lib/apps/default'),\n  require('probot/lib/apps/sentry'),\n  require('probot/lib/apps/stats'),\n]"
    );
  }

  #[test]
  fn synthesis_is_idempotent() {
    let local = strings(&["bot.js", "apps/helper.js"]);
    let external = strings(&["pkg-one", "pkg-two"]);
    let first = synthesize(&local, &external).unwrap();
    let second = synthesize(&local, &external).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn synthesized_source_resolves_the_placeholder() {
    let source = synthesize(&strings(&["bot.js"]), &[]).unwrap();
    assert!(!source.contains(LOADER_PLACEHOLDER));
    assert!(source.contains("require('./bot.js')"));
    assert!(source.contains("exports.launcher"));
  }

  #[test]
  fn sink_installs_before_module_loading() {
    let source = synthesize(&strings(&["bot.js"]), &[]).unwrap();
    let sink = source.find("process.on('unhandledRejection'").unwrap();
    let loads = source.find("require('./bot.js')").unwrap();
    let register = source.find("apps.forEach").unwrap();
    assert!(sink < loads);
    assert!(loads < register);
  }

  #[test]
  fn error_middleware_registers_after_module_registration() {
    let source = synthesize(&[], &[]).unwrap();
    let register = source.find("apps.forEach").unwrap();
    let middleware = source.find("logRequestErrors").expect("middleware required");
    let last_use = source.rfind("probot.server.use(logRequestErrors)").unwrap();
    assert!(register < last_use);
    assert!(middleware < last_use || middleware == last_use);
  }

  #[test]
  fn template_without_placeholder_is_an_internal_error() {
    let err = synthesize_from("no placeholder here", &[], &[]).unwrap_err();
    assert!(matches!(err, BuildError::LauncherSynthesisFailed(_)));
  }

  #[test]
  fn template_with_duplicate_placeholder_is_an_internal_error() {
    let template = "// LOADERS\n// LOADERS\n";
    let err = synthesize_from(template, &[], &[]).unwrap_err();
    assert!(matches!(err, BuildError::LauncherSynthesisFailed(_)));
  }
}
