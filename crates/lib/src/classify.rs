//! Module classification.
//!
//! Each declared identifier is treated as a pattern over the staged file
//! paths. An identifier that matches at least one staged path is a *local*
//! module and will be compiled; one that matches nothing is *external* and
//! is left to registry resolution at runtime (the install step has already
//! materialized it under `node_modules`).
//!
//! The partition is total and disjoint: every declared identifier lands in
//! exactly one of the two lists, and order within each list follows
//! declaration order because it fixes launcher load order.

use regex::Regex;
use tracing::{debug, warn};

use crate::files::FileSet;

/// Result of partitioning the declared module identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedModules {
  /// Matched staged file paths, declaration order, de-duplicated.
  pub local: Vec<String>,
  /// Identifiers with no staged match, declaration order.
  pub external: Vec<String>,
}

/// Partition `declared` against the staged file set.
///
/// An identifier that fails to compile as a pattern cannot match any staged
/// path and classifies as external; the registry may still know the literal
/// name.
pub fn classify(declared: &[String], files: &FileSet) -> ClassifiedModules {
  let mut result = ClassifiedModules::default();

  for identifier in declared {
    let pattern = match Regex::new(identifier) {
      Ok(pattern) => pattern,
      Err(error) => {
        warn!(module = %identifier, %error, "identifier is not a valid pattern, treating as external");
        result.external.push(identifier.clone());
        continue;
      }
    };

    let mut matched = false;
    for path in files.paths() {
      if pattern.is_match(path) {
        matched = true;
        if !result.local.iter().any(|p| p == path) {
          result.local.push(path.to_string());
        }
      }
    }

    if !matched {
      result.external.push(identifier.clone());
    }
  }

  debug!(
    local = result.local.len(),
    external = result.external.len(),
    "classified declared modules"
  );

  result
}
