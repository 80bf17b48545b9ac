//! Staged file sets.
//!
//! A [`FileSet`] maps relative paths (always `/`-separated) to file content.
//! The staging collaborator hands the pipeline one of these for the user's
//! project; the pipeline itself produces more of them (compiled modules,
//! dependency trees, the launcher) and unions them into the final artifact.
//!
//! Entries are either in-memory blobs or references to files already on
//! disk, mirroring the two ways content reaches the pipeline: synthesized
//! text on one hand, installed dependency trees on the other.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::BuildError;

/// One entry in a [`FileSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEntry {
  /// Content held in memory.
  Blob(Vec<u8>),
  /// Content that lives in a file on disk.
  FsRef(PathBuf),
}

impl FileEntry {
  /// Read the entry's content, touching disk only for [`FileEntry::FsRef`].
  pub fn read(&self) -> Result<Vec<u8>, BuildError> {
    match self {
      FileEntry::Blob(bytes) => Ok(bytes.clone()),
      FileEntry::FsRef(path) => Ok(std::fs::read(path)?),
    }
  }

  /// Size of the entry in bytes.
  pub fn size(&self) -> Result<u64, BuildError> {
    match self {
      FileEntry::Blob(bytes) => Ok(bytes.len() as u64),
      FileEntry::FsRef(path) => Ok(std::fs::metadata(path)?.len()),
    }
  }
}

/// An ordered mapping from relative path to file content.
///
/// Keys use `/` separators regardless of platform so that path comparisons
/// and artifact listings are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
  entries: BTreeMap<String, FileEntry>,
}

impl FileSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn contains(&self, path: &str) -> bool {
    self.entries.contains_key(path)
  }

  pub fn get(&self, path: &str) -> Option<&FileEntry> {
    self.entries.get(path)
  }

  /// Iterate entries in path order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v))
  }

  /// Iterate paths in order.
  pub fn paths(&self) -> impl Iterator<Item = &str> {
    self.entries.keys().map(|k| k.as_str())
  }

  /// Insert an in-memory entry. Returns the previous entry if one existed.
  pub fn insert_blob(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Option<FileEntry> {
    self.entries.insert(normalize(path.into()), FileEntry::Blob(bytes.into()))
  }

  /// Insert a reference to a file on disk.
  pub fn insert_ref(&mut self, path: impl Into<String>, fs_path: impl Into<PathBuf>) -> Option<FileEntry> {
    self.entries.insert(normalize(path.into()), FileEntry::FsRef(fs_path.into()))
  }

  /// Union `other` into `self`; entries from `other` win on key collision.
  pub fn merge(&mut self, other: FileSet) {
    for (path, entry) in other.entries {
      self.entries.insert(path, entry);
    }
  }

  /// Materialize every entry under `root`, creating parent directories.
  ///
  /// Entries the set already synthesized are written as-is; fs-ref entries
  /// are copied.
  pub async fn stage(&self, root: &Path) -> Result<(), BuildError> {
    for (path, entry) in &self.entries {
      let dest = root.join(path);
      if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
      }
      match entry {
        FileEntry::Blob(bytes) => tokio::fs::write(&dest, bytes).await?,
        FileEntry::FsRef(src) => {
          tokio::fs::copy(src, &dest).await?;
        }
      }
    }
    debug!(count = self.entries.len(), root = %root.display(), "staged file set");
    Ok(())
  }

  /// Collect every file under `root` into a set keyed `prefix/<relative>`.
  ///
  /// Used to pick up installed dependency trees after the package manager
  /// has run. Entries are fs-refs; nothing is read into memory.
  pub fn collect_dir(root: &Path, prefix: &str) -> Result<FileSet, BuildError> {
    let mut set = FileSet::new();
    if !root.exists() {
      return Ok(set);
    }
    for entry in WalkDir::new(root) {
      let entry = entry.map_err(std::io::Error::from)?;
      if !entry.file_type().is_file() {
        continue;
      }
      let rel = entry
        .path()
        .strip_prefix(root)
        .map_err(std::io::Error::other)?;
      let mut key = String::new();
      if !prefix.is_empty() {
        key.push_str(prefix);
        key.push('/');
      }
      key.push_str(&rel.to_string_lossy().replace('\\', "/"));
      set.insert_ref(key, entry.path());
    }
    Ok(set)
  }

  /// Total size of all entries in bytes.
  pub fn total_size(&self) -> Result<u64, BuildError> {
    let mut total = 0u64;
    for entry in self.entries.values() {
      total += entry.size()?;
    }
    Ok(total)
  }
}

impl FromIterator<(String, FileEntry)> for FileSet {
  fn from_iter<I: IntoIterator<Item = (String, FileEntry)>>(iter: I) -> Self {
    let mut set = FileSet::new();
    for (path, entry) in iter {
      set.entries.insert(normalize(path), entry);
    }
    set
  }
}

fn normalize(path: String) -> String {
  path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn merge_later_wins() {
    let mut base = FileSet::new();
    base.insert_blob("a.js", "old");
    base.insert_blob("b.js", "keep");

    let mut overlay = FileSet::new();
    overlay.insert_blob("a.js", "new");

    base.merge(overlay);

    assert_eq!(base.len(), 2);
    assert_eq!(base.get("a.js").unwrap().read().unwrap(), b"new");
    assert_eq!(base.get("b.js").unwrap().read().unwrap(), b"keep");
  }

  #[test]
  fn paths_are_ordered() {
    let mut set = FileSet::new();
    set.insert_blob("b/two.js", "");
    set.insert_blob("a/one.js", "");

    let paths: Vec<&str> = set.paths().collect();
    assert_eq!(paths, vec!["a/one.js", "b/two.js"]);
  }

  #[test]
  fn backslashes_normalize() {
    let mut set = FileSet::new();
    set.insert_blob(r"dir\file.js", "x");
    assert!(set.contains("dir/file.js"));
  }

  #[tokio::test]
  async fn stage_writes_blobs_and_copies_refs() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("source.txt");
    std::fs::write(&src, "from disk").unwrap();

    let mut set = FileSet::new();
    set.insert_blob("nested/blob.txt", "from memory");
    set.insert_ref("copied.txt", &src);

    let root = temp.path().join("out");
    set.stage(&root).await.unwrap();

    assert_eq!(std::fs::read_to_string(root.join("nested/blob.txt")).unwrap(), "from memory");
    assert_eq!(std::fs::read_to_string(root.join("copied.txt")).unwrap(), "from disk");
  }

  #[test]
  fn collect_dir_applies_prefix() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("pkg/inner")).unwrap();
    std::fs::write(temp.path().join("pkg/index.js"), "x").unwrap();
    std::fs::write(temp.path().join("pkg/inner/util.js"), "y").unwrap();

    let set = FileSet::collect_dir(&temp.path().join("pkg"), "node_modules/pkg").unwrap();

    let paths: Vec<&str> = set.paths().collect();
    assert_eq!(paths, vec!["node_modules/pkg/index.js", "node_modules/pkg/inner/util.js"]);
  }

  #[test]
  fn collect_dir_missing_root_is_empty() {
    let temp = TempDir::new().unwrap();
    let set = FileSet::collect_dir(&temp.path().join("absent"), "p").unwrap();
    assert!(set.is_empty());
  }

  #[test]
  fn total_size_sums_blobs_and_refs() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("four.txt");
    std::fs::write(&src, "1234").unwrap();

    let mut set = FileSet::new();
    set.insert_blob("blob", "123");
    set.insert_ref("ref", &src);

    assert_eq!(set.total_size().unwrap(), 7);
  }
}
