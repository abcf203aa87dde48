//! Filesystem and path utilities.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use walkdir::WalkDir;

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Read a file to string, with nice error messages.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Write a file atomically: write a sibling temp file, then rename it over
/// the destination. Readers never observe a partially written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    ensure_dir(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Expand glob patterns relative to `base`.
///
/// Patterns are expanded in the order given; matches of a single pattern
/// are sorted. A path matched by several patterns is kept at its first
/// position. Patterns without glob metacharacters are kept verbatim even if
/// the file does not exist yet. Paths whose part below `base` contains
/// `ignore` as a substring are dropped.
pub fn glob_files(base: &Path, patterns: &[String], ignore: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut results = Vec::new();
    let mut seen = HashSet::new();

    for pattern in patterns {
        let full_pattern = base.join(pattern);

        let mut matched = if has_glob_meta(pattern) {
            let pattern_str = full_pattern.to_string_lossy();
            let mut paths = Vec::new();
            for entry in
                glob(&pattern_str).with_context(|| format!("invalid glob pattern: {}", pattern))?
            {
                match entry {
                    Ok(path) => {
                        if path.is_file() {
                            paths.push(path);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("glob error: {}", e);
                    }
                }
            }
            paths.sort();
            if paths.is_empty() {
                tracing::debug!("pattern `{}` matched no files", pattern);
            }
            paths
        } else {
            vec![full_pattern]
        };

        if let Some(ignore) = ignore {
            matched.retain(|p| !is_ignored(base, p, ignore));
        }

        for path in matched {
            if seen.insert(path.clone()) {
                results.push(path);
            }
        }
    }

    Ok(results)
}

/// Expand patterns under `prefix`, itself relative to `base`.
///
/// `ignore` is matched against the path relative to `base`, so the
/// directory the project lives in never filters anything out.
pub fn prefixed_sources(
    base: &Path,
    prefix: &Path,
    patterns: &[String],
    ignore: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let mut files = glob_files(&base.join(prefix), patterns, None)?;
    if let Some(ignore) = ignore {
        files.retain(|p| !is_ignored(base, p, ignore));
    }
    Ok(files)
}

fn is_ignored(base: &Path, path: &Path, ignore: &str) -> bool {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .contains(ignore)
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}

/// Compute a collision-free object file path for `source`.
///
/// The source's path relative to `root` is mirrored under `obj_dir`, with
/// `..` components replaced so the result can never escape `obj_dir`.
pub fn object_path_for(obj_dir: &Path, root: &Path, source: &Path, ext: &str) -> PathBuf {
    let rel = if source.is_absolute() {
        relative_path(root, source)
    } else {
        source.to_path_buf()
    };

    let mut out = obj_dir.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => out.push("__"),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => out.push("__root"),
        }
    }

    let mut file_name = out
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    file_name.push(".");
    file_name.push(ext);
    out.set_file_name(file_name);
    out
}

/// Count the regular files below `path`.
pub fn dir_file_count(path: &Path) -> usize {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

/// An insertion-ordered set of paths.
///
/// Used for include directories and link inputs, where order is significant
/// to the compiler but duplicates are not.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PathSet {
    paths: Vec<PathBuf>,
}

impl PathSet {
    /// Create an empty set.
    pub fn new() -> Self {
        PathSet::default()
    }

    /// Insert a path; returns false if it was already present.
    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if self.paths.contains(&path) {
            return false;
        }
        self.paths.push(path);
        true
    }

    /// Check membership.
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Borrow as a slice.
    pub fn as_slice(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Resolve every relative entry against `base`.
    pub fn rooted_at(&self, base: &Path) -> PathSet {
        self.iter()
            .map(|p| if p.is_absolute() { p.clone() } else { base.join(p) })
            .collect()
    }
}

impl<P: Into<PathBuf>> Extend<P> for PathSet {
    fn extend<I: IntoIterator<Item = P>>(&mut self, iter: I) {
        for path in iter {
            self.insert(path);
        }
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for PathSet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut set = PathSet::new();
        set.extend(iter);
        set
    }
}

impl<'a> IntoIterator for &'a PathSet {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_glob_files_orders_by_pattern_then_name() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("src/b.cc"));
        touch(&tmp.path().join("src/a.cc"));
        touch(&tmp.path().join("gen/z.cc"));

        let files = glob_files(
            tmp.path(),
            &["gen/*.cc".to_string(), "src/*.cc".to_string()],
            None,
        )
        .unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["z.cc", "a.cc", "b.cc"]);
    }

    #[test]
    fn test_prefixed_sources_ignore_filter() {
        let tmp = TempDir::new().unwrap();
        let absl = tmp.path().join("deps/abseil/absl");
        touch(&absl.join("base/log.cc"));
        touch(&absl.join("base/log_test.cc"));
        touch(&absl.join("base/internal/spinlock.cc"));

        let files = prefixed_sources(
            tmp.path(),
            Path::new("deps/abseil/absl"),
            &["base/*.cc".to_string(), "base/internal/*.cc".to_string()],
            Some("_test"),
        )
        .unwrap();

        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| !p.to_string_lossy().contains("_test")));
    }

    #[test]
    fn test_ignore_skips_project_location() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("uterm_test_checkout");
        let absl = root.join("deps/abseil/absl");
        touch(&absl.join("base/log.cc"));
        touch(&absl.join("base/log_test.cc"));

        let files = prefixed_sources(
            &root,
            Path::new("deps/abseil/absl"),
            &["base/*.cc".to_string()],
            Some("_test"),
        )
        .unwrap();
        assert_eq!(files, vec![absl.join("base/log.cc")]);

        let files = glob_files(&root, &["deps/abseil/absl/base/*.cc".to_string()], Some("_test"))
            .unwrap();
        assert_eq!(files, vec![absl.join("base/log.cc")]);
    }

    #[test]
    fn test_literal_pattern_kept_when_missing() {
        let tmp = TempDir::new().unwrap();
        let files = glob_files(tmp.path(), &["fmt/format.cc".to_string()], None).unwrap();
        assert_eq!(files, vec![tmp.path().join("fmt/format.cc")]);
    }

    #[test]
    fn test_duplicate_matches_kept_once() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("src/main.cc"));
        let files = glob_files(
            tmp.path(),
            &["src/*.cc".to_string(), "src/main.cc".to_string()],
            None,
        )
        .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_object_path_mirrors_source_tree() {
        let root = Path::new("/proj");
        let obj = Path::new("/proj/build/debug/skia/obj");

        let a = object_path_for(obj, root, Path::new("/proj/deps/skia/src/core/SkPath.cpp"), "o");
        let b = object_path_for(obj, root, Path::new("/proj/deps/skia/src/pathops/SkPath.cpp"), "o");

        assert_eq!(a, obj.join("deps/skia/src/core/SkPath.cpp.o"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_object_path_never_escapes() {
        let root = Path::new("/proj");
        let obj = Path::new("/proj/build/debug/gl3w/obj");
        let path = object_path_for(obj, root, Path::new("/elsewhere/gl3w.c"), "o");
        assert!(path.starts_with(obj));
    }

    #[test]
    fn test_path_set_membership_and_order() {
        let mut set = PathSet::new();
        assert!(set.insert("deps/fmt"));
        assert!(set.insert("deps/skia/include/core"));
        assert!(!set.insert("deps/fmt"));

        assert!(set.contains(Path::new("deps/fmt")));
        assert!(!set.contains(Path::new("deps/abseil")));
        assert_eq!(set.as_slice()[1], PathBuf::from("deps/skia/include/core"));
    }

    #[test]
    fn test_path_set_rooted_at() {
        let set: PathSet = ["deps/fmt", "/usr/include"].into_iter().collect();
        let rooted = set.rooted_at(Path::new("/proj"));
        assert_eq!(
            rooted.as_slice(),
            &[PathBuf::from("/proj/deps/fmt"), PathBuf::from("/usr/include")]
        );
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/index.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn test_dir_file_count() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("a/b/c.o"));
        touch(&tmp.path().join("a/d.o"));
        assert_eq!(dir_file_count(tmp.path()), 2);
    }
}
