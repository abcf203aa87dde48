//! Implementation of `kiln clean`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::util::fs::{dir_file_count, remove_dir_all_if_exists};

/// What a clean removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanResult {
    /// Directory that was removed
    pub path: PathBuf,
    /// Number of files it held
    pub files_removed: usize,
}

/// Remove build outputs.
///
/// With a profile only `<build_dir>/<profile>` goes; generated sources and
/// the generation cache survive. Without one the whole build directory is
/// removed.
pub fn clean(build_dir: &Path, profile: Option<&str>) -> Result<CleanResult> {
    let path = match profile {
        Some(profile) => build_dir.join(profile),
        None => build_dir.to_path_buf(),
    };

    let files_removed = if path.exists() {
        dir_file_count(&path)
    } else {
        0
    };
    tracing::debug!("Removing {} ({} files)", path.display(), files_removed);
    remove_dir_all_if_exists(&path)?;

    Ok(CleanResult {
        path,
        files_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures::write_file;
    use tempfile::TempDir;

    fn populated() -> TempDir {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "build/debug/fmt/libfmt.a", "");
        write_file(tmp.path(), "build/debug/fmt/obj/format.cc.o", "");
        write_file(tmp.path(), "build/release/fmt/libfmt.a", "");
        write_file(tmp.path(), "build/gen/gl3w/src/gl3w.c", "");
        write_file(tmp.path(), "build/cache-index.json", "{}");
        tmp
    }

    #[test]
    fn test_clean_profile_keeps_generated() {
        let tmp = populated();
        let build = tmp.path().join("build");

        let result = clean(&build, Some("debug")).unwrap();
        assert_eq!(result.path, build.join("debug"));
        assert_eq!(result.files_removed, 2);
        assert!(!build.join("debug").exists());
        assert!(build.join("release/fmt/libfmt.a").exists());
        assert!(build.join("gen/gl3w/src/gl3w.c").exists());
        assert!(build.join("cache-index.json").exists());
    }

    #[test]
    fn test_clean_everything() {
        let tmp = populated();
        let build = tmp.path().join("build");

        let result = clean(&build, None).unwrap();
        assert_eq!(result.files_removed, 5);
        assert!(!build.exists());
    }

    #[test]
    fn test_clean_missing_dir_is_ok() {
        let tmp = TempDir::new().unwrap();
        let result = clean(&tmp.path().join("build"), Some("release")).unwrap();
        assert_eq!(result.files_removed, 0);
    }
}
