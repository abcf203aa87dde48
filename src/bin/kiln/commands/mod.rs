//! Command implementations

pub mod build;
pub mod clean;
pub mod completions;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use kiln::core::{find_manifest, Manifest};

/// Load the manifest from `--manifest-path`, or search upward from the
/// current directory. Returns it with the project root.
pub fn load_manifest(manifest_path: Option<&Path>) -> Result<(Manifest, PathBuf)> {
    let path = match manifest_path {
        Some(path) => path.to_path_buf(),
        None => {
            let cwd = std::env::current_dir().context("failed to get current directory")?;
            find_manifest(&cwd)?
        }
    };
    let path = std::fs::canonicalize(&path)
        .with_context(|| format!("manifest not found: {}", path.display()))?;

    let manifest = Manifest::load(&path)?;
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .context("manifest path has no parent directory")?;
    Ok((manifest, root))
}
