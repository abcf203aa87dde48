//! Configuration file support for kiln.
//!
//! kiln reads two optional configuration files:
//! - Global: `~/.kiln/config.toml` - user-wide defaults
//! - Project: `.kiln/config.toml` - project-specific overrides
//!
//! Project config takes precedence over global config. The manifest's
//! `[toolchain]` section and command-line flags are applied on top by the
//! build command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// kiln configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build settings
    pub build: BuildConfig,
}

/// Build-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BuildConfig {
    /// C++ compiler to use instead of auto-detection
    pub cxx: Option<PathBuf>,

    /// Archiver to use instead of auto-detection
    pub ar: Option<PathBuf>,

    /// Extra flags passed to every compile
    pub cxxflags: Vec<String>,

    /// Force colored compiler diagnostics
    pub color: Option<bool>,

    /// Build in release mode by default
    pub release: Option<bool>,

    /// Number of parallel jobs (default: available cores)
    pub jobs: Option<usize>,

    /// Build output directory, relative to the project root
    pub build_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file is missing
    /// or malformed.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        let b = other.build;
        if b.cxx.is_some() {
            self.build.cxx = b.cxx;
        }
        if b.ar.is_some() {
            self.build.ar = b.ar;
        }
        if !b.cxxflags.is_empty() {
            self.build.cxxflags = b.cxxflags;
        }
        if b.color.is_some() {
            self.build.color = b.color;
        }
        if b.release.is_some() {
            self.build.release = b.release;
        }
        if b.jobs.is_some() {
            self.build.jobs = b.jobs;
        }
        if b.build_dir.is_some() {
            self.build.build_dir = b.build_dir;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.kiln/config.toml)
/// 2. Global config (~/.kiln/config.toml)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global_path) = global_path {
        if global_path.exists() {
            config.merge(Config::load_or_default(global_path));
        }
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

/// Get the global kiln config directory (~/.kiln).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".kiln"))
}

/// Get the global config path (~/.kiln/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.kiln/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".kiln").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_build_config() {
        let config: Config = toml::from_str(
            r#"
            [build]
            cxx = "/usr/bin/clang++"
            ar = "llvm-ar"
            cxxflags = ["-Wall"]
            color = false
            jobs = 4
            build-dir = "out"
            "#,
        )
        .unwrap();

        assert_eq!(config.build.cxx, Some(PathBuf::from("/usr/bin/clang++")));
        assert_eq!(config.build.ar, Some(PathBuf::from("llvm-ar")));
        assert_eq!(config.build.cxxflags, vec!["-Wall"]);
        assert_eq!(config.build.color, Some(false));
        assert_eq!(config.build.jobs, Some(4));
        assert_eq!(config.build.build_dir, Some(PathBuf::from("out")));
        assert_eq!(config.build.release, None);
    }

    #[test]
    fn test_project_overrides_global() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        let project = tmp.path().join("project.toml");

        std::fs::write(&global, "[build]\ncxx = \"g++\"\njobs = 2\nrelease = true\n").unwrap();
        std::fs::write(&project, "[build]\ncxx = \"clang++\"\n").unwrap();

        let config = load_config(Some(&global), &project);
        assert_eq!(config.build.cxx, Some(PathBuf::from("clang++")));
        // Unset project fields fall back to the global value
        assert_eq!(config.build.jobs, Some(2));
        assert_eq!(config.build.release, Some(true));
    }

    #[test]
    fn test_malformed_config_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("config.toml");
        std::fs::write(&project, "[build\njobs = ").unwrap();

        let config = load_config(None, &project);
        assert!(config.build.cxx.is_none());
        assert!(config.build.jobs.is_none());
    }

    #[test]
    fn test_project_config_path() {
        let path = project_config_path(Path::new("/proj"));
        assert_eq!(path, PathBuf::from("/proj/.kiln/config.toml"));
    }
}
