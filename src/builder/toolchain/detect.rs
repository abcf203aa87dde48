//! Toolchain detection functions.

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use semver::Version;
use serde::Serialize;

use crate::builder::error::BuildError;
use crate::util::process::{find_program, CommandRunner, CommandSpec};

use super::{GccToolchain, Toolchain, ToolchainFamily};

/// Candidate C++ drivers searched on PATH, in order.
const COMPILER_CANDIDATES: &[&str] = &["c++", "g++", "clang++"];

/// Candidate archivers searched on PATH, in order.
const ARCHIVER_CANDIDATES: &[&str] = &["ar", "llvm-ar"];

/// What a compiler is, as far as fingerprints are concerned.
///
/// Changing any part of the identity invalidates every compiled object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompilerIdentity {
    pub family: ToolchainFamily,
    pub path: PathBuf,
    pub version: Option<Version>,
}

impl CompilerIdentity {
    /// Stable string used in compile fingerprints.
    pub fn fingerprint_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.family,
            self.path.display(),
            self.version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )
    }
}

impl fmt::Display for CompilerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(ref v) => write!(f, "{} {} ({})", self.family, v, self.path.display()),
            None => write!(f, "{} ({})", self.family, self.path.display()),
        }
    }
}

/// Detect the available toolchain.
///
/// The compiler is taken from, in order: `override_path`, the `CXX`
/// environment variable, or the first of `c++`, `g++`, `clang++` found on
/// PATH. The archiver likewise comes from `archiver`, `AR`, or the first of
/// `ar`, `llvm-ar`.
pub fn detect_toolchain(
    override_path: Option<&Path>,
    archiver: Option<&Path>,
    runner: &dyn CommandRunner,
) -> Result<Box<dyn Toolchain>, BuildError> {
    let toolchain = detect_with_env(
        override_path,
        archiver,
        &|key| std::env::var(key).ok(),
        runner,
    )?;
    Ok(Box::new(toolchain))
}

fn detect_with_env(
    override_path: Option<&Path>,
    archiver: Option<&Path>,
    env: &dyn Fn(&str) -> Option<String>,
    runner: &dyn CommandRunner,
) -> Result<GccToolchain, BuildError> {
    let compiler_candidates: Vec<String> = match override_path {
        Some(path) => vec![path.display().to_string()],
        None => match env("CXX").filter(|v| !v.is_empty()) {
            Some(cxx) => vec![cxx],
            None => COMPILER_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        },
    };
    let cxx = find_program(&compiler_candidates)?;

    let archiver_candidates: Vec<String> = match archiver {
        Some(path) => vec![path.display().to_string()],
        None => match env("AR").filter(|v| !v.is_empty()) {
            Some(ar) => vec![ar],
            None => ARCHIVER_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        },
    };
    let ar = find_program(&archiver_candidates)?;

    let identity = identify_compiler(&cxx, runner);
    tracing::debug!("Detected compiler {}, archiver {}", identity, ar.display());

    Ok(GccToolchain::new(cxx, ar, identity))
}

/// Work out the family and version of the compiler at `cxx`.
///
/// The family comes from the binary name when it is telling, otherwise from
/// `--version` output. Failure to run `--version` is not an error; the
/// version is then unknown.
fn identify_compiler(cxx: &Path, runner: &dyn CommandRunner) -> CompilerIdentity {
    let version_text = match runner.run(&CommandSpec::new(cxx).arg("--version")) {
        Ok(done) if done.success() => Some(done.stdout),
        Ok(done) => {
            tracing::debug!(
                "`{} --version` exited with {:?}",
                cxx.display(),
                done.status
            );
            None
        }
        Err(e) => {
            tracing::debug!("failed to query compiler version: {}", e);
            None
        }
    };

    let family = family_from_name(cxx)
        .or_else(|| version_text.as_deref().map(family_from_version_text))
        .unwrap_or(ToolchainFamily::Gcc);

    let version = version_text.as_deref().and_then(parse_compiler_version);

    CompilerIdentity {
        family,
        path: cxx.to_path_buf(),
        version,
    }
}

fn family_from_name(cxx: &Path) -> Option<ToolchainFamily> {
    let name = cxx
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();

    if name.contains("clang") {
        Some(ToolchainFamily::Clang)
    } else if name.contains("gcc") || name.contains("g++") {
        Some(ToolchainFamily::Gcc)
    } else {
        None
    }
}

fn family_from_version_text(text: &str) -> ToolchainFamily {
    if text.to_lowercase().contains("clang") {
        ToolchainFamily::Clang
    } else {
        ToolchainFamily::Gcc
    }
}

/// Extract the first `major.minor[.patch]` from compiler `--version` output.
pub fn parse_compiler_version(text: &str) -> Option<Version> {
    let re = Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").ok()?;
    let first_line = text.lines().next()?;
    let caps = re.captures(first_line)?;

    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    let patch = caps
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);

    Some(Version::new(major, minor, patch))
}
