//! Build fingerprinting for incremental builds.
//!
//! Fingerprints capture all inputs to a build step, allowing us to skip
//! rebuilding when nothing has changed. Every file is compared by content
//! hash.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::util::fs::write_atomic;
use crate::util::hash::{sha256_file, Fingerprint as HashFingerprint};

/// File name of the per-target fingerprint cache.
pub const FINGERPRINT_FILE: &str = "fingerprints.json";

/// Fingerprint for a compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileFingerprint {
    /// Source file hash
    pub source_hash: String,

    /// Compiler identity
    pub compiler: String,

    /// Effective flags hash (flags, macros and include dirs)
    pub flags_hash: String,

    /// Header dependency hashes
    pub header_hashes: BTreeMap<PathBuf, String>,
}

impl CompileFingerprint {
    /// Create a fingerprint for a source file.
    ///
    /// Headers that no longer exist are left out, so a deleted header never
    /// matches a fingerprint that recorded it.
    pub fn for_source(
        source: &Path,
        compiler: &str,
        flags: &[String],
        headers: &[PathBuf],
    ) -> Result<Self> {
        let source_hash = sha256_file(source)?;

        let mut fp = HashFingerprint::new();
        for flag in flags {
            fp.update_str(flag);
        }
        let flags_hash = fp.finish_short();

        let mut header_hashes = BTreeMap::new();
        for header in headers {
            if header.is_file() {
                header_hashes.insert(header.clone(), sha256_file(header)?);
            }
        }

        Ok(CompileFingerprint {
            source_hash,
            compiler: compiler.to_string(),
            flags_hash,
            header_hashes,
        })
    }

    /// Headers recorded by the last compile.
    pub fn headers(&self) -> Vec<PathBuf> {
        self.header_hashes.keys().cloned().collect()
    }
}

/// Fingerprint for an archive or link step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFingerprint {
    /// Object file hashes
    pub object_hashes: BTreeMap<PathBuf, String>,

    /// Dependency archive hashes
    pub lib_hashes: BTreeMap<PathBuf, String>,

    /// Hash of link flags and external library names, in order
    pub flags_hash: String,

    /// Compiler or archiver identity
    pub tool: String,
}

impl LinkFingerprint {
    /// Create a fingerprint for a link step.
    pub fn for_link(
        objects: &[PathBuf],
        libs: &[PathBuf],
        flags: &[String],
        external_libs: &[String],
        tool: &str,
    ) -> Result<Self> {
        let mut object_hashes = BTreeMap::new();
        for obj in objects {
            if obj.exists() {
                object_hashes.insert(obj.clone(), sha256_file(obj)?);
            }
        }

        let mut lib_hashes = BTreeMap::new();
        for lib in libs {
            if lib.exists() {
                lib_hashes.insert(lib.clone(), sha256_file(lib)?);
            }
        }

        let mut fp = HashFingerprint::new();
        for flag in flags {
            fp.update_str(flag);
        }
        fp.update_str("--");
        for lib in external_libs {
            fp.update_str(lib);
        }
        let flags_hash = fp.finish_short();

        Ok(LinkFingerprint {
            object_hashes,
            lib_hashes,
            flags_hash,
            tool: tool.to_string(),
        })
    }
}

/// Fingerprint cache for one target.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FingerprintCache {
    /// Compile fingerprints by source path
    pub compile: BTreeMap<PathBuf, CompileFingerprint>,

    /// Archive/link fingerprint of the target's output
    pub link: Option<LinkFingerprint>,
}

impl FingerprintCache {
    /// Load fingerprint cache from a file.
    ///
    /// A missing or unreadable cache is treated as empty; everything is
    /// rebuilt.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return FingerprintCache::default();
        }

        let loaded = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| serde_json::from_str(&content).map_err(anyhow::Error::from));

        match loaded {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(
                    "ignoring corrupt fingerprint cache {}: {}",
                    path.display(),
                    e
                );
                FingerprintCache::default()
            }
        }
    }

    /// Save fingerprint cache to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(path, content.as_bytes())
            .with_context(|| format!("failed to save fingerprints: {}", path.display()))
    }

    /// The last recorded fingerprint of a source.
    pub fn compile_fingerprint(&self, source: &Path) -> Option<&CompileFingerprint> {
        self.compile.get(source)
    }

    /// Check if a source file needs recompilation.
    pub fn needs_compile(&self, source: &Path, current: &CompileFingerprint) -> bool {
        match self.compile.get(source) {
            Some(cached) => cached != current,
            None => true,
        }
    }

    /// Check if the target output needs re-archiving or relinking.
    pub fn needs_link(&self, current: &LinkFingerprint) -> bool {
        match self.link {
            Some(ref cached) => cached != current,
            None => true,
        }
    }

    /// Update compile fingerprint.
    pub fn update_compile(&mut self, source: PathBuf, fingerprint: CompileFingerprint) {
        self.compile.insert(source, fingerprint);
    }

    /// Update link fingerprint.
    pub fn update_link(&mut self, fingerprint: LinkFingerprint) {
        self.link = Some(fingerprint);
    }

    /// Forget sources that are no longer part of the target.
    pub fn retain_sources(&mut self, sources: &[PathBuf]) {
        self.compile.retain(|path, _| sources.contains(path));
    }
}

/// Parse a make-style depfile written by `-MMD -MF`.
///
/// Returns every prerequisite except `source` itself. Escaped spaces and
/// line continuations are handled.
pub fn parse_depfile(content: &str, source: &Path) -> Vec<PathBuf> {
    let joined = content.replace("\\\r\n", " ").replace("\\\n", " ");

    let Some((_, prereqs)) = joined.split_once(": ") else {
        return Vec::new();
    };

    let mut deps = Vec::new();
    let mut current = String::new();
    let mut chars = prereqs.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                current.push(' ');
                chars.next();
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    deps.push(PathBuf::from(std::mem::take(&mut current)));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        deps.push(PathBuf::from(current));
    }

    deps.retain(|d| d != source);
    deps.dedup();
    deps
}
