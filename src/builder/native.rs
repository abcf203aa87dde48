//! Native C/C++ compiler driver.
//!
//! Compiles the sources of one target and archives them into a static
//! library or links them into an executable. Every step is skipped when its
//! fingerprint matches the last successful run and its output still exists.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::builder::context::BuildContext;
use crate::builder::error::BuildError;
use crate::builder::fingerprint::{
    parse_depfile, CompileFingerprint, FingerprintCache, LinkFingerprint, FINGERPRINT_FILE,
};
use crate::builder::toolchain::{ArchiveInput, CompileInput, LinkInput};
use crate::core::target::{ExecutableArtifact, LibraryArtifact};
use crate::util::fs::{ensure_dir, object_path_for};
use crate::util::process::{run, CommandRunner, RunOptions};
use crate::util::PathSet;

/// Compile settings of one target, on top of the context's policy.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Private include directories
    pub includes: PathSet,
    /// Include directories inherited from dependencies
    pub dep_includes: PathSet,
    pub macros: Vec<String>,
    pub flags: Vec<String>,
    /// pkg-config packages whose cflags are appended
    pub pkg_config: Vec<String>,
    /// Add the directory of every source to the include path
    pub include_source_dirs: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            includes: PathSet::new(),
            dep_includes: PathSet::new(),
            macros: Vec::new(),
            flags: Vec::new(),
            pkg_config: Vec::new(),
            include_source_dirs: true,
        }
    }
}

/// Options for [`NativeBuilder::build_library`].
#[derive(Debug, Clone, Default)]
pub struct LibraryOptions {
    pub compile: CompileOptions,
    /// Include directories propagated to dependents; also used here
    pub export_includes: PathSet,
    /// External libraries of this library and its dependencies
    pub external_libs: Vec<String>,
    /// Archives of dependency libraries, in link order
    pub dep_archives: Vec<PathBuf>,
}

/// Options for [`NativeBuilder::build_executable`].
#[derive(Debug, Clone, Default)]
pub struct ExecutableOptions {
    pub compile: CompileOptions,
    /// Dependency archives, dependents before dependencies
    pub archives: Vec<PathBuf>,
    /// External libraries linked by name
    pub external_libs: Vec<String>,
    pub link_flags: Vec<String>,
}

/// Outcome of compiling a target's sources.
struct Compiled {
    objects: Vec<PathBuf>,
    /// Number of sources actually recompiled
    rebuilt: usize,
}

/// Native C/C++ builder.
pub struct NativeBuilder<'a> {
    ctx: &'a BuildContext,
    runner: &'a dyn CommandRunner,
}

impl<'a> NativeBuilder<'a> {
    /// Create a new native builder.
    pub fn new(ctx: &'a BuildContext, runner: &'a dyn CommandRunner) -> Self {
        NativeBuilder { ctx, runner }
    }

    /// Compile `sources` and archive them as `lib<name>.a`.
    pub fn build_library(
        &self,
        name: &str,
        sources: &[PathBuf],
        opts: &LibraryOptions,
    ) -> Result<LibraryArtifact, BuildError> {
        require_sources(name, sources)?;

        let target_dir = self.ctx.target_dir(name);
        let fp_path = target_dir.join(FINGERPRINT_FILE);
        let mut cache = FingerprintCache::load(&fp_path);

        let mut compile = opts.compile.clone();
        compile.includes.extend(opts.export_includes.iter().cloned());

        let compiled = self.compile_sources(name, sources, &compile, &mut cache);
        let compiled = finish_step(compiled, &cache, &fp_path)?;

        let toolchain = self.ctx.toolchain();
        let archive = target_dir.join(toolchain.static_lib_name(name));
        let tool = toolchain.archiver_path().display().to_string();

        let current = LinkFingerprint::for_link(&compiled.objects, &[], &[], &[], &tool)?;
        let archived = if !archive.exists() || cache.needs_link(&current) {
            self.archive(name, &compiled.objects, &archive)?;
            cache.update_link(current);
            true
        } else {
            tracing::debug!("Archive {} is up to date", archive.display());
            false
        };
        cache.save(&fp_path)?;

        Ok(LibraryArtifact {
            name: name.to_string(),
            archive,
            export_includes: opts.export_includes.clone(),
            external_libs: opts.external_libs.clone(),
            transitive_archives: opts.dep_archives.clone(),
            fresh: compiled.rebuilt == 0 && !archived,
        })
    }

    /// Compile `sources` and link them with the dependency archives.
    pub fn build_executable(
        &self,
        name: &str,
        sources: &[PathBuf],
        opts: &ExecutableOptions,
    ) -> Result<ExecutableArtifact, BuildError> {
        require_sources(name, sources)?;

        let target_dir = self.ctx.target_dir(name);
        let fp_path = target_dir.join(FINGERPRINT_FILE);
        let mut cache = FingerprintCache::load(&fp_path);

        let compiled = self.compile_sources(name, sources, &opts.compile, &mut cache);
        let compiled = finish_step(compiled, &cache, &fp_path)?;

        let toolchain = self.ctx.toolchain();
        let output = target_dir.join(toolchain.exe_name(name));
        let tool = toolchain.identity().fingerprint_key();

        let current = LinkFingerprint::for_link(
            &compiled.objects,
            &opts.archives,
            &opts.link_flags,
            &opts.external_libs,
            &tool,
        )?;
        let linked = if !output.exists() || cache.needs_link(&current) {
            self.link(name, &compiled.objects, &output, opts)?;
            cache.update_link(current);
            true
        } else {
            tracing::debug!("Executable {} is up to date", output.display());
            false
        };
        cache.save(&fp_path)?;

        Ok(ExecutableArtifact {
            name: name.to_string(),
            path: output,
            fresh: compiled.rebuilt == 0 && !linked,
        })
    }

    /// Include directories for a compile, in search order.
    fn include_dirs(&self, sources: &[PathBuf], opts: &CompileOptions) -> Vec<PathBuf> {
        let mut dirs = PathSet::new();
        dirs.extend(self.ctx.includes().iter().cloned());
        dirs.extend(opts.includes.iter().cloned());
        dirs.extend(opts.dep_includes.iter().cloned());
        if opts.include_source_dirs {
            dirs.extend(sources.iter().filter_map(|s| s.parent().map(Path::to_path_buf)));
        }
        dirs.as_slice().to_vec()
    }

    /// Ask pkg-config for the cflags of `packages`.
    fn pkg_config_cflags(&self, packages: &[String]) -> Result<Vec<String>, BuildError> {
        if packages.is_empty() {
            return Ok(Vec::new());
        }

        let mut argv = vec!["pkg-config".to_string(), "--cflags".to_string()];
        argv.extend(packages.iter().cloned());
        let completed = run(self.runner, &argv, &RunOptions::default())?;

        Ok(completed
            .stdout
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    /// Compile every stale source in parallel.
    ///
    /// Fingerprints of successful compiles are recorded in `cache` even if
    /// another source of the target fails.
    fn compile_sources(
        &self,
        target: &str,
        sources: &[PathBuf],
        opts: &CompileOptions,
        cache: &mut FingerprintCache,
    ) -> Result<Compiled, BuildError> {
        let toolchain = self.ctx.toolchain();
        let obj_dir = self.ctx.target_dir(target).join("obj");
        let compiler = toolchain.identity().fingerprint_key();

        let include_dirs = self.include_dirs(sources, opts);
        let mut macros = self.ctx.macros().to_vec();
        macros.extend(opts.macros.iter().cloned());
        let mut cflags = self.ctx.compile_flags().to_vec();
        cflags.extend(opts.flags.iter().cloned());
        cflags.extend(self.pkg_config_cflags(&opts.pkg_config)?);

        // Everything that changes the command line also changes the object.
        let mut flag_key = cflags.clone();
        flag_key.extend(macros.iter().map(|m| format!("-D{}", m)));
        flag_key.extend(include_dirs.iter().map(|d| format!("-I{}", d.display())));

        let mut objects = Vec::with_capacity(sources.len());
        let mut stale = Vec::new();
        for source in sources {
            let object = object_path_for(&obj_dir, self.ctx.root(), source, toolchain.object_extension());
            let headers = cache
                .compile_fingerprint(source)
                .map(|fp| fp.headers())
                .unwrap_or_default();
            let current = CompileFingerprint::for_source(source, &compiler, &flag_key, &headers)
                .map_err(|e| BuildError::CompileError {
                    target: target.to_string(),
                    file: source.clone(),
                    output: format!("{:#}", e),
                })?;

            if !object.exists() || cache.needs_compile(source, &current) {
                stale.push((source.clone(), object.clone()));
            }
            objects.push(object);
        }
        cache.retain_sources(sources);

        if stale.is_empty() {
            tracing::debug!("All {} source(s) of `{}` are up to date", sources.len(), target);
            return Ok(Compiled { objects, rebuilt: 0 });
        }

        tracing::info!(
            "Compiling {} of {} source(s) for `{}`",
            stale.len(),
            sources.len(),
            target
        );

        let failed = AtomicBool::new(false);
        let results: Vec<Option<Result<(PathBuf, CompileFingerprint), BuildError>>> = stale
            .par_iter()
            .map(|(source, object)| {
                // Once one source fails the rest of this target is abandoned.
                if failed.load(Ordering::SeqCst) {
                    return None;
                }
                let result = self.compile(
                    target,
                    source,
                    object,
                    &include_dirs,
                    &macros,
                    &cflags,
                    &compiler,
                    &flag_key,
                );
                if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                Some(result)
            })
            .collect();

        let mut first_error = None;
        let mut rebuilt = 0;
        for result in results.into_iter().flatten() {
            match result {
                Ok((source, fingerprint)) => {
                    cache.update_compile(source, fingerprint);
                    rebuilt += 1;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(Compiled { objects, rebuilt }),
        }
    }

    /// Compile a single source file, returning its new fingerprint.
    #[allow(clippy::too_many_arguments)]
    fn compile(
        &self,
        target: &str,
        source: &Path,
        object: &Path,
        include_dirs: &[PathBuf],
        macros: &[String],
        cflags: &[String],
        compiler: &str,
        flag_key: &[String],
    ) -> Result<(PathBuf, CompileFingerprint), BuildError> {
        if let Some(parent) = object.parent() {
            ensure_dir(parent)?;
        }

        let mut depfile = object.as_os_str().to_os_string();
        depfile.push(".d");
        let depfile = PathBuf::from(depfile);

        let input = CompileInput {
            source: source.to_path_buf(),
            output: object.to_path_buf(),
            include_dirs: include_dirs.to_vec(),
            macros: macros.to_vec(),
            cflags: cflags.to_vec(),
            depfile: Some(depfile.clone()),
        };
        let spec = self
            .ctx
            .toolchain()
            .compile_command(&input)
            .cwd(self.ctx.root());

        tracing::debug!("Compiling {} -> {}", source.display(), object.display());
        let completed = self.runner.run(&spec)?;
        if !completed.success() {
            return Err(BuildError::CompileError {
                target: target.to_string(),
                file: source.to_path_buf(),
                output: completed.combined_output(),
            });
        }

        let headers: Vec<PathBuf> = std::fs::read_to_string(&depfile)
            .map(|content| parse_depfile(&content, source))
            .unwrap_or_default()
            .into_iter()
            .map(|h| if h.is_absolute() { h } else { self.ctx.root().join(h) })
            .collect();

        let fingerprint = CompileFingerprint::for_source(source, compiler, flag_key, &headers)?;
        Ok((source.to_path_buf(), fingerprint))
    }

    /// Create a static library from `objects`.
    fn archive(&self, target: &str, objects: &[PathBuf], output: &Path) -> Result<(), BuildError> {
        if let Some(parent) = output.parent() {
            ensure_dir(parent)?;
        }
        // `ar r` only adds members; start over so removed sources disappear.
        if output.exists() {
            std::fs::remove_file(output)?;
        }

        let input = ArchiveInput {
            objects: objects.to_vec(),
            output: output.to_path_buf(),
        };
        let spec = self.ctx.toolchain().archive_command(&input);

        tracing::debug!("Creating static library {}", output.display());
        let completed = self.runner.run(&spec)?;
        if !completed.success() {
            return Err(BuildError::LinkError {
                target: target.to_string(),
                artifact: output.to_path_buf(),
                output: completed.combined_output(),
            });
        }
        Ok(())
    }

    /// Link an executable.
    fn link(
        &self,
        target: &str,
        objects: &[PathBuf],
        output: &Path,
        opts: &ExecutableOptions,
    ) -> Result<(), BuildError> {
        if let Some(parent) = output.parent() {
            ensure_dir(parent)?;
        }

        let input = LinkInput {
            objects: objects.to_vec(),
            archives: opts.archives.clone(),
            output: output.to_path_buf(),
            libs: opts.external_libs.clone(),
            ldflags: opts.link_flags.clone(),
        };
        let spec = self
            .ctx
            .toolchain()
            .link_exe_command(&input)
            .cwd(self.ctx.root());

        tracing::debug!("Linking executable {}", output.display());
        let completed = self.runner.run(&spec)?;
        if !completed.success() {
            return Err(BuildError::LinkError {
                target: target.to_string(),
                artifact: output.to_path_buf(),
                output: completed.combined_output(),
            });
        }
        Ok(())
    }
}

fn require_sources(name: &str, sources: &[PathBuf]) -> Result<(), BuildError> {
    if sources.is_empty() {
        return Err(BuildError::InvalidTarget {
            target: name.to_string(),
            reason: "no source files".to_string(),
        });
    }
    Ok(())
}

/// Persist fingerprints after a compile pass, then surface its result.
fn finish_step(
    compiled: Result<Compiled, BuildError>,
    cache: &FingerprintCache,
    path: &Path,
) -> Result<Compiled, BuildError> {
    if compiled.is_err() {
        if let Err(e) = cache.save(path) {
            tracing::warn!("failed to save fingerprints {}: {:#}", path.display(), e);
        }
    }
    compiled
}
