//! Implementation of `kiln build`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::builder::cache::{CacheStore, JsonCacheStore};
use crate::builder::context::{configure, ToolchainOptions};
use crate::builder::executor::{BuildExecutor, BuildObserver, BuildReport};
use crate::builder::generate::{resolve_programs, Generator};
use crate::builder::graph::{BuildGraph, BuildPlan};
use crate::core::Manifest;
use crate::util::config::Config;
use crate::util::fs::ensure_dir;
use crate::util::process::{CommandRunner, SystemRunner};

/// Options for the build command.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Compiler to use instead of auto-detection
    pub compiler: Option<PathBuf>,

    /// Archiver to use instead of auto-detection
    pub archiver: Option<PathBuf>,

    /// Extra flags appended to every compile
    pub extra_flags: Vec<String>,

    /// Force colored diagnostics
    pub color: bool,

    /// Build in release mode
    pub release: bool,

    /// Number of parallel jobs
    pub jobs: Option<usize>,

    /// Build directory from configuration, relative to the project root
    pub build_dir: Option<PathBuf>,

    /// Specific targets to build (empty = all)
    pub targets: Vec<String>,

    /// Show a progress bar
    pub progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            compiler: None,
            archiver: None,
            extra_flags: Vec::new(),
            color: true,
            release: false,
            jobs: None,
            build_dir: None,
            targets: Vec::new(),
            progress: false,
        }
    }
}

impl BuildOptions {
    /// Options with the configuration layer applied; command-line values
    /// are set on top by the caller.
    pub fn from_config(config: &Config) -> Self {
        let b = &config.build;
        BuildOptions {
            compiler: b.cxx.clone(),
            archiver: b.ar.clone(),
            extra_flags: b.cxxflags.clone(),
            color: b.color.unwrap_or(true),
            release: b.release.unwrap_or(false),
            jobs: b.jobs,
            build_dir: b.build_dir.clone(),
            ..Default::default()
        }
    }

    pub fn profile(&self) -> &'static str {
        if self.release {
            "release"
        } else {
            "debug"
        }
    }
}

/// Build result.
#[derive(Debug)]
pub struct BuildResult {
    /// Outcome of every planned target
    pub report: BuildReport,

    /// Build output root
    pub build_dir: PathBuf,

    /// "debug" or "release"
    pub profile: &'static str,
}

/// The build output root: the manifest wins over configuration.
pub fn build_dir(manifest: &Manifest, root: &Path, opts: &BuildOptions) -> PathBuf {
    match (&manifest.project.build_dir, &opts.build_dir) {
        (None, Some(configured)) => root.join(configured),
        _ => manifest.build_dir(root),
    }
}

/// Layer the manifest's `[toolchain]` section and rules under the options.
pub fn toolchain_options(manifest: &Manifest, root: &Path, opts: &BuildOptions) -> ToolchainOptions {
    let tc = &manifest.toolchain;
    ToolchainOptions {
        compiler: opts.compiler.clone(),
        archiver: opts.archiver.clone(),
        extra_flags: opts.extra_flags.clone(),
        release: opts.release,
        color: opts.color,
        std: tc.std.clone(),
        includes: tc.includes.iter().map(|p| root.join(p)).collect(),
        flags: tc.flags.clone(),
        macros: tc.macros.clone(),
        rules: manifest.rules.clone(),
        root: root.to_path_buf(),
        build_dir: build_dir(manifest, root, opts),
        jobs: opts.jobs,
    }
}

/// Assemble the ordered plan for the requested targets.
pub fn plan(manifest: &Manifest, root: &Path, targets: &[String]) -> Result<BuildPlan> {
    let specs = manifest.targets(root)?;
    let graph = BuildGraph::new(specs)?;
    Ok(graph.assemble(targets)?)
}

/// Build the project with real processes.
pub fn build(
    manifest: &Manifest,
    root: &Path,
    opts: &BuildOptions,
    observer: &dyn BuildObserver,
) -> Result<BuildResult> {
    build_with_runner(manifest, root, opts, Arc::new(SystemRunner), observer)
}

/// Build the project, running every external command through `runner`.
///
/// The plan is assembled before the toolchain is configured, so a cyclic or
/// malformed graph is reported without touching the compiler.
pub fn build_with_runner(
    manifest: &Manifest,
    root: &Path,
    opts: &BuildOptions,
    runner: Arc<dyn CommandRunner>,
    observer: &dyn BuildObserver,
) -> Result<BuildResult> {
    let mut plan = plan(manifest, root, &opts.targets)?;
    tracing::debug!("Planned {} target(s)", plan.len());

    let tc_opts = toolchain_options(manifest, root, opts);
    let ctx = configure(&tc_opts, runner.as_ref())?;
    tracing::info!(
        "Using {} ({})",
        ctx.toolchain().identity(),
        ctx.profile()
    );
    resolve_programs(&mut plan)?;

    ensure_dir(ctx.build_dir())?;
    let store = Arc::new(
        JsonCacheStore::open(&ctx.cache_index_path()).context("failed to open generation cache")?,
    );
    let generator = Generator::new(runner.clone(), store.clone());

    let report = BuildExecutor::new(&ctx, runner, &generator)
        .progress(opts.progress)
        .execute(&plan, observer)?;

    store.flush()?;

    Ok(BuildResult {
        report,
        build_dir: ctx.build_dir().to_path_buf(),
        profile: ctx.profile(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::executor::{NoopObserver, TargetOutcome};
    use crate::core::manifest::ProgramSpec;
    use crate::test_support::fixtures::write_terminal_project;
    use crate::test_support::{MockExecutor, MockProcessOutput};
    use crate::util::config::BuildConfig;
    use tempfile::TempDir;

    fn mock() -> Arc<MockExecutor> {
        let exec = MockExecutor::materializing();
        exec.expect_contains("--version", MockProcessOutput::success("g++ (GCC) 13.2.0"));
        Arc::new(exec)
    }

    fn project() -> (TempDir, Manifest) {
        let tmp = TempDir::new().unwrap();
        write_terminal_project(tmp.path());
        std::fs::write(tmp.path().join("cc"), "").unwrap();
        std::fs::write(tmp.path().join("ar"), "").unwrap();
        let python = tmp.path().join("python3");
        std::fs::write(&python, "").unwrap();
        let mut manifest = Manifest::load(&tmp.path().join("Kiln.toml")).unwrap();
        manifest.generators[0].program = ProgramSpec::Single(python.display().to_string());
        (tmp, manifest)
    }

    fn options(root: &Path) -> BuildOptions {
        BuildOptions {
            compiler: Some(root.join("cc")),
            archiver: Some(root.join("ar")),
            jobs: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_layer_then_manifest() {
        let config = Config {
            build: BuildConfig {
                cxx: Some(PathBuf::from("clang++")),
                color: Some(false),
                release: Some(true),
                build_dir: Some(PathBuf::from("out")),
                ..Default::default()
            },
        };
        let opts = BuildOptions::from_config(&config);
        assert!(opts.release);
        assert!(!opts.color);
        assert_eq!(opts.profile(), "release");

        let (tmp, manifest) = project();
        let tc = toolchain_options(&manifest, tmp.path(), &opts);
        assert_eq!(tc.std.as_deref(), Some("c++11"));
        assert_eq!(tc.build_dir, tmp.path().join("out"));
        assert!(tc.includes.contains(&tmp.path().join("deps/abseil")));
        assert_eq!(tc.rules.len(), manifest.rules.len());
    }

    #[test]
    fn test_plan_orders_terminal_project() {
        let (tmp, manifest) = project();
        let plan = plan(&manifest, tmp.path(), &[]).unwrap();
        let names = plan.names();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("gl3w") < pos("gl3w_lib"));
        assert!(pos("abseil_base") < pos("uterm"));
        assert_eq!(names.last(), Some(&"uterm"));
    }

    #[test]
    fn test_build_then_rebuild_is_noop() {
        let (tmp, manifest) = project();
        let exec = mock();
        let out = tmp.path().join("build/gen/gl3w");
        exec.expect_pattern(
            crate::test_support::CommandExpectation::new(
                crate::test_support::CommandPattern::Contains("gl3w_gen.py".to_string()),
                MockProcessOutput::success(""),
            )
            .writes(vec![
                out.join("include/GL/gl3w.h"),
                out.join("include/GL/glcorearb.h"),
                out.join("src/gl3w.c"),
            ]),
        );
        let opts = options(tmp.path());

        let first =
            build_with_runner(&manifest, tmp.path(), &opts, exec.clone(), &NoopObserver).unwrap();
        assert!(
            first.report.success(),
            "{:?}",
            first.report.failures().collect::<Vec<_>>()
        );
        assert!(tmp.path().join("build/cache-index.json").exists());
        assert!(tmp.path().join("build/debug/uterm/uterm").exists());
        assert_eq!(exec.count_calls("gl3w_gen.py"), 1);

        exec.clear_calls();
        let second =
            build_with_runner(&manifest, tmp.path(), &opts, exec.clone(), &NoopObserver).unwrap();
        assert!(second.report.success());
        assert_eq!(second.report.rebuilt_count(), 0);
        let calls: Vec<String> = exec
            .calls()
            .into_iter()
            .filter(|c| !c.contains("--version"))
            .collect();
        assert!(calls.is_empty(), "unexpected calls: {:?}", calls);
    }

    #[test]
    fn test_missing_compiler_fails_before_building() {
        let (tmp, manifest) = project();
        let exec = mock();
        let opts = BuildOptions {
            compiler: Some(tmp.path().join("no-such-cc")),
            archiver: Some(tmp.path().join("ar")),
            ..Default::default()
        };

        let err = build_with_runner(&manifest, tmp.path(), &opts, exec.clone(), &NoopObserver)
            .unwrap_err();
        let build_err = err.downcast_ref::<crate::builder::BuildError>().unwrap();
        assert_eq!(build_err.kind(), "program-not-found");
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_missing_generator_program_fails_before_compiling() {
        let (tmp, mut manifest) = project();
        manifest.generators[0].program = ProgramSpec::Candidates(vec![
            "kiln-no-such-python3".to_string(),
            "kiln-no-such-python".to_string(),
        ]);
        let exec = mock();

        let err = build_with_runner(
            &manifest,
            tmp.path(),
            &options(tmp.path()),
            exec.clone(),
            &NoopObserver,
        )
        .unwrap_err();
        let build_err = err.downcast_ref::<crate::builder::BuildError>().unwrap();
        assert_eq!(build_err.kind(), "program-not-found");
        let compiles = exec.calls().iter().filter(|c| c.contains(" -c ")).count();
        assert_eq!(compiles, 0);
        assert!(!tmp.path().join("build/cache-index.json").exists());
    }

    #[test]
    fn test_requested_target_limits_build() {
        let (tmp, manifest) = project();
        let exec = mock();
        let opts = BuildOptions {
            targets: vec!["fmt".to_string()],
            ..options(tmp.path())
        };

        let result =
            build_with_runner(&manifest, tmp.path(), &opts, exec.clone(), &NoopObserver).unwrap();
        assert_eq!(result.report.targets.len(), 1);
        assert!(matches!(
            result.report.targets[0].outcome,
            TargetOutcome::Built { fresh: false }
        ));
        assert_eq!(exec.count_calls("gl3w_gen.py"), 0);
    }
}
