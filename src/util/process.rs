//! External command execution.
//!
//! All compiler, archiver, linker, and generator invocations go through the
//! [`CommandRunner`] seam so the engine can be exercised without a real
//! toolchain.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::Context;

use crate::builder::error::BuildError;

/// A command to execute, with program, arguments, and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to run (e.g., "c++", "ar")
    pub program: PathBuf,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a new command spec.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Render the command line for logs and error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CompletedProcess {
    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout followed by stderr, trimmed, as the tool printed them.
    pub fn combined_output(&self) -> String {
        let mut out = String::new();
        if !self.stdout.trim().is_empty() {
            out.push_str(self.stdout.trim_end());
        }
        if !self.stderr.trim().is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(self.stderr.trim_end());
        }
        out
    }

    fn from_output(output: Output) -> Self {
        CompletedProcess {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Executes external commands.
///
/// A runner returns `Ok` for any process that was started, whatever its
/// exit status; callers decide which failure kind a non-zero exit maps to.
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion, capturing its output.
    fn run(&self, spec: &CommandSpec) -> Result<CompletedProcess, BuildError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CompletedProcess, BuildError> {
        let output = ProcessBuilder::from_spec(spec).exec().map_err(|e| {
            BuildError::ExecutionError {
                program: spec.display_command(),
                exit_code: None,
                output: format!("{:#}", e),
            }
        })?;
        Ok(CompletedProcess::from_output(output))
    }
}

/// Options for [`run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

/// Run `argv` and require success.
///
/// A non-zero exit becomes [`BuildError::ExecutionError`] carrying the exit
/// code and the captured output.
pub fn run(
    runner: &dyn CommandRunner,
    argv: &[String],
    opts: &RunOptions,
) -> Result<CompletedProcess, BuildError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(BuildError::io("cannot run an empty command line"));
    };

    let mut spec = CommandSpec::new(program).args(args.iter().cloned());
    spec.env = opts.env.clone();
    spec.cwd = opts.cwd.clone();

    tracing::debug!("Running `{}`", spec.display_command());
    let completed = runner.run(&spec)?;

    if !completed.success() {
        return Err(BuildError::ExecutionError {
            program: spec.display_command(),
            exit_code: completed.status,
            output: completed.combined_output(),
        });
    }

    Ok(completed)
}

/// Resolve the first candidate program that exists.
///
/// Candidates containing a path separator are checked on the filesystem;
/// bare names are looked up on `PATH`.
pub fn find_program<S: AsRef<str>>(candidates: &[S]) -> Result<PathBuf, BuildError> {
    for candidate in candidates {
        let candidate = candidate.as_ref();
        if let Some(path) = resolve_program(candidate) {
            tracing::debug!("Resolved program `{}` to {}", candidate, path.display());
            return Ok(path);
        }
    }

    Err(BuildError::ProgramNotFound {
        candidates: candidates.iter().map(|c| c.as_ref().to_string()).collect(),
    })
}

fn resolve_program(candidate: &str) -> Option<PathBuf> {
    if candidate.is_empty() {
        return None;
    }
    let path = Path::new(candidate);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    which::which(candidate).ok()
}

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Create a process builder from a command spec.
    pub fn from_spec(spec: &CommandSpec) -> Self {
        let mut builder = ProcessBuilder::new(&spec.program).args(&spec.args);
        for (key, value) in &spec.env {
            builder = builder.env(key, value);
        }
        if let Some(ref cwd) = spec.cwd {
            builder = builder.cwd(cwd);
        }
        builder
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd
    }

    /// Execute the command and wait for completion, capturing output.
    pub fn exec(&self) -> anyhow::Result<Output> {
        let mut cmd = self.build_command();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.program.display()))?;

        child
            .wait_with_output()
            .with_context(|| format!("failed to wait for `{}`", self.program.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockExecutor, MockProcessOutput};

    #[test]
    fn test_run_success_returns_output() {
        let exec = MockExecutor::new();
        exec.expect("pkg-config --cflags freetype2", MockProcessOutput::success("-I/usr/include/freetype2\n"));

        let argv: Vec<String> = ["pkg-config", "--cflags", "freetype2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = run(&exec, &argv, &RunOptions::default()).unwrap();
        assert_eq!(out.stdout.trim(), "-I/usr/include/freetype2");
    }

    #[test]
    fn test_run_failure_is_execution_error() {
        let exec = MockExecutor::new();
        exec.expect_prefix("python3", MockProcessOutput::failure(2, "Traceback: boom"));

        let argv = vec!["python3".to_string(), "gen.py".to_string()];
        let err = run(&exec, &argv, &RunOptions::default()).unwrap_err();
        match err {
            BuildError::ExecutionError {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(output, "Traceback: boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_run_empty_argv() {
        let exec = MockExecutor::new();
        assert!(run(&exec, &[], &RunOptions::default()).is_err());
    }

    #[test]
    fn test_find_program_missing() {
        let err = find_program(&["kiln-no-such-tool-a", "kiln-no-such-tool-b"]).unwrap_err();
        match err {
            BuildError::ProgramNotFound { candidates } => {
                assert_eq!(candidates, vec!["kiln-no-such-tool-a", "kiln-no-such-tool-b"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_find_program_first_existing_path_wins() {
        let tmp = tempfile::TempDir::new().unwrap();
        let second = tmp.path().join("python2");
        std::fs::write(&second, "").unwrap();
        let first = tmp.path().join("python3");

        let found = find_program(&[
            first.to_string_lossy().into_owned(),
            second.to_string_lossy().into_owned(),
        ])
        .unwrap();
        assert_eq!(found, second);
    }

    #[test]
    fn test_combined_output() {
        let done = CompletedProcess {
            status: Some(1),
            stdout: "note\n".to_string(),
            stderr: "error: x\n".to_string(),
        };
        assert_eq!(done.combined_output(), "note\nerror: x");
        assert!(!done.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_echo() {
        let spec = CommandSpec::new("echo").arg("hello");
        let out = SystemRunner.run(&spec).unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }
}
