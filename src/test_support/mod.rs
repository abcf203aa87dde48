//! Test utilities and mocks for kiln unit tests.
//!
//! The main piece is [`MockExecutor`], a [`CommandRunner`] that answers
//! commands from a list of expectations instead of spawning processes.
//! With materialisation enabled it also creates the files a real compiler,
//! archiver or generator would, so incremental logic can be exercised end
//! to end without a toolchain.
//!
//! # Example
//!
//! ```rust,ignore
//! let exec = MockExecutor::materializing();
//! exec.expect_contains("--version", MockProcessOutput::success("g++ 13.2.0"));
//! exec.set_default(MockProcessOutput::success(""));
//! ```

pub mod fixtures;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::builder::error::BuildError;
use crate::util::process::{CommandRunner, CommandSpec, CompletedProcess};

pub use fixtures::*;

/// Mock process output for testing command execution.
#[derive(Debug, Clone)]
pub struct MockProcessOutput {
    /// Exit status code (0 = success).
    pub status: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl MockProcessOutput {
    /// Create a successful output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        MockProcessOutput {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Create a failure output with the given stderr and status code.
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        MockProcessOutput {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Check if the process succeeded.
    pub fn success_status(&self) -> bool {
        self.status == 0
    }
}

impl Default for MockProcessOutput {
    fn default() -> Self {
        MockProcessOutput::success("")
    }
}

/// Pattern for matching commands in MockExecutor.
#[derive(Debug, Clone)]
pub enum CommandPattern {
    /// Exact match on full command string.
    Exact(String),
    /// Match if command starts with prefix.
    StartsWith(String),
    /// Match if command contains substring.
    Contains(String),
    /// Match using a regex pattern.
    Regex(String),
    /// Match any command.
    Any,
}

impl CommandPattern {
    /// Check if this pattern matches the given command.
    pub fn matches(&self, cmd: &str) -> bool {
        match self {
            CommandPattern::Exact(s) => cmd == s,
            CommandPattern::StartsWith(s) => cmd.starts_with(s),
            CommandPattern::Contains(s) => cmd.contains(s),
            CommandPattern::Regex(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(cmd))
                .unwrap_or(false),
            CommandPattern::Any => true,
        }
    }
}

/// Expectation for a command execution.
#[derive(Debug, Clone)]
pub struct CommandExpectation {
    /// Pattern to match against commands.
    pub pattern: CommandPattern,
    /// Output to return when matched.
    pub output: MockProcessOutput,
    /// Number of times this expectation can be used (None = unlimited).
    pub times: Option<usize>,
    /// Number of times this expectation has been used.
    pub used: usize,
    /// Files written when the expectation succeeds.
    pub writes: Vec<PathBuf>,
    /// How long the fake process "runs".
    pub delay: Option<Duration>,
}

impl CommandExpectation {
    /// Create a new expectation.
    pub fn new(pattern: CommandPattern, output: MockProcessOutput) -> Self {
        CommandExpectation {
            pattern,
            output,
            times: None,
            used: 0,
            writes: Vec::new(),
            delay: None,
        }
    }

    /// Set the number of times this expectation can be used.
    pub fn times(mut self, n: usize) -> Self {
        self.times = Some(n);
        self
    }

    /// Files to create when the command succeeds, e.g. generator outputs.
    pub fn writes(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.writes.extend(paths);
        self
    }

    /// Sleep before answering, to hold a call in flight.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Check if this expectation can still be used.
    pub fn available(&self) -> bool {
        match self.times {
            Some(n) => self.used < n,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    expectations: Vec<CommandExpectation>,
    calls: Vec<String>,
    default_output: Option<MockProcessOutput>,
    materialize: bool,
}

/// Mock process executor for testing command execution.
///
/// Records every command and answers from expectations in the order they
/// were added. Safe to share between the worker threads of a build.
#[derive(Debug, Default)]
pub struct MockExecutor {
    state: Mutex<MockState>,
}

impl MockExecutor {
    /// Create a new mock executor.
    pub fn new() -> Self {
        MockExecutor::default()
    }

    /// A mock that creates the outputs of successful compile, archive and
    /// link commands, and answers unmatched commands with success.
    pub fn materializing() -> Self {
        let exec = MockExecutor::new();
        {
            let mut state = exec.lock();
            state.materialize = true;
            state.default_output = Some(MockProcessOutput::success(""));
        }
        exec
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an expectation for an exact command match.
    pub fn expect(&self, cmd: &str, output: MockProcessOutput) -> &Self {
        self.expect_pattern(CommandExpectation::new(
            CommandPattern::Exact(cmd.to_string()),
            output,
        ))
    }

    /// Add an expectation for a command starting with a prefix.
    pub fn expect_prefix(&self, prefix: &str, output: MockProcessOutput) -> &Self {
        self.expect_pattern(CommandExpectation::new(
            CommandPattern::StartsWith(prefix.to_string()),
            output,
        ))
    }

    /// Add an expectation for a command containing a substring.
    pub fn expect_contains(&self, substring: &str, output: MockProcessOutput) -> &Self {
        self.expect_pattern(CommandExpectation::new(
            CommandPattern::Contains(substring.to_string()),
            output,
        ))
    }

    /// Add a custom expectation.
    pub fn expect_pattern(&self, expectation: CommandExpectation) -> &Self {
        self.lock().expectations.push(expectation);
        self
    }

    /// Set a default output for commands that don't match any expectation.
    pub fn set_default(&self, output: MockProcessOutput) -> &Self {
        self.lock().default_output = Some(output);
        self
    }

    /// Get all commands that were called.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded commands containing `substring`.
    pub fn count_calls(&self, substring: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.contains(substring))
            .count()
    }

    /// Clear all recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Verify that all expectations with a specific count were satisfied.
    pub fn verify(&self) -> Result<(), String> {
        for (i, exp) in self.lock().expectations.iter().enumerate() {
            if let Some(expected) = exp.times {
                if exp.used != expected {
                    return Err(format!(
                        "expectation {} was used {} times, expected {}",
                        i, exp.used, expected
                    ));
                }
            }
        }
        Ok(())
    }
}

impl CommandRunner for MockExecutor {
    fn run(&self, spec: &CommandSpec) -> Result<CompletedProcess, BuildError> {
        let full_cmd = spec.display_command();

        let (output, writes, delay, materialize) = {
            let mut state = self.lock();
            state.calls.push(full_cmd.clone());
            let materialize = state.materialize;

            let matched = state
                .expectations
                .iter_mut()
                .find(|exp| exp.pattern.matches(&full_cmd) && exp.available());

            match matched {
                Some(exp) => {
                    exp.used += 1;
                    (exp.output.clone(), exp.writes.clone(), exp.delay, materialize)
                }
                None => match state.default_output.clone() {
                    Some(default) => (default, Vec::new(), None, materialize),
                    None => {
                        return Err(BuildError::io(format!("unexpected command: {}", full_cmd)))
                    }
                },
            }
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if output.success_status() {
            for path in &writes {
                write_output(path, format!("generated by {}", full_cmd).as_bytes());
            }
            if materialize {
                materialize_outputs(spec);
            }
        }

        Ok(CompletedProcess {
            status: Some(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn write_output(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, contents);
}

/// Create the files a real tool would have produced for `spec`.
///
/// Output contents are derived from the command line and the contents of
/// every existing input file, so a changed input yields a changed output.
fn materialize_outputs(spec: &CommandSpec) {
    let args = &spec.args;

    let mut contents = spec.display_command().into_bytes();
    for arg in args {
        let path = Path::new(arg);
        if path.is_file() {
            if let Ok(bytes) = std::fs::read(path) {
                contents.extend_from_slice(&bytes);
            }
        }
    }

    // ar rcs <archive> <objects...>
    if args.first().map(String::as_str) == Some("rcs") {
        if let Some(archive) = args.get(1) {
            write_output(Path::new(archive), &contents);
        }
        return;
    }

    if let Some(pos) = args.iter().position(|a| a == "-MF") {
        if let (Some(depfile), Some(out_pos)) =
            (args.get(pos + 1), args.iter().position(|a| a == "-o"))
        {
            let source = args.get(out_pos.wrapping_sub(1)).cloned().unwrap_or_default();
            let object = args.get(out_pos + 1).cloned().unwrap_or_default();
            write_output(
                Path::new(depfile),
                format!("{}: {}\n", object, source).as_bytes(),
            );
        }
    }

    if let Some(pos) = args.iter().position(|a| a == "-o") {
        if let Some(output) = args.get(pos + 1) {
            write_output(Path::new(output), &contents);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mock_executor_basic() {
        let exec = MockExecutor::new();

        exec.expect("g++ --version", MockProcessOutput::success("g++ 13.2.0"));
        exec.expect_prefix("ar", MockProcessOutput::success(""));

        let result = exec.run(&CommandSpec::new("g++").arg("--version")).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "g++ 13.2.0");

        let result = exec
            .run(&CommandSpec::new("ar").args(["rcs", "libx.a"]))
            .unwrap();
        assert!(result.success());
        assert_eq!(exec.calls().len(), 2);
    }

    #[test]
    fn test_mock_executor_unexpected() {
        let exec = MockExecutor::new();
        assert!(exec.run(&CommandSpec::new("unknown")).is_err());
    }

    #[test]
    fn test_expectation_times_then_fallthrough() {
        let exec = MockExecutor::new();
        exec.expect_pattern(
            CommandExpectation::new(
                CommandPattern::Contains("gen.py".into()),
                MockProcessOutput::failure(1, "boom"),
            )
            .times(1),
        );
        exec.expect_contains("gen.py", MockProcessOutput::success(""));

        let spec = CommandSpec::new("python3").arg("gen.py");
        assert!(!exec.run(&spec).unwrap().success());
        assert!(exec.run(&spec).unwrap().success());
        assert!(exec.verify().is_ok());
    }

    #[test]
    fn test_materializing_creates_object_and_depfile() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.cc");
        std::fs::write(&src, "int a;").unwrap();
        let obj = tmp.path().join("obj/a.cc.o");
        let dep = tmp.path().join("obj/a.cc.o.d");

        let exec = MockExecutor::materializing();
        let spec = CommandSpec::new("c++").args([
            "-c".to_string(),
            "-MMD".to_string(),
            "-MF".to_string(),
            dep.display().to_string(),
            src.display().to_string(),
            "-o".to_string(),
            obj.display().to_string(),
        ]);
        exec.run(&spec).unwrap();

        assert!(obj.is_file());
        let depfile = std::fs::read_to_string(&dep).unwrap();
        assert!(depfile.contains("a.cc"));
    }

    #[test]
    fn test_failed_command_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("gl3w.h");

        let exec = MockExecutor::new();
        exec.expect_pattern(
            CommandExpectation::new(CommandPattern::Any, MockProcessOutput::failure(1, "x"))
                .writes([out.clone()]),
        );
        exec.run(&CommandSpec::new("python3")).unwrap();
        assert!(!out.exists());
    }
}
