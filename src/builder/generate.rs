//! Cached code generation steps.
//!
//! A [`GenerationStep`] wraps an external generator so it behaves like a
//! pure function of its declared inputs. [`Generator::run_cached`] reruns
//! the command only when the command line or the content of an input
//! changed, or a declared output went missing.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::builder::cache::{CacheEntry, CacheStore};
use crate::builder::error::BuildError;
use crate::builder::graph::BuildPlan;
use crate::core::target::GenerationSpec;
use crate::util::fs::ensure_dir;
use crate::util::hash::{hash_strings, sha256_file_if_exists};
use crate::util::process::{find_program, run, CommandRunner, RunOptions};

/// Placeholder in generator arguments replaced by the output directory.
pub const OUT_DIR_PLACEHOLDER: &str = "{out}";

/// A generator invocation with explicitly declared inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationStep {
    /// Cache key; one in-flight run per identity.
    pub identity: String,
    /// Program candidates, first found wins.
    pub program: Vec<String>,
    /// Program already resolved from the candidates; skips the lookup.
    pub resolved_program: Option<PathBuf>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Directory the outputs are written to; created before running.
    pub out_dir: PathBuf,
    pub declared_inputs: Vec<PathBuf>,
    /// Absolute output paths.
    pub declared_outputs: Vec<PathBuf>,
}

impl GenerationStep {
    /// Build the step for a declared generation target.
    pub fn from_spec(name: &str, spec: &GenerationSpec, out_dir: &Path, root: &Path) -> Self {
        let out = out_dir.display().to_string();
        GenerationStep {
            identity: name.to_string(),
            program: spec.program.clone(),
            resolved_program: spec.resolved_program.clone(),
            args: spec
                .args
                .iter()
                .map(|a| a.replace(OUT_DIR_PLACEHOLDER, &out))
                .collect(),
            cwd: Some(root.to_path_buf()),
            out_dir: out_dir.to_path_buf(),
            declared_inputs: spec.inputs.clone(),
            declared_outputs: spec.outputs.iter().map(|o| out_dir.join(o)).collect(),
        }
    }
}

/// Resolve the program of every generation target in `plan`.
///
/// Run before anything is built so a missing interpreter fails the whole
/// build up front instead of one target midway through.
pub fn resolve_programs(plan: &mut BuildPlan) -> Result<(), BuildError> {
    for node in plan.order.iter_mut() {
        if let Some(generation) = node.spec.generation.as_mut() {
            let program = find_program(&generation.program)?;
            tracing::debug!("Generation step `{}` uses {}", node.name, program.display());
            generation.resolved_program = Some(program);
        }
    }
    Ok(())
}

/// Result of [`Generator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub outputs: Vec<PathBuf>,
    /// True if the recorded outputs were reused without running anything.
    pub fresh: bool,
}

type Slot = Arc<OnceLock<Result<GenerationOutcome, BuildError>>>;

/// Runs generation steps against a [`CacheStore`].
pub struct Generator {
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn CacheStore>,
    in_flight: Mutex<HashMap<String, Slot>>,
}

impl Generator {
    pub fn new(runner: Arc<dyn CommandRunner>, store: Arc<dyn CacheStore>) -> Self {
        Generator {
            runner,
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `step` unless its cached outputs are still valid, returning the
    /// declared output paths.
    pub fn run_cached(&self, step: &GenerationStep) -> Result<Vec<PathBuf>, BuildError> {
        self.run(step).map(|outcome| outcome.outputs)
    }

    /// Like [`run_cached`](Self::run_cached), also reporting freshness.
    ///
    /// Concurrent calls for the same identity share one execution; callers
    /// arriving while it is in flight block and observe its result, failure
    /// included.
    pub fn run(&self, step: &GenerationStep) -> Result<GenerationOutcome, BuildError> {
        let slot = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| BuildError::io("generation lock poisoned"))?;
            Arc::clone(
                in_flight
                    .entry(step.identity.clone())
                    .or_insert_with(|| Arc::new(OnceLock::new())),
            )
        };

        let result = slot.get_or_init(|| self.execute(step)).clone();

        // Later calls go through the store again rather than this slot.
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if in_flight
                .get(&step.identity)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                in_flight.remove(&step.identity);
            }
        }

        result
    }

    fn execute(&self, step: &GenerationStep) -> Result<GenerationOutcome, BuildError> {
        let program = match &step.resolved_program {
            Some(program) => program.clone(),
            None => find_program(&step.program)?,
        };

        let mut argv = vec![program.display().to_string()];
        argv.extend(step.args.iter().cloned());
        let command_hash = hash_strings(&argv);

        let inputs = hash_inputs(&step.declared_inputs)?;

        if let Some(entry) = self.store.get(&step.identity) {
            if is_fresh(&entry, &command_hash, &inputs, &step.declared_outputs) {
                tracing::debug!("Generation step `{}` is fresh", step.identity);
                return Ok(GenerationOutcome {
                    outputs: entry.outputs,
                    fresh: true,
                });
            }
            tracing::debug!("Generation step `{}` is stale", step.identity);
        }

        ensure_dir(&step.out_dir)?;
        tracing::info!("Generating `{}`", step.identity);

        let opts = RunOptions {
            cwd: step.cwd.clone(),
            env: Vec::new(),
        };
        run(self.runner.as_ref(), &argv, &opts).map_err(|e| match e {
            BuildError::ExecutionError { output, .. } => BuildError::GenerationError {
                step: step.identity.clone(),
                output,
            },
            other => BuildError::GenerationError {
                step: step.identity.clone(),
                output: other.to_string(),
            },
        })?;

        let missing: Vec<String> = step
            .declared_outputs
            .iter()
            .filter(|o| !o.exists())
            .map(|o| o.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::GenerationError {
                step: step.identity.clone(),
                output: format!("declared outputs were not produced: {}", missing.join(", ")),
            });
        }

        self.store.put(CacheEntry {
            identity: step.identity.clone(),
            command_hash,
            inputs,
            outputs: step.declared_outputs.clone(),
            recorded_at: CacheEntry::now(),
        })?;

        Ok(GenerationOutcome {
            outputs: step.declared_outputs.clone(),
            fresh: false,
        })
    }
}

fn hash_inputs(inputs: &[PathBuf]) -> Result<BTreeMap<PathBuf, Option<String>>, BuildError> {
    let mut hashes = BTreeMap::new();
    for input in inputs {
        hashes.insert(input.clone(), sha256_file_if_exists(input)?);
    }
    Ok(hashes)
}

fn is_fresh(
    entry: &CacheEntry,
    command_hash: &str,
    inputs: &BTreeMap<PathBuf, Option<String>>,
    outputs: &[PathBuf],
) -> bool {
    entry.command_hash == command_hash
        && &entry.inputs == inputs
        && entry.outputs == outputs
        && outputs.iter().all(|o| o.exists())
}
