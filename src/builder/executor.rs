//! Build executor with progress reporting.
//!
//! Targets run on a rayon pool sized by the context's job count. The
//! calling thread owns the schedule: it dispatches a target once all of its
//! dependencies have produced artifacts, collects results over a channel,
//! and records them for dependents. A failed target marks everything that
//! depends on it as skipped while unrelated targets keep going.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use crate::builder::context::BuildContext;
use crate::builder::error::BuildError;
use crate::builder::generate::{GenerationStep, Generator};
use crate::builder::graph::BuildPlan;
use crate::builder::native::{CompileOptions, ExecutableOptions, LibraryOptions, NativeBuilder};
use crate::builder::record::{BuildRecord, NodeArtifact};
use crate::core::target::{GeneratedArtifact, TargetKind, TargetSpec};
use crate::util::process::CommandRunner;
use crate::util::PathSet;

/// Final state of one target.
#[derive(Debug, Clone)]
pub enum TargetOutcome {
    /// Artifact produced; `fresh` if nothing had to be rerun.
    Built { fresh: bool },
    Failed(BuildError),
    /// Not attempted because `dependency` failed.
    DependencyFailed { dependency: String },
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TargetOutcome::Built { .. })
    }
}

/// Outcome and artifact of one planned target.
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub name: String,
    pub kind: TargetKind,
    pub outcome: TargetOutcome,
    pub artifact: Option<NodeArtifact>,
}

impl TargetReport {
    /// The failure as a [`BuildError`], if the target did not build.
    pub fn error(&self) -> Option<BuildError> {
        match &self.outcome {
            TargetOutcome::Built { .. } => None,
            TargetOutcome::Failed(e) => Some(e.clone()),
            TargetOutcome::DependencyFailed { dependency } => Some(BuildError::DependencyFailed {
                target: self.name.clone(),
                dependency: dependency.clone(),
            }),
        }
    }
}

/// Result of executing a whole plan, in plan order.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub targets: Vec<TargetReport>,
    pub elapsed: Duration,
}

impl BuildReport {
    /// True if every target built.
    pub fn success(&self) -> bool {
        self.targets.iter().all(|t| t.outcome.is_success())
    }

    pub fn get(&self, name: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Targets that did not build, direct failures and skipped ones alike.
    pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets.iter().filter(|t| !t.outcome.is_success())
    }

    /// Number of targets that had to do work.
    pub fn rebuilt_count(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, TargetOutcome::Built { fresh: false }))
            .count()
    }

    pub fn built_count(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| t.outcome.is_success())
            .count()
    }
}

/// Receives target results as they come in, on the scheduling thread.
pub trait BuildObserver {
    fn target_started(&self, _name: &str) {}

    fn target_finished(&self, _report: &TargetReport) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl BuildObserver for NoopObserver {}

/// Work for one target, prepared from the record on the scheduling thread.
enum Job {
    Generate {
        step: GenerationStep,
        sources: Vec<PathBuf>,
        includes: PathSet,
    },
    Library {
        sources: Vec<PathBuf>,
        opts: LibraryOptions,
    },
    Executable {
        sources: Vec<PathBuf>,
        opts: ExecutableOptions,
    },
}

/// Build executor with progress tracking.
pub struct BuildExecutor<'a> {
    ctx: &'a BuildContext,
    runner: Arc<dyn CommandRunner>,
    generator: &'a Generator,
    progress: bool,
}

impl<'a> BuildExecutor<'a> {
    /// Create a new build executor.
    pub fn new(
        ctx: &'a BuildContext,
        runner: Arc<dyn CommandRunner>,
        generator: &'a Generator,
    ) -> Self {
        BuildExecutor {
            ctx,
            runner,
            generator,
            progress: false,
        }
    }

    /// Show a progress bar when stderr is a terminal.
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Execute a build plan, building every target that can be built.
    pub fn execute(
        &self,
        plan: &BuildPlan,
        observer: &dyn BuildObserver,
    ) -> Result<BuildReport, BuildError> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.ctx.jobs())
            .thread_name(|i| format!("kiln-worker-{}", i))
            .build()
            .map_err(|e| BuildError::io(format!("failed to start worker pool: {}", e)))?;

        tracing::debug!(
            "Executing {} target(s) on {} worker(s)",
            plan.len(),
            self.ctx.jobs()
        );

        let pb = self.progress_bar(plan.len());
        let mut record = BuildRecord::new();
        let mut outcomes: Vec<Option<TargetOutcome>> = vec![None; plan.len()];
        let mut pending: Vec<usize> = plan.order.iter().map(|n| n.dep_indices.len()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count == 0)
            .map(|(pos, _)| Reverse(pos))
            .collect();

        let mut notify = |report: &TargetReport| match &pb {
            Some(pb) => {
                pb.inc(1);
                pb.suspend(|| observer.target_finished(report));
            }
            None => observer.target_finished(report),
        };

        pool.in_place_scope(|scope| {
            let (tx, rx) = mpsc::channel::<(usize, Result<NodeArtifact, BuildError>)>();
            let mut in_flight = 0usize;

            loop {
                // Earliest planned first, so logs follow declaration order.
                while let Some(Reverse(pos)) = ready.pop() {
                    let node = &plan.order[pos];
                    let job = match self.prepare(plan, pos, &record) {
                        Ok(job) => job,
                        Err(e) => {
                            self.fail(plan, pos, e, &mut outcomes, &mut notify);
                            continue;
                        }
                    };

                    match &pb {
                        Some(pb) => {
                            pb.suspend(|| observer.target_started(&node.name));
                            pb.set_message(node.name.clone());
                        }
                        None => observer.target_started(&node.name),
                    }
                    tracing::debug!("Dispatching `{}`", node.name);

                    in_flight += 1;
                    let tx = tx.clone();
                    let spec = &node.spec;
                    scope.spawn(move |_| {
                        let result = self.run_job(spec, job);
                        // The receiver outlives every job.
                        let _ = tx.send((pos, result));
                    });
                }

                if in_flight == 0 {
                    break;
                }

                let Ok((pos, result)) = rx.recv() else {
                    break;
                };
                in_flight -= 1;

                match result {
                    Ok(artifact) => {
                        let fresh = artifact.fresh();
                        record.insert(artifact.clone());
                        outcomes[pos] = Some(TargetOutcome::Built { fresh });
                        notify(&TargetReport {
                            name: plan.order[pos].name.clone(),
                            kind: plan.order[pos].kind,
                            outcome: TargetOutcome::Built { fresh },
                            artifact: Some(artifact),
                        });

                        for &dependent in &plan.order[pos].dependent_indices {
                            pending[dependent] -= 1;
                            if pending[dependent] == 0 && outcomes[dependent].is_none() {
                                ready.push(Reverse(dependent));
                            }
                        }
                    }
                    Err(e) => self.fail(plan, pos, e, &mut outcomes, &mut notify),
                }
            }
        });

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let targets = plan
            .order
            .iter()
            .zip(outcomes)
            .map(|(node, outcome)| TargetReport {
                name: node.name.clone(),
                kind: node.kind,
                outcome: outcome.unwrap_or_else(|| {
                    TargetOutcome::Failed(BuildError::io("target was never scheduled"))
                }),
                artifact: record.get(&node.name).cloned(),
            })
            .collect();

        Ok(BuildReport {
            targets,
            elapsed: start.elapsed(),
        })
    }

    /// Record a failure and skip everything that depends on it.
    fn fail(
        &self,
        plan: &BuildPlan,
        pos: usize,
        error: BuildError,
        outcomes: &mut [Option<TargetOutcome>],
        notify: &mut dyn FnMut(&TargetReport),
    ) {
        let name = plan.order[pos].name.clone();
        tracing::debug!("Target `{}` failed: {}", name, error.kind());

        outcomes[pos] = Some(TargetOutcome::Failed(error.clone()));
        notify(&TargetReport {
            name: name.clone(),
            kind: plan.order[pos].kind,
            outcome: TargetOutcome::Failed(error),
            artifact: None,
        });

        for dependent in plan.transitive_dependents(pos) {
            if outcomes[dependent].is_some() {
                continue;
            }
            let outcome = TargetOutcome::DependencyFailed {
                dependency: name.clone(),
            };
            outcomes[dependent] = Some(outcome.clone());
            notify(&TargetReport {
                name: plan.order[dependent].name.clone(),
                kind: plan.order[dependent].kind,
                outcome,
                artifact: None,
            });
        }
    }

    /// Compose a target's inputs from the artifacts of its dependencies.
    fn prepare(
        &self,
        plan: &BuildPlan,
        pos: usize,
        record: &BuildRecord,
    ) -> Result<Job, BuildError> {
        let spec = &plan.order[pos].spec;
        let inputs = record.compile_inputs_for(plan, pos);
        let compile = CompileOptions {
            includes: spec.includes.clone(),
            dep_includes: inputs.includes,
            macros: spec.macros.clone(),
            flags: spec.flags.clone(),
            pkg_config: spec.pkg_config.clone(),
            include_source_dirs: spec.include_source_dirs,
        };
        let mut sources = spec.sources.clone();
        sources.extend(inputs.generated_sources);

        match spec.kind {
            TargetKind::Generated => {
                let Some(generation) = spec.generation.as_ref() else {
                    return Err(BuildError::InvalidTarget {
                        target: spec.name.clone(),
                        reason: "generated target has no generation step".to_string(),
                    });
                };
                let out_dir = self.ctx.gen_dir(&spec.name);
                Ok(Job::Generate {
                    step: GenerationStep::from_spec(&spec.name, generation, &out_dir, self.ctx.root()),
                    sources: generation.sources.iter().map(|s| out_dir.join(s)).collect(),
                    includes: generation.includes.iter().map(|i| out_dir.join(i)).collect(),
                })
            }
            TargetKind::StaticLib => {
                let link = record.link_inputs_for(plan, pos);
                Ok(Job::Library {
                    sources,
                    opts: LibraryOptions {
                        compile,
                        export_includes: spec.export_includes.clone(),
                        external_libs: link.external_libs,
                        dep_archives: link.archives,
                    },
                })
            }
            TargetKind::Executable => {
                let link = record.link_inputs_for(plan, pos);
                Ok(Job::Executable {
                    sources,
                    opts: ExecutableOptions {
                        compile,
                        archives: link.archives,
                        external_libs: link.external_libs,
                        link_flags: spec.link_flags.clone(),
                    },
                })
            }
        }
    }

    /// Build one target on a worker thread.
    fn run_job(&self, spec: &TargetSpec, job: Job) -> Result<NodeArtifact, BuildError> {
        let builder = NativeBuilder::new(self.ctx, self.runner.as_ref());
        match job {
            Job::Generate {
                step,
                sources,
                includes,
            } => {
                let outcome = self.generator.run(&step)?;
                Ok(NodeArtifact::Generated(GeneratedArtifact {
                    name: spec.name.clone(),
                    sources,
                    includes,
                    outputs: outcome.outputs,
                    fresh: outcome.fresh,
                }))
            }
            Job::Library { sources, opts } => builder
                .build_library(&spec.name, &sources, &opts)
                .map(NodeArtifact::Library),
            Job::Executable { sources, opts } => builder
                .build_executable(&spec.name, &sources, &opts)
                .map(NodeArtifact::Executable),
        }
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.progress || total < 2 || !std::io::stderr().is_terminal() {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    }
}
