//! `kiln build` command

use anyhow::{Context, Result};

use crate::cli::{BuildArgs, MessageFormat};
use crate::commands::load_manifest;
use kiln::builder::events::BuildEvent;
use kiln::builder::executor::{BuildObserver, BuildReport, TargetOutcome, TargetReport};
use kiln::ops::kiln_build::{build, plan, BuildOptions};
use kiln::util::config::{global_config_path, load_config, project_config_path};

/// Cargo-style status lines on stderr.
struct HumanObserver;

impl BuildObserver for HumanObserver {
    fn target_started(&self, name: &str) {
        eprintln!("   Compiling {}", name);
    }

    fn target_finished(&self, report: &TargetReport) {
        if report.outcome.is_success() {
            return;
        }
        if let Some(e) = report.error() {
            eprintln!("error: target `{}` failed ({})", report.name, e.kind());
            eprintln!("{}", e);
        }
    }
}

/// One JSON event per line on stdout.
struct JsonObserver;

impl BuildObserver for JsonObserver {
    fn target_finished(&self, report: &TargetReport) {
        println!("{}", BuildEvent::for_target(report).to_json());
    }
}

pub fn execute(args: BuildArgs, verbose: bool) -> Result<bool> {
    let (manifest, root) = load_manifest(args.manifest_path.as_deref())?;

    if args.plan {
        let plan = plan(&manifest, &root, &args.target)?;
        let json = serde_json::to_string_pretty(&plan).context("failed to serialize plan")?;
        println!("{}", json);
        return Ok(true);
    }

    // Configuration files first, command-line flags on top
    let config = load_config(global_config_path().as_deref(), &project_config_path(&root));
    let mut opts = BuildOptions::from_config(&config);
    if args.cxx.is_some() {
        opts.compiler = args.cxx;
    }
    if args.ar.is_some() {
        opts.archiver = args.ar;
    }
    opts.extra_flags.extend(args.cxxflags);
    if let Some(color) = args.use_color {
        opts.color = color;
    }
    opts.release |= args.release;
    if args.jobs.is_some() {
        opts.jobs = args.jobs;
    }
    opts.targets = args.target;
    opts.progress = !verbose && args.message_format == MessageFormat::Human;

    let result = match args.message_format {
        MessageFormat::Human => build(&manifest, &root, &opts, &HumanObserver)?,
        MessageFormat::Json => build(&manifest, &root, &opts, &JsonObserver)?,
    };

    let report = &result.report;
    match args.message_format {
        MessageFormat::Human => print_summary(report, result.profile),
        MessageFormat::Json => println!("{}", BuildEvent::finished(report).to_json()),
    }

    Ok(report.success())
}

fn print_summary(report: &BuildReport, profile: &str) {
    let skipped = report
        .targets
        .iter()
        .filter(|t| matches!(t.outcome, TargetOutcome::DependencyFailed { .. }))
        .count();
    let failed = report.failures().count() - skipped;

    if report.success() {
        eprintln!(
            "    Finished `{}` profile: {} target(s), {} rebuilt in {:.2}s",
            profile,
            report.built_count(),
            report.rebuilt_count(),
            report.elapsed.as_secs_f64()
        );
    } else {
        eprintln!(
            "error: build failed: {} target(s) failed, {} skipped",
            failed, skipped
        );
    }
}
