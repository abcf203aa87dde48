//! Build event types for JSON output.
//!
//! This module defines the JSON schema for machine-readable build output,
//! emitted one object per line with `--message-format json`.
//!
//! # Event Types
//!
//! - `target-artifact`: A target finished and produced files
//! - `target-failed`: A target failed or was skipped
//! - `build-finished`: Build completed (success or failure)
//!
//! # Stability
//!
//! New fields may be added, but existing fields should not be removed or
//! renamed.

use std::path::PathBuf;

use serde::Serialize;

use crate::builder::executor::{BuildReport, TargetOutcome, TargetReport};

/// A build event emitted during the build process.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    /// A target produced its artifact.
    #[serde(rename = "target-artifact")]
    TargetArtifact {
        target: String,
        /// "staticlib", "executable" or "generated"
        kind: String,
        /// Output filenames
        filenames: Vec<PathBuf>,
        /// Whether the artifact was reused without running anything
        fresh: bool,
    },

    /// A target failed, or was skipped because a dependency failed.
    #[serde(rename = "target-failed")]
    TargetFailed {
        target: String,
        /// Failure kind, e.g. "compile-error" or "dependency-failed"
        error: String,
        /// Error text including verbatim tool output
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        dependency: Option<String>,
    },

    /// Build completed (success or failure).
    #[serde(rename = "build-finished")]
    BuildFinished {
        success: bool,
        /// Total build duration in milliseconds
        duration_ms: u64,
        /// Number of targets that built
        targets_built: u64,
        /// Number of targets that failed or were skipped
        targets_failed: u64,
    },
}

impl BuildEvent {
    /// The event describing one finished target.
    pub fn for_target(report: &TargetReport) -> Self {
        match &report.outcome {
            TargetOutcome::Built { fresh } => BuildEvent::TargetArtifact {
                target: report.name.clone(),
                kind: report.kind.as_str().to_string(),
                filenames: report
                    .artifact
                    .as_ref()
                    .map(|a| a.filenames())
                    .unwrap_or_default(),
                fresh: *fresh,
            },
            TargetOutcome::Failed(e) => BuildEvent::TargetFailed {
                target: report.name.clone(),
                error: e.kind().to_string(),
                message: e.to_string(),
                dependency: None,
            },
            TargetOutcome::DependencyFailed { dependency } => {
                let message = report
                    .error()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                BuildEvent::TargetFailed {
                    target: report.name.clone(),
                    error: "dependency-failed".to_string(),
                    message,
                    dependency: Some(dependency.clone()),
                }
            }
        }
    }

    /// Create a build finished event.
    pub fn finished(report: &BuildReport) -> Self {
        let built = report.built_count() as u64;
        BuildEvent::BuildFinished {
            success: report.success(),
            duration_ms: report.elapsed.as_millis() as u64,
            targets_built: built,
            targets_failed: report.targets.len() as u64 - built,
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
