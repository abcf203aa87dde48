//! Artifacts of finished targets, threaded into their dependents.
//!
//! The executor records every artifact as its target finishes. Before a
//! target starts, its compile and link inputs are composed from the
//! artifacts of what it depends on.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::Serialize;

use crate::builder::graph::BuildPlan;
use crate::core::target::{ExecutableArtifact, GeneratedArtifact, LibraryArtifact};
use crate::util::PathSet;

/// What a finished target produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeArtifact {
    Library(LibraryArtifact),
    Executable(ExecutableArtifact),
    Generated(GeneratedArtifact),
}

impl NodeArtifact {
    pub fn name(&self) -> &str {
        match self {
            NodeArtifact::Library(a) => &a.name,
            NodeArtifact::Executable(a) => &a.name,
            NodeArtifact::Generated(a) => &a.name,
        }
    }

    /// True if nothing had to be rerun to produce it.
    pub fn fresh(&self) -> bool {
        match self {
            NodeArtifact::Library(a) => a.fresh,
            NodeArtifact::Executable(a) => a.fresh,
            NodeArtifact::Generated(a) => a.fresh,
        }
    }

    /// Files on disk this artifact consists of.
    pub fn filenames(&self) -> Vec<PathBuf> {
        match self {
            NodeArtifact::Library(a) => vec![a.archive.clone()],
            NodeArtifact::Executable(a) => vec![a.path.clone()],
            NodeArtifact::Generated(a) => a.outputs.clone(),
        }
    }
}

/// Compile inputs a target receives from its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileInputs {
    /// Exported and generated include directories
    pub includes: PathSet,
    /// Generated sources of direct generation dependencies
    pub generated_sources: Vec<PathBuf>,
}

/// Link inputs a target receives from its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInputs {
    /// Dependency archives, dependents before dependencies
    pub archives: Vec<PathBuf>,
    /// External libraries, own first, de-duplicated
    pub external_libs: Vec<String>,
}

/// Artifacts of finished targets, by name.
#[derive(Debug, Default)]
pub struct BuildRecord {
    artifacts: HashMap<String, NodeArtifact>,
}

impl BuildRecord {
    pub fn new() -> Self {
        BuildRecord::default()
    }

    pub fn insert(&mut self, artifact: NodeArtifact) {
        self.artifacts.insert(artifact.name().to_string(), artifact);
    }

    pub fn get(&self, name: &str) -> Option<&NodeArtifact> {
        self.artifacts.get(name)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Includes and generated sources for the target at plan position `pos`.
    ///
    /// Include directories come from every transitive dependency, nearest
    /// first; generated sources only from direct generation dependencies.
    pub fn compile_inputs_for(&self, plan: &BuildPlan, pos: usize) -> CompileInputs {
        let mut inputs = CompileInputs::default();

        for dep in preorder_deps(plan, pos) {
            match self.get(&plan.order[dep].name) {
                Some(NodeArtifact::Library(lib)) => {
                    inputs.includes.extend(lib.export_includes.iter().cloned());
                }
                Some(NodeArtifact::Generated(generated)) => {
                    inputs.includes.extend(generated.includes.iter().cloned());
                }
                _ => {}
            }
        }

        for &dep in &plan.order[pos].dep_indices {
            if let Some(NodeArtifact::Generated(generated)) = self.get(&plan.order[dep].name) {
                inputs
                    .generated_sources
                    .extend(generated.sources.iter().cloned());
            }
        }

        inputs
    }

    /// Archives and external libraries for the target at `pos`.
    ///
    /// Archives are ordered so that every library precedes the libraries it
    /// depends on, which single-pass linkers require.
    pub fn link_inputs_for(&self, plan: &BuildPlan, pos: usize) -> LinkInputs {
        let node = &plan.order[pos];
        let mut archives = Vec::new();
        let mut external_libs = Vec::new();
        let mut seen_libs = HashSet::new();

        for lib in &node.spec.external_libs {
            if seen_libs.insert(lib.clone()) {
                external_libs.push(lib.clone());
            }
        }

        // Plan order is topological, so reversing it puts dependents first.
        let mut deps = plan.transitive_deps(pos);
        deps.reverse();
        for dep in deps {
            if let Some(NodeArtifact::Library(lib)) = self.get(&plan.order[dep].name) {
                archives.push(lib.archive.clone());
                for name in &plan.order[dep].spec.external_libs {
                    if seen_libs.insert(name.clone()) {
                        external_libs.push(name.clone());
                    }
                }
            }
        }

        LinkInputs {
            archives,
            external_libs,
        }
    }
}

/// Transitive dependencies of `pos`, depth first in declaration order.
fn preorder_deps(plan: &BuildPlan, pos: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<usize> = plan.order[pos].dep_indices.iter().rev().copied().collect();

    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        order.push(current);
        stack.extend(plan.order[current].dep_indices.iter().rev().copied());
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::graph::BuildGraph;
    use crate::core::target::{GenerationSpec, TargetSpec};

    fn library(name: &str, export: &str) -> NodeArtifact {
        NodeArtifact::Library(LibraryArtifact {
            name: name.to_string(),
            archive: PathBuf::from(format!("build/debug/{name}/lib{name}.a")),
            export_includes: [PathBuf::from(export)].into_iter().collect(),
            external_libs: Vec::new(),
            transitive_archives: Vec::new(),
            fresh: false,
        })
    }

    fn terminal_plan() -> BuildPlan {
        let graph = BuildGraph::new(vec![
            TargetSpec::generated("gl3w", GenerationSpec::default()),
            TargetSpec::library("abseil_base", vec![PathBuf::from("base.cc")])
                .with_external_libs(["pthread"]),
            TargetSpec::library("abseil_strings", vec![PathBuf::from("str.cc")])
                .with_deps(["abseil_base"]),
            TargetSpec::library("skia", vec![PathBuf::from("skia.cc")])
                .with_deps(["abseil_base"])
                .with_external_libs(["freetype", "pthread"]),
            TargetSpec::library("gl3w_lib", vec![]).with_deps(["gl3w"]),
            TargetSpec::executable("uterm", vec![PathBuf::from("main.cc")])
                .with_deps(["abseil_strings", "skia", "gl3w_lib"])
                .with_external_libs(["glfw", "GL"]),
        ])
        .unwrap();
        graph.assemble(&[]).unwrap()
    }

    fn terminal_record() -> BuildRecord {
        let mut record = BuildRecord::new();
        record.insert(NodeArtifact::Generated(GeneratedArtifact {
            name: "gl3w".to_string(),
            sources: vec![PathBuf::from("build/gen/gl3w/src/gl3w.c")],
            includes: [PathBuf::from("build/gen/gl3w/include")].into_iter().collect(),
            outputs: vec![PathBuf::from("build/gen/gl3w/src/gl3w.c")],
            fresh: true,
        }));
        record.insert(library("abseil_base", "deps/abseil"));
        record.insert(library("abseil_strings", "deps/abseil"));
        record.insert(library("skia", "deps/skia/include"));
        record.insert(library("gl3w_lib", "deps/gl3w/include"));
        record
    }

    #[test]
    fn test_generated_sources_feed_direct_dependent() {
        let plan = terminal_plan();
        let record = terminal_record();

        let gl3w_lib = plan.position("gl3w_lib").unwrap();
        let inputs = record.compile_inputs_for(&plan, gl3w_lib);
        assert_eq!(
            inputs.generated_sources,
            vec![PathBuf::from("build/gen/gl3w/src/gl3w.c")]
        );
        assert!(inputs
            .includes
            .contains(&PathBuf::from("build/gen/gl3w/include")));

        let uterm = plan.position("uterm").unwrap();
        let inputs = record.compile_inputs_for(&plan, uterm);
        assert!(inputs.generated_sources.is_empty());
        assert!(inputs
            .includes
            .contains(&PathBuf::from("build/gen/gl3w/include")));
    }

    #[test]
    fn test_includes_nearest_first_without_duplicates() {
        let plan = terminal_plan();
        let record = terminal_record();

        let inputs = record.compile_inputs_for(&plan, plan.position("uterm").unwrap());
        let includes: Vec<_> = inputs.includes.iter().cloned().collect();
        assert_eq!(
            includes,
            vec![
                PathBuf::from("deps/abseil"),
                PathBuf::from("deps/skia/include"),
                PathBuf::from("deps/gl3w/include"),
                PathBuf::from("build/gen/gl3w/include"),
            ]
        );
    }

    #[test]
    fn test_link_order_dependents_first() {
        let plan = terminal_plan();
        let record = terminal_record();

        let inputs = record.link_inputs_for(&plan, plan.position("uterm").unwrap());
        let base = inputs
            .archives
            .iter()
            .position(|a| a.ends_with("libabseil_base.a"))
            .unwrap();
        let strings = inputs
            .archives
            .iter()
            .position(|a| a.ends_with("libabseil_strings.a"))
            .unwrap();
        let skia = inputs
            .archives
            .iter()
            .position(|a| a.ends_with("libskia.a"))
            .unwrap();
        assert!(strings < base);
        assert!(skia < base);
        assert_eq!(inputs.archives.len(), 4);
    }

    #[test]
    fn test_external_libs_propagate_deduplicated() {
        let plan = terminal_plan();
        let record = terminal_record();

        let inputs = record.link_inputs_for(&plan, plan.position("uterm").unwrap());
        assert_eq!(&inputs.external_libs[..2], &["glfw", "GL"]);
        assert_eq!(
            inputs.external_libs.iter().filter(|l| *l == "pthread").count(),
            1
        );
        assert!(inputs.external_libs.contains(&"freetype".to_string()));
    }

    #[test]
    fn test_missing_dependency_artifacts_are_skipped() {
        let plan = terminal_plan();
        let record = BuildRecord::new();
        let inputs = record.link_inputs_for(&plan, plan.position("uterm").unwrap());
        assert!(inputs.archives.is_empty());
        assert_eq!(inputs.external_libs, vec!["glfw", "GL"]);
    }
}
