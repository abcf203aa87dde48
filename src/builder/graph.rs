//! Dependency graph assembly.
//!
//! A [`BuildGraph`] holds every declared target with an edge from each
//! target to each of its dependencies. [`BuildGraph::assemble`] restricts it
//! to what the requested roots need and orders it so dependencies come
//! first, breaking ties by declaration order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use serde::Serialize;

use crate::builder::error::BuildError;
use crate::core::target::{TargetKind, TargetSpec};

/// All declared targets and their dependency edges.
#[derive(Debug, Clone)]
pub struct BuildGraph {
    /// Node weight is the declaration index into `specs`.
    graph: DiGraph<usize, ()>,
    specs: Vec<TargetSpec>,
    name_to_node: HashMap<String, NodeIndex>,
}

impl BuildGraph {
    /// Build the graph, validating every dependency edge.
    pub fn new(specs: Vec<TargetSpec>) -> Result<Self, BuildError> {
        let mut graph = DiGraph::new();
        let mut name_to_node = HashMap::new();

        for (idx, spec) in specs.iter().enumerate() {
            let node = graph.add_node(idx);
            if name_to_node.insert(spec.name.clone(), node).is_some() {
                return Err(BuildError::InvalidTarget {
                    target: spec.name.clone(),
                    reason: "declared more than once".to_string(),
                });
            }
        }

        for spec in &specs {
            let from = name_to_node[&spec.name];
            for dep in &spec.deps {
                let Some(&to) = name_to_node.get(dep) else {
                    return Err(BuildError::UnknownDependency {
                        target: spec.name.clone(),
                        dependency: dep.clone(),
                    });
                };
                if from == to {
                    return Err(BuildError::CycleDetected {
                        cycle: vec![spec.name.clone(), spec.name.clone()],
                    });
                }
                if !specs[graph[to]].kind.is_linkable_dependency() {
                    return Err(BuildError::InvalidTarget {
                        target: spec.name.clone(),
                        reason: format!("cannot depend on executable `{}`", dep),
                    });
                }
                if !graph.contains_edge(from, to) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        Ok(BuildGraph {
            graph,
            specs,
            name_to_node,
        })
    }

    pub fn specs(&self) -> &[TargetSpec] {
        &self.specs
    }

    /// Fail with the first cycle found, members in declaration order.
    fn check_acyclic(&self) -> Result<(), BuildError> {
        let mut cycles: Vec<Vec<usize>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut members: Vec<usize> = scc.iter().map(|&n| self.graph[n]).collect();
                members.sort_unstable();
                members
            })
            .collect();
        cycles.sort();

        if let Some(members) = cycles.first() {
            let mut cycle: Vec<String> = members
                .iter()
                .map(|&i| self.specs[i].name.clone())
                .collect();
            cycle.push(cycle[0].clone());
            return Err(BuildError::CycleDetected { cycle });
        }
        Ok(())
    }

    /// Compute the ordered plan for `roots`; all targets if `roots` is empty.
    ///
    /// Fails before anything is built if the graph contains a cycle.
    pub fn assemble(&self, roots: &[String]) -> Result<BuildPlan, BuildError> {
        self.check_acyclic()?;

        let root_nodes: Vec<NodeIndex> = if roots.is_empty() {
            self.graph.node_indices().collect()
        } else {
            roots
                .iter()
                .map(|r| {
                    self.name_to_node
                        .get(r)
                        .copied()
                        .ok_or_else(|| BuildError::InvalidTarget {
                            target: r.clone(),
                            reason: "no such target".to_string(),
                        })
                })
                .collect::<Result<_, _>>()?
        };

        let mut reachable = HashSet::new();
        for root in root_nodes {
            let mut dfs = Dfs::new(&self.graph, root);
            while let Some(node) = dfs.next(&self.graph) {
                reachable.insert(node);
            }
        }

        // Kahn's algorithm; the heap yields the earliest declared ready node.
        let mut pending: HashMap<NodeIndex, usize> = reachable
            .iter()
            .map(|&n| (n, self.graph.neighbors(n).count()))
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&n, _)| Reverse(self.graph[n]))
            .collect();

        let mut order: Vec<usize> = Vec::with_capacity(reachable.len());
        while let Some(Reverse(decl)) = ready.pop() {
            order.push(decl);
            let node = NodeIndex::new(decl);
            for dependent in self.graph.neighbors_directed(node, Direction::Incoming) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(self.graph[dependent]));
                    }
                }
            }
        }

        let position: HashMap<usize, usize> =
            order.iter().enumerate().map(|(pos, &d)| (d, pos)).collect();

        let mut nodes: Vec<PlanNode> = order
            .iter()
            .map(|&decl| {
                let spec = &self.specs[decl];
                PlanNode {
                    name: spec.name.clone(),
                    kind: spec.kind,
                    deps: spec.deps.clone(),
                    dep_indices: Vec::new(),
                    dependent_indices: Vec::new(),
                    spec: spec.clone(),
                }
            })
            .collect();

        for pos in 0..nodes.len() {
            let mut seen = HashSet::new();
            let dep_indices: Vec<usize> = nodes[pos]
                .spec
                .deps
                .iter()
                .filter(|d| seen.insert(d.as_str()))
                .map(|d| position[&self.graph[self.name_to_node[d]]])
                .collect();
            for &dep in &dep_indices {
                nodes[dep].dependent_indices.push(pos);
            }
            nodes[pos].dep_indices = dep_indices;
        }

        tracing::debug!(
            "Assembled plan: {}",
            nodes
                .iter()
                .map(|n| n.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(BuildPlan { order: nodes })
    }
}

/// One target in a [`BuildPlan`].
#[derive(Debug, Clone, Serialize)]
pub struct PlanNode {
    pub name: String,
    pub kind: TargetKind,
    /// Dependency names as declared.
    pub deps: Vec<String>,
    /// Plan positions of direct dependencies, in declaration order.
    #[serde(skip)]
    pub dep_indices: Vec<usize>,
    /// Plan positions of direct dependents.
    #[serde(skip)]
    pub dependent_indices: Vec<usize>,
    #[serde(skip)]
    pub spec: TargetSpec,
}

/// Targets in a valid build order: dependencies before dependents.
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    pub order: Vec<PlanNode>,
}

impl BuildPlan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Plan position of a target.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n.name == name)
    }

    /// Names in build order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|n| n.name.as_str()).collect()
    }

    /// Every target that depends on `pos`, directly or transitively, in
    /// plan order.
    pub fn transitive_dependents(&self, pos: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut stack = vec![pos];
        while let Some(current) = stack.pop() {
            for &dependent in &self.order[current].dependent_indices {
                if seen.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }
        let mut result: Vec<usize> = seen.into_iter().collect();
        result.sort_unstable();
        result
    }

    /// Every target `pos` depends on, directly or transitively, in plan
    /// order.
    pub fn transitive_deps(&self, pos: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut stack = vec![pos];
        while let Some(current) = stack.pop() {
            for &dep in &self.order[current].dep_indices {
                if seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        let mut result: Vec<usize> = seen.into_iter().collect();
        result.sort_unstable();
        result
    }
}
