//! Dependency graph builder, cycle detection, and parallel wave computation.
//!
//! Steps are addressed by their declaration index (an arena of indices), so
//! the scheduler's readiness bookkeeping is plain `Vec` indexing. `petgraph`
//! stores the edges; cycle detection is a three-color depth-first search so
//! that the reported error names one concrete cycle.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use stepgraph_types::workflow::{GraphError, StepDefinition};

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

/// Validated, read-only dependency graph over a workflow's steps.
///
/// Node `i` is the step at declaration index `i`. An edge `u -> v` means
/// step `v` depends on step `u`.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<usize, ()>,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build and validate the graph for `steps`.
    ///
    /// Fails with `DuplicateStepId` if two steps share an ID,
    /// `UnknownDependency` for the first `depends_on` entry that names no
    /// step, and `CyclicDependency` if the graph has a cycle. Repeated
    /// entries in a `depends_on` list count once.
    pub fn build(steps: &[StepDefinition]) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateStepId {
                    step_id: step.id.clone(),
                });
            }
        }

        let mut graph = DiGraph::<usize, ()>::with_capacity(steps.len(), steps.len());
        for i in 0..steps.len() {
            graph.add_node(i);
        }

        let mut dependencies = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            let mut deps = Vec::with_capacity(step.depends_on.len());
            let mut seen = HashSet::new();
            for dep in &step.depends_on {
                let from = *index.get(dep.as_str()).ok_or_else(|| {
                    GraphError::UnknownDependency {
                        step_id: step.id.clone(),
                        missing_id: dep.clone(),
                    }
                })?;
                if seen.insert(from) {
                    graph.add_edge(NodeIndex::new(from), NodeIndex::new(i), ());
                    deps.push(from);
                }
            }
            deps.sort_unstable();
            dependencies.push(deps);
        }

        // petgraph yields neighbors in reverse insertion order; sort so that
        // traversal (and therefore the reported cycle) is deterministic.
        let dependents: Vec<Vec<usize>> = (0..steps.len())
            .map(|i| {
                let mut out: Vec<usize> = graph
                    .neighbors_directed(NodeIndex::new(i), Direction::Outgoing)
                    .map(|n| graph[n])
                    .collect();
                out.sort_unstable();
                out
            })
            .collect();

        let ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();

        if let Some(cycle) = find_cycle(&dependents) {
            return Err(GraphError::CyclicDependency {
                cycle: cycle.into_iter().map(|i| ids[i].clone()).collect(),
            });
        }

        Ok(Self {
            graph,
            ids,
            index,
            dependencies,
            dependents,
        })
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Step ID at `idx`.
    pub fn id(&self, idx: usize) -> &str {
        &self.ids[idx]
    }

    /// Declaration index of the step with `id`.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Direct dependencies of `idx`, ascending.
    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    /// Steps that list `idx` in `depends_on`, ascending.
    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Number of distinct dependencies per step. The scheduler's counters
    /// start from these.
    pub fn in_degrees(&self) -> Vec<usize> {
        self.dependencies.iter().map(Vec::len).collect()
    }

    /// Steps with no dependencies, in declaration order.
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.dependencies
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
    }

    /// Group steps into waves by dependency depth.
    ///
    /// Every step in wave `n` depends only on steps in waves `< n`, so each
    /// wave's steps can run concurrently. Within a wave, steps keep
    /// declaration order. The scheduler does not execute wave by wave (a
    /// step starts as soon as its own dependencies are terminal); this is the
    /// parallelism profile shown by tooling.
    pub fn waves(&self) -> Vec<Vec<usize>> {
        if self.is_empty() {
            return vec![];
        }

        let mut depth = vec![0usize; self.len()];
        let mut remaining = self.in_degrees();
        let mut frontier: Vec<usize> = self.roots().collect();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for &node in &frontier {
                for &dependent in self.dependents(node) {
                    depth[dependent] = depth[dependent].max(depth[node] + 1);
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            frontier = next;
        }

        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut waves = vec![Vec::new(); max_depth + 1];
        for (idx, d) in depth.into_iter().enumerate() {
            waves[d].push(idx);
        }
        waves
    }

    /// IDs of every step `id` transitively depends on, in declaration order.
    ///
    /// Returns an empty vec for unknown IDs.
    pub fn transitive_dependencies(&self, id: &str) -> Vec<&str> {
        let Some(start) = self.index_of(id) else {
            return vec![];
        };

        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, NodeIndex::new(start));
        let mut found = Vec::new();
        while let Some(node) = dfs.next(reversed) {
            let idx = self.graph[node];
            if idx != start {
                found.push(idx);
            }
        }
        found.sort_unstable();
        found.into_iter().map(|i| self.ids[i].as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Three-color iterative DFS. Returns the first cycle found as a closed
/// path (`[a, b, a]`) following dependency edges.
fn find_cycle(dependents: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; dependents.len()];
    // (node, cursor into its dependents); the stack is the current path.
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..dependents.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::InProgress;
        stack.push((root, 0));

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let Some(&next) = dependents[node].get(frame.1) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match marks[next] {
                Mark::Unvisited => {
                    marks[next] = Mark::InProgress;
                    stack.push((next, 0));
                }
                Mark::InProgress => {
                    let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                    let mut cycle: Vec<usize> = stack[start..].iter().map(|&(n, _)| n).collect();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Done => {}
            }
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
