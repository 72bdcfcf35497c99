//! Partial ordering of commodities through strongly connected components.
//!
//! The dependency graph has one node per matrix column and an edge i -> j
//! whenever column j consumes commodity i. Cyclic components (and singletons
//! with a self-loop) form the *background*: the block that must be inverted
//! as a whole. Everything else is *foreground* and can be solved column by
//! column along the condensation order, producers before consumers.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::matrix::{MatrixSystem, SparseMatrix};

/// One strongly connected component of the commodity graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scc {
    /// Member columns, ascending.
    pub members: Vec<usize>,
    pub background: bool,
    pub self_loop: bool,
}

/// SCC partition plus the derived orderings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentOrdering {
    /// Components in final order: background first, then foreground, each in
    /// condensation-topological order (producers before consumers) with a
    /// lowest-member-first tie-break.
    sccs: Vec<Scc>,
    /// Column -> position in `sccs`.
    scc_of: Vec<usize>,
    /// Columns flattened in component order.
    order: Vec<usize>,
    /// Per component: the components it depends on (its suppliers).
    dependencies: Vec<Vec<usize>>,
}

impl ComponentOrdering {
    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn sccs(&self) -> &[Scc] {
        &self.sccs
    }

    pub fn scc_of(&self, column: usize) -> usize {
        self.scc_of[column]
    }

    /// Columns sharing a component with the given column, itself included.
    pub fn peers(&self, column: usize) -> &[usize] {
        &self.sccs[self.scc_of[column]].members
    }

    pub fn is_background(&self, column: usize) -> bool {
        self.sccs[self.scc_of[column]].background
    }

    /// Columns in the partial order: background block first, foreground in
    /// topological order after it.
    pub fn ordering(&self) -> &[usize] {
        &self.order
    }

    pub fn background(&self) -> Vec<usize> {
        self.partition(true)
    }

    pub fn foreground(&self) -> Vec<usize> {
        self.partition(false)
    }

    fn partition(&self, background: bool) -> Vec<usize> {
        self.sccs
            .iter()
            .filter(|scc| scc.background == background)
            .flat_map(|scc| scc.members.iter().copied())
            .collect()
    }

    /// Number of disjoint background components. More than one is a
    /// structural anomaly for a conventional LCI database.
    pub fn background_components(&self) -> usize {
        self.sccs.iter().filter(|scc| scc.background).count()
    }

    // ── Traversals ──────────────────────────────────────────────────────────

    /// Non-background components the given column depends on, itself first,
    /// in breadth-first supplier order. Empty for background columns. This is
    /// the component list needed to expand a foreground tree.
    pub fn downstream_of(&self, column: usize) -> Vec<usize> {
        let start = self.scc_of[column];
        if self.sccs[start].background {
            return Vec::new();
        }
        let mut queue = std::collections::VecDeque::from([start]);
        let mut seen: Vec<usize> = Vec::new();
        let mut visited = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            seen.push(current);
            for &dep in &self.dependencies[current] {
                if !self.sccs[dep].background && !visited.contains(&dep) {
                    queue.push_back(dep);
                }
            }
        }
        seen
    }

    /// Extract the square interior sub-block of one component, for staged
    /// inversion. Rows/columns follow the component's member order.
    pub fn scc_block(&self, a: &SparseMatrix, scc: usize) -> SparseMatrix {
        let members = &self.sccs[scc].members;
        let position: std::collections::HashMap<usize, usize> = members
            .iter()
            .enumerate()
            .map(|(i, &col)| (col, i))
            .collect();
        let mut block = SparseMatrix::new(members.len(), members.len());
        for (local_col, &col) in members.iter().enumerate() {
            for &(row, value) in a.column(col) {
                if let Some(&local_row) = position.get(&row) {
                    block.add(local_row, local_col, value);
                }
            }
        }
        block.finalize();
        block
    }
}

/// Directed commodity dependency graph derived from the interior matrix.
pub struct ComponentGraph {
    graph: DiGraph<usize, ()>,
    nodes: Vec<NodeIndex>,
    self_loops: HashSet<usize>,
}

impl ComponentGraph {
    /// Build the graph from the assembled system: edge i -> j for every
    /// off-diagonal nonzero A[i, j].
    pub fn from_system(system: &MatrixSystem) -> Self {
        let n = system.a.ncols();
        let mut graph = DiGraph::with_capacity(n, system.a.nnz());
        let nodes: Vec<NodeIndex> = (0..n).map(|i| graph.add_node(i)).collect();
        for col in 0..n {
            for &(row, _) in system.a.column(col) {
                if row != col {
                    graph.add_edge(nodes[row], nodes[col], ());
                }
            }
        }
        Self {
            graph,
            nodes,
            self_loops: system.self_loops.clone(),
        }
    }

    /// Run Tarjan's algorithm and order the condensation DAG.
    ///
    /// Deterministic given deterministic column order: topological ties break
    /// toward the component containing the lowest column index.
    pub fn find_components(&self) -> ComponentOrdering {
        let raw = petgraph::algo::tarjan_scc(&self.graph);
        let n = self.nodes.len();

        // Components with sorted members, indexed by discovery.
        let mut members: Vec<Vec<usize>> = raw
            .iter()
            .map(|component| {
                let mut columns: Vec<usize> =
                    component.iter().map(|&ix| self.graph[ix]).collect();
                columns.sort_unstable();
                columns
            })
            .collect();
        let mut component_of = vec![0usize; n];
        for (i, columns) in members.iter().enumerate() {
            for &col in columns {
                component_of[col] = i;
            }
        }

        // Condensation edges and in-degrees, deduplicated.
        let k = members.len();
        let mut successors: Vec<HashSet<usize>> = vec![HashSet::new(); k];
        let mut dependencies: Vec<HashSet<usize>> = vec![HashSet::new(); k];
        let mut indegree = vec![0usize; k];
        for edge in self.graph.edge_indices() {
            let Some((source, target)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let from = component_of[self.graph[source]];
            let to = component_of[self.graph[target]];
            if from != to && successors[from].insert(to) {
                dependencies[to].insert(from);
                indegree[to] += 1;
            }
        }

        // Kahn with a min-heap keyed on the lowest member column.
        let mut heap: BinaryHeap<Reverse<(usize, usize)>> = (0..k)
            .filter(|&c| indegree[c] == 0)
            .map(|c| Reverse((members[c][0], c)))
            .collect();
        let mut topo = Vec::with_capacity(k);
        while let Some(Reverse((_, component))) = heap.pop() {
            topo.push(component);
            for &next in &successors[component] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    heap.push(Reverse((members[next][0], next)));
                }
            }
        }

        // Background first, both halves keeping topological order.
        let is_background = |c: usize| is_background_columns(&members[c], &self.self_loops);
        let ordered: Vec<usize> = topo
            .iter()
            .copied()
            .filter(|&c| is_background(c))
            .chain(topo.iter().copied().filter(|&c| !is_background(c)))
            .collect();

        let mut sccs = Vec::with_capacity(k);
        let mut final_index = vec![0usize; k];
        for (pos, &component) in ordered.iter().enumerate() {
            final_index[component] = pos;
            let columns = std::mem::take(&mut members[component]);
            sccs.push(Scc {
                background: is_background_columns(&columns, &self.self_loops),
                self_loop: columns.len() == 1 && self.self_loops.contains(&columns[0]),
                members: columns,
            });
        }

        let scc_of: Vec<usize> = component_of.iter().map(|&c| final_index[c]).collect();
        let order: Vec<usize> = sccs
            .iter()
            .flat_map(|scc| scc.members.iter().copied())
            .collect();
        let dependencies: Vec<Vec<usize>> = ordered
            .iter()
            .map(|&component| {
                let mut deps: Vec<usize> = dependencies[component]
                    .iter()
                    .map(|&d| final_index[d])
                    .collect();
                deps.sort_unstable();
                deps
            })
            .collect();

        ComponentOrdering {
            sccs,
            scc_of,
            order,
            dependencies,
        }
    }
}

fn is_background_columns(columns: &[usize], self_loops: &HashSet<usize>) -> bool {
    columns.len() > 1 || columns.first().is_some_and(|col| self_loops.contains(col))
}
