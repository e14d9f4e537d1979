//! Dependency Graph Store
//!
//! Directed `caller → callee` graph built incrementally from trace batches.
//!
//! - Arena storage (petgraph): units are node indices, edges are index pairs,
//!   so cyclic module graphs never create ownership cycles
//! - Append-only: units and edges are never removed during a session
//! - Versioned: every ingest that adds an edge bumps an atomic counter that
//!   readers can observe without taking the lock
//! - Deterministic: neighbors are reported in order of first discovery

use parking_lot::RwLock;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::errors::GraphError;
use crate::models::{Edge, EdgeKind, EdgeStrength, GraphVersion, UnitOrigin};

/// Edge rejected during ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidEdge {
    /// Position of the edge in the submitted batch
    pub index: usize,
    pub edge: Edge,
    pub reason: String,
}

impl From<&InvalidEdge> for GraphError {
    fn from(invalid: &InvalidEdge) -> Self {
        GraphError::InvalidEdge {
            index: invalid.index,
            reason: invalid.reason.clone(),
        }
    }
}

/// Outcome of one ingest batch (partial success is normal)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// Graph version after the batch
    pub version: GraphVersion,
    /// Edges that were new to the graph
    pub added: usize,
    /// Edges already present (coalesced)
    pub duplicates: usize,
    /// Edges rejected with their reason
    pub errors: Vec<InvalidEdge>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
struct UnitNode {
    name: String,
    origin: UnitOrigin,
}

#[derive(Debug, Clone, Copy)]
struct EdgeMeta {
    kind: EdgeKind,
    strength: EdgeStrength,
}

#[derive(Debug, Default)]
struct GraphInner {
    graph: DiGraph<UnitNode, EdgeMeta>,
    /// Unit name → node index
    index: HashMap<String, NodeIndex>,
    /// Coalescing set (edge identity is the full tuple)
    edge_set: HashSet<(NodeIndex, NodeIndex, EdgeKind, EdgeStrength)>,
}

impl GraphInner {
    fn upsert_unit(&mut self, name: &str, origin: UnitOrigin) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            let node = &mut self.graph[idx];
            node.origin = node.origin.promote(origin);
            return idx;
        }

        let idx = self.graph.add_node(UnitNode {
            name: name.to_string(),
            origin,
        });
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Neighbors in discovery order, optionally restricted to definite edges
    fn neighbors(
        &self,
        idx: NodeIndex,
        direction: Direction,
        max_strength: EdgeStrength,
    ) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();
        let mut result: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, direction)
            .filter(|edge| edge.weight().strength <= max_strength)
            .map(|edge| match direction {
                Direction::Outgoing => edge.target(),
                Direction::Incoming => edge.source(),
            })
            .filter(|other| seen.insert(*other))
            .collect();

        // Node indices are assigned in order of first discovery
        result.sort();
        result
    }

    fn names(&self, indices: &[NodeIndex]) -> Vec<String> {
        indices
            .iter()
            .map(|idx| self.graph[*idx].name.clone())
            .collect()
    }
}

/// Dependency Graph Store
pub struct DependencyGraph {
    inner: RwLock<GraphInner>,
    version: AtomicU64,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner::default()),
            version: AtomicU64::new(0),
        }
    }

    /// Build a graph from one batch (convenience for fixtures)
    pub fn from_edges(edges: impl IntoIterator<Item = Edge>) -> Self {
        let graph = Self::new();
        graph.ingest(edges.into_iter().collect());
        graph
    }

    /// Merge a batch of trace edges
    ///
    /// Invalid edges are dropped and reported; valid edges are applied.
    /// The version is bumped once per batch, and only if the edge set grew.
    pub fn ingest(&self, edges: Vec<Edge>) -> IngestReport {
        let mut errors = Vec::new();
        let mut added = 0;
        let mut duplicates = 0;

        let mut inner = self.inner.write();

        for (index, edge) in edges.into_iter().enumerate() {
            if let Some(reason) = edge.validate() {
                warn!("Dropping invalid trace edge #{}: {}", index, reason);
                errors.push(InvalidEdge {
                    index,
                    edge,
                    reason,
                });
                continue;
            }

            let caller = inner.upsert_unit(&edge.caller, UnitOrigin::Traced);
            let callee = inner.upsert_unit(&edge.callee, UnitOrigin::Traced);

            if inner
                .edge_set
                .insert((caller, callee, edge.kind, edge.strength))
            {
                inner.graph.add_edge(
                    caller,
                    callee,
                    EdgeMeta {
                        kind: edge.kind,
                        strength: edge.strength,
                    },
                );
                added += 1;
            } else {
                duplicates += 1;
            }
        }

        // Bump while still holding the write lock so readers never see new
        // edges under an old version.
        let version = if added > 0 {
            self.version.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.version.load(Ordering::SeqCst)
        };
        drop(inner);

        debug!(
            "Ingested trace batch: {} added, {} duplicates, {} invalid (version {})",
            added,
            duplicates,
            errors.len(),
            version
        );

        IngestReport {
            version,
            added,
            duplicates,
            errors,
        }
    }

    /// Current graph version
    pub fn version(&self) -> GraphVersion {
        self.version.load(Ordering::SeqCst)
    }

    /// Mark a unit as resolvable without adding edges (no version bump)
    pub fn register_unit(&self, name: &str) {
        if name.trim().is_empty() {
            return;
        }
        self.inner.write().upsert_unit(name, UnitOrigin::Registered);
    }

    /// Units that `unit` directly calls/uses
    pub fn direct_dependencies(&self, unit: &str) -> Vec<String> {
        self.adjacent(unit, Direction::Outgoing, EdgeStrength::Conservative)
    }

    /// Direct dependencies following only edges at or below `max_strength`
    pub fn direct_dependencies_with(&self, unit: &str, max_strength: EdgeStrength) -> Vec<String> {
        self.adjacent(unit, Direction::Outgoing, max_strength)
    }

    /// Units that directly depend on `unit`
    pub fn reverse_dependencies(&self, unit: &str) -> Vec<String> {
        self.adjacent(unit, Direction::Incoming, EdgeStrength::Conservative)
    }

    /// Breadth-first closure of dependencies
    ///
    /// `max_depth = 0` returns direct dependencies only; a negative depth is
    /// unbounded. The start unit is never part of the result, even on cycles.
    pub fn transitive_dependencies(&self, unit: &str, max_depth: i32) -> Vec<String> {
        let inner = self.inner.read();
        let Some(start) = inner.index.get(unit).copied() else {
            drop(inner);
            self.register_stub(unit);
            return Vec::new();
        };

        let mut visited = HashSet::from([start]);
        let mut order = Vec::new();
        let mut queue = VecDeque::from([(start, -1i64)]);

        while let Some((current, level)) = queue.pop_front() {
            // `level` is the depth of `current`; the start sits at -1
            if max_depth >= 0 && level >= i64::from(max_depth) {
                continue;
            }

            for next in inner.neighbors(current, Direction::Outgoing, EdgeStrength::Conservative) {
                if visited.insert(next) {
                    order.push(next);
                    queue.push_back((next, level + 1));
                }
            }
        }

        inner.names(&order)
    }

    /// Whether the unit exists at all (stubs included)
    pub fn contains_unit(&self, unit: &str) -> bool {
        self.inner.read().index.contains_key(unit)
    }

    /// Whether the unit was traced or registered (stubs excluded)
    pub fn is_known(&self, unit: &str) -> bool {
        self.origin(unit).map_or(false, |origin| origin.is_known())
    }

    pub fn origin(&self, unit: &str) -> Option<UnitOrigin> {
        let inner = self.inner.read();
        inner.index.get(unit).map(|idx| inner.graph[*idx].origin)
    }

    /// All unit names in discovery order
    pub fn units(&self) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .graph
            .node_indices()
            .map(|idx| inner.graph[idx].name.clone())
            .collect()
    }

    /// All edges in insertion order
    pub fn edges(&self) -> Vec<Edge> {
        let inner = self.inner.read();
        inner
            .graph
            .edge_references()
            .map(|edge| Edge {
                caller: inner.graph[edge.source()].name.clone(),
                callee: inner.graph[edge.target()].name.clone(),
                kind: edge.weight().kind,
                strength: edge.weight().strength,
            })
            .collect()
    }

    pub fn unit_count(&self) -> usize {
        self.inner.read().graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().graph.edge_count()
    }

    /// Strongly connected components with more than one unit
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let inner = self.inner.read();
        tarjan_scc(&inner.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|mut scc| {
                scc.sort();
                inner.names(&scc)
            })
            .collect()
    }

    fn adjacent(&self, unit: &str, direction: Direction, max_strength: EdgeStrength) -> Vec<String> {
        let inner = self.inner.read();
        let Some(idx) = inner.index.get(unit).copied() else {
            drop(inner);
            self.register_stub(unit);
            return Vec::new();
        };

        let neighbors = inner.neighbors(idx, direction, max_strength);
        inner.names(&neighbors)
    }

    fn register_stub(&self, unit: &str) {
        if unit.trim().is_empty() {
            return;
        }
        debug!("Registering stub unit {}", unit);
        self.inner.write().upsert_unit(unit, UnitOrigin::Stub);
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
