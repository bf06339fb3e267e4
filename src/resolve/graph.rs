use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::Serialize;

use crate::error::Reason;
use crate::maven::coordinates::{ArtifactIdentification, Coordinate, Dependency, Scope};
use crate::maven::version::Version;
use crate::resolve::compiler::CompiledArtifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `Pending -> Expanding -> Expanded | Excluded | CycleDetected | Unresolved`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeState {
    Pending,
    /// compiled, its dependencies are being resolved
    Expanding,
    Expanded,
    Excluded,
    CycleDetected,
    Unresolved,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeState::Pending | NodeState::Expanding)
    }
}

/// A version-bound artifact in the graph, i.e. a solution
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub ident: ArtifactIdentification,
    /// `None` if no version could be selected, or if the node was excluded before selection
    pub version: Option<Version>,
    pub state: NodeState,
    pub artifact: Option<Arc<CompiledArtifact>>,
    pub reason: Option<Reason>,
    pub depth: usize,
    pub scope: Scope,
    /// the exclusions in effect for this node's dependencies
    pub exclusions: BTreeSet<ArtifactIdentification>,
    /// ancestors on the path that first reached the node, root first
    pub path: Vec<Coordinate>,
    /// creation order, which is breadth-first visiting order
    pub order: usize,
    pub relocated_from: Option<Coordinate>,
    /// cleared when clash resolution discards the node or cuts it off from all roots
    pub active: bool,
}

impl Node {
    pub fn coordinate(&self) -> Option<Coordinate> {
        self.version.as_ref().map(|v| self.ident.with_version(v.clone()))
    }

    /// The path from the root to this node, inclusive
    pub fn full_path(&self) -> Vec<Coordinate> {
        let mut path = self.path.clone();
        path.extend(self.coordinate());
        path
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    /// `None` for the edges representing root requests
    pub from: Option<NodeId>,
    pub to: NodeId,
    pub dependency: Dependency,
    pub depth: usize,
    pub order: usize,
}

type NodeKey = (Coordinate, Scope, BTreeSet<ArtifactIdentification>);

/// Arena of solutions. Nodes are never removed, only deactivated, so `NodeId`s stay valid for the
///  lifetime of the graph.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<NodeKey, NodeId>,
}

impl DependencyGraph {
    pub fn new() -> DependencyGraph {
        Default::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_node(
        &mut self,
        ident: ArtifactIdentification,
        version: Option<Version>,
        state: NodeState,
        scope: Scope,
        depth: usize,
        path: Vec<Coordinate>,
        exclusions: BTreeSet<ArtifactIdentification>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            ident,
            version,
            state,
            artifact: None,
            reason: None,
            depth,
            scope,
            exclusions,
            path,
            order: id.0,
            relocated_from: None,
            active: true,
        });
        id
    }

    pub fn add_edge(&mut self, from: Option<NodeId>, to: NodeId, dependency: Dependency, depth: usize) {
        let order = self.edges.len();
        self.edges.push(Edge { from, to, dependency, depth, order });
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.active)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Nodes can be shared by all paths that reach the same coordinate with the same scope and
    ///  the same exclusions
    pub fn lookup(&self, coordinate: &Coordinate, scope: Scope, exclusions: &BTreeSet<ArtifactIdentification>) -> Option<NodeId> {
        self.index.get(&(coordinate.clone(), scope, exclusions.clone())).copied()
    }

    pub fn memoize(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        if let Some(coordinate) = node.coordinate() {
            self.index.insert((coordinate, node.scope, node.exclusions.clone()), id);
        }
    }

    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.to == id && self.is_edge_active(e))
    }

    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == Some(id))
    }

    pub fn roots(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.from.is_none())
    }

    fn is_edge_active(&self, edge: &Edge) -> bool {
        edge.from.map(|f| self.nodes[f.0].active).unwrap_or(true)
    }

    /// Redirects all edges pointing at `loser` to `winner`, and deactivates `loser`
    pub fn rebind(&mut self, loser: NodeId, winner: NodeId) {
        for edge in self.edges.iter_mut().filter(|e| e.to == loser) {
            edge.to = winner;
        }
        self.nodes[loser.0].active = false;
    }

    /// Deactivates every node that can no longer be reached from a root. Returns the number of
    ///  nodes that were deactivated.
    pub fn prune_unreachable(&mut self) -> usize {
        let mut reached = vec![false; self.nodes.len()];
        let mut queue: VecDeque<NodeId> = self.roots().map(|e| e.to).collect();
        while let Some(id) = queue.pop_front() {
            if reached[id.0] || !self.nodes[id.0].active {
                continue;
            }
            reached[id.0] = true;
            queue.extend(self.outgoing(id).map(|e| e.to));
        }

        let mut pruned = 0;
        for node in self.nodes.iter_mut() {
            if node.active && !reached[node.id.0] {
                node.active = false;
                pruned += 1;
            }
        }
        pruned
    }

    /// The nodes on a shortest edge path from `from` to `to`, both included
    pub fn route(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let mut predecessor: HashMap<NodeId, NodeId> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        while let Some(id) = queue.pop_front() {
            if id == to {
                let mut route = vec![to];
                let mut current = to;
                while let Some(&previous) = predecessor.get(&current) {
                    route.push(previous);
                    current = previous;
                }
                route.reverse();
                return Some(route);
            }
            for edge in self.outgoing(id) {
                if edge.to != from && !predecessor.contains_key(&edge.to) {
                    predecessor.insert(edge.to, id);
                    queue.push_back(edge.to);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use crate::maven::range::VersionRange;
    use super::*;

    fn add(graph: &mut DependencyGraph, from: Option<NodeId>, coordinate: &str) -> NodeId {
        let coordinate = Coordinate::parse(coordinate).unwrap();
        let depth = from.map(|f| graph.node(f).depth + 1).unwrap_or(0);
        let path = from.map(|f| graph.node(f).full_path()).unwrap_or_default();
        let id = graph.add_node(coordinate.ident.clone(), Some(coordinate.version.clone()), NodeState::Expanded, Scope::Compile, depth, path, BTreeSet::new());
        graph.memoize(id);
        let dependency = Dependency::new(coordinate.ident.clone(), VersionRange::Soft(coordinate.version.clone()));
        graph.add_edge(from, id, dependency, depth);
        id
    }

    #[test]
    fn test_rebind_and_prune() {
        let mut graph = DependencyGraph::new();
        let a = add(&mut graph, None, "g:a#1");
        let b = add(&mut graph, Some(a), "g:b#1");
        let x1 = add(&mut graph, Some(a), "g:x#1");
        let x2 = add(&mut graph, Some(b), "g:x#2");
        let y = add(&mut graph, Some(x1), "g:y#1");

        assert_eq!(graph.node(x2).full_path().len(), 3);
        assert_eq!(graph.lookup(&Coordinate::parse("g:x#2").unwrap(), Scope::Compile, &BTreeSet::new()), Some(x2));

        graph.rebind(x1, x2);
        assert_eq!(graph.incoming(x2).count(), 2);
        assert_eq!(graph.prune_unreachable(), 1);
        assert!(!graph.node(x1).active);
        assert!(!graph.node(y).active);

        let active: Vec<_> = graph.active_nodes().map(|n| n.id).collect();
        assert_eq!(active, vec![a, b, x2]);
    }

    #[test]
    fn test_prune_survives_cycles() {
        let mut graph = DependencyGraph::new();
        let a = add(&mut graph, None, "g:a#1");
        let b = add(&mut graph, Some(a), "g:b#1");
        graph.add_edge(Some(b), a, Dependency::new(ArtifactIdentification::new("g", "a"), VersionRange::Any), 2);

        assert_eq!(graph.prune_unreachable(), 0);
        assert_eq!(graph.roots().count(), 1);
    }

    #[test]
    fn test_route() {
        let mut graph = DependencyGraph::new();
        let a = add(&mut graph, None, "g:a#1");
        let b = add(&mut graph, Some(a), "g:b#1");
        let c = add(&mut graph, Some(b), "g:c#1");
        let d = add(&mut graph, None, "g:d#1");

        assert_eq!(graph.route(a, c), Some(vec![a, b, c]));
        assert_eq!(graph.route(b, b), Some(vec![b]));
        assert_eq!(graph.route(c, a), None);
        assert_eq!(graph.route(a, d), None);
    }
}
