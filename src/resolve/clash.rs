use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::maven::coordinates::{ArtifactIdentification, Coordinate};
use crate::maven::version::Version;
use crate::resolve::graph::{DependencyGraph, NodeId, NodeState};

/// One version of a clashing artifact, represented by the node that was visited first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClashCandidate {
    pub version: Version,
    pub path: Vec<Coordinate>,
    pub depth: usize,
    #[serde(skip)]
    pub order: usize,
    #[serde(skip)]
    pub node: NodeId,
}

/// Several versions of the same artifact in one graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyClash {
    pub artifact: ArtifactIdentification,
    /// in visiting order
    pub candidates: Vec<ClashCandidate>,
}

impl DependencyClash {
    fn nearest(&self) -> (usize, usize) {
        self.candidates.iter()
            .map(|c| (c.depth, c.order))
            .min()
            .unwrap_or((usize::MAX, usize::MAX))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedClash {
    #[serde(flatten)]
    pub clash: DependencyClash,
    pub winner: Version,
}

/// Picks the winner among a clash's candidates, returning its index
pub trait DominanceStrategy: Send + Sync {
    fn choose(&self, candidates: &[ClashCandidate]) -> usize;
}

/// The candidate nearest to the roots
pub struct FirstVisitWins;

impl DominanceStrategy for FirstVisitWins {
    fn choose(&self, candidates: &[ClashCandidate]) -> usize {
        candidates.iter()
            .enumerate()
            .min_by_key(|(_, c)| c.order)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

/// The highest version. Versions that are semantically equal (`1.0` and `1.0.0`) are decided by
///  visiting order.
pub struct HighestVersionWins;

impl DominanceStrategy for HighestVersionWins {
    fn choose(&self, candidates: &[ClashCandidate]) -> usize {
        candidates.iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.version.compare_semantic(&b.version).then(b.order.cmp(&a.order)))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClashStrategy {
    #[default]
    HighestVersionWins,
    FirstVisitWins,
}

impl ClashStrategy {
    pub fn dominance(&self) -> &'static dyn DominanceStrategy {
        match self {
            ClashStrategy::HighestVersionWins => &HighestVersionWins,
            ClashStrategy::FirstVisitWins => &FirstVisitWins,
        }
    }
}

impl FromStr for ClashStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "highest" | "highest-version-wins" => Ok(ClashStrategy::HighestVersionWins),
            "first" | "first-visit-wins" => Ok(ClashStrategy::FirstVisitWins),
            other => Err(format!("unknown clash strategy {:?}, expected 'highest' or 'first'", other)),
        }
    }
}

/// Whether artifacts that lost a clash are walked again against the winners' dependencies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReResolution {
    /// the winner's subtree is what the first walk produced
    #[default]
    Keep,
    /// walk a second time with all winners pinned
    Full,
}

/// All clashes in the active part of a graph, nearest to the roots first. Nodes of `pinned`
///  artifacts are ignored.
pub fn detect(graph: &DependencyGraph, pinned: &BTreeSet<ArtifactIdentification>) -> Vec<DependencyClash> {
    let mut by_artifact: BTreeMap<&ArtifactIdentification, BTreeMap<&Version, ClashCandidate>> = BTreeMap::new();
    for node in graph.active_nodes() {
        if !matches!(node.state, NodeState::Expanded | NodeState::Unresolved) || pinned.contains(&node.ident) {
            continue;
        }
        let Some(version) = &node.version else {
            continue;
        };
        let candidates = by_artifact.entry(&node.ident).or_default();
        let replace = candidates.get(version).map(|c| node.order < c.order).unwrap_or(true);
        if replace {
            candidates.insert(version, ClashCandidate {
                version: version.clone(),
                path: node.full_path(),
                depth: node.depth,
                order: node.order,
                node: node.id,
            });
        }
    }

    let mut clashes: Vec<DependencyClash> = by_artifact.into_iter()
        .filter(|(_, candidates)| candidates.len() > 1)
        .map(|(artifact, candidates)| {
            let mut candidates: Vec<ClashCandidate> = candidates.into_values().collect();
            candidates.sort_by_key(|c| c.order);
            DependencyClash { artifact: artifact.clone(), candidates }
        })
        .collect();
    clashes.sort_by_key(|c| c.nearest());
    clashes
}

/// Resolves clashes one at a time, nearest first: every node of a losing version is replaced by
///  the winner, and whatever is no longer reachable from a root is pruned before the next
///  clash is looked for, so losers' dependencies do not take part in later decisions.
pub fn resolve_all(graph: &mut DependencyGraph, strategy: &dyn DominanceStrategy, pinned: &BTreeSet<ArtifactIdentification>) -> Vec<ResolvedClash> {
    let mut resolved = Vec::new();
    while let Some(clash) = detect(graph, pinned).into_iter().next() {
        let winner = &clash.candidates[strategy.choose(&clash.candidates)];
        let winner_version = winner.version.clone();
        let winner_node = winner.node;
        debug!("{} versions of {} clash, {} wins", clash.candidates.len(), clash.artifact, winner_version);

        let losers: Vec<NodeId> = graph.active_nodes()
            .filter(|n| n.ident == clash.artifact && n.version.is_some() && n.version.as_ref() != Some(&winner_version))
            .map(|n| n.id)
            .collect();
        for loser in losers {
            graph.rebind(loser, winner_node);
        }
        let pruned = graph.prune_unreachable();
        if pruned > 0 {
            debug!("pruned {} nodes after resolving the clash on {}", pruned, clash.artifact);
        }

        resolved.push(ResolvedClash { clash, winner: winner_version });
    }
    resolved
}
