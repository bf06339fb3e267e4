use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{CycleKind, Error, Reason};
use crate::maven::coordinates::{ArtifactIdentification, Coordinate, Dependency, Scope};
use crate::maven::range::VersionRange;
use crate::maven::version::Version;
use crate::resolve::compiler::{ArtifactCompiler, CompiledArtifact};
use crate::resolve::graph::{DependencyGraph, NodeId, NodeState};

/// What a walk includes
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// scopes to include; `test` and `provided` only ever apply to direct dependencies
    pub scopes: BTreeSet<Scope>,
    /// patterns excluded everywhere in the graph
    pub exclusions: BTreeSet<ArtifactIdentification>,
    pub include_optional: bool,
    /// fail the walk on the first cycle instead of recording it
    pub strict: bool,
    /// versions that override whatever a dependency asks for
    pub pins: BTreeMap<ArtifactIdentification, Version>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            scopes: [Scope::Compile, Scope::Runtime].into_iter().collect(),
            exclusions: BTreeSet::new(),
            include_optional: false,
            strict: false,
            pins: BTreeMap::new(),
        }
    }
}

/// An artifact that declared itself moved, and where the walk went instead
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RelocationRecord {
    pub from: Coordinate,
    pub to: Coordinate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug)]
pub struct WalkOutcome {
    pub graph: DependencyGraph,
    pub cycles: Vec<Reason>,
    pub relocations: Vec<RelocationRecord>,
}

/// A dependency waiting to be resolved, together with the context of the path that declared it
#[derive(Debug, Clone)]
struct PendingDependency {
    from: Option<NodeId>,
    dependency: Dependency,
    scope: Scope,
    path: Vec<Coordinate>,
    /// exclusions inherited from the path, not including the dependency's own
    exclusions: BTreeSet<ArtifactIdentification>,
    depth: usize,
}

enum Prepared {
    Excluded,
    Cycle(Reason),
    Unresolved { version: Option<Version>, reason: Reason },
    Resolved {
        artifact: Arc<CompiledArtifact>,
        relocations: Vec<RelocationRecord>,
    },
}

/// Expands root coordinates into a [DependencyGraph], breadth first.
///
/// All dependencies of one level are resolved concurrently, but the results are merged into the
///  graph sequentially in declaration order, so the graph does not depend on task scheduling.
pub struct GraphWalker {
    compiler: Arc<ArtifactCompiler>,
    options: Arc<WalkOptions>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl GraphWalker {
    pub fn new(compiler: Arc<ArtifactCompiler>, options: WalkOptions, concurrency: usize, cancel: CancellationToken) -> GraphWalker {
        GraphWalker {
            compiler,
            options: Arc::new(options),
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    pub async fn walk(&self, roots: &[Coordinate]) -> Result<WalkOutcome, Error> {
        let mut graph = DependencyGraph::new();
        let mut cycles = Vec::new();
        let mut relocations: Vec<RelocationRecord> = Vec::new();

        let mut level: Vec<PendingDependency> = roots.iter()
            .map(|root| PendingDependency {
                from: None,
                dependency: Dependency::new(root.ident.clone(), VersionRange::Exact(root.version.clone())),
                scope: Scope::Compile,
                path: Vec::new(),
                exclusions: BTreeSet::new(),
                depth: 0,
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        while !level.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            trace!("resolving {} dependencies at depth {}", level.len(), level[0].depth);

            let prepared = self.prepare_level(&level, &semaphore).await?;

            let mut expanding = Vec::new();
            let mut next = Vec::new();
            for (pending, prepared) in level.into_iter().zip(prepared) {
                let target = pending.dependency.target.clone();
                match prepared {
                    Prepared::Excluded => {
                        trace!("excluded {} below {:?}", target, pending.path.last());
                        let id = graph.add_node(target, None, NodeState::Excluded, pending.scope, pending.depth, pending.path, pending.exclusions);
                        graph.add_edge(pending.from, id, pending.dependency, pending.depth);
                    }
                    Prepared::Cycle(reason) => {
                        self.add_cycle(&mut graph, &mut cycles, pending, reason)?;
                    }
                    Prepared::Unresolved { version, reason } => {
                        let exclusions = &pending.exclusions | &pending.dependency.exclusions;
                        let existing = version.as_ref()
                            .and_then(|v| graph.lookup(&target.with_version(v.clone()), pending.scope, &exclusions));
                        let id = match existing {
                            Some(id) => id,
                            None => {
                                debug!("unresolved: {}", reason);
                                let memoize = version.is_some();
                                let id = graph.add_node(target, version, NodeState::Unresolved, pending.scope, pending.depth, pending.path, exclusions);
                                graph.node_mut(id).reason = Some(reason);
                                if memoize {
                                    graph.memoize(id);
                                }
                                id
                            }
                        };
                        graph.add_edge(pending.from, id, pending.dependency, pending.depth);
                    }
                    Prepared::Resolved { artifact, relocations: hops } => {
                        let coordinate = artifact.coordinate.clone();
                        let exclusions = &pending.exclusions | &pending.dependency.exclusions;
                        for hop in &hops {
                            if !relocations.contains(hop) {
                                relocations.push(hop.clone());
                            }
                        }

                        if let Some(id) = graph.lookup(&coordinate, pending.scope, &exclusions) {
                            // a shared node may already lead back to the declaring node
                            match closing_cycle(&graph, pending.from, id) {
                                Some(reason) => self.add_cycle(&mut graph, &mut cycles, pending, reason)?,
                                None => graph.add_edge(pending.from, id, pending.dependency, pending.depth),
                            }
                            continue;
                        }

                        let id = graph.add_node(coordinate.ident.clone(), Some(coordinate.version.clone()), NodeState::Expanding, pending.scope, pending.depth, pending.path.clone(), exclusions.clone());
                        {
                            let node = graph.node_mut(id);
                            node.artifact = Some(artifact.clone());
                            node.relocated_from = hops.first().map(|h| h.from.clone());
                        }
                        graph.memoize(id);
                        graph.add_edge(pending.from, id, pending.dependency, pending.depth);
                        expanding.push(id);

                        let mut path = pending.path;
                        path.push(coordinate);
                        for dependency in &artifact.dependencies {
                            let Some(scope) = self.child_scope(pending.depth, pending.scope, dependency) else {
                                continue;
                            };
                            next.push(PendingDependency {
                                from: Some(id),
                                dependency: dependency.clone(),
                                scope,
                                path: path.clone(),
                                exclusions: exclusions.clone(),
                                depth: pending.depth + 1,
                            });
                        }
                    }
                }
            }

            // the dependencies of this level's nodes are all scheduled
            for id in expanding {
                graph.node_mut(id).state = NodeState::Expanded;
            }
            level = next;
        }

        debug!("walk finished with {} nodes, {} cycles", graph.nodes().len(), cycles.len());
        Ok(WalkOutcome { graph, cycles, relocations })
    }

    /// Records a cycle as a leaf node below the declaring node, or fails in strict mode
    fn add_cycle(&self, graph: &mut DependencyGraph, cycles: &mut Vec<Reason>, pending: PendingDependency, reason: Reason) -> Result<(), Error> {
        if self.options.strict {
            return Err(Error::Strict(reason));
        }
        debug!("{}", reason);
        let target = pending.dependency.target.clone();
        let version = cycle_version(&reason, &target);
        let id = graph.add_node(target, version, NodeState::CycleDetected, pending.scope, pending.depth, pending.path, pending.exclusions);
        graph.node_mut(id).reason = Some(reason.clone());
        graph.add_edge(pending.from, id, pending.dependency, pending.depth);
        if !cycles.contains(&reason) {
            cycles.push(reason);
        }
        Ok(())
    }

    /// The scope a dependency is included with, or `None` if it is filtered out
    fn child_scope(&self, parent_depth: usize, parent_scope: Scope, dependency: &Dependency) -> Option<Scope> {
        let scope = if parent_depth == 0 {
            dependency.scope
        }
        else {
            if dependency.optional && !self.options.include_optional {
                return None;
            }
            parent_scope.transitive(dependency.scope)?
        };
        if self.options.scopes.contains(&scope) {
            Some(scope)
        }
        else {
            None
        }
    }

    async fn prepare_level(&self, level: &[PendingDependency], semaphore: &Arc<Semaphore>) -> Result<Vec<Prepared>, Error> {
        let mut tasks = JoinSet::new();
        for (index, pending) in level.iter().enumerate() {
            let compiler = self.compiler.clone();
            let options = self.options.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let pending = pending.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, None);
                };
                if cancel.is_cancelled() {
                    return (index, None);
                }
                (index, Some(prepare(&compiler, &options, &pending).await))
            });
        }

        let mut results: Vec<Option<Prepared>> = level.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Some(prepared))) => results[index] = Some(prepared),
                Ok((_, None)) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("walker task failed: {}", e);
                    return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())));
                }
            }
        }
        results.into_iter()
            .map(|r| r.ok_or(Error::Cancelled))
            .collect()
    }
}

/// The version a cycle node is bound to: the last coordinate of the cycle's path
fn cycle_version(reason: &Reason, target: &ArtifactIdentification) -> Option<Version> {
    match reason {
        Reason::CyclicReference { path, .. } => path.last()
            .and_then(|c| Coordinate::parse(c).ok())
            .filter(|c| &c.ident == target)
            .map(|c| c.version),
        _ => None,
    }
}

/// The cycle an edge `from -> to` closes if `to` already leads back to `from`
fn closing_cycle(graph: &DependencyGraph, from: Option<NodeId>, to: NodeId) -> Option<Reason> {
    let from = from?;
    let route = graph.route(to, from)?;
    let kind = if from == to { CycleKind::Direct } else { CycleKind::Transitive };
    let mut path: Vec<String> = route.iter()
        .filter_map(|id| graph.node(*id).coordinate())
        .map(|c| c.to_string())
        .collect();
    path.extend(graph.node(to).coordinate().map(|c| c.to_string()));
    Some(Reason::CyclicReference { kind, path })
}

fn is_excluded(options: &WalkOptions, pending: &PendingDependency) -> bool {
    let target = &pending.dependency.target;
    pending.exclusions.iter()
        .chain(options.exclusions.iter())
        .any(|pattern| pattern.matches(target))
}

fn cycle(path: &[Coordinate], coordinate: &Coordinate) -> Option<Reason> {
    let first = path.iter().position(|c| c == coordinate)?;
    let kind = if path.last() == Some(coordinate) { CycleKind::Direct } else { CycleKind::Transitive };
    let mut cycle: Vec<String> = path[first..].iter().map(|c| c.to_string()).collect();
    cycle.push(coordinate.to_string());
    Some(Reason::CyclicReference { kind, path: cycle })
}

async fn prepare(compiler: &ArtifactCompiler, options: &WalkOptions, pending: &PendingDependency) -> Prepared {
    if is_excluded(options, pending) {
        return Prepared::Excluded;
    }

    let dependency = &pending.dependency;
    let version = match options.pins.get(&dependency.target) {
        Some(pinned) => pinned.clone(),
        None => match compiler.select_version(dependency).await {
            Ok(version) => version,
            Err(reason) => return Prepared::Unresolved { version: None, reason },
        },
    };

    let mut coordinate = dependency.target.with_version(version.clone());
    if let Some(reason) = cycle(&pending.path, &coordinate) {
        return Prepared::Cycle(reason);
    }

    let mut relocations = Vec::new();
    let mut visited = vec![coordinate.clone()];
    loop {
        let artifact = match compiler.resolve(&coordinate).await {
            Ok(artifact) => artifact,
            Err(reason) if reason.is_cycle() => return Prepared::Cycle(reason),
            Err(reason) => return Prepared::Unresolved {
                version: Some(version),
                reason: Reason::unresolved(dependency, reason),
            },
        };

        let Some(relocation) = artifact.relocation.clone() else {
            return Prepared::Resolved { artifact, relocations };
        };

        trace!("{} is relocated to {}", coordinate, relocation.target);
        relocations.push(RelocationRecord {
            from: coordinate.clone(),
            to: relocation.target.clone(),
            message: relocation.message.clone(),
        });
        if let Some(reason) = cycle(&visited, &relocation.target) {
            return Prepared::Cycle(reason);
        }
        if let Some(reason) = cycle(&pending.path, &relocation.target) {
            return Prepared::Cycle(reason);
        }
        coordinate = relocation.target.clone();
        visited.push(coordinate.clone());
    }
}
