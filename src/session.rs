use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::local_cache::{LocalCache, RepairReport};
use crate::config::{environment_snapshot, RepositoryLocation, RepositoryReflection};
use crate::download::{DownloadManager, PartOutcome};
use crate::error::{Error, Reason};
use crate::maven::coordinates::{ArtifactIdentification, Coordinate, PartIdentification, PartRef, Scope};
use crate::maven::pom::DescriptorReader;
use crate::maven::version::Version;
use crate::repo::availability::PartAvailability;
use crate::repo::changes::ChangeTracker;
use crate::repo::local_repo::LocalRepository;
use crate::repo::remote_repo::RemoteRepository;
use crate::repo::repository::Repository;
use crate::resolve::clash::{self, ClashStrategy, ReResolution, ResolvedClash};
use crate::resolve::compiler::ArtifactCompiler;
use crate::resolve::graph::{DependencyGraph, NodeId, NodeState};
use crate::resolve::source::RepositoryArtifactSource;
use crate::resolve::walker::{GraphWalker, RelocationRecord, WalkOptions, WalkOutcome};

/// What to resolve, and how
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    pub roots: Vec<Coordinate>,
    pub scopes: BTreeSet<Scope>,
    pub exclusions: BTreeSet<ArtifactIdentification>,
    pub strategy: ClashStrategy,
    pub offline: bool,
    /// parts to download for every resolved artifact with a non-`pom` packaging
    pub parts: Vec<PartIdentification>,
    pub include_optional: bool,
    pub strict: bool,
    pub re_resolution: ReResolution,
    pub pins: BTreeMap<ArtifactIdentification, Version>,
    pub fail_fast: bool,
}

impl ResolutionRequest {
    pub fn new(roots: Vec<Coordinate>) -> ResolutionRequest {
        let defaults = WalkOptions::default();
        ResolutionRequest {
            roots,
            scopes: defaults.scopes,
            exclusions: defaults.exclusions,
            strategy: ClashStrategy::default(),
            offline: false,
            parts: vec![PartIdentification::jar()],
            include_optional: false,
            strict: false,
            re_resolution: ReResolution::default(),
            pins: BTreeMap::new(),
            fail_fast: false,
        }
    }

    fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            scopes: self.scopes.clone(),
            exclusions: self.exclusions.clone(),
            include_optional: self.include_optional,
            strict: self.strict,
            pins: self.pins.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedArtifact {
    pub coordinate: Coordinate,
    pub scope: Scope,
    pub depth: usize,
    /// the artifacts declaring a dependency on this one; empty for roots
    pub requested_by: Vec<Coordinate>,
    pub parts: BTreeMap<PartIdentification, PartOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relocated_from: Option<Coordinate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedArtifact {
    pub artifact: ArtifactIdentification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    pub requested_by: Vec<Coordinate>,
    pub reason: Reason,
}

/// Everything a resolution produced. Partial results are normal: what could not be resolved is
///  listed with its reason next to what could.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub resolved: Vec<ResolvedArtifact>,
    pub unresolved: Vec<UnresolvedArtifact>,
    pub clashes: Vec<ResolvedClash>,
    pub relocations: Vec<RelocationRecord>,
    pub cycles: Vec<Reason>,
}

impl ResolutionResult {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
            && self.cycles.is_empty()
            && self.resolved.iter().all(|r| r.parts.values().all(|o| !o.is_failed()))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Wires repositories, the local cache and the resolver together for one session. Persistent
///  bookkeeping (part availability, change feed watermarks) is loaded when the session is
///  created and written back after every resolution.
pub struct ResolutionSession {
    id: Uuid,
    reflection: RepositoryReflection,
    reader: Arc<dyn DescriptorReader>,
    cache: Arc<LocalCache>,
    availability: Arc<PartAvailability>,
    changes: ChangeTracker,
    environment: BTreeMap<String, String>,
    cancel: CancellationToken,
}

impl ResolutionSession {
    pub async fn new(reflection: RepositoryReflection, reader: Arc<dyn DescriptorReader>) -> Result<ResolutionSession, Error> {
        if reflection.repositories.is_empty() {
            return Err(Error::NoRepository);
        }
        let bookkeeping_dir = reflection.bookkeeping_dir();
        tokio::fs::create_dir_all(&bookkeeping_dir).await?;

        let id = Uuid::new_v4();
        info!("session {} uses cache {} with {} repositories", id, reflection.cache_root.display(), reflection.repositories.len());

        Ok(ResolutionSession {
            id,
            cache: Arc::new(LocalCache::new(reflection.cache_root.clone())),
            availability: Arc::new(PartAvailability::load(&bookkeeping_dir).await),
            changes: ChangeTracker::load(&bookkeeping_dir).await,
            environment: environment_snapshot(),
            cancel: CancellationToken::new(),
            reflection,
            reader,
        })
    }

    /// Replaces the environment that `${env.*}` placeholders are resolved against
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cache_root(&self) -> PathBuf {
        self.reflection.cache_root.clone()
    }

    /// Cancelling stops scheduling new work; downloads in progress are completed
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn repositories(&self, offline: bool) -> Result<Vec<Arc<dyn Repository>>, Error> {
        self.reflection.repositories.iter()
            .map(|settings| {
                let mut settings = settings.clone();
                settings.offline |= offline;
                let repository: Arc<dyn Repository> = if matches!(settings.location, RepositoryLocation::Local(_)) {
                    Arc::new(LocalRepository::new(settings).map_err(|e| Error::Config(format!("{:#}", e)))?)
                }
                else {
                    Arc::new(RemoteRepository::new(settings, &self.reflection.network, self.cache.clone())
                        .map_err(|e| Error::Config(format!("{:#}", e)))?)
                };
                Ok(repository)
            })
            .collect()
    }

    fn downloads(&self, offline: bool) -> Result<Arc<DownloadManager>, Error> {
        Ok(Arc::new(DownloadManager::new(
            self.repositories(offline)?,
            self.cache.clone(),
            self.availability.clone(),
            self.reflection.network.clone(),
            self.cancel.clone(),
        )))
    }

    pub async fn resolve(&self, request: ResolutionRequest) -> Result<ResolutionResult, Error> {
        let span = info_span!("resolution", session = %self.id);
        let result = self.do_resolve(request).instrument(span).await;
        self.flush().await;
        result
    }

    async fn do_resolve(&self, request: ResolutionRequest) -> Result<ResolutionResult, Error> {
        if request.roots.is_empty() {
            return Err(Error::Request("no root coordinates".to_string()));
        }
        let offline = request.offline || self.reflection.offline;
        let downloads = self.downloads(offline)?;
        if !offline {
            self.changes.poll(downloads.repositories(), &self.availability, &self.cache).await;
        }

        let source = Arc::new(RepositoryArtifactSource::new(downloads.clone(), self.reader.clone()));
        let compiler = Arc::new(ArtifactCompiler::new(source, self.environment.clone()));
        let concurrency = self.reflection.network.walker_concurrency;

        info!("resolving {} roots", request.roots.len());
        let mut outcome = GraphWalker::new(compiler.clone(), request.walk_options(), concurrency, self.cancel.clone())
            .walk(&request.roots).await?;
        let dominance = request.strategy.dominance();
        let pinned: BTreeSet<_> = request.pins.keys().cloned().collect();
        let mut clashes = clash::resolve_all(&mut outcome.graph, dominance, &pinned);

        if request.re_resolution == ReResolution::Full && !clashes.is_empty() {
            let mut options = request.walk_options();
            for resolved in &clashes {
                options.pins.insert(resolved.clash.artifact.clone(), resolved.winner.clone());
            }
            debug!("walking again with {} pinned versions", options.pins.len());
            let pinned: BTreeSet<_> = options.pins.keys().cloned().collect();
            outcome = GraphWalker::new(compiler.clone(), options, concurrency, self.cancel.clone())
                .walk(&request.roots).await?;
            clashes.extend(clash::resolve_all(&mut outcome.graph, dominance, &pinned));
        }
        info!("walked {} artifacts ({} compiled), {} clashes", outcome.graph.active_nodes().count(), compiler.compiled_count(), clashes.len());

        let wanted = Self::wanted_parts(&outcome.graph, &request.parts);
        let mut outcomes = downloads.ensure(wanted.values().flatten().cloned(), request.fail_fast).await;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let result = Self::collect(outcome, clashes, &wanted, &mut outcomes);
        info!("resolved {} artifacts, {} unresolved", result.resolved.len(), result.unresolved.len());
        Ok(result)
    }

    /// The parts to download per resolved coordinate: the requested parts for regular
    ///  artifacts, the descriptor only for `pom` packaging, plus whatever non-default parts
    ///  dependencies explicitly ask for
    fn wanted_parts(graph: &DependencyGraph, requested: &[PartIdentification]) -> BTreeMap<Coordinate, BTreeSet<PartRef>> {
        let mut result: BTreeMap<Coordinate, BTreeSet<PartRef>> = BTreeMap::new();
        for node in graph.active_nodes().filter(|n| n.state == NodeState::Expanded) {
            let (Some(coordinate), Some(artifact)) = (node.coordinate(), &node.artifact) else {
                continue;
            };
            let parts = result.entry(coordinate.clone()).or_default();
            if artifact.packaging == "pom" {
                parts.insert(coordinate.part(PartIdentification::pom()));
            }
            else {
                parts.extend(requested.iter().map(|p| coordinate.part(p.clone())));
            }
            for edge in graph.incoming(node.id) {
                if edge.dependency.part != PartIdentification::jar() {
                    parts.insert(coordinate.part(edge.dependency.part.clone()));
                }
            }
        }
        result
    }

    fn collect(
        outcome: WalkOutcome,
        clashes: Vec<ResolvedClash>,
        wanted: &BTreeMap<Coordinate, BTreeSet<PartRef>>,
        outcomes: &mut BTreeMap<PartRef, PartOutcome>,
    ) -> ResolutionResult {
        let graph = &outcome.graph;
        let requested_by = |id: NodeId| {
            let mut requesters: Vec<Coordinate> = graph.incoming(id)
                .filter_map(|e| e.from)
                .filter_map(|from| graph.node(from).coordinate())
                .collect();
            requesters.sort();
            requesters.dedup();
            requesters
        };

        let mut resolved: Vec<ResolvedArtifact> = Vec::new();
        let mut unresolved: Vec<UnresolvedArtifact> = Vec::new();
        for node in graph.active_nodes() {
            match node.state {
                NodeState::Expanded => {
                    let Some(coordinate) = node.coordinate() else {
                        continue;
                    };
                    let mut requesters = requested_by(node.id);
                    // the same coordinate reached with another scope or other exclusions
                    if let Some(existing) = resolved.iter_mut().find(|r| r.coordinate == coordinate) {
                        existing.scope = existing.scope.min(node.scope);
                        existing.requested_by.append(&mut requesters);
                        existing.requested_by.sort();
                        existing.requested_by.dedup();
                        continue;
                    }
                    let parts = wanted.get(&coordinate)
                        .map(|parts| parts.iter()
                            .map(|p| {
                                let outcome = outcomes.remove(p)
                                    .unwrap_or_else(|| PartOutcome::Failed { reason: Reason::Cancelled });
                                (p.part.clone(), outcome)
                            })
                            .collect())
                        .unwrap_or_default();
                    resolved.push(ResolvedArtifact {
                        coordinate,
                        scope: node.scope,
                        depth: node.depth,
                        requested_by: requesters,
                        parts,
                        relocated_from: node.relocated_from.clone(),
                    });
                }
                NodeState::Unresolved => {
                    let reason = node.reason.clone().unwrap_or_else(|| Reason::NotFound { subject: node.ident.to_string() });
                    let mut requesters = requested_by(node.id);
                    if let Some(existing) = unresolved.iter_mut().find(|u| u.artifact == node.ident && u.version == node.version && u.reason == reason) {
                        existing.requested_by.append(&mut requesters);
                        existing.requested_by.sort();
                        existing.requested_by.dedup();
                        continue;
                    }
                    unresolved.push(UnresolvedArtifact {
                        artifact: node.ident.clone(),
                        version: node.version.clone(),
                        requested_by: requesters,
                        reason,
                    });
                }
                NodeState::Pending | NodeState::Expanding => {
                    warn!("node {} for {} was left in state {:?}", node.id, node.ident, node.state);
                }
                NodeState::Excluded | NodeState::CycleDetected => {}
            }
        }

        ResolutionResult {
            resolved,
            unresolved,
            clashes,
            relocations: outcome.relocations,
            cycles: outcome.cycles,
        }
    }

    /// Removes a coordinate from the local cache, so it is fetched again the next time it is
    ///  needed
    pub async fn purge(&self, coordinate: &Coordinate) -> Result<bool, Error> {
        let purged = self.downloads(true)?.purge(coordinate).await.map_err(Error::Cache)?;
        self.flush().await;
        Ok(purged)
    }

    pub async fn repair(&self) -> Result<RepairReport, Error> {
        Ok(self.downloads(true)?.repair().await?)
    }

    /// Writes bookkeeping back to disk. Failing to do so only costs repeated lookups in the
    ///  next session, so it is logged rather than reported.
    async fn flush(&self) {
        if let Err(e) = self.availability.flush().await {
            warn!("could not write part availability: {}", e);
        }
        if let Err(e) = self.changes.flush().await {
            warn!("could not write change feed watermarks: {}", e);
        }
    }
}
