use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info, trace, warn, Instrument};

use crate::cache::in_flight::InFlight;
use crate::cache::local_cache::{LocalCache, RepairReport, Verification};
use crate::cache::lock_file::LockFile;
use crate::config::{ChecksumPolicy, NetworkSettings};
use crate::error::Reason;
use crate::maven::coordinates::{ArtifactIdentification, Coordinate, PartRef};
use crate::maven::version::{SnapshotKind, Version};
use crate::repo::availability::PartAvailability;
use crate::repo::repository::{FetchError, Probe, Repository};

/// What `ensure` did for one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PartOutcome {
    /// downloaded during this call
    Fresh {
        path: PathBuf,
        repository: String,
        /// set if a corrupt cached copy was replaced
        #[serde(skip_serializing_if = "Option::is_none")]
        replaced: Option<Reason>,
    },
    Cached { path: PathBuf },
    Failed { reason: Reason },
}

impl PartOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            PartOutcome::Fresh { path, .. } | PartOutcome::Cached { path } => Some(path),
            PartOutcome::Failed { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&Reason> {
        match self {
            PartOutcome::Fresh { replaced, .. } => replaced.as_ref(),
            PartOutcome::Cached { .. } => None,
            PartOutcome::Failed { reason } => Some(reason),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PartOutcome::Failed { .. })
    }
}

/// Materializes parts in the local cache, fetching them from the configured repositories in order.
///
/// Concurrent requests for the same part share one fetch. Fetches run on a bounded pool, are
///  retried with exponential backoff, and write under a per-version-directory lock file so that
///  processes sharing the cache do not interfere.
pub struct DownloadManager {
    repositories: Vec<Arc<dyn Repository>>,
    cache: Arc<LocalCache>,
    availability: Arc<PartAvailability>,
    network: NetworkSettings,
    in_flight: InFlight<PartRef, PartOutcome>,
    permits: Semaphore,
    cancel: CancellationToken,
}

impl DownloadManager {
    pub fn new(
        repositories: Vec<Arc<dyn Repository>>,
        cache: Arc<LocalCache>,
        availability: Arc<PartAvailability>,
        network: NetworkSettings,
        cancel: CancellationToken,
    ) -> DownloadManager {
        let permits = Semaphore::new(network.download_concurrency.max(1));
        DownloadManager {
            repositories,
            cache,
            availability,
            network,
            in_flight: InFlight::new(),
            permits,
            cancel,
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn repositories(&self) -> &[Arc<dyn Repository>] {
        &self.repositories
    }

    /// Makes sure all parts are in the local cache. Failures are reported per part; with
    ///  `fail_fast`, the first failure stops scheduling further work and the remaining parts
    ///  report `Cancelled`.
    pub async fn ensure(self: &Arc<Self>, parts: impl IntoIterator<Item = PartRef>, fail_fast: bool) -> BTreeMap<PartRef, PartOutcome> {
        let cancel = self.cancel.child_token();
        let parts: BTreeSet<PartRef> = parts.into_iter().collect();

        let mut tasks = JoinSet::new();
        for part in parts.iter().cloned() {
            let manager = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let outcome = manager.ensure_part_with(&part, &cancel).await;
                (part, outcome)
            });
        }

        let mut result = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((part, outcome)) => {
                    if fail_fast && outcome.is_failed() && !cancel.is_cancelled() {
                        warn!("{} failed, cancelling remaining downloads", part);
                        cancel.cancel();
                    }
                    result.insert(part, outcome);
                }
                Err(e) => error!("download task failed: {}", e),
            }
        }

        // parts whose task panicked
        for part in parts {
            result.entry(part).or_insert_with(|| PartOutcome::Failed { reason: Reason::io("download task failed") });
        }
        result
    }

    pub async fn ensure_part(&self, part: &PartRef) -> PartOutcome {
        self.ensure_part_with(part, &self.cancel).await
    }

    async fn ensure_part_with(&self, part: &PartRef, cancel: &CancellationToken) -> PartOutcome {
        loop {
            let outcome = self.in_flight
                .run(part, || self.materialize(part, cancel).instrument(debug_span!("fetch", part = %part)))
                .await;
            // a shared fetch that was cancelled on behalf of another caller is not our answer
            match outcome {
                PartOutcome::Failed { reason: Reason::Cancelled } if !cancel.is_cancelled() => {
                    debug!("shared fetch of {} was cancelled, starting another one", part);
                    tokio::task::yield_now().await;
                }
                outcome => return outcome,
            }
        }
    }

    async fn materialize(&self, part: &PartRef, cancel: &CancellationToken) -> PartOutcome {
        let cached_path = self.cache.part_path(part);

        let mut replaced = None;
        let mut unverified = false;
        match self.cache.verify(part).await {
            Ok(Verification::Unverified) if self.requires_checksum(part) => {
                warn!("cached {} has no checksum file, fetching it again", part);
                unverified = true;
            }
            Ok(Verification::Valid) | Ok(Verification::Unverified) => {
                if !self.needs_revalidation(part).await {
                    trace!("{} is cached", part);
                    return PartOutcome::Cached { path: cached_path };
                }
            }
            Ok(Verification::Corrupt(failure)) => {
                warn!("cached {} does not match its checksum, fetching it again: {}", part, failure);
                if let Err(e) = self.cache.remove_part(part).await {
                    return PartOutcome::Failed { reason: Reason::io(e) };
                }
                replaced = Some(Reason::ChecksumMismatch {
                    part: part.to_string(),
                    expected: failure.expected,
                    actual: failure.actual,
                });
            }
            Ok(Verification::Missing) => {}
            Err(e) => warn!("could not check cached {}: {}", part, e),
        }
        let stale_copy = replaced.is_none() && !unverified && self.cache.contains(part).await;

        if cancel.is_cancelled() {
            return PartOutcome::Failed { reason: Reason::Cancelled };
        }

        let lock = match LockFile::acquire(&self.cache.version_dir(&part.coordinate), self.network.lock_timeout, self.network.stale_lock_age).await {
            Ok(lock) => lock,
            Err(reason) => return PartOutcome::Failed { reason },
        };

        // another process may have written the part while we were waiting for the lock
        if !stale_copy && replaced.is_none() && self.cache.verify(part).await == Ok(Verification::Valid) {
            return PartOutcome::Cached { path: cached_path };
        }

        let result = self.fetch_from_repositories(part, cancel).await;
        drop(lock);

        match result {
            Ok((path, repository)) => {
                debug!("fetched {} from {}", part, repository);
                PartOutcome::Fresh { path, repository, replaced }
            }
            Err(reason) if stale_copy => {
                warn!("could not refresh {}, using the cached copy: {}", part, reason);
                PartOutcome::Cached { path: cached_path }
            }
            Err(reason) => match replaced {
                // the corrupt copy is gone and could not be replaced
                Some(mismatch) => PartOutcome::Failed { reason: Reason::unresolved(part, mismatch) },
                None => PartOutcome::Failed { reason },
            },
        }
    }

    /// Whether a repository that could serve the part insists on checksums, in which case a
    ///  cached copy without a checksum file is not trusted
    fn requires_checksum(&self, part: &PartRef) -> bool {
        let snapshot = part.coordinate.version.is_snapshot();
        self.repositories.iter()
            .map(|r| r.settings())
            .any(|s| s.serves(snapshot) && s.checksum_policy == ChecksumPolicy::Require)
    }

    /// A cached `-SNAPSHOT` part is refreshed once the snapshot update policy of a repository
    ///  that could serve it considers it outdated
    async fn needs_revalidation(&self, part: &PartRef) -> bool {
        if part.coordinate.version.snapshot != SnapshotKind::Snapshot {
            return false;
        }
        let Some(modified) = self.cache.modified(part).await else {
            return false;
        };
        let now = Utc::now();
        self.repositories.iter()
            .map(|r| r.settings())
            .filter(|s| s.snapshots && !s.offline)
            .any(|s| s.snapshot_policy.is_expired(modified, now))
    }

    async fn fetch_from_repositories(&self, part: &PartRef, cancel: &CancellationToken) -> Result<(PathBuf, String), Reason> {
        let snapshot = part.coordinate.version.is_snapshot();
        let mut last_error = None;
        let mut asked_any = false;

        for repository in &self.repositories {
            let settings = repository.settings();
            if !settings.serves(snapshot) || settings.offline {
                continue;
            }
            if self.availability.lookup(settings, part) == Some(false) {
                trace!("{} is known not to have {}", repository.id(), part);
                asked_any = true;
                continue;
            }
            if cancel.is_cancelled() {
                return Err(Reason::Cancelled);
            }
            asked_any = true;

            match self.fetch_with_retry(repository.as_ref(), part, cancel).await {
                Ok(path) => {
                    self.availability.record(repository.id(), part, true);
                    return Ok((path, repository.id().to_string()));
                }
                Err(FetchError::NotFound) => {
                    debug!("{} not found in {}", part, repository.id());
                    self.availability.record(repository.id(), part, false);
                }
                Err(e) => {
                    warn!("could not fetch {} from {}: {}", part, repository.id(), e);
                    last_error = Some(e.into_reason(repository.id(), &part.to_string()));
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Reason::Cancelled);
        }
        Err(match last_error {
            Some(reason) => reason,
            None if !asked_any => Reason::OfflineAndMissing { part: part.to_string() },
            None => Reason::NotFound { subject: part.to_string() },
        })
    }

    /// In-flight fetches are not interrupted by cancellation, only further attempts are not made
    async fn fetch_with_retry(&self, repository: &dyn Repository, part: &PartRef, cancel: &CancellationToken) -> Result<PathBuf, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            let result = {
                let _permit = self.permits.acquire().await
                    .map_err(|_| FetchError::Io("download pool is closed".to_string()))?;
                match repository.fetch(part).await {
                    Ok(blob) => self.cache.insert(part, blob).await,
                    Err(e) => Err(e),
                }
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.network.retries && !cancel.is_cancelled() => {
                    let delay = self.network.retry_base_delay.saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    warn!("attempt {} to fetch {} from {} failed, retrying in {:?}: {}", attempt, part, repository.id(), delay, e);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(e),
                    }
                }
                other => return other,
            }
        }
    }

    /// Asks every repository whether it has a part, recording the answers
    pub async fn probe(&self, part: &PartRef) -> Vec<(String, Probe)> {
        let mut result = Vec::new();
        for repository in &self.repositories {
            let probe = repository.probe(part).await;
            match &probe {
                Probe::Available => self.availability.record(repository.id(), part, true),
                Probe::NotFound => self.availability.record(repository.id(), part, false),
                Probe::Unknown(reason) => debug!("could not probe {} for {}: {}", repository.id(), part, reason),
            }
            result.push((repository.id().to_string(), probe));
        }
        result
    }

    /// The versions of an artifact across all repositories
    pub async fn versions(&self, ident: &ArtifactIdentification) -> Result<Vec<Version>, Reason> {
        let mut versions = BTreeSet::new();
        let mut found = false;
        let mut last_error = None;
        for repository in &self.repositories {
            match repository.versions(ident).await {
                Ok(v) => {
                    found = true;
                    versions.extend(v);
                }
                Err(FetchError::NotFound) => {}
                Err(e) => {
                    debug!("could not list versions of {} in {}: {}", ident, repository.id(), e);
                    last_error = Some(e.into_reason(repository.id(), &ident.to_string()));
                }
            }
        }
        if found {
            return Ok(versions.into_iter().collect());
        }
        Err(last_error.unwrap_or_else(|| Reason::NotFound { subject: ident.to_string() }))
    }

    /// Removes a coordinate from the local cache and forgets what is known about its availability
    pub async fn purge(&self, coordinate: &Coordinate) -> Result<bool, Reason> {
        for repository in &self.repositories {
            self.availability.invalidate_artifact(repository.id(), &coordinate.ident, Some(&coordinate.version));
        }
        let dir = self.cache.version_dir(coordinate);
        // acquiring the lock would create the directory
        if !tokio::fs::try_exists(&dir).await.map_err(Reason::io)? {
            return Ok(false);
        }
        let _lock = LockFile::acquire(&dir, self.network.lock_timeout, self.network.stale_lock_age).await?;
        self.cache.purge(coordinate).await.map_err(Reason::io)
    }

    pub async fn repair(&self) -> std::io::Result<RepairReport> {
        let report = self.cache.repair(self.network.stale_lock_age).await?;
        info!("cache repair: removed {} temp files, {} stale locks, {} corrupt parts",
            report.temp_files_removed, report.stale_locks_removed, report.corrupt_parts_removed.len());
        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;
    use crate::config::{RepositoryLocation, RepositorySettings};
    use crate::maven::coordinates::PartIdentification;
    use crate::repo::repository::ChangeSet;
    use crate::util::blob::Blob;
    use super::*;

    /// Serves every part with fixed content, optionally failing the first attempts
    struct CountingRepository {
        settings: RepositorySettings,
        fetches: AtomicUsize,
        failures_before_success: usize,
        missing: bool,
        delay: Duration,
    }

    impl CountingRepository {
        fn new(id: &str) -> CountingRepository {
            CountingRepository {
                settings: RepositorySettings::new(id, RepositoryLocation::Remote(format!("https://{}/", id))),
                fetches: AtomicUsize::new(0),
                failures_before_success: 0,
                missing: false,
                delay: Duration::from_millis(20),
            }
        }
    }

    #[async_trait]
    impl Repository for CountingRepository {
        fn settings(&self) -> &RepositorySettings {
            &self.settings
        }
        async fn probe(&self, _part: &PartRef) -> Probe {
            if self.missing { Probe::NotFound } else { Probe::Available }
        }
        async fn fetch(&self, _part: &PartRef) -> Result<Blob, FetchError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.missing {
                return Err(FetchError::NotFound);
            }
            tokio::time::sleep(self.delay).await;
            if n < self.failures_before_success {
                return Err(FetchError::Timeout);
            }
            Ok(Blob::from_bytes(Bytes::from_static(b"content"), None))
        }
        async fn fetch_metadata(&self, _path: &str) -> Result<Bytes, FetchError> {
            Err(FetchError::NotFound)
        }
        async fn versions(&self, _ident: &ArtifactIdentification) -> Result<Vec<Version>, FetchError> {
            Ok(vec![Version::parse("1.0").unwrap()])
        }
        async fn snapshot_version(&self, _coordinate: &Coordinate, _part: &PartIdentification) -> Result<Option<Version>, FetchError> {
            Ok(None)
        }
        async fn poll_changes(&self, since: Option<DateTime<Utc>>) -> Result<ChangeSet, FetchError> {
            Ok(ChangeSet { changes: vec![], watermark: since })
        }
    }

    fn jar(version: &str) -> PartRef {
        Coordinate::new("org.acme", "lib", Version::parse(version).unwrap()).part(PartIdentification::jar())
    }

    fn manager(dir: &TempDir, repositories: Vec<Arc<dyn Repository>>) -> Arc<DownloadManager> {
        let network = NetworkSettings {
            retry_base_delay: Duration::from_millis(1),
            ..NetworkSettings::default()
        };
        Arc::new(DownloadManager::new(
            repositories,
            Arc::new(LocalCache::new(dir.path())),
            Arc::new(PartAvailability::empty(dir.path().join(".mc/part-availability.json"))),
            network,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn test_concurrent_ensure_fetches_once() {
        let dir = TempDir::new().unwrap();
        let repository = Arc::new(CountingRepository::new("central"));
        let manager = manager(&dir, vec![repository.clone()]);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.ensure(vec![jar("1.0")], false).await }));
        }
        for handle in handles {
            let outcomes = handle.await.unwrap();
            assert!(outcomes[&jar("1.0")].path().is_some());
        }
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 1);

        let again = manager.ensure(vec![jar("1.0")], false).await;
        assert!(matches!(again[&jar("1.0")], PartOutcome::Cached { .. }));
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let dir = TempDir::new().unwrap();
        let mut repository = CountingRepository::new("central");
        repository.failures_before_success = 2;
        let repository = Arc::new(repository);
        let manager = manager(&dir, vec![repository.clone()]);

        let outcome = manager.ensure_part(&jar("1.0")).await;
        assert!(matches!(outcome, PartOutcome::Fresh { .. }));
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_repository_and_remembers_absence() {
        let dir = TempDir::new().unwrap();
        let mut first = CountingRepository::new("first");
        first.missing = true;
        let first = Arc::new(first);
        let second = Arc::new(CountingRepository::new("second"));
        let manager = manager(&dir, vec![first.clone(), second.clone()]);

        let outcome = manager.ensure_part(&jar("1.0")).await;
        assert_eq!(outcome, PartOutcome::Fresh {
            path: dir.path().join("org/acme/lib/1.0/lib-1.0.jar"),
            repository: "second".to_string(),
            replaced: None,
        });

        manager.ensure_part(&jar("2.0")).await;
        assert_eq!(first.fetches.load(Ordering::SeqCst), 2);
        // the answer for 1.0 is remembered
        manager.cache().purge(&jar("1.0").coordinate).await.unwrap();
        manager.ensure_part(&jar("1.0")).await;
        assert_eq!(first.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_offline_and_missing() {
        let dir = TempDir::new().unwrap();
        let mut repository = CountingRepository::new("central");
        repository.settings.offline = true;
        let manager = manager(&dir, vec![Arc::new(repository)]);

        let outcome = manager.ensure_part(&jar("1.0")).await;
        assert!(matches!(outcome, PartOutcome::Failed { reason: Reason::OfflineAndMissing { .. } }));
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_reported_and_refetched() {
        let dir = TempDir::new().unwrap();
        let repository = Arc::new(CountingRepository::new("central"));
        let manager = manager(&dir, vec![repository.clone()]);

        let path = manager.ensure_part(&jar("1.0")).await.path().unwrap().to_path_buf();
        std::fs::write(&path, b"corrupted").unwrap();

        let outcome = manager.ensure_part(&jar("1.0")).await;
        assert!(matches!(outcome, PartOutcome::Fresh { replaced: Some(Reason::ChecksumMismatch { .. }), .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"content");
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_manager_does_not_fetch() {
        let dir = TempDir::new().unwrap();
        let repository = Arc::new(CountingRepository::new("central"));
        let manager = manager(&dir, vec![repository.clone()]);
        manager.cancel.cancel();

        let outcomes = manager.ensure(vec![jar("1.0"), jar("2.0")], true).await;
        assert!(outcomes.values().all(|o| o.reason() == Some(&Reason::Cancelled)));
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_is_not_shared_with_live_callers() {
        let dir = TempDir::new().unwrap();
        let mut repository = CountingRepository::new("central");
        repository.failures_before_success = 1;
        repository.delay = Duration::from_millis(200);
        let repository = Arc::new(repository);
        let manager = manager(&dir, vec![repository.clone()]);

        let cancelled = CancellationToken::new();
        let first = {
            let manager = manager.clone();
            let cancelled = cancelled.clone();
            tokio::spawn(async move { manager.ensure_part_with(&jar("1.0"), &cancelled).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_part(&jar("1.0")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancelled.cancel();

        assert_eq!(first.await.unwrap(), PartOutcome::Failed { reason: Reason::Cancelled });
        assert!(matches!(second.await.unwrap(), PartOutcome::Fresh { .. }));
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_part_without_checksum_file_is_refetched_if_checksums_are_required() {
        let dir = TempDir::new().unwrap();
        let repository = Arc::new(CountingRepository::new("central"));
        let manager = manager(&dir, vec![repository.clone()]);

        let path = manager.cache().part_path(&jar("1.0"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"left behind").unwrap();

        let outcome = manager.ensure_part(&jar("1.0")).await;
        assert!(matches!(outcome, PartOutcome::Fresh { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"content");
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(manager.cache().verify(&jar("1.0")).await, Ok(Verification::Valid));
    }

    #[tokio::test]
    async fn test_part_without_checksum_file_is_kept_if_checksums_are_optional() {
        let dir = TempDir::new().unwrap();
        let mut repository = CountingRepository::new("central");
        repository.settings.checksum_policy = ChecksumPolicy::VerifyIfPresent;
        let repository = Arc::new(repository);
        let manager = manager(&dir, vec![repository.clone()]);

        let path = manager.cache().part_path(&jar("1.0"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"left behind").unwrap();

        assert!(matches!(manager.ensure_part(&jar("1.0")).await, PartOutcome::Cached { .. }));
        assert_eq!(repository.fetches.load(Ordering::SeqCst), 0);
    }
}
