use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::cache::local_cache::LocalCache;
use crate::config::RepositorySettings;
use crate::maven::coordinates::{ArtifactIdentification, PartRef};
use crate::maven::version::Version;

pub const AVAILABILITY_FILE_NAME: &str = "part-availability.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
struct AvailabilityKey {
    repository: String,
    artifact: ArtifactIdentification,
    version: String,
    part: String,
}

impl AvailabilityKey {
    fn new(repository: &str, part: &PartRef) -> AvailabilityKey {
        AvailabilityKey {
            repository: repository.to_string(),
            artifact: part.coordinate.ident.clone(),
            version: part.coordinate.version.to_string(),
            part: part.part.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityEntry {
    pub available: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct Record {
    #[serde(flatten)]
    key: AvailabilityKey,
    #[serde(flatten)]
    entry: AvailabilityEntry,
}

/// Remembers which repository has (or does not have) which part, so that repositories known not
///  to carry a part are not asked again until the repository's update policy says the answer
///  is outdated.
///
/// Shared by all tasks of a session; loaded from `<cacheRoot>/.mc/part-availability.json` at
///  session start and written back at session end.
pub struct PartAvailability {
    path: PathBuf,
    entries: DashMap<AvailabilityKey, AvailabilityEntry>,
    dirty: AtomicBool,
}

impl PartAvailability {
    pub fn empty(path: impl Into<PathBuf>) -> PartAvailability {
        PartAvailability {
            path: path.into(),
            entries: DashMap::new(),
            dirty: AtomicBool::new(false),
        }
    }

    /// A missing or unreadable file means starting from scratch: the file is a cache
    pub async fn load(bookkeeping_dir: &Path) -> PartAvailability {
        let result = PartAvailability::empty(bookkeeping_dir.join(AVAILABILITY_FILE_NAME));
        match tokio::fs::read(&result.path).await {
            Ok(data) => match serde_json::from_slice::<Vec<Record>>(&data) {
                Ok(records) => {
                    for record in records {
                        result.entries.insert(record.key, record.entry);
                    }
                    debug!("loaded {} part availability entries from {}", result.entries.len(), result.path.display());
                }
                Err(e) => warn!("ignoring corrupt part availability file {}: {}", result.path.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not read part availability file {}: {}", result.path.display(), e),
        }
        result
    }

    /// `Some(available)` if there is an answer that is still valid under the repository's policy
    pub fn lookup(&self, repository: &RepositorySettings, part: &PartRef) -> Option<bool> {
        let entry = *self.entries.get(&AvailabilityKey::new(&repository.id, part))?;
        let policy = repository.update_policy(part.coordinate.version.is_snapshot());
        if policy.is_expired(entry.checked_at, Utc::now()) {
            trace!("availability of {} in {} is outdated", part, repository.id);
            None
        }
        else {
            Some(entry.available)
        }
    }

    pub fn record(&self, repository_id: &str, part: &PartRef, available: bool) {
        self.record_at(repository_id, part, available, Utc::now());
    }

    fn record_at(&self, repository_id: &str, part: &PartRef, available: bool, checked_at: DateTime<Utc>) {
        self.entries.insert(AvailabilityKey::new(repository_id, part), AvailabilityEntry { available, checked_at });
        self.dirty.store(true, Ordering::Release);
    }

    /// Forgets what is known about an artifact in a repository, for all versions or one
    pub fn invalidate_artifact(&self, repository_id: &str, artifact: &ArtifactIdentification, version: Option<&Version>) -> usize {
        let version = version.map(|v| v.to_string());
        let before = self.entries.len();
        self.entries.retain(|key, _| {
            !(key.repository == repository_id
                && &key.artifact == artifact
                && version.as_ref().map(|v| v == &key.version).unwrap_or(true))
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the entries back if anything changed since loading. Entries are sorted so that the
    ///  file does not change if its content does not.
    pub async fn flush(&self) -> std::io::Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut records: Vec<Record> = self.entries.iter()
            .map(|e| Record { key: e.key().clone(), entry: *e.value() })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));

        let json = serde_json::to_vec_pretty(&records)?;
        if let Err(e) = LocalCache::write_atomically(&self.path, &json).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!("wrote {} part availability entries to {}", records.len(), self.path.display());
        Ok(())
    }
}
