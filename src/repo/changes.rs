use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::local_cache::LocalCache;
use crate::repo::availability::PartAvailability;
use crate::repo::repository::Repository;

pub const WATERMARKS_FILE_NAME: &str = "watermarks.json";

/// Keeps the local view of repositories current through their change feeds: at session start
///  every repository is polled for changes since the last poll, and whatever changed is
///  forgotten locally (part availability and cached metadata) so that it is looked up again.
pub struct ChangeTracker {
    path: PathBuf,
    watermarks: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl ChangeTracker {
    pub async fn load(bookkeeping_dir: &Path) -> ChangeTracker {
        let path = bookkeeping_dir.join(WATERMARKS_FILE_NAME);
        let watermarks = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                warn!("ignoring corrupt watermark file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        ChangeTracker {
            path,
            watermarks: Mutex::new(watermarks),
        }
    }

    pub async fn watermark(&self, repository_id: &str) -> Option<DateTime<Utc>> {
        self.watermarks.lock().await.get(repository_id).copied()
    }

    /// Polls all repositories. A repository that can not be polled keeps its watermark, so its
    ///  changes are picked up next time. Returns the number of changed artifacts.
    pub async fn poll(&self, repositories: &[Arc<dyn Repository>], availability: &PartAvailability, cache: &LocalCache) -> usize {
        let mut changed = 0;
        for repository in repositories {
            if repository.settings().changes_url.is_none() || repository.settings().offline {
                continue;
            }
            let since = self.watermark(repository.id()).await;
            let change_set = match repository.poll_changes(since).await {
                Ok(change_set) => change_set,
                Err(e) => {
                    warn!("could not poll changes of repository {}: {}", repository.id(), e);
                    continue;
                }
            };

            for change in &change_set.changes {
                debug!("{} changed in {}: {}", change.artifact, repository.id(), change.version);
                availability.invalidate_artifact(repository.id(), &change.artifact, None);
                if let Err(e) = cache.invalidate_metadata(&change.artifact, repository.id()).await {
                    warn!("could not invalidate cached metadata of {}: {}", change.artifact, e);
                }
            }
            if !change_set.changes.is_empty() {
                info!("repository {} reported {} changes", repository.id(), change_set.changes.len());
            }
            changed += change_set.changes.len();

            if let Some(watermark) = change_set.watermark {
                self.watermarks.lock().await.insert(repository.id().to_string(), watermark);
            }
        }
        changed
    }

    pub async fn flush(&self) -> std::io::Result<()> {
        let json = {
            let watermarks = self.watermarks.lock().await;
            serde_json::to_vec_pretty(&*watermarks)?
        };
        LocalCache::write_atomically(&self.path, &json).await
    }
}
