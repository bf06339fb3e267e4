use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, trace, warn};

use crate::cache::local_cache::LocalCache;
use crate::config::{NetworkSettings, RepositoryLocation, RepositorySettings};
use crate::maven::coordinates::{ArtifactIdentification, Coordinate, PartIdentification, PartRef};
use crate::maven::metadata_xml::Metadata;
use crate::maven::paths::{as_maven_path, version_directory};
use crate::maven::version::{SnapshotKind, Version};
use crate::repo::repository::{Change, ChangeSet, FetchError, Probe, Repository};
use crate::util::blob::Blob;
use crate::util::http_downloader::ValidatingHttpDownloader;

/// A Maven repository accessed over HTTP(S).
///
/// `maven-metadata.xml` files are cached next to the cached parts as
///  `maven-metadata-<repository id>.xml` and re-fetched when the repository's update policy says
///  they are outdated. An offline repository answers from that cache only.
pub struct RemoteRepository {
    settings: RepositorySettings,
    downloader: ValidatingHttpDownloader,
    cache: Arc<LocalCache>,
}

impl RemoteRepository {
    pub fn new(settings: RepositorySettings, network: &NetworkSettings, cache: Arc<LocalCache>) -> anyhow::Result<RemoteRepository> {
        let base_uri = match &settings.location {
            RepositoryLocation::Remote(url) => url.clone(),
            RepositoryLocation::Local(path) => return Err(anyhow!("repository {} is not remote: {}", settings.id, path.display())),
        };

        let credentials = match (&settings.user, &settings.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            (Some(user), None) => Some((user.as_str(), "")),
            _ => None,
        };

        let downloader = ValidatingHttpDownloader::new(base_uri, credentials, network.timeout)?;
        Ok(RemoteRepository {
            settings,
            downloader,
            cache,
        })
    }

    /// The metadata file in a directory relative to the repository root, from the local cache
    ///  if that is recent enough
    async fn metadata(&self, relative_dir: &str, snapshot: bool) -> Result<Metadata, FetchError> {
        let cached_path = self.cache.metadata_path(relative_dir, self.id());
        let cached = LocalCache::read_metadata(&cached_path).await;

        if let Some((data, modified)) = &cached {
            if self.settings.offline || !self.settings.update_policy(snapshot).is_expired(*modified, Utc::now()) {
                trace!("using cached metadata {}", cached_path.display());
                return Self::parse_metadata(data);
            }
        }
        if self.settings.offline {
            return Err(FetchError::Offline);
        }

        let remote_path = format!("{}/maven-metadata.xml", relative_dir);
        match self.downloader.get_bytes(&remote_path).await {
            Ok(data) => {
                let metadata = Self::parse_metadata(&data)?;
                if let Err(e) = LocalCache::write_atomically(&cached_path, &data).await {
                    warn!("could not cache {}: {}", cached_path.display(), e);
                }
                Ok(metadata)
            }
            Err(FetchError::NotFound) => Err(FetchError::NotFound),
            Err(e) => match cached {
                Some((data, _)) => {
                    warn!("could not refresh {} from {}, using the outdated copy: {}", remote_path, self.id(), e);
                    Self::parse_metadata(&data)
                }
                None => Err(e),
            },
        }
    }

    fn parse_metadata(data: &[u8]) -> Result<Metadata, FetchError> {
        Metadata::parse(data)
            .map_err(|e| FetchError::Network(format!("malformed maven-metadata.xml: {:#}", e)))
    }

    /// The path a part is stored under in this repository: deployed snapshots carry a timestamp
    ///  in their file name
    async fn remote_path(&self, part: &PartRef) -> Result<String, FetchError> {
        match self.snapshot_version(&part.coordinate, &part.part).await? {
            Some(version) => {
                let deployed = Coordinate { ident: part.coordinate.ident.clone(), version };
                Ok(as_maven_path(&deployed.part(part.part.clone())))
            }
            None => Ok(as_maven_path(part)),
        }
    }

    fn changes_uri(changes_url: &str, since: Option<DateTime<Utc>>) -> String {
        match since {
            None => changes_url.to_string(),
            Some(since) => {
                let separator = if changes_url.contains('?') { '&' } else { '?' };
                format!("{}{}timestamp={}", changes_url, separator, since.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
        }
    }
}

#[async_trait]
impl Repository for RemoteRepository {
    fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    async fn probe(&self, part: &PartRef) -> Probe {
        if self.settings.offline {
            return Probe::Unknown(FetchError::Offline.into_reason(self.id(), &part.to_string()));
        }
        let result = match self.remote_path(part).await {
            Ok(path) => self.downloader.exists(&path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(true) => Probe::Available,
            Ok(false) | Err(FetchError::NotFound) => Probe::NotFound,
            Err(e) => Probe::Unknown(e.into_reason(self.id(), &part.to_string())),
        }
    }

    async fn fetch(&self, part: &PartRef) -> Result<Blob, FetchError> {
        if self.settings.offline {
            return Err(FetchError::Offline);
        }
        let path = self.remote_path(part).await?;
        debug!("fetching {} from {}", part, self.downloader.uri(&path));
        self.downloader.get(&path, self.settings.checksum_policy).await
    }

    async fn fetch_metadata(&self, path: &str) -> Result<Bytes, FetchError> {
        if self.settings.offline {
            return Err(FetchError::Offline);
        }
        self.downloader.get_bytes(path).await
    }

    async fn versions(&self, ident: &ArtifactIdentification) -> Result<Vec<Version>, FetchError> {
        let metadata = self.metadata(&ident.as_path(), !self.settings.releases).await?;
        Ok(metadata.versions()
            .into_iter()
            .filter(|v| self.settings.serves(v.is_snapshot()))
            .collect())
    }

    async fn snapshot_version(&self, coordinate: &Coordinate, part: &PartIdentification) -> Result<Option<Version>, FetchError> {
        if coordinate.version.snapshot != SnapshotKind::Snapshot {
            return Ok(None);
        }
        match self.metadata(&version_directory(coordinate), true).await {
            Ok(metadata) => Ok(metadata.snapshot_version(coordinate, part)),
            Err(FetchError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn poll_changes(&self, since: Option<DateTime<Utc>>) -> Result<ChangeSet, FetchError> {
        let Some(changes_url) = &self.settings.changes_url else {
            return Ok(ChangeSet { changes: Vec::new(), watermark: since });
        };
        if self.settings.offline {
            return Err(FetchError::Offline);
        }

        let uri = Self::changes_uri(changes_url, since);
        trace!("polling changes of {} from {}", self.id(), uri);
        let data = self.downloader.get_bytes(&uri).await?;
        let mut changes: Vec<Change> = serde_json::from_slice(&data)
            .map_err(|e| FetchError::Network(format!("malformed change feed from {}: {}", uri, e)))?;
        changes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let watermark = changes.iter()
            .map(|c| c.timestamp)
            .max()
            .or(since)
            .unwrap_or_else(Utc::now);
        Ok(ChangeSet { changes, watermark: Some(watermark) })
    }
}
