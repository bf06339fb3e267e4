use std::path::PathBuf;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::{read_dir, try_exists, OpenOptions};
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

use crate::config::{ChecksumPolicy, RepositoryLocation, RepositorySettings};
use crate::maven::coordinates::{ArtifactIdentification, Coordinate, PartIdentification, PartRef};
use crate::maven::paths::as_maven_path;
use crate::maven::version::Version;
use crate::repo::repository::{ChangeSet, FetchError, Probe, Repository};
use crate::util::blob::Blob;
use crate::util::checksum::{Checksum, ChecksumAlgorithm};
use crate::util::validating_body::{validator_for, ValidatingBody};

/// A directory in Maven layout, e.g. a `file:` repository shared on a network drive or a
///  local Maven repository. Parts are stored under their `-SNAPSHOT` names.
pub struct LocalRepository {
    settings: RepositorySettings,
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(settings: RepositorySettings) -> anyhow::Result<LocalRepository> {
        let root = match &settings.location {
            RepositoryLocation::Local(path) => path.clone(),
            RepositoryLocation::Remote(url) => return Err(anyhow!("repository {} is not local: {}", settings.id, url)),
        };
        Ok(LocalRepository { settings, root })
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    async fn published_checksum(&self, relative: &str) -> Option<Checksum> {
        for algorithm in ChecksumAlgorithm::ALL {
            let path = self.path(&format!("{}.{}", relative, algorithm.extension()));
            if let Ok(text) = tokio::fs::read_to_string(&path).await {
                match Checksum::parse(algorithm, &text) {
                    Ok(checksum) => return Some(checksum),
                    Err(e) => debug!("ignoring malformed checksum file {}: {}", path.display(), e),
                }
            }
        }
        None
    }
}

#[async_trait]
impl Repository for LocalRepository {
    fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    async fn probe(&self, part: &PartRef) -> Probe {
        match try_exists(self.path(&as_maven_path(part))).await {
            Ok(true) => Probe::Available,
            Ok(false) => Probe::NotFound,
            Err(e) => Probe::Unknown(FetchError::from(e).into_reason(self.id(), &part.to_string())),
        }
    }

    async fn fetch(&self, part: &PartRef) -> Result<Blob, FetchError> {
        let relative = as_maven_path(part);
        let path = self.path(&relative);
        trace!("reading {} from {}", part, path.display());

        let file = match OpenOptions::new().read(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(FetchError::NotFound),
            Err(e) => return Err(e.into()),
        };

        let checksum = match self.settings.checksum_policy {
            ChecksumPolicy::Ignore => None,
            _ => self.published_checksum(&relative).await,
        };
        if checksum.is_none() && self.settings.checksum_policy == ChecksumPolicy::Require {
            return Err(FetchError::MissingChecksum);
        }

        let validators = checksum.iter().map(validator_for).collect();
        Ok(Blob {
            data: Box::pin(ValidatingBody::new(ReaderStream::new(file), validators)),
            checksum,
        })
    }

    async fn fetch_metadata(&self, path: &str) -> Result<Bytes, FetchError> {
        match tokio::fs::read(self.path(path)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FetchError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Every version directory of the artifact, regardless of `maven-metadata.xml`
    async fn versions(&self, ident: &ArtifactIdentification) -> Result<Vec<Version>, FetchError> {
        let mut entries = match read_dir(self.path(&ident.as_path())).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(FetchError::NotFound),
            Err(e) => return Err(e.into()),
        };

        let mut result = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match Version::parse(&name) {
                Ok(version) if self.settings.serves(version.is_snapshot()) => result.push(version),
                Ok(_) => {}
                Err(_) => trace!("ignoring directory {} in {}", name, ident),
            }
        }
        result.sort();
        Ok(result)
    }

    async fn snapshot_version(&self, _coordinate: &Coordinate, _part: &PartIdentification) -> Result<Option<Version>, FetchError> {
        Ok(None)
    }

    /// A directory has no change feed, it is always read directly
    async fn poll_changes(&self, since: Option<DateTime<Utc>>) -> Result<ChangeSet, FetchError> {
        Ok(ChangeSet { changes: Vec::new(), watermark: since })
    }
}
