use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RepositorySettings;
use crate::error::Reason;
use crate::maven::coordinates::{ArtifactIdentification, Coordinate, PartIdentification, PartRef};
use crate::maven::version::Version;
use crate::util::blob::Blob;
use crate::util::checksum::ChecksumFailure;
use crate::util::idle_timeout::BodyStalled;

/// The answer to "does this repository have this part?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Available,
    NotFound,
    Unknown(Reason),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    ChecksumMismatch(ChecksumFailure),
    #[error("no checksum published")]
    MissingChecksum,
    #[error("unauthenticated (HTTP {0})")]
    Unauthenticated(u16),
    #[error("repository is offline")]
    Offline,
    #[error("timeout")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl FetchError {
    pub fn into_reason(self, repository: &str, subject: &str) -> Reason {
        match self {
            FetchError::NotFound => Reason::NotFound { subject: subject.to_string() },
            FetchError::ChecksumMismatch(failure) => Reason::ChecksumMismatch {
                part: subject.to_string(),
                expected: failure.expected,
                actual: failure.actual,
            },
            FetchError::MissingChecksum => Reason::Network {
                repository: repository.to_string(),
                message: format!("no checksum published for {}", subject),
            },
            FetchError::Unauthenticated(_) => Reason::RepositoryUnauthenticated { repository: repository.to_string() },
            FetchError::Offline => Reason::OfflineAndMissing { part: subject.to_string() },
            FetchError::Timeout => Reason::Timeout { repository: repository.to_string() },
            FetchError::Network(message) => Reason::Network { repository: repository.to_string(), message },
            FetchError::Io(message) => Reason::Io { message },
        }
    }

    /// Errors for which another attempt (or another repository) may give a different answer
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout | FetchError::Network(_) | FetchError::Io(_) | FetchError::ChecksumMismatch(_))
    }

    /// Unwraps checksum failures and stalls reported from inside a validated stream
    pub fn from_stream_error(e: anyhow::Error) -> FetchError {
        if e.is::<BodyStalled>() {
            return FetchError::Timeout;
        }
        match e.downcast::<ChecksumFailure>() {
            Ok(failure) => FetchError::ChecksumMismatch(failure),
            Err(e) => FetchError::Network(format!("{:#}", e)),
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Io(e.to_string())
    }
}

/// One entry of a repository's change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub artifact: ArtifactIdentification,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
    /// the point in time to poll from next
    pub watermark: Option<DateTime<Utc>>,
}

/// Uniform access to a Maven-layout repository
#[async_trait]
pub trait Repository: Send + Sync {
    fn settings(&self) -> &RepositorySettings;

    fn id(&self) -> &str {
        &self.settings().id
    }

    async fn probe(&self, part: &PartRef) -> Probe;

    /// Streams a part, validating it against its published checksum according to the
    ///  repository's checksum policy
    async fn fetch(&self, part: &PartRef) -> Result<Blob, FetchError>;

    /// Raw content of a metadata file at a path relative to the repository root
    async fn fetch_metadata(&self, path: &str) -> Result<Bytes, FetchError>;

    async fn versions(&self, ident: &ArtifactIdentification) -> Result<Vec<Version>, FetchError>;

    /// The timestamped version a `-SNAPSHOT` part was deployed as, `None` if the repository
    ///  stores it under its `-SNAPSHOT` name
    async fn snapshot_version(&self, coordinate: &Coordinate, part: &PartIdentification) -> Result<Option<Version>, FetchError>;

    async fn poll_changes(&self, since: Option<DateTime<Utc>>) -> Result<ChangeSet, FetchError>;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::checksum::ChecksumAlgorithm;

    #[test]
    fn test_checksum_mismatch_is_distinct_from_not_found() {
        let mismatch = FetchError::ChecksumMismatch(ChecksumFailure {
            algorithm: ChecksumAlgorithm::Sha1,
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        });
        assert!(matches!(mismatch.into_reason("central", "g:a#1/jar"), Reason::ChecksumMismatch { .. }));
        assert!(matches!(FetchError::NotFound.into_reason("central", "g:a#1/jar"), Reason::NotFound { .. }));
    }

    #[test]
    fn test_from_stream_error() {
        let failure = ChecksumFailure { algorithm: ChecksumAlgorithm::Md5, expected: "a".to_string(), actual: "b".to_string() };
        assert_eq!(FetchError::from_stream_error(failure.clone().into()), FetchError::ChecksumMismatch(failure));
        assert!(matches!(FetchError::from_stream_error(anyhow::anyhow!("reset")), FetchError::Network(_)));
        assert_eq!(FetchError::from_stream_error(BodyStalled(std::time::Duration::from_secs(1)).into()), FetchError::Timeout);
    }
}
