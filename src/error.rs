use serde::Serialize;

use crate::maven::coordinates::CoordinateParseError;
use crate::maven::range::RangeParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    /// an artifact referring to itself, e.g. as its own parent
    Direct,
    Transitive,
}

/// Why an artifact, a part or a subtree could not be resolved.
///
/// Reasons are attached to graph nodes and download outcomes rather than aborting the
///  resolution, so they are plain data: cloneable, comparable and serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum Reason {
    #[error("unresolved dependency {dependency}")]
    UnresolvedDependency {
        dependency: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cause: Option<Box<Reason>>,
    },
    #[error("{kind:?} cyclic reference: {}", .path.join(" -> "))]
    CyclicReference { kind: CycleKind, path: Vec<String> },
    #[error("checksum mismatch for {part}: expected {expected}, was {actual}")]
    ChecksumMismatch { part: String, expected: String, actual: String },
    #[error("repository {repository} rejected the credentials")]
    RepositoryUnauthenticated { repository: String },
    #[error("{part} is not in the local cache, and resolution is offline")]
    OfflineAndMissing { part: String },
    #[error("invalid version range {range:?}: {message}")]
    InvalidVersionRange { range: String, message: String },
    #[error("could not parse {subject}: {message}")]
    ParseError { subject: String, message: String },
    #[error("unresolved parent {parent}")]
    UnresolvedParent { parent: String, cause: Box<Reason> },
    #[error("unresolved import {import}")]
    UnresolvedImport { import: String, cause: Box<Reason> },
    #[error("unresolved property ${{{property}}} in {artifact}")]
    UnresolvedProperty { artifact: String, property: String },
    #[error("{artifact} declares {dependency} without a version, and no dependency management provides one")]
    UnresolvedManagedDependency { artifact: String, dependency: String },
    #[error("descriptor was requested as {expected} but declares {actual}")]
    IdentificationMismatch { expected: String, actual: String },
    #[error("{subject} not found")]
    NotFound { subject: String },
    #[error("network error on repository {repository}: {message}")]
    Network { repository: String, message: String },
    #[error("timeout accessing repository {repository}")]
    Timeout { repository: String },
    #[error("cancelled")]
    Cancelled,
    #[error("timed out waiting for lock {path}")]
    LockTimeout { path: String },
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl Reason {
    pub fn unresolved(dependency: impl ToString, cause: Reason) -> Reason {
        Reason::UnresolvedDependency {
            dependency: dependency.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn io(e: impl std::fmt::Display) -> Reason {
        Reason::Io { message: e.to_string() }
    }

    /// Follows nested causes to the innermost reason
    pub fn root_cause(&self) -> &Reason {
        match self {
            Reason::UnresolvedDependency { cause: Some(cause), .. } => cause.root_cause(),
            Reason::UnresolvedParent { cause, .. } | Reason::UnresolvedImport { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self.root_cause(), Reason::CyclicReference { .. })
    }

    /// Failures that may go away on a later attempt, as opposed to definitive answers
    pub fn is_transient(&self) -> bool {
        matches!(self, Reason::Network { .. } | Reason::Timeout { .. } | Reason::Io { .. } | Reason::LockTimeout { .. } | Reason::ChecksumMismatch { .. })
    }
}

impl From<RangeParseError> for Reason {
    fn from(e: RangeParseError) -> Self {
        let range = match &e {
            RangeParseError::Empty => String::new(),
            RangeParseError::Unbalanced(r) | RangeParseError::BoundCount(r) | RangeParseError::Inverted(r) => r.clone(),
            RangeParseError::Version { range, .. } => range.clone(),
        };
        Reason::InvalidVersionRange { range, message: e.to_string() }
    }
}

/// Failures that abort a whole resolution session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no repository configured")]
    NoRepository,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("malformed resolution request: {0}")]
    Request(String),
    #[error("resolution failed: {0}")]
    Strict(Reason),
    #[error("resolution was cancelled")]
    Cancelled,
    #[error("cache operation failed: {0}")]
    Cache(Reason),
    #[error("I/O error on the local cache: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoordinateParseError> for Error {
    fn from(e: CoordinateParseError) -> Self {
        Error::Request(e.to_string())
    }
}
