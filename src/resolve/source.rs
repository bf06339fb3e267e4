use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::download::{DownloadManager, PartOutcome};
use crate::error::Reason;
use crate::maven::coordinates::{ArtifactIdentification, Coordinate, PartIdentification};
use crate::maven::pom::{DescriptorParseError, DescriptorReader, PomReader, RawDescriptor};
use crate::maven::version::Version;

/// Where declared descriptors and version listings come from
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn descriptor(&self, coordinate: &Coordinate) -> Result<RawDescriptor, Reason>;

    async fn versions(&self, ident: &ArtifactIdentification) -> Result<Vec<Version>, Reason>;
}

fn parse_error(coordinate: &Coordinate, e: DescriptorParseError) -> Reason {
    Reason::ParseError {
        subject: coordinate.to_string(),
        message: e.to_string(),
    }
}

/// Reads descriptors through the download manager, i.e. from the local cache or the repositories
pub struct RepositoryArtifactSource {
    downloads: Arc<DownloadManager>,
    reader: Arc<dyn DescriptorReader>,
}

impl RepositoryArtifactSource {
    pub fn new(downloads: Arc<DownloadManager>, reader: Arc<dyn DescriptorReader>) -> RepositoryArtifactSource {
        RepositoryArtifactSource { downloads, reader }
    }
}

#[async_trait]
impl ArtifactSource for RepositoryArtifactSource {
    async fn descriptor(&self, coordinate: &Coordinate) -> Result<RawDescriptor, Reason> {
        let part = coordinate.part(PartIdentification::pom());
        let path = match self.downloads.ensure_part(&part).await {
            PartOutcome::Failed { reason } => return Err(reason),
            outcome => match outcome.path() {
                Some(path) => path.to_path_buf(),
                None => return Err(Reason::NotFound { subject: part.to_string() }),
            },
        };
        trace!("reading descriptor {}", path.display());
        let data = tokio::fs::read(&path).await.map_err(Reason::io)?;
        self.reader.parse(&data).map_err(|e| parse_error(coordinate, e))
    }

    async fn versions(&self, ident: &ArtifactIdentification) -> Result<Vec<Version>, Reason> {
        self.downloads.versions(ident).await
    }
}

/// Descriptors held in memory, for tests and for embedding callers that produce descriptors
///  themselves
#[derive(Default)]
pub struct InMemoryArtifactSource {
    descriptors: BTreeMap<Coordinate, RawDescriptor>,
    requests: AtomicUsize,
}

impl InMemoryArtifactSource {
    pub fn new() -> InMemoryArtifactSource {
        Default::default()
    }

    pub fn insert(&mut self, coordinate: Coordinate, descriptor: RawDescriptor) {
        self.descriptors.insert(coordinate, descriptor);
    }

    /// Adds a POM, registered under the coordinate it declares (falling back to its parent's
    ///  group and version)
    pub fn insert_pom(&mut self, pom: &str) -> Result<Coordinate, Reason> {
        let descriptor = PomReader.parse(pom.as_bytes())
            .map_err(|e| Reason::ParseError { subject: "pom".to_string(), message: e.to_string() })?;

        let group = descriptor.group.clone()
            .or_else(|| descriptor.parent.as_ref().map(|p| p.group.clone()))
            .ok_or_else(|| Reason::ParseError { subject: descriptor.artifact.clone(), message: "no groupId".to_string() })?;
        let version = descriptor.version.clone()
            .or_else(|| descriptor.parent.as_ref().map(|p| p.version.clone()))
            .ok_or_else(|| Reason::ParseError { subject: descriptor.artifact.clone(), message: "no version".to_string() })?;
        let version = Version::parse(&version)
            .map_err(|e| Reason::ParseError { subject: descriptor.artifact.clone(), message: e.to_string() })?;

        let coordinate = Coordinate::new(group, descriptor.artifact.clone(), version);
        self.descriptors.insert(coordinate.clone(), descriptor);
        Ok(coordinate)
    }

    /// How often a descriptor was asked for
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactSource for InMemoryArtifactSource {
    async fn descriptor(&self, coordinate: &Coordinate) -> Result<RawDescriptor, Reason> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let key = if coordinate.version.is_snapshot() {
            // timestamped requests are served by the -SNAPSHOT descriptor
            self.descriptors.keys()
                .find(|c| c.ident == coordinate.ident && c.version.base_version() == coordinate.version.base_version())
        }
        else {
            self.descriptors.get_key_value(coordinate).map(|(k, _)| k)
        };
        key.and_then(|k| self.descriptors.get(k))
            .cloned()
            .ok_or_else(|| Reason::NotFound { subject: coordinate.part(PartIdentification::pom()).to_string() })
    }

    async fn versions(&self, ident: &ArtifactIdentification) -> Result<Vec<Version>, Reason> {
        let versions: BTreeSet<Version> = self.descriptors.keys()
            .filter(|c| &c.ident == ident)
            .map(|c| c.version.clone())
            .collect();
        if versions.is_empty() {
            return Err(Reason::NotFound { subject: ident.to_string() });
        }
        Ok(versions.into_iter().collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_source() {
        let mut source = InMemoryArtifactSource::new();
        let coordinate = source.insert_pom(r#"<project>
            <parent><groupId>org.acme</groupId><artifactId>parent</artifactId><version>1</version></parent>
            <artifactId>lib</artifactId>
            <version>1.0</version>
        </project>"#).unwrap();
        assert_eq!(coordinate.to_string(), "org.acme:lib#1.0");

        assert_eq!(source.descriptor(&coordinate).await.unwrap().artifact, "lib");
        assert!(matches!(source.descriptor(&Coordinate::parse("org.acme:lib#2.0").unwrap()).await, Err(Reason::NotFound { .. })));
        assert_eq!(source.requests(), 2);

        let versions = source.versions(&ArtifactIdentification::new("org.acme", "lib")).await.unwrap();
        assert_eq!(versions, vec![Version::parse("1.0").unwrap()]);
    }
}
