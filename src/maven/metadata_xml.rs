#![allow(non_snake_case)]

//! Deserialization of the `maven-metadata.xml` format described at
//!  https://maven.apache.org/ref/3.9.5/maven-repository-metadata/repository-metadata.html

use serde::Deserialize;
use tracing::debug;

use crate::maven::coordinates::{Coordinate, PartIdentification};
use crate::maven::version::Version;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    pub groupId: Option<String>,
    pub artifactId: Option<String>,
    pub version: Option<String>,
    pub versioning: Option<Versioning>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Versioning {
    pub latest: Option<String>,
    pub release: Option<String>,
    pub versions: Option<Versions>,
    pub lastUpdated: Option<String>,
    pub snapshot: Option<Snapshot>,
    pub snapshotVersions: Option<SnapshotVersions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Versions {
    #[serde(default)]
    pub version: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    pub timestamp: Option<String>,
    pub buildNumber: Option<u32>,
    pub localCopy: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotVersions {
    #[serde(default)]
    pub snapshotVersion: Vec<SnapshotVersion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotVersion {
    pub classifier: Option<String>,
    pub extension: String,
    pub value: String,
    pub updated: Option<String>,
}

impl Metadata {
    pub fn parse(data: &[u8]) -> anyhow::Result<Metadata> {
        Ok(serde_xml_rs::from_reader(data)?)
    }

    /// All listed versions that parse, in ascending order
    pub fn versions(&self) -> Vec<Version> {
        let mut result: Vec<Version> = self.versioning.iter()
            .flat_map(|v| v.versions.iter())
            .flat_map(|v| v.version.iter())
            .filter_map(|s| match Version::parse(s.trim()) {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!("skipping unparseable version {:?} in maven-metadata.xml: {}", s, e);
                    None
                }
            })
            .collect();
        result.sort();
        result.dedup();
        result
    }

    pub fn last_updated(&self) -> Option<&str> {
        self.versioning.as_ref()
            .and_then(|v| v.lastUpdated.as_deref())
    }

    /// For version-level metadata of a `-SNAPSHOT` version: the timestamped version that was
    ///  deployed last for the given part
    pub fn snapshot_version(&self, coordinate: &Coordinate, part: &PartIdentification) -> Option<Version> {
        let versioning = self.versioning.as_ref()?;

        let listed = versioning.snapshotVersions.iter()
            .flat_map(|s| s.snapshotVersion.iter())
            .find(|sv| sv.extension == part.extension() && sv.classifier.as_deref().filter(|c| !c.is_empty()) == part.classifier.as_deref());
        if let Some(sv) = listed {
            return Version::parse(sv.value.trim()).ok();
        }

        // older metadata only carries the latest timestamp and build number
        let snapshot = versioning.snapshot.as_ref()?;
        if snapshot.localCopy == Some(true) {
            return None;
        }
        let timestamp = snapshot.timestamp.as_ref()?;
        let base = coordinate.version.as_str().strip_suffix("-SNAPSHOT")?;
        let text = match snapshot.buildNumber {
            Some(n) => format!("{}-{}-{}", base, timestamp.trim(), n),
            None => format!("{}-{}", base, timestamp.trim()),
        };
        Version::parse(&text).ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ARTIFACT_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>org.acme</groupId>
  <artifactId>lib</artifactId>
  <versioning>
    <latest>2.0</latest>
    <release>2.0</release>
    <versions>
      <version>1.0</version>
      <version>2.0</version>
      <version>1.5</version>
      <version>not a version</version>
    </versions>
    <lastUpdated>20230102101112</lastUpdated>
  </versioning>
</metadata>"#;

    const SNAPSHOT_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata modelVersion="1.1.0">
  <groupId>org.acme</groupId>
  <artifactId>lib</artifactId>
  <version>1.0-SNAPSHOT</version>
  <versioning>
    <snapshot>
      <timestamp>20230102.101112</timestamp>
      <buildNumber>3</buildNumber>
    </snapshot>
    <lastUpdated>20230102101112</lastUpdated>
    <snapshotVersions>
      <snapshotVersion>
        <extension>jar</extension>
        <value>1.0-20230102.101112-3</value>
        <updated>20230102101112</updated>
      </snapshotVersion>
      <snapshotVersion>
        <classifier>sources</classifier>
        <extension>jar</extension>
        <value>1.0-20230102.101000-2</value>
        <updated>20230102101000</updated>
      </snapshotVersion>
    </snapshotVersions>
  </versioning>
</metadata>"#;

    #[test]
    fn test_versions() {
        let metadata = Metadata::parse(ARTIFACT_METADATA.as_bytes()).unwrap();
        let versions: Vec<String> = metadata.versions().iter().map(|v| v.to_string()).collect();
        assert_eq!(versions, vec!["1.0", "1.5", "2.0"]);
        assert_eq!(metadata.last_updated(), Some("20230102101112"));
    }

    #[test]
    fn test_snapshot_versions() {
        let metadata = Metadata::parse(SNAPSHOT_METADATA.as_bytes()).unwrap();
        let coordinate = Coordinate::parse("org.acme:lib#1.0-SNAPSHOT").unwrap();

        let jar = metadata.snapshot_version(&coordinate, &PartIdentification::jar()).unwrap();
        assert_eq!(jar.as_str(), "1.0-20230102.101112-3");

        let sources = metadata.snapshot_version(&coordinate, &PartIdentification::sources()).unwrap();
        assert_eq!(sources.as_str(), "1.0-20230102.101000-2");

        // not listed explicitly -> falls back to the snapshot element
        let pom = metadata.snapshot_version(&coordinate, &PartIdentification::pom()).unwrap();
        assert_eq!(pom.as_str(), "1.0-20230102.101112-3");
    }

    #[test]
    fn test_invalid_xml() {
        assert!(Metadata::parse(b"<metadata><versioning>").is_err());
    }
}
