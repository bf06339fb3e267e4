#![allow(non_snake_case)]

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorParseError {
    #[error("malformed descriptor: {0}")]
    Malformed(String),
    #[error("descriptor lacks required element <{0}>")]
    Missing(&'static str),
}

/// A declared descriptor as read, before parent, property and management resolution. All strings
///  may still contain `${...}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDescriptor {
    pub group: Option<String>,
    pub artifact: String,
    pub version: Option<String>,
    pub packaging: Option<String>,
    pub parent: Option<RawParent>,
    pub properties: BTreeMap<String, String>,
    pub dependencies: Vec<RawDependency>,
    pub dependency_management: Vec<RawDependency>,
    pub relocation: Option<RawRelocation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawParent {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDependency {
    pub group: String,
    pub artifact: String,
    pub version: Option<String>,
    pub scope: Option<String>,
    pub optional: Option<String>,
    pub part_type: Option<String>,
    pub classifier: Option<String>,
    pub exclusions: Vec<(String, String)>,
}

impl RawDependency {
    pub fn new(group: &str, artifact: &str, version: Option<&str>) -> RawDependency {
        RawDependency {
            group: group.to_string(),
            artifact: artifact.to_string(),
            version: version.map(|v| v.to_string()),
            ..Default::default()
        }
    }
}

/// `distributionManagement/relocation`: every element is optional and defaults to the
///  relocated artifact's own value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRelocation {
    pub group: Option<String>,
    pub artifact: Option<String>,
    pub version: Option<String>,
    pub message: Option<String>,
}

/// Turns the bytes of a declared descriptor into its raw form
pub trait DescriptorReader: Send + Sync {
    fn parse(&self, data: &[u8]) -> Result<RawDescriptor, DescriptorParseError>;
}

/// Reads the subset of the POM format that is relevant for dependency resolution
#[derive(Debug, Default, Clone, Copy)]
pub struct PomReader;

impl DescriptorReader for PomReader {
    fn parse(&self, data: &[u8]) -> Result<RawDescriptor, DescriptorParseError> {
        let pom: PomXml = serde_xml_rs::from_reader(data)
            .map_err(|e| DescriptorParseError::Malformed(e.to_string()))?;

        let artifact = pom.artifactId
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or(DescriptorParseError::Missing("artifactId"))?;

        let parent = match pom.parent {
            None => None,
            Some(p) => Some(RawParent {
                group: p.groupId.ok_or(DescriptorParseError::Missing("parent/groupId"))?,
                artifact: p.artifactId.ok_or(DescriptorParseError::Missing("parent/artifactId"))?,
                version: p.version.ok_or(DescriptorParseError::Missing("parent/version"))?,
            }),
        };

        let dependencies = pom.dependencies
            .map(|d| d.dependency)
            .unwrap_or_default()
            .into_iter()
            .map(DependencyXml::into_raw)
            .collect::<Result<Vec<_>, _>>()?;

        let dependency_management = pom.dependencyManagement
            .and_then(|dm| dm.dependencies)
            .map(|d| d.dependency)
            .unwrap_or_default()
            .into_iter()
            .map(DependencyXml::into_raw)
            .collect::<Result<Vec<_>, _>>()?;

        let relocation = pom.distributionManagement
            .and_then(|dm| dm.relocation)
            .map(|r| RawRelocation {
                group: r.groupId,
                artifact: r.artifactId,
                version: r.version,
                message: r.message,
            });

        Ok(RawDescriptor {
            group: pom.groupId,
            artifact,
            version: pom.version,
            packaging: pom.packaging,
            parent,
            properties: pom.properties
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.trim().to_string()))
                .collect(),
            dependencies,
            dependency_management,
            relocation,
        })
    }
}

#[derive(Deserialize)]
struct PomXml {
    groupId: Option<String>,
    artifactId: Option<String>,
    version: Option<String>,
    packaging: Option<String>,
    parent: Option<ParentXml>,
    properties: Option<HashMap<String, String>>,
    dependencies: Option<DependenciesXml>,
    dependencyManagement: Option<DependencyManagementXml>,
    distributionManagement: Option<DistributionManagementXml>,
}

#[derive(Deserialize)]
struct ParentXml {
    groupId: Option<String>,
    artifactId: Option<String>,
    version: Option<String>,
}

#[derive(Deserialize)]
struct DependenciesXml {
    #[serde(default)]
    dependency: Vec<DependencyXml>,
}

#[derive(Deserialize)]
struct DependencyManagementXml {
    dependencies: Option<DependenciesXml>,
}

#[derive(Deserialize)]
struct DependencyXml {
    groupId: Option<String>,
    artifactId: Option<String>,
    version: Option<String>,
    scope: Option<String>,
    optional: Option<String>,
    #[serde(rename = "type")]
    part_type: Option<String>,
    classifier: Option<String>,
    exclusions: Option<ExclusionsXml>,
}

impl DependencyXml {
    fn into_raw(self) -> Result<RawDependency, DescriptorParseError> {
        Ok(RawDependency {
            group: self.groupId.ok_or(DescriptorParseError::Missing("dependency/groupId"))?,
            artifact: self.artifactId.ok_or(DescriptorParseError::Missing("dependency/artifactId"))?,
            version: self.version,
            scope: self.scope,
            optional: self.optional,
            part_type: self.part_type,
            classifier: self.classifier,
            exclusions: self.exclusions
                .map(|e| e.exclusion)
                .unwrap_or_default()
                .into_iter()
                .map(|e| (
                    e.groupId.unwrap_or_else(|| "*".to_string()),
                    e.artifactId.unwrap_or_else(|| "*".to_string()),
                ))
                .collect(),
        })
    }
}

#[derive(Deserialize)]
struct ExclusionsXml {
    #[serde(default)]
    exclusion: Vec<ExclusionXml>,
}

#[derive(Deserialize)]
struct ExclusionXml {
    groupId: Option<String>,
    artifactId: Option<String>,
}

#[derive(Deserialize)]
struct DistributionManagementXml {
    relocation: Option<RelocationXml>,
}

#[derive(Deserialize)]
struct RelocationXml {
    groupId: Option<String>,
    artifactId: Option<String>,
    version: Option<String>,
    message: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <parent>
    <groupId>org.acme</groupId>
    <artifactId>acme-parent</artifactId>
    <version>3</version>
  </parent>
  <artifactId>lib</artifactId>
  <version>1.0</version>
  <packaging>jar</packaging>
  <properties>
    <slf4j.version>2.0.7</slf4j.version>
    <encoding>UTF-8</encoding>
  </properties>
  <dependencyManagement>
    <dependencies>
      <dependency>
        <groupId>org.acme</groupId>
        <artifactId>acme-bom</artifactId>
        <version>1.2</version>
        <type>pom</type>
        <scope>import</scope>
      </dependency>
    </dependencies>
  </dependencyManagement>
  <dependencies>
    <dependency>
      <groupId>org.slf4j</groupId>
      <artifactId>slf4j-api</artifactId>
      <version>${slf4j.version}</version>
      <exclusions>
        <exclusion>
          <groupId>org.unwanted</groupId>
          <artifactId>*</artifactId>
        </exclusion>
      </exclusions>
    </dependency>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <scope>test</scope>
      <optional>true</optional>
    </dependency>
  </dependencies>
  <build>
    <plugins>
      <plugin>
        <artifactId>maven-compiler-plugin</artifactId>
      </plugin>
    </plugins>
  </build>
</project>"#;

    #[test]
    fn test_parse_pom() {
        let raw = PomReader.parse(POM.as_bytes()).unwrap();

        assert_eq!(raw.group, None);
        assert_eq!(raw.artifact, "lib");
        assert_eq!(raw.version.as_deref(), Some("1.0"));
        assert_eq!(raw.parent, Some(RawParent {
            group: "org.acme".to_string(),
            artifact: "acme-parent".to_string(),
            version: "3".to_string(),
        }));
        assert_eq!(raw.properties.get("slf4j.version").map(|s| s.as_str()), Some("2.0.7"));

        assert_eq!(raw.dependencies.len(), 2);
        let slf4j = &raw.dependencies[0];
        assert_eq!(slf4j.version.as_deref(), Some("${slf4j.version}"));
        assert_eq!(slf4j.exclusions, vec![("org.unwanted".to_string(), "*".to_string())]);
        let junit = &raw.dependencies[1];
        assert_eq!(junit.version, None);
        assert_eq!(junit.scope.as_deref(), Some("test"));
        assert_eq!(junit.optional.as_deref(), Some("true"));

        assert_eq!(raw.dependency_management.len(), 1);
        assert_eq!(raw.dependency_management[0].part_type.as_deref(), Some("pom"));
        assert_eq!(raw.dependency_management[0].scope.as_deref(), Some("import"));
        assert!(raw.relocation.is_none());
    }

    #[test]
    fn test_parse_relocation() {
        let pom = r#"<project>
  <groupId>old.group</groupId>
  <artifactId>lib</artifactId>
  <version>1.0</version>
  <distributionManagement>
    <relocation>
      <groupId>new.group</groupId>
      <message>moved</message>
    </relocation>
  </distributionManagement>
</project>"#;
        let raw = PomReader.parse(pom.as_bytes()).unwrap();
        let relocation = raw.relocation.unwrap();
        assert_eq!(relocation.group.as_deref(), Some("new.group"));
        assert_eq!(relocation.artifact, None);
        assert_eq!(relocation.message.as_deref(), Some("moved"));
    }

    #[test]
    fn test_missing_artifact_id() {
        let pom = "<project><groupId>g</groupId><version>1</version></project>";
        assert_eq!(PomReader.parse(pom.as_bytes()), Err(DescriptorParseError::Missing("artifactId")));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(PomReader.parse(b"<project><artifactId>"), Err(DescriptorParseError::Malformed(_))));
    }
}
