use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::maven::range::VersionRange;
use crate::maven::version::{Version, VersionParseError};

const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinateParseError {
    #[error("expected 'group:artifact', was {0:?}")]
    Identification(String),
    #[error("expected 'group:artifact#version', was {0:?}")]
    Coordinate(String),
    #[error("expected '[classifier:]type', was {0:?}")]
    Part(String),
    #[error("unknown scope {0:?}")]
    Scope(String),
    #[error(transparent)]
    Version(#[from] VersionParseError),
}

/// Identifies an artifact independent of its version, e.g. `org.slf4j:slf4j-api`.
///
/// Either component may be `*` when the identification is used as an exclusion pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactIdentification {
    pub group: String,
    pub artifact: String,
}

impl ArtifactIdentification {
    pub fn new(group: impl Into<String>, artifact: impl Into<String>) -> ArtifactIdentification {
        ArtifactIdentification {
            group: group.into(),
            artifact: artifact.into(),
        }
    }

    pub fn parse(s: &str) -> Result<ArtifactIdentification, CoordinateParseError> {
        match s.split_once(':') {
            Some((group, artifact)) if Self::is_valid_segment(group) && Self::is_valid_segment(artifact) => {
                Ok(ArtifactIdentification::new(group, artifact))
            }
            _ => Err(CoordinateParseError::Identification(s.to_string())),
        }
    }

    fn is_valid_segment(segment: &str) -> bool {
        !segment.is_empty() && !segment.contains([':', '#', '/', ' '])
    }

    /// `org/slf4j/slf4j-api`
    pub fn as_path(&self) -> String {
        format!("{}/{}", self.group.replace('.', "/"), self.artifact)
    }

    pub fn is_pattern(&self) -> bool {
        self.group == WILDCARD || self.artifact == WILDCARD
    }

    /// Treats `self` as an exclusion pattern, `*` matching any group or artifact id
    pub fn matches(&self, other: &ArtifactIdentification) -> bool {
        (self.group == WILDCARD || self.group == other.group)
            && (self.artifact == WILDCARD || self.artifact == other.artifact)
    }

    pub fn with_version(&self, version: Version) -> Coordinate {
        Coordinate {
            ident: self.clone(),
            version,
        }
    }
}

impl Display for ArtifactIdentification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.group, self.artifact)
    }
}

impl FromStr for ArtifactIdentification {
    type Err = CoordinateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtifactIdentification::parse(s)
    }
}

impl Serialize for ArtifactIdentification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ArtifactIdentification {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ArtifactIdentification::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// An artifact bound to a concrete version: `group:artifact#version`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    pub ident: ArtifactIdentification,
    pub version: Version,
}

impl Coordinate {
    pub fn new(group: impl Into<String>, artifact: impl Into<String>, version: Version) -> Coordinate {
        Coordinate {
            ident: ArtifactIdentification::new(group, artifact),
            version,
        }
    }

    /// Accepts the `group:artifact#version` notation as well as Maven's `group:artifact:version`
    pub fn parse(s: &str) -> Result<Coordinate, CoordinateParseError> {
        let (ident, version) = match s.split_once('#') {
            Some((ident, version)) => (ident, version),
            None => match s.rsplit_once(':') {
                Some((ident, version)) if ident.contains(':') => (ident, version),
                _ => return Err(CoordinateParseError::Coordinate(s.to_string())),
            },
        };
        let ident = ArtifactIdentification::parse(ident)
            .map_err(|_| CoordinateParseError::Coordinate(s.to_string()))?;
        let version = Version::parse(version)?;
        Ok(Coordinate { ident, version })
    }

    pub fn group(&self) -> &str {
        &self.ident.group
    }

    pub fn artifact(&self) -> &str {
        &self.ident.artifact
    }

    pub fn part(&self, part: PartIdentification) -> PartRef {
        PartRef {
            coordinate: self.clone(),
            part,
        }
    }
}

impl Display for Coordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.ident, self.version)
    }
}

impl FromStr for Coordinate {
    type Err = CoordinateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Coordinate::parse(s)
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Coordinate::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// One physical file of an artifact, e.g. the jar, the pom or the sources jar
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartIdentification {
    pub classifier: Option<String>,
    pub part_type: String,
}

impl PartIdentification {
    pub fn new(classifier: Option<&str>, part_type: &str) -> PartIdentification {
        PartIdentification {
            classifier: classifier.map(|c| c.to_string()),
            part_type: part_type.to_string(),
        }
    }

    pub fn pom() -> PartIdentification {
        PartIdentification::new(None, "pom")
    }

    pub fn jar() -> PartIdentification {
        PartIdentification::new(None, "jar")
    }

    pub fn sources() -> PartIdentification {
        PartIdentification::new(Some("sources"), "jar")
    }

    pub fn javadoc() -> PartIdentification {
        PartIdentification::new(Some("javadoc"), "jar")
    }

    /// `jar`, `sources:jar`, or one of the shorthands `sources` and `javadoc`
    pub fn parse(s: &str) -> Result<PartIdentification, CoordinateParseError> {
        match s.split_once(':') {
            Some((classifier, part_type)) if !classifier.is_empty() && !part_type.is_empty() => {
                Ok(PartIdentification::new(Some(classifier), part_type))
            }
            Some(_) => Err(CoordinateParseError::Part(s.to_string())),
            None => match s {
                "" => Err(CoordinateParseError::Part(s.to_string())),
                "sources" => Ok(Self::sources()),
                "javadoc" => Ok(Self::javadoc()),
                part_type => Ok(PartIdentification::new(None, part_type)),
            },
        }
    }

    /// The file extension for this part's type. Maven packaging types that are not file
    ///  extensions are mapped the way Maven's artifact handlers do.
    pub fn extension(&self) -> &str {
        match self.part_type.as_str() {
            "bundle" | "maven-plugin" | "ejb" | "test-jar" => "jar",
            other => other,
        }
    }

    pub fn file_name(&self, artifact: &str, version: &Version) -> String {
        match &self.classifier {
            None => format!("{}-{}.{}", artifact, version, self.extension()),
            Some(c) => format!("{}-{}-{}.{}", artifact, version, c, self.extension()),
        }
    }
}

impl Display for PartIdentification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.classifier {
            None => write!(f, "{}", self.part_type),
            Some(c) => write!(f, "{}:{}", c, self.part_type),
        }
    }
}

impl FromStr for PartIdentification {
    type Err = CoordinateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PartIdentification::parse(s)
    }
}

impl Serialize for PartIdentification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A concrete file: `group:artifact#version/classifier:type`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartRef {
    pub coordinate: Coordinate,
    pub part: PartIdentification,
}

impl PartRef {
    pub fn file_name(&self) -> String {
        self.part.file_name(self.coordinate.artifact(), &self.coordinate.version)
    }
}

impl Display for PartRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.coordinate, self.part)
    }
}

impl Serialize for PartRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Compile,
    Runtime,
    Provided,
    Test,
    System,
    Import,
}

impl Scope {
    pub fn parse(s: &str) -> Result<Scope, CoordinateParseError> {
        match s.trim() {
            "" | "compile" => Ok(Scope::Compile),
            "runtime" => Ok(Scope::Runtime),
            "provided" => Ok(Scope::Provided),
            "test" => Ok(Scope::Test),
            "system" => Ok(Scope::System),
            "import" => Ok(Scope::Import),
            other => Err(CoordinateParseError::Scope(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Compile => "compile",
            Scope::Runtime => "runtime",
            Scope::Provided => "provided",
            Scope::Test => "test",
            Scope::System => "system",
            Scope::Import => "import",
        }
    }

    /// The effective scope of a dependency declared with `declared` by an artifact that is
    ///  itself reached with scope `self`. `None` means the dependency is not inherited.
    pub fn transitive(self, declared: Scope) -> Option<Scope> {
        match declared {
            Scope::Provided | Scope::Test | Scope::System | Scope::Import => None,
            Scope::Compile => Some(self),
            Scope::Runtime => match self {
                Scope::Compile => Some(Scope::Runtime),
                other => Some(other),
            },
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = CoordinateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::parse(s)
    }
}

/// A declared edge from one artifact to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub target: ArtifactIdentification,
    pub version_range: VersionRange,
    pub scope: Scope,
    pub optional: bool,
    pub exclusions: BTreeSet<ArtifactIdentification>,
    pub part: PartIdentification,
}

impl Dependency {
    pub fn new(target: ArtifactIdentification, version_range: VersionRange) -> Dependency {
        Dependency {
            target,
            version_range,
            scope: Scope::Compile,
            optional: false,
            exclusions: BTreeSet::new(),
            part: PartIdentification::jar(),
        }
    }

    /// Dependency management and de-duplication treat dependencies with the same key as the same
    pub fn management_key(&self) -> (ArtifactIdentification, PartIdentification) {
        (self.target.clone(), self.part.clone())
    }

    pub fn is_import(&self) -> bool {
        self.scope == Scope::Import && self.part.part_type == "pom"
    }
}

impl Display for Dependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.target, self.version_range)?;
        if self.part != PartIdentification::jar() {
            write!(f, "/{}", self.part)?;
        }
        Ok(())
    }
}
