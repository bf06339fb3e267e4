use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_recursion::async_recursion;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::error::{CycleKind, Reason};
use crate::maven::coordinates::{ArtifactIdentification, Coordinate, Dependency, PartIdentification, Scope};
use crate::maven::pom::{RawDependency, RawDescriptor};
use crate::maven::range::VersionRange;
use crate::maven::version::Version;
use crate::resolve::properties::{PropertyError, PropertyResolver};
use crate::resolve::source::ArtifactSource;

const DEFAULT_PACKAGING: &str = "jar";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relocation {
    pub target: Coordinate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The parts of a descriptor that children inherit, still uninterpolated: a child's properties
///  and project values apply to what it inherits
#[derive(Debug, Clone, Default)]
struct InheritedModel {
    properties: BTreeMap<String, String>,
    dependencies: Vec<RawDependency>,
    management: Vec<RawDependency>,
}

/// A descriptor with its parent chain merged, properties substituted, imports expanded and
///  dependency management applied
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    pub coordinate: Coordinate,
    pub packaging: String,
    pub parent: Option<Coordinate>,
    pub properties: BTreeMap<String, String>,
    pub dependencies: Vec<Dependency>,
    pub dependency_management: Vec<Dependency>,
    pub relocation: Option<Relocation>,
    inherited: InheritedModel,
}

impl CompiledArtifact {
    /// The first management entry for a dependency's target and part
    pub fn managed(&self, target: &ArtifactIdentification, part: &PartIdentification) -> Option<&Dependency> {
        find_managed(&self.dependency_management, target, part)
    }
}

fn find_managed<'a>(management: &'a [Dependency], target: &ArtifactIdentification, part: &PartIdentification) -> Option<&'a Dependency> {
    management.iter().find(|d| &d.target == target && &d.part == part)
}

type Shared<T> = Arc<OnceCell<Result<T, Reason>>>;

/// Turns coordinates into [CompiledArtifact]s. Results are memoized for the lifetime of the
///  compiler (i.e. one resolution session), so it can be shared between concurrent walker tasks.
pub struct ArtifactCompiler {
    source: Arc<dyn ArtifactSource>,
    environment: BTreeMap<String, String>,
    compiled: DashMap<Coordinate, Result<Arc<CompiledArtifact>, Reason>>,
    descriptors: DashMap<Coordinate, Shared<Arc<RawDescriptor>>>,
    versions: DashMap<ArtifactIdentification, Shared<Arc<Vec<Version>>>>,
}

impl ArtifactCompiler {
    pub fn new(source: Arc<dyn ArtifactSource>, environment: BTreeMap<String, String>) -> ArtifactCompiler {
        ArtifactCompiler {
            source,
            environment,
            compiled: DashMap::new(),
            descriptors: DashMap::new(),
            versions: DashMap::new(),
        }
    }

    pub async fn resolve(&self, coordinate: &Coordinate) -> Result<Arc<CompiledArtifact>, Reason> {
        self.compile(coordinate, &[]).await
    }

    pub fn compiled_count(&self) -> usize {
        self.compiled.len()
    }

    /// All known versions of an artifact, ascending
    pub async fn versions(&self, ident: &ArtifactIdentification) -> Result<Arc<Vec<Version>>, Reason> {
        let cell = self.versions.entry(ident.clone()).or_default().clone();
        cell.get_or_init(|| async {
            let mut versions = self.source.versions(ident).await?;
            versions.sort();
            Ok(Arc::new(versions))
        }).await.clone()
    }

    /// The version a dependency resolves to: a fixed version directly, a range by the highest
    ///  version that matches it
    pub async fn select_version(&self, dependency: &Dependency) -> Result<Version, Reason> {
        if let Some(version) = dependency.version_range.direct_version() {
            return Ok(version.clone());
        }
        let versions = self.versions(&dependency.target).await
            .map_err(|e| Reason::unresolved(dependency, e))?;
        dependency.version_range.select(versions.iter())
            .cloned()
            .ok_or_else(|| Reason::unresolved(dependency, Reason::NotFound {
                subject: format!("version of {} in {}", dependency.target, dependency.version_range),
            }))
    }

    async fn descriptor(&self, coordinate: &Coordinate) -> Result<Arc<RawDescriptor>, Reason> {
        let cell = self.descriptors.entry(coordinate.clone()).or_default().clone();
        cell.get_or_init(|| async {
            self.source.descriptor(coordinate).await.map(Arc::new)
        }).await.clone()
    }

    /// `chain` holds the coordinates whose compilation is waiting for this one, via a parent or
    ///  an import
    #[async_recursion]
    async fn compile(&self, coordinate: &Coordinate, chain: &[Coordinate]) -> Result<Arc<CompiledArtifact>, Reason> {
        if let Some(first) = chain.iter().position(|c| c == coordinate) {
            let kind = if chain.last() == Some(coordinate) { CycleKind::Direct } else { CycleKind::Transitive };
            let mut path: Vec<String> = chain[first..].iter().map(|c| c.to_string()).collect();
            path.push(coordinate.to_string());
            debug!("cyclic reference: {}", path.join(" -> "));
            return Err(Reason::CyclicReference { kind, path });
        }

        if let Some(result) = self.compiled.get(coordinate).map(|r| r.value().clone()) {
            return result;
        }

        let mut chain = chain.to_vec();
        chain.push(coordinate.clone());
        let result = self.do_compile(coordinate, &chain).await;

        // a cycle depends on where compilation started, so it is not a property of the coordinate
        if !matches!(&result, Err(reason) if reason.is_cycle()) {
            self.compiled.insert(coordinate.clone(), result.clone());
        }
        result
    }

    async fn do_compile(&self, coordinate: &Coordinate, chain: &[Coordinate]) -> Result<Arc<CompiledArtifact>, Reason> {
        trace!("compiling {}", coordinate);
        let raw = self.descriptor(coordinate).await?;

        let parent_coordinate = match &raw.parent {
            None => None,
            Some(p) => {
                let version = Version::parse(p.version.trim()).map_err(|e| Reason::UnresolvedParent {
                    parent: format!("{}:{}#{}", p.group, p.artifact, p.version),
                    cause: Box::new(Reason::ParseError { subject: p.version.clone(), message: e.to_string() }),
                })?;
                Some(Coordinate::new(p.group.trim(), p.artifact.trim(), version))
            }
        };
        let parent = match &parent_coordinate {
            None => None,
            Some(parent_coordinate) => match self.compile(parent_coordinate, chain).await {
                Ok(parent) => Some(parent),
                Err(reason) if reason.is_cycle() => return Err(reason),
                Err(reason) => return Err(Reason::UnresolvedParent {
                    parent: parent_coordinate.to_string(),
                    cause: Box::new(reason),
                }),
            },
        };

        let inherited = Self::inherit(&raw, parent.as_deref());

        // project values, checked against what was asked for
        let group = raw.group.clone()
            .or_else(|| raw.parent.as_ref().map(|p| p.group.clone()))
            .unwrap_or_default();
        let version = raw.version.clone()
            .or_else(|| raw.parent.as_ref().map(|p| p.version.clone()))
            .unwrap_or_default();
        let packaging = raw.packaging.clone().unwrap_or_else(|| DEFAULT_PACKAGING.to_string());

        let mut resolver = PropertyResolver::new(&inherited.properties, &self.environment)
            .with_project_value("groupId", &group)
            .with_project_value("artifactId", &raw.artifact)
            .with_project_value("version", &version)
            .with_project_value("packaging", &packaging);
        if let Some(p) = &raw.parent {
            resolver = resolver
                .with_project_value("parent.groupId", &p.group)
                .with_project_value("parent.artifactId", &p.artifact)
                .with_project_value("parent.version", &p.version);
        }
        let property_error = |e: PropertyError| Reason::UnresolvedProperty {
            artifact: coordinate.to_string(),
            property: e.property().to_string(),
        };

        let declared_group = resolver.interpolate(group.trim()).map_err(property_error)?;
        let declared_version = resolver.interpolate(version.trim()).map_err(property_error)?;
        Self::check_identification(coordinate, &declared_group, &raw.artifact, &declared_version)?;

        let properties = inherited.properties.iter()
            .map(|(k, v)| Ok((k.clone(), resolver.interpolate(v).map_err(property_error)?)))
            .collect::<Result<BTreeMap<_, _>, Reason>>()?;

        let mut management = Vec::new();
        for raw_dependency in &inherited.management {
            let dependency = self.convert(coordinate, raw_dependency, &resolver, &[])?;
            if dependency.is_import() {
                let imported = self.import(&dependency, chain).await?;
                management.extend(imported.dependency_management.iter().cloned());
            }
            else {
                management.push(dependency);
            }
        }

        let mut dependencies = Vec::new();
        for raw_dependency in &inherited.dependencies {
            let dependency = self.convert(coordinate, raw_dependency, &resolver, &management)?;
            if dependency.scope != Scope::Import {
                dependencies.push(dependency);
            }
        }

        let relocation = match &raw.relocation {
            None => None,
            Some(r) => {
                let group = resolver.interpolate_opt(r.group.as_deref()).map_err(property_error)?;
                let artifact = resolver.interpolate_opt(r.artifact.as_deref()).map_err(property_error)?;
                let version = match resolver.interpolate_opt(r.version.as_deref()).map_err(property_error)? {
                    None => coordinate.version.clone(),
                    Some(v) => Version::parse(v.trim()).map_err(|e| Reason::ParseError {
                        subject: format!("relocation of {}", coordinate),
                        message: e.to_string(),
                    })?,
                };
                let target = Coordinate::new(
                    group.unwrap_or_else(|| coordinate.group().to_string()),
                    artifact.unwrap_or_else(|| coordinate.artifact().to_string()),
                    version,
                );
                if &target == coordinate {
                    None
                }
                else {
                    Some(Relocation { target, message: r.message.clone() })
                }
            }
        };

        Ok(Arc::new(CompiledArtifact {
            coordinate: coordinate.clone(),
            packaging,
            parent: parent_coordinate,
            properties,
            dependencies,
            dependency_management: management,
            relocation,
            inherited,
        }))
    }

    /// Child values first: own properties override the parent's, own dependencies and
    ///  management entries take precedence over inherited ones with the same key
    fn inherit(raw: &RawDescriptor, parent: Option<&CompiledArtifact>) -> InheritedModel {
        let Some(parent) = parent else {
            return InheritedModel {
                properties: raw.properties.clone(),
                dependencies: raw.dependencies.clone(),
                management: raw.dependency_management.clone(),
            };
        };

        let mut properties = parent.inherited.properties.clone();
        properties.extend(raw.properties.iter().map(|(k, v)| (k.clone(), v.clone())));

        let key = |d: &RawDependency| (d.group.clone(), d.artifact.clone(), d.part_type.clone(), d.classifier.clone());
        let own_keys: BTreeSet<_> = raw.dependencies.iter().map(key).collect();
        let mut dependencies = raw.dependencies.clone();
        dependencies.extend(parent.inherited.dependencies.iter().filter(|d| !own_keys.contains(&key(d))).cloned());

        let mut management = raw.dependency_management.clone();
        management.extend(parent.inherited.management.iter().cloned());

        InheritedModel { properties, dependencies, management }
    }

    fn check_identification(requested: &Coordinate, group: &str, artifact: &str, version: &str) -> Result<(), Reason> {
        let version_matches = requested.version.as_str() == version
            || requested.version.base_version() == version;
        if requested.group() != group || requested.artifact() != artifact.trim() || !version_matches {
            return Err(Reason::IdentificationMismatch {
                expected: requested.to_string(),
                actual: format!("{}:{}#{}", group, artifact.trim(), version),
            });
        }
        Ok(())
    }

    async fn import(&self, dependency: &Dependency, chain: &[Coordinate]) -> Result<Arc<CompiledArtifact>, Reason> {
        let version = dependency.version_range.direct_version().cloned().ok_or_else(|| Reason::UnresolvedImport {
            import: dependency.to_string(),
            cause: Box::new(Reason::InvalidVersionRange {
                range: dependency.version_range.to_string(),
                message: "imports require a fixed version".to_string(),
            }),
        })?;
        let coordinate = dependency.target.with_version(version);
        match self.compile(&coordinate, chain).await {
            Ok(imported) => Ok(imported),
            Err(reason) if reason.is_cycle() => Err(reason),
            Err(reason) => Err(Reason::UnresolvedImport {
                import: coordinate.to_string(),
                cause: Box::new(reason),
            }),
        }
    }

    /// Interpolates a declared dependency and completes it from dependency management
    fn convert(&self, owner: &Coordinate, raw: &RawDependency, resolver: &PropertyResolver, management: &[Dependency]) -> Result<Dependency, Reason> {
        let property_error = |e: PropertyError| Reason::UnresolvedProperty {
            artifact: owner.to_string(),
            property: e.property().to_string(),
        };
        let parse_error = |subject: &str, message: String| Reason::ParseError {
            subject: format!("{} of {} in {}", subject, raw.artifact, owner),
            message,
        };

        let group = resolver.interpolate(raw.group.trim()).map_err(property_error)?;
        let artifact = resolver.interpolate(raw.artifact.trim()).map_err(property_error)?;
        let target = ArtifactIdentification::new(group, artifact);

        let part_type = resolver.interpolate_opt(raw.part_type.as_deref()).map_err(property_error)?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "jar".to_string());
        let classifier = resolver.interpolate_opt(raw.classifier.as_deref()).map_err(property_error)?
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let part = PartIdentification::new(classifier.as_deref(), &part_type);

        let managed = find_managed(management, &target, &part);

        let version_range = match resolver.interpolate_opt(raw.version.as_deref()).map_err(property_error)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        {
            Some(v) => VersionRange::parse(&v)?,
            None => match managed {
                Some(m) => m.version_range.clone(),
                None => return Err(Reason::UnresolvedManagedDependency {
                    artifact: owner.to_string(),
                    dependency: target.to_string(),
                }),
            },
        };

        let scope = match resolver.interpolate_opt(raw.scope.as_deref()).map_err(property_error)? {
            Some(s) => Scope::parse(&s).map_err(|e| parse_error("scope", e.to_string()))?,
            None => managed.map(|m| m.scope).unwrap_or(Scope::Compile),
        };

        let optional = match resolver.interpolate_opt(raw.optional.as_deref()).map_err(property_error)? {
            Some(o) => match o.trim() {
                "true" => true,
                "false" | "" => false,
                other => return Err(parse_error("optional flag", format!("expected true or false, was {:?}", other))),
            },
            None => managed.map(|m| m.optional).unwrap_or(false),
        };

        let mut exclusions = BTreeSet::new();
        for (group, artifact) in &raw.exclusions {
            let group = resolver.interpolate(group.trim()).map_err(property_error)?;
            let artifact = resolver.interpolate(artifact.trim()).map_err(property_error)?;
            exclusions.insert(ArtifactIdentification::new(group, artifact));
        }
        if exclusions.is_empty() {
            if let Some(m) = managed {
                exclusions = m.exclusions.clone();
            }
        }

        Ok(Dependency {
            target,
            version_range,
            scope,
            optional,
            exclusions,
            part,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resolve::source::InMemoryArtifactSource;

    fn compiler(poms: &[&str]) -> (ArtifactCompiler, Arc<InMemoryArtifactSource>) {
        let mut source = InMemoryArtifactSource::new();
        for pom in poms {
            source.insert_pom(pom).unwrap();
        }
        let source = Arc::new(source);
        let environment = [("BUILD_ENV".to_string(), "ci".to_string())].into_iter().collect();
        (ArtifactCompiler::new(source.clone(), environment), source)
    }

    fn coordinate(s: &str) -> Coordinate {
        Coordinate::parse(s).unwrap()
    }

    const PARENT: &str = r#"<project>
        <groupId>org.acme</groupId><artifactId>parent</artifactId><version>1</version>
        <properties><slf4j.version>2.0.7</slf4j.version><guava.version>31.0</guava.version></properties>
        <dependencyManagement><dependencies>
            <dependency><groupId>com.google.guava</groupId><artifactId>guava</artifactId><version>${guava.version}</version><scope>runtime</scope></dependency>
            <dependency><groupId>org.acme</groupId><artifactId>bom</artifactId><version>1</version><type>pom</type><scope>import</scope></dependency>
        </dependencies></dependencyManagement>
        <dependencies>
            <dependency><groupId>org.slf4j</groupId><artifactId>slf4j-api</artifactId><version>${slf4j.version}</version></dependency>
            <dependency><groupId>junit</groupId><artifactId>junit</artifactId><version>4.13</version><scope>test</scope></dependency>
        </dependencies>
    </project>"#;

    const BOM: &str = r#"<project>
        <groupId>org.acme</groupId><artifactId>bom</artifactId><version>1</version><packaging>pom</packaging>
        <dependencyManagement><dependencies>
            <dependency><groupId>org.acme</groupId><artifactId>util</artifactId><version>5.1</version>
                <exclusions><exclusion><groupId>commons-logging</groupId><artifactId>*</artifactId></exclusion></exclusions>
            </dependency>
        </dependencies></dependencyManagement>
    </project>"#;

    const CHILD: &str = r#"<project>
        <parent><groupId>org.acme</groupId><artifactId>parent</artifactId><version>1</version></parent>
        <artifactId>lib</artifactId><version>2.0</version>
        <properties><slf4j.version>2.0.9</slf4j.version><build>${env.BUILD_ENV}</build></properties>
        <dependencies>
            <dependency><groupId>com.google.guava</groupId><artifactId>guava</artifactId></dependency>
            <dependency><groupId>org.acme</groupId><artifactId>util</artifactId></dependency>
            <dependency><groupId>junit</groupId><artifactId>junit</artifactId><version>4.12</version><scope>test</scope></dependency>
            <dependency><groupId>${project.groupId}</groupId><artifactId>lib-api</artifactId><version>${project.version}</version></dependency>
        </dependencies>
    </project>"#;

    #[tokio::test]
    async fn test_inheritance_management_and_properties() {
        let (compiler, _) = compiler(&[PARENT, BOM, CHILD]);
        let lib = compiler.resolve(&coordinate("org.acme:lib#2.0")).await.unwrap();

        assert_eq!(lib.parent, Some(coordinate("org.acme:parent#1")));
        assert_eq!(lib.properties.get("slf4j.version").map(|s| s.as_str()), Some("2.0.9"));
        assert_eq!(lib.properties.get("build").map(|s| s.as_str()), Some("ci"));

        let deps: Vec<String> = lib.dependencies.iter().map(|d| format!("{} {}", d, d.scope)).collect();
        assert_eq!(deps, vec![
            "com.google.guava:guava#31.0 runtime",
            "org.acme:util#5.1 compile",
            "junit:junit#4.12 test",
            "org.acme:lib-api#2.0 compile",
            // inherited, with the child's property value
            "org.slf4j:slf4j-api#2.0.9 compile",
        ]);

        let util = &lib.dependencies[1];
        assert!(util.exclusions.contains(&ArtifactIdentification::new("commons-logging", "*")));
        assert!(lib.managed(&ArtifactIdentification::new("org.acme", "util"), &PartIdentification::jar()).is_some());
    }

    #[tokio::test]
    async fn test_memoized() {
        let (compiler, source) = compiler(&[PARENT, BOM, CHILD]);
        compiler.resolve(&coordinate("org.acme:lib#2.0")).await.unwrap();
        let requests = source.requests();
        compiler.resolve(&coordinate("org.acme:lib#2.0")).await.unwrap();
        compiler.resolve(&coordinate("org.acme:parent#1")).await.unwrap();
        assert_eq!(source.requests(), requests);
        assert_eq!(compiler.compiled_count(), 3);
    }

    #[tokio::test]
    async fn test_self_parent_is_direct_cycle() {
        let (compiler, _) = compiler(&[r#"<project>
            <parent><groupId>org.acme</groupId><artifactId>a</artifactId><version>1</version></parent>
            <artifactId>a</artifactId>
        </project>"#]);

        let reason = compiler.resolve(&coordinate("org.acme:a#1")).await.unwrap_err();
        assert_eq!(reason, Reason::CyclicReference {
            kind: CycleKind::Direct,
            path: vec!["org.acme:a#1".to_string(), "org.acme:a#1".to_string()],
        });
    }

    #[tokio::test]
    async fn test_parent_chain_cycle_is_transitive() {
        let pom = |name: &str, parent: &str| format!(r#"<project>
            <parent><groupId>org.acme</groupId><artifactId>{}</artifactId><version>1</version></parent>
            <artifactId>{}</artifactId>
        </project>"#, parent, name);
        let (compiler, _) = compiler(&[pom("a", "b").as_str(), pom("b", "c").as_str(), pom("c", "a").as_str()]);

        let reason = compiler.resolve(&coordinate("org.acme:a#1")).await.unwrap_err();
        assert_eq!(reason, Reason::CyclicReference {
            kind: CycleKind::Transitive,
            path: ["a", "b", "c", "a"].iter().map(|n| format!("org.acme:{}#1", n)).collect(),
        });
        // not memoized, so the entry point is reflected in the path
        let reason = compiler.resolve(&coordinate("org.acme:b#1")).await.unwrap_err();
        assert!(matches!(reason, Reason::CyclicReference { path, .. } if path[0] == "org.acme:b#1"));
    }

    #[tokio::test]
    async fn test_self_import_is_direct_cycle() {
        let (compiler, _) = compiler(&[r#"<project>
            <groupId>org.acme</groupId><artifactId>bom</artifactId><version>1</version>
            <dependencyManagement><dependencies>
                <dependency><groupId>org.acme</groupId><artifactId>bom</artifactId><version>1</version><type>pom</type><scope>import</scope></dependency>
            </dependencies></dependencyManagement>
        </project>"#]);

        let reason = compiler.resolve(&coordinate("org.acme:bom#1")).await.unwrap_err();
        assert!(matches!(reason, Reason::CyclicReference { kind: CycleKind::Direct, .. }));
    }

    #[tokio::test]
    async fn test_failures() {
        let (compiler, _) = compiler(&[
            r#"<project><groupId>org.acme</groupId><artifactId>orphan</artifactId><version>1</version>
                <parent><groupId>org.acme</groupId><artifactId>missing</artifactId><version>1</version></parent></project>"#,
            r#"<project><groupId>org.acme</groupId><artifactId>unmanaged</artifactId><version>1</version>
                <dependencies><dependency><groupId>x</groupId><artifactId>y</artifactId></dependency></dependencies></project>"#,
            r#"<project><groupId>org.acme</groupId><artifactId>prop</artifactId><version>1</version>
                <dependencies><dependency><groupId>x</groupId><artifactId>y</artifactId><version>${undefined}</version></dependency></dependencies></project>"#,
            r#"<project><groupId>org.acme</groupId><artifactId>range</artifactId><version>1</version>
                <dependencies><dependency><groupId>x</groupId><artifactId>y</artifactId><version>[2.0,1.0]</version></dependency></dependencies></project>"#,
            r#"<project><groupId>org.acme</groupId><artifactId>liar</artifactId><version>3</version></project>"#,
        ]);

        assert!(matches!(compiler.resolve(&coordinate("org.acme:orphan#1")).await, Err(Reason::UnresolvedParent { .. })));
        assert!(matches!(compiler.resolve(&coordinate("org.acme:unmanaged#1")).await, Err(Reason::UnresolvedManagedDependency { .. })));
        assert_eq!(compiler.resolve(&coordinate("org.acme:prop#1")).await.unwrap_err(), Reason::UnresolvedProperty {
            artifact: "org.acme:prop#1".to_string(),
            property: "undefined".to_string(),
        });
        assert!(matches!(compiler.resolve(&coordinate("org.acme:range#1")).await, Err(Reason::InvalidVersionRange { .. })));
        assert!(matches!(compiler.resolve(&coordinate("org.acme:missing#1")).await, Err(Reason::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_identification_mismatch() {
        let mut source = InMemoryArtifactSource::new();
        let raw = crate::maven::pom::PomReader;
        let descriptor = crate::maven::pom::DescriptorReader::parse(&raw,
            b"<project><groupId>org.acme</groupId><artifactId>other</artifactId><version>1</version></project>").unwrap();
        source.insert(coordinate("org.acme:lib#1"), descriptor);
        let compiler = ArtifactCompiler::new(Arc::new(source), BTreeMap::new());

        assert!(matches!(compiler.resolve(&coordinate("org.acme:lib#1")).await, Err(Reason::IdentificationMismatch { .. })));
    }

    #[tokio::test]
    async fn test_relocation_and_version_selection() {
        let (compiler, _) = compiler(&[
            r#"<project><groupId>old</groupId><artifactId>lib</artifactId><version>1.0</version>
                <distributionManagement><relocation><groupId>new</groupId></relocation></distributionManagement></project>"#,
            r#"<project><groupId>new</groupId><artifactId>lib</artifactId><version>1.0</version></project>"#,
            r#"<project><groupId>new</groupId><artifactId>lib</artifactId><version>1.5</version></project>"#,
            r#"<project><groupId>new</groupId><artifactId>lib</artifactId><version>2.0</version></project>"#,
        ]);

        let old = compiler.resolve(&coordinate("old:lib#1.0")).await.unwrap();
        assert_eq!(old.relocation.as_ref().map(|r| r.target.clone()), Some(coordinate("new:lib#1.0")));

        let dependency = Dependency::new(ArtifactIdentification::new("new", "lib"), VersionRange::parse("[1.0,2.0)").unwrap());
        assert_eq!(compiler.select_version(&dependency).await.unwrap(), Version::parse("1.5").unwrap());

        let dependency = Dependency::new(ArtifactIdentification::new("new", "lib"), VersionRange::parse("[3.0,)").unwrap());
        assert!(matches!(compiler.select_version(&dependency).await, Err(Reason::UnresolvedDependency { .. })));
    }
}
