use anyhow::anyhow;
use lazy_static::lazy_static;
use regex::Regex;

use crate::maven::coordinates::*;
use crate::maven::version::Version;

lazy_static! {
    static ref SNAPSHOT_FILE_SUFFIX: Regex = Regex::new(r"^(\d{8}\.\d{6})(?:-(\d+))?(?:-(.+))?$").unwrap();
}

const SNAPSHOT_DIR_SUFFIX: &str = "SNAPSHOT";

/// `org/acme/lib/1.0-SNAPSHOT`
pub fn version_directory(coordinate: &Coordinate) -> String {
    format!("{}/{}", coordinate.ident.as_path(), coordinate.version.base_version())
}

/// The path of a part relative to a Maven repository's root, e.g.
///  `org/acme/lib/1.0-SNAPSHOT/lib-1.0-20230102.101112-3-sources.jar`
pub fn as_maven_path(part_ref: &PartRef) -> String {
    format!("{}/{}", version_directory(&part_ref.coordinate), part_ref.file_name())
}

/// `org/acme/lib/maven-metadata.xml`, listing the versions of an artifact
pub fn artifact_metadata_path(ident: &ArtifactIdentification) -> String {
    format!("{}/maven-metadata.xml", ident.as_path())
}

/// `org/acme/lib/1.0-SNAPSHOT/maven-metadata.xml`, resolving a snapshot to its latest deployment
pub fn version_metadata_path(coordinate: &Coordinate) -> String {
    format!("{}/maven-metadata.xml", version_directory(coordinate))
}

/// The name under which a repository's metadata file is cached locally
pub fn cached_metadata_file_name(repository_id: &str) -> String {
    format!("maven-metadata-{}.xml", repository_id)
}

fn parse_maven_filename<'a>(file_name: &'a str, artifact_id: &str, version_string: &str) -> anyhow::Result<ParseFilenameResult<'a>> {
    let full_file_name = file_name;
    if file_name.len() < artifact_id.len() + version_string.len() + 2 {
        return Err(anyhow!("not a valid maven file name: {}", full_file_name));
    }

    if !file_name.starts_with(artifact_id) || !file_name[artifact_id.len()..].starts_with('-') {
        return Err(anyhow!("{} is not a valid maven file name: expected to start with artifact id {}", full_file_name, artifact_id));
    }
    let file_name = &file_name[artifact_id.len()+1 ..];

    let (file_name, extension) = match file_name.rfind('.') {
        Some(last_dot) => (&file_name[..last_dot], &file_name[last_dot+1..]),
        None => return Err(anyhow!("{} is not a valid maven file name: no extension", full_file_name)),
    };

    if let Some(base) = version_string.strip_suffix(SNAPSHOT_DIR_SUFFIX).filter(|b| b.ends_with('-')) {
        // <artifactId>-<base>-SNAPSHOT[-<classifier>].<extension> for locally installed snapshots,
        // <artifactId>-<base>-<timestamp>-<buildNumber>[-<classifier>].<extension> for deployed ones

        if !file_name.starts_with(base) {
            return Err(anyhow!("{} is not a valid maven file name: expected to have version string {}", full_file_name, version_string));
        }
        let rest = &file_name[base.len()..];

        if let Some(classifier) = rest.strip_prefix(SNAPSHOT_DIR_SUFFIX) {
            return Ok(ParseFilenameResult {
                version: Version::parse(version_string)?,
                classifier: parse_classifier(classifier, full_file_name)?,
                extension,
            });
        }

        let captures = SNAPSHOT_FILE_SUFFIX.captures(rest)
            .ok_or_else(|| anyhow!("snapshot file name does not contain a timestamp: {}", full_file_name))?;

        let version_end = base.len() + captures.get(2).or_else(|| captures.get(1)).map(|m| m.end()).unwrap_or_default();
        let version = Version::parse(&file_name[..version_end])?;

        Ok(ParseFilenameResult {
            version,
            classifier: captures.get(3).map(|m| m.as_str()),
            extension,
        })
    }
    else {
        //  <artifactId>-<version>[-<classifier>].<extension>

        if !file_name.starts_with(version_string) {
            return Err(anyhow!("{} is not a valid maven file name: expected to have version string {}", full_file_name, version_string));
        }

        Ok(ParseFilenameResult {
            version: Version::parse(version_string)?,
            classifier: parse_classifier(&file_name[version_string.len()..], full_file_name)?,
            extension,
        })
    }
}

fn parse_classifier<'a>(raw: &'a str, full_file_name: &str) -> anyhow::Result<Option<&'a str>> {
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.strip_prefix('-') {
        Some(c) if !c.is_empty() => Ok(Some(c)),
        _ => Err(anyhow!("not a valid maven file name - invalid classifier format: {}", full_file_name)),
    }
}

/// path is the relative path inside a maven repository, i.e. it starts with something like
///  "org/..." or "com/..."
pub fn parse_maven_path(path: &str) -> anyhow::Result<PartRef> {
    let path = path.trim_start_matches('/');

    if let Some(last_slash) = path.rfind('/') {
        let (without_filename, file_name) = path.split_at(last_slash);
        let file_name = &file_name[1..];

        if let Some(last_slash) = without_filename.rfind('/') {
            let (without_version, version) = without_filename.split_at(last_slash);
            let version = &version[1..];

            if let Some(last_slash) = without_version.rfind('/') {
                let (group_id, artifact_id) = without_version.split_at(last_slash);
                let artifact_id = &artifact_id[1..];

                let parsed_filename = parse_maven_filename(file_name, artifact_id, version)?;

                return Ok(PartRef {
                    coordinate: Coordinate::new(group_id.replace('/', "."), artifact_id, parsed_filename.version),
                    part: PartIdentification::new(parsed_filename.classifier, parsed_filename.extension),
                });
            }
        }
    }

    Err(anyhow::Error::msg(format!("not a valid Maven artifact path: {:?}", path)))
}

#[derive(Debug, Eq, PartialEq)]
struct ParseFilenameResult<'a> {
    version: Version,
    classifier: Option<&'a str>,
    extension: &'a str, // without leading '.', e.g. "jar"
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    fn result<'a>(version: &str, classifier: Option<&'a str>, extension: &'a str) -> Option<ParseFilenameResult<'a>> {
        Some(ParseFilenameResult { version: Version::parse(version).unwrap(), classifier, extension })
    }

    #[rstest]
    #[case::release("a-1.0.0.jar", "a", "1.0.0", result("1.0.0", None, "jar"))]
    #[case::release_with_dash("x-y-1.0.0.jar", "x-y", "1.0.0", result("1.0.0", None, "jar"))]
    #[case::release_version_with_dash_suffix("x-1.0.0-y.jar", "x", "1.0.0-y", result("1.0.0-y", None, "jar"))]
    #[case::release_extension("q-1.0.0.abc", "q", "1.0.0", result("1.0.0", None, "abc"))]
    #[case::release_classifier("a-1.0.0-cla.jar", "a", "1.0.0", result("1.0.0", Some("cla"), "jar"))]
    #[case::release_classifier_with_dash("a-1.0.0-cla-rst.jar", "a", "1.0.0", result("1.0.0", Some("cla-rst"), "jar"))]
    #[case::release_classifier_with_dash_suffix("a-1.0.0-cla-rst.jar", "a", "1.0.0-cla", result("1.0.0-cla", Some("rst"), "jar"))]
    #[case::release_invalid_too_short_1("xxxxxx", "a", "1.0.0", None)]
    #[case::release_invalid_too_short_2("", "a", "1.0.0", None)]
    #[case::release_invalid_wrong_artifact("a-1.0.0.jar", "b", "1.0.0", None)]
    #[case::release_invalid_no_dash_after_artifact("a1.0.0.jar", "a", "1.0.0", None)]
    #[case::release_invalid_wrong_version("a-1.0.0.jar", "a", "1.0.1", None)]
    #[case::release_invalid_no_version("a.jar", "a", "1.0.0", None)]
    #[case::release_invalid_no_dash_before_classifier("a-1.0.0xyz.jar", "a", "1.0.0", None)]

    #[case::snapshot_local("a-1.0.0-SNAPSHOT.jar", "a", "1.0.0-SNAPSHOT", result("1.0.0-SNAPSHOT", None, "jar"))]
    #[case::snapshot_local_classifier("a-1.0.0-SNAPSHOT-sources.jar", "a", "1.0.0-SNAPSHOT", result("1.0.0-SNAPSHOT", Some("sources"), "jar"))]
    #[case::snapshot_timestamp("a-1.0.0-12345678.123456.jar", "a", "1.0.0-SNAPSHOT", result("1.0.0-12345678.123456", None, "jar"))]
    #[case::snapshot_build_number("a-1.0.0-12345678.123456-5.jar", "a", "1.0.0-SNAPSHOT", result("1.0.0-12345678.123456-5", None, "jar"))]
    #[case::snapshot_classifier("a-1.0.0-12345678.123456-5-cla.jar", "a", "1.0.0-SNAPSHOT", result("1.0.0-12345678.123456-5", Some("cla"), "jar"))]
    #[case::snapshot_classifier_with_dash("a-1.0.0-22222222.222222-5-a-b-c.jar", "a", "1.0.0-SNAPSHOT", result("1.0.0-22222222.222222-5", Some("a-b-c"), "jar"))]
    #[case::snapshot_invalid_no_timestamp("a-1.0.0-a-b-c.jar", "a", "1.0.0-SNAPSHOT", None)]
    #[case::snapshot_invalid_too_short("xxxxxxxxxxxxxxx", "a", "1.0.0-SNAPSHOT", None)]
    #[case::snapshot_invalid_wrong_artifact("a-1.0.0-11111111.222222-1.jar", "b", "1.0.0-SNAPSHOT", None)]
    #[case::snapshot_invalid_wrong_version("a-1.0.0-11111111.222222-1.jar", "a", "1.0.1-SNAPSHOT", None)]
    #[case::snapshot_invalid_no_version("a.jar", "a", "1.0.0-SNAPSHOT", None)]

    #[case::lowercase_snapshot_is_a_release("a-1.0.0-snapshot-x.jar", "a", "1.0.0-snapshot", result("1.0.0-snapshot", Some("x"), "jar"))]
    fn test_parse_filename(#[case] file_name: &str, #[case] artifact_id: &str, #[case] version_string: &str, #[case] expected: Option<ParseFilenameResult>) {
        let actual = parse_maven_filename(file_name, artifact_id, version_string);

        if let Some(expected) = expected {
            let actual = actual.unwrap();
            assert_eq!(actual, expected);
        }
        else {
            assert!(actual.is_err());
        }
    }

    #[rstest]
    #[case::release("org.acme:lib#1.0", PartIdentification::jar(), "org/acme/lib/1.0/lib-1.0.jar")]
    #[case::pom("org.acme:lib#1.0", PartIdentification::pom(), "org/acme/lib/1.0/lib-1.0.pom")]
    #[case::sources("org.acme:lib#1.0", PartIdentification::sources(), "org/acme/lib/1.0/lib-1.0-sources.jar")]
    #[case::snapshot("org.acme:lib#1.0-SNAPSHOT", PartIdentification::jar(), "org/acme/lib/1.0-SNAPSHOT/lib-1.0-SNAPSHOT.jar")]
    #[case::timestamped("org.acme:lib#1.0-20230102.101112-3", PartIdentification::sources(), "org/acme/lib/1.0-SNAPSHOT/lib-1.0-20230102.101112-3-sources.jar")]
    fn test_as_maven_path(#[case] coordinate: &str, #[case] part: PartIdentification, #[case] expected: &str) {
        let part_ref = Coordinate::parse(coordinate).unwrap().part(part);
        let path = as_maven_path(&part_ref);
        assert_eq!(path, expected);
        assert_eq!(parse_maven_path(&path).unwrap(), part_ref);
    }

    #[rstest]
    #[case::too_few_segments("lib/1.0/lib-1.0.jar")]
    #[case::no_file("org/acme/lib/1.0/")]
    fn test_parse_maven_path_invalid(#[case] path: &str) {
        assert!(parse_maven_path(path).is_err());
    }
}
